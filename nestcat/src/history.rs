//! Provenance records carried in the `history_json` global attribute.
//!
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    codec,
    dataset::Container,
    errors::{Error, Result},
};

pub const HISTORY_ATTRIBUTE: &str = "history_json";

pub const HISTORY_SCHEMA: &str =
    "https://harmony.earthdata.nasa.gov/schemas/history/0.1.0/history-v0.1.0.json";

/// One processing step in a file's history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "$schema")]
    pub schema: String,

    pub date_time: String,
    pub program: String,
    pub version: String,
    pub parameters: String,
    pub derived_from: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub program_ref: Option<String>,
}

impl HistoryRecord {
    /// A record for a run of this crate over `files`, stamped with the current time
    pub fn for_run(files: &[PathBuf], program_ref: Option<&str>) -> Self {
        let derived_from: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();

        Self {
            schema: HISTORY_SCHEMA.to_string(),
            date_time: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            program: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            parameters: format!("input_files={derived_from:?}"),
            derived_from,
            program_ref: program_ref.map(str::to_string),
        }
    }
}

/// Records already present in a container's `history_json` attribute
pub fn retrieve_history(container: &Container) -> Result<Vec<Value>> {
    let text = match container.root.attributes.get(HISTORY_ATTRIBUTE) {
        None => return Ok(vec![]),
        Some(value) => value.as_text().ok_or_else(|| Error::BadOption {
            name: HISTORY_ATTRIBUTE.into(),
            reason: "attribute is not text".into(),
        })?,
    };

    match serde_json::from_str(text)? {
        Value::Array(records) => Ok(records),
        record @ Value::Object(_) => Ok(vec![record]),
        other => Err(Error::BadOption {
            name: HISTORY_ATTRIBUTE.into(),
            reason: format!("expected a record or a list of records, found {other}"),
        }),
    }
}

fn history_of(path: &Path) -> Result<Vec<Value>> {
    retrieve_history(&codec::open(path)?)
}

/// History for the output of concatenating `files`: the history of every input, in order,
/// followed by a record for this run. Returns the serialized JSON array.
pub fn collect_history(files: &[PathBuf], program_ref: Option<&str>) -> Result<String> {
    let mut records = vec![];
    for path in files {
        match history_of(path) {
            Ok(mut history) => records.append(&mut history),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "Cannot read history, skipping it")
            }
        }
    }
    records.push(serde_json::to_value(HistoryRecord::for_run(files, program_ref))?);

    Ok(serde_json::to_string(&records)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing;

    #[test]
    fn test_record_fields() -> Result<()> {
        let files = vec![PathBuf::from("a.nest"), PathBuf::from("b.nest")];
        let record = HistoryRecord::for_run(&files, None);
        let json = serde_json::to_value(&record)?;

        assert_eq!(json["$schema"], HISTORY_SCHEMA);
        assert_eq!(json["program"], "nestcat");
        assert_eq!(json["derived_from"], serde_json::json!(["a.nest", "b.nest"]));
        assert_eq!(json["parameters"], r#"input_files=["a.nest", "b.nest"]"#);
        assert!(json.get("program_ref").is_none());

        // e.g. 2024-05-01T12:00:00.123456+00:00
        let stamp = json["date_time"].as_str().unwrap();
        assert!(stamp.ends_with("+00:00"));
        assert_eq!(stamp.split('.').nth(1).map(str::len), Some(12));

        Ok(())
    }

    #[test]
    fn test_retrieve_history() -> Result<()> {
        let mut container = Container::new();
        assert!(retrieve_history(&container)?.is_empty());

        container
            .root
            .attributes
            .set(HISTORY_ATTRIBUTE, r#"{"program": "l2gen"}"#);
        assert_eq!(retrieve_history(&container)?.len(), 1);

        container
            .root
            .attributes
            .set(HISTORY_ATTRIBUTE, r#"[{"program": "a"}, {"program": "b"}]"#);
        let records = retrieve_history(&container)?;
        assert_eq!(records[1]["program"], "b");

        container.root.attributes.set(HISTORY_ATTRIBUTE, "42");
        assert!(retrieve_history(&container).is_err());

        container.root.attributes.set(HISTORY_ATTRIBUTE, "not json");
        assert!(matches!(retrieve_history(&container), Err(Error::Json(_))));

        Ok(())
    }

    #[test]
    fn test_collect_history() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut first = testing::toy_container(&[1, 2], 0.0);
        first
            .root
            .attributes
            .set(HISTORY_ATTRIBUTE, r#"[{"program": "upstream"}]"#);
        let files = vec![
            testing::write_container(dir.path(), "first.nest", &first),
            testing::write_container(dir.path(), "second.nest", &testing::toy_container(&[3], 0.0)),
            dir.path().join("missing.nest"),
        ];

        let text = collect_history(&files, Some("https://example.org/nestcat"))?;
        let records: Vec<Value> = serde_json::from_str(&text)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["program"], "upstream");
        assert_eq!(records[1]["program_ref"], "https://example.org/nestcat");
        assert_eq!(records[1]["derived_from"].as_array().map(Vec::len), Some(3));

        Ok(())
    }
}
