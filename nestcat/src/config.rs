use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    concat::{ConcatMethod, ConcatOptions},
    errors::{Error, Result},
    paths::{PathCodec, DEFAULT_COORDINATE_DELIMITER, DEFAULT_GROUP_DELIMITER},
};

/// Settings for one concatenation run
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub concat_method: ConcatMethod,

    /// Dimension to concatenate along. Required for axis-concat.
    pub concat_dim: Option<String>,

    /// Path of a variable whose first value orders the inputs
    pub sorting_variable: Option<String>,

    pub group_delimiter: String,
    pub coordinate_delimiter: String,
    pub overwrite_output: bool,

    /// Refuse inputs whose group hierarchies differ from the first input's
    pub check_structure: bool,

    /// Also write the combined flat dataset next to the output, for debugging
    pub write_flat_intermediate: bool,

    pub concat_options: ConcatOptions,

    /// Provenance text stored in the output's `history_json` attribute
    pub history_json: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concat_method: ConcatMethod::default(),
            concat_dim: None,
            sorting_variable: None,
            group_delimiter: DEFAULT_GROUP_DELIMITER.to_string(),
            coordinate_delimiter: DEFAULT_COORDINATE_DELIMITER.to_string(),
            overwrite_output: false,
            check_structure: true,
            write_flat_intermediate: false,
            concat_options: ConcatOptions::default(),
            history_json: None,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Set one option by name. Names of concatenation engine options are accepted too.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "concat_method" => self.concat_method = value.parse()?,
            "concat_dim" => self.concat_dim = non_empty(value),
            "sorting_variable" => self.sorting_variable = non_empty(value),
            "group_delimiter" => self.group_delimiter = value.to_string(),
            "coordinate_delimiter" => self.coordinate_delimiter = value.to_string(),
            "overwrite_output" => self.overwrite_output = parse_bool(key, value)?,
            "check_structure" => self.check_structure = parse_bool(key, value)?,
            "write_flat_intermediate" => self.write_flat_intermediate = parse_bool(key, value)?,
            "history_json" => self.history_json = non_empty(value),
            other => self.concat_options.set(other, value)?,
        }

        Ok(())
    }

    /// Check the settings and build the path codec they describe
    pub fn validate(&self) -> Result<PathCodec> {
        validate_concat_method_and_dim(self.concat_method, self.concat_dim.as_deref())?;

        PathCodec::new(
            self.group_delimiter.as_str(),
            self.coordinate_delimiter.as_str(),
        )
    }
}

/// axis-concat needs a dimension, coordinate-combine ignores one
pub fn validate_concat_method_and_dim(method: ConcatMethod, dim: Option<&str>) -> Result<()> {
    match (method, dim) {
        (ConcatMethod::AxisConcat, None) => Err(Error::MissingConcatDim),
        (ConcatMethod::CoordinateCombine, Some(dim)) => {
            warn!(
                concat_dim = dim,
                "concat_dim is ignored by the coordinate-combine method"
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::BadOption {
            name: key.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::concat::Compat;

    #[test]
    fn test_defaults() -> Result<()> {
        let config = Config::default();
        assert_eq!(config.concat_method, ConcatMethod::AxisConcat);
        assert_eq!(config.group_delimiter, "__");
        assert_eq!(config.coordinate_delimiter, "  ");
        assert!(config.check_structure);
        assert!(!config.overwrite_output);

        // axis-concat without a dimension
        assert!(matches!(config.validate(), Err(Error::MissingConcatDim)));

        Ok(())
    }

    #[test]
    fn test_from_json() -> Result<()> {
        let config = Config::from_json(
            r#"{
                "concat_method": "coordinate-combine",
                "sorting_variable": "time",
                "concat_options": {"compat": "override"}
            }"#,
        )?;
        assert_eq!(config.concat_method, ConcatMethod::CoordinateCombine);
        assert_eq!(config.sorting_variable.as_deref(), Some("time"));
        assert_eq!(config.concat_options.compat, Compat::Override);
        assert_eq!(config.group_delimiter, "__");
        assert!(config.validate().is_ok());

        Ok(())
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"concat_dimension": "step"}"#),
            Err(Error::Json(_))
        ));

        let mut config = Config::default();
        assert!(matches!(
            config.set("concat_dimension", "step"),
            Err(Error::UnknownOption(_))
        ));
    }

    #[test]
    fn test_set() -> Result<()> {
        let mut config = Config::default();
        config.set("concat_dim", "step")?;
        config.set("overwrite_output", "true")?;
        config.set("compat", "identical")?;
        config.set("group_delimiter", "::")?;

        assert_eq!(config.concat_dim.as_deref(), Some("step"));
        assert!(config.overwrite_output);
        assert_eq!(config.concat_options.compat, Compat::Identical);

        let codec = config.validate()?;
        assert_eq!(codec.flatten("a/b"), "::a::b");

        assert!(config.set("overwrite_output", "maybe").is_err());
        assert!(config.set("concat_method", "xarray-concat").is_err());

        Ok(())
    }

    #[test]
    fn test_bad_delimiter_fails_validation() {
        let config = Config {
            concat_dim: Some("step".into()),
            group_delimiter: "a/b".into(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::BadOption { name, .. }) if name == "group_delimiter"
        ));
    }

    #[test]
    fn test_combine_with_dim_is_accepted() {
        assert!(validate_concat_method_and_dim(ConcatMethod::CoordinateCombine, Some("step")).is_ok());
        assert!(validate_concat_method_and_dim(ConcatMethod::CoordinateCombine, None).is_ok());
        assert!(validate_concat_method_and_dim(ConcatMethod::AxisConcat, Some("step")).is_ok());
    }
}
