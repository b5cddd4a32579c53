//! Encoding between slash separated group paths and flat delimited names.
//!
//! A member `var` of group `Group1/sub` is known in the flat namespace as
//! `__Group1__sub__var` with the default group delimiter. Root members still carry the leading
//! delimiter: `var` becomes `__var`.
//!
use crate::errors::{Error, Result};

pub const DEFAULT_GROUP_DELIMITER: &str = "__";
pub const DEFAULT_COORDINATE_DELIMITER: &str = "  ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathCodec {
    group_delimiter: String,
    coordinate_delimiter: String,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self {
            group_delimiter: DEFAULT_GROUP_DELIMITER.to_string(),
            coordinate_delimiter: DEFAULT_COORDINATE_DELIMITER.to_string(),
        }
    }
}

impl PathCodec {
    pub fn new<G, C>(group_delimiter: G, coordinate_delimiter: C) -> Result<Self>
    where
        G: Into<String>,
        C: Into<String>,
    {
        let group_delimiter = group_delimiter.into();
        let coordinate_delimiter = coordinate_delimiter.into();

        if group_delimiter.is_empty()
            || group_delimiter.contains('/')
            || group_delimiter.chars().any(char::is_whitespace)
        {
            return Err(Error::BadOption {
                name: "group_delimiter".into(),
                reason: format!(
                    "'{group_delimiter}' must be non-empty and contain no '/' or whitespace"
                ),
            });
        }

        if coordinate_delimiter.is_empty() || !coordinate_delimiter.chars().all(char::is_whitespace)
        {
            return Err(Error::BadOption {
                name: "coordinate_delimiter".into(),
                reason: format!("'{coordinate_delimiter}' must be non-empty whitespace"),
            });
        }

        Ok(Self {
            group_delimiter,
            coordinate_delimiter,
        })
    }

    pub fn group_delimiter(&self) -> &str {
        &self.group_delimiter
    }

    pub fn flatten(&self, path: &str) -> String {
        let flat = path.replace('/', &self.group_delimiter);
        if flat.starts_with(&self.group_delimiter) {
            flat
        } else {
            format!("{}{flat}", self.group_delimiter)
        }
    }

    pub fn unflatten(&self, flat: &str) -> String {
        let (group_path, leaf) = self.split(flat);

        member_path(&group_path, &leaf)
    }

    /// Flat name of member `leaf` of the group at `group_path` (empty for the root).
    ///
    /// Every group segment and the leaf get their own delimiter, so a leaf that itself starts
    /// with the delimiter, like `__char8`, shows up as a doubled delimiter: `__Group1____char8`.
    ///
    pub fn join(&self, group_path: &str, leaf: &str) -> String {
        let delimiter = &self.group_delimiter;
        let mut flat = String::new();
        for segment in group_path.split('/').filter(|segment| !segment.is_empty()) {
            flat.push_str(delimiter);
            flat.push_str(segment);
        }
        flat.push_str(delimiter);
        flat.push_str(leaf);

        flat
    }

    /// Owning group path and leaf name of a flat name. The root group path is empty.
    pub fn split(&self, flat: &str) -> (String, String) {
        let delimiter = self.group_delimiter.as_str();
        let stripped = flat.strip_prefix(delimiter).unwrap_or(flat);
        let segments: Vec<&str> = stripped.split(delimiter).collect();

        // Group names are never empty, so an empty segment starts a delimiter-led leaf
        let (groups, leaf) = match segments.iter().position(|segment| segment.is_empty()) {
            Some(index) if index + 1 < segments.len() => (
                &segments[..index],
                format!("{delimiter}{}", segments[index + 1..].join(delimiter)),
            ),
            _ => match segments.split_last() {
                Some((leaf, groups)) => (groups, leaf.to_string()),
                None => (&segments[..0], String::new()),
            },
        };

        (groups.join("/"), leaf)
    }

    /// Whether `join(group_path, leaf)` splits back into the same pair
    pub(crate) fn check_reversible(&self, group_path: &str, leaf: &str) -> Result<String> {
        let flat = self.join(group_path, leaf);
        let (group, name) = self.split(&flat);
        if group != group_path || name != leaf {
            return Err(Error::IrreversibleName {
                path: member_path(group_path, leaf),
                delimiter: self.group_delimiter.clone(),
            });
        }

        Ok(flat)
    }

    pub fn flatten_coordinates(&self, list: &str) -> String {
        self.map_coordinates(list, |token| self.flatten(token))
    }

    pub fn unflatten_coordinates(&self, list: &str) -> String {
        self.map_coordinates(list, |token| self.unflatten(token))
    }

    fn map_coordinates<F: Fn(&str) -> String>(&self, list: &str, convert: F) -> String {
        let separator = self.separator(list);
        let tokens: Vec<String> = list.split_whitespace().map(convert).collect();

        tokens.join(separator)
    }

    /// The whitespace run to join a coordinate list with: the run the list already uses when it
    /// uses exactly one, the configured default otherwise. A single token never needs one.
    fn separator<'a>(&'a self, list: &'a str) -> &'a str {
        let mut runs = whitespace_runs(list);
        match runs.next() {
            Some(first) if runs.all(|run| run == first) => first,
            _ => &self.coordinate_delimiter,
        }
    }
}

/// Maximal runs of whitespace between the tokens of a coordinate list
fn whitespace_runs(list: &str) -> impl Iterator<Item = &str> {
    let trimmed = list.trim();
    let mut runs = vec![];
    let mut start = None;
    for (index, c) in trimmed.char_indices() {
        match (c.is_whitespace(), start) {
            (true, None) => start = Some(index),
            (false, Some(begin)) => {
                runs.push(&trimmed[begin..index]);
                start = None;
            }
            _ => {}
        }
    }

    runs.into_iter()
}

/// Slash separated path of member `name` of the group at `group_path`
pub(crate) fn member_path(group_path: &str, name: &str) -> String {
    if group_path.is_empty() {
        name.to_string()
    } else {
        format!("{group_path}/{name}")
    }
}

/// A group path followed by the paths of its ancestors, nearest first, ending with the root
pub(crate) fn ancestry(group_path: &str) -> Vec<&str> {
    let mut chain = vec![group_path];
    let mut current = group_path;
    while let Some((parent, _)) = current.rsplit_once('/') {
        chain.push(parent);
        current = parent;
    }
    if !group_path.is_empty() {
        chain.push("");
    }

    chain
}

/// Replace whole tokens equal to `from` with `to`, keeping the original whitespace
pub fn rename_coordinate(list: &str, from: &str, to: &str) -> String {
    let mut renamed = String::with_capacity(list.len());
    let mut token_start = None;
    for (index, c) in list.char_indices() {
        if c.is_whitespace() {
            if let Some(begin) = token_start.take() {
                push_token(&mut renamed, &list[begin..index], from, to);
            }
            renamed.push(c);
        } else if token_start.is_none() {
            token_start = Some(index);
        }
    }
    if let Some(begin) = token_start {
        push_token(&mut renamed, &list[begin..], from, to);
    }

    renamed
}

fn push_token(out: &mut String, token: &str, from: &str, to: &str) {
    out.push_str(if token == from { to } else { token });
}
