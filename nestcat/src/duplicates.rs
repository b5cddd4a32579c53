//! Repair of variables that use the same dimension for two axes.
//!
//! The concatenation engine addresses axes by dimension name, so a variable such as
//! `covariance(channel, channel)` cannot pass through it. The last occurrence of the repeated
//! dimension is switched to a clone of the dimension, and the clone gets a copy of the
//! dimension's coordinate variable when there is one.
//!
use tracing::debug;

use crate::{
    dataset::{Group, Variable},
    errors::{Error, Result},
    paths::rename_coordinate,
};

/// A repaired variable and the dimension clone its repeated axis now uses
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionClone {
    pub variable: String,
    pub original: String,
    pub clone: String,

    /// Whether a coordinate variable was created for the clone by this repair
    pub coordinate_cloned: bool,
}

/// Remove repeated dimensions from every variable of a flat group
pub fn resolve(group: &mut Group) -> Result<Vec<DimensionClone>> {
    let offenders: Vec<String> = group
        .variables
        .iter()
        .filter(|variable| variable.has_duplicate_dimensions())
        .map(|variable| variable.name.clone())
        .collect();

    let mut clones = Vec::with_capacity(offenders.len());
    // (original, length, clone) for every dimension cloned here
    let mut created: Vec<(String, usize, String)> = vec![];
    for name in offenders {
        let (original, axis, len) = match group.variable(&name) {
            Some(variable) => {
                let original = repeated_dimension(variable)?;
                let axis = variable
                    .dimensions
                    .iter()
                    .rposition(|dim| *dim == original)
                    .unwrap_or_default();
                (original, axis, variable.shape()[axis])
            }
            None => continue,
        };

        let reused = created
            .iter()
            .find(|(dim, size, _)| *dim == original && *size == len)
            .map(|(_, _, clone)| clone.clone());
        let mut coordinate_cloned = false;
        let clone = match reused {
            Some(clone) => clone,
            None => {
                let clone = clone_name(group, &original);
                group.add_dimension(clone.as_str(), len)?;
                if let Some(coordinate) = clone_coordinate(group, &original, &clone) {
                    group.add_variable(coordinate)?;
                    coordinate_cloned = true;
                }
                created.push((original.clone(), len, clone.clone()));
                clone
            }
        };

        if let Some(variable) = group.variable_mut(&name) {
            variable.dimensions[axis] = clone.clone();
        }
        debug!(
            variable = %name,
            dimension = %original,
            clone = %clone,
            "Replaced repeated dimension"
        );

        clones.push(DimensionClone {
            variable: name,
            original,
            clone,
            coordinate_cloned,
        });
    }

    Ok(clones)
}

/// The one dimension `variable` uses twice
fn repeated_dimension(variable: &Variable) -> Result<String> {
    let mut counts: Vec<(&str, usize)> = vec![];
    for dim in &variable.dimensions {
        match counts.iter_mut().find(|(name, _)| name == dim) {
            Some((_, count)) => *count += 1,
            None => counts.push((dim.as_str(), 1)),
        }
    }
    let repeated: Vec<(&str, usize)> = counts.into_iter().filter(|&(_, n)| n > 1).collect();

    match repeated.as_slice() {
        &[(name, 2)] => Ok(name.to_string()),
        _ => Err(Error::UnsupportedDuplicateDimensions {
            variable: variable.name.clone(),
            dimensions: repeated.iter().map(|(name, _)| name.to_string()).collect(),
        }),
    }
}

/// The first `D_k` naming neither a dimension nor a variable of `group`
fn clone_name(group: &Group, original: &str) -> String {
    (1..)
        .map(|k| format!("{original}_{k}"))
        .find(|name| group.dimension(name).is_none() && group.variable(name).is_none())
        .unwrap_or_default()
}

/// Copy of the coordinate variable of `original`, along the clone dimension
fn clone_coordinate(group: &Group, original: &str, clone: &str) -> Option<Variable> {
    if group.variable(clone).is_some() {
        return None;
    }
    let coordinate = group.variable(original)?;
    if coordinate.dimensions.len() != 1 {
        return None;
    }

    let mut copy = coordinate.clone();
    copy.name = clone.to_string();
    copy.dimensions = vec![clone.to_string()];
    if let Some(list) = copy.attributes.text("coordinates") {
        let renamed = rename_coordinate(list, original, clone);
        copy.attributes.set("coordinates", renamed);
    }

    Some(copy)
}
