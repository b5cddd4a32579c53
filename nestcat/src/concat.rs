//! Dimension-based concatenation of flat datasets.
//!
//! A flat dataset is a [`Group`] with no children. Two strategies are offered: [`concat`] stacks
//! datasets along a named dimension in the order given, [`combine_by_coords`] works out the
//! varying dimension and the order from the dimension coordinates themselves.
//!
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    array::ArrayData,
    attributes::Attributes,
    dataset::{Dimension, Group, Variable},
    errors::{Error, Result},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcatMethod {
    /// Stack inputs along a named dimension in sorted order
    #[default]
    AxisConcat,

    /// Order and join inputs by the values of their dimension coordinates
    CoordinateCombine,
}

impl FromStr for ConcatMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "axis-concat" => Ok(ConcatMethod::AxisConcat),
            "coordinate-combine" => Ok(ConcatMethod::CoordinateCombine),
            other => Err(Error::BadConcatMethod(other.to_string())),
        }
    }
}

impl fmt::Display for ConcatMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConcatMethod::AxisConcat => "axis-concat",
            ConcatMethod::CoordinateCombine => "coordinate-combine",
        })
    }
}

/// How variables that are not concatenated must agree across inputs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compat {
    #[default]
    Equals,
    Identical,
    Override,
}

/// How attributes of the inputs are merged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineAttrs {
    #[default]
    Override,
    Drop,
    DropConflicts,
    NoConflicts,
    Identical,
}

/// How indexes along dimensions other than the concatenation dimension must agree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Join {
    #[default]
    Exact,
    Override,
}

macro_rules! OptionEnum {
    ($name:ident, $option:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::BadOption {
                        name: $option.into(),
                        reason: format!("'{other}' is not one of {}", [$($text),+].join(", ")),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($name::$variant => $text,)+
                })
            }
        }
    };
}

OptionEnum!(Compat, "compat", {
    Equals => "equals",
    Identical => "identical",
    Override => "override",
});

OptionEnum!(CombineAttrs, "combine_attrs", {
    Override => "override",
    Drop => "drop",
    DropConflicts => "drop_conflicts",
    NoConflicts => "no_conflicts",
    Identical => "identical",
});

OptionEnum!(Join, "join", {
    Exact => "exact",
    Override => "override",
});

/// Overrides passed through to the concatenation engine
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcatOptions {
    pub compat: Compat,
    pub combine_attrs: CombineAttrs,
    pub join: Join,
}

impl ConcatOptions {
    /// Set one option by name
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "compat" => self.compat = value.parse()?,
            "combine_attrs" => self.combine_attrs = value.parse()?,
            "join" => self.join = value.parse()?,
            other => return Err(Error::UnknownOption(other.to_string())),
        }

        Ok(())
    }
}

/// Concatenate datasets along `dim`, in the order given.
///
/// Only variables that contain `dim` are concatenated. Every other variable must agree across
/// the inputs according to `options.compat` (dimension coordinates according to `options.join`)
/// and is taken from the first input. If no input has `dim`, or `dim` is None, the inputs are
/// merged the same way.
///
pub fn concat(datasets: &[&Group], dim: Option<&str>, options: &ConcatOptions) -> Result<Group> {
    let first = *datasets.first().ok_or(Error::NothingToConcatenate)?;
    let dim = dim.filter(|name| datasets.iter().any(|ds| ds.dimension(name).is_some()));

    let mut out = Group::new(first.name.clone());
    let attributes: Vec<&Attributes> = datasets.iter().map(|ds| &ds.attributes).collect();
    out.attributes = combine_attributes(&attributes, options.combine_attrs)?;

    let dim_names = union(
        datasets
            .iter()
            .flat_map(|ds| ds.dimensions.iter().map(|d| d.name.as_str())),
    );
    for name in dim_names {
        let lens = datasets
            .iter()
            .map(|ds| {
                ds.dimension(name)
                    .map(|d| d.len)
                    .ok_or_else(|| Error::NotInAllDatasets(name.to_string()))
            })
            .collect::<Result<Vec<usize>>>()?;

        let len = if Some(name) == dim {
            lens.iter().sum()
        } else if lens.iter().all(|&len| len == lens[0]) {
            lens[0]
        } else {
            return Err(Error::DimensionMismatch {
                dimension: name.to_string(),
                sizes: lens,
            });
        };
        out.push_dimension(Dimension::new(name, len))?;
    }

    let var_names = union(
        datasets
            .iter()
            .flat_map(|ds| ds.variables.iter().map(|v| v.name.as_str())),
    );
    for name in var_names {
        let copies = datasets
            .iter()
            .map(|ds| {
                ds.variable(name)
                    .ok_or_else(|| Error::NotInAllDatasets(name.to_string()))
            })
            .collect::<Result<Vec<&Variable>>>()?;

        let axis = dim.and_then(|dim| copies[0].dimensions.iter().position(|d| d == dim));
        let variable = match axis {
            Some(axis) => concat_variable(&copies, axis, options),
            None => merge_variable(&copies, options),
        }
        .map_err(Error::in_variable(name))?;
        out.add_variable(variable)?;
    }

    Ok(out)
}

/// Combine datasets by the values of their dimension coordinates.
///
/// Exactly one dimension coordinate may differ between inputs. The inputs are ordered by its
/// first value and concatenated along it, and the result must be monotonic along that
/// dimension. If no dimension coordinate differs, the inputs are merged.
///
pub fn combine_by_coords(datasets: &[&Group], options: &ConcatOptions) -> Result<Group> {
    let first = *datasets.first().ok_or(Error::NothingToConcatenate)?;
    if datasets.len() == 1 {
        return concat(datasets, None, options);
    }

    let coordinates: Vec<&str> = first
        .variables
        .iter()
        .filter(|v| v.is_dimension_coordinate())
        .map(|v| v.name.as_str())
        .collect();
    if coordinates.is_empty() {
        return Err(Error::CannotCombine(
            "could not find any dimension coordinates to use to order the datasets".into(),
        ));
    }

    let mut varying = vec![];
    for name in coordinates {
        let copies = datasets
            .iter()
            .map(|ds| {
                ds.variable(name)
                    .ok_or_else(|| Error::NotInAllDatasets(name.to_string()))
            })
            .collect::<Result<Vec<&Variable>>>()?;
        let direction = common_direction(name, &copies)?;
        if copies[1..].iter().any(|v| !v.data.equals(&copies[0].data)) {
            varying.push((name, direction));
        }
    }

    match varying.as_slice() {
        [] => {
            debug!("No dimension coordinate varies between datasets, merging");
            concat(datasets, None, options)
        }
        &[(name, direction)] => {
            let mut keys = Vec::with_capacity(datasets.len());
            for (index, ds) in datasets.iter().enumerate() {
                let key = ds
                    .variable(name)
                    .and_then(|v| v.data.first())
                    .and_then(|value| value.to_f64())
                    .ok_or_else(|| {
                        Error::CannotCombine(format!(
                            "dimension coordinate '{name}' is empty in dataset {index}"
                        ))
                    })?;
                keys.push((key, index));
            }

            match direction {
                Ordering::Greater => keys.sort_by(|a, b| b.0.total_cmp(&a.0)),
                _ => keys.sort_by(|a, b| a.0.total_cmp(&b.0)),
            }
            debug!(dimension = name, "Combining datasets along varying dimension");

            let ordered: Vec<&Group> = keys.iter().map(|&(_, index)| datasets[index]).collect();
            let combined = concat(&ordered, Some(name), options)?;
            let monotonic = combined
                .variable(name)
                .and_then(|v| v.data.monotonic_direction())
                .is_some();
            if !monotonic {
                return Err(Error::CannotCombine(format!(
                    "resulting object does not have monotonic global indexes along dimension '{name}'"
                )));
            }

            Ok(combined)
        }
        _ => {
            let names: Vec<&str> = varying.iter().map(|(name, _)| *name).collect();
            Err(Error::CannotCombine(format!(
                "datasets vary along more than one dimension coordinate {names:?}; only one \
                 dimensional combination is supported"
            )))
        }
    }
}

/// Merge attribute sets according to `policy`
pub fn combine_attributes(sets: &[&Attributes], policy: CombineAttrs) -> Result<Attributes> {
    let first = match sets.first() {
        Some(first) => *first,
        None => return Ok(Attributes::new()),
    };

    match policy {
        CombineAttrs::Override => Ok(first.clone()),
        CombineAttrs::Drop => Ok(Attributes::new()),
        CombineAttrs::Identical => {
            if sets[1..].iter().all(|attrs| *attrs == first) {
                Ok(first.clone())
            } else {
                Err(Error::Conflict(
                    "attributes differ between datasets under combine_attrs=identical".into(),
                ))
            }
        }
        CombineAttrs::NoConflicts | CombineAttrs::DropConflicts => {
            let mut combined = Attributes::new();
            let mut dropped = BTreeSet::new();
            for attrs in sets {
                for (name, value) in attrs.iter() {
                    if dropped.contains(name) {
                        continue;
                    }
                    match combined.get(name) {
                        None => combined.set(name, value.clone()),
                        Some(existing) if existing == value => {}
                        Some(_) if policy == CombineAttrs::DropConflicts => {
                            combined.remove(name);
                            dropped.insert(name.to_string());
                        }
                        Some(_) => {
                            return Err(Error::Conflict(format!(
                                "attribute '{name}' differs between datasets"
                            )))
                        }
                    }
                }
            }

            Ok(combined)
        }
    }
}

fn concat_variable(copies: &[&Variable], axis: usize, options: &ConcatOptions) -> Result<Variable> {
    let template = copies[0];
    if let Some(other) = copies.iter().find(|v| v.dimensions != template.dimensions) {
        return Err(Error::Conflict(format!(
            "dimensions {:?} and {:?} differ between datasets",
            template.dimensions, other.dimensions
        )));
    }

    let parts: Vec<&ArrayData> = copies.iter().map(|v| &v.data).collect();
    let attributes: Vec<&Attributes> = copies.iter().map(|v| &v.attributes).collect();

    Ok(Variable {
        name: template.name.clone(),
        dimensions: template.dimensions.clone(),
        attributes: combine_attributes(&attributes, options.combine_attrs)?,
        data: ArrayData::concatenate(axis, &parts)?,
        encoding: template.encoding.clone(),
    })
}

fn merge_variable(copies: &[&Variable], options: &ConcatOptions) -> Result<Variable> {
    let template = copies[0];
    let (rule, setting) = if template.is_dimension_coordinate() {
        match options.join {
            Join::Exact => (Compat::Equals, "join=exact"),
            Join::Override => (Compat::Override, "join=override"),
        }
    } else {
        let setting = match options.compat {
            Compat::Equals => "compat=equals",
            Compat::Identical => "compat=identical",
            Compat::Override => "compat=override",
        };
        (options.compat, setting)
    };

    for other in &copies[1..] {
        let agrees = match rule {
            Compat::Override => true,
            Compat::Equals => {
                other.dimensions == template.dimensions && other.data.equals(&template.data)
            }
            Compat::Identical => {
                other.dimensions == template.dimensions
                    && other.data.equals(&template.data)
                    && other.attributes == template.attributes
            }
        };
        if !agrees {
            return Err(Error::Conflict(format!(
                "values differ between datasets under {setting}"
            )));
        }
    }

    Ok(template.clone())
}

fn common_direction(name: &str, copies: &[&Variable]) -> Result<Ordering> {
    let not_monotonic = || {
        Error::CannotCombine(format!(
            "coordinate variable '{name}' is neither monotonically increasing nor monotonically \
             decreasing on all datasets"
        ))
    };

    let mut common = Ordering::Equal;
    for var in copies {
        let direction = var.data.monotonic_direction().ok_or_else(not_monotonic)?;
        match (common, direction) {
            (_, Ordering::Equal) => {}
            (Ordering::Equal, direction) => common = direction,
            (common, direction) if common == direction => {}
            _ => return Err(not_monotonic()),
        }
    }

    Ok(common)
}

/// Names in first-seen order, without repeats
fn union<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    names.filter(|name| seen.insert(*name)).collect()
}
