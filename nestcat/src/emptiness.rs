//! Deciding whether a granule holds any data worth concatenating.
//!
//! A variable is empty when it has no elements, when every element is masked, or when every
//! element is NaN. Masking follows the usual netCDF conventions: an element is masked if it
//! equals the fill value or one of the `missing_value` entries, or lies outside the range given
//! by `valid_min`, `valid_max` or `valid_range`.
//!
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use num_traits::{NumCast, ToPrimitive};
use tracing::{debug, info, warn};

use crate::{
    array::{dispatch_numeric, DType, Value},
    attributes::AttrValue,
    codec,
    dataset::{Group, Variable},
    errors::Error,
};

/// Outcome of opening a candidate input file
#[derive(Debug)]
pub enum Workability {
    Workable,
    Empty,
    Unreadable(Error),
}

pub fn classify(path: &Path) -> Workability {
    match codec::open(path) {
        Ok(container) if is_empty(&container.root) => Workability::Empty,
        Ok(_) => Workability::Workable,
        Err(err) => Workability::Unreadable(err),
    }
}

/// Whether a group and all its descendants hold nothing but empty variables
pub fn is_empty(group: &Group) -> bool {
    group.variables.iter().all(variable_is_empty) && group.groups.iter().all(is_empty)
}

pub fn variable_is_empty(variable: &Variable) -> bool {
    if variable.size() == 0 {
        return true;
    }

    let mask = Mask::of(variable);
    dispatch_numeric!(
        &variable.data,
        a => all_masked(a, &mask) || all_nan(a),
        s => {
            let fill = mask.fill.as_ref().and_then(Value::as_str);
            s.iter().all(|text| text.is_empty() || Some(text.as_str()) == fill)
        }
    )
}

/// Drop unreadable and empty files, keeping input order.
///
/// If that leaves nothing, the first input is kept anyway so there is still one granule to
/// carry through to the output. Returns the kept files and their count.
///
pub fn filter_workable(files: &[PathBuf]) -> (Vec<PathBuf>, usize) {
    let mut workable = Vec::with_capacity(files.len());
    for path in files {
        match classify(path) {
            Workability::Workable => workable.push(path.clone()),
            Workability::Empty => debug!(file = %path.display(), "Skipping empty file"),
            Workability::Unreadable(err) => {
                warn!(file = %path.display(), error = %err, "Cannot open file, skipping it")
            }
        }
    }

    if workable.is_empty() {
        if let Some(first) = files.first() {
            info!(file = %first.display(), "No workable files, passing the first input through");
            workable.push(first.clone());
        }
    }

    let count = workable.len();
    (workable, count)
}

struct Mask {
    fill: Option<Value>,
    missing: Vec<f64>,
    valid_min: Option<f64>,
    valid_max: Option<f64>,
}

impl Mask {
    fn of(variable: &Variable) -> Self {
        let attributes = &variable.attributes;
        let first = |name: &str| {
            attributes
                .get(name)
                .and_then(|value| value.to_f64_vec().first().copied())
        };
        let range = attributes
            .get("valid_range")
            .map(AttrValue::to_f64_vec)
            .filter(|range| range.len() == 2);

        let fill = match (&variable.encoding.fill_value, variable.dtype()) {
            (Some(fill), _) => Some(fill.clone()),
            // Unset character cells are NUL
            (None, DType::Char) => Some(Value::Char(0)),
            (None, _) => None,
        };

        Self {
            fill,
            missing: attributes
                .get("missing_value")
                .map(AttrValue::to_f64_vec)
                .unwrap_or_default(),
            valid_min: first("valid_min").or_else(|| range.as_ref().map(|r| r[0])),
            valid_max: first("valid_max").or_else(|| range.as_ref().map(|r| r[1])),
        }
    }
}

fn all_masked<T>(array: &ArrayD<T>, mask: &Mask) -> bool
where
    T: Copy + PartialEq + NumCast + ToPrimitive,
{
    let fill: Option<T> = mask.fill.as_ref().and_then(Value::cast);

    array.iter().all(|&value| {
        if Some(value) == fill {
            return true;
        }
        match value.to_f64() {
            Some(x) => {
                mask.missing.contains(&x)
                    || mask.valid_min.map_or(false, |min| x < min)
                    || mask.valid_max.map_or(false, |max| x > max)
            }
            None => false,
        }
    })
}

fn all_nan<T: Copy + ToPrimitive>(array: &ArrayD<T>) -> bool {
    array
        .iter()
        .all(|value| value.to_f64().map_or(false, f64::is_nan))
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{arr1, arr2};

    use crate::array::ArrayData;
    use crate::dataset::Container;
    use crate::testing;

    fn f32_variable(values: &[f32]) -> Variable {
        Variable::new("v", ["x"], ArrayData::from(arr1(values).into_dyn())).unwrap()
    }

    #[test]
    fn test_zero_size_is_empty() {
        assert!(variable_is_empty(&f32_variable(&[])));
    }

    #[test]
    fn test_all_fill_is_empty() {
        let variable = f32_variable(&[-9999.0, -9999.0]).with_fill_value(-9999.0_f32);
        assert!(variable_is_empty(&variable));

        let variable = f32_variable(&[-9999.0, 3.0]).with_fill_value(-9999.0_f32);
        assert!(!variable_is_empty(&variable));
    }

    #[test]
    fn test_fill_value_of_another_type() {
        let data = ArrayData::from(arr1(&[-1_i16, -1]).into_dyn());
        let variable = Variable::new("v", ["x"], data)
            .unwrap()
            .with_fill_value(-1.0_f64);
        assert!(variable_is_empty(&variable));
    }

    #[test]
    fn test_all_nan_is_empty() {
        assert!(variable_is_empty(&f32_variable(&[f32::NAN, f32::NAN])));
        assert!(!variable_is_empty(&f32_variable(&[f32::NAN, 0.0])));
    }

    #[test]
    fn test_masked_by_attributes() {
        let variable = f32_variable(&[-1.0, 500.0, 7.0])
            .with_attribute("valid_range", AttrValue::F32(vec![0.0, 100.0]))
            .with_attribute("missing_value", 7.0_f32);
        assert!(variable_is_empty(&variable));

        let variable = f32_variable(&[-1.0, 50.0]).with_attribute("valid_min", 0.0_f32);
        assert!(!variable_is_empty(&variable));

        let variable = f32_variable(&[-1.0, 150.0])
            .with_attribute("valid_min", 0.0_f32)
            .with_attribute("valid_max", 100.0_f32);
        assert!(variable_is_empty(&variable));
    }

    #[test]
    fn test_text() {
        let blank = ArrayData::from(arr1(&[String::new(), String::new()]).into_dyn());
        assert!(variable_is_empty(&Variable::new("v", ["x"], blank).unwrap()));

        let filled = ArrayData::from(arr1(&["n/a".to_string(), String::new()]).into_dyn());
        let variable = Variable::new("v", ["x"], filled).unwrap().with_fill_value("n/a");
        assert!(variable_is_empty(&variable));

        let named = ArrayData::from(arr1(&["granule".to_string()]).into_dyn());
        assert!(!variable_is_empty(&Variable::new("v", ["x"], named).unwrap()));

        let chars = ArrayData::Char(arr2(&[[0_u8, 0], [0, 0]]).into_dyn());
        assert!(variable_is_empty(&Variable::new("v", ["x", "y"], chars).unwrap()));
    }

    #[test]
    fn test_is_empty_recurses_into_groups() {
        assert!(is_empty(&testing::empty_container().root));
        assert!(!is_empty(&testing::toy_container(&[1, 2], 0.0).root));

        // One real value deep in a child group makes the whole container non-empty
        let mut container = testing::empty_container();
        let group = container.root.ensure_group("Group1/deeper");
        group
            .add_variable(f32_variable(&[f32::NAN, 2.0]))
            .unwrap();
        assert!(!is_empty(&container.root));

        assert!(is_empty(&Container::new().root));
    }

    #[test]
    fn test_filter_workable() -> crate::errors::Result<()> {
        let dir = tempfile::tempdir()?;
        let full = testing::write_container(dir.path(), "full.nest", &testing::toy_container(&[1], 0.0));
        let empty = testing::write_container(dir.path(), "empty.nest", &testing::empty_container());
        let bogus = dir.path().join("bogus.nest");
        std::fs::write(&bogus, b"not a container")?;

        assert!(matches!(classify(&full), Workability::Workable));
        assert!(matches!(classify(&empty), Workability::Empty));
        assert!(matches!(classify(&bogus), Workability::Unreadable(_)));

        let (workable, count) = filter_workable(&[bogus.clone(), full.clone(), empty.clone()]);
        assert_eq!(workable, vec![full]);
        assert_eq!(count, 1);

        // Nothing workable: the first input is passed through
        let (workable, count) = filter_workable(&[empty.clone(), bogus]);
        assert_eq!(workable, vec![empty]);
        assert_eq!(count, 1);

        assert_eq!(filter_workable(&[]), (vec![], 0));

        Ok(())
    }
}
