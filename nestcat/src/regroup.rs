//! Rebuilding the group hierarchy from a flat dataset, and the storage plan for the output.
//!
use std::path::Path;

use tracing::debug;

use crate::{
    codec,
    dataset::{Container, Dimension, Encoding, Group, Variable},
    errors::{Error, Result},
    flatten::FlatTree,
    paths::{ancestry, member_path, PathCodec},
};

/// Chunk length for long axes of variables with up to three dimensions
const LOW_RANK_CHUNK: usize = 4000;

/// Chunk length cap for every axis of variables with more than three dimensions
const HIGH_RANK_CHUNK: usize = 500;

const COMPRESSION_LEVEL: u32 = 7;

/// One dimensional text shorter than this is stored uncompressed
const SHORT_TEXT: usize = 10;

pub struct Regrouper<'a> {
    codec: &'a PathCodec,
}

impl<'a> Regrouper<'a> {
    pub fn new(codec: &'a PathCodec) -> Self {
        Self { codec }
    }

    /// Rebuild the hierarchy a flat tree was flattened from.
    ///
    /// Every group listed in `flat.groups` is recreated, with its attributes, even if it ends up
    /// with no members. Each dimension and variable goes to the group its flat name encodes, under
    /// its leaf name, and every variable gets the storage plan the output is written with. If
    /// `history` is given it replaces the root `history_json` attribute.
    ///
    pub fn regroup(&self, flat: FlatTree, history: Option<&str>) -> Result<Container> {
        let mut container = Container::new();
        container.root.attributes = flat.root.attributes;
        if let Some(history) = history {
            container.root.attributes.set("history_json", history);
        }

        for meta in flat.groups {
            container.root.ensure_group(&meta.path).attributes = meta.attributes;
        }

        for dimension in flat.root.dimensions {
            let (path, leaf) = self.codec.split(&dimension.name);
            container.root.ensure_group(&path).push_dimension(Dimension {
                name: leaf,
                len: dimension.len,
                unlimited: false,
            })?;
        }

        for variable in flat.root.variables {
            let (path, leaf) = self.codec.split(&variable.name);
            let variable = self.place_variable(&container.root, &path, leaf, variable)?;
            container.root.ensure_group(&path).add_variable(variable)?;
        }

        Ok(container)
    }

    /// Regroup and write the result atomically to `path`
    pub fn regroup_to_file(&self, flat: FlatTree, history: Option<&str>, path: &Path) -> Result<()> {
        let container = self.regroup(flat, history)?;
        debug!(output = %path.display(), "Writing regrouped container");

        codec::persist(&container, path)
    }

    /// Rename a flat variable for its place in group `path`, with the output storage plan
    fn place_variable(
        &self,
        root: &Group,
        path: &str,
        leaf: String,
        mut variable: Variable,
    ) -> Result<Variable> {
        let member = member_path(path, &leaf);
        let mut dimensions = Vec::with_capacity(variable.dimensions.len());
        for flat_dimension in &variable.dimensions {
            let (owner, name) = self.codec.split(flat_dimension);
            check_visible(root, &member, path, &owner, &name)?;
            dimensions.push(name);
        }

        variable.name = leaf;
        variable.dimensions = dimensions;
        if let Some(list) = variable.attributes.text("coordinates") {
            let list = self.codec.unflatten_coordinates(list);
            variable.attributes.set("coordinates", list);
        }
        variable.encoding = storage_plan(&variable);

        Ok(variable)
    }
}

/// Make sure the dimension `name` owned by group `owner` is the one a variable in group `path`
/// sees, and not hidden behind a nearer group defining the same name
fn check_visible(root: &Group, member: &str, path: &str, owner: &str, name: &str) -> Result<()> {
    for scope in ancestry(path) {
        if scope == owner {
            return Ok(());
        }
        if root
            .group_at(scope)
            .map_or(false, |group| group.dimension(name).is_some())
        {
            return Err(Error::ShadowedDimension {
                variable: member.to_string(),
                dimension: name.to_string(),
                group: scope.to_string(),
            });
        }
    }

    Err(Error::UnknownDimension {
        variable: member.to_string(),
        dimension: member_path(owner, name),
    })
}

/// Chunking, filters and fill value for writing `variable`
pub fn storage_plan(variable: &Variable) -> Encoding {
    let dtype = variable.dtype();
    let shape = variable.shape();

    let chunk_sizes = if shape.is_empty() || variable.is_dimension_coordinate() {
        None
    } else {
        Some(chunk_sizes(shape))
    };

    let short_text = dtype.is_text() && shape.len() == 1 && shape[0] < SHORT_TEXT;

    Encoding {
        fill_value: variable
            .encoding
            .fill_value
            .as_ref()
            .and_then(|fill| fill.cast_to(dtype)),
        chunk_sizes,
        compression: if short_text {
            None
        } else {
            Some(COMPRESSION_LEVEL)
        },
        shuffle: dtype.is_integer(),
    }
}

/// Chunk lengths for an array of the given shape
pub fn chunk_sizes(shape: &[usize]) -> Vec<usize> {
    let rank = shape.len();
    shape
        .iter()
        .map(|&len| {
            let chunk = if rank > 3 {
                len.min(HIGH_RANK_CHUNK)
            } else if rank > 1 && len > LOW_RANK_CHUNK {
                LOW_RANK_CHUNK
            } else {
                len
            };
            chunk.max(1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::arr1;

    use crate::{
        array::{ArrayData, Value},
        attributes::Attributes,
        flatten::{Flattener, GroupMeta},
        testing,
    };

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_sizes(&[5000]), vec![5000]);
        assert_eq!(chunk_sizes(&[5000, 10]), vec![4000, 10]);
        assert_eq!(chunk_sizes(&[4000, 4001, 3]), vec![4000, 4000, 3]);
        assert_eq!(chunk_sizes(&[600, 600, 2, 600]), vec![500, 500, 2, 500]);
        assert_eq!(chunk_sizes(&[0, 3]), vec![1, 3]);
        assert_eq!(chunk_sizes(&[0]), vec![1]);
    }

    #[test]
    fn test_storage_plan() -> Result<()> {
        let counts = Variable::new(
            "counts",
            ["x", "y"],
            ArrayData::from(ndarray::Array2::<u16>::zeros((2, 5000)).into_dyn()),
        )?
        .with_fill_value(-1.0_f64);
        let plan = storage_plan(&counts);
        assert_eq!(plan.chunk_sizes, Some(vec![2, 4000]));
        assert_eq!(plan.compression, Some(7));
        assert!(plan.shuffle);
        // Out of range for u16
        assert_eq!(plan.fill_value, None);

        let temperature = Variable::new(
            "temperature",
            ["x"],
            ArrayData::from(arr1(&[1.5_f32, 2.5]).into_dyn()),
        )?
        .with_fill_value(-9999_i32);
        let plan = storage_plan(&temperature);
        assert_eq!(plan.chunk_sizes, Some(vec![2]));
        assert!(!plan.shuffle);
        assert_eq!(plan.fill_value, Some(Value::F32(-9999.0)));

        let x = Variable::new("x", ["x"], ArrayData::index_sequence(3)?)?;
        let plan = storage_plan(&x);
        assert_eq!(plan.chunk_sizes, None);
        assert!(plan.shuffle);

        Ok(())
    }

    #[test]
    fn test_short_text_uncompressed() -> Result<()> {
        let names = |n: usize| {
            let values: Vec<String> = (0..n).map(|i| format!("name{i}")).collect();
            Variable::new("names", ["n"], ArrayData::from(arr1(&values).into_dyn()))
        };
        assert_eq!(storage_plan(&names(5)?).compression, None);
        assert_eq!(storage_plan(&names(12)?).compression, Some(7));

        let chars = Variable::new("c", ["n"], ArrayData::Char(arr1(b"abc").into_dyn()))?;
        let plan = storage_plan(&chars);
        assert_eq!(plan.compression, None);
        assert!(!plan.shuffle);

        Ok(())
    }

    #[test]
    fn test_round_trip_through_flat_tree() -> Result<()> {
        let codec = PathCodec::default();
        let original = testing::toy_container(&[9, 10, 11], 0.0);
        let flattened = Flattener::new(&codec).flatten(original.clone())?;
        let regrouped = Regrouper::new(&codec).regroup(flattened.tree, None)?;

        assert_eq!(regrouped.group_paths(), original.group_paths());
        let pairs = original.root.walk().into_iter().zip(regrouped.root.walk());
        for ((path, expected), (_, actual)) in pairs {
            assert_eq!(actual.attributes, expected.attributes, "{path}");
            assert_eq!(actual.dimensions, expected.dimensions, "{path}");
            assert_eq!(actual.variables.len(), expected.variables.len(), "{path}");
            for variable in &expected.variables {
                let placed = actual.variable(&variable.name).unwrap();
                assert_eq!(placed.dimensions, variable.dimensions);
                assert_eq!(placed.attributes, variable.attributes);
                assert_eq!(placed.data, variable.data);
                assert_eq!(placed.encoding.fill_value, variable.encoding.fill_value);
            }
        }

        let var2 = regrouped.root.group_at("Group1").unwrap().variable("var2").unwrap();
        assert_eq!(var2.dimensions, vec!["step", "track", "level"]);
        assert_eq!(var2.encoding.chunk_sizes, Some(vec![3, testing::TRACKS, testing::LEVELS]));
        assert_eq!(var2.encoding.compression, Some(7));
        assert!(!var2.encoding.shuffle);

        let step = regrouped.root.variable("step").unwrap();
        assert_eq!(step.encoding.chunk_sizes, None);
        assert!(step.encoding.shuffle);

        Ok(())
    }

    #[test]
    fn test_history_and_coordinates() -> Result<()> {
        let codec = PathCodec::default();
        let mut flat = FlatTree::default();
        flat.root.attributes.set("history_json", "[]");
        flat.root.add_dimension("__Group1__n", 2)?;
        flat.root.add_variable(
            Variable::new("__Group1__v", ["__Group1__n"], ArrayData::index_sequence(2)?)?
                .with_attribute("coordinates", "__Group1__lat  __lon"),
        )?;

        let container = Regrouper::new(&codec).regroup(flat, Some(r#"[{"program": "nestcat"}]"#))?;
        assert_eq!(
            container.root.attributes.text("history_json"),
            Some(r#"[{"program": "nestcat"}]"#)
        );

        let v = container.root.group_at("Group1").unwrap().variable("v").unwrap();
        assert_eq!(v.attributes.text("coordinates"), Some("Group1/lat  lon"));

        Ok(())
    }

    #[test]
    fn test_empty_groups_kept() -> Result<()> {
        let codec = PathCodec::default();
        let mut attributes = Attributes::new();
        attributes.set("comment", "nothing here");
        let flat = FlatTree {
            root: Group::new(""),
            groups: vec![
                GroupMeta {
                    path: "a".into(),
                    attributes: Attributes::new(),
                },
                GroupMeta {
                    path: "a/b".into(),
                    attributes,
                },
            ],
        };

        let container = Regrouper::new(&codec).regroup(flat, None)?;
        let b = container.root.group_at("a/b").unwrap();
        assert_eq!(b.attributes.text("comment"), Some("nothing here"));
        assert!(b.variables.is_empty());

        Ok(())
    }

    #[test]
    fn test_shadowed_dimension() -> Result<()> {
        let codec = PathCodec::default();
        let mut flat = FlatTree::default();
        flat.root.add_dimension("__a__x", 2)?;
        flat.root.add_dimension("__a__b__x", 3)?;
        flat.root.add_variable(Variable::new(
            "__a__b__v",
            ["__a__x"],
            ArrayData::index_sequence(2)?,
        )?)?;

        let err = Regrouper::new(&codec).regroup(flat, None).unwrap_err();
        assert!(matches!(
            err,
            Error::ShadowedDimension { variable, dimension, group }
                if variable == "a/b/v" && dimension == "x" && group == "a/b"
        ));

        Ok(())
    }
}
