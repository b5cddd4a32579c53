//! Moving every member of a group hierarchy into one flat group.
//!
//! Dimensions and variables are renamed to their flattened paths (see [`PathCodec`]) and
//! collected in the root. A variable's dimension references are resolved the way netCDF resolves
//! them, to the nearest enclosing group that defines the name. Group attributes, and groups that
//! have no members at all, are kept aside in [`FlatTree::groups`] so the hierarchy can be rebuilt
//! exactly.
//!
//! Flattening runs in two passes. The first reads the tree and works out every new name, failing
//! before anything has moved. The second consumes the tree and moves the arrays into place.
//!
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::{
    array::ArrayData,
    attributes::Attributes,
    dataset::{Container, Group, Variable},
    errors::{Error, Result},
    paths::{ancestry, member_path, PathCodec},
};

/// Attributes of a non-root group, carried alongside the flat data
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMeta {
    pub path: String,
    pub attributes: Attributes,
}

/// A flattened container: every dimension and variable lives in `root` under its flat name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatTree {
    pub root: Group,

    /// Every non-root group of the source, parents before children
    pub groups: Vec<GroupMeta>,
}

#[derive(Debug)]
pub struct Flattened {
    pub tree: FlatTree,

    /// Flat names of index variables created for dimensions that had no coordinate variable
    pub synthesized: BTreeSet<String>,

    /// Flat names of child group variables stored as fixed-width character buffers
    pub fixed_width_strings: BTreeSet<String>,
}

pub struct Flattener<'a> {
    codec: &'a PathCodec,
    ensure_all_dims_are_coords: bool,
}

#[derive(Default)]
struct Plan {
    dimensions: Vec<String>,
    variables: Vec<VariablePlan>,
    synthesized: Vec<(String, usize)>,
    fixed_width_strings: BTreeSet<String>,
}

struct VariablePlan {
    name: String,
    dimensions: Vec<String>,
    coordinates: Option<String>,
}

impl<'a> Flattener<'a> {
    pub fn new(codec: &'a PathCodec) -> Self {
        Self {
            codec,
            ensure_all_dims_are_coords: false,
        }
    }

    /// Give every root dimension without a coordinate variable an `i32` index variable
    pub fn ensure_all_dims_are_coords(mut self, ensure: bool) -> Self {
        self.ensure_all_dims_are_coords = ensure;
        self
    }

    pub fn flatten(&self, container: Container) -> Result<Flattened> {
        let plan = self.plan(&container)?;

        self.apply(container, plan)
    }

    fn plan(&self, container: &Container) -> Result<Plan> {
        let mut plan = Plan::default();
        let mut dimension_sources = HashMap::new();
        let mut variable_sources = HashMap::new();

        for (path, group) in container.root.walk() {
            for dimension in &group.dimensions {
                let flat = self.codec.check_reversible(&path, &dimension.name)?;
                claim(&mut dimension_sources, &flat, &path, &dimension.name)?;

                if path.is_empty()
                    && self.ensure_all_dims_are_coords
                    && group.variable(&dimension.name).is_none()
                {
                    plan.synthesized.push((flat.clone(), dimension.len));
                }
                plan.dimensions.push(flat);
            }

            for variable in &group.variables {
                let flat = self.codec.check_reversible(&path, &variable.name)?;
                claim(&mut variable_sources, &flat, &path, &variable.name)?;

                let dimensions = variable
                    .dimensions
                    .iter()
                    .map(|name| {
                        self.resolve_dimension(&container.root, &path, name)
                            .ok_or_else(|| Error::UnknownDimension {
                                variable: member_path(&path, &variable.name),
                                dimension: name.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;

                if !path.is_empty()
                    && variable.dimensions.len() == 1
                    && fixed_width_pattern().is_match(&variable.dimensions[0])
                {
                    plan.fixed_width_strings.insert(flat.clone());
                }

                let coordinates = variable
                    .attributes
                    .text("coordinates")
                    .map(|list| self.codec.flatten_coordinates(list));

                plan.variables.push(VariablePlan {
                    name: flat,
                    dimensions,
                    coordinates,
                });
            }
        }

        Ok(plan)
    }

    fn apply(&self, container: Container, plan: Plan) -> Result<Flattened> {
        let mut groups = vec![];
        unnest(container.root, String::new(), &mut groups);

        let mut flat = FlatTree::default();
        let mut dimension_names = plan.dimensions.into_iter();
        let mut variable_plans = plan.variables.into_iter();

        for (path, group) in groups {
            for (mut dimension, name) in group.dimensions.into_iter().zip(&mut dimension_names) {
                dimension.name = name;
                flat.root.push_dimension(dimension)?;
            }

            for (mut variable, renamed) in group.variables.into_iter().zip(&mut variable_plans) {
                variable.name = renamed.name;
                variable.dimensions = renamed.dimensions;
                if let Some(coordinates) = renamed.coordinates {
                    variable.attributes.set("coordinates", coordinates);
                }
                flat.root.add_variable(variable)?;
            }

            if path.is_empty() {
                flat.root.attributes = group.attributes;
            } else {
                flat.groups.push(GroupMeta {
                    path,
                    attributes: group.attributes,
                });
            }
        }

        let mut synthesized = BTreeSet::new();
        for (name, len) in plan.synthesized {
            debug!(dimension = %name, "Creating index coordinate variable");
            let index = ArrayData::index_sequence(len)?;
            flat.root
                .add_variable(Variable::new(name.as_str(), [name.as_str()], index)?)?;
            synthesized.insert(name);
        }

        Ok(Flattened {
            tree: flat,
            synthesized,
            fixed_width_strings: plan.fixed_width_strings,
        })
    }

    /// Flat name of the dimension `name` as seen from the group at `path`
    fn resolve_dimension(&self, root: &Group, path: &str, name: &str) -> Option<String> {
        ancestry(path)
            .into_iter()
            .find(|scope| {
                root.group_at(scope)
                    .map_or(false, |group| group.dimension(name).is_some())
            })
            .map(|scope| self.codec.join(scope, name))
    }
}

/// Record that `flat` belongs to the member `name` of group `path`
fn claim(sources: &mut HashMap<String, String>, flat: &str, path: &str, name: &str) -> Result<()> {
    let source = member_path(path, name);
    if let Some(first) = sources.get(flat) {
        return Err(Error::NameCollision {
            name: flat.to_string(),
            first: first.clone(),
            second: source,
        });
    }
    sources.insert(flat.to_string(), source);

    Ok(())
}

/// Detach every group of a tree from its parent, in `Group::walk` order
fn unnest(mut group: Group, path: String, groups: &mut Vec<(String, Group)>) {
    let children = mem::take(&mut group.groups);
    groups.push((path.clone(), group));
    for child in children {
        let child_path = member_path(&path, &child.name);
        unnest(child, child_path, groups);
    }
}

/// Names of the string length dimensions netCDF tools generate for character arrays
fn fixed_width_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(__char|string)[0-9]+$").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::arr1;

    use crate::testing;

    #[test]
    fn test_flatten_toy_container() -> Result<()> {
        let codec = PathCodec::default();
        let container = testing::toy_container(&[9, 10, 11], 0.0);
        let flattened = Flattener::new(&codec).flatten(container)?;
        let root = &flattened.tree.root;

        let dimensions: Vec<&str> = root.dimensions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(dimensions, vec!["__step", "__track", "__Group1__level"]);
        let variables: Vec<&str> = root.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            variables,
            vec!["__step", "__track", "__var0", "__Group1__var1", "__Group1__var2"]
        );
        assert!(root.groups.is_empty());

        let var2 = root.variable("__Group1__var2").unwrap();
        assert_eq!(var2.dimensions, vec!["__step", "__track", "__Group1__level"]);
        assert_eq!(var2.shape(), &[3, testing::TRACKS, testing::LEVELS]);

        assert_eq!(root.attributes.text("title"), Some("toy granule"));
        assert_eq!(flattened.tree.groups.len(), 1);
        assert_eq!(flattened.tree.groups[0].path, "Group1");
        assert_eq!(
            flattened.tree.groups[0].attributes.text("description"),
            Some("nested science group")
        );

        assert!(flattened.synthesized.is_empty());
        assert!(flattened.fixed_width_strings.is_empty());

        Ok(())
    }

    #[test]
    fn test_dimension_scoping() -> Result<()> {
        let mut container = testing::toy_container(&[1, 2], 0.0);
        let group = container.root.ensure_group("Group1/inner");
        group.add_dimension("step", 4)?;
        group.add_variable(Variable::new(
            "local",
            ["step", "level", "track"],
            ArrayData::from(ndarray::Array3::<f32>::zeros((4, 2, 7)).into_dyn()),
        )?)?;

        let codec = PathCodec::default();
        let flattened = Flattener::new(&codec).flatten(container)?;
        let local = flattened
            .tree
            .root
            .variable("__Group1__inner__local")
            .unwrap();
        assert_eq!(
            local.dimensions,
            vec!["__Group1__inner__step", "__Group1__level", "__track"]
        );

        let paths: Vec<&str> = flattened.tree.groups.iter().map(|g| g.path.as_str()).collect();
        assert_eq!(paths, vec!["Group1", "Group1/inner"]);

        Ok(())
    }

    #[test]
    fn test_synthesized_coordinates() -> Result<()> {
        let mut container = testing::toy_container(&[1, 2], 0.0);
        container.root.add_dimension("extra", 3)?;
        container.root.ensure_group("Group1").add_dimension("nocoord", 2)?;

        let codec = PathCodec::default();
        let flattened = Flattener::new(&codec)
            .ensure_all_dims_are_coords(true)
            .flatten(container)?;

        // Only root dimensions get index variables
        let expected: BTreeSet<String> = ["__extra".to_string()].into_iter().collect();
        assert_eq!(flattened.synthesized, expected);

        let extra = flattened.tree.root.variable("__extra").unwrap();
        assert_eq!(extra.dimensions, vec!["__extra"]);
        assert_eq!(extra.data, ArrayData::index_sequence(3)?);

        Ok(())
    }

    #[test]
    fn test_coordinates_attribute_flattened() -> Result<()> {
        let mut container = testing::toy_container(&[1, 2], 0.0);
        container
            .root
            .ensure_group("Group1")
            .variable_mut("var1")
            .unwrap()
            .attributes
            .set("coordinates", "Group1/lat  lon");

        let codec = PathCodec::default();
        let flattened = Flattener::new(&codec).flatten(container)?;
        let var1 = flattened.tree.root.variable("__Group1__var1").unwrap();
        assert_eq!(
            var1.attributes.text("coordinates"),
            Some("__Group1__lat  __lon")
        );

        Ok(())
    }

    #[test]
    fn test_fixed_width_strings() -> Result<()> {
        let mut container = testing::toy_container(&[1, 2], 0.0);
        let chars = ArrayData::Char(arr1(b"granule1").into_dyn());

        container.root.add_dimension("string8", 8)?;
        container
            .root
            .add_variable(Variable::new("root_name", ["string8"], chars.clone())?)?;

        let group = container.root.ensure_group("Group1");
        group.add_dimension("__char8", 8)?;
        group.add_variable(Variable::new("name", ["__char8"], chars.clone())?)?;
        group.add_variable(Variable::new("inherited", ["string8"], chars)?)?;

        let codec = PathCodec::default();
        let flattened = Flattener::new(&codec).flatten(container)?;
        let expected: BTreeSet<String> = ["__Group1__inherited", "__Group1__name"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(flattened.fixed_width_strings, expected);

        Ok(())
    }

    #[test]
    fn test_unknown_dimension() {
        let mut container = testing::toy_container(&[1], 0.0);
        container
            .root
            .ensure_group("Group1")
            .add_variable(
                Variable::new("orphan", ["nowhere"], ArrayData::index_sequence(2).unwrap())
                    .unwrap(),
            )
            .unwrap();

        let codec = PathCodec::default();
        let err = Flattener::new(&codec).flatten(container).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownDimension { variable, dimension }
                if variable == "Group1/orphan" && dimension == "nowhere"
        ));
    }

    #[test]
    fn test_irreversible_name() {
        let mut container = testing::toy_container(&[1], 0.0);
        container.root.add_dimension("Group1__level", 2).unwrap();

        let codec = PathCodec::default();
        let err = Flattener::new(&codec).flatten(container).unwrap_err();
        assert!(matches!(err, Error::IrreversibleName { path, .. } if path == "Group1__level"));
    }

    #[test]
    fn test_name_collision() {
        let mut container = testing::toy_container(&[1], 0.0);
        let copy = container.root.variable("var0").unwrap().clone();
        container.root.variables.push(copy);

        let codec = PathCodec::default();
        let err = Flattener::new(&codec).flatten(container).unwrap_err();
        assert!(matches!(err, Error::NameCollision { name, .. } if name == "__var0"));
    }
}
