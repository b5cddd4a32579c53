//! The concatenation pipeline: validate, filter, flatten, order, concatenate, regroup.
//!
//! Inputs are flattened one at a time and kept in memory. Concatenation then runs once per group
//! of the hierarchy, on a partition of the flat namespace holding the group's own members and
//! the coordinates of any ancestor dimensions they use. The partial results are reassembled into
//! one flat tree, which the [`Regrouper`] turns back into the hierarchy.
//!
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::{
    array::Value,
    attributes::Attributes,
    codec,
    concat::{combine_by_coords, concat, ConcatMethod},
    config::Config,
    dataset::{Container, Group},
    duplicates,
    emptiness::filter_workable,
    errors::{Error, Result},
    flatten::{FlatTree, Flattened, Flattener, GroupMeta},
    inputs::{add_label_to_path, validate_output_path},
    paths::{ancestry, PathCodec},
    regroup::Regrouper,
};

/// Concatenates granules according to one [`Config`]
pub struct Stitcher {
    config: Config,
    codec: PathCodec,
}

/// Position of an input in the output order
#[derive(Clone, Debug, PartialEq)]
enum SortKey {
    Number(f64),
    Text(String),
    Ordinal(usize),
}

impl SortKey {
    fn of(value: Value) -> Self {
        match value {
            Value::Str(text) => SortKey::Text(text),
            other => SortKey::Number(other.to_f64().unwrap_or(f64::NAN)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Number(_) => 0,
            SortKey::Text(_) => 1,
            SortKey::Ordinal(_) => 2,
        }
    }

    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Ordinal(a), SortKey::Ordinal(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

struct Loaded {
    key: SortKey,
    tree: FlatTree,
}

impl Stitcher {
    /// Check the configuration. Fails before touching any file.
    pub fn new(config: Config) -> Result<Self> {
        let codec = config.validate()?;

        Ok(Self { config, codec })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Concatenate `files` into a new container at `output`.
    ///
    /// Empty and unreadable inputs are dropped. A single remaining input is copied to `output`
    /// unchanged. Returns the absolute output path, or None when no input was left to write.
    /// The output is replaced atomically, so a failed run leaves any previous file intact.
    ///
    pub fn run(&self, files: &[PathBuf], output: &Path) -> Result<Option<PathBuf>> {
        if files.is_empty() {
            return Err(Error::NoInputFiles);
        }
        if let Some(missing) = files.iter().find(|path| !path.exists()) {
            return Err(Error::BadInputPath(missing.clone()));
        }
        let output = validate_output_path(output, self.config.overwrite_output)?;

        let (workable, count) = filter_workable(files);
        match count {
            0 => {
                info!("No non-empty files found");
                return Ok(None);
            }
            1 => {
                codec::copy_atomically(&workable[0], &output)?;
                info!(
                    output = %output.display(),
                    "Single workable file, copied to output without modification"
                );
                return Ok(Some(output));
            }
            _ => {}
        }

        let combined = self.concatenate(&workable).map_err(|err| {
            error!(error = %err, "Concatenation failed");
            err
        })?;

        if self.config.write_flat_intermediate {
            let path = add_label_to_path(&output, "_flat_intermediate");
            let mut container = Container::new();
            container.root = combined.root.clone();
            codec::persist(&container, &path)?;
            info!(path = %path.display(), "Wrote flat intermediate");
        }

        let start = Instant::now();
        Regrouper::new(&self.codec).regroup_to_file(
            combined,
            self.config.history_json.as_deref(),
            &output,
        )?;
        info!(elapsed = ?start.elapsed(), output = %output.display(), "Regrouped");

        Ok(Some(output))
    }

    /// Load, order and concatenate the workable inputs into one flat tree
    fn concatenate(&self, files: &[PathBuf]) -> Result<FlatTree> {
        let count = files.len();
        let start = Instant::now();
        let mut loaded = self.load(files)?;
        loaded.sort_by(|a, b| a.key.compare(&b.key));
        let trees: Vec<FlatTree> = loaded.into_iter().map(|input| input.tree).collect();
        info!(elapsed = ?start.elapsed(), "Flattened {count} files");

        let start = Instant::now();
        let combined = self.combine(&trees)?;
        info!(elapsed = ?start.elapsed(), "Concatenated {count} files");

        Ok(combined)
    }

    /// Open, check and flatten every input, in input order
    fn load(&self, files: &[PathBuf]) -> Result<Vec<Loaded>> {
        let count = files.len();
        let mut expected = None;
        let mut loaded = Vec::with_capacity(count);
        for (index, path) in files.iter().enumerate() {
            info!("Processing file {:03}/{:03} <{}>", index + 1, count, path.display());
            let container = codec::open(path)?;
            if self.config.check_structure {
                check_structure(index, path, &container, &mut expected)?;
            }

            let Flattened {
                mut tree,
                mut synthesized,
                fixed_width_strings,
            } = Flattener::new(&self.codec)
                .ensure_all_dims_are_coords(true)
                .flatten(container)?;

            for repair in duplicates::resolve(&mut tree.root)? {
                if repair.coordinate_cloned && synthesized.contains(&repair.original) {
                    synthesized.insert(repair.clone);
                }
            }
            for name in &synthesized {
                tree.root.remove_variable(name);
            }
            if !fixed_width_strings.is_empty() {
                debug!(variables = ?fixed_width_strings, "Fixed-width string variables");
            }

            let key = self.sort_key(index, path, &tree.root)?;
            loaded.push(Loaded { key, tree });
        }

        Ok(loaded)
    }

    /// The sorting variable's first value, else the first value of the concat dimension's
    /// coordinate when concatenating along an axis, else input order
    fn sort_key(&self, index: usize, path: &Path, root: &Group) -> Result<SortKey> {
        if let Some(name) = &self.config.sorting_variable {
            let value = root
                .variable(&self.codec.flatten(name))
                .and_then(|variable| variable.data.first())
                .ok_or_else(|| Error::MissingSortVariable {
                    variable: name.clone(),
                    file: path.to_path_buf(),
                })?;

            return Ok(SortKey::of(value));
        }

        if self.config.concat_method == ConcatMethod::AxisConcat {
            let first = self
                .config
                .concat_dim
                .as_deref()
                .and_then(|dim| root.variable(&self.codec.flatten(dim)))
                .and_then(|coordinate| coordinate.data.first());
            if let Some(value) = first {
                return Ok(SortKey::of(value));
            }
        }

        Ok(SortKey::Ordinal(index))
    }

    /// Concatenate ordered flat trees group by group and reassemble the results
    fn combine(&self, trees: &[FlatTree]) -> Result<FlatTree> {
        let first = trees.first().ok_or(Error::NothingToConcatenate)?;
        let mut paths = vec![String::new()];
        paths.extend(first.groups.iter().map(|meta| meta.path.clone()));

        let mut combined = FlatTree::default();
        for path in paths {
            let partitions: Vec<Group> = trees
                .iter()
                .map(|tree| self.partition(tree, &path))
                .collect();
            let refs: Vec<&Group> = partitions.iter().collect();

            let options = &self.config.concat_options;
            let result = match self.config.concat_method {
                ConcatMethod::AxisConcat => {
                    let dim = self.concat_dim_for(&path, &partitions[0]);
                    debug!(group = %path, dim = ?dim, "Concatenating group");
                    concat(&refs, dim.as_deref(), options)
                }
                ConcatMethod::CoordinateCombine => combine_by_coords(&refs, options),
            }
            .map_err(Error::in_group(format!("/{path}")))?;

            self.reassemble(&mut combined, &path, result)?;
        }

        Ok(combined)
    }

    /// The members of a flat tree that concatenating group `path` needs
    fn partition(&self, tree: &FlatTree, path: &str) -> Group {
        let owned = |name: &str| self.codec.split(name).0 == path;
        let mut partition = Group::new("");
        partition.attributes = if path.is_empty() {
            tree.root.attributes.clone()
        } else {
            group_attributes(tree, path)
        };

        let referenced: BTreeSet<&str> = tree
            .root
            .variables
            .iter()
            .filter(|v| owned(&v.name))
            .flat_map(|v| v.dimensions.iter().map(String::as_str))
            .collect();

        partition.dimensions = tree
            .root
            .dimensions
            .iter()
            .filter(|d| owned(&d.name) || referenced.contains(d.name.as_str()))
            .cloned()
            .collect();

        partition.variables = tree
            .root
            .variables
            .iter()
            .filter(|v| {
                owned(&v.name)
                    || (v.is_dimension_coordinate() && referenced.contains(v.name.as_str()))
            })
            .cloned()
            .collect();

        partition
    }

    /// Flat name of the concat dimension as seen from group `path`, if it is visible there
    fn concat_dim_for(&self, path: &str, partition: &Group) -> Option<String> {
        let dim = self.config.concat_dim.as_deref()?;
        if dim.contains('/') {
            return Some(self.codec.flatten(dim));
        }

        ancestry(path)
            .into_iter()
            .map(|scope| self.codec.join(scope, dim))
            .find(|flat| partition.dimension(flat).is_some())
    }

    /// Keep the members of `result` that group `path` owns. Inherited dimensions must come out
    /// the same size they have in the group that owns them.
    fn reassemble(&self, combined: &mut FlatTree, path: &str, result: Group) -> Result<()> {
        for dimension in result.dimensions {
            if self.codec.split(&dimension.name).0 == path {
                combined.root.push_dimension(dimension)?;
            } else if let Some(owner) = combined.root.dimension(&dimension.name) {
                if owner.len != dimension.len {
                    return Err(Error::DimensionMismatch {
                        dimension: self.codec.unflatten(&dimension.name),
                        sizes: vec![owner.len, dimension.len],
                    });
                }
            }
        }

        for variable in result.variables {
            if self.codec.split(&variable.name).0 == path {
                combined.root.add_variable(variable)?;
            }
        }

        if path.is_empty() {
            combined.root.attributes = result.attributes;
        } else {
            combined.groups.push(GroupMeta {
                path: path.to_string(),
                attributes: result.attributes,
            });
        }

        Ok(())
    }
}

fn group_attributes(tree: &FlatTree, path: &str) -> Attributes {
    tree.groups
        .iter()
        .find(|meta| meta.path == path)
        .map(|meta| meta.attributes.clone())
        .unwrap_or_default()
}

/// Every input must have the same set of groups as the first
fn check_structure(
    index: usize,
    path: &Path,
    container: &Container,
    expected: &mut Option<BTreeSet<String>>,
) -> Result<()> {
    let found = container.group_paths();
    match expected {
        None => {
            *expected = Some(found);
            Ok(())
        }
        Some(expected) if *expected == found => Ok(()),
        Some(expected) => Err(Error::MismatchedStructure {
            index,
            file: path.to_path_buf(),
            expected: expected.iter().cloned().collect(),
            differences: expected.symmetric_difference(&found).cloned().collect(),
            found: found.into_iter().collect(),
        }),
    }
}
