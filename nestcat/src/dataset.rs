//! In-memory model of a hierarchical container: groups owning dimensions, variables and
//! attributes.
//!
use std::collections::BTreeSet;

use crate::{
    array::{ArrayData, DType, Value},
    attributes::{AttrValue, Attributes},
    errors::{Error, Result},
    paths::member_path,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub len: usize,

    /// Whether the source declared this dimension growable. Output is always written fixed size.
    pub unlimited: bool,
}

impl Dimension {
    pub fn new<S: Into<String>>(name: S, len: usize) -> Self {
        Self {
            name: name.into(),
            len,
            unlimited: false,
        }
    }
}

/// Storage side-channel of a variable: fill value and on-disk layout
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Encoding {
    pub fill_value: Option<Value>,

    /// Chunk length along each axis, or None for contiguous storage
    pub chunk_sizes: Option<Vec<usize>>,

    /// zlib compression level, or None for no compression
    pub compression: Option<u32>,

    /// Whether the byte shuffle filter runs before compression
    pub shuffle: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,

    /// Dimension names, in axis order
    pub dimensions: Vec<String>,

    pub attributes: Attributes,
    pub data: ArrayData,
    pub encoding: Encoding,
}

impl Variable {
    pub fn new<S, D>(name: S, dimensions: D, data: ArrayData) -> Result<Self>
    where
        S: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let name = name.into();
        let dimensions: Vec<String> = dimensions.into_iter().map(Into::into).collect();
        if dimensions.len() != data.ndim() {
            return Err(Error::RankMismatch {
                variable: name,
                rank: data.ndim(),
                dimensions: dimensions.len(),
            });
        }

        Ok(Self {
            name,
            dimensions,
            attributes: Attributes::new(),
            data,
            encoding: Encoding::default(),
        })
    }

    pub fn with_attribute<S: Into<String>, V: Into<AttrValue>>(mut self, name: S, value: V) -> Self {
        self.attributes.set(name, value);
        self
    }

    pub fn with_fill_value<V: Into<Value>>(mut self, fill_value: V) -> Self {
        self.encoding.fill_value = Some(fill_value.into());
        self
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// A dimension coordinate is one dimensional along a dimension of the same name
    pub fn is_dimension_coordinate(&self) -> bool {
        self.dimensions.len() == 1 && self.dimensions[0] == self.name
    }

    pub fn has_duplicate_dimensions(&self) -> bool {
        let unique: BTreeSet<&String> = self.dimensions.iter().collect();
        unique.len() != self.dimensions.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Group {
    pub name: String,
    pub attributes: Attributes,
    pub dimensions: Vec<Dimension>,
    pub variables: Vec<Variable>,
    pub groups: Vec<Group>,
}

impl Group {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|var| var.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|var| var.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| group.name == name)
    }

    pub fn add_dimension<S: Into<String>>(&mut self, name: S, len: usize) -> Result<&Dimension> {
        self.push_dimension(Dimension::new(name, len))
    }

    pub fn push_dimension(&mut self, dimension: Dimension) -> Result<&Dimension> {
        if self.dimension(&dimension.name).is_some() {
            return Err(Error::DuplicateName(dimension.name));
        }
        self.dimensions.push(dimension);

        Ok(&self.dimensions[self.dimensions.len() - 1])
    }

    pub fn add_variable(&mut self, variable: Variable) -> Result<()> {
        if self.variable(&variable.name).is_some() {
            return Err(Error::DuplicateName(variable.name));
        }
        self.variables.push(variable);

        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Variable> {
        let index = self.variables.iter().position(|var| var.name == name)?;

        Some(self.variables.remove(index))
    }

    pub fn add_group(&mut self, group: Group) -> Result<&mut Group> {
        if self.group(&group.name).is_some() {
            return Err(Error::DuplicateName(group.name));
        }
        self.groups.push(group);
        let index = self.groups.len() - 1;

        Ok(&mut self.groups[index])
    }

    /// Find the group at a relative slash separated path. The empty path is this group.
    pub fn group_at(&self, path: &str) -> Option<&Group> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |group, name| group.group(name))
    }

    /// Find or create the group at a relative slash separated path, creating parents first
    pub fn ensure_group(&mut self, path: &str) -> &mut Group {
        let mut group = self;
        for name in path.split('/').filter(|part| !part.is_empty()) {
            let index = match group.groups.iter().position(|child| child.name == name) {
                Some(index) => index,
                None => {
                    group.groups.push(Group::new(name));
                    group.groups.len() - 1
                }
            };
            group = &mut group.groups[index];
        }

        group
    }

    /// Every group in the tree, depth first with parents before children, paired with its
    /// relative path. This group's path is the empty string.
    pub fn walk(&self) -> Vec<(String, &Group)> {
        let mut groups = vec![];
        walk_into(self, String::new(), &mut groups);

        groups
    }
}

fn walk_into<'a>(group: &'a Group, path: String, groups: &mut Vec<(String, &'a Group)>) {
    groups.push((path.clone(), group));
    for child in &group.groups {
        walk_into(child, member_path(&path, &child.name), groups);
    }
}

/// Root of a hierarchical container. The root group carries the global attributes.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Container {
    pub root: Group,
}

impl Container {
    pub fn new() -> Self {
        Self {
            root: Group::new(""),
        }
    }

    /// Absolute paths of every group, the root being `/`
    pub fn group_paths(&self) -> BTreeSet<String> {
        self.root
            .walk()
            .into_iter()
            .map(|(path, _)| format!("/{path}"))
            .collect()
    }
}
