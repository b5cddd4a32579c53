//! netCDF-4 backend, built on the netcdf crate
//!
use std::path::Path;

use ::netcdf::extent::Extents;
use ::netcdf::types::{BasicType, VariableType};
use ::netcdf::AttrValue as NcAttrValue;
use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use super::Codec;
use crate::{
    array::{ArrayData, Value},
    attributes::{AttrValue, Attributes},
    dataset::{Container, Dimension, Encoding, Group, Variable},
    errors::{Error, Result},
    paths::member_path,
};

const FILL_VALUE: &str = "_FillValue";

pub(crate) struct NetCdf;

impl Codec for NetCdf {
    fn open(&self, path: &Path) -> Result<Container> {
        let file = ::netcdf::open(path)?;
        let root = file
            .root()
            .ok_or_else(|| Error::Corrupt(format!("{} has no root group", path.display())))?;

        Ok(Container {
            root: read_group(&root, String::new())?,
        })
    }

    fn write(&self, container: &Container, path: &Path) -> Result<()> {
        let mut file = ::netcdf::create(path)?;
        let mut characters = vec![];
        {
            let mut root = file.root_mut().ok_or_else(|| {
                Error::Corrupt(format!("cannot write root group of {}", path.display()))
            })?;
            write_group(&mut root, &container.root, "", &mut characters)?;
        }

        // Character variables can only be typed through the file, addressed by their full path
        for (member, variable) in characters {
            write_characters(&mut file, &member, variable)
                .map_err(Error::in_variable(variable.name.as_str()))?;
        }

        Ok(())
    }
}

fn read_group(source: &::netcdf::Group, name: String) -> Result<Group> {
    let mut group = Group::new(name);
    group.attributes = read_attributes(source.attributes())?;

    for dimension in source.dimensions() {
        group.push_dimension(Dimension {
            name: dimension.name(),
            len: dimension.len(),
            unlimited: dimension.is_unlimited(),
        })?;
    }

    for variable in source.variables() {
        let name = variable.name();
        let variable = read_variable(&variable).map_err(Error::in_variable(name))?;
        group.add_variable(variable)?;
    }

    for child in source.groups() {
        let child = read_group(&child, child.name())?;
        group.add_group(child)?;
    }

    Ok(group)
}

fn read_variable(source: &::netcdf::Variable) -> Result<Variable> {
    let dimensions: Vec<String> = source.dimensions().iter().map(|dim| dim.name()).collect();
    let shape: Vec<usize> = source.dimensions().iter().map(|dim| dim.len()).collect();

    let data = match source.vartype() {
        VariableType::Basic(BasicType::Byte) => ArrayData::I8(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Ubyte) => ArrayData::U8(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Short) => ArrayData::I16(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Ushort) => ArrayData::U16(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Int) => ArrayData::I32(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Uint) => ArrayData::U32(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Int64) => ArrayData::I64(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Uint64) => ArrayData::U64(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Float) => ArrayData::F32(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Double) => ArrayData::F64(source.values_arr(Extents::All)?),
        VariableType::Basic(BasicType::Char) => {
            let mut bytes = vec![0; shape.iter().product()];
            source.raw_values(&mut bytes, Extents::All)?;
            ArrayData::Char(ArrayD::from_shape_vec(IxDyn(&shape), bytes)?)
        }
        VariableType::String => {
            let mut values = Vec::with_capacity(shape.iter().product());
            for index in ndarray::indices(IxDyn(&shape)) {
                values.push(source.string_value(index.slice())?);
            }
            ArrayData::Str(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
        }
        other => return Err(Error::UnsupportedType(other.name())),
    };

    let mut attributes = read_attributes(source.attributes())?;
    let fill_value = attributes.remove(FILL_VALUE).and_then(|value| match (&data, value) {
        // A character fill value reads back as text
        (ArrayData::Char(_), AttrValue::Text(text)) => text.bytes().next().map(Value::Char),
        (_, value) => fill_value_of(&value),
    });

    let mut variable = Variable::new(source.name(), dimensions, data)?;
    variable.attributes = attributes;
    variable.encoding = Encoding {
        fill_value,
        ..Encoding::default()
    };

    Ok(variable)
}

fn read_attributes<'a>(source: impl Iterator<Item = ::netcdf::Attribute<'a>>) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    for attribute in source {
        let value = match attribute.value()? {
            NcAttrValue::Schar(v) => AttrValue::I8(vec![v]),
            NcAttrValue::Schars(v) => AttrValue::I8(v),
            NcAttrValue::Uchar(v) => AttrValue::U8(vec![v]),
            NcAttrValue::Uchars(v) => AttrValue::U8(v),
            NcAttrValue::Short(v) => AttrValue::I16(vec![v]),
            NcAttrValue::Shorts(v) => AttrValue::I16(v),
            NcAttrValue::Ushort(v) => AttrValue::U16(vec![v]),
            NcAttrValue::Ushorts(v) => AttrValue::U16(v),
            NcAttrValue::Int(v) => AttrValue::I32(vec![v]),
            NcAttrValue::Ints(v) => AttrValue::I32(v),
            NcAttrValue::Uint(v) => AttrValue::U32(vec![v]),
            NcAttrValue::Uints(v) => AttrValue::U32(v),
            NcAttrValue::Longlong(v) => AttrValue::I64(vec![v]),
            NcAttrValue::Longlongs(v) => AttrValue::I64(v),
            NcAttrValue::Ulonglong(v) => AttrValue::U64(vec![v]),
            NcAttrValue::Ulonglongs(v) => AttrValue::U64(v),
            NcAttrValue::Float(v) => AttrValue::F32(vec![v]),
            NcAttrValue::Floats(v) => AttrValue::F32(v),
            NcAttrValue::Double(v) => AttrValue::F64(vec![v]),
            NcAttrValue::Doubles(v) => AttrValue::F64(v),
            NcAttrValue::Str(v) => AttrValue::Text(v),
            NcAttrValue::Strs(v) => AttrValue::Texts(v),
        };
        attributes.set(attribute.name(), value);
    }

    Ok(attributes)
}

/// A single element `_FillValue` attribute as a typed value
fn fill_value_of(value: &AttrValue) -> Option<Value> {
    Some(match value {
        AttrValue::I8(v) => Value::I8(*v.first()?),
        AttrValue::U8(v) => Value::U8(*v.first()?),
        AttrValue::I16(v) => Value::I16(*v.first()?),
        AttrValue::U16(v) => Value::U16(*v.first()?),
        AttrValue::I32(v) => Value::I32(*v.first()?),
        AttrValue::U32(v) => Value::U32(*v.first()?),
        AttrValue::I64(v) => Value::I64(*v.first()?),
        AttrValue::U64(v) => Value::U64(*v.first()?),
        AttrValue::F32(v) => Value::F32(*v.first()?),
        AttrValue::F64(v) => Value::F64(*v.first()?),
        AttrValue::Text(v) => Value::Str(v.clone()),
        AttrValue::Texts(v) => Value::Str(v.first()?.clone()),
    })
}

/// Write `group` below `target`, setting its character variables aside with their full paths
fn write_group<'c>(
    target: &mut ::netcdf::GroupMut,
    group: &'c Group,
    path: &str,
    characters: &mut Vec<(String, &'c Variable)>,
) -> Result<()> {
    for (name, value) in group.attributes.iter() {
        target.add_attribute(name, to_nc_attribute(value))?;
    }

    for dimension in &group.dimensions {
        target.add_dimension(&dimension.name, dimension.len)?;
    }

    for variable in &group.variables {
        if let ArrayData::Char(_) = variable.data {
            characters.push((member_path(path, &variable.name), variable));
            continue;
        }
        write_variable(target, variable).map_err(Error::in_variable(variable.name.as_str()))?;
    }

    for child in &group.groups {
        let mut subgroup = target.add_group(&child.name)?;
        write_group(&mut subgroup, child, &member_path(path, &child.name), characters)?;
    }

    Ok(())
}

fn write_characters(
    file: &mut ::netcdf::MutableFile,
    member: &str,
    variable: &Variable,
) -> Result<()> {
    let bytes: Vec<u8> = match &variable.data {
        ArrayData::Char(a) => a.iter().copied().collect(),
        other => return Err(Error::UnsupportedType(other.dtype().to_string())),
    };
    let dimensions: Vec<&str> = variable.dimensions.iter().map(String::as_str).collect();
    let encoding = &variable.encoding;

    let mut output =
        file.add_variable_with_type(member, &dimensions, &VariableType::Basic(BasicType::Char))?;
    if let Some(chunks) = &encoding.chunk_sizes {
        output.chunking(chunks)?;
    }
    if let Some(level) = encoding.compression {
        output.compression(level as i32, false)?;
    }
    if encoding.fill_value.is_some() {
        debug!(variable = member, "Character fill value not written");
    }
    for (name, value) in variable.attributes.iter() {
        output.add_attribute(name, to_nc_attribute(value))?;
    }

    // SAFETY: NC_CHAR values are plain bytes, nothing in the buffer is followed as a pointer
    unsafe { output.put_raw_values(&bytes, Extents::All)? };

    Ok(())
}

fn write_variable(target: &mut ::netcdf::GroupMut, variable: &Variable) -> Result<()> {
    let dimensions: Vec<&str> = variable.dimensions.iter().map(String::as_str).collect();
    let encoding = &variable.encoding;

    macro_rules! numeric {
        ($type:ty, $array:expr) => {{
            let mut output = target.add_variable::<$type>(&variable.name, &dimensions)?;
            if let Some(chunks) = &encoding.chunk_sizes {
                output.chunking(chunks)?;
            }
            if let Some(level) = encoding.compression {
                output.compression(level as i32, encoding.shuffle)?;
            }
            if let Some(fill_value) = encoding.fill_value.as_ref().and_then(Value::cast::<$type>) {
                output.set_fill_value(fill_value)?;
            }
            for (name, value) in variable.attributes.iter() {
                output.add_attribute(name, to_nc_attribute(value))?;
            }
            let values: Vec<$type> = $array.iter().copied().collect();
            output.put_values(&values, Extents::All)?;
        }};
    }

    match &variable.data {
        ArrayData::I8(a) => numeric!(i8, a),
        ArrayData::U8(a) => numeric!(u8, a),
        ArrayData::I16(a) => numeric!(i16, a),
        ArrayData::U16(a) => numeric!(u16, a),
        ArrayData::I32(a) => numeric!(i32, a),
        ArrayData::U32(a) => numeric!(u32, a),
        ArrayData::I64(a) => numeric!(i64, a),
        ArrayData::U64(a) => numeric!(u64, a),
        ArrayData::F32(a) => numeric!(f32, a),
        ArrayData::F64(a) => numeric!(f64, a),
        ArrayData::Str(a) => {
            let mut output = target.add_string_variable(&variable.name, &dimensions)?;
            for (name, value) in variable.attributes.iter() {
                output.add_attribute(name, to_nc_attribute(value))?;
            }
            for (index, text) in a.indexed_iter() {
                output.put_string(text, index.slice())?;
            }
        }
        ArrayData::Char(_) => {
            return Err(Error::UnsupportedType(
                "character variables are written through the file".into(),
            ))
        }
    }

    Ok(())
}

fn to_nc_attribute(value: &AttrValue) -> NcAttrValue {
    match value {
        AttrValue::I8(v) => NcAttrValue::Schars(v.clone()),
        AttrValue::U8(v) => NcAttrValue::Uchars(v.clone()),
        AttrValue::I16(v) => NcAttrValue::Shorts(v.clone()),
        AttrValue::U16(v) => NcAttrValue::Ushorts(v.clone()),
        AttrValue::I32(v) => NcAttrValue::Ints(v.clone()),
        AttrValue::U32(v) => NcAttrValue::Uints(v.clone()),
        AttrValue::I64(v) => NcAttrValue::Longlongs(v.clone()),
        AttrValue::U64(v) => NcAttrValue::Ulonglongs(v.clone()),
        AttrValue::F32(v) => NcAttrValue::Floats(v.clone()),
        AttrValue::F64(v) => NcAttrValue::Doubles(v.clone()),
        AttrValue::Text(v) => NcAttrValue::Str(v.clone()),
        AttrValue::Texts(v) => NcAttrValue::Strs(v.clone()),
    }
}
