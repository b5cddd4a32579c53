//! Native binary container format.
//!
//! All integers are Big Endian. A file is a magic number, a format version and the root group.
//! A group is its name, attributes, dimensions, variables and child groups, each list prefixed
//! by its length. Variable payloads follow the variable's encoding: integer data is byte
//! shuffled when `shuffle` is set, and zlib compressed when `compression` is set.
//!
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use ndarray::{ArrayD, IxDyn};

use super::Codec;
use crate::{
    array::{dispatch_numeric, ArrayData, DType, Value},
    attributes::{AttrValue, Attributes},
    dataset::{Container, Dimension, Encoding, Group, Variable},
    errors::{Error, Result},
    extio::{Element, ExtendedRead, ExtendedWrite, Serialize},
};

pub const SNAPSHOT_EXTENSION: &str = "nest";

const MAGIC_NUMBER: u16 = 0x4E43;
const FORMAT_VERSION: u32 = 0;

// Attribute tags past the dtype codes
const TEXT: u8 = 100;
const TEXTS: u8 = 101;

pub(crate) struct Snapshot;

impl Codec for Snapshot {
    fn open(&self, path: &Path) -> Result<Container> {
        let mut stream = BufReader::new(File::open(path)?);
        if stream.read_u16()? != MAGIC_NUMBER {
            return Err(Error::Corrupt(format!(
                "{} is not a snapshot container",
                path.display()
            )));
        }
        let version = stream.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported snapshot format version {version}"
            )));
        }

        Ok(Container {
            root: Group::read_from(&mut stream)?,
        })
    }

    fn write(&self, container: &Container, path: &Path) -> Result<()> {
        let mut stream = BufWriter::new(File::create(path)?);
        stream.write_u16(MAGIC_NUMBER)?;
        stream.write_u32(FORMAT_VERSION)?;
        container.root.write_to(&mut stream)?;
        stream.flush()?;

        Ok(())
    }
}

impl Serialize for Group {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_str(&self.name)?;
        self.attributes.write_to(stream)?;

        write_len(stream, self.dimensions.len())?;
        for dimension in &self.dimensions {
            dimension.write_to(stream)?;
        }

        write_len(stream, self.variables.len())?;
        for variable in &self.variables {
            variable.write_to(stream)?;
        }

        write_len(stream, self.groups.len())?;
        for group in &self.groups {
            group.write_to(stream)?;
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let mut group = Group::new(stream.read_str()?);
        group.attributes = Attributes::read_from(stream)?;

        for _ in 0..stream.read_u32()? {
            group.push_dimension(Dimension::read_from(stream)?)?;
        }
        for _ in 0..stream.read_u32()? {
            group.add_variable(Variable::read_from(stream)?)?;
        }
        for _ in 0..stream.read_u32()? {
            group.add_group(Group::read_from(stream)?)?;
        }

        Ok(group)
    }
}

impl Serialize for Dimension {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_str(&self.name)?;
        stream.write_u64(self.len as u64)?;
        stream.write_byte(self.unlimited as u8)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        Ok(Dimension {
            name: stream.read_str()?,
            len: read_usize(stream)?,
            unlimited: stream.read_byte()? != 0,
        })
    }
}

impl Serialize for Variable {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_str(&self.name)?;
        stream.write_byte(self.dtype().code())?;
        write_len(stream, self.dimensions.len())?;
        for dimension in &self.dimensions {
            stream.write_str(dimension)?;
        }
        self.attributes.write_to(stream)?;
        self.encoding.write_to(stream)?;

        for &len in self.shape() {
            stream.write_u64(len as u64)?;
        }
        let payload = encode_payload(&self.data, &self.encoding)?;
        stream.write_bytes(&payload)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let name = stream.read_str()?;
        let dtype = DType::from_code(stream.read_byte()?)?;
        let mut dimensions = vec![];
        for _ in 0..stream.read_u32()? {
            dimensions.push(stream.read_str()?);
        }
        let attributes = Attributes::read_from(stream)?;
        let encoding = Encoding::read_from(stream)?;

        let mut shape = Vec::with_capacity(dimensions.len());
        for _ in 0..dimensions.len() {
            shape.push(read_usize(stream)?);
        }
        let payload = stream.read_bytes()?;
        let data = decode_payload(dtype, &shape, payload, &encoding)?;

        let mut variable = Variable::new(name, dimensions, data)?;
        variable.attributes = attributes;
        variable.encoding = encoding;

        Ok(variable)
    }
}

impl Serialize for Encoding {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        match &self.fill_value {
            Some(value) => {
                stream.write_byte(1)?;
                write_value(stream, value)?;
            }
            None => stream.write_byte(0)?,
        }

        match &self.chunk_sizes {
            Some(chunks) => {
                stream.write_byte(1)?;
                write_len(stream, chunks.len())?;
                for &chunk in chunks {
                    stream.write_u64(chunk as u64)?;
                }
            }
            None => stream.write_byte(0)?,
        }

        match self.compression {
            Some(level) => {
                stream.write_byte(1)?;
                stream.write_byte(level.min(9) as u8)?;
            }
            None => stream.write_byte(0)?,
        }
        stream.write_byte(self.shuffle as u8)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let fill_value = match stream.read_byte()? {
            0 => None,
            _ => Some(read_value(stream)?),
        };

        let chunk_sizes = match stream.read_byte()? {
            0 => None,
            _ => {
                let mut chunks = vec![];
                for _ in 0..stream.read_u32()? {
                    chunks.push(read_usize(stream)?);
                }
                Some(chunks)
            }
        };

        let compression = match stream.read_byte()? {
            0 => None,
            _ => Some(stream.read_byte()? as u32),
        };
        let shuffle = stream.read_byte()? != 0;

        Ok(Encoding {
            fill_value,
            chunk_sizes,
            compression,
            shuffle,
        })
    }
}

impl Serialize for Attributes {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        write_len(stream, self.len())?;
        for (name, value) in self.iter() {
            stream.write_str(name)?;
            match value {
                AttrValue::I8(values) => write_elements(stream, DType::I8, values)?,
                AttrValue::U8(values) => write_elements(stream, DType::U8, values)?,
                AttrValue::I16(values) => write_elements(stream, DType::I16, values)?,
                AttrValue::U16(values) => write_elements(stream, DType::U16, values)?,
                AttrValue::I32(values) => write_elements(stream, DType::I32, values)?,
                AttrValue::U32(values) => write_elements(stream, DType::U32, values)?,
                AttrValue::I64(values) => write_elements(stream, DType::I64, values)?,
                AttrValue::U64(values) => write_elements(stream, DType::U64, values)?,
                AttrValue::F32(values) => write_elements(stream, DType::F32, values)?,
                AttrValue::F64(values) => write_elements(stream, DType::F64, values)?,
                AttrValue::Text(text) => {
                    stream.write_byte(TEXT)?;
                    stream.write_str(text)?;
                }
                AttrValue::Texts(texts) => {
                    stream.write_byte(TEXTS)?;
                    write_len(stream, texts.len())?;
                    for text in texts {
                        stream.write_str(text)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let mut attributes = Attributes::new();
        for _ in 0..stream.read_u32()? {
            let name = stream.read_str()?;
            let value = match stream.read_byte()? {
                TEXT => AttrValue::Text(stream.read_str()?),
                TEXTS => {
                    let mut texts = vec![];
                    for _ in 0..stream.read_u32()? {
                        texts.push(stream.read_str()?);
                    }
                    AttrValue::Texts(texts)
                }
                code => match DType::from_code(code)? {
                    DType::I8 => AttrValue::I8(read_elements(stream)?),
                    DType::U8 => AttrValue::U8(read_elements(stream)?),
                    DType::I16 => AttrValue::I16(read_elements(stream)?),
                    DType::U16 => AttrValue::U16(read_elements(stream)?),
                    DType::I32 => AttrValue::I32(read_elements(stream)?),
                    DType::U32 => AttrValue::U32(read_elements(stream)?),
                    DType::I64 => AttrValue::I64(read_elements(stream)?),
                    DType::U64 => AttrValue::U64(read_elements(stream)?),
                    DType::F32 => AttrValue::F32(read_elements(stream)?),
                    DType::F64 => AttrValue::F64(read_elements(stream)?),
                    DType::Char | DType::Str => {
                        return Err(Error::Corrupt(format!("bad attribute tag {code}")))
                    }
                },
            };
            attributes.set(name, value);
        }

        Ok(attributes)
    }
}

fn write_len(stream: &mut impl Write, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::Corrupt(format!("{len} entries")))?;
    stream.write_u32(len)?;

    Ok(())
}

fn read_usize(stream: &mut impl Read) -> Result<usize> {
    let value = stream.read_u64()?;

    usize::try_from(value).map_err(|_| Error::Corrupt(format!("length {value} out of range")))
}

fn write_elements<T: Element>(stream: &mut impl Write, dtype: DType, values: &[T]) -> Result<()> {
    stream.write_byte(dtype.code())?;
    let mut buffer = Vec::with_capacity(values.len() * T::WIDTH);
    values.iter().for_each(|&value| value.put(&mut buffer));
    stream.write_bytes(&buffer)?;

    Ok(())
}

fn read_elements<T: Element>(stream: &mut impl Read) -> Result<Vec<T>> {
    let bytes = stream.read_bytes()?;
    if bytes.len() % T::WIDTH != 0 {
        return Err(Error::Corrupt("misaligned attribute values".into()));
    }

    Ok(bytes.chunks_exact(T::WIDTH).map(T::take).collect())
}

fn write_value(stream: &mut impl Write, value: &Value) -> Result<()> {
    stream.write_byte(value.dtype().code())?;
    let mut buffer = vec![];
    match value {
        Value::I8(v) => v.put(&mut buffer),
        Value::U8(v) | Value::Char(v) => v.put(&mut buffer),
        Value::I16(v) => v.put(&mut buffer),
        Value::U16(v) => v.put(&mut buffer),
        Value::I32(v) => v.put(&mut buffer),
        Value::U32(v) => v.put(&mut buffer),
        Value::I64(v) => v.put(&mut buffer),
        Value::U64(v) => v.put(&mut buffer),
        Value::F32(v) => v.put(&mut buffer),
        Value::F64(v) => v.put(&mut buffer),
        Value::Str(text) => buffer.extend_from_slice(text.as_bytes()),
    }
    stream.write_bytes(&buffer)?;

    Ok(())
}

fn read_value(stream: &mut impl Read) -> Result<Value> {
    let dtype = DType::from_code(stream.read_byte()?)?;
    let bytes = stream.read_bytes()?;
    if let Some(width) = dtype.width() {
        if bytes.len() != width {
            return Err(Error::Corrupt(format!("bad {dtype} fill value")));
        }
    }

    Ok(match dtype {
        DType::I8 => Value::I8(i8::take(&bytes)),
        DType::U8 => Value::U8(u8::take(&bytes)),
        DType::I16 => Value::I16(i16::take(&bytes)),
        DType::U16 => Value::U16(u16::take(&bytes)),
        DType::I32 => Value::I32(i32::take(&bytes)),
        DType::U32 => Value::U32(u32::take(&bytes)),
        DType::I64 => Value::I64(i64::take(&bytes)),
        DType::U64 => Value::U64(u64::take(&bytes)),
        DType::F32 => Value::F32(f32::take(&bytes)),
        DType::F64 => Value::F64(f64::take(&bytes)),
        DType::Char => Value::Char(u8::take(&bytes)),
        DType::Str => {
            Value::Str(String::from_utf8(bytes).map_err(|err| Error::Corrupt(err.to_string()))?)
        }
    })
}

fn encode_payload(data: &ArrayData, encoding: &Encoding) -> Result<Vec<u8>> {
    let mut bytes = vec![];
    dispatch_numeric!(
        data,
        a => a.iter().for_each(|&value| value.put(&mut bytes)),
        s => {
            for text in s.iter() {
                bytes.write_str(text)?;
            }
        }
    );

    if let Some(width) = shuffle_width(data.dtype(), encoding) {
        bytes = shuffle(&bytes, width);
    }

    if let Some(level) = encoding.compression {
        let mut encoder = ZlibEncoder::new(vec![], Compression::new(level.min(9)));
        encoder.write_all(&bytes)?;
        bytes = encoder.finish()?;
    }

    Ok(bytes)
}

fn decode_payload(
    dtype: DType,
    shape: &[usize],
    mut bytes: Vec<u8>,
    encoding: &Encoding,
) -> Result<ArrayData> {
    if encoding.compression.is_some() {
        let mut inflated = vec![];
        ZlibDecoder::new(bytes.as_slice()).read_to_end(&mut inflated)?;
        bytes = inflated;
    }

    if let Some(width) = shuffle_width(dtype, encoding) {
        if bytes.len() % width != 0 {
            return Err(Error::Corrupt("misaligned shuffled payload".into()));
        }
        bytes = unshuffle(&bytes, width);
    }

    let count = shape
        .iter()
        .try_fold(1_usize, |count, &len| count.checked_mul(len))
        .ok_or_else(|| Error::Corrupt(format!("shape {shape:?} is too large")))?;

    macro_rules! numeric {
        ($variant:ident, $type:ty) => {{
            let width = <$type as Element>::WIDTH;
            if count.checked_mul(width) != Some(bytes.len()) {
                return Err(Error::Corrupt(format!(
                    "expected {count} {dtype} values, found {} bytes",
                    bytes.len()
                )));
            }
            let values: Vec<$type> = bytes
                .chunks_exact(width)
                .map(<$type as Element>::take)
                .collect();
            ArrayData::$variant(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }};
    }

    Ok(match dtype {
        DType::I8 => numeric!(I8, i8),
        DType::U8 => numeric!(U8, u8),
        DType::I16 => numeric!(I16, i16),
        DType::U16 => numeric!(U16, u16),
        DType::I32 => numeric!(I32, i32),
        DType::U32 => numeric!(U32, u32),
        DType::I64 => numeric!(I64, i64),
        DType::U64 => numeric!(U64, u64),
        DType::F32 => numeric!(F32, f32),
        DType::F64 => numeric!(F64, f64),
        DType::Char => numeric!(Char, u8),
        DType::Str => {
            // Every string carries at least its u64 length prefix
            if count > bytes.len() / 8 {
                return Err(Error::Corrupt(format!(
                    "expected {count} strings, found {} bytes",
                    bytes.len()
                )));
            }
            let mut cursor = bytes.as_slice();
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(cursor.read_str()?);
            }
            ArrayData::Str(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }
    })
}

/// Element width to shuffle by, when the shuffle filter applies to this data
fn shuffle_width(dtype: DType, encoding: &Encoding) -> Option<usize> {
    match dtype.width() {
        Some(width) if encoding.shuffle && width > 1 => Some(width),
        _ => None,
    }
}

/// Gather byte k of every element together, as the HDF5 shuffle filter does
fn shuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    let count = bytes.len() / width;
    let mut shuffled = vec![0; bytes.len()];
    for (index, element) in bytes.chunks_exact(width).enumerate() {
        for (k, &byte) in element.iter().enumerate() {
            shuffled[k * count + index] = byte;
        }
    }

    shuffled
}

fn unshuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    let count = bytes.len() / width;
    let mut elements = vec![0; bytes.len()];
    for index in 0..count {
        for k in 0..width {
            elements[index * width + k] = bytes[k * count + index];
        }
    }

    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{arr1, arr2};

    use crate::testing;

    fn round_trip(container: &Container) -> Result<Container> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("granule.nest");
        Snapshot.write(container, &path)?;

        Snapshot.open(&path)
    }

    #[test]
    fn test_round_trip_toy_container() -> Result<()> {
        let container = testing::toy_container(&[9, 10, 11], 1.0);
        assert_eq!(round_trip(&container)?, container);

        Ok(())
    }

    #[test]
    fn test_round_trip_every_dtype_with_filters() -> Result<()> {
        let mut container = Container::new();
        container.root.add_dimension("x", 3)?;
        container.root.add_dimension("y", 2)?;
        container.root.attributes.set("history_json", "[]");
        container
            .root
            .attributes
            .set("flags", AttrValue::Texts(vec!["a".into(), "b".into()]));
        container.root.attributes.set("ids", AttrValue::U64(vec![1, u64::MAX]));

        let encodings = [
            Encoding::default(),
            Encoding {
                fill_value: None,
                chunk_sizes: Some(vec![3, 2]),
                compression: Some(7),
                shuffle: true,
            },
        ];
        for (i, encoding) in encodings.iter().enumerate() {
            let variables = vec![
                Variable::new(
                    format!("i8_{i}"),
                    ["x"],
                    ArrayData::from(arr1(&[-1_i8, 0, 1]).into_dyn()),
                )?,
                Variable::new(
                    format!("u16_{i}"),
                    ["x", "y"],
                    ArrayData::from(arr2(&[[1_u16, 2], [3, 4], [5, 65535]]).into_dyn()),
                )?
                .with_fill_value(65535_u16),
                Variable::new(
                    format!("i64_{i}"),
                    ["x"],
                    ArrayData::from(arr1(&[i64::MIN, 0, i64::MAX]).into_dyn()),
                )?,
                Variable::new(
                    format!("f64_{i}"),
                    ["y"],
                    ArrayData::from(arr1(&[f64::MIN_POSITIVE, -2.5]).into_dyn()),
                )?
                .with_fill_value(-9999.0_f64),
                Variable::new(
                    format!("char_{i}"),
                    ["x"],
                    ArrayData::Char(arr1(b"abc").into_dyn()),
                )?,
                Variable::new(
                    format!("str_{i}"),
                    ["y"],
                    ArrayData::from(arr1(&["granule".to_string(), String::new()]).into_dyn()),
                )?
                .with_fill_value("missing"),
            ];
            for mut variable in variables {
                variable.encoding.chunk_sizes = encoding.chunk_sizes.clone();
                variable.encoding.compression = encoding.compression;
                variable.encoding.shuffle = encoding.shuffle;
                container.root.add_variable(variable)?;
            }
        }

        assert_eq!(round_trip(&container)?, container);

        Ok(())
    }

    #[test]
    fn test_compression_shrinks_repetitive_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data = ArrayData::from(ndarray::Array1::<i32>::zeros(10_000).into_dyn());

        let mut sizes = vec![];
        for compression in [None, Some(7)] {
            let mut container = Container::new();
            container.root.add_dimension("x", 10_000)?;
            let mut variable = Variable::new("zeros", ["x"], data.clone())?;
            variable.encoding.compression = compression;
            variable.encoding.shuffle = true;
            container.root.add_variable(variable)?;

            let path = dir.path().join(format!("{compression:?}.nest"));
            Snapshot.write(&container, &path)?;
            sizes.push(std::fs::metadata(&path)?.len());
            assert_eq!(Snapshot.open(&path)?, container);
        }
        assert!(sizes[1] * 10 < sizes[0]);

        Ok(())
    }

    #[test]
    fn test_shuffle_layout() {
        let bytes = [1, 2, 3, 4, 5, 6];
        let shuffled = shuffle(&bytes, 2);
        assert_eq!(shuffled, vec![1, 3, 5, 2, 4, 6]);
        assert_eq!(unshuffle(&shuffled, 2), bytes.to_vec());
    }

    #[test]
    fn test_not_a_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bogus.nest");
        std::fs::write(&path, b"CDF\x01 not really")?;
        assert!(matches!(Snapshot.open(&path), Err(Error::Corrupt(_))));

        let empty = dir.path().join("empty.nest");
        std::fs::write(&empty, b"")?;
        assert!(matches!(Snapshot.open(&empty), Err(Error::IO(_))));

        Ok(())
    }

    /// Write `variable` alone, then replace its stored shape with `shape`
    fn write_with_shape(
        dir: &Path,
        variable: Variable,
        payload_len: u64,
        shape: &[u64],
    ) -> Result<std::path::PathBuf> {
        let mut container = Container::new();
        container.root.add_dimension("x", variable.shape()[0])?;
        let stored = variable.shape()[0] as u64;
        container.root.add_variable(variable)?;

        let path = dir.join("tampered.nest");
        Snapshot.write(&container, &path)?;
        let mut bytes = std::fs::read(&path)?;

        let mut marker = stored.to_be_bytes().to_vec();
        marker.extend(payload_len.to_be_bytes());
        let at = bytes
            .windows(marker.len())
            .position(|window| window == marker.as_slice())
            .unwrap();
        let mut patched: Vec<u8> = shape.iter().flat_map(|len| len.to_be_bytes()).collect();
        patched.extend(payload_len.to_be_bytes());
        bytes.splice(at..at + marker.len(), patched);
        std::fs::write(&path, bytes)?;

        Ok(path)
    }

    #[test]
    fn test_oversized_shape_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let numbers = ArrayData::from(arr1(&[1_i32, 2, 3]).into_dyn());
        let numbers = Variable::new("v", ["x"], numbers)?;
        let path = write_with_shape(dir.path(), numbers, 12, &[u64::MAX / 2])?;

        assert!(matches!(Snapshot.open(&path), Err(Error::Corrupt(_))));
        assert!(matches!(
            crate::emptiness::classify(&path),
            crate::emptiness::Workability::Unreadable(Error::Corrupt(_))
        ));

        Ok(())
    }

    #[test]
    fn test_oversized_string_count_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let names = ArrayData::Str(arr1(&["ab".to_string(), "c".to_string()]).into_dyn());
        let path = write_with_shape(dir.path(), Variable::new("s", ["x"], names)?, 19, &[1 << 40])?;

        assert!(matches!(Snapshot.open(&path), Err(Error::Corrupt(_))));

        Ok(())
    }
}
