//! Typed n-dimensional variable data
//!
use std::cmp::Ordering;
use std::fmt;

use ndarray::{ArrayD, Axis, ErrorKind, IxDyn, ShapeError};
use num_traits::{Float, NumCast, ToPrimitive};
use paste::paste;

use crate::errors::{Error, Result};

/// The element type of a variable
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,

    /// Cells of a fixed-width character array
    Char,

    /// Variable length strings
    Str,
}

const DTYPES: [DType; 12] = [
    DType::I8,
    DType::U8,
    DType::I16,
    DType::U16,
    DType::I32,
    DType::U32,
    DType::I64,
    DType::U64,
    DType::F32,
    DType::F64,
    DType::Char,
    DType::Str,
];

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::I8
                | DType::U8
                | DType::I16
                | DType::U16
                | DType::I32
                | DType::U32
                | DType::I64
                | DType::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_text(self) -> bool {
        matches!(self, DType::Char | DType::Str)
    }

    /// Width in bytes of one element, or None for variable length strings
    pub fn width(self) -> Option<usize> {
        match self {
            DType::I8 | DType::U8 | DType::Char => Some(1),
            DType::I16 | DType::U16 => Some(2),
            DType::I32 | DType::U32 | DType::F32 => Some(4),
            DType::I64 | DType::U64 | DType::F64 => Some(8),
            DType::Str => None,
        }
    }

    pub(crate) fn code(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_code(code: u8) -> Result<Self> {
        DTYPES
            .get(code as usize)
            .copied()
            .ok_or_else(|| Error::Corrupt(format!("unknown dtype code {code}")))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::U16 => "u16",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::I64 => "i64",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Char => "char",
            DType::Str => "str",
        };
        f.write_str(name)
    }
}

/// A single typed value, used for fill values and sort keys
///
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(u8),
    Str(String),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::I8(_) => DType::I8,
            Value::U8(_) => DType::U8,
            Value::I16(_) => DType::I16,
            Value::U16(_) => DType::U16,
            Value::I32(_) => DType::I32,
            Value::U32(_) => DType::U32,
            Value::I64(_) => DType::I64,
            Value::U64(_) => DType::U64,
            Value::F32(_) => DType::F32,
            Value::F64(_) => DType::F64,
            Value::Char(_) => DType::Char,
            Value::Str(_) => DType::Str,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::I8(v) => v.to_f64(),
            Value::U8(v) | Value::Char(v) => v.to_f64(),
            Value::I16(v) => v.to_f64(),
            Value::U16(v) => v.to_f64(),
            Value::I32(v) => v.to_f64(),
            Value::U32(v) => v.to_f64(),
            Value::I64(v) => v.to_f64(),
            Value::U64(v) => v.to_f64(),
            Value::F32(v) => v.to_f64(),
            Value::F64(v) => Some(*v),
            Value::Str(_) => None,
        }
    }

    /// Convert a numeric value to another numeric type, if it is representable there
    pub fn cast<T: NumCast>(&self) -> Option<T> {
        match self {
            Value::I8(v) => T::from(*v),
            Value::U8(v) | Value::Char(v) => T::from(*v),
            Value::I16(v) => T::from(*v),
            Value::U16(v) => T::from(*v),
            Value::I32(v) => T::from(*v),
            Value::U32(v) => T::from(*v),
            Value::I64(v) => T::from(*v),
            Value::U64(v) => T::from(*v),
            Value::F32(v) => T::from(*v),
            Value::F64(v) => T::from(*v),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// This value as an element of `dtype`, if it is representable there
    pub fn cast_to(&self, dtype: DType) -> Option<Value> {
        match dtype {
            DType::I8 => self.cast().map(Value::I8),
            DType::U8 => self.cast().map(Value::U8),
            DType::I16 => self.cast().map(Value::I16),
            DType::U16 => self.cast().map(Value::U16),
            DType::I32 => self.cast().map(Value::I32),
            DType::U32 => self.cast().map(Value::U32),
            DType::I64 => self.cast().map(Value::I64),
            DType::U64 => self.cast().map(Value::U64),
            DType::F32 => self.cast().map(Value::F32),
            DType::F64 => self.cast().map(Value::F64),
            DType::Char => self.cast().map(Value::Char),
            DType::Str => self.as_str().map(Value::from),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

/// Variable data, one variant per element type
///
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    I8(ArrayD<i8>),
    U8(ArrayD<u8>),
    I16(ArrayD<i16>),
    U16(ArrayD<u16>),
    I32(ArrayD<i32>),
    U32(ArrayD<u32>),
    I64(ArrayD<i64>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Char(ArrayD<u8>),
    Str(ArrayD<String>),
}

/// Evaluate `$body` with `$a` bound to the inner array, whatever its element type
macro_rules! dispatch {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            $crate::array::ArrayData::I8($a) => $body,
            $crate::array::ArrayData::U8($a) => $body,
            $crate::array::ArrayData::I16($a) => $body,
            $crate::array::ArrayData::U16($a) => $body,
            $crate::array::ArrayData::I32($a) => $body,
            $crate::array::ArrayData::U32($a) => $body,
            $crate::array::ArrayData::I64($a) => $body,
            $crate::array::ArrayData::U64($a) => $body,
            $crate::array::ArrayData::F32($a) => $body,
            $crate::array::ArrayData::F64($a) => $body,
            $crate::array::ArrayData::Char($a) => $body,
            $crate::array::ArrayData::Str($a) => $body,
        }
    };
}

/// Like `dispatch!`, but string arrays get their own arm so `$body` may assume numeric elements
macro_rules! dispatch_numeric {
    ($data:expr, $a:ident => $body:expr, $s:ident => $text:expr) => {
        match $data {
            $crate::array::ArrayData::I8($a) => $body,
            $crate::array::ArrayData::U8($a) => $body,
            $crate::array::ArrayData::I16($a) => $body,
            $crate::array::ArrayData::U16($a) => $body,
            $crate::array::ArrayData::I32($a) => $body,
            $crate::array::ArrayData::U32($a) => $body,
            $crate::array::ArrayData::I64($a) => $body,
            $crate::array::ArrayData::U64($a) => $body,
            $crate::array::ArrayData::F32($a) => $body,
            $crate::array::ArrayData::F64($a) => $body,
            $crate::array::ArrayData::Char($a) => $body,
            $crate::array::ArrayData::Str($s) => $text,
        }
    };
}

pub(crate) use dispatch_numeric;

macro_rules! ArrayAccess {
    ($variant:ident, $type:ty) => {
        paste! {
            impl ArrayData {
                /// Borrow the inner array if it holds this element type
                pub fn [<$variant:lower _array>](&self) -> Option<&ArrayD<$type>> {
                    match self {
                        ArrayData::$variant(a) => Some(a),
                        _ => None,
                    }
                }
            }
        }
    };
}

ArrayAccess!(I8, i8);
ArrayAccess!(U8, u8);
ArrayAccess!(I16, i16);
ArrayAccess!(U16, u16);
ArrayAccess!(I32, i32);
ArrayAccess!(U32, u32);
ArrayAccess!(I64, i64);
ArrayAccess!(U64, u64);
ArrayAccess!(F32, f32);
ArrayAccess!(F64, f64);
ArrayAccess!(Char, u8);
ArrayAccess!(Str, String);

macro_rules! ArrayFrom {
    ($variant:ident, $type:ty) => {
        impl From<ArrayD<$type>> for ArrayData {
            fn from(array: ArrayD<$type>) -> Self {
                ArrayData::$variant(array)
            }
        }

        impl From<$type> for Value {
            fn from(value: $type) -> Self {
                Value::$variant(value)
            }
        }
    };
}

ArrayFrom!(I8, i8);
ArrayFrom!(U8, u8);
ArrayFrom!(I16, i16);
ArrayFrom!(U16, u16);
ArrayFrom!(I32, i32);
ArrayFrom!(U32, u32);
ArrayFrom!(I64, i64);
ArrayFrom!(U64, u64);
ArrayFrom!(F32, f32);
ArrayFrom!(F64, f64);
ArrayFrom!(Str, String);

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::I8(_) => DType::I8,
            ArrayData::U8(_) => DType::U8,
            ArrayData::I16(_) => DType::I16,
            ArrayData::U16(_) => DType::U16,
            ArrayData::I32(_) => DType::I32,
            ArrayData::U32(_) => DType::U32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::U64(_) => DType::U64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
            ArrayData::Char(_) => DType::Char,
            ArrayData::Str(_) => DType::Str,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A one dimensional `0..len` index sequence
    pub fn index_sequence(len: usize) -> Result<Self> {
        let values = (0..len)
            .map(|i| {
                i32::try_from(i).map_err(|_| Error::UnsupportedType("index beyond i32 range".into()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ArrayData::I32(ArrayD::from_shape_vec(IxDyn(&[len]), values)?))
    }

    /// The first element in logical (row major) order
    pub fn first(&self) -> Option<Value> {
        match self {
            ArrayData::I8(a) => a.iter().next().map(|v| Value::I8(*v)),
            ArrayData::U8(a) => a.iter().next().map(|v| Value::U8(*v)),
            ArrayData::I16(a) => a.iter().next().map(|v| Value::I16(*v)),
            ArrayData::U16(a) => a.iter().next().map(|v| Value::U16(*v)),
            ArrayData::I32(a) => a.iter().next().map(|v| Value::I32(*v)),
            ArrayData::U32(a) => a.iter().next().map(|v| Value::U32(*v)),
            ArrayData::I64(a) => a.iter().next().map(|v| Value::I64(*v)),
            ArrayData::U64(a) => a.iter().next().map(|v| Value::U64(*v)),
            ArrayData::F32(a) => a.iter().next().map(|v| Value::F32(*v)),
            ArrayData::F64(a) => a.iter().next().map(|v| Value::F64(*v)),
            ArrayData::Char(a) => a.iter().next().map(|v| Value::Char(*v)),
            ArrayData::Str(a) => a.iter().next().map(|v| Value::Str(v.clone())),
        }
    }

    /// Every element as f64, in logical order. None for string data.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        dispatch_numeric!(
            self,
            a => a.iter().map(|v| v.to_f64()).collect(),
            _s => None
        )
    }

    /// Element-wise equality that treats NaN as equal to NaN
    pub fn equals(&self, other: &ArrayData) -> bool {
        match (self, other) {
            (ArrayData::F32(a), ArrayData::F32(b)) => float_equal(a, b),
            (ArrayData::F64(a), ArrayData::F64(b)) => float_equal(a, b),
            _ => self == other,
        }
    }

    /// Join arrays of the same element type along an existing axis
    pub fn concatenate(axis: usize, parts: &[&ArrayData]) -> Result<ArrayData> {
        let first = parts.first().ok_or(Error::NothingToConcatenate)?;
        let expected = first.dtype();

        macro_rules! join {
            ($variant:ident) => {{
                let mut views = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        ArrayData::$variant(a) if axis < a.ndim() => views.push(a.view()),
                        ArrayData::$variant(_) => {
                            return Err(Error::Shape(ShapeError::from_kind(ErrorKind::OutOfBounds)))
                        }
                        other => {
                            return Err(Error::DTypeMismatch {
                                expected,
                                found: other.dtype(),
                            })
                        }
                    }
                }
                ArrayData::$variant(ndarray::concatenate(Axis(axis), &views)?)
            }};
        }

        Ok(match first {
            ArrayData::I8(_) => join!(I8),
            ArrayData::U8(_) => join!(U8),
            ArrayData::I16(_) => join!(I16),
            ArrayData::U16(_) => join!(U16),
            ArrayData::I32(_) => join!(I32),
            ArrayData::U32(_) => join!(U32),
            ArrayData::I64(_) => join!(I64),
            ArrayData::U64(_) => join!(U64),
            ArrayData::F32(_) => join!(F32),
            ArrayData::F64(_) => join!(F64),
            ArrayData::Char(_) => join!(Char),
            ArrayData::Str(_) => join!(Str),
        })
    }

    /// Direction in which a one dimensional array is monotonic, if it is.
    ///
    /// Arrays of fewer than two elements report `Ordering::Equal`, which is compatible with
    /// either direction.
    ///
    pub fn monotonic_direction(&self) -> Option<Ordering> {
        let values = self.to_f64_vec()?;
        let mut increasing = true;
        let mut decreasing = true;
        for pair in values.windows(2) {
            increasing &= pair[0] <= pair[1];
            decreasing &= pair[0] >= pair[1];
        }

        match (increasing, decreasing) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

fn float_equal<F: Float>(a: &ArrayD<F>, b: &ArrayD<F>) -> bool {
    a.shape() == b.shape()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
}
