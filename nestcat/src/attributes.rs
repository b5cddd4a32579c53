use crate::array::DType;

/// The value of a group or variable attribute
///
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Text(String),
    Texts(Vec<String>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric attribute values widened to f64. Text yields an empty list.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            AttrValue::I8(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::U8(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::I16(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::U16(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::I32(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::U32(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::I64(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::U64(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::F32(v) => v.iter().map(|&x| x as f64).collect(),
            AttrValue::F64(v) => v.clone(),
            AttrValue::Text(_) | AttrValue::Texts(_) => vec![],
        }
    }

    /// The element type an attribute of this kind is stored as
    pub fn dtype(&self) -> DType {
        match self {
            AttrValue::I8(_) => DType::I8,
            AttrValue::U8(_) => DType::U8,
            AttrValue::I16(_) => DType::I16,
            AttrValue::U16(_) => DType::U16,
            AttrValue::I32(_) => DType::I32,
            AttrValue::U32(_) => DType::U32,
            AttrValue::I64(_) => DType::I64,
            AttrValue::U64(_) => DType::U64,
            AttrValue::F32(_) => DType::F32,
            AttrValue::F64(_) => DType::F64,
            AttrValue::Text(_) => DType::Char,
            AttrValue::Texts(_) => DType::Str,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(text: &str) -> Self {
        AttrValue::Text(text.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(text: String) -> Self {
        AttrValue::Text(text)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::F64(vec![value])
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        AttrValue::F32(vec![value])
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::I32(vec![value])
    }
}

/// Attributes in insertion order, keyed by name
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set an attribute, replacing any existing value in place
    pub fn set<S: Into<String>, V: Into<AttrValue>>(&mut self, name: S, value: V) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;

        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl FromIterator<(String, AttrValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttrValue)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (name, value) in iter {
            attributes.set(name, value);
        }

        attributes
    }
}
