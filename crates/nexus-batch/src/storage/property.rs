//! Property values and their type-tagged byte encoding
//!
//! Encoding is pure: [`encode_value`] turns a value into its tag and bytes
//! and decides whether they fit inline. Only the property store touches
//! disk, so an unsupported value is rejected before anything is written.
//!
//! Byte formats (all little-endian):
//! - scalars: the value's bytes; `bool` is one byte, `char` a `u32` scalar
//! - `String`: UTF-8
//! - primitive arrays: the concatenated element bytes
//! - string arrays: `u32` count, then `u32` length + UTF-8 per element

use super::record::INLINE_CAPACITY;
use crate::{Error, Result};
use std::collections::HashMap;

/// Property map accepted and returned by the batch writer
pub type Properties = HashMap<String, PropertyValue>;

/// Persisted type discriminant of a property value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// `bool`
    Bool = 1,
    /// `i8`
    Byte = 2,
    /// `i16`
    Short = 3,
    /// `i32`
    Int = 4,
    /// `i64`
    Long = 5,
    /// `f32`
    Float = 6,
    /// `f64`
    Double = 7,
    /// `char`
    Char = 8,
    /// UTF-8 string
    String = 9,
    /// `[bool]`
    BoolArray = 10,
    /// `[i8]`
    ByteArray = 11,
    /// `[i16]`
    ShortArray = 12,
    /// `[i32]`
    IntArray = 13,
    /// `[i64]`
    LongArray = 14,
    /// `[f32]`
    FloatArray = 15,
    /// `[f64]`
    DoubleArray = 16,
    /// `[char]`
    CharArray = 17,
    /// `[String]`
    StringArray = 18,
}

impl PropertyType {
    /// Decode a persisted type tag
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::Bool,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Int,
            5 => Self::Long,
            6 => Self::Float,
            7 => Self::Double,
            8 => Self::Char,
            9 => Self::String,
            10 => Self::BoolArray,
            11 => Self::ByteArray,
            12 => Self::ShortArray,
            13 => Self::IntArray,
            14 => Self::LongArray,
            15 => Self::FloatArray,
            16 => Self::DoubleArray,
            17 => Self::CharArray,
            18 => Self::StringArray,
            other => {
                return Err(Error::corruption(format!(
                    "unknown property type tag {}",
                    other
                )));
            }
        })
    }

    /// Whether values of this type are arrays
    pub fn is_array(self) -> bool {
        self as u8 >= Self::BoolArray as u8
    }
}

/// A typed property value
///
/// Element widths are part of the value: a `Short` array reads back as
/// `Short`, never as a wider or narrower integer array.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean
    Bool(bool),
    /// 8-bit signed integer
    Byte(i8),
    /// 16-bit signed integer
    Short(i16),
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Single character
    Char(char),
    /// String
    String(String),
    /// Boolean array
    BoolArray(Vec<bool>),
    /// 8-bit integer array
    ByteArray(Vec<i8>),
    /// 16-bit integer array
    ShortArray(Vec<i16>),
    /// 32-bit integer array
    IntArray(Vec<i32>),
    /// 64-bit integer array
    LongArray(Vec<i64>),
    /// 32-bit float array
    FloatArray(Vec<f32>),
    /// 64-bit float array
    DoubleArray(Vec<f64>),
    /// Character array
    CharArray(Vec<char>),
    /// String array
    StringArray(Vec<String>),
}

impl PropertyValue {
    /// Type discriminant of this value
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Bool(_) => PropertyType::Bool,
            Self::Byte(_) => PropertyType::Byte,
            Self::Short(_) => PropertyType::Short,
            Self::Int(_) => PropertyType::Int,
            Self::Long(_) => PropertyType::Long,
            Self::Float(_) => PropertyType::Float,
            Self::Double(_) => PropertyType::Double,
            Self::Char(_) => PropertyType::Char,
            Self::String(_) => PropertyType::String,
            Self::BoolArray(_) => PropertyType::BoolArray,
            Self::ByteArray(_) => PropertyType::ByteArray,
            Self::ShortArray(_) => PropertyType::ShortArray,
            Self::IntArray(_) => PropertyType::IntArray,
            Self::LongArray(_) => PropertyType::LongArray,
            Self::FloatArray(_) => PropertyType::FloatArray,
            Self::DoubleArray(_) => PropertyType::DoubleArray,
            Self::CharArray(_) => PropertyType::CharArray,
            Self::StringArray(_) => PropertyType::StringArray,
        }
    }
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for PropertyValue {
                fn from(value: $source) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    String => String,
    Vec<bool> => BoolArray,
    Vec<i8> => ByteArray,
    Vec<i16> => ShortArray,
    Vec<i32> => IntArray,
    Vec<i64> => LongArray,
    Vec<f32> => FloatArray,
    Vec<f64> => DoubleArray,
    Vec<char> => CharArray,
    Vec<String> => StringArray,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(value: Vec<&str>) -> Self {
        Self::StringArray(value.into_iter().map(str::to_string).collect())
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = Error;

    /// Convert a JSON value without coercing between categories
    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => json_number(&n),
            Value::String(s) => Ok(Self::String(s)),
            Value::Array(items) => json_array(items),
            Value::Null => Err(Error::unsupported("null cannot be stored as a property")),
            Value::Object(_) => Err(Error::unsupported(
                "nested maps cannot be stored as a property",
            )),
        }
    }
}

fn json_number(n: &serde_json::Number) -> Result<PropertyValue> {
    if let Some(i) = n.as_i64() {
        Ok(PropertyValue::Long(i))
    } else if n.is_u64() {
        Err(Error::unsupported(format!("integer {} does not fit in 64 bits", n)))
    } else if let Some(f) = n.as_f64() {
        Ok(PropertyValue::Double(f))
    } else {
        Err(Error::unsupported(format!("number {} has no property encoding", n)))
    }
}

fn json_array(items: Vec<serde_json::Value>) -> Result<PropertyValue> {
    let Some(first) = items.first() else {
        return Err(Error::unsupported(
            "empty arrays carry no element type and cannot be stored",
        ));
    };

    let mixed = || Error::unsupported("array elements must all have the same type");

    match PropertyValue::try_from(first.clone())? {
        PropertyValue::Bool(_) => items
            .into_iter()
            .map(|item| item.as_bool().ok_or_else(mixed))
            .collect::<Result<Vec<_>>>()
            .map(PropertyValue::BoolArray),
        PropertyValue::Long(_) => items
            .into_iter()
            .map(|item| item.as_i64().ok_or_else(mixed))
            .collect::<Result<Vec<_>>>()
            .map(PropertyValue::LongArray),
        PropertyValue::Double(_) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Number(n) if n.as_i64().is_none() && !n.is_u64() => {
                    n.as_f64().ok_or_else(mixed)
                }
                _ => Err(mixed()),
            })
            .collect::<Result<Vec<_>>>()
            .map(PropertyValue::DoubleArray),
        PropertyValue::String(_) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                _ => Err(mixed()),
            })
            .collect::<Result<Vec<_>>>()
            .map(PropertyValue::StringArray),
        _ => Err(Error::unsupported("nested arrays cannot be stored as a property")),
    }
}

/// Convert a JSON object into a property map
pub fn properties_from_json(value: serde_json::Value) -> Result<Properties> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| PropertyValue::try_from(value).map(|v| (key, v)))
            .collect(),
        serde_json::Value::Null => Ok(Properties::new()),
        other => Err(Error::unsupported(format!(
            "properties must be a JSON object, got {}",
            other
        ))),
    }
}

/// Result of encoding a value, before anything is written
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// Fits in a property block
    Inline {
        /// Type discriminant
        tag: PropertyType,
        /// Value bytes, at most [`INLINE_CAPACITY`]
        bytes: Vec<u8>,
    },
    /// Needs a dynamic record chain
    Overflow {
        /// Type discriminant
        tag: PropertyType,
        /// Full payload for the chain
        payload: Vec<u8>,
    },
}

impl EncodedValue {
    /// Type discriminant of the encoded value
    pub fn tag(&self) -> PropertyType {
        match self {
            Self::Inline { tag, .. } | Self::Overflow { tag, .. } => *tag,
        }
    }
}

/// Encode a value into its type tag and bytes
pub fn encode_value(value: &PropertyValue) -> Result<EncodedValue> {
    let tag = value.property_type();
    let bytes = match value {
        PropertyValue::Bool(v) => vec![u8::from(*v)],
        PropertyValue::Byte(v) => v.to_le_bytes().to_vec(),
        PropertyValue::Short(v) => v.to_le_bytes().to_vec(),
        PropertyValue::Int(v) => v.to_le_bytes().to_vec(),
        PropertyValue::Long(v) => v.to_le_bytes().to_vec(),
        PropertyValue::Float(v) => v.to_bits().to_le_bytes().to_vec(),
        PropertyValue::Double(v) => v.to_bits().to_le_bytes().to_vec(),
        PropertyValue::Char(v) => u32::from(*v).to_le_bytes().to_vec(),
        PropertyValue::String(v) => v.as_bytes().to_vec(),
        PropertyValue::BoolArray(v) => v.iter().map(|b| u8::from(*b)).collect(),
        PropertyValue::ByteArray(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PropertyValue::ShortArray(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PropertyValue::IntArray(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PropertyValue::LongArray(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PropertyValue::FloatArray(v) => v.iter().flat_map(|x| x.to_bits().to_le_bytes()).collect(),
        PropertyValue::DoubleArray(v) => {
            v.iter().flat_map(|x| x.to_bits().to_le_bytes()).collect()
        }
        PropertyValue::CharArray(v) => v.iter().flat_map(|c| u32::from(*c).to_le_bytes()).collect(),
        PropertyValue::StringArray(v) => encode_string_array(v)?,
    };

    if u32::try_from(bytes.len()).is_err() {
        return Err(Error::unsupported(format!(
            "{:?} value of {} bytes exceeds the storable size",
            tag,
            bytes.len()
        )));
    }

    if bytes.len() <= INLINE_CAPACITY {
        Ok(EncodedValue::Inline { tag, bytes })
    } else {
        Ok(EncodedValue::Overflow {
            tag,
            payload: bytes,
        })
    }
}

fn encode_string_array(values: &[String]) -> Result<Vec<u8>> {
    let too_large = || Error::unsupported("string array exceeds the storable size");

    let count = u32::try_from(values.len()).map_err(|_| too_large())?;
    let capacity = 4 + values.iter().map(|s| 4 + s.len()).sum::<usize>();
    let mut bytes = Vec::with_capacity(capacity);
    bytes.extend_from_slice(&count.to_le_bytes());
    for value in values {
        let len = u32::try_from(value.len()).map_err(|_| too_large())?;
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(value.as_bytes());
    }
    Ok(bytes)
}

/// Decode the bytes of a value of type `tag`
pub fn decode_value(tag: PropertyType, bytes: &[u8]) -> Result<PropertyValue> {
    Ok(match tag {
        PropertyType::Bool => PropertyValue::Bool(decode_bool(fixed::<1>(tag, bytes)?[0])?),
        PropertyType::Byte => PropertyValue::Byte(i8::from_le_bytes(fixed(tag, bytes)?)),
        PropertyType::Short => PropertyValue::Short(i16::from_le_bytes(fixed(tag, bytes)?)),
        PropertyType::Int => PropertyValue::Int(i32::from_le_bytes(fixed(tag, bytes)?)),
        PropertyType::Long => PropertyValue::Long(i64::from_le_bytes(fixed(tag, bytes)?)),
        PropertyType::Float => {
            PropertyValue::Float(f32::from_bits(u32::from_le_bytes(fixed(tag, bytes)?)))
        }
        PropertyType::Double => {
            PropertyValue::Double(f64::from_bits(u64::from_le_bytes(fixed(tag, bytes)?)))
        }
        PropertyType::Char => PropertyValue::Char(decode_char(u32::from_le_bytes(fixed(
            tag, bytes,
        )?))?),
        PropertyType::String => PropertyValue::String(decode_utf8(bytes.to_vec())?),
        PropertyType::BoolArray => PropertyValue::BoolArray(
            bytes
                .iter()
                .map(|b| decode_bool(*b))
                .collect::<Result<_>>()?,
        ),
        PropertyType::ByteArray => {
            PropertyValue::ByteArray(elements::<1, _>(tag, bytes, i8::from_le_bytes)?)
        }
        PropertyType::ShortArray => {
            PropertyValue::ShortArray(elements::<2, _>(tag, bytes, i16::from_le_bytes)?)
        }
        PropertyType::IntArray => {
            PropertyValue::IntArray(elements::<4, _>(tag, bytes, i32::from_le_bytes)?)
        }
        PropertyType::LongArray => {
            PropertyValue::LongArray(elements::<8, _>(tag, bytes, i64::from_le_bytes)?)
        }
        PropertyType::FloatArray => PropertyValue::FloatArray(elements::<4, _>(tag, bytes, |b| {
            f32::from_bits(u32::from_le_bytes(b))
        })?),
        PropertyType::DoubleArray => {
            PropertyValue::DoubleArray(elements::<8, _>(tag, bytes, |b| {
                f64::from_bits(u64::from_le_bytes(b))
            })?)
        }
        PropertyType::CharArray => PropertyValue::CharArray(
            elements::<4, _>(tag, bytes, u32::from_le_bytes)?
                .into_iter()
                .map(decode_char)
                .collect::<Result<_>>()?,
        ),
        PropertyType::StringArray => PropertyValue::StringArray(decode_string_array(bytes)?),
    })
}

fn fixed<const N: usize>(tag: PropertyType, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::corruption(format!(
            "{:?} value is {} bytes, expected {}",
            tag,
            bytes.len(),
            N
        ))
    })
}

fn elements<const N: usize, T>(
    tag: PropertyType,
    bytes: &[u8],
    convert: impl Fn([u8; N]) -> T,
) -> Result<Vec<T>> {
    if bytes.len() % N != 0 {
        return Err(Error::corruption(format!(
            "{:?} payload of {} bytes is not a multiple of the {}-byte element width",
            tag,
            bytes.len(),
            N
        )));
    }
    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut element = [0u8; N];
            element.copy_from_slice(chunk);
            convert(element)
        })
        .collect())
}

fn decode_bool(byte: u8) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::corruption(format!("invalid boolean byte {}", other))),
    }
}

fn decode_char(scalar: u32) -> Result<char> {
    char::from_u32(scalar)
        .ok_or_else(|| Error::corruption(format!("invalid char scalar {:#x}", scalar)))
}

fn decode_utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::corruption(format!("invalid UTF-8 string: {}", e)))
}

fn decode_string_array(bytes: &[u8]) -> Result<Vec<String>> {
    let mut cursor = bytes;
    let count = take_u32(&mut cursor)? as usize;
    // Every element needs at least its 4-byte length prefix
    if count > cursor.len() / 4 {
        return Err(Error::corruption(format!(
            "string array declares {} elements in {} bytes",
            count,
            bytes.len()
        )));
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let len = take_u32(&mut cursor)? as usize;
        if len > cursor.len() {
            return Err(Error::corruption("string array element runs past the payload"));
        }
        let (head, rest) = cursor.split_at(len);
        values.push(decode_utf8(head.to_vec())?);
        cursor = rest;
    }

    if !cursor.is_empty() {
        return Err(Error::corruption(format!(
            "string array has {} trailing bytes",
            cursor.len()
        )));
    }
    Ok(values)
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32> {
    if cursor.len() < 4 {
        return Err(Error::corruption("string array payload truncated"));
    }
    let (head, rest) = cursor.split_at(4);
    *cursor = rest;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(head);
    Ok(u32::from_le_bytes(buf))
}
