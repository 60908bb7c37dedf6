//! Scalar data types for dense arrays
//!
//! A [`DataType`] is the serializable description of one element (kind, byte
//! width, byte order). [`Element`] ties each supported Rust scalar to its
//! description and to its variant of [`ArrayData`].

use crate::errors::{ChunkyardError, Result};
use crate::values::ArrayData;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::mem::size_of;

/// Scalar kind, serialized with numpy's one-letter codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "b")]
    Bool,
    #[serde(rename = "i")]
    Int,
    #[serde(rename = "u")]
    Uint,
    #[serde(rename = "f")]
    Float,
}

impl Kind {
    fn code(self) -> char {
        match self {
            Kind::Bool => 'b',
            Kind::Int => 'i',
            Kind::Uint => 'u',
            Kind::Float => 'f',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Little,
    Big,
    NotApplicable,
}

/// Element type of a dense array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub endianness: Endianness,
    pub kind: Kind,
    pub itemsize: usize,
}

impl DataType {
    pub fn new(kind: Kind, itemsize: usize, endianness: Endianness) -> Result<Self> {
        let supported = match kind {
            Kind::Bool => itemsize == 1,
            Kind::Int | Kind::Uint => matches!(itemsize, 1 | 2 | 4 | 8),
            Kind::Float => matches!(itemsize, 4 | 8),
        };
        if !supported {
            return Err(ChunkyardError::validation(format!(
                "unsupported data type: kind '{}' with itemsize {}",
                kind.code(),
                itemsize
            )));
        }
        let endianness = if itemsize == 1 {
            Endianness::NotApplicable
        } else {
            endianness
        };
        Ok(Self {
            endianness,
            kind,
            itemsize,
        })
    }

    /// Data type of a Rust scalar, stored little-endian
    pub fn of<T: Element>() -> Self {
        let itemsize = size_of::<T>();
        Self {
            endianness: if itemsize == 1 {
                Endianness::NotApplicable
            } else {
                Endianness::Little
            },
            kind: T::KIND,
            itemsize,
        }
    }

    /// Same element kind and width; byte order only matters on the wire.
    pub fn same_element(&self, other: &DataType) -> bool {
        self.kind == other.kind && self.itemsize == other.itemsize
    }

    /// Parse numpy-style strings such as `<f8`, `>i4` or `|u1`.
    pub fn from_numpy_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let (endianness, rest) = match chars.next() {
            Some('<') => (Endianness::Little, chars.as_str()),
            Some('>') => (Endianness::Big, chars.as_str()),
            Some('|') | Some('=') => (Endianness::Little, chars.as_str()),
            _ => (Endianness::Little, s),
        };
        let mut rest_chars = rest.chars();
        let kind = match rest_chars.next() {
            Some('b') => Kind::Bool,
            Some('i') => Kind::Int,
            Some('u') => Kind::Uint,
            Some('f') => Kind::Float,
            _ => {
                return Err(ChunkyardError::validation(format!(
                    "unrecognized data type string '{}'",
                    s
                )))
            }
        };
        let itemsize = rest_chars.as_str().parse::<usize>().map_err(|_| {
            ChunkyardError::validation(format!("unrecognized data type string '{}'", s))
        })?;
        Self::new(kind, itemsize, endianness)
    }

    pub fn to_numpy_str(&self) -> String {
        let order = match self.endianness {
            Endianness::Little => '<',
            Endianness::Big => '>',
            Endianness::NotApplicable => '|',
        };
        format!("{}{}{}", order, self.kind.code(), self.itemsize)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_numpy_str())
    }
}

/// A scalar that can live in an [`ArrayData`]
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: Kind;

    fn encode(self, endianness: Endianness, out: &mut Vec<u8>);
    fn decode(bytes: &[u8], endianness: Endianness) -> Self;
    fn to_json(self) -> JsonValue;
    fn from_json(value: &JsonValue) -> Option<Self>;

    fn wrap(array: ArrayD<Self>) -> ArrayData;
    fn unwrap_ref(data: &ArrayData) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_array_variant {
    ($variant:ident) => {
        fn wrap(array: ArrayD<Self>) -> ArrayData {
            ArrayData::$variant(array)
        }

        fn unwrap_ref(data: &ArrayData) -> Option<&ArrayD<Self>> {
            match data {
                ArrayData::$variant(array) => Some(array),
                _ => None,
            }
        }
    };
}

macro_rules! impl_numeric_element {
    ($t:ty, $kind:expr, $variant:ident, $from_json:expr) => {
        impl Element for $t {
            const KIND: Kind = $kind;

            fn encode(self, endianness: Endianness, out: &mut Vec<u8>) {
                match endianness {
                    Endianness::Big => out.extend_from_slice(&self.to_be_bytes()),
                    _ => out.extend_from_slice(&self.to_le_bytes()),
                }
            }

            fn decode(bytes: &[u8], endianness: Endianness) -> Self {
                let mut buf = [0u8; size_of::<$t>()];
                buf.copy_from_slice(bytes);
                match endianness {
                    Endianness::Big => <$t>::from_be_bytes(buf),
                    _ => <$t>::from_le_bytes(buf),
                }
            }

            fn to_json(self) -> JsonValue {
                JsonValue::from(self)
            }

            fn from_json(value: &JsonValue) -> Option<Self> {
                let convert: fn(&JsonValue) -> Option<$t> = $from_json;
                convert(value)
            }

            impl_array_variant!($variant);
        }
    };
}

impl_numeric_element!(u8, Kind::Uint, U8, |v| v.as_u64().and_then(|x| u8::try_from(x).ok()));
impl_numeric_element!(u16, Kind::Uint, U16, |v| v.as_u64().and_then(|x| u16::try_from(x).ok()));
impl_numeric_element!(u32, Kind::Uint, U32, |v| v.as_u64().and_then(|x| u32::try_from(x).ok()));
impl_numeric_element!(u64, Kind::Uint, U64, |v| v.as_u64());
impl_numeric_element!(i8, Kind::Int, I8, |v| v.as_i64().and_then(|x| i8::try_from(x).ok()));
impl_numeric_element!(i16, Kind::Int, I16, |v| v.as_i64().and_then(|x| i16::try_from(x).ok()));
impl_numeric_element!(i32, Kind::Int, I32, |v| v.as_i64().and_then(|x| i32::try_from(x).ok()));
impl_numeric_element!(i64, Kind::Int, I64, |v| v.as_i64());
impl_numeric_element!(f32, Kind::Float, F32, |v| v.as_f64().map(|x| x as f32));
impl_numeric_element!(f64, Kind::Float, F64, |v| v.as_f64());

impl Element for bool {
    const KIND: Kind = Kind::Bool;

    fn encode(self, _endianness: Endianness, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn decode(bytes: &[u8], _endianness: Endianness) -> Self {
        bytes[0] != 0
    }

    fn to_json(self) -> JsonValue {
        JsonValue::Bool(self)
    }

    fn from_json(value: &JsonValue) -> Option<Self> {
        value.as_bool()
    }

    impl_array_variant!(Bool);
}
