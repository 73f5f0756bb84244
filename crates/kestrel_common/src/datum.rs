use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// A single scalar column value.
///
/// `Timestamp` carries milliseconds since the Unix epoch; signed so that
/// pre-epoch values survive a round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
}

impl Datum {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(DataType::Bool),
            Datum::Int32(_) => Some(DataType::Int32),
            Datum::Int64(_) => Some(DataType::Int64),
            Datum::UInt32(_) => Some(DataType::UInt32),
            Datum::UInt64(_) => Some(DataType::UInt64),
            Datum::Float64(_) => Some(DataType::Float64),
            Datum::Text(_) => Some(DataType::Text),
            Datum::Bytes(_) => Some(DataType::Bytes),
            Datum::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Whether this value can be stored in a column of the given type.
    /// Null is handled separately by the codec's nullability check.
    pub fn matches(&self, ty: DataType) -> bool {
        match self {
            Datum::Null => true,
            other => other.data_type() == Some(ty),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            Datum::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Datum::UInt32(v) => Some(*v as u64),
            Datum::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Timestamp value of this datum for ts-dimension extraction.
    /// Non-negative integer types are accepted as timestamp sources.
    pub fn as_ts_millis(&self) -> Option<u64> {
        match self {
            Datum::Timestamp(v) if *v >= 0 => Some(*v as u64),
            Datum::Int64(v) if *v >= 0 => Some(*v as u64),
            Datum::UInt64(v) => Some(*v),
            Datum::UInt32(v) => Some(*v as u64),
            _ => None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(v) => write!(f, "{}", v),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::UInt32(v) => write!(f, "{}", v),
            Datum::UInt64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Text(s) => write!(f, "{}", s),
            Datum::Bytes(b) => {
                write!(f, "\\x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Datum::Timestamp(v) => write!(f, "{}", v),
        }
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int32(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int64(v)
    }
}

impl From<u32> for Datum {
    fn from(v: u32) -> Self {
        Datum::UInt32(v)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::UInt64(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float64(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}
