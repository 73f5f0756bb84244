use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a table within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tbl:{}", self.0)
    }
}

/// Network address of one tablet server replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint(pub String);

impl Endpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn addr(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column data types supported by the row codec.
///
/// Fixed-width numerics and booleans encode as little-endian scalars;
/// `Text` and `Bytes` are length-prefixed variable-width payloads.
/// `Timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float64,
    Text,
    Bytes,
    Timestamp,
}

impl DataType {
    /// Stable wire tag for this type. Tag 0 is reserved for null.
    pub fn wire_tag(self) -> u8 {
        match self {
            DataType::Bool => 1,
            DataType::Int32 => 2,
            DataType::Int64 => 3,
            DataType::UInt32 => 4,
            DataType::UInt64 => 5,
            DataType::Float64 => 6,
            DataType::Text => 7,
            DataType::Bytes => 8,
            DataType::Timestamp => 9,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DataType::Bool),
            2 => Some(DataType::Int32),
            3 => Some(DataType::Int64),
            4 => Some(DataType::UInt32),
            5 => Some(DataType::UInt64),
            6 => Some(DataType::Float64),
            7 => Some(DataType::Text),
            8 => Some(DataType::Bytes),
            9 => Some(DataType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float64 => "double",
            DataType::Text => "string",
            DataType::Bytes => "bytes",
            DataType::Timestamp => "timestamp",
        };
        write!(f, "{}", name)
    }
}
