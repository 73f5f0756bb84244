use thiserror::Error;

use crate::types::{DataType, TableId};

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Client-side error taxonomy.
///
/// Local validation errors (arity, empty key, unknown index/table/schema)
/// are raised before any network call. `Remote` surfaces the server's code
/// and message verbatim; this layer never retries. A remote "key not found"
/// is NOT an error — operations resolve it to an absence value.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("no table with name or id {0}")]
    UnknownTable(String),

    #[error("no index named {0} in table")]
    IndexNotFound(String),

    #[error("key column count mismatch: index has {expected} columns, got {actual}")]
    KeyArityMismatch { expected: usize, actual: usize },

    #[error("key is null or empty")]
    EmptyKey,

    #[error("no schema version for column count {0}")]
    NoSchemaForColumnCount(usize),

    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: String,
    },

    #[error("table handler has no partitions")]
    NoPartitions,

    #[error("no available replica for {table} shard {shard}")]
    NoAvailableReplica { table: TableId, shard: u32 },

    #[error("no leader for {table} shard {shard}")]
    NoLeader { table: TableId, shard: u32 },

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("condition columns are empty")]
    EmptyConditions,

    #[error("value columns are empty")]
    EmptyValues,

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("rpc timed out")]
    Timeout,
}

impl KestrelError {
    /// Build a `Remote` error from a response code and message.
    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        KestrelError::Remote {
            code,
            message: message.into(),
        }
    }
}
