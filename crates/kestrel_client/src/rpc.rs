//! Tablet RPC boundary: request/response types and the transport trait.
//!
//! The façade only ever talks to tablet servers through [`TabletRpc`].
//! A transport implementation serializes these types onto its own wire;
//! the in-memory double in `testing` implements the same trait, so every
//! operation above this line is testable without a network.

use serde::{Deserialize, Serialize};

use kestrel_common::{Endpoint, KestrelError, KestrelResult, TableId};

/// Server response code for success.
pub const CODE_OK: i32 = 0;
/// Server response code meaning the key has no record in the window.
/// Reads translate it to an absence value instead of an error.
pub const CODE_KEY_NOT_FOUND: i32 = 109;

/// Comparison applied between a stored record timestamp and a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsCompare {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
}

impl TsCompare {
    pub fn matches(self, record_ts: u64, bound: u64) -> bool {
        match self {
            TsCompare::Eq => record_ts == bound,
            TsCompare::Le => record_ts <= bound,
            TsCompare::Lt => record_ts < bound,
            TsCompare::Ge => record_ts >= bound,
            TsCompare::Gt => record_ts > bound,
        }
    }
}

/// One secondary-index placement of a row: the composed key and the wire
/// ordinal of the index it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub key: String,
    pub idx: u32,
}

/// One timestamp-column value of a row, by ts-column ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsDimension {
    pub ts: u64,
    pub idx: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub tid: TableId,
    pub pid: u32,
    pub key: String,
    pub idx_name: Option<String>,
    /// 0 means "latest version".
    pub ts: u64,
    pub ts_name: Option<String>,
    pub ts_compare: Option<TsCompare>,
    pub end_ts: u64,
    pub end_ts_compare: Option<TsCompare>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub code: i32,
    pub msg: String,
    /// Possibly-compressed row payload; empty when nothing matched.
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub tid: TableId,
    pub pid: u32,
    /// Set for key-value puts; schema tables route via `dimensions`.
    pub key: Option<String>,
    pub time: u64,
    pub dimensions: Vec<Dimension>,
    pub ts_dimensions: Vec<TsDimension>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub tid: TableId,
    pub pid: u32,
    pub key: String,
    pub idx_name: Option<String>,
    pub ts_name: Option<String>,
    /// Window start (newest bound), inclusive; 0 means unbounded.
    pub st: u64,
    /// Window end (oldest bound), inclusive; 0 means unbounded.
    pub et: u64,
    pub limit: u32,
    /// Return at least this many records even if expiry would trim them.
    pub at_least: u32,
    pub remove_duplicates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPair {
    pub ts: u64,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub code: i32,
    pub msg: String,
    /// Server-side record count for the window, independent of `limit`
    /// truncation applied to `pairs`.
    pub count: u32,
    pub pairs: Vec<ScanPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountRequest {
    pub tid: TableId,
    pub pid: u32,
    pub key: String,
    pub idx_name: Option<String>,
    pub ts_name: Option<String>,
    pub st: u64,
    pub et: u64,
    pub filter_expired_data: bool,
    pub remove_duplicates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub code: i32,
    pub msg: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub tid: TableId,
    pub pid: u32,
    pub key: String,
    pub idx_name: Option<String>,
}

/// A projected set of columns and their encoded row payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsPayload {
    pub names: Vec<String>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub tid: TableId,
    pub pid: u32,
    pub conditions: ColumnsPayload,
    pub values: ColumnsPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraverseRequest {
    pub tid: TableId,
    pub pid: u32,
    pub idx_name: Option<String>,
    pub ts_name: Option<String>,
    pub limit: u32,
    /// Continuation watermark: resume strictly after this key/ts pair.
    pub start_key: Option<String>,
    pub start_ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraverseEntry {
    pub key: String,
    pub ts: u64,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraverseResponse {
    pub code: i32,
    pub msg: String,
    pub entries: Vec<TraverseEntry>,
    /// Whether the shard is exhausted.
    pub is_finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralResponse {
    pub code: i32,
    pub msg: String,
}

impl GeneralResponse {
    pub fn ok() -> Self {
        Self {
            code: CODE_OK,
            msg: String::new(),
        }
    }
}

/// Raise a `Remote` error for any non-success code.
pub fn check_code(code: i32, msg: &str) -> KestrelResult<()> {
    if code == CODE_OK {
        Ok(())
    } else {
        Err(KestrelError::remote(code, msg))
    }
}

/// Synchronous transport to one tablet server endpoint per call.
///
/// Implementations return `Err` only for transport-level failures;
/// application-level failures come back as non-zero response codes.
pub trait TabletRpc: Send + Sync {
    fn get(&self, endpoint: &Endpoint, request: &GetRequest) -> KestrelResult<GetResponse>;
    fn put(&self, endpoint: &Endpoint, request: &PutRequest) -> KestrelResult<GeneralResponse>;
    fn scan(&self, endpoint: &Endpoint, request: &ScanRequest) -> KestrelResult<ScanResponse>;
    fn count(&self, endpoint: &Endpoint, request: &CountRequest) -> KestrelResult<CountResponse>;
    fn delete(&self, endpoint: &Endpoint, request: &DeleteRequest)
        -> KestrelResult<GeneralResponse>;
    fn update(&self, endpoint: &Endpoint, request: &UpdateRequest)
        -> KestrelResult<GeneralResponse>;
    fn traverse(
        &self,
        endpoint: &Endpoint,
        request: &TraverseRequest,
    ) -> KestrelResult<TraverseResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_compare() {
        assert!(TsCompare::Eq.matches(5, 5));
        assert!(!TsCompare::Eq.matches(5, 6));
        assert!(TsCompare::Le.matches(5, 5));
        assert!(TsCompare::Lt.matches(4, 5));
        assert!(!TsCompare::Lt.matches(5, 5));
        assert!(TsCompare::Ge.matches(6, 5));
        assert!(TsCompare::Gt.matches(6, 5));
        assert!(!TsCompare::Gt.matches(5, 5));
    }

    #[test]
    fn test_check_code() {
        assert!(check_code(CODE_OK, "").is_ok());
        let err = check_code(138, "table is loading").unwrap_err();
        match err {
            KestrelError::Remote { code, message } => {
                assert_eq!(code, 138);
                assert_eq!(message, "table is loading");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
