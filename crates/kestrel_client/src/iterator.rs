//! Result iterators for scan, traverse and relational queries.
//!
//! Iterators hold the handler snapshot they were created with, so a
//! metadata refresh mid-iteration never changes their view. Payload
//! decompression happens lazily as records are yielded; decoding to
//! typed rows is a separate step the caller opts into.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use kestrel_common::{Datum, KestrelResult};

use crate::metadata::TableHandler;
use crate::replica;
use crate::rpc::{
    check_code, ScanPair, ScanResponse, TabletRpc, TraverseEntry, TraverseRequest,
};

/// One record from a scan window: timestamp plus decompressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ts: u64,
    pub value: Vec<u8>,
}

/// Records of one scan response, newest first.
pub struct ScanIter {
    handler: Arc<TableHandler>,
    pairs: std::vec::IntoIter<ScanPair>,
    server_count: u32,
}

impl ScanIter {
    pub(crate) fn new(handler: Arc<TableHandler>, response: ScanResponse) -> Self {
        Self {
            handler,
            server_count: response.count,
            pairs: response.pairs.into_iter(),
        }
    }

    /// Record count the server reported for the whole window, before any
    /// `limit` truncation of the returned batch.
    pub fn server_count(&self) -> u32 {
        self.server_count
    }

    /// Decode a yielded record against the table's schema versions.
    pub fn decode(&self, record: &ScanRecord) -> KestrelResult<Option<Vec<Datum>>> {
        self.handler.decode(&record.value)
    }
}

impl Iterator for ScanIter {
    type Item = KestrelResult<ScanRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.pairs.next()?;
        Some(
            self.handler
                .compression
                .decompress(&pair.value)
                .map(|value| ScanRecord { ts: pair.ts, value }),
        )
    }
}

/// One record from a full-table traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraverseRecord {
    pub key: String,
    pub ts: u64,
    pub value: Vec<u8>,
}

/// Lazy full-table walk: shards in ascending order, batches fetched on
/// demand with a key/timestamp continuation watermark. A transport or
/// server error ends the walk after being yielded once.
pub struct TraverseIter {
    rpc: Arc<dyn TabletRpc>,
    handler: Arc<TableHandler>,
    idx_name: Option<String>,
    ts_name: Option<String>,
    limit: u32,
    pid: u32,
    last_key: Option<String>,
    last_ts: u64,
    buffer: VecDeque<TraverseEntry>,
    shard_finished: bool,
    done: bool,
}

impl TraverseIter {
    pub(crate) fn new(
        rpc: Arc<dyn TabletRpc>,
        handler: Arc<TableHandler>,
        idx_name: Option<String>,
        ts_name: Option<String>,
        limit: u32,
    ) -> Self {
        Self {
            rpc,
            handler,
            idx_name,
            ts_name,
            limit,
            pid: 0,
            last_key: None,
            last_ts: 0,
            buffer: VecDeque::new(),
            shard_finished: false,
            done: false,
        }
    }

    /// Decode a yielded record against the table's schema versions.
    pub fn decode(&self, record: &TraverseRecord) -> KestrelResult<Option<Vec<Datum>>> {
        self.handler.decode(&record.value)
    }

    fn fetch_batch(&mut self) -> KestrelResult<()> {
        let endpoint = replica::read_target(&self.handler, self.pid)?;
        let request = TraverseRequest {
            tid: self.handler.id,
            pid: self.pid,
            idx_name: self.idx_name.clone(),
            ts_name: self.ts_name.clone(),
            limit: self.limit,
            start_key: self.last_key.clone(),
            start_ts: self.last_ts,
        };
        let response = self.rpc.traverse(&endpoint, &request)?;
        check_code(response.code, &response.msg)?;
        debug!(
            table = %self.handler.name,
            shard = self.pid,
            batch = response.entries.len(),
            finished = response.is_finished,
            "traverse batch"
        );
        if let Some(last) = response.entries.last() {
            self.last_key = Some(last.key.clone());
            self.last_ts = last.ts;
        }
        if response.entries.is_empty() || response.is_finished {
            self.shard_finished = true;
        }
        self.buffer.extend(response.entries);
        Ok(())
    }
}

impl Iterator for TraverseIter {
    type Item = KestrelResult<TraverseRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                let record = self
                    .handler
                    .compression
                    .decompress(&entry.value)
                    .map(|value| TraverseRecord {
                        key: entry.key,
                        ts: entry.ts,
                        value,
                    });
                return Some(record);
            }
            if self.done {
                return None;
            }
            if self.shard_finished {
                self.pid += 1;
                self.last_key = None;
                self.last_ts = 0;
                self.shard_finished = false;
                if self.pid as usize >= self.handler.partition_count() {
                    self.done = true;
                    return None;
                }
            }
            if let Err(err) = self.fetch_batch() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

/// Decoded, optionally column-projected rows of a relational query.
/// Decoding happened at construction, so iteration is infallible.
pub struct RelationalIter {
    rows: VecDeque<HashMap<String, Datum>>,
}

impl RelationalIter {
    pub fn empty() -> Self {
        Self {
            rows: VecDeque::new(),
        }
    }

    /// Decode each buffer and keep only `columns` (all columns when the
    /// projection list is empty).
    pub(crate) fn from_buffers(
        handler: &TableHandler,
        buffers: &[Vec<u8>],
        columns: &[String],
    ) -> KestrelResult<Self> {
        let mut rows = VecDeque::new();
        for buf in buffers {
            let values = match handler.decode(buf)? {
                Some(values) => values,
                None => continue,
            };
            let schema = handler.schema_for_count(values.len())?;
            let mut row = HashMap::new();
            for (col, value) in schema.iter().zip(values) {
                if columns.is_empty() || columns.iter().any(|c| c == &col.name) {
                    row.insert(col.name.clone(), value);
                }
            }
            rows.push_back(row);
        }
        Ok(Self { rows })
    }

    /// Append another iterator's remaining rows.
    pub(crate) fn merge(&mut self, other: RelationalIter) {
        self.rows.extend(other.rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Iterator for RelationalIter {
    type Item = HashMap<String, Datum>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kestrel_codec::{encode_row, ColumnDesc};
    use kestrel_common::{DataType, Endpoint, TableId};

    fn handler() -> TableHandler {
        let schema = vec![
            ColumnDesc::new("id", DataType::Int32).index(),
            ColumnDesc::new("name", DataType::Text),
            ColumnDesc::new("score", DataType::Float64).nullable(),
        ];
        TableHandler::new(TableId(9), "players", schema)
            .with_uniform_partitions(1, Endpoint::new("t1:9527"), vec![])
    }

    #[test]
    fn test_relational_projection() {
        let th = handler();
        let buf = encode_row(
            &[Datum::Int32(1), Datum::Text("ada".into()), Datum::Null],
            &th.schema,
        )
        .unwrap();
        let mut iter =
            RelationalIter::from_buffers(&th, &[buf], &["name".to_string()]).unwrap();
        assert_eq!(iter.len(), 1);
        let row = iter.next().unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("name"), Some(&Datum::Text("ada".into())));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_relational_empty_projection_keeps_all_columns() {
        let th = handler();
        let buf = encode_row(
            &[Datum::Int32(2), Datum::Text("bob".into()), Datum::Float64(1.0)],
            &th.schema,
        )
        .unwrap();
        let mut iter = RelationalIter::from_buffers(&th, &[buf], &[]).unwrap();
        let row = iter.next().unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get("id"), Some(&Datum::Int32(2)));
    }

    #[test]
    fn test_relational_skips_empty_buffers() {
        let th = handler();
        let iter = RelationalIter::from_buffers(&th, &[Vec::new()], &[]).unwrap();
        assert!(iter.is_empty());
    }
}
