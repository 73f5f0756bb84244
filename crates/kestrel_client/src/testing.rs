//! In-memory tablet server double.
//!
//! [`MemoryTablet`] implements [`TabletRpc`] over per-shard in-process
//! state, with enough of the server's read semantics (version windows,
//! continuation watermarks, key-not-found codes) to exercise every
//! façade operation without a network. Register the table handlers you
//! publish so the double can resolve index names to wire ordinals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use kestrel_common::{Endpoint, KestrelResult};

use crate::metadata::TableHandler;
use crate::rpc::{
    CountRequest, CountResponse, DeleteRequest, GeneralResponse, GetRequest, GetResponse,
    PutRequest, ScanPair, ScanRequest, ScanResponse, TabletRpc, TraverseEntry, TraverseRequest,
    TraverseResponse, TsCompare, UpdateRequest, CODE_KEY_NOT_FOUND, CODE_OK,
};

/// Response code the double uses for injected put failures.
pub const CODE_INJECTED_FAULT: i32 = 120;

type Timeline = std::collections::BTreeMap<u64, Vec<u8>>;

/// Records of one shard: `(index ordinal, key)` to a version timeline.
#[derive(Debug, Default)]
struct Shard {
    records: std::collections::BTreeMap<(u32, String), Timeline>,
}

#[derive(Debug, Default)]
pub struct MemoryTablet {
    shards: DashMap<(u32, u32), Shard>,
    handlers: DashMap<u32, Arc<TableHandler>>,
    failing_put_shards: DashMap<(u32, u32), ()>,
    put_attempts: DashMap<(u32, u32), usize>,
    last_scan: DashMap<u32, ScanRequest>,
    last_count: DashMap<u32, CountRequest>,
    calls: AtomicUsize,
}

impl MemoryTablet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler so index and ts names resolve to ordinals.
    pub fn register(&self, handler: &Arc<TableHandler>) {
        self.handlers.insert(handler.id.0, Arc::clone(handler));
    }

    /// Make subsequent puts to one shard fail with an error code.
    pub fn fail_puts(&self, tid: u32, pid: u32) {
        self.failing_put_shards.insert((tid, pid), ());
    }

    /// Total RPC calls served; local validation failures never get here.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Last scan request served for one table, for asserting on the
    /// flags the façade forwarded.
    pub fn last_scan_request(&self, tid: u32) -> Option<ScanRequest> {
        self.last_scan.get(&tid).map(|r| r.value().clone())
    }

    /// Last count request served for one table.
    pub fn last_count_request(&self, tid: u32) -> Option<CountRequest> {
        self.last_count.get(&tid).map(|r| r.value().clone())
    }

    /// How many puts were attempted against one shard, failures included.
    pub fn put_attempts(&self, tid: u32, pid: u32) -> usize {
        self.put_attempts
            .get(&(tid, pid))
            .map(|n| *n.value())
            .unwrap_or(0)
    }

    fn index_ordinal(&self, tid: u32, idx_name: Option<&str>) -> u32 {
        self.handlers
            .get(&tid)
            .and_then(|h| h.index_ordinal(idx_name).ok())
            .unwrap_or(0)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn window(timeline: &Timeline, st: u64, et: u64) -> Vec<(u64, Vec<u8>)> {
        timeline
            .iter()
            .rev()
            .filter(|(ts, _)| (st == 0 || **ts <= st) && (et == 0 || **ts >= et))
            .map(|(ts, value)| (*ts, value.clone()))
            .collect()
    }
}

impl TabletRpc for MemoryTablet {
    fn get(&self, _endpoint: &Endpoint, request: &GetRequest) -> KestrelResult<GetResponse> {
        self.tick();
        let ordinal = self.index_ordinal(request.tid.0, request.idx_name.as_deref());
        let not_found = GetResponse {
            code: CODE_KEY_NOT_FOUND,
            msg: "key not found".to_string(),
            value: Vec::new(),
        };
        let shard = match self.shards.get(&(request.tid.0, request.pid)) {
            Some(shard) => shard,
            None => return Ok(not_found),
        };
        let timeline = match shard.records.get(&(ordinal, request.key.clone())) {
            Some(timeline) => timeline,
            None => return Ok(not_found),
        };

        let end_compare = request.end_ts_compare.unwrap_or(TsCompare::Ge);
        let hit = timeline
            .iter()
            .rev()
            .filter(|(ts, _)| request.end_ts == 0 || end_compare.matches(**ts, request.end_ts))
            .find(|(ts, _)| {
                if request.ts == 0 && request.ts_compare.is_none() {
                    return true;
                }
                request
                    .ts_compare
                    .unwrap_or(TsCompare::Eq)
                    .matches(**ts, request.ts)
            });
        match hit {
            Some((_, value)) => Ok(GetResponse {
                code: CODE_OK,
                msg: String::new(),
                value: value.clone(),
            }),
            None => Ok(not_found),
        }
    }

    fn put(&self, _endpoint: &Endpoint, request: &PutRequest) -> KestrelResult<GeneralResponse> {
        self.tick();
        let shard_key = (request.tid.0, request.pid);
        *self.put_attempts.entry(shard_key).or_insert(0) += 1;
        if self.failing_put_shards.contains_key(&shard_key) {
            return Ok(GeneralResponse {
                code: CODE_INJECTED_FAULT,
                msg: "injected fault".to_string(),
            });
        }

        let mut shard = self.shards.entry(shard_key).or_default();
        if let Some(key) = &request.key {
            shard
                .records
                .entry((0, key.clone()))
                .or_default()
                .insert(request.time, request.value.clone());
            return Ok(GeneralResponse::ok());
        }
        let timestamps: Vec<u64> = if request.ts_dimensions.is_empty() {
            vec![request.time]
        } else {
            request.ts_dimensions.iter().map(|d| d.ts).collect()
        };
        for dimension in &request.dimensions {
            let timeline = shard
                .records
                .entry((dimension.idx, dimension.key.clone()))
                .or_default();
            for ts in &timestamps {
                timeline.insert(*ts, request.value.clone());
            }
        }
        Ok(GeneralResponse::ok())
    }

    fn scan(&self, _endpoint: &Endpoint, request: &ScanRequest) -> KestrelResult<ScanResponse> {
        self.tick();
        self.last_scan.insert(request.tid.0, request.clone());
        let ordinal = self.index_ordinal(request.tid.0, request.idx_name.as_deref());
        let windowed = self
            .shards
            .get(&(request.tid.0, request.pid))
            .and_then(|shard| {
                shard
                    .records
                    .get(&(ordinal, request.key.clone()))
                    .map(|timeline| Self::window(timeline, request.st, request.et))
            })
            .unwrap_or_default();
        let count = windowed.len() as u32;
        let mut pairs: Vec<ScanPair> = windowed
            .into_iter()
            .map(|(ts, value)| ScanPair { ts, value })
            .collect();
        if request.limit > 0 {
            pairs.truncate(request.limit as usize);
        }
        Ok(ScanResponse {
            code: CODE_OK,
            msg: String::new(),
            count,
            pairs,
        })
    }

    fn count(&self, _endpoint: &Endpoint, request: &CountRequest) -> KestrelResult<CountResponse> {
        self.tick();
        self.last_count.insert(request.tid.0, request.clone());
        let ordinal = self.index_ordinal(request.tid.0, request.idx_name.as_deref());
        let count = self
            .shards
            .get(&(request.tid.0, request.pid))
            .and_then(|shard| {
                shard
                    .records
                    .get(&(ordinal, request.key.clone()))
                    .map(|timeline| Self::window(timeline, request.st, request.et).len())
            })
            .unwrap_or(0);
        Ok(CountResponse {
            code: CODE_OK,
            msg: String::new(),
            count: count as u64,
        })
    }

    fn delete(
        &self,
        _endpoint: &Endpoint,
        request: &DeleteRequest,
    ) -> KestrelResult<GeneralResponse> {
        self.tick();
        let ordinal = self.index_ordinal(request.tid.0, request.idx_name.as_deref());
        let removed = self
            .shards
            .get_mut(&(request.tid.0, request.pid))
            .map(|mut shard| {
                shard
                    .records
                    .remove(&(ordinal, request.key.clone()))
                    .is_some()
            })
            .unwrap_or(false);
        if removed {
            Ok(GeneralResponse::ok())
        } else {
            Ok(GeneralResponse {
                code: CODE_KEY_NOT_FOUND,
                msg: "key not found".to_string(),
            })
        }
    }

    fn update(
        &self,
        _endpoint: &Endpoint,
        request: &UpdateRequest,
    ) -> KestrelResult<GeneralResponse> {
        self.tick();
        let handler = match self.handlers.get(&request.tid.0) {
            Some(handler) => Arc::clone(handler.value()),
            None => {
                return Ok(GeneralResponse {
                    code: CODE_INJECTED_FAULT,
                    msg: "table not registered with double".to_string(),
                })
            }
        };

        // decode both projected payloads against the base schema
        let project = |names: &[String], buf: &[u8]| -> KestrelResult<Vec<(String, kestrel_common::Datum)>> {
            let schema: Vec<_> = names
                .iter()
                .filter_map(|n| {
                    handler
                        .newest_schema()
                        .iter()
                        .find(|c| &c.name == n)
                        .cloned()
                })
                .collect();
            let raw = handler.compression.decompress(buf)?;
            let values = kestrel_codec::decode_row(&raw, &schema)?.unwrap_or_default();
            Ok(names.iter().cloned().zip(values).collect())
        };
        let conditions = match project(&request.conditions.names, &request.conditions.value) {
            Ok(pairs) => pairs,
            Err(_) => {
                return Ok(GeneralResponse {
                    code: CODE_INJECTED_FAULT,
                    msg: "bad condition payload".to_string(),
                })
            }
        };
        let values = match project(&request.values.names, &request.values.value) {
            Ok(pairs) => pairs,
            Err(_) => {
                return Ok(GeneralResponse {
                    code: CODE_INJECTED_FAULT,
                    msg: "bad value payload".to_string(),
                })
            }
        };
        let (idx_name, idx_value) = match conditions.first() {
            Some(first) => first,
            None => {
                return Ok(GeneralResponse {
                    code: CODE_INJECTED_FAULT,
                    msg: "empty conditions".to_string(),
                })
            }
        };
        let ordinal = self.index_ordinal(request.tid.0, Some(idx_name));
        let key = idx_value.to_string();

        let mut shard = self.shards.entry((request.tid.0, request.pid)).or_default();
        let timeline = match shard.records.get_mut(&(ordinal, key)) {
            Some(timeline) => timeline,
            None => {
                return Ok(GeneralResponse {
                    code: CODE_KEY_NOT_FOUND,
                    msg: "no row matches condition".to_string(),
                })
            }
        };
        for stored in timeline.values_mut() {
            let rewritten = handler
                .compression
                .decompress(stored)
                .and_then(|raw| handler.decode(&raw))
                .and_then(|decoded| {
                    let mut row = decoded.unwrap_or_default();
                    let schema = handler.schema_for_count(row.len())?.to_vec();
                    for (name, value) in &values {
                        if let Some(pos) = schema.iter().position(|c| &c.name == name) {
                            row[pos] = value.clone();
                        }
                    }
                    let buf = kestrel_codec::encode_row(&row, &schema)?;
                    handler.compression.compress(&buf)
                });
            match rewritten {
                Ok(buf) => *stored = buf,
                Err(_) => {
                    return Ok(GeneralResponse {
                        code: CODE_INJECTED_FAULT,
                        msg: "stored row does not decode".to_string(),
                    })
                }
            }
        }
        Ok(GeneralResponse::ok())
    }

    fn traverse(
        &self,
        _endpoint: &Endpoint,
        request: &TraverseRequest,
    ) -> KestrelResult<TraverseResponse> {
        self.tick();
        let ordinal = self.index_ordinal(request.tid.0, request.idx_name.as_deref());
        let mut flat: Vec<TraverseEntry> = Vec::new();
        if let Some(shard) = self.shards.get(&(request.tid.0, request.pid)) {
            for ((ord, key), timeline) in &shard.records {
                if *ord != ordinal {
                    continue;
                }
                for (ts, value) in timeline.iter().rev() {
                    flat.push(TraverseEntry {
                        key: key.clone(),
                        ts: *ts,
                        value: value.clone(),
                    });
                }
            }
        }
        // resume strictly after the watermark
        if let Some(start_key) = &request.start_key {
            flat.retain(|e| {
                e.key.as_str() > start_key.as_str()
                    || (e.key.as_str() == start_key.as_str() && e.ts < request.start_ts)
            });
        }
        let limit = if request.limit == 0 {
            flat.len()
        } else {
            request.limit as usize
        };
        let is_finished = flat.len() <= limit;
        flat.truncate(limit);
        Ok(TraverseResponse {
            code: CODE_OK,
            msg: String::new(),
            entries: flat,
            is_finished,
        })
    }
}
