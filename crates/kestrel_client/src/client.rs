//! Synchronous table access façade.
//!
//! One [`TableClient`] serves every table; per-call state lives on the
//! stack, so a single instance is shared freely across threads. Every
//! operation resolves a handler snapshot first, composes and validates
//! its routing key locally, and only then touches the transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use kestrel_codec::{encode_row, ColumnDesc};
use kestrel_common::{ClientConfig, Datum, KestrelError, KestrelResult, TableId};

use crate::iterator::{RelationalIter, ScanIter, TraverseIter};
use crate::key::{component_text, compose_key, normalize_raw, KeyInput, KEY_SEPARATOR};
use crate::metadata::{MetadataProvider, TableHandler};
use crate::partition::resolve_partition;
use crate::replica::{read_target, write_target};
use crate::rpc::{
    check_code, ColumnsPayload, CountRequest, DeleteRequest, Dimension, GetRequest, PutRequest,
    ScanRequest, TabletRpc, TsCompare, TsDimension, UpdateRequest, CODE_KEY_NOT_FOUND, CODE_OK,
};

/// A table, by name or id.
#[derive(Debug, Clone, Copy)]
pub enum TableRef<'a> {
    Name(&'a str),
    Id(TableId),
}

impl<'a> From<&'a str> for TableRef<'a> {
    fn from(name: &'a str) -> Self {
        TableRef::Name(name)
    }
}

impl From<TableId> for TableRef<'_> {
    fn from(id: TableId) -> Self {
        TableRef::Id(id)
    }
}

/// Version-selection knobs for point reads. The default asks for the
/// latest version of the key.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub idx_name: Option<String>,
    /// Timestamp bound; 0 means "latest".
    pub ts: u64,
    pub ts_name: Option<String>,
    pub ts_compare: Option<TsCompare>,
    pub end_ts: u64,
    pub end_ts_compare: Option<TsCompare>,
}

impl GetOptions {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn at(ts: u64) -> Self {
        Self {
            ts,
            ts_compare: Some(TsCompare::Eq),
            ..Self::default()
        }
    }

    pub fn at_or_before(ts: u64) -> Self {
        Self {
            ts,
            ts_compare: Some(TsCompare::Le),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub idx_name: Option<String>,
    pub ts_name: Option<String>,
    /// 0 means no client-imposed cap.
    pub limit: u32,
    /// Ask the server to keep at least this many records even when
    /// expiry would trim the window.
    pub at_least: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    pub idx_name: Option<String>,
    pub ts_name: Option<String>,
    /// Window start (newest bound), inclusive; 0 means unbounded.
    pub st: u64,
    /// Window end (oldest bound), inclusive; 0 means unbounded.
    pub et: u64,
    pub filter_expired_data: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TraverseOptions {
    pub idx_name: Option<String>,
    pub ts_name: Option<String>,
}

/// Relational point-query input: the index condition to route and match
/// by, plus an optional column projection (empty keeps every column).
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub index: Vec<(String, Datum)>,
    pub columns: Vec<String>,
}

/// Client for sharded, replicated tables.
pub struct TableClient {
    meta: Arc<dyn MetadataProvider>,
    rpc: Arc<dyn TabletRpc>,
    config: ClientConfig,
}

impl TableClient {
    pub fn new(
        meta: Arc<dyn MetadataProvider>,
        rpc: Arc<dyn TabletRpc>,
        config: ClientConfig,
    ) -> Self {
        Self { meta, rpc, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn resolve(&self, table: TableRef<'_>) -> KestrelResult<Arc<TableHandler>> {
        match table {
            TableRef::Name(name) => self
                .meta
                .handler_by_name(name)
                .ok_or_else(|| KestrelError::UnknownTable(name.to_string())),
            TableRef::Id(id) => self
                .meta
                .handler_by_id(id)
                .ok_or_else(|| KestrelError::UnknownTable(id.to_string())),
        }
    }

    /// Point read returning the raw (decompressed) row payload, or
    /// `None` when the server reports the key absent from the window.
    pub fn get<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        key: impl Into<KeyInput>,
        opts: &GetOptions,
    ) -> KestrelResult<Option<Vec<u8>>> {
        let handler = self.resolve(table.into())?;
        self.get_inner(&handler, &key.into(), opts)
    }

    /// Point read decoded against the row's own schema version.
    pub fn get_row<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        key: impl Into<KeyInput>,
        opts: &GetOptions,
    ) -> KestrelResult<Option<Vec<Datum>>> {
        let handler = self.resolve(table.into())?;
        match self.get_inner(&handler, &key.into(), opts)? {
            Some(buf) => handler.decode(&buf),
            None => Ok(None),
        }
    }

    fn get_inner(
        &self,
        handler: &TableHandler,
        key: &KeyInput,
        opts: &GetOptions,
    ) -> KestrelResult<Option<Vec<u8>>> {
        handler.ts_ordinal(opts.ts_name.as_deref())?;
        let key = compose_key(key, opts.idx_name.as_deref(), handler, self.config.handle_null)?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = read_target(handler, pid)?;
        let request = GetRequest {
            tid: handler.id,
            pid,
            key,
            idx_name: opts.idx_name.clone(),
            ts: opts.ts,
            ts_name: opts.ts_name.clone(),
            ts_compare: opts.ts_compare,
            end_ts: opts.end_ts,
            end_ts_compare: opts.end_ts_compare,
        };
        let response = self.rpc.get(&endpoint, &request)?;
        if response.code == CODE_KEY_NOT_FOUND {
            return Ok(None);
        }
        check_code(response.code, &response.msg)?;
        if response.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(handler.compression.decompress(&response.value)?))
    }

    /// Windowed read of a key's versions, newest first. `st` is the
    /// newest bound and `et` the oldest, both inclusive; 0 leaves a
    /// bound open.
    pub fn scan<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        key: impl Into<KeyInput>,
        st: u64,
        et: u64,
        opts: &ScanOptions,
    ) -> KestrelResult<ScanIter> {
        let handler = self.resolve(table.into())?;
        handler.ts_ordinal(opts.ts_name.as_deref())?;
        let key = compose_key(
            &key.into(),
            opts.idx_name.as_deref(),
            &handler,
            self.config.handle_null,
        )?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = read_target(&handler, pid)?;
        let request = ScanRequest {
            tid: handler.id,
            pid,
            key,
            idx_name: opts.idx_name.clone(),
            ts_name: opts.ts_name.clone(),
            st,
            et,
            limit: opts.limit,
            at_least: opts.at_least,
            remove_duplicates: self.config.remove_duplicate_by_time,
        };
        let response = self.rpc.scan(&endpoint, &request)?;
        check_code(response.code, &response.msg)?;
        Ok(ScanIter::new(handler, response))
    }

    /// Number of records for a key, optionally restricted to a window.
    pub fn count<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        key: impl Into<KeyInput>,
        opts: &CountOptions,
    ) -> KestrelResult<u64> {
        let handler = self.resolve(table.into())?;
        handler.ts_ordinal(opts.ts_name.as_deref())?;
        let key = compose_key(
            &key.into(),
            opts.idx_name.as_deref(),
            &handler,
            self.config.handle_null,
        )?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = read_target(&handler, pid)?;
        let request = CountRequest {
            tid: handler.id,
            pid,
            key,
            idx_name: opts.idx_name.clone(),
            ts_name: opts.ts_name.clone(),
            st: opts.st,
            et: opts.et,
            filter_expired_data: opts.filter_expired_data,
            remove_duplicates: self.config.remove_duplicate_by_time,
        };
        let response = self.rpc.count(&endpoint, &request)?;
        if response.code == CODE_KEY_NOT_FOUND {
            return Ok(0);
        }
        check_code(response.code, &response.msg)?;
        Ok(response.count)
    }

    /// Remove every version of a key under one index. Goes to the
    /// shard leader.
    pub fn delete<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        key: impl Into<KeyInput>,
        idx_name: Option<&str>,
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        let key = compose_key(&key.into(), idx_name, &handler, self.config.handle_null)?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = write_target(&handler, pid)?;
        let request = DeleteRequest {
            tid: handler.id,
            pid,
            key,
            idx_name: idx_name.map(str::to_string),
        };
        let response = self.rpc.delete(&endpoint, &request)?;
        check_code(response.code, &response.msg)
    }

    /// Delete routed by condition columns; the first condition must name
    /// an index column and carries the routing value.
    pub fn delete_by_condition<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        conditions: &[(String, Datum)],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        let (idx_name, value) = conditions.first().ok_or(KestrelError::EmptyConditions)?;
        handler.index_ordinal(Some(idx_name))?;
        let key = component_text(value, self.config.handle_null)?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = write_target(&handler, pid)?;
        let request = DeleteRequest {
            tid: handler.id,
            pid,
            key,
            idx_name: Some(idx_name.clone()),
        };
        let response = self.rpc.delete(&endpoint, &request)?;
        check_code(response.code, &response.msg)
    }

    /// In-place update of the rows matching `conditions`, setting the
    /// columns in `values`. Routed by the first condition column, which
    /// must name an index.
    pub fn update<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        conditions: &[(String, Datum)],
        values: &[(String, Datum)],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        if conditions.is_empty() {
            return Err(KestrelError::EmptyConditions);
        }
        if values.is_empty() {
            return Err(KestrelError::EmptyValues);
        }
        let condition_payload = self.projection_payload(&handler, conditions)?;
        let value_payload = self.projection_payload(&handler, values)?;

        let (idx_name, idx_value) = &conditions[0];
        handler.index_ordinal(Some(idx_name))?;
        let key = component_text(idx_value, self.config.handle_null)?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = write_target(&handler, pid)?;
        let request = UpdateRequest {
            tid: handler.id,
            pid,
            conditions: condition_payload,
            values: value_payload,
        };
        let response = self.rpc.update(&endpoint, &request)?;
        check_code(response.code, &response.msg)
    }

    /// Encode a named-column subset as a projected row payload, columns
    /// ordered as in the base schema.
    fn projection_payload(
        &self,
        handler: &TableHandler,
        pairs: &[(String, Datum)],
    ) -> KestrelResult<ColumnsPayload> {
        let mut names = Vec::with_capacity(pairs.len());
        let mut schema: Vec<ColumnDesc> = Vec::with_capacity(pairs.len());
        let mut row = Vec::with_capacity(pairs.len());
        for col in handler.newest_schema() {
            if let Some((_, value)) = pairs.iter().find(|(name, _)| name == &col.name) {
                names.push(col.name.clone());
                schema.push(col.clone());
                row.push(value.clone());
            }
        }
        if names.len() != pairs.len() {
            let unknown = pairs
                .iter()
                .find(|(name, _)| !handler.newest_schema().iter().any(|c| &c.name == name))
                .map(|(name, _)| name.clone())
                .unwrap_or_default();
            return Err(KestrelError::InvalidRow(format!(
                "unknown column {unknown}"
            )));
        }
        let buf = encode_row(&row, &schema)?;
        let buf = handler.compression.compress(&buf)?;
        Ok(ColumnsPayload { names, value: buf })
    }

    /// Key-value put for schema-less tables.
    pub fn put_kv<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        key: &str,
        time: u64,
        value: &[u8],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        if handler.is_schema_table() {
            return Err(KestrelError::InvalidRow(
                "table has a schema, put a typed row instead".to_string(),
            ));
        }
        if time == 0 {
            return Err(KestrelError::InvalidRow(
                "timestamp must be positive".to_string(),
            ));
        }
        let key = normalize_raw(key, self.config.handle_null)?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = write_target(&handler, pid)?;
        let request = PutRequest {
            tid: handler.id,
            pid,
            key: Some(key),
            time,
            dimensions: Vec::new(),
            ts_dimensions: Vec::new(),
            value: handler.compression.compress(value)?,
        };
        let response = self.rpc.put(&endpoint, &request)?;
        check_code(response.code, &response.msg)
    }

    /// Put a typed row at an explicit timestamp. On tables with
    /// designated timestamp columns the explicit timestamp is ignored
    /// and the column values win.
    pub fn put<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        time: u64,
        row: &[Datum],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        if !handler.is_schema_table() {
            return Err(KestrelError::InvalidRow(
                "table has no schema, use put_kv".to_string(),
            ));
        }
        if handler.has_ts_col() {
            return self.put_inner(&handler, 0, row);
        }
        self.put_inner(&handler, time, row)
    }

    /// Put a typed row whose timestamp comes from its designated
    /// timestamp columns.
    pub fn put_row<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        row: &[Datum],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        self.put_inner(&handler, 0, row)
    }

    /// Put a row given as column name/value pairs at an explicit
    /// timestamp; missing columns become null. The pair count selects
    /// the schema version.
    pub fn put_map_at<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        time: u64,
        row: &[(String, Datum)],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        let values = Self::map_to_row(&handler, row)?;
        if handler.has_ts_col() {
            return self.put_inner(&handler, 0, &values);
        }
        self.put_inner(&handler, time, &values)
    }

    /// Put a row given as column name/value pairs, timestamp taken from
    /// its designated timestamp columns.
    pub fn put_map<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        row: &[(String, Datum)],
    ) -> KestrelResult<()> {
        let handler = self.resolve(table.into())?;
        let values = Self::map_to_row(&handler, row)?;
        self.put_inner(&handler, 0, &values)
    }

    fn map_to_row(
        handler: &TableHandler,
        pairs: &[(String, Datum)],
    ) -> KestrelResult<Vec<Datum>> {
        let schema = handler.schema_for_count(pairs.len())?;
        Ok(schema
            .iter()
            .map(|col| {
                pairs
                    .iter()
                    .find(|(name, _)| name == &col.name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Datum::Null)
            })
            .collect())
    }

    /// Encode once, fan the row out to every shard its index keys hash
    /// to, and report the conjunction: every shard is attempted even
    /// when an earlier one fails, and the first failure is returned.
    fn put_inner(&self, handler: &TableHandler, time: u64, row: &[Datum]) -> KestrelResult<()> {
        let schema = handler.schema_for_count(row.len())?;

        let mut ts_dimensions = Vec::new();
        for (ordinal, position) in TableHandler::ts_columns(schema) {
            let value = &row[position];
            if value.is_null() {
                continue;
            }
            let ts = value.as_ts_millis().ok_or_else(|| KestrelError::TypeMismatch {
                column: schema[position].name.clone(),
                expected: schema[position].data_type,
                actual: value
                    .data_type()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "null".to_string()),
            })?;
            ts_dimensions.push(TsDimension { ts, idx: ordinal });
        }
        if time == 0 && ts_dimensions.is_empty() {
            return Err(KestrelError::InvalidRow(
                "row has no timestamp".to_string(),
            ));
        }

        let indexes = handler.effective_indexes();
        if indexes.is_empty() {
            return Err(KestrelError::IndexNotFound("<none>".to_string()));
        }
        let mut by_shard: BTreeMap<u32, Vec<Dimension>> = BTreeMap::new();
        for (ordinal, index) in indexes.iter().enumerate() {
            let mut parts = Vec::with_capacity(index.columns.len());
            for column in &index.columns {
                let position = schema
                    .iter()
                    .position(|c| &c.name == column)
                    .ok_or_else(|| KestrelError::IndexNotFound(index.name.clone()))?;
                parts.push(component_text(&row[position], self.config.handle_null)?);
            }
            let key = parts.join(KEY_SEPARATOR);
            let pid = resolve_partition(&key, handler.partition_count())?;
            by_shard.entry(pid).or_default().push(Dimension {
                key,
                idx: ordinal as u32,
            });
        }

        let buf = encode_row(row, schema)?;
        let buf = handler.compression.compress(&buf)?;
        debug!(
            table = %handler.name,
            shards = by_shard.len(),
            dims = indexes.len(),
            "put fan-out"
        );

        let mut first_failure: Option<KestrelError> = None;
        for (pid, dimensions) in by_shard {
            let attempt = write_target(handler, pid).and_then(|endpoint| {
                let request = PutRequest {
                    tid: handler.id,
                    pid,
                    key: None,
                    time,
                    dimensions,
                    ts_dimensions: ts_dimensions.clone(),
                    value: buf.clone(),
                };
                let response = self.rpc.put(&endpoint, &request)?;
                check_code(response.code, &response.msg)
            });
            if let Err(err) = attempt {
                warn!(table = %handler.name, shard = pid, error = %err, "put failed on shard");
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Relational point query by index condition, with optional column
    /// projection. A non-success response yields an empty iterator.
    pub fn query<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        ro: &ReadOptions,
    ) -> KestrelResult<RelationalIter> {
        let handler = self.resolve(table.into())?;
        let buffers = self.query_buffers(&handler, ro)?;
        RelationalIter::from_buffers(&handler, &buffers, &ro.columns)
    }

    /// Several relational point queries merged into one iterator, each
    /// row projected by its own query's column list.
    pub fn batch_query<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        ros: &[ReadOptions],
    ) -> KestrelResult<RelationalIter> {
        let handler = self.resolve(table.into())?;
        let mut merged = RelationalIter::empty();
        for ro in ros {
            let buffers = self.query_buffers(&handler, ro)?;
            merged.merge(RelationalIter::from_buffers(&handler, &buffers, &ro.columns)?);
        }
        Ok(merged)
    }

    fn query_buffers(
        &self,
        handler: &TableHandler,
        ro: &ReadOptions,
    ) -> KestrelResult<Vec<Vec<u8>>> {
        let (idx_name, value) = ro.index.first().ok_or(KestrelError::EmptyConditions)?;
        handler.index_ordinal(Some(idx_name))?;
        let key = component_text(value, self.config.handle_null)?;
        let pid = resolve_partition(&key, handler.partition_count())?;
        let endpoint = read_target(handler, pid)?;
        let request = GetRequest {
            tid: handler.id,
            pid,
            key,
            idx_name: Some(idx_name.clone()),
            ts: 0,
            ts_name: None,
            ts_compare: None,
            end_ts: 0,
            end_ts_compare: None,
        };
        let response = self.rpc.get(&endpoint, &request)?;
        if response.code != CODE_OK || response.value.is_empty() {
            debug!(
                table = %handler.name,
                code = response.code,
                "relational query matched nothing"
            );
            return Ok(Vec::new());
        }
        Ok(vec![handler.compression.decompress(&response.value)?])
    }

    /// Lazy full-table walk over every shard.
    pub fn traverse<'a>(
        &self,
        table: impl Into<TableRef<'a>>,
        opts: &TraverseOptions,
    ) -> KestrelResult<TraverseIter> {
        let handler = self.resolve(table.into())?;
        if opts.idx_name.is_some() {
            handler.index_ordinal(opts.idx_name.as_deref())?;
        }
        handler.ts_ordinal(opts.ts_name.as_deref())?;
        Ok(TraverseIter::new(
            Arc::clone(&self.rpc),
            handler,
            opts.idx_name.clone(),
            opts.ts_name.clone(),
            self.config.traverse_limit,
        ))
    }

    /// Newest schema version of a table.
    pub fn schema<'a>(&self, table: impl Into<TableRef<'a>>) -> KestrelResult<Vec<ColumnDesc>> {
        Ok(self.resolve(table.into())?.newest_schema().to_vec())
    }
}
