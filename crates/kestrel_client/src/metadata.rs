//! Table metadata: handlers, partition views and the provider seam.
//!
//! A [`TableHandler`] is an immutable snapshot of one table's routing and
//! schema state. The HA layer publishes fresh snapshots through a
//! [`MetadataProvider`]; operations grab an `Arc` once and use that
//! consistent view for their whole lifetime, including iterators that
//! outlive the call.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use kestrel_codec::{decode_row, peek_column_count, ColumnDesc, CompressionMode};
use kestrel_common::{Datum, Endpoint, KestrelError, KestrelResult, TableId};

/// Replica preference for read operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// Only the leader; fail if it is absent.
    LeaderOnly,
    /// A follower when any is present, otherwise the leader.
    FollowerPreferred,
    /// Any available replica, leader included.
    Random,
    /// The leader when present, otherwise a follower.
    #[default]
    LeaderFallback,
}

/// One shard of a table: its leader (if currently known) and followers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionHandler {
    pub index: u32,
    pub leader: Option<Endpoint>,
    #[serde(default)]
    pub followers: Vec<Endpoint>,
}

impl PartitionHandler {
    pub fn new(index: u32, leader: Option<Endpoint>, followers: Vec<Endpoint>) -> Self {
        Self {
            index,
            leader,
            followers,
        }
    }
}

/// A named secondary index over one or more columns. The position of a
/// definition in the table's index list is its wire ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Immutable snapshot of one table's metadata.
///
/// `schema` is the base version; `schema_versions` maps a column count to
/// the evolved schema with exactly that many columns. Counts are unique
/// across versions because evolution is strictly additive, which lets a
/// self-describing row buffer pick its version from its count header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableHandler {
    pub id: TableId,
    pub name: String,
    pub partitions: Vec<PartitionHandler>,
    pub schema: Vec<ColumnDesc>,
    #[serde(default)]
    pub schema_versions: BTreeMap<usize, Vec<ColumnDesc>>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub compression: CompressionMode,
    #[serde(default)]
    pub read_strategy: ReadStrategy,
}

impl TableHandler {
    pub fn new(id: TableId, name: impl Into<String>, schema: Vec<ColumnDesc>) -> Self {
        Self {
            id,
            name: name.into(),
            partitions: Vec::new(),
            schema,
            schema_versions: BTreeMap::new(),
            indexes: Vec::new(),
            compression: CompressionMode::None,
            read_strategy: ReadStrategy::default(),
        }
    }

    /// All shards served by one replica set. Convenient for tests and
    /// single-node deployments.
    pub fn with_uniform_partitions(
        mut self,
        count: u32,
        leader: Endpoint,
        followers: Vec<Endpoint>,
    ) -> Self {
        self.partitions = (0..count)
            .map(|i| PartitionHandler::new(i, Some(leader.clone()), followers.clone()))
            .collect();
        self
    }

    pub fn with_partition(mut self, partition: PartitionHandler) -> Self {
        self.partitions.push(partition);
        self
    }

    /// Register an evolved schema version, keyed by its column count.
    pub fn with_schema_version(mut self, columns: Vec<ColumnDesc>) -> Self {
        self.schema_versions.insert(columns.len(), columns);
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    pub fn with_read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.read_strategy = strategy;
        self
    }

    /// Structural checks applied before a handler is published.
    pub fn validate(&self) -> KestrelResult<()> {
        if self.partitions.is_empty() {
            return Err(KestrelError::NoPartitions);
        }
        for (i, p) in self.partitions.iter().enumerate() {
            if p.index != i as u32 {
                return Err(KestrelError::InvalidRow(format!(
                    "table {} partition list is not contiguous at slot {}",
                    self.name, i
                )));
            }
        }
        for index in self.effective_indexes() {
            for col in &index.columns {
                if !self.newest_schema().iter().any(|c| &c.name == col) {
                    return Err(KestrelError::IndexNotFound(format!(
                        "{} (column {} missing from schema)",
                        index.name, col
                    )));
                }
            }
        }
        for (count, cols) in &self.schema_versions {
            if *count != cols.len() {
                return Err(KestrelError::NoSchemaForColumnCount(*count));
            }
        }
        Ok(())
    }

    pub fn partition(&self, pid: u32) -> KestrelResult<&PartitionHandler> {
        self.partitions
            .get(pid as usize)
            .ok_or(KestrelError::NoPartitions)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_schema_table(&self) -> bool {
        !self.schema.is_empty()
    }

    /// The widest registered schema; the base schema when no evolved
    /// versions exist.
    pub fn newest_schema(&self) -> &[ColumnDesc] {
        self.schema_versions
            .values()
            .next_back()
            .map(Vec::as_slice)
            .unwrap_or(&self.schema)
    }

    /// Resolve the schema version whose column count matches `count`.
    pub fn schema_for_count(&self, count: usize) -> KestrelResult<&[ColumnDesc]> {
        if count == self.schema.len() {
            return Ok(&self.schema);
        }
        self.schema_versions
            .get(&count)
            .map(Vec::as_slice)
            .ok_or(KestrelError::NoSchemaForColumnCount(count))
    }

    /// Decode a row buffer by resolving its schema version from the count
    /// header first. Empty buffers mean "no row".
    pub fn decode(&self, buf: &[u8]) -> KestrelResult<Option<Vec<Datum>>> {
        let count = match peek_column_count(buf) {
            Some(count) => count,
            None => return Ok(None),
        };
        decode_row(buf, self.schema_for_count(count)?)
    }

    /// Index definitions in wire-ordinal order. When the table declares
    /// no explicit indexes, each flagged index column forms a one-column
    /// index named after itself.
    pub fn effective_indexes(&self) -> Vec<IndexDef> {
        if !self.indexes.is_empty() {
            return self.indexes.clone();
        }
        self.schema
            .iter()
            .filter(|c| c.is_index)
            .map(|c| IndexDef::new(c.name.clone(), vec![c.name.clone()]))
            .collect()
    }

    /// Wire ordinal of an index; `None` selects the first index.
    pub fn index_ordinal(&self, name: Option<&str>) -> KestrelResult<u32> {
        let indexes = self.effective_indexes();
        match name {
            None => {
                if indexes.is_empty() {
                    Err(KestrelError::IndexNotFound("<default>".to_string()))
                } else {
                    Ok(0)
                }
            }
            Some(n) => indexes
                .iter()
                .position(|i| i.name == n)
                .map(|p| p as u32)
                .ok_or_else(|| KestrelError::IndexNotFound(n.to_string())),
        }
    }

    /// Columns composing the given index, in declaration order.
    pub fn key_columns(&self, name: Option<&str>) -> KestrelResult<Vec<String>> {
        let indexes = self.effective_indexes();
        let ordinal = self.index_ordinal(name)? as usize;
        Ok(indexes[ordinal].columns.clone())
    }

    /// Designated timestamp columns of a schema version, as
    /// `(ts_ordinal, column_position)` pairs.
    pub fn ts_columns(schema: &[ColumnDesc]) -> Vec<(u32, usize)> {
        schema
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_ts_col)
            .enumerate()
            .map(|(ord, (pos, _))| (ord as u32, pos))
            .collect()
    }

    /// Whether any schema version designates a timestamp column.
    pub fn has_ts_col(&self) -> bool {
        self.newest_schema().iter().any(|c| c.is_ts_col)
    }

    /// Wire ordinal of a designated timestamp column; `None` selects the
    /// first one.
    pub fn ts_ordinal(&self, name: Option<&str>) -> KestrelResult<Option<u32>> {
        let ts_cols: Vec<&ColumnDesc> = self
            .newest_schema()
            .iter()
            .filter(|c| c.is_ts_col)
            .collect();
        match name {
            None => Ok(if ts_cols.is_empty() { None } else { Some(0) }),
            Some(n) => ts_cols
                .iter()
                .position(|c| c.name == n)
                .map(|p| Some(p as u32))
                .ok_or_else(|| KestrelError::IndexNotFound(n.to_string())),
        }
    }
}

/// Source of table metadata snapshots, implemented by the HA layer.
pub trait MetadataProvider: Send + Sync {
    fn handler_by_name(&self, name: &str) -> Option<Arc<TableHandler>>;
    fn handler_by_id(&self, id: TableId) -> Option<Arc<TableHandler>>;
}

/// Concurrent handler registry. Publishing a new snapshot atomically
/// replaces the previous one under both lookup keys; in-flight operations
/// keep the `Arc` they already resolved.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    by_name: DashMap<String, Arc<TableHandler>>,
    by_id: DashMap<u32, Arc<TableHandler>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a handler snapshot.
    pub fn publish(&self, handler: TableHandler) -> KestrelResult<Arc<TableHandler>> {
        handler.validate()?;
        let handler = Arc::new(handler);
        debug!(
            table = %handler.name,
            id = %handler.id,
            partitions = handler.partitions.len(),
            "publishing table handler"
        );
        self.by_name
            .insert(handler.name.clone(), Arc::clone(&handler));
        self.by_id.insert(handler.id.0, Arc::clone(&handler));
        Ok(handler)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<TableHandler>> {
        let (_, handler) = self.by_name.remove(name)?;
        self.by_id.remove(&handler.id.0);
        Some(handler)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl MetadataProvider for MetadataRegistry {
    fn handler_by_name(&self, name: &str) -> Option<Arc<TableHandler>> {
        self.by_name.get(name).map(|h| Arc::clone(h.value()))
    }

    fn handler_by_id(&self, id: TableId) -> Option<Arc<TableHandler>> {
        self.by_id.get(&id.0).map(|h| Arc::clone(h.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kestrel_common::DataType;

    fn base_schema() -> Vec<ColumnDesc> {
        vec![
            ColumnDesc::new("card", DataType::Text).index(),
            ColumnDesc::new("amount", DataType::Float64),
        ]
    }

    fn evolved_schema() -> Vec<ColumnDesc> {
        let mut cols = base_schema();
        cols.push(ColumnDesc::new("merchant", DataType::Text).nullable());
        cols
    }

    fn handler() -> TableHandler {
        TableHandler::new(TableId(7), "trades", base_schema())
            .with_uniform_partitions(4, Endpoint::new("t1:9527"), vec![Endpoint::new("t2:9527")])
            .with_schema_version(evolved_schema())
    }

    #[test]
    fn test_schema_for_count_resolution() {
        let th = handler();
        assert_eq!(th.schema_for_count(2).unwrap().len(), 2);
        assert_eq!(th.schema_for_count(3).unwrap().len(), 3);
        let err = th.schema_for_count(5).unwrap_err();
        assert!(matches!(err, KestrelError::NoSchemaForColumnCount(5)));
    }

    #[test]
    fn test_newest_schema_is_widest_version() {
        assert_eq!(handler().newest_schema().len(), 3);
        let plain = TableHandler::new(TableId(1), "plain", base_schema());
        assert_eq!(plain.newest_schema().len(), 2);
    }

    #[test]
    fn test_decode_resolves_version_from_count_header() {
        let th = handler();
        let old_row = vec![Datum::Text("c1".into()), Datum::Float64(1.5)];
        let buf = kestrel_codec::encode_row(&old_row, &th.schema).unwrap();
        assert_eq!(th.decode(&buf).unwrap().unwrap(), old_row);

        let new_row = vec![
            Datum::Text("c1".into()),
            Datum::Float64(2.5),
            Datum::Null,
        ];
        let buf = kestrel_codec::encode_row(&new_row, th.schema_for_count(3).unwrap()).unwrap();
        assert_eq!(th.decode(&buf).unwrap().unwrap(), new_row);

        assert!(th.decode(&[]).unwrap().is_none());
    }

    #[test]
    fn test_derived_indexes_from_flagged_columns() {
        let th = handler();
        let indexes = th.effective_indexes();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "card");
        assert_eq!(th.index_ordinal(None).unwrap(), 0);
        assert_eq!(th.index_ordinal(Some("card")).unwrap(), 0);
        assert!(matches!(
            th.index_ordinal(Some("nope")),
            Err(KestrelError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_explicit_index_wins_over_derived() {
        let th = handler().with_index(IndexDef::new("card_amount", vec!["card", "amount"]));
        assert_eq!(
            th.key_columns(Some("card_amount")).unwrap(),
            vec!["card".to_string(), "amount".to_string()]
        );
        assert_eq!(th.key_columns(None).unwrap(), vec!["card".to_string(), "amount".to_string()]);
    }

    #[test]
    fn test_ts_ordinal() {
        let mut cols = base_schema();
        cols.push(ColumnDesc::new("ts", DataType::Timestamp).ts_col());
        cols.push(ColumnDesc::new("ts2", DataType::Timestamp).ts_col());
        let th = TableHandler::new(TableId(2), "ts_table", cols)
            .with_uniform_partitions(1, Endpoint::new("t1:9527"), vec![]);
        assert!(th.has_ts_col());
        assert_eq!(th.ts_ordinal(None).unwrap(), Some(0));
        assert_eq!(th.ts_ordinal(Some("ts2")).unwrap(), Some(1));
        assert!(th.ts_ordinal(Some("missing")).is_err());
        assert!(!handler().has_ts_col());
        assert_eq!(handler().ts_ordinal(None).unwrap(), None);
    }

    #[test]
    fn test_registry_publish_and_swap() {
        let registry = MetadataRegistry::new();
        registry.publish(handler()).unwrap();
        let first = registry.handler_by_name("trades").unwrap();
        assert_eq!(first.partition_count(), 4);
        assert_eq!(registry.handler_by_id(TableId(7)).unwrap().name, "trades");

        let updated = handler().with_compression(CompressionMode::Lz4);
        registry.publish(updated).unwrap();
        let second = registry.handler_by_name("trades").unwrap();
        assert_eq!(second.compression, CompressionMode::Lz4);
        // the old snapshot is still usable by whoever holds it
        assert_eq!(first.compression, CompressionMode::None);
    }

    #[test]
    fn test_publish_rejects_empty_partition_list() {
        let registry = MetadataRegistry::new();
        let th = TableHandler::new(TableId(3), "empty", base_schema());
        assert!(matches!(
            registry.publish(th),
            Err(KestrelError::NoPartitions)
        ));
    }

    #[test]
    fn test_publish_rejects_unknown_index_column() {
        let registry = MetadataRegistry::new();
        let th = handler().with_index(IndexDef::new("bad", vec!["ghost"]));
        assert!(matches!(
            registry.publish(th),
            Err(KestrelError::IndexNotFound(_))
        ));
    }
}
