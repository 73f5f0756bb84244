//! Client-side access layer for sharded, replicated tables.
//!
//! The layer resolves table metadata snapshots through a
//! [`MetadataProvider`], composes routing keys, hashes them onto shards,
//! picks replicas per the table's read strategy, and speaks to tablet
//! servers through the [`rpc::TabletRpc`] seam. All validation happens
//! locally before any network call.

pub mod client;
pub mod iterator;
pub mod key;
pub mod metadata;
pub mod partition;
pub mod replica;
pub mod rpc;
pub mod testing;

pub use client::{
    CountOptions, GetOptions, ReadOptions, ScanOptions, TableClient, TableRef, TraverseOptions,
};
pub use iterator::{RelationalIter, ScanIter, ScanRecord, TraverseIter, TraverseRecord};
pub use key::KeyInput;
pub use metadata::{
    IndexDef, MetadataProvider, MetadataRegistry, PartitionHandler, ReadStrategy, TableHandler,
};
