//! Storage trait definitions
//!
//! The identity graph lives in an external transactional labeled-graph
//! store. These traits are the whole of the contract the engine depends
//! on: find-or-create upserts with merge semantics, create-only attribute
//! initialization, edge upserts between resolved nodes, guarded deletes,
//! and all-or-nothing write transactions. The store is the sole source of
//! truth; the engine keeps no cache or index of its own.

use crate::graph::{AttrMap, EdgeKind, NodeKind, NodeRecord, NodeRef};
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations.
///
/// Everything in this enum is the "transaction failed" class: the engine
/// propagates it without retrying, and because every engine operation is
/// idempotent the caller may blindly re-run the identical call.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Inconsistent row: {0}")]
    Inconsistent(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Mutation primitives available inside one write transaction.
///
/// Each method maps onto one capability of a declarative graph store:
/// `merge_node` is `MERGE ... SET +=`, `merge_node_on_create` is
/// `MERGE ... ON CREATE SET`, `merge_edge` upserts an edge between two
/// already-resolved nodes, and `delete_node_if_unbound` is a guarded
/// delete conditioned on the absence of edges of a given kind.
pub trait GraphTxn {
    /// Find-or-create a node and merge `attrs` into it (later writes
    /// overlay earlier ones; absent keys are left untouched).
    fn merge_node(&mut self, node: NodeRef<'_>, attrs: &AttrMap) -> StorageResult<()>;

    /// Find-or-create a node; `attrs` and the `associated` stamp are
    /// applied only when the node is created. Returns the node's stored
    /// `associated` stamp whether it was just written or already present.
    fn merge_node_on_create(
        &mut self,
        node: NodeRef<'_>,
        attrs: &AttrMap,
        associated: DateTime<Utc>,
    ) -> StorageResult<DateTime<Utc>>;

    /// Find-or-create an edge of `kind` from `source` to `target`,
    /// overlaying `attrs`. At most one edge exists per (kind, source,
    /// target) triple.
    fn merge_edge(
        &mut self,
        kind: EdgeKind,
        source: NodeRef<'_>,
        target: NodeRef<'_>,
        attrs: &AttrMap,
    ) -> StorageResult<()>;

    /// Keys of nodes of `kind` whose stored attribute `field` equals
    /// `value` exactly.
    fn find_nodes_by_attr(
        &mut self,
        kind: NodeKind,
        field: &str,
        value: &str,
    ) -> StorageResult<Vec<String>>;

    /// Keys of the nodes holding an edge of `kind` to `target`.
    fn edge_sources(&mut self, kind: EdgeKind, target: NodeRef<'_>) -> StorageResult<Vec<String>>;

    /// Delete the edge of `kind` between `source` and `target`.
    /// Returns true if an edge existed.
    fn delete_edge(
        &mut self,
        kind: EdgeKind,
        source: NodeRef<'_>,
        target: NodeRef<'_>,
    ) -> StorageResult<bool>;

    /// Delete `node` only if no edge of `kind` touches it. Returns true
    /// if the node was deleted.
    fn delete_node_if_unbound(&mut self, node: NodeRef<'_>, kind: EdgeKind)
        -> StorageResult<bool>;
}

/// A transactional labeled-graph store.
///
/// Implementations must be thread-safe (`Send + Sync`); concurrent writers
/// are serialized by the store's own transaction isolation, never by the
/// engine.
pub trait GraphStore: Send + Sync {
    /// Run `op` inside one write transaction: every mutation commits
    /// together on `Ok`, and nothing is observable on `Err`.
    fn write(
        &self,
        op: &mut dyn FnMut(&mut dyn GraphTxn) -> StorageResult<()>,
    ) -> StorageResult<()>;

    // === Read accessors (inspection, not a query API) ===

    /// Load a node by reference.
    fn get_node(&self, node: NodeRef<'_>) -> StorageResult<Option<NodeRecord>>;

    /// Whether an edge of `kind` exists from `source` to `target`.
    fn has_edge(
        &self,
        kind: EdgeKind,
        source: NodeRef<'_>,
        target: NodeRef<'_>,
    ) -> StorageResult<bool>;

    /// Number of nodes of `kind`.
    fn count_nodes(&self, kind: NodeKind) -> StorageResult<usize>;

    /// Number of edges of `kind`.
    fn count_edges(&self, kind: EdgeKind) -> StorageResult<usize>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
