//! Bindery: identity-binding engine
//!
//! Resolves the identity of real-world entities discovered incrementally
//! from two independent evidence streams, in either order: observations
//! (entities known to exist, carrying loosely structured supporting
//! attributes) and confirmations (entities whose canonical identity is
//! definitively known).
//!
//! # Core Concepts
//!
//! - **Observed nodes**: entities recorded from observation, under a
//!   caller-supplied key
//! - **Confirmed nodes**: entities with a definitively known identity
//! - **Hypotheses**: content-addressed placeholders for entities believed
//!   to exist but not yet confirmed, keyed by the canonical signature of
//!   their hint evidence
//! - **Bindings**: pending edges tie observations to hypotheses;
//!   confirmed edges record fully resolved links
//!
//! # Example
//!
//! ```
//! use bindery::{IdentityGraph, OpenStore, SqliteStore};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let graph = IdentityGraph::new(store);
//!
//! let hint: BTreeMap<String, String> =
//!     [("name".to_string(), "United States of America".to_string())].into();
//! graph.ingest_observation("Statue of Liberty", &BTreeMap::new(), &hint).unwrap();
//! ```

mod graph;
pub mod signature;
pub mod storage;

pub use graph::{
    AttrMap, EdgeKind, IdentityGraph, NodeKind, NodeRecord, NodeRef, ResolveError, ResolveResult,
};
pub use signature::{EvidenceError, EvidenceValue, Signature};
pub use storage::{GraphStore, GraphTxn, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
