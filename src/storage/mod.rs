//! Storage backends for the identity graph

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{GraphStore, GraphTxn, OpenStore, StorageError, StorageResult};
