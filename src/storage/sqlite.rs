//! SQLite storage backend
//!
//! A single database file with one table of nodes and one of edges.
//! Composite primary keys make every upsert idempotent, and each call to
//! [`GraphStore::write`] runs inside one `rusqlite` transaction, so a
//! failed operation leaves nothing behind. Thread-safe via an internal
//! mutex on the connection.

use super::traits::{GraphStore, GraphTxn, OpenStore, StorageError, StorageResult};
use crate::graph::{AttrMap, EdgeKind, NodeKind, NodeRecord, NodeRef};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed graph store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Nodes: observed/confirmed entities and hypotheses.
            -- For hypotheses, key is the canonical signature and
            -- associated is the creation stamp (RFC 3339).
            CREATE TABLE IF NOT EXISTS nodes (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                attrs_json TEXT NOT NULL,
                associated TEXT,
                PRIMARY KEY (kind, key)
            );

            -- Bindings between nodes. The composite key forbids duplicate
            -- edges per (kind, source, target).
            CREATE TABLE IF NOT EXISTS edges (
                kind TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                source_key TEXT NOT NULL,
                target_kind TEXT NOT NULL,
                target_key TEXT NOT NULL,
                attrs_json TEXT NOT NULL,
                PRIMARY KEY (kind, source_kind, source_key, target_kind, target_key)
            );

            -- Promotion walks pending edges by their hypothesis endpoint
            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(kind, target_kind, target_key);

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Parse an RFC 3339 stamp from a stored column
    fn parse_stamp(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    fn write(
        &self,
        op: &mut dyn FnMut(&mut dyn GraphTxn) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut txn = SqliteTxn { tx };
        // An error here drops the transaction, which rolls it back.
        op(&mut txn)?;
        txn.tx.commit()?;
        Ok(())
    }

    fn get_node(&self, node: NodeRef<'_>) -> StorageResult<Option<NodeRecord>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT attrs_json, associated FROM nodes WHERE kind = ?1 AND key = ?2",
                params![node.kind.label(), node.key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((attrs_json, associated)) = row else {
            return Ok(None);
        };

        Ok(Some(NodeRecord {
            kind: node.kind,
            key: node.key.to_string(),
            attrs: serde_json::from_str(&attrs_json)?,
            associated: associated.as_deref().map(Self::parse_stamp).transpose()?,
        }))
    }

    fn has_edge(
        &self,
        kind: EdgeKind,
        source: NodeRef<'_>,
        target: NodeRef<'_>,
    ) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges
             WHERE kind = ?1 AND source_kind = ?2 AND source_key = ?3
               AND target_kind = ?4 AND target_key = ?5",
            params![
                kind.label(),
                source.kind.label(),
                source.key,
                target.kind.label(),
                target.key
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn count_nodes(&self, kind: NodeKind) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE kind = ?1",
            params![kind.label()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_edges(&self, kind: EdgeKind) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE kind = ?1",
            params![kind.label()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// One open write transaction against the SQLite store
struct SqliteTxn<'c> {
    tx: Transaction<'c>,
}

impl SqliteTxn<'_> {
    /// Merge `attrs` over whatever JSON is stored for a row, returning the
    /// merged serialization. `SET +=` semantics: later writes overlay
    /// earlier ones, keys absent from `attrs` are preserved.
    fn merge_attrs(existing: Option<String>, attrs: &AttrMap) -> StorageResult<String> {
        let merged_json = match existing {
            Some(json) => {
                let mut merged: AttrMap = serde_json::from_str(&json)?;
                merged.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
                serde_json::to_string(&merged)?
            }
            None => serde_json::to_string(attrs)?,
        };
        Ok(merged_json)
    }
}

impl GraphTxn for SqliteTxn<'_> {
    fn merge_node(&mut self, node: NodeRef<'_>, attrs: &AttrMap) -> StorageResult<()> {
        let existing: Option<String> = self
            .tx
            .query_row(
                "SELECT attrs_json FROM nodes WHERE kind = ?1 AND key = ?2",
                params![node.kind.label(), node.key],
                |row| row.get(0),
            )
            .optional()?;

        let attrs_json = Self::merge_attrs(existing, attrs)?;
        self.tx.execute(
            r#"
            INSERT INTO nodes (kind, key, attrs_json, associated)
            VALUES (?1, ?2, ?3, NULL)
            ON CONFLICT(kind, key) DO UPDATE SET
                attrs_json = excluded.attrs_json
            "#,
            params![node.kind.label(), node.key, attrs_json],
        )?;

        Ok(())
    }

    fn merge_node_on_create(
        &mut self,
        node: NodeRef<'_>,
        attrs: &AttrMap,
        associated: DateTime<Utc>,
    ) -> StorageResult<DateTime<Utc>> {
        let existing: Option<Option<String>> = self
            .tx
            .query_row(
                "SELECT associated FROM nodes WHERE kind = ?1 AND key = ?2",
                params![node.kind.label(), node.key],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            // Already created: attrs and stamp stay as first written.
            Some(Some(stored)) => SqliteStore::parse_stamp(&stored),
            Some(None) => Err(StorageError::Inconsistent(format!(
                "node {node} exists without an associated stamp"
            ))),
            None => {
                self.tx.execute(
                    "INSERT INTO nodes (kind, key, attrs_json, associated)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        node.kind.label(),
                        node.key,
                        serde_json::to_string(attrs)?,
                        associated.to_rfc3339(),
                    ],
                )?;
                Ok(associated)
            }
        }
    }

    fn merge_edge(
        &mut self,
        kind: EdgeKind,
        source: NodeRef<'_>,
        target: NodeRef<'_>,
        attrs: &AttrMap,
    ) -> StorageResult<()> {
        let existing: Option<String> = self
            .tx
            .query_row(
                "SELECT attrs_json FROM edges
                 WHERE kind = ?1 AND source_kind = ?2 AND source_key = ?3
                   AND target_kind = ?4 AND target_key = ?5",
                params![
                    kind.label(),
                    source.kind.label(),
                    source.key,
                    target.kind.label(),
                    target.key
                ],
                |row| row.get(0),
            )
            .optional()?;

        let attrs_json = Self::merge_attrs(existing, attrs)?;
        self.tx.execute(
            r#"
            INSERT INTO edges (kind, source_kind, source_key, target_kind, target_key, attrs_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(kind, source_kind, source_key, target_kind, target_key) DO UPDATE SET
                attrs_json = excluded.attrs_json
            "#,
            params![
                kind.label(),
                source.kind.label(),
                source.key,
                target.kind.label(),
                target.key,
                attrs_json
            ],
        )?;

        Ok(())
    }

    fn find_nodes_by_attr(
        &mut self,
        kind: NodeKind,
        field: &str,
        value: &str,
    ) -> StorageResult<Vec<String>> {
        let mut stmt = self.tx.prepare(
            "SELECT key FROM nodes
             WHERE kind = ?1 AND json_extract(attrs_json, ?2) = ?3
             ORDER BY key",
        )?;
        let rows = stmt.query_map(
            params![kind.label(), format!("$.{field}"), value],
            |row| row.get::<_, String>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn edge_sources(&mut self, kind: EdgeKind, target: NodeRef<'_>) -> StorageResult<Vec<String>> {
        let mut stmt = self.tx.prepare(
            "SELECT source_key FROM edges
             WHERE kind = ?1 AND target_kind = ?2 AND target_key = ?3
             ORDER BY source_key",
        )?;
        let rows = stmt.query_map(
            params![kind.label(), target.kind.label(), target.key],
            |row| row.get::<_, String>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_edge(
        &mut self,
        kind: EdgeKind,
        source: NodeRef<'_>,
        target: NodeRef<'_>,
    ) -> StorageResult<bool> {
        let deleted = self.tx.execute(
            "DELETE FROM edges
             WHERE kind = ?1 AND source_kind = ?2 AND source_key = ?3
               AND target_kind = ?4 AND target_key = ?5",
            params![
                kind.label(),
                source.kind.label(),
                source.key,
                target.kind.label(),
                target.key
            ],
        )?;
        Ok(deleted > 0)
    }

    fn delete_node_if_unbound(
        &mut self,
        node: NodeRef<'_>,
        kind: EdgeKind,
    ) -> StorageResult<bool> {
        // Guarded delete: the node survives while any edge of `kind`
        // still touches it.
        let deleted = self.tx.execute(
            "DELETE FROM nodes
             WHERE kind = ?1 AND key = ?2
               AND NOT EXISTS (
                   SELECT 1 FROM edges
                   WHERE edges.kind = ?3
                     AND ((edges.source_kind = ?1 AND edges.source_key = ?2)
                       OR (edges.target_kind = ?1 AND edges.target_key = ?2))
               )",
            params![node.kind.label(), node.key, kind.label()],
        )?;
        Ok(deleted > 0)
    }
}
