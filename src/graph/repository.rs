//! IdentityGraph: the write-path state machine
//!
//! Two evidence streams mutate the graph. Observations record entities
//! known to exist together with a hint describing some entity believed to
//! exist; confirmations record entities whose canonical identity is now
//! known. Hypotheses bridge the gap: an observation binds its observed
//! node to a hypothesis keyed by the hint's canonical signature, and a
//! matching confirmation later promotes every such binding to a confirmed
//! one and garbage-collects the hypothesis.
//!
//! Each public operation runs as one all-or-nothing transaction against
//! the injected store, holds no state between calls, and is idempotent,
//! so any call may be retried blindly after a store failure.

use super::edge::{EdgeKind, BINDING_ASSOCIATED_ATTR, BINDING_SIG_ATTR};
use super::node::{AttrMap, NodeKind, NodeRef};
use crate::signature::{EvidenceError, Signature};
use crate::storage::{GraphStore, StorageError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur in identity-binding operations
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The caller passed an empty entity key. Not retryable.
    #[error("entity key must not be empty")]
    EmptyKey,

    /// A required attribute was missing from the input. Not retryable.
    #[error("missing required attribute: {0}")]
    MissingRequiredAttribute(&'static str),

    /// The hint evidence could not be canonicalized. Not retryable.
    #[error("invalid evidence: {0}")]
    Evidence(#[from] EvidenceError),

    /// The store transaction failed. Retryable: re-run the identical call.
    #[error("store transaction failed: {0}")]
    Store(#[from] StorageError),
}

/// Result type for identity-binding operations
pub type ResolveResult<T> = Result<T, ResolveError>;

/// The attribute every confirmation must carry; also the key the matching
/// phase uses to find promotable hypotheses.
const NAME_ATTR: &str = "name";

/// The identity graph repository.
///
/// Holds a reference to the store it mutates; the store is the sole
/// source of truth and the only shared mutable resource. Concurrent
/// repositories over the same store are safe: every mutation is an upsert
/// inside one transaction, so either interleaving of racing calls
/// converges to the same graph.
#[derive(Clone)]
pub struct IdentityGraph {
    store: Arc<dyn GraphStore>,
}

impl IdentityGraph {
    /// Create a repository over the given store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Ingest one observed record.
    ///
    /// Upserts the observed node (merging `attrs`), upserts the hypothesis
    /// named by the canonical signature of `hint` (populating its
    /// attributes and `associated` stamp on first creation only), and
    /// upserts a pending binding between the two, stamped with the
    /// signature and the hypothesis's creation time.
    ///
    /// Re-ingesting the same `(key, hint)` pair leaves the graph
    /// unchanged; hints that differ only in key order resolve to the same
    /// hypothesis.
    pub fn ingest_observation(
        &self,
        key: &str,
        attrs: &AttrMap,
        hint: &AttrMap,
    ) -> ResolveResult<()> {
        if key.is_empty() {
            return Err(ResolveError::EmptyKey);
        }

        let sig = Signature::of_attrs(hint);
        let now = Utc::now();
        debug!(key, sig = %sig, "ingesting observation");

        self.store.write(&mut |txn| {
            txn.merge_node(NodeRef::observed(key), attrs)?;

            let associated =
                txn.merge_node_on_create(NodeRef::hypothesis(sig.as_str()), hint, now)?;

            let mut binding = AttrMap::new();
            binding.insert(BINDING_SIG_ATTR.to_string(), sig.as_str().to_string());
            binding.insert(
                BINDING_ASSOCIATED_ATTR.to_string(),
                associated.to_rfc3339(),
            );
            txn.merge_edge(
                EdgeKind::Pending,
                NodeRef::observed(key),
                NodeRef::hypothesis(sig.as_str()),
                &binding,
            )
        })?;

        Ok(())
    }

    /// Ingest one confirmed record. `attrs` must carry a `name`.
    ///
    /// Upserts the confirmed node, then in the same transaction matches
    /// every hypothesis whose stored `name` equals `attrs["name"]`,
    /// promotes each of its pending binders to a confirmed binding on
    /// this node, and deletes each matched hypothesis that is left with
    /// no pending bindings.
    ///
    /// A confirmation matching zero hypotheses still succeeds, and
    /// re-running after promotion is a no-op.
    pub fn ingest_confirmation(&self, key: &str, attrs: &AttrMap) -> ResolveResult<()> {
        if key.is_empty() {
            return Err(ResolveError::EmptyKey);
        }
        let name = attrs
            .get(NAME_ATTR)
            .ok_or(ResolveError::MissingRequiredAttribute(NAME_ATTR))?
            .clone();

        debug!(key, name = %name, "ingesting confirmation");

        self.store.write(&mut |txn| {
            txn.merge_node(NodeRef::confirmed(key), attrs)?;

            // Matching phase. Hypotheses are matched by their stored name
            // attribute: the signature identifies a hypothesis, but the
            // name is the one key both streams share at confirmation time.
            let matched = txn.find_nodes_by_attr(NodeKind::Hypothesis, NAME_ATTR, &name)?;

            for sig in &matched {
                let hypothesis = NodeRef::hypothesis(sig);

                // Promotion phase: each pending binder gets a confirmed
                // binding and loses its pending one.
                let binders = txn.edge_sources(EdgeKind::Pending, hypothesis)?;
                for observed_key in &binders {
                    let observed = NodeRef::observed(observed_key);
                    txn.merge_edge(
                        EdgeKind::Confirmed,
                        observed,
                        NodeRef::confirmed(key),
                        &AttrMap::new(),
                    )?;
                    txn.delete_edge(EdgeKind::Pending, observed, hypothesis)?;
                }

                // Collection phase: a hypothesis with no pending bindings
                // left has served its purpose.
                let removed = txn.delete_node_if_unbound(hypothesis, EdgeKind::Pending)?;
                debug!(sig = %sig, promoted = binders.len(), removed, "hypothesis promoted");
            }

            Ok(())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};

    fn attrs(pairs: &[(&str, &str)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn repo() -> (IdentityGraph, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        (IdentityGraph::new(store.clone()), store)
    }

    #[test]
    fn test_empty_key_is_rejected_before_store_interaction() {
        let (repo, store) = repo();

        let err = repo
            .ingest_observation("", &AttrMap::new(), &attrs(&[("name", "X")]))
            .unwrap_err();
        assert!(matches!(err, ResolveError::EmptyKey));

        let err = repo
            .ingest_confirmation("", &attrs(&[("name", "X")]))
            .unwrap_err();
        assert!(matches!(err, ResolveError::EmptyKey));

        assert_eq!(store.count_nodes(NodeKind::Observed).unwrap(), 0);
        assert_eq!(store.count_nodes(NodeKind::Confirmed).unwrap(), 0);
    }

    #[test]
    fn test_confirmation_without_name_is_rejected() {
        let (repo, store) = repo();

        let err = repo
            .ingest_confirmation("USA", &attrs(&[("formed", "1768")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MissingRequiredAttribute("name")
        ));
        assert_eq!(store.count_nodes(NodeKind::Confirmed).unwrap(), 0);
    }

    #[test]
    fn test_observation_creates_hypothesis_keyed_by_signature() {
        let (repo, store) = repo();
        let hint = attrs(&[("name", "X"), ("kind", "K")]);

        repo.ingest_observation("a", &attrs(&[("desc", "thing")]), &hint)
            .unwrap();

        let sig = Signature::of_attrs(&hint);
        let hypothesis = store
            .get_node(NodeRef::hypothesis(sig.as_str()))
            .unwrap()
            .expect("hypothesis exists");
        assert_eq!(hypothesis.attr("name"), Some("X"));
        assert_eq!(hypothesis.attr("kind"), Some("K"));
        assert!(hypothesis.associated.is_some());
        assert!(store
            .has_edge(
                EdgeKind::Pending,
                NodeRef::observed("a"),
                NodeRef::hypothesis(sig.as_str())
            )
            .unwrap());
    }

    #[test]
    fn test_equivalent_hints_share_one_hypothesis() {
        let (repo, store) = repo();

        // Same hint data, different key order: one hypothesis, two binders.
        repo.ingest_observation("a", &AttrMap::new(), &attrs(&[("name", "X"), ("kind", "K")]))
            .unwrap();
        repo.ingest_observation("b", &AttrMap::new(), &attrs(&[("kind", "K"), ("name", "X")]))
            .unwrap();

        assert_eq!(store.count_nodes(NodeKind::Hypothesis).unwrap(), 1);
        assert_eq!(store.count_edges(EdgeKind::Pending).unwrap(), 2);
    }

    #[test]
    fn test_observation_is_idempotent() {
        let (repo, store) = repo();
        let hint = attrs(&[("name", "X")]);

        repo.ingest_observation("a", &attrs(&[("desc", "first")]), &hint)
            .unwrap();
        let sig = Signature::of_attrs(&hint);
        let stamp_before = store
            .get_node(NodeRef::hypothesis(sig.as_str()))
            .unwrap()
            .unwrap()
            .associated;

        repo.ingest_observation("a", &attrs(&[("desc", "second")]), &hint)
            .unwrap();

        assert_eq!(store.count_nodes(NodeKind::Observed).unwrap(), 1);
        assert_eq!(store.count_nodes(NodeKind::Hypothesis).unwrap(), 1);
        assert_eq!(store.count_edges(EdgeKind::Pending).unwrap(), 1);
        // Attributes converge to the latest write, the stamp does not move.
        let observed = store.get_node(NodeRef::observed("a")).unwrap().unwrap();
        assert_eq!(observed.attr("desc"), Some("second"));
        let stamp_after = store
            .get_node(NodeRef::hypothesis(sig.as_str()))
            .unwrap()
            .unwrap()
            .associated;
        assert_eq!(stamp_before, stamp_after);
    }

    #[test]
    fn test_one_observed_entity_may_back_several_hypotheses() {
        let (repo, store) = repo();

        repo.ingest_observation("a", &AttrMap::new(), &attrs(&[("name", "X")]))
            .unwrap();
        repo.ingest_observation("a", &AttrMap::new(), &attrs(&[("name", "Y")]))
            .unwrap();

        assert_eq!(store.count_nodes(NodeKind::Observed).unwrap(), 1);
        assert_eq!(store.count_nodes(NodeKind::Hypothesis).unwrap(), 2);
        assert_eq!(store.count_edges(EdgeKind::Pending).unwrap(), 2);
    }

    #[test]
    fn test_confirmation_with_no_match_only_upserts() {
        let (repo, store) = repo();

        repo.ingest_confirmation("USA", &attrs(&[("name", "United States of America")]))
            .unwrap();

        let confirmed = store.get_node(NodeRef::confirmed("USA")).unwrap().unwrap();
        assert_eq!(confirmed.attr("name"), Some("United States of America"));
        assert_eq!(store.count_edges(EdgeKind::Confirmed).unwrap(), 0);
        assert_eq!(store.count_edges(EdgeKind::Pending).unwrap(), 0);
    }

    #[test]
    fn test_repeat_confirmation_merges_attributes() {
        let (repo, store) = repo();

        repo.ingest_confirmation("USA", &attrs(&[("name", "USA"), ("formed", "1768")]))
            .unwrap();
        repo.ingest_confirmation("USA", &attrs(&[("name", "USA"), ("anthem", "SSB")]))
            .unwrap();

        assert_eq!(store.count_nodes(NodeKind::Confirmed).unwrap(), 1);
        let confirmed = store.get_node(NodeRef::confirmed("USA")).unwrap().unwrap();
        assert_eq!(confirmed.attr("formed"), Some("1768"));
        assert_eq!(confirmed.attr("anthem"), Some("SSB"));
    }
}
