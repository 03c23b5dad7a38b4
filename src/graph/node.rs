//! Node vocabulary of the identity graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-valued attributes carried by nodes and bindings.
///
/// A `BTreeMap` keeps iteration deterministic, which the canonical
/// signature of hint attributes depends on.
pub type AttrMap = BTreeMap<String, String>;

/// The three kinds of node the engine persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// An entity known to exist, keyed by a caller-supplied key
    Observed,
    /// An entity whose canonical identity is definitively known,
    /// keyed by a caller-supplied key
    Confirmed,
    /// A provisional placeholder for an entity believed to exist,
    /// keyed by the canonical signature of its hint attributes
    Hypothesis,
}

impl NodeKind {
    /// Stable label used as the store's kind discriminator
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Observed => "observed",
            NodeKind::Confirmed => "confirmed",
            NodeKind::Hypothesis => "hypothesis",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A borrowed reference naming one node: its kind plus its unique key
/// (caller-supplied for observed/confirmed nodes, the canonical signature
/// for hypotheses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef<'a> {
    pub kind: NodeKind,
    pub key: &'a str,
}

impl<'a> NodeRef<'a> {
    pub fn new(kind: NodeKind, key: &'a str) -> Self {
        Self { kind, key }
    }

    pub fn observed(key: &'a str) -> Self {
        Self::new(NodeKind::Observed, key)
    }

    pub fn confirmed(key: &'a str) -> Self {
        Self::new(NodeKind::Confirmed, key)
    }

    pub fn hypothesis(sig: &'a str) -> Self {
        Self::new(NodeKind::Hypothesis, sig)
    }
}

impl std::fmt::Display for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A node as stored: merged attributes plus, for hypotheses, the
/// `associated` stamp written once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub kind: NodeKind,
    pub key: String,
    pub attrs: AttrMap,
    /// Creation stamp; present on hypothesis nodes only. Reserved as the
    /// input to a future time-based purge of never-confirmed hypotheses.
    pub associated: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Convenience accessor for a single attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}
