//! Binding (edge) vocabulary of the identity graph

use serde::{Deserialize, Serialize};

/// The two kinds of binding between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Observed → hypothesis: "this observation is evidence for this
    /// hypothesis". Carries the hypothesis's signature and its creation
    /// stamp; deleted when the hypothesis is promoted.
    Pending,
    /// Observed → confirmed: a fully resolved link. Never deleted by this
    /// engine.
    Confirmed,
}

impl EdgeKind {
    /// Stable label used as the store's kind discriminator
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::Pending => "pending",
            EdgeKind::Confirmed => "confirmed",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Attribute name for the hypothesis signature stamped onto pending
/// bindings.
pub const BINDING_SIG_ATTR: &str = "sig";

/// Attribute name for the creation stamp pending bindings inherit from
/// their hypothesis. Input to a future staleness/purge policy.
pub const BINDING_ASSOCIATED_ATTR: &str = "associated";
