//! Identity graph model and repository

mod edge;
mod node;
mod repository;

pub use edge::{EdgeKind, BINDING_ASSOCIATED_ATTR, BINDING_SIG_ATTR};
pub use node::{AttrMap, NodeKind, NodeRecord, NodeRef};
pub use repository::{IdentityGraph, ResolveError, ResolveResult};
