//! Endpoint identity.
//!
//! An endpoint is an addressable worker, unique cluster-wide, carrying its
//! home node as part of its own identity (never looked up from registry
//! state).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cluster-unique worker identifier plus its home node.
///
/// Two endpoints are equal iff both `id` and `node` match; the `id` alone
/// is only required to be unique within its home node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub node: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
        }
    }

    /// The node this endpoint is hosted on, derived from the identifier.
    pub fn home_node(&self) -> &str {
        &self.node
    }

    pub fn is_local_to(&self, node: &str) -> bool {
        self.node == node
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.node)
    }
}
