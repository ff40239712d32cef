//! Registry configuration.
//!
//! Mirrors the defaulted-struct `ServerConfig` idiom common to this kind
//! of service: every tunable has a sensible default and the struct carries
//! no env/file loading of its own — wiring it up from a CLI, env vars, or
//! a config file is the embedding application's concern, not this crate's.

use std::time::Duration;

/// Tunables for one Registry service instance.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// This node's unique identifier.
    pub node_id: String,
    /// First half of the cluster-wide lock key.
    pub service_id: String,
    /// Per-call timeout for the Mutation Coordinator's fan-out.
    pub fan_out_timeout: Duration,
    /// Bounded retry count for lock acquisition.
    pub lock_max_retries: u32,
    /// Buffer size for the actor's mailbox and internal channels.
    pub mailbox_capacity: usize,
}

impl RegistryConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            service_id: "pgreg".to_string(),
            fan_out_timeout: Duration::from_secs(30),
            lock_max_retries: 5,
            mailbox_capacity: 1024,
        }
    }
}
