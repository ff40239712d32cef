//! Public error taxonomy.
//!
//! Only two variants are ever returned from the public API — every other
//! failure mode (lock abort, fan-out stragglers, bad nodes, substrate RPC
//! failure during verification) is logged and absorbed internally,
//! repaired by the exchange protocol, and never surfaces here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no such group: {0}")]
    NoSuchGroup(String),
    #[error("no process available in group: {0}")]
    NoProcess(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
