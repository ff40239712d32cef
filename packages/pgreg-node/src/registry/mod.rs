//! The Registry service's internals. Everything here is private to
//! the crate — [`crate::api`] is the only public surface.

pub mod actor;
pub mod coordinator;
pub mod exchange;
pub mod monitor;
pub mod observer;
pub mod table;
pub mod verifier;

#[cfg(test)]
pub mod testutil;
