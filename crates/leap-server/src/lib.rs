//! leap-server library entry point.
//!
//! Re-exports the modules so that integration tests in `tests/` and the
//! binary entry point in `main.rs` share the same module tree.

pub mod config;
pub mod handshake;
pub mod session;
