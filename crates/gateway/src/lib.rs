//! Weaver gateway — the HTTP façade and turn runtime over the core
//! orchestration crates. The binary lives in `main.rs`; the library
//! surface exists so integration tests can boot the full stack in-process.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;
