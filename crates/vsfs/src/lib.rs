#![forbid(unsafe_code)]
//! vsfs public API facade.
//!
//! Re-exports the engine from `vsfs-core` through a stable external
//! interface. This is the crate that downstream consumers (CLI, dispatch
//! layers, harnesses) depend on.

pub use vsfs_core::*;
