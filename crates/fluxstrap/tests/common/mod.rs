//! Shared utilities for fluxstrap integration tests.
//!
//! - `TestHarness` wires a reconciler to in-memory backends and a temp state file
//! - `ConfigurationBuilder` builds configurations without repeating defaults

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
