//! Shared test utilities for polyreel integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a file-backed database
//! - Builder patterns for configurations and stage reports

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
