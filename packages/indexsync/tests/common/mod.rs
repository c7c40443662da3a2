//! Common test utilities for indexsync
//!
//! Shared fixtures and assertions for the integration tests: a file-backed
//! SQLite database with triggers installed, an entity provider reading the
//! same database, and a tantivy-backed pipeline.

#![allow(dead_code)]

mod assertions;
mod fixtures;

// Re-export all utilities
pub use assertions::*;
pub use fixtures::*;
