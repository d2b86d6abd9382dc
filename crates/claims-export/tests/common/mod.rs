//! Shared test utilities for claims-export integration tests.
//!
//! This module provides:
//! - `TestHarness` with an in-memory store and a scratch output mount
//! - Fakes for the upstream client, job store and event sink
//! - Builders for sponsors, contracts, patients, claims and jobs

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
