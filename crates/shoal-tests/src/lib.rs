//! Scenario test suite for Shoal.
//!
//! Drives the full validator period against in-memory collaborators and
//! checks the scoring invariants across crate boundaries.

pub mod helpers;
