//! Tessera Test Harness - Integration testing and fuzzing
//!
//! This crate provides:
//! - A manual-clock test application around the runtime
//! - End-to-end reconciliation scenarios
//! - Randomised slice fuzzing with invariant checks
//! - Property helpers shared with proptest suites

pub mod integration;
pub mod slice_fuzzer;

pub use integration::*;
pub use slice_fuzzer::*;
