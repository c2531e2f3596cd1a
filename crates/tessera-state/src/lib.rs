//! Tessera State - Slices and reconciliation
//!
//! This crate implements the state-slice engine:
//! - The host store contract and named store handles
//! - Immediate and debounced dispatch
//! - Slices with committed and pending state
//! - The reduce step merging a slice into the composite state
//! - The registry context owning all slices

pub mod dispatcher;
pub mod reconcile;
pub mod registry;
pub mod slice;
pub mod store;

#[cfg(test)]
mod mock;

pub use dispatcher::*;
pub use registry::*;
pub use slice::*;
pub use store::*;
