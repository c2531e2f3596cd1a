//! Tessera Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout tessera:
//! - Identifiers (SliceId, ActionType) and name normalisation
//! - Dot-path lookup and assignment over nested JSON values
//! - Depth-bounded structural diffing
//! - Actions and state maps
//! - Error taxonomy

pub mod action;
pub mod diff;
pub mod error;
pub mod id;
pub mod naming;
pub mod path;

pub use action::*;
pub use diff::*;
pub use error::*;
pub use id::*;
pub use naming::*;
pub use path::*;
