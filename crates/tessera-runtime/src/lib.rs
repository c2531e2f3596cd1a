//! Tessera Runtime - Running slices end to end
//!
//! This crate provides what an application needs around the state engine:
//! - A reference host store
//! - A tokio driver for scheduled work
//! - Configuration with environment overrides
//! - Logging setup
//! - A runtime facade tying them together

pub mod config;
pub mod driver;
pub mod host;
pub mod logging;
pub mod runtime;

pub use config::*;
pub use driver::*;
pub use host::*;
pub use runtime::*;
