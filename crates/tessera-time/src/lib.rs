//! Tessera Time - Clocks and deferred work
//!
//! This crate implements the timing half of dispatch scheduling:
//! - Injectable clocks (system and manual)
//! - A keyed timer queue where re-arming a key cancels the previous timer
//! - Completion signals that can be polled or awaited

pub mod clock;
pub mod scheduler;

pub use clock::*;
pub use scheduler::*;
