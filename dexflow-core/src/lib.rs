//! Core types shared across the Dexflow workspace.
//!
//! - **Errors** — one error enum per subsystem, `thiserror` only.
//! - **Config** — analysis options and widening heuristics, JSON-driven.

pub mod cancellation;
pub mod config;
pub mod errors;

pub use cancellation::{Cancellable, CancellationToken};
pub use config::{Heuristics, Options};
