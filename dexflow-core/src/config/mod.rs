//! Analysis configuration: options and widening heuristics.

pub mod heuristics;
pub mod options;

pub use heuristics::Heuristics;
pub use options::{ExportOriginsMode, Options};
