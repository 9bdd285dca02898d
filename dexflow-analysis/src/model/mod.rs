//! Per-method summaries and their building blocks.

pub mod issue;
pub mod json;
#[allow(clippy::module_inception)]
pub mod model;
pub mod taint_config;

pub use issue::{Issue, IssueKey, IssueSet};
pub use model::{
    CallsiteArgs, FieldModel, FreezeKind, Frozen, LiteralModel, Mode, Model, Modes,
    SetterAccessPath, ALL_FREEZE_KINDS, ALL_MODES,
};
pub use taint_config::{PropagationConfig, Sanitizer, SanitizerSet, TaintConfig};
