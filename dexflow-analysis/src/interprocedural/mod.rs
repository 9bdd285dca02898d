//! The interprocedural fixpoint: SCC strata over the call graph,
//! parallel per-method analysis, re-queueing on model growth.

pub mod scheduler;

pub use scheduler::{run_analysis, AnalysisStatistics};
