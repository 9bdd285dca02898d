//! Dexflow analysis engine.
//!
//! Computes per-method taint summaries (`Model`) over a typed bytecode
//! IR and composes them at call sites until a whole-program fixpoint:
//! - **ir** — methods, control-flow graphs, call graph, class intervals
//! - **access** — roots, paths, interned access paths
//! - **kinds** — hash-consed taint kinds and transform lists
//! - **domains** — the join-semilattice algebra (frames, taint, trees)
//! - **model** — per-method summaries, issues, JSON round-trip
//! - **transfer** — the intraprocedural abstract interpreter
//! - **interprocedural** — SCC scheduler and whole-program fixpoint
//! - **registry** — concurrent method/field/literal model store

pub mod access;
pub mod context;
pub mod domains;
pub mod interner;
pub mod interprocedural;
pub mod ir;
pub mod kinds;
pub mod model;
pub mod output;
pub mod registry;
pub mod rules;
pub mod transfer;

pub use context::AnalysisContext;
pub use registry::Registry;
