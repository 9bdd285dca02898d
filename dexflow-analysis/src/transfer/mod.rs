//! The intraprocedural abstract interpreter.
//!
//! A forward monotone fixpoint over the method's control-flow graph,
//! over an environment of register-to-memory-location bindings and
//! memory-location taint trees. Call sites compose callee models
//! (`call`); the fixpoint driver (`fixpoint`) iterates blocks to
//! convergence under a soft deadline.

pub mod call;
pub mod environment;
pub mod fixpoint;
pub mod interpreter;
pub mod memory;

pub use environment::{Environment, RESULT_REGISTER};
pub use fixpoint::{analyze_method, MethodAnalysis};
pub use memory::{MemoryFactory, MemoryLocationId, MemoryLocationsDomain};
