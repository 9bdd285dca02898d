//! The typed IR the engine consumes.
//!
//! Bytecode parsing is an external collaborator; these are the handoff
//! types: a method registry, per-method control-flow graphs over a
//! dex-shaped instruction set, a call graph with resolved targets, an
//! override index, class intervals and position metadata. Everything
//! here is immutable once built.

pub mod call_graph;
pub mod cfg;
pub mod class_intervals;
pub mod instruction;
pub mod json;
pub mod method;
pub mod position;
pub mod program;
pub mod types;

pub use call_graph::{CallGraph, CallTarget, Dependencies, Overrides};
pub use cfg::{BasicBlock, BlockId, ControlFlowGraph, InstructionEntry, InstructionId};
pub use class_intervals::ClassIntervals;
pub use instruction::{FieldRef, Instruction, InvokeKind};
pub use method::{Field, FieldHandle, Fields, Method, MethodHandle, Methods};
pub use position::{Position, PositionHandle, Positions};
pub use program::{Program, ProgramBuilder};
pub use types::{ClassInfo, TypeIndex};
