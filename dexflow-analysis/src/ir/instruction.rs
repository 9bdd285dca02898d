//! The dex-shaped instruction set of the input IR.
//!
//! Instructions that produce a value through the result pseudo-register
//! (`new-instance`, `const-class`, `check-cast`, `iget`, `sget`, `aget`,
//! `invoke-*`) are followed by a `move-result` that binds it to a real
//! register, matching dex semantics.

use serde::{Deserialize, Serialize};

use crate::access::Register;

/// A reference to an instance or static field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
}

/// The dispatch flavor of an invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokeKind {
    Static,
    Virtual,
    Direct,
    Interface,
    Super,
}

impl InvokeKind {
    /// Virtual and interface dispatch resolve against the receiver's
    /// dynamic type and may join overrides.
    pub fn is_virtual(self) -> bool {
        matches!(self, InvokeKind::Virtual | InvokeKind::Interface)
    }
}

/// One IR instruction. Control flow lives on the CFG edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Instruction {
    /// Bind the next formal parameter to `dest`.
    LoadParam { dest: Register },

    /// Copy `src` into `dest`.
    Move { dest: Register, src: Register },

    /// Bind the result pseudo-register to `dest` and clear it.
    MoveResult { dest: Register },

    /// Load a numeric constant into `dest`.
    Const { dest: Register, value: i64 },

    /// Load a string constant into the result register.
    ConstString { value: String },

    /// Load a class literal into the result register.
    ConstClass { class: String },

    /// Allocate a fresh instance into the result register.
    NewInstance { class: String },

    /// Cast `src`; the result register gets a fresh identity.
    CheckCast { src: Register, class: String },

    /// Read an instance field of `src` into the result register.
    IGet { src: Register, field: FieldRef },

    /// Write `value` into a field of `target`.
    IPut {
        value: Register,
        target: Register,
        field: FieldRef,
    },

    /// Read a static field into the result register.
    SGet { field: FieldRef },

    /// Write `value` into a static field.
    SPut { value: Register, field: FieldRef },

    /// Read an array element into the result register. The array and its
    /// elements share one abstract cell.
    AGet { array: Register, index: Register },

    /// Write `value` into an array element.
    APut {
        value: Register,
        array: Register,
        index: Register,
    },

    /// Call a method; arguments are in `args` (receiver first for
    /// instance dispatch). The return value lands in the result
    /// register.
    Invoke {
        kind: InvokeKind,
        method: String,
        args: Vec<Register>,
    },

    /// Return `src`, or nothing for void methods.
    Return { src: Option<Register> },
}

impl Instruction {
    /// Whether this instruction could observably mutate state, which
    /// blocks getter/setter inlining.
    pub fn has_side_effect(&self) -> bool {
        match self {
            Instruction::LoadParam { .. }
            | Instruction::Move { .. }
            | Instruction::MoveResult { .. }
            | Instruction::Const { .. }
            | Instruction::ConstString { .. }
            | Instruction::IGet { .. }
            | Instruction::Return { .. } => false,
            Instruction::ConstClass { .. }
            | Instruction::NewInstance { .. }
            | Instruction::CheckCast { .. }
            | Instruction::IPut { .. }
            | Instruction::SGet { .. }
            | Instruction::SPut { .. }
            | Instruction::AGet { .. }
            | Instruction::APut { .. }
            | Instruction::Invoke { .. } => true,
        }
    }

    pub fn is_iput(&self) -> bool {
        matches!(self, Instruction::IPut { .. })
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self, Instruction::Invoke { .. })
    }
}
