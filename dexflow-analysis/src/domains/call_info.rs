//! Call info: the (callee, call kind, callee port, position) tuple every
//! frame in a `LocalTaint` shares.

use std::fmt;

use crate::access::AccessPathHandle;
use crate::ir::{MethodHandle, PositionHandle};

/// Where a propagation-with-trace hop currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropagationHop {
    Declaration,
    Origin,
    CallSite,
}

/// How a frame relates to the method it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Declared on this method, not yet seen at any call site.
    Declaration,
    /// A leaf: the first call site of a declared source/sink.
    Origin,
    /// Propagated through a call site, distance ≥ 1.
    CallSite,
    /// A declared propagation.
    Propagation,
    /// A propagation that tracks its trace hops.
    PropagationWithTrace(PropagationHop),
    /// A propagation whose trace is not tracked; appears only at
    /// propagation leaves.
    PropagationWithoutTrace,
}

impl CallKind {
    pub fn is_declaration(self) -> bool {
        matches!(
            self,
            CallKind::Declaration
                | CallKind::PropagationWithTrace(PropagationHop::Declaration)
        )
    }

    pub fn is_origin(self) -> bool {
        matches!(
            self,
            CallKind::Origin | CallKind::PropagationWithTrace(PropagationHop::Origin)
        )
    }

    pub fn is_call_site(self) -> bool {
        matches!(
            self,
            CallKind::CallSite | CallKind::PropagationWithTrace(PropagationHop::CallSite)
        )
    }

    pub fn is_propagation(self) -> bool {
        matches!(
            self,
            CallKind::Propagation
                | CallKind::PropagationWithTrace(_)
                | CallKind::PropagationWithoutTrace
        )
    }

    pub fn is_propagation_with_trace(self) -> bool {
        matches!(self, CallKind::PropagationWithTrace(_))
    }

    pub fn is_propagation_without_trace(self) -> bool {
        matches!(self, CallKind::PropagationWithoutTrace)
    }

    /// The kind after crossing one call site:
    /// declaration → origin → call site.
    pub fn propagate(self) -> CallKind {
        match self {
            CallKind::Declaration => CallKind::Origin,
            CallKind::Origin | CallKind::CallSite => CallKind::CallSite,
            CallKind::Propagation => {
                CallKind::PropagationWithTrace(PropagationHop::Origin)
            }
            CallKind::PropagationWithTrace(PropagationHop::Declaration) => {
                CallKind::PropagationWithTrace(PropagationHop::Origin)
            }
            CallKind::PropagationWithTrace(_) => {
                CallKind::PropagationWithTrace(PropagationHop::CallSite)
            }
            CallKind::PropagationWithoutTrace => CallKind::PropagationWithoutTrace,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Declaration => "declaration",
            CallKind::Origin => "origin",
            CallKind::CallSite => "call_site",
            CallKind::Propagation => "propagation",
            CallKind::PropagationWithTrace(PropagationHop::Declaration) => {
                "propagation_with_trace:declaration"
            }
            CallKind::PropagationWithTrace(PropagationHop::Origin) => {
                "propagation_with_trace:origin"
            }
            CallKind::PropagationWithTrace(PropagationHop::CallSite) => {
                "propagation_with_trace:call_site"
            }
            CallKind::PropagationWithoutTrace => "propagation_without_trace",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The call context shared by every frame of a `LocalTaint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallInfo {
    callee: Option<MethodHandle>,
    call_kind: CallKind,
    callee_port: AccessPathHandle,
    call_position: Option<PositionHandle>,
}

impl CallInfo {
    pub fn new(
        callee: Option<MethodHandle>,
        call_kind: CallKind,
        callee_port: AccessPathHandle,
        call_position: Option<PositionHandle>,
    ) -> Self {
        CallInfo {
            callee,
            call_kind,
            callee_port,
            call_position,
        }
    }

    pub fn declaration(callee_port: AccessPathHandle) -> Self {
        CallInfo {
            callee: None,
            call_kind: CallKind::Declaration,
            callee_port,
            call_position: None,
        }
    }

    pub fn callee(&self) -> Option<MethodHandle> {
        self.callee
    }

    pub fn call_kind(&self) -> CallKind {
        self.call_kind
    }

    pub fn callee_port(&self) -> AccessPathHandle {
        self.callee_port
    }

    pub fn call_position(&self) -> Option<PositionHandle> {
        self.call_position
    }

    /// The call info after crossing one call site.
    pub fn propagate(
        &self,
        callee: Option<MethodHandle>,
        callee_port: AccessPathHandle,
        call_position: Option<PositionHandle>,
    ) -> CallInfo {
        CallInfo {
            callee,
            call_kind: self.call_kind.propagate(),
            callee_port,
            call_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_kind_propagation_chain() {
        assert_eq!(CallKind::Declaration.propagate(), CallKind::Origin);
        assert_eq!(CallKind::Origin.propagate(), CallKind::CallSite);
        assert_eq!(CallKind::CallSite.propagate(), CallKind::CallSite);
        assert_eq!(
            CallKind::Propagation.propagate(),
            CallKind::PropagationWithTrace(PropagationHop::Origin)
        );
        assert_eq!(
            CallKind::PropagationWithTrace(PropagationHop::Origin).propagate(),
            CallKind::PropagationWithTrace(PropagationHop::CallSite)
        );
        assert_eq!(
            CallKind::PropagationWithoutTrace.propagate(),
            CallKind::PropagationWithoutTrace
        );
    }

    #[test]
    fn predicates() {
        assert!(CallKind::Declaration.is_declaration());
        assert!(CallKind::Origin.is_origin());
        assert!(!CallKind::Origin.is_declaration());
        assert!(CallKind::Propagation.is_propagation());
        assert!(CallKind::PropagationWithTrace(PropagationHop::Origin).is_origin());
        assert!(CallKind::PropagationWithoutTrace.is_propagation_without_trace());
    }
}
