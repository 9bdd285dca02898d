//! The assembled program: every immutable index the analysis consumes.

use super::call_graph::{CallGraph, Dependencies, Overrides};
use super::cfg::ControlFlowGraph;
use super::class_intervals::ClassIntervals;
use super::method::{Fields, Method, MethodHandle, Methods};
use super::types::{ClassInfo, TypeIndex};

/// All program-wide inputs, built once and then read-only.
pub struct Program {
    pub methods: Methods,
    pub fields: Fields,
    pub types: TypeIndex,
    pub class_intervals: ClassIntervals,
    pub overrides: Overrides,
    pub call_graph: CallGraph,
    pub dependencies: Dependencies,
}

impl Program {
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::default()
    }
}

/// Builder used by the JSON loader and by tests.
#[derive(Default)]
pub struct ProgramBuilder {
    methods: Methods,
    types: TypeIndex,
}

impl ProgramBuilder {
    pub fn class(&mut self, name: &str, superclass: Option<&str>) -> &mut Self {
        self.types.add_class(ClassInfo {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            interfaces: Vec::new(),
        });
        self
    }

    /// Register a method; classes are registered implicitly when absent.
    pub fn method(
        &mut self,
        class_name: &str,
        name: &str,
        parameter_types: Vec<String>,
        return_type: &str,
        is_static: bool,
        code: Option<ControlFlowGraph>,
    ) -> MethodHandle {
        if !self.types.contains(class_name) {
            self.class(class_name, None);
        }
        self.methods.create(
            Method::new(
                class_name.to_string(),
                name.to_string(),
                parameter_types,
                return_type.to_string(),
                is_static,
            ),
            code,
        )
    }

    /// Derive the class intervals, override index, call graph and
    /// dependencies, and freeze the program.
    pub fn build(self) -> Program {
        let class_intervals = ClassIntervals::build(&self.types);
        let overrides = Overrides::build(&self.methods, &class_intervals);
        let call_graph = CallGraph::build(&self.methods, &self.types, &overrides);
        let dependencies = Dependencies::build(&call_graph);
        Program {
            methods: self.methods,
            fields: Fields::new(),
            types: self.types,
            class_intervals,
            overrides,
            call_graph,
            dependencies,
        }
    }
}
