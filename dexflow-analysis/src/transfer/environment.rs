//! The per-instruction abstract environment.

use rustc_hash::FxHashMap;

use super::memory::{MemoryFactory, MemoryLocationId, MemoryLocationsDomain};
use crate::access::{Path, Register};
use crate::domains::{AbstractDomain, ConstantDomain, TaintTree, UpdateKind};
use crate::ir::PositionHandle;
use crate::model::SetterAccessPath;

/// The result pseudo-register holding the value of the last
/// value-producing instruction.
pub const RESULT_REGISTER: Register = Register::MAX;

/// Register bindings, memory taint, last position and the parameter
/// load counter, joined per basic block.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    registers: FxHashMap<Register, MemoryLocationsDomain>,
    /// Taint trees keyed by root memory location.
    taint: FxHashMap<MemoryLocationId, TaintTree>,
    position: ConstantDomain<PositionHandle>,
    last_parameter_load: ConstantDomain<u32>,
    /// The single field write seen so far, for setter inlining.
    field_write: ConstantDomain<SetterAccessPath>,
}

impl Environment {
    /// The entry environment of a method.
    pub fn initial() -> Self {
        Environment {
            registers: FxHashMap::default(),
            taint: FxHashMap::default(),
            position: ConstantDomain::Top,
            last_parameter_load: ConstantDomain::Value(0),
            field_write: ConstantDomain::Bottom,
        }
    }

    // Register bindings.

    pub fn assign(&mut self, register: Register, locations: MemoryLocationsDomain) {
        self.registers.insert(register, locations);
    }

    pub fn assign_location(&mut self, register: Register, location: MemoryLocationId) {
        self.assign(register, MemoryLocationsDomain::singleton_of(location));
    }

    pub fn clear_result_register(&mut self) {
        self.registers.remove(&RESULT_REGISTER);
    }

    pub fn memory_locations(&self, register: Register) -> MemoryLocationsDomain {
        self.registers.get(&register).cloned().unwrap_or_default()
    }

    // Taint.

    /// Read the taint of one memory location.
    pub fn read_location(
        &self,
        factory: &MemoryFactory,
        location: MemoryLocationId,
    ) -> TaintTree {
        let (root, path) = factory.root_and_path(location);
        self.taint
            .get(&root)
            .map(|tree| tree.read_with_propagation(&path))
            .unwrap_or_else(TaintTree::bottom)
    }

    /// Read the taint of one memory location at a deeper path.
    pub fn read_location_path(
        &self,
        factory: &MemoryFactory,
        location: MemoryLocationId,
        path: &Path,
    ) -> TaintTree {
        let (root, mut full_path) = factory.root_and_path(location);
        full_path.extend(path);
        self.taint
            .get(&root)
            .map(|tree| tree.read_with_propagation(&full_path))
            .unwrap_or_else(TaintTree::bottom)
    }

    /// Read the joined taint of a register's locations.
    pub fn read(&self, factory: &MemoryFactory, register: Register) -> TaintTree {
        let mut result = TaintTree::bottom();
        for location in self.memory_locations(register).iter() {
            result.join_with(self.read_location(factory, location));
        }
        result
    }

    pub fn read_path(
        &self,
        factory: &MemoryFactory,
        register: Register,
        path: &Path,
    ) -> TaintTree {
        let mut result = TaintTree::bottom();
        for location in self.memory_locations(register).iter() {
            result.join_with(self.read_location_path(factory, location, path));
        }
        result
    }

    /// Write taint to one memory location.
    pub fn write_location(
        &mut self,
        factory: &MemoryFactory,
        location: MemoryLocationId,
        path: &Path,
        tree: TaintTree,
        kind: UpdateKind,
    ) {
        let (root, mut full_path) = factory.root_and_path(location);
        full_path.extend(path);
        self.taint
            .entry(root)
            .or_insert_with(TaintTree::bottom)
            .write_tree(&full_path, tree, kind);
    }

    /// Write taint through a register. Multiple possible locations
    /// degrade strong updates to weak.
    pub fn write(
        &mut self,
        factory: &MemoryFactory,
        register: Register,
        path: &Path,
        tree: TaintTree,
        mut kind: UpdateKind,
    ) {
        let locations = self.memory_locations(register);
        if locations.is_empty() {
            return;
        }
        if locations.len() > 1 {
            // Only one location is actually written at runtime, so a
            // strong update would erase taint the others may keep.
            kind = UpdateKind::Weak;
        }
        for location in locations.iter() {
            self.write_location(factory, location, path, tree.clone(), kind);
        }
    }

    /// The taint tree rooted at a memory location, raw.
    pub fn tree_at(&self, root: MemoryLocationId) -> Option<&TaintTree> {
        self.taint.get(&root)
    }

    // Position and parameter tracking.

    pub fn last_position(&self) -> Option<PositionHandle> {
        self.position.value().copied()
    }

    pub fn set_last_position(&mut self, position: PositionHandle) {
        self.position = ConstantDomain::Value(position);
    }

    pub fn last_parameter_loaded(&self) -> Option<u32> {
        self.last_parameter_load.value().copied()
    }

    pub fn increment_last_parameter_loaded(&mut self) {
        if let ConstantDomain::Value(position) = &self.last_parameter_load {
            self.last_parameter_load = ConstantDomain::Value(position + 1);
        }
    }

    // Field write tracking for setter inlining.

    pub fn field_write(&self) -> &ConstantDomain<SetterAccessPath> {
        &self.field_write
    }

    pub fn set_field_write(&mut self, field_write: ConstantDomain<SetterAccessPath>) {
        self.field_write = field_write;
    }
}

impl AbstractDomain for Environment {
    fn bottom() -> Self {
        Environment {
            registers: FxHashMap::default(),
            taint: FxHashMap::default(),
            position: ConstantDomain::Bottom,
            last_parameter_load: ConstantDomain::Bottom,
            field_write: ConstantDomain::Bottom,
        }
    }

    fn is_bottom(&self) -> bool {
        self.registers.is_empty()
            && self.taint.is_empty()
            && self.position.is_bottom()
            && self.last_parameter_load.is_bottom()
            && self.field_write.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.registers.iter().all(|(register, locations)| {
            other
                .registers
                .get(register)
                .map_or(false, |other_locations| locations.is_subset(other_locations))
        }) && self.taint.iter().all(|(root, tree)| {
            other
                .taint
                .get(root)
                .map_or(false, |other_tree| tree.leq(other_tree))
        }) && self.position.leq(&other.position)
            && self.last_parameter_load.leq(&other.last_parameter_load)
            && self.field_write.leq(&other.field_write)
    }

    fn join_with(&mut self, other: Self) {
        for (register, locations) in other.registers {
            self.registers
                .entry(register)
                .or_default()
                .join_with(&locations);
        }
        for (root, tree) in other.taint {
            self.taint
                .entry(root)
                .or_insert_with(TaintTree::bottom)
                .join_with(tree);
        }
        self.position.join_with(other.position);
        self.last_parameter_load.join_with(other.last_parameter_load);
        self.field_write.join_with(other.field_write);
    }

    fn widen_with(&mut self, other: Self) {
        self.join_with(other);
    }

    fn meet_with(&mut self, other: Self) {
        self.registers
            .retain(|register, _| other.registers.contains_key(register));
        for (register, locations) in &mut self.registers {
            let mut met = MemoryLocationsDomain::empty();
            if let Some(other_locations) = other.registers.get(register) {
                for location in locations.iter() {
                    if other_locations.iter().any(|other| other == location) {
                        met.add(location);
                    }
                }
            }
            *locations = met;
        }
        let taint = std::mem::take(&mut self.taint);
        for (root, mut tree) in taint {
            if let Some(other_tree) = other.taint.get(&root) {
                tree.meet_with(other_tree.clone());
                if !tree.is_bottom() {
                    self.taint.insert(root, tree);
                }
            }
        }
        self.position.meet_with(other.position);
        self.last_parameter_load.meet_with(other.last_parameter_load);
        self.field_write.meet_with(other.field_write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, Root};
    use crate::context::AnalysisContext;
    use crate::domains::{CallInfo, Frame, Taint};

    fn taint_tree(context: &AnalysisContext, kind_name: &str) -> TaintTree {
        let kind = context.kinds.named(context.str(kind_name));
        let port = context.access_paths.get(AccessPath::from_root(Root::leaf()));
        TaintTree::from_taint(Taint::from_frame(
            CallInfo::declaration(port),
            Frame::leaf(kind),
        ))
    }

    #[test]
    fn reads_join_over_aliased_locations() {
        let context = AnalysisContext::for_test();
        let mut factory = MemoryFactory::new(10);
        let mut environment = Environment::initial();

        let a = factory.make_parameter(0);
        let b = factory.make_parameter(1);
        let mut locations = MemoryLocationsDomain::singleton_of(a);
        locations.add(b);
        environment.assign(5, locations);

        environment.write_location(
            &factory,
            a,
            &Path::new(),
            taint_tree(&context, "A"),
            UpdateKind::Weak,
        );
        environment.write_location(
            &factory,
            b,
            &Path::new(),
            taint_tree(&context, "B"),
            UpdateKind::Weak,
        );

        let read = environment.read(&factory, 5);
        let kinds = read.elements()[0].1.kinds();
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn multi_location_write_degrades_to_weak() {
        let context = AnalysisContext::for_test();
        let mut factory = MemoryFactory::new(10);
        let mut environment = Environment::initial();

        let a = factory.make_parameter(0);
        let b = factory.make_parameter(1);
        environment.write_location(
            &factory,
            a,
            &Path::new(),
            taint_tree(&context, "A"),
            UpdateKind::Weak,
        );

        let mut locations = MemoryLocationsDomain::singleton_of(a);
        locations.add(b);
        environment.assign(5, locations);

        // A strong write through an aliased register must not erase the
        // existing taint on `a`.
        environment.write(
            &factory,
            5,
            &Path::new(),
            taint_tree(&context, "B"),
            UpdateKind::Strong,
        );
        let read = environment.read_location(&factory, a);
        assert_eq!(read.elements()[0].1.kinds().len(), 2);
    }

    #[test]
    fn environment_join_is_pointwise() {
        let context = AnalysisContext::for_test();
        let mut factory = MemoryFactory::new(10);

        let a = factory.make_parameter(0);
        let mut left = Environment::initial();
        left.assign_location(1, a);
        left.write_location(
            &factory,
            a,
            &Path::new(),
            taint_tree(&context, "A"),
            UpdateKind::Weak,
        );

        let b = factory.make_parameter(1);
        let mut right = Environment::initial();
        right.assign_location(1, b);

        left.join_with(right.clone());
        assert_eq!(left.memory_locations(1).len(), 2);
        assert!(right.leq(&left));
    }
}
