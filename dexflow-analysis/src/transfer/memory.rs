//! Abstract memory locations: a per-method arena of cells.
//!
//! Cells are parameters, instruction results (allocations, casts, call
//! results), static fields, and field derivations memoized by
//! `(parent, field)`. Every cell resolves to a root cell plus a field
//! path; parameter-rooted cells additionally have an access-path view
//! used for getter/setter inlining and propagation inference.

use lasso::Spur;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::access::{AccessPath, ParameterPosition, Path, PathElement, Root};
use crate::ir::InstructionId;

/// Index of a memory location in the per-method arena.
pub type MemoryLocationId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Cell {
    /// A formal parameter; argument 0 is the receiver of instance
    /// methods.
    Parameter(ParameterPosition),
    /// The value produced by an instruction.
    Instruction(InstructionId),
    /// A static field, one cell per field.
    StaticField { class: Spur, name: Spur },
    /// A field derivation of another cell.
    Field {
        parent: MemoryLocationId,
        field: Spur,
    },
}

/// The per-method arena of memory locations.
#[derive(Debug, Default)]
pub struct MemoryFactory {
    cells: Vec<Cell>,
    index: FxHashMap<Cell, MemoryLocationId>,
    /// String constants held by instruction cells (`const-string`).
    constants: FxHashMap<MemoryLocationId, String>,
    /// Known dynamic classes of instruction cells (`new-instance`,
    /// `check-cast`), used to refine receiver types at virtual calls.
    classes: FxHashMap<MemoryLocationId, String>,
    max_path_depth: usize,
}

impl MemoryFactory {
    pub fn new(max_path_depth: usize) -> Self {
        MemoryFactory {
            cells: Vec::new(),
            index: FxHashMap::default(),
            constants: FxHashMap::default(),
            classes: FxHashMap::default(),
            max_path_depth,
        }
    }

    fn get_or_insert(&mut self, cell: Cell) -> MemoryLocationId {
        if let Some(&id) = self.index.get(&cell) {
            return id;
        }
        let id = self.cells.len() as MemoryLocationId;
        self.cells.push(cell.clone());
        self.index.insert(cell, id);
        id
    }

    pub fn make_parameter(&mut self, position: ParameterPosition) -> MemoryLocationId {
        self.get_or_insert(Cell::Parameter(position))
    }

    pub fn make_instruction(&mut self, instruction: InstructionId) -> MemoryLocationId {
        self.get_or_insert(Cell::Instruction(instruction))
    }

    pub fn make_static_field(&mut self, class: Spur, name: Spur) -> MemoryLocationId {
        self.get_or_insert(Cell::StaticField { class, name })
    }

    pub fn make_field(
        &mut self,
        parent: MemoryLocationId,
        field: Spur,
    ) -> MemoryLocationId {
        // Cap the derivation depth so loops like `x = x.next` converge:
        // past the cap the parent cell stands for its whole subtree.
        if self.root_and_path(parent).1.len() >= self.max_path_depth {
            return parent;
        }
        self.get_or_insert(Cell::Field { parent, field })
    }

    pub fn set_constant(&mut self, location: MemoryLocationId, value: String) {
        self.constants.insert(location, value);
    }

    pub fn constant(&self, location: MemoryLocationId) -> Option<&str> {
        self.constants.get(&location).map(String::as_str)
    }

    pub fn set_class(&mut self, location: MemoryLocationId, class: String) {
        self.classes.insert(location, class);
    }

    pub fn class_of(&self, location: MemoryLocationId) -> Option<&str> {
        self.classes.get(&location).map(String::as_str)
    }

    pub fn is_parameter(&self, location: MemoryLocationId) -> bool {
        matches!(self.cells[location as usize], Cell::Parameter(_))
    }

    pub fn is_this_parameter(&self, location: MemoryLocationId) -> bool {
        matches!(self.cells[location as usize], Cell::Parameter(0))
    }

    /// The field name of a field cell.
    pub fn field_name(&self, location: MemoryLocationId) -> Option<Spur> {
        match self.cells[location as usize] {
            Cell::Field { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn parent(&self, location: MemoryLocationId) -> Option<MemoryLocationId> {
        match self.cells[location as usize] {
            Cell::Field { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// The root cell of this location and the field path below it.
    pub fn root_and_path(&self, location: MemoryLocationId) -> (MemoryLocationId, Path) {
        let mut elements: SmallVec<[PathElement; 4]> = SmallVec::new();
        let mut current = location;
        loop {
            match self.cells[current as usize] {
                Cell::Field { parent, field } => {
                    elements.push(PathElement::field(field));
                    current = parent;
                }
                _ => break,
            }
        }
        elements.reverse();
        (current, Path::from_elements(elements))
    }

    /// The access-path view, for parameter-rooted cells within the
    /// configured depth.
    pub fn access_path(&self, location: MemoryLocationId) -> Option<AccessPath> {
        let (root, path) = self.root_and_path(location);
        if path.len() > self.max_path_depth {
            return None;
        }
        match self.cells[root as usize] {
            Cell::Parameter(position) => {
                Some(AccessPath::new(Root::argument(position), path))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A set of possible memory locations for a register.
///
/// Writing through a non-singleton set degrades strong updates to weak.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryLocationsDomain {
    locations: SmallVec<[MemoryLocationId; 2]>,
}

impl MemoryLocationsDomain {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton_of(location: MemoryLocationId) -> Self {
        MemoryLocationsDomain {
            locations: SmallVec::from_slice(&[location]),
        }
    }

    pub fn add(&mut self, location: MemoryLocationId) {
        if !self.locations.contains(&location) {
            self.locations.push(location);
            self.locations.sort_unstable();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// The single location, if there is exactly one.
    pub fn singleton(&self) -> Option<MemoryLocationId> {
        match self.locations.as_slice() {
            [location] => Some(*location),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = MemoryLocationId> + '_ {
        self.locations.iter().copied()
    }

    pub fn join_with(&mut self, other: &MemoryLocationsDomain) {
        for location in other.iter() {
            self.add(location);
        }
    }

    pub fn is_subset(&self, other: &MemoryLocationsDomain) -> bool {
        self.locations
            .iter()
            .all(|location| other.locations.contains(location))
    }

    /// Derive the field cells of every location in the set.
    pub fn make_fields(
        &self,
        factory: &mut MemoryFactory,
        field: Spur,
    ) -> MemoryLocationsDomain {
        let mut fields = MemoryLocationsDomain::empty();
        for location in self.iter() {
            fields.add(factory.make_field(location, field));
        }
        fields
    }
}

impl FromIterator<MemoryLocationId> for MemoryLocationsDomain {
    fn from_iter<I: IntoIterator<Item = MemoryLocationId>>(iter: I) -> Self {
        let mut domain = MemoryLocationsDomain::empty();
        for location in iter {
            domain.add(location);
        }
        domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasso::ThreadedRodeo;

    #[test]
    fn field_derivations_are_memoized() {
        let strings = ThreadedRodeo::new();
        let mut factory = MemoryFactory::new(10);
        let parameter = factory.make_parameter(0);
        let x = strings.get_or_intern("x");

        let a = factory.make_field(parameter, x);
        let b = factory.make_field(parameter, x);
        assert_eq!(a, b);
        assert_eq!(factory.len(), 2);
    }

    #[test]
    fn root_and_path_walks_field_chain() {
        let strings = ThreadedRodeo::new();
        let mut factory = MemoryFactory::new(10);
        let parameter = factory.make_parameter(1);
        let x = factory.make_field(parameter, strings.get_or_intern("x"));
        let y = factory.make_field(x, strings.get_or_intern("y"));

        let (root, path) = factory.root_and_path(y);
        assert_eq!(root, parameter);
        assert_eq!(path.len(), 2);

        let access_path = factory.access_path(y).unwrap();
        assert_eq!(access_path.root(), Root::argument(1));
    }

    #[test]
    fn instruction_cells_have_no_access_path() {
        let mut factory = MemoryFactory::new(10);
        let cell = factory.make_instruction(3);
        assert!(factory.access_path(cell).is_none());
    }

    #[test]
    fn access_path_respects_depth_cap() {
        let strings = ThreadedRodeo::new();
        let mut factory = MemoryFactory::new(1);
        let parameter = factory.make_parameter(0);
        let x = factory.make_field(parameter, strings.get_or_intern("x"));
        let y = factory.make_field(x, strings.get_or_intern("y"));
        assert!(factory.access_path(x).is_some());
        assert!(factory.access_path(y).is_none());
    }

    #[test]
    fn singleton_detection() {
        let mut set = MemoryLocationsDomain::empty();
        assert!(set.singleton().is_none());
        set.add(4);
        assert_eq!(set.singleton(), Some(4));
        set.add(7);
        assert!(set.singleton().is_none());
        assert_eq!(set.len(), 2);
    }
}
