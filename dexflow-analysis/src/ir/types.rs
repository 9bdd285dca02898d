//! The class hierarchy index.

use rustc_hash::FxHashMap;

/// One class: name, superclass, interfaces.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
}

/// Immutable class-hierarchy index.
#[derive(Debug, Default)]
pub struct TypeIndex {
    classes: FxHashMap<String, ClassInfo>,
    children: FxHashMap<String, Vec<String>>,
}

impl TypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, class: ClassInfo) {
        if let Some(superclass) = &class.superclass {
            self.children
                .entry(superclass.clone())
                .or_default()
                .push(class.name.clone());
        }
        self.classes.insert(class.name.clone(), class);
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn superclass_of(&self, name: &str) -> Option<&str> {
        self.classes
            .get(name)
            .and_then(|class| class.superclass.as_deref())
    }

    /// Direct subclasses.
    pub fn children_of(&self, name: &str) -> &[String] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Classes with no known superclass, in insertion-independent order.
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .classes
            .values()
            .filter(|class| {
                class
                    .superclass
                    .as_ref()
                    .map_or(true, |superclass| !self.classes.contains_key(superclass))
            })
            .map(|class| class.name.as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
