//! Methods and fields, interned with stable handles.

use std::fmt;

use rustc_hash::FxHashMap;

use super::cfg::ControlFlowGraph;
use crate::access::ParameterPosition;
use crate::interner::{Interned, Interner};

/// A method signature and shape. Identity is the interned handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    class_name: String,
    name: String,
    parameter_types: Vec<String>,
    return_type: String,
    is_static: bool,
}

pub type MethodHandle = Interned<Method>;

impl Method {
    pub fn new(
        class_name: String,
        name: String,
        parameter_types: Vec<String>,
        return_type: String,
        is_static: bool,
    ) -> Self {
        Method {
            class_name,
            name,
            parameter_types,
            return_type,
            is_static,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn returns_void(&self) -> bool {
        self.return_type == "V"
    }

    /// Number of formal parameters, counting the implicit receiver of
    /// instance methods at position 0.
    pub fn number_of_parameters(&self) -> ParameterPosition {
        let explicit = self.parameter_types.len() as ParameterPosition;
        if self.is_static {
            explicit
        } else {
            explicit + 1
        }
    }

    /// The static type of the parameter at `position`, receiver included.
    pub fn parameter_type(&self, position: ParameterPosition) -> Option<&str> {
        let index = if self.is_static {
            position as usize
        } else if position == 0 {
            return Some(&self.class_name);
        } else {
            (position - 1) as usize
        };
        self.parameter_types.get(index).map(String::as_str)
    }

    /// `name:(args)ret`, unique within a class.
    pub fn proto(&self) -> String {
        format!(
            "{}:({}){}",
            self.name,
            self.parameter_types.join(""),
            self.return_type
        )
    }

    /// The full signature, e.g. `LFoo;.bar:(LData;)V`.
    pub fn signature(&self) -> String {
        format!("{}.{}", self.class_name, self.proto())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

/// The method registry: handles plus method bodies. Built once by the
/// program loader, then immutable.
pub struct Methods {
    interner: Interner<Method>,
    by_signature: FxHashMap<String, MethodHandle>,
    code: FxHashMap<MethodHandle, ControlFlowGraph>,
    all: Vec<MethodHandle>,
}

impl Methods {
    pub fn new() -> Self {
        Self {
            interner: Interner::new(),
            by_signature: FxHashMap::default(),
            code: FxHashMap::default(),
            all: Vec::new(),
        }
    }

    /// Register a method, optionally with a body. Re-registering the
    /// same signature returns the existing handle.
    pub fn create(
        &mut self,
        method: Method,
        code: Option<ControlFlowGraph>,
    ) -> MethodHandle {
        let signature = method.signature();
        let handle = self.interner.intern(method);
        if self
            .by_signature
            .insert(signature, handle)
            .is_none()
        {
            self.all.push(handle);
        }
        if let Some(cfg) = code {
            self.code.insert(handle, cfg);
        }
        handle
    }

    pub fn get(&self, signature: &str) -> Option<MethodHandle> {
        self.by_signature.get(signature).copied()
    }

    /// The method body, or `None` for obscure (body-less) methods.
    pub fn code(&self, method: MethodHandle) -> Option<&ControlFlowGraph> {
        self.code.get(&method)
    }

    pub fn iter(&self) -> impl Iterator<Item = MethodHandle> + '_ {
        self.all.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

impl Default for Methods {
    fn default() -> Self {
        Self::new()
    }
}

/// A field reference with a stable handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    class_name: String,
    name: String,
}

pub type FieldHandle = Interned<Field>;

impl Field {
    pub fn new(class_name: String, name: String) -> Self {
        Field { class_name, name }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

/// Interner for fields.
pub struct Fields {
    interner: Interner<Field>,
}

impl Fields {
    pub fn new() -> Self {
        Self {
            interner: Interner::new(),
        }
    }

    pub fn get(&self, class_name: &str, name: &str) -> FieldHandle {
        self.interner
            .intern(Field::new(class_name.to_string(), name.to_string()))
    }
}

impl Default for Fields {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(class: &str, name: &str, is_static: bool) -> Method {
        Method::new(
            class.to_string(),
            name.to_string(),
            vec!["LData;".to_string()],
            "V".to_string(),
            is_static,
        )
    }

    #[test]
    fn signatures_and_parameters() {
        let static_method = method("LFoo;", "f", true);
        assert_eq!(static_method.signature(), "LFoo;.f:(LData;)V");
        assert_eq!(static_method.number_of_parameters(), 1);
        assert_eq!(static_method.parameter_type(0), Some("LData;"));

        let instance = method("LFoo;", "f", false);
        assert_eq!(instance.number_of_parameters(), 2);
        assert_eq!(instance.parameter_type(0), Some("LFoo;"));
        assert_eq!(instance.parameter_type(1), Some("LData;"));
        assert!(instance.returns_void());
    }

    #[test]
    fn registry_deduplicates() {
        let mut methods = Methods::new();
        let a = methods.create(method("LFoo;", "f", true), None);
        let b = methods.create(method("LFoo;", "f", true), None);
        assert_eq!(a, b);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods.get("LFoo;.f:(LData;)V"), Some(a));
    }
}
