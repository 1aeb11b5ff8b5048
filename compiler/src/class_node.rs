//! Symbol information for declared classes.
//!
//! Conversion fills a [`ClassTable`] shared by every source unit of a
//! compilation; semantic analysis resolves the written type names in it
//! and later phases read it.
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use bytecode::builtins;
use parser::Span;
use parser::ast::Name;

/// `package.name`, or `name` in the default package.
pub(crate) fn qualify(package: Option<&str>, name: &str) -> String {
    match package {
        Some(p) => format!("{p}.{name}"),
        None => name.to_string(),
    }
}

/// Names visible to type references in one source unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeEnv {
    pub package: Option<String>,
    /// Visible simple name (or alias) to the imported qualified name.
    pub imports: AHashMap<Name, String>,
}

impl TypeEnv {
    pub fn qualify(&self, name: &str) -> String {
        qualify(self.package.as_deref(), name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub name: Name,
    pub written_type: Option<String>,
    pub ty: Option<Arc<str>>,
    pub is_static: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodNode {
    pub name: Name,
    pub written_params: Vec<Option<String>>,
    /// Resolved parameter types, `None` for untyped.
    pub params: Vec<Option<Arc<str>>>,
    pub is_static: bool,
    pub span: Span,
}

impl MethodNode {
    pub fn arity(&self) -> usize {
        self.written_params.len()
    }

    /// `name(Type, Object)` using resolved types where known.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self
            .params
            .iter()
            .zip(&self.written_params)
            .map(|(resolved, written)| {
                resolved
                    .as_deref()
                    .or(written.as_deref())
                    .unwrap_or("Object")
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct ClassNode {
    /// Fully qualified name.
    pub name: Arc<str>,
    pub simple_name: Name,
    /// Name of the declaring source unit.
    pub source: Arc<str>,
    pub span: Span,
    pub env: Arc<TypeEnv>,
    pub written_super: Option<String>,
    pub super_span: Option<Span>,
    /// Resolved superclass; `None` until analysis or for `Object`.
    pub superclass: Option<Arc<str>>,
    pub fields: Vec<FieldNode>,
    pub methods: Vec<MethodNode>,
    pub constructors: Vec<MethodNode>,
    pub is_script: bool,
}

impl ClassNode {
    pub fn field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| &*m.name == name)
    }
}

/// All classes of a compilation, keyed by qualified name.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: AHashMap<Arc<str>, ClassNode>,
    order: Vec<Arc<str>>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a class. Returns the existing entry's source unit if the name
    /// is taken.
    pub fn insert(&mut self, class: ClassNode) -> Result<(), Arc<str>> {
        if let Some(existing) = self.classes.get(&class.name) {
            return Err(existing.source.clone());
        }
        self.order.push(class.name.clone());
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ClassNode> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassNode> {
        self.classes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Classes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassNode> {
        self.order.iter().filter_map(|n| self.classes.get(n))
    }

    /// Drop every class declared by `source`.
    pub fn remove_source(&mut self, source: &str) {
        self.classes.retain(|_, c| &*c.source != source);
        let classes = &self.classes;
        self.order.retain(|n| classes.contains_key(n));
    }

    /// Resolve a written type name as seen from `env`.
    ///
    /// Lookup order: primitive spellings, qualified names, imports and
    /// aliases, the current package, the default package, built-ins.
    pub fn resolve_type(&self, env: &TypeEnv, written: &str) -> Option<Arc<str>> {
        if let Some(prim) = builtins::primitive_class(written) {
            return Some(prim.into());
        }
        if written.contains('.') {
            return self.classes.get_key_value(written).map(|(k, _)| k.clone());
        }
        if let Some(target) = env.imports.get(written) {
            return self.classes.get_key_value(target.as_str()).map(|(k, _)| k.clone());
        }
        if env.package.is_some() {
            let qualified = env.qualify(written);
            if let Some((k, _)) = self.classes.get_key_value(qualified.as_str()) {
                return Some(k.clone());
            }
        }
        if let Some((k, _)) = self.classes.get_key_value(written) {
            return Some(k.clone());
        }
        builtins::BUILTIN_CLASSES
            .iter()
            .find(|(n, _)| *n == written)
            .map(|(n, _)| Arc::from(*n))
    }

    /// The direct superclass of `name`, resolving the written name when
    /// analysis has not reached the declaring unit yet.
    pub fn superclass_of(&self, name: &str) -> Option<Arc<str>> {
        match self.classes.get(name) {
            Some(class) => match (&class.superclass, &class.written_super) {
                (Some(sup), _) => Some(sup.clone()),
                (None, Some(written)) => self.resolve_type(&class.env, written),
                (None, None) => Some("Object".into()),
            },
            None => builtins::builtin_superclass(name).map(Arc::from),
        }
    }

    /// `name` followed by its ancestors, stopping before a repeat.
    pub fn ancestry(&self, name: &str) -> Vec<Arc<str>> {
        let mut seen = AHashSet::new();
        let mut chain = Vec::new();
        let mut current: Option<Arc<str>> = Some(name.into());
        while let Some(c) = current {
            if !seen.insert(c.clone()) {
                break;
            }
            current = if &*c == "Object" {
                None
            } else {
                self.superclass_of(&c)
            };
            chain.push(c);
        }
        chain
    }

    /// Whether following superclasses from `name` leads back to it.
    pub fn is_cyclic(&self, name: &str) -> bool {
        let mut seen = AHashSet::new();
        let mut current = self.superclass_of(name);
        while let Some(c) = current {
            if &*c == name {
                return true;
            }
            if !seen.insert(c.clone()) || &*c == "Object" {
                return false;
            }
            current = self.superclass_of(&c);
        }
        false
    }

    pub fn is_subclass(&self, name: &str, ancestor: &str) -> bool {
        ancestor == "Object" || self.ancestry(name).iter().any(|c| &**c == ancestor)
    }

    /// Find a field declared by `class` or one of its ancestors.
    pub fn find_field(&self, class: &str, field: &str) -> Option<(&ClassNode, &FieldNode)> {
        self.ancestry(class).iter().find_map(|c| {
            let node = self.classes.get(c)?;
            node.field(field).map(|f| (node, f))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, sup: Option<&str>, env: &Arc<TypeEnv>) -> ClassNode {
        ClassNode {
            name: name.into(),
            simple_name: name.rsplit('.').next().unwrap_or(name).into(),
            source: "test".into(),
            span: Span::default(),
            env: env.clone(),
            written_super: sup.map(str::to_string),
            super_span: None,
            superclass: None,
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            is_script: false,
        }
    }

    #[test]
    fn resolution_order() {
        let mut imports = AHashMap::new();
        imports.insert(Name::from("W"), "lib.Widget".to_string());
        let env = Arc::new(TypeEnv {
            package: Some("app".into()),
            imports,
        });
        let mut table = ClassTable::new();
        table.insert(class("lib.Widget", None, &env)).unwrap();
        table.insert(class("app.Main", None, &env)).unwrap();
        table.insert(class("Helper", None, &env)).unwrap();

        assert_eq!(table.resolve_type(&env, "W").as_deref(), Some("lib.Widget"));
        assert_eq!(table.resolve_type(&env, "Main").as_deref(), Some("app.Main"));
        assert_eq!(table.resolve_type(&env, "Helper").as_deref(), Some("Helper"));
        assert_eq!(table.resolve_type(&env, "lib.Widget").as_deref(), Some("lib.Widget"));
        assert_eq!(table.resolve_type(&env, "int").as_deref(), Some("Integer"));
        assert_eq!(table.resolve_type(&env, "List").as_deref(), Some("List"));
        assert_eq!(table.resolve_type(&env, "Nope"), None);
    }

    #[test]
    fn duplicate_insert_reports_owner() {
        let env = Arc::new(TypeEnv::default());
        let mut table = ClassTable::new();
        table.insert(class("A", None, &env)).unwrap();
        assert_eq!(table.insert(class("A", None, &env)).unwrap_err().as_ref(), "test");
    }

    #[test]
    fn cycles_and_ancestry() {
        let env = Arc::new(TypeEnv::default());
        let mut table = ClassTable::new();
        table.insert(class("A", Some("B"), &env)).unwrap();
        table.insert(class("B", Some("A"), &env)).unwrap();
        table.insert(class("C", Some("RuntimeException"), &env)).unwrap();
        assert!(table.is_cyclic("A"));
        assert!(!table.is_cyclic("C"));
        let chain: Vec<String> = table.ancestry("C").iter().map(|c| c.to_string()).collect();
        assert_eq!(chain, ["C", "RuntimeException", "Exception", "Throwable", "Object"]);
        assert!(table.is_subclass("C", "Throwable"));
        assert!(!table.is_subclass("C", "Error"));
    }
}
