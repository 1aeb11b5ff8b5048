//! # Runtime
//!
//! Loads [`GeneratedClass`]es and runs them. Every call goes through the
//! receiver's [`MetaClass`], which resolves a name through its
//! [`Strategy`] list: declared methods, methods added at run time under a
//! literal name, pattern methods, then `methodMissing`. Each `Call`
//! instruction owns a [`CallSite`] that caches resolutions per receiver
//! shape until the [`MetaClassRegistry`] epoch moves.
//!
//! ```rust
//! let rt = runtime::Runtime::new(runtime::RuntimeConfig::default())
//!     .with_output(runtime::Output::captured());
//! rt.load(compiler::compile_source("hi.kst", "println 'hi'").unwrap()).unwrap();
//! rt.run_script("hi").unwrap();
//! assert_eq!(rt.output().take(), "hi\n");
//! ```
use std::sync::Arc;

use ahash::AHashMap;
use bytecode::GeneratedClass;
use bytecode::builtins::BUILTIN_CLASSES;
use parking_lot::{Mutex, RwLock};

mod call_site;
mod class;
mod config;
mod dispatch;
mod error;
mod interp;
mod meta;
mod natives;
mod ops;
mod registry;
mod value;

pub use call_site::{CallSite, SiteState};
pub use class::{Body, MethodInfo, RuntimeClass};
pub use config::{Output, RuntimeConfig};
pub use error::{DispatchError, RuntimeError, describe_thrown};
pub use interp::Interpreter;
pub use meta::{
    Callable, ClosureMethod, DeclaredMethod, HostFn, METHOD_MISSING, MetaClass, MetaMethod, PatternMethod,
    Strategy,
};
pub use registry::MetaClassRegistry;
pub use value::{Cell, Closure, ListRef, Matcher, Object, Value, format_float};

/// Classes of the non-object values, looked up on every dispatch.
struct CoreClasses {
    null: Arc<RuntimeClass>,
    boolean: Arc<RuntimeClass>,
    integer: Arc<RuntimeClass>,
    float: Arc<RuntimeClass>,
    string: Arc<RuntimeClass>,
    list: Arc<RuntimeClass>,
    closure: Arc<RuntimeClass>,
    matcher: Arc<RuntimeClass>,
    class: Arc<RuntimeClass>,
}

impl CoreClasses {
    fn from_table(classes: &AHashMap<Arc<str>, Arc<RuntimeClass>>) -> Self {
        let get = |name: &str| {
            classes
                .get(name)
                .cloned()
                .unwrap_or_else(|| Arc::new(RuntimeClass::builtin(name, None)))
        };
        Self {
            null: get("NullObject"),
            boolean: get("Boolean"),
            integer: get("Integer"),
            float: get("Float"),
            string: get("String"),
            list: get("List"),
            closure: get("Closure"),
            matcher: get("Matcher"),
            class: get("Class"),
        }
    }
}

/// A loaded program: its classes, their metaclasses and the script
/// binding. Shareable between threads.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<MetaClassRegistry>,
    classes: RwLock<AHashMap<Arc<str>, Arc<RuntimeClass>>>,
    core: CoreClasses,
    /// Variables assigned by scripts without a declaration.
    binding: Mutex<AHashMap<Arc<str>, Value>>,
    output: Output,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_registry(config, Arc::new(MetaClassRegistry::new()))
    }

    /// A runtime using `registry` for its metaclasses.
    pub fn with_registry(config: RuntimeConfig, registry: Arc<MetaClassRegistry>) -> Self {
        let mut classes: AHashMap<Arc<str>, Arc<RuntimeClass>> = AHashMap::new();
        for (name, superclass) in BUILTIN_CLASSES {
            let superclass = superclass.and_then(|s| classes.get(s).cloned());
            classes.insert((*name).into(), Arc::new(RuntimeClass::builtin(name, superclass)));
        }
        let core = CoreClasses::from_table(&classes);
        Self {
            config,
            registry,
            classes: RwLock::new(classes),
            core,
            binding: Mutex::new(AHashMap::new()),
            output: Output::default(),
        }
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MetaClassRegistry> {
        &self.registry
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Link generated classes, superclasses first. A class may extend
    /// another class of the same batch or one loaded earlier. Loading a
    /// class under a name that is already taken replaces it and drops
    /// the replaced class's metaclass.
    pub fn load(&self, generated: Vec<GeneratedClass>) -> Result<Vec<Arc<RuntimeClass>>, RuntimeError> {
        let mut pending = generated;
        let mut loaded = Vec::with_capacity(pending.len());
        let mut replaced = Vec::new();
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for class in pending {
                let superclass = class.superclass.clone().unwrap_or_else(|| "Object".into());
                let Some(superclass) = self.class(&superclass) else {
                    waiting.push(class);
                    continue;
                };
                let linked = Arc::new(RuntimeClass::link(class, superclass));
                log::debug!("loaded {}", linked.name());
                let previous = self
                    .classes
                    .write()
                    .insert(linked.name_arc().clone(), linked.clone());
                replaced.extend(previous);
                loaded.push(linked);
            }
            if waiting.len() == before {
                let missing = waiting
                    .first()
                    .and_then(|c| c.superclass.clone())
                    .unwrap_or_else(|| "Object".into());
                return Err(RuntimeError::ClassNotFound(missing));
            }
            pending = waiting;
        }
        for previous in &replaced {
            log::debug!("{} replaced, dropping its metaclass", previous.name());
            self.registry.remove(previous);
        }
        Ok(loaded)
    }

    pub fn class(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.read().get(name).cloned()
    }

    /// Names of every loaded class, built-ins included.
    pub fn class_names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The runtime class of a value.
    pub fn class_of(&self, value: &Value) -> Arc<RuntimeClass> {
        let core = &self.core;
        match value {
            Value::Null => core.null.clone(),
            Value::Bool(_) => core.boolean.clone(),
            Value::Int(_) => core.integer.clone(),
            Value::Float(_) => core.float.clone(),
            Value::Str(_) => core.string.clone(),
            Value::List(_) => core.list.clone(),
            Value::Object(o) => o.class().clone(),
            Value::Closure(_) => core.closure.clone(),
            Value::Matcher(_) => core.matcher.clone(),
            Value::Class(_) => core.class.clone(),
        }
    }

    /// The metaclass of `class`, built on first request.
    pub fn metaclass(&self, class: &Arc<RuntimeClass>) -> Arc<MetaClass> {
        self.registry
            .get_or_build(class, || MetaClass::build(class, &self.config.strategies))
    }

    pub fn interpreter(&self) -> Interpreter<'_> {
        Interpreter::new(self)
    }

    /// Run the script class `name`.
    pub fn run_script(&self, name: &str) -> Result<Value, RuntimeError> {
        let class = self.find(name)?;
        if !class.is_script() {
            return Err(RuntimeError::bug(format!("{name} is not a script")));
        }
        self.interpreter().run_script(&class)
    }

    /// `new C(args)` from the host.
    pub fn new_instance(&self, class: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let class = self.find(class)?;
        self.interpreter().instantiate(&class, args)
    }

    /// `receiver.name(args)` from the host.
    pub fn invoke(&self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        self.interpreter().call_method(receiver, name, args)
    }

    fn find(&self, name: &str) -> Result<Arc<RuntimeClass>, RuntimeError> {
        self.class(name).ok_or_else(|| RuntimeError::ClassNotFound(name.into()))
    }

    /// Add or replace the dynamic method `name` of `class`.
    pub fn add_method(&self, class: &str, name: &str, callable: Callable) -> Result<(), RuntimeError> {
        self.add_method_to(&self.find(class)?, name, callable);
        Ok(())
    }

    pub fn add_pattern_method(&self, class: &str, pattern: &str, callable: Callable) -> Result<(), RuntimeError> {
        self.add_pattern_method_to(&self.find(class)?, pattern, callable)
    }

    /// Remove a dynamic or pattern method. Returns whether anything was
    /// removed.
    pub fn remove_method(&self, class: &str, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.remove_method_from(&self.find(class)?, name))
    }

    pub fn set_method_missing(&self, class: &str, hook: Option<Callable>) -> Result<(), RuntimeError> {
        let class = self.find(class)?;
        self.metaclass(&class).set_method_missing(hook);
        self.registry.invalidate();
        Ok(())
    }

    pub(crate) fn add_method_to(&self, class: &Arc<RuntimeClass>, name: &str, callable: Callable) {
        log::debug!("adding method {}.{name}", class.name());
        self.metaclass(class).add_method(name, callable);
        self.registry.invalidate();
    }

    pub(crate) fn add_pattern_method_to(
        &self,
        class: &Arc<RuntimeClass>,
        pattern: &str,
        callable: Callable,
    ) -> Result<(), RuntimeError> {
        log::debug!("adding pattern method {}./{pattern}/", class.name());
        self.metaclass(class).add_pattern_method(pattern, callable)?;
        self.registry.invalidate();
        Ok(())
    }

    pub(crate) fn remove_method_from(&self, class: &Arc<RuntimeClass>, name: &str) -> bool {
        let removed = self.metaclass(class).remove_method(name);
        if removed {
            log::debug!("removed method {}.{name}", class.name());
            self.registry.invalidate();
        }
        removed
    }

    /// A script binding variable.
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.binding.lock().get(name).cloned()
    }

    pub fn set_variable(&self, name: &str, value: Value) {
        self.binding.lock().insert(name.into(), value);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("classes", &self.classes.read().len())
            .field("metaclasses", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeter(name: &str) -> GeneratedClass {
        GeneratedClass::new(name, "test.kst")
    }

    #[test]
    fn builtins_form_the_documented_hierarchy() {
        let rt = Runtime::default();
        let npe = rt.class("NullPointerException").unwrap();
        assert_eq!(npe.distance_to("Throwable"), Some(3));
        assert!(rt.class_of(&Value::Int(1)).is_subclass_of("Number"));
        assert_eq!(rt.class_of(&Value::Null).name(), "NullObject");
        assert_eq!(rt.class_of(&Value::list(vec![])).name(), "List");
    }

    #[test]
    fn load_links_superclasses_in_any_order() {
        let rt = Runtime::default();
        let mut child = greeter("app.Child");
        child.superclass = Some("app.Parent".into());
        let loaded = rt.load(vec![child, greeter("app.Parent")]).unwrap();
        assert_eq!(loaded.len(), 2);
        let child = rt.class("app.Child").unwrap();
        assert_eq!(child.distance_to("Object"), Some(2));
    }

    #[test]
    fn missing_superclass_is_reported() {
        let rt = Runtime::default();
        let mut orphan = greeter("Orphan");
        orphan.superclass = Some("Nowhere".into());
        match rt.load(vec![orphan]) {
            Err(RuntimeError::ClassNotFound(name)) => assert_eq!(&*name, "Nowhere"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reloading_a_class_drops_metaclasses() {
        let rt = Runtime::default();
        rt.load(vec![greeter("A")]).unwrap();
        let first = rt.metaclass(&rt.class("A").unwrap());
        rt.load(vec![greeter("A")]).unwrap();
        let second = rt.metaclass(&rt.class("A").unwrap());
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(rt.registry().len(), 1);
    }

    #[test]
    fn runtimes_sharing_a_registry_keep_their_own_classes() {
        let registry = Arc::new(MetaClassRegistry::new());
        let one = Runtime::with_registry(RuntimeConfig::default(), registry.clone());
        let two = Runtime::with_registry(RuntimeConfig::default(), registry.clone());
        one.load(vec![greeter("A")]).unwrap();
        two.load(vec![greeter("A")]).unwrap();
        one.add_method("A", "f", Callable::host(0, |_, _, _| Ok(Value::str("one")))).unwrap();
        two.add_method("A", "f", Callable::host(0, |_, _, _| Ok(Value::str("two")))).unwrap();
        let a1 = one.new_instance("A", &[]).unwrap();
        let a2 = two.new_instance("A", &[]).unwrap();
        assert_eq!(one.invoke(&a1, "f", &[]).unwrap(), Value::str("one"));
        assert_eq!(two.invoke(&a2, "f", &[]).unwrap(), Value::str("two"));
    }

    #[test]
    fn host_methods_dispatch_and_invalidate() {
        let rt = Runtime::default();
        let epoch = rt.registry().epoch();
        rt.add_method(
            "String",
            "shout",
            Callable::host(0, |interp, receiver, _| {
                let text = interp.to_string(receiver)?;
                Ok(Value::str(text.to_uppercase()))
            }),
        )
        .unwrap();
        assert!(rt.registry().epoch() > epoch);
        assert_eq!(rt.invoke(&Value::str("hey"), "shout", &[]).unwrap(), Value::str("HEY"));
        assert!(rt.remove_method("String", "shout").unwrap());
        assert!(matches!(
            rt.invoke(&Value::str("hey"), "shout", &[]),
            Err(RuntimeError::Dispatch(_))
        ));
    }

    #[test]
    fn method_missing_hook_sees_name_and_arguments() {
        let rt = Runtime::default();
        rt.set_method_missing(
            "Integer",
            Some(Callable::host(2, |interp, _, args| {
                let name = interp.to_string(&args[0])?;
                let rest = interp.to_string(&args[1])?;
                Ok(Value::str(format!("{name}{rest}")))
            })),
        )
        .unwrap();
        let result = rt.invoke(&Value::Int(3), "frobnicate", &[Value::Int(1)]).unwrap();
        assert_eq!(result, Value::str("frobnicate[1]"));
    }

    #[test]
    fn natives_cover_lists_and_strings() {
        let rt = Runtime::default();
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(rt.invoke(&list, "size", &[]).unwrap(), Value::Int(2));
        assert_eq!(rt.invoke(&list, "getAt", &[Value::Int(-1)]).unwrap(), Value::Int(2));
        assert_eq!(rt.invoke(&list, "getAt", &[Value::Int(5)]).unwrap(), Value::Null);
        rt.invoke(&list, "putAt", &[Value::Int(3), Value::Int(9)]).unwrap();
        assert_eq!(rt.invoke(&list, "toString", &[]).unwrap(), Value::str("[1, 2, null, 9]"));
        let s = Value::str("Hello");
        assert_eq!(rt.invoke(&s, "substring", &[Value::Int(1), Value::Int(3)]).unwrap(), Value::str("el"));
        assert_eq!(rt.invoke(&s, "matches", &[Value::str("H.*o")]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn null_receivers_raise_null_pointer_exceptions() {
        let rt = Runtime::default();
        let err = rt.invoke(&Value::Null, "size", &[]).unwrap_err();
        assert_eq!(err.exception_class(), Some("NullPointerException"));
        assert!(err.to_string().contains("size()"));
    }

    #[test]
    fn binding_variables() {
        let rt = Runtime::default();
        assert_eq!(rt.variable("x"), None);
        rt.set_variable("x", Value::Int(4));
        assert_eq!(rt.variable("x"), Some(Value::Int(4)));
    }
}
