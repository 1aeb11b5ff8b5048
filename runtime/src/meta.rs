//! Metaclasses and metamethods.
//!
//! A [`MetaClass`] is the dispatch table of one runtime type. Its declared
//! methods (including inherited ones and the built-in natives) are fixed
//! when it is built; dynamic methods, pattern methods and the
//! method-missing hook can be changed at any time.
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use regex::Regex;

use crate::class::{Body, RuntimeClass};
use crate::error::RuntimeError;
use crate::interp::Interpreter;
use crate::natives::{self, NativeFn};
use crate::value::{Closure, Value};

/// Name of the hook a class declares to handle unknown methods.
pub const METHOD_MISSING: &str = "methodMissing";

/// One step of method resolution. A runtime resolves through its
/// strategies in order and stops at the first that finds a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Methods declared by the receiver's class chain, built-in natives
    /// included.
    Declared,
    /// Methods added at run time under a literal name.
    Dynamic,
    /// Methods added at run time under a name pattern.
    Pattern,
    /// The `methodMissing` hook.
    MethodMissing,
}

impl Strategy {
    pub const DEFAULT_ORDER: [Strategy; 4] = [
        Strategy::Declared,
        Strategy::Dynamic,
        Strategy::Pattern,
        Strategy::MethodMissing,
    ];
}

pub type HostFn = dyn Fn(&mut Interpreter<'_>, &Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync;

/// Something that can be installed as a dynamic method.
#[derive(Clone)]
pub enum Callable {
    /// A program closure. It runs with `this` bound to the receiver.
    Closure(Arc<Closure>),
    /// A host function taking `(receiver, args)`.
    Host { arity: usize, f: Arc<HostFn> },
}

impl Callable {
    pub fn host<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&mut Interpreter<'_>, &Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self::Host {
            arity,
            f: Arc::new(f),
        }
    }

    /// Whether a call with `argc` arguments binds every parameter. An
    /// implicit `it` may also be left out.
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            Self::Closure(c) => c.param_count() == argc || (argc == 0 && c.has_implicit_param()),
            Self::Host { arity, .. } => *arity == argc,
        }
    }

    /// Number of parameters the callable declares.
    pub fn param_count(&self) -> usize {
        match self {
            Self::Closure(c) => c.param_count(),
            Self::Host { arity, .. } => *arity,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closure(c) => write!(f, "Closure({:?})", Value::Closure(c.clone())),
            Self::Host { arity, .. } => write!(f, "Host(arity {arity})"),
        }
    }
}

#[derive(Clone)]
pub(crate) enum DeclaredBody {
    Code(Arc<RuntimeClass>, Arc<Body>),
    Native(NativeFn),
}

/// A method declared by a class, or a built-in native.
pub struct DeclaredMethod {
    pub name: Arc<str>,
    pub declaring: Arc<str>,
    /// Parameter type names; `None` accepts anything.
    pub params: Vec<Option<Arc<str>>>,
    /// Accepts any number of arguments (natives only).
    pub variadic: bool,
    pub is_static: bool,
    /// Distance from the receiver's class to the declaring class.
    pub depth: usize,
    /// Declaration order within the whole chain.
    pub order: usize,
    pub(crate) body: DeclaredBody,
}

impl DeclaredMethod {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, DeclaredBody::Native(_))
    }

    pub fn accepts_arity(&self, argc: usize) -> bool {
        self.variadic || self.params.len() == argc
    }
}

/// A method added under a literal name.
#[derive(Debug)]
pub struct ClosureMethod {
    pub name: Arc<str>,
    pub declaring: Arc<str>,
    pub callable: Callable,
}

/// A method added under a name pattern that must match the whole method
/// name.
#[derive(Debug)]
pub struct PatternMethod {
    pub pattern: Arc<str>,
    pub declaring: Arc<str>,
    pub(crate) regex: Regex,
    pub callable: Callable,
}

impl PatternMethod {
    pub fn new(pattern: &str, declaring: Arc<str>, callable: Callable) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.into(),
            declaring,
            regex: Regex::new(&format!("^(?:{pattern})$"))?,
            callable,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// A resolved method, as cached by call sites.
#[derive(Clone)]
pub enum MetaMethod {
    Declared(Arc<DeclaredMethod>),
    Closure(Arc<ClosureMethod>),
    Pattern(Arc<PatternMethod>),
}

impl MetaMethod {
    pub fn name(&self) -> &str {
        match self {
            Self::Declared(m) => &m.name,
            Self::Closure(m) => &m.name,
            Self::Pattern(m) => &m.pattern,
        }
    }

    pub fn declaring_type(&self) -> &str {
        match self {
            Self::Declared(m) => &m.declaring,
            Self::Closure(m) => &m.declaring,
            Self::Pattern(m) => &m.declaring,
        }
    }

    /// Parameter type names, `Object` for untyped.
    pub fn signature(&self) -> Vec<Arc<str>> {
        let object = || Arc::<str>::from("Object");
        match self {
            Self::Declared(m) => m
                .params
                .iter()
                .map(|p| p.clone().unwrap_or_else(object))
                .collect(),
            Self::Closure(m) => (0..m.callable.param_count()).map(|_| object()).collect(),
            Self::Pattern(m) => (0..m.callable.param_count()).map(|_| object()).collect(),
        }
    }

    pub fn is_declared(&self) -> bool {
        matches!(self, Self::Declared(_))
    }
}

impl fmt::Debug for MetaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Declared(m) if m.is_native() => "native",
            Self::Declared(_) => "declared",
            Self::Closure(_) => "closure",
            Self::Pattern(_) => "pattern",
        };
        write!(f, "{kind} {}.{}", self.declaring_type(), self.name())
    }
}

#[derive(Default)]
struct DynamicMethods {
    methods: AHashMap<Arc<str>, Arc<ClosureMethod>>,
    patterns: Vec<Arc<PatternMethod>>,
    method_missing: Option<Callable>,
}

pub struct MetaClass {
    class: Arc<RuntimeClass>,
    strategies: Vec<Strategy>,
    declared: AHashMap<Arc<str>, Vec<Arc<DeclaredMethod>>>,
    dynamic: RwLock<DynamicMethods>,
}

impl MetaClass {
    /// Collect the declared methods and natives of `class` and its
    /// ancestors.
    pub fn build(class: &Arc<RuntimeClass>, strategies: &[Strategy]) -> Self {
        let mut declared: AHashMap<Arc<str>, Vec<Arc<DeclaredMethod>>> = AHashMap::new();
        let mut order = 0;
        for (depth, c) in RuntimeClass::ancestors(class).enumerate() {
            let declaring = c.name_arc().clone();
            for m in c.method_infos() {
                declared.entry(m.name.clone()).or_default().push(Arc::new(DeclaredMethod {
                    name: m.name.clone(),
                    declaring: declaring.clone(),
                    params: m.params.iter().map(|p| p.ty.clone()).collect(),
                    variadic: false,
                    is_static: m.is_static,
                    depth,
                    order,
                    body: DeclaredBody::Code(c.clone(), m.body.clone()),
                }));
                order += 1;
            }
            if c.is_builtin() {
                for native in natives::natives_for(c.name()) {
                    let name: Arc<str> = native.name.into();
                    declared.entry(name.clone()).or_default().push(Arc::new(DeclaredMethod {
                        name,
                        declaring: declaring.clone(),
                        params: vec![None; native.arity.unwrap_or(0)],
                        variadic: native.arity.is_none(),
                        is_static: false,
                        depth,
                        order,
                        body: DeclaredBody::Native(native.f),
                    }));
                    order += 1;
                }
            }
        }
        log::trace!(
            "built metaclass for {} ({} method names)",
            class.name(),
            declared.len()
        );
        Self {
            class: class.clone(),
            strategies: strategies.to_vec(),
            declared,
            dynamic: RwLock::new(DynamicMethods::default()),
        }
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn name(&self) -> &str {
        self.class.name()
    }

    /// Resolution order for this type.
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Declared candidates named `name`, most derived first.
    pub fn declared(&self, name: &str) -> &[Arc<DeclaredMethod>] {
        self.declared.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn declared_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.declared.keys()
    }

    pub fn add_method(&self, name: &str, callable: Callable) {
        let method = Arc::new(ClosureMethod {
            name: name.into(),
            declaring: self.class.name_arc().clone(),
            callable,
        });
        self.dynamic.write().methods.insert(name.into(), method);
    }

    pub fn add_pattern_method(&self, pattern: &str, callable: Callable) -> Result<(), regex::Error> {
        let method = PatternMethod::new(pattern, self.class.name_arc().clone(), callable)?;
        self.dynamic.write().patterns.push(Arc::new(method));
        Ok(())
    }

    /// Remove a dynamic method, or every pattern method registered under
    /// exactly this pattern text. Returns whether anything was removed.
    pub fn remove_method(&self, name: &str) -> bool {
        let mut dynamic = self.dynamic.write();
        let removed = dynamic.methods.remove(name).is_some();
        let before = dynamic.patterns.len();
        dynamic.patterns.retain(|p| &*p.pattern != name);
        removed || dynamic.patterns.len() != before
    }

    pub fn set_method_missing(&self, hook: Option<Callable>) {
        self.dynamic.write().method_missing = hook;
    }

    pub fn dynamic_method(&self, name: &str) -> Option<Arc<ClosureMethod>> {
        self.dynamic.read().methods.get(name).cloned()
    }

    /// The first pattern method, in registration order, whose pattern
    /// matches all of `name`.
    pub fn pattern_method(&self, name: &str) -> Option<Arc<PatternMethod>> {
        self.dynamic
            .read()
            .patterns
            .iter()
            .find(|p| p.matches(name))
            .cloned()
    }

    pub fn method_missing(&self) -> Option<Callable> {
        self.dynamic.read().method_missing.clone()
    }

    /// A declared `methodMissing(name, args)`.
    pub fn declared_method_missing(&self) -> Option<&Arc<DeclaredMethod>> {
        self.declared(METHOD_MISSING).iter().find(|m| m.arity() == 2 && !m.is_native())
    }
}

impl fmt::Debug for MetaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetaClass({})", self.class.name())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn dummy_method(name: &str) -> MetaMethod {
        MetaMethod::Closure(Arc::new(ClosureMethod {
            name: name.into(),
            declaring: "Object".into(),
            callable: Callable::host(0, |_, _, _| Ok(Value::Null)),
        }))
    }

    fn object_class() -> Arc<RuntimeClass> {
        Arc::new(RuntimeClass::builtin("Object", None))
    }

    #[test]
    fn builtin_natives_are_declared() {
        let meta = MetaClass::build(&object_class(), &Strategy::DEFAULT_ORDER);
        assert!(!meta.declared("toString").is_empty());
        assert!(meta.declared("toString")[0].is_native());
        assert!(meta.declared("nope").is_empty());
    }

    #[test]
    fn pattern_must_match_whole_name() {
        let meta = MetaClass::build(&object_class(), &Strategy::DEFAULT_ORDER);
        meta.add_pattern_method("get.*", Callable::host(1, |_, _, _| Ok(Value::Null)))
            .unwrap();
        assert!(meta.pattern_method("getFoo").is_some());
        assert!(meta.pattern_method("forget").is_none());
        assert!(meta.add_pattern_method("(", Callable::host(0, |_, _, _| Ok(Value::Null))).is_err());
        assert!(meta.remove_method("get.*"));
        assert!(meta.pattern_method("getFoo").is_none());
    }

    #[test]
    fn dynamic_methods_replace_and_remove() {
        let meta = MetaClass::build(&object_class(), &Strategy::DEFAULT_ORDER);
        meta.add_method("greet", Callable::host(0, |_, _, _| Ok(Value::Int(1))));
        meta.add_method("greet", Callable::host(1, |_, _, _| Ok(Value::Int(2))));
        assert_eq!(meta.dynamic_method("greet").unwrap().callable.param_count(), 1);
        assert!(meta.remove_method("greet"));
        assert!(!meta.remove_method("greet"));
    }
}
