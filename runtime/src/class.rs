//! Loaded classes.
//!
//! A [`RuntimeClass`] is either one of the built-in classes or a linked
//! [`GeneratedClass`]. Executable bodies become [`Body`]s that own one
//! call site per `Call` instruction.
use std::sync::Arc;

use ahash::AHashMap;
use bytecode::{CaptureFrom, CodeDesc, GeneratedClass, MethodDesc, ParamDesc};
use parking_lot::Mutex;

use crate::call_site::CallSite;
use crate::value::Value;

/// An executable body with its call sites.
pub struct Body {
    /// Declaring class.
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub code: CodeDesc,
    pub implicit_param: bool,
    /// Where a closure body's captured cells come from, in capture order.
    pub captures: Box<[CaptureFrom]>,
    pub(crate) sites: Box<[CallSite]>,
}

impl Body {
    pub(crate) fn new(owner: Arc<str>, name: Arc<str>, code: CodeDesc, implicit_param: bool) -> Self {
        let sites = (0..code.call_sites).map(|_| CallSite::new()).collect();
        Self {
            owner,
            name,
            code,
            implicit_param,
            captures: Box::new([]),
            sites,
        }
    }

    pub fn call_site(&self, idx: u16) -> Option<&CallSite> {
        self.sites.get(usize::from(idx))
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({}.{})", self.owner, self.name)
    }
}

/// A method or constructor of a generated class.
#[derive(Debug)]
pub struct MethodInfo {
    pub name: Arc<str>,
    pub params: Vec<ParamDesc>,
    pub is_static: bool,
    pub body: Arc<Body>,
}

impl MethodInfo {
    fn new(owner: &Arc<str>, desc: MethodDesc) -> Self {
        let body = Body::new(owner.clone(), desc.name.clone(), desc.code, false);
        Self {
            name: desc.name,
            params: desc.params,
            is_static: desc.is_static,
            body: Arc::new(body),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitState {
    Pending,
    Running,
    Done,
}

pub struct RuntimeClass {
    name: Arc<str>,
    superclass: Option<Arc<RuntimeClass>>,
    builtin: bool,
    is_script: bool,
    source: Option<Arc<str>>,
    instance_fields: Vec<Arc<str>>,
    static_fields: Vec<Arc<str>>,
    pub(crate) methods: Vec<MethodInfo>,
    pub(crate) constructors: Vec<MethodInfo>,
    pub(crate) initializer: Option<Arc<Body>>,
    pub(crate) static_initializer: Option<Arc<Body>>,
    closures: Vec<Arc<Body>>,
    statics: Mutex<AHashMap<Arc<str>, Value>>,
    pub(crate) init: Mutex<InitState>,
}

impl RuntimeClass {
    pub(crate) fn builtin(name: &str, superclass: Option<Arc<RuntimeClass>>) -> Self {
        let instance_fields = if name == "Throwable" {
            vec!["message".into(), "cause".into()]
        } else {
            Vec::new()
        };
        Self {
            name: name.into(),
            superclass,
            builtin: true,
            is_script: false,
            source: None,
            instance_fields,
            static_fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            initializer: None,
            static_initializer: None,
            closures: Vec::new(),
            statics: Mutex::new(AHashMap::new()),
            init: Mutex::new(InitState::Done),
        }
    }

    /// Link a generated class below `superclass`.
    pub(crate) fn link(class: GeneratedClass, superclass: Arc<RuntimeClass>) -> Self {
        let name = class.name.clone();
        let mut instance_fields = Vec::new();
        let mut static_fields = Vec::new();
        let mut statics = AHashMap::new();
        for f in &class.fields {
            if f.is_static {
                static_fields.push(f.name.clone());
                statics.insert(f.name.clone(), Value::Null);
            } else {
                instance_fields.push(f.name.clone());
            }
        }
        let body = |m: MethodDesc| Arc::new(Body::new(name.clone(), m.name, m.code, false));
        let closures = class
            .closures
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let label: Arc<str> = format!("<closure{i}>").into();
                let mut body = Body::new(name.clone(), label, c.code, c.implicit_param);
                body.captures = c.captures.into();
                Arc::new(body)
            })
            .collect();
        let init = if class.static_initializer.is_some() {
            InitState::Pending
        } else {
            InitState::Done
        };
        Self {
            superclass: Some(superclass),
            builtin: false,
            is_script: class.is_script,
            source: Some(class.source),
            instance_fields,
            static_fields,
            methods: class.methods.into_iter().map(|m| MethodInfo::new(&name, m)).collect(),
            constructors: class
                .constructors
                .into_iter()
                .map(|m| MethodInfo::new(&name, m))
                .collect(),
            initializer: class.initializer.map(body),
            static_initializer: class.static_initializer.map(body),
            closures,
            statics: Mutex::new(statics),
            init: Mutex::new(init),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn superclass(&self) -> Option<&Arc<RuntimeClass>> {
        self.superclass.as_ref()
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn is_script(&self) -> bool {
        self.is_script
    }

    pub fn source(&self) -> Option<&Arc<str>> {
        self.source.as_ref()
    }

    /// This class and its superclasses, most derived first.
    pub fn ancestry(&self) -> impl Iterator<Item = &RuntimeClass> {
        std::iter::successors(Some(self), |c| c.superclass.as_deref())
    }

    /// As [`ancestry`](Self::ancestry), with shared handles.
    pub fn ancestors(class: &Arc<RuntimeClass>) -> impl Iterator<Item = Arc<RuntimeClass>> + use<> {
        std::iter::successors(Some(class.clone()), |c| c.superclass.clone())
    }

    /// Steps from this class up to `name`, `None` if `name` is not an
    /// ancestor.
    pub fn distance_to(&self, name: &str) -> Option<usize> {
        self.ancestry().position(|c| &*c.name == name)
    }

    pub fn is_subclass_of(&self, name: &str) -> bool {
        self.ancestry().any(|c| &*c.name == name)
    }

    /// Instance field names of the whole chain.
    pub fn instance_field_names(&self) -> Vec<Arc<str>> {
        self.ancestry()
            .flat_map(|c| c.instance_fields.iter().cloned())
            .collect()
    }

    pub fn method_infos(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub fn constructor_infos(&self) -> &[MethodInfo] {
        &self.constructors
    }

    pub(crate) fn closure(&self, idx: usize) -> Option<&Arc<Body>> {
        self.closures.get(idx)
    }

    /// The class in the chain that declares static field `name`.
    pub(crate) fn static_owner(&self, name: &str) -> Option<&RuntimeClass> {
        self.ancestry().find(|c| c.static_fields.iter().any(|f| &**f == name))
    }

    pub fn static_field(&self, name: &str) -> Option<Value> {
        self.static_owner(name)?.statics.lock().get(name).cloned()
    }

    /// Returns `false` if no class in the chain declares `name`.
    pub fn set_static_field(&self, name: &str, value: Value) -> bool {
        match self.static_owner(name) {
            Some(owner) => {
                owner.statics.lock().insert(name.into(), value);
                true
            }
            None => false,
        }
    }

    /// Claim the static initializer. Returns it when the caller must run
    /// it now.
    pub(crate) fn begin_init(&self) -> Option<Arc<Body>> {
        let mut state = self.init.lock();
        if *state != InitState::Pending {
            return None;
        }
        *state = InitState::Running;
        self.static_initializer.clone()
    }

    pub(crate) fn finish_init(&self) {
        *self.init.lock() = InitState::Done;
    }
}

impl std::fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuntimeClass({})", self.name)
    }
}

/// Identity of a class for cache keys.
pub(crate) fn class_id(class: &Arc<RuntimeClass>) -> usize {
    Arc::as_ptr(class) as usize
}
