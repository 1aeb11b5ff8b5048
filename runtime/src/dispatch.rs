//! Method resolution and invocation.
//!
//! A call first consults its call site. On a miss the receiver's
//! metaclass resolves the name through its strategies in order; the
//! result is recorded in the site unless it came from `methodMissing` or
//! the script binding, which are re-resolved on every call.
use std::borrow::Cow;
use std::sync::Arc;

use crate::call_site::{CallSite, SiteKey};
use crate::class::{RuntimeClass, class_id};
use crate::error::{DispatchError, RuntimeError};
use crate::interp::Interpreter;
use crate::meta::{Callable, DeclaredBody, DeclaredMethod, MetaClass, MetaMethod, PatternMethod, Strategy};
use crate::value::{Closure, Matcher, Value};

enum MissingHook {
    Declared(Arc<DeclaredMethod>),
    Callable(Callable),
}

enum Resolution {
    Method(MetaMethod),
    Missing(MissingHook),
    /// A closure stored in the script binding under the method name.
    Binding(Value),
}

/// Widen integer arguments bound to `Float` parameters.
pub(crate) fn coerce_args<'p, 'a>(
    params: impl IntoIterator<Item = Option<&'p str>>,
    args: &'a [Value],
) -> Cow<'a, [Value]> {
    let mut out = Cow::Borrowed(args);
    for (i, ty) in params.into_iter().enumerate() {
        if let (Some("Float"), Some(Value::Int(v))) = (ty, args.get(i)) {
            out.to_mut()[i] = Value::Float(*v as f64);
        }
    }
    out
}

impl Interpreter<'_> {
    /// Call `name` on `receiver` with full dynamic dispatch.
    pub fn call_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        self.dispatch(receiver, name, args, None)
    }

    /// Call a closure, or anything else through its `call` method.
    pub fn call_value(&mut self, callee: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(c) => self.call_closure(c, args),
            other => self.dispatch(other, "call", args, None),
        }
    }

    pub fn call_closure(&mut self, closure: &Closure, args: &[Value]) -> Result<Value, RuntimeError> {
        let body = closure
            .body()
            .ok_or_else(|| RuntimeError::bug(format!("{} has no closure {}", closure.class.name(), closure.index)))?;
        // Only an implicit `it` may be left out.
        let fits = args.len() == closure.param_count() || (args.is_empty() && closure.has_implicit_param());
        if !fits {
            return Err(DispatchError {
                receiver: "Closure".into(),
                name: "call".into(),
                arg_types: args.iter().map(|a| self.type_name(a)).collect(),
                is_static: false,
            }
            .into());
        }
        self.execute(&closure.class, body, closure.this.clone(), args, &closure.captures)
    }

    /// Whether `receiver.name(args)` resolves without the method-missing
    /// hook.
    pub fn responds_to(&self, receiver: &Value, name: &str, args: &[Value]) -> bool {
        let (class, is_static) = self.receiver_class(receiver);
        self.resolve(receiver, &class, is_static, name, args, false).is_some()
    }

    fn receiver_class(&self, receiver: &Value) -> (Arc<RuntimeClass>, bool) {
        match receiver {
            Value::Class(c) => (c.clone(), true),
            other => (self.rt.class_of(other), false),
        }
    }

    pub(crate) fn dispatch(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
        site: Option<&CallSite>,
    ) -> Result<Value, RuntimeError> {
        let rt = self.rt;
        let (class, is_static) = self.receiver_class(receiver);
        let limit = rt.config().polymorphic_limit;
        let site = site.filter(|_| limit > 0);
        let epoch = rt.registry().epoch();
        let key = site.map(|_| SiteKey {
            receiver: class_id(&class),
            is_static,
            shape: args.iter().map(|a| class_id(&rt.class_of(a))).collect(),
        });
        if let (Some(site), Some(key)) = (site, &key) {
            if let Some(method) = site.lookup(epoch, key) {
                return self.invoke(&method, receiver, name, args);
            }
        }
        match self.resolve(receiver, &class, is_static, name, args, true) {
            Some(Resolution::Method(method)) => {
                if let (Some(site), Some(key)) = (site, key) {
                    site.record(epoch, key, method.clone(), limit);
                }
                self.invoke(&method, receiver, name, args)
            }
            Some(Resolution::Missing(hook)) => {
                log::trace!("{}.{name} handled by methodMissing", class.name());
                let hook_args = [Value::str(name), Value::list(args.to_vec())];
                match hook {
                    MissingHook::Declared(m) => self.invoke_declared(&m, receiver, &hook_args),
                    MissingHook::Callable(c) => self.invoke_callable(&c, receiver, &hook_args),
                }
            }
            Some(Resolution::Binding(callee)) => self.call_value(&callee, args),
            None => Err(self.no_method(receiver, &class, is_static, name, args)),
        }
    }

    fn no_method(
        &self,
        receiver: &Value,
        class: &RuntimeClass,
        is_static: bool,
        name: &str,
        args: &[Value],
    ) -> RuntimeError {
        if receiver.is_null() {
            return self.raise(
                "NullPointerException",
                format!("Cannot invoke method {name}() on null object"),
            );
        }
        DispatchError {
            receiver: class.name_arc().clone(),
            name: name.into(),
            arg_types: args.iter().map(|a| self.type_name(a)).collect(),
            is_static,
        }
        .into()
    }

    fn resolve(
        &self,
        receiver: &Value,
        class: &Arc<RuntimeClass>,
        is_static: bool,
        name: &str,
        args: &[Value],
        with_missing: bool,
    ) -> Option<Resolution> {
        if is_static {
            let meta = self.rt.metaclass(class);
            let statics = meta.declared(name).iter().filter(|m| m.is_static);
            if let Some(m) = self.select(statics, args) {
                return Some(Resolution::Method(MetaMethod::Declared(m)));
            }
            // Methods of the class object itself.
            let class_class = self.rt.class_of(receiver);
            return self.resolve_instance(&class_class, name, args, with_missing);
        }
        let found = self.resolve_instance(class, name, args, with_missing);
        if found.is_none() && class.is_script() {
            if let Some(callee @ Value::Closure(_)) = self.rt.variable(name) {
                return Some(Resolution::Binding(callee));
            }
        }
        found
    }

    fn resolve_instance(
        &self,
        class: &Arc<RuntimeClass>,
        name: &str,
        args: &[Value],
        with_missing: bool,
    ) -> Option<Resolution> {
        let meta = self.rt.metaclass(class);
        let argc = args.len();
        for strategy in meta.strategies() {
            let found = match strategy {
                Strategy::Declared => self
                    .select(meta.declared(name).iter(), args)
                    .map(|m| Resolution::Method(MetaMethod::Declared(m))),
                Strategy::Dynamic => self
                    .metaclass_chain(class)
                    .find_map(|m| m.dynamic_method(name))
                    .filter(|m| m.callable.accepts(argc))
                    .map(|m| Resolution::Method(MetaMethod::Closure(m))),
                Strategy::Pattern => self
                    .metaclass_chain(class)
                    .find_map(|m| m.pattern_method(name))
                    .filter(|p| injects_matcher(p, argc) || p.callable.accepts(argc))
                    .map(|p| Resolution::Method(MetaMethod::Pattern(p))),
                Strategy::MethodMissing if with_missing => meta
                    .declared_method_missing()
                    .cloned()
                    .map(MissingHook::Declared)
                    .or_else(|| {
                        self.metaclass_chain(class)
                            .find_map(|m| m.method_missing())
                            .map(MissingHook::Callable)
                    })
                    .map(Resolution::Missing),
                Strategy::MethodMissing => None,
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn metaclass_chain(&self, class: &Arc<RuntimeClass>) -> impl Iterator<Item = Arc<MetaClass>> {
        RuntimeClass::ancestors(class).map(|c| self.rt.metaclass(&c))
    }

    /// The applicable overload with the lowest total argument distance.
    /// Ties go to the most derived declaring class, then to declaration
    /// order.
    fn select<'m>(
        &self,
        candidates: impl Iterator<Item = &'m Arc<DeclaredMethod>>,
        args: &[Value],
    ) -> Option<Arc<DeclaredMethod>> {
        candidates
            .filter(|m| m.accepts_arity(args.len()))
            .filter_map(|m| {
                let distance = if m.variadic {
                    0
                } else {
                    self.distance(m.params.iter().map(|p| p.as_deref()), args)?
                };
                Some((distance, m))
            })
            .min_by_key(|(distance, m)| (*distance, m.depth, m.order))
            .map(|(_, m)| m.clone())
    }

    /// Sum of class distances from each argument to its parameter type,
    /// `None` if some argument does not fit.
    pub(crate) fn distance<'p>(
        &self,
        params: impl IntoIterator<Item = Option<&'p str>>,
        args: &[Value],
    ) -> Option<usize> {
        params
            .into_iter()
            .zip(args)
            .map(|(ty, arg)| self.arg_distance(ty.unwrap_or("Object"), arg))
            .sum()
    }

    fn arg_distance(&self, ty: &str, arg: &Value) -> Option<usize> {
        if arg.is_null() {
            return Some(0);
        }
        match (ty, arg) {
            ("Float", Value::Int(_)) => Some(1),
            _ => self.rt.class_of(arg).distance_to(ty),
        }
    }

    pub(crate) fn invoke(
        &mut self,
        method: &MetaMethod,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        match method {
            MetaMethod::Declared(m) => self.invoke_declared(m, receiver, args),
            MetaMethod::Closure(m) => self.invoke_callable(&m.callable, receiver, args),
            MetaMethod::Pattern(p) => {
                let result = if injects_matcher(p, args.len()) {
                    let matcher = Matcher::new(&p.regex, p.pattern.clone(), name);
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(Value::Matcher(Arc::new(matcher)));
                    full.extend_from_slice(args);
                    self.invoke_callable(&p.callable, receiver, &full)
                } else {
                    self.invoke_callable(&p.callable, receiver, args)
                };
                result.map_err(|e| {
                    if e.is_bug() {
                        e
                    } else {
                        RuntimeError::PatternMethodFailed {
                            pattern: p.pattern.clone(),
                            name: name.into(),
                            source: Box::new(e),
                        }
                    }
                })
            }
        }
    }

    fn invoke_declared(
        &mut self,
        method: &DeclaredMethod,
        receiver: &Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        match &method.body {
            DeclaredBody::Native(f) => f(self, receiver, args),
            DeclaredBody::Code(class, body) => {
                let this = if method.is_static {
                    self.ensure_initialized(class)?;
                    Value::Class(class.clone())
                } else {
                    receiver.clone()
                };
                let args = coerce_args(method.params.iter().map(|p| p.as_deref()), args);
                self.execute(class, body, this, &args, &[])
            }
        }
    }

    /// Closures run with `this` bound to the receiver.
    pub(crate) fn invoke_callable(
        &mut self,
        callable: &Callable,
        receiver: &Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        match callable {
            Callable::Closure(c) => {
                let bound = c.rebind(receiver.clone());
                self.call_closure(&bound, args)
            }
            Callable::Host { f, .. } => f(self, receiver, args),
        }
    }
}

fn injects_matcher(method: &PatternMethod, argc: usize) -> bool {
    method.callable.param_count() == argc + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_for_float_parameters() {
        let args = [Value::Int(2), Value::Int(3)];
        let out = coerce_args([Some("Float"), None], &args);
        assert!(matches!(out, Cow::Owned(_)));
        assert_eq!(out[0], Value::Float(2.0));
        assert_eq!(out[1], Value::Int(3));
        let untouched = coerce_args([Some("Integer")], &args);
        assert!(matches!(untouched, Cow::Borrowed(_)));
    }
}
