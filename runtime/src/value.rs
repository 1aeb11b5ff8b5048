//! Runtime values.
//!
//! Scalars are stored inline; everything with identity is reference
//! counted and shareable between threads.
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::class::{Body, RuntimeClass};

/// A mutable box shared between a frame and the closures capturing one of
/// its locals.
pub type Cell = Arc<Mutex<Value>>;

pub fn new_cell(value: Value) -> Cell {
    Arc::new(Mutex::new(value))
}

pub type ListRef = Arc<RwLock<Vec<Value>>>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(ListRef),
    Object(Arc<Object>),
    Closure(Arc<Closure>),
    Matcher(Arc<Matcher>),
    Class(Arc<RuntimeClass>),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Arc::new(RwLock::new(items)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: null, false, zero, and empty strings and lists are
    /// false.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(l) => !l.read().is_empty(),
            Self::Matcher(m) => m.matched(),
            Self::Object(_) | Self::Closure(_) | Self::Class(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Identity for reference values, equality for scalars.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Closure(a), Self::Closure(b)) => Arc::ptr_eq(a, b),
            (Self::Matcher(a), Self::Matcher(b)) => Arc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address-based hash for reference values.
    pub fn identity_hash(&self) -> i64 {
        let addr = match self {
            Self::List(l) => Arc::as_ptr(l) as *const u8 as usize,
            Self::Object(o) => Arc::as_ptr(o) as *const u8 as usize,
            Self::Closure(c) => Arc::as_ptr(c) as *const u8 as usize,
            Self::Matcher(m) => Arc::as_ptr(m) as *const u8 as usize,
            Self::Class(c) => Arc::as_ptr(c) as *const u8 as usize,
            _ => 0,
        };
        (addr >> 3) as i64
    }
}

impl PartialEq for Value {
    /// Structural for scalars and lists, identity otherwise. Used by tests
    /// and hosts; `==` in programs goes through the interpreter.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            _ => self.same(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(l) => f.debug_list().entries(l.read().iter()).finish(),
            Self::Object(o) => write!(f, "<{}@{:x}>", o.class.name(), self.identity_hash()),
            Self::Closure(c) => write!(f, "<closure {}#{}>", c.class.name(), c.index),
            Self::Matcher(m) => write!(f, "<matcher /{}/ {:?}>", m.pattern, m.input),
            Self::Class(c) => write!(f, "<class {}>", c.name()),
        }
    }
}

/// An instance of a declared or built-in class.
pub struct Object {
    class: Arc<RuntimeClass>,
    fields: Mutex<AHashMap<Arc<str>, Value>>,
}

impl Object {
    /// A fresh instance with every instance field of the class chain set to
    /// null.
    pub fn new(class: Arc<RuntimeClass>) -> Self {
        let mut fields = AHashMap::new();
        for name in class.instance_field_names() {
            fields.insert(name, Value::Null);
        }
        Self {
            class,
            fields: Mutex::new(fields),
        }
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.lock().contains_key(name)
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.lock().get(name).cloned()
    }

    /// Store into an existing field. Returns `false` if there is no such
    /// field.
    pub fn set_field(&self, name: &str, value: Value) -> bool {
        match self.fields.lock().get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// A closure value: a compiled body, the receiver it was created for and
/// the cells it captured.
pub struct Closure {
    pub(crate) class: Arc<RuntimeClass>,
    pub(crate) index: usize,
    pub(crate) this: Value,
    pub(crate) captures: Vec<Cell>,
}

impl Closure {
    pub(crate) fn body(&self) -> Option<&Arc<Body>> {
        self.class.closure(self.index)
    }

    /// Declared parameter count; an implicit `it` counts as one.
    pub fn param_count(&self) -> usize {
        self.body().map_or(0, |b| usize::from(b.code.param_count))
    }

    /// Takes a single implicit `it` parameter.
    pub fn has_implicit_param(&self) -> bool {
        self.body().is_some_and(|b| b.implicit_param)
    }

    pub fn owner(&self) -> &Value {
        &self.this
    }

    /// The same closure running with `this` bound to `receiver`.
    pub(crate) fn rebind(&self, receiver: Value) -> Closure {
        Closure {
            class: self.class.clone(),
            index: self.index,
            this: receiver,
            captures: self.captures.clone(),
        }
    }
}

/// The result of matching a pattern against a string.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub pattern: Arc<str>,
    pub input: Arc<str>,
    /// Group 0 is the whole match; `None` for groups that did not take
    /// part. Empty when the pattern did not match.
    pub groups: Vec<Option<Arc<str>>>,
}

impl Matcher {
    pub fn new(regex: &regex::Regex, pattern: Arc<str>, input: &str) -> Self {
        let groups = regex
            .captures(input)
            .map(|caps| {
                caps.iter()
                    .map(|g| g.map(|m| Arc::from(m.as_str())))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            pattern,
            input: input.into(),
            groups,
        }
    }

    pub fn matched(&self) -> bool {
        !self.groups.is_empty()
    }

    pub fn group(&self, idx: usize) -> Option<&str> {
        self.groups.get(idx).and_then(|g| g.as_deref())
    }

    /// Number of capturing groups, not counting group 0.
    pub fn group_count(&self) -> usize {
        self.groups.len().saturating_sub(1)
    }
}

/// Text of a float: plain decimals for magnitudes in `[1e-3, 1e7)`,
/// `1.0E20` style otherwise, `Infinity` and `NaN` for the specials.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    let magnitude = v.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{v:?}");
    }
    let sci = format!("{v:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exponent}")
    } else {
        format!("{mantissa}.0E{exponent}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Float(0.0).truthy());
        assert!(!Value::str("").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::list(vec![Value::Null]).truthy());
        assert!(Value::str("0").truthy());
        assert!(Value::Int(-1).truthy());
    }

    #[test]
    fn lists_compare_structurally() {
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(a, b);
        assert!(!a.same(&b));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn matcher_groups() {
        let re = regex::Regex::new("^(?:get(\\w+))$").unwrap();
        let m = Matcher::new(&re, "get(\\w+)".into(), "getName");
        assert!(m.matched());
        assert_eq!(m.group(1), Some("Name"));
        assert_eq!(m.group_count(), 1);
        let miss = Matcher::new(&re, "get(\\w+)".into(), "set");
        assert!(!miss.matched());
        assert_eq!(miss.group(0), None);
    }

    #[test]
    fn floats_print_like_doubles() {
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(100.0), "100.0");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(1234567.0), "1234567.0");
        assert_eq!(format_float(1e7), "1.0E7");
        assert_eq!(format_float(1e20), "1.0E20");
        assert_eq!(format_float(-1.5e-5), "-1.5E-5");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format!("{:?}", Value::Float(2.5e10)), "2.5E10");
    }
}
