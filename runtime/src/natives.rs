//! Built-in methods of the built-in classes.
//!
//! Natives take part in dispatch like declared methods, so a program
//! class that declares `toString()` overrides `Object.toString()`.
use std::sync::Arc;

use regex::Regex;

use crate::class::RuntimeClass;
use crate::error::RuntimeError;
use crate::interp::Interpreter;
use crate::meta::Callable;
use crate::value::Value;

pub type NativeFn = fn(&mut Interpreter<'_>, &Value, &[Value]) -> Result<Value, RuntimeError>;

pub(crate) struct Native {
    pub name: &'static str,
    /// `None` for variadic natives.
    pub arity: Option<usize>,
    pub f: NativeFn,
}

const fn native(name: &'static str, arity: usize, f: NativeFn) -> Native {
    Native {
        name,
        arity: Some(arity),
        f,
    }
}

const fn variadic(name: &'static str, f: NativeFn) -> Native {
    Native { name, arity: None, f }
}

pub(crate) fn natives_for(class: &str) -> &'static [Native] {
    match class {
        "Object" => OBJECT,
        "Number" => NUMBER,
        "Integer" => INTEGER,
        "Float" => FLOAT,
        "String" => STRING,
        "List" => LIST,
        "Closure" => CLOSURE,
        "Matcher" => MATCHER,
        "Class" => CLASS,
        "Throwable" => THROWABLE,
        _ => &[],
    }
}

const OBJECT: &[Native] = &[
    native("toString", 0, object_to_string),
    native("equals", 1, object_equals),
    native("hashCode", 0, object_hash_code),
    native("getClass", 0, object_get_class),
    native("is", 1, object_is),
    native("println", 0, object_println0),
    native("println", 1, object_println),
    native("print", 1, object_print),
    native("respondsTo", 1, object_responds_to),
    native("invokeMethod", 2, object_invoke_method),
];

const NUMBER: &[Native] = &[
    native("abs", 0, number_abs),
    native("intValue", 0, number_int_value),
    native("doubleValue", 0, number_double_value),
    native("compareTo", 1, number_compare_to),
];

const INTEGER: &[Native] = &[
    native("times", 1, integer_times),
    native("intdiv", 1, integer_intdiv),
];

const FLOAT: &[Native] = &[
    native("round", 0, float_round),
    native("floor", 0, float_floor),
    native("ceil", 0, float_ceil),
];

const STRING: &[Native] = &[
    native("size", 0, string_size),
    native("length", 0, string_size),
    native("isEmpty", 0, string_is_empty),
    native("getAt", 1, string_get_at),
    native("toUpperCase", 0, string_upper),
    native("toLowerCase", 0, string_lower),
    native("trim", 0, string_trim),
    native("reverse", 0, string_reverse),
    native("contains", 1, string_contains),
    native("startsWith", 1, string_starts_with),
    native("endsWith", 1, string_ends_with),
    native("indexOf", 1, string_index_of),
    native("substring", 1, string_substring_from),
    native("substring", 2, string_substring),
    native("replace", 2, string_replace),
    native("split", 1, string_split),
    native("matches", 1, string_matches),
    native("plus", 1, string_plus),
    native("compareTo", 1, string_compare_to),
    native("toInteger", 0, string_to_integer),
];

const LIST: &[Native] = &[
    native("size", 0, list_size),
    native("isEmpty", 0, list_is_empty),
    native("getAt", 1, list_get_at),
    native("putAt", 2, list_put_at),
    native("add", 1, list_add),
    native("first", 0, list_first),
    native("last", 0, list_last),
    native("contains", 1, list_contains),
    native("join", 0, list_join0),
    native("join", 1, list_join),
    native("plus", 1, list_plus),
    native("each", 1, list_each),
    native("eachWithIndex", 1, list_each_with_index),
    native("collect", 1, list_collect),
    native("findAll", 1, list_find_all),
    native("find", 1, list_find),
    native("inject", 2, list_inject),
];

const CLOSURE: &[Native] = &[
    variadic("call", closure_call),
    native("getMaximumNumberOfParameters", 0, closure_max_params),
];

const MATCHER: &[Native] = &[
    native("group", 0, matcher_group0),
    native("group", 1, matcher_group),
    native("getAt", 1, matcher_group),
    native("groupCount", 0, matcher_group_count),
    native("matches", 0, matcher_matches),
];

const CLASS: &[Native] = &[
    native("getName", 0, class_get_name),
    native("getSimpleName", 0, class_get_simple_name),
    native("getSuperclass", 0, class_get_superclass),
    native("isInstance", 1, class_is_instance),
    variadic("newInstance", class_new_instance),
    native("addMethod", 2, class_add_method),
    native("addPatternMethod", 2, class_add_pattern_method),
    native("removeMethod", 1, class_remove_method),
];

const THROWABLE: &[Native] = &[
    native("getMessage", 0, throwable_message),
    native("getCause", 0, throwable_cause),
];

fn arg(args: &[Value], idx: usize) -> Result<&Value, RuntimeError> {
    args.get(idx)
        .ok_or_else(|| RuntimeError::bug(format!("native called without argument {idx}")))
}

fn wrong_receiver(receiver: &Value, expected: &str) -> RuntimeError {
    RuntimeError::bug(format!("{expected} native called on {receiver:?}"))
}

fn illegal(interp: &Interpreter<'_>, text: impl Into<String>) -> RuntimeError {
    interp.raise("IllegalArgumentException", text)
}

fn int_arg(interp: &Interpreter<'_>, args: &[Value], idx: usize) -> Result<i64, RuntimeError> {
    match arg(args, idx)? {
        Value::Int(v) => Ok(*v),
        other => {
            let class = interp.type_name(other);
            Err(illegal(interp, format!("expected an Integer, got {class}")))
        }
    }
}

fn str_arg(interp: &mut Interpreter<'_>, args: &[Value], idx: usize) -> Result<Arc<str>, RuntimeError> {
    let value = arg(args, idx)?.clone();
    interp.to_string(&value)
}

/// Resolve a possibly negative index against `len`.
fn index_in(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

// ── Object ──────────────────────────────────────────────────────────

fn object_to_string(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    let text = match receiver {
        Value::List(items) => {
            let items = items.read().clone();
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(interp.to_string(item)?);
            }
            format!("[{}]", parts.join(", "))
        }
        Value::Object(o) if o.class().is_subclass_of("Throwable") => match o.field("message") {
            None | Some(Value::Null) => o.class().name().to_string(),
            Some(message) => format!("{}: {}", o.class().name(), interp.to_string(&message)?),
        },
        Value::Object(o) => format!("{}@{:x}", o.class().name(), receiver.identity_hash()),
        Value::Closure(_) => format!("Closure@{:x}", receiver.identity_hash()),
        Value::Matcher(m) => format!("Matcher[pattern={} input={}]", m.pattern, m.input),
        Value::Class(c) => format!("class {}", c.name()),
        scalar => return interp.to_string(scalar).map(Value::Str),
    };
    Ok(Value::str(text))
}

fn object_equals(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let other = arg(args, 0)?;
    let equal = match receiver {
        Value::Object(_) => receiver.same(other),
        _ => interp.equals(receiver, other)?,
    };
    Ok(Value::Bool(equal))
}

fn object_hash_code(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    let hash = match receiver {
        Value::Null => 0,
        Value::Bool(b) => if *b { 1231 } else { 1237 },
        Value::Int(v) => *v,
        Value::Float(v) => v.to_bits() as i64,
        Value::Str(s) => s
            .chars()
            .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
            .into(),
        Value::List(items) => {
            let items = items.read().clone();
            let mut hash = 1i64;
            for item in &items {
                let h = object_hash_code(interp, item, &[])?.as_int().unwrap_or(0);
                hash = hash.wrapping_mul(31).wrapping_add(h);
            }
            hash
        }
        other => other.identity_hash(),
    };
    Ok(Value::Int(hash))
}

fn object_get_class(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Class(interp.runtime().class_of(receiver)))
}

fn object_is(_: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(receiver.same(arg(args, 0)?)))
}

fn object_println0(interp: &mut Interpreter<'_>, _: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    interp.runtime().output().write("\n");
    Ok(Value::Null)
}

fn object_println(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut text = str_arg(interp, args, 0)?.to_string();
    text.push('\n');
    interp.runtime().output().write(&text);
    Ok(Value::Null)
}

fn object_print(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = str_arg(interp, args, 0)?;
    interp.runtime().output().write(&text);
    Ok(Value::Null)
}

fn object_responds_to(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let name = str_arg(interp, args, 0)?;
    let (class, is_static) = match receiver {
        Value::Class(c) => (c.clone(), true),
        other => (interp.runtime().class_of(other), false),
    };
    let meta = interp.runtime().metaclass(&class);
    let declared = meta
        .declared(&name)
        .iter()
        .any(|m| !is_static || m.is_static);
    let dynamic = RuntimeClass::ancestors(&class).any(|c| {
        let meta = interp.runtime().metaclass(&c);
        meta.dynamic_method(&name).is_some() || meta.pattern_method(&name).is_some()
    });
    Ok(Value::Bool(declared || dynamic))
}

fn object_invoke_method(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let name = str_arg(interp, args, 0)?;
    let call_args = match arg(args, 1)? {
        Value::List(items) => items.read().clone(),
        Value::Null => Vec::new(),
        single => vec![single.clone()],
    };
    interp.call_method(receiver, &name, &call_args)
}

// ── Numbers ─────────────────────────────────────────────────────────

fn number_abs(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Int(v) => v
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| interp.raise("ArithmeticException", format!("integer overflow in abs({v})"))),
        Value::Float(v) => Ok(Value::Float(v.abs())),
        other => Err(wrong_receiver(other, "Number")),
    }
}

fn number_int_value(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Float(v) => Ok(Value::Int(v.trunc() as i64)),
        other => Err(wrong_receiver(other, "Number")),
    }
}

fn number_double_value(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Int(v) => Ok(Value::Float(*v as f64)),
        Value::Float(v) => Ok(Value::Float(*v)),
        other => Err(wrong_receiver(other, "Number")),
    }
}

fn number_compare_to(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let other = arg(args, 0)?;
    if !matches!(other, Value::Int(_) | Value::Float(_)) {
        let class = interp.type_name(other);
        return Err(illegal(interp, format!("cannot compare a number with {class}")));
    }
    let ordering = interp.compare(receiver, other)?;
    Ok(Value::Int(ordering as i64))
}

fn integer_times(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let n = receiver.as_int().ok_or_else(|| wrong_receiver(receiver, "Integer"))?;
    let body = arg(args, 0)?;
    for i in 0..n {
        interp.call_value(body, &[Value::Int(i)])?;
    }
    Ok(Value::Null)
}

fn integer_intdiv(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let x = receiver.as_int().ok_or_else(|| wrong_receiver(receiver, "Integer"))?;
    let y = int_arg(interp, args, 0)?;
    if y == 0 {
        return Err(interp.raise("ArithmeticException", "Division by zero"));
    }
    x.checked_div(y)
        .map(Value::Int)
        .ok_or_else(|| interp.raise("ArithmeticException", format!("integer overflow in {x}.intdiv({y})")))
}

fn float_of(receiver: &Value) -> Result<f64, RuntimeError> {
    match receiver {
        Value::Float(v) => Ok(*v),
        other => Err(wrong_receiver(other, "Float")),
    }
}

fn float_round(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Int((float_of(receiver)? + 0.5).floor() as i64))
}

fn float_floor(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float(float_of(receiver)?.floor()))
}

fn float_ceil(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float(float_of(receiver)?.ceil()))
}

// ── String ──────────────────────────────────────────────────────────

fn string_of(receiver: &Value) -> Result<&str, RuntimeError> {
    receiver.as_str().ok_or_else(|| wrong_receiver(receiver, "String"))
}

fn string_size(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Int(string_of(receiver)?.chars().count() as i64))
}

fn string_is_empty(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(string_of(receiver)?.is_empty()))
}

fn string_get_at(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = string_of(receiver)?;
    let index = int_arg(interp, args, 0)?;
    let chars: Vec<char> = s.chars().collect();
    match index_in(index, chars.len()) {
        Some(i) => Ok(Value::str(chars[i].to_string())),
        None => Err(illegal(interp, format!("String index out of range: {index}"))),
    }
}

fn string_upper(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::str(string_of(receiver)?.to_uppercase()))
}

fn string_lower(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::str(string_of(receiver)?.to_lowercase()))
}

fn string_trim(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::str(string_of(receiver)?.trim()))
}

fn string_reverse(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::str(string_of(receiver)?.chars().rev().collect::<String>()))
}

fn string_contains(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let needle = str_arg(interp, args, 0)?;
    Ok(Value::Bool(string_of(receiver)?.contains(&*needle)))
}

fn string_starts_with(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let prefix = str_arg(interp, args, 0)?;
    Ok(Value::Bool(string_of(receiver)?.starts_with(&*prefix)))
}

fn string_ends_with(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let suffix = str_arg(interp, args, 0)?;
    Ok(Value::Bool(string_of(receiver)?.ends_with(&*suffix)))
}

fn string_index_of(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let needle = str_arg(interp, args, 0)?;
    let s = string_of(receiver)?;
    let index = s.find(&*needle).map_or(-1, |byte| s[..byte].chars().count() as i64);
    Ok(Value::Int(index))
}

fn substring(interp: &Interpreter<'_>, s: &str, start: i64, end: Option<i64>) -> Result<Value, RuntimeError> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let end = end.unwrap_or(len);
    if start < 0 || end > len || start > end {
        return Err(illegal(interp, format!("substring range {start}..{end} out of bounds for length {len}")));
    }
    Ok(Value::str(chars[start as usize..end as usize].iter().collect::<String>()))
}

fn string_substring_from(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let start = int_arg(interp, args, 0)?;
    substring(interp, string_of(receiver)?, start, None)
}

fn string_substring(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let start = int_arg(interp, args, 0)?;
    let end = int_arg(interp, args, 1)?;
    substring(interp, string_of(receiver)?, start, Some(end))
}

fn string_replace(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let from = str_arg(interp, args, 0)?;
    let to = str_arg(interp, args, 1)?;
    Ok(Value::str(string_of(receiver)?.replace(&*from, &to)))
}

fn compile_regex(interp: &Interpreter<'_>, pattern: &str) -> Result<Regex, RuntimeError> {
    Regex::new(pattern).map_err(|e| illegal(interp, format!("invalid pattern /{pattern}/: {e}")))
}

fn string_split(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let pattern = str_arg(interp, args, 0)?;
    let re = compile_regex(interp, &pattern)?;
    let parts = re.split(string_of(receiver)?).map(Value::from).collect();
    Ok(Value::list(parts))
}

fn string_matches(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let pattern = str_arg(interp, args, 0)?;
    let re = compile_regex(interp, &format!("^(?:{pattern})$"))?;
    Ok(Value::Bool(re.is_match(string_of(receiver)?)))
}

fn string_plus(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut text = string_of(receiver)?.to_string();
    text.push_str(&str_arg(interp, args, 0)?);
    Ok(Value::str(text))
}

fn string_compare_to(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let other = str_arg(interp, args, 0)?;
    Ok(Value::Int(string_of(receiver)?.cmp(&other) as i64))
}

fn string_to_integer(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    let s = string_of(receiver)?;
    s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| illegal(interp, format!("not an integer: \"{s}\"")))
}

// ── List ────────────────────────────────────────────────────────────

fn list_items(receiver: &Value) -> Result<Vec<Value>, RuntimeError> {
    match receiver {
        Value::List(items) => Ok(items.read().clone()),
        other => Err(wrong_receiver(other, "List")),
    }
}

fn list_size(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::List(items) => Ok(Value::Int(items.read().len() as i64)),
        other => Err(wrong_receiver(other, "List")),
    }
}

fn list_is_empty(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::List(items) => Ok(Value::Bool(items.read().is_empty())),
        other => Err(wrong_receiver(other, "List")),
    }
}

/// Negative indices count from the end; out of range reads are null.
fn list_get_at(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let index = int_arg(interp, args, 0)?;
    match receiver {
        Value::List(items) => {
            let items = items.read();
            Ok(index_in(index, items.len()).map_or(Value::Null, |i| items[i].clone()))
        }
        other => Err(wrong_receiver(other, "List")),
    }
}

/// Writes past the end grow the list with nulls.
fn list_put_at(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let index = int_arg(interp, args, 0)?;
    let value = arg(args, 1)?.clone();
    let Value::List(items) = receiver else {
        return Err(wrong_receiver(receiver, "List"));
    };
    let mut items = items.write();
    let len = items.len();
    let slot = if index < 0 {
        index_in(index, len)
    } else {
        usize::try_from(index).ok()
    };
    let Some(slot) = slot else {
        drop(items);
        return Err(illegal(interp, format!("negative index {index} out of range for size {len}")));
    };
    if slot >= items.len() {
        items.resize(slot + 1, Value::Null);
    }
    items[slot] = value.clone();
    Ok(value)
}

fn list_add(_: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::List(items) => {
            items.write().push(arg(args, 0)?.clone());
            Ok(Value::Bool(true))
        }
        other => Err(wrong_receiver(other, "List")),
    }
}

fn list_first(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(list_items(receiver)?.first().cloned().unwrap_or(Value::Null))
}

fn list_last(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(list_items(receiver)?.last().cloned().unwrap_or(Value::Null))
}

fn list_contains(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let needle = arg(args, 0)?;
    for item in &list_items(receiver)? {
        if interp.equals(item, needle)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn join(interp: &mut Interpreter<'_>, receiver: &Value, separator: &str) -> Result<Value, RuntimeError> {
    let mut parts = Vec::new();
    for item in &list_items(receiver)? {
        parts.push(interp.to_string(item)?);
    }
    Ok(Value::str(parts.join(separator)))
}

fn list_join0(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    join(interp, receiver, "")
}

fn list_join(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let separator = str_arg(interp, args, 0)?;
    join(interp, receiver, &separator)
}

fn list_plus(_: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = list_items(receiver)?;
    match arg(args, 0)? {
        Value::List(more) => out.extend(more.read().iter().cloned()),
        single => out.push(single.clone()),
    }
    Ok(Value::list(out))
}

fn list_each(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let body = arg(args, 0)?;
    for item in list_items(receiver)? {
        interp.call_value(body, &[item])?;
    }
    Ok(receiver.clone())
}

fn list_each_with_index(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let body = arg(args, 0)?;
    for (i, item) in list_items(receiver)?.into_iter().enumerate() {
        interp.call_value(body, &[item, Value::Int(i as i64)])?;
    }
    Ok(receiver.clone())
}

fn list_collect(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let body = arg(args, 0)?;
    let mut out = Vec::new();
    for item in list_items(receiver)? {
        out.push(interp.call_value(body, &[item])?);
    }
    Ok(Value::list(out))
}

fn list_find_all(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let body = arg(args, 0)?;
    let mut out = Vec::new();
    for item in list_items(receiver)? {
        if interp.call_value(body, std::slice::from_ref(&item))?.truthy() {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn list_find(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let body = arg(args, 0)?;
    for item in list_items(receiver)? {
        if interp.call_value(body, std::slice::from_ref(&item))?.truthy() {
            return Ok(item);
        }
    }
    Ok(Value::Null)
}

fn list_inject(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut acc = arg(args, 0)?.clone();
    let body = arg(args, 1)?;
    for item in list_items(receiver)? {
        acc = interp.call_value(body, &[acc, item])?;
    }
    Ok(acc)
}

// ── Closure ─────────────────────────────────────────────────────────

fn closure_call(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Closure(c) => interp.call_closure(c, args),
        other => Err(wrong_receiver(other, "Closure")),
    }
}

fn closure_max_params(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Closure(c) => Ok(Value::Int(c.param_count() as i64)),
        other => Err(wrong_receiver(other, "Closure")),
    }
}

// ── Matcher ─────────────────────────────────────────────────────────

fn matcher_group_at(interp: &Interpreter<'_>, receiver: &Value, idx: i64) -> Result<Value, RuntimeError> {
    let Value::Matcher(m) = receiver else {
        return Err(wrong_receiver(receiver, "Matcher"));
    };
    if !m.matched() {
        return Err(interp.raise("IllegalStateException", "No match found"));
    }
    match usize::try_from(idx).ok().filter(|i| *i <= m.group_count()) {
        Some(i) => Ok(m.group(i).map_or(Value::Null, Value::from)),
        None => Err(illegal(interp, format!("No group {idx}"))),
    }
}

fn matcher_group0(interp: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    matcher_group_at(interp, receiver, 0)
}

fn matcher_group(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let idx = int_arg(interp, args, 0)?;
    matcher_group_at(interp, receiver, idx)
}

fn matcher_group_count(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Matcher(m) => Ok(Value::Int(m.group_count() as i64)),
        other => Err(wrong_receiver(other, "Matcher")),
    }
}

fn matcher_matches(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Matcher(m) => Ok(Value::Bool(m.matched())),
        other => Err(wrong_receiver(other, "Matcher")),
    }
}

// ── Class ───────────────────────────────────────────────────────────

fn class_of(receiver: &Value) -> Result<&Arc<RuntimeClass>, RuntimeError> {
    match receiver {
        Value::Class(c) => Ok(c),
        other => Err(wrong_receiver(other, "Class")),
    }
}

fn class_get_name(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Str(class_of(receiver)?.name_arc().clone()))
}

fn class_get_simple_name(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::str(class_of(receiver)?.simple_name()))
}

fn class_get_superclass(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(class_of(receiver)?
        .superclass()
        .map_or(Value::Null, |s| Value::Class(s.clone())))
}

fn class_is_instance(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = class_of(receiver)?;
    let value = arg(args, 0)?;
    Ok(Value::Bool(
        !value.is_null() && interp.runtime().class_of(value).is_subclass_of(class.name()),
    ))
}

fn class_new_instance(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = class_of(receiver)?.clone();
    interp.instantiate(&class, args)
}

fn closure_arg(interp: &Interpreter<'_>, args: &[Value], idx: usize) -> Result<Callable, RuntimeError> {
    match arg(args, idx)? {
        Value::Closure(c) => Ok(Callable::Closure(c.clone())),
        other => {
            let class = interp.type_name(other);
            Err(illegal(interp, format!("expected a Closure, got {class}")))
        }
    }
}

fn class_add_method(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = class_of(receiver)?;
    let name = str_arg(interp, args, 0)?;
    let body = closure_arg(interp, args, 1)?;
    interp.runtime().add_method_to(class, &name, body);
    Ok(Value::Null)
}

fn class_add_pattern_method(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = class_of(receiver)?;
    let pattern = str_arg(interp, args, 0)?;
    let body = closure_arg(interp, args, 1)?;
    interp.runtime().add_pattern_method_to(class, &pattern, body)?;
    Ok(Value::Null)
}

fn class_remove_method(interp: &mut Interpreter<'_>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = class_of(receiver)?;
    let name = str_arg(interp, args, 0)?;
    Ok(Value::Bool(interp.runtime().remove_method_from(class, &name)))
}

// ── Throwable ───────────────────────────────────────────────────────

fn throwable_field(receiver: &Value, name: &str) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Object(o) => Ok(o.field(name).unwrap_or(Value::Null)),
        other => Err(wrong_receiver(other, "Throwable")),
    }
}

fn throwable_message(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    throwable_field(receiver, "message")
}

fn throwable_cause(_: &mut Interpreter<'_>, receiver: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    throwable_field(receiver, "cause")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indices_count_from_the_end() {
        assert_eq!(index_in(0, 3), Some(0));
        assert_eq!(index_in(-1, 3), Some(2));
        assert_eq!(index_in(-3, 3), Some(0));
        assert_eq!(index_in(-4, 3), None);
        assert_eq!(index_in(3, 3), None);
    }

    #[test]
    fn every_builtin_with_natives_exists() {
        for name in ["Object", "Number", "Integer", "Float", "String", "List", "Closure", "Matcher", "Class", "Throwable"] {
            assert!(bytecode::builtins::is_builtin(name), "{name}");
            assert!(!natives_for(name).is_empty(), "{name}");
        }
        assert!(natives_for("Widget").is_empty());
    }
}
