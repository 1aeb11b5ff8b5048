//! The bytecode interpreter.
//!
//! An accumulator machine with one register file per activation. Each
//! body runs in its own [`Interpreter::execute`] call, so nested calls
//! nest on the Rust stack and are bounded by
//! [`RuntimeConfig::max_call_depth`](crate::RuntimeConfig).
//!
//! Errors unwind through the exception table of every active body: the
//! first handler whose range covers the faulting instruction and whose
//! type matches receives the exception object and execution resumes at
//! its target.
use std::sync::Arc;

use bytecode::{BytecodeDecoder, CaptureFrom, CodeDesc, Constant, Handler, Instruction};

use crate::Runtime;
use crate::class::{Body, RuntimeClass};
use crate::dispatch::coerce_args;
use crate::error::RuntimeError;
use crate::value::{Cell, Closure, Object, Value, format_float, new_cell};

enum Flow {
    Continue,
    Return,
}

struct Frame<'f> {
    /// Class whose closure table this body indexes.
    class: &'f Arc<RuntimeClass>,
    body: &'f Body,
    this: Value,
    regs: Vec<Value>,
    cells: Vec<Option<Cell>>,
    captures: &'f [Cell],
}

impl<'f> Frame<'f> {
    fn bad_register(&self, reg: usize) -> RuntimeError {
        RuntimeError::bug(format!(
            "{}.{}: register r{reg} out of range ({} registers)",
            self.body.owner,
            self.body.name,
            self.regs.len()
        ))
    }

    fn reg(&self, reg: u16) -> Result<&Value, RuntimeError> {
        let idx = usize::from(reg);
        self.regs.get(idx).ok_or_else(|| self.bad_register(idx))
    }

    fn set(&mut self, reg: u16, value: Value) -> Result<(), RuntimeError> {
        let idx = usize::from(reg);
        match self.regs.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.bad_register(idx)),
        }
    }

    fn regs(&self, start: usize, count: usize) -> Result<&[Value], RuntimeError> {
        self.regs
            .get(start..start + count)
            .ok_or_else(|| self.bad_register(start + count))
    }

    fn cell(&self, reg: u16) -> Result<&Cell, RuntimeError> {
        self.cells
            .get(usize::from(reg))
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                RuntimeError::bug(format!(
                    "{}.{}: register r{reg} holds no cell",
                    self.body.owner, self.body.name
                ))
            })
    }

    fn capture(&self, idx: u16) -> Result<&Cell, RuntimeError> {
        self.captures.get(usize::from(idx)).ok_or_else(|| {
            RuntimeError::bug(format!(
                "{}.{}: capture ^{idx} out of range",
                self.body.owner, self.body.name
            ))
        })
    }

    fn name(&self, idx: u16) -> Result<&'f Arc<str>, RuntimeError> {
        let body: &'f Body = self.body;
        body.code.name(idx).ok_or_else(|| {
            RuntimeError::bug(format!(
                "{}.{}: constant #{idx} is not a name",
                body.owner, body.name
            ))
        })
    }
}

fn jump(decoder: &mut BytecodeDecoder<'_>, offset: i16) -> Result<(), RuntimeError> {
    let target = decoder.offset() as i64 + i64::from(offset);
    let target = usize::try_from(target).map_err(|_| RuntimeError::bug(format!("jump to {target}")))?;
    decoder.seek(target);
    Ok(())
}

/// `get` + `name` with the first letter capitalized.
pub(crate) fn accessor(prefix: &str, name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

/// Runs code against a [`Runtime`]. Cheap to create; natives and host
/// callbacks receive the interpreter that called them.
pub struct Interpreter<'rt> {
    pub(crate) rt: &'rt Runtime,
    depth: usize,
}

impl<'rt> Interpreter<'rt> {
    pub(crate) fn new(rt: &'rt Runtime) -> Self {
        Self { rt, depth: 0 }
    }

    pub fn runtime(&self) -> &'rt Runtime {
        self.rt
    }

    /// Number of active bodies.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A new exception object of class `class` as an error.
    pub fn raise(&self, class: &str, message: impl Into<String>) -> RuntimeError {
        match self.new_exception(class, Value::str(message.into()), Value::Null) {
            Ok(value) => RuntimeError::Thrown(value),
            Err(e) => e,
        }
    }

    fn new_exception(&self, class: &str, message: Value, cause: Value) -> Result<Value, RuntimeError> {
        let class = self
            .rt
            .class(class)
            .ok_or_else(|| RuntimeError::ClassNotFound(class.into()))?;
        let object = Object::new(class);
        object.set_field("message", message);
        object.set_field("cause", cause);
        Ok(Value::Object(Arc::new(object)))
    }

    pub(crate) fn missing_property(&self, name: &str, target: &Value) -> RuntimeError {
        let class = self.type_name(target);
        self.raise(
            "MissingPropertyException",
            format!("No such property: {name} for class: {class}"),
        )
    }

    /// Class name of a value as error messages show it.
    pub fn type_name(&self, value: &Value) -> Arc<str> {
        match value {
            Value::Null => "null".into(),
            other => self.rt.class_of(other).name_arc().clone(),
        }
    }

    pub(crate) fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>, RuntimeError> {
        self.rt
            .class(name)
            .ok_or_else(|| RuntimeError::ClassNotFound(name.into()))
    }

    /// Run pending static initializers of `class` and its superclasses,
    /// root first.
    pub(crate) fn ensure_initialized(&mut self, class: &Arc<RuntimeClass>) -> Result<(), RuntimeError> {
        let chain: Vec<_> = RuntimeClass::ancestors(class).collect();
        for c in chain.iter().rev() {
            if let Some(init) = c.begin_init() {
                log::debug!("initializing {}", c.name());
                let result = self.execute(c, &init, Value::Class(c.clone()), &[], &[]);
                c.finish_init();
                result?;
            }
        }
        Ok(())
    }

    /// Run one body to completion.
    pub(crate) fn execute(
        &mut self,
        class: &Arc<RuntimeClass>,
        body: &Body,
        this: Value,
        args: &[Value],
        captures: &[Cell],
    ) -> Result<Value, RuntimeError> {
        if self.depth >= self.rt.config().max_call_depth {
            return Err(RuntimeError::StackOverflow);
        }
        let params = usize::from(body.code.param_count);
        if args.len() > params {
            return Err(RuntimeError::bug(format!(
                "{}.{} takes {params} arguments, got {}",
                body.owner,
                body.name,
                args.len()
            )));
        }
        let size = usize::from(body.code.register_count).max(params);
        let mut regs = vec![Value::Null; size];
        regs[..args.len()].clone_from_slice(args);
        let mut frame = Frame {
            class,
            body,
            this,
            regs,
            cells: vec![None; size],
            captures,
        };
        self.depth += 1;
        let result = self.run(&mut frame);
        self.depth -= 1;
        if let Err(e) = &result {
            log::trace!("{}.{} unwinding: {e}", body.owner, body.name);
        }
        result
    }

    fn run(&mut self, frame: &mut Frame<'_>) -> Result<Value, RuntimeError> {
        let body = frame.body;
        let mut decoder = BytecodeDecoder::new(&body.code.code);
        let mut acc = Value::Null;
        loop {
            let pc = decoder.offset();
            let instr = match decoder.decode_next() {
                Some(Ok(instr)) => instr,
                Some(Err(e)) => {
                    return Err(RuntimeError::bug(format!("{}.{}: {e}", body.owner, body.name)));
                }
                None => return Ok(acc),
            };
            match self.step(frame, instr, &mut acc, &mut decoder) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return) => return Ok(acc),
                Err(err) => match self.handler_for(&body.code, pc as u32, &err) {
                    Some(handler) => {
                        log::trace!(
                            "{}.{}: caught at {pc}, resuming at {}",
                            body.owner,
                            body.name,
                            handler.target
                        );
                        let exception = self.exception_value(err)?;
                        frame.set(handler.exception_reg, exception.clone())?;
                        acc = exception;
                        decoder.seek(handler.target as usize);
                    }
                    None => return Err(err),
                },
            }
        }
    }

    fn step(
        &mut self,
        frame: &mut Frame<'_>,
        instr: Instruction,
        acc: &mut Value,
        decoder: &mut BytecodeDecoder<'_>,
    ) -> Result<Flow, RuntimeError> {
        match instr {
            Instruction::LoadConstant { idx } => {
                *acc = match frame.body.code.constant(idx) {
                    Some(Constant::Int(v)) => Value::Int(*v),
                    Some(Constant::Float(v)) => Value::Float(*v),
                    Some(Constant::Str(s)) => Value::Str(s.clone()),
                    None => return Err(RuntimeError::bug(format!("missing constant #{idx}"))),
                };
            }
            Instruction::LoadSmi { value } => *acc = Value::Int(i64::from(value)),
            Instruction::LoadNull => *acc = Value::Null,
            Instruction::LoadTrue => *acc = Value::Bool(true),
            Instruction::LoadFalse => *acc = Value::Bool(false),
            Instruction::LoadThis => *acc = frame.this.clone(),
            Instruction::LoadLocal { reg } => *acc = frame.reg(reg)?.clone(),
            Instruction::StoreLocal { reg } => frame.set(reg, acc.clone())?,
            Instruction::Mov { dst, src } => {
                let value = frame.reg(src)?.clone();
                frame.set(dst, value)?;
            }
            Instruction::MakeCell { reg } => {
                let idx = usize::from(reg);
                match frame.cells.get_mut(idx) {
                    Some(slot) => *slot = Some(new_cell(acc.clone())),
                    None => return Err(frame.bad_register(idx)),
                }
            }
            Instruction::LoadCell { reg } => *acc = frame.cell(reg)?.lock().clone(),
            Instruction::StoreCell { reg } => *frame.cell(reg)?.lock() = acc.clone(),
            Instruction::LoadCapture { idx } => *acc = frame.capture(idx)?.lock().clone(),
            Instruction::StoreCapture { idx } => *frame.capture(idx)?.lock() = acc.clone(),
            Instruction::LoadField { name_idx } => {
                let name = frame.name(name_idx)?;
                *acc = self.get_property(&frame.this, name)?;
            }
            Instruction::StoreField { name_idx } => {
                let name = frame.name(name_idx)?;
                self.set_property(&frame.this, name, acc.clone())?;
            }
            Instruction::LoadStatic { class_idx, name_idx } => {
                let class = self.load_class(frame.name(class_idx)?)?;
                let name = frame.name(name_idx)?;
                self.ensure_initialized(&class)?;
                *acc = match class.static_field(name) {
                    Some(v) => v,
                    None => return Err(self.missing_property(name, &Value::Class(class))),
                };
            }
            Instruction::StoreStatic { class_idx, name_idx } => {
                let class = self.load_class(frame.name(class_idx)?)?;
                let name = frame.name(name_idx)?;
                self.ensure_initialized(&class)?;
                if !class.set_static_field(name, acc.clone()) {
                    return Err(self.missing_property(name, &Value::Class(class)));
                }
            }
            Instruction::LoadDynamic { name_idx } => {
                let name = frame.name(name_idx)?;
                *acc = self.load_dynamic(&frame.this, name)?;
            }
            Instruction::StoreDynamic { name_idx } => {
                let name = frame.name(name_idx)?;
                self.store_dynamic(&frame.this, name, acc.clone())?;
            }
            Instruction::LoadClass { name_idx } => {
                *acc = Value::Class(self.load_class(frame.name(name_idx)?)?);
            }
            Instruction::GetProperty { name_idx } => {
                let value = self.get_property(acc, frame.name(name_idx)?)?;
                *acc = value;
            }
            Instruction::SafeGetProperty { name_idx } => {
                if !acc.is_null() {
                    let value = self.get_property(acc, frame.name(name_idx)?)?;
                    *acc = value;
                }
            }
            Instruction::SetProperty { name_idx, reg } => {
                let target = frame.reg(reg)?.clone();
                self.set_property(&target, frame.name(name_idx)?, acc.clone())?;
            }
            Instruction::GetIndex { reg } => {
                let target = frame.reg(reg)?.clone();
                let index = acc.clone();
                *acc = self.dispatch(&target, "getAt", &[index], None)?;
            }
            Instruction::SetIndex { reg, index_reg } => {
                let target = frame.reg(reg)?.clone();
                let index = frame.reg(index_reg)?.clone();
                self.dispatch(&target, "putAt", &[index, acc.clone()], None)?;
            }
            Instruction::Call {
                name_idx,
                reg,
                argc,
                site,
            } => *acc = self.call(frame, name_idx, reg, argc, site, false)?,
            Instruction::SafeCall {
                name_idx,
                reg,
                argc,
                site,
            } => *acc = self.call(frame, name_idx, reg, argc, site, true)?,
            Instruction::New { class_idx, reg, argc } => {
                let class = self.load_class(frame.name(class_idx)?)?;
                let args = frame.regs(usize::from(reg), usize::from(argc))?.to_vec();
                *acc = self.instantiate(&class, &args)?;
            }
            Instruction::Binary { op, reg } => {
                let lhs = frame.reg(reg)?.clone();
                let value = self.binary(op, &lhs, acc)?;
                *acc = value;
            }
            Instruction::InstanceOf { class_idx } => {
                let name = frame.name(class_idx)?;
                *acc = Value::Bool(!acc.is_null() && self.rt.class_of(acc).is_subclass_of(name));
            }
            Instruction::CheckCast { class_idx } => {
                let value = self.check_cast(acc, frame.name(class_idx)?)?;
                *acc = value;
            }
            Instruction::Not => *acc = Value::Bool(!acc.truthy()),
            Instruction::Neg => {
                let value = self.negate(acc)?;
                *acc = value;
            }
            Instruction::MakeList { reg, count } => {
                *acc = Value::list(frame.regs(usize::from(reg), usize::from(count))?.to_vec());
            }
            Instruction::MakeGString { reg, count } => {
                let parts = frame.regs(usize::from(reg), usize::from(count))?.to_vec();
                let mut text = String::new();
                for part in &parts {
                    text.push_str(&self.to_string(part)?);
                }
                *acc = Value::str(text);
            }
            Instruction::MakeClosure { idx } => *acc = make_closure(frame, idx)?,
            Instruction::Jump { offset } => jump(decoder, offset)?,
            Instruction::JumpIfTrue { offset } => {
                if acc.truthy() {
                    jump(decoder, offset)?;
                }
            }
            Instruction::JumpIfFalse { offset } => {
                if !acc.truthy() {
                    jump(decoder, offset)?;
                }
            }
            Instruction::Throw => return Err(self.throw_value(acc.clone())),
            Instruction::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Continue)
    }

    fn call(
        &mut self,
        frame: &Frame<'_>,
        name_idx: u16,
        reg: u16,
        argc: u8,
        site: u16,
        safe: bool,
    ) -> Result<Value, RuntimeError> {
        let name = frame.name(name_idx)?;
        let receiver = frame.reg(reg)?;
        if safe && receiver.is_null() {
            return Ok(Value::Null);
        }
        let args = frame.regs(usize::from(reg) + 1, usize::from(argc))?;
        let site = frame.body.call_site(site);
        self.dispatch(receiver, name, args, site)
    }

    fn throw_value(&self, value: Value) -> RuntimeError {
        match &value {
            Value::Null => self.raise("NullPointerException", "Cannot throw null"),
            Value::Object(o) if o.class().is_subclass_of("Throwable") => RuntimeError::Thrown(value),
            other => {
                let class = self.type_name(other);
                self.raise(
                    "ClassCastException",
                    format!("Cannot throw an instance of {class}, it is not a Throwable"),
                )
            }
        }
    }

    /// The class a `catch` clause tests an error against.
    fn error_class(&self, err: &RuntimeError) -> Option<Arc<RuntimeClass>> {
        match err {
            RuntimeError::Thrown(Value::Object(o)) => Some(o.class().clone()),
            RuntimeError::PatternMethodFailed { source, .. } => self.error_class(source),
            other => self.rt.class(other.exception_class()?),
        }
    }

    fn handler_for(&self, code: &CodeDesc, pc: u32, err: &RuntimeError) -> Option<Handler> {
        if err.is_bug() {
            return None;
        }
        let thrown = self.error_class(err);
        code.handlers
            .iter()
            .find(|h| {
                h.covers(pc)
                    && match h.catch_type {
                        None => true,
                        Some(idx) => match (code.name(idx), &thrown) {
                            (Some(ty), Some(class)) => class.is_subclass_of(ty),
                            _ => false,
                        },
                    }
            })
            .copied()
    }

    /// The exception object a program sees for `err`.
    pub(crate) fn exception_value(&mut self, err: RuntimeError) -> Result<Value, RuntimeError> {
        let message = err.to_string();
        match err {
            RuntimeError::Thrown(value) => Ok(value),
            e @ RuntimeError::Bug(_) => Err(e),
            RuntimeError::PatternMethodFailed { source, .. } => {
                let cause = self.exception_value(*source)?;
                let class = match &cause {
                    Value::Object(o) => o.class().clone(),
                    _ => self.load_class("MissingMethodException")?,
                };
                let object = Object::new(class);
                object.set_field("message", Value::str(message));
                object.set_field("cause", cause);
                Ok(Value::Object(Arc::new(object)))
            }
            other => {
                let class = other.exception_class().unwrap_or("RuntimeException");
                self.new_exception(class, Value::str(message), Value::Null)
            }
        }
    }

    pub fn get_property(&mut self, target: &Value, name: &str) -> Result<Value, RuntimeError> {
        match target {
            Value::Null => {
                return Err(self.raise(
                    "NullPointerException",
                    format!("Cannot get property '{name}' on null object"),
                ));
            }
            Value::Object(o) => {
                if let Some(value) = o.field(name) {
                    return Ok(value);
                }
            }
            Value::Class(c) => {
                if c.static_owner(name).is_some() {
                    self.ensure_initialized(c)?;
                    return Ok(c.static_field(name).unwrap_or(Value::Null));
                }
                match name {
                    "name" => return Ok(Value::Str(c.name_arc().clone())),
                    "simpleName" => return Ok(Value::str(c.simple_name())),
                    _ => {}
                }
            }
            _ => {}
        }
        for prefix in ["get", "is"] {
            let getter = accessor(prefix, name);
            if self.responds_to(target, &getter, &[]) {
                return self.dispatch(target, &getter, &[], None);
            }
        }
        Err(self.missing_property(name, target))
    }

    pub fn set_property(&mut self, target: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        match target {
            Value::Null => {
                return Err(self.raise(
                    "NullPointerException",
                    format!("Cannot set property '{name}' on null object"),
                ));
            }
            Value::Object(o) => {
                if o.has_field(name) {
                    o.set_field(name, value);
                    return Ok(());
                }
            }
            Value::Class(c) => {
                if c.static_owner(name).is_some() {
                    self.ensure_initialized(c)?;
                    c.set_static_field(name, value);
                    return Ok(());
                }
            }
            _ => {}
        }
        let setter = accessor("set", name);
        let args = [value];
        if self.responds_to(target, &setter, &args) {
            self.dispatch(target, &setter, &args, None)?;
            return Ok(());
        }
        Err(self.missing_property(name, target))
    }

    /// A name with no static binding: a property of `this`, then a
    /// variable of the script binding.
    fn load_dynamic(&mut self, this: &Value, name: &str) -> Result<Value, RuntimeError> {
        match this {
            Value::Object(o) if o.has_field(name) => return self.get_property(this, name),
            Value::Class(c) if c.static_owner(name).is_some() => return self.get_property(this, name),
            _ => {}
        }
        if let Some(value) = self.rt.variable(name) {
            return Ok(value);
        }
        if !this.is_null() {
            return self.get_property(this, name);
        }
        Err(self.missing_property(name, this))
    }

    fn store_dynamic(&mut self, this: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        match this {
            Value::Object(o) if o.has_field(name) => self.set_property(this, name, value),
            Value::Class(c) if c.static_owner(name).is_some() => self.set_property(this, name, value),
            _ => {
                self.rt.set_variable(name, value);
                Ok(())
            }
        }
    }

    /// Conversion for typed declarations: `null` always passes, integers
    /// widen to floats and anything becomes a string.
    fn check_cast(&mut self, value: &Value, target: &str) -> Result<Value, RuntimeError> {
        match (value, target) {
            (Value::Null, _) | (_, "Object") => Ok(value.clone()),
            (Value::Int(v), "Float") => Ok(Value::Float(*v as f64)),
            (Value::Str(_), "String") => Ok(value.clone()),
            (_, "String") => Ok(Value::Str(self.to_string(value)?)),
            _ if self.rt.class_of(value).is_subclass_of(target) => Ok(value.clone()),
            _ => {
                let shown = self.to_string(value)?;
                let class = self.type_name(value);
                Err(self.raise(
                    "ClassCastException",
                    format!("Cannot cast object '{shown}' with class '{class}' to class '{target}'"),
                ))
            }
        }
    }

    /// `new C(args)`: static initialization, instance initializers from
    /// the root class down, then the best matching constructor.
    pub fn instantiate(&mut self, class: &Arc<RuntimeClass>, args: &[Value]) -> Result<Value, RuntimeError> {
        self.ensure_initialized(class)?;
        if class.is_builtin() {
            return self.instantiate_builtin(class, args);
        }
        let object = Value::Object(Arc::new(Object::new(class.clone())));
        let chain: Vec<_> = RuntimeClass::ancestors(class).collect();
        for c in chain.iter().rev() {
            if let Some(init) = &c.initializer {
                self.execute(c, init, object.clone(), &[], &[])?;
            }
        }
        let ctors = class.constructor_infos();
        if ctors.is_empty() {
            if args.is_empty() {
                return Ok(object);
            }
            if args.len() <= 2 && class.is_subclass_of("Throwable") {
                self.init_throwable(&object, args);
                return Ok(object);
            }
            return Err(self.no_constructor(class, args));
        }
        let best = ctors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.params.len() == args.len())
            .filter_map(|(order, c)| {
                let distance = self.distance(c.params.iter().map(|p| p.ty.as_deref()), args)?;
                Some((distance, order, c))
            })
            .min_by_key(|(distance, order, _)| (*distance, *order))
            .map(|(_, _, c)| c);
        match best {
            Some(ctor) => {
                let args = coerce_args(ctor.params.iter().map(|p| p.ty.as_deref()), args);
                self.execute(class, &ctor.body, object.clone(), &args, &[])?;
                Ok(object)
            }
            None => Err(self.no_constructor(class, args)),
        }
    }

    fn init_throwable(&self, object: &Value, args: &[Value]) {
        if let Value::Object(o) = object {
            if let Some(message) = args.first() {
                o.set_field("message", message.clone());
            }
            if let Some(cause) = args.get(1) {
                o.set_field("cause", cause.clone());
            }
        }
    }

    fn instantiate_builtin(&mut self, class: &Arc<RuntimeClass>, args: &[Value]) -> Result<Value, RuntimeError> {
        match (class.name(), args) {
            ("Object", []) => Ok(Value::Object(Arc::new(Object::new(class.clone())))),
            ("List", []) => Ok(Value::list(Vec::new())),
            ("String", []) => Ok(Value::str("")),
            ("String", [v]) => Ok(Value::Str(self.to_string(v)?)),
            (_, _) if args.len() <= 2 && class.is_subclass_of("Throwable") => {
                let object = Value::Object(Arc::new(Object::new(class.clone())));
                self.init_throwable(&object, args);
                Ok(object)
            }
            _ => Err(self.no_constructor(class, args)),
        }
    }

    fn no_constructor(&self, class: &RuntimeClass, args: &[Value]) -> RuntimeError {
        let types: Vec<_> = args.iter().map(|a| self.type_name(a)).collect();
        self.raise(
            "MissingMethodException",
            format!(
                "Could not find matching constructor for: {}({})",
                class.name(),
                types.join(", ")
            ),
        )
    }

    /// Instantiate the script class `class` and call its `run` method.
    pub fn run_script(&mut self, class: &Arc<RuntimeClass>) -> Result<Value, RuntimeError> {
        let script = self.instantiate(class, &[])?;
        self.dispatch(&script, "run", &[], None)
    }

    /// Textual form of a value, calling `toString` on objects.
    pub fn to_string(&mut self, value: &Value) -> Result<Arc<str>, RuntimeError> {
        Ok(match value {
            Value::Str(s) => s.clone(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string().into(),
            Value::Int(v) => v.to_string().into(),
            Value::Float(v) => format_float(*v).into(),
            other => match self.dispatch(other, "toString", &[], None)? {
                Value::Str(s) => s,
                result => format!("{result:?}").into(),
            },
        })
    }
}

fn make_closure(frame: &Frame<'_>, idx: u16) -> Result<Value, RuntimeError> {
    let index = usize::from(idx);
    let body = frame
        .class
        .closure(index)
        .ok_or_else(|| RuntimeError::bug(format!("{} has no closure {idx}", frame.class.name())))?;
    let captures = body
        .captures
        .iter()
        .map(|from| match *from {
            CaptureFrom::Cell(reg) => frame.cell(reg).cloned(),
            CaptureFrom::Capture(i) => frame.capture(i).cloned(),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Closure(Arc::new(Closure {
        class: frame.class.clone(),
        index,
        this: frame.this.clone(),
        captures,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_names() {
        assert_eq!(accessor("get", "name"), "getName");
        assert_eq!(accessor("is", "empty"), "isEmpty");
        assert_eq!(accessor("set", ""), "set");
    }
}
