//! Generated classes: the unit the compiler emits and the runtime loads.
//!
//! A [`GeneratedClass`] holds everything needed to instantiate and run one
//! declared type: its field and method tables plus a [`CodeDesc`] per
//! executable body. Names are plain strings; the runtime links them
//! lazily.
use std::fmt::{self, Write as _};
use std::sync::Arc;

use crate::decoder::BytecodeDecoder;
use crate::source_map::source_map_lookup;

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    /// String literals, and every name operand (methods, fields, classes).
    Str(Arc<str>),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// One exception table entry.
///
/// Covers bytecode offsets `start..end`. Entries are searched in order and
/// the first whose range contains the faulting pc and whose type matches
/// wins, so inner handlers come before outer ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub start: u32,
    pub end: u32,
    pub target: u32,
    /// Constant index of the caught class name; `None` catches anything
    /// throwable (used for `finally`).
    pub catch_type: Option<u16>,
    /// Register that receives the exception on entry.
    pub exception_reg: u16,
}

impl Handler {
    pub fn covers(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// An executable body: method, constructor, initializer or closure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeDesc {
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub handlers: Vec<Handler>,
    /// Parameters occupy registers `0..param_count`.
    pub param_count: u16,
    pub register_count: u16,
    /// Number of distinct call sites (`Call`/`SafeCall` site operands).
    pub call_sites: u16,
    /// Encoded by [`SourceMapBuilder`](crate::SourceMapBuilder); absent
    /// when debug info was not requested.
    pub source_map: Option<Vec<u8>>,
}

impl CodeDesc {
    pub fn constant(&self, idx: u16) -> Option<&Constant> {
        self.constants.get(idx as usize)
    }

    /// The string constant at `idx`, for name operands.
    pub fn name(&self, idx: u16) -> Option<&Arc<str>> {
        match self.constants.get(idx as usize) {
            Some(Constant::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Source `(line, column)` of the instruction at `pc`.
    pub fn position(&self, pc: usize) -> Option<(u32, u32)> {
        let map = self.source_map.as_deref()?;
        source_map_lookup(map, u32::try_from(pc).ok()?)
    }

    /// Human-readable listing, one instruction per line.
    pub fn disassemble(&self, out: &mut String) {
        let mut decoder = BytecodeDecoder::new(&self.code);
        loop {
            let pc = decoder.offset();
            let Some(inst) = decoder.decode_next() else {
                break;
            };
            let _ = write!(out, "    {pc:>5}  ");
            match inst {
                Ok(inst) => {
                    let _ = write!(out, "{inst}");
                    if let Some(offset) = inst.jump_offset() {
                        let target = decoder.offset() as isize + offset as isize;
                        let _ = write!(out, "  -> {target}");
                    }
                }
                Err(e) => {
                    let _ = write!(out, "<{e}>");
                }
            }
            if let Some((line, column)) = self.position(pc) {
                let _ = write!(out, "  ; {line}:{column}");
            }
            out.push('\n');
        }
        if !self.constants.is_empty() {
            out.push_str("    constants:\n");
            for (i, c) in self.constants.iter().enumerate() {
                let _ = writeln!(out, "      #{i} = {c}");
            }
        }
        if !self.handlers.is_empty() {
            out.push_str("    handlers:\n");
            for h in &self.handlers {
                let ty = match h.catch_type.and_then(|t| self.name(t)) {
                    Some(name) => name.to_string(),
                    None => "any".to_string(),
                };
                let _ = writeln!(
                    out,
                    "      [{}, {}) -> {} catch {} into r{}",
                    h.start, h.end, h.target, ty, h.exception_reg
                );
            }
        }
    }
}

/// Where a closure capture is taken from when the closure is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFrom {
    /// The cell bound to register `n` of the creating frame.
    Cell(u16),
    /// Capture `n` of the creating closure.
    Capture(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureDesc {
    pub code: CodeDesc,
    pub captures: Vec<CaptureFrom>,
    /// No parameter list was written: accepts zero or one argument (`it`).
    pub implicit_param: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDesc {
    pub name: Arc<str>,
    /// Declared type name; `None` for untyped (`def`) parameters.
    pub ty: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDesc {
    pub name: Arc<str>,
    pub params: Vec<ParamDesc>,
    pub return_type: Option<Arc<str>>,
    pub is_static: bool,
    pub code: CodeDesc,
}

impl MethodDesc {
    /// `name(Type, Type)` with `Object` for untyped parameters.
    pub fn signature(&self) -> String {
        let mut s = format!("{}(", self.name);
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            s.push_str(p.ty.as_deref().unwrap_or("Object"));
        }
        s.push(')');
        s
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub name: Arc<str>,
    pub ty: Option<Arc<str>>,
    pub is_static: bool,
}

/// Compiled form of one declared (or synthesized script) class.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedClass {
    /// Fully qualified name, `package.Name`.
    pub name: Arc<str>,
    /// Fully qualified superclass name; `None` means `Object`.
    pub superclass: Option<Arc<str>>,
    pub fields: Vec<FieldDesc>,
    pub methods: Vec<MethodDesc>,
    pub constructors: Vec<MethodDesc>,
    /// Instance field initializers, run before any constructor body.
    pub initializer: Option<MethodDesc>,
    /// Static field initializers, run when the class is loaded.
    pub static_initializer: Option<MethodDesc>,
    /// Closure bodies referenced by `MakeClosure` in any method.
    pub closures: Vec<ClosureDesc>,
    /// Name of the source unit the class came from.
    pub source: Arc<str>,
    /// Synthesized from top-level statements; entry point is `run()`.
    pub is_script: bool,
}

impl GeneratedClass {
    pub fn new(name: impl Into<Arc<str>>, source: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            initializer: None,
            static_initializer: None,
            closures: Vec::new(),
            source: source.into(),
            is_script: false,
        }
    }

    /// The simple name, without package.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// The package part of the name, empty for the default package.
    pub fn package(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) => &self.name[..i],
            None => "",
        }
    }

    pub fn method(&self, name: &str) -> impl Iterator<Item = &MethodDesc> {
        self.methods.iter().filter(move |m| &*m.name == name)
    }

    /// Full disassembly listing of every body in the class.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "class {}", self.name);
        if let Some(sup) = &self.superclass {
            let _ = write!(out, " extends {sup}");
        }
        let _ = writeln!(out, "  // from {}", self.source);
        for f in &self.fields {
            let _ = writeln!(
                out,
                "  {}field {} {}",
                if f.is_static { "static " } else { "" },
                f.ty.as_deref().unwrap_or("def"),
                f.name
            );
        }
        let bodies = self
            .static_initializer
            .iter()
            .chain(self.initializer.iter())
            .chain(self.constructors.iter())
            .chain(self.methods.iter());
        for m in bodies {
            let _ = writeln!(
                out,
                "  {}{} [regs={}, sites={}]",
                if m.is_static { "static " } else { "" },
                m.signature(),
                m.code.register_count,
                m.code.call_sites
            );
            m.code.disassemble(&mut out);
        }
        for (i, c) in self.closures.iter().enumerate() {
            let _ = writeln!(
                out,
                "  closure #{i} [params={}, captures={:?}]",
                c.code.param_count, c.captures
            );
            c.code.disassemble(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BytecodeBuilder, SourceMapBuilder};

    fn sample_code() -> CodeDesc {
        let mut b = BytecodeBuilder::new();
        let mut map = SourceMapBuilder::new();
        map.add(0, 3, 5);
        b.load_constant(0);
        let label = b.jump_if_false();
        map.add(b.current_offset() as u32, 4, 1);
        b.load_smi(1);
        b.bind(label);
        b.return_();
        CodeDesc {
            code: b.into_bytes(),
            constants: vec![Constant::Str("hi".into()), Constant::Str("Oops".into())],
            handlers: vec![Handler {
                start: 0,
                end: 3,
                target: 8,
                catch_type: Some(1),
                exception_reg: 0,
            }],
            param_count: 0,
            register_count: 1,
            call_sites: 0,
            source_map: Some(map.finish()),
        }
    }

    #[test]
    fn names_and_positions() {
        let code = sample_code();
        assert_eq!(code.name(0).map(|s| &**s), Some("hi"));
        assert_eq!(code.position(0), Some((3, 5)));
        assert_eq!(code.position(4), Some((3, 5)));
        assert_eq!(code.position(6), Some((4, 1)));
        assert!(code.handlers[0].covers(2));
        assert!(!code.handlers[0].covers(3));
    }

    #[test]
    fn disassembly_lists_everything() {
        let mut out = String::new();
        sample_code().disassemble(&mut out);
        assert!(out.contains("LoadConstant #0"));
        assert!(out.contains("JumpIfFalse +2  -> 8"));
        assert!(out.contains("; 4:1"));
        assert!(out.contains("#0 = \"hi\""));
        assert!(out.contains("catch Oops into r0"));
    }

    #[test]
    fn qualified_names() {
        let class = GeneratedClass::new("com.acme.Widget", "Widget.kst");
        assert_eq!(class.simple_name(), "Widget");
        assert_eq!(class.package(), "com.acme");
        let plain = GeneratedClass::new("Script1", "Script1.kst");
        assert_eq!(plain.simple_name(), "Script1");
        assert_eq!(plain.package(), "");
    }

    #[test]
    fn signature_defaults_to_object() {
        let m = MethodDesc {
            name: "add".into(),
            params: vec![
                ParamDesc { name: "a".into(), ty: Some("Integer".into()) },
                ParamDesc { name: "b".into(), ty: None },
            ],
            return_type: None,
            is_static: false,
            code: CodeDesc::default(),
        };
        assert_eq!(m.signature(), "add(Integer, Object)");
    }
}
