//! Instruction selection: method and closure bodies become [`CodeDesc`]s.
//!
//! Expressions leave their value in the accumulator. Locals live in
//! registers `0..locals.len()` (parameters first); temporaries are
//! allocated above them in stack order. Locals captured by a closure live
//! in cells bound to their register.
//!
//! `try` bodies are covered by exception table entries. A `finally` body
//! is copied onto every way out of the protected region: falling off the
//! end, leaving a catch clause, `return`, `break` and `continue`, plus one
//! catch-all copy that rethrows. While a copy is emitted the enclosing
//! protected regions are closed, so an exception raised by the copy is
//! never handled by the same `try` again.
use std::sync::Arc;

use ahash::AHashMap;
use bytecode::{
    BytecodeBuilder, CaptureFrom, ClosureDesc, CodeDesc, Constant, Handler, Label, MethodDesc, Op,
    ParamDesc, SourceMapBuilder,
};
use parser::Span;
use parser::ast::{
    AssignOp, Binding, BinaryOp, Block, CaptureSource, ClassDecl, ClosureExpr, Expr, ExprKind,
    GStringPart, Item, LocalVar, Member, MethodDecl, Name, Stmt, StmtKind, TryStmt, TypeRef,
    UnaryOp, VarId,
};

use crate::canonical::{INITIALIZER, STATIC_INITIALIZER};
use crate::class_node::qualify;
use crate::error::CompileError;
use crate::message::{Message, MessageKind};
use crate::source::SourceUnit;
use crate::unit::{PhaseContext, PhaseOperation};

/// Selected bodies of one class, waiting for class generation.
#[derive(Debug, Clone)]
pub(crate) struct SelectedClass {
    pub name: Arc<str>,
    pub methods: Vec<MethodDesc>,
    pub constructors: Vec<MethodDesc>,
    pub initializer: Option<MethodDesc>,
    pub static_initializer: Option<MethodDesc>,
    pub closures: Vec<ClosureDesc>,
}

pub(crate) struct Select;

impl PhaseOperation for Select {
    fn name(&self) -> &str {
        "select"
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        let debug = ctx.config().debug;
        let selected = unit.with_ast(|module, messages, source| {
            let package = module.package.as_ref().map(|p| p.to_string());
            let mut out = Vec::new();
            for item in &module.items {
                let Item::Class(class) = item else { continue };
                let mut cx = ClassSelector {
                    name: qualify(package.as_deref(), &class.name).into(),
                    closures: Vec::new(),
                    debug,
                    messages: &mut *messages,
                    source,
                };
                out.push(cx.select_class(class)?);
            }
            Ok::<_, CompileError>(out)
        })??;
        unit.selected = selected;
        Ok(())
    }
}

struct ClassSelector<'m> {
    name: Arc<str>,
    closures: Vec<ClosureDesc>,
    debug: bool,
    messages: &'m mut Vec<Message>,
    source: &'m Arc<str>,
}

impl ClassSelector<'_> {
    fn error(&mut self, span: Span, text: impl Into<String>) {
        self.messages.push(Message::error(
            MessageKind::Semantic,
            self.source.clone(),
            Some(span),
            text,
        ));
    }

    fn select_class(&mut self, class: &ClassDecl) -> Result<SelectedClass, CompileError> {
        let mut selected = SelectedClass {
            name: self.name.clone(),
            methods: Vec::new(),
            constructors: Vec::new(),
            initializer: None,
            static_initializer: None,
            closures: Vec::new(),
        };
        for member in &class.members {
            match member {
                Member::Field(_) => {}
                Member::Method(m) if &*m.name == INITIALIZER => {
                    selected.initializer = Some(self.select_method(m)?);
                }
                Member::Method(m) if &*m.name == STATIC_INITIALIZER => {
                    selected.static_initializer = Some(self.select_method(m)?);
                }
                Member::Method(m) => selected.methods.push(self.select_method(m)?),
                Member::Constructor(m) => selected.constructors.push(self.select_method(m)?),
                Member::Error(span) => {
                    return Err(CompileError::bug(format!(
                        "member error node at {span} reached instruction selection"
                    )));
                }
            }
        }
        selected.closures = std::mem::take(&mut self.closures);
        Ok(selected)
    }

    fn select_method(&mut self, m: &MethodDecl) -> Result<MethodDesc, CompileError> {
        log::trace!("selecting {}.{}", self.name, m.name);
        let mut g = FunctionGen::new(self, &m.locals, m.params.len(), m.is_static)?;
        g.prologue();
        g.block(&m.body)?;
        g.b.load_null();
        g.b.return_();
        let code = g.finish(m.span);
        Ok(MethodDesc {
            name: m.name.clone(),
            params: m
                .params
                .iter()
                .map(|p| ParamDesc {
                    name: p.name.clone(),
                    ty: p.ty.as_ref().and_then(|t| t.resolved.clone()),
                })
                .collect(),
            return_type: m.return_type.as_ref().and_then(|t| t.resolved.clone()),
            is_static: m.is_static,
            code,
        })
    }
}

#[derive(PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Float(u64),
    Str(Arc<str>),
}

struct LoopCtx {
    breaks: Vec<Label>,
    continues: Vec<Label>,
    /// Number of enclosing `try` levels when the loop started.
    try_depth: usize,
}

/// One protected region being emitted.
struct TryCtx<'ast> {
    /// `Some` for the region guarded by a `finally`; `None` for the
    /// region guarded by catch clauses.
    finally: Option<&'ast Block>,
    segments: Vec<(u32, u32)>,
    open: Option<u32>,
}

impl TryCtx<'_> {
    fn close(&mut self, pc: u32) {
        if let Some(start) = self.open.take() {
            if pc > start {
                self.segments.push((start, pc));
            }
        }
    }

    fn reopen(&mut self, pc: u32) {
        self.open = Some(pc);
    }
}

struct FunctionGen<'c, 'm, 'ast> {
    cx: &'c mut ClassSelector<'m>,
    b: BytecodeBuilder,
    constants: Vec<Constant>,
    constant_index: AHashMap<ConstKey, u16>,
    handlers: Vec<Handler>,
    map: SourceMapBuilder,
    locals: &'ast [LocalVar],
    param_count: u16,
    next_reg: usize,
    max_reg: usize,
    sites: u16,
    is_static: bool,
    loops: Vec<LoopCtx>,
    trys: Vec<TryCtx<'ast>>,
    span: Span,
}

impl<'c, 'm, 'ast> FunctionGen<'c, 'm, 'ast> {
    fn new(
        cx: &'c mut ClassSelector<'m>,
        locals: &'ast [LocalVar],
        param_count: usize,
        is_static: bool,
    ) -> Result<Self, CompileError> {
        let param_count = u16::try_from(param_count)
            .map_err(|_| CompileError::bug("parameter count exceeds register space"))?;
        Ok(Self {
            cx,
            b: BytecodeBuilder::new(),
            constants: Vec::new(),
            constant_index: AHashMap::new(),
            handlers: Vec::new(),
            map: SourceMapBuilder::new(),
            locals,
            param_count,
            next_reg: locals.len(),
            max_reg: locals.len(),
            sites: 0,
            is_static,
            loops: Vec::new(),
            trys: Vec::new(),
            span: Span::default(),
        })
    }

    fn finish(self, span: Span) -> CodeDesc {
        if self.b.jump_overflow() {
            self.cx.error(span, "method too large: jump distance exceeds 32767 bytes");
        }
        if self.max_reg > usize::from(u16::MAX) {
            self.cx.error(span, "method too large: too many registers");
        }
        CodeDesc {
            code: self.b.into_bytes(),
            constants: self.constants,
            handlers: self.handlers,
            param_count: self.param_count,
            register_count: self.max_reg.min(usize::from(u16::MAX)) as u16,
            call_sites: self.sites,
            source_map: if self.cx.debug {
                Some(self.map.finish())
            } else {
                None
            },
        }
    }

    fn pc(&self) -> u32 {
        self.b.current_offset() as u32
    }

    fn mark(&mut self, span: Span) {
        self.span = span;
        if self.cx.debug {
            let pc = self.pc();
            self.map
                .add(pc, span.start.line as u32, span.start.column as u32);
        }
    }

    fn error(&mut self, text: impl Into<String>) {
        let span = self.span;
        self.cx.error(span, text);
    }

    fn constant(&mut self, c: Constant) -> u16 {
        let key = match &c {
            Constant::Int(v) => ConstKey::Int(*v),
            Constant::Float(v) => ConstKey::Float(v.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.clone()),
        };
        if let Some(&idx) = self.constant_index.get(&key) {
            return idx;
        }
        let Ok(idx) = u16::try_from(self.constants.len()) else {
            self.error("method too large: constant pool overflow");
            return 0;
        };
        self.constants.push(c);
        self.constant_index.insert(key, idx);
        idx
    }

    fn name(&mut self, s: &str) -> u16 {
        self.constant(Constant::Str(s.into()))
    }

    fn class_name(&mut self, ty: &TypeRef) -> Result<u16, CompileError> {
        match &ty.resolved {
            Some(name) => Ok(self.constant(Constant::Str(name.clone()))),
            None => Err(CompileError::bug(format!(
                "type {} reached instruction selection unresolved",
                ty.name
            ))),
        }
    }

    fn next_site(&mut self) -> u16 {
        let site = self.sites;
        self.sites = self.sites.saturating_add(1);
        site
    }

    /// Reserve `n` consecutive temporaries.
    fn temps(&mut self, n: usize) -> u16 {
        let base = self.next_reg;
        self.next_reg += n;
        self.max_reg = self.max_reg.max(self.next_reg);
        // Overflow is reported once by `finish`.
        base.min(usize::from(u16::MAX)) as u16
    }

    fn free_temps(&mut self, base: u16) {
        self.next_reg = usize::from(base).max(self.locals.len());
    }

    fn is_captured(&self, id: VarId) -> bool {
        self.locals
            .get(id.0 as usize)
            .is_some_and(|l| l.captured)
    }

    fn reg(id: VarId) -> u16 {
        id.0 as u16
    }

    /// Parameters that closures capture move into cells on entry.
    fn prologue(&mut self) {
        for i in 0..self.param_count {
            if self.is_captured(VarId(u32::from(i))) {
                self.b.load_local(i);
                self.b.make_cell(i);
            }
        }
    }

    /// Bind a freshly declared local to the accumulator.
    fn init_local(&mut self, id: VarId) {
        let reg = Self::reg(id);
        if self.is_captured(id) {
            self.b.make_cell(reg);
        } else {
            self.b.store_local(reg);
        }
    }

    // ── Statements ──────────────────────────────────────────────────

    fn block(&mut self, block: &'ast Block) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &'ast Stmt) -> Result<(), CompileError> {
        self.mark(stmt.span);
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::VarDecl { ty, init, var, name } => {
                match init {
                    Some(e) => self.expr(e)?,
                    None => self.b.load_null(),
                }
                if let Some(resolved) = ty.as_ref().and_then(|t| t.resolved.as_deref()) {
                    if resolved != "Object" {
                        let idx = self.name(resolved);
                        self.b.check_cast(idx);
                    }
                }
                let id = var.ok_or_else(|| CompileError::bug(format!("local `{name}` has no slot")))?;
                self.init_local(id);
                Ok(())
            }
            StmtKind::Return(value) => {
                match value {
                    Some(e) => self.expr(e)?,
                    None => self.b.load_null(),
                }
                self.emit_return()
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond)?;
                let else_label = self.b.jump_if_false();
                self.stmt(then_branch)?;
                match else_branch {
                    Some(e) => {
                        let end = self.b.jump();
                        self.b.bind(else_label);
                        self.stmt(e)?;
                        self.b.bind(end);
                    }
                    None => self.b.bind(else_label),
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let top = self.b.current_offset();
                self.expr(cond)?;
                let exit = self.b.jump_if_false();
                self.loop_body(body, |g| {
                    g.b.jump_back(top);
                    Ok(())
                })?;
                self.b.bind(exit);
                Ok(())
            }
            StmtKind::For {
                name,
                var,
                iterable,
                body,
            } => {
                let id = var.ok_or_else(|| CompileError::bug(format!("loop variable `{name}` has no slot")))?;
                self.for_in(id, iterable, body)
            }
            StmtKind::Break => {
                let depth = self.innermost_loop()?.try_depth;
                self.inline_finallies(depth)?;
                let label = self.b.jump();
                self.innermost_loop()?.breaks.push(label);
                Ok(())
            }
            StmtKind::Continue => {
                let depth = self.innermost_loop()?.try_depth;
                self.inline_finallies(depth)?;
                let label = self.b.jump();
                self.innermost_loop()?.continues.push(label);
                Ok(())
            }
            StmtKind::Throw(e) => {
                self.expr(e)?;
                self.mark(stmt.span);
                self.b.throw();
                Ok(())
            }
            StmtKind::Try(t) => self.try_stmt(t),
            StmtKind::Block(b) => self.block(b),
            StmtKind::Error => Err(CompileError::bug(format!(
                "statement error node at {} reached instruction selection",
                stmt.span
            ))),
        }
    }

    fn innermost_loop(&mut self) -> Result<&mut LoopCtx, CompileError> {
        self.loops
            .last_mut()
            .ok_or_else(|| CompileError::bug("break or continue outside of a loop"))
    }

    /// Emit `body` as a loop body. `continue` lands just before `step`.
    /// `break` lands after it.
    fn loop_body(
        &mut self,
        body: &'ast Stmt,
        step: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        self.loops.push(LoopCtx {
            breaks: Vec::new(),
            continues: Vec::new(),
            try_depth: self.trys.len(),
        });
        let result = self.stmt(body);
        let ctx = self
            .loops
            .pop()
            .ok_or_else(|| CompileError::bug("loop stack underflow"))?;
        result?;
        for label in ctx.continues {
            self.b.bind(label);
        }
        step(self)?;
        for label in ctx.breaks {
            self.b.bind(label);
        }
        Ok(())
    }

    /// `for (x in xs)` walks `xs` by index through `size()` and `getAt(i)`.
    /// A null iterable runs the body zero times.
    fn for_in(&mut self, var: VarId, iterable: &'ast Expr, body: &'ast Stmt) -> Result<(), CompileError> {
        self.expr(iterable)?;
        let base = self.temps(2);
        let (seq, index) = (base, base + 1);
        self.b.store_local(seq);
        self.b.load_smi(0);
        self.b.store_local(index);
        self.b.load_null();
        self.b.binary(Op::Eq, seq);
        let skip = self.b.jump_if_true();

        let top = self.b.current_offset();
        let size = self.name("size");
        let site = self.next_site();
        self.b.call(size, seq, 0, site, false);
        self.b.binary(Op::Lt, index);
        let exit = self.b.jump_if_false();
        let get_at = self.name("getAt");
        let site = self.next_site();
        self.b.call(get_at, seq, 1, site, false);
        self.init_local(var);

        self.loop_body(body, |g| {
            g.b.load_smi(1);
            g.b.binary(Op::Add, index);
            g.b.store_local(index);
            g.b.jump_back(top);
            Ok(())
        })?;
        self.b.bind(exit);
        self.b.bind(skip);
        self.free_temps(base);
        Ok(())
    }

    fn emit_return(&mut self) -> Result<(), CompileError> {
        if self.trys.iter().any(|t| t.finally.is_some()) {
            let value = self.temps(1);
            self.b.store_local(value);
            self.inline_finallies(0)?;
            self.b.load_local(value);
            self.free_temps(value);
        }
        self.b.return_();
        Ok(())
    }

    /// Copy every `finally` body of the try levels `down_to..`, innermost
    /// first.
    fn inline_finallies(&mut self, down_to: usize) -> Result<(), CompileError> {
        let mut level = self.trys.len();
        while level > down_to {
            level -= 1;
            if let Some(block) = self.trys[level].finally {
                self.inline_finally(level, block)?;
            }
        }
        Ok(())
    }

    /// Emit `block` outside the protection of try level `level` and every
    /// level nested in it.
    fn inline_finally(&mut self, level: usize, block: &'ast Block) -> Result<(), CompileError> {
        let pc = self.pc();
        for t in &mut self.trys[level..] {
            t.close(pc);
        }
        let saved_trys = self.trys.split_off(level);
        let keep = self
            .loops
            .iter()
            .position(|l| l.try_depth > level)
            .unwrap_or(self.loops.len());
        let saved_loops = self.loops.split_off(keep);

        let result = self.block(block);

        self.trys.extend(saved_trys);
        self.loops.extend(saved_loops);
        let pc = self.pc();
        for t in &mut self.trys[level..] {
            t.reopen(pc);
        }
        result
    }

    fn try_stmt(&mut self, t: &'ast TryStmt) -> Result<(), CompileError> {
        let finally = t.finally.as_ref();
        // Holds the in-flight exception while the catch-all copy runs.
        let pending = finally.map(|_| self.temps(1));
        let start = self.pc();
        let finally_level = self.trys.len();
        if finally.is_some() {
            self.trys.push(TryCtx {
                finally,
                segments: Vec::new(),
                open: Some(start),
            });
        }
        let has_catches = !t.catches.is_empty();
        if has_catches {
            self.trys.push(TryCtx {
                finally: None,
                segments: Vec::new(),
                open: Some(start),
            });
        }

        self.block(&t.body)?;

        let mut caught = Vec::new();
        if has_catches {
            let mut ctx = self
                .trys
                .pop()
                .ok_or_else(|| CompileError::bug("try stack underflow"))?;
            ctx.close(self.pc());
            caught = ctx.segments;
        }
        let mut exits = Vec::new();
        if let Some(block) = finally {
            self.inline_finally(finally_level, block)?;
        }
        exits.push(self.b.jump());

        for clause in &t.catches {
            self.mark(clause.span);
            let target = self.pc();
            let ty = clause
                .ty
                .as_ref()
                .and_then(|t| t.resolved.clone())
                .unwrap_or_else(|| "Exception".into());
            let ty = self.constant(Constant::Str(ty));
            let var = clause
                .var
                .ok_or_else(|| CompileError::bug(format!("catch variable `{}` has no slot", clause.name)))?;
            let reg = Self::reg(var);
            for &(start, end) in &caught {
                self.handlers.push(Handler {
                    start,
                    end,
                    target,
                    catch_type: Some(ty),
                    exception_reg: reg,
                });
            }
            if self.is_captured(var) {
                self.b.load_local(reg);
                self.b.make_cell(reg);
            }
            self.block(&clause.body)?;
            if let Some(block) = finally {
                self.inline_finally(finally_level, block)?;
            }
            exits.push(self.b.jump());
        }

        if let (Some(block), Some(pending)) = (finally, pending) {
            let mut ctx = self
                .trys
                .pop()
                .ok_or_else(|| CompileError::bug("try stack underflow"))?;
            ctx.close(self.pc());
            let target = self.pc();
            for (start, end) in ctx.segments {
                self.handlers.push(Handler {
                    start,
                    end,
                    target,
                    catch_type: None,
                    exception_reg: pending,
                });
            }
            self.block(block)?;
            self.b.load_local(pending);
            self.b.throw();
        }
        for label in exits {
            self.b.bind(label);
        }
        if let Some(pending) = pending {
            self.free_temps(pending);
        }
        Ok(())
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn expr(&mut self, e: &'ast Expr) -> Result<(), CompileError> {
        match &e.kind {
            ExprKind::Int(v) => match i32::try_from(*v) {
                Ok(small) => self.b.load_smi(small),
                Err(_) => {
                    let idx = self.constant(Constant::Int(*v));
                    self.b.load_constant(idx);
                }
            },
            ExprKind::Float(v) => {
                let idx = self.constant(Constant::Float(*v));
                self.b.load_constant(idx);
            }
            ExprKind::Str(s) => {
                let idx = self.name(s);
                self.b.load_constant(idx);
            }
            ExprKind::GString(parts) => {
                let base = self.temps(parts.len());
                for (i, part) in parts.iter().enumerate() {
                    match part {
                        GStringPart::Text(t) => {
                            let idx = self.name(t);
                            self.b.load_constant(idx);
                        }
                        GStringPart::Expr(e) => self.expr(e)?,
                    }
                    self.b.store_local(base + i as u16);
                }
                self.b.make_gstring(base, parts.len() as u16);
                self.free_temps(base);
            }
            ExprKind::Bool(b) => self.b.load_bool(*b),
            ExprKind::Null => self.b.load_null(),
            ExprKind::This => self.b.load_this(),
            ExprKind::Variable { name, binding } => self.load_var(name, binding)?,
            ExprKind::Assign { target, op, value } => self.assign(target, *op, value)?,
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => self.short_circuit(lhs, rhs, false)?,
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => self.short_circuit(lhs, rhs, true)?,
            ExprKind::Binary { op, lhs, rhs } => {
                let t = self.temps(1);
                self.expr(lhs)?;
                self.b.store_local(t);
                self.expr(rhs)?;
                self.mark(e.span);
                self.b.binary(binary_op(*op)?, t);
                self.free_temps(t);
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                match op {
                    UnaryOp::Not => self.b.not(),
                    UnaryOp::Neg => {
                        self.mark(e.span);
                        self.b.neg();
                    }
                }
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                self.expr(cond)?;
                let else_label = self.b.jump_if_false();
                self.expr(then_expr)?;
                let end = self.b.jump();
                self.b.bind(else_label);
                self.expr(else_expr)?;
                self.b.bind(end);
            }
            ExprKind::InstanceOf { expr, ty } => {
                self.expr(expr)?;
                let idx = self.class_name(ty)?;
                self.b.instance_of(idx);
            }
            ExprKind::Call {
                receiver,
                name,
                args,
                safe,
                ..
            } => self.call(e.span, receiver.as_deref(), name, args, *safe)?,
            ExprKind::Property {
                receiver,
                name,
                safe,
            } => {
                self.expr(receiver)?;
                self.mark(e.span);
                let idx = self.name(name);
                self.b.get_property(idx, *safe);
            }
            ExprKind::Index { receiver, index } => {
                let t = self.temps(1);
                self.expr(receiver)?;
                self.b.store_local(t);
                self.expr(index)?;
                self.mark(e.span);
                self.b.get_index(t);
                self.free_temps(t);
            }
            ExprKind::New { ty, args } => {
                let Some(argc) = self.argc(args.len()) else {
                    return Ok(());
                };
                let base = self.temps(args.len());
                self.args_into(base, args)?;
                self.mark(e.span);
                let idx = self.class_name(ty)?;
                self.b.new_instance(idx, base, argc);
                self.free_temps(base);
            }
            ExprKind::List(items) => {
                let Ok(count) = u16::try_from(items.len()) else {
                    self.error("list literal has too many elements");
                    return Ok(());
                };
                let base = self.temps(items.len());
                self.args_into(base, items)?;
                self.b.make_list(base, count);
                self.free_temps(base);
            }
            ExprKind::Closure(c) => self.closure(c)?,
            ExprKind::Error => {
                return Err(CompileError::bug(format!(
                    "expression error node at {} reached instruction selection",
                    e.span
                )));
            }
        }
        Ok(())
    }

    fn argc(&mut self, n: usize) -> Option<u8> {
        let argc = u8::try_from(n).ok();
        if argc.is_none() {
            self.error(format!("too many arguments ({n}, at most 255)"));
        }
        argc
    }

    fn args_into(&mut self, base: u16, args: &'ast [Expr]) -> Result<(), CompileError> {
        for (i, a) in args.iter().enumerate() {
            self.expr(a)?;
            self.b.store_local(base + i as u16);
        }
        Ok(())
    }

    fn short_circuit(&mut self, lhs: &'ast Expr, rhs: &'ast Expr, is_or: bool) -> Result<(), CompileError> {
        self.expr(lhs)?;
        let first = if is_or { self.b.jump_if_true() } else { self.b.jump_if_false() };
        self.expr(rhs)?;
        let second = if is_or { self.b.jump_if_true() } else { self.b.jump_if_false() };
        self.b.load_bool(!is_or);
        let end = self.b.jump();
        self.b.bind(first);
        self.b.bind(second);
        self.b.load_bool(is_or);
        self.b.bind(end);
        Ok(())
    }

    fn call(
        &mut self,
        span: Span,
        receiver: Option<&'ast Expr>,
        name: &Name,
        args: &'ast [Expr],
        safe: bool,
    ) -> Result<(), CompileError> {
        let Some(argc) = self.argc(args.len()) else {
            return Ok(());
        };
        let base = self.temps(1 + args.len());
        match receiver {
            Some(r) => self.expr(r)?,
            None => self.load_implicit_receiver(),
        }
        self.b.store_local(base);
        self.args_into(base + 1, args)?;
        self.mark(span);
        let idx = self.name(name);
        let site = self.next_site();
        self.b.call(idx, base, argc, site, safe);
        self.free_temps(base);
        Ok(())
    }

    fn load_implicit_receiver(&mut self) {
        if self.is_static {
            let own = self.cx.name.clone();
            let idx = self.constant(Constant::Str(own));
            self.b.load_class(idx);
        } else {
            self.b.load_this();
        }
    }

    fn load_var(&mut self, name: &Name, binding: &Binding) -> Result<(), CompileError> {
        match binding {
            Binding::Local(id) => {
                if self.is_captured(*id) {
                    self.b.load_cell(Self::reg(*id));
                } else {
                    self.b.load_local(Self::reg(*id));
                }
            }
            Binding::Captured(i) => self.b.load_capture(*i as u16),
            Binding::Field { is_static: false, .. } => {
                let idx = self.name(name);
                self.b.load_field(idx);
            }
            Binding::Field { owner, is_static: true } => {
                let class = self.constant(Constant::Str(owner.clone()));
                let idx = self.name(name);
                self.b.load_static(class, idx);
            }
            Binding::Class(class) => {
                let idx = self.constant(Constant::Str(class.clone()));
                self.b.load_class(idx);
            }
            Binding::Dynamic(var) => {
                let idx = self.name(var.name());
                self.b.load_dynamic(idx);
            }
            Binding::Unresolved => {
                return Err(CompileError::bug(format!(
                    "variable `{name}` reached instruction selection unresolved"
                )));
            }
        }
        Ok(())
    }

    fn store_var(&mut self, name: &Name, binding: &Binding) -> Result<(), CompileError> {
        match binding {
            Binding::Local(id) => {
                if self.is_captured(*id) {
                    self.b.store_cell(Self::reg(*id));
                } else {
                    self.b.store_local(Self::reg(*id));
                }
            }
            Binding::Captured(i) => self.b.store_capture(*i as u16),
            Binding::Field { is_static: false, .. } => {
                let idx = self.name(name);
                self.b.store_field(idx);
            }
            Binding::Field { owner, is_static: true } => {
                let class = self.constant(Constant::Str(owner.clone()));
                let idx = self.name(name);
                self.b.store_static(class, idx);
            }
            Binding::Class(class) => self.error(format!("cannot assign to class {class}")),
            Binding::Dynamic(var) => {
                let idx = self.name(var.name());
                self.b.store_dynamic(idx);
            }
            Binding::Unresolved => {
                return Err(CompileError::bug(format!(
                    "variable `{name}` reached instruction selection unresolved"
                )));
            }
        }
        Ok(())
    }

    /// Leave `acc = old <op> value` for compound assignments, `value`
    /// otherwise. `load_old` puts the current value in the accumulator.
    fn assigned_value(
        &mut self,
        op: AssignOp,
        value: &'ast Expr,
        load_old: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let op = match op {
            AssignOp::Assign => return self.expr(value),
            AssignOp::AddAssign => Op::Add,
            AssignOp::SubAssign => Op::Sub,
        };
        load_old(self)?;
        let old = self.temps(1);
        self.b.store_local(old);
        self.expr(value)?;
        self.b.binary(op, old);
        self.free_temps(old);
        Ok(())
    }

    fn assign(&mut self, target: &'ast Expr, op: AssignOp, value: &'ast Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Variable { name, binding } => {
                self.assigned_value(op, value, |g| g.load_var(name, binding))?;
                self.store_var(name, binding)
            }
            ExprKind::Property { receiver, name, .. } => {
                let obj = self.temps(1);
                self.expr(receiver)?;
                self.b.store_local(obj);
                let idx = self.name(name);
                self.assigned_value(op, value, |g| {
                    g.b.load_local(obj);
                    g.b.get_property(idx, false);
                    Ok(())
                })?;
                self.mark(target.span);
                self.b.set_property(idx, obj);
                self.free_temps(obj);
                Ok(())
            }
            ExprKind::Index { receiver, index } => {
                let base = self.temps(2);
                self.expr(receiver)?;
                self.b.store_local(base);
                self.expr(index)?;
                self.b.store_local(base + 1);
                self.assigned_value(op, value, |g| {
                    g.b.load_local(base + 1);
                    g.b.get_index(base);
                    Ok(())
                })?;
                self.mark(target.span);
                self.b.set_index(base, base + 1);
                self.free_temps(base);
                Ok(())
            }
            _ => Err(CompileError::bug(format!(
                "invalid assignment target at {} reached instruction selection",
                target.span
            ))),
        }
    }

    fn closure(&mut self, c: &'ast ClosureExpr) -> Result<(), CompileError> {
        let code = {
            let mut inner = FunctionGen::new(&mut *self.cx, &c.locals, c.params.len(), self.is_static)?;
            inner.prologue();
            inner.block(&c.body)?;
            inner.b.load_null();
            inner.b.return_();
            let span = c.body.span;
            inner.finish(span)
        };
        let captures = c
            .captures
            .iter()
            .map(|cap| match cap.source {
                CaptureSource::Local(id) => CaptureFrom::Cell(Self::reg(id)),
                CaptureSource::Captured(i) => CaptureFrom::Capture(i as u16),
            })
            .collect();
        let idx = self.cx.closures.len();
        self.cx.closures.push(ClosureDesc {
            code,
            captures,
            implicit_param: c.implicit_param,
        });
        let Ok(idx) = u16::try_from(idx) else {
            self.error("class too large: too many closures");
            return Ok(());
        };
        self.b.make_closure(idx);
        Ok(())
    }
}

fn binary_op(op: BinaryOp) -> Result<Op, CompileError> {
    Ok(match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Ne => Op::Ne,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Le => Op::Le,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Ge => Op::Ge,
        BinaryOp::And | BinaryOp::Or => {
            return Err(CompileError::bug("short-circuit operator lowered as binary"));
        }
    })
}

#[cfg(test)]
mod tests {
    use bytecode::{BytecodeDecoder, GeneratedClass, Instruction};

    use crate::unit::compile_source;

    fn class(src: &str, name: &str) -> GeneratedClass {
        let classes = compile_source("Test.kst", src).expect("compiles");
        classes
            .into_iter()
            .find(|c| &*c.name == name)
            .expect("class generated")
    }

    fn instructions(code: &bytecode::CodeDesc) -> Vec<(u32, Instruction)> {
        let mut decoder = BytecodeDecoder::new(&code.code);
        let mut out = Vec::new();
        loop {
            let pc = decoder.offset() as u32;
            match decoder.decode_next() {
                Some(Ok(inst)) => out.push((pc, inst)),
                Some(Err(e)) => panic!("{e}"),
                None => break,
            }
        }
        out
    }

    /// Offsets of every call to `method`.
    fn call_sites_of(code: &bytecode::CodeDesc, method: &str) -> Vec<u32> {
        instructions(code)
            .into_iter()
            .filter_map(|(pc, inst)| match inst {
                Instruction::Call { name_idx, .. } if code.name(name_idx).map(|n| &**n) == Some(method) => {
                    Some(pc)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn finally_is_copied_onto_every_exit_and_never_self_protected() {
        let c = class(
            "class T {\n def f() {\n  try { return g() } finally { h() }\n }\n def g() { 1 }\n def h() { }\n}",
            "T",
        );
        let f = c.method("f").next().unwrap();
        let copies = call_sites_of(&f.code, "h");
        // return path, fall-through path, catch-all path
        assert_eq!(copies.len(), 3);
        assert!(!f.code.handlers.is_empty());
        assert!(f.code.handlers.iter().all(|h| h.catch_type.is_none()));
        for pc in copies {
            assert!(
                f.code.handlers.iter().all(|h| !h.covers(pc)),
                "finally copy at {pc} is protected by its own try"
            );
        }
        let g = call_sites_of(&f.code, "g")[0];
        assert!(f.code.handlers.iter().any(|h| h.covers(g)));
    }

    #[test]
    fn catch_handlers_keep_declaration_order() {
        let c = class(
            "class T {\n def f() {\n  try { g() }\n  catch (ArithmeticException e) { 1 }\n  catch (e) { 2 }\n  finally { h() }\n }\n def g() {}\n def h() {}\n}",
            "T",
        );
        let f = c.method("f").next().unwrap();
        let type_of = |h: &bytecode::Handler| h.catch_type.and_then(|t| f.code.name(t)).map(|n| &**n);
        // The try body may be split around finally copies; each protected
        // range lists its catches in declaration order.
        let mut ranges: Vec<(u32, u32)> = f
            .code
            .handlers
            .iter()
            .filter(|h| h.catch_type.is_some())
            .map(|h| (h.start, h.end))
            .collect();
        ranges.dedup();
        assert!(!ranges.is_empty());
        for (start, end) in ranges {
            let types: Vec<_> = f
                .code
                .handlers
                .iter()
                .filter(|h| h.start == start && h.end == end && h.catch_type.is_some())
                .map(type_of)
                .collect();
            assert_eq!(types, [Some("ArithmeticException"), Some("Exception")]);
        }
        // the first handler to see an exception from the try body
        let g = call_sites_of(&f.code, "g")[0];
        let seen: Vec<_> = f.code.handlers.iter().filter(|h| h.covers(g)).map(type_of).collect();
        assert_eq!(seen, [Some("ArithmeticException"), Some("Exception"), None]);
        // the catch-all also protects the catch bodies
        let second_catch = f
            .code
            .handlers
            .iter()
            .find(|h| type_of(*h) == Some("Exception"))
            .map(|h| h.target)
            .unwrap();
        assert!(
            f.code
                .handlers
                .iter()
                .any(|h| h.catch_type.is_none() && h.covers(second_catch))
        );
    }

    #[test]
    fn nested_finally_on_return_runs_inner_then_outer() {
        let c = class(
            "class T {\n def f() {\n  try {\n   try { return 1 } finally { inner() }\n  } finally { outer() }\n }\n def inner() {}\n def outer() {}\n}",
            "T",
        );
        let f = c.method("f").next().unwrap();
        let inner = call_sites_of(&f.code, "inner");
        let outer = call_sites_of(&f.code, "outer");
        assert_eq!(inner.len(), 3);
        assert_eq!(outer.len(), 3);
        assert!(inner[0] < outer[0]);
        // inner copies stay inside the outer try, outer copies are bare
        for pc in inner {
            assert_eq!(f.code.handlers.iter().filter(|h| h.covers(pc)).count(), 1);
        }
        for pc in outer {
            assert!(f.code.handlers.iter().all(|h| !h.covers(pc)));
        }
    }

    #[test]
    fn captured_locals_use_cells() {
        let c = class("def count = 0\ndef inc = { count += 1 }\ninc()\ncount", "Test");
        let run = c.method("run").next().unwrap();
        let insts: Vec<Instruction> = instructions(&run.code).into_iter().map(|(_, i)| i).collect();
        assert!(insts.contains(&Instruction::MakeCell { reg: 0 }));
        assert!(insts.contains(&Instruction::LoadCell { reg: 0 }));
        assert_eq!(c.closures.len(), 1);
        assert_eq!(c.closures[0].captures, [bytecode::CaptureFrom::Cell(0)]);
        let body: Vec<Instruction> = instructions(&c.closures[0].code).into_iter().map(|(_, i)| i).collect();
        assert!(body.contains(&Instruction::StoreCapture { idx: 0 }));
    }

    #[test]
    fn large_and_small_integers() {
        let c = class("x = 5000000000\ny = -7", "Test");
        let run = c.method("run").next().unwrap();
        assert!(run.code.constants.contains(&bytecode::Constant::Int(5_000_000_000)));
        let insts: Vec<Instruction> = instructions(&run.code).into_iter().map(|(_, i)| i).collect();
        assert!(insts.contains(&Instruction::LoadSmi { value: -7 }));
    }

    #[test]
    fn static_methods_call_through_the_class() {
        let c = class("class S {\n static def a() { b() }\n static def b() { 2 }\n}", "S");
        let a = c.method("a").next().unwrap();
        let insts: Vec<Instruction> = instructions(&a.code).into_iter().map(|(_, i)| i).collect();
        assert!(matches!(insts[0], Instruction::LoadClass { .. }));
        assert_eq!(a.code.call_sites, 1);
    }

    #[test]
    fn source_positions_are_recorded() {
        let c = class("x = 1\n\ny = foo(2)", "Test");
        let run = c.method("run").next().unwrap();
        let call_pc = instructions(&run.code)
            .into_iter()
            .find(|(_, i)| matches!(i, Instruction::Call { .. }))
            .map(|(pc, _)| pc)
            .unwrap();
        assert_eq!(run.code.position(call_pc as usize).map(|p| p.0), Some(3));
    }
}
