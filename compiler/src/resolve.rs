//! Semantic analysis.
//!
//! First the class table: superclasses, field and parameter types, cycles
//! and duplicate signatures. Then every method body: each identifier is
//! bound to a local, a captured local, a field, a class, or left dynamic.
//! Only names in type positions must resolve statically; everything else
//! that cannot be bound here is deferred to the runtime.
use std::sync::Arc;

use bytecode::builtins;
use parser::Span;
use parser::ast::{
    Binding, Block, Capture, CaptureSource, ClassDecl, ClosureExpr, DynamicVariable, Expr,
    ExprKind, Item, LocalVar, Member, MethodDecl, Module, Name, Stmt, StmtKind, TypeRef, VarId,
};
use parser::visit::{VisitorMut, walk_block_mut, walk_expr_mut, walk_stmt_mut};

use crate::class_node::{ClassTable, TypeEnv, qualify};
use crate::config::WarningLevel;
use crate::error::CompileError;
use crate::message::{Message, MessageKind};
use crate::source::SourceUnit;
use crate::unit::{PhaseContext, PhaseOperation};

/// Built-ins with their own value representation; user classes cannot
/// extend them.
const SEALED: &[&str] = &[
    "NullObject", "Boolean", "Number", "Integer", "Float", "String", "List", "Closure", "Matcher",
    "Class",
];

pub(crate) struct Resolve;

impl PhaseOperation for Resolve {
    fn name(&self) -> &str {
        "resolve"
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        let warn_dynamic = ctx.config().warns(WarningLevel::Possible);
        let own = unit.classes.clone();
        let mut messages = Vec::new();
        resolve_symbols(ctx.classes_mut(), &own, unit.name(), &mut messages);
        unit.messages.append(&mut messages);

        let table = ctx.classes();
        unit.with_ast(|module, messages, source| {
            check_imports(module, table, source, messages);
            let package = module.package.as_ref().map(|p| p.to_string());
            for item in &mut module.items {
                let Item::Class(decl) = item else { continue };
                let Some(node) = table.get(&qualify(package.as_deref(), &decl.name)) else {
                    continue;
                };
                let mut resolver = BodyResolver {
                    table,
                    env: node.env.as_ref(),
                    class: node.name.clone(),
                    is_script: node.is_script,
                    static_context: false,
                    functions: Vec::new(),
                    messages: &mut *messages,
                    source,
                    warn_dynamic,
                };
                if let Some(sup) = &mut decl.superclass {
                    sup.resolved = node.superclass.clone();
                }
                resolver.resolve_class(decl);
            }
        })?;
        Ok(())
    }
}

fn error(source: &Arc<str>, span: Span, text: impl Into<String>) -> Message {
    Message::error(MessageKind::Semantic, source.clone(), Some(span), text)
}

fn unresolved(name: &str) -> String {
    format!("unable to resolve class {name}")
}

/// Resolve the written type names of the classes in `own`.
fn resolve_symbols(table: &mut ClassTable, own: &[Arc<str>], source: &Arc<str>, out: &mut Vec<Message>) {
    for name in own {
        let Some(class) = table.get(name) else { continue };
        let env = class.env.clone();
        let span = class.span;

        let superclass = match &class.written_super {
            None => None,
            Some(written) => {
                let at = class.super_span.unwrap_or(span);
                match table.resolve_type(&env, written) {
                    Some(sup) if SEALED.contains(&&*sup) => {
                        out.push(error(source, at, format!("cannot extend built-in class {sup}")));
                        None
                    }
                    Some(sup) => Some(sup),
                    None => {
                        out.push(error(source, at, unresolved(written)));
                        None
                    }
                }
            }
        };
        let mut resolve_all = |written: &[Option<String>], at: Span| -> Vec<Option<Arc<str>>> {
            written
                .iter()
                .map(|w| {
                    let w = w.as_deref()?;
                    let resolved = table.resolve_type(&env, w);
                    if resolved.is_none() {
                        out.push(error(source, at, unresolved(w)));
                    }
                    resolved
                })
                .collect()
        };
        let fields: Vec<_> = class
            .fields
            .iter()
            .map(|f| resolve_all(std::slice::from_ref(&f.written_type), f.span).remove(0))
            .collect();
        let methods: Vec<_> = class
            .methods
            .iter()
            .map(|m| resolve_all(&m.written_params, m.span))
            .collect();
        let ctors: Vec<_> = class
            .constructors
            .iter()
            .map(|m| resolve_all(&m.written_params, m.span))
            .collect();

        let Some(class) = table.get_mut(name) else { continue };
        class.superclass = superclass.or_else(|| Some("Object".into()));
        for (f, ty) in class.fields.iter_mut().zip(fields) {
            f.ty = ty;
        }
        for (m, params) in class.methods.iter_mut().zip(methods) {
            m.params = params;
        }
        for (m, params) in class.constructors.iter_mut().zip(ctors) {
            m.params = params;
        }
    }

    let cyclic: Vec<&Arc<str>> = own.iter().filter(|n| table.is_cyclic(n)).collect();
    for name in cyclic {
        if let Some(class) = table.get_mut(name) {
            let at = class.super_span.unwrap_or(class.span);
            out.push(error(source, at, format!("cyclic inheritance involving {name}")));
            // Break the cycle so later lookups terminate.
            class.superclass = Some("Object".into());
        }
    }

    for name in own {
        let Some(class) = table.get(name) else { continue };
        for (kind, list) in [("method", &class.methods), ("constructor", &class.constructors)] {
            for (i, m) in list.iter().enumerate() {
                let clash = list[..i].iter().any(|earlier| {
                    earlier.name == m.name
                        && earlier.arity() == m.arity()
                        && earlier
                            .params
                            .iter()
                            .zip(&m.params)
                            .all(|(a, b)| a.as_deref().unwrap_or("Object") == b.as_deref().unwrap_or("Object"))
                });
                if clash {
                    out.push(error(
                        source,
                        m.span,
                        format!(
                            "repetitive {kind} name/signature for {kind} '{}' in class '{name}'",
                            m.signature()
                        ),
                    ));
                }
            }
        }
    }
}

fn check_imports(module: &Module, table: &ClassTable, source: &Arc<str>, out: &mut Vec<Message>) {
    for import in &module.imports {
        let path = import.path.to_string();
        if !table.contains(&path) {
            out.push(error(source, import.span, unresolved(&path)));
        }
    }
}

struct Function {
    locals: Vec<LocalVar>,
    scopes: Vec<Vec<(Name, VarId)>>,
    captures: Vec<Capture>,
    is_closure: bool,
    loop_depth: usize,
}

impl Function {
    fn new(is_closure: bool) -> Self {
        Self {
            locals: Vec::new(),
            scopes: vec![Vec::new()],
            captures: Vec::new(),
            is_closure,
            loop_depth: 0,
        }
    }

    fn find(&self, name: &str) -> Option<VarId> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.iter().rev())
            .find(|(n, _)| &**n == name)
            .map(|(_, id)| *id)
    }
}

struct BodyResolver<'a> {
    table: &'a ClassTable,
    env: &'a TypeEnv,
    class: Arc<str>,
    is_script: bool,
    static_context: bool,
    functions: Vec<Function>,
    messages: &'a mut Vec<Message>,
    source: &'a Arc<str>,
    warn_dynamic: bool,
}

impl BodyResolver<'_> {
    fn error(&mut self, span: Span, text: impl Into<String>) {
        self.messages.push(error(self.source, span, text));
    }

    fn resolve_class(&mut self, decl: &mut ClassDecl) {
        for member in &mut decl.members {
            match member {
                Member::Field(f) => {
                    if let Some(ty) = &mut f.ty {
                        self.resolve_type_quiet(ty);
                    }
                    if let Some(init) = &mut f.init {
                        // Initializers run in a body of their own.
                        self.static_context = f.is_static;
                        self.functions.push(Function::new(false));
                        self.visit_expr_mut(init);
                        self.functions.pop();
                    }
                }
                Member::Method(m) | Member::Constructor(m) => self.visit_method_mut(m),
                Member::Error(_) => {}
            }
        }
    }

    fn resolve_type(&mut self, ty: &mut TypeRef) {
        if !self.resolve_type_quiet(ty) {
            let written = ty.name.to_string();
            self.error(ty.span, unresolved(&written));
        }
    }

    /// For member signatures, already checked against the class table.
    fn resolve_type_quiet(&mut self, ty: &mut TypeRef) -> bool {
        ty.resolved = self.table.resolve_type(self.env, &ty.name.to_string());
        ty.resolved.is_some()
    }

    fn check_in_loop(&mut self, span: Span, word: &str) {
        if self.current().loop_depth == 0 {
            self.error(span, format!("the {word} statement is only allowed inside loops"));
        }
    }

    fn current(&mut self) -> &mut Function {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn declare(&mut self, name: &Name, ty: Option<&TypeRef>, is_param: bool, span: Span) -> VarId {
        if self.current().find(name).is_some() {
            self.error(
                span,
                format!("the current scope already contains a variable of the name {name}"),
            );
        }
        let f = self.current();
        let id = VarId(f.locals.len() as u32);
        f.locals.push(LocalVar {
            name: name.clone(),
            ty: ty.and_then(|t| t.resolved.clone()),
            is_param,
            captured: false,
        });
        if let Some(scope) = f.scopes.last_mut() {
            scope.push((name.clone(), id));
        }
        id
    }

    /// Local or captured binding for `name`, threading captures through
    /// every closure between the use and the declaring function.
    fn lookup_local(&mut self, depth: usize, name: &Name) -> Option<Binding> {
        let f = &mut self.functions[depth];
        if let Some(id) = f.find(name) {
            return Some(Binding::Local(id));
        }
        if let Some(i) = f.captures.iter().position(|c| &c.name == name) {
            return Some(Binding::Captured(i as u32));
        }
        if !f.is_closure || depth == 0 {
            return None;
        }
        let source = match self.lookup_local(depth - 1, name)? {
            Binding::Local(id) => {
                self.functions[depth - 1].locals[id.0 as usize].captured = true;
                CaptureSource::Local(id)
            }
            Binding::Captured(i) => CaptureSource::Captured(i),
            other => return Some(other),
        };
        let f = &mut self.functions[depth];
        f.captures.push(Capture {
            name: name.clone(),
            source,
        });
        Some(Binding::Captured(f.captures.len() as u32 - 1))
    }

    fn bind(&mut self, name: &Name, span: Span) -> Binding {
        let depth = self.functions.len() - 1;
        if let Some(b) = self.lookup_local(depth, name) {
            return b;
        }
        if let Some((owner, field)) = self.table.find_field(&self.class, name) {
            let binding = Binding::Field {
                owner: owner.name.clone(),
                is_static: field.is_static,
            };
            if self.static_context && !field.is_static {
                self.error(
                    span,
                    format!("cannot reference instance field '{name}' from a static context"),
                );
            }
            return binding;
        }
        if builtins::primitive_class(name).is_none() {
            if let Some(class) = self.table.resolve_type(self.env, name) {
                return Binding::Class(class);
            }
        }
        let mut var = DynamicVariable::new(name.clone(), self.static_context);
        if self.functions[depth].is_closure {
            var.set_closure_shared(true);
        }
        if self.warn_dynamic && !self.is_script {
            self.messages.push(Message::warning(
                MessageKind::Semantic,
                self.source.clone(),
                Some(span),
                format!("variable '{name}' is undeclared and will be looked up at run time"),
            ));
        }
        Binding::Dynamic(var)
    }

    fn with_scope(&mut self, f: impl FnOnce(&mut Self)) {
        self.current().scopes.push(Vec::new());
        f(self);
        self.current().scopes.pop();
    }

    fn in_loop(&mut self, f: impl FnOnce(&mut Self)) {
        self.current().loop_depth += 1;
        f(self);
        self.current().loop_depth -= 1;
    }
}

impl VisitorMut for BodyResolver<'_> {
    fn visit_method_mut(&mut self, m: &mut MethodDecl) {
        self.static_context = m.is_static;
        for p in &mut m.params {
            if let Some(ty) = &mut p.ty {
                self.resolve_type_quiet(ty);
            }
        }
        if let Some(ty) = &mut m.return_type {
            self.resolve_type(ty);
        }
        self.functions.push(Function::new(false));
        for p in &mut m.params {
            p.var = Some(self.declare(&p.name, p.ty.as_ref(), true, p.span));
        }
        self.visit_block_mut(&mut m.body);
        if let Some(f) = self.functions.pop() {
            m.locals = f.locals;
        }
    }

    fn visit_closure_mut(&mut self, c: &mut ClosureExpr) {
        for p in &mut c.params {
            if let Some(ty) = &mut p.ty {
                self.resolve_type(ty);
            }
        }
        self.functions.push(Function::new(true));
        for p in &mut c.params {
            p.var = Some(self.declare(&p.name, p.ty.as_ref(), true, p.span));
        }
        self.visit_block_mut(&mut c.body);
        if let Some(f) = self.functions.pop() {
            c.locals = f.locals;
            c.captures = f.captures;
        }
    }

    fn visit_block_mut(&mut self, block: &mut Block) {
        self.with_scope(|r| walk_block_mut(r, block));
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::VarDecl { name, ty, init, var } => {
                if let Some(init) = init {
                    self.visit_expr_mut(init);
                }
                if let Some(ty) = ty {
                    self.resolve_type(ty);
                }
                *var = Some(self.declare(name, ty.as_ref(), false, span));
            }
            StmtKind::For {
                name,
                var,
                iterable,
                body,
            } => {
                self.visit_expr_mut(iterable);
                self.with_scope(|r| {
                    *var = Some(r.declare(name, None, false, span));
                    r.in_loop(|r| r.visit_stmt_mut(body));
                });
            }
            StmtKind::While { cond, body } => {
                self.visit_expr_mut(cond);
                self.in_loop(|r| r.visit_stmt_mut(body));
            }
            StmtKind::Break => self.check_in_loop(span, "break"),
            StmtKind::Continue => self.check_in_loop(span, "continue"),
            StmtKind::Try(t) => {
                self.visit_block_mut(&mut t.body);
                for clause in &mut t.catches {
                    if let Some(ty) = &mut clause.ty {
                        self.resolve_type(ty);
                        if let Some(resolved) = &ty.resolved {
                            if !self.table.is_subclass(resolved, "Throwable") {
                                let text = format!("catch type {resolved} is not a Throwable");
                                self.error(ty.span, text);
                            }
                        }
                    }
                    let clause_span = clause.span;
                    self.with_scope(|r| {
                        clause.var = Some(r.declare(&clause.name, clause.ty.as_ref(), false, clause_span));
                        r.visit_block_mut(&mut clause.body);
                    });
                }
                if let Some(f) = &mut t.finally {
                    self.visit_block_mut(f);
                }
            }
            _ => walk_stmt_mut(self, stmt),
        }
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Variable { name, binding } => {
                *binding = self.bind(name, span);
            }
            ExprKind::Call {
                receiver: receiver @ None,
                name,
                name_span,
                args,
                ..
            } => {
                let depth = self.functions.len() - 1;
                // `f(x)` on a local holding a closure means `f.call(x)`.
                if let Some(binding) = self.lookup_local(depth, name) {
                    let callee = std::mem::replace(name, Name::from("call"));
                    *receiver = Some(Box::new(Expr::new(
                        ExprKind::Variable {
                            name: callee,
                            binding,
                        },
                        *name_span,
                    )));
                }
                for a in args {
                    self.visit_expr_mut(a);
                }
            }
            ExprKind::InstanceOf { expr, ty } => {
                self.visit_expr_mut(expr);
                self.resolve_type(ty);
            }
            ExprKind::New { ty, args } => {
                self.resolve_type(ty);
                for a in args {
                    self.visit_expr_mut(a);
                }
            }
            _ => walk_expr_mut(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::unit::CompilationUnit;

    fn analyze(src: &str) -> Result<CompilationUnit, Vec<String>> {
        let mut unit = CompilationUnit::default();
        unit.add_source_str("Test.kst", src);
        match unit.compile(Phase::SemanticAnalysis) {
            Ok(()) => Ok(unit),
            Err(e) => Err(e.messages().iter().map(|m| m.text.clone()).collect()),
        }
    }

    fn errors(src: &str) -> Vec<String> {
        match analyze(src) {
            Ok(_) => Vec::new(),
            Err(e) => e,
        }
    }

    fn run_body(unit: &CompilationUnit) -> &MethodDecl {
        let module = unit.sources()[0].ast().expect("ast");
        module
            .classes()
            .flat_map(|c| &c.members)
            .find_map(|m| match m {
                Member::Method(m) if &*m.name == "run" => Some(m),
                _ => None,
            })
            .expect("run method")
    }

    fn first_expr(stmt: &Stmt) -> &Expr {
        match &stmt.kind {
            StmtKind::Expr(e) => e,
            StmtKind::VarDecl { init: Some(e), .. } => e,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_errors() {
        let errs = errors("class A extends Missing {\n  Gadget g\n  def f(Thing t) { new Nope() }\n}");
        assert!(errs.contains(&"unable to resolve class Missing".to_string()), "{errs:?}");
        assert!(errs.contains(&"unable to resolve class Gadget".to_string()));
        assert!(errs.contains(&"unable to resolve class Thing".to_string()));
        assert!(errs.contains(&"unable to resolve class Nope".to_string()));
    }

    #[test]
    fn unknown_import_is_an_error() {
        let errs = errors("import a.b.Gone\nx = 1");
        assert_eq!(errs, ["unable to resolve class a.b.Gone"]);
    }

    #[test]
    fn cyclic_inheritance() {
        let errs = errors("class A extends B {}\nclass B extends A {}");
        assert!(errs.iter().any(|e| e.contains("cyclic inheritance involving A")), "{errs:?}");
        assert!(errs.iter().any(|e| e.contains("cyclic inheritance involving B")));
    }

    #[test]
    fn sealed_builtins_cannot_be_extended() {
        let errs = errors("class MyInt extends Integer {}");
        assert_eq!(errs, ["cannot extend built-in class Integer"]);
        assert!(errors("class Oops extends RuntimeException {}").is_empty());
    }

    #[test]
    fn duplicate_methods() {
        let errs = errors("class A {\n def f(a) {}\n def f(Object b) {}\n def f(int a) {}\n def f(a, b) {}\n}");
        assert_eq!(errs.len(), 1, "{errs:?}");
        assert!(errs[0].contains("'f(Object)'"));
    }

    #[test]
    fn duplicate_locals() {
        let errs = errors("def x = 1\nif (true) { def x = 2 }");
        assert_eq!(errs, ["the current scope already contains a variable of the name x"]);
        assert!(errors("if (true) { def y = 1 }\nif (true) { def y = 2 }").is_empty());
    }

    #[test]
    fn static_context_field_access() {
        let errs = errors("class A {\n def count = 0\n static def make() { count }\n}");
        assert_eq!(errs, ["cannot reference instance field 'count' from a static context"]);
    }

    #[test]
    fn break_outside_loop() {
        let errs = errors("break");
        assert_eq!(errs, ["the break statement is only allowed inside loops"]);
        assert!(errors("while (true) { break }").is_empty());
    }

    #[test]
    fn catch_type_must_be_throwable() {
        let errs = errors("try { } catch (String s) { }");
        assert_eq!(errs, ["catch type String is not a Throwable"]);
    }

    #[test]
    fn bindings() {
        let unit = analyze("def a = 1\nb = a\nprintln(b)").unwrap();
        let run = run_body(&unit);
        assert_eq!(run.locals.len(), 1);
        let ExprKind::Assign { target, value, .. } = &first_expr(&run.body.stmts[1]).kind else {
            panic!("assignment expected");
        };
        match &target.kind {
            ExprKind::Variable { binding: Binding::Dynamic(d), .. } => {
                assert_eq!(d.type_name(), "dynamic");
                assert!(!d.is_closure_shared());
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(
            value.kind,
            ExprKind::Variable { binding: Binding::Local(VarId(0)), .. }
        ));
    }

    #[test]
    fn closures_capture_through_levels() {
        let unit = analyze("def n = 0\ndef f = { -> def g = { -> n = n + 1; free }; g }").unwrap();
        let run = run_body(&unit);
        assert!(run.locals[0].captured);
        let ExprKind::Closure(outer) = &first_expr(&run.body.stmts[1]).kind else {
            panic!("closure expected");
        };
        assert_eq!(outer.captures.len(), 1);
        assert_eq!(outer.captures[0].source, CaptureSource::Local(VarId(0)));
        let ExprKind::Closure(inner) = &first_expr(&outer.body.stmts[0]).kind else {
            panic!("inner closure expected");
        };
        assert_eq!(inner.captures[0].source, CaptureSource::Captured(0));
        match &first_expr(&inner.body.stmts[1]).kind {
            ExprKind::Variable { binding: Binding::Dynamic(d), .. } => assert!(d.is_closure_shared()),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn calling_a_local_closure() {
        let unit = analyze("def twice = { it * 2 }\ntwice(4)").unwrap();
        let run = run_body(&unit);
        match &first_expr(&run.body.stmts[1]).kind {
            ExprKind::Call { receiver: Some(r), name, .. } => {
                assert_eq!(&**name, "call");
                assert!(matches!(r.kind, ExprKind::Variable { binding: Binding::Local(_), .. }));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn fields_and_classes() {
        let unit = analyze(
            "class Base { static def shared = 1\n def x = 2 }\nclass Sub extends Base {\n def get() { x + shared + Base.shared }\n}",
        )
        .unwrap();
        let sub = unit.classes().get("Sub").unwrap();
        assert_eq!(sub.superclass.as_deref(), Some("Base"));
        let module = unit.sources()[0].ast().unwrap();
        let class = module.classes().find(|c| &*c.name == "Sub").unwrap();
        let Member::Method(get) = &class.members[0] else { panic!() };
        let mut bindings = Vec::new();
        collect_bindings(first_expr(&get.body.stmts[0]), &mut bindings);
        assert_eq!(bindings, vec![
            Binding::Field { owner: "Base".into(), is_static: false },
            Binding::Field { owner: "Base".into(), is_static: true },
            Binding::Class("Base".into()),
        ]);
    }

    fn collect_bindings(e: &Expr, out: &mut Vec<Binding>) {
        match &e.kind {
            ExprKind::Variable { binding, .. } => out.push(binding.clone()),
            ExprKind::Binary { lhs, rhs, .. } => {
                collect_bindings(lhs, out);
                collect_bindings(rhs, out);
            }
            ExprKind::Property { receiver, .. } => collect_bindings(receiver, out),
            _ => {}
        }
    }

    #[test]
    fn possible_warnings_for_dynamic_names_in_classes() {
        let mut config = crate::CompilerConfiguration::default();
        config.warning_level = WarningLevel::Possible;
        let mut unit = CompilationUnit::new(config);
        unit.add_source_str("W.kst", "class W { def f() { mystery } }");
        unit.compile(Phase::SemanticAnalysis).unwrap();
        assert_eq!(unit.messages().len(), 1);
        assert!(!unit.messages()[0].is_error());
    }
}
