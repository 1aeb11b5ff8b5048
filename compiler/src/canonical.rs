//! Canonicalization: rewrites that leave the tree in the shape
//! instruction selection expects.
//!
//! - the last statement of a method or closure returns its value;
//! - literal arithmetic is folded when the result is exactly what the
//!   runtime would compute;
//! - field initializers move into synthesized `<init>` and `<clinit>`
//!   methods.
use parser::Span;
use parser::ast::{
    AssignOp, Binding, BinaryOp, Block, ClassDecl, ClosureExpr, Expr, ExprKind, Item, Member,
    MethodDecl, Name, Stmt, StmtKind, UnaryOp,
};
use parser::visit::{VisitorMut, walk_block_mut, walk_expr_mut};

use crate::class_node::qualify;
use crate::error::CompileError;
use crate::source::SourceUnit;
use crate::unit::{PhaseContext, PhaseOperation};

pub const INITIALIZER: &str = "<init>";
pub const STATIC_INITIALIZER: &str = "<clinit>";

pub(crate) struct Canonicalize;

impl PhaseOperation for Canonicalize {
    fn name(&self) -> &str {
        "canonicalize"
    }

    fn call(&mut self, _ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        unit.with_ast(|module, _, _| {
            let package = module.package.as_ref().map(|p| p.to_string());
            for item in &mut module.items {
                if let Item::Class(class) = item {
                    let owner = qualify(package.as_deref(), &class.name);
                    Folder.visit_class_mut(class);
                    add_returns_to_class(class);
                    move_field_initializers(class, &owner);
                }
            }
        })
    }
}

// ── ReturnAdder ─────────────────────────────────────────────────────

fn returns_value(m: &MethodDecl) -> bool {
    !matches!(&m.return_type, Some(t) if t.name.to_string() == "void")
}

fn add_returns_to_class(class: &mut ClassDecl) {
    for member in &mut class.members {
        if let Member::Method(m) = member {
            if returns_value(m) {
                add_returns(&mut m.body);
            }
        }
    }
    ClosureReturns.visit_class_mut(class);
}

struct ClosureReturns;

impl VisitorMut for ClosureReturns {
    fn visit_closure_mut(&mut self, closure: &mut ClosureExpr) {
        walk_block_mut(self, &mut closure.body);
        add_returns(&mut closure.body);
    }
}

fn add_returns(block: &mut Block) {
    if let Some(last) = block.stmts.last_mut() {
        add_return(last);
    }
}

fn add_return(stmt: &mut Stmt) {
    let kind = std::mem::replace(&mut stmt.kind, StmtKind::Error);
    stmt.kind = match kind {
        StmtKind::Expr(e) => StmtKind::Return(Some(e)),
        StmtKind::If {
            cond,
            mut then_branch,
            mut else_branch,
        } => {
            add_return(&mut then_branch);
            if let Some(e) = &mut else_branch {
                add_return(e);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            }
        }
        StmtKind::Block(mut b) => {
            add_returns(&mut b);
            StmtKind::Block(b)
        }
        StmtKind::Try(mut t) => {
            add_returns(&mut t.body);
            for c in &mut t.catches {
                add_returns(&mut c.body);
            }
            StmtKind::Try(t)
        }
        other => other,
    };
}

// ── Constant folding ────────────────────────────────────────────────

struct Folder;

impl VisitorMut for Folder {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
        if let Some(folded) = fold(&expr.kind) {
            expr.kind = folded;
        }
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(kind: &ExprKind) -> Option<Num> {
        match kind {
            ExprKind::Int(v) => Some(Num::Int(*v)),
            ExprKind::Float(v) => Some(Num::Float(*v)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }
}

/// The folded form of `kind`, if its value is known and exact.
fn fold(kind: &ExprKind) -> Option<ExprKind> {
    match kind {
        ExprKind::Unary { op, operand } => match (op, &operand.kind) {
            (UnaryOp::Neg, ExprKind::Int(v)) => v.checked_neg().map(ExprKind::Int),
            (UnaryOp::Neg, ExprKind::Float(v)) => Some(ExprKind::Float(-v)),
            (UnaryOp::Not, ExprKind::Bool(b)) => Some(ExprKind::Bool(!b)),
            _ => None,
        },
        ExprKind::Binary { op, lhs, rhs } => fold_binary(*op, &lhs.kind, &rhs.kind),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: &ExprKind, rhs: &ExprKind) -> Option<ExprKind> {
    if let (ExprKind::Bool(a), ExprKind::Bool(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::And => Some(ExprKind::Bool(*a && *b)),
            BinaryOp::Or => Some(ExprKind::Bool(*a || *b)),
            BinaryOp::Eq => Some(ExprKind::Bool(a == b)),
            BinaryOp::Ne => Some(ExprKind::Bool(a != b)),
            _ => None,
        };
    }
    if let (ExprKind::Str(a), ExprKind::Str(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::Add => Some(ExprKind::Str(format!("{a}{b}"))),
            BinaryOp::Eq => Some(ExprKind::Bool(a == b)),
            BinaryOp::Ne => Some(ExprKind::Bool(a != b)),
            _ => None,
        };
    }
    let (a, b) = (Num::of(lhs)?, Num::of(rhs)?);
    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        return match op {
            BinaryOp::Add => a.checked_add(b).map(ExprKind::Int),
            BinaryOp::Sub => a.checked_sub(b).map(ExprKind::Int),
            BinaryOp::Mul => a.checked_mul(b).map(ExprKind::Int),
            // Integer division yields a float; division by zero must raise
            // at run time.
            BinaryOp::Div if b != 0 => Some(ExprKind::Float(a as f64 / b as f64)),
            BinaryOp::Mod if b != 0 => Some(ExprKind::Int(a.wrapping_rem(b))),
            BinaryOp::Eq => Some(ExprKind::Bool(a == b)),
            BinaryOp::Ne => Some(ExprKind::Bool(a != b)),
            BinaryOp::Lt => Some(ExprKind::Bool(a < b)),
            BinaryOp::Le => Some(ExprKind::Bool(a <= b)),
            BinaryOp::Gt => Some(ExprKind::Bool(a > b)),
            BinaryOp::Ge => Some(ExprKind::Bool(a >= b)),
            _ => None,
        };
    }
    let (a, b) = (a.as_f64(), b.as_f64());
    match op {
        BinaryOp::Add => Some(ExprKind::Float(a + b)),
        BinaryOp::Sub => Some(ExprKind::Float(a - b)),
        BinaryOp::Mul => Some(ExprKind::Float(a * b)),
        BinaryOp::Div => Some(ExprKind::Float(a / b)),
        BinaryOp::Mod => Some(ExprKind::Float(a % b)),
        BinaryOp::Eq => Some(ExprKind::Bool(a == b)),
        BinaryOp::Ne => Some(ExprKind::Bool(a != b)),
        BinaryOp::Lt => Some(ExprKind::Bool(a < b)),
        BinaryOp::Le => Some(ExprKind::Bool(a <= b)),
        BinaryOp::Gt => Some(ExprKind::Bool(a > b)),
        BinaryOp::Ge => Some(ExprKind::Bool(a >= b)),
        BinaryOp::And | BinaryOp::Or => None,
    }
}

// ── Field initializers ──────────────────────────────────────────────

fn move_field_initializers(class: &mut ClassDecl, owner: &str) {
    let mut instance = Vec::new();
    let mut statics = Vec::new();
    for member in &mut class.members {
        let Member::Field(f) = member else { continue };
        let Some(init) = f.init.take() else { continue };
        let span = f.span;
        let target = Expr::new(
            ExprKind::Variable {
                name: f.name.clone(),
                binding: Binding::Field {
                    owner: owner.into(),
                    is_static: f.is_static,
                },
            },
            span,
        );
        let assign = Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                op: AssignOp::Assign,
                value: Box::new(init),
            },
            span,
        );
        let stmt = Stmt::new(StmtKind::Expr(assign), span);
        if f.is_static {
            statics.push(stmt);
        } else {
            instance.push(stmt);
        }
    }
    for (name, stmts, is_static) in [(INITIALIZER, instance, false), (STATIC_INITIALIZER, statics, true)] {
        if stmts.is_empty() {
            continue;
        }
        let span = stmts
            .iter()
            .map(|s| s.span)
            .reduce(Span::merge)
            .unwrap_or(class.span);
        class.members.push(Member::Method(MethodDecl {
            name: Name::from(name),
            name_span: span,
            params: Vec::new(),
            return_type: None,
            is_static,
            body: Block { stmts, span },
            doc: Vec::new(),
            locals: Vec::new(),
            span,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::unit::CompilationUnit;

    fn canonical(src: &str) -> CompilationUnit {
        let mut config = crate::CompilerConfiguration::default();
        config.keep_ast = true;
        let mut unit = CompilationUnit::new(config);
        unit.add_source_str("T.kst", src);
        unit.compile(Phase::Canonicalization).expect("compiles");
        unit
    }

    fn method<'a>(unit: &'a CompilationUnit, class: &str, name: &str) -> &'a MethodDecl {
        let module = unit.sources()[0].ast().expect("ast");
        let class = module.classes().find(|c| &*c.name == class).expect("class");
        class
            .members
            .iter()
            .find_map(|m| match m {
                Member::Method(m) if &*m.name == name => Some(m),
                _ => None,
            })
            .expect("method")
    }

    fn folded(expr: &str) -> ExprKind {
        let unit = canonical(&format!("x = {expr}"));
        let run = method(&unit, "T", "run");
        match &run.body.stmts[0].kind {
            StmtKind::Return(Some(Expr {
                kind: ExprKind::Assign { value, .. },
                ..
            })) => value.kind.clone(),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn folding_matches_runtime_arithmetic() {
        assert_eq!(folded("1 + 2 * 3"), ExprKind::Int(7));
        assert_eq!(folded("7 / 2"), ExprKind::Float(3.5));
        assert_eq!(folded("7 % 3"), ExprKind::Int(1));
        assert_eq!(folded("1 + 0.5"), ExprKind::Float(1.5));
        assert_eq!(folded("-(3)"), ExprKind::Int(-3));
        assert_eq!(folded("2 < 3 && !false"), ExprKind::Bool(true));
        assert_eq!(folded("'a' + 'b'"), ExprKind::Str("ab".into()));
        assert_eq!(folded("1 == 1.0"), ExprKind::Bool(true));
        assert_eq!(folded("(-9223372036854775807 - 1) % -1"), ExprKind::Int(0));
    }

    #[test]
    fn folding_leaves_runtime_errors_alone() {
        assert!(matches!(folded("1 / 0"), ExprKind::Binary { op: BinaryOp::Div, .. }));
        assert!(matches!(folded("5 % 0"), ExprKind::Binary { op: BinaryOp::Mod, .. }));
        assert!(matches!(
            folded("9223372036854775807 + 1"),
            ExprKind::Binary { op: BinaryOp::Add, .. }
        ));
    }

    #[test]
    fn returns_are_added() {
        let unit = canonical(
            "class A {\n def f(x) { if (x) { 1 } else { 2 } }\n void g() { 3 }\n def h() { def y = 1 }\n}",
        );
        let f = method(&unit, "A", "f");
        let StmtKind::If { then_branch, else_branch, .. } = &f.body.stmts[0].kind else {
            panic!("if expected");
        };
        let StmtKind::Block(then_block) = &then_branch.kind else { panic!() };
        assert!(matches!(then_block.stmts[0].kind, StmtKind::Return(Some(_))));
        let Some(else_branch) = else_branch else { panic!() };
        let StmtKind::Block(else_block) = &else_branch.kind else { panic!() };
        assert!(matches!(else_block.stmts[0].kind, StmtKind::Return(Some(_))));

        let g = method(&unit, "A", "g");
        assert!(matches!(g.body.stmts[0].kind, StmtKind::Expr(_)));
        let h = method(&unit, "A", "h");
        assert!(matches!(h.body.stmts[0].kind, StmtKind::VarDecl { .. }));
    }

    #[test]
    fn closures_return_their_last_expression() {
        let unit = canonical("def c = { it + 1 }");
        let run = method(&unit, "T", "run");
        let StmtKind::VarDecl { init: Some(init), .. } = &run.body.stmts[0].kind else {
            panic!()
        };
        let ExprKind::Closure(c) = &init.kind else { panic!() };
        assert!(matches!(c.body.stmts[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn field_initializers_move_to_init_methods() {
        let unit = canonical("package p\nclass A {\n def a = 1\n static def b = [2]\n def c\n}");
        let init = method(&unit, "A", INITIALIZER);
        assert!(!init.is_static);
        assert_eq!(init.body.stmts.len(), 1);
        let clinit = method(&unit, "A", STATIC_INITIALIZER);
        assert!(clinit.is_static);
        match &clinit.body.stmts[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Assign { target, .. },
                ..
            }) => assert!(matches!(
                &target.kind,
                ExprKind::Variable { binding: Binding::Field { owner, is_static: true }, .. }
                    if &**owner == "p.A"
            )),
            other => panic!("{other:?}"),
        }
    }
}
