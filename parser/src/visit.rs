/// AST traversal.
///
/// [`Visitor`] walks a tree by shared reference, [`VisitorMut`] by mutable
/// reference so passes can decorate nodes in place.  Each `visit_*` method
/// defaults to the matching `walk_*` function, which recurses into every
/// child.  The walk functions match exhaustively, so a new node kind cannot
/// be skipped silently.
use crate::ast::{
    Block, CatchClause, ClassDecl, ClosureExpr, Expr, ExprKind, FieldDecl,
    GStringPart, Item, Member, MethodDecl, Module, Stmt, StmtKind, TypeRef,
};

pub trait Visitor {
    fn visit_module(&mut self, module: &Module) {
        walk_module(self, module);
    }

    fn visit_class(&mut self, class: &ClassDecl) {
        walk_class(self, class);
    }

    fn visit_field(&mut self, field: &FieldDecl) {
        walk_field(self, field);
    }

    fn visit_method(&mut self, method: &MethodDecl) {
        walk_method(self, method);
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_catch(&mut self, clause: &CatchClause) {
        walk_catch(self, clause);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_closure(&mut self, closure: &ClosureExpr) {
        walk_closure(self, closure);
    }

    fn visit_type_ref(&mut self, _ty: &TypeRef) {}
}

pub fn walk_module<V: Visitor + ?Sized>(v: &mut V, module: &Module) {
    for item in &module.items {
        match item {
            Item::Class(c) => v.visit_class(c),
            Item::Method(m) => v.visit_method(m),
            Item::Stmt(s) => v.visit_stmt(s),
        }
    }
}

pub fn walk_class<V: Visitor + ?Sized>(v: &mut V, class: &ClassDecl) {
    if let Some(sup) = &class.superclass {
        v.visit_type_ref(sup);
    }
    for member in &class.members {
        match member {
            Member::Field(f) => v.visit_field(f),
            Member::Method(m) | Member::Constructor(m) => v.visit_method(m),
            Member::Error(_) => {}
        }
    }
}

pub fn walk_field<V: Visitor + ?Sized>(v: &mut V, field: &FieldDecl) {
    if let Some(ty) = &field.ty {
        v.visit_type_ref(ty);
    }
    if let Some(init) = &field.init {
        v.visit_expr(init);
    }
}

pub fn walk_method<V: Visitor + ?Sized>(v: &mut V, method: &MethodDecl) {
    for p in &method.params {
        if let Some(ty) = &p.ty {
            v.visit_type_ref(ty);
        }
    }
    if let Some(ty) = &method.return_type {
        v.visit_type_ref(ty);
    }
    v.visit_block(&method.body);
}

pub fn walk_block<V: Visitor + ?Sized>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expr(e) | StmtKind::Throw(e) => v.visit_expr(e),
        StmtKind::VarDecl { ty, init, .. } => {
            if let Some(ty) = ty {
                v.visit_type_ref(ty);
            }
            if let Some(init) = init {
                v.visit_expr(init);
            }
        }
        StmtKind::Return(value) => {
            if let Some(e) = value {
                v.visit_expr(e);
            }
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            v.visit_expr(cond);
            v.visit_stmt(then_branch);
            if let Some(e) = else_branch {
                v.visit_stmt(e);
            }
        }
        StmtKind::While { cond, body } => {
            v.visit_expr(cond);
            v.visit_stmt(body);
        }
        StmtKind::For { iterable, body, .. } => {
            v.visit_expr(iterable);
            v.visit_stmt(body);
        }
        StmtKind::Try(t) => {
            v.visit_block(&t.body);
            for clause in &t.catches {
                v.visit_catch(clause);
            }
            if let Some(f) = &t.finally {
                v.visit_block(f);
            }
        }
        StmtKind::Block(b) => v.visit_block(b),
        StmtKind::Break | StmtKind::Continue | StmtKind::Error => {}
    }
}

pub fn walk_catch<V: Visitor + ?Sized>(v: &mut V, clause: &CatchClause) {
    if let Some(ty) = &clause.ty {
        v.visit_type_ref(ty);
    }
    v.visit_block(&clause.body);
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::This
        | ExprKind::Variable { .. }
        | ExprKind::Error => {}
        ExprKind::GString(parts) => {
            for part in parts {
                if let GStringPart::Expr(e) = part {
                    v.visit_expr(e);
                }
            }
        }
        ExprKind::Assign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Unary { operand, .. } => v.visit_expr(operand),
        ExprKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            v.visit_expr(cond);
            v.visit_expr(then_expr);
            v.visit_expr(else_expr);
        }
        ExprKind::InstanceOf { expr, ty } => {
            v.visit_expr(expr);
            v.visit_type_ref(ty);
        }
        ExprKind::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                v.visit_expr(r);
            }
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::Property { receiver, .. } => v.visit_expr(receiver),
        ExprKind::Index { receiver, index } => {
            v.visit_expr(receiver);
            v.visit_expr(index);
        }
        ExprKind::New { ty, args } => {
            v.visit_type_ref(ty);
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::List(items) => {
            for e in items {
                v.visit_expr(e);
            }
        }
        ExprKind::Closure(c) => v.visit_closure(c),
    }
}

pub fn walk_closure<V: Visitor + ?Sized>(v: &mut V, closure: &ClosureExpr) {
    for p in &closure.params {
        if let Some(ty) = &p.ty {
            v.visit_type_ref(ty);
        }
    }
    v.visit_block(&closure.body);
}

// ═══════════════════════════════════════════════════════════════════
// Mutable traversal
// ═══════════════════════════════════════════════════════════════════

pub trait VisitorMut {
    fn visit_module_mut(&mut self, module: &mut Module) {
        walk_module_mut(self, module);
    }

    fn visit_class_mut(&mut self, class: &mut ClassDecl) {
        walk_class_mut(self, class);
    }

    fn visit_method_mut(&mut self, method: &mut MethodDecl) {
        walk_block_mut(self, &mut method.body);
    }

    fn visit_block_mut(&mut self, block: &mut Block) {
        walk_block_mut(self, block);
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    fn visit_closure_mut(&mut self, closure: &mut ClosureExpr) {
        walk_block_mut(self, &mut closure.body);
    }
}

pub fn walk_module_mut<V: VisitorMut + ?Sized>(v: &mut V, module: &mut Module) {
    for item in &mut module.items {
        match item {
            Item::Class(c) => v.visit_class_mut(c),
            Item::Method(m) => v.visit_method_mut(m),
            Item::Stmt(s) => v.visit_stmt_mut(s),
        }
    }
}

pub fn walk_class_mut<V: VisitorMut + ?Sized>(v: &mut V, class: &mut ClassDecl) {
    for member in &mut class.members {
        match member {
            Member::Field(f) => {
                if let Some(init) = &mut f.init {
                    v.visit_expr_mut(init);
                }
            }
            Member::Method(m) | Member::Constructor(m) => v.visit_method_mut(m),
            Member::Error(_) => {}
        }
    }
}

pub fn walk_block_mut<V: VisitorMut + ?Sized>(v: &mut V, block: &mut Block) {
    for stmt in &mut block.stmts {
        v.visit_stmt_mut(stmt);
    }
}

pub fn walk_stmt_mut<V: VisitorMut + ?Sized>(v: &mut V, stmt: &mut Stmt) {
    match &mut stmt.kind {
        StmtKind::Expr(e) | StmtKind::Throw(e) => v.visit_expr_mut(e),
        StmtKind::VarDecl { init, .. } => {
            if let Some(init) = init {
                v.visit_expr_mut(init);
            }
        }
        StmtKind::Return(value) => {
            if let Some(e) = value {
                v.visit_expr_mut(e);
            }
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            v.visit_expr_mut(cond);
            v.visit_stmt_mut(then_branch);
            if let Some(e) = else_branch {
                v.visit_stmt_mut(e);
            }
        }
        StmtKind::While { cond, body } => {
            v.visit_expr_mut(cond);
            v.visit_stmt_mut(body);
        }
        StmtKind::For { iterable, body, .. } => {
            v.visit_expr_mut(iterable);
            v.visit_stmt_mut(body);
        }
        StmtKind::Try(t) => {
            v.visit_block_mut(&mut t.body);
            for clause in &mut t.catches {
                v.visit_block_mut(&mut clause.body);
            }
            if let Some(f) = &mut t.finally {
                v.visit_block_mut(f);
            }
        }
        StmtKind::Block(b) => v.visit_block_mut(b),
        StmtKind::Break | StmtKind::Continue | StmtKind::Error => {}
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(v: &mut V, expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::This
        | ExprKind::Variable { .. }
        | ExprKind::Error => {}
        ExprKind::GString(parts) => {
            for part in parts {
                if let GStringPart::Expr(e) = part {
                    v.visit_expr_mut(e);
                }
            }
        }
        ExprKind::Assign { target, value, .. } => {
            v.visit_expr_mut(target);
            v.visit_expr_mut(value);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            v.visit_expr_mut(lhs);
            v.visit_expr_mut(rhs);
        }
        ExprKind::Unary { operand, .. } => v.visit_expr_mut(operand),
        ExprKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            v.visit_expr_mut(cond);
            v.visit_expr_mut(then_expr);
            v.visit_expr_mut(else_expr);
        }
        ExprKind::InstanceOf { expr, .. } => v.visit_expr_mut(expr),
        ExprKind::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                v.visit_expr_mut(r);
            }
            for a in args {
                v.visit_expr_mut(a);
            }
        }
        ExprKind::Property { receiver, .. } => v.visit_expr_mut(receiver),
        ExprKind::Index { receiver, index } => {
            v.visit_expr_mut(receiver);
            v.visit_expr_mut(index);
        }
        ExprKind::New { args, .. } => {
            for a in args {
                v.visit_expr_mut(a);
            }
        }
        ExprKind::List(items) => {
            for e in items {
                v.visit_expr_mut(e);
            }
        }
        ExprKind::Closure(c) => v.visit_closure_mut(c),
    }
}
