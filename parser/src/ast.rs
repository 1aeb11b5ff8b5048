/// Abstract syntax tree for kestrel compilation units.
///
/// The tree is a closed set of node enums: traversal and lowering match on
/// them exhaustively, so adding a variant breaks every pass that forgot it.
/// Every node carries a [`Span`].
///
/// # Decoration
///
/// Some nodes have fields the parser leaves empty and later compiler
/// phases fill in place: [`Binding`]s on variables, resolved names on
/// [`TypeRef`]s, local variable tables on methods and closures.
use std::fmt;
use std::sync::Arc;

use crate::span::Span;

/// Interned identifier text.
pub type Name = Arc<str>;

/// A single comment preserved from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub kind: CommentKind,
    /// The text content (without delimiters).
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    /// `// ...`
    Line,
    /// `/* ... */`
    Block,
}

// ═══════════════════════════════════════════════════════════════════
// Compilation unit level
// ═══════════════════════════════════════════════════════════════════

/// Root of one parsed source unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub package: Option<QualifiedName>,
    pub imports: Vec<Import>,
    pub items: Vec<Item>,
    pub span: Span,
}

impl Module {
    pub fn classes(&self) -> impl Iterator<Item = &ClassDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Class(c) => Some(c),
            _ => None,
        })
    }

    /// Whether the unit has code outside of class declarations.
    pub fn has_script_body(&self) -> bool {
        self.items.iter().any(|item| !matches!(item, Item::Class(_)))
    }
}

/// A dotted name such as `a.b.C`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub parts: Vec<Name>,
    pub span: Span,
}

impl QualifiedName {
    pub fn last(&self) -> &Name {
        &self.parts[self.parts.len() - 1]
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: QualifiedName,
    /// `import a.B as C`
    pub alias: Option<Name>,
    pub span: Span,
}

impl Import {
    /// The simple name the import makes visible.
    pub fn visible_name(&self) -> &Name {
        self.alias.as_ref().unwrap_or_else(|| self.path.last())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Class(ClassDecl),
    /// A top-level `def name() {}`: becomes a method of the script class.
    Method(MethodDecl),
    Stmt(Stmt),
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Class(c) => c.span,
            Item::Method(m) => m.span,
            Item::Stmt(s) => s.span,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: Name,
    pub name_span: Span,
    pub superclass: Option<TypeRef>,
    pub members: Vec<Member>,
    pub doc: Vec<Comment>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(FieldDecl),
    Method(MethodDecl),
    Constructor(MethodDecl),
    /// A member that failed to parse.
    Error(Span),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Name,
    pub ty: Option<TypeRef>,
    pub is_static: bool,
    pub init: Option<Expr>,
    pub span: Span,
}

/// Methods, constructors, and top-level functions.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: Name,
    pub name_span: Span,
    pub params: Vec<Param>,
    pub return_type: Option<TypeRef>,
    pub is_static: bool,
    pub body: Block,
    pub doc: Vec<Comment>,
    /// Filled by semantic analysis.
    pub locals: Vec<LocalVar>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Name,
    pub ty: Option<TypeRef>,
    /// Filled by semantic analysis.
    pub var: Option<VarId>,
    pub span: Span,
}

/// A reference to a type by name, e.g. a parameter type or `new T()`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: QualifiedName,
    /// Fully qualified name, filled by semantic analysis.
    pub resolved: Option<Name>,
    pub span: Span,
}

impl TypeRef {
    /// The resolved name if known, otherwise the written one.
    pub fn display_name(&self) -> String {
        match &self.resolved {
            Some(r) => r.to_string(),
            None => self.name.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Variables and bindings
// ═══════════════════════════════════════════════════════════════════

/// Index into the enclosing method's or closure's [`LocalVar`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    pub name: Name,
    pub ty: Option<Name>,
    pub is_param: bool,
    /// Referenced from a nested closure: lives in a shared cell.
    pub captured: bool,
}

/// A name with no static declaration. Resolution happens at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicVariable {
    name: Name,
    static_context: bool,
    closure_shared: bool,
}

impl DynamicVariable {
    pub fn new(name: Name, static_context: bool) -> Self {
        Self {
            name,
            static_context,
            closure_shared: false,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Always `"dynamic"`: the type is only known when the name is bound.
    pub fn type_name(&self) -> &'static str {
        "dynamic"
    }

    pub fn is_in_static_context(&self) -> bool {
        self.static_context
    }

    pub fn is_closure_shared(&self) -> bool {
        self.closure_shared
    }

    pub fn set_closure_shared(&mut self, shared: bool) {
        self.closure_shared = shared;
    }
}

/// What an identifier refers to. Parser output is always `Unresolved`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Binding {
    #[default]
    Unresolved,
    /// A local or parameter of the current method or closure.
    Local(VarId),
    /// Slot `n` of the enclosing closure's capture list.
    Captured(u32),
    Field {
        owner: Name,
        is_static: bool,
    },
    /// A class used as a value, e.g. the receiver of a static call.
    Class(Name),
    Dynamic(DynamicVariable),
}

/// Where a closure capture comes from, relative to the enclosing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Local(VarId),
    Captured(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: Name,
    pub source: CaptureSource,
}

// ═══════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    VarDecl {
        name: Name,
        ty: Option<TypeRef>,
        init: Option<Expr>,
        /// Filled by semantic analysis.
        var: Option<VarId>,
    },
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        name: Name,
        var: Option<VarId>,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Throw(Expr),
    Try(TryStmt),
    Block(Block),
    /// A statement that failed to parse.
    Error,
}

/// `try { } catch (T e) { } ... finally { }`.
///
/// Catch clauses are tried in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub body: Block,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// `None` catches `Exception`.
    pub ty: Option<TypeRef>,
    pub name: Name,
    pub var: Option<VarId>,
    pub body: Block,
    pub span: Span,
}

// ═══════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GStringPart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    GString(Vec<GStringPart>),
    Bool(bool),
    Null,
    This,
    Variable {
        name: Name,
        binding: Binding,
    },
    /// Target is a `Variable`, `Property`, or `Index` expression.
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: TypeRef,
    },
    /// `receiver.name(args)`, `receiver?.name(args)`, or `name(args)` when
    /// `receiver` is `None`.
    Call {
        receiver: Option<Box<Expr>>,
        name: Name,
        name_span: Span,
        args: Vec<Expr>,
        safe: bool,
    },
    Property {
        receiver: Box<Expr>,
        name: Name,
        safe: bool,
    },
    Index {
        receiver: Box<Expr>,
        index: Box<Expr>,
    },
    New {
        ty: TypeRef,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Closure(Box<ClosureExpr>),
    /// An expression that failed to parse.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureExpr {
    pub params: Vec<Param>,
    /// No `->` was written: the closure takes an optional `it`.
    pub implicit_param: bool,
    pub body: Block,
    /// Filled by semantic analysis.
    pub locals: Vec<LocalVar>,
    /// Filled by semantic analysis.
    pub captures: Vec<Capture>,
}
