use std::collections::VecDeque;

use crate::ast::{
    AssignOp, BinaryOp, Block, Binding, CatchClause, ClassDecl, ClosureExpr,
    Comment, CommentKind, Expr, ExprKind, FieldDecl, GStringPart, Import,
    Item, Member, MethodDecl, Module, Name, Param, QualifiedName, Stmt,
    StmtKind, TryStmt, TypeRef, UnaryOp,
};
use crate::cache::ParseTables;
use crate::span::{Pos, Span};
use crate::token::{Keyword, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for ParseError {}

/// Result of parsing one source unit: always a module, possibly partial.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutput {
    pub module: Module,
    pub errors: Vec<ParseError>,
}

impl ParseOutput {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

type PResult<T> = Result<T, ParseError>;

/// Nested expressions and statements allowed before parsing gives up on
/// the statement. Keeps deeply nested input from exhausting the stack.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Digits of `-i64::MIN`, which only fit behind a unary minus.
const MIN_INT_MAGNITUDE: &str = "9223372036854775808";

/// Type names that may start a declaration even though they are lowercase.
const PRIMITIVE_TYPES: &[&str] = &[
    "int", "long", "short", "byte", "char", "double", "float", "boolean",
    "void",
];

/// Modifiers accepted and ignored on class members.
const IGNORED_MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "final",
    "abstract",
    "synchronized",
];

fn is_type_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_uppercase()) || PRIMITIVE_TYPES.contains(&name)
}

/// Recursive-descent parser over a token stream.
///
/// Syntax errors never stop the parse: each one is recorded, the parser
/// skips to the next statement boundary, and parsing continues.  The
/// parser is an [`Iterator`] over top-level [`Item`]s after the
/// `package`/`import` header; [`parse_module`](Self::parse_module) drives
/// it to completion.
pub struct Parser<'t, I: Iterator<Item = Token>> {
    tokens: I,
    lookahead: VecDeque<Token>,
    tables: &'t ParseTables,
    last_span: Span,
    /// Tokens consumed so far, used to guarantee progress on recovery.
    consumed: usize,
    pending_comments: Vec<Comment>,
    errors: Vec<ParseError>,
    package: Option<QualifiedName>,
    imports: Vec<Import>,
    header_done: bool,
    /// Current expression and statement nesting.
    depth: usize,
}

impl<'t, I: Iterator<Item = Token>> Parser<'t, I> {
    pub fn new(tokens: I, tables: &'t ParseTables) -> Self {
        Self {
            tokens,
            lookahead: VecDeque::new(),
            tables,
            last_span: Span::point(Pos::origin()),
            consumed: 0,
            pending_comments: Vec::new(),
            errors: Vec::new(),
            package: None,
            imports: Vec::new(),
            header_done: false,
            depth: 0,
        }
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Parse the whole token stream into a module.
    pub fn parse_module(mut self) -> ParseOutput {
        let start = self.peek_span();
        let mut items = Vec::new();
        while let Some(item) = self.next() {
            items.push(item);
        }
        let end = self.peek_span();
        let module = Module {
            package: self.package.take(),
            imports: std::mem::take(&mut self.imports),
            items,
            span: Span::new(Pos::origin(), end.end).merge(start),
        };
        ParseOutput {
            module,
            errors: self.errors,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Token plumbing
    // ═══════════════════════════════════════════════════════════════

    /// Make sure at least `n + 1` significant tokens are buffered.
    /// Comments are diverted to `pending_comments`, lexer errors to the
    /// error list.
    fn fill(&mut self, n: usize) {
        while self.lookahead.len() <= n {
            match self.tokens.next() {
                Some(tok) => match &tok.kind {
                    TokenKind::LineComment(text) => {
                        self.pending_comments.push(Comment {
                            kind: CommentKind::Line,
                            text: text.clone(),
                            span: tok.span,
                        });
                    }
                    TokenKind::BlockComment(text) => {
                        self.pending_comments.push(Comment {
                            kind: CommentKind::Block,
                            text: text.clone(),
                            span: tok.span,
                        });
                    }
                    TokenKind::Error(msg) => {
                        self.errors.push(ParseError::new(msg.clone(), tok.span));
                    }
                    _ => self.lookahead.push_back(tok),
                },
                None => {
                    let span = self
                        .lookahead
                        .back()
                        .map_or(self.last_span, |t| t.span);
                    self.lookahead.push_back(Token::new(
                        TokenKind::Eof,
                        Span::point(span.end),
                        "",
                    ));
                }
            }
        }
    }

    fn peek_nth(&mut self, n: usize) -> &Token {
        self.fill(n);
        &self.lookahead[n]
    }

    fn peek_kind(&mut self) -> &TokenKind {
        &self.peek_nth(0).kind
    }

    fn peek_span(&mut self) -> Span {
        self.peek_nth(0).span
    }

    fn advance(&mut self) -> Token {
        self.fill(0);
        let tok = match self.lookahead.pop_front() {
            Some(tok) => tok,
            None => Token::new(TokenKind::Eof, Span::point(self.last_span.end), ""),
        };
        if !tok.is_eof() {
            self.last_span = tok.span;
            self.consumed += 1;
        }
        tok
    }

    fn check(&mut self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn check_keyword(&mut self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> PResult<Token> {
        if self.check(expected) {
            return Ok(self.advance());
        }
        let tok = self.peek_nth(0);
        Err(ParseError::new(
            format!("expected {}, found {}", expected.name(), tok.kind.name()),
            tok.span,
        ))
    }

    fn expect_ident(&mut self, what: &str) -> PResult<(Name, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(s) => {
                let tok = self.advance();
                Ok((self.tables.intern(&s), tok.span))
            }
            other => Err(ParseError::new(
                format!("expected {what}, found {}", other.name()),
                self.peek_span(),
            )),
        }
    }

    fn intern(&self, s: &str) -> Name {
        self.tables.intern(s)
    }

    fn error_here(&mut self, message: impl Into<String>) -> ParseError {
        let span = self.peek_span();
        ParseError::new(message, span)
    }

    /// Span from `start` up to the last consumed token.
    fn span_from(&self, start: Span) -> Span {
        if self.last_span.end.offset >= start.start.offset {
            start.merge(self.last_span)
        } else {
            Span::point(start.start)
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Index of the first non-newline token at or after `from`.
    fn next_significant(&mut self, from: usize) -> usize {
        let mut i = from;
        while matches!(self.peek_nth(i).kind, TokenKind::Newline) {
            i += 1;
        }
        i
    }

    /// Skip newlines only if the token after them is `kw`.
    fn check_keyword_across_newlines(&mut self, kw: Keyword) -> bool {
        let i = self.next_significant(0);
        if matches!(self.peek_nth(i).kind, TokenKind::Keyword(k) if k == kw) {
            self.skip_newlines();
            true
        } else {
            false
        }
    }

    fn at_statement_end(&mut self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    /// Comments that ended before `start`, for use as documentation.
    fn take_doc(&mut self, start: Span) -> Vec<Comment> {
        let (doc, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_comments)
            .into_iter()
            .partition(|c| c.span.end.offset <= start.start.offset);
        self.pending_comments = rest;
        doc
    }

    // ═══════════════════════════════════════════════════════════════
    // Recovery
    // ═══════════════════════════════════════════════════════════════

    /// Skip to the next statement boundary at the current nesting level:
    /// a newline or `;` (left in place), a closing `}` that belongs to an
    /// enclosing block (left in place), or the end of input.  Consumes at
    /// least one token when the statement that failed consumed none.
    fn synchronize(&mut self, consumed_at_start: usize) {
        if self.consumed == consumed_at_start
            && !matches!(self.peek_kind(), TokenKind::Eof | TokenKind::Newline | TokenKind::Semicolon)
        {
            self.advance();
        }
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Newline | TokenKind::Semicolon if depth == 0 => return,
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    depth += 1;
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
            self.advance();
        }
    }

    /// Parse one statement, recovering from any error inside it.
    fn parse_statement_recovering(&mut self) -> Stmt {
        let start = self.peek_span();
        let consumed = self.consumed;
        self.take_doc(start);
        let result = self.parse_statement().and_then(|stmt| {
            if self.at_statement_end() {
                Ok(stmt)
            } else {
                let found = self.peek_kind().name();
                Err(self.error_here(format!("expected end of statement, found {found}")))
            }
        });
        match result {
            Ok(stmt) => stmt,
            Err(e) => {
                log::trace!("syntax error: {e}");
                self.errors.push(e);
                self.synchronize(consumed);
                Stmt::new(StmtKind::Error, self.span_from(start))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Header: package and imports
    // ═══════════════════════════════════════════════════════════════

    fn parse_header(&mut self) {
        let mut package = None;
        let mut imports = Vec::new();
        loop {
            self.skip_terminators();
            let consumed = self.consumed;
            let result = if self.check_keyword(Keyword::Package) {
                let kw = self.advance();
                match self.parse_qualified_name() {
                    Ok(name) if package.is_none() && imports.is_empty() => {
                        package = Some(name);
                        Ok(())
                    }
                    Ok(_) => Err(ParseError::new(
                        "package declaration must come first",
                        kw.span,
                    )),
                    Err(e) => Err(e),
                }
            } else if self.check_keyword(Keyword::Import) {
                self.parse_import().map(|import| imports.push(import))
            } else {
                break;
            };
            if let Err(e) = result {
                self.errors.push(e);
                self.synchronize(consumed);
            }
        }
        self.header_done = true;
        self.package = package;
        self.imports = imports;
    }

    fn parse_import(&mut self) -> PResult<Import> {
        let start = self.advance().span;
        let path = self.parse_qualified_name()?;
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.expect_ident("import alias")?.0)
        } else {
            None
        };
        Ok(Import {
            path,
            alias,
            span: self.span_from(start),
        })
    }

    fn parse_qualified_name(&mut self) -> PResult<QualifiedName> {
        let (first, start) = self.expect_ident("name")?;
        let mut parts = vec![first];
        while self.check(&TokenKind::Dot)
            && matches!(self.peek_nth(1).kind, TokenKind::Identifier(_))
        {
            self.advance();
            parts.push(self.expect_ident("name")?.0);
        }
        Ok(QualifiedName {
            parts,
            span: self.span_from(start),
        })
    }

    fn parse_type(&mut self) -> PResult<TypeRef> {
        if self.check_keyword(Keyword::Def) {
            let tok = self.advance();
            return Ok(TypeRef {
                name: QualifiedName {
                    parts: vec![self.intern("Object")],
                    span: tok.span,
                },
                resolved: None,
                span: tok.span,
            });
        }
        let name = self.parse_qualified_name()?;
        let span = name.span;
        Ok(TypeRef {
            name,
            resolved: None,
            span,
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Top-level items and declarations
    // ═══════════════════════════════════════════════════════════════

    /// `def name(` / `static ... name(` / `Type name(` at the current
    /// position.
    fn looks_like_method(&mut self) -> bool {
        let mut i = 0;
        while matches!(self.peek_nth(i).kind, TokenKind::Keyword(Keyword::Static)) {
            i += 1;
        }
        let has_type = match &self.peek_nth(i).kind {
            TokenKind::Keyword(Keyword::Def) => true,
            TokenKind::Identifier(s) => is_type_name(s),
            _ => false,
        };
        if !has_type {
            return false;
        }
        matches!(self.peek_nth(i + 1).kind, TokenKind::Identifier(_))
            && matches!(self.peek_nth(i + 2).kind, TokenKind::LParen)
    }

    fn parse_item(&mut self) -> Item {
        let start = self.peek_span();
        let consumed = self.consumed;

        if self.check_keyword(Keyword::Package) || self.check_keyword(Keyword::Import) {
            let err = self.error_here("package and imports must precede all declarations");
            self.errors.push(err);
            self.synchronize(consumed);
            return Item::Stmt(Stmt::new(StmtKind::Error, self.span_from(start)));
        }

        if self.check_keyword(Keyword::Class) {
            let doc = self.take_doc(start);
            return match self.parse_class(doc) {
                Ok(class) => Item::Class(class),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize(consumed);
                    Item::Stmt(Stmt::new(StmtKind::Error, self.span_from(start)))
                }
            };
        }

        if self.looks_like_method() {
            let doc = self.take_doc(start);
            let is_static = self.eat_keyword(Keyword::Static);
            let result = self.parse_typed_method(is_static, doc, start);
            return match result {
                Ok(m) => Item::Method(m),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize(consumed);
                    Item::Stmt(Stmt::new(StmtKind::Error, self.span_from(start)))
                }
            };
        }

        Item::Stmt(self.parse_statement_recovering())
    }

    fn parse_class(&mut self, doc: Vec<Comment>) -> PResult<ClassDecl> {
        let start = self.advance().span;
        let (name, name_span) = self.expect_ident("class name")?;
        let superclass = if self.eat_keyword(Keyword::Extends) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.skip_newlines();
        let open = self.expect(&TokenKind::LBrace)?.span;
        let mut members = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(ParseError::new(
                        format!("unclosed class body of `{name}`"),
                        open,
                    ));
                    break;
                }
                _ => {}
            }
            let member_start = self.peek_span();
            let consumed = self.consumed;
            let result = self.parse_member(&name).and_then(|m| {
                if self.at_statement_end() {
                    Ok(m)
                } else {
                    let found = self.peek_kind().name();
                    Err(self.error_here(format!("expected end of member, found {found}")))
                }
            });
            match result {
                Ok(m) => members.push(m),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize(consumed);
                    members.push(Member::Error(self.span_from(member_start)));
                }
            }
        }
        Ok(ClassDecl {
            name,
            name_span,
            superclass,
            members,
            doc,
            span: self.span_from(start),
        })
    }

    fn parse_member(&mut self, class_name: &Name) -> PResult<Member> {
        let start = self.peek_span();
        let doc = self.take_doc(start);
        let mut is_static = false;
        loop {
            if self.eat_keyword(Keyword::Static) {
                is_static = true;
                continue;
            }
            let ignored = matches!(
                self.peek_kind(),
                TokenKind::Identifier(s) if IGNORED_MODIFIERS.contains(&s.as_str())
            );
            if ignored {
                self.advance();
                continue;
            }
            break;
        }

        // Constructor: `ClassName(`.
        let is_ctor = matches!(self.peek_kind(), TokenKind::Identifier(s) if **s == **class_name)
            && matches!(self.peek_nth(1).kind, TokenKind::LParen);
        if is_ctor {
            let (name, name_span) = self.expect_ident("constructor name")?;
            let params = self.parse_params()?;
            self.skip_newlines();
            let body = self.parse_block()?;
            return Ok(Member::Constructor(MethodDecl {
                name,
                name_span,
                params,
                return_type: None,
                is_static: false,
                body,
                doc,
                locals: Vec::new(),
                span: self.span_from(start),
            }));
        }

        let ty = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Def) => {
                self.advance();
                None
            }
            TokenKind::Identifier(_) => Some(self.parse_type()?),
            other => {
                let found = other.name();
                return Err(self.error_here(format!("expected class member, found {found}")));
            }
        };
        let (name, name_span) = self.expect_ident("member name")?;

        if self.check(&TokenKind::LParen) {
            let params = self.parse_params()?;
            self.skip_newlines();
            let body = self.parse_block()?;
            return Ok(Member::Method(MethodDecl {
                name,
                name_span,
                params,
                return_type: ty,
                is_static,
                body,
                doc,
                locals: Vec::new(),
                span: self.span_from(start),
            }));
        }

        let init = if self.eat(&TokenKind::Assign) {
            self.skip_newlines();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Member::Field(FieldDecl {
            name,
            ty,
            is_static,
            init,
            span: self.span_from(start),
        }))
    }

    /// A method at top level: `[static] (def | Type) name(params) { body }`.
    fn parse_typed_method(
        &mut self,
        is_static: bool,
        doc: Vec<Comment>,
        start: Span,
    ) -> PResult<MethodDecl> {
        let return_type = if self.eat_keyword(Keyword::Def) {
            None
        } else {
            Some(self.parse_type()?)
        };
        let (name, name_span) = self.expect_ident("method name")?;
        let params = self.parse_params()?;
        self.skip_newlines();
        let body = self.parse_block()?;
        Ok(MethodDecl {
            name,
            name_span,
            params,
            return_type,
            is_static,
            body,
            doc,
            locals: Vec::new(),
            span: self.span_from(start),
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            params.push(self.parse_param()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    /// `name`, `def name`, or `Type name`.
    fn parse_param(&mut self) -> PResult<Param> {
        let start = self.peek_span();
        let ty = if self.eat_keyword(Keyword::Def) {
            None
        } else if matches!(self.peek_kind(), TokenKind::Identifier(_))
            && matches!(
                self.peek_nth(1).kind,
                TokenKind::Identifier(_) | TokenKind::Dot
            )
        {
            Some(self.parse_type()?)
        } else {
            None
        };
        let (name, _) = self.expect_ident("parameter name")?;
        Ok(Param {
            name,
            ty,
            var: None,
            span: self.span_from(start),
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Statements
    // ═══════════════════════════════════════════════════════════════

    fn parse_block(&mut self) -> PResult<Block> {
        let open = self.expect(&TokenKind::LBrace)?.span;
        Ok(self.parse_block_rest(open))
    }

    /// Statements up to the closing `}`. The `{` is already consumed.
    fn parse_block_rest(&mut self, open: Span) -> Block {
        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(ParseError::new("unclosed `{`", open));
                    break;
                }
                _ => stmts.push(self.parse_statement_recovering()),
            }
        }
        Block {
            stmts,
            span: self.span_from(open),
        }
    }

    /// A statement used as the body of `if`/`while`/`for`.
    fn parse_body(&mut self) -> PResult<Box<Stmt>> {
        self.skip_newlines();
        Ok(Box::new(self.parse_statement()?))
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::parse_statement_at_depth)
    }

    fn parse_statement_at_depth(&mut self) -> PResult<Stmt> {
        let start = self.peek_span();
        let kind = match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Def) => {
                self.advance();
                self.parse_var_decl(None)?
            }
            TokenKind::Identifier(ref s)
                if is_type_name(s)
                    && matches!(self.peek_nth(1).kind, TokenKind::Identifier(_)) =>
            {
                let ty = self.parse_type()?;
                self.parse_var_decl(Some(ty))?
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expression()?))
                }
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                StmtKind::Throw(self.parse_expression()?)
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.parse_body()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Keyword(Keyword::For) => self.parse_for()?,
            TokenKind::Keyword(Keyword::Try) => self.parse_try()?,
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Identifier(_) if self.looks_like_command_call() => {
                self.parse_command_call()?
            }
            TokenKind::Keyword(Keyword::Class) => {
                return Err(self.error_here("class declarations are only allowed at top level"));
            }
            _ => StmtKind::Expr(self.parse_expression()?),
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    fn parse_var_decl(&mut self, ty: Option<TypeRef>) -> PResult<StmtKind> {
        let (name, _) = self.expect_ident("variable name")?;
        let init = if self.eat(&TokenKind::Assign) {
            self.skip_newlines();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(StmtKind::VarDecl {
            name,
            ty,
            init,
            var: None,
        })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let then_branch = self.parse_body()?;
        let else_branch = if self.check_keyword_across_newlines(Keyword::Else) {
            self.advance();
            Some(self.parse_body()?)
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// `for (x in e)`, `for (def x in e)`, `for (Type x in e)`.
    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        if self.check_keyword(Keyword::Def) {
            self.advance();
        } else if matches!(self.peek_nth(1).kind, TokenKind::Identifier(_)) {
            self.parse_type()?;
        }
        let (name, _) = self.expect_ident("loop variable")?;
        if !self.eat_keyword(Keyword::In) {
            return Err(self.error_here("expected `in` in for loop"));
        }
        let iterable = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;
        Ok(StmtKind::For {
            name,
            var: None,
            iterable,
            body,
        })
    }

    fn parse_try(&mut self) -> PResult<StmtKind> {
        let try_span = self.advance().span;
        self.skip_newlines();
        let body = self.parse_block()?;
        let mut catches = Vec::new();
        while self.check_keyword_across_newlines(Keyword::Catch) {
            let start = self.advance().span;
            self.expect(&TokenKind::LParen)?;
            let ty = if matches!(self.peek_nth(1).kind, TokenKind::Identifier(_) | TokenKind::Dot) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let (name, _) = self.expect_ident("exception variable")?;
            self.expect(&TokenKind::RParen)?;
            self.skip_newlines();
            let body = self.parse_block()?;
            catches.push(CatchClause {
                ty,
                name,
                var: None,
                body,
                span: self.span_from(start),
            });
        }
        let finally = if self.check_keyword_across_newlines(Keyword::Finally) {
            self.advance();
            self.skip_newlines();
            Some(self.parse_block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(ParseError::new(
                "`try` needs at least one `catch` or a `finally`",
                try_span,
            ));
        }
        Ok(StmtKind::Try(TryStmt {
            body,
            catches,
            finally,
        }))
    }

    /// `name arg, arg` on one line, e.g. `println "hi"`.
    fn looks_like_command_call(&mut self) -> bool {
        let starts_arg = matches!(
            self.peek_nth(1).kind,
            TokenKind::Integer(_)
                | TokenKind::IntegerOverflow(_)
                | TokenKind::Float(_)
                | TokenKind::String(_)
                | TokenKind::GStringStart(_)
                | TokenKind::Identifier(_)
                | TokenKind::Keyword(
                    Keyword::True
                        | Keyword::False
                        | Keyword::Null
                        | Keyword::This
                        | Keyword::New
                )
        );
        starts_arg
            && matches!(&self.peek_nth(0).kind, TokenKind::Identifier(s) if !is_type_name(s))
    }

    fn parse_command_call(&mut self) -> PResult<StmtKind> {
        let start = self.peek_span();
        let (name, name_span) = self.expect_ident("method name")?;
        let mut args = vec![self.parse_expression()?];
        while self.eat(&TokenKind::Comma) {
            self.skip_newlines();
            args.push(self.parse_expression()?);
        }
        Ok(StmtKind::Expr(Expr::new(
            ExprKind::Call {
                receiver: None,
                name,
                name_span,
                args,
                safe: false,
            },
            self.span_from(start),
        )))
    }

    // ═══════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_assignment)
    }

    /// Run `parse` one nesting level deeper, failing once the level
    /// passes [`MAX_NESTING_DEPTH`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here(format!(
                "nesting too deep (maximum {MAX_NESTING_DEPTH} levels)"
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let start = self.peek_span();
        let target = self.parse_ternary()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::AddAssign,
            TokenKind::MinusAssign => AssignOp::SubAssign,
            _ => return Ok(target),
        };
        let valid = match &target.kind {
            ExprKind::Variable { .. } | ExprKind::Index { .. } => true,
            ExprKind::Property { safe, .. } => !safe,
            _ => false,
        };
        if !valid {
            return Err(self.error_here("invalid assignment target"));
        }
        self.advance();
        self.skip_newlines();
        let value = self.nested(Self::parse_assignment)?;
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            self.span_from(start),
        ))
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let start = self.peek_span();
        let cond = self.parse_binary(1)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then_expr = self.nested(Self::parse_ternary)?;
        self.skip_newlines();
        self.expect(&TokenKind::Colon)?;
        self.skip_newlines();
        let else_expr = self.nested(Self::parse_ternary)?;
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            self.span_from(start),
        ))
    }

    /// Binary operator at the current token with its precedence.
    /// `instanceof` reports `None` as op but a precedence.
    fn binary_op(&mut self) -> Option<(Option<BinaryOp>, u8)> {
        Some(match self.peek_kind() {
            TokenKind::OrOr => (Some(BinaryOp::Or), 1),
            TokenKind::AndAnd => (Some(BinaryOp::And), 2),
            TokenKind::EqEq => (Some(BinaryOp::Eq), 3),
            TokenKind::NotEq => (Some(BinaryOp::Ne), 3),
            TokenKind::Lt => (Some(BinaryOp::Lt), 4),
            TokenKind::LtEq => (Some(BinaryOp::Le), 4),
            TokenKind::Gt => (Some(BinaryOp::Gt), 4),
            TokenKind::GtEq => (Some(BinaryOp::Ge), 4),
            TokenKind::Keyword(Keyword::InstanceOf) => (None, 4),
            TokenKind::Plus => (Some(BinaryOp::Add), 5),
            TokenKind::Minus => (Some(BinaryOp::Sub), 5),
            TokenKind::Star => (Some(BinaryOp::Mul), 6),
            TokenKind::Slash => (Some(BinaryOp::Div), 6),
            TokenKind::Percent => (Some(BinaryOp::Mod), 6),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let start = self.peek_span();
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let Some(op) = op else {
                let ty = self.parse_type()?;
                lhs = Expr::new(
                    ExprKind::InstanceOf {
                        expr: Box::new(lhs),
                        ty,
                    },
                    self.span_from(start),
                );
                continue;
            };
            self.skip_newlines();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                self.span_from(start),
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        if op == UnaryOp::Neg
            && matches!(&self.peek_nth(1).kind, TokenKind::IntegerOverflow(d) if d == MIN_INT_MAGNITUDE)
        {
            let start = self.advance().span;
            self.advance();
            return Ok(Expr::new(ExprKind::Int(i64::MIN), self.span_from(start)));
        }
        let start = self.advance().span;
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            self.span_from(start),
        ))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let start = self.peek_span();
        let mut expr = self.parse_primary()?;
        loop {
            // A line starting with `.` or `?.` continues the chain.
            if self.check(&TokenKind::Newline) {
                let i = self.next_significant(0);
                if matches!(self.peek_nth(i).kind, TokenKind::Dot | TokenKind::SafeDot) {
                    self.skip_newlines();
                }
            }
            match self.peek_kind() {
                TokenKind::Dot | TokenKind::SafeDot => {
                    let safe = matches!(self.advance().kind, TokenKind::SafeDot);
                    self.skip_newlines();
                    let (name, name_span) = self.parse_member_name()?;
                    if self.check(&TokenKind::LParen) || self.check(&TokenKind::LBrace) {
                        let args = self.parse_call_args()?;
                        expr = Expr::new(
                            ExprKind::Call {
                                receiver: Some(Box::new(expr)),
                                name,
                                name_span,
                                args,
                                safe,
                            },
                            self.span_from(start),
                        );
                    } else {
                        expr = Expr::new(
                            ExprKind::Property {
                                receiver: Box::new(expr),
                                name,
                                safe,
                            },
                            self.span_from(start),
                        );
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::new(
                        ExprKind::Index {
                            receiver: Box::new(expr),
                            index: Box::new(index),
                        },
                        self.span_from(start),
                    );
                }
                // `f(1)(2)`, `list[0](x)`: invoke the value.
                TokenKind::LParen
                    if matches!(expr.kind, ExprKind::Call { .. } | ExprKind::Index { .. }) =>
                {
                    let name_span = self.peek_span();
                    let args = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            receiver: Some(Box::new(expr)),
                            name: self.intern("call"),
                            name_span,
                            args,
                            safe: false,
                        },
                        self.span_from(start),
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Identifier after `.`; keywords are allowed as member names.
    fn parse_member_name(&mut self) -> PResult<(Name, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(s) => {
                let span = self.advance().span;
                Ok((self.intern(&s), span))
            }
            TokenKind::Keyword(k) => {
                let span = self.advance().span;
                Ok((self.intern(k.as_str()), span))
            }
            other => Err(self.error_here(format!(
                "expected member name, found {}",
                other.name()
            ))),
        }
    }

    /// `(args)` optionally followed by a trailing closure, or a lone
    /// trailing closure.
    fn parse_call_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::LParen) {
            while !self.check(&TokenKind::RParen) {
                args.push(self.parse_expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        if self.check(&TokenKind::LBrace) {
            args.push(self.parse_closure()?);
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let start = self.peek_span();
        let kind = match self.peek_kind().clone() {
            TokenKind::Integer(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            TokenKind::IntegerOverflow(_) => {
                let span = self.advance().span;
                self.errors.push(ParseError::new("integer literal out of range", span));
                ExprKind::Error
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(v)
            }
            TokenKind::String(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::GStringStart(_) => self.parse_gstring()?,
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                ExprKind::This
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let ty = self.parse_type()?;
                if !self.check(&TokenKind::LParen) {
                    return Err(self.error_here("expected `(` after type in `new`"));
                }
                let args = self.parse_call_args()?;
                ExprKind::New { ty, args }
            }
            TokenKind::Identifier(s) => {
                let name_span = self.advance().span;
                let name = self.intern(&s);
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    ExprKind::Call {
                        receiver: None,
                        name,
                        name_span,
                        args,
                        safe: false,
                    }
                } else {
                    ExprKind::Variable {
                        name,
                        binding: Binding::Unresolved,
                    }
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                // Keep the inner node but widen its span over the parens.
                return Ok(Expr::new(inner.kind, self.span_from(start)));
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                ExprKind::List(items)
            }
            TokenKind::LBrace => return self.parse_closure(),
            other => {
                return Err(self.error_here(format!(
                    "expected expression, found {}",
                    other.name()
                )));
            }
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn parse_gstring(&mut self) -> PResult<ExprKind> {
        let mut parts = Vec::new();
        if let TokenKind::GStringStart(text) = self.advance().kind {
            if !text.is_empty() {
                parts.push(GStringPart::Text(text));
            }
        }
        loop {
            let expr = self.parse_expression()?;
            parts.push(GStringPart::Expr(expr));
            match self.peek_kind().clone() {
                TokenKind::GStringMiddle(text) => {
                    self.advance();
                    if !text.is_empty() {
                        parts.push(GStringPart::Text(text));
                    }
                }
                TokenKind::GStringEnd(text) => {
                    self.advance();
                    if !text.is_empty() {
                        parts.push(GStringPart::Text(text));
                    }
                    return Ok(ExprKind::GString(parts));
                }
                other => {
                    return Err(self.error_here(format!(
                        "expected `}}` to close string interpolation, found {}",
                        other.name()
                    )));
                }
            }
        }
    }

    /// Whether the tokens after `{` form a parameter list ending in `->`.
    fn closure_has_params(&mut self) -> bool {
        let mut i = self.next_significant(1);
        loop {
            match &self.peek_nth(i).kind {
                TokenKind::Arrow => return true,
                TokenKind::Identifier(_) | TokenKind::Keyword(Keyword::Def) => {
                    i += 1;
                    if matches!(self.peek_nth(i).kind, TokenKind::Identifier(_)) {
                        i += 1;
                    }
                    match self.peek_nth(i).kind {
                        TokenKind::Arrow => return true,
                        TokenKind::Comma => i += 1,
                        _ => return false,
                    }
                }
                _ => return false,
            }
        }
    }

    fn parse_closure(&mut self) -> PResult<Expr> {
        let explicit = self.closure_has_params();
        let open = self.expect(&TokenKind::LBrace)?.span;
        let mut params = Vec::new();
        if explicit {
            self.skip_newlines();
            while !self.check(&TokenKind::Arrow) {
                params.push(self.parse_param()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Arrow)?;
        } else {
            params.push(Param {
                name: self.intern("it"),
                ty: None,
                var: None,
                span: Span::point(open.end),
            });
        }
        let body = self.parse_block_rest(open);
        Ok(Expr::new(
            ExprKind::Closure(Box::new(ClosureExpr {
                params,
                implicit_param: !explicit,
                body,
                locals: Vec::new(),
                captures: Vec::new(),
            })),
            self.span_from(open),
        ))
    }
}

impl<I: Iterator<Item = Token>> Iterator for Parser<'_, I> {
    type Item = Item;

    /// The next top-level item, or `None` at end of input.  Errors are
    /// recorded and surface as `Error` statements.
    fn next(&mut self) -> Option<Item> {
        if !self.header_done {
            self.parse_header();
        }
        self.skip_terminators();
        if self.peek_nth(0).is_eof() {
            return None;
        }
        Some(self.parse_item())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_source(src: &str) -> ParseOutput {
        let tables = ParseTables::new();
        Parser::new(Lexer::from_str(src), &tables).parse_module()
    }

    fn parse_ok(src: &str) -> Module {
        let out = parse_source(src);
        assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
        out.module
    }

    fn first_stmt(src: &str) -> StmtKind {
        match parse_ok(src).items.into_iter().next() {
            Some(Item::Stmt(s)) => s.kind,
            other => panic!("expected statement, got {other:?}"),
        }
    }

    fn first_expr(src: &str) -> ExprKind {
        match first_stmt(src) {
            StmtKind::Expr(e) => e.kind,
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn parse_package_and_imports() {
        let m = parse_ok("package a.b\nimport x.y.Z\nimport x.W as V\n");
        assert_eq!(m.package.unwrap().to_string(), "a.b");
        assert_eq!(m.imports.len(), 2);
        assert_eq!(&*m.imports[0].visible_name().clone(), "Z");
        assert_eq!(&*m.imports[1].visible_name().clone(), "V");
    }

    #[test]
    fn parse_class_with_members() {
        let m = parse_ok(
            "/** A point. */\nclass Point extends Base {\n  int x = 0\n  static def count\n  Point(a) { x = a }\n  def norm() { x * x }\n  String name(int p) { 'p' }\n}\n",
        );
        let class = m.classes().next().unwrap();
        assert_eq!(&*class.name, "Point");
        assert_eq!(class.superclass.as_ref().unwrap().name.to_string(), "Base");
        assert_eq!(class.doc.len(), 1);
        assert_eq!(class.members.len(), 5);
        assert!(matches!(&class.members[0], Member::Field(f) if &*f.name == "x" && f.ty.is_some()));
        assert!(matches!(&class.members[1], Member::Field(f) if f.is_static));
        assert!(matches!(&class.members[2], Member::Constructor(c) if c.params.len() == 1));
        assert!(matches!(&class.members[3], Member::Method(m) if &*m.name == "norm"));
        assert!(matches!(&class.members[4], Member::Method(m) if m.params[0].ty.is_some()));
    }

    #[test]
    fn deep_parentheses_report_one_error_and_recover() {
        let src = format!("x = {}1{}\ny = 2\n", "(".repeat(100), ")".repeat(100));
        let out = parse_source(&src);
        assert_eq!(out.errors.len(), 1, "{:?}", out.errors);
        assert!(out.errors[0].message.starts_with("nesting too deep"));
        assert_eq!(out.errors[0].span.start.line, 1);
        assert_eq!(out.module.items.len(), 2);
        let shallow = format!("x = {}1{}", "(".repeat(20), ")".repeat(20));
        assert!(parse_source(&shallow).errors.is_empty());
    }

    #[test]
    fn min_integer_literal_needs_its_minus() {
        assert_eq!(first_expr("-9223372036854775808"), ExprKind::Int(i64::MIN));
        for src in ["x = 9223372036854775808", "x = -9223372036854775809", "x = 0x1ffffffffffffffff"] {
            let out = parse_source(src);
            let messages: Vec<_> = out.errors.iter().map(|e| e.message.as_str()).collect();
            assert_eq!(messages, ["integer literal out of range"], "{src}");
        }
    }

    #[test]
    fn binary_precedence() {
        let e = first_expr("1 + 2 * 3");
        let ExprKind::Binary { op: BinaryOp::Add, rhs, .. } = e else {
            panic!("expected addition")
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn assignment_is_right_associative() {
        let e = first_expr("a = b = 1");
        let ExprKind::Assign { value, .. } = e else {
            panic!("expected assignment")
        };
        assert!(matches!(value.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn method_chain_with_safe_navigation() {
        let e = first_expr("a?.b.c(1, 2)");
        let ExprKind::Call { receiver, name, args, safe, .. } = e else {
            panic!("expected call")
        };
        assert_eq!(&*name, "c");
        assert_eq!(args.len(), 2);
        assert!(!safe);
        assert!(matches!(receiver.unwrap().kind, ExprKind::Property { safe: true, .. }));
    }

    #[test]
    fn trailing_closure_argument() {
        let e = first_expr("list.each { x -> println x }");
        let ExprKind::Call { args, .. } = e else {
            panic!("expected call")
        };
        let ExprKind::Closure(c) = &args[0].kind else {
            panic!("expected closure")
        };
        assert!(!c.implicit_param);
        assert_eq!(c.params.len(), 1);
        assert_eq!(c.body.stmts.len(), 1);
    }

    #[test]
    fn implicit_it_closure() {
        let e = first_expr("c = { it * 2 }");
        let ExprKind::Assign { value, .. } = e else {
            panic!("expected assignment")
        };
        let ExprKind::Closure(c) = value.kind else {
            panic!("expected closure")
        };
        assert!(c.implicit_param);
        assert_eq!(&*c.params[0].name, "it");
    }

    #[test]
    fn command_call_without_parens() {
        let e = first_expr("println 'a', 2");
        let ExprKind::Call { receiver, name, args, .. } = e else {
            panic!("expected call")
        };
        assert!(receiver.is_none());
        assert_eq!(&*name, "println");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn typed_declaration_is_not_a_command_call() {
        assert!(matches!(first_stmt("String s = 'x'"), StmtKind::VarDecl { ty: Some(_), .. }));
        assert!(matches!(first_stmt("int n"), StmtKind::VarDecl { init: None, .. }));
    }

    #[test]
    fn gstring_parts() {
        let e = first_expr(r#"x = "a${b}c""#);
        let ExprKind::Assign { value, .. } = e else {
            panic!("expected assignment")
        };
        let ExprKind::GString(parts) = value.kind else {
            panic!("expected gstring")
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], GStringPart::Expr(_)));
    }

    #[test]
    fn try_catch_finally_order() {
        let s = first_stmt(
            "try {\n a()\n}\ncatch (IllegalStateException e) { b() }\ncatch (e) { c() }\nfinally { d() }",
        );
        let StmtKind::Try(t) = s else { panic!("expected try") };
        assert_eq!(t.catches.len(), 2);
        assert_eq!(t.catches[0].ty.as_ref().unwrap().name.to_string(), "IllegalStateException");
        assert!(t.catches[1].ty.is_none());
        assert!(t.finally.is_some());
    }

    #[test]
    fn try_without_handlers_is_error() {
        let out = parse_source("try { a() }\nx = 1");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.module.items.len(), 2);
    }

    #[test]
    fn if_else_across_lines() {
        let s = first_stmt("if (a) {\n b()\n}\nelse {\n c()\n}");
        assert!(matches!(s, StmtKind::If { else_branch: Some(_), .. }));
    }

    #[test]
    fn for_in_loop() {
        let s = first_stmt("for (x in [1, 2]) { println x }");
        assert!(matches!(s, StmtKind::For { .. }));
    }

    #[test]
    fn top_level_method() {
        let m = parse_ok("def twice(n) { n * 2 }\nprintln twice(2)");
        assert!(matches!(&m.items[0], Item::Method(d) if &*d.name == "twice"));
        assert!(matches!(&m.items[1], Item::Stmt(_)));
        assert!(m.has_script_body());
    }

    #[test]
    fn leading_dot_continues_chain() {
        let e = first_expr("a\n  .b()\n  .c()");
        assert!(matches!(e, ExprKind::Call { ref name, .. } if &**name == "c"));
    }

    #[test]
    fn recovers_after_bad_statement() {
        let out = parse_source("x = 1 + * 2\ny = 2");
        assert!(!out.errors.is_empty());
        assert!(out.module.items.iter().any(|i| matches!(
            i,
            Item::Stmt(Stmt { kind: StmtKind::Expr(Expr { kind: ExprKind::Assign { .. }, .. }), .. })
        )));
    }

    #[test]
    fn recovers_inside_method_body() {
        let out = parse_source("class A {\n def m() {\n  x = )\n  y = 1\n }\n def n() { 2 }\n}");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].span.start.line, 3);
        let class = out.module.classes().next().unwrap();
        assert_eq!(class.members.len(), 2);
        let Member::Method(m) = &class.members[0] else { panic!() };
        assert_eq!(m.body.stmts.len(), 2);
        assert!(matches!(m.body.stmts[0].kind, StmtKind::Error));
    }

    #[test]
    fn multiple_errors_are_all_reported() {
        let out = parse_source("a = )\nb = 1\nc = ]\nd = 2");
        assert_eq!(out.errors.len(), 2);
        assert_eq!(out.errors[0].span.start.line, 1);
        assert_eq!(out.errors[1].span.start.line, 3);
        assert_eq!(out.module.items.len(), 4);
    }

    #[test]
    fn stray_closing_brace_makes_progress() {
        let out = parse_source("}\nx = 1");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.module.items.len(), 2);
    }

    #[test]
    fn unclosed_block_reports_error() {
        let out = parse_source("def f() {\n x = 1\n");
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("unclosed"));
        assert!(matches!(&out.module.items[0], Item::Method(_)));
    }

    #[test]
    fn lexer_errors_become_parse_errors() {
        let out = parse_source("x = 'abc");
        assert!(out.errors.iter().any(|e| e.message.contains("unterminated")));
    }

    #[test]
    fn invalid_assignment_target() {
        let out = parse_source("f() = 1");
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("assignment target"));
    }

    #[test]
    fn spans_cover_children() {
        let m = parse_ok("x = foo(1, 2) + 3");
        let Item::Stmt(s) = &m.items[0] else { panic!() };
        let StmtKind::Expr(e) = &s.kind else { panic!() };
        let ExprKind::Assign { target, value, .. } = &e.kind else { panic!() };
        assert!(e.span.covers(&target.span));
        assert!(e.span.covers(&value.span));
        assert_eq!(e.span.start.column, 1);
        assert_eq!(e.span.end.column, 18);
    }

    #[test]
    fn identifiers_are_interned() {
        let tables = ParseTables::new();
        let out = Parser::new(Lexer::from_str("foo = foo"), &tables).parse_module();
        let Item::Stmt(s) = &out.module.items[0] else { panic!() };
        let StmtKind::Expr(e) = &s.kind else { panic!() };
        let ExprKind::Assign { target, value, .. } = &e.kind else { panic!() };
        let (ExprKind::Variable { name: a, .. }, ExprKind::Variable { name: b, .. }) =
            (&target.kind, &value.kind)
        else {
            panic!()
        };
        assert!(std::sync::Arc::ptr_eq(a, b));
    }
}
