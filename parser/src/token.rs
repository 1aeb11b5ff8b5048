/// Token types produced by the kestrel lexer.
use crate::span::Span;

/// Reserved words. `def` is included because it stands in for a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Package,
    Import,
    As,
    Class,
    Extends,
    Def,
    Static,
    Return,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Try,
    Catch,
    Finally,
    Throw,
    New,
    True,
    False,
    Null,
    This,
    InstanceOf,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "package" => Self::Package,
            "import" => Self::Import,
            "as" => Self::As,
            "class" => Self::Class,
            "extends" => Self::Extends,
            "def" => Self::Def,
            "static" => Self::Static,
            "return" => Self::Return,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            "in" => Self::In,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            "throw" => Self::Throw,
            "new" => Self::New,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "this" => Self::This,
            "instanceof" => Self::InstanceOf,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Import => "import",
            Self::As => "as",
            Self::Class => "class",
            Self::Extends => "extends",
            Self::Def => "def",
            Self::Static => "static",
            Self::Return => "return",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::In => "in",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::Throw => "throw",
            Self::New => "new",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::This => "this",
            Self::InstanceOf => "instanceof",
        }
    }
}

/// The kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Integer literal, e.g. `42`, `0xff`, `1_000`.
    Integer(i64),
    /// Integer literal too large for 64 bits, holding its digits. Only
    /// `9223372036854775808` is usable, as the operand of a unary minus.
    IntegerOverflow(std::string::String),
    /// Floating-point literal, e.g. `3.14`, `1.5e10`.
    Float(f64),
    /// Plain string: single-quoted, or double-quoted without `${}`.
    String(std::string::String),
    /// Text before the first `${` of a double-quoted string.
    GStringStart(std::string::String),
    /// Text between a `}` and the next `${` inside a GString.
    GStringMiddle(std::string::String),
    /// Text after the last `}` up to the closing quote.
    GStringEnd(std::string::String),

    Identifier(std::string::String),
    Keyword(Keyword),

    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `?.`
    SafeDot,
    /// `;`
    Semicolon,
    /// `->`
    Arrow,
    /// `?`
    Question,
    /// `:`
    Colon,

    /// `=`
    Assign,
    /// `+=`
    PlusAssign,
    /// `-=`
    MinusAssign,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,

    /// A significant line break (statement separator).
    Newline,

    /// A line comment: `// ...` (text excludes the leading `//`).
    LineComment(std::string::String),
    /// A block comment: `/* ... */` (text excludes delimiters). May nest.
    BlockComment(std::string::String),

    /// End of input.
    Eof,
    /// An unrecognized character or malformed token.
    Error(std::string::String),
}

impl TokenKind {
    /// Human-readable name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer(_) | Self::IntegerOverflow(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::GStringStart(_) | Self::GStringMiddle(_) | Self::GStringEnd(_) => {
                "interpolated string"
            }
            Self::Identifier(_) => "identifier",
            Self::Keyword(k) => k.as_str(),
            Self::LParen => "`(`",
            Self::RParen => "`)`",
            Self::LBrace => "`{`",
            Self::RBrace => "`}`",
            Self::LBracket => "`[`",
            Self::RBracket => "`]`",
            Self::Comma => "`,`",
            Self::Dot => "`.`",
            Self::SafeDot => "`?.`",
            Self::Semicolon => "`;`",
            Self::Arrow => "`->`",
            Self::Question => "`?`",
            Self::Colon => "`:`",
            Self::Assign => "`=`",
            Self::PlusAssign => "`+=`",
            Self::MinusAssign => "`-=`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Star => "`*`",
            Self::Slash => "`/`",
            Self::Percent => "`%`",
            Self::EqEq => "`==`",
            Self::NotEq => "`!=`",
            Self::Lt => "`<`",
            Self::LtEq => "`<=`",
            Self::Gt => "`>`",
            Self::GtEq => "`>=`",
            Self::AndAnd => "`&&`",
            Self::OrOr => "`||`",
            Self::Bang => "`!`",
            Self::Newline => "newline",
            Self::LineComment(_) => "line comment",
            Self::BlockComment(_) => "block comment",
            Self::Eof => "end of input",
            Self::Error(_) => "error",
        }
    }

    /// Returns `true` if this token is any kind of comment.
    pub fn is_comment(&self) -> bool {
        matches!(self, Self::LineComment(_) | Self::BlockComment(_))
    }

    /// Binary operators after which a line break does not end the statement.
    pub fn continues_line(&self) -> bool {
        matches!(
            self,
            Self::Assign
                | Self::PlusAssign
                | Self::MinusAssign
                | Self::Plus
                | Self::Minus
                | Self::Star
                | Self::Slash
                | Self::Percent
                | Self::EqEq
                | Self::NotEq
                | Self::Lt
                | Self::LtEq
                | Self::Gt
                | Self::GtEq
                | Self::AndAnd
                | Self::OrOr
                | Self::Question
                | Self::Colon
                | Self::Arrow
                | Self::Comma
        )
    }
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// The original source text of this token.
    pub lexeme: std::string::String,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        span: Span,
        lexeme: impl Into<std::string::String>,
    ) -> Self {
        Self {
            kind,
            span,
            lexeme: lexeme.into(),
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn is_comment(&self) -> bool {
        self.kind.is_comment()
    }
}
