/// Streaming lexer for kestrel source text.
///
/// The [`Lexer`] consumes bytes from any [`std::io::Read`] source and
/// implements [`Iterator`] over [`Token`]s, tracking byte offset, line and
/// column for every token it produces.
///
/// # Streaming
///
/// Internally the lexer keeps a small refillable look-ahead buffer.  Each
/// call to the iterator pulls only as many bytes as the current token
/// needs, so files are never slurped into memory by the lexer itself.
///
/// # Modes
///
/// Double-quoted strings may embed expressions with `${ ... }` or `$name`.
/// The lexer keeps a delimiter stack: an interpolation frame is pushed when
/// `${` is seen and popped by the matching `}`, at which point string
/// lexing resumes.  The same stack decides whether a line break is
/// significant: inside `(` or `[` it is not.
///
/// | Syntax         | Kind          | Notes                        |
/// |----------------|---------------|------------------------------|
/// | `// …`         | Line comment  | Runs to end of line          |
/// | `/* … */`      | Block comment | **Nestable** (`/* /* */ */`) |
use std::collections::VecDeque;
use std::io::Read;

use crate::span::{Pos, Span};
use crate::token::{Keyword, Token, TokenKind};

// ═══════════════════════════════════════════════════════════════════
// Read buffer: one-byte-at-a-time abstraction over Read
// ═══════════════════════════════════════════════════════════════════

/// 8 bytes hold two maximum-length UTF-8 characters, which covers the
/// deepest peek-ahead the lexer needs.
const LOOKAHEAD: usize = 8;

struct ReadBuf<R: Read> {
    reader: R,
    buf: [u8; LOOKAHEAD],
    /// How many valid bytes are in `buf` starting from index 0.
    filled: usize,
    reader_eof: bool,
    /// First read failure, reported once as an error token.
    io_error: Option<std::io::Error>,
    offset: usize,
    line: usize,
    /// Counted in characters: UTF-8 continuation bytes do not advance it.
    column: usize,
}

impl<R: Read> ReadBuf<R> {
    fn new(reader: R) -> Self {
        let mut rb = Self {
            reader,
            buf: [0u8; LOOKAHEAD],
            filled: 0,
            reader_eof: false,
            io_error: None,
            offset: 0,
            line: 1,
            column: 1,
        };
        rb.fill();
        rb
    }

    fn fill(&mut self) {
        while !self.reader_eof && self.filled < LOOKAHEAD {
            let mut one = [0u8; 1];
            match self.reader.read(&mut one) {
                Ok(0) => self.reader_eof = true,
                Ok(_) => {
                    self.buf[self.filled] = one[0];
                    self.filled += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.reader_eof = true;
                    self.io_error = Some(e);
                }
            }
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        if self.filled > 0 { Some(self.buf[0]) } else { None }
    }

    /// Peek `n` bytes ahead (`peek_ahead(0)` == `peek()`).
    fn peek_ahead(&self, n: usize) -> Option<u8> {
        if n < self.filled { Some(self.buf[n]) } else { None }
    }

    fn advance(&mut self) -> Option<u8> {
        if self.filled == 0 {
            return None;
        }
        let b = self.buf[0];
        self.buf.copy_within(1..self.filled, 0);
        self.filled -= 1;
        self.fill();

        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if b & 0xC0 != 0x80 {
            self.column += 1;
        }
        Some(b)
    }

    /// Decode the leading UTF-8 character without consuming it.
    /// Invalid sequences decode as U+FFFD with length 1.
    fn peek_char(&self) -> Option<(char, usize)> {
        if self.filled == 0 {
            return None;
        }
        let b0 = self.buf[0];
        let (expected_len, first_bits) = match b0 {
            0x00..=0x7F => return Some((b0 as char, 1)),
            0xC0..=0xDF => (2, (b0 & 0x1F) as u32),
            0xE0..=0xEF => (3, (b0 & 0x0F) as u32),
            0xF0..=0xF7 => (4, (b0 & 0x07) as u32),
            _ => return Some(('\u{FFFD}', 1)),
        };
        if expected_len > self.filled {
            return Some(('\u{FFFD}', 1));
        }
        let mut codepoint = first_bits;
        for &cont in &self.buf[1..expected_len] {
            if cont & 0xC0 != 0x80 {
                return Some(('\u{FFFD}', 1));
            }
            codepoint = (codepoint << 6) | (cont & 0x3F) as u32;
        }
        match char::from_u32(codepoint) {
            Some(ch) => Some((ch, expected_len)),
            None => Some(('\u{FFFD}', 1)),
        }
    }

    fn advance_char(&mut self) -> Option<char> {
        let (ch, len) = self.peek_char()?;
        for _ in 0..len {
            self.advance();
        }
        Some(ch)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Lexer
// ═══════════════════════════════════════════════════════════════════

/// Open delimiters the lexer is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delim {
    Paren,
    Bracket,
    Brace,
    /// `${` inside a double-quoted string.
    Interpolation,
}

/// A streaming lexer for kestrel source code.
///
/// ```rust,ignore
/// use parser::Lexer;
///
/// for token in Lexer::from_str("println \"hi ${name}\"") {
///     println!("{:?}", token);
/// }
/// ```
pub struct Lexer<R: Read> {
    rb: ReadBuf<R>,
    delims: Vec<Delim>,
    /// Tokens produced ahead of time by `$name` interpolation.
    pending: VecDeque<Token>,
    /// Set after a `$name` interpolation: the next token continues the
    /// string that was open.
    resume_string: Option<Pos>,
    emitted_eof: bool,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            rb: ReadBuf::new(reader),
            delims: Vec::new(),
            pending: VecDeque::new(),
            resume_string: None,
            emitted_eof: false,
        }
    }

    fn pos(&self) -> Pos {
        self.rb.pos()
    }

    fn peek(&self) -> Option<u8> {
        self.rb.peek()
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        self.rb.peek_ahead(n)
    }

    fn advance(&mut self) -> Option<u8> {
        self.rb.advance()
    }

    /// Consume `len` ASCII bytes and build a token spanning them.
    fn punct(&mut self, kind: TokenKind, len: usize) -> Token {
        let start = self.pos();
        let mut raw = String::with_capacity(len);
        for _ in 0..len {
            if let Some(b) = self.advance() {
                raw.push(b as char);
            }
        }
        Token::new(kind, Span::new(start, self.pos()), raw)
    }

    fn newlines_significant(&self) -> bool {
        !matches!(self.delims.last(), Some(Delim::Paren | Delim::Bracket))
    }

    // ───────────────────────────────────────────────────────────
    //  Whitespace and comments
    // ───────────────────────────────────────────────────────────

    /// Skip blanks. Line breaks are skipped too unless significant, and a
    /// backslash directly before a line break joins the lines.
    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                b'\n' if !self.newlines_significant() => {
                    self.advance();
                }
                b'\\' if self.peek_ahead(1) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn lex_line_comment(&mut self) -> Token {
        let start = self.pos();
        self.advance();
        self.advance();
        let mut bytes = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            bytes.push(b);
            self.advance();
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let lexeme = format!("//{text}");
        Token::new(
            TokenKind::LineComment(text),
            Span::new(start, self.pos()),
            lexeme,
        )
    }

    fn lex_block_comment(&mut self) -> Token {
        let start = self.pos();
        self.advance();
        self.advance();
        let mut depth = 1usize;
        let mut bytes = Vec::new();
        loop {
            match (self.peek(), self.peek_ahead(1)) {
                (None, _) => {
                    return Token::new(
                        TokenKind::Error("unterminated block comment".into()),
                        Span::new(start, self.pos()),
                        String::from_utf8_lossy(&bytes).into_owned(),
                    );
                }
                (Some(b'/'), Some(b'*')) => {
                    depth += 1;
                    bytes.extend_from_slice(b"/*");
                    self.advance();
                    self.advance();
                }
                (Some(b'*'), Some(b'/')) => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    bytes.extend_from_slice(b"*/");
                }
                (Some(b), _) => {
                    bytes.push(b);
                    self.advance();
                }
            }
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let lexeme = format!("/*{text}*/");
        Token::new(
            TokenKind::BlockComment(text),
            Span::new(start, self.pos()),
            lexeme,
        )
    }

    // ───────────────────────────────────────────────────────────
    //  Strings
    // ───────────────────────────────────────────────────────────

    /// Read one escape sequence after the backslash has been consumed.
    fn lex_escape(&mut self) -> Result<char, String> {
        match self.advance() {
            Some(b'n') => Ok('\n'),
            Some(b't') => Ok('\t'),
            Some(b'r') => Ok('\r'),
            Some(b'0') => Ok('\0'),
            Some(b'\\') => Ok('\\'),
            Some(b'\'') => Ok('\''),
            Some(b'"') => Ok('"'),
            Some(b'$') => Ok('$'),
            Some(b'u') => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let digit = self
                        .advance()
                        .and_then(|d| (d as char).to_digit(16))
                        .ok_or_else(|| "malformed unicode escape".to_string())?;
                    code = code * 16 + digit;
                }
                char::from_u32(code)
                    .ok_or_else(|| "invalid unicode escape".to_string())
            }
            Some(other) => Err(format!("unknown escape `\\{}`", other as char)),
            None => Err("unterminated string".into()),
        }
    }

    fn lex_single_quoted(&mut self) -> Token {
        let start = self.pos();
        self.advance();
        let mut value = String::new();
        let mut error = None;
        loop {
            match self.peek() {
                None => {
                    error.get_or_insert_with(|| "unterminated string".to_string());
                    break;
                }
                Some(b'\'') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    match self.lex_escape() {
                        Ok(c) => value.push(c),
                        Err(e) => {
                            error.get_or_insert(e);
                        }
                    }
                }
                Some(_) => {
                    if let Some(c) = self.rb.advance_char() {
                        value.push(c);
                    }
                }
            }
        }
        let span = Span::new(start, self.pos());
        match error {
            Some(msg) => Token::new(TokenKind::Error(msg), span, value),
            None => Token::new(TokenKind::String(value.clone()), span, value),
        }
    }

    /// Lex the body of a double-quoted string up to its closing quote or
    /// the next interpolation. `resumed` is true when continuing after an
    /// embedded expression; the opening quote was consumed earlier.
    fn lex_double_quoted(&mut self, start: Pos, resumed: bool) -> Token {
        let mut value = String::new();
        let mut error = None;
        loop {
            match self.peek() {
                None => {
                    error.get_or_insert_with(|| "unterminated string".to_string());
                    break;
                }
                Some(b'"') => {
                    self.advance();
                    let span = Span::new(start, self.pos());
                    if let Some(msg) = error {
                        return Token::new(TokenKind::Error(msg), span, value);
                    }
                    let kind = if resumed {
                        TokenKind::GStringEnd(value.clone())
                    } else {
                        TokenKind::String(value.clone())
                    };
                    return Token::new(kind, span, value);
                }
                Some(b'\\') => {
                    self.advance();
                    match self.lex_escape() {
                        Ok(c) => value.push(c),
                        Err(e) => {
                            error.get_or_insert(e);
                        }
                    }
                }
                Some(b'$') if self.peek_ahead(1) == Some(b'{') => {
                    self.advance();
                    self.advance();
                    self.delims.push(Delim::Interpolation);
                    let span = Span::new(start, self.pos());
                    let kind = if resumed {
                        TokenKind::GStringMiddle(value.clone())
                    } else {
                        TokenKind::GStringStart(value.clone())
                    };
                    return Token::new(kind, span, value);
                }
                Some(b'$')
                    if self
                        .peek_ahead(1)
                        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_') =>
                {
                    self.advance();
                    let span = Span::new(start, self.pos());
                    let ident = self.lex_identifier_or_keyword();
                    self.resume_string = Some(ident.span.end);
                    self.pending.push_back(ident);
                    let kind = if resumed {
                        TokenKind::GStringMiddle(value.clone())
                    } else {
                        TokenKind::GStringStart(value.clone())
                    };
                    return Token::new(kind, span, value);
                }
                Some(_) => {
                    if let Some(c) = self.rb.advance_char() {
                        value.push(c);
                    }
                }
            }
        }
        let span = Span::new(start, self.pos());
        Token::new(
            TokenKind::Error(error.unwrap_or_default()),
            span,
            value,
        )
    }

    // ───────────────────────────────────────────────────────────
    //  Numbers
    // ───────────────────────────────────────────────────────────

    fn lex_number(&mut self) -> Token {
        let start = self.pos();
        let mut raw = String::new();

        if self.peek() == Some(b'0')
            && matches!(self.peek_ahead(1), Some(b'x') | Some(b'X'))
        {
            raw.push('0');
            self.advance();
            raw.push(self.advance().map_or('x', |b| b as char));
            let mut digits = String::new();
            while let Some(b) = self.peek() {
                if b.is_ascii_hexdigit() {
                    digits.push(b as char);
                } else if b != b'_' {
                    break;
                }
                raw.push(b as char);
                self.advance();
            }
            let span = Span::new(start, self.pos());
            return match i64::from_str_radix(&digits, 16) {
                Ok(v) => Token::new(TokenKind::Integer(v), span, raw),
                Err(_) if digits.is_empty() => Token::new(
                    TokenKind::Error("expected hex digits after `0x`".into()),
                    span,
                    raw,
                ),
                Err(_) => {
                    let text = raw.clone();
                    Token::new(TokenKind::IntegerOverflow(text), span, raw)
                }
            };
        }

        let mut digits = String::new();
        self.take_digits(&mut digits, &mut raw);

        let mut is_float = false;
        // A dot only starts a fraction when a digit follows, so `1.abs()`
        // stays a method call.
        if self.peek() == Some(b'.')
            && self.peek_ahead(1).is_some_and(|b| b.is_ascii_digit())
        {
            is_float = true;
            digits.push('.');
            raw.push('.');
            self.advance();
            self.take_digits(&mut digits, &mut raw);
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let sign = self.peek_ahead(1);
            let exp_digit = match sign {
                Some(b'+') | Some(b'-') => self.peek_ahead(2),
                other => other,
            };
            if exp_digit.is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                digits.push('e');
                raw.push(self.advance().map_or('e', |b| b as char));
                if matches!(sign, Some(b'+') | Some(b'-')) {
                    let s = self.advance().map_or('+', |b| b as char);
                    digits.push(s);
                    raw.push(s);
                }
                self.take_digits(&mut digits, &mut raw);
            }
        }

        let span = Span::new(start, self.pos());
        if is_float {
            match digits.parse::<f64>() {
                Ok(v) => Token::new(TokenKind::Float(v), span, raw),
                Err(_) => Token::new(
                    TokenKind::Error("malformed float literal".into()),
                    span,
                    raw,
                ),
            }
        } else {
            match digits.parse::<i64>() {
                Ok(v) => Token::new(TokenKind::Integer(v), span, raw),
                Err(_) => Token::new(TokenKind::IntegerOverflow(digits), span, raw),
            }
        }
    }

    /// Decimal digits with `_` separators.
    fn take_digits(&mut self, digits: &mut String, raw: &mut String) {
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                digits.push(b as char);
            } else if b != b'_' {
                break;
            }
            raw.push(b as char);
            self.advance();
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Identifiers and keywords
    // ───────────────────────────────────────────────────────────

    /// Identifiers start with a letter or `_` (any Unicode alphabetic) and
    /// continue with alphanumerics or `_`.
    fn lex_identifier_or_keyword(&mut self) -> Token {
        let start = self.pos();
        let mut raw = String::new();
        while let Some((ch, _)) = self.rb.peek_char() {
            if ch.is_alphanumeric() || ch == '_' {
                self.rb.advance_char();
                raw.push(ch);
            } else {
                break;
            }
        }
        let span = Span::new(start, self.pos());
        let kind = match Keyword::from_ident(&raw) {
            Some(k) => TokenKind::Keyword(k),
            None => TokenKind::Identifier(raw.clone()),
        };
        Token::new(kind, span, raw)
    }

    // ───────────────────────────────────────────────────────────
    //  Main dispatch
    // ───────────────────────────────────────────────────────────

    /// Produce the next token from the stream.
    pub fn next_token(&mut self) -> Token {
        if let Some(tok) = self.pending.pop_front() {
            return tok;
        }
        if let Some(start) = self.resume_string.take() {
            return self.lex_double_quoted(start, true);
        }

        self.skip_whitespace();
        let start = self.pos();

        let b = match self.peek() {
            Some(b) => b,
            None => {
                if let Some(err) = self.rb.io_error.take() {
                    return Token::new(
                        TokenKind::Error(format!("read error: {err}")),
                        Span::point(start),
                        "",
                    );
                }
                self.emitted_eof = true;
                return Token::new(TokenKind::Eof, Span::point(start), "");
            }
        };
        let next = self.peek_ahead(1);

        match b {
            // ── Comments ──────────────────────────────────────
            b'/' if next == Some(b'/') => self.lex_line_comment(),
            b'/' if next == Some(b'*') => self.lex_block_comment(),

            // ── Line breaks ───────────────────────────────────
            b'\n' => self.punct(TokenKind::Newline, 1),

            // ── Strings ───────────────────────────────────────
            b'\'' => self.lex_single_quoted(),
            b'"' => {
                self.advance();
                self.lex_double_quoted(start, false)
            }

            // ── Delimiters ────────────────────────────────────
            b'(' => {
                self.delims.push(Delim::Paren);
                self.punct(TokenKind::LParen, 1)
            }
            b')' => {
                if self.delims.last() == Some(&Delim::Paren) {
                    self.delims.pop();
                }
                self.punct(TokenKind::RParen, 1)
            }
            b'[' => {
                self.delims.push(Delim::Bracket);
                self.punct(TokenKind::LBracket, 1)
            }
            b']' => {
                if self.delims.last() == Some(&Delim::Bracket) {
                    self.delims.pop();
                }
                self.punct(TokenKind::RBracket, 1)
            }
            b'{' => {
                self.delims.push(Delim::Brace);
                self.punct(TokenKind::LBrace, 1)
            }
            b'}' => match self.delims.last() {
                Some(Delim::Interpolation) => {
                    self.delims.pop();
                    self.advance();
                    self.lex_double_quoted(start, true)
                }
                Some(Delim::Brace) => {
                    self.delims.pop();
                    self.punct(TokenKind::RBrace, 1)
                }
                _ => {
                    // Unclosed `(`/`[` inside a block: close them with it.
                    let open = self
                        .delims
                        .iter()
                        .rposition(|d| matches!(d, Delim::Brace | Delim::Interpolation));
                    if let Some(i) = open {
                        if self.delims[i] == Delim::Brace {
                            self.delims.truncate(i);
                        }
                    }
                    self.punct(TokenKind::RBrace, 1)
                }
            },

            b',' => self.punct(TokenKind::Comma, 1),
            b';' => self.punct(TokenKind::Semicolon, 1),
            b':' => self.punct(TokenKind::Colon, 1),
            b'.' => self.punct(TokenKind::Dot, 1),
            b'?' if next == Some(b'.') => self.punct(TokenKind::SafeDot, 2),
            b'?' => self.punct(TokenKind::Question, 1),

            // ── Operators ─────────────────────────────────────
            b'-' if next == Some(b'>') => self.punct(TokenKind::Arrow, 2),
            b'-' if next == Some(b'=') => self.punct(TokenKind::MinusAssign, 2),
            b'-' => self.punct(TokenKind::Minus, 1),
            b'+' if next == Some(b'=') => self.punct(TokenKind::PlusAssign, 2),
            b'+' => self.punct(TokenKind::Plus, 1),
            b'*' => self.punct(TokenKind::Star, 1),
            b'/' => self.punct(TokenKind::Slash, 1),
            b'%' => self.punct(TokenKind::Percent, 1),
            b'=' if next == Some(b'=') => self.punct(TokenKind::EqEq, 2),
            b'=' => self.punct(TokenKind::Assign, 1),
            b'!' if next == Some(b'=') => self.punct(TokenKind::NotEq, 2),
            b'!' => self.punct(TokenKind::Bang, 1),
            b'<' if next == Some(b'=') => self.punct(TokenKind::LtEq, 2),
            b'<' => self.punct(TokenKind::Lt, 1),
            b'>' if next == Some(b'=') => self.punct(TokenKind::GtEq, 2),
            b'>' => self.punct(TokenKind::Gt, 1),
            b'&' if next == Some(b'&') => self.punct(TokenKind::AndAnd, 2),
            b'|' if next == Some(b'|') => self.punct(TokenKind::OrOr, 2),

            // ── Literals and names ────────────────────────────
            b'0'..=b'9' => self.lex_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_identifier_or_keyword(),

            _ => match self.rb.peek_char() {
                Some((ch, _)) if ch.is_alphabetic() => {
                    self.lex_identifier_or_keyword()
                }
                _ => {
                    let ch = self.rb.advance_char().unwrap_or('\u{FFFD}');
                    Token::new(
                        TokenKind::Error(format!("unexpected character `{ch}`")),
                        Span::new(start, self.pos()),
                        ch.to_string(),
                    )
                }
            },
        }
    }
}

impl<'a> Lexer<&'a [u8]> {
    /// Convenience constructor for lexing a string slice.
    pub fn from_str(s: &'a str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl<R: Read> Iterator for Lexer<R> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        Some(self.next_token())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::from_str(src).map(|t| t.kind).collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Identifier(s.into())
    }

    #[test]
    fn lex_empty() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \t "), vec![TokenKind::Eof]);
    }

    #[test]
    fn lex_integers_and_floats() {
        assert_eq!(
            kinds("42 1_000 0xff 3.25 1e3 2.5E-1"),
            vec![
                TokenKind::Integer(42),
                TokenKind::Integer(1000),
                TokenKind::Integer(255),
                TokenKind::Float(3.25),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.25),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_then_method_call() {
        assert_eq!(
            kinds("1.abs()"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Dot,
                ident("abs"),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_out_of_range() {
        let k = kinds("99999999999999999999");
        assert!(matches!(k[0], TokenKind::Error(_)));
    }

    #[test]
    fn lex_keywords_and_identifiers() {
        assert_eq!(
            kinds("class Foo extends Bar"),
            vec![
                TokenKind::Keyword(Keyword::Class),
                ident("Foo"),
                TokenKind::Keyword(Keyword::Extends),
                ident("Bar"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            kinds("a?.b += c -> d == e != f <= g && h || !i"),
            vec![
                ident("a"),
                TokenKind::SafeDot,
                ident("b"),
                TokenKind::PlusAssign,
                ident("c"),
                TokenKind::Arrow,
                ident("d"),
                TokenKind::EqEq,
                ident("e"),
                TokenKind::NotEq,
                ident("f"),
                TokenKind::LtEq,
                ident("g"),
                TokenKind::AndAnd,
                ident("h"),
                TokenKind::OrOr,
                TokenKind::Bang,
                ident("i"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_parens_are_insignificant() {
        assert_eq!(
            kinds("f(1,\n2)\ng"),
            vec![
                ident("f"),
                TokenKind::LParen,
                TokenKind::Integer(1),
                TokenKind::Comma,
                TokenKind::Integer(2),
                TokenKind::RParen,
                TokenKind::Newline,
                ident("g"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_braces_are_significant() {
        assert_eq!(
            kinds("(x) {\na\n}"),
            vec![
                TokenKind::LParen,
                ident("x"),
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::Newline,
                ident("a"),
                TokenKind::Newline,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_strings() {
        assert_eq!(
            kinds(r#"'it\'s' "plain\n""#),
            vec![
                TokenKind::String("it's".into()),
                TokenKind::String("plain\n".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_gstring_interpolation() {
        assert_eq!(
            kinds(r#""a${x + 1}b${ {y} }c""#),
            vec![
                TokenKind::GStringStart("a".into()),
                ident("x"),
                TokenKind::Plus,
                TokenKind::Integer(1),
                TokenKind::GStringMiddle("b".into()),
                TokenKind::LBrace,
                ident("y"),
                TokenKind::RBrace,
                TokenKind::GStringEnd("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_gstring_short_form() {
        assert_eq!(
            kinds(r#""hi $name!""#),
            vec![
                TokenKind::GStringStart("hi ".into()),
                ident("name"),
                TokenKind::GStringEnd("!".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn escaped_dollar_is_literal() {
        assert_eq!(
            kinds(r#""cost: \$5""#),
            vec![TokenKind::String("cost: $5".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_is_error() {
        let k = kinds("'abc");
        assert!(matches!(&k[0], TokenKind::Error(m) if m.contains("unterminated")));
        assert_eq!(k.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn nested_block_comment() {
        let k = kinds("/* a /* b */ c */ x");
        assert_eq!(
            k,
            vec![TokenKind::BlockComment(" a /* b */ c ".into()), ident("x"), TokenKind::Eof]
        );
    }

    #[test]
    fn line_comment_stops_at_newline() {
        assert_eq!(
            kinds("// hi\nx"),
            vec![
                TokenKind::LineComment(" hi".into()),
                TokenKind::Newline,
                ident("x"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let toks: Vec<Token> = Lexer::from_str("a\n  bb").collect();
        assert_eq!(toks[0].span.start, Pos::new(0, 1, 1));
        assert_eq!(toks[2].span.start, Pos::new(4, 2, 3));
        assert_eq!(toks[2].span.end, Pos::new(6, 2, 5));
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        let toks: Vec<Token> = Lexer::from_str("'é' x").collect();
        assert_eq!(toks[1].span.start.column, 5);
        assert_eq!(toks[1].span.start.offset, 5);
    }

    #[test]
    fn unicode_identifier() {
        assert_eq!(kinds("größe"), vec![ident("größe"), TokenKind::Eof]);
    }

    #[test]
    fn unexpected_character_is_error() {
        let k = kinds("a # b");
        assert!(matches!(k[1], TokenKind::Error(_)));
        assert_eq!(k[2], ident("b"));
    }

    #[test]
    fn line_continuation_joins_lines() {
        assert_eq!(
            kinds("a \\\n b"),
            vec![ident("a"), ident("b"), TokenKind::Eof]
        );
    }

    #[test]
    fn streaming_from_reader() {
        let cursor = std::io::Cursor::new(b"x = 1".to_vec());
        let k: Vec<TokenKind> = Lexer::new(cursor).map(|t| t.kind).collect();
        assert_eq!(
            k,
            vec![ident("x"), TokenKind::Assign, TokenKind::Integer(1), TokenKind::Eof]
        );
    }
}
