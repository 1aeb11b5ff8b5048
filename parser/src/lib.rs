//! # Parser
//!
//! A streaming lexer and error-recovering parser for kestrel source.
//!
//! ## Architecture
//!
//! ```text
//!  impl Read (file, &[u8], …)
//!      │
//!      ▼
//!  ┌────────┐    Token stream     ┌────────┐    Item stream
//!  │ Lexer  │ ──────────────────▶ │ Parser │ ──────────────────▶ Module
//!  └────────┘  (impl Iterator)    └────────┘  (impl Iterator)
//! ```
//!
//! Parsing never stops at the first error.  [`parse`] always returns a
//! [`Module`]; statements that failed to parse appear as error nodes and
//! each failure is listed in [`ParseOutput::errors`] with its position.
//!
//! ```rust
//! let out = parser::parse("def x = 1\nprintln x");
//! assert!(out.errors.is_empty());
//! assert_eq!(out.module.items.len(), 2);
//! ```
//!
//! Identifiers are interned through a shared [`ParseCache`] so later
//! phases compare names cheaply.  The cache is cleared periodically; see
//! [`CacheConfig`].

pub mod ast;
pub mod cache;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;
pub mod visit;

use std::io::Read;

pub use ast::{Module, Name};
pub use cache::{CacheConfig, ParseCache, ParseTables};
pub use lexer::Lexer;
pub use parser::{MAX_NESTING_DEPTH, ParseError, ParseOutput, Parser};
pub use span::{Pos, Span};
pub use token::{Keyword, Token, TokenKind};
pub use visit::{Visitor, VisitorMut};

/// Parse `source` using the process-wide cache.
pub fn parse(source: &str) -> ParseOutput {
    parse_with(ParseCache::global(), source)
}

/// Parse `source` using `cache` for interning.
pub fn parse_with(cache: &ParseCache, source: &str) -> ParseOutput {
    parse_stream(cache, Lexer::from_str(source))
}

/// Parse everything `reader` yields.
///
/// Read errors surface as parse errors at the position where reading
/// stopped.
pub fn parse_reader<R: Read>(reader: R) -> ParseOutput {
    parse_stream(ParseCache::global(), Lexer::new(reader))
}

fn parse_stream<R: Read>(cache: &ParseCache, lexer: Lexer<R>) -> ParseOutput {
    let out = {
        let tables = cache.read();
        cache.record_access();
        Parser::new(lexer, &tables).parse_module()
    };
    cache.maybe_evict();
    log::trace!("parsed {} items, {} errors", out.module.items.len(), out.errors.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_reports_positions() {
        let out = parse("x = 1\ny = (2 +\n");
        assert!(!out.errors.is_empty());
        let first = &out.errors[0];
        assert!(first.to_string().contains(" at "));
        assert!(first.span.start.line >= 2);
    }

    #[test]
    fn reader_and_str_agree() {
        let src = "class A {\n  def f(x) { x + 1 }\n}\nprintln new A().f(2)\n";
        let a = parse(src);
        let b = parse_reader(Cursor::new(src.as_bytes().to_vec()));
        assert_eq!(a, b);
    }

    #[test]
    fn private_cache_records_accesses() {
        let cache = ParseCache::new(CacheConfig {
            eviction_threshold: 2,
        });
        parse_with(&cache, "a = 1");
        assert_eq!(cache.accesses(), 1);
        assert!(cache.atom_count() > 0);
        parse_with(&cache, "b = 2");
        assert_eq!(cache.evictions(), 1);
        assert_eq!(cache.atom_count(), 0);
    }
}
