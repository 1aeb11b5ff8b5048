//! Property-based tests for the parser.
//!
//! 1. **Never panics**: any input, valid or not, yields a module.
//! 2. **Error spans stay inside the input**.
//! 3. **Deterministic**: parsing the same text twice gives the same tree.
//! 4. **Valid fragments parse cleanly**, alone and joined by newlines.
//! 5. **Recovery**: a broken line does not hide the valid lines after it.
//! 6. **Bounded nesting**: deep nesting is reported, not a crash.

use parser::ast::{Item, StmtKind};
use parser::{MAX_NESTING_DEPTH, ParseCache, parse_with};
use proptest::prelude::*;

const FRAGMENTS: &[&str] = &[
    "42",
    "def x = 42",
    "x + y * 2",
    "println 'hello'",
    "def greet(name) { \"hi ${name}\" }",
    "class Point {\n  int x = 0\n  def norm() { x * x }\n}",
    "list.each { it -> println it }",
    "[1, 2, 3].collect { it * 2 }",
    "if (a > b) { a } else { b }",
    "while (i < 10) { i += 1 }",
    "for (x in items) { total += x }",
    "try {\n  risky()\n} catch (IllegalStateException e) {\n  println e\n} finally {\n  done()\n}",
    "a?.b?.c()",
    "x instanceof String ? 1 : 2",
    "throw new RuntimeException('boom')",
    "new Foo(1, 2).bar",
];

fn valid_fragment() -> impl Strategy<Value = String> {
    prop::sample::select(FRAGMENTS).prop_map(std::string::ToString::to_string)
}

/// Largest char boundary at or below `cut`.
fn char_floor(s: &str, mut cut: usize) -> usize {
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

fn near_valid_source() -> impl Strategy<Value = String> {
    prop_oneof![
        valid_fragment(),
        // Truncated
        valid_fragment().prop_flat_map(|s| {
            let len = s.len();
            (0..=len).prop_map(move |cut| s[..char_floor(&s, cut)].to_string())
        }),
        // Concatenated
        (valid_fragment(), valid_fragment()).prop_map(|(a, b)| format!("{a}\n{b}")),
        // Random noise spliced in
        (valid_fragment(), "[(){}\\[\\]'\"$.,;?!=+*/-]{1,3}").prop_map(|(s, noise)| {
            let mid = char_floor(&s, s.len() / 2);
            format!("{}{}{}", &s[..mid], noise, &s[mid..])
        }),
    ]
}

fn fresh_parse(src: &str) -> parser::ParseOutput {
    parse_with(&ParseCache::default(), src)
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(src in "\\PC{0,200}") {
        let _ = fresh_parse(&src);
    }

    #[test]
    fn error_spans_within_input(src in near_valid_source()) {
        let out = fresh_parse(&src);
        for err in &out.errors {
            prop_assert!(err.span.start.offset <= src.len(), "{err} in {src:?}");
            prop_assert!(err.span.end.offset <= src.len(), "{err} in {src:?}");
            prop_assert!(err.span.start.line >= 1);
            prop_assert!(!err.message.is_empty());
        }
    }

    #[test]
    fn parsing_is_deterministic(src in near_valid_source()) {
        let a = fresh_parse(&src);
        let b = fresh_parse(&src);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn valid_fragments_parse_cleanly(a in valid_fragment(), b in valid_fragment()) {
        let src = format!("{a}\n{b}\n");
        let out = fresh_parse(&src);
        prop_assert!(out.errors.is_empty(), "{:?} in {src:?}", out.errors);
        prop_assert!(out.module.items.len() >= 2);
    }

    #[test]
    fn broken_line_does_not_hide_later_lines(a in valid_fragment(), noise in "[)\\]=*]{1,2}") {
        let src = format!("{a}\nbroken = {noise}\nlast = 7\n");
        let out = fresh_parse(&src);
        prop_assert!(!out.errors.is_empty());
        let last = out.module.items.last();
        let ok = matches!(last, Some(Item::Stmt(s)) if matches!(s.kind, StmtKind::Expr(_)));
        prop_assert!(ok, "last item lost in {src:?}: {last:?}");
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash(
        depth in 1usize..600,
        (open, close) in prop::sample::select(vec![("(", ")"), ("[", "]"), ("- ", ""), ("!", "")]),
    ) {
        let src = format!("x = {}1{}\nlast = 7\n", open.repeat(depth), close.repeat(depth));
        let out = fresh_parse(&src);
        let too_deep = out.errors.iter().any(|e| e.message.starts_with("nesting too deep"));
        if depth + 2 <= MAX_NESTING_DEPTH {
            prop_assert!(out.errors.is_empty(), "{:?}", out.errors);
        }
        if depth > MAX_NESTING_DEPTH {
            prop_assert!(too_deep, "{:?}", out.errors);
        }
        prop_assert_eq!(out.module.items.len(), 2);
    }
}
