//! Diagnostics.
//!
//! Phases never print. They record [`Message`]s on the source unit they
//! are processing; the driver forwards them to an [`ErrorCollector`],
//! which counts errors against the configured tolerance and hands every
//! message to the caller's [`MessageSink`].
use std::fmt;
use std::sync::Arc;

use parser::Span;

use crate::error::CompileError;
use crate::source::ReaderSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// What produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Syntax,
    Semantic,
    Io,
    /// Driver notices, e.g. an operation registered for a finished phase.
    Driver,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub severity: Severity,
    pub kind: MessageKind,
    /// Name of the originating source unit.
    pub source: Arc<str>,
    pub span: Option<Span>,
    pub text: String,
}

impl Message {
    pub fn error(
        kind: MessageKind,
        source: impl Into<Arc<str>>,
        span: Option<Span>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            source: source.into(),
            span,
            text: text.into(),
        }
    }

    pub fn warning(
        kind: MessageKind,
        source: impl Into<Arc<str>>,
        span: Option<Span>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, source, span, text)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn line(&self) -> Option<usize> {
        self.span.map(|s| s.start.line)
    }

    pub fn column(&self) -> Option<usize> {
        self.span.map(|s| s.start.column)
    }

    /// The message followed by the offending source line and a caret under
    /// the start column, when the line can be recovered.
    pub fn render(&self, source: Option<&dyn ReaderSource>) -> String {
        let mut out = self.to_string();
        let Some(span) = self.span else {
            return out;
        };
        if let Some(line) = source.and_then(|s| s.line(span.start.line)) {
            let line = line.trim_end_matches(['\r', '\n']);
            let caret_at = span.start.column.saturating_sub(1);
            // Keep tabs so the caret lines up under them.
            let pad: String = line
                .chars()
                .take(caret_at)
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            out.push('\n');
            out.push_str(line);
            out.push('\n');
            out.push_str(&pad);
            out.push('^');
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.severity)?;
        if let Some(span) = self.span {
            write!(f, " at {span}")?;
        }
        write!(f, ": {}", self.text)
    }
}

/// Consumer of diagnostics supplied by the caller.
pub trait MessageSink: Send {
    fn report(&mut self, message: &Message);
}

impl<F: FnMut(&Message) + Send> MessageSink for F {
    fn report(&mut self, message: &Message) {
        self(message)
    }
}

/// Sink that logs through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn report(&mut self, message: &Message) {
        match message.severity {
            Severity::Error => log::error!("{message}"),
            Severity::Warning => log::warn!("{message}"),
        }
    }
}

/// Aggregates every message of a compilation in arrival order.
pub struct ErrorCollector {
    messages: Vec<Message>,
    errors: usize,
    tolerance: usize,
    sink: Option<Box<dyn MessageSink>>,
}

impl fmt::Debug for ErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCollector")
            .field("messages", &self.messages.len())
            .field("errors", &self.errors)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl ErrorCollector {
    /// `tolerance` is the number of errors accepted before the compile is
    /// aborted mid-phase. `0` means no limit.
    pub fn new(tolerance: usize) -> Self {
        Self {
            messages: Vec::new(),
            errors: 0,
            tolerance,
            sink: None,
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn MessageSink>) {
        self.sink = Some(sink);
    }

    /// Record a message. Fails once the error count exceeds the tolerance.
    pub fn add(&mut self, message: Message) -> Result<(), CompileError> {
        if let Some(sink) = &mut self.sink {
            sink.report(&message);
        }
        if message.is_error() {
            self.errors += 1;
        }
        self.messages.push(message);
        if self.tolerance > 0 && self.errors > self.tolerance {
            log::debug!("error tolerance {} exceeded", self.tolerance);
            return Err(self.failure());
        }
        Ok(())
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.messages.len() - self.errors
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// A `CompilationFailed` error carrying every message so far.
    pub fn failure(&self) -> CompileError {
        CompileError::CompilationFailed {
            messages: self.messages.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StringReaderSource;
    use parser::Pos;
    use std::sync::Mutex;

    fn span_at(line: usize, column: usize) -> Span {
        Span::point(Pos::new(0, line, column))
    }

    #[test]
    fn render_points_at_column() {
        let src = StringReaderSource::new("Test.kst", "def x = 1\nfoo(bar baz)\n");
        let msg = Message::error(MessageKind::Syntax, "Test.kst", Some(span_at(2, 9)), "boom");
        let rendered = msg.render(Some(&src));
        assert_eq!(
            rendered,
            "Test.kst: error at 2:9: boom\nfoo(bar baz)\n        ^"
        );
    }

    #[test]
    fn render_without_span_is_plain() {
        let msg = Message::warning(MessageKind::Driver, "unit", None, "late op");
        assert_eq!(msg.render(None), "unit: warning: late op");
    }

    #[test]
    fn collector_enforces_tolerance() {
        let mut c = ErrorCollector::new(2);
        for _ in 0..2 {
            c.add(Message::error(MessageKind::Semantic, "a", None, "e")).unwrap();
        }
        c.add(Message::warning(MessageKind::Semantic, "a", None, "w")).unwrap();
        let err = c.add(Message::error(MessageKind::Semantic, "a", None, "e"));
        match err {
            Err(CompileError::CompilationFailed { messages }) => assert_eq!(messages.len(), 4),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(c.error_count(), 3);
        assert_eq!(c.warning_count(), 1);
    }

    #[test]
    fn collector_forwards_to_sink() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let mut c = ErrorCollector::new(0);
        c.set_sink(Box::new(move |m: &Message| {
            sink_seen.lock().unwrap().push(m.text.clone())
        }));
        c.add(Message::error(MessageKind::Io, "a", None, "one")).unwrap();
        c.add(Message::warning(MessageKind::Io, "a", None, "two")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }
}
