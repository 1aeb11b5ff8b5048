use std::io;

use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum CompileError {
    /// At least one source unit holds errors at a phase boundary, or the
    /// error tolerance was exceeded.
    #[error("compilation failed with {} error(s)", count_errors(.messages))]
    CompilationFailed { messages: Vec<Message> },

    /// An internal invariant was violated. Never a user mistake.
    #[error("internal compiler error: {0}")]
    Bug(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

fn count_errors(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.is_error()).count()
}

impl CompileError {
    pub fn bug(msg: impl Into<String>) -> Self {
        Self::Bug(msg.into())
    }

    /// Diagnostics carried by a `CompilationFailed` error.
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::CompilationFailed { messages } => messages,
            _ => &[],
        }
    }

    pub fn is_bug(&self) -> bool {
        matches!(self, Self::Bug(_))
    }
}
