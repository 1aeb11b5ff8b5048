use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// No method applicable to a receiver, name and argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    /// Receiver type name.
    pub receiver: Arc<str>,
    pub name: Arc<str>,
    /// Type names of the arguments, in order.
    pub arg_types: Vec<Arc<str>>,
    /// The receiver was a class, not an instance.
    pub is_static: bool,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_static { "static method" } else { "method" };
        write!(
            f,
            "No signature of {kind}: {}.{}() is applicable for argument types: ({})",
            self.receiver,
            self.name,
            self.arg_types.join(", ")
        )
    }
}

impl std::error::Error for DispatchError {}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An exception object thrown by the program or a native.
    #[error("{}", describe_thrown(.0))]
    Thrown(Value),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("pattern method /{pattern}/ failed for {name}: {source}")]
    PatternMethodFailed {
        pattern: Arc<str>,
        name: Arc<str>,
        #[source]
        source: Box<RuntimeError>,
    },
    #[error("stack overflow")]
    StackOverflow,
    #[error("class {0} is not loaded")]
    ClassNotFound(Arc<str>),
    #[error("invalid method pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// Broken runtime invariant. Never handled by program `catch` clauses.
    #[error("internal error: {0}")]
    Bug(String),
}

impl RuntimeError {
    pub fn bug(text: impl Into<String>) -> Self {
        Self::Bug(text.into())
    }

    pub fn is_bug(&self) -> bool {
        matches!(self, Self::Bug(_))
    }

    /// Name of the exception class a program sees for this error, `None`
    /// for errors programs cannot catch.
    pub fn exception_class(&self) -> Option<&str> {
        match self {
            Self::Thrown(Value::Object(o)) => Some(o.class().name()),
            Self::Thrown(_) => Some("RuntimeException"),
            Self::Dispatch(_) => Some("MissingMethodException"),
            Self::PatternMethodFailed { source, .. } => source.exception_class(),
            Self::StackOverflow => Some("StackOverflowError"),
            Self::ClassNotFound(_) => Some("RuntimeException"),
            Self::InvalidPattern(_) => Some("IllegalArgumentException"),
            Self::Bug(_) => None,
        }
    }
}

/// `Type: message` for exception objects.
pub fn describe_thrown(value: &Value) -> String {
    match value {
        Value::Object(o) => match o.field("message") {
            Some(Value::Null) | None => o.class().name().to_string(),
            Some(Value::Str(m)) => format!("{}: {m}", o.class().name()),
            Some(other) => format!("{}: {other:?}", o.class().name()),
        },
        other => format!("{other:?}"),
    }
}
