use std::io::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::meta::Strategy;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Receiver shapes a call site caches before going megamorphic. `0`
    /// disables caching.
    pub polymorphic_limit: usize,
    /// Nested calls allowed before `StackOverflowError`.
    pub max_call_depth: usize,
    /// Method resolution order.
    pub strategies: Vec<Strategy>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            polymorphic_limit: 4,
            max_call_depth: 512,
            strategies: Strategy::DEFAULT_ORDER.to_vec(),
        }
    }
}

/// Where `print` and `println` go.
#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Stdout,
    Captured(Arc<Mutex<String>>),
}

impl Output {
    pub fn captured() -> Self {
        Self::Captured(Arc::new(Mutex::new(String::new())))
    }

    pub fn write(&self, text: &str) {
        match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                    log::warn!("failed to write program output: {e}");
                }
            }
            Self::Captured(buf) => buf.lock().push_str(text),
        }
    }

    /// Drain captured output. Always empty for stdout.
    pub fn take(&self) -> String {
        match self {
            Self::Stdout => String::new(),
            Self::Captured(buf) => std::mem::take(&mut *buf.lock()),
        }
    }
}
