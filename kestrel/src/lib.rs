//! # Kestrel
//!
//! Compile and run kestrel programs in one place. A [`Shell`] owns a
//! compiler configuration and a [`Runtime`]; every source it evaluates is
//! compiled through all phases, loaded into the runtime, and its script
//! class, if it has one, is run. Programs run on a thread with
//! [`PROGRAM_STACK_SIZE`] bytes of stack whatever thread calls the shell.
//!
//! ```rust
//! let shell = kestrel::Shell::captured();
//! let value = shell.evaluate("sum.kst", "def xs = [1, 2, 3]\nxs.inject(0, { a, b -> a + b })").unwrap();
//! assert_eq!(value, runtime::Value::Int(6));
//! ```
use std::path::Path;
use std::sync::Arc;

use bytecode::GeneratedClass;
use compiler::{CompilationUnit, CompileError, CompilerConfiguration, Phase};
use runtime::{Output, Runtime, RuntimeClass, RuntimeConfig, RuntimeError, Value};
use thiserror::Error;

/// Stack size for threads that run programs. Every program call nests a
/// few Rust frames, so the default thread stack is too small for
/// `RuntimeConfig::max_call_depth`.
pub const PROGRAM_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Diagnostics rendered with source samples.
    #[error("{rendered}")]
    Compile {
        rendered: String,
        #[source]
        source: CompileError,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("cannot start program thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl ShellError {
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Self::Compile { .. })
    }
}

pub struct Shell {
    config: CompilerConfiguration,
    runtime: Runtime,
}

impl Shell {
    pub fn new(config: CompilerConfiguration, runtime: Runtime) -> Self {
        Self { config, runtime }
    }

    /// Default configuration with program output captured, for tests and
    /// embedding.
    pub fn captured() -> Self {
        let runtime = Runtime::new(RuntimeConfig::default()).with_output(Output::captured());
        Self::new(CompilerConfiguration::default(), runtime)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn compiler_config(&self) -> &CompilerConfiguration {
        &self.config
    }

    /// Compile `text` through `through` without loading anything.
    pub fn compile_str(&self, name: &str, text: &str, through: Phase) -> Result<Vec<GeneratedClass>, ShellError> {
        let mut unit = CompilationUnit::new(self.config.clone());
        unit.add_source_str(name, text);
        compile(unit, through)
    }

    pub fn compile_file(&self, path: impl AsRef<Path>, through: Phase) -> Result<Vec<GeneratedClass>, ShellError> {
        let mut unit = CompilationUnit::new(self.config.clone());
        unit.add_source_file(path);
        compile(unit, through)
    }

    /// Load generated classes and return the script class among them.
    pub fn load(&self, classes: Vec<GeneratedClass>) -> Result<Option<Arc<RuntimeClass>>, ShellError> {
        let loaded = self.runtime.load(classes)?;
        Ok(loaded.into_iter().find(|c| c.is_script()))
    }

    /// Compile, load and run one source. Sources without top-level
    /// statements only define classes and evaluate to null.
    pub fn evaluate(&self, name: &str, text: &str) -> Result<Value, ShellError> {
        self.on_program_stack(|| {
            let classes = self.compile_str(name, text, Phase::LAST)?;
            self.run_loaded(classes)
        })
    }

    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<Value, ShellError> {
        let path = path.as_ref();
        self.on_program_stack(|| {
            let classes = self.compile_file(path, Phase::LAST)?;
            self.run_loaded(classes)
        })
    }

    /// Run `f` on a scoped thread with [`PROGRAM_STACK_SIZE`] bytes of
    /// stack, so `max_call_depth` is reached before the Rust stack runs out.
    fn on_program_stack<T, F>(&self, f: F) -> Result<T, ShellError>
    where
        F: FnOnce() -> Result<T, ShellError> + Send,
        T: Send,
    {
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name("kestrel-program".into())
                .stack_size(PROGRAM_STACK_SIZE)
                .spawn_scoped(scope, f)?;
            handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        })
    }

    fn run_loaded(&self, classes: Vec<GeneratedClass>) -> Result<Value, ShellError> {
        match self.load(classes)? {
            Some(script) => {
                log::debug!("running {}", script.name());
                Ok(self.runtime.interpreter().run_script(&script)?)
            }
            None => Ok(Value::Null),
        }
    }

    /// A value as `println` would show it.
    pub fn display(&self, value: &Value) -> Result<String, ShellError> {
        Ok(self.runtime.interpreter().to_string(value)?.to_string())
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(CompilerConfiguration::default(), Runtime::default())
    }
}

fn compile(mut unit: CompilationUnit, through: Phase) -> Result<Vec<GeneratedClass>, ShellError> {
    match unit.compile(through) {
        Ok(()) => {
            for warning in unit.messages().iter().filter(|m| !m.is_error()) {
                log::warn!("{warning}");
            }
            Ok(unit.take_generated())
        }
        Err(source) => {
            let rendered = match &source {
                CompileError::CompilationFailed { .. } => unit.render_messages(),
                other => other.to_string(),
            };
            Err(ShellError::Compile { rendered, source })
        }
    }
}

/// Run `f` on a thread with [`PROGRAM_STACK_SIZE`] bytes of stack.
pub fn with_program_stack<T, F>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("kestrel-main".into())
        .stack_size(PROGRAM_STACK_SIZE)
        .spawn(f)?;
    handle
        .join()
        .map_err(|_| std::io::Error::other("program thread panicked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_only_sources_evaluate_to_null() {
        let shell = Shell::captured();
        let value = shell.evaluate("defs.kst", "class Pair {\n def a\n def b\n}").unwrap();
        assert!(value.is_null());
        assert!(shell.runtime().class("Pair").is_some());
    }

    #[test]
    fn compile_errors_render_samples() {
        let shell = Shell::captured();
        let err = shell.evaluate("bad.kst", "x = (1 +\n").unwrap_err();
        assert!(err.is_compile_error());
        assert!(err.to_string().contains("bad.kst"));
    }

    #[test]
    fn partial_compiles_generate_nothing() {
        let shell = Shell::captured();
        let classes = shell.compile_str("p.kst", "class P {}", Phase::SemanticAnalysis).unwrap();
        assert!(classes.is_empty());
    }

    #[test]
    fn runaway_recursion_is_caught_from_any_thread() {
        let src = "def down(n) { down(n + 1) }\ndef r = 'none'\ntry { down(0) } catch (StackOverflowError e) { r = 'caught' }\nr";
        let value = std::thread::spawn(move || Shell::captured().evaluate("d.kst", src))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(value, Value::str("caught"));
    }

    #[test]
    fn program_stack_runs_closures() {
        assert_eq!(with_program_stack(|| 6 * 7).unwrap(), 42);
    }
}
