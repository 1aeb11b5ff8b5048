//! The phase driver.
//!
//! A [`CompilationUnit`] owns a set of [`SourceUnit`]s and, per phase, an
//! ordered list of [`PhaseOperation`]s. `compile(through)` runs the phases
//! in their fixed order. Within a phase every operation runs over every
//! source unit that has not finished that phase yet, then the next
//! operation runs; only when all of them are done does the next phase
//! start.
use std::fmt;
use std::path::Path;

use bytecode::GeneratedClass;

use crate::class_node::ClassTable;
use crate::config::CompilerConfiguration;
use crate::error::CompileError;
use crate::message::{ErrorCollector, Message, MessageKind, MessageSink};
use crate::phase::Phase;
use crate::source::{FileReaderSource, ReaderSource, SourceUnit, StringReaderSource};
use crate::{canonical, convert, generate, output, resolve, select};

/// Work registered against one phase.
pub trait PhaseOperation: Send {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once for each source unit taking part in the phase.
    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError>;

    /// Called once after `call` has seen every source unit.
    fn finish(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        Ok(())
    }
}

/// What a phase operation can see and do besides its source unit.
pub struct PhaseContext<'a> {
    phase: Phase,
    config: &'a CompilerConfiguration,
    classes: &'a mut ClassTable,
    output: &'a mut Vec<GeneratedClass>,
    added: Vec<(Phase, Box<dyn PhaseOperation>)>,
    notices: Vec<Message>,
}

impl<'a> PhaseContext<'a> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &CompilerConfiguration {
        self.config
    }

    pub fn classes(&self) -> &ClassTable {
        self.classes
    }

    pub fn classes_mut(&mut self) -> &mut ClassTable {
        self.classes
    }

    pub fn output(&self) -> &[GeneratedClass] {
        self.output
    }

    pub(crate) fn output_mut(&mut self) -> &mut Vec<GeneratedClass> {
        self.output
    }

    /// Register another operation while the compile is running.
    ///
    /// Operations for a later phase run when that phase comes. Operations
    /// for the running phase run after the ones already registered for it.
    /// Operations for a finished phase can never run; they are dropped
    /// with a warning.
    pub fn add_phase_operation(&mut self, phase: Phase, op: impl PhaseOperation + 'static) {
        self.added.push((phase, Box::new(op)));
    }

    /// A driver-level warning not tied to any source position.
    pub fn warn(&mut self, source: &str, text: impl Into<String>) {
        self.notices
            .push(Message::warning(MessageKind::Driver, source, None, text));
    }
}

/// A phase operation built from a closure over one source unit.
pub struct UnitOperation<F> {
    name: &'static str,
    f: F,
}

pub fn operation<F>(name: &'static str, f: F) -> UnitOperation<F>
where
    F: FnMut(&mut PhaseContext<'_>, &mut SourceUnit) -> Result<(), CompileError> + Send,
{
    UnitOperation { name, f }
}

impl<F> PhaseOperation for UnitOperation<F>
where
    F: FnMut(&mut PhaseContext<'_>, &mut SourceUnit) -> Result<(), CompileError> + Send,
{
    fn name(&self) -> &str {
        self.name
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        (self.f)(ctx, unit)
    }
}

/// A phase operation that runs once per phase rather than per source.
pub struct GlobalOperation<F> {
    name: &'static str,
    f: F,
}

pub fn global_operation<F>(name: &'static str, f: F) -> GlobalOperation<F>
where
    F: FnMut(&mut PhaseContext<'_>) -> Result<(), CompileError> + Send,
{
    GlobalOperation { name, f }
}

impl<F> PhaseOperation for GlobalOperation<F>
where
    F: FnMut(&mut PhaseContext<'_>) -> Result<(), CompileError> + Send,
{
    fn name(&self) -> &str {
        self.name
    }

    fn call(&mut self, _ctx: &mut PhaseContext<'_>, _unit: &mut SourceUnit) -> Result<(), CompileError> {
        Ok(())
    }

    fn finish(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        (self.f)(ctx)
    }
}

struct Initialize;

impl PhaseOperation for Initialize {
    fn name(&self) -> &str {
        "initialize"
    }

    fn call(&mut self, _ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        log::debug!("initializing source unit {}", unit.name());
        unit.ast = None;
        unit.classes.clear();
        unit.generated.clear();
        unit.selected.clear();
        Ok(())
    }
}

struct Parse;

impl PhaseOperation for Parse {
    fn name(&self) -> &str {
        "parse"
    }

    fn call(&mut self, _ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        // The reader lives only for the duration of the parse.
        let out = match unit.source().reader() {
            Ok(reader) => parser::parse_reader(reader),
            Err(e) => {
                unit.add_error(MessageKind::Io, None, format!("cannot read source: {e}"));
                return Ok(());
            }
        };
        for err in &out.errors {
            unit.add_error(MessageKind::Syntax, Some(err.span), err.message.clone());
        }
        log::debug!(
            "parsed {}: {} items, {} syntax errors",
            unit.name(),
            out.module.items.len(),
            out.errors.len()
        );
        unit.ast = Some(out.module);
        Ok(())
    }
}

struct Finalize;

impl PhaseOperation for Finalize {
    fn name(&self) -> &str {
        "finalize"
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        if !ctx.config().keep_ast {
            unit.ast = None;
        }
        unit.selected.clear();
        Ok(())
    }
}

pub struct CompilationUnit {
    config: CompilerConfiguration,
    sources: Vec<SourceUnit>,
    operations: Vec<Vec<Box<dyn PhaseOperation>>>,
    classes: ClassTable,
    collector: ErrorCollector,
    output: Vec<GeneratedClass>,
    /// Last phase that ran to completion for the unit as a whole.
    phase_done: Option<Phase>,
}

impl fmt::Debug for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationUnit")
            .field("sources", &self.sources)
            .field("classes", &self.classes.len())
            .field("phase_done", &self.phase_done)
            .finish()
    }
}

impl Default for CompilationUnit {
    fn default() -> Self {
        Self::new(CompilerConfiguration::default())
    }
}

impl CompilationUnit {
    pub fn new(config: CompilerConfiguration) -> Self {
        let mut unit = Self {
            collector: ErrorCollector::new(config.tolerance),
            config,
            sources: Vec::new(),
            operations: Phase::ALL.iter().map(|_| Vec::new()).collect(),
            classes: ClassTable::new(),
            output: Vec::new(),
            phase_done: None,
        };
        unit.add_phase_operation(Phase::Initialization, Initialize);
        unit.add_phase_operation(Phase::Parsing, Parse);
        unit.add_phase_operation(Phase::Conversion, convert::Convert);
        unit.add_phase_operation(Phase::SemanticAnalysis, resolve::Resolve);
        unit.add_phase_operation(Phase::Canonicalization, canonical::Canonicalize);
        unit.add_phase_operation(Phase::InstructionSelection, select::Select);
        unit.add_phase_operation(Phase::ClassGeneration, generate::Generate);
        unit.add_phase_operation(Phase::Output, output::Output);
        unit.add_phase_operation(Phase::Finalization, Finalize);
        unit
    }

    pub fn config(&self) -> &CompilerConfiguration {
        &self.config
    }

    /// Route every diagnostic to `sink` as it is recorded.
    pub fn set_message_sink(&mut self, sink: impl MessageSink + 'static) {
        self.collector.set_sink(Box::new(sink));
    }

    pub fn add_source(&mut self, source: impl ReaderSource + 'static) -> &mut SourceUnit {
        let unit = SourceUnit::new(Box::new(source));
        log::debug!("adding source unit {}", unit.name());
        self.sources.push(unit);
        let last = self.sources.len() - 1;
        &mut self.sources[last]
    }

    pub fn add_source_str(&mut self, name: &str, text: &str) -> &mut SourceUnit {
        self.add_source(StringReaderSource::new(name, text))
    }

    pub fn add_source_file(&mut self, path: impl AsRef<Path>) -> &mut SourceUnit {
        self.add_source(FileReaderSource::new(path.as_ref()))
    }

    pub fn add_phase_operation(&mut self, phase: Phase, op: impl PhaseOperation + 'static) {
        self.operations[phase.index()].push(Box::new(op));
    }

    pub fn sources(&self) -> &[SourceUnit] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&SourceUnit> {
        self.sources.iter().find(|s| &**s.name() == name)
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Classes collected by the Output phase.
    pub fn generated(&self) -> &[GeneratedClass] {
        &self.output
    }

    pub fn take_generated(&mut self) -> Vec<GeneratedClass> {
        std::mem::take(&mut self.output)
    }

    pub fn messages(&self) -> &[Message] {
        self.collector.messages()
    }

    pub fn has_errors(&self) -> bool {
        self.collector.has_errors()
    }

    /// Render every message with its source sample.
    pub fn render_messages(&self) -> String {
        let mut out = String::new();
        for msg in self.collector.messages() {
            let source = self
                .sources
                .iter()
                .find(|s| s.name() == &msg.source)
                .map(|s| s.source());
            out.push_str(&msg.render(source));
            out.push('\n');
        }
        out
    }

    pub fn compile_all(&mut self) -> Result<(), CompileError> {
        self.compile(Phase::LAST)
    }

    /// Run every phase up to and including `through`.
    ///
    /// Sources added after an earlier `compile` catch up from their first
    /// phase; phases they have already finished are not repeated.
    pub fn compile(&mut self, through: Phase) -> Result<(), CompileError> {
        for phase in Phase::ALL {
            if phase > through {
                break;
            }
            let pending = self.sources.iter().any(|s| s.completed < Some(phase));
            if !pending && self.phase_done >= Some(phase) {
                continue;
            }
            self.run_phase(phase)?;
            for source in &mut self.sources {
                if source.completed < Some(phase) {
                    source.completed = Some(phase);
                }
            }
            self.phase_done = self.phase_done.max(Some(phase));
            if self.config.dump_phase == Some(phase) {
                for source in &self.sources {
                    if let Some(ast) = source.ast() {
                        log::debug!("AST of {} after {phase}:\n{ast:#?}", source.name());
                    }
                }
            }
            if self.sources.iter().any(SourceUnit::has_errors) {
                log::debug!("{phase} finished with errors, stopping");
                return Err(self.collector.failure());
            }
        }
        Ok(())
    }

    fn run_phase(&mut self, phase: Phase) -> Result<(), CompileError> {
        log::debug!("phase {} ({phase})", phase.number());
        let idx = phase.index();
        let mut ops = std::mem::take(&mut self.operations[idx]);
        let result = self.run_operations(phase, &mut ops);
        // Anything registered straight into the slot meanwhile goes last.
        ops.append(&mut self.operations[idx]);
        self.operations[idx] = ops;
        result
    }

    fn run_operations(
        &mut self,
        phase: Phase,
        ops: &mut Vec<Box<dyn PhaseOperation>>,
    ) -> Result<(), CompileError> {
        // Indexing on purpose: operations may append to `ops` while running.
        let mut i = 0;
        while i < ops.len() {
            log::trace!("{phase}: running {}", ops[i].name());
            for s in 0..self.sources.len() {
                if self.sources[s].completed >= Some(phase) {
                    continue;
                }
                let mut ctx = PhaseContext {
                    phase,
                    config: &self.config,
                    classes: &mut self.classes,
                    output: &mut self.output,
                    added: Vec::new(),
                    notices: Vec::new(),
                };
                let unit = &mut self.sources[s];
                let result = ops[i].call(&mut ctx, unit);
                let (added, notices) = (ctx.added, ctx.notices);
                let new_messages = unit.take_new_messages();
                self.absorb(phase, ops, added, notices, new_messages)?;
                result?;
            }
            let mut ctx = PhaseContext {
                phase,
                config: &self.config,
                classes: &mut self.classes,
                output: &mut self.output,
                added: Vec::new(),
                notices: Vec::new(),
            };
            let result = ops[i].finish(&mut ctx);
            let (added, notices) = (ctx.added, ctx.notices);
            self.absorb(phase, ops, added, notices, Vec::new())?;
            result?;
            i += 1;
        }
        Ok(())
    }

    /// File operations registered during a call and forward new messages.
    fn absorb(
        &mut self,
        phase: Phase,
        current: &mut Vec<Box<dyn PhaseOperation>>,
        added: Vec<(Phase, Box<dyn PhaseOperation>)>,
        notices: Vec<Message>,
        messages: Vec<Message>,
    ) -> Result<(), CompileError> {
        for msg in messages.into_iter().chain(notices) {
            self.collector.add(msg)?;
        }
        for (target, op) in added {
            if target == phase {
                current.push(op);
            } else if target > phase {
                self.operations[target.index()].push(op);
            } else {
                let text = format!(
                    "operation `{}` registered for {target} during {phase} will never run",
                    op.name()
                );
                log::warn!("{text}");
                self.collector
                    .add(Message::warning(MessageKind::Driver, "<compilation unit>", None, text))?;
            }
        }
        Ok(())
    }
}

/// Compile one in-memory source through every phase.
pub fn compile_source(name: &str, text: &str) -> Result<Vec<GeneratedClass>, CompileError> {
    let mut unit = CompilationUnit::default();
    unit.add_source_str(name, text);
    unit.compile_all()?;
    Ok(unit.take_generated())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    fn shared_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn phases_run_in_order_across_sources() {
        let log = shared_log();
        let mut unit = CompilationUnit::default();
        unit.add_source_str("a.kst", "x = 1");
        unit.add_source_str("b.kst", "y = 2");
        for phase in [Phase::Output, Phase::Conversion, Phase::Parsing] {
            let log = log.clone();
            unit.add_phase_operation(
                phase,
                operation("spy", move |ctx, source| {
                    log.lock().push(format!("{}:{}", ctx.phase().number(), source.name()));
                    Ok(())
                }),
            );
        }
        unit.compile_all().unwrap();
        assert_eq!(*log.lock(), [
            "2:a.kst", "2:b.kst", "3:a.kst", "3:b.kst", "8:a.kst", "8:b.kst"
        ]);
    }

    #[test]
    fn spy_never_sees_later_phase_effects() {
        let seen = shared_log();
        let mut unit = CompilationUnit::default();
        unit.add_source_str("s.kst", "class A { def f() { 1 } }");
        let spy_seen = seen.clone();
        unit.add_phase_operation(
            Phase::Canonicalization,
            operation("spy", move |_ctx, source| {
                spy_seen.lock().push(format!("generated={}", source.generated().len()));
                Ok(())
            }),
        );
        unit.compile_all().unwrap();
        assert_eq!(*seen.lock(), ["generated=0"]);
        assert_eq!(unit.generated().len(), 1);
    }

    #[test]
    fn operations_may_register_more_operations() {
        let log = shared_log();
        let mut unit = CompilationUnit::default();
        unit.add_source_str("s.kst", "x = 1");
        let outer = log.clone();
        unit.add_phase_operation(
            Phase::Conversion,
            operation("installer", move |ctx, _source| {
                let later = outer.clone();
                ctx.add_phase_operation(
                    Phase::ClassGeneration,
                    operation("later", move |ctx, _| {
                        later.lock().push(format!("later@{}", ctx.phase().number()));
                        Ok(())
                    }),
                );
                let same = outer.clone();
                ctx.add_phase_operation(
                    Phase::Conversion,
                    operation("same", move |ctx, _| {
                        same.lock().push(format!("same@{}", ctx.phase().number()));
                        Ok(())
                    }),
                );
                ctx.add_phase_operation(Phase::Parsing, operation("past", |_, _| Ok(())));
                outer.lock().push("installer".into());
                Ok(())
            }),
        );
        unit.compile_all().unwrap();
        assert_eq!(*log.lock(), ["installer", "same@3", "later@7"]);
        assert!(
            unit.messages()
                .iter()
                .any(|m| !m.is_error() && m.text.contains("will never run"))
        );
    }

    #[test]
    fn errors_stop_at_phase_boundary() {
        let reached = shared_log();
        let mut unit = CompilationUnit::default();
        unit.add_source_str("bad.kst", "x = (1 +\ny = 2");
        unit.add_source_str("good.kst", "z = 3");
        let r = reached.clone();
        unit.add_phase_operation(
            Phase::Conversion,
            operation("after", move |_, s| {
                r.lock().push(s.name().to_string());
                Ok(())
            }),
        );
        let err = unit.compile_all().unwrap_err();
        assert!(reached.lock().is_empty());
        let messages = err.messages();
        assert!(!messages.is_empty());
        assert!(messages.iter().all(|m| &*m.source == "bad.kst"));
        assert!(messages[0].line().is_some());
    }

    #[test]
    fn missing_file_is_reported() {
        let mut unit = CompilationUnit::default();
        unit.add_source_file("/no/such/dir/missing.kst");
        let err = unit.compile(Phase::Parsing).unwrap_err();
        assert_eq!(err.messages()[0].kind, MessageKind::Io);
    }

    #[test]
    fn tolerance_aborts_mid_phase() {
        let mut config = CompilerConfiguration::default();
        config.tolerance = 1;
        let mut unit = CompilationUnit::new(config);
        unit.add_source_str("a.kst", "x = )\n");
        unit.add_source_str("b.kst", "y = )\n");
        let parsed = shared_log();
        let p = parsed.clone();
        unit.add_phase_operation(
            Phase::Parsing,
            operation("count", move |_, s| {
                p.lock().push(s.name().to_string());
                Ok(())
            }),
        );
        let err = unit.compile_all().unwrap_err();
        assert!(matches!(err, CompileError::CompilationFailed { .. }));
        // Aborted while the built-in parser was still on the second unit.
        assert!(parsed.lock().is_empty());
    }

    #[test]
    fn sink_receives_messages() {
        let got = shared_log();
        let mut unit = CompilationUnit::default();
        let g = got.clone();
        unit.set_message_sink(move |m: &Message| g.lock().push(m.source.to_string()));
        unit.add_source_str("oops.kst", "def = 1");
        assert!(unit.compile_all().is_err());
        assert!(got.lock().iter().all(|s| s == "oops.kst"));
        assert!(!got.lock().is_empty());
    }

    #[test]
    fn bug_errors_propagate_untouched() {
        let mut unit = CompilationUnit::default();
        unit.add_source_str("s.kst", "x = 1");
        unit.add_phase_operation(
            Phase::Conversion,
            operation("broken", |_, _| Err(CompileError::bug("impossible AST shape"))),
        );
        let err = unit.compile_all().unwrap_err();
        assert!(err.is_bug());
        assert!(err.messages().is_empty());
    }

    #[test]
    fn late_sources_catch_up() {
        let mut unit = CompilationUnit::default();
        unit.add_source_str("first.kst", "class First {}");
        unit.compile_all().unwrap();
        assert_eq!(unit.generated().len(), 1);
        unit.add_source_str("second.kst", "class Second extends First {}");
        unit.compile_all().unwrap();
        let names: Vec<&str> = unit.generated().iter().map(|c| &*c.name).collect();
        assert_eq!(names, ["First", "Second"]);
    }
}
