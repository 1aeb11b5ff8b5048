//! # Compiler
//!
//! Turns kestrel source units into [`GeneratedClass`]es.
//!
//! ```text
//!  SourceUnit ─▶ Parsing ─▶ Conversion ─▶ SemanticAnalysis ─▶ Canonicalization
//!                                                                   │
//!      output ◀── Output ◀── ClassGeneration ◀── InstructionSelection
//! ```
//!
//! A [`CompilationUnit`] drives the nine [`Phase`]s in order. Every phase is
//! a list of [`PhaseOperation`]s, so extensions can hook in anywhere,
//! including while a compile is running. Diagnostics are collected per
//! source unit; a phase that ends with errors stops the compile with
//! [`CompileError::CompilationFailed`].
//!
//! ```rust
//! let classes = compiler::compile_source("hello.kst", "println 'hi'").unwrap();
//! assert_eq!(&*classes[0].name, "hello");
//! ```
//!
//! [`GeneratedClass`]: bytecode::GeneratedClass

mod canonical;
mod class_node;
mod config;
mod convert;
mod error;
mod generate;
mod message;
mod output;
mod phase;
mod resolve;
mod select;
mod source;
mod unit;

pub use canonical::{INITIALIZER, STATIC_INITIALIZER};
pub use class_node::{ClassNode, ClassTable, FieldNode, MethodNode, TypeEnv};
pub use config::{CompilerConfiguration, WarningLevel};
pub use error::CompileError;
pub use message::{ErrorCollector, LogSink, Message, MessageKind, MessageSink, Severity};
pub use output::LISTING_EXTENSION;
pub use phase::Phase;
pub use source::{FileReaderSource, ReaderSource, SourceUnit, StringReaderSource, script_class_name};
pub use unit::{
    CompilationUnit, GlobalOperation, PhaseContext, PhaseOperation, UnitOperation, compile_source,
    global_operation, operation,
};
