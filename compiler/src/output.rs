//! Output: generated classes join the compilation's output, and are
//! optionally written out as disassembly listings.
use std::fs;
use std::path::Path;

use bytecode::GeneratedClass;

use crate::error::CompileError;
use crate::message::MessageKind;
use crate::source::SourceUnit;
use crate::unit::{PhaseContext, PhaseOperation};

/// Listing file extension.
pub const LISTING_EXTENSION: &str = "kbc.txt";

pub(crate) struct Output;

impl PhaseOperation for Output {
    fn name(&self) -> &str {
        "output"
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        if let Some(dir) = ctx.config().target_directory.clone() {
            let failures: Vec<String> = unit
                .generated
                .iter()
                .filter_map(|class| {
                    write_listing(&dir, class)
                        .err()
                        .map(|e| format!("cannot write listing for {} to {}: {e}", class.name, dir.display()))
                })
                .collect();
            for text in failures {
                unit.add_error(MessageKind::Io, None, text);
            }
        }
        ctx.output_mut().extend(unit.generated.iter().cloned());
        Ok(())
    }
}

fn write_listing(dir: &Path, class: &GeneratedClass) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{LISTING_EXTENSION}", class.name));
    log::debug!("writing {}", path.display());
    fs::write(path, class.disassemble())
}

#[cfg(test)]
mod tests {
    use crate::config::CompilerConfiguration;
    use crate::phase::Phase;
    use crate::unit::CompilationUnit;

    #[test]
    fn listings_are_written_per_class() {
        let dir = std::env::temp_dir().join(format!("kestrel-output-{}", std::process::id()));
        let config = CompilerConfiguration {
            target_directory: Some(dir.clone()),
            ..CompilerConfiguration::default()
        };
        let mut unit = CompilationUnit::new(config);
        unit.add_source_str("a.kst", "package p\nclass A { def f() { 1 } }\nclass B {}\n");
        unit.compile(Phase::Output).unwrap();
        assert_eq!(unit.generated().len(), 2);
        let listing = std::fs::read_to_string(dir.join("p.A.kbc.txt")).unwrap();
        assert!(listing.starts_with("class p.A"));
        assert!(dir.join("p.B.kbc.txt").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_target_is_reported_per_class() {
        let blocker = std::env::temp_dir().join(format!("kestrel-output-file-{}", std::process::id()));
        std::fs::write(&blocker, "not a directory").unwrap();
        let config = CompilerConfiguration {
            target_directory: Some(blocker.clone()),
            ..CompilerConfiguration::default()
        };
        let mut unit = CompilationUnit::new(config);
        unit.add_source_str("a.kst", "class A {}\nclass B {}\n");
        let err = unit.compile(Phase::Output).unwrap_err();
        assert!(matches!(err, crate::error::CompileError::CompilationFailed { .. }));
        let failures: Vec<_> = unit
            .messages()
            .iter()
            .filter(|m| m.is_error() && m.to_string().contains("cannot write listing"))
            .collect();
        assert_eq!(failures.len(), 2);
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn output_before_generation_is_empty() {
        let mut unit = CompilationUnit::default();
        unit.add_source_str("a.kst", "class A {}");
        unit.compile(Phase::ClassGeneration).unwrap();
        assert!(unit.generated().is_empty());
        unit.compile(Phase::Output).unwrap();
        assert_eq!(unit.generated().len(), 1);
    }
}
