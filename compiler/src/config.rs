use std::path::PathBuf;

use crate::phase::Phase;

/// How chatty semantic analysis is about questionable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WarningLevel {
    None,
    #[default]
    Likely,
    Possible,
    Paranoia,
}

#[derive(Debug, Clone)]
pub struct CompilerConfiguration {
    /// Errors accepted before the compile aborts mid-phase. `0` disables
    /// the limit; phase boundaries still fail on any error.
    pub tolerance: usize,
    pub warning_level: WarningLevel,
    /// Output writes a `<fqn>.kbc.txt` listing per class here.
    pub target_directory: Option<PathBuf>,
    /// Keep source maps in generated code.
    pub debug: bool,
    /// Log the AST after this phase at debug level.
    pub dump_phase: Option<Phase>,
    /// Keep ASTs past Finalization.
    pub keep_ast: bool,
}

impl Default for CompilerConfiguration {
    fn default() -> Self {
        Self {
            tolerance: 10,
            warning_level: WarningLevel::default(),
            target_directory: None,
            debug: true,
            dump_phase: None,
            keep_ast: false,
        }
    }
}

impl CompilerConfiguration {
    pub fn warns(&self, level: WarningLevel) -> bool {
        self.warning_level != WarningLevel::None && level <= self.warning_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_levels_nest() {
        let mut config = CompilerConfiguration::default();
        assert!(config.warns(WarningLevel::Likely));
        assert!(!config.warns(WarningLevel::Possible));
        config.warning_level = WarningLevel::Paranoia;
        assert!(config.warns(WarningLevel::Possible));
        config.warning_level = WarningLevel::None;
        assert!(!config.warns(WarningLevel::Likely));
    }
}
