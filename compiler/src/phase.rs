use std::fmt;

/// The fixed compiler pipeline.
///
/// The numbers are stable: phase operations are registered against them
/// and external tooling refers to phases by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    Initialization = 1,
    Parsing = 2,
    Conversion = 3,
    SemanticAnalysis = 4,
    Canonicalization = 5,
    InstructionSelection = 6,
    ClassGeneration = 7,
    Output = 8,
    Finalization = 9,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Initialization,
        Phase::Parsing,
        Phase::Conversion,
        Phase::SemanticAnalysis,
        Phase::Canonicalization,
        Phase::InstructionSelection,
        Phase::ClassGeneration,
        Phase::Output,
        Phase::Finalization,
    ];

    pub const FIRST: Phase = Phase::Initialization;
    pub const LAST: Phase = Phase::Finalization;

    pub const fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Phase> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// Position in [`Phase::ALL`].
    pub(crate) const fn index(self) -> usize {
        self as usize - 1
    }

    pub fn next(self) -> Option<Phase> {
        Self::from_number(self.number() + 1)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Phase::Initialization => "initialization",
            Phase::Parsing => "parsing",
            Phase::Conversion => "conversion",
            Phase::SemanticAnalysis => "semantic analysis",
            Phase::Canonicalization => "canonicalization",
            Phase::InstructionSelection => "instruction selection",
            Phase::ClassGeneration => "class generation",
            Phase::Output => "output",
            Phase::Finalization => "finalization",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_stable() {
        let numbers: Vec<u8> = Phase::ALL.iter().map(|p| p.number()).collect();
        assert_eq!(numbers, (1..=9).collect::<Vec<u8>>());
        assert_eq!(Phase::SemanticAnalysis.number(), 4);
        assert_eq!(Phase::Output.number(), 8);
    }

    #[test]
    fn from_number_round_trips_and_rejects_out_of_range() {
        for p in Phase::ALL {
            assert_eq!(Phase::from_number(p.number()), Some(p));
        }
        assert_eq!(Phase::from_number(0), None);
        assert_eq!(Phase::from_number(10), None);
    }

    #[test]
    fn ordering_follows_numbers() {
        assert!(Phase::Parsing < Phase::Conversion);
        assert_eq!(Phase::Canonicalization.next(), Some(Phase::InstructionSelection));
        assert_eq!(Phase::LAST.next(), None);
        assert_eq!(Phase::ClassGeneration.to_string(), "class generation");
    }
}
