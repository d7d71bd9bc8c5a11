use crate::value::{InstructionOffsets, Tristate};

/// Collects the successors an instruction selects while it is interpreted.
#[derive(Clone, Debug, Default)]
pub struct BranchUnit {
    called: bool,
    targets: InstructionOffsets,
    full_code: bool,
}

impl BranchUnit {
    pub fn new(full_code: bool) -> Self {
        Self {
            full_code,
            ..Self::default()
        }
    }

    /// Unconditional jump.
    pub fn branch(&mut self, target: u32) {
        self.called = true;
        self.targets.insert(target);
    }

    /// Conditional jump; a decided condition keeps only one side unless all code is evaluated.
    pub fn branch_conditionally(&mut self, fallthrough: u32, target: u32, taken: Tristate) {
        self.called = true;
        let taken = if self.full_code { Tristate::Maybe } else { taken };
        if taken != Tristate::Never {
            self.targets.insert(target);
        }
        if taken != Tristate::Always {
            self.targets.insert(fallthrough);
        }
    }

    /// The path ends here: return, throw or a certain runtime fault.
    pub fn exit(&mut self) {
        self.called = true;
    }

    pub fn was_called(&self) -> bool {
        self.called
    }

    pub fn targets(&self) -> &InstructionOffsets {
        &self.targets
    }

    pub fn is_full_code(&self) -> bool {
        self.full_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decided_conditions_prune_the_other_side() {
        let mut branch = BranchUnit::new(false);
        branch.branch_conditionally(3, 10, Tristate::Always);
        assert_eq!(branch.targets(), &InstructionOffsets::single(10));

        let mut branch = BranchUnit::new(false);
        branch.branch_conditionally(3, 10, Tristate::Never);
        assert_eq!(branch.targets(), &InstructionOffsets::single(3));
        assert!(branch.was_called());
    }

    #[test]
    fn full_code_keeps_both_sides() {
        let mut branch = BranchUnit::new(true);

        branch.branch_conditionally(3, 10, Tristate::Always);

        assert_eq!(branch.targets(), &InstructionOffsets::from_iter([3, 10]));
    }
}
