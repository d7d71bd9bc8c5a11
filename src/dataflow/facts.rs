use std::collections::{BTreeMap, BTreeSet};

use crate::dataflow::instruction::InstructionDecoder;
use crate::error::EvalResult;
use crate::ir::Method;

/// Static control-flow skeleton of a method body.
pub trait ControlFlowFacts {
    fn is_instruction(&self, offset: u32) -> bool;

    fn is_branch_target(&self, offset: u32) -> bool;

    fn is_exception_handler(&self, offset: u32) -> bool;

    fn is_subroutine_start(&self, offset: u32) -> bool;

    /// Offset just past the last instruction of the subroutine starting at `start`.
    fn subroutine_end(&self, start: u32) -> Option<u32>;
}

/// Facts computed by a linear sweep followed by a walk of each subroutine body.
#[derive(Clone, Debug, Default)]
pub struct BranchTargetFinder {
    instructions: BTreeSet<u32>,
    branch_targets: BTreeSet<u32>,
    handlers: BTreeSet<u32>,
    subroutines: BTreeMap<u32, u32>,
}

impl BranchTargetFinder {
    pub fn analyze(method: &Method, decoder: &dyn InstructionDecoder) -> EvalResult<Self> {
        let mut facts = BranchTargetFinder::default();
        let mut successors = BTreeMap::new();
        let mut subroutine_starts = BTreeSet::new();
        let mut offset = 0;
        while offset < method.code_length() {
            let instruction = decoder.decode(method, offset)?;
            facts.instructions.insert(offset);
            facts
                .branch_targets
                .extend(instruction.branch_targets());
            if instruction.is_subroutine_invocation() {
                subroutine_starts.extend(instruction.branch_targets());
            }
            successors.insert(
                offset,
                (instruction.next_offset(), instruction.static_successors()),
            );
            offset = instruction.next_offset();
        }
        for handler in &method.exception_handlers {
            facts.handlers.insert(handler.handler_pc);
        }
        for start in subroutine_starts {
            let end = subroutine_extent(start, &successors);
            facts.subroutines.insert(start, end);
        }
        Ok(facts)
    }

    pub fn instruction_offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.instructions.iter().copied()
    }
}

fn subroutine_extent(start: u32, successors: &BTreeMap<u32, (u32, Vec<u32>)>) -> u32 {
    let mut seen = BTreeSet::new();
    let mut pending = vec![start];
    let mut end = start;
    while let Some(offset) = pending.pop() {
        if !seen.insert(offset) {
            continue;
        }
        let Some((next, targets)) = successors.get(&offset) else {
            continue;
        };
        end = end.max(*next);
        pending.extend(targets.iter().copied());
    }
    end
}

impl ControlFlowFacts for BranchTargetFinder {
    fn is_instruction(&self, offset: u32) -> bool {
        self.instructions.contains(&offset)
    }

    fn is_branch_target(&self, offset: u32) -> bool {
        self.branch_targets.contains(&offset)
    }

    fn is_exception_handler(&self, offset: u32) -> bool {
        self.handlers.contains(&offset)
    }

    fn is_subroutine_start(&self, offset: u32) -> bool {
        self.subroutines.contains_key(&offset)
    }

    fn subroutine_end(&self, start: u32) -> Option<u32> {
        self.subroutines.get(&start).copied()
    }
}
