use std::collections::BTreeSet;

use crate::error::EvalResult;
use crate::frame::{Frame, TracedStack, TracedVariables};
use crate::ir::ExceptionHandler;
use crate::value::{InstructionOffsets, JoinContext};

/// Everything the evaluator learned about one instruction offset.
#[derive(Clone, Debug, Default)]
pub struct InstructionRecord {
    pub before: Option<Frame>,
    pub after: Option<Frame>,
    pub evaluation_count: u32,
    /// The last evaluation ran in the widened, stored context.
    pub generalized: bool,
    /// Offsets that branched here.
    pub branch_origins: InstructionOffsets,
    /// Offsets this instruction branched to.
    pub branch_targets: InstructionOffsets,
    pub subroutine_invocation: bool,
    pub subroutine_return: bool,
    pub subroutine_start: bool,
    pub exception_handler: bool,
}

impl InstructionRecord {
    fn merge(&mut self, other: &InstructionRecord, cx: &JoinContext) -> EvalResult<()> {
        self.before = merge_frames(self.before.take(), other.before.as_ref(), cx)?;
        self.after = merge_frames(self.after.take(), other.after.as_ref(), cx)?;
        self.evaluation_count += other.evaluation_count;
        self.generalized |= other.generalized;
        self.branch_origins.merge(&other.branch_origins);
        self.branch_targets.merge(&other.branch_targets);
        self.subroutine_invocation |= other.subroutine_invocation;
        self.subroutine_return |= other.subroutine_return;
        self.subroutine_start |= other.subroutine_start;
        self.exception_handler |= other.exception_handler;
        Ok(())
    }
}

fn merge_frames(current: Option<Frame>, other: Option<&Frame>, cx: &JoinContext) -> EvalResult<Option<Frame>> {
    Ok(match (current, other) {
        (Some(mut current), Some(other)) => {
            current.generalize(other, cx)?;
            Some(current)
        }
        (None, Some(other)) => Some(other.clone()),
        (current, None) => current,
    })
}

/// Records for every byte offset of a method body, created on first use.
#[derive(Clone, Debug, Default)]
pub struct RecordTable {
    records: Vec<Option<InstructionRecord>>,
}

impl RecordTable {
    pub fn new(code_length: usize) -> Self {
        Self {
            records: vec![None; code_length],
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, offset: u32) -> Option<&InstructionRecord> {
        self.records.get(offset as usize).and_then(Option::as_ref)
    }

    pub fn entry(&mut self, offset: u32) -> &mut InstructionRecord {
        let index = offset as usize;
        if index >= self.records.len() {
            self.records.resize(index + 1, None);
        }
        self.records[index].get_or_insert_with(InstructionRecord::default)
    }

    pub fn is_traced(&self, offset: u32) -> bool {
        self.get(offset)
            .is_some_and(|record| record.evaluation_count > 0)
    }

    /// Whether any offset in `[start, end)` was evaluated.
    pub fn is_traced_range(&self, start: u32, end: u32) -> bool {
        (start..end).any(|offset| self.is_traced(offset))
    }

    pub fn traced_offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.as_ref().is_some_and(|record| record.evaluation_count > 0))
            .map(|(offset, _)| offset as u32)
    }

    /// Fold the traced records of `other` in `[start, end)` into this table.
    pub fn merge_from(&mut self, other: &RecordTable, start: u32, end: u32, cx: &JoinContext) -> EvalResult<()> {
        for offset in start..end {
            if let Some(record) = other.get(offset).filter(|record| record.evaluation_count > 0) {
                self.entry(offset).merge(record, cx)?;
            }
        }
        Ok(())
    }
}

/// Result of a completed evaluation of one method body.
#[derive(Clone, Debug)]
pub struct MethodAnalysis {
    pub(crate) records: RecordTable,
    pub(crate) handlers: Vec<ExceptionHandler>,
    pub(crate) used_handlers: BTreeSet<usize>,
    pub(crate) subroutine_ends: Vec<(u32, u32)>,
    pub(crate) degraded_joins: u32,
}

impl MethodAnalysis {
    pub fn is_traced(&self, offset: u32) -> bool {
        self.records.is_traced(offset)
    }

    pub fn is_traced_range(&self, start: u32, end: u32) -> bool {
        self.records.is_traced_range(start, end)
    }

    pub fn traced_offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.traced_offsets()
    }

    pub fn record(&self, offset: u32) -> Option<&InstructionRecord> {
        self.records.get(offset).filter(|record| record.evaluation_count > 0)
    }

    pub fn variables_before(&self, offset: u32) -> Option<&TracedVariables> {
        self.record(offset)?.before.as_ref().map(|frame| &frame.variables)
    }

    pub fn variables_after(&self, offset: u32) -> Option<&TracedVariables> {
        self.record(offset)?.after.as_ref().map(|frame| &frame.variables)
    }

    pub fn stack_before(&self, offset: u32) -> Option<&TracedStack> {
        self.record(offset)?.before.as_ref().map(|frame| &frame.stack)
    }

    pub fn stack_after(&self, offset: u32) -> Option<&TracedStack> {
        self.record(offset)?.after.as_ref().map(|frame| &frame.stack)
    }

    pub fn branch_origins(&self, offset: u32) -> Option<&InstructionOffsets> {
        self.record(offset).map(|record| &record.branch_origins)
    }

    pub fn branch_targets(&self, offset: u32) -> Option<&InstructionOffsets> {
        self.record(offset).map(|record| &record.branch_targets)
    }

    pub fn is_branch_origin(&self, offset: u32) -> bool {
        self.branch_targets(offset).is_some_and(|targets| !targets.is_empty())
    }

    pub fn is_branch_target(&self, offset: u32) -> bool {
        self.branch_origins(offset).is_some_and(|origins| !origins.is_empty())
    }

    pub fn evaluation_count(&self, offset: u32) -> u32 {
        self.record(offset).map_or(0, |record| record.evaluation_count)
    }

    pub fn is_subroutine_invocation(&self, offset: u32) -> bool {
        self.record(offset).is_some_and(|record| record.subroutine_invocation)
    }

    pub fn is_subroutine_start(&self, offset: u32) -> bool {
        self.record(offset).is_some_and(|record| record.subroutine_start)
    }

    pub fn is_subroutine_return(&self, offset: u32) -> bool {
        self.record(offset).is_some_and(|record| record.subroutine_return)
    }

    pub fn subroutine_end(&self, start: u32) -> Option<u32> {
        self.subroutine_ends
            .iter()
            .find(|(subroutine, _)| *subroutine == start)
            .map(|(_, end)| *end)
    }

    pub fn is_exception_handler(&self, offset: u32) -> bool {
        self.record(offset).is_some_and(|record| record.exception_handler)
    }

    /// Whether the handler at `index` of the exception table was ever evaluated.
    pub fn is_handler_used(&self, index: usize) -> bool {
        self.used_handlers.contains(&index)
    }

    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    /// Handlers whose protected range holds no traced instruction.
    pub fn unused_handlers(&self) -> Vec<&ExceptionHandler> {
        self.handlers
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.used_handlers.contains(index))
            .map(|(_, handler)| handler)
            .collect()
    }

    /// Reference joins degraded because of an incomplete class hierarchy.
    pub fn degraded_joins(&self) -> u32 {
        self.degraded_joins
    }
}
