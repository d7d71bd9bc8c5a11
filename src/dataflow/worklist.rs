use crate::dataflow::record::RecordTable;
use crate::frame::Frame;

/// Pending evaluation: a frame snapshot and the offset to start from.
#[derive(Clone, Debug)]
pub(crate) struct InstructionBlock {
    pub(crate) frame: Frame,
    pub(crate) start: u32,
}

/// Progress of the exception handler fixed point of one context.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) enum HandlerPhase {
    /// Still draining ordinary blocks.
    #[default]
    Blocks,
    /// Walking the handler list; `pending` is the handler in flight and its evaluation count.
    Handlers {
        next: usize,
        changed: bool,
        pending: Option<(usize, u32)>,
    },
    Done,
}

/// One level of evaluation: the method body, or one invocation of a subroutine.
#[derive(Debug)]
pub(crate) struct EvaluationContext {
    pub(crate) records: RecordTable,
    pub(crate) blocks: Vec<InstructionBlock>,
    /// Offsets covered by this context, `[start, end)`.
    pub(crate) start: u32,
    pub(crate) end: u32,
    /// Context that receives the blocks of `ret` instructions.
    pub(crate) resume_to: Option<usize>,
    pub(crate) phase: HandlerPhase,
    pub(crate) used_handlers: Vec<usize>,
}

impl EvaluationContext {
    pub(crate) fn root(code_length: u32, entry: Frame) -> Self {
        Self {
            records: RecordTable::new(code_length as usize),
            blocks: vec![InstructionBlock {
                frame: entry,
                start: 0,
            }],
            start: 0,
            end: code_length,
            resume_to: None,
            phase: HandlerPhase::Blocks,
            used_handlers: Vec::new(),
        }
    }

    pub(crate) fn subroutine(
        code_length: u32,
        entry: Frame,
        start: u32,
        end: u32,
        resume_to: usize,
    ) -> Self {
        Self {
            records: RecordTable::new(code_length as usize),
            blocks: vec![InstructionBlock { frame: entry, start }],
            start,
            end,
            resume_to: Some(resume_to),
            phase: HandlerPhase::Blocks,
            used_handlers: Vec::new(),
        }
    }

    pub(crate) fn push_block(&mut self, frame: Frame, start: u32) {
        self.blocks.push(InstructionBlock { frame, start });
    }

    pub(crate) fn pop_block(&mut self) -> Option<InstructionBlock> {
        self.blocks.pop()
    }
}

/// Explicit stack of evaluation contexts; the root context is at index 0.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    contexts: Vec<EvaluationContext>,
}

impl ContextStack {
    pub(crate) fn new(root: EvaluationContext) -> Self {
        Self {
            contexts: vec![root],
        }
    }

    pub(crate) fn top_index(&self) -> usize {
        self.contexts.len().saturating_sub(1)
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut EvaluationContext> {
        self.contexts.last_mut()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut EvaluationContext> {
        self.contexts.get_mut(index)
    }

    pub(crate) fn push(&mut self, context: EvaluationContext) {
        self.contexts.push(context);
    }

    pub(crate) fn pop(&mut self) -> Option<EvaluationContext> {
        self.contexts.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_taken_last_in_first_out() {
        let mut context = EvaluationContext::root(10, Frame::new(0));
        context.push_block(Frame::new(0), 4);
        context.push_block(Frame::new(0), 7);

        assert_eq!(context.pop_block().map(|block| block.start), Some(7));
        assert_eq!(context.pop_block().map(|block| block.start), Some(4));
        assert_eq!(context.pop_block().map(|block| block.start), Some(0));
        assert!(context.pop_block().is_none());
    }

    #[test]
    fn subroutine_contexts_resume_into_their_caller() {
        let mut stack = ContextStack::new(EvaluationContext::root(12, Frame::new(0)));
        let child = EvaluationContext::subroutine(12, Frame::new(0), 6, 9, stack.top_index());
        stack.push(child);

        assert_eq!(stack.top_index(), 1);
        let top = stack.top_mut().expect("top");
        assert_eq!(top.resume_to, Some(0));
        assert_eq!((top.start, top.end), (6, 9));
        assert_eq!(stack.pop().map(|context| context.start), Some(6));
        assert_eq!(stack.top_index(), 0);
    }
}
