use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::classpath::ClassPool;
use crate::dataflow::branch::BranchUnit;
use crate::dataflow::facts::{BranchTargetFinder, ControlFlowFacts};
use crate::dataflow::instruction::{BytecodeDecoder, InstructionDecoder, Operand};
use crate::dataflow::opcode_semantics::{InstructionContext, InstructionInterpreter, OpcodeInterpreter};
use crate::dataflow::record::{MethodAnalysis, RecordTable};
use crate::dataflow::worklist::{ContextStack, EvaluationContext, HandlerPhase, InstructionBlock};
use crate::error::EvalError;
use crate::frame::{Frame, TracedVariables};
use crate::invocation::InvocationUnit;
use crate::ir::{ExceptionHandler, Method};
use crate::telemetry::evaluation_debug_enabled;
use crate::value::{InstructionOffsets, JoinContext, Value};

/// Default number of evaluations of one offset before its context is widened.
pub const DEFAULT_GENERALIZE_THRESHOLD: u32 = 5;

/// Tunables of one evaluator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvaluatorConfig {
    pub generalize_threshold: u32,
    /// Abort with `ComplexityExceeded` once an offset was evaluated this often.
    pub max_evaluations: Option<u32>,
    /// Follow both sides of decided branches and feed handlers the final after-frame too.
    pub full_code: bool,
    pub lenient_hierarchy: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            generalize_threshold: DEFAULT_GENERALIZE_THRESHOLD,
            max_evaluations: None,
            full_code: false,
            lenient_hierarchy: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvaluatorState {
    Idle,
    Evaluating,
    Subroutine,
    HandlerFixpoint,
    Done,
    Aborted,
}

/// How a block ended.
enum BlockOutcome {
    Finished,
    Subroutine { frame: Frame, start: u32, end: u32 },
    Return {
        origin: u32,
        frame: Frame,
        targets: InstructionOffsets,
    },
}

/// Fixed-point abstract interpreter for one method body at a time.
pub struct PartialEvaluator {
    classes: Arc<ClassPool>,
    invocation: Arc<dyn InvocationUnit>,
    decoder: Arc<dyn InstructionDecoder>,
    interpreter: Arc<dyn InstructionInterpreter>,
    config: EvaluatorConfig,
    state: EvaluatorState,
    analysis: Option<MethodAnalysis>,
}

impl PartialEvaluator {
    pub fn new(classes: Arc<ClassPool>, invocation: Arc<dyn InvocationUnit>) -> Self {
        Self {
            classes,
            invocation,
            decoder: Arc::new(BytecodeDecoder),
            interpreter: Arc::new(OpcodeInterpreter),
            config: EvaluatorConfig::default(),
            state: EvaluatorState::Idle,
            analysis: None,
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn InstructionDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn InstructionInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn state(&self) -> EvaluatorState {
        self.state
    }

    /// Result of the last run, present only when it completed.
    pub fn analysis(&self) -> Option<&MethodAnalysis> {
        match self.state {
            EvaluatorState::Done => self.analysis.as_ref(),
            _ => None,
        }
    }

    /// Evaluate `method` from the entry frame built by the invocation unit.
    pub fn evaluate(&mut self, method: &Method) -> Result<&MethodAnalysis> {
        self.reject_empty(method)?;
        let entry = self
            .invocation
            .enter_method(method)
            .with_context(|| format!("building entry frame of {}", method.display_name()))?;
        self.evaluate_from(method, entry)
    }

    /// Evaluate `method` from caller-supplied entry variables.
    pub fn evaluate_from(&mut self, method: &Method, entry: TracedVariables) -> Result<&MethodAnalysis> {
        self.reject_empty(method)?;
        let facts = BranchTargetFinder::analyze(method, self.decoder.as_ref())
            .with_context(|| format!("scanning control flow of {}", method.display_name()))?;
        self.evaluate_with_facts(method, entry, &facts)
    }

    pub fn evaluate_with_facts(
        &mut self,
        method: &Method,
        entry: TracedVariables,
        facts: &dyn ControlFlowFacts,
    ) -> Result<&MethodAnalysis> {
        self.reject_empty(method)?;
        self.analysis = None;
        self.state = EvaluatorState::Evaluating;
        let join = JoinContext::new(Arc::clone(&self.classes))
            .with_lenient_hierarchy(self.config.lenient_hierarchy);
        match self.run(method, entry, facts, &join) {
            Ok(analysis) => {
                self.state = EvaluatorState::Done;
                debug!(
                    method = %method.display_name(),
                    traced = analysis.traced_offsets().count(),
                    degraded_joins = analysis.degraded_joins(),
                    "evaluation finished"
                );
                Ok(self.analysis.insert(analysis))
            }
            Err(err) => {
                self.state = EvaluatorState::Aborted;
                Err(err)
            }
        }
    }

    fn reject_empty(&mut self, method: &Method) -> Result<()> {
        if method.code.is_empty() {
            self.state = EvaluatorState::Aborted;
            self.analysis = None;
            return Err(EvalError::EmptyCode {
                method: method.display_name(),
            }
            .into());
        }
        Ok(())
    }

    fn run(
        &mut self,
        method: &Method,
        entry: TracedVariables,
        facts: &dyn ControlFlowFacts,
        join: &JoinContext,
    ) -> Result<MethodAnalysis> {
        let code_length = method.code_length();
        let mut stack = ContextStack::new(EvaluationContext::root(
            code_length,
            Frame::with_variables(entry),
        ));
        let mut subroutine_ends = Vec::new();
        loop {
            let index = stack.top_index();
            let Some(mut context) = stack.pop() else {
                return Err(anyhow!("evaluation context stack of {} is empty", method.display_name()));
            };

            if let Some(block) = context.pop_block() {
                if context.phase == HandlerPhase::Blocks {
                    self.state = if index > 0 {
                        EvaluatorState::Subroutine
                    } else {
                        EvaluatorState::Evaluating
                    };
                }
                let resume_to = context.resume_to.unwrap_or(index);
                let outcome = self.evaluate_block(method, facts, join, &mut context, block)?;
                stack.push(context);
                match outcome {
                    BlockOutcome::Finished => {}
                    BlockOutcome::Subroutine { frame, start, end } => {
                        if !subroutine_ends.contains(&(start, end)) {
                            subroutine_ends.push((start, end));
                        }
                        stack.push(EvaluationContext::subroutine(
                            code_length,
                            frame,
                            start,
                            end,
                            index,
                        ));
                    }
                    BlockOutcome::Return {
                        origin,
                        frame,
                        targets,
                    } => {
                        let caller = stack
                            .get_mut(resume_to)
                            .ok_or_else(|| anyhow!("no caller context for ret at offset {origin}"))?;
                        for target in targets.iter() {
                            caller.records.entry(target).branch_origins.insert(origin);
                            caller.push_block(frame.clone(), target);
                        }
                    }
                }
                continue;
            }

            if self.schedule_handler(method, join, &mut context)? {
                self.state = EvaluatorState::HandlerFixpoint;
                stack.push(context);
                continue;
            }

            match stack.top_mut() {
                Some(caller) => {
                    caller
                        .records
                        .merge_from(&context.records, context.start, context.end, join)
                        .with_context(|| {
                            format!(
                                "merging subroutine at offset {} into {}",
                                context.start,
                                method.display_name()
                            )
                        })?;
                    caller.used_handlers.extend(context.used_handlers);
                }
                None => {
                    return Ok(MethodAnalysis {
                        records: context.records,
                        handlers: method.exception_handlers.clone(),
                        used_handlers: context.used_handlers.into_iter().collect::<BTreeSet<_>>(),
                        subroutine_ends,
                        degraded_joins: join.degraded_joins(),
                    });
                }
            }
        }
    }

    /// Evaluate straight-line code from the block start until the path ends or forks.
    fn evaluate_block(
        &self,
        method: &Method,
        facts: &dyn ControlFlowFacts,
        join: &JoinContext,
        context: &mut EvaluationContext,
        block: InstructionBlock,
    ) -> Result<BlockOutcome> {
        let InstructionBlock { mut frame, start } = block;
        let mut offset = start;
        let debug_enabled = evaluation_debug_enabled();
        loop {
            let at = || format!("evaluating {} at offset {offset}", method.display_name());
            let instruction = self.decoder.decode(method, offset).with_context(at)?;

            let record = context.records.entry(offset);
            match record.before.as_mut() {
                None => {
                    record.before = Some(frame.clone());
                    record.generalized = true;
                }
                Some(before) => {
                    let widening = record.evaluation_count >= self.config.generalize_threshold;
                    join.set_widening(widening);
                    let changed = before.generalize(&frame, join);
                    join.set_widening(false);
                    let changed = changed.with_context(at)?;
                    if !changed && record.generalized {
                        break;
                    }
                    if let Some(limit) = self.config.max_evaluations {
                        if record.evaluation_count >= limit {
                            return Err(EvalError::ComplexityExceeded {
                                method: method.display_name(),
                                offset,
                                limit,
                            }
                            .into());
                        }
                    }
                    if widening {
                        frame = before.clone();
                    }
                    record.generalized = widening;
                }
            }
            record.evaluation_count += 1;
            if debug_enabled {
                debug!(
                    method = %method.display_name(),
                    offset,
                    opcode = instruction.opcode,
                    count = record.evaluation_count,
                    stack = frame.stack.size(),
                    "evaluating instruction"
                );
            }

            frame.set_producer(InstructionOffsets::single(offset));
            let mut branch = BranchUnit::new(self.config.full_code);
            let cx = InstructionContext {
                method,
                invocation: self.invocation.as_ref(),
                join,
            };
            self.interpreter
                .apply(&instruction, &mut frame, &cx, &mut branch)
                .with_context(at)?;

            let record = context.records.entry(offset);
            record.after = Some(frame.clone());

            if instruction.is_subroutine_invocation() {
                let Operand::Branch(target) = instruction.operand else {
                    return Err(anyhow!("jsr without target at offset {offset}"));
                };
                let end = facts
                    .subroutine_end(target)
                    .ok_or_else(|| anyhow!("no subroutine starts at offset {target}"))
                    .with_context(at)?;
                record.subroutine_invocation = true;
                record.branch_targets.insert(target);
                let start_record = context.records.entry(target);
                start_record.subroutine_start = true;
                start_record.branch_origins.insert(offset);
                return Ok(BlockOutcome::Subroutine {
                    frame,
                    start: target,
                    end,
                });
            }

            if instruction.is_subroutine_return() {
                record.subroutine_return = true;
                let targets = branch.targets().clone();
                record.branch_targets.merge(&targets);
                return Ok(BlockOutcome::Return {
                    origin: offset,
                    frame,
                    targets,
                });
            }

            if !branch.was_called() {
                offset = instruction.next_offset();
                if offset >= method.code_length() {
                    return Err(EvalError::InvalidInstruction {
                        offset: instruction.offset,
                        reason: "execution falls off the end of the code".to_string(),
                    }
                    .into());
                }
                continue;
            }

            let targets = branch.targets().clone();
            record.branch_targets.merge(&targets);
            for target in targets.iter() {
                context.records.entry(target).branch_origins.insert(offset);
            }
            match (targets.len(), targets.first()) {
                (1, Some(target)) => offset = target,
                (0, _) => break,
                _ => {
                    for target in targets.iter() {
                        context.push_block(frame.clone(), target);
                    }
                    break;
                }
            }
        }
        Ok(BlockOutcome::Finished)
    }

    /// Queue the next handler of the context's fixed point, returning whether one was queued.
    fn schedule_handler(
        &self,
        method: &Method,
        join: &JoinContext,
        context: &mut EvaluationContext,
    ) -> Result<bool> {
        let handlers = &method.exception_handlers;
        let EvaluationContext {
            records,
            blocks,
            start,
            end,
            phase,
            used_handlers,
            ..
        } = context;
        loop {
            match phase {
                HandlerPhase::Done => return Ok(false),
                HandlerPhase::Blocks => {
                    *phase = HandlerPhase::Handlers {
                        next: 0,
                        changed: false,
                        pending: None,
                    };
                }
                HandlerPhase::Handlers {
                    next,
                    changed,
                    pending,
                } => {
                    if let Some((index, count)) = pending.take() {
                        let handler_pc = handlers[index].handler_pc;
                        let after = records.get(handler_pc).map_or(0, |record| record.evaluation_count);
                        *changed |= after > count;
                    }
                    while *next < handlers.len() {
                        let index = *next;
                        *next += 1;
                        let handler = &handlers[index];
                        if !handler.overlaps(*start, *end) || !(*start..*end).contains(&handler.handler_pc) {
                            continue;
                        }
                        let protected_start = handler.start_pc.max(*start);
                        let protected_end = handler.end_pc.min(*end);
                        let Some(variables) = self
                            .handler_variables(records, protected_start, protected_end, join)
                            .with_context(|| {
                                format!(
                                    "joining frames for handler at offset {} of {}",
                                    handler.handler_pc,
                                    method.display_name()
                                )
                            })?
                        else {
                            continue;
                        };
                        let frame = self.handler_frame(variables, handler);
                        let record = records.entry(handler.handler_pc);
                        record.exception_handler = true;
                        *pending = Some((index, record.evaluation_count));
                        if !used_handlers.contains(&index) {
                            used_handlers.push(index);
                        }
                        blocks.push(InstructionBlock {
                            frame,
                            start: handler.handler_pc,
                        });
                        return Ok(true);
                    }
                    if *changed {
                        *next = 0;
                        *changed = false;
                    } else {
                        *phase = HandlerPhase::Done;
                    }
                }
            }
        }
    }

    /// Join of the variables before every traced instruction in `[start, end)`.
    fn handler_variables(
        &self,
        records: &RecordTable,
        start: u32,
        end: u32,
        join: &JoinContext,
    ) -> Result<Option<TracedVariables>, EvalError> {
        let mut joined: Option<TracedVariables> = None;
        let mut last_after = None;
        for offset in start..end {
            let Some(record) = records.get(offset).filter(|record| record.evaluation_count > 0) else {
                continue;
            };
            if let Some(before) = &record.before {
                match &mut joined {
                    Some(variables) => {
                        variables.generalize(&before.variables, join)?;
                    }
                    None => joined = Some(before.variables.clone()),
                }
            }
            if let Some(after) = &record.after {
                last_after = Some(after);
            }
        }
        if self.config.full_code {
            if let (Some(variables), Some(after)) = (&mut joined, last_after) {
                variables.generalize(&after.variables, join)?;
            }
        }
        Ok(joined)
    }

    fn handler_frame(&self, variables: TracedVariables, handler: &ExceptionHandler) -> Frame {
        let mut frame = Frame::with_variables(variables);
        frame.set_producer(InstructionOffsets::new());
        let thrown = self.invocation.exception_value(handler.catch_type.as_deref());
        frame.stack.push(Value::Reference(thrown));
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{BasicInvocationUnit, ExecutingInvocationUnit, ModelRegistry};
    use crate::ir::{Constant, MemberRef};
    use crate::test_harness::MethodBuilder;
    use crate::value::{
        Concrete, IdentifiedValueFactory, IntegerValue, ParticularValueFactory, Tristate,
        ValueFactory,
    };

    fn evaluator(factory: Arc<dyn ValueFactory>) -> PartialEvaluator {
        let classes = Arc::new(ClassPool::platform());
        let unit = BasicInvocationUnit::new(factory, Arc::clone(&classes));
        PartialEvaluator::new(classes, Arc::new(unit))
    }

    fn ranged() -> PartialEvaluator {
        evaluator(Arc::new(ParticularValueFactory::with_ranges()))
    }

    #[test]
    fn conditional_merge_loses_the_constant() {
        // static int f(int x) { return x > 0 ? 1 : -1; }
        let method = MethodBuilder::new("(I)I")
            .max_locals(1)
            .max_stack(1)
            .code(vec![0x1a, 0x9e, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x02, 0xac])
            .build();
        let mut evaluator = ranged();

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        assert!(analysis.is_traced(4));
        assert!(analysis.is_traced(8));
        let merged = analysis.stack_before(9).expect("stack").peek(0).expect("value");
        assert_eq!(merged, &Value::Int(IntegerValue::Unknown));
        assert!(analysis.is_branch_target(9));
        assert_eq!(
            analysis.branch_origins(9),
            Some(&InstructionOffsets::single(5))
        );
        assert!(analysis.is_branch_origin(1));
    }

    #[test]
    fn loop_counter_generalizes_within_threshold() {
        // static void loop(int n) { for (int i = 0; i < n; i++) {} }
        let method = MethodBuilder::new("(I)V")
            .max_locals(2)
            .max_stack(2)
            .code(vec![
                0x03, 0x3c, 0x1b, 0x1a, 0xa2, 0x00, 0x09, 0x84, 0x01, 0x01, 0xa7, 0xff, 0xf8,
                0xb1,
            ])
            .build();
        let mut evaluator = ranged();

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        let counter = analysis.variables_before(2).and_then(|v| v.get(1)).expect("i");
        assert_eq!(counter, &Value::Int(IntegerValue::Unknown));
        assert!(analysis.evaluation_count(2) <= DEFAULT_GENERALIZE_THRESHOLD + 1);
        assert!(analysis.is_traced(13));
        assert_eq!(evaluator.state(), EvaluatorState::Done);
    }

    #[test]
    fn infinite_loop_terminates() {
        // 0: iinc 0 1; 3: goto 0
        let method = MethodBuilder::new("(I)V")
            .max_locals(1)
            .code(vec![0x84, 0x00, 0x01, 0xa7, 0xff, 0xfd])
            .build();
        let mut evaluator = ranged();

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        assert!(analysis.evaluation_count(0) <= DEFAULT_GENERALIZE_THRESHOLD + 1);
        let stable = analysis.variables_before(0).and_then(|v| v.get(0)).expect("x");
        assert_eq!(stable, &Value::Int(IntegerValue::Unknown));
    }

    #[test]
    fn constructor_update_is_visible_through_every_alias() {
        let mut constants = crate::ir::ConstantTable::default();
        let class = constants.push(Constant::Class("java/lang/StringBuilder".to_string()));
        let text = constants.push(Constant::String("ab".to_string()));
        let init = constants.push(Constant::Method(MemberRef::new(
            "java/lang/StringBuilder",
            "<init>",
            "(Ljava/lang/String;)V",
        )));
        let to_string = constants.push(Constant::Method(MemberRef::new(
            "java/lang/StringBuilder",
            "toString",
            "()Ljava/lang/String;",
        )));
        let method = MethodBuilder::new("()Ljava/lang/String;")
            .max_locals(1)
            .max_stack(3)
            .constants(constants)
            .code(vec![
                0xbb, 0x00, class as u8, // new
                0x59, // dup
                0x12, text as u8, // ldc
                0xb7, 0x00, init as u8, // invokespecial
                0x4b, // astore_0
                0x2a, // aload_0
                0xb6, 0x00, to_string as u8, // invokevirtual
                0xb0, // areturn
            ])
            .build();
        let classes = Arc::new(ClassPool::platform());
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = ExecutingInvocationUnit::new(
            BasicInvocationUnit::new(factory, Arc::clone(&classes)),
            Arc::new(ModelRegistry::registered()),
        );
        let mut evaluator = PartialEvaluator::new(classes, Arc::new(unit));

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        let receiver = analysis.stack_after(6).expect("stack").peek(0).expect("receiver");
        let receiver = receiver.as_reference().expect("reference");
        assert_eq!(receiver.content().map(Concrete::text), Some("ab"));
        let stored = analysis.variables_before(10).and_then(|v| v.get(0)).expect("variable");
        assert_eq!(stored.reference_id(), receiver.id());
        let result = analysis.stack_before(14).expect("stack").peek(0).expect("result");
        assert_eq!(
            result.as_reference().and_then(|r| r.content()).map(Concrete::text),
            Some("ab")
        );
    }

    #[test]
    fn handler_of_unreachable_range_stays_unused() {
        // 0: goto 4; 3: nop (protected); 4: return; 5: astore_0; 6: return
        let method = MethodBuilder::new("()V")
            .max_locals(1)
            .max_stack(1)
            .code(vec![0xa7, 0x00, 0x04, 0x00, 0xb1, 0x4b, 0xb1])
            .handler(3, 4, 5, Some("java/lang/Exception"))
            .build();
        let mut evaluator = ranged();

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        assert!(!analysis.is_traced(3));
        assert!(!analysis.is_traced(5));
        assert!(!analysis.is_traced_range(3, 4));
        assert!(!analysis.is_traced_range(5, 7));
        assert!(analysis.is_traced_range(0, 5));
        assert!(!analysis.is_handler_used(0));
        let unused = analysis.unused_handlers();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].handler_pc, 5);
        assert!(!analysis.is_exception_handler(5));
    }

    /// 0: iconst_0; 1: istore_0; 2: iinc 0 1 (protected); 5: goto 9; 8: astore_1; 9: return
    fn guarded_increment() -> Method {
        MethodBuilder::new("()V")
            .max_locals(2)
            .max_stack(1)
            .code(vec![0x03, 0x3b, 0x84, 0x00, 0x01, 0xa7, 0x00, 0x04, 0x4c, 0xb1])
            .handler(2, 5, 8, None)
            .build()
    }

    #[test]
    fn loop_free_handler_is_evaluated_once() {
        let method = guarded_increment();
        let mut evaluator = ranged().with_config(EvaluatorConfig {
            max_evaluations: Some(3),
            ..EvaluatorConfig::default()
        });

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        assert!(analysis.is_handler_used(0));
        assert_eq!(analysis.evaluation_count(8), 1);
        assert_eq!(analysis.evaluation_count(2), 1);
        assert_eq!(analysis.evaluation_count(9), 2);
    }

    #[test]
    fn full_code_feeds_the_last_after_frame_to_handlers() {
        let method = guarded_increment();
        let mut partial = ranged();
        let mut full = ranged().with_config(EvaluatorConfig {
            full_code: true,
            ..EvaluatorConfig::default()
        });

        let counter = |analysis: &MethodAnalysis| {
            analysis
                .variables_before(8)
                .and_then(|variables| variables.get(0))
                .cloned()
                .expect("counter")
        };
        let partial_counter = counter(partial.evaluate(&method).expect("partial"));
        let full_counter = counter(full.evaluate(&method).expect("full"));

        assert_eq!(partial_counter, Value::Int(IntegerValue::Particular(0)));
        assert!(!full_counter.is_particular());
    }

    #[test]
    fn handler_receives_thrown_value() {
        // 0: iconst_1; 1: istore_0; 2: return; 3: astore_1; 4: return
        let method = MethodBuilder::new("()V")
            .max_locals(2)
            .max_stack(1)
            .code(vec![0x04, 0x3b, 0xb1, 0x4c, 0xb1])
            .handler(0, 3, 3, None)
            .build();
        let mut evaluator = ranged();

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        assert!(analysis.is_handler_used(0));
        assert!(analysis.is_exception_handler(3));
        let thrown = analysis.stack_before(3).expect("stack").peek(0).expect("thrown");
        let thrown = thrown.as_reference().expect("reference");
        assert_eq!(thrown.type_name(), Some("Ljava/lang/Throwable;"));
        assert_eq!(thrown.is_null(), Tristate::Never);
        assert!(analysis.unused_handlers().is_empty());
    }

    #[test]
    fn subroutine_returns_to_caller() {
        // 0: jsr 6; 3: goto 10; 6: astore_1; 7: ret 1; 9: nop; 10: return
        let method = MethodBuilder::new("()V")
            .max_locals(2)
            .max_stack(1)
            .code(vec![
                0xa8, 0x00, 0x06, 0xa7, 0x00, 0x07, 0x4c, 0xa9, 0x01, 0x00, 0xb1,
            ])
            .build();
        let mut evaluator = ranged();

        let analysis = evaluator.evaluate(&method).expect("evaluate");

        assert!(analysis.is_subroutine_invocation(0));
        assert!(analysis.is_subroutine_start(6));
        assert!(analysis.is_subroutine_return(7));
        assert_eq!(analysis.subroutine_end(6), Some(9));
        assert!(analysis.is_traced(3));
        assert!(analysis.is_traced(10));
        assert!(!analysis.is_traced(9));
        assert_eq!(
            analysis.branch_targets(7),
            Some(&InstructionOffsets::single(3))
        );
    }

    #[test]
    fn evaluation_cap_aborts_with_complexity_error() {
        // 0: iconst_0; 1: istore_0; 2: iinc 0 1; 5: goto 2
        let method = MethodBuilder::new("()V")
            .max_locals(1)
            .code(vec![0x03, 0x3b, 0x84, 0x00, 0x01, 0xa7, 0xff, 0xfd])
            .build();
        let mut evaluator = ranged().with_config(EvaluatorConfig {
            max_evaluations: Some(2),
            ..EvaluatorConfig::default()
        });

        let err = evaluator.evaluate(&method).expect_err("complexity");

        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::ComplexityExceeded { limit: 2, .. })
        ));
        assert_eq!(evaluator.state(), EvaluatorState::Aborted);
        assert!(evaluator.analysis().is_none());
    }

    #[test]
    fn empty_code_is_rejected() {
        let method = MethodBuilder::new("()V").code(Vec::new()).build();
        let mut evaluator = ranged();

        let err = evaluator.evaluate(&method).expect_err("empty");

        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::EmptyCode { .. })
        ));
    }

    #[test]
    fn interpreter_failures_carry_the_offset() {
        // 0: iload_0 on an empty slot
        let method = MethodBuilder::new("()I")
            .max_locals(1)
            .code(vec![0x1a, 0xac])
            .build();
        let mut evaluator = ranged();

        let err = evaluator.evaluate(&method).expect_err("mismatch");

        assert!(format!("{err:#}").contains("at offset 0"));
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::ValueTypeMismatch(_))
        ));
    }

    #[test]
    fn evaluator_is_reusable() {
        let first = MethodBuilder::new("()V").code(vec![0x00, 0x00, 0xb1]).build();
        let second = MethodBuilder::new("()V").code(vec![0xb1]).build();
        let mut evaluator = ranged();

        evaluator.evaluate(&first).expect("first");
        let analysis = evaluator.evaluate(&second).expect("second");

        assert_eq!(analysis.traced_offsets().collect::<Vec<_>>(), vec![0]);
    }
}
