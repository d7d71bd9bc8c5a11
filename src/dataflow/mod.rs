//! Fixed-point partial evaluation of method bodies.

pub mod branch;
pub mod evaluator;
pub mod facts;
pub mod instruction;
pub mod opcode_semantics;
pub mod record;
mod worklist;

pub use branch::BranchUnit;
pub use evaluator::{
    DEFAULT_GENERALIZE_THRESHOLD, EvaluatorConfig, EvaluatorState, PartialEvaluator,
};
pub use facts::{BranchTargetFinder, ControlFlowFacts};
pub use instruction::{BytecodeDecoder, Instruction, InstructionDecoder, Operand};
pub use opcode_semantics::{InstructionContext, InstructionInterpreter, OpcodeInterpreter};
pub use record::{InstructionRecord, MethodAnalysis, RecordTable};
