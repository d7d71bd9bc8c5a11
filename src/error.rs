use thiserror::Error;

/// Failure conditions raised by the lattice, the frames and the evaluator.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum EvalError {
    #[error("method {method} has no code to evaluate")]
    EmptyCode { method: String },
    #[error("evaluation of {method} exceeded {limit} evaluations at offset {offset}")]
    ComplexityExceeded {
        method: String,
        offset: u32,
        limit: u32,
    },
    #[error("incomplete class hierarchy: superclass {missing} of {class} cannot be resolved")]
    IncompleteClassHierarchy { class: String, missing: String },
    #[error("value type mismatch: {0}")]
    ValueTypeMismatch(String),
    #[error("stack size mismatch: {left} != {right}")]
    StackSizeMismatch { left: usize, right: usize },
    #[error("array index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: i32, length: i32 },
    #[error("arithmetic fault: {0}")]
    ArithmeticFault(&'static str),
    #[error("invalid instruction at offset {offset}: {reason}")]
    InvalidInstruction { offset: u32, reason: String },
    #[error("unsupported opcode 0x{opcode:02x} at offset {offset}")]
    UnsupportedOpcode { offset: u32, opcode: u8 },
    #[error("stack underflow at depth {0}")]
    StackUnderflow(usize),
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(String),
}

impl EvalError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        EvalError::ValueTypeMismatch(message.into())
    }

    /// Whether the condition stems from data the caller may skip, rather than a broken collaborator.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EvalError::ComplexityExceeded { .. } | EvalError::IncompleteClassHierarchy { .. }
        )
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;
