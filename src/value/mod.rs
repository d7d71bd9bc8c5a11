//! Abstract values tracked on the stack and in local variables.

pub mod factory;
pub mod integer;
pub mod offsets;
pub mod reference;
pub mod scalar;

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::classpath::ClassPool;
use crate::error::{EvalError, EvalResult};

pub use factory::{
    BasicValueFactory, IdentifiedValueFactory, MultiTypedValueFactory, ParticularValueFactory,
    ValueFactory,
};
pub use integer::IntegerValue;
pub use offsets::InstructionOffsets;
pub use reference::{ArrayElements, Concrete, ReferenceValue, TypedReference};
pub use scalar::{DoubleValue, FloatValue, LongValue};

/// Identity of a value created by an identifying factory.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ValueId(pub u64);

/// Three-valued answer of a comparison or type test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tristate {
    Always,
    Never,
    Maybe,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value { Tristate::Always } else { Tristate::Never }
    }

    pub fn not(self) -> Self {
        match self {
            Tristate::Always => Tristate::Never,
            Tristate::Never => Tristate::Always,
            Tristate::Maybe => Tristate::Maybe,
        }
    }
}

/// Category of a value as seen by the instruction set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComputationalType {
    Int,
    Long,
    Float,
    Double,
    Reference,
    ReturnAddress,
    Top,
}

/// Abstract value of one stack entry or local variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(IntegerValue),
    Long(LongValue),
    Float(FloatValue),
    Double(DoubleValue),
    Reference(ReferenceValue),
    ReturnAddress(InstructionOffsets),
    /// Second half of a category 2 value, or a slot no instruction may use.
    Top,
}

impl Value {
    pub fn computational_type(&self) -> ComputationalType {
        match self {
            Value::Int(_) => ComputationalType::Int,
            Value::Long(_) => ComputationalType::Long,
            Value::Float(_) => ComputationalType::Float,
            Value::Double(_) => ComputationalType::Double,
            Value::Reference(_) => ComputationalType::Reference,
            Value::ReturnAddress(_) => ComputationalType::ReturnAddress,
            Value::Top => ComputationalType::Top,
        }
    }

    pub fn is_category2(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// Whether the value is known exactly.
    pub fn is_particular(&self) -> bool {
        match self {
            Value::Int(value) => value.is_particular(),
            Value::Long(value) => value.is_particular(),
            Value::Float(value) => value.is_particular(),
            Value::Double(value) => value.is_particular(),
            Value::Reference(value) => value.is_particular(),
            Value::ReturnAddress(_) | Value::Top => false,
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceValue> {
        match self {
            Value::Reference(value) => Some(value),
            _ => None,
        }
    }

    pub fn reference_id(&self) -> Option<ValueId> {
        self.as_reference().and_then(ReferenceValue::id)
    }

    /// Least upper bound that is at most as precise as either input.
    pub fn generalize(&self, other: &Value, cx: &JoinContext) -> EvalResult<Value> {
        if self == other {
            return Ok(self.clone());
        }
        let joined = match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if cx.is_widening() {
                    Value::Int(a.widen(*b))
                } else {
                    Value::Int(a.generalize(*b))
                }
            }
            (Value::Long(a), Value::Long(b)) => Value::Long(a.generalize(*b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a.generalize(*b)),
            (Value::Double(a), Value::Double(b)) => Value::Double(a.generalize(*b)),
            (Value::Reference(a), Value::Reference(b)) => Value::Reference(a.generalize(b, cx)?),
            (Value::ReturnAddress(a), Value::ReturnAddress(b)) => Value::ReturnAddress(a.union(b)),
            (Value::Top, Value::Top) => Value::Top,
            (left, right) => {
                return Err(EvalError::mismatch(format!(
                    "cannot generalize {left} with {right}"
                )));
            }
        };
        Ok(joined)
    }

    /// The value with references of identity `id` replaced by `replacement`.
    pub fn replace_reference(&self, id: ValueId, replacement: &ReferenceValue) -> Option<Value> {
        match self {
            Value::Reference(reference) if reference.id() == Some(id) => Some(Value::Reference(
                reference.replaced_by(replacement.clone()),
            )),
            _ => None,
        }
    }

    pub fn expect_int(self) -> EvalResult<IntegerValue> {
        match self {
            Value::Int(value) => Ok(value),
            other => Err(EvalError::mismatch(format!("expected int, found {other}"))),
        }
    }

    pub fn expect_long(self) -> EvalResult<LongValue> {
        match self {
            Value::Long(value) => Ok(value),
            other => Err(EvalError::mismatch(format!("expected long, found {other}"))),
        }
    }

    pub fn expect_float(self) -> EvalResult<FloatValue> {
        match self {
            Value::Float(value) => Ok(value),
            other => Err(EvalError::mismatch(format!("expected float, found {other}"))),
        }
    }

    pub fn expect_double(self) -> EvalResult<DoubleValue> {
        match self {
            Value::Double(value) => Ok(value),
            other => Err(EvalError::mismatch(format!("expected double, found {other}"))),
        }
    }

    pub fn expect_reference(self) -> EvalResult<ReferenceValue> {
        match self {
            Value::Reference(value) => Ok(value),
            other => Err(EvalError::mismatch(format!("expected reference, found {other}"))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Long(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value}"),
            Value::Reference(value) => write!(f, "{value}"),
            Value::ReturnAddress(offsets) => write!(f, "ret{offsets}"),
            Value::Top => write!(f, "T"),
        }
    }
}

/// Settings shared by every join performed during one evaluation.
#[derive(Debug)]
pub struct JoinContext {
    classes: Arc<ClassPool>,
    lenient_hierarchy: bool,
    widening: Cell<bool>,
    degraded: Cell<u32>,
}

impl JoinContext {
    pub fn new(classes: Arc<ClassPool>) -> Self {
        Self {
            classes,
            lenient_hierarchy: false,
            widening: Cell::new(false),
            degraded: Cell::new(0),
        }
    }

    /// Degrade joins over an incomplete hierarchy instead of failing them.
    pub fn with_lenient_hierarchy(mut self, lenient: bool) -> Self {
        self.lenient_hierarchy = lenient;
        self
    }

    pub fn classes(&self) -> &ClassPool {
        &self.classes
    }

    pub fn is_widening(&self) -> bool {
        self.widening.get()
    }

    pub fn set_widening(&self, widening: bool) {
        self.widening.set(widening);
    }

    /// Number of reference joins degraded because of missing classes.
    pub fn degraded_joins(&self) -> u32 {
        self.degraded.get()
    }

    /// Swallow an incomplete hierarchy failure in lenient mode, propagate anything else.
    pub(crate) fn recover(&self, err: EvalError) -> EvalResult<()> {
        match err {
            EvalError::IncompleteClassHierarchy { ref class, ref missing }
                if self.lenient_hierarchy =>
            {
                warn!(class = %class, missing = %missing, "degrading join over incomplete class hierarchy");
                self.degraded.set(self.degraded.get() + 1);
                Ok(())
            }
            other => Err(other),
        }
    }
}
