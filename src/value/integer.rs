use std::fmt;

use crate::error::{EvalError, EvalResult};
use crate::value::scalar::{DoubleValue, FloatValue, LongValue};
use crate::value::{Tristate, ValueId};

/// Abstract `int` value.
///
/// Particulars only generalize to `Unknown` when they disagree, ranges only grow into other
/// ranges. Mixing a particular with a range yields `Unknown`, which keeps the join associative.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IntegerValue {
    Unknown,
    Range { min: i32, max: i32 },
    Identified(ValueId),
    Particular(i32),
}

impl IntegerValue {
    /// Closed range, collapsed to a particular or to `Unknown` at the extremes.
    pub fn range(min: i32, max: i32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        if min == max {
            IntegerValue::Particular(min)
        } else if min == i32::MIN && max == i32::MAX {
            IntegerValue::Unknown
        } else {
            IntegerValue::Range { min, max }
        }
    }

    pub fn value(self) -> Option<i32> {
        match self {
            IntegerValue::Particular(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_particular(self) -> bool {
        matches!(self, IntegerValue::Particular(_))
    }

    fn bounds(self) -> Option<(i32, i32)> {
        match self {
            IntegerValue::Particular(value) => Some((value, value)),
            IntegerValue::Range { min, max } => Some((min, max)),
            IntegerValue::Unknown | IntegerValue::Identified(_) => None,
        }
    }

    pub fn generalize(self, other: IntegerValue) -> IntegerValue {
        if self == other {
            return self;
        }
        match (self, other) {
            (
                IntegerValue::Range {
                    min: left_min,
                    max: left_max,
                },
                IntegerValue::Range {
                    min: right_min,
                    max: right_max,
                },
            ) => IntegerValue::range(left_min.min(right_min), left_max.max(right_max)),
            _ => IntegerValue::Unknown,
        }
    }

    /// Generalize, but jump straight to `Unknown` when `self` would have to grow.
    pub fn widen(self, other: IntegerValue) -> IntegerValue {
        let joined = self.generalize(other);
        if joined == self {
            self
        } else {
            IntegerValue::Unknown
        }
    }

    pub fn add(self, other: IntegerValue) -> IntegerValue {
        match (self, other) {
            (IntegerValue::Particular(a), IntegerValue::Particular(b)) => {
                IntegerValue::Particular(a.wrapping_add(b))
            }
            _ => self.range_op(other, |(a_min, a_max), (b_min, b_max)| {
                Some((a_min.checked_add(b_min)?, a_max.checked_add(b_max)?))
            }),
        }
    }

    pub fn sub(self, other: IntegerValue) -> IntegerValue {
        match (self, other) {
            (IntegerValue::Particular(a), IntegerValue::Particular(b)) => {
                IntegerValue::Particular(a.wrapping_sub(b))
            }
            (IntegerValue::Identified(a), IntegerValue::Identified(b)) if a == b => {
                IntegerValue::Particular(0)
            }
            _ => self.range_op(other, |(a_min, a_max), (b_min, b_max)| {
                Some((a_min.checked_sub(b_max)?, a_max.checked_sub(b_min)?))
            }),
        }
    }

    fn range_op(
        self,
        other: IntegerValue,
        op: impl Fn((i32, i32), (i32, i32)) -> Option<(i32, i32)>,
    ) -> IntegerValue {
        match (self.bounds(), other.bounds()) {
            (Some(left), Some(right)) => match op(left, right) {
                Some((min, max)) => IntegerValue::range(min, max),
                None => IntegerValue::Unknown,
            },
            _ => IntegerValue::Unknown,
        }
    }

    pub fn mul(self, other: IntegerValue) -> IntegerValue {
        self.particular_op(other, i32::wrapping_mul)
    }

    pub fn div(self, other: IntegerValue) -> EvalResult<IntegerValue> {
        if other == IntegerValue::Particular(0) {
            return Err(EvalError::ArithmeticFault("integer division by zero"));
        }
        Ok(self.particular_op(other, i32::wrapping_div))
    }

    pub fn rem(self, other: IntegerValue) -> EvalResult<IntegerValue> {
        if other == IntegerValue::Particular(0) {
            return Err(EvalError::ArithmeticFault("integer remainder by zero"));
        }
        Ok(self.particular_op(other, i32::wrapping_rem))
    }

    pub fn neg(self) -> IntegerValue {
        match self {
            IntegerValue::Particular(value) => IntegerValue::Particular(value.wrapping_neg()),
            IntegerValue::Range { min, max } if min != i32::MIN => IntegerValue::range(-max, -min),
            _ => IntegerValue::Unknown,
        }
    }

    pub fn shl(self, other: IntegerValue) -> IntegerValue {
        self.particular_op(other, |a, b| a.wrapping_shl((b & 0x1f) as u32))
    }

    pub fn shr(self, other: IntegerValue) -> IntegerValue {
        self.particular_op(other, |a, b| a.wrapping_shr((b & 0x1f) as u32))
    }

    pub fn ushr(self, other: IntegerValue) -> IntegerValue {
        self.particular_op(other, |a, b| ((a as u32) >> ((b & 0x1f) as u32)) as i32)
    }

    pub fn and(self, other: IntegerValue) -> IntegerValue {
        match (self, other) {
            (IntegerValue::Particular(0), _) | (_, IntegerValue::Particular(0)) => {
                IntegerValue::Particular(0)
            }
            _ => self.particular_op(other, |a, b| a & b),
        }
    }

    pub fn or(self, other: IntegerValue) -> IntegerValue {
        self.particular_op(other, |a, b| a | b)
    }

    pub fn xor(self, other: IntegerValue) -> IntegerValue {
        match (self, other) {
            (IntegerValue::Identified(a), IntegerValue::Identified(b)) if a == b => {
                IntegerValue::Particular(0)
            }
            _ => self.particular_op(other, |a, b| a ^ b),
        }
    }

    fn particular_op(self, other: IntegerValue, op: impl Fn(i32, i32) -> i32) -> IntegerValue {
        match (self, other) {
            (IntegerValue::Particular(a), IntegerValue::Particular(b)) => {
                IntegerValue::Particular(op(a, b))
            }
            _ => IntegerValue::Unknown,
        }
    }

    pub fn to_long(self) -> LongValue {
        match self {
            IntegerValue::Particular(value) => LongValue::Particular(value as i64),
            _ => LongValue::Unknown,
        }
    }

    pub fn to_float(self) -> FloatValue {
        match self {
            IntegerValue::Particular(value) => FloatValue::Particular(value as f32),
            _ => FloatValue::Unknown,
        }
    }

    pub fn to_double(self) -> DoubleValue {
        match self {
            IntegerValue::Particular(value) => DoubleValue::Particular(value as f64),
            _ => DoubleValue::Unknown,
        }
    }

    pub fn to_byte(self) -> IntegerValue {
        self.truncate(i8::MIN as i32, i8::MAX as i32, |value| value as i8 as i32)
    }

    pub fn to_char(self) -> IntegerValue {
        self.truncate(0, u16::MAX as i32, |value| value as u16 as i32)
    }

    pub fn to_short(self) -> IntegerValue {
        self.truncate(i16::MIN as i32, i16::MAX as i32, |value| value as i16 as i32)
    }

    fn truncate(self, min: i32, max: i32, convert: impl Fn(i32) -> i32) -> IntegerValue {
        match self {
            IntegerValue::Particular(value) => IntegerValue::Particular(convert(value)),
            IntegerValue::Range {
                min: value_min,
                max: value_max,
            } if value_min >= min && value_max <= max => self,
            _ => IntegerValue::range(min, max),
        }
    }

    pub fn equal(self, other: IntegerValue) -> Tristate {
        match (self, other) {
            (IntegerValue::Identified(a), IntegerValue::Identified(b)) if a == b => {
                Tristate::Always
            }
            _ => match (self.bounds(), other.bounds()) {
                (Some((a_min, a_max)), Some((b_min, b_max))) => {
                    if a_min == a_max && b_min == b_max && a_min == b_min {
                        Tristate::Always
                    } else if a_max < b_min || b_max < a_min {
                        Tristate::Never
                    } else {
                        Tristate::Maybe
                    }
                }
                _ => Tristate::Maybe,
            },
        }
    }

    pub fn less_than(self, other: IntegerValue) -> Tristate {
        match (self, other) {
            (IntegerValue::Identified(a), IntegerValue::Identified(b)) if a == b => {
                Tristate::Never
            }
            _ => match (self.bounds(), other.bounds()) {
                (Some((a_min, a_max)), Some((b_min, b_max))) => {
                    if a_max < b_min {
                        Tristate::Always
                    } else if a_min >= b_max {
                        Tristate::Never
                    } else {
                        Tristate::Maybe
                    }
                }
                _ => Tristate::Maybe,
            },
        }
    }

    pub fn less_or_equal(self, other: IntegerValue) -> Tristate {
        match (self, other) {
            (IntegerValue::Identified(a), IntegerValue::Identified(b)) if a == b => {
                Tristate::Always
            }
            _ => match (self.bounds(), other.bounds()) {
                (Some((a_min, a_max)), Some((b_min, b_max))) => {
                    if a_max <= b_min {
                        Tristate::Always
                    } else if a_min > b_max {
                        Tristate::Never
                    } else {
                        Tristate::Maybe
                    }
                }
                _ => Tristate::Maybe,
            },
        }
    }
}

impl fmt::Display for IntegerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegerValue::Unknown => write!(f, "i"),
            IntegerValue::Range { min, max } => write!(f, "i:[{min},{max}]"),
            IntegerValue::Identified(id) => write!(f, "i#{}", id.0),
            IntegerValue::Particular(value) => write!(f, "i:{value}"),
        }
    }
}
