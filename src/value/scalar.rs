use std::fmt;

use crate::error::{EvalError, EvalResult};
use crate::value::ValueId;
use crate::value::integer::IntegerValue;

/// Constant payload of a `long`, `float` or `double` value.
pub trait ScalarConstant: Copy + fmt::Debug + fmt::Display {
    const TAG: char;

    /// Identity used by the lattice: floating point constants compare by bit pattern.
    fn same(self, other: Self) -> bool;
}

impl ScalarConstant for i64 {
    const TAG: char = 'J';

    fn same(self, other: Self) -> bool {
        self == other
    }
}

impl ScalarConstant for f32 {
    const TAG: char = 'F';

    fn same(self, other: Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl ScalarConstant for f64 {
    const TAG: char = 'D';

    fn same(self, other: Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

/// Abstract `long`, `float` or `double` value.
#[derive(Clone, Copy, Debug)]
pub enum ScalarValue<T: ScalarConstant> {
    Unknown,
    Identified(ValueId),
    Particular(T),
}

pub type LongValue = ScalarValue<i64>;
pub type FloatValue = ScalarValue<f32>;
pub type DoubleValue = ScalarValue<f64>;

impl<T: ScalarConstant> PartialEq for ScalarValue<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Unknown, ScalarValue::Unknown) => true,
            (ScalarValue::Identified(a), ScalarValue::Identified(b)) => a == b,
            (ScalarValue::Particular(a), ScalarValue::Particular(b)) => a.same(*b),
            _ => false,
        }
    }
}

impl<T: ScalarConstant> Eq for ScalarValue<T> {}

impl<T: ScalarConstant> ScalarValue<T> {
    pub fn value(self) -> Option<T> {
        match self {
            ScalarValue::Particular(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_particular(self) -> bool {
        matches!(self, ScalarValue::Particular(_))
    }

    pub fn generalize(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            ScalarValue::Unknown
        }
    }

    pub fn binary(self, other: Self, op: impl Fn(T, T) -> T) -> Self {
        match (self, other) {
            (ScalarValue::Particular(a), ScalarValue::Particular(b)) => {
                ScalarValue::Particular(op(a, b))
            }
            _ => ScalarValue::Unknown,
        }
    }

    pub fn unary(self, op: impl Fn(T) -> T) -> Self {
        match self {
            ScalarValue::Particular(a) => ScalarValue::Particular(op(a)),
            _ => ScalarValue::Unknown,
        }
    }

    /// Convert a particular into another category, anything else becomes unknown.
    pub fn convert<U: ScalarConstant>(self, op: impl Fn(T) -> U) -> ScalarValue<U> {
        match self {
            ScalarValue::Particular(a) => ScalarValue::Particular(op(a)),
            _ => ScalarValue::Unknown,
        }
    }

    pub fn to_int(self, op: impl Fn(T) -> i32) -> IntegerValue {
        match self {
            ScalarValue::Particular(a) => IntegerValue::Particular(op(a)),
            _ => IntegerValue::Unknown,
        }
    }
}

impl LongValue {
    pub fn sub(self, other: Self) -> Self {
        match (self, other) {
            (ScalarValue::Identified(a), ScalarValue::Identified(b)) if a == b => {
                ScalarValue::Particular(0)
            }
            _ => self.binary(other, i64::wrapping_sub),
        }
    }

    pub fn div(self, other: Self) -> EvalResult<Self> {
        if other == ScalarValue::Particular(0) {
            return Err(EvalError::ArithmeticFault("long division by zero"));
        }
        Ok(self.binary(other, i64::wrapping_div))
    }

    pub fn rem(self, other: Self) -> EvalResult<Self> {
        if other == ScalarValue::Particular(0) {
            return Err(EvalError::ArithmeticFault("long remainder by zero"));
        }
        Ok(self.binary(other, i64::wrapping_rem))
    }

    pub fn shift(self, amount: IntegerValue, op: impl Fn(i64, u32) -> i64) -> Self {
        match (self, amount) {
            (ScalarValue::Particular(a), IntegerValue::Particular(b)) => {
                ScalarValue::Particular(op(a, (b & 0x3f) as u32))
            }
            _ => ScalarValue::Unknown,
        }
    }

    /// `lcmp`: yields -1, 0 or 1, or the `[-1, 1]` range when undecided.
    pub fn compare(self, other: Self) -> IntegerValue {
        match (self, other) {
            (ScalarValue::Particular(a), ScalarValue::Particular(b)) => {
                IntegerValue::Particular(a.cmp(&b) as i32)
            }
            (ScalarValue::Identified(a), ScalarValue::Identified(b)) if a == b => {
                IntegerValue::Particular(0)
            }
            _ => IntegerValue::range(-1, 1),
        }
    }
}

/// `fcmpl`/`fcmpg`/`dcmpl`/`dcmpg`, with `nan_result` for unordered operands.
pub fn compare_floating<T>(left: ScalarValue<T>, right: ScalarValue<T>, nan_result: i32) -> IntegerValue
where
    T: ScalarConstant + PartialOrd,
{
    match (left, right) {
        (ScalarValue::Particular(a), ScalarValue::Particular(b)) => match a.partial_cmp(&b) {
            Some(ordering) => IntegerValue::Particular(ordering as i32),
            None => IntegerValue::Particular(nan_result),
        },
        _ => IntegerValue::range(-1, 1),
    }
}

impl<T: ScalarConstant> fmt::Display for ScalarValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Unknown => write!(f, "{}", T::TAG),
            ScalarValue::Identified(id) => write!(f, "{}#{}", T::TAG, id.0),
            ScalarValue::Particular(value) => write!(f, "{}:{value}", T::TAG),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_constants_generalize_to_themselves() {
        let nan = FloatValue::Particular(f32::NAN);

        assert_eq!(nan.generalize(nan), nan);
        assert_eq!(
            DoubleValue::Particular(0.0).generalize(DoubleValue::Particular(-0.0)),
            DoubleValue::Unknown
        );
    }

    #[test]
    fn long_compare_is_undecided_for_unknowns() {
        assert_eq!(
            LongValue::Particular(3).compare(LongValue::Particular(7)),
            IntegerValue::Particular(-1)
        );
        assert_eq!(
            LongValue::Unknown.compare(LongValue::Particular(7)),
            IntegerValue::range(-1, 1)
        );
    }

    #[test]
    fn floating_compare_respects_nan_bias() {
        let nan = DoubleValue::Particular(f64::NAN);
        let one = DoubleValue::Particular(1.0);

        assert_eq!(compare_floating(nan, one, -1), IntegerValue::Particular(-1));
        assert_eq!(compare_floating(nan, one, 1), IntegerValue::Particular(1));
    }

    #[test]
    fn long_division_by_zero_faults() {
        assert!(LongValue::Unknown.div(LongValue::Particular(0)).is_err());
        assert_eq!(
            LongValue::Particular(1).shift(IntegerValue::Particular(65), |a, b| a << b),
            LongValue::Particular(2)
        );
    }
}
