use crate::value::{ReferenceValue, Value};

/// Outcome of running a method model against concrete arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodResult {
    pub return_value: Option<Value>,
    pub updated_receiver: Option<ReferenceValue>,
    /// Index aligned with the call's arguments; `None` leaves the argument unchanged.
    pub updated_parameters: Vec<Option<Value>>,
    valid: bool,
}

impl MethodResult {
    /// The model had nothing to say about this call.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Confirmed void call without side effects.
    pub fn void() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn returning(value: Value) -> Self {
        Self {
            return_value: Some(value),
            ..Self::void()
        }
    }

    pub fn with_receiver(mut self, receiver: ReferenceValue) -> Self {
        self.updated_receiver = Some(receiver);
        self
    }

    pub fn with_parameter(mut self, index: usize, value: Value) -> Self {
        if self.updated_parameters.len() <= index {
            self.updated_parameters.resize(index + 1, None);
        }
        self.updated_parameters[index] = Some(value);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
