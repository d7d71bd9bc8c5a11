//! Local variables and operand stack with per-slot provenance.

use crate::error::{EvalError, EvalResult};
use crate::value::{InstructionOffsets, JoinContext, ReferenceValue, Value, ValueId};

/// Local variable slots; `None` marks a slot that holds no usable value.
#[derive(Clone, Debug, Default)]
pub struct TracedVariables {
    values: Vec<Option<Value>>,
    producers: Vec<InstructionOffsets>,
    producer: InstructionOffsets,
}

impl PartialEq for TracedVariables {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.producers == other.producers
    }
}

impl TracedVariables {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![None; size],
            producers: vec![InstructionOffsets::new(); size],
            producer: InstructionOffsets::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Offsets recorded as producer of every subsequent store.
    pub fn set_producer(&mut self, producer: InstructionOffsets) {
        self.producer = producer;
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn producers(&self, index: usize) -> Option<&InstructionOffsets> {
        self.producers.get(index)
    }

    pub fn load(&self, index: usize) -> EvalResult<Value> {
        match self.values.get(index) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(EvalError::mismatch(format!(
                "variable {index} holds no usable value"
            ))),
            None => Err(EvalError::mismatch(format!(
                "variable index {index} exceeds {} slots",
                self.values.len()
            ))),
        }
    }

    pub fn store(&mut self, index: usize, value: Value) -> EvalResult<()> {
        let width = if value.is_category2() { 2 } else { 1 };
        if index + width > self.values.len() {
            return Err(EvalError::mismatch(format!(
                "variable index {index} exceeds {} slots",
                self.values.len()
            )));
        }
        if index > 0 && matches!(&self.values[index - 1], Some(previous) if previous.is_category2())
        {
            self.values[index - 1] = None;
        }
        if width == 2 {
            self.values[index + 1] = Some(Value::Top);
            self.producers[index + 1] = self.producer.clone();
        }
        self.values[index] = Some(value);
        self.producers[index] = self.producer.clone();
        Ok(())
    }

    /// Merge `other` into `self`, returning whether any slot or provenance changed.
    pub fn generalize(&mut self, other: &TracedVariables, cx: &JoinContext) -> EvalResult<bool> {
        let size = self.values.len().max(other.values.len());
        let mut changed = false;
        if self.values.len() < size {
            self.values.resize(size, None);
            self.producers.resize(size, InstructionOffsets::new());
            changed = true;
        }
        for index in 0..size {
            let merged = match (&self.values[index], other.values.get(index).and_then(Option::as_ref)) {
                (Some(current), Some(incoming)) => {
                    if current.computational_type() == incoming.computational_type() {
                        Some(current.generalize(incoming, cx)?)
                    } else {
                        None
                    }
                }
                (Some(_), None) | (None, _) => None,
            };
            if merged != self.values[index] {
                self.values[index] = merged;
                changed = true;
            }
            if let Some(producers) = other.producers.get(index) {
                changed |= self.producers[index].merge(producers);
            }
        }
        Ok(changed)
    }

    /// Replace every reference with identity `id`, returning how many slots changed.
    pub fn replace_references(&mut self, id: ValueId, replacement: &ReferenceValue) -> usize {
        let mut replaced = 0;
        for slot in self.values.iter_mut().flatten() {
            if let Some(value) = slot.replace_reference(id, replacement) {
                *slot = value;
                replaced += 1;
            }
        }
        replaced
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&Value>)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| (index, value.as_ref()))
    }
}

/// Operand stack; category 2 values occupy a `Top` slot underneath them.
#[derive(Clone, Debug, Default)]
pub struct TracedStack {
    values: Vec<Value>,
    producers: Vec<InstructionOffsets>,
    producer: InstructionOffsets,
}

impl PartialEq for TracedStack {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.producers == other.producers
    }
}

impl TracedStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth in slots.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set_producer(&mut self, producer: InstructionOffsets) {
        self.producer = producer;
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.producers.clear();
    }

    pub fn push(&mut self, value: Value) {
        if value.is_category2() {
            self.push_slot(Value::Top);
        }
        self.push_slot(value);
    }

    pub fn pop(&mut self) -> EvalResult<Value> {
        let value = self.pop_slot()?;
        if value == Value::Top {
            return Err(EvalError::mismatch(
                "popped the second half of a category 2 value",
            ));
        }
        if value.is_category2() {
            let below = self.pop_slot()?;
            if below != Value::Top {
                return Err(EvalError::mismatch(format!(
                    "category 2 value {value} sits on {below}"
                )));
            }
        }
        Ok(value)
    }

    pub fn push_slot(&mut self, value: Value) {
        self.values.push(value);
        self.producers.push(self.producer.clone());
    }

    pub fn pop_slot(&mut self) -> EvalResult<Value> {
        self.producers.pop();
        self.values
            .pop()
            .ok_or(EvalError::StackUnderflow(0))
    }

    /// Slot `depth` positions below the top.
    pub fn peek(&self, depth: usize) -> EvalResult<&Value> {
        self.values
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.values.get(index))
            .ok_or(EvalError::StackUnderflow(depth))
    }

    pub fn producers(&self, depth: usize) -> Option<&InstructionOffsets> {
        self.producers
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.producers.get(index))
    }

    pub fn generalize(&mut self, other: &TracedStack, cx: &JoinContext) -> EvalResult<bool> {
        if self.values.len() != other.values.len() {
            return Err(EvalError::StackSizeMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }
        let mut changed = false;
        for (index, incoming) in other.values.iter().enumerate() {
            let merged = self.values[index].generalize(incoming, cx)?;
            if merged != self.values[index] {
                self.values[index] = merged;
                changed = true;
            }
            changed |= self.producers[index].merge(&other.producers[index]);
        }
        Ok(changed)
    }

    pub fn replace_references(&mut self, id: ValueId, replacement: &ReferenceValue) -> usize {
        let mut replaced = 0;
        for slot in &mut self.values {
            if let Some(value) = slot.replace_reference(id, replacement) {
                *slot = value;
                replaced += 1;
            }
        }
        replaced
    }

    /// Slots from the bottom of the stack upwards.
    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.values.iter()
    }
}

/// Variables and stack at one program point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub variables: TracedVariables,
    pub stack: TracedStack,
}

impl Frame {
    pub fn new(max_locals: usize) -> Self {
        Self::with_variables(TracedVariables::new(max_locals))
    }

    pub fn with_variables(variables: TracedVariables) -> Self {
        Self {
            variables,
            stack: TracedStack::new(),
        }
    }

    pub fn set_producer(&mut self, producer: InstructionOffsets) {
        self.variables.set_producer(producer.clone());
        self.stack.set_producer(producer);
    }

    pub fn generalize(&mut self, other: &Frame, cx: &JoinContext) -> EvalResult<bool> {
        let variables_changed = self.variables.generalize(&other.variables, cx)?;
        let stack_changed = self.stack.generalize(&other.stack, cx)?;
        Ok(variables_changed || stack_changed)
    }

    /// Apply an updated object to every slot aliasing it.
    pub fn replace_references(&mut self, id: ValueId, replacement: &ReferenceValue) -> usize {
        self.variables.replace_references(id, replacement)
            + self.stack.replace_references(id, replacement)
    }

    /// Forget the mutable state of `escaping` in every slot that may alias it.
    ///
    /// Without an identifier, slots holding an equal value are taken as aliases.
    pub fn release_escaped(&mut self, escaping: &ReferenceValue) -> usize {
        let Some(released) = escaping.escaped() else {
            return 0;
        };
        if let Some(id) = escaping.id() {
            return self.replace_references(id, &released);
        }
        let original = escaping.untraced();
        let slots = self
            .variables
            .values
            .iter_mut()
            .flatten()
            .chain(self.stack.values.iter_mut());
        let mut replaced = 0;
        for slot in slots {
            let Value::Reference(reference) = slot else {
                continue;
            };
            if reference.untraced() == original {
                *reference = reference.replaced_by(released.clone());
                replaced += 1;
            }
        }
        replaced
    }
}
