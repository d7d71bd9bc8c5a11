//! What field accesses and calls do to a frame.

pub mod executing;
pub mod models;
pub mod result;

use std::sync::Arc;

use crate::classpath::ClassPool;
use crate::descriptor::{self, THROWABLE_TYPE};
use crate::error::EvalResult;
use crate::frame::{Frame, TracedVariables};
use crate::ir::{CallKind, MemberRef, Method};
use crate::value::{ReferenceValue, Value, ValueFactory};

pub use executing::ExecutingInvocationUnit;
pub use models::{MethodCall, MethodModel, ModelRegistry};
pub use result::MethodResult;

/// Policy for method entry, thrown values, field accesses and calls.
pub trait InvocationUnit: Send + Sync {
    fn factory(&self) -> &dyn ValueFactory;

    fn classes(&self) -> &ClassPool;

    /// Initial value of parameter slot `index` of declared type `ty`.
    fn parameter_value(&self, method: &Method, index: usize, ty: &str, is_receiver: bool) -> Value;

    /// Variables on entry: the receiver, if any, followed by the declared parameters.
    fn enter_method(&self, method: &Method) -> EvalResult<TracedVariables> {
        let mut variables = TracedVariables::new(method.max_locals as usize);
        let mut slot = 0;
        if !method.access.is_static {
            let ty = descriptor::class_type(&method.class_name);
            variables.store(slot, self.parameter_value(method, slot, &ty, true))?;
            slot += 1;
        }
        for ty in descriptor::parameter_types(&method.descriptor)? {
            variables.store(slot, self.parameter_value(method, slot, &ty, false))?;
            slot += if descriptor::is_category2(&ty) { 2 } else { 1 };
        }
        Ok(variables)
    }

    /// Value a handler for `catch_type` finds on its stack; `None` catches everything.
    fn exception_value(&self, catch_type: Option<&str>) -> ReferenceValue;

    fn field_value(&self, field: &MemberRef) -> EvalResult<Value>;

    /// Store `value` into `field`; a stored reference is reachable from code outside the method.
    fn put_field(&self, _field: &MemberRef, value: &Value, frame: &mut Frame) -> EvalResult<()> {
        if let Value::Reference(reference) = value {
            frame.release_escaped(reference);
        }
        Ok(())
    }

    /// Pop the arguments and receiver of a call and push its result, if any.
    fn invoke_member(&self, kind: CallKind, member: &MemberRef, frame: &mut Frame) -> EvalResult<()>;
}

/// Never executes calls; results follow from declared types only.
#[derive(Clone, Debug)]
pub struct BasicInvocationUnit {
    factory: Arc<dyn ValueFactory>,
    classes: Arc<ClassPool>,
}

impl BasicInvocationUnit {
    pub fn new(factory: Arc<dyn ValueFactory>, classes: Arc<ClassPool>) -> Self {
        Self { factory, classes }
    }

    /// Value of declared type `ty`, a possible extension unless the type is final.
    pub fn declared_value(&self, ty: &str, may_be_null: bool) -> Value {
        let class = self.classes.class_of_type(ty);
        let may_be_extension = match &class {
            Some(class) => !class.is_final,
            None => !is_primitive_array(ty),
        };
        self.factory
            .create_value(ty, class, may_be_extension, may_be_null)
    }

    /// Result of a call nothing is known about, `None` for `void`.
    pub fn declared_return(&self, member: &MemberRef) -> EvalResult<Option<Value>> {
        Ok(descriptor::return_type(&member.descriptor)?.map(|ty| self.declared_value(&ty, true)))
    }
}

impl InvocationUnit for BasicInvocationUnit {
    fn factory(&self) -> &dyn ValueFactory {
        self.factory.as_ref()
    }

    fn classes(&self) -> &ClassPool {
        &self.classes
    }

    fn parameter_value(&self, _method: &Method, _index: usize, ty: &str, is_receiver: bool) -> Value {
        self.declared_value(ty, !is_receiver)
    }

    fn exception_value(&self, catch_type: Option<&str>) -> ReferenceValue {
        let ty = catch_type
            .map(descriptor::class_type)
            .unwrap_or_else(|| THROWABLE_TYPE.to_string());
        let class = self.classes.class_of_type(&ty);
        self.factory.reference_value(&ty, class, true, false)
    }

    fn field_value(&self, field: &MemberRef) -> EvalResult<Value> {
        let ty = descriptor::field_type(&field.descriptor)?;
        Ok(self.declared_value(&ty, true))
    }

    fn invoke_member(&self, kind: CallKind, member: &MemberRef, frame: &mut Frame) -> EvalResult<()> {
        let call = pop_arguments(kind, member, frame)?;
        release_arguments(&call, frame);
        if let Some(value) = self.declared_return(member)? {
            frame.stack.push(value);
        }
        Ok(())
    }
}

/// Arguments of a call were popped in reverse; these are in declaration order.
pub(crate) struct PoppedCall {
    pub receiver: Option<ReferenceValue>,
    pub arguments: Vec<Value>,
}

pub(crate) fn pop_arguments(kind: CallKind, member: &MemberRef, frame: &mut Frame) -> EvalResult<PoppedCall> {
    let parameters = descriptor::parameter_types(&member.descriptor)?;
    let mut arguments = Vec::with_capacity(parameters.len());
    for _ in &parameters {
        arguments.push(frame.stack.pop()?);
    }
    arguments.reverse();
    let receiver = if kind.has_receiver() {
        Some(frame.stack.pop()?.expect_reference()?)
    } else {
        None
    };
    Ok(PoppedCall { receiver, arguments })
}

/// The callee may mutate its receiver and every reference argument.
pub(crate) fn release_arguments(call: &PoppedCall, frame: &mut Frame) {
    let references = call
        .receiver
        .iter()
        .chain(call.arguments.iter().filter_map(Value::as_reference));
    for reference in references {
        frame.release_escaped(reference);
    }
}

fn is_primitive_array(ty: &str) -> bool {
    descriptor::array_dimensions(ty) == 1 && !descriptor::is_reference(&ty[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::MethodBuilder;
    use crate::value::{IdentifiedValueFactory, IntegerValue, ParticularValueFactory, Tristate};

    fn unit() -> BasicInvocationUnit {
        BasicInvocationUnit::new(
            Arc::new(ParticularValueFactory::new()),
            Arc::new(ClassPool::platform()),
        )
    }

    #[test]
    fn receiver_is_never_null_and_wide_parameters_take_two_slots() {
        let method = MethodBuilder::new("(JLjava/lang/String;)V")
            .owner("demo/Widget")
            .instance()
            .max_locals(4)
            .build();

        let variables = unit().enter_method(&method).expect("enter");

        let receiver = variables.get(0).and_then(Value::as_reference).expect("receiver");
        assert_eq!(receiver.is_null(), Tristate::Never);
        assert_eq!(variables.get(2), Some(&Value::Top));
        let text = variables.get(3).and_then(Value::as_reference).expect("string");
        assert_eq!(text.is_null(), Tristate::Maybe);
        assert_eq!(text.runtime_type(), Some("Ljava/lang/String;"));
    }

    #[test]
    fn basic_calls_pop_arguments_and_push_declared_result() {
        let mut frame = Frame::new(0);
        frame.stack.push(Value::Reference(ReferenceValue::null()));
        frame.stack.push(Value::Int(IntegerValue::Particular(1)));
        let member = MemberRef::new("demo/Widget", "size", "(I)J");

        unit()
            .invoke_member(CallKind::Virtual, &member, &mut frame)
            .expect("invoke");

        assert_eq!(frame.stack.size(), 2);
        assert!(matches!(frame.stack.peek(0), Ok(Value::Long(_))));
    }

    #[test]
    fn handlers_receive_non_null_exceptions() {
        let thrown = unit().exception_value(Some("java/lang/ArithmeticException"));

        assert_eq!(thrown.is_null(), Tristate::Never);
        assert_eq!(thrown.type_name(), Some("Ljava/lang/ArithmeticException;"));
    }

    #[test]
    fn arrays_passed_to_calls_lose_their_elements() {
        let factory = Arc::new(IdentifiedValueFactory::default());
        let unit = BasicInvocationUnit::new(factory.clone(), Arc::new(ClassPool::platform()));
        let array = factory.array_value("[I", None, IntegerValue::Particular(2));
        assert!(array.array_load(IntegerValue::Particular(0)).expect("load").is_some());
        let mut frame = Frame::new(1);
        frame
            .variables
            .store(0, Value::Reference(array.clone()))
            .expect("store");
        frame.stack.push(Value::Reference(array.clone()));
        let fill = MemberRef::new("demo/Helper", "fill", "([I)V");

        unit.invoke_member(CallKind::Static, &fill, &mut frame)
            .expect("invoke");

        let local = frame.variables.get(0).and_then(Value::as_reference).expect("array");
        assert_eq!(local.id(), array.id());
        assert_eq!(local.array_length(), Some(IntegerValue::Particular(2)));
        assert_eq!(local.array_load(IntegerValue::Particular(0)).expect("load"), None);
    }
}
