use std::sync::Arc;

use tracing::debug;

use crate::classpath::ClassPool;
use crate::descriptor;
use crate::error::{EvalError, EvalResult};
use crate::frame::Frame;
use crate::invocation::models::{MethodCall, ModelRegistry};
use crate::invocation::result::MethodResult;
use crate::invocation::{
    BasicInvocationUnit, InvocationUnit, PoppedCall, pop_arguments, release_arguments,
};
use crate::ir::{CallKind, MemberRef, Method};
use crate::value::{ReferenceValue, Value, ValueFactory};

/// Runs registered models for calls with concrete arguments, falling back to declared types.
#[derive(Clone, Debug)]
pub struct ExecutingInvocationUnit {
    basic: BasicInvocationUnit,
    registry: Arc<ModelRegistry>,
    approximate_same_instance: bool,
}

impl ExecutingInvocationUnit {
    pub fn new(basic: BasicInvocationUnit, registry: Arc<ModelRegistry>) -> Self {
        Self {
            basic,
            registry,
            approximate_same_instance: false,
        }
    }

    /// Let unmodeled calls returning the receiver's type return the receiver itself.
    pub fn with_approximate_same_instance(mut self, enabled: bool) -> Self {
        self.approximate_same_instance = enabled;
        self
    }

    fn execute(&self, member: &MemberRef, call: &PoppedCall) -> Option<MethodResult> {
        let concrete = call.receiver.as_ref().is_some_and(ReferenceValue::is_particular)
            || call.arguments.iter().any(Value::is_particular);
        if !concrete {
            return None;
        }
        let runtime_class = call
            .receiver
            .as_ref()
            .and_then(ReferenceValue::runtime_type)
            .and_then(descriptor::class_name);
        let model = self.registry.lookup(runtime_class, &member.owner)?;
        let result = model.invoke(&MethodCall {
            member,
            receiver: call.receiver.as_ref(),
            arguments: &call.arguments,
            factory: self.basic.factory(),
            classes: self.basic.classes(),
        });
        debug!(member = %member, valid = result.is_valid(), "executed method model");
        result.is_valid().then_some(result)
    }

    fn apply_updates(&self, call: &PoppedCall, result: &MethodResult, frame: &mut Frame) -> EvalResult<()> {
        if let (Some(original), Some(updated)) = (&call.receiver, &result.updated_receiver) {
            replace_aliases(original, updated, frame)?;
        }
        for (index, update) in result.updated_parameters.iter().enumerate() {
            let Some(Value::Reference(updated)) = update else {
                continue;
            };
            let original = call
                .arguments
                .get(index)
                .and_then(Value::as_reference)
                .ok_or_else(|| {
                    EvalError::mismatch(format!("updated parameter {index} is not a reference argument"))
                })?;
            replace_aliases(original, updated, frame)?;
        }
        Ok(())
    }

    fn fallback_return(&self, member: &MemberRef, call: &PoppedCall) -> EvalResult<Option<Value>> {
        let Some(ty) = descriptor::return_type(&member.descriptor)? else {
            return Ok(None);
        };
        if self.approximate_same_instance {
            if let Some(receiver) = &call.receiver {
                if receiver.id().is_some() && receiver.type_name() == Some(ty.as_str()) {
                    let released = receiver.escaped().unwrap_or_else(|| receiver.clone());
                    return Ok(Some(Value::Reference(released.with_content(None))));
                }
            }
        }
        Ok(Some(self.basic.declared_value(&ty, true)))
    }
}

/// Rewrite every slot aliasing `original` to `updated`; both must denote the same object.
fn replace_aliases(original: &ReferenceValue, updated: &ReferenceValue, frame: &mut Frame) -> EvalResult<()> {
    let Some(id) = original.id() else {
        return Ok(());
    };
    if updated.id() != Some(id) {
        return Err(EvalError::mismatch(format!(
            "updated value {updated} does not carry identifier of {original}"
        )));
    }
    frame.replace_references(id, updated);
    Ok(())
}

impl InvocationUnit for ExecutingInvocationUnit {
    fn factory(&self) -> &dyn ValueFactory {
        self.basic.factory()
    }

    fn classes(&self) -> &ClassPool {
        self.basic.classes()
    }

    fn parameter_value(&self, method: &Method, index: usize, ty: &str, is_receiver: bool) -> Value {
        self.basic.parameter_value(method, index, ty, is_receiver)
    }

    fn exception_value(&self, catch_type: Option<&str>) -> ReferenceValue {
        self.basic.exception_value(catch_type)
    }

    fn field_value(&self, field: &MemberRef) -> EvalResult<Value> {
        self.basic.field_value(field)
    }

    fn invoke_member(&self, kind: CallKind, member: &MemberRef, frame: &mut Frame) -> EvalResult<()> {
        let call = pop_arguments(kind, member, frame)?;
        let return_value = match self.execute(member, &call) {
            Some(result) => {
                self.apply_updates(&call, &result, frame)?;
                match result.return_value {
                    Some(value) => Some(value),
                    None => self.fallback_return(member, &call)?,
                }
            }
            None => {
                release_arguments(&call, frame);
                self.fallback_return(member, &call)?
            }
        };
        if let Some(value) = return_value {
            frame.stack.push(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Concrete, IdentifiedValueFactory, IntegerValue, ParticularValueFactory};

    fn unit(factory: Arc<dyn ValueFactory>) -> ExecutingInvocationUnit {
        ExecutingInvocationUnit::new(
            BasicInvocationUnit::new(factory, Arc::new(ClassPool::platform())),
            Arc::new(ModelRegistry::registered()),
        )
    }

    #[test]
    fn constructor_update_reaches_every_alias() {
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = unit(Arc::clone(&factory));
        let classes = ClassPool::platform();
        let builder = factory.new_instance(
            "Ljava/lang/StringBuilder;",
            classes.get("java/lang/StringBuilder"),
        );
        let mut frame = Frame::new(1);
        frame
            .variables
            .store(0, Value::Reference(builder.clone()))
            .expect("store");
        frame.stack.push(Value::Reference(builder.clone()));
        frame.stack.push(Value::Reference(builder.clone()));
        frame
            .stack
            .push(Value::Reference(factory.string_constant("ab", None)));
        let init = MemberRef::new("java/lang/StringBuilder", "<init>", "(Ljava/lang/String;)V");

        unit.invoke_member(CallKind::Special, &init, &mut frame)
            .expect("invoke");

        assert_eq!(frame.stack.size(), 1);
        let on_stack = frame.stack.peek(0).expect("peek").as_reference().expect("reference");
        assert_eq!(on_stack.id(), builder.id());
        assert_eq!(on_stack.content().map(Concrete::text), Some("ab"));
        let in_variable = frame.variables.get(0).and_then(Value::as_reference).expect("variable");
        assert_eq!(in_variable.content().map(Concrete::text), Some("ab"));
    }

    #[test]
    fn unknown_arguments_skip_models() {
        let unit = unit(Arc::new(ParticularValueFactory::new()));
        let mut frame = Frame::new(0);
        frame.stack.push(Value::Reference(ReferenceValue::Unknown));
        let length = MemberRef::new("java/lang/String", "length", "()I");

        unit.invoke_member(CallKind::Virtual, &length, &mut frame)
            .expect("invoke");

        assert!(!frame.stack.peek(0).expect("peek").is_particular());
    }

    #[test]
    fn particular_string_length_is_computed() {
        let factory: Arc<dyn ValueFactory> = Arc::new(ParticularValueFactory::new());
        let unit = unit(Arc::clone(&factory));
        let mut frame = Frame::new(0);
        frame
            .stack
            .push(Value::Reference(factory.string_constant("four", None)));
        let length = MemberRef::new("java/lang/String", "length", "()I");

        unit.invoke_member(CallKind::Virtual, &length, &mut frame)
            .expect("invoke");

        assert_eq!(
            frame.stack.peek(0).expect("peek"),
            &Value::Int(IntegerValue::Particular(4))
        );
    }

    #[test]
    fn same_instance_approximation_keeps_identity() {
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = unit(Arc::clone(&factory)).with_approximate_same_instance(true);
        let receiver = factory.new_instance("Ldemo/Fluent;", None);
        let mut frame = Frame::new(0);
        frame.stack.push(Value::Reference(receiver.clone()));
        let member = MemberRef::new("demo/Fluent", "touch", "()Ldemo/Fluent;");

        unit.invoke_member(CallKind::Virtual, &member, &mut frame)
            .expect("invoke");

        assert_eq!(frame.stack.peek(0).expect("peek").reference_id(), receiver.id());
    }

    #[test]
    fn builder_passed_to_unmodeled_call_loses_its_content() {
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = unit(Arc::clone(&factory));
        let builder = factory
            .new_instance("Ljava/lang/StringBuilder;", None)
            .with_content(Some(Concrete::Builder(Arc::from("ab"))));
        let mut frame = Frame::new(1);
        frame
            .variables
            .store(0, Value::Reference(builder.clone()))
            .expect("store");
        frame.stack.push(Value::Reference(builder.clone()));
        let fill = MemberRef::new("demo/Helper", "fill", "(Ljava/lang/StringBuilder;)V");

        unit.invoke_member(CallKind::Static, &fill, &mut frame)
            .expect("fill");
        frame.stack.push(frame.variables.get(0).cloned().expect("builder"));
        let to_string = MemberRef::new("java/lang/StringBuilder", "toString", "()Ljava/lang/String;");
        unit.invoke_member(CallKind::Virtual, &to_string, &mut frame)
            .expect("toString");

        let local = frame.variables.get(0).and_then(Value::as_reference).expect("builder");
        assert_eq!(local.id(), builder.id());
        assert!(!local.is_particular());
        assert!(!frame.stack.peek(0).expect("peek").is_particular());
    }

    #[test]
    fn modeled_calls_keep_builder_content() {
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = unit(Arc::clone(&factory));
        let builder = factory
            .new_instance("Ljava/lang/StringBuilder;", None)
            .with_content(Some(Concrete::Builder(Arc::from("ab"))));
        let mut frame = Frame::new(1);
        frame
            .variables
            .store(0, Value::Reference(builder.clone()))
            .expect("store");
        frame.stack.push(Value::Reference(builder));
        let length = MemberRef::new("java/lang/StringBuilder", "length", "()I");

        unit.invoke_member(CallKind::Virtual, &length, &mut frame)
            .expect("length");

        assert!(frame.variables.get(0).expect("builder").is_particular());
    }

    #[test]
    fn updated_parameters_reach_every_alias() {
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = unit(Arc::clone(&factory));
        let chars = factory.array_value("[C", None, IntegerValue::Particular(3));
        let mut frame = Frame::new(1);
        frame
            .variables
            .store(0, Value::Reference(chars.clone()))
            .expect("store");
        frame
            .stack
            .push(Value::Reference(factory.string_constant("hey", None)));
        frame.stack.push(Value::Int(IntegerValue::Particular(1)));
        frame.stack.push(Value::Int(IntegerValue::Particular(3)));
        frame.stack.push(Value::Reference(chars.clone()));
        frame.stack.push(Value::Int(IntegerValue::Particular(0)));
        let get_chars = MemberRef::new("java/lang/String", "getChars", "(II[CI)V");

        unit.invoke_member(CallKind::Virtual, &get_chars, &mut frame)
            .expect("getChars");

        assert!(frame.stack.is_empty());
        let local = frame.variables.get(0).and_then(Value::as_reference).expect("chars");
        assert_eq!(local.id(), chars.id());
        assert_eq!(
            local.array_load(IntegerValue::Particular(1)).expect("load"),
            Some(Value::Int(IntegerValue::Particular('y' as i32)))
        );
        assert_eq!(
            local.array_load(IntegerValue::Particular(2)).expect("load"),
            Some(Value::Int(IntegerValue::Particular(0)))
        );
    }

    #[test]
    fn updated_parameter_with_other_identity_is_rejected() {
        let factory: Arc<dyn ValueFactory> = Arc::new(IdentifiedValueFactory::default());
        let unit = unit(Arc::clone(&factory));
        let argument = factory.array_value("[C", None, IntegerValue::Particular(1));
        let other = factory.array_value("[C", None, IntegerValue::Particular(1));
        let call = PoppedCall {
            receiver: None,
            arguments: vec![Value::Reference(argument)],
        };
        let mut frame = Frame::new(0);

        let wrong_identity = MethodResult::void().with_parameter(0, Value::Reference(other));
        let err = unit
            .apply_updates(&call, &wrong_identity, &mut frame)
            .expect_err("mismatch");
        assert!(matches!(err, EvalError::ValueTypeMismatch(_)));

        let not_an_argument = MethodResult::void().with_parameter(
            1,
            Value::Reference(factory.array_value("[C", None, IntegerValue::Particular(1))),
        );
        assert!(unit.apply_updates(&call, &not_an_argument, &mut frame).is_err());
    }

    #[test]
    fn mismatched_update_identity_is_rejected() {
        let factory = IdentifiedValueFactory::default();
        let original = factory.new_instance("Ljava/lang/StringBuilder;", None);
        let other = factory.new_instance("Ljava/lang/StringBuilder;", None);
        let mut frame = Frame::new(0);

        let err = replace_aliases(&original, &other, &mut frame).expect_err("mismatch");

        assert!(matches!(err, EvalError::ValueTypeMismatch(_)));
    }
}
