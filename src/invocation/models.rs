//! Executable models of well-known library methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::classpath::ClassPool;
use crate::descriptor;
use crate::invocation::result::MethodResult;
use crate::ir::MemberRef;
use crate::value::{
    ArrayElements, Concrete, IntegerValue, ReferenceValue, Tristate, Value, ValueFactory,
};

/// Call site handed to a model, with the arguments in declaration order.
pub struct MethodCall<'a> {
    pub member: &'a MemberRef,
    pub receiver: Option<&'a ReferenceValue>,
    pub arguments: &'a [Value],
    pub factory: &'a dyn ValueFactory,
    pub classes: &'a ClassPool,
}

impl MethodCall<'_> {
    fn receiver_text(&self) -> Option<&str> {
        self.receiver.and_then(ReferenceValue::content).map(Concrete::text)
    }

    fn string(&self, text: &str) -> Value {
        Value::Reference(
            self.factory
                .string_constant(text, self.classes.get("java/lang/String")),
        )
    }

    fn int(&self, value: i32) -> Value {
        Value::Int(self.factory.integer_constant(value))
    }

    fn boolean(&self, value: bool) -> Value {
        self.int(i32::from(value))
    }
}

/// Semantics of the methods of one or more library classes.
pub trait MethodModel: Send + Sync {
    /// Internal names of the classes this model covers.
    fn owners(&self) -> &'static [&'static str];

    fn invoke(&self, call: &MethodCall<'_>) -> MethodResult;
}

/// Wrapper struct for model factory functions to enable inventory collection.
pub struct ModelFactory(pub fn() -> Box<dyn MethodModel>);

inventory::collect!(ModelFactory);

/// Macro to register a method model.
///
/// Usage: `register_model!(ModelName);`
#[macro_export]
macro_rules! register_model {
    ($model_type:ty) => {
        inventory::submit! {
            $crate::invocation::models::ModelFactory(|| Box::new(<$model_type>::default()))
        }
    };
}

/// Models keyed by the class they cover.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn MethodModel>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("classes", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    /// Registry holding every model submitted with `register_model!`.
    pub fn registered() -> Self {
        let mut registry = Self::default();
        for factory in inventory::iter::<ModelFactory> {
            registry.register(Arc::from((factory.0)()));
        }
        registry
    }

    pub fn register(&mut self, model: Arc<dyn MethodModel>) {
        for owner in model.owners() {
            self.models.insert((*owner).to_string(), Arc::clone(&model));
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Model for a call, preferring the receiver's tracked runtime class over the static owner.
    pub fn lookup(&self, runtime_class: Option<&str>, owner: &str) -> Option<Arc<dyn MethodModel>> {
        if let Some(runtime_class) = runtime_class {
            if let Some(model) = self.models.get(runtime_class) {
                return Some(Arc::clone(model));
            }
        }
        let model = self.models.get(owner)?;
        if let Some(runtime_class) = runtime_class.filter(|class| *class != owner) {
            warn!(
                owner = owner,
                runtime_class = runtime_class,
                "no model for runtime class, using model of static owner"
            );
        }
        Some(Arc::clone(model))
    }
}

/// `java/lang/String`.
#[derive(Default)]
pub struct StringModel;

impl MethodModel for StringModel {
    fn owners(&self) -> &'static [&'static str] {
        &["java/lang/String"]
    }

    fn invoke(&self, call: &MethodCall<'_>) -> MethodResult {
        let member = call.member;
        match (member.name.as_str(), member.descriptor.as_str()) {
            ("<init>", "(Ljava/lang/String;)V") => {
                match (call.receiver, argument_text(call.arguments.first())) {
                    (Some(receiver), Some(text)) => MethodResult::void().with_receiver(
                        receiver.with_content(Some(Concrete::String(Arc::from(text)))),
                    ),
                    _ => MethodResult::invalid(),
                }
            }
            ("valueOf", _) => match first_parameter(&member.descriptor)
                .zip(call.arguments.first())
                .and_then(|(parameter, argument)| render(argument, &parameter))
            {
                Some(text) => MethodResult::returning(call.string(&text)),
                None => MethodResult::invalid(),
            },
            _ => {
                let Some(text) = call.receiver_text() else {
                    return MethodResult::invalid();
                };
                match (member.name.as_str(), member.descriptor.as_str()) {
                    ("length", "()I") => MethodResult::returning(call.int(utf16_length(text))),
                    ("isEmpty", "()Z") => MethodResult::returning(call.boolean(text.is_empty())),
                    ("hashCode", "()I") => MethodResult::returning(call.int(java_hash(text))),
                    ("toString" | "intern", "()Ljava/lang/String;") => call
                        .receiver
                        .map_or_else(MethodResult::invalid, |receiver| {
                            MethodResult::returning(Value::Reference(receiver.clone()))
                        }),
                    ("toUpperCase", "()Ljava/lang/String;") => {
                        MethodResult::returning(call.string(&text.to_uppercase()))
                    }
                    ("toLowerCase", "()Ljava/lang/String;") => {
                        MethodResult::returning(call.string(&text.to_lowercase()))
                    }
                    ("trim", "()Ljava/lang/String;") => {
                        MethodResult::returning(call.string(text.trim_matches(|c: char| c <= ' ')))
                    }
                    ("getChars", "(II[CI)V") => get_chars(text, call),
                    ("concat", "(Ljava/lang/String;)Ljava/lang/String;") => {
                        match argument_text(call.arguments.first()) {
                            Some(other) => MethodResult::returning(call.string(&format!("{text}{other}"))),
                            None => MethodResult::invalid(),
                        }
                    }
                    ("equals", "(Ljava/lang/Object;)Z") => match call.arguments.first() {
                        Some(Value::Reference(other)) if other.is_null() == Tristate::Always => {
                            MethodResult::returning(call.boolean(false))
                        }
                        Some(Value::Reference(other)) => match other.content() {
                            Some(Concrete::String(other)) => {
                                MethodResult::returning(call.boolean(text == other.as_ref()))
                            }
                            _ => MethodResult::invalid(),
                        },
                        _ => MethodResult::invalid(),
                    },
                    _ => MethodResult::invalid(),
                }
            }
        }
    }
}

/// `java/lang/StringBuilder` and `java/lang/StringBuffer`.
#[derive(Default)]
pub struct StringBuilderModel;

impl MethodModel for StringBuilderModel {
    fn owners(&self) -> &'static [&'static str] {
        &["java/lang/StringBuilder", "java/lang/StringBuffer"]
    }

    fn invoke(&self, call: &MethodCall<'_>) -> MethodResult {
        let Some(receiver) = call.receiver else {
            return MethodResult::invalid();
        };
        let member = call.member;
        let builder = |text: &str| receiver.with_content(Some(Concrete::Builder(Arc::from(text))));
        match member.name.as_str() {
            "<init>" => match member.descriptor.as_str() {
                "(Ljava/lang/String;)V" | "(Ljava/lang/CharSequence;)V" => {
                    match argument_text(call.arguments.first()) {
                        Some(text) => MethodResult::void().with_receiver(builder(text)),
                        None => MethodResult::void().with_receiver(receiver.with_content(None)),
                    }
                }
                _ => MethodResult::invalid(),
            },
            "append" => {
                let parameter = first_parameter(&member.descriptor);
                let appended = match (call.receiver_text(), parameter, call.arguments.first()) {
                    (Some(text), Some(parameter), Some(argument)) => render(argument, &parameter)
                        .map(|suffix| builder(&format!("{text}{suffix}"))),
                    _ => None,
                };
                let updated = appended.unwrap_or_else(|| receiver.with_content(None));
                MethodResult::returning(Value::Reference(updated.clone())).with_receiver(updated)
            }
            "toString" => match call.receiver_text() {
                Some(text) => MethodResult::returning(call.string(text)),
                None => MethodResult::invalid(),
            },
            "length" => match call.receiver_text() {
                Some(text) => MethodResult::returning(call.int(utf16_length(text))),
                None => MethodResult::invalid(),
            },
            // Any other call may mutate the buffer.
            _ if call.receiver_text().is_some() => {
                MethodResult::void().with_receiver(receiver.with_content(None))
            }
            _ => MethodResult::invalid(),
        }
    }
}

crate::register_model!(StringModel);
crate::register_model!(StringBuilderModel);

/// `getChars(srcBegin, srcEnd, dst, dstBegin)` into a `char[]` with tracked elements.
fn get_chars(text: &str, call: &MethodCall<'_>) -> MethodResult {
    let [
        Value::Int(IntegerValue::Particular(begin)),
        Value::Int(IntegerValue::Particular(end)),
        Value::Reference(target),
        Value::Int(IntegerValue::Particular(at)),
    ] = call.arguments
    else {
        return MethodResult::invalid();
    };
    let Some(elements) = target.as_typed().and_then(|typed| typed.elements.as_ref()) else {
        return MethodResult::invalid();
    };
    let units: Vec<u16> = text.encode_utf16().collect();
    let (Ok(begin), Ok(end), Ok(at)) = (usize::try_from(*begin), usize::try_from(*end), usize::try_from(*at))
    else {
        return MethodResult::invalid();
    };
    if begin > end || end > units.len() || at + (end - begin) > elements.len() {
        return MethodResult::invalid();
    }
    let mut values = elements.0.clone();
    for (slot, unit) in values[at..].iter_mut().zip(&units[begin..end]) {
        *slot = call.int(i32::from(*unit));
    }
    MethodResult::void().with_parameter(2, Value::Reference(target.with_elements(ArrayElements(values))))
}

fn argument_text(argument: Option<&Value>) -> Option<&str> {
    match argument? {
        Value::Reference(reference) => reference.content().map(Concrete::text),
        _ => None,
    }
}

fn first_parameter(descriptor: &str) -> Option<String> {
    descriptor::parameter_types(descriptor).ok()?.into_iter().next()
}

/// Text of an argument of type `parameter` as `String.valueOf` would produce it.
fn render(argument: &Value, parameter: &str) -> Option<String> {
    match (parameter, argument) {
        ("I" | "S" | "B", Value::Int(IntegerValue::Particular(value))) => Some(value.to_string()),
        ("Z", Value::Int(IntegerValue::Particular(value))) => Some((*value != 0).to_string()),
        ("C", Value::Int(IntegerValue::Particular(value))) => {
            char::from_u32(*value as u32 & 0xffff).map(String::from)
        }
        ("J", Value::Long(value)) => value.value().map(|value| value.to_string()),
        (ty, Value::Reference(reference)) if descriptor::is_reference(ty) => {
            if reference.is_null() == Tristate::Always {
                return Some("null".to_string());
            }
            match reference.content()? {
                Concrete::String(text) | Concrete::Builder(text) if ty != "[C" => Some(text.to_string()),
                _ => None,
            }
        }
        _ => None,
    }
}

fn utf16_length(text: &str) -> i32 {
    text.encode_utf16().count() as i32
}

fn java_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ParticularValueFactory, TypedReference, ValueId};

    fn string(text: &str) -> ReferenceValue {
        ParticularValueFactory::new().string_constant(text, None)
    }

    fn builder(text: Option<&str>, id: u64) -> ReferenceValue {
        ReferenceValue::Typed(
            TypedReference::new("Ljava/lang/StringBuilder;", None, false, false)
                .with_id(Some(ValueId(id)))
                .with_content(text.map(|text| Concrete::Builder(Arc::from(text)))),
        )
    }

    fn call<'a>(
        member: &'a MemberRef,
        receiver: Option<&'a ReferenceValue>,
        arguments: &'a [Value],
        factory: &'a ParticularValueFactory,
        classes: &'a ClassPool,
    ) -> MethodCall<'a> {
        MethodCall {
            member,
            receiver,
            arguments,
            factory,
            classes,
        }
    }

    #[test]
    fn string_length_and_concat() {
        let factory = ParticularValueFactory::new();
        let classes = ClassPool::platform();
        let receiver = string("ab");
        let length = MemberRef::new("java/lang/String", "length", "()I");
        let concat = MemberRef::new(
            "java/lang/String",
            "concat",
            "(Ljava/lang/String;)Ljava/lang/String;",
        );
        let suffix = [Value::Reference(string("cd"))];

        let length = StringModel.invoke(&call(&length, Some(&receiver), &[], &factory, &classes));
        let joined = StringModel.invoke(&call(&concat, Some(&receiver), &suffix, &factory, &classes));

        assert_eq!(length.return_value, Some(Value::Int(IntegerValue::Particular(2))));
        let joined = joined.return_value.expect("return value");
        assert_eq!(
            joined.as_reference().and_then(ReferenceValue::content).map(Concrete::text),
            Some("abcd")
        );
    }

    #[test]
    fn string_hash_matches_platform_algorithm() {
        assert_eq!(java_hash("hello"), 99162322);
        assert_eq!(java_hash(""), 0);
    }

    #[test]
    fn builder_append_updates_receiver_with_same_identity() {
        let factory = ParticularValueFactory::new();
        let classes = ClassPool::platform();
        let receiver = builder(Some("x="), 4);
        let append = MemberRef::new(
            "java/lang/StringBuilder",
            "append",
            "(I)Ljava/lang/StringBuilder;",
        );
        let arguments = [Value::Int(IntegerValue::Particular(7))];

        let result = StringBuilderModel.invoke(&call(&append, Some(&receiver), &arguments, &factory, &classes));

        let updated = result.updated_receiver.expect("updated receiver");
        assert_eq!(updated.id(), Some(ValueId(4)));
        assert_eq!(updated.content().map(Concrete::text), Some("x=7"));
    }

    #[test]
    fn unknown_append_drops_builder_content() {
        let factory = ParticularValueFactory::new();
        let classes = ClassPool::platform();
        let receiver = builder(Some("x="), 4);
        let append = MemberRef::new(
            "java/lang/StringBuilder",
            "append",
            "(I)Ljava/lang/StringBuilder;",
        );
        let arguments = [Value::Int(IntegerValue::Unknown)];

        let result = StringBuilderModel.invoke(&call(&append, Some(&receiver), &arguments, &factory, &classes));

        let updated = result.updated_receiver.expect("updated receiver");
        assert_eq!(updated.id(), Some(ValueId(4)));
        assert!(!updated.is_particular());
    }

    #[test]
    fn registry_prefers_runtime_class() {
        let registry = ModelRegistry::registered();

        assert!(registry.lookup(Some("java/lang/StringBuffer"), "java/lang/Object").is_some());
        assert!(registry.lookup(None, "java/lang/String").is_some());
        assert!(registry.lookup(Some("java/util/List"), "java/util/Collection").is_none());
    }
}
