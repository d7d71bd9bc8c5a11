use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::classpath::ClassInfo;
use crate::descriptor::{self, OBJECT_TYPE};
use crate::error::{EvalError, EvalResult};
use crate::value::{InstructionOffsets, IntegerValue, JoinContext, Tristate, Value, ValueId};

/// Upper bound on the runtime types a multi-typed reference keeps apart.
const MAX_MULTI_TYPES: usize = 8;

/// Concrete content of a particular reference.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Concrete {
    String(Arc<str>),
    /// Contents of a `StringBuilder` or `StringBuffer`.
    Builder(Arc<str>),
    /// A class literal, by internal name.
    Class(Arc<str>),
}

impl Concrete {
    pub fn text(&self) -> &str {
        match self {
            Concrete::String(text) | Concrete::Builder(text) | Concrete::Class(text) => text,
        }
    }
}

/// Per-element values of a tracked array.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayElements(pub Vec<Value>);

impl ArrayElements {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }
}

/// Reference with a declared type and optional identity, content and elements.
#[derive(Clone, Debug, Default)]
pub struct TypedReference {
    /// Type in descriptor form; `None` is the `null` literal.
    pub type_name: Option<Arc<str>>,
    pub class: Option<Arc<ClassInfo>>,
    pub may_be_extension: bool,
    pub may_be_null: bool,
    pub id: Option<ValueId>,
    pub content: Option<Concrete>,
    pub length: Option<IntegerValue>,
    pub elements: Option<ArrayElements>,
}

impl PartialEq for TypedReference {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.class.as_ref().map(|class| &class.name)
                == other.class.as_ref().map(|class| &class.name)
            && self.may_be_extension == other.may_be_extension
            && self.may_be_null == other.may_be_null
            && self.id == other.id
            && self.content == other.content
            && self.length == other.length
            && self.elements == other.elements
    }
}

impl TypedReference {
    pub fn null() -> Self {
        Self {
            may_be_null: true,
            ..Self::default()
        }
    }

    pub fn new(
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        may_be_extension: bool,
        may_be_null: bool,
    ) -> Self {
        Self {
            type_name: Some(Arc::from(type_name)),
            class,
            may_be_extension,
            may_be_null,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Option<ValueId>) -> Self {
        self.id = id;
        self
    }

    pub fn with_content(mut self, content: Option<Concrete>) -> Self {
        self.content = content;
        self
    }

    pub fn is_null_literal(&self) -> bool {
        self.type_name.is_none()
    }

    fn escaped(&self) -> Option<TypedReference> {
        let builder = matches!(self.content, Some(Concrete::Builder(_)));
        if !builder && self.elements.is_none() {
            return None;
        }
        let length = match &self.elements {
            Some(elements) => Some(IntegerValue::Particular(elements.len() as i32)),
            None => self.length,
        };
        Some(TypedReference {
            content: if builder { None } else { self.content.clone() },
            length,
            elements: None,
            ..self.clone()
        })
    }

    fn is_null(&self) -> Tristate {
        if self.is_null_literal() {
            Tristate::Always
        } else if self.may_be_null {
            Tristate::Maybe
        } else {
            Tristate::Never
        }
    }

    fn join(&self, other: &TypedReference, cx: &JoinContext) -> EvalResult<TypedReference> {
        if self == other {
            return Ok(self.clone());
        }
        let joined_type = join_types(self, other, cx)?;
        if joined_type.degraded {
            return Ok(TypedReference::new(
                OBJECT_TYPE,
                cx.classes().class_of_type(OBJECT_TYPE),
                true,
                true,
            ));
        }
        let same_object = self.id == other.id;
        let content = if same_object && self.content == other.content {
            self.content.clone()
        } else {
            None
        };
        let length = match (self.length, other.length) {
            (Some(left), Some(right)) if same_object => Some(left.generalize(right)),
            _ => None,
        };
        let elements = match (&self.elements, &other.elements) {
            (Some(left), Some(right)) if same_object && left.len() == right.len() => {
                let mut values = Vec::with_capacity(left.len());
                for (a, b) in left.0.iter().zip(&right.0) {
                    values.push(a.generalize(b, cx)?);
                }
                Some(ArrayElements(values))
            }
            _ => None,
        };
        Ok(TypedReference {
            type_name: joined_type.type_name,
            class: joined_type.class,
            may_be_extension: joined_type.may_be_extension,
            may_be_null: self.may_be_null || other.may_be_null,
            id: if same_object { self.id } else { None },
            content,
            length,
            elements,
        })
    }

    fn instance_of(&self, ty: &str, cx: &JoinContext) -> Tristate {
        let Some(type_name) = self.type_name.as_deref() else {
            return Tristate::Never;
        };
        match cx.classes().is_assignable(type_name, ty) {
            Ok(true) if self.may_be_null => Tristate::Maybe,
            Ok(true) => Tristate::Always,
            Ok(false) if !self.may_be_extension => Tristate::Never,
            Ok(false) => {
                let target_is_interface = cx
                    .classes()
                    .class_of_type(ty)
                    .map(|class| class.is_interface)
                    .unwrap_or(true);
                match cx.classes().is_assignable(ty, type_name) {
                    Ok(false) if !target_is_interface => Tristate::Never,
                    _ => Tristate::Maybe,
                }
            }
            Err(_) => Tristate::Maybe,
        }
    }

    fn cast(&self, ty: &str, cx: &JoinContext) -> TypedReference {
        let Some(type_name) = self.type_name.as_deref() else {
            return self.clone();
        };
        if matches!(cx.classes().is_assignable(type_name, ty), Ok(true)) {
            return self.clone();
        }
        TypedReference {
            type_name: Some(Arc::from(ty)),
            class: cx.classes().class_of_type(ty),
            may_be_extension: true,
            may_be_null: self.may_be_null,
            id: self.id,
            content: None,
            length: self.length.filter(|_| descriptor::is_array(ty)),
            elements: None,
        }
    }

    fn check_index(&self, index: IntegerValue) -> EvalResult<()> {
        let length = match (&self.elements, self.length) {
            (Some(elements), _) => elements.len() as i32,
            (None, Some(IntegerValue::Particular(length))) => length,
            _ => return Ok(()),
        };
        match index {
            IntegerValue::Particular(index) if index < 0 || index >= length => {
                Err(EvalError::ArrayIndexOutOfBounds { index, length })
            }
            _ => Ok(()),
        }
    }
}

struct JoinedType {
    type_name: Option<Arc<str>>,
    class: Option<Arc<ClassInfo>>,
    may_be_extension: bool,
    degraded: bool,
}

fn join_types(
    left: &TypedReference,
    right: &TypedReference,
    cx: &JoinContext,
) -> EvalResult<JoinedType> {
    let keep = |reference: &TypedReference| JoinedType {
        type_name: reference.type_name.clone(),
        class: reference.class.clone(),
        may_be_extension: reference.may_be_extension,
        degraded: false,
    };
    match (left.type_name.as_deref(), right.type_name.as_deref()) {
        (None, None) | (Some(_), None) => Ok(keep(left)),
        (None, Some(_)) => Ok(keep(right)),
        (Some(a), Some(b)) if a == b => Ok(JoinedType {
            class: left.class.clone().or_else(|| right.class.clone()),
            may_be_extension: left.may_be_extension || right.may_be_extension,
            ..keep(left)
        }),
        (Some(a), Some(b)) => match common_type(a, b, cx) {
            Ok(common) => Ok(JoinedType {
                class: cx.classes().class_of_type(&common),
                type_name: Some(Arc::from(common.as_str())),
                may_be_extension: true,
                degraded: false,
            }),
            Err(err) => {
                cx.recover(err)?;
                Ok(JoinedType {
                    type_name: Some(Arc::from(OBJECT_TYPE)),
                    class: cx.classes().class_of_type(OBJECT_TYPE),
                    may_be_extension: true,
                    degraded: true,
                })
            }
        },
    }
}

fn common_type(left: &str, right: &str, cx: &JoinContext) -> EvalResult<String> {
    let left_dimensions = descriptor::array_dimensions(left);
    let right_dimensions = descriptor::array_dimensions(right);
    if left_dimensions == 0 && right_dimensions == 0 {
        return match (descriptor::class_name(left), descriptor::class_name(right)) {
            (Some(a), Some(b)) => Ok(descriptor::class_type(&cx.classes().common_supertype(a, b)?)),
            _ => Ok(OBJECT_TYPE.to_string()),
        };
    }
    if left_dimensions == right_dimensions {
        let left_element = &left[left_dimensions..];
        let right_element = &right[right_dimensions..];
        if descriptor::class_name(left_element).is_some()
            && descriptor::class_name(right_element).is_some()
        {
            let element = common_type(left_element, right_element, cx)?;
            return Ok(format!("{}{element}", "[".repeat(left_dimensions)));
        }
    }
    Ok(OBJECT_TYPE.to_string())
}

/// Set of possible runtime types of one reference.
#[derive(Clone, Debug)]
pub struct MultiTypedReference {
    members: Vec<TypedReference>,
    generalized: OnceLock<TypedReference>,
}

impl PartialEq for MultiTypedReference {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl MultiTypedReference {
    pub fn single(member: TypedReference) -> Self {
        Self {
            members: vec![member],
            generalized: OnceLock::new(),
        }
    }

    pub fn members(&self) -> &[TypedReference] {
        &self.members
    }

    fn union(&self, others: &[TypedReference], cx: &JoinContext) -> EvalResult<Self> {
        let mut members = self.members.clone();
        for other in others {
            match members
                .iter_mut()
                .find(|member| member.type_name == other.type_name)
            {
                Some(existing) => *existing = existing.join(other, cx)?,
                None => members.push(other.clone()),
            }
        }
        members.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        if members.len() > MAX_MULTI_TYPES {
            members = vec![fold_join(&members, cx)?];
        }
        Ok(Self {
            members,
            generalized: OnceLock::new(),
        })
    }

    /// Single type covering every member, computed on first use.
    pub fn generalized(&self, cx: &JoinContext) -> EvalResult<TypedReference> {
        if let Some(generalized) = self.generalized.get() {
            return Ok(generalized.clone());
        }
        let generalized = fold_join(&self.members, cx)?;
        let _ = self.generalized.set(generalized.clone());
        Ok(generalized)
    }

    fn common_id(&self) -> Option<ValueId> {
        let first = self.members.first()?.id?;
        self.members
            .iter()
            .all(|member| member.id == Some(first))
            .then_some(first)
    }
}

fn fold_join(members: &[TypedReference], cx: &JoinContext) -> EvalResult<TypedReference> {
    let mut iter = members.iter();
    let mut joined = iter.next().cloned().unwrap_or_else(TypedReference::null);
    for member in iter {
        joined = joined.join(member, cx)?;
    }
    Ok(joined)
}

/// A reference tagged with the offsets it was traced through.
#[derive(Clone, Debug, PartialEq)]
pub struct TracedReference {
    pub inner: Box<ReferenceValue>,
    pub trace: InstructionOffsets,
}

/// Abstract reference value.
#[derive(Clone, Debug, PartialEq)]
pub enum ReferenceValue {
    Unknown,
    Typed(TypedReference),
    MultiTyped(MultiTypedReference),
    Traced(TracedReference),
}

impl ReferenceValue {
    pub fn null() -> Self {
        ReferenceValue::Typed(TypedReference::null())
    }

    pub fn traced(inner: ReferenceValue, trace: InstructionOffsets) -> Self {
        match inner {
            ReferenceValue::Traced(traced) => ReferenceValue::Traced(TracedReference {
                inner: traced.inner,
                trace: traced.trace.union(&trace),
            }),
            other => ReferenceValue::Traced(TracedReference {
                inner: Box::new(other),
                trace,
            }),
        }
    }

    /// The value with any trace wrapper removed.
    pub fn untraced(&self) -> &ReferenceValue {
        match self {
            ReferenceValue::Traced(traced) => traced.inner.untraced(),
            other => other,
        }
    }

    fn map_traced(&self, inner: ReferenceValue) -> ReferenceValue {
        match self {
            ReferenceValue::Traced(traced) => ReferenceValue::traced(inner, traced.trace.clone()),
            _ => inner,
        }
    }

    /// The single typed view of this value, also for one-member multi-typed references.
    pub fn as_typed(&self) -> Option<&TypedReference> {
        match self.untraced() {
            ReferenceValue::Typed(typed) => Some(typed),
            ReferenceValue::MultiTyped(multi) if multi.members.len() == 1 => multi.members.first(),
            _ => None,
        }
    }

    /// Replace the typed view, keeping the multi-typed wrapper and any trace tag.
    fn with_typed(&self, typed: TypedReference) -> ReferenceValue {
        let inner = match self.untraced() {
            ReferenceValue::MultiTyped(_) => ReferenceValue::MultiTyped(MultiTypedReference::single(typed)),
            _ => ReferenceValue::Typed(typed),
        };
        self.map_traced(inner)
    }

    pub fn id(&self) -> Option<ValueId> {
        match self.untraced() {
            ReferenceValue::Typed(typed) => typed.id,
            ReferenceValue::MultiTyped(multi) => multi.common_id(),
            ReferenceValue::Unknown | ReferenceValue::Traced(_) => None,
        }
    }

    pub fn content(&self) -> Option<&Concrete> {
        self.as_typed().and_then(|typed| typed.content.as_ref())
    }

    pub fn is_particular(&self) -> bool {
        self.content().is_some()
    }

    /// Declared type in descriptor form, when a single one is known.
    pub fn type_name(&self) -> Option<&str> {
        match self.untraced() {
            ReferenceValue::Typed(typed) => typed.type_name.as_deref(),
            ReferenceValue::MultiTyped(multi) if multi.members.len() == 1 => {
                multi.members[0].type_name.as_deref()
            }
            _ => None,
        }
    }

    /// Exact runtime type, known only when the value cannot be a subtype.
    pub fn runtime_type(&self) -> Option<&str> {
        match self.as_typed() {
            Some(typed) if !typed.may_be_extension => typed.type_name.as_deref(),
            _ => None,
        }
    }

    pub fn generalize(&self, other: &ReferenceValue, cx: &JoinContext) -> EvalResult<ReferenceValue> {
        if self == other {
            return Ok(self.clone());
        }
        let joined = match (self, other) {
            (ReferenceValue::Traced(a), ReferenceValue::Traced(b)) => {
                ReferenceValue::Traced(TracedReference {
                    inner: Box::new(a.inner.generalize(&b.inner, cx)?),
                    trace: a.trace.union(&b.trace),
                })
            }
            (ReferenceValue::Traced(traced), plain) | (plain, ReferenceValue::Traced(traced)) => {
                ReferenceValue::Traced(TracedReference {
                    inner: Box::new(traced.inner.generalize(plain, cx)?),
                    trace: traced.trace.clone(),
                })
            }
            (ReferenceValue::Unknown, _) | (_, ReferenceValue::Unknown) => ReferenceValue::Unknown,
            (ReferenceValue::MultiTyped(a), ReferenceValue::MultiTyped(b)) => {
                ReferenceValue::MultiTyped(a.union(&b.members, cx)?)
            }
            (ReferenceValue::MultiTyped(multi), ReferenceValue::Typed(typed))
            | (ReferenceValue::Typed(typed), ReferenceValue::MultiTyped(multi)) => {
                ReferenceValue::MultiTyped(multi.union(std::slice::from_ref(typed), cx)?)
            }
            (ReferenceValue::Typed(a), ReferenceValue::Typed(b)) => {
                ReferenceValue::Typed(a.join(b, cx)?)
            }
        };
        Ok(joined)
    }

    pub fn is_null(&self) -> Tristate {
        match self.untraced() {
            ReferenceValue::Typed(typed) => typed.is_null(),
            ReferenceValue::MultiTyped(multi) => {
                let mut answers = multi.members.iter().map(TypedReference::is_null);
                let first = answers.next().unwrap_or(Tristate::Maybe);
                if answers.all(|answer| answer == first) {
                    first
                } else {
                    Tristate::Maybe
                }
            }
            ReferenceValue::Unknown | ReferenceValue::Traced(_) => Tristate::Maybe,
        }
    }

    pub fn instance_of(&self, ty: &str, cx: &JoinContext) -> Tristate {
        match self.untraced() {
            ReferenceValue::Typed(typed) => typed.instance_of(ty, cx),
            ReferenceValue::MultiTyped(multi) => {
                let mut answers = multi.members.iter().map(|member| member.instance_of(ty, cx));
                let first = answers.next().unwrap_or(Tristate::Maybe);
                if answers.all(|answer| answer == first) {
                    first
                } else {
                    Tristate::Maybe
                }
            }
            ReferenceValue::Unknown | ReferenceValue::Traced(_) => Tristate::Maybe,
        }
    }

    pub fn cast(&self, ty: &str, cx: &JoinContext) -> EvalResult<ReferenceValue> {
        let cast = match self.untraced() {
            ReferenceValue::Typed(typed) => ReferenceValue::Typed(typed.cast(ty, cx)),
            ReferenceValue::MultiTyped(multi) => {
                let members: Vec<TypedReference> = multi
                    .members
                    .iter()
                    .filter(|member| member.instance_of(ty, cx) != Tristate::Never)
                    .map(|member| member.cast(ty, cx))
                    .collect();
                match members.split_first() {
                    Some((first, rest)) => ReferenceValue::MultiTyped(
                        MultiTypedReference::single(first.clone()).union(rest, cx)?,
                    ),
                    None => ReferenceValue::Typed(multi.generalized(cx)?.cast(ty, cx)),
                }
            }
            ReferenceValue::Unknown | ReferenceValue::Traced(_) => ReferenceValue::Unknown,
        };
        Ok(self.map_traced(cast))
    }

    /// Reference comparison, as done by `if_acmpeq`.
    pub fn equal(&self, other: &ReferenceValue) -> Tristate {
        if let (Some(a), Some(b)) = (self.id(), other.id()) {
            if a == b {
                return Tristate::Always;
            }
        }
        match (self.is_null(), other.is_null()) {
            (Tristate::Always, Tristate::Always) => Tristate::Always,
            (Tristate::Always, Tristate::Never) | (Tristate::Never, Tristate::Always) => {
                Tristate::Never
            }
            _ => Tristate::Maybe,
        }
    }

    pub fn array_length(&self) -> Option<IntegerValue> {
        let typed = self.as_typed()?;
        match &typed.elements {
            Some(elements) => Some(IntegerValue::Particular(elements.len() as i32)),
            None => typed.length,
        }
    }

    /// Element at `index` when tracked; out-of-bounds particular indices fail.
    pub fn array_load(&self, index: IntegerValue) -> EvalResult<Option<Value>> {
        let Some(typed) = self.as_typed() else {
            return Ok(None);
        };
        typed.check_index(index)?;
        Ok(match (&typed.elements, index) {
            (Some(elements), IntegerValue::Particular(index)) => {
                elements.get(index as usize).cloned()
            }
            _ => None,
        })
    }

    /// Updated array after storing `value`, when the elements are tracked.
    pub fn array_store(
        &self,
        index: IntegerValue,
        value: &Value,
        cx: &JoinContext,
    ) -> EvalResult<Option<ReferenceValue>> {
        let Some(typed) = self.as_typed() else {
            return Ok(None);
        };
        if let Some(type_name) = typed.type_name.as_deref() {
            if !descriptor::is_array(type_name) {
                return Err(EvalError::mismatch(format!(
                    "array store into non-array {type_name}"
                )));
            }
        }
        typed.check_index(index)?;
        let Some(elements) = &typed.elements else {
            return Ok(None);
        };
        let mut values = elements.0.clone();
        match index {
            IntegerValue::Particular(index) => values[index as usize] = value.clone(),
            _ => {
                for element in &mut values {
                    *element = element.generalize(value, cx)?;
                }
            }
        }
        let updated = TypedReference {
            elements: Some(ArrayElements(values)),
            ..typed.clone()
        };
        Ok(Some(self.with_typed(updated)))
    }

    /// Same object with different concrete content.
    pub fn with_content(&self, content: Option<Concrete>) -> ReferenceValue {
        match self.as_typed() {
            Some(typed) => self.with_typed(typed.clone().with_content(content)),
            None => self.clone(),
        }
    }

    /// Same array with different tracked elements.
    pub fn with_elements(&self, elements: ArrayElements) -> ReferenceValue {
        match self.as_typed() {
            Some(typed) => self.with_typed(TypedReference {
                elements: Some(elements),
                ..typed.clone()
            }),
            None => self.clone(),
        }
    }

    /// Same object after code outside the model could have mutated it.
    ///
    /// Builder content and tracked array elements are dropped; identity, type
    /// and array length stay. `None` when nothing mutable is known.
    pub fn escaped(&self) -> Option<ReferenceValue> {
        let released = match self.untraced() {
            ReferenceValue::Typed(typed) => ReferenceValue::Typed(typed.escaped()?),
            ReferenceValue::MultiTyped(multi) => {
                if multi.members.iter().all(|member| member.escaped().is_none()) {
                    return None;
                }
                ReferenceValue::MultiTyped(MultiTypedReference {
                    members: multi
                        .members
                        .iter()
                        .map(|member| member.escaped().unwrap_or_else(|| member.clone()))
                        .collect(),
                    generalized: OnceLock::new(),
                })
            }
            ReferenceValue::Unknown | ReferenceValue::Traced(_) => return None,
        };
        Some(self.map_traced(released))
    }

    /// Substitute `replacement` for this value, keeping any trace tag.
    pub fn replaced_by(&self, replacement: ReferenceValue) -> ReferenceValue {
        let replacement = match replacement {
            ReferenceValue::Traced(traced) => *traced.inner,
            other => other,
        };
        self.map_traced(replacement)
    }
}

impl fmt::Display for TypedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(type_name) = &self.type_name else {
            return write!(f, "null");
        };
        write!(f, "{type_name}")?;
        if !self.may_be_null {
            write!(f, "!")?;
        }
        if self.may_be_extension {
            write!(f, "+")?;
        }
        if let Some(id) = self.id {
            write!(f, "#{}", id.0)?;
        }
        match &self.content {
            Some(Concrete::String(text)) => write!(f, "={text:?}")?,
            Some(Concrete::Builder(text)) => write!(f, "=builder{text:?}")?,
            Some(Concrete::Class(name)) => write!(f, "=class {name}")?,
            None => {}
        }
        if let Some(elements) = &self.elements {
            write!(f, "[")?;
            for (index, element) in elements.0.iter().enumerate() {
                if index > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{element}")?;
            }
            write!(f, "]")?;
        } else if let Some(length) = self.length {
            write!(f, "[{length}]")?;
        }
        Ok(())
    }
}

impl fmt::Display for ReferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceValue::Unknown => write!(f, "a"),
            ReferenceValue::Typed(typed) => write!(f, "{typed}"),
            ReferenceValue::MultiTyped(multi) => {
                write!(f, "{{")?;
                for (index, member) in multi.members.iter().enumerate() {
                    if index > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, "}}")
            }
            ReferenceValue::Traced(traced) => write!(f, "{}@{}", traced.inner, traced.trace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::{ClassPool, OBJECT_CLASS};

    fn cx() -> JoinContext {
        let pool = ClassPool::new(vec![
            ClassInfo::interface("com/example/Shape"),
            ClassInfo::new("com/example/Base", Some(OBJECT_CLASS)),
            ClassInfo::new("com/example/Circle", Some("com/example/Base"))
                .with_interfaces(&["com/example/Shape"]),
            ClassInfo::new("com/example/Square", Some("com/example/Base"))
                .with_interfaces(&["com/example/Shape"]),
            ClassInfo::new("com/example/Orphan", Some("com/example/Missing")),
        ])
        .expect("pool");
        JoinContext::new(Arc::new(pool))
    }

    fn typed(ty: &str) -> TypedReference {
        TypedReference::new(ty, None, false, false)
    }

    fn reference(ty: &str) -> ReferenceValue {
        ReferenceValue::Typed(typed(ty))
    }

    #[test]
    fn join_laws_hold_for_typed_references() {
        let cx = cx();
        let values = vec![
            ReferenceValue::Unknown,
            ReferenceValue::null(),
            reference("Lcom/example/Circle;"),
            reference("Lcom/example/Square;"),
            reference("Lcom/example/Base;"),
            ReferenceValue::Typed(typed("Lcom/example/Circle;").with_id(Some(ValueId(1)))),
        ];
        for a in &values {
            assert_eq!(a.generalize(a, &cx).expect("join"), *a);
            for b in &values {
                let ab = a.generalize(b, &cx).expect("join");
                let ba = b.generalize(a, &cx).expect("join");
                assert_eq!(ab, ba);
                for c in &values {
                    let left = ab.generalize(c, &cx).expect("join");
                    let right = a
                        .generalize(&b.generalize(c, &cx).expect("join"), &cx)
                        .expect("join");
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn siblings_join_to_common_superclass() {
        let cx = cx();

        let joined = reference("Lcom/example/Circle;")
            .generalize(&reference("Lcom/example/Square;"), &cx)
            .expect("join");

        let typed = joined.as_typed().expect("typed");
        assert_eq!(typed.type_name.as_deref(), Some("Lcom/example/Base;"));
        assert!(typed.may_be_extension);
        assert_eq!(typed.class.as_ref().map(|c| c.name.as_str()), Some("com/example/Base"));
    }

    #[test]
    fn null_join_keeps_type_and_becomes_nullable() {
        let cx = cx();

        let joined = ReferenceValue::null()
            .generalize(&reference("Lcom/example/Circle;"), &cx)
            .expect("join");

        assert_eq!(joined.type_name(), Some("Lcom/example/Circle;"));
        assert_eq!(joined.is_null(), Tristate::Maybe);
    }

    #[test]
    fn identity_survives_joins_of_the_same_object() {
        let cx = cx();
        let a = typed("Ljava/lang/String;")
            .with_id(Some(ValueId(7)))
            .with_content(Some(Concrete::String(Arc::from("x"))));
        let b = typed("Ljava/lang/String;")
            .with_id(Some(ValueId(7)))
            .with_content(Some(Concrete::String(Arc::from("y"))));

        let joined = ReferenceValue::Typed(a)
            .generalize(&ReferenceValue::Typed(b), &cx)
            .expect("join");

        assert_eq!(joined.id(), Some(ValueId(7)));
        assert_eq!(joined.content(), None);
    }

    #[test]
    fn different_identities_lose_content() {
        let cx = cx();
        let text = Some(Concrete::String(Arc::from("x")));
        let a = typed("Ljava/lang/String;").with_id(Some(ValueId(1))).with_content(text.clone());
        let b = typed("Ljava/lang/String;").with_id(Some(ValueId(2))).with_content(text);

        let joined = ReferenceValue::Typed(a)
            .generalize(&ReferenceValue::Typed(b), &cx)
            .expect("join");

        assert_eq!(joined.id(), None);
        assert!(!joined.is_particular());
    }

    #[test]
    fn object_arrays_join_element_types() {
        let cx = cx();

        let joined = reference("[Lcom/example/Circle;")
            .generalize(&reference("[Lcom/example/Square;"), &cx)
            .expect("join");
        let mixed = reference("[I")
            .generalize(&reference("[Lcom/example/Square;"), &cx)
            .expect("join");

        assert_eq!(joined.type_name(), Some("[Lcom/example/Base;"));
        assert_eq!(mixed.type_name(), Some(OBJECT_TYPE));
    }

    #[test]
    fn incomplete_hierarchy_fails_unless_lenient() {
        let strict = cx();
        let err = reference("Lcom/example/Orphan;")
            .generalize(&reference("Lcom/example/Base;"), &strict)
            .expect_err("incomplete");
        assert!(matches!(err, EvalError::IncompleteClassHierarchy { .. }));

        let lenient = cx().with_lenient_hierarchy(true);
        let joined = reference("Lcom/example/Orphan;")
            .generalize(&reference("Lcom/example/Base;"), &lenient)
            .expect("degraded join");
        assert_eq!(joined.type_name(), Some(OBJECT_TYPE));
        assert_eq!(joined.is_null(), Tristate::Maybe);
        assert_eq!(lenient.degraded_joins(), 1);
    }

    #[test]
    fn tracked_arrays_reject_out_of_bounds_indices() {
        let cx = cx();
        let array = ReferenceValue::Typed(TypedReference {
            length: Some(IntegerValue::Particular(2)),
            elements: Some(ArrayElements(vec![
                Value::Int(IntegerValue::Particular(0)),
                Value::Int(IntegerValue::Particular(0)),
            ])),
            ..typed("[I").with_id(Some(ValueId(3)))
        });

        let err = array
            .array_load(IntegerValue::Particular(2))
            .expect_err("out of bounds");
        assert_eq!(err, EvalError::ArrayIndexOutOfBounds { index: 2, length: 2 });

        let stored = array
            .array_store(
                IntegerValue::Particular(1),
                &Value::Int(IntegerValue::Particular(9)),
                &cx,
            )
            .expect("store")
            .expect("tracked");
        assert_eq!(
            stored.array_load(IntegerValue::Particular(1)).expect("load"),
            Some(Value::Int(IntegerValue::Particular(9)))
        );
        assert_eq!(stored.id(), Some(ValueId(3)));
    }

    #[test]
    fn tracked_array_of_four_accepts_exactly_its_indices() {
        let cx = cx();
        let array = ReferenceValue::Typed(TypedReference {
            elements: Some(ArrayElements(vec![Value::Int(IntegerValue::Particular(0)); 4])),
            ..typed("[I").with_id(Some(ValueId(5)))
        });
        let nine = Value::Int(IntegerValue::Particular(9));

        for index in [-1, 4] {
            let load = array.array_load(IntegerValue::Particular(index));
            let store = array.array_store(IntegerValue::Particular(index), &nine, &cx);
            let expected = EvalError::ArrayIndexOutOfBounds { index, length: 4 };
            assert_eq!(load.expect_err("load"), expected);
            assert_eq!(store.expect_err("store"), expected);
        }
        for index in 0..=3 {
            let stored = array
                .array_store(IntegerValue::Particular(index), &nine, &cx)
                .expect("store")
                .expect("tracked");
            assert_eq!(
                stored.array_load(IntegerValue::Particular(index)).expect("load"),
                Some(nine.clone())
            );
        }
    }

    #[test]
    fn escaped_array_keeps_identity_and_length() {
        let array = ReferenceValue::Typed(TypedReference {
            elements: Some(ArrayElements(vec![Value::Int(IntegerValue::Particular(1)); 3])),
            ..typed("[I").with_id(Some(ValueId(6)))
        });

        let escaped = array.escaped().expect("mutable");

        assert_eq!(escaped.id(), Some(ValueId(6)));
        assert_eq!(escaped.array_length(), Some(IntegerValue::Particular(3)));
        assert_eq!(escaped.array_load(IntegerValue::Particular(0)).expect("load"), None);
        assert!(escaped.array_load(IntegerValue::Particular(3)).is_err());
        assert!(reference("Ljava/lang/Object;").escaped().is_none());
    }

    #[test]
    fn storing_into_non_array_is_a_mismatch() {
        let cx = cx();

        let err = reference("Ljava/lang/String;")
            .array_store(IntegerValue::Particular(0), &Value::Top, &cx)
            .expect_err("mismatch");

        assert!(matches!(err, EvalError::ValueTypeMismatch(_)));
    }

    #[test]
    fn traced_values_delegate_and_union_tags() {
        let cx = cx();
        let a = ReferenceValue::traced(reference("Lcom/example/Circle;"), InstructionOffsets::single(1));
        let b = ReferenceValue::traced(reference("Lcom/example/Square;"), InstructionOffsets::single(4));

        let joined = a.generalize(&b, &cx).expect("join");

        let ReferenceValue::Traced(traced) = &joined else {
            panic!("expected traced value");
        };
        assert_eq!(traced.trace, InstructionOffsets::from_iter([1, 4]));
        assert_eq!(joined.type_name(), Some("Lcom/example/Base;"));
    }

    #[test]
    fn multi_typed_keeps_runtime_types_apart() {
        let cx = cx();
        let a = ReferenceValue::MultiTyped(MultiTypedReference::single(typed("Lcom/example/Circle;")));
        let b = ReferenceValue::MultiTyped(MultiTypedReference::single(typed("Lcom/example/Square;")));

        let joined = a.generalize(&b, &cx).expect("join");

        let ReferenceValue::MultiTyped(multi) = &joined else {
            panic!("expected multi-typed value");
        };
        assert_eq!(multi.members().len(), 2);
        assert_eq!(
            multi.generalized(&cx).expect("generalized").type_name.as_deref(),
            Some("Lcom/example/Base;")
        );
        assert_eq!(joined.instance_of("Lcom/example/Shape;", &cx), Tristate::Always);
    }

    #[test]
    fn instance_of_and_cast_follow_hierarchy() {
        let cx = cx();
        let base = ReferenceValue::Typed(TypedReference::new("Lcom/example/Base;", None, true, false));

        assert_eq!(base.instance_of("Lcom/example/Circle;", &cx), Tristate::Maybe);
        assert_eq!(
            reference("Lcom/example/Circle;").instance_of("Lcom/example/Square;", &cx),
            Tristate::Never
        );
        let cast = base.cast("Lcom/example/Circle;", &cx).expect("cast");
        assert_eq!(cast.type_name(), Some("Lcom/example/Circle;"));
    }
}
