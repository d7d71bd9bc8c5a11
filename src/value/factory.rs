use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::classpath::ClassInfo;
use crate::descriptor::{self, CLASS_TYPE, STRING_TYPE};
use crate::value::reference::{ArrayElements, MultiTypedReference};
use crate::value::{
    Concrete, DoubleValue, FloatValue, IntegerValue, LongValue, ReferenceValue, TypedReference,
    Value, ValueId,
};

/// Default cap on the length of arrays tracked element by element.
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 32;

/// Creates lattice values at a chosen precision.
pub trait ValueFactory: Debug + Send + Sync {
    fn integer_value(&self) -> IntegerValue;

    fn integer_range(&self, min: i32, max: i32) -> IntegerValue;

    fn integer_constant(&self, value: i32) -> IntegerValue;

    fn long_value(&self) -> LongValue;

    fn long_constant(&self, value: i64) -> LongValue;

    fn float_value(&self) -> FloatValue;

    fn float_constant(&self, value: f32) -> FloatValue;

    fn double_value(&self) -> DoubleValue;

    fn double_constant(&self, value: f64) -> DoubleValue;

    /// Reference of a declared type, as produced by loads and calls.
    fn reference_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        may_be_extension: bool,
        may_be_null: bool,
    ) -> ReferenceValue;

    /// Freshly allocated object of exactly `type_name`.
    fn new_instance(&self, type_name: &str, class: Option<Arc<ClassInfo>>) -> ReferenceValue;

    fn null_reference(&self) -> ReferenceValue;

    /// Reference with known content, used for constants and executed models.
    fn particular_reference(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        content: Concrete,
    ) -> ReferenceValue;

    /// Freshly allocated array of `length` elements.
    fn array_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        length: IntegerValue,
    ) -> ReferenceValue;

    /// Integer value of a declared `int`-like type.
    fn integer_value_for(&self, ty: &str) -> IntegerValue {
        match ty {
            "B" => self.integer_range(i8::MIN as i32, i8::MAX as i32),
            "S" => self.integer_range(i16::MIN as i32, i16::MAX as i32),
            "C" => self.integer_range(0, u16::MAX as i32),
            "Z" => self.integer_range(0, 1),
            _ => self.integer_value(),
        }
    }

    /// Value of any declared type.
    fn create_value(
        &self,
        ty: &str,
        class: Option<Arc<ClassInfo>>,
        may_be_extension: bool,
        may_be_null: bool,
    ) -> Value {
        match ty.as_bytes().first() {
            Some(b'J') => Value::Long(self.long_value()),
            Some(b'F') => Value::Float(self.float_value()),
            Some(b'D') => Value::Double(self.double_value()),
            Some(b'L' | b'[') => {
                Value::Reference(self.reference_value(ty, class, may_be_extension, may_be_null))
            }
            _ => Value::Int(self.integer_value_for(ty)),
        }
    }

    fn string_constant(&self, value: &str, class: Option<Arc<ClassInfo>>) -> ReferenceValue {
        self.particular_reference(STRING_TYPE, class, Concrete::String(Arc::from(value)))
    }

    fn class_constant(&self, name: &str, class: Option<Arc<ClassInfo>>) -> ReferenceValue {
        self.particular_reference(CLASS_TYPE, class, Concrete::Class(Arc::from(name)))
    }
}

/// Zero value of an array element of type `ty`.
pub fn default_element(factory: &dyn ValueFactory, ty: &str) -> Value {
    match ty.as_bytes().first() {
        Some(b'J') => Value::Long(factory.long_constant(0)),
        Some(b'F') => Value::Float(factory.float_constant(0.0)),
        Some(b'D') => Value::Double(factory.double_constant(0.0)),
        Some(b'L' | b'[') => Value::Reference(factory.null_reference()),
        _ => Value::Int(factory.integer_constant(0)),
    }
}

/// Factory returning unknown values only.
#[derive(Debug, Default)]
pub struct BasicValueFactory;

impl ValueFactory for BasicValueFactory {
    fn integer_value(&self) -> IntegerValue {
        IntegerValue::Unknown
    }

    fn integer_range(&self, _min: i32, _max: i32) -> IntegerValue {
        IntegerValue::Unknown
    }

    fn integer_constant(&self, _value: i32) -> IntegerValue {
        IntegerValue::Unknown
    }

    fn long_value(&self) -> LongValue {
        LongValue::Unknown
    }

    fn long_constant(&self, _value: i64) -> LongValue {
        LongValue::Unknown
    }

    fn float_value(&self) -> FloatValue {
        FloatValue::Unknown
    }

    fn float_constant(&self, _value: f32) -> FloatValue {
        FloatValue::Unknown
    }

    fn double_value(&self) -> DoubleValue {
        DoubleValue::Unknown
    }

    fn double_constant(&self, _value: f64) -> DoubleValue {
        DoubleValue::Unknown
    }

    fn reference_value(
        &self,
        _type_name: &str,
        _class: Option<Arc<ClassInfo>>,
        _may_be_extension: bool,
        _may_be_null: bool,
    ) -> ReferenceValue {
        ReferenceValue::Unknown
    }

    fn new_instance(&self, _type_name: &str, _class: Option<Arc<ClassInfo>>) -> ReferenceValue {
        ReferenceValue::Unknown
    }

    fn null_reference(&self) -> ReferenceValue {
        ReferenceValue::Unknown
    }

    fn particular_reference(
        &self,
        _type_name: &str,
        _class: Option<Arc<ClassInfo>>,
        _content: Concrete,
    ) -> ReferenceValue {
        ReferenceValue::Unknown
    }

    fn array_value(
        &self,
        _type_name: &str,
        _class: Option<Arc<ClassInfo>>,
        _length: IntegerValue,
    ) -> ReferenceValue {
        ReferenceValue::Unknown
    }
}

/// Factory producing typed references and particular constants.
#[derive(Debug, Default)]
pub struct ParticularValueFactory {
    ranges: bool,
}

impl ParticularValueFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also produce integer ranges for narrow declared types and range arithmetic.
    pub fn with_ranges() -> Self {
        Self { ranges: true }
    }
}

impl ValueFactory for ParticularValueFactory {
    fn integer_value(&self) -> IntegerValue {
        IntegerValue::Unknown
    }

    fn integer_range(&self, min: i32, max: i32) -> IntegerValue {
        if self.ranges {
            IntegerValue::range(min, max)
        } else {
            IntegerValue::Unknown
        }
    }

    fn integer_constant(&self, value: i32) -> IntegerValue {
        IntegerValue::Particular(value)
    }

    fn long_value(&self) -> LongValue {
        LongValue::Unknown
    }

    fn long_constant(&self, value: i64) -> LongValue {
        LongValue::Particular(value)
    }

    fn float_value(&self) -> FloatValue {
        FloatValue::Unknown
    }

    fn float_constant(&self, value: f32) -> FloatValue {
        FloatValue::Particular(value)
    }

    fn double_value(&self) -> DoubleValue {
        DoubleValue::Unknown
    }

    fn double_constant(&self, value: f64) -> DoubleValue {
        DoubleValue::Particular(value)
    }

    fn reference_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        may_be_extension: bool,
        may_be_null: bool,
    ) -> ReferenceValue {
        ReferenceValue::Typed(TypedReference::new(
            type_name,
            class,
            may_be_extension,
            may_be_null,
        ))
    }

    fn new_instance(&self, type_name: &str, class: Option<Arc<ClassInfo>>) -> ReferenceValue {
        ReferenceValue::Typed(TypedReference::new(type_name, class, false, false))
    }

    fn null_reference(&self) -> ReferenceValue {
        ReferenceValue::null()
    }

    fn particular_reference(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        content: Concrete,
    ) -> ReferenceValue {
        ReferenceValue::Typed(
            TypedReference::new(type_name, class, false, false).with_content(Some(content)),
        )
    }

    fn array_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        length: IntegerValue,
    ) -> ReferenceValue {
        ReferenceValue::Typed(TypedReference {
            length: Some(length),
            ..TypedReference::new(type_name, class, false, false)
        })
    }
}

/// Particular factory that also gives every created value a fresh identity.
#[derive(Debug)]
pub struct IdentifiedValueFactory {
    inner: ParticularValueFactory,
    next_id: AtomicU64,
    max_array_length: usize,
}

impl Default for IdentifiedValueFactory {
    fn default() -> Self {
        Self::new(ParticularValueFactory::new())
    }
}

impl IdentifiedValueFactory {
    pub fn new(inner: ParticularValueFactory) -> Self {
        Self {
            inner,
            next_id: AtomicU64::new(1),
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
        }
    }

    /// Arrays longer than `max` get no element tracking.
    pub fn with_max_array_length(mut self, max: usize) -> Self {
        self.max_array_length = max;
        self
    }

    fn fresh_id(&self) -> ValueId {
        ValueId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn identify(&self, value: ReferenceValue) -> ReferenceValue {
        match value {
            ReferenceValue::Typed(typed) => {
                ReferenceValue::Typed(typed.with_id(Some(self.fresh_id())))
            }
            other => other,
        }
    }
}

impl ValueFactory for IdentifiedValueFactory {
    fn integer_value(&self) -> IntegerValue {
        IntegerValue::Identified(self.fresh_id())
    }

    fn integer_range(&self, min: i32, max: i32) -> IntegerValue {
        match self.inner.integer_range(min, max) {
            IntegerValue::Unknown => self.integer_value(),
            range => range,
        }
    }

    fn integer_constant(&self, value: i32) -> IntegerValue {
        self.inner.integer_constant(value)
    }

    fn long_value(&self) -> LongValue {
        LongValue::Identified(self.fresh_id())
    }

    fn long_constant(&self, value: i64) -> LongValue {
        self.inner.long_constant(value)
    }

    fn float_value(&self) -> FloatValue {
        FloatValue::Identified(self.fresh_id())
    }

    fn float_constant(&self, value: f32) -> FloatValue {
        self.inner.float_constant(value)
    }

    fn double_value(&self) -> DoubleValue {
        DoubleValue::Identified(self.fresh_id())
    }

    fn double_constant(&self, value: f64) -> DoubleValue {
        self.inner.double_constant(value)
    }

    fn reference_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        may_be_extension: bool,
        may_be_null: bool,
    ) -> ReferenceValue {
        self.identify(
            self.inner
                .reference_value(type_name, class, may_be_extension, may_be_null),
        )
    }

    fn new_instance(&self, type_name: &str, class: Option<Arc<ClassInfo>>) -> ReferenceValue {
        self.identify(self.inner.new_instance(type_name, class))
    }

    fn null_reference(&self) -> ReferenceValue {
        self.inner.null_reference()
    }

    fn particular_reference(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        content: Concrete,
    ) -> ReferenceValue {
        self.identify(self.inner.particular_reference(type_name, class, content))
    }

    fn array_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        length: IntegerValue,
    ) -> ReferenceValue {
        let array = self.identify(self.inner.array_value(type_name, class, length));
        let count = match length {
            IntegerValue::Particular(count)
                if count >= 0 && count as usize <= self.max_array_length =>
            {
                count as usize
            }
            _ => return array,
        };
        match array {
            ReferenceValue::Typed(typed) => {
                let element_type = descriptor::element_type(type_name).unwrap_or("I");
                let zero = default_element(self, element_type);
                ReferenceValue::Typed(TypedReference {
                    elements: Some(ArrayElements(vec![zero; count])),
                    ..typed
                })
            }
            other => other,
        }
    }
}

/// Wraps another factory so references keep the set of their possible runtime types.
#[derive(Debug, Default)]
pub struct MultiTypedValueFactory<F> {
    inner: F,
}

impl<F: ValueFactory> MultiTypedValueFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    fn wrap(value: ReferenceValue) -> ReferenceValue {
        match value {
            ReferenceValue::Typed(typed) if !typed.is_null_literal() => {
                ReferenceValue::MultiTyped(MultiTypedReference::single(typed))
            }
            other => other,
        }
    }
}

impl<F: ValueFactory> ValueFactory for MultiTypedValueFactory<F> {
    fn integer_value(&self) -> IntegerValue {
        self.inner.integer_value()
    }

    fn integer_range(&self, min: i32, max: i32) -> IntegerValue {
        self.inner.integer_range(min, max)
    }

    fn integer_constant(&self, value: i32) -> IntegerValue {
        self.inner.integer_constant(value)
    }

    fn long_value(&self) -> LongValue {
        self.inner.long_value()
    }

    fn long_constant(&self, value: i64) -> LongValue {
        self.inner.long_constant(value)
    }

    fn float_value(&self) -> FloatValue {
        self.inner.float_value()
    }

    fn float_constant(&self, value: f32) -> FloatValue {
        self.inner.float_constant(value)
    }

    fn double_value(&self) -> DoubleValue {
        self.inner.double_value()
    }

    fn double_constant(&self, value: f64) -> DoubleValue {
        self.inner.double_constant(value)
    }

    fn reference_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        may_be_extension: bool,
        may_be_null: bool,
    ) -> ReferenceValue {
        Self::wrap(
            self.inner
                .reference_value(type_name, class, may_be_extension, may_be_null),
        )
    }

    fn new_instance(&self, type_name: &str, class: Option<Arc<ClassInfo>>) -> ReferenceValue {
        Self::wrap(self.inner.new_instance(type_name, class))
    }

    fn null_reference(&self) -> ReferenceValue {
        self.inner.null_reference()
    }

    fn particular_reference(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        content: Concrete,
    ) -> ReferenceValue {
        Self::wrap(self.inner.particular_reference(type_name, class, content))
    }

    fn array_value(
        &self,
        type_name: &str,
        class: Option<Arc<ClassInfo>>,
        length: IntegerValue,
    ) -> ReferenceValue {
        Self::wrap(self.inner.array_value(type_name, class, length))
    }
}
