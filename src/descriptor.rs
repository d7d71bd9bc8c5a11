use std::str::FromStr;

use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::error::{EvalError, EvalResult};

pub const OBJECT_TYPE: &str = "Ljava/lang/Object;";
pub const STRING_TYPE: &str = "Ljava/lang/String;";
pub const CLASS_TYPE: &str = "Ljava/lang/Class;";
pub const THROWABLE_TYPE: &str = "Ljava/lang/Throwable;";

fn parse_method(descriptor: &str) -> EvalResult<MethodDescriptor> {
    MethodDescriptor::from_str(descriptor)
        .map_err(|_| EvalError::InvalidDescriptor(descriptor.to_string()))
}

/// Parameter types of a method descriptor, in field descriptor form.
pub fn parameter_types(descriptor: &str) -> EvalResult<Vec<String>> {
    let parsed = parse_method(descriptor)?;
    Ok(parsed.parameter_types().iter().map(type_to_string).collect())
}

/// Return type of a method descriptor, `None` for `void`.
pub fn return_type(descriptor: &str) -> EvalResult<Option<String>> {
    let parsed = parse_method(descriptor)?;
    Ok(match parsed.return_type() {
        TypeDescriptor::Void => None,
        other => Some(type_to_string(other)),
    })
}

/// Validate a field descriptor by parsing it as the return type of `()T`.
pub fn field_type(descriptor: &str) -> EvalResult<String> {
    return_type(&format!("(){descriptor}"))?
        .ok_or_else(|| EvalError::InvalidDescriptor(descriptor.to_string()))
}

fn type_to_string(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Byte => "B".to_string(),
        TypeDescriptor::Char => "C".to_string(),
        TypeDescriptor::Double => "D".to_string(),
        TypeDescriptor::Float => "F".to_string(),
        TypeDescriptor::Integer => "I".to_string(),
        TypeDescriptor::Long => "J".to_string(),
        TypeDescriptor::Short => "S".to_string(),
        TypeDescriptor::Boolean => "Z".to_string(),
        TypeDescriptor::Void => "V".to_string(),
        TypeDescriptor::Object(class) => format!("L{class};"),
        TypeDescriptor::Array(inner, dimensions) => {
            format!("{}{}", "[".repeat(*dimensions as usize), type_to_string(inner))
        }
    }
}

/// Whether the type occupies two stack or variable slots.
pub fn is_category2(ty: &str) -> bool {
    matches!(ty.as_bytes().first(), Some(b'J' | b'D'))
}

pub fn is_reference(ty: &str) -> bool {
    matches!(ty.as_bytes().first(), Some(b'L' | b'['))
}

pub fn is_array(ty: &str) -> bool {
    ty.starts_with('[')
}

/// Class name of a class type, `None` for arrays and primitives.
pub fn class_name(ty: &str) -> Option<&str> {
    ty.strip_prefix('L').and_then(|rest| rest.strip_suffix(';'))
}

/// Type of a class name as it appears in `new`, `checkcast` and friends.
pub fn class_type(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{name};")
    }
}

/// Element type of an array type.
pub fn element_type(ty: &str) -> Option<&str> {
    ty.strip_prefix('[')
}

/// Array type holding elements of `ty`.
pub fn array_of(ty: &str) -> String {
    format!("[{ty}")
}

pub fn array_dimensions(ty: &str) -> usize {
    ty.bytes().take_while(|byte| *byte == b'[').count()
}

/// Element type descriptor for a `newarray` type code.
pub fn primitive_array_element(atype: i32) -> Option<&'static str> {
    let element = match atype {
        4 => "Z",
        5 => "C",
        6 => "F",
        7 => "D",
        8 => "B",
        9 => "S",
        10 => "I",
        11 => "J",
        _ => return None,
    };
    Some(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_types_flatten_to_descriptors() {
        let params = parameter_types("(IJ[Ljava/lang/String;[[D)V").expect("params");

        assert_eq!(params, vec!["I", "J", "[Ljava/lang/String;", "[[D"]);
        assert_eq!(return_type("(I)V").expect("return"), None);
        assert_eq!(
            return_type("()Ljava/lang/Object;").expect("return"),
            Some(OBJECT_TYPE.to_string())
        );
    }

    #[test]
    fn invalid_descriptor_is_reported() {
        let err = parameter_types("(Q)V").expect_err("invalid");

        assert_eq!(err, EvalError::InvalidDescriptor("(Q)V".to_string()));
    }

    #[test]
    fn array_helpers_walk_dimensions() {
        assert_eq!(array_dimensions("[[I"), 2);
        assert_eq!(element_type("[[I"), Some("[I"));
        assert_eq!(class_name(STRING_TYPE), Some("java/lang/String"));
        assert_eq!(class_name("[I"), None);
        assert_eq!(class_type("[I"), "[I");
        assert_eq!(class_type("a/B"), "La/B;");
        assert!(is_category2("J"));
        assert!(!is_category2("I"));
    }
}
