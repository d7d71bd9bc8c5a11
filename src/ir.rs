use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Method body prepared for evaluation.
#[derive(Clone, Debug)]
pub struct Method {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
    pub access: MethodAccess,
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub constants: Arc<ConstantTable>,
}

impl Method {
    /// Human readable `Owner.name(descriptor)` label used in logs and errors.
    pub fn display_name(&self) -> String {
        format!("{}.{}{}", self.class_name, self.name, self.descriptor)
    }

    pub fn code_length(&self) -> u32 {
        self.code.len() as u32
    }
}

/// Method access flags relevant to evaluation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MethodAccess {
    pub is_static: bool,
}

/// One entry of a method's exception table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    /// Whether the protected range overlaps `[start, end)`.
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start_pc < end && self.end_pc > start
    }
}

/// Symbolic reference to a field or method.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Call dispatch kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
    Dynamic,
}

impl CallKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, CallKind::Static | CallKind::Dynamic)
    }
}

/// Resolved constant pool entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    Field(MemberRef),
    Method(MemberRef),
    InterfaceMethod(MemberRef),
    InvokeDynamic { name: String, descriptor: String },
    MethodType(String),
    MethodHandle,
    Other,
}

/// Constant pool resolved ahead of evaluation, indexed like the class file pool.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantTable {
    entries: Vec<Constant>,
}

impl ConstantTable {
    pub fn new(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    /// Append an entry and return its pool index.
    pub fn push(&mut self, constant: Constant) -> u16 {
        if self.entries.is_empty() {
            self.entries.push(Constant::Other);
        }
        self.entries.push(constant);
        (self.entries.len() - 1) as u16
    }
}
