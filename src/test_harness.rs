use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::descriptor;
use crate::ir::{ConstantTable, ExceptionHandler, Method, MethodAccess};
use crate::opcodes;

/// Assembles a `Method` from raw bytecode for unit tests.
pub(crate) struct MethodBuilder {
    class_name: String,
    name: String,
    descriptor: String,
    access: MethodAccess,
    code: Vec<u8>,
    max_stack: u16,
    max_locals: Option<u16>,
    handlers: Vec<ExceptionHandler>,
    constants: ConstantTable,
}

impl MethodBuilder {
    /// Static `demo/Sample.sample` with the given descriptor and a lone `return`.
    pub(crate) fn new(descriptor: &str) -> Self {
        Self {
            class_name: "demo/Sample".to_string(),
            name: "sample".to_string(),
            descriptor: descriptor.to_string(),
            access: MethodAccess { is_static: true },
            code: vec![opcodes::RETURN],
            max_stack: 8,
            max_locals: None,
            handlers: Vec::new(),
            constants: ConstantTable::default(),
        }
    }

    pub(crate) fn owner(mut self, class_name: &str) -> Self {
        self.class_name = class_name.to_string();
        self
    }

    pub(crate) fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub(crate) fn instance(mut self) -> Self {
        self.access.is_static = false;
        self
    }

    pub(crate) fn max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = Some(max_locals);
        self
    }

    pub(crate) fn max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub(crate) fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    pub(crate) fn handler(mut self, start: u32, end: u32, handler: u32, catch_type: Option<&str>) -> Self {
        self.handlers.push(ExceptionHandler {
            start_pc: start,
            end_pc: end,
            handler_pc: handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    pub(crate) fn constants(mut self, constants: ConstantTable) -> Self {
        self.constants = constants;
        self
    }

    pub(crate) fn build(self) -> Method {
        let max_locals = self.max_locals.unwrap_or_else(|| self.parameter_slots());
        Method {
            class_name: self.class_name,
            name: self.name,
            descriptor: self.descriptor,
            access: self.access,
            code: self.code,
            max_stack: self.max_stack,
            max_locals,
            exception_handlers: self.handlers,
            constants: Arc::new(self.constants),
        }
    }

    fn parameter_slots(&self) -> u16 {
        let receiver = u16::from(!self.access.is_static);
        let parameters = descriptor::parameter_types(&self.descriptor)
            .expect("test descriptor")
            .iter()
            .map(|ty| if descriptor::is_category2(ty) { 2 } else { 1 })
            .sum::<u16>();
        receiver + parameters
    }
}

/// Minimal class file writer for loader and CLI tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    methods: Vec<MethodSpec>,
    code_index: u16,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access_flags: 0x0021,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            methods: Vec::new(),
            code_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn final_class(mut self) -> Self {
        self.access_flags |= 0x0010;
        self
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.add_class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.cp.push(CpEntry::Utf8(value.to_string()));
        self.cp.len() as u16
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.cp.push(CpEntry::Class(name_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let value_index = self.add_utf8(value);
        self.cp.push(CpEntry::String(value_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_integer(&mut self, value: i32) -> u16 {
        self.cp.push(CpEntry::Integer(value));
        self.cp.len() as u16
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.cp.push(CpEntry::NameAndType(name_index, descriptor_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::MethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    /// Add a static method with the given body and handler table.
    pub(crate) fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
        handlers: &[(u16, u16, u16, Option<&str>)],
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let handlers = handlers
            .iter()
            .map(|(start, end, handler, catch_type)| {
                let catch_index = catch_type.map_or(0, |name| self.add_class(name));
                [*start, *end, *handler, catch_index]
            })
            .collect();
        self.methods.push(MethodSpec {
            access_flags: 0x0009,
            name_index,
            descriptor_index,
            code,
            max_stack,
            max_locals,
            handlers,
        });
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access_flags);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access_flags);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.code_index);
            let attr_len = 12 + method.code.len() as u32 + 8 * method.handlers.len() as u32;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, method.max_stack);
            write_u16(&mut bytes, method.max_locals);
            write_u32(&mut bytes, method.code.len() as u32);
            bytes.extend_from_slice(&method.code);
            write_u16(&mut bytes, method.handlers.len() as u16);
            for handler in &method.handlers {
                for value in handler {
                    write_u16(&mut bytes, *value);
                }
            }
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, 0);
        bytes
    }
}

/// Method definition for generated class files.
struct MethodSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
    handlers: Vec<[u16; 4]>,
}

/// Constant pool entries needed by generated class files.
enum CpEntry {
    Utf8(String),
    Integer(i32),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Integer(value) => {
                bytes.push(3);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::String(value_index) => {
                bytes.push(8);
                write_u16(bytes, *value_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

/// Temporary directory holding generated class files.
pub(crate) struct ClassDir {
    temp_dir: TempDir,
}

impl ClassDir {
    pub(crate) fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `bytes` to `relative` under the directory, creating parents.
    pub(crate) fn write(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create class dir");
        }
        fs::write(&path, bytes).expect("write class file");
        path
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}
