use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use jclassfile::class_file::{self, ClassFlags};
use jclassfile::constant_pool::ConstantPool;
use jclassfile::methods::MethodFlags;
use tracing::debug;

use crate::classpath::ClassInfo;
use crate::ir::{Constant, ConstantTable, ExceptionHandler, MemberRef, Method, MethodAccess};

/// Classes and method bodies read from the input.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub classes: Vec<ClassInfo>,
    pub methods: Vec<Method>,
    pub class_count: usize,
}

/// Read a class file, or every class file under a directory in sorted path order.
pub fn scan_inputs(input: &Path) -> Result<ScanOutput> {
    let mut output = ScanOutput::default();
    scan_path(input, true, &mut output)?;
    debug!(
        input = %input.display(),
        classes = output.class_count,
        methods = output.methods.len(),
        "scanned input"
    );
    Ok(output)
}

fn scan_path(path: &Path, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, output);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => scan_class_file(path, output),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, output)?;
        } else {
            scan_path(&entry, false, output)?;
        }
    }

    Ok(())
}

fn scan_class_file(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed =
        parse_class_bytes(&data).with_context(|| format!("failed to parse {}", path.display()))?;
    output.class_count += 1;
    output.classes.push(parsed.class);
    output.methods.extend(parsed.methods);
    Ok(())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// One parsed class file.
pub struct ParsedClass {
    pub class: ClassInfo,
    pub methods: Vec<Method>,
}

pub fn parse_class_bytes(data: &[u8]) -> Result<ParsedClass> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let class_name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }
    let access_flags = class_file.access_flags();
    let class = ClassInfo {
        name: class_name.clone(),
        super_name,
        interfaces,
        is_interface: access_flags.contains(ClassFlags::ACC_INTERFACE),
        is_final: access_flags.contains(ClassFlags::ACC_FINAL),
    };

    let constants = Arc::new(resolve_constants(constant_pool).context("resolve constant pool")?);
    let methods = parse_methods(&class_name, constant_pool, class_file.methods(), &constants)
        .context("parse method bytecode")?;

    Ok(ParsedClass { class, methods })
}

/// Resolve every pool entry the decoder can refer to, keeping the pool indices.
fn resolve_constants(constant_pool: &[ConstantPool]) -> Result<ConstantTable> {
    let mut entries = Vec::with_capacity(constant_pool.len());
    for entry in constant_pool {
        let constant = match entry {
            ConstantPool::Integer { value } => Constant::Integer(*value),
            ConstantPool::Float { value } => Constant::Float(*value),
            ConstantPool::Long { value } => Constant::Long(*value),
            ConstantPool::Double { value } => Constant::Double(*value),
            ConstantPool::String { string_index } => {
                Constant::String(resolve_utf8(constant_pool, *string_index)?)
            }
            ConstantPool::Class { name_index } => {
                Constant::Class(resolve_utf8(constant_pool, *name_index)?)
            }
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            } => Constant::Field(resolve_member_ref(
                constant_pool,
                *class_index,
                *name_and_type_index,
            )?),
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            } => Constant::Method(resolve_member_ref(
                constant_pool,
                *class_index,
                *name_and_type_index,
            )?),
            ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => Constant::InterfaceMethod(resolve_member_ref(
                constant_pool,
                *class_index,
                *name_and_type_index,
            )?),
            ConstantPool::InvokeDynamic {
                name_and_type_index,
                ..
            } => {
                let (name_index, descriptor_index) =
                    resolve_name_and_type(constant_pool, *name_and_type_index)?;
                Constant::InvokeDynamic {
                    name: resolve_utf8(constant_pool, name_index)?,
                    descriptor: resolve_utf8(constant_pool, descriptor_index)?,
                }
            }
            ConstantPool::MethodType { descriptor_index } => {
                Constant::MethodType(resolve_utf8(constant_pool, *descriptor_index)?)
            }
            ConstantPool::MethodHandle { .. } => Constant::MethodHandle,
            _ => Constant::Other,
        };
        entries.push(constant);
    }
    Ok(ConstantTable::new(entries))
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

fn resolve_member_ref(
    constant_pool: &[ConstantPool],
    class_index: u16,
    name_and_type_index: u16,
) -> Result<MemberRef> {
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve member name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve member descriptor")?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

/// Methods with a `Code` attribute; abstract and native methods have no body to evaluate.
fn parse_methods(
    class_name: &str,
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
    constants: &Arc<ConstantTable>,
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let access_flags = method.access_flags();
        let access = MethodAccess {
            is_static: access_flags.contains(MethodFlags::ACC_STATIC),
        };
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                jclassfile::attributes::Attribute::Code {
                    code,
                    exception_table,
                    max_stack,
                    max_locals,
                    ..
                } => Some((code, exception_table, *max_stack, *max_locals)),
                _ => None,
            });
        let Some((code, exception_table, max_stack, max_locals)) = code else {
            continue;
        };
        let exception_handlers = parse_exception_handlers(exception_table, constant_pool)
            .with_context(|| format!("parse handlers of {name}{descriptor}"))?;
        parsed.push(Method {
            class_name: class_name.to_string(),
            name,
            descriptor,
            access,
            code: code.clone(),
            max_stack,
            max_locals,
            exception_handlers,
            constants: Arc::clone(constants),
        });
    }
    Ok(parsed)
}

fn parse_exception_handlers(
    table: &[jclassfile::attributes::ExceptionRecord],
    constant_pool: &[ConstantPool],
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();
    for entry in table {
        let catch_type = if entry.catch_type() == 0 {
            None
        } else {
            Some(
                resolve_class_name(constant_pool, entry.catch_type())
                    .context("resolve catch type")?,
            )
        };
        handlers.push(ExceptionHandler {
            start_pc: entry.start_pc() as u32,
            end_pc: entry.end_pc() as u32,
            handler_pc: entry.handler_pc() as u32,
            catch_type,
        });
    }
    Ok(handlers)
}
