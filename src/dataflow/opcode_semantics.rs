use crate::dataflow::branch::BranchUnit;
use crate::dataflow::instruction::{Instruction, Operand};
use crate::descriptor::{self, OBJECT_TYPE};
use crate::error::{EvalError, EvalResult};
use crate::frame::Frame;
use crate::invocation::InvocationUnit;
use crate::ir::{CallKind, Constant, Method};
use crate::opcodes;
use crate::value::scalar::compare_floating;
use crate::value::{
    ComputationalType, InstructionOffsets, IntegerValue, LongValue, ReferenceValue, Tristate,
    Value, ValueFactory, JoinContext,
};

/// Collaborators available while one instruction is interpreted.
pub struct InstructionContext<'a> {
    pub method: &'a Method,
    pub invocation: &'a dyn InvocationUnit,
    pub join: &'a JoinContext,
}

impl InstructionContext<'_> {
    fn factory(&self) -> &dyn ValueFactory {
        self.invocation.factory()
    }
}

/// Applies one decoded instruction to a frame, reporting successors to the branch unit.
pub trait InstructionInterpreter: Send + Sync {
    fn apply(
        &self,
        instruction: &Instruction,
        frame: &mut Frame,
        cx: &InstructionContext<'_>,
        branch: &mut BranchUnit,
    ) -> EvalResult<()>;
}

/// Interpreter for the JVM instruction set over the abstract value lattice.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpcodeInterpreter;

impl InstructionInterpreter for OpcodeInterpreter {
    fn apply(
        &self,
        instruction: &Instruction,
        frame: &mut Frame,
        cx: &InstructionContext<'_>,
        branch: &mut BranchUnit,
    ) -> EvalResult<()> {
        let opcode = instruction.opcode;
        match opcode {
            opcodes::NOP => {}
            opcodes::ACONST_NULL..=opcodes::LDC2_W => push_constant(instruction, frame, cx)?,
            opcodes::ILOAD..=opcodes::ALOAD => {
                let index = local(instruction)?;
                let value = frame.variables.load(index)?;
                check_type(&value, load_store_type(opcode - opcodes::ILOAD))?;
                frame.stack.push(value);
            }
            opcodes::IALOAD..=opcodes::SALOAD => array_load(opcode, frame, cx, branch)?,
            opcodes::ISTORE..=opcodes::ASTORE => {
                let index = local(instruction)?;
                let value = frame.stack.pop()?;
                let expected = load_store_type(opcode - opcodes::ISTORE);
                if !(opcode == opcodes::ASTORE && matches!(value, Value::ReturnAddress(_))) {
                    check_type(&value, expected)?;
                }
                frame.variables.store(index, value)?;
            }
            opcodes::IASTORE..=opcodes::SASTORE => array_store(frame, cx, branch)?,
            opcodes::POP..=opcodes::SWAP => shuffle(opcode, frame)?,
            opcodes::IADD..=opcodes::DNEG => arithmetic(opcode, frame, branch)?,
            opcodes::ISHL..=opcodes::LXOR => bitwise(opcode, frame)?,
            opcodes::IINC => {
                let Operand::Increment { index, delta } = instruction.operand else {
                    return Err(unexpected(instruction));
                };
                let value = frame.variables.load(index as usize)?.expect_int()?;
                let increment = cx.factory().integer_constant(delta);
                frame
                    .variables
                    .store(index as usize, Value::Int(value.add(increment)))?;
            }
            opcodes::I2L..=opcodes::I2S => convert(opcode, frame)?,
            opcodes::LCMP..=opcodes::DCMPG => compare(opcode, frame)?,
            opcodes::IFEQ..=opcodes::IF_ACMPNE | opcodes::IFNULL | opcodes::IFNONNULL => {
                let target = branch_target(instruction)?;
                let taken = condition(opcode, frame)?;
                branch.branch_conditionally(instruction.next_offset(), target, taken);
            }
            opcodes::GOTO | opcodes::GOTO_W => branch.branch(branch_target(instruction)?),
            opcodes::JSR | opcodes::JSR_W => {
                let return_address = InstructionOffsets::single(instruction.next_offset());
                frame.stack.push(Value::ReturnAddress(return_address));
                branch.branch(branch_target(instruction)?);
            }
            opcodes::RET => match frame.variables.load(local(instruction)?)? {
                Value::ReturnAddress(addresses) => {
                    for address in addresses.iter() {
                        branch.branch(address);
                    }
                    if addresses.is_empty() {
                        branch.exit();
                    }
                }
                other => {
                    return Err(EvalError::mismatch(format!(
                        "ret through non-address value {other}"
                    )));
                }
            },
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => switch(instruction, frame, branch)?,
            opcodes::IRETURN..=opcodes::ARETURN => {
                let value = frame.stack.pop()?;
                check_type(&value, load_store_type(opcode - opcodes::IRETURN))?;
                branch.exit();
            }
            opcodes::RETURN => branch.exit(),
            opcodes::GETSTATIC..=opcodes::PUTFIELD => field(instruction, frame, cx, branch)?,
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEDYNAMIC => {
                let Operand::Invoke { kind, member } = &instruction.operand else {
                    return Err(unexpected(instruction));
                };
                let kind = match kind {
                    CallKind::Dynamic => CallKind::Static,
                    other => *other,
                };
                cx.invocation.invoke_member(kind, member, frame)?;
            }
            opcodes::NEW => {
                let name = type_operand(instruction)?;
                let ty = descriptor::class_type(name);
                let object = cx
                    .factory()
                    .new_instance(&ty, cx.invocation.classes().get(name));
                let allocation = InstructionOffsets::single(instruction.offset);
                frame
                    .stack
                    .push(Value::Reference(ReferenceValue::traced(object, allocation)));
            }
            opcodes::NEWARRAY | opcodes::ANEWARRAY => {
                let ty = match (&instruction.operand, opcode) {
                    (Operand::Immediate(atype), opcodes::NEWARRAY) => {
                        let element = descriptor::primitive_array_element(*atype).ok_or_else(|| {
                            EvalError::InvalidInstruction {
                                offset: instruction.offset,
                                reason: format!("unknown newarray type {atype}"),
                            }
                        })?;
                        descriptor::array_of(element)
                    }
                    (Operand::Type(name), _) => descriptor::array_of(&descriptor::class_type(name)),
                    _ => return Err(unexpected(instruction)),
                };
                let length = frame.stack.pop()?.expect_int()?;
                new_array(&ty, &[length], frame, cx, branch);
            }
            opcodes::MULTIANEWARRAY => {
                let Operand::MultiNewArray { type_name, dimensions } = &instruction.operand else {
                    return Err(unexpected(instruction));
                };
                let mut lengths = Vec::with_capacity(*dimensions as usize);
                for _ in 0..*dimensions {
                    lengths.push(frame.stack.pop()?.expect_int()?);
                }
                lengths.reverse();
                new_array(type_name, &lengths, frame, cx, branch);
            }
            opcodes::ARRAYLENGTH => {
                let array = frame.stack.pop()?.expect_reference()?;
                if array.is_null() == Tristate::Always {
                    branch.exit();
                    return Ok(());
                }
                let length = array
                    .array_length()
                    .unwrap_or_else(|| cx.factory().integer_range(0, i32::MAX));
                frame.stack.push(Value::Int(length));
            }
            opcodes::ATHROW => {
                frame.stack.pop()?.expect_reference()?;
                branch.exit();
            }
            opcodes::CHECKCAST => {
                let ty = descriptor::class_type(type_operand(instruction)?);
                let reference = frame.stack.pop()?.expect_reference()?;
                if reference.instance_of(&ty, cx.join) == Tristate::Never
                    && reference.is_null() == Tristate::Never
                {
                    branch.exit();
                    return Ok(());
                }
                frame.stack.push(Value::Reference(reference.cast(&ty, cx.join)?));
            }
            opcodes::INSTANCEOF => {
                let ty = descriptor::class_type(type_operand(instruction)?);
                let reference = frame.stack.pop()?.expect_reference()?;
                let result = match reference.instance_of(&ty, cx.join) {
                    Tristate::Always => cx.factory().integer_constant(1),
                    Tristate::Never => cx.factory().integer_constant(0),
                    Tristate::Maybe => cx.factory().integer_range(0, 1),
                };
                frame.stack.push(Value::Int(result));
            }
            opcodes::MONITORENTER | opcodes::MONITOREXIT => {
                frame.stack.pop()?.expect_reference()?;
            }
            _ => {
                return Err(EvalError::UnsupportedOpcode {
                    offset: instruction.offset,
                    opcode,
                });
            }
        }
        Ok(())
    }
}

fn unexpected(instruction: &Instruction) -> EvalError {
    EvalError::InvalidInstruction {
        offset: instruction.offset,
        reason: format!(
            "operand {:?} does not fit opcode 0x{:02x}",
            instruction.operand, instruction.opcode
        ),
    }
}

fn local(instruction: &Instruction) -> EvalResult<usize> {
    match instruction.operand {
        Operand::Local(index) => Ok(index as usize),
        _ => Err(unexpected(instruction)),
    }
}

fn branch_target(instruction: &Instruction) -> EvalResult<u32> {
    match instruction.operand {
        Operand::Branch(target) => Ok(target),
        _ => Err(unexpected(instruction)),
    }
}

fn type_operand(instruction: &Instruction) -> EvalResult<&str> {
    match &instruction.operand {
        Operand::Type(name) => Ok(name),
        _ => Err(unexpected(instruction)),
    }
}

/// Type handled by the `i`, `l`, `f`, `d` and `a` members of a load, store or return group.
fn load_store_type(index: u8) -> ComputationalType {
    match index {
        0 => ComputationalType::Int,
        1 => ComputationalType::Long,
        2 => ComputationalType::Float,
        3 => ComputationalType::Double,
        _ => ComputationalType::Reference,
    }
}

fn check_type(value: &Value, expected: ComputationalType) -> EvalResult<()> {
    if value.computational_type() == expected {
        Ok(())
    } else {
        Err(EvalError::mismatch(format!("expected {expected:?}, found {value}")))
    }
}

/// Runtime faults that end the current path instead of failing the evaluation.
fn exits_on_fault<T>(result: EvalResult<T>, branch: &mut BranchUnit) -> EvalResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EvalError::ArithmeticFault(_) | EvalError::ArrayIndexOutOfBounds { .. }) => {
            branch.exit();
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn push_constant(instruction: &Instruction, frame: &mut Frame, cx: &InstructionContext<'_>) -> EvalResult<()> {
    let factory = cx.factory();
    let opcode = instruction.opcode;
    let value = match opcode {
        opcodes::ACONST_NULL => Value::Reference(factory.null_reference()),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Value::Int(factory.integer_constant(opcode as i32 - 0x03))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => {
            Value::Long(factory.long_constant((opcode - opcodes::LCONST_0) as i64))
        }
        opcodes::FCONST_0..=opcodes::FCONST_2 => {
            Value::Float(factory.float_constant((opcode - opcodes::FCONST_0) as f32))
        }
        opcodes::DCONST_0 | opcodes::DCONST_1 => {
            Value::Double(factory.double_constant((opcode - opcodes::DCONST_0) as f64))
        }
        opcodes::BIPUSH | opcodes::SIPUSH => match instruction.operand {
            Operand::Immediate(value) => Value::Int(factory.integer_constant(value)),
            _ => return Err(unexpected(instruction)),
        },
        _ => {
            let Operand::Constant(constant) = &instruction.operand else {
                return Err(unexpected(instruction));
            };
            let classes = cx.invocation.classes();
            match constant {
                Constant::Integer(value) => Value::Int(factory.integer_constant(*value)),
                Constant::Float(value) => Value::Float(factory.float_constant(*value)),
                Constant::Long(value) => Value::Long(factory.long_constant(*value)),
                Constant::Double(value) => Value::Double(factory.double_constant(*value)),
                Constant::String(text) => Value::Reference(
                    factory.string_constant(text, classes.get("java/lang/String")),
                ),
                Constant::Class(name) => Value::Reference(
                    factory.class_constant(name, classes.get("java/lang/Class")),
                ),
                Constant::MethodType(_) => Value::Reference(factory.reference_value(
                    "Ljava/lang/invoke/MethodType;",
                    classes.get("java/lang/invoke/MethodType"),
                    false,
                    false,
                )),
                Constant::MethodHandle => Value::Reference(factory.reference_value(
                    "Ljava/lang/invoke/MethodHandle;",
                    classes.get("java/lang/invoke/MethodHandle"),
                    true,
                    false,
                )),
                _ => return Err(unexpected(instruction)),
            }
        }
    };
    frame.stack.push(value);
    Ok(())
}

/// Element type a typed array load yields when the array's own type is unknown.
fn array_element_type(opcode: u8) -> &'static str {
    match opcode {
        opcodes::IALOAD => "I",
        opcodes::LALOAD => "J",
        opcodes::FALOAD => "F",
        opcodes::DALOAD => "D",
        opcodes::BALOAD => "B",
        opcodes::CALOAD => "C",
        opcodes::SALOAD => "S",
        _ => OBJECT_TYPE,
    }
}

fn array_load(
    opcode: u8,
    frame: &mut Frame,
    cx: &InstructionContext<'_>,
    branch: &mut BranchUnit,
) -> EvalResult<()> {
    let index = frame.stack.pop()?.expect_int()?;
    let array = frame.stack.pop()?.expect_reference()?;
    if array.is_null() == Tristate::Always {
        branch.exit();
        return Ok(());
    }
    let Some(element) = exits_on_fault(array.array_load(index), branch)? else {
        return Ok(());
    };
    let value = match element {
        Some(value) => value,
        None => {
            let ty = array
                .type_name()
                .and_then(descriptor::element_type)
                .filter(|ty| opcode == opcodes::AALOAD || !descriptor::is_reference(ty))
                .unwrap_or_else(|| array_element_type(opcode))
                .to_string();
            let class = cx.invocation.classes().class_of_type(&ty);
            cx.factory().create_value(&ty, class, true, true)
        }
    };
    frame.stack.push(value);
    Ok(())
}

fn array_store(frame: &mut Frame, cx: &InstructionContext<'_>, branch: &mut BranchUnit) -> EvalResult<()> {
    let value = match frame.stack.pop()? {
        Value::Reference(reference) => {
            frame.release_escaped(&reference);
            Value::Reference(reference.escaped().unwrap_or(reference))
        }
        other => other,
    };
    let index = frame.stack.pop()?.expect_int()?;
    let array = frame.stack.pop()?.expect_reference()?;
    if array.is_null() == Tristate::Always {
        branch.exit();
        return Ok(());
    }
    let Some(updated) = exits_on_fault(array.array_store(index, &value, cx.join), branch)? else {
        return Ok(());
    };
    if let (Some(updated), Some(id)) = (updated, array.id()) {
        frame.replace_references(id, &updated);
    }
    Ok(())
}

fn new_array(
    ty: &str,
    lengths: &[IntegerValue],
    frame: &mut Frame,
    cx: &InstructionContext<'_>,
    branch: &mut BranchUnit,
) {
    if lengths
        .iter()
        .any(|length| matches!(length, IntegerValue::Particular(count) if *count < 0))
    {
        branch.exit();
        return;
    }
    let length = lengths.first().copied().unwrap_or(IntegerValue::Unknown);
    let array = cx.factory().array_value(ty, None, length);
    frame.stack.push(Value::Reference(array));
}

fn shuffle(opcode: u8, frame: &mut Frame) -> EvalResult<()> {
    let stack = &mut frame.stack;
    match opcode {
        opcodes::POP => {
            stack.pop_slot()?;
        }
        opcodes::POP2 => {
            stack.pop_slot()?;
            stack.pop_slot()?;
        }
        opcodes::DUP => {
            let top = stack.peek(0)?.clone();
            stack.push_slot(top);
        }
        opcodes::DUP_X1 => {
            let v1 = stack.pop_slot()?;
            let v2 = stack.pop_slot()?;
            for value in [v1.clone(), v2, v1] {
                stack.push_slot(value);
            }
        }
        opcodes::DUP_X2 => {
            let v1 = stack.pop_slot()?;
            let v2 = stack.pop_slot()?;
            let v3 = stack.pop_slot()?;
            for value in [v1.clone(), v3, v2, v1] {
                stack.push_slot(value);
            }
        }
        opcodes::DUP2 => {
            let v1 = stack.peek(0)?.clone();
            let v2 = stack.peek(1)?.clone();
            stack.push_slot(v2);
            stack.push_slot(v1);
        }
        opcodes::DUP2_X1 => {
            let v1 = stack.pop_slot()?;
            let v2 = stack.pop_slot()?;
            let v3 = stack.pop_slot()?;
            for value in [v2.clone(), v1.clone(), v3, v2, v1] {
                stack.push_slot(value);
            }
        }
        opcodes::DUP2_X2 => {
            let v1 = stack.pop_slot()?;
            let v2 = stack.pop_slot()?;
            let v3 = stack.pop_slot()?;
            let v4 = stack.pop_slot()?;
            for value in [v2.clone(), v1.clone(), v4, v3, v2, v1] {
                stack.push_slot(value);
            }
        }
        _ => {
            let v1 = stack.pop_slot()?;
            let v2 = stack.pop_slot()?;
            stack.push_slot(v1);
            stack.push_slot(v2);
        }
    }
    Ok(())
}

/// `add` through `neg` for all four numeric types, laid out as operation-major groups of four.
fn arithmetic(opcode: u8, frame: &mut Frame, branch: &mut BranchUnit) -> EvalResult<()> {
    let group = opcode - opcodes::IADD;
    let operation = group / 4;
    let is_negation = operation == 5;
    let stack = &mut frame.stack;
    let result = match group % 4 {
        0 => {
            let right = if is_negation { None } else { Some(stack.pop()?.expect_int()?) };
            let left = stack.pop()?.expect_int()?;
            let result = match (operation, right) {
                (0, Some(right)) => Ok(left.add(right)),
                (1, Some(right)) => Ok(left.sub(right)),
                (2, Some(right)) => Ok(left.mul(right)),
                (3, Some(right)) => left.div(right),
                (4, Some(right)) => left.rem(right),
                _ => Ok(left.neg()),
            };
            exits_on_fault(result, branch)?.map(Value::Int)
        }
        1 => {
            let right = if is_negation { None } else { Some(stack.pop()?.expect_long()?) };
            let left = stack.pop()?.expect_long()?;
            let result = match (operation, right) {
                (0, Some(right)) => Ok(left.binary(right, i64::wrapping_add)),
                (1, Some(right)) => Ok(left.sub(right)),
                (2, Some(right)) => Ok(left.binary(right, i64::wrapping_mul)),
                (3, Some(right)) => left.div(right),
                (4, Some(right)) => left.rem(right),
                _ => Ok(left.unary(i64::wrapping_neg)),
            };
            exits_on_fault(result, branch)?.map(Value::Long)
        }
        2 => {
            let right = if is_negation { None } else { Some(stack.pop()?.expect_float()?) };
            let left = stack.pop()?.expect_float()?;
            Some(Value::Float(match (operation, right) {
                (0, Some(right)) => left.binary(right, |a, b| a + b),
                (1, Some(right)) => left.binary(right, |a, b| a - b),
                (2, Some(right)) => left.binary(right, |a, b| a * b),
                (3, Some(right)) => left.binary(right, |a, b| a / b),
                (4, Some(right)) => left.binary(right, |a, b| a % b),
                _ => left.unary(|a| -a),
            }))
        }
        _ => {
            let right = if is_negation { None } else { Some(stack.pop()?.expect_double()?) };
            let left = stack.pop()?.expect_double()?;
            Some(Value::Double(match (operation, right) {
                (0, Some(right)) => left.binary(right, |a, b| a + b),
                (1, Some(right)) => left.binary(right, |a, b| a - b),
                (2, Some(right)) => left.binary(right, |a, b| a * b),
                (3, Some(right)) => left.binary(right, |a, b| a / b),
                (4, Some(right)) => left.binary(right, |a, b| a % b),
                _ => left.unary(|a| -a),
            }))
        }
    };
    if let Some(value) = result {
        stack.push(value);
    }
    Ok(())
}

fn bitwise(opcode: u8, frame: &mut Frame) -> EvalResult<()> {
    let stack = &mut frame.stack;
    let is_long = (opcode - opcodes::ISHL) % 2 == 1;
    let is_shift = opcode <= opcodes::LUSHR;
    let value = if is_shift {
        let amount = stack.pop()?.expect_int()?;
        if is_long {
            let value = stack.pop()?.expect_long()?;
            Value::Long(match opcode {
                opcodes::LSHL => value.shift(amount, i64::wrapping_shl),
                opcodes::LSHR => value.shift(amount, i64::wrapping_shr),
                _ => value.shift(amount, |a, b| ((a as u64) >> b) as i64),
            })
        } else {
            let value = stack.pop()?.expect_int()?;
            Value::Int(match opcode {
                opcodes::ISHL => value.shl(amount),
                opcodes::ISHR => value.shr(amount),
                _ => value.ushr(amount),
            })
        }
    } else if is_long {
        let right = stack.pop()?.expect_long()?;
        let left = stack.pop()?.expect_long()?;
        Value::Long(match opcode {
            opcodes::LAND => left.binary(right, |a, b| a & b),
            opcodes::LOR => left.binary(right, |a, b| a | b),
            _ => long_xor(left, right),
        })
    } else {
        let right = stack.pop()?.expect_int()?;
        let left = stack.pop()?.expect_int()?;
        Value::Int(match opcode {
            opcodes::IAND => left.and(right),
            opcodes::IOR => left.or(right),
            _ => left.xor(right),
        })
    };
    stack.push(value);
    Ok(())
}

fn long_xor(left: LongValue, right: LongValue) -> LongValue {
    match (left, right) {
        (LongValue::Identified(a), LongValue::Identified(b)) if a == b => LongValue::Particular(0),
        _ => left.binary(right, |a, b| a ^ b),
    }
}

fn convert(opcode: u8, frame: &mut Frame) -> EvalResult<()> {
    let stack = &mut frame.stack;
    let value = match opcode {
        opcodes::I2L => Value::Long(stack.pop()?.expect_int()?.to_long()),
        opcodes::I2F => Value::Float(stack.pop()?.expect_int()?.to_float()),
        opcodes::I2D => Value::Double(stack.pop()?.expect_int()?.to_double()),
        opcodes::L2I => Value::Int(stack.pop()?.expect_long()?.to_int(|v| v as i32)),
        opcodes::L2F => Value::Float(stack.pop()?.expect_long()?.convert(|v| v as f32)),
        opcodes::L2D => Value::Double(stack.pop()?.expect_long()?.convert(|v| v as f64)),
        opcodes::F2I => Value::Int(stack.pop()?.expect_float()?.to_int(|v| v as i32)),
        opcodes::F2L => Value::Long(stack.pop()?.expect_float()?.convert(|v| v as i64)),
        opcodes::F2D => Value::Double(stack.pop()?.expect_float()?.convert(f64::from)),
        opcodes::D2I => Value::Int(stack.pop()?.expect_double()?.to_int(|v| v as i32)),
        opcodes::D2L => Value::Long(stack.pop()?.expect_double()?.convert(|v| v as i64)),
        opcodes::D2F => Value::Float(stack.pop()?.expect_double()?.convert(|v| v as f32)),
        opcodes::I2B => Value::Int(stack.pop()?.expect_int()?.to_byte()),
        opcodes::I2C => Value::Int(stack.pop()?.expect_int()?.to_char()),
        _ => Value::Int(stack.pop()?.expect_int()?.to_short()),
    };
    stack.push(value);
    Ok(())
}

fn compare(opcode: u8, frame: &mut Frame) -> EvalResult<()> {
    let stack = &mut frame.stack;
    let result = match opcode {
        opcodes::LCMP => {
            let right = stack.pop()?.expect_long()?;
            stack.pop()?.expect_long()?.compare(right)
        }
        opcodes::FCMPL | opcodes::FCMPG => {
            let right = stack.pop()?.expect_float()?;
            let left = stack.pop()?.expect_float()?;
            compare_floating(left, right, if opcode == opcodes::FCMPL { -1 } else { 1 })
        }
        _ => {
            let right = stack.pop()?.expect_double()?;
            let left = stack.pop()?.expect_double()?;
            compare_floating(left, right, if opcode == opcodes::DCMPL { -1 } else { 1 })
        }
    };
    stack.push(Value::Int(result));
    Ok(())
}

fn condition(opcode: u8, frame: &mut Frame) -> EvalResult<Tristate> {
    let stack = &mut frame.stack;
    let zero = IntegerValue::Particular(0);
    let taken = match opcode {
        opcodes::IFEQ..=opcodes::IFLE => {
            let value = stack.pop()?.expect_int()?;
            match opcode {
                opcodes::IFEQ => value.equal(zero),
                opcodes::IFNE => value.equal(zero).not(),
                opcodes::IFLT => value.less_than(zero),
                opcodes::IFGE => value.less_than(zero).not(),
                opcodes::IFGT => zero.less_than(value),
                _ => value.less_or_equal(zero),
            }
        }
        opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => {
            let right = stack.pop()?.expect_int()?;
            let left = stack.pop()?.expect_int()?;
            match opcode {
                opcodes::IF_ICMPEQ => left.equal(right),
                opcodes::IF_ICMPNE => left.equal(right).not(),
                opcodes::IF_ICMPLT => left.less_than(right),
                opcodes::IF_ICMPGE => left.less_than(right).not(),
                opcodes::IF_ICMPGT => right.less_than(left),
                _ => left.less_or_equal(right),
            }
        }
        opcodes::IF_ACMPEQ | opcodes::IF_ACMPNE => {
            let right = stack.pop()?.expect_reference()?;
            let left = stack.pop()?.expect_reference()?;
            let equal = left.equal(&right);
            if opcode == opcodes::IF_ACMPEQ { equal } else { equal.not() }
        }
        _ => {
            let is_null = stack.pop()?.expect_reference()?.is_null();
            if opcode == opcodes::IFNULL { is_null } else { is_null.not() }
        }
    };
    Ok(taken)
}

fn switch(instruction: &Instruction, frame: &mut Frame, branch: &mut BranchUnit) -> EvalResult<()> {
    let key = frame.stack.pop()?.expect_int()?;
    let (default, cases): (u32, Vec<(i32, u32)>) = match &instruction.operand {
        Operand::TableSwitch { default, low, targets } => (
            *default,
            targets
                .iter()
                .enumerate()
                .map(|(index, target)| (low.wrapping_add(index as i32), *target))
                .collect(),
        ),
        Operand::LookupSwitch { default, pairs } => (*default, pairs.clone()),
        _ => return Err(unexpected(instruction)),
    };
    match key {
        IntegerValue::Particular(key) if !branch.is_full_code() => {
            let target = cases
                .iter()
                .find(|(case, _)| *case == key)
                .map_or(default, |(_, target)| *target);
            branch.branch(target);
        }
        _ => {
            let (min, max) = match key {
                IntegerValue::Range { min, max } => (min, max),
                _ => (i32::MIN, i32::MAX),
            };
            let mut covered = 0i64;
            for (case, target) in &cases {
                if branch.is_full_code() || (min..=max).contains(case) {
                    branch.branch(*target);
                    covered += 1;
                }
            }
            if branch.is_full_code() || covered < max as i64 - min as i64 + 1 {
                branch.branch(default);
            }
        }
    }
    Ok(())
}

fn field(
    instruction: &Instruction,
    frame: &mut Frame,
    cx: &InstructionContext<'_>,
    branch: &mut BranchUnit,
) -> EvalResult<()> {
    let Operand::Field(field) = &instruction.operand else {
        return Err(unexpected(instruction));
    };
    match instruction.opcode {
        opcodes::GETSTATIC => frame.stack.push(cx.invocation.field_value(field)?),
        opcodes::PUTSTATIC => {
            let value = frame.stack.pop()?;
            cx.invocation.put_field(field, &value, frame)?;
        }
        opcodes::GETFIELD => {
            let object = frame.stack.pop()?.expect_reference()?;
            if object.is_null() == Tristate::Always {
                branch.exit();
                return Ok(());
            }
            frame.stack.push(cx.invocation.field_value(field)?);
        }
        _ => {
            let value = frame.stack.pop()?;
            let object = frame.stack.pop()?.expect_reference()?;
            if object.is_null() == Tristate::Always {
                branch.exit();
                return Ok(());
            }
            cx.invocation.put_field(field, &value, frame)?;
        }
    }
    Ok(())
}
