use crate::error::{EvalError, EvalResult};
use crate::ir::{CallKind, Constant, MemberRef, Method};
use crate::opcodes;

/// Decoded instruction with operands resolved against the constant table.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    /// Opcode after folding `wide` and the implicit-index forms into their base opcode.
    pub opcode: u8,
    pub length: u32,
    pub operand: Operand,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    Local(u16),
    Increment { index: u16, delta: i32 },
    Immediate(i32),
    Constant(Constant),
    Branch(u32),
    TableSwitch {
        default: u32,
        low: i32,
        targets: Vec<u32>,
    },
    LookupSwitch {
        default: u32,
        pairs: Vec<(i32, u32)>,
    },
    Field(MemberRef),
    Invoke { kind: CallKind, member: MemberRef },
    /// Class name or array descriptor of `new`, `anewarray`, `checkcast` and `instanceof`.
    Type(String),
    MultiNewArray { type_name: String, dimensions: u8 },
}

impl Instruction {
    pub fn next_offset(&self) -> u32 {
        self.offset + self.length
    }

    pub fn is_subroutine_invocation(&self) -> bool {
        matches!(self.opcode, opcodes::JSR | opcodes::JSR_W)
    }

    pub fn is_subroutine_return(&self) -> bool {
        self.opcode == opcodes::RET
    }

    /// Static successors, ignoring `ret` and treating `jsr` as falling through.
    pub fn static_successors(&self) -> Vec<u32> {
        match (&self.operand, self.opcode) {
            (Operand::Branch(target), opcodes::GOTO | opcodes::GOTO_W) => vec![*target],
            (Operand::Branch(_), opcodes::JSR | opcodes::JSR_W) => vec![self.next_offset()],
            (Operand::Branch(target), _) => vec![self.next_offset(), *target],
            (Operand::TableSwitch { default, targets, .. }, _) => {
                let mut successors = vec![*default];
                successors.extend(targets.iter().copied());
                successors
            }
            (Operand::LookupSwitch { default, pairs }, _) => {
                let mut successors = vec![*default];
                successors.extend(pairs.iter().map(|(_, target)| *target));
                successors
            }
            (_, opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW | opcodes::RET) => Vec::new(),
            _ => vec![self.next_offset()],
        }
    }

    /// Branch targets named by the instruction itself.
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::TableSwitch { default, targets, .. } => {
                let mut all = vec![*default];
                all.extend(targets.iter().copied());
                all
            }
            Operand::LookupSwitch { default, pairs } => {
                let mut all = vec![*default];
                all.extend(pairs.iter().map(|(_, target)| *target));
                all
            }
            _ => Vec::new(),
        }
    }
}

/// Decodes the instruction starting at a given offset.
pub trait InstructionDecoder: Send + Sync {
    fn decode(&self, method: &Method, offset: u32) -> EvalResult<Instruction>;

    fn length(&self, method: &Method, offset: u32) -> EvalResult<u32> {
        Ok(self.decode(method, offset)?.length)
    }
}

/// Decoder for standard JVM bytecode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytecodeDecoder;

impl InstructionDecoder for BytecodeDecoder {
    fn decode(&self, method: &Method, offset: u32) -> EvalResult<Instruction> {
        let code = &method.code;
        let at = offset as usize;
        let opcode = *code.get(at).ok_or_else(|| invalid(offset, "offset past end of code"))?;
        let length = opcode_length(code, at, offset)? as u32;
        if at + length as usize > code.len() {
            return Err(invalid(offset, "instruction runs past end of code"));
        }
        let relative = |delta: i32| -> EvalResult<u32> {
            let target = offset as i64 + delta as i64;
            if target < 0 || target >= code.len() as i64 {
                return Err(invalid(offset, format!("branch target {target} out of range")));
            }
            Ok(target as u32)
        };
        let constant = |index: u16| -> EvalResult<Constant> {
            method
                .constants
                .get(index)
                .cloned()
                .ok_or_else(|| invalid(offset, format!("missing constant #{index}")))
        };

        let (opcode, operand) = match opcode {
            opcodes::BIPUSH => (opcode, Operand::Immediate(code[at + 1] as i8 as i32)),
            opcodes::SIPUSH => (opcode, Operand::Immediate(read_u16(code, at + 1, offset)? as i16 as i32)),
            opcodes::NEWARRAY => (opcode, Operand::Immediate(code[at + 1] as i32)),
            opcodes::LDC => (opcode, Operand::Constant(constant(code[at + 1] as u16)?)),
            opcodes::LDC_W | opcodes::LDC2_W => {
                (opcode, Operand::Constant(constant(read_u16(code, at + 1, offset)?)?))
            }
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
                (opcode, Operand::Local(code[at + 1] as u16))
            }
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let index = opcode - opcodes::ILOAD_0;
                (opcodes::ILOAD + index / 4, Operand::Local((index % 4) as u16))
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let index = opcode - opcodes::ISTORE_0;
                (opcodes::ISTORE + index / 4, Operand::Local((index % 4) as u16))
            }
            opcodes::IINC => (
                opcode,
                Operand::Increment {
                    index: code[at + 1] as u16,
                    delta: code[at + 2] as i8 as i32,
                },
            ),
            opcodes::WIDE => {
                let widened = code[at + 1];
                let index = read_u16(code, at + 2, offset)?;
                if widened == opcodes::IINC {
                    let delta = read_u16(code, at + 4, offset)? as i16 as i32;
                    (widened, Operand::Increment { index, delta })
                } else {
                    (widened, Operand::Local(index))
                }
            }
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                let delta = read_u16(code, at + 1, offset)? as i16 as i32;
                (opcode, Operand::Branch(relative(delta)?))
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let delta = read_i32(code, at + 1, offset)?;
                (opcode, Operand::Branch(relative(delta)?))
            }
            opcodes::TABLESWITCH => {
                let base = at + 1 + padding(at);
                let default = relative(read_i32(code, base, offset)?)?;
                let low = read_i32(code, base + 4, offset)?;
                let high = read_i32(code, base + 8, offset)?;
                let mut targets = Vec::new();
                for index in 0..=(high as i64 - low as i64) as usize {
                    targets.push(relative(read_i32(code, base + 12 + index * 4, offset)?)?);
                }
                (opcode, Operand::TableSwitch { default, low, targets })
            }
            opcodes::LOOKUPSWITCH => {
                let base = at + 1 + padding(at);
                let default = relative(read_i32(code, base, offset)?)?;
                let count = read_i32(code, base + 4, offset)? as usize;
                let mut pairs = Vec::with_capacity(count);
                for index in 0..count {
                    let key = read_i32(code, base + 8 + index * 8, offset)?;
                    let target = relative(read_i32(code, base + 12 + index * 8, offset)?)?;
                    pairs.push((key, target));
                }
                (opcode, Operand::LookupSwitch { default, pairs })
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                match constant(read_u16(code, at + 1, offset)?)? {
                    Constant::Field(field) => (opcode, Operand::Field(field)),
                    other => return Err(invalid(offset, format!("expected field ref, found {other:?}"))),
                }
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEDYNAMIC => {
                let kind = match opcode {
                    opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                    opcodes::INVOKESPECIAL => CallKind::Special,
                    opcodes::INVOKESTATIC => CallKind::Static,
                    opcodes::INVOKEINTERFACE => CallKind::Interface,
                    _ => CallKind::Dynamic,
                };
                let member = match constant(read_u16(code, at + 1, offset)?)? {
                    Constant::Method(member) | Constant::InterfaceMethod(member) => member,
                    Constant::InvokeDynamic { name, descriptor } => MemberRef {
                        owner: String::new(),
                        name,
                        descriptor,
                    },
                    other => {
                        return Err(invalid(offset, format!("expected method ref, found {other:?}")));
                    }
                };
                (opcode, Operand::Invoke { kind, member })
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                match constant(read_u16(code, at + 1, offset)?)? {
                    Constant::Class(name) => (opcode, Operand::Type(name)),
                    other => return Err(invalid(offset, format!("expected class, found {other:?}"))),
                }
            }
            opcodes::MULTIANEWARRAY => match constant(read_u16(code, at + 1, offset)?)? {
                Constant::Class(type_name) => (
                    opcode,
                    Operand::MultiNewArray {
                        type_name,
                        dimensions: code[at + 3],
                    },
                ),
                other => return Err(invalid(offset, format!("expected class, found {other:?}"))),
            },
            _ => (opcode, Operand::None),
        };

        Ok(Instruction {
            offset,
            opcode,
            length,
            operand,
        })
    }
}

fn invalid(offset: u32, reason: impl Into<String>) -> EvalError {
    EvalError::InvalidInstruction {
        offset,
        reason: reason.into(),
    }
}

fn opcode_length(code: &[u8], at: usize, offset: u32) -> EvalResult<usize> {
    let opcode = code[at];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, at, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, at, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        opcodes::ARRAYLENGTH | opcodes::ATHROW => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => 1,
        opcodes::WIDE => wide_length(code, at, offset)?,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => return Err(EvalError::UnsupportedOpcode { offset, opcode }),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], at: usize, offset: u32) -> EvalResult<usize> {
    let padding = padding(at);
    let base = at + 1 + padding;
    let low = read_i32(code, base + 4, offset)?;
    let high = read_i32(code, base + 8, offset)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .filter(|count| *count >= 0)
        .ok_or_else(|| invalid(offset, "invalid tableswitch range"))?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], at: usize, offset: u32) -> EvalResult<usize> {
    let padding = padding(at);
    let base = at + 1 + padding;
    let npairs = read_i32(code, base + 4, offset)?;
    if npairs < 0 {
        return Err(invalid(offset, "invalid lookupswitch pairs"));
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], at: usize, offset: u32) -> EvalResult<usize> {
    let opcode = code
        .get(at + 1)
        .copied()
        .ok_or_else(|| invalid(offset, "missing wide opcode"))?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(at: usize) -> usize {
    (4 - ((at + 1) % 4)) % 4
}

fn read_u16(code: &[u8], at: usize, offset: u32) -> EvalResult<u16> {
    let slice = code
        .get(at..at + 2)
        .ok_or_else(|| invalid(offset, "bytecode u16 out of bounds"))?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], at: usize, offset: u32) -> EvalResult<i32> {
    let slice = code
        .get(at..at + 4)
        .ok_or_else(|| invalid(offset, "bytecode u32 out of bounds"))?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
