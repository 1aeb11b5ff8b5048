use core::fmt;

use crate::instruction::Instruction;
use crate::op::Op;

/// Operand width selected by an optional prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Normal,
    Wide,
    ExtraWide,
}

/// Malformed bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode { offset: usize, byte: u8 },
    Truncated { offset: usize },
    /// A prefix before an opcode it does not apply to.
    BadPrefix { offset: usize, op: Op },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode 0x{byte:02x} at {offset}")
            }
            Self::Truncated { offset } => {
                write!(f, "truncated instruction at {offset}")
            }
            Self::BadPrefix { offset, op } => {
                write!(f, "width prefix not allowed before {op:?} at {offset}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a bytecode byte slice into [`Instruction`]s.
///
/// Every read is bounds checked; malformed input produces a
/// [`DecodeError`] rather than undefined behaviour, so code loaded from
/// disk can be decoded as safely as code fresh from the
/// [`BytecodeBuilder`](crate::BytecodeBuilder).
#[derive(Debug, Clone)]
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

type DResult<T> = Result<T, DecodeError>;

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Continue decoding at `offset`, e.g. after a taken jump.
    #[inline(always)]
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end-of-stream.
    pub fn decode_next(&mut self) -> Option<DResult<Instruction>> {
        if self.is_at_end() {
            return None;
        }
        let start = self.pos;
        let result = self.decode();
        if result.is_err() {
            // Park at the end so iteration stops after an error.
            self.pos = self.bytes.len();
        }
        Some(result.map_err(|e| match e {
            DecodeError::Truncated { .. } => DecodeError::Truncated { offset: start },
            other => other,
        }))
    }

    fn decode(&mut self) -> DResult<Instruction> {
        let offset = self.pos;
        let op = self.read_op()?;

        match op {
            Op::Wide => {
                let next = self.read_op()?;
                if !next.has_scalable_operands() {
                    return Err(DecodeError::BadPrefix { offset, op: next });
                }
                self.decode_op(next, Width::Wide)
            }
            Op::ExtraWide => {
                let next = self.read_op()?;
                if next != Op::LoadSmi {
                    return Err(DecodeError::BadPrefix { offset, op: next });
                }
                self.decode_op(next, Width::ExtraWide)
            }
            _ => self.decode_op(op, Width::Normal),
        }
    }

    fn decode_op(&mut self, op: Op, width: Width) -> DResult<Instruction> {
        let wide = width != Width::Normal;

        Ok(match op {
            Op::Wide | Op::ExtraWide => {
                return Err(DecodeError::BadPrefix {
                    offset: self.pos - 1,
                    op,
                });
            }

            Op::LoadConstant => Instruction::LoadConstant {
                idx: self.read_u16()?,
            },

            Op::LoadSmi => {
                let value = match width {
                    Width::Normal => self.read_u8()? as i8 as i32,
                    Width::Wide => self.read_i16()? as i32,
                    Width::ExtraWide => self.read_i32()?,
                };
                Instruction::LoadSmi { value }
            }

            Op::LoadNull => Instruction::LoadNull,
            Op::LoadTrue => Instruction::LoadTrue,
            Op::LoadFalse => Instruction::LoadFalse,
            Op::LoadThis => Instruction::LoadThis,

            Op::LoadLocal => Instruction::LoadLocal {
                reg: self.read_reg(wide)?,
            },
            Op::StoreLocal => Instruction::StoreLocal {
                reg: self.read_reg(wide)?,
            },
            Op::Mov => {
                let dst = self.read_reg(wide)?;
                let src = self.read_reg(wide)?;
                Instruction::Mov { dst, src }
            }

            Op::MakeCell => Instruction::MakeCell {
                reg: self.read_reg(wide)?,
            },
            Op::LoadCell => Instruction::LoadCell {
                reg: self.read_reg(wide)?,
            },
            Op::StoreCell => Instruction::StoreCell {
                reg: self.read_reg(wide)?,
            },
            Op::LoadCapture => Instruction::LoadCapture {
                idx: self.read_u16()?,
            },
            Op::StoreCapture => Instruction::StoreCapture {
                idx: self.read_u16()?,
            },

            Op::LoadField => Instruction::LoadField {
                name_idx: self.read_u16()?,
            },
            Op::StoreField => Instruction::StoreField {
                name_idx: self.read_u16()?,
            },
            Op::LoadStatic => {
                let class_idx = self.read_u16()?;
                let name_idx = self.read_u16()?;
                Instruction::LoadStatic {
                    class_idx,
                    name_idx,
                }
            }
            Op::StoreStatic => {
                let class_idx = self.read_u16()?;
                let name_idx = self.read_u16()?;
                Instruction::StoreStatic {
                    class_idx,
                    name_idx,
                }
            }
            Op::LoadDynamic => Instruction::LoadDynamic {
                name_idx: self.read_u16()?,
            },
            Op::StoreDynamic => Instruction::StoreDynamic {
                name_idx: self.read_u16()?,
            },
            Op::LoadClass => Instruction::LoadClass {
                name_idx: self.read_u16()?,
            },

            Op::GetProperty => Instruction::GetProperty {
                name_idx: self.read_u16()?,
            },
            Op::SafeGetProperty => Instruction::SafeGetProperty {
                name_idx: self.read_u16()?,
            },
            Op::SetProperty => {
                let name_idx = self.read_u16()?;
                let reg = self.read_reg(wide)?;
                Instruction::SetProperty { name_idx, reg }
            }
            Op::GetIndex => Instruction::GetIndex {
                reg: self.read_reg(wide)?,
            },
            Op::SetIndex => {
                let reg = self.read_reg(wide)?;
                let index_reg = self.read_reg(wide)?;
                Instruction::SetIndex { reg, index_reg }
            }

            Op::Call | Op::SafeCall => {
                let name_idx = self.read_u16()?;
                let reg = self.read_reg(wide)?;
                let argc = self.read_u8()?;
                let site = self.read_u16()?;
                if op == Op::Call {
                    Instruction::Call {
                        name_idx,
                        reg,
                        argc,
                        site,
                    }
                } else {
                    Instruction::SafeCall {
                        name_idx,
                        reg,
                        argc,
                        site,
                    }
                }
            }
            Op::New => {
                let class_idx = self.read_u16()?;
                let reg = self.read_reg(wide)?;
                let argc = self.read_u8()?;
                Instruction::New {
                    class_idx,
                    reg,
                    argc,
                }
            }

            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Le
            | Op::Gt
            | Op::Ge => Instruction::Binary {
                op,
                reg: self.read_reg(wide)?,
            },

            Op::InstanceOf => Instruction::InstanceOf {
                class_idx: self.read_u16()?,
            },
            Op::CheckCast => Instruction::CheckCast {
                class_idx: self.read_u16()?,
            },
            Op::Not => Instruction::Not,
            Op::Neg => Instruction::Neg,

            Op::MakeList => {
                let reg = self.read_reg(wide)?;
                let count = self.read_u16()?;
                Instruction::MakeList { reg, count }
            }
            Op::MakeGString => {
                let reg = self.read_reg(wide)?;
                let count = self.read_u16()?;
                Instruction::MakeGString { reg, count }
            }
            Op::MakeClosure => Instruction::MakeClosure {
                idx: self.read_u16()?,
            },

            Op::Jump => Instruction::Jump {
                offset: self.read_i16()?,
            },
            Op::JumpIfTrue => Instruction::JumpIfTrue {
                offset: self.read_i16()?,
            },
            Op::JumpIfFalse => Instruction::JumpIfFalse {
                offset: self.read_i16()?,
            },
            Op::Throw => Instruction::Throw,
            Op::Return => Instruction::Return,
        })
    }

    fn read_op(&mut self) -> DResult<Op> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        Op::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { offset, byte })
    }

    #[inline(always)]
    fn read_array<const N: usize>(&mut self) -> DResult<[u8; N]> {
        let end = self.pos + N;
        let bytes = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    #[inline(always)]
    fn read_u8(&mut self) -> DResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    #[inline(always)]
    fn read_u16(&mut self) -> DResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_i16(&mut self) -> DResult<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_i32(&mut self) -> DResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_reg(&mut self, wide: bool) -> DResult<u16> {
        if wide {
            self.read_u16()
        } else {
            self.read_u8().map(u16::from)
        }
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = DResult<Instruction>;

    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}
