use core::fmt;

use crate::op::Op;

/// A decoded instruction with all operands resolved to their widest types.
///
/// Register operands are always `u16` regardless of whether the instruction
/// was encoded in narrow or wide form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    LoadConstant {
        idx: u16,
    },
    LoadSmi {
        value: i32,
    },
    LoadNull,
    LoadTrue,
    LoadFalse,
    LoadThis,
    LoadLocal {
        reg: u16,
    },
    StoreLocal {
        reg: u16,
    },
    Mov {
        dst: u16,
        src: u16,
    },
    MakeCell {
        reg: u16,
    },
    LoadCell {
        reg: u16,
    },
    StoreCell {
        reg: u16,
    },
    LoadCapture {
        idx: u16,
    },
    StoreCapture {
        idx: u16,
    },
    LoadField {
        name_idx: u16,
    },
    StoreField {
        name_idx: u16,
    },
    LoadStatic {
        class_idx: u16,
        name_idx: u16,
    },
    StoreStatic {
        class_idx: u16,
        name_idx: u16,
    },
    LoadDynamic {
        name_idx: u16,
    },
    StoreDynamic {
        name_idx: u16,
    },
    LoadClass {
        name_idx: u16,
    },
    GetProperty {
        name_idx: u16,
    },
    SafeGetProperty {
        name_idx: u16,
    },
    SetProperty {
        name_idx: u16,
        reg: u16,
    },
    GetIndex {
        reg: u16,
    },
    SetIndex {
        reg: u16,
        index_reg: u16,
    },
    Call {
        name_idx: u16,
        reg: u16,
        argc: u8,
        site: u16,
    },
    SafeCall {
        name_idx: u16,
        reg: u16,
        argc: u8,
        site: u16,
    },
    New {
        class_idx: u16,
        reg: u16,
        argc: u8,
    },
    /// `op` is one of [`Op::BINARY`].
    Binary {
        op: Op,
        reg: u16,
    },
    InstanceOf {
        class_idx: u16,
    },
    CheckCast {
        class_idx: u16,
    },
    Not,
    Neg,
    MakeList {
        reg: u16,
        count: u16,
    },
    MakeGString {
        reg: u16,
        count: u16,
    },
    MakeClosure {
        idx: u16,
    },
    Jump {
        offset: i16,
    },
    JumpIfTrue {
        offset: i16,
    },
    JumpIfFalse {
        offset: i16,
    },
    Throw,
    Return,
}

impl Instruction {
    /// Relative offset for jump instructions.
    pub fn jump_offset(&self) -> Option<i16> {
        match self {
            Self::Jump { offset }
            | Self::JumpIfTrue { offset }
            | Self::JumpIfFalse { offset } => Some(*offset),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadConstant { idx } => write!(f, "LoadConstant #{idx}"),
            Self::LoadSmi { value } => write!(f, "LoadSmi {value}"),
            Self::LoadNull => write!(f, "LoadNull"),
            Self::LoadTrue => write!(f, "LoadTrue"),
            Self::LoadFalse => write!(f, "LoadFalse"),
            Self::LoadThis => write!(f, "LoadThis"),
            Self::LoadLocal { reg } => write!(f, "LoadLocal r{reg}"),
            Self::StoreLocal { reg } => write!(f, "StoreLocal r{reg}"),
            Self::Mov { dst, src } => write!(f, "Mov r{dst}, r{src}"),
            Self::MakeCell { reg } => write!(f, "MakeCell r{reg}"),
            Self::LoadCell { reg } => write!(f, "LoadCell r{reg}"),
            Self::StoreCell { reg } => write!(f, "StoreCell r{reg}"),
            Self::LoadCapture { idx } => write!(f, "LoadCapture ^{idx}"),
            Self::StoreCapture { idx } => write!(f, "StoreCapture ^{idx}"),
            Self::LoadField { name_idx } => write!(f, "LoadField #{name_idx}"),
            Self::StoreField { name_idx } => write!(f, "StoreField #{name_idx}"),
            Self::LoadStatic {
                class_idx,
                name_idx,
            } => write!(f, "LoadStatic #{class_idx}.#{name_idx}"),
            Self::StoreStatic {
                class_idx,
                name_idx,
            } => write!(f, "StoreStatic #{class_idx}.#{name_idx}"),
            Self::LoadDynamic { name_idx } => {
                write!(f, "LoadDynamic #{name_idx}")
            }
            Self::StoreDynamic { name_idx } => {
                write!(f, "StoreDynamic #{name_idx}")
            }
            Self::LoadClass { name_idx } => write!(f, "LoadClass #{name_idx}"),
            Self::GetProperty { name_idx } => {
                write!(f, "GetProperty #{name_idx}")
            }
            Self::SafeGetProperty { name_idx } => {
                write!(f, "SafeGetProperty #{name_idx}")
            }
            Self::SetProperty { name_idx, reg } => {
                write!(f, "SetProperty #{name_idx} r{reg}")
            }
            Self::GetIndex { reg } => write!(f, "GetIndex r{reg}"),
            Self::SetIndex { reg, index_reg } => {
                write!(f, "SetIndex r{reg}[r{index_reg}]")
            }
            Self::Call {
                name_idx,
                reg,
                argc,
                site,
            } => write!(f, "Call #{name_idx} r{reg} {argc} ~{site}"),
            Self::SafeCall {
                name_idx,
                reg,
                argc,
                site,
            } => write!(f, "SafeCall #{name_idx} r{reg} {argc} ~{site}"),
            Self::New {
                class_idx,
                reg,
                argc,
            } => write!(f, "New #{class_idx} r{reg} {argc}"),
            Self::Binary { op, reg } => write!(f, "{op:?} r{reg}"),
            Self::InstanceOf { class_idx } => {
                write!(f, "InstanceOf #{class_idx}")
            }
            Self::CheckCast { class_idx } => write!(f, "CheckCast #{class_idx}"),
            Self::Not => write!(f, "Not"),
            Self::Neg => write!(f, "Neg"),
            Self::MakeList { reg, count } => {
                write!(f, "MakeList r{reg} {count}")
            }
            Self::MakeGString { reg, count } => {
                write!(f, "MakeGString r{reg} {count}")
            }
            Self::MakeClosure { idx } => write!(f, "MakeClosure #{idx}"),
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIfTrue { offset } => write!(f, "JumpIfTrue {offset:+}"),
            Self::JumpIfFalse { offset } => write!(f, "JumpIfFalse {offset:+}"),
            Self::Throw => write!(f, "Throw"),
            Self::Return => write!(f, "Return"),
        }
    }
}
