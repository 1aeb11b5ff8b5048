/// Bytecode opcodes.
///
/// The machine has one accumulator and a frame of registers. Most
/// instructions read an operand from a register and leave their result in
/// the accumulator.
///
/// Register operands are 8-bit by default. The [`Wide`](Op::Wide) prefix
/// promotes register operands to 16-bit. Constant pool indices, call-site
/// indices, and element counts are always 16-bit; argument counts are
/// always 8-bit.
///
/// The [`ExtraWide`](Op::ExtraWide) prefix promotes operands to 32-bit.
/// Currently only used with [`LoadSmi`](Op::LoadSmi).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Prefix: the next instruction uses 16-bit register/immediate operands.
    Wide = 0x00,

    /// Prefix: the next instruction uses 32-bit operands.
    /// Currently only valid before [`LoadSmi`](Op::LoadSmi).
    ExtraWide,

    /// Load a constant pool entry into the accumulator.
    /// Operands: `idx:u16`
    LoadConstant,

    /// Load a small integer literal into the accumulator.
    /// Operands: `value:i8` (wide: `i16`, extra-wide: `i32`)
    LoadSmi,

    LoadNull,
    LoadTrue,
    LoadFalse,

    /// Load the receiver of the current method (or the owner of the
    /// current closure).
    LoadThis,

    /// Load a register into the accumulator.
    /// Operands: `reg:u8` (wide: `u16`)
    LoadLocal,

    /// Store the accumulator into a register.
    /// Operands: `reg:u8` (wide: `u16`)
    StoreLocal,

    /// Move between registers (does not touch the accumulator).
    /// Operands: `dst:u8` (wide: `u16`), `src:u8` (wide: `u16`)
    Mov,

    /// Put the accumulator into a fresh shared cell bound to a register.
    /// Used for locals that closures capture.
    /// Operands: `reg:u8` (wide: `u16`)
    MakeCell,

    /// Load the contents of the cell bound to a register.
    /// Operands: `reg:u8` (wide: `u16`)
    LoadCell,

    /// Store the accumulator into the cell bound to a register.
    /// Operands: `reg:u8` (wide: `u16`)
    StoreCell,

    /// Load captured variable `idx` of the running closure.
    /// Operands: `idx:u16`
    LoadCapture,

    /// Store the accumulator into captured variable `idx`.
    /// Operands: `idx:u16`
    StoreCapture,

    /// Load an instance field of `this`.
    /// Operands: `name_idx:u16`
    LoadField,

    /// Store the accumulator into an instance field of `this`.
    /// Operands: `name_idx:u16`
    StoreField,

    /// Load a static field.
    /// Operands: `class_idx:u16`, `name_idx:u16`
    LoadStatic,

    /// Store the accumulator into a static field.
    /// Operands: `class_idx:u16`, `name_idx:u16`
    StoreStatic,

    /// Resolve a name with no static binding at run time.
    /// Operands: `name_idx:u16`
    LoadDynamic,

    /// Assign a name with no static binding at run time.
    /// Operands: `name_idx:u16`
    StoreDynamic,

    /// Load a class object by fully qualified name.
    /// Operands: `name_idx:u16`
    LoadClass,

    /// Replace the accumulator with its property `name`.
    /// Operands: `name_idx:u16`
    GetProperty,

    /// As [`GetProperty`](Op::GetProperty), but a null receiver yields null.
    /// Operands: `name_idx:u16`
    SafeGetProperty,

    /// Set property `name` of the object in `reg` to the accumulator.
    /// Operands: `name_idx:u16`, `reg:u8` (wide: `u16`)
    SetProperty,

    /// `acc = reg[acc]`
    /// Operands: `reg:u8` (wide: `u16`)
    GetIndex,

    /// `reg[index_reg] = acc`
    /// Operands: `reg:u8` (wide: `u16`), `index_reg:u8` (wide: `u16`)
    SetIndex,

    /// Call a method by name. The receiver is in `reg`, arguments follow
    /// in `reg+1..=reg+argc`.
    /// Operands: `name_idx:u16`, `reg:u8` (wide: `u16`), `argc:u8`, `site:u16`
    Call,

    /// As [`Call`](Op::Call), but a null receiver yields null without
    /// dispatching.
    /// Operands: `name_idx:u16`, `reg:u8` (wide: `u16`), `argc:u8`, `site:u16`
    SafeCall,

    /// Instantiate a class. Arguments are in `reg..reg+argc`.
    /// Operands: `class_idx:u16`, `reg:u8` (wide: `u16`), `argc:u8`
    New,

    /// Binary operators: `acc = reg <op> acc`.
    /// Operands: `reg:u8` (wide: `u16`)
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// Operands: `class_idx:u16`
    InstanceOf,

    /// Raise `ClassCastException` unless the accumulator is null or an
    /// instance of the class.
    /// Operands: `class_idx:u16`
    CheckCast,

    Not,
    Neg,

    /// Build a list from `count` consecutive registers.
    /// Operands: `reg:u8` (wide: `u16`), `count:u16`
    MakeList,

    /// Concatenate the string forms of `count` consecutive registers.
    /// Operands: `reg:u8` (wide: `u16`), `count:u16`
    MakeGString,

    /// Instantiate closure `idx` of the current class, capturing from the
    /// current frame.
    /// Operands: `idx:u16`
    MakeClosure,

    /// Unconditional relative jump.
    /// Operands: `offset:i16` (relative to end of instruction)
    Jump,

    /// Jump if the accumulator is truthy.
    /// Operands: `offset:i16`
    JumpIfTrue,

    /// Jump if the accumulator is falsy.
    /// Operands: `offset:i16`
    JumpIfFalse,

    /// Throw the accumulator.
    Throw,

    /// Return the accumulator.
    Return,
}

impl Op {
    pub const COUNT: usize = Op::Return as usize + 1;

    /// Whether this opcode has operands affected by the `Wide` or `ExtraWide`
    /// prefix.
    pub const fn has_scalable_operands(self) -> bool {
        matches!(
            self,
            Op::LoadSmi
                | Op::LoadLocal
                | Op::StoreLocal
                | Op::Mov
                | Op::MakeCell
                | Op::LoadCell
                | Op::StoreCell
                | Op::SetProperty
                | Op::GetIndex
                | Op::SetIndex
                | Op::Call
                | Op::SafeCall
                | Op::New
                | Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Mod
                | Op::Eq
                | Op::Ne
                | Op::Lt
                | Op::Le
                | Op::Gt
                | Op::Ge
                | Op::MakeList
                | Op::MakeGString
        )
    }

    /// The binary operator opcodes, in encoding order.
    pub const BINARY: [Op; 11] = [
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Mod,
        Op::Eq,
        Op::Ne,
        Op::Lt,
        Op::Le,
        Op::Gt,
        Op::Ge,
    ];

    pub const fn is_binary(self) -> bool {
        (self as u8) >= (Op::Add as u8) && (self as u8) <= (Op::Ge as u8)
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_below_count_is_an_op() {
        for b in 0..Op::COUNT as u8 {
            let op = Op::try_from(b).unwrap();
            assert_eq!(op as u8, b);
        }
        assert_eq!(Op::try_from(Op::COUNT as u8), Err(Op::COUNT as u8));
    }

    #[test]
    fn binary_ops_are_contiguous() {
        for op in Op::BINARY {
            assert!(op.is_binary());
            assert!(op.has_scalable_operands());
        }
        assert!(!Op::InstanceOf.is_binary());
        assert!(!Op::New.is_binary());
    }
}
