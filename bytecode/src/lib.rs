mod builder;
pub mod builtins;
mod code;
mod decoder;
mod instruction;
mod op;
pub mod source_map;

pub use builder::{BytecodeBuilder, Label};
pub use code::{
    CaptureFrom, ClosureDesc, CodeDesc, Constant, FieldDesc, GeneratedClass,
    Handler, MethodDesc, ParamDesc,
};
pub use decoder::{BytecodeDecoder, DecodeError};
pub use instruction::Instruction;
pub use op::Op;
pub use source_map::SourceMapBuilder;

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .collect::<Result<_, _>>()
            .expect("well-formed bytecode")
    }

    #[test]
    fn narrow_instructions() {
        let mut b = BytecodeBuilder::new();
        b.load_constant(42);
        b.load_local(5);
        b.store_local(10);
        b.call(100, 3, 2, 7, false);
        b.call(101, 4, 0, 8, true);
        b.new_instance(9, 1, 2);
        b.make_closure(2);
        b.load_static(3, 4);
        b.set_property(6, 2);
        b.set_index(1, 2);
        b.binary(Op::Lt, 3);
        b.make_list(4, 3);
        b.load_bool(true);
        b.load_null();
        b.throw();
        b.return_();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadConstant { idx: 42 },
            Instruction::LoadLocal { reg: 5 },
            Instruction::StoreLocal { reg: 10 },
            Instruction::Call { name_idx: 100, reg: 3, argc: 2, site: 7 },
            Instruction::SafeCall { name_idx: 101, reg: 4, argc: 0, site: 8 },
            Instruction::New { class_idx: 9, reg: 1, argc: 2 },
            Instruction::MakeClosure { idx: 2 },
            Instruction::LoadStatic { class_idx: 3, name_idx: 4 },
            Instruction::SetProperty { name_idx: 6, reg: 2 },
            Instruction::SetIndex { reg: 1, index_reg: 2 },
            Instruction::Binary { op: Op::Lt, reg: 3 },
            Instruction::MakeList { reg: 4, count: 3 },
            Instruction::LoadTrue,
            Instruction::LoadNull,
            Instruction::Throw,
            Instruction::Return,
        ]);
    }

    #[test]
    fn wide_registers() {
        let mut b = BytecodeBuilder::new();
        b.load_local(300);
        b.store_cell(1000);
        b.call(1, 500, 4, 2, false);
        b.set_index(2, 400);
        b.binary(Op::Add, 256);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadLocal { reg: 300 },
            Instruction::StoreCell { reg: 1000 },
            Instruction::Call { name_idx: 1, reg: 500, argc: 4, site: 2 },
            Instruction::SetIndex { reg: 2, index_reg: 400 },
            Instruction::Binary { op: Op::Add, reg: 256 },
        ]);
    }

    #[test]
    fn forward_jump() {
        let mut b = BytecodeBuilder::new();
        b.load_constant(0);
        let label = b.jump_if_false();
        b.load_constant(1);
        b.bind(label);
        b.return_();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadConstant { idx: 0 },
            Instruction::JumpIfFalse { offset: 3 },
            Instruction::LoadConstant { idx: 1 },
            Instruction::Return,
        ]);
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        let loop_top = b.current_offset();
        b.load_local(0);
        b.jump_back(loop_top);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadLocal { reg: 0 },
            Instruction::Jump { offset: -5 },
        ]);
    }

    #[test]
    fn jump_overflow_is_reported() {
        let mut b = BytecodeBuilder::new();
        let label = b.jump();
        for _ in 0..20_000 {
            b.load_null();
            b.load_this();
        }
        assert!(!b.jump_overflow());
        b.bind(label);
        assert!(b.jump_overflow());
    }

    #[test]
    fn display_instructions() {
        assert_eq!(
            Instruction::Call { name_idx: 5, reg: 3, argc: 2, site: 10 }.to_string(),
            "Call #5 r3 2 ~10"
        );
        assert_eq!(Instruction::Jump { offset: -7 }.to_string(), "Jump -7");
        assert_eq!(Instruction::Binary { op: Op::Mul, reg: 2 }.to_string(), "Mul r2");
        assert_eq!(Instruction::LoadCapture { idx: 1 }.to_string(), "LoadCapture ^1");
        assert_eq!(
            Instruction::SetIndex { reg: 1, index_reg: 4 }.to_string(),
            "SetIndex r1[r4]"
        );
    }

    #[test]
    fn mov_sizes() {
        let mut b = BytecodeBuilder::new();
        b.mov(1, 2);
        assert_eq!(b.as_bytes().len(), 3);

        let mut b = BytecodeBuilder::new();
        b.mov(256, 2);
        assert_eq!(b.as_bytes().len(), 6);
        assert_eq!(decode_all(b.as_bytes()), vec![Instruction::Mov { dst: 256, src: 2 }]);
    }

    #[test]
    fn load_smi_widths() {
        let mut b = BytecodeBuilder::new();
        b.load_smi(-128);
        b.load_smi(1000);
        b.load_smi(i32::MIN);
        let bytes = b.into_bytes();
        assert_eq!(bytes.len(), 2 + 4 + 6);
        assert_eq!(bytes[2], Op::Wide as u8);
        assert_eq!(bytes[6], Op::ExtraWide as u8);

        assert_eq!(decode_all(&bytes), vec![
            Instruction::LoadSmi { value: -128 },
            Instruction::LoadSmi { value: 1000 },
            Instruction::LoadSmi { value: i32::MIN },
        ]);
    }

    #[test]
    fn narrow_has_no_wide_prefix() {
        let mut b = BytecodeBuilder::new();
        b.load_local(255);
        let bytes = b.into_bytes();
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0], Op::LoadLocal as u8);
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let bytes = [Op::LoadNull as u8, 0xFF];
        let mut decoder = BytecodeDecoder::new(&bytes);
        assert_eq!(decoder.next(), Some(Ok(Instruction::LoadNull)));
        assert_eq!(
            decoder.next(),
            Some(Err(DecodeError::UnknownOpcode { offset: 1, byte: 0xFF }))
        );
        assert_eq!(decoder.next(), None);
    }

    #[test]
    fn truncated_operand_is_an_error() {
        let mut b = BytecodeBuilder::new();
        b.load_null();
        b.call(1, 2, 3, 4, false);
        let mut bytes = b.into_bytes();
        bytes.pop();
        let results: Vec<_> = BytecodeDecoder::new(&bytes).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Err(DecodeError::Truncated { offset: 1 }));
    }

    #[test]
    fn prefix_rules_are_enforced() {
        let bytes = [Op::Wide as u8, Op::Return as u8];
        assert!(matches!(
            BytecodeDecoder::new(&bytes).next(),
            Some(Err(DecodeError::BadPrefix { op: Op::Return, .. }))
        ));
        let bytes = [Op::ExtraWide as u8, Op::LoadLocal as u8, 0, 0, 0, 0];
        assert!(matches!(
            BytecodeDecoder::new(&bytes).next(),
            Some(Err(DecodeError::BadPrefix { op: Op::LoadLocal, .. }))
        ));
    }

    #[test]
    fn seek_resumes_at_offset() {
        let mut b = BytecodeBuilder::new();
        b.load_smi(1);
        let second = b.current_offset();
        b.load_smi(2);
        let bytes = b.into_bytes();
        let mut decoder = BytecodeDecoder::new(&bytes);
        decoder.seek(second);
        assert_eq!(decoder.next(), Some(Ok(Instruction::LoadSmi { value: 2 })));
        assert!(decoder.is_at_end());
    }
}
