use crate::op::Op;

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`], [`BytecodeBuilder::jump_if_true`],
/// and [`BytecodeBuilder::jump_if_false`]. Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "an unbound label leaves a jump to offset 0"]
pub struct Label {
    /// Position of the i16 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
}

/// Builds a bytecode byte sequence.
///
/// The builder automatically emits the [`Op::Wide`] prefix when a register
/// operand exceeds `u8::MAX`. Jumps further than an `i16` can express set
/// [`jump_overflow`](Self::jump_overflow) instead of wrapping silently.
#[derive(Debug)]
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    jump_overflow: bool,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            jump_overflow: false,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            jump_overflow: false,
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    /// Whether some jump distance did not fit in 16 bits.
    pub fn jump_overflow(&self) -> bool {
        self.jump_overflow
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    /// Returns `true` if the register needed the wide encoding.
    fn needs_wide(reg: u16) -> bool {
        reg > u8::MAX as u16
    }

    fn emit_reg(&mut self, reg: u16, wide: bool) {
        if wide {
            self.emit_u16(reg);
        } else {
            self.emit_u8(reg as u8);
        }
    }

    /// Emit `op` with a `Wide` prefix if any of `regs` needs it. Returns
    /// the chosen width.
    fn emit_scaled_op(&mut self, op: Op, regs: &[u16]) -> bool {
        let wide = regs.iter().any(|&r| Self::needs_wide(r));
        if wide {
            self.emit_op(Op::Wide);
        }
        self.emit_op(op);
        wide
    }

    fn emit_idx_op(&mut self, op: Op, idx: u16) {
        self.emit_op(op);
        self.emit_u16(idx);
    }

    fn emit_reg_op(&mut self, op: Op, reg: u16) {
        let wide = self.emit_scaled_op(op, &[reg]);
        self.emit_reg(reg, wide);
    }

    // ── loads and stores ───────────────────────────────────────────

    /// `LoadConstant <idx:u16>`: load from constant pool into accumulator.
    pub fn load_constant(&mut self, idx: u16) {
        self.emit_idx_op(Op::LoadConstant, idx);
    }

    /// `LoadSmi <value>`: load a small integer into the accumulator.
    ///
    /// Automatically selects 8-bit, 16-bit (`Wide`), or 32-bit (`ExtraWide`)
    /// encoding based on the value.
    pub fn load_smi(&mut self, value: i32) {
        if let Ok(v) = i8::try_from(value) {
            self.emit_op(Op::LoadSmi);
            self.emit_u8(v as u8);
        } else if let Ok(v) = i16::try_from(value) {
            self.emit_op(Op::Wide);
            self.emit_op(Op::LoadSmi);
            self.emit_i16(v);
        } else {
            self.emit_op(Op::ExtraWide);
            self.emit_op(Op::LoadSmi);
            self.emit_u32(value as u32);
        }
    }

    pub fn load_null(&mut self) {
        self.emit_op(Op::LoadNull);
    }

    pub fn load_bool(&mut self, value: bool) {
        self.emit_op(if value { Op::LoadTrue } else { Op::LoadFalse });
    }

    pub fn load_this(&mut self) {
        self.emit_op(Op::LoadThis);
    }

    /// `LoadLocal <reg>`: load register into accumulator.
    pub fn load_local(&mut self, reg: u16) {
        self.emit_reg_op(Op::LoadLocal, reg);
    }

    /// `StoreLocal <reg>`: store accumulator into register.
    pub fn store_local(&mut self, reg: u16) {
        self.emit_reg_op(Op::StoreLocal, reg);
    }

    /// `Mov <dst> <src>`: move between registers (accumulator untouched).
    pub fn mov(&mut self, dst: u16, src: u16) {
        let wide = self.emit_scaled_op(Op::Mov, &[dst, src]);
        self.emit_reg(dst, wide);
        self.emit_reg(src, wide);
    }

    pub fn make_cell(&mut self, reg: u16) {
        self.emit_reg_op(Op::MakeCell, reg);
    }

    pub fn load_cell(&mut self, reg: u16) {
        self.emit_reg_op(Op::LoadCell, reg);
    }

    pub fn store_cell(&mut self, reg: u16) {
        self.emit_reg_op(Op::StoreCell, reg);
    }

    pub fn load_capture(&mut self, idx: u16) {
        self.emit_idx_op(Op::LoadCapture, idx);
    }

    pub fn store_capture(&mut self, idx: u16) {
        self.emit_idx_op(Op::StoreCapture, idx);
    }

    pub fn load_field(&mut self, name_idx: u16) {
        self.emit_idx_op(Op::LoadField, name_idx);
    }

    pub fn store_field(&mut self, name_idx: u16) {
        self.emit_idx_op(Op::StoreField, name_idx);
    }

    pub fn load_static(&mut self, class_idx: u16, name_idx: u16) {
        self.emit_idx_op(Op::LoadStatic, class_idx);
        self.emit_u16(name_idx);
    }

    pub fn store_static(&mut self, class_idx: u16, name_idx: u16) {
        self.emit_idx_op(Op::StoreStatic, class_idx);
        self.emit_u16(name_idx);
    }

    pub fn load_dynamic(&mut self, name_idx: u16) {
        self.emit_idx_op(Op::LoadDynamic, name_idx);
    }

    pub fn store_dynamic(&mut self, name_idx: u16) {
        self.emit_idx_op(Op::StoreDynamic, name_idx);
    }

    pub fn load_class(&mut self, name_idx: u16) {
        self.emit_idx_op(Op::LoadClass, name_idx);
    }

    // ── properties, indexing, calls ────────────────────────────────

    pub fn get_property(&mut self, name_idx: u16, safe: bool) {
        let op = if safe { Op::SafeGetProperty } else { Op::GetProperty };
        self.emit_idx_op(op, name_idx);
    }

    /// `SetProperty <name_idx:u16> <reg>`: `reg.name = acc`.
    pub fn set_property(&mut self, name_idx: u16, reg: u16) {
        let wide = self.emit_scaled_op(Op::SetProperty, &[reg]);
        self.emit_u16(name_idx);
        self.emit_reg(reg, wide);
    }

    pub fn get_index(&mut self, reg: u16) {
        self.emit_reg_op(Op::GetIndex, reg);
    }

    pub fn set_index(&mut self, reg: u16, index_reg: u16) {
        let wide = self.emit_scaled_op(Op::SetIndex, &[reg, index_reg]);
        self.emit_reg(reg, wide);
        self.emit_reg(index_reg, wide);
    }

    /// `Call <name_idx:u16> <reg> <argc:u8> <site:u16>`.
    ///
    /// Receiver in `reg`, arguments in `reg+1..=reg+argc`.
    pub fn call(&mut self, name_idx: u16, reg: u16, argc: u8, site: u16, safe: bool) {
        let op = if safe { Op::SafeCall } else { Op::Call };
        let wide = self.emit_scaled_op(op, &[reg]);
        self.emit_u16(name_idx);
        self.emit_reg(reg, wide);
        self.emit_u8(argc);
        self.emit_u16(site);
    }

    /// `New <class_idx:u16> <reg> <argc:u8>`: arguments in `reg..reg+argc`.
    pub fn new_instance(&mut self, class_idx: u16, reg: u16, argc: u8) {
        let wide = self.emit_scaled_op(Op::New, &[reg]);
        self.emit_u16(class_idx);
        self.emit_reg(reg, wide);
        self.emit_u8(argc);
    }

    // ── operators ──────────────────────────────────────────────────

    /// Binary operator `acc = reg <op> acc`. `op` must be one of
    /// [`Op::BINARY`].
    pub fn binary(&mut self, op: Op, reg: u16) {
        debug_assert!(op.is_binary(), "{op:?} is not a binary operator");
        self.emit_reg_op(op, reg);
    }

    pub fn instance_of(&mut self, class_idx: u16) {
        self.emit_idx_op(Op::InstanceOf, class_idx);
    }

    pub fn check_cast(&mut self, class_idx: u16) {
        self.emit_idx_op(Op::CheckCast, class_idx);
    }

    pub fn not(&mut self) {
        self.emit_op(Op::Not);
    }

    pub fn neg(&mut self) {
        self.emit_op(Op::Neg);
    }

    pub fn make_list(&mut self, reg: u16, count: u16) {
        let wide = self.emit_scaled_op(Op::MakeList, &[reg]);
        self.emit_reg(reg, wide);
        self.emit_u16(count);
    }

    pub fn make_gstring(&mut self, reg: u16, count: u16) {
        let wide = self.emit_scaled_op(Op::MakeGString, &[reg]);
        self.emit_reg(reg, wide);
        self.emit_u16(count);
    }

    pub fn make_closure(&mut self, idx: u16) {
        self.emit_idx_op(Op::MakeClosure, idx);
    }

    pub fn throw(&mut self) {
        self.emit_op(Op::Throw);
    }

    pub fn return_(&mut self) {
        self.emit_op(Op::Return);
    }

    // ── control flow ───────────────────────────────────────────────

    /// Emit an unconditional forward jump. Returns a [`Label`] that must be
    /// resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        self.emit_jump_placeholder(Op::Jump)
    }

    /// Emit a conditional forward jump (truthy). Returns a [`Label`].
    pub fn jump_if_true(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfTrue)
    }

    /// Emit a conditional forward jump (falsy). Returns a [`Label`].
    pub fn jump_if_false(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfFalse)
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        let offset = self.relative(label.base, target);
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&offset.to_le_bytes());
    }

    /// Emit an unconditional backward jump to `target` (a byte offset obtained
    /// from [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, target: usize) {
        self.emit_back(Op::Jump, target);
    }

    /// Emit a conditional backward jump (truthy) to `target`.
    pub fn jump_back_if_true(&mut self, target: usize) {
        self.emit_back(Op::JumpIfTrue, target);
    }

    /// Emit a conditional backward jump (falsy) to `target`.
    pub fn jump_back_if_false(&mut self, target: usize) {
        self.emit_back(Op::JumpIfFalse, target);
    }

    fn emit_back(&mut self, op: Op, target: usize) {
        self.emit_op(op);
        let base = self.buf.len() + 2;
        let offset = self.relative(base, target);
        self.emit_i16(offset);
    }

    fn relative(&mut self, base: usize, target: usize) -> i16 {
        let delta = target as isize - base as isize;
        match i16::try_from(delta) {
            Ok(v) => v,
            Err(_) => {
                self.jump_overflow = true;
                0
            }
        }
    }

    fn emit_jump_placeholder(&mut self, op: Op) -> Label {
        self.emit_op(op);
        let offset_pos = self.buf.len();
        self.emit_i16(0); // placeholder
        let base = self.buf.len();
        Label { offset_pos, base }
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
