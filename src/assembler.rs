//! Bytecode emitter: register free-list, label table with deferred
//! back-patching, and the reversed-order static-data sink. Grounded on
//! the free-list bitset shape in
//! `registerallocation/registerallocator.rs` (bitset + first-free scan,
//! generalized here from live-range coloring to plain
//! allocate-on-demand) and on `original_source/Compiler/code-gen/Assembler.hpp`
//! for the exact mechanics: `add_static_data`'s reverse-offset precompute
//! trick and the label fix-up formula (`label_location - reference_location`,
//! generalized here from a fixed two-byte x86 displacement to the VM's
//! 4-byte relative jump operand).

use crate::vm::{Opcode, GENERAL_PURPOSE_REGISTER_COUNT};

#[derive(Debug, Clone, PartialEq)]
pub enum CodegenError {
    RegistersExhausted,
    UnboundLabel(Label),
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::RegistersExhausted => write!(f, "ran out of general purpose registers"),
            CodegenError::UnboundLabel(label) => write!(f, "label {} was never bound", label.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

struct Fixup {
    /// Byte offset of the i32 relative-jump operand within `program`.
    operand_pos: usize,
    label: Label,
}

pub struct Assembler {
    program: Vec<u8>,
    static_data: Vec<u8>,
    register_in_use: [bool; GENERAL_PURPOSE_REGISTER_COUNT],
    label_positions: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            program: Vec::new(),
            static_data: Vec::new(),
            register_in_use: [false; GENERAL_PURPOSE_REGISTER_COUNT],
            label_positions: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Finds the first unused register via a linear scan over the
    /// in-use bitset, the same "first-free" strategy as the register
    /// allocator's interference-graph coloring, simplified here to
    /// plain scalar registers with no spilling.
    pub fn alloc_register(&mut self) -> Result<u8, CodegenError> {
        for (index, in_use) in self.register_in_use.iter_mut().enumerate() {
            if !*in_use {
                *in_use = true;
                return Ok(index as u8);
            }
        }
        Err(CodegenError::RegistersExhausted)
    }

    pub fn free_register(&mut self, register: u8) {
        self.register_in_use[register as usize % GENERAL_PURPOSE_REGISTER_COUNT] = false;
    }

    pub fn position(&self) -> usize {
        self.program.len()
    }

    pub fn create_label(&mut self) -> Label {
        self.label_positions.push(None);
        Label(self.label_positions.len() - 1)
    }

    pub fn bind_label(&mut self, label: Label) {
        self.label_positions[label.0] = Some(self.program.len());
    }

    /// Reserves space for the bytes of `static_data` that live "before"
    /// what has been added so far and returns its address as a negative
    /// offset from the end of the eventual static data segment. Because
    /// every later `add_static_data` call only prepends, the distance
    /// from the end of the buffer to any given datum never changes once
    /// that datum is added, so addresses handed out here stay valid no
    /// matter how much more data is added afterward.
    pub fn add_static_data(&mut self, bytes: &[u8]) -> i64 {
        let mut prefixed = bytes.to_vec();
        prefixed.extend_from_slice(&self.static_data);
        self.static_data = prefixed;
        -(self.static_data.len() as i64)
    }

    fn push_u8(&mut self, byte: u8) {
        self.program.push(byte);
    }

    fn push_i32(&mut self, value: i32) {
        self.program.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.program.extend_from_slice(&value.to_le_bytes());
    }

    fn push_i64(&mut self, value: i64) {
        self.program.extend_from_slice(&value.to_le_bytes());
    }

    fn opcode(&mut self, op: Opcode) {
        self.push_u8(op as u8);
    }

    fn emit_jump_opcode(&mut self, op: Opcode, label: Label) {
        self.opcode(op);
        let operand_pos = self.program.len();
        match self.label_positions[label.0] {
            Some(target) => {
                let offset = target as i64 - (operand_pos as i64 + 4);
                self.push_i32(offset as i32);
            }
            None => {
                self.push_i32(0);
                self.fixups.push(Fixup { operand_pos, label });
            }
        }
    }

    pub fn emit_halt(&mut self) {
        self.opcode(Opcode::Halt);
    }

    pub fn emit_nop(&mut self) {
        self.opcode(Opcode::Nop);
    }

    pub fn emit_load_immediate(&mut self, dst: u8, value: i64) {
        self.opcode(Opcode::LoadImmediate);
        self.push_u8(dst);
        self.push_i64(value);
    }

    pub fn emit_mov_reg_reg(&mut self, dst: u8, src: u8) {
        self.opcode(Opcode::MovRegReg);
        self.push_u8(dst);
        self.push_u8(src);
    }

    fn emit_load(&mut self, op: Opcode, dst: u8, base: u8, offset: i32) {
        self.opcode(op);
        self.push_u8(dst);
        self.push_u8(base);
        self.push_i32(offset);
    }

    pub fn emit_load_u8(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadU8, dst, base, offset);
    }
    pub fn emit_load_u16(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadU16, dst, base, offset);
    }
    pub fn emit_load_u32(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadU32, dst, base, offset);
    }
    pub fn emit_load_u64(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadU64, dst, base, offset);
    }
    pub fn emit_load_i8(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadI8, dst, base, offset);
    }
    pub fn emit_load_i16(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadI16, dst, base, offset);
    }
    pub fn emit_load_i32(&mut self, dst: u8, base: u8, offset: i32) {
        self.emit_load(Opcode::LoadI32, dst, base, offset);
    }

    fn emit_store(&mut self, op: Opcode, base: u8, offset: i32, src: u8) {
        self.opcode(op);
        self.push_u8(base);
        self.push_i32(offset);
        self.push_u8(src);
    }

    pub fn emit_store_u8(&mut self, base: u8, offset: i32, src: u8) {
        self.emit_store(Opcode::StoreU8, base, offset, src);
    }
    pub fn emit_store_u16(&mut self, base: u8, offset: i32, src: u8) {
        self.emit_store(Opcode::StoreU16, base, offset, src);
    }
    pub fn emit_store_u32(&mut self, base: u8, offset: i32, src: u8) {
        self.emit_store(Opcode::StoreU32, base, offset, src);
    }
    pub fn emit_store_u64(&mut self, base: u8, offset: i32, src: u8) {
        self.emit_store(Opcode::StoreU64, base, offset, src);
    }

    pub fn emit_load_static_address(&mut self, dst: u8, offset: i64) {
        self.opcode(Opcode::LoadStaticAddress);
        self.push_u8(dst);
        self.push_i64(offset);
    }

    pub fn emit_load_frame_address(&mut self, dst: u8, offset: i32) {
        self.opcode(Opcode::LoadFrameAddress);
        self.push_u8(dst);
        self.push_i32(offset);
    }

    fn emit_binary(&mut self, op: Opcode, dst: u8, src1: u8, src2: u8) {
        self.opcode(op);
        self.push_u8(dst);
        self.push_u8(src1);
        self.push_u8(src2);
    }

    pub fn emit_add_int(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::AddInt, dst, src1, src2);
    }
    pub fn emit_sub_int(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::SubInt, dst, src1, src2);
    }
    pub fn emit_mul_int_u(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::MulIntU, dst, src1, src2);
    }
    pub fn emit_mul_int_s(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::MulIntS, dst, src1, src2);
    }
    pub fn emit_div_int_u(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::DivIntU, dst, src1, src2);
    }
    pub fn emit_div_int_s(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::DivIntS, dst, src1, src2);
    }
    pub fn emit_mod_int_u(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::ModIntU, dst, src1, src2);
    }
    pub fn emit_mod_int_s(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::ModIntS, dst, src1, src2);
    }
    pub fn emit_bit_and(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::BitAnd, dst, src1, src2);
    }
    pub fn emit_bit_or(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::BitOr, dst, src1, src2);
    }
    pub fn emit_bit_xor(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::BitXor, dst, src1, src2);
    }
    pub fn emit_shl_int(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::ShlInt, dst, src1, src2);
    }
    pub fn emit_shr_int_u(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::ShrIntU, dst, src1, src2);
    }
    pub fn emit_shr_int_s(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::ShrIntS, dst, src1, src2);
    }

    pub fn emit_add_f32(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::AddF32, dst, src1, src2);
    }
    pub fn emit_sub_f32(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::SubF32, dst, src1, src2);
    }
    pub fn emit_mul_f32(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::MulF32, dst, src1, src2);
    }
    pub fn emit_div_f32(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::DivF32, dst, src1, src2);
    }
    pub fn emit_add_f64(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::AddF64, dst, src1, src2);
    }
    pub fn emit_sub_f64(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::SubF64, dst, src1, src2);
    }
    pub fn emit_mul_f64(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::MulF64, dst, src1, src2);
    }
    pub fn emit_div_f64(&mut self, dst: u8, src1: u8, src2: u8) {
        self.emit_binary(Opcode::DivF64, dst, src1, src2);
    }

    fn emit_unary(&mut self, op: Opcode, dst: u8, src: u8) {
        self.opcode(op);
        self.push_u8(dst);
        self.push_u8(src);
    }

    pub fn emit_bit_not(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::BitNot, dst, src);
    }
    pub fn emit_neg_int(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::NegInt, dst, src);
    }
    pub fn emit_neg_f32(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::NegF32, dst, src);
    }
    pub fn emit_neg_f64(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::NegF64, dst, src);
    }
    pub fn emit_logical_not(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::LogicalNot, dst, src);
    }
    pub fn emit_int_to_f32(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::IntToF32, dst, src);
    }
    pub fn emit_int_to_f64(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::IntToF64, dst, src);
    }
    pub fn emit_f32_to_int(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::F32ToInt, dst, src);
    }
    pub fn emit_f64_to_int(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::F64ToInt, dst, src);
    }
    pub fn emit_f32_to_f64(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::F32ToF64, dst, src);
    }
    pub fn emit_f64_to_f32(&mut self, dst: u8, src: u8) {
        self.emit_unary(Opcode::F64ToF32, dst, src);
    }

    fn emit_compare(&mut self, op: Opcode, src1: u8, src2: u8) {
        self.opcode(op);
        self.push_u8(src1);
        self.push_u8(src2);
    }

    pub fn emit_compare_int_u(&mut self, src1: u8, src2: u8) {
        self.emit_compare(Opcode::CompareIntU, src1, src2);
    }
    pub fn emit_compare_int_s(&mut self, src1: u8, src2: u8) {
        self.emit_compare(Opcode::CompareIntS, src1, src2);
    }
    pub fn emit_compare_f32(&mut self, src1: u8, src2: u8) {
        self.emit_compare(Opcode::CompareF32, src1, src2);
    }
    pub fn emit_compare_f64(&mut self, src1: u8, src2: u8) {
        self.emit_compare(Opcode::CompareF64, src1, src2);
    }

    pub fn emit_jump(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::Jump, label);
    }
    pub fn emit_jump_if_equal(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::JumpIfEqual, label);
    }
    pub fn emit_jump_if_not_equal(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::JumpIfNotEqual, label);
    }
    pub fn emit_jump_if_greater(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::JumpIfGreater, label);
    }
    pub fn emit_jump_if_greater_equal(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::JumpIfGreaterEqual, label);
    }
    pub fn emit_jump_if_less(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::JumpIfLess, label);
    }
    pub fn emit_jump_if_less_equal(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::JumpIfLessEqual, label);
    }
    pub fn emit_call(&mut self, label: Label) {
        self.emit_jump_opcode(Opcode::Call, label);
    }

    pub fn emit_return(&mut self) {
        self.opcode(Opcode::Return);
    }

    pub fn emit_push(&mut self, src: u8) {
        self.opcode(Opcode::Push);
        self.push_u8(src);
    }

    pub fn emit_pop(&mut self, dst: u8) {
        self.opcode(Opcode::Pop);
        self.push_u8(dst);
    }

    pub fn emit_enter_frame(&mut self, locals_size: u32) {
        self.opcode(Opcode::EnterFrame);
        self.push_u32(locals_size);
    }

    pub fn emit_leave_frame(&mut self) {
        self.opcode(Opcode::LeaveFrame);
    }

    pub fn emit_mov_to_accumulator0(&mut self, src: u8) {
        self.opcode(Opcode::MovToAccumulator0);
        self.push_u8(src);
    }
    pub fn emit_mov_from_accumulator0(&mut self, dst: u8) {
        self.opcode(Opcode::MovFromAccumulator0);
        self.push_u8(dst);
    }
    pub fn emit_mov_to_accumulator1(&mut self, src: u8) {
        self.opcode(Opcode::MovToAccumulator1);
        self.push_u8(src);
    }
    pub fn emit_mov_from_accumulator1(&mut self, dst: u8) {
        self.opcode(Opcode::MovFromAccumulator1);
        self.push_u8(dst);
    }

    pub fn emit_syscall(&mut self, which: u8) {
        self.opcode(Opcode::SysCall);
        self.push_u8(which);
    }

    /// Patches every forward-jump fixup now that all labels are bound,
    /// then hands back the finished program and static data buffers.
    pub fn finish(mut self) -> (Vec<u8>, Vec<u8>) {
        self.try_finish().expect("unbound label reached end of codegen")
    }

    pub fn try_finish(mut self) -> Result<(Vec<u8>, Vec<u8>), CodegenError> {
        for fixup in &self.fixups {
            let target = self.label_positions[fixup.label.0]
                .ok_or(CodegenError::UnboundLabel(fixup.label))?;
            let offset = target as i64 - (fixup.operand_pos as i64 + 4);
            let bytes = (offset as i32).to_le_bytes();
            self.program[fixup.operand_pos..fixup.operand_pos + 4].copy_from_slice(&bytes);
        }
        Ok((self.program, self.static_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_allocation_recycles_freed_registers() {
        let mut asm = Assembler::new();
        let regs: Vec<u8> = (0..GENERAL_PURPOSE_REGISTER_COUNT)
            .map(|_| asm.alloc_register().unwrap())
            .collect();
        assert!(asm.alloc_register().is_err());
        asm.free_register(regs[3]);
        assert_eq!(asm.alloc_register().unwrap(), regs[3]);
    }

    #[test]
    fn static_data_addresses_survive_later_prepends() {
        let mut asm = Assembler::new();
        let addr_a = asm.add_static_data(b"hello\0");
        let addr_b = asm.add_static_data(b"world\0");
        let (_, static_data) = asm.try_finish().unwrap();

        let idx_a = static_data.len() as i64 + addr_a;
        let idx_b = static_data.len() as i64 + addr_b;
        assert_eq!(&static_data[idx_a as usize..idx_a as usize + 6], b"hello\0");
        assert_eq!(&static_data[idx_b as usize..idx_b as usize + 6], b"world\0");
    }

    #[test]
    fn forward_jump_is_patched_to_correct_offset() {
        let mut asm = Assembler::new();
        let end = asm.create_label();
        asm.emit_jump(end);
        asm.emit_nop();
        asm.bind_label(end);
        asm.emit_halt();
        let (program, _) = asm.try_finish().unwrap();

        assert_eq!(program[0], Opcode::Jump as u8);
        let offset = i32::from_le_bytes(program[1..5].try_into().unwrap());
        assert_eq!(offset, 1);
        assert_eq!(program[5], Opcode::Nop as u8);
        assert_eq!(program[6], Opcode::Halt as u8);
    }

    #[test]
    fn backward_jump_resolves_immediately() {
        let mut asm = Assembler::new();
        let top = asm.create_label();
        asm.bind_label(top);
        asm.emit_nop();
        asm.emit_jump(top);
        let (program, _) = asm.try_finish().unwrap();

        let operand_pos = 2;
        let offset = i32::from_le_bytes(program[operand_pos..operand_pos + 4].try_into().unwrap());
        assert_eq!(offset, -6);
    }
}
