//! AST-to-bytecode lowering. Three visitor shapes, grounded on the
//! per-AST-node-kind match-arm dispatch in the teacher's
//! `codegenerator.rs` (which drove the same assembler/instruction split,
//! only emitting TAC rather than bytecode directly):
//!
//! - `gen_statement` ("code_gen"): statements, no resulting value.
//! - `gen_value` ("get_value"): expressions, evaluated into a register.
//! - `gen_place`/`materialize_place` ("store"): assignable locations,
//!   returned as a `{base register, constant offset}` pair so a
//!   contiguous chain of field/array accesses can fold into a single
//!   final `Load*`/`Store*` instead of re-materializing an address at
//!   every step.
//!
//! Locals and parameters are addressed frame-relative (`LoadFrameAddress`
//! + a compile-time offset); globals get a fixed low-memory address
//! computed once up front. Aggregates (classes, fixed-size arrays) never
//! live in a register: an expression of aggregate type evaluates to its
//! *address*, the same decay C gives arrays, so `Member`/`Index` chains
//! on them just keep folding offsets into one `Place` until a pointer
//! boundary (`MemberArrow`, a runtime array index, `Deref`) forces the
//! address to be materialized into a register.

use crate::assembler::{Assembler, CodegenError as AssemblerError, Label};
use crate::ast::{Ast, NodeIndex, Tag, NULL_NODE};
use crate::debugsymbols::{DebugSymbols, FunctionSymbol};
use crate::typechecker::ClassInfo;
use crate::types::{BuiltinType, Type};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum GenError {
    Assembler(AssemblerError),
    MissingEntryPoint,
    UndefinedSymbol(String),
    UndefinedField(String),
    UnknownClass(u32),
    NotAnLvalue(String),
    InvalidOperation(String),
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::Assembler(err) => write!(f, "{err}"),
            GenError::MissingEntryPoint => write!(f, "no 'main' function was declared"),
            GenError::UndefinedSymbol(name) => write!(f, "undefined symbol '{name}'"),
            GenError::UndefinedField(name) => write!(f, "undefined field '{name}'"),
            GenError::UnknownClass(id) => write!(f, "unknown class id {id}"),
            GenError::NotAnLvalue(what) => write!(f, "{what} is not an assignable location"),
            GenError::InvalidOperation(message) => write!(f, "{message}"),
        }
    }
}

impl From<AssemblerError> for GenError {
    fn from(err: AssemblerError) -> Self {
        GenError::Assembler(err)
    }
}

/// An assignable location: a base register plus a constant byte offset,
/// the way `Load*`/`Store*` take their address operand directly.
#[derive(Debug, Clone, Copy)]
struct Place {
    base: u8,
    offset: i32,
}

/// Whether a value of this type is passed around as its own address
/// (aggregates, and arrays via the same decay C gives them) rather than
/// loaded into a register.
fn decays_to_address(ty: &Type) -> bool {
    if ty.pointer_depth() == 0 {
        return ty.is_class();
    }
    ty.indirection[0] > 0
}

pub struct CodeGenerator<'a> {
    ast: &'a Ast,
    classes: HashMap<u32, ClassInfo>,
    assembler: Assembler,
    function_labels: HashMap<u32, Label>,
    globals: HashMap<u32, i64>,
    scopes: Vec<HashMap<u32, i32>>,
    loop_stack: Vec<(Label, Label)>,
    next_local_offset: i32,
    debug: Option<DebugSymbols>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(ast: &'a Ast, classes: HashMap<u32, ClassInfo>) -> Self {
        CodeGenerator {
            ast,
            classes,
            assembler: Assembler::new(),
            function_labels: HashMap::new(),
            globals: HashMap::new(),
            scopes: Vec::new(),
            loop_stack: Vec::new(),
            next_local_offset: 0,
            debug: None,
        }
    }

    /// Builds a [`DebugSymbols`] table alongside the bytecode, the way
    /// `--debug` asks the compiler driver to.
    pub fn with_debug_symbols(mut self) -> Self {
        self.debug = Some(DebugSymbols::new());
        self
    }

    fn alloc(&mut self) -> Result<u8, GenError> {
        Ok(self.assembler.alloc_register()?)
    }

    fn free(&mut self, reg: u8) {
        self.assembler.free_register(reg);
    }

    fn lookup_local(&self, name_id: u32) -> Option<i32> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name_id).copied())
    }

    // ----- top level ------------------------------------------------------

    pub fn run(&mut self) -> Result<(), GenError> {
        for sig in &self.ast.function_signatures {
            let label = self.assembler.create_label();
            self.function_labels.insert(sig.name_id, label);
        }

        let mut next_global_offset: i64 = 0;
        let mut initializers: Vec<(i64, Type, NodeIndex)> = Vec::new();
        for &node in &self.ast.global_declarations {
            let range = self.ast.data(node).range();
            let slice = self.ast.extra_slice(range).to_vec();
            let (type_idx, name_id, initializer) = (slice[0], slice[1], slice[2]);
            let ty = self.ast.type_table[type_idx as usize].clone();
            let addr = next_global_offset;
            next_global_offset += ty.storage_size().max(1) as i64;
            self.globals.insert(name_id, addr);
            if let Some(debug) = self.debug.as_mut() {
                debug.add_global(self.ast.interner.resolve(name_id).to_string(), addr);
            }
            if initializer != NULL_NODE {
                initializers.push((addr, ty, initializer));
            }
        }

        for (addr, ty, initializer) in initializers {
            let value_reg = self.gen_value(initializer)?;
            let addr_reg = self.alloc()?;
            self.assembler.emit_load_immediate(addr_reg, addr);
            self.emit_store_sized(&ty, addr_reg, 0, value_reg);
            self.free(addr_reg);
            self.free(value_reg);
        }

        let main_name_id = self
            .ast
            .interner
            .lookup("main")
            .ok_or(GenError::MissingEntryPoint)?;
        let main_label = *self
            .function_labels
            .get(&main_name_id)
            .ok_or(GenError::MissingEntryPoint)?;
        self.assembler.emit_call(main_label);
        self.assembler.emit_halt();

        let signatures = self.ast.function_signatures.clone();
        let declarations = self.ast.function_declarations.clone();
        for (sig, &decl) in signatures.iter().zip(declarations.iter()) {
            let range = self.ast.data(decl).range();
            let body = self.ast.extra_slice(range).to_vec()[2];
            self.gen_function(sig, body)?;
        }

        Ok(())
    }

    pub fn finish(self) -> Result<(Vec<u8>, Vec<u8>), GenError> {
        Ok(self.assembler.try_finish()?)
    }

    /// Like [`CodeGenerator::finish`], but also hands back the debug
    /// symbol table built alongside (empty unless
    /// [`CodeGenerator::with_debug_symbols`] was requested).
    pub fn finish_with_debug(self) -> Result<(Vec<u8>, Vec<u8>, Option<DebugSymbols>), GenError> {
        let debug = self.debug.clone();
        let (program, static_data) = self.assembler.try_finish()?;
        Ok((program, static_data, debug))
    }

    fn count_locals(&self, node: NodeIndex) -> u32 {
        match self.ast.tag(node) {
            Tag::Block => {
                let range = self.ast.data(node).range();
                self.ast
                    .extra_slice(range)
                    .iter()
                    .map(|&s| self.count_locals(s))
                    .sum()
            }
            Tag::If => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range);
                let mut total = self.count_locals(slice[1]);
                if slice[2] != NULL_NODE {
                    total += self.count_locals(slice[2]);
                }
                total
            }
            Tag::While => self.count_locals(self.ast.data(node).rhs),
            Tag::For => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range);
                let mut total = 0;
                if slice[0] != NULL_NODE && self.ast.tag(slice[0]) == Tag::VarDecl {
                    total += self.count_locals(slice[0]);
                }
                total += self.count_locals(slice[3]);
                total
            }
            Tag::VarDecl => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range);
                let ty = &self.ast.type_table[slice[0] as usize];
                ty.storage_size().max(1)
            }
            _ => 0,
        }
    }

    fn gen_function(
        &mut self,
        sig: &crate::ast::FunctionSignature,
        body: NodeIndex,
    ) -> Result<(), GenError> {
        let label = *self
            .function_labels
            .get(&sig.name_id)
            .expect("function label registered in the pre-scan above");
        self.assembler.bind_label(label);
        let entry_offset = self.assembler.position();
        if self.debug.is_some() {
            let name = self.ast.interner.resolve(sig.name_id).to_string();
            self.debug.as_mut().unwrap().add_function(FunctionSymbol {
                name,
                entry_offset,
                locals: Vec::new(),
            });
        }
        let locals_size = self.count_locals(body);
        self.assembler.emit_enter_frame(locals_size);

        self.scopes.clear();
        self.scopes.push(HashMap::new());
        let n = sig.parameters.len();
        for (i, (name_id, _ty)) in sig.parameters.iter().enumerate() {
            // Stack layout above the saved frame pointer and return
            // address: args were pushed arg0 first, argN-1 last, so
            // argN-1 sits closest to fp.
            let offset = 16 + ((n - 1 - i) as i32) * 8;
            self.scopes.last_mut().unwrap().insert(*name_id, offset);
        }
        self.next_local_offset = 0;

        self.gen_statement(body)?;

        self.assembler.emit_leave_frame();
        self.assembler.emit_return();
        self.scopes.pop();
        Ok(())
    }

    // ----- sized load/store helpers ----------------------------------------

    fn emit_load_sized(&mut self, ty: &Type, dst: u8, base: u8, offset: i32) {
        if ty.pointer_depth() > 0 {
            self.assembler.emit_load_u64(dst, base, offset);
            return;
        }
        match ty.builtin_type() {
            Some(BuiltinType::U8) => self.assembler.emit_load_u8(dst, base, offset),
            Some(BuiltinType::I8) => self.assembler.emit_load_i8(dst, base, offset),
            Some(BuiltinType::U16) => self.assembler.emit_load_u16(dst, base, offset),
            Some(BuiltinType::I16) => self.assembler.emit_load_i16(dst, base, offset),
            Some(BuiltinType::U32) | Some(BuiltinType::F32) => {
                self.assembler.emit_load_u32(dst, base, offset)
            }
            Some(BuiltinType::I32) => self.assembler.emit_load_i32(dst, base, offset),
            _ => self.assembler.emit_load_u64(dst, base, offset),
        }
    }

    fn emit_store_sized(&mut self, ty: &Type, base: u8, offset: i32, src: u8) {
        if ty.pointer_depth() > 0 {
            self.assembler.emit_store_u64(base, offset, src);
            return;
        }
        match ty.builtin_type() {
            Some(BuiltinType::U8) | Some(BuiltinType::I8) => {
                self.assembler.emit_store_u8(base, offset, src)
            }
            Some(BuiltinType::U16) | Some(BuiltinType::I16) => {
                self.assembler.emit_store_u16(base, offset, src)
            }
            Some(BuiltinType::U32) | Some(BuiltinType::I32) | Some(BuiltinType::F32) => {
                self.assembler.emit_store_u32(base, offset, src)
            }
            _ => self.assembler.emit_store_u64(base, offset, src),
        }
    }

    // ----- places (assignable locations) -----------------------------------

    fn gen_place(&mut self, node: NodeIndex) -> Result<Place, GenError> {
        match self.ast.tag(node) {
            Tag::Identifier => {
                let name_id = self.ast.data(node).lhs;
                if let Some(offset) = self.lookup_local(name_id) {
                    let reg = self.alloc()?;
                    self.assembler.emit_load_frame_address(reg, offset);
                    Ok(Place { base: reg, offset: 0 })
                } else if let Some(&addr) = self.globals.get(&name_id) {
                    let reg = self.alloc()?;
                    self.assembler.emit_load_immediate(reg, addr);
                    Ok(Place { base: reg, offset: 0 })
                } else {
                    Err(GenError::UndefinedSymbol(
                        self.ast.interner.resolve(name_id).to_string(),
                    ))
                }
            }
            Tag::Member => {
                let data = self.ast.data(node);
                let object_ty = self.ast.node_type(data.lhs).clone();
                let place = self.gen_place(data.lhs)?;
                let class_info = self
                    .classes
                    .get(&object_ty.value)
                    .ok_or(GenError::UnknownClass(object_ty.value))?;
                let field = class_info.field(data.rhs).ok_or_else(|| {
                    GenError::UndefinedField(self.ast.interner.resolve(data.rhs).to_string())
                })?;
                Ok(Place {
                    base: place.base,
                    offset: place.offset + field.offset as i32,
                })
            }
            Tag::MemberArrow => {
                let data = self.ast.data(node);
                let object_ty = self.ast.node_type(data.lhs).clone();
                let object_reg = self.gen_value(data.lhs)?;
                let pointed = object_ty.pointed_type();
                let class_info = self
                    .classes
                    .get(&pointed.value)
                    .ok_or(GenError::UnknownClass(pointed.value))?;
                let field = class_info.field(data.rhs).ok_or_else(|| {
                    GenError::UndefinedField(self.ast.interner.resolve(data.rhs).to_string())
                })?;
                Ok(Place {
                    base: object_reg,
                    offset: field.offset as i32,
                })
            }
            Tag::Index => {
                let data = self.ast.data(node);
                let base_ty = self.ast.node_type(data.lhs).clone();
                let base_reg = self.gen_value(data.lhs)?;
                let idx_reg = self.gen_value(data.rhs)?;
                let element_ty = base_ty.pointed_type();
                let element_size = element_ty.storage_size().max(1);
                let size_reg = self.alloc()?;
                self.assembler.emit_load_immediate(size_reg, element_size as i64);
                let mul_reg = self.alloc()?;
                self.assembler.emit_mul_int_u(mul_reg, idx_reg, size_reg);
                self.free(size_reg);
                self.free(idx_reg);
                let sum_reg = self.alloc()?;
                self.assembler.emit_add_int(sum_reg, base_reg, mul_reg);
                self.free(mul_reg);
                self.free(base_reg);
                Ok(Place { base: sum_reg, offset: 0 })
            }
            Tag::Deref => {
                let operand = self.ast.data(node).lhs;
                let reg = self.gen_value(operand)?;
                Ok(Place { base: reg, offset: 0 })
            }
            other => Err(GenError::NotAnLvalue(format!("{other:?}"))),
        }
    }

    fn materialize_place(&mut self, place: Place) -> Result<u8, GenError> {
        if place.offset == 0 {
            return Ok(place.base);
        }
        let off_reg = self.alloc()?;
        self.assembler.emit_load_immediate(off_reg, place.offset as i64);
        self.assembler.emit_add_int(place.base, place.base, off_reg);
        self.free(off_reg);
        Ok(place.base)
    }

    // ----- truthiness / short circuit ---------------------------------------

    fn gen_truthy_jump_if_false(&mut self, node: NodeIndex, target: Label) -> Result<(), GenError> {
        let reg = self.gen_value(node)?;
        let zero = self.alloc()?;
        self.assembler.emit_load_immediate(zero, 0);
        self.assembler.emit_compare_int_u(reg, zero);
        self.free(zero);
        self.free(reg);
        self.assembler.emit_jump_if_equal(target);
        Ok(())
    }

    fn gen_truthy_jump_if_true(&mut self, node: NodeIndex, target: Label) -> Result<(), GenError> {
        let reg = self.gen_value(node)?;
        let zero = self.alloc()?;
        self.assembler.emit_load_immediate(zero, 0);
        self.assembler.emit_compare_int_u(reg, zero);
        self.free(zero);
        self.free(reg);
        self.assembler.emit_jump_if_not_equal(target);
        Ok(())
    }

    fn gen_logical_and(&mut self, node: NodeIndex) -> Result<u8, GenError> {
        let data = self.ast.data(node);
        let false_label = self.assembler.create_label();
        let end_label = self.assembler.create_label();
        self.gen_truthy_jump_if_false(data.lhs, false_label)?;
        self.gen_truthy_jump_if_false(data.rhs, false_label)?;
        let dst = self.alloc()?;
        self.assembler.emit_load_immediate(dst, 1);
        self.assembler.emit_jump(end_label);
        self.assembler.bind_label(false_label);
        self.assembler.emit_load_immediate(dst, 0);
        self.assembler.bind_label(end_label);
        Ok(dst)
    }

    fn gen_logical_or(&mut self, node: NodeIndex) -> Result<u8, GenError> {
        let data = self.ast.data(node);
        let true_label = self.assembler.create_label();
        let end_label = self.assembler.create_label();
        self.gen_truthy_jump_if_true(data.lhs, true_label)?;
        self.gen_truthy_jump_if_true(data.rhs, true_label)?;
        let dst = self.alloc()?;
        self.assembler.emit_load_immediate(dst, 0);
        self.assembler.emit_jump(end_label);
        self.assembler.bind_label(true_label);
        self.assembler.emit_load_immediate(dst, 1);
        self.assembler.bind_label(end_label);
        Ok(dst)
    }

    // ----- binary operator lowering ------------------------------------------

    fn gen_comparison_regs(
        &mut self,
        op: Tag,
        lhs_reg: u8,
        rhs_reg: u8,
        operand_ty: &Type,
    ) -> Result<u8, GenError> {
        if operand_ty.is_float() {
            if operand_ty.size == 4 {
                self.assembler.emit_compare_f32(lhs_reg, rhs_reg);
            } else {
                self.assembler.emit_compare_f64(lhs_reg, rhs_reg);
            }
        } else if operand_ty.builtin_type().map(BuiltinType::is_signed).unwrap_or(false) {
            self.assembler.emit_compare_int_s(lhs_reg, rhs_reg);
        } else {
            self.assembler.emit_compare_int_u(lhs_reg, rhs_reg);
        }
        self.free(lhs_reg);
        self.free(rhs_reg);

        let true_label = self.assembler.create_label();
        let end_label = self.assembler.create_label();
        match op {
            Tag::Eq => self.assembler.emit_jump_if_equal(true_label),
            Tag::Ne => self.assembler.emit_jump_if_not_equal(true_label),
            Tag::Gt => self.assembler.emit_jump_if_greater(true_label),
            Tag::Ge => self.assembler.emit_jump_if_greater_equal(true_label),
            Tag::Lt => self.assembler.emit_jump_if_less(true_label),
            Tag::Le => self.assembler.emit_jump_if_less_equal(true_label),
            _ => unreachable!("non-comparison tag reached gen_comparison_regs"),
        }
        let dst = self.alloc()?;
        self.assembler.emit_load_immediate(dst, 0);
        self.assembler.emit_jump(end_label);
        self.assembler.bind_label(true_label);
        self.assembler.emit_load_immediate(dst, 1);
        self.assembler.bind_label(end_label);
        Ok(dst)
    }

    fn gen_arith_or_bitwise_regs(
        &mut self,
        op: Tag,
        lhs_reg: u8,
        lhs_ty: &Type,
        rhs_reg: u8,
        result_ty: &Type,
    ) -> Result<u8, GenError> {
        if op == Tag::Sub && lhs_ty.pointer_depth() > 0 && result_ty.pointer_depth() == 0 {
            let element_size = lhs_ty.pointed_type().storage_size().max(1);
            let size_reg = self.alloc()?;
            self.assembler.emit_load_immediate(size_reg, element_size as i64);
            self.assembler.emit_sub_int(lhs_reg, lhs_reg, rhs_reg);
            self.assembler.emit_div_int_u(lhs_reg, lhs_reg, size_reg);
            self.free(size_reg);
            self.free(rhs_reg);
            return Ok(lhs_reg);
        }

        if result_ty.pointer_depth() > 0 && matches!(op, Tag::Add | Tag::Sub) {
            let element_size = result_ty.pointed_type().storage_size().max(1);
            let size_reg = self.alloc()?;
            self.assembler.emit_load_immediate(size_reg, element_size as i64);
            if lhs_ty.pointer_depth() > 0 {
                let scaled = self.alloc()?;
                self.assembler.emit_mul_int_u(scaled, rhs_reg, size_reg);
                self.free(size_reg);
                self.free(rhs_reg);
                if op == Tag::Add {
                    self.assembler.emit_add_int(lhs_reg, lhs_reg, scaled);
                } else {
                    self.assembler.emit_sub_int(lhs_reg, lhs_reg, scaled);
                }
                self.free(scaled);
                return Ok(lhs_reg);
            }
            let scaled = self.alloc()?;
            self.assembler.emit_mul_int_u(scaled, lhs_reg, size_reg);
            self.free(size_reg);
            self.free(lhs_reg);
            self.assembler.emit_add_int(rhs_reg, scaled, rhs_reg);
            self.free(scaled);
            return Ok(rhs_reg);
        }

        if result_ty.is_float() {
            let is_f32 = result_ty.size == 4;
            match op {
                Tag::Add if is_f32 => self.assembler.emit_add_f32(lhs_reg, lhs_reg, rhs_reg),
                Tag::Add => self.assembler.emit_add_f64(lhs_reg, lhs_reg, rhs_reg),
                Tag::Sub if is_f32 => self.assembler.emit_sub_f32(lhs_reg, lhs_reg, rhs_reg),
                Tag::Sub => self.assembler.emit_sub_f64(lhs_reg, lhs_reg, rhs_reg),
                Tag::Mul if is_f32 => self.assembler.emit_mul_f32(lhs_reg, lhs_reg, rhs_reg),
                Tag::Mul => self.assembler.emit_mul_f64(lhs_reg, lhs_reg, rhs_reg),
                Tag::Div if is_f32 => self.assembler.emit_div_f32(lhs_reg, lhs_reg, rhs_reg),
                Tag::Div => self.assembler.emit_div_f64(lhs_reg, lhs_reg, rhs_reg),
                _ => {
                    return Err(GenError::InvalidOperation(format!(
                        "{op:?} is not defined for floating point operands"
                    )))
                }
            }
            self.free(rhs_reg);
            return Ok(lhs_reg);
        }

        let signed = result_ty.builtin_type().map(BuiltinType::is_signed).unwrap_or(false);
        match op {
            Tag::Add => self.assembler.emit_add_int(lhs_reg, lhs_reg, rhs_reg),
            Tag::Sub => self.assembler.emit_sub_int(lhs_reg, lhs_reg, rhs_reg),
            Tag::Mul if signed => self.assembler.emit_mul_int_s(lhs_reg, lhs_reg, rhs_reg),
            Tag::Mul => self.assembler.emit_mul_int_u(lhs_reg, lhs_reg, rhs_reg),
            Tag::Div if signed => self.assembler.emit_div_int_s(lhs_reg, lhs_reg, rhs_reg),
            Tag::Div => self.assembler.emit_div_int_u(lhs_reg, lhs_reg, rhs_reg),
            Tag::Mod if signed => self.assembler.emit_mod_int_s(lhs_reg, lhs_reg, rhs_reg),
            Tag::Mod => self.assembler.emit_mod_int_u(lhs_reg, lhs_reg, rhs_reg),
            Tag::BitAnd => self.assembler.emit_bit_and(lhs_reg, lhs_reg, rhs_reg),
            Tag::BitXor => self.assembler.emit_bit_xor(lhs_reg, lhs_reg, rhs_reg),
            Tag::BitOr => self.assembler.emit_bit_or(lhs_reg, lhs_reg, rhs_reg),
            Tag::Shl => self.assembler.emit_shl_int(lhs_reg, lhs_reg, rhs_reg),
            Tag::Shr if signed => self.assembler.emit_shr_int_s(lhs_reg, lhs_reg, rhs_reg),
            Tag::Shr => self.assembler.emit_shr_int_u(lhs_reg, lhs_reg, rhs_reg),
            _ => {
                return Err(GenError::InvalidOperation(format!(
                    "{op:?} unexpected in arithmetic lowering"
                )))
            }
        }
        self.free(rhs_reg);
        Ok(lhs_reg)
    }

    fn narrow_cast(&mut self, reg: u8, target: &Type) -> Result<(), GenError> {
        let bits = target.byte_size(0) * 8;
        if bits >= 64 {
            return Ok(());
        }
        let mask = if bits == 0 { 0 } else { (1u64 << bits) - 1 };
        let mask_reg = self.alloc()?;
        self.assembler.emit_load_immediate(mask_reg, mask as i64);
        self.assembler.emit_bit_and(reg, reg, mask_reg);
        self.free(mask_reg);
        if target.builtin_type().map(BuiltinType::is_signed).unwrap_or(false) {
            let shift = (64 - bits) as i64;
            let shift_reg = self.alloc()?;
            self.assembler.emit_load_immediate(shift_reg, shift);
            self.assembler.emit_shl_int(reg, reg, shift_reg);
            self.assembler.emit_shr_int_s(reg, reg, shift_reg);
            self.free(shift_reg);
        }
        Ok(())
    }

    // ----- expressions --------------------------------------------------------

    fn gen_value(&mut self, node: NodeIndex) -> Result<u8, GenError> {
        let tag = self.ast.tag(node);
        match tag {
            Tag::IntLiteral => {
                let reg = self.alloc()?;
                let value = self.ast.data(node).int_literal_value();
                self.assembler.emit_load_immediate(reg, value as i64);
                Ok(reg)
            }
            Tag::FloatLiteral => {
                let reg = self.alloc()?;
                let bits = self.ast.data(node).float_literal_value().to_bits();
                self.assembler.emit_load_immediate(reg, bits as i64);
                Ok(reg)
            }
            Tag::StringLiteral => {
                let string_id = self.ast.data(node).lhs;
                let mut bytes = self.ast.strings[string_id as usize].clone().into_bytes();
                bytes.push(0);
                let addr = self.assembler.add_static_data(&bytes);
                let reg = self.alloc()?;
                self.assembler.emit_load_static_address(reg, addr);
                Ok(reg)
            }
            Tag::CharLiteral => {
                let reg = self.alloc()?;
                self.assembler.emit_load_immediate(reg, self.ast.data(node).lhs as i64);
                Ok(reg)
            }
            Tag::Identifier | Tag::Member | Tag::MemberArrow | Tag::Index | Tag::Deref => {
                let ty = self.ast.node_type(node).clone();
                let place = self.gen_place(node)?;
                if decays_to_address(&ty) {
                    self.materialize_place(place)
                } else {
                    let dst = place.base;
                    self.emit_load_sized(&ty, dst, place.base, place.offset);
                    Ok(dst)
                }
            }
            Tag::UnaryPlus => self.gen_value(self.ast.data(node).lhs),
            Tag::UnaryMinus => {
                let reg = self.gen_value(self.ast.data(node).lhs)?;
                let ty = self.ast.node_type(node).clone();
                if ty.is_float() {
                    if ty.size == 4 {
                        self.assembler.emit_neg_f32(reg, reg);
                    } else {
                        self.assembler.emit_neg_f64(reg, reg);
                    }
                } else {
                    self.assembler.emit_neg_int(reg, reg);
                }
                Ok(reg)
            }
            Tag::BitNot => {
                let reg = self.gen_value(self.ast.data(node).lhs)?;
                self.assembler.emit_bit_not(reg, reg);
                Ok(reg)
            }
            Tag::LogicalNot => {
                let reg = self.gen_value(self.ast.data(node).lhs)?;
                let zero = self.alloc()?;
                self.assembler.emit_load_immediate(zero, 0);
                self.assembler.emit_compare_int_u(reg, zero);
                self.free(zero);
                self.free(reg);
                let true_label = self.assembler.create_label();
                let end_label = self.assembler.create_label();
                self.assembler.emit_jump_if_equal(true_label);
                let dst = self.alloc()?;
                self.assembler.emit_load_immediate(dst, 0);
                self.assembler.emit_jump(end_label);
                self.assembler.bind_label(true_label);
                self.assembler.emit_load_immediate(dst, 1);
                self.assembler.bind_label(end_label);
                Ok(dst)
            }
            Tag::AddrOf => {
                let operand = self.ast.data(node).lhs;
                let place = self.gen_place(operand)?;
                self.materialize_place(place)
            }
            Tag::PreInc | Tag::PreDec | Tag::PostInc | Tag::PostDec => {
                let operand = self.ast.data(node).lhs;
                let ty = self.ast.node_type(operand).clone();
                let place = self.gen_place(operand)?;
                let value_reg = self.alloc()?;
                self.emit_load_sized(&ty, value_reg, place.base, place.offset);
                let saved_reg = self.alloc()?;
                self.assembler.emit_mov_reg_reg(saved_reg, value_reg);
                let step = if ty.pointer_depth() > 0 {
                    ty.pointed_type().storage_size().max(1)
                } else {
                    1
                };
                let step_reg = self.alloc()?;
                self.assembler.emit_load_immediate(step_reg, step as i64);
                if matches!(tag, Tag::PreInc | Tag::PostInc) {
                    self.assembler.emit_add_int(value_reg, value_reg, step_reg);
                } else {
                    self.assembler.emit_sub_int(value_reg, value_reg, step_reg);
                }
                self.free(step_reg);
                self.emit_store_sized(&ty, place.base, place.offset, value_reg);
                self.free(place.base);
                if matches!(tag, Tag::PreInc | Tag::PreDec) {
                    self.free(saved_reg);
                    Ok(value_reg)
                } else {
                    self.free(value_reg);
                    Ok(saved_reg)
                }
            }
            Tag::Cast => {
                let data = self.ast.data(node);
                let target_ty = self.ast.type_table[data.lhs as usize].clone();
                let operand_ty = self.ast.node_type(data.rhs).clone();
                let reg = self.gen_value(data.rhs)?;
                if operand_ty.is_float() && target_ty.is_integer() {
                    if operand_ty.size == 4 {
                        self.assembler.emit_f32_to_int(reg, reg);
                    } else {
                        self.assembler.emit_f64_to_int(reg, reg);
                    }
                } else if operand_ty.is_integer() && target_ty.is_float() {
                    if target_ty.size == 4 {
                        self.assembler.emit_int_to_f32(reg, reg);
                    } else {
                        self.assembler.emit_int_to_f64(reg, reg);
                    }
                } else if operand_ty.is_float() && target_ty.is_float() && operand_ty.size != target_ty.size {
                    if target_ty.size == 4 {
                        self.assembler.emit_f64_to_f32(reg, reg);
                    } else {
                        self.assembler.emit_f32_to_f64(reg, reg);
                    }
                } else if target_ty.pointer_depth() == 0 && target_ty.is_integer() {
                    self.narrow_cast(reg, &target_ty)?;
                }
                Ok(reg)
            }
            Tag::Call => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let callee_name_id = slice[0];
                let num_args = slice[1] as usize;
                let args = slice[2..2 + num_args].to_vec();
                let label = *self.function_labels.get(&callee_name_id).ok_or_else(|| {
                    GenError::UndefinedSymbol(self.ast.interner.resolve(callee_name_id).to_string())
                })?;

                let mut arg_regs = Vec::with_capacity(num_args);
                for &arg in &args {
                    arg_regs.push(self.gen_value(arg)?);
                }
                for &reg in &arg_regs {
                    self.assembler.emit_push(reg);
                    self.free(reg);
                }
                self.assembler.emit_call(label);
                if num_args > 0 {
                    let scratch = self.alloc()?;
                    for _ in 0..num_args {
                        self.assembler.emit_pop(scratch);
                    }
                    self.free(scratch);
                }
                let dst = self.alloc()?;
                self.assembler.emit_mov_from_accumulator0(dst);
                Ok(dst)
            }
            Tag::Assign => {
                let data = self.ast.data(node);
                let target_ty = self.ast.node_type(data.lhs).clone();
                if target_ty.is_class() {
                    return Err(GenError::InvalidOperation(
                        "assigning a whole class value is not supported; assign through a pointer or field".to_string(),
                    ));
                }
                let place = self.gen_place(data.lhs)?;
                let value_reg = self.gen_value(data.rhs)?;
                self.emit_store_sized(&target_ty, place.base, place.offset, value_reg);
                self.free(place.base);
                Ok(value_reg)
            }
            _ if tag.is_binary() => match tag {
                Tag::LogicalAnd => self.gen_logical_and(node),
                Tag::LogicalOr => self.gen_logical_or(node),
                Tag::Eq | Tag::Ne | Tag::Lt | Tag::Le | Tag::Gt | Tag::Ge => {
                    let data = self.ast.data(node);
                    let operand_ty = self.ast.node_type(data.lhs).clone();
                    let lhs_reg = self.gen_value(data.lhs)?;
                    let rhs_reg = self.gen_value(data.rhs)?;
                    self.gen_comparison_regs(tag, lhs_reg, rhs_reg, &operand_ty)
                }
                _ => {
                    let data = self.ast.data(node);
                    let lhs_ty = self.ast.node_type(data.lhs).clone();
                    let result_ty = self.ast.node_type(node).clone();
                    let lhs_reg = self.gen_value(data.lhs)?;
                    let rhs_reg = self.gen_value(data.rhs)?;
                    self.gen_arith_or_bitwise_regs(tag, lhs_reg, &lhs_ty, rhs_reg, &result_ty)
                }
            },
            _ if tag.is_compound_assign() => {
                let data = self.ast.data(node);
                let target_ty = self.ast.node_type(data.lhs).clone();
                let place = self.gen_place(data.lhs)?;
                let cur_reg = self.alloc()?;
                self.emit_load_sized(&target_ty, cur_reg, place.base, place.offset);
                let value_reg = self.gen_value(data.rhs)?;
                let combined = self.gen_arith_or_bitwise_regs(
                    tag.compound_op(),
                    cur_reg,
                    &target_ty,
                    value_reg,
                    &target_ty,
                )?;
                self.emit_store_sized(&target_ty, place.base, place.offset, combined);
                self.free(place.base);
                Ok(combined)
            }
            other => Err(GenError::InvalidOperation(format!("{other:?} is not an expression form"))),
        }
    }

    // ----- statements -----------------------------------------------------

    fn gen_syscall_statement(&mut self, node: NodeIndex) -> Result<(), GenError> {
        let range = self.ast.data(node).range();
        let slice = self.ast.extra_slice(range).to_vec();
        let discriminant = slice[0] as u8;
        let num_args = slice[1] as usize;
        let args = slice[2..2 + num_args].to_vec();

        const GET_CHAR: u8 = 1;
        if discriminant == GET_CHAR {
            // The argument is the pointer to store the read character
            // through, not a value to hand the syscall — keep it alive in
            // its own register across the syscall, since the syscall
            // result only ever lands in accumulator0.
            if let Some(&first_arg) = args.first() {
                let ptr_reg = self.gen_value(first_arg)?;
                self.assembler.emit_syscall(discriminant);
                let value_reg = self.alloc()?;
                self.assembler.emit_mov_from_accumulator0(value_reg);
                self.assembler.emit_store_u16(ptr_reg, 0, value_reg);
                self.free(value_reg);
                self.free(ptr_reg);
            } else {
                self.assembler.emit_syscall(discriminant);
            }
            return Ok(());
        }

        if let Some(&first_arg) = args.first() {
            let reg = self.gen_value(first_arg)?;
            self.assembler.emit_mov_to_accumulator0(reg);
            self.free(reg);
        }
        self.assembler.emit_syscall(discriminant);
        Ok(())
    }

    fn gen_statement(&mut self, node: NodeIndex) -> Result<(), GenError> {
        if node == NULL_NODE {
            return Ok(());
        }
        match self.ast.tag(node) {
            Tag::Block => {
                self.scopes.push(HashMap::new());
                let range = self.ast.data(node).range();
                for &stmt in self.ast.extra_slice(range).to_vec().iter() {
                    self.gen_statement(stmt)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Tag::If => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let (condition, then_branch, else_branch) = (slice[0], slice[1], slice[2]);
                let else_label = self.assembler.create_label();
                let end_label = self.assembler.create_label();
                self.gen_truthy_jump_if_false(condition, else_label)?;
                self.gen_statement(then_branch)?;
                self.assembler.emit_jump(end_label);
                self.assembler.bind_label(else_label);
                if else_branch != NULL_NODE {
                    self.gen_statement(else_branch)?;
                }
                self.assembler.bind_label(end_label);
                Ok(())
            }
            Tag::While => {
                let data = self.ast.data(node);
                let top_label = self.assembler.create_label();
                let end_label = self.assembler.create_label();
                self.assembler.bind_label(top_label);
                self.gen_truthy_jump_if_false(data.lhs, end_label)?;
                self.loop_stack.push((end_label, top_label));
                let result = self.gen_statement(data.rhs);
                self.loop_stack.pop();
                result?;
                self.assembler.emit_jump(top_label);
                self.assembler.bind_label(end_label);
                Ok(())
            }
            Tag::For => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let (init, condition, update, body) = (slice[0], slice[1], slice[2], slice[3]);
                self.scopes.push(HashMap::new());
                if init != NULL_NODE {
                    if self.ast.tag(init) == Tag::VarDecl {
                        self.gen_statement(init)?;
                    } else {
                        let reg = self.gen_value(init)?;
                        self.free(reg);
                    }
                }
                let cond_label = self.assembler.create_label();
                let end_label = self.assembler.create_label();
                let continue_label = self.assembler.create_label();
                self.assembler.bind_label(cond_label);
                if condition != NULL_NODE {
                    self.gen_truthy_jump_if_false(condition, end_label)?;
                }
                self.loop_stack.push((end_label, continue_label));
                let result = self.gen_statement(body);
                self.loop_stack.pop();
                result?;
                self.assembler.bind_label(continue_label);
                if update != NULL_NODE {
                    let reg = self.gen_value(update)?;
                    self.free(reg);
                }
                self.assembler.emit_jump(cond_label);
                self.assembler.bind_label(end_label);
                self.scopes.pop();
                Ok(())
            }
            Tag::Return => {
                let value = self.ast.data(node).lhs;
                if value != NULL_NODE {
                    let reg = self.gen_value(value)?;
                    self.assembler.emit_mov_to_accumulator0(reg);
                    self.free(reg);
                }
                self.assembler.emit_leave_frame();
                self.assembler.emit_return();
                Ok(())
            }
            Tag::Break => {
                let (end_label, _) = *self
                    .loop_stack
                    .last()
                    .ok_or_else(|| GenError::InvalidOperation("break outside of a loop".to_string()))?;
                self.assembler.emit_jump(end_label);
                Ok(())
            }
            Tag::Continue => {
                let (_, continue_label) = *self
                    .loop_stack
                    .last()
                    .ok_or_else(|| GenError::InvalidOperation("continue outside of a loop".to_string()))?;
                self.assembler.emit_jump(continue_label);
                Ok(())
            }
            Tag::ExprStatement => {
                let reg = self.gen_value(self.ast.data(node).lhs)?;
                self.free(reg);
                Ok(())
            }
            Tag::VarDecl => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let (type_idx, name_id, initializer) = (slice[0], slice[1], slice[2]);
                let ty = self.ast.type_table[type_idx as usize].clone();
                let size = ty.storage_size().max(1) as i32;
                self.next_local_offset -= size;
                let offset = self.next_local_offset;
                self.scopes
                    .last_mut()
                    .expect("statement outside any scope")
                    .insert(name_id, offset);
                if let Some(debug) = self.debug.as_mut() {
                    if let Some(function) = debug.functions.last_mut() {
                        function.locals.push((self.ast.interner.resolve(name_id).to_string(), offset));
                    }
                }

                if initializer != NULL_NODE {
                    let value_reg = self.gen_value(initializer)?;
                    let addr_reg = self.alloc()?;
                    self.assembler.emit_load_frame_address(addr_reg, offset);
                    self.emit_store_sized(&ty, addr_reg, 0, value_reg);
                    self.free(addr_reg);
                    self.free(value_reg);
                }
                Ok(())
            }
            Tag::SysCall => self.gen_syscall_statement(node),
            other => Err(GenError::InvalidOperation(format!("{other:?} is not a statement form"))),
        }
    }
}

/// Lowers a type-checked program straight to bytecode plus its static
/// data segment, ready for `Executable::new`.
pub fn generate(ast: &Ast, classes: HashMap<u32, ClassInfo>) -> Result<(Vec<u8>, Vec<u8>), GenError> {
    let mut generator = CodeGenerator::new(ast, classes);
    generator.run()?;
    generator.finish()
}

/// Same as [`generate`], but also builds and returns the debug symbol
/// table a `--debug` compile asks for.
pub fn generate_with_debug(
    ast: &Ast,
    classes: HashMap<u32, ClassInfo>,
) -> Result<(Vec<u8>, Vec<u8>, DebugSymbols), GenError> {
    let mut generator = CodeGenerator::new(ast, classes).with_debug_symbols();
    generator.run()?;
    let (program, static_data, debug) = generator.finish_with_debug()?;
    Ok((program, static_data, debug.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;
    use crate::typechecker::typecheck;
    use crate::vm::{Io, Vm};

    struct NullIo;
    impl Io for NullIo {
        fn print_char(&mut self, _byte: u8) {}
        fn get_char(&mut self) -> u8 {
            0
        }
    }

    fn run_program(src: &str) -> i64 {
        let tokens = tokenize(src).expect("tokenize");
        let mut ast = parse(&tokens).expect("parse");
        let classes = typecheck(&mut ast).expect("typecheck");
        let (program, static_data) = generate(&ast, classes).expect("codegen");
        let mut vm = Vm::new(program, static_data);
        vm.run(&mut NullIo).expect("run")
    }

    #[test]
    fn returns_a_constant() {
        assert_eq!(run_program("u64 main() { return 42; }"), 42);
    }

    #[test]
    fn calls_a_helper_function() {
        assert_eq!(
            run_program("u64 add(u64 a, u64 b) { return a + b; } u64 main() { return add(5, 6); }"),
            11
        );
    }

    #[test]
    fn if_else_picks_the_right_branch() {
        assert_eq!(
            run_program("u64 main() { u64 x = 3; if (x > 1) { return 1; } else { return 0; } }"),
            1
        );
    }

    #[test]
    fn while_loop_accumulates() {
        let src = "u64 main() { u64 i = 0; u64 sum = 0; while (i < 5) { sum = sum + i; i = i + 1; } return sum; }";
        assert_eq!(run_program(src), 10);
    }

    #[test]
    fn for_loop_with_break_and_continue() {
        let src = "u64 main() { u64 sum = 0; for (u64 i = 0; i < 10; i = i + 1) { if (i == 5) { break; } if (i == 2) { continue; } sum = sum + i; } return sum; }";
        assert_eq!(run_program(src), 0 + 1 + 3 + 4);
    }

    #[test]
    fn class_field_access_through_pointer() {
        let src = "class Point { u64 x; u64 y; } u64 get_x(Point* p) { return p->x; } u64 main() { Point pt; pt.x = 42; pt.y = 7; return get_x(&pt); }";
        assert_eq!(run_program(src), 42);
    }

    #[test]
    fn fibonacci_via_recursion() {
        let src = "u64 fib(u64 n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } u64 main() { return fib(10); }";
        assert_eq!(run_program(src), 55);
    }
}
