//! Structure-of-arrays AST store: parallel `tags`/`tokens`/`data`/`types`
//! vectors plus an `extra_data` side table for variable-length children.
//!
//! Each node's `NodeData` is a fixed two-`u32` payload, generic over all
//! tags; which fields it actually holds is documented per `Tag` variant
//! below. This keeps the whole tree in a handful of flat `Vec`s rather than
//! a boxed tree of heap nodes — the interned-id / dense-`Vec` style rosy
//! already uses for register live ranges (see
//! `registerallocation/registerallocator.rs`), generalized here to AST
//! nodes and identifier names.

use crate::types::Type;
use std::collections::HashMap;

pub type NodeIndex = u32;
pub const NULL_NODE: NodeIndex = u32::MAX;

/// Interns source identifiers to dense `u32` ids.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Interner {
    pub fn new() -> Self {
        Interner::default()
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn resolve(&self, id: u32) -> &str {
        &self.names[id as usize]
    }
}

/// One node kind per syntactic form and per operator flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    CharLiteral,
    Identifier,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    UnaryPlus,
    UnaryMinus,
    BitNot,
    LogicalNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,

    Member,
    MemberArrow,
    Index,
    Call,
    Cast,

    Assign,
    CompoundAdd,
    CompoundSub,
    CompoundMul,
    CompoundDiv,
    CompoundMod,
    CompoundShl,
    CompoundShr,
    CompoundBitAnd,
    CompoundBitXor,
    CompoundBitOr,

    Block,
    If,
    While,
    For,
    Return,
    Break,
    Continue,
    ExprStatement,
    VarDecl,
    FunctionDecl,
    ClassDecl,
    SysCall,
}

impl Tag {
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Tag::Add
                | Tag::Sub
                | Tag::Mul
                | Tag::Div
                | Tag::Mod
                | Tag::Shl
                | Tag::Shr
                | Tag::BitAnd
                | Tag::BitXor
                | Tag::BitOr
                | Tag::LogicalAnd
                | Tag::LogicalOr
                | Tag::Eq
                | Tag::Ne
                | Tag::Lt
                | Tag::Le
                | Tag::Gt
                | Tag::Ge
        )
    }

    pub fn is_compound_assign(self) -> bool {
        matches!(
            self,
            Tag::CompoundAdd
                | Tag::CompoundSub
                | Tag::CompoundMul
                | Tag::CompoundDiv
                | Tag::CompoundMod
                | Tag::CompoundShl
                | Tag::CompoundShr
                | Tag::CompoundBitAnd
                | Tag::CompoundBitXor
                | Tag::CompoundBitOr
        )
    }

    /// The underlying binary operator a compound-assignment applies.
    pub fn compound_op(self) -> Tag {
        match self {
            Tag::CompoundAdd => Tag::Add,
            Tag::CompoundSub => Tag::Sub,
            Tag::CompoundMul => Tag::Mul,
            Tag::CompoundDiv => Tag::Div,
            Tag::CompoundMod => Tag::Mod,
            Tag::CompoundShl => Tag::Shl,
            Tag::CompoundShr => Tag::Shr,
            Tag::CompoundBitAnd => Tag::BitAnd,
            Tag::CompoundBitXor => Tag::BitXor,
            Tag::CompoundBitOr => Tag::BitOr,
            other => other,
        }
    }
}

/// Compact `{line, column}` reference into the source, kept per node for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenRef {
    pub line: u32,
    pub column: u32,
}

/// Fixed two-`u32` payload. Meaning depends on the node's `Tag`. Two shapes
/// are used throughout: a plain pair (`lhs`, `rhs` are themselves the
/// node's one or two operands) for fixed-arity nodes, and a range
/// (`lhs` = start, `rhs` = len into `extra_data`) for nodes that need more
/// than two scalars or a variable-length child list — in the range shape,
/// any fixed scalars the node needs are simply the first few entries of the
/// window, documented per tag below.
///
/// - `IntLiteral`: `lhs`/`rhs` are the low/high 32 bits of a `u64` value.
/// - `FloatLiteral`: `lhs`/`rhs` are the low/high 32 bits of the `f64` bit
///   pattern.
/// - `StringLiteral`: `lhs` indexes `Ast::strings`.
/// - `CharLiteral`: `lhs` is the byte value.
/// - `Identifier`: `lhs` is the interned name id.
/// - binary operators: `lhs`/`rhs` are the operand `NodeIndex`es.
/// - unary operators (`Deref`, `AddrOf`, pre/post inc/dec, `UnaryPlus`,
///   `UnaryMinus`, `BitNot`, `LogicalNot`): `lhs` is the operand.
/// - `Member`/`MemberArrow`: `lhs` is the object expression, `rhs` is the
///   interned field name id.
/// - `Index`: `lhs` is the base expression, `rhs` is the index expression.
/// - `Cast`: `lhs` indexes `Ast::type_table` for the target type, `rhs` is
///   the operand expression.
/// - `Assign`/compound assigns: `lhs` is the assignable target, `rhs` is
///   the value expression.
/// - `While`: `lhs` is the condition, `rhs` is the body.
/// - `Return`: `lhs` is the value expression, or `NULL_NODE`.
/// - `Break`/`Continue`: unused.
/// - `ExprStatement`: `lhs` is the inner expression.
/// - `Block`: range over `extra_data` holding `[stmt0, stmt1, ...]`.
/// - `If`: range holding `[condition, then_branch, else_branch_or_null]`
///   (`else_branch` is `NULL_NODE` if absent).
/// - `For`: range holding `[init, condition, update, body]`.
/// - `VarDecl`: range holding `[type_table_idx, name_id, initializer_or_null]`.
/// - `FunctionDecl`: range holding
///   `[name_id, return_type_idx, body_or_null, num_params,
///   (param_name_id, param_type_idx) * num_params]`.
/// - `ClassDecl`: range holding
///   `[name_id, num_fields, (field_name_id, field_type_idx) * num_fields]`.
/// - `Call`: range holding `[callee_name_id, num_args, arg0, arg1, ...]`.
/// - `SysCall`: range holding `[syscall_discriminant, num_args, arg0, ...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeData {
    pub lhs: u32,
    pub rhs: u32,
}

impl NodeData {
    pub fn binary(lhs: NodeIndex, rhs: NodeIndex) -> Self {
        NodeData { lhs, rhs }
    }

    pub fn unary(operand: NodeIndex) -> Self {
        NodeData {
            lhs: operand,
            rhs: 0,
        }
    }

    pub fn int_literal(value: u64) -> Self {
        NodeData {
            lhs: value as u32,
            rhs: (value >> 32) as u32,
        }
    }

    pub fn int_literal_value(&self) -> u64 {
        (self.lhs as u64) | ((self.rhs as u64) << 32)
    }

    pub fn float_literal(value: f64) -> Self {
        let bits = value.to_bits();
        NodeData {
            lhs: bits as u32,
            rhs: (bits >> 32) as u32,
        }
    }

    pub fn float_literal_value(&self) -> f64 {
        let bits = (self.lhs as u64) | ((self.rhs as u64) << 32);
        f64::from_bits(bits)
    }

    pub fn range(&self) -> ExtraRange {
        ExtraRange {
            start: self.lhs,
            len: self.rhs,
        }
    }
}

/// A `(start, length)` window into `Ast::extra_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraRange {
    pub start: u32,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysCallName {
    PrintChar,
    GetChar,
}

/// Recorded once per function declaration during the type checker's
/// signature pre-scan, so forward calls type-check before the callee's
/// body has been visited.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name_id: u32,
    pub return_type: crate::types::Type,
    pub parameters: Vec<(u32, crate::types::Type)>,
    pub locals_size: u32,
}

#[derive(Debug, Default)]
pub struct Ast {
    pub tags: Vec<Tag>,
    pub tokens: Vec<TokenRef>,
    pub data: Vec<NodeData>,
    pub types: Vec<Type>,

    pub extra_data: Vec<u32>,
    pub strings: Vec<String>,
    pub type_table: Vec<Type>,

    pub interner: Interner,
    pub function_signatures: Vec<FunctionSignature>,
    pub class_declarations: Vec<NodeIndex>,
    pub global_declarations: Vec<NodeIndex>,
    pub function_declarations: Vec<NodeIndex>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn push(&mut self, tag: Tag, token: TokenRef, data: NodeData) -> NodeIndex {
        let index = self.tags.len() as NodeIndex;
        self.tags.push(tag);
        self.tokens.push(token);
        self.data.push(data);
        self.types.push(Type::undefined());
        index
    }

    pub fn push_extra_range(&mut self, items: &[u32]) -> ExtraRange {
        let start = self.extra_data.len() as u32;
        self.extra_data.extend_from_slice(items);
        ExtraRange {
            start,
            len: items.len() as u32,
        }
    }

    pub fn extra_slice(&self, range: ExtraRange) -> &[u32] {
        let start = range.start as usize;
        let end = start + range.len as usize;
        &self.extra_data[start..end]
    }

    pub fn push_string(&mut self, s: String) -> u32 {
        let id = self.strings.len() as u32;
        self.strings.push(s);
        id
    }

    pub fn push_type(&mut self, ty: Type) -> u32 {
        let id = self.type_table.len() as u32;
        self.type_table.push(ty);
        id
    }

    pub fn set_type(&mut self, node: NodeIndex, ty: Type) {
        self.types[node as usize] = ty;
    }

    pub fn node_type(&self, node: NodeIndex) -> &Type {
        &self.types[node as usize]
    }

    pub fn tag(&self, node: NodeIndex) -> Tag {
        self.tags[node as usize]
    }

    pub fn data(&self, node: NodeIndex) -> NodeData {
        self.data[node as usize]
    }

    pub fn token(&self, node: NodeIndex) -> TokenRef {
        self.tokens[node as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_is_stable_and_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        let a2 = interner.intern("foo");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "foo");
    }

    #[test]
    fn int_literal_round_trips_through_two_u32_halves() {
        let data = NodeData::int_literal(0xdead_beef_0000_0001);
        assert_eq!(data.int_literal_value(), 0xdead_beef_0000_0001);
    }

    #[test]
    fn float_literal_round_trips_through_bit_pattern() {
        let data = NodeData::float_literal(3.5);
        assert_eq!(data.float_literal_value(), 3.5);
    }

    #[test]
    fn extra_data_range_round_trips() {
        let mut ast = Ast::new();
        let range = ast.push_extra_range(&[10, 20, 30]);
        assert_eq!(ast.extra_slice(range), &[10, 20, 30]);
    }

    #[test]
    fn push_assigns_increasing_indices() {
        let mut ast = Ast::new();
        let a = ast.push(Tag::IntLiteral, TokenRef::default(), NodeData::int_literal(1));
        let b = ast.push(Tag::IntLiteral, TokenRef::default(), NodeData::int_literal(2));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(ast.data(a).int_literal_value(), 1);
    }
}
