//! Single-pass AST walk that assigns a `Type` to every expression node and
//! enforces `fits`-based assignment compatibility, grounded on the
//! teacher's `TypeEnvironment`/`TypeScope` push/pop-scope design in
//! `typechecker.rs`, generalized from the teacher's looser dynamic-ish
//! rules to tea's static checking built on `crate::types::fits`.

use crate::ast::{Ast, NodeIndex, SysCallName, Tag, TokenRef, NULL_NODE};
use crate::types::{fits, BuiltinType, Fits, Type, BUILTIN_TYPE_END};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    UndefinedSymbol {
        name: String,
        line: u32,
        column: u32,
    },
    UndefinedField {
        class: String,
        field: String,
        line: u32,
        column: u32,
    },
    TypeMismatch {
        message: String,
        line: u32,
        column: u32,
    },
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
        line: u32,
        column: u32,
    },
    InvalidOperation {
        message: String,
        line: u32,
        column: u32,
    },
    DuplicateDeclaration {
        name: String,
        line: u32,
        column: u32,
    },
}

impl TypeError {
    pub fn position(&self) -> (u32, u32) {
        match self {
            TypeError::UndefinedSymbol { line, column, .. }
            | TypeError::UndefinedField { line, column, .. }
            | TypeError::TypeMismatch { line, column, .. }
            | TypeError::ArityMismatch { line, column, .. }
            | TypeError::InvalidOperation { line, column, .. }
            | TypeError::DuplicateDeclaration { line, column, .. } => (*line, *column),
        }
    }

    pub fn message(&self) -> String {
        match self {
            TypeError::UndefinedSymbol { name, .. } => format!("undefined symbol '{name}'"),
            TypeError::UndefinedField { class, field, .. } => {
                format!("class '{class}' has no field '{field}'")
            }
            TypeError::TypeMismatch { message, .. } => message.clone(),
            TypeError::ArityMismatch {
                function,
                expected,
                found,
                ..
            } => format!("'{function}' expects {expected} argument(s), found {found}"),
            TypeError::InvalidOperation { message, .. } => message.clone(),
            TypeError::DuplicateDeclaration { name, .. } => {
                format!("'{name}' is already declared in this scope")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassField {
    pub name_id: u32,
    pub ty: Type,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name_id: u32,
    pub class_id: u32,
    pub size: u32,
    pub fields: Vec<ClassField>,
}

impl ClassInfo {
    pub fn field(&self, name_id: u32) -> Option<&ClassField> {
        self.fields.iter().find(|f| f.name_id == name_id)
    }
}

#[derive(Debug, Clone)]
struct FunctionEntry {
    return_type: Type,
    parameters: Vec<(u32, Type)>,
    body: NodeIndex,
}

pub struct TypeChecker<'a> {
    ast: &'a mut Ast,
    pub classes: HashMap<u32, ClassInfo>,
    functions: HashMap<u32, FunctionEntry>,
    globals: HashMap<u32, Type>,
    scopes: Vec<HashMap<u32, Type>>,
    current_return: Type,
    loop_depth: u32,
}

impl<'a> TypeChecker<'a> {
    pub fn new(ast: &'a mut Ast) -> Self {
        TypeChecker {
            ast,
            classes: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            scopes: Vec::new(),
            current_return: Type::undefined(),
            loop_depth: 0,
        }
    }

    pub fn run(mut self) -> Result<HashMap<u32, ClassInfo>, TypeError> {
        self.resolve_classes()?;
        self.collect_functions()?;
        self.collect_globals()?;

        let functions: Vec<(u32, FunctionEntry)> =
            self.functions.iter().map(|(k, v)| (*k, v.clone())).collect();
        for (_, entry) in functions {
            self.check_function(&entry)?;
        }
        Ok(self.classes)
    }

    fn patch_type_size(ty: &mut Type, sizes: &HashMap<u32, u32>) {
        if let Some(&size) = sizes.get(&ty.value) {
            ty.size = size;
        }
    }

    /// Assigns each class declaration a dense id above `BUILTIN_TYPE_END`
    /// in declaration order (matching the parser's pre-scan numbering,
    /// since both enumerate `class <Name>` introductions in file order),
    /// computes its byte layout, and back-patches every `Type` in
    /// `ast.type_table` and every function signature that referenced the
    /// class before its size was known.
    fn resolve_classes(&mut self) -> Result<(), TypeError> {
        struct Raw {
            class_id: u32,
            name_id: u32,
            token: TokenRef,
            fields: Vec<(u32, u32)>,
        }

        let mut raws = Vec::new();
        for (index, &node) in self.ast.class_declarations.clone().iter().enumerate() {
            let class_id = BUILTIN_TYPE_END + index as u32;
            let range = self.ast.data(node).range();
            let slice = self.ast.extra_slice(range).to_vec();
            let name_id = slice[0];
            let num_fields = slice[1] as usize;
            let mut fields = Vec::with_capacity(num_fields);
            let mut idx = 2;
            for _ in 0..num_fields {
                fields.push((slice[idx], slice[idx + 1]));
                idx += 2;
            }
            raws.push(Raw {
                class_id,
                name_id,
                token: self.ast.token(node),
                fields,
            });
        }

        let mut seen_names: HashMap<u32, TokenRef> = HashMap::new();
        for raw in &raws {
            if seen_names.insert(raw.name_id, raw.token).is_some() {
                return Err(TypeError::DuplicateDeclaration {
                    name: self.ast.interner.resolve(raw.name_id).to_string(),
                    line: raw.token.line,
                    column: raw.token.column,
                });
            }
        }

        let mut sizes: HashMap<u32, u32> = HashMap::new();
        for _ in 0..=raws.len() {
            for raw in &raws {
                if sizes.contains_key(&raw.class_id) {
                    continue;
                }
                let mut total = 0u32;
                let mut resolvable = true;
                for &(_, type_idx) in &raw.fields {
                    let field_ty = self.ast.type_table[type_idx as usize].clone();
                    if field_ty.is_class() {
                        match sizes.get(&field_ty.value) {
                            Some(&size) => total += size,
                            None => {
                                resolvable = false;
                                break;
                            }
                        }
                    } else {
                        total += field_ty.storage_size();
                    }
                }
                if resolvable {
                    sizes.insert(raw.class_id, total);
                }
            }
        }

        for raw in &raws {
            if !sizes.contains_key(&raw.class_id) {
                return Err(TypeError::InvalidOperation {
                    message: format!(
                        "class '{}' has a cyclic by-value field layout",
                        self.ast.interner.resolve(raw.name_id)
                    ),
                    line: raw.token.line,
                    column: raw.token.column,
                });
            }
        }

        for ty in self.ast.type_table.iter_mut() {
            Self::patch_type_size(ty, &sizes);
        }
        for sig in self.ast.function_signatures.iter_mut() {
            Self::patch_type_size(&mut sig.return_type, &sizes);
            for (_, ty) in sig.parameters.iter_mut() {
                Self::patch_type_size(ty, &sizes);
            }
        }

        for raw in raws {
            let class_id = raw.class_id;
            let mut offset = 0u32;
            let mut fields = Vec::with_capacity(raw.fields.len());
            for (field_name_id, type_idx) in raw.fields {
                let ty = self.ast.type_table[type_idx as usize].clone();
                let size = ty.storage_size();
                fields.push(ClassField {
                    name_id: field_name_id,
                    ty,
                    offset,
                });
                offset += size;
            }
            self.classes.insert(
                class_id,
                ClassInfo {
                    name_id: raw.name_id,
                    class_id,
                    size: sizes[&class_id],
                    fields,
                },
            );
        }

        Ok(())
    }

    fn collect_functions(&mut self) -> Result<(), TypeError> {
        for (signature, &decl) in self
            .ast
            .function_signatures
            .clone()
            .iter()
            .zip(self.ast.function_declarations.clone().iter())
        {
            let range = self.ast.data(decl).range();
            let body = self.ast.extra_slice(range).to_vec()[2];
            let token = self.ast.token(decl);
            if self
                .functions
                .insert(
                    signature.name_id,
                    FunctionEntry {
                        return_type: signature.return_type.clone(),
                        parameters: signature.parameters.clone(),
                        body,
                    },
                )
                .is_some()
            {
                return Err(TypeError::DuplicateDeclaration {
                    name: self.ast.interner.resolve(signature.name_id).to_string(),
                    line: token.line,
                    column: token.column,
                });
            }
        }
        Ok(())
    }

    fn collect_globals(&mut self) -> Result<(), TypeError> {
        for &node in &self.ast.global_declarations.clone() {
            let range = self.ast.data(node).range();
            let slice = self.ast.extra_slice(range).to_vec();
            let (type_idx, name_id, initializer) = (slice[0], slice[1], slice[2]);
            let ty = self.ast.type_table[type_idx as usize].clone();
            let token = self.ast.token(node);

            if initializer != NULL_NODE {
                let value_ty = self.check_expression(initializer)?;
                self.require_fits(&value_ty, &ty, token)?;
            }

            if self.globals.insert(name_id, ty).is_some() {
                return Err(TypeError::DuplicateDeclaration {
                    name: self.ast.interner.resolve(name_id).to_string(),
                    line: token.line,
                    column: token.column,
                });
            }
        }
        Ok(())
    }

    fn check_function(&mut self, entry: &FunctionEntry) -> Result<(), TypeError> {
        let mut scope = HashMap::new();
        for (name_id, ty) in &entry.parameters {
            scope.insert(*name_id, ty.clone());
        }
        self.scopes.push(scope);
        self.current_return = entry.return_type.clone();
        self.loop_depth = 0;

        self.check_statement(entry.body)?;

        self.scopes.pop();
        Ok(())
    }

    fn lookup_variable(&self, name_id: u32) -> Option<Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.get(&name_id) {
                return Some(ty.clone());
            }
        }
        self.globals.get(&name_id).cloned()
    }

    fn require_fits(&self, src: &Type, dst: &Type, token: TokenRef) -> Result<(), TypeError> {
        match fits(src, dst) {
            Fits::No => Err(TypeError::TypeMismatch {
                message: format!(
                    "cannot assign '{}' to '{}' without an explicit cast",
                    src.to_display_string(),
                    dst.to_display_string()
                ),
                line: token.line,
                column: token.column,
            }),
            _ => Ok(()),
        }
    }

    // ----- statements --------------------------------------------------

    fn check_statement(&mut self, node: NodeIndex) -> Result<(), TypeError> {
        if node == NULL_NODE {
            return Ok(());
        }
        let token = self.ast.token(node);
        match self.ast.tag(node) {
            Tag::Block => {
                self.scopes.push(HashMap::new());
                let range = self.ast.data(node).range();
                for &stmt in self.ast.extra_slice(range).to_vec().iter() {
                    self.check_statement(stmt)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Tag::If => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let (condition, then_branch, else_branch) = (slice[0], slice[1], slice[2]);
                self.check_expression(condition)?;
                self.check_statement(then_branch)?;
                self.check_statement(else_branch)
            }
            Tag::While => {
                let data = self.ast.data(node);
                self.check_expression(data.lhs)?;
                self.loop_depth += 1;
                let result = self.check_statement(data.rhs);
                self.loop_depth -= 1;
                result
            }
            Tag::For => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let (init, condition, update, body) = (slice[0], slice[1], slice[2], slice[3]);
                self.scopes.push(HashMap::new());
                if init != NULL_NODE {
                    if self.ast.tag(init) == Tag::VarDecl {
                        self.check_statement(init)?;
                    } else {
                        self.check_expression(init)?;
                    }
                }
                if condition != NULL_NODE {
                    self.check_expression(condition)?;
                }
                if update != NULL_NODE {
                    self.check_expression(update)?;
                }
                self.loop_depth += 1;
                let result = self.check_statement(body);
                self.loop_depth -= 1;
                self.scopes.pop();
                result
            }
            Tag::Return => {
                let value = self.ast.data(node).lhs;
                let return_type = self.current_return.clone();
                if value == NULL_NODE {
                    if return_type.builtin_type() != Some(BuiltinType::V0) {
                        return Err(TypeError::TypeMismatch {
                            message: "missing return value".to_string(),
                            line: token.line,
                            column: token.column,
                        });
                    }
                    return Ok(());
                }
                let value_ty = self.check_expression(value)?;
                self.require_fits(&value_ty, &return_type, token)
            }
            Tag::Break | Tag::Continue => {
                if self.loop_depth == 0 {
                    return Err(TypeError::InvalidOperation {
                        message: "break/continue used outside of a loop".to_string(),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(())
            }
            Tag::ExprStatement => {
                self.check_expression(self.ast.data(node).lhs)?;
                Ok(())
            }
            Tag::VarDecl => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let (type_idx, name_id, initializer) = (slice[0], slice[1], slice[2]);
                let ty = self.ast.type_table[type_idx as usize].clone();

                if initializer != NULL_NODE {
                    let value_ty = self.check_expression(initializer)?;
                    self.require_fits(&value_ty, &ty, token)?;
                }

                let scope = self.scopes.last_mut().expect("statement outside any scope");
                if scope.insert(name_id, ty).is_some() {
                    return Err(TypeError::DuplicateDeclaration {
                        name: self.ast.interner.resolve(name_id).to_string(),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(())
            }
            Tag::SysCall => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let num_args = slice[1] as usize;
                let args = slice[2..2 + num_args].to_vec();
                for &arg in &args {
                    self.check_expression(arg)?;
                }
                Ok(())
            }
            other => unreachable!("{other:?} is not a statement form"),
        }
    }

    // ----- expressions ---------------------------------------------------

    fn check_expression(&mut self, node: NodeIndex) -> Result<Type, TypeError> {
        let token = self.ast.token(node);
        let tag = self.ast.tag(node);
        let ty = self.check_expression_inner(node, tag, token)?;
        self.ast.set_type(node, ty.clone());
        Ok(ty)
    }

    fn check_expression_inner(
        &mut self,
        node: NodeIndex,
        tag: Tag,
        token: TokenRef,
    ) -> Result<Type, TypeError> {
        match tag {
            Tag::IntLiteral => Ok(Type::builtin(BuiltinType::U64)),
            Tag::FloatLiteral => Ok(Type::builtin(BuiltinType::F64)),
            Tag::StringLiteral => Ok(Type::builtin(BuiltinType::U8).with_indirection(vec![0])),
            Tag::CharLiteral => Ok(Type::builtin(BuiltinType::U8)),
            Tag::Identifier => {
                let name_id = self.ast.data(node).lhs;
                self.lookup_variable(name_id).ok_or_else(|| TypeError::UndefinedSymbol {
                    name: self.ast.interner.resolve(name_id).to_string(),
                    line: token.line,
                    column: token.column,
                })
            }
            _ if tag.is_binary() => {
                let data = self.ast.data(node);
                let lhs = self.check_expression(data.lhs)?;
                let rhs = self.check_expression(data.rhs)?;
                self.check_binary(tag, &lhs, &rhs, token)
            }
            Tag::UnaryPlus | Tag::UnaryMinus | Tag::BitNot => {
                let operand = self.check_expression(self.ast.data(node).lhs)?;
                if !operand.is_integer() && !operand.is_float() {
                    return Err(TypeError::InvalidOperation {
                        message: "unary arithmetic operators require a numeric operand".to_string(),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(operand)
            }
            Tag::LogicalNot => {
                self.check_expression(self.ast.data(node).lhs)?;
                Ok(Type::builtin(BuiltinType::U8))
            }
            Tag::Deref => {
                let operand = self.check_expression(self.ast.data(node).lhs)?;
                if operand.pointer_depth() == 0 {
                    return Err(TypeError::InvalidOperation {
                        message: format!("cannot dereference non-pointer type '{}'", operand.to_display_string()),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(operand.pointed_type())
            }
            Tag::AddrOf => {
                let operand = self.check_expression(self.ast.data(node).lhs)?;
                Ok(operand.pointer_to())
            }
            Tag::PreInc | Tag::PreDec | Tag::PostInc | Tag::PostDec => {
                let operand = self.check_expression(self.ast.data(node).lhs)?;
                if !operand.is_integer() && operand.pointer_depth() == 0 {
                    return Err(TypeError::InvalidOperation {
                        message: "increment/decrement require an integer or pointer operand".to_string(),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(operand)
            }
            Tag::Member | Tag::MemberArrow => {
                let data = self.ast.data(node);
                let object = self.check_expression(data.lhs)?;
                let field_name_id = data.rhs;
                let class_ty = if tag == Tag::MemberArrow {
                    if object.pointer_depth() != 1 {
                        return Err(TypeError::InvalidOperation {
                            message: "'->' requires a pointer-to-class operand".to_string(),
                            line: token.line,
                            column: token.column,
                        });
                    }
                    object.pointed_type()
                } else {
                    object
                };
                if !class_ty.is_class() {
                    return Err(TypeError::InvalidOperation {
                        message: format!("'{}' is not a class type", class_ty.to_display_string()),
                        line: token.line,
                        column: token.column,
                    });
                }
                let class_info = self.classes.get(&class_ty.value).expect("class id out of range");
                class_info
                    .field(field_name_id)
                    .map(|f| f.ty.clone())
                    .ok_or_else(|| TypeError::UndefinedField {
                        class: self.ast.interner.resolve(class_info.name_id).to_string(),
                        field: self.ast.interner.resolve(field_name_id).to_string(),
                        line: token.line,
                        column: token.column,
                    })
            }
            Tag::Index => {
                let data = self.ast.data(node);
                let base = self.check_expression(data.lhs)?;
                let index = self.check_expression(data.rhs)?;
                if base.pointer_depth() == 0 {
                    return Err(TypeError::InvalidOperation {
                        message: format!("cannot index non-pointer type '{}'", base.to_display_string()),
                        line: token.line,
                        column: token.column,
                    });
                }
                if !index.is_integer() {
                    return Err(TypeError::TypeMismatch {
                        message: "array index must be an integer".to_string(),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(base.pointed_type())
            }
            Tag::Call => {
                let range = self.ast.data(node).range();
                let slice = self.ast.extra_slice(range).to_vec();
                let callee_name_id = slice[0];
                let num_args = slice[1] as usize;
                let args = slice[2..2 + num_args].to_vec();

                let entry = self
                    .functions
                    .get(&callee_name_id)
                    .cloned()
                    .ok_or_else(|| TypeError::UndefinedSymbol {
                        name: self.ast.interner.resolve(callee_name_id).to_string(),
                        line: token.line,
                        column: token.column,
                    })?;

                if entry.parameters.len() != args.len() {
                    return Err(TypeError::ArityMismatch {
                        function: self.ast.interner.resolve(callee_name_id).to_string(),
                        expected: entry.parameters.len(),
                        found: args.len(),
                        line: token.line,
                        column: token.column,
                    });
                }

                for (&arg, (_, param_ty)) in args.iter().zip(entry.parameters.iter()) {
                    let arg_ty = self.check_expression(arg)?;
                    self.require_fits(&arg_ty, param_ty, token)?;
                }

                Ok(entry.return_type)
            }
            Tag::Cast => {
                let data = self.ast.data(node);
                let target = self.ast.type_table[data.lhs as usize].clone();
                self.check_expression(data.rhs)?;
                Ok(target)
            }
            Tag::Assign => {
                let data = self.ast.data(node);
                let target = self.check_expression(data.lhs)?;
                let value = self.check_expression(data.rhs)?;
                self.require_fits(&value, &target, token)?;
                Ok(target)
            }
            _ if tag.is_compound_assign() => {
                let data = self.ast.data(node);
                let target = self.check_expression(data.lhs)?;
                let value = self.check_expression(data.rhs)?;
                let combined = self.check_binary(tag.compound_op(), &target, &value, token)?;
                self.require_fits(&combined, &target, token)?;
                Ok(target)
            }
            other => unreachable!("{other:?} is not an expression form (node {node})"),
        }
    }

    fn check_binary(&self, tag: Tag, lhs: &Type, rhs: &Type, token: TokenRef) -> Result<Type, TypeError> {
        match tag {
            Tag::Eq | Tag::Ne | Tag::Lt | Tag::Le | Tag::Gt | Tag::Ge => {
                self.require_comparable(lhs, rhs, token)?;
                Ok(Type::builtin(BuiltinType::U8))
            }
            Tag::LogicalAnd | Tag::LogicalOr => Ok(Type::builtin(BuiltinType::U8)),
            Tag::Sub if lhs.pointer_depth() > 0 && rhs.pointer_depth() > 0 => {
                if lhs.pointer_depth() != rhs.pointer_depth() {
                    return Err(TypeError::InvalidOperation {
                        message: format!(
                            "cannot subtract pointers of different depth, found '{}' and '{}'",
                            lhs.to_display_string(),
                            rhs.to_display_string()
                        ),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(Type::builtin(BuiltinType::U64))
            }
            Tag::Add | Tag::Sub if lhs.pointer_depth() > 0 && rhs.is_integer() => Ok(lhs.clone()),
            Tag::Add if rhs.pointer_depth() > 0 && lhs.is_integer() => Ok(rhs.clone()),
            _ => {
                if (!lhs.is_integer() && !lhs.is_float()) || (!rhs.is_integer() && !rhs.is_float()) {
                    return Err(TypeError::InvalidOperation {
                        message: format!(
                            "operator requires numeric operands, found '{}' and '{}'",
                            lhs.to_display_string(),
                            rhs.to_display_string()
                        ),
                        line: token.line,
                        column: token.column,
                    });
                }
                Ok(Self::wider(lhs, rhs))
            }
        }
    }

    fn require_comparable(&self, lhs: &Type, rhs: &Type, token: TokenRef) -> Result<(), TypeError> {
        let both_numeric = (lhs.is_integer() || lhs.is_float()) && (rhs.is_integer() || rhs.is_float());
        let both_same_depth_pointer = lhs.pointer_depth() > 0 && lhs.pointer_depth() == rhs.pointer_depth();
        if both_numeric || both_same_depth_pointer {
            Ok(())
        } else {
            Err(TypeError::TypeMismatch {
                message: format!(
                    "cannot compare '{}' and '{}'",
                    lhs.to_display_string(),
                    rhs.to_display_string()
                ),
                line: token.line,
                column: token.column,
            })
        }
    }

    fn wider(a: &Type, b: &Type) -> Type {
        if a.is_float() && !b.is_float() {
            return a.clone();
        }
        if b.is_float() && !a.is_float() {
            return b.clone();
        }
        if a.byte_size(0) >= b.byte_size(0) {
            a.clone()
        } else {
            b.clone()
        }
    }
}

/// Type-checks the whole program and returns the resolved class layouts
/// (field offsets and sizes), which the code generator needs for
/// `Member`/`MemberArrow` lowering.
pub fn typecheck(ast: &mut Ast) -> Result<HashMap<u32, ClassInfo>, TypeError> {
    TypeChecker::new(ast).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;

    fn check(src: &str) -> Result<Ast, TypeError> {
        let tokens = tokenize(src).expect("tokenize");
        let mut ast = parse(&tokens).expect("parse");
        let _classes = typecheck(&mut ast)?;
        Ok(ast)
    }

    #[test]
    fn infers_identifier_and_literal_types() {
        let ast = check("u64 f(u64 a) { return a + 1; }").expect("typecheck");
        let decl_range = ast.extra_slice(ast.data(ast.function_declarations[0]).range()).to_vec();
        let body = decl_range[2];
        let stmts = ast.extra_slice(ast.data(body).range());
        let return_value = ast.data(stmts[0]).lhs;
        assert_eq!(ast.node_type(return_value).builtin_type(), Some(BuiltinType::U64));
    }

    #[test]
    fn rejects_narrowing_assignment_without_cast() {
        let err = check("u8 f() { u64 x = 1; u8 y = x; return 0; }").unwrap_err();
        assert!(matches!(err, TypeError::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_undefined_identifier() {
        let err = check("u64 f() { return missing; }").unwrap_err();
        assert!(matches!(err, TypeError::UndefinedSymbol { .. }));
    }

    #[test]
    fn rejects_call_arity_mismatch() {
        let err = check("u64 add(u64 a, u64 b) { return a + b; } u64 f() { return add(1); }").unwrap_err();
        assert!(matches!(err, TypeError::ArityMismatch { .. }));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = check("u64 f() { break; return 0; }").unwrap_err();
        assert!(matches!(err, TypeError::InvalidOperation { .. }));
    }

    #[test]
    fn resolves_class_field_types_and_sizes() {
        let tokens = tokenize("class Point { u64 x; u64 y; } u64 f(Point p) { return p.x; }").unwrap();
        let mut ast = parse(&tokens).unwrap();
        let classes = typecheck(&mut ast).expect("typecheck");
        let point = classes.get(&BUILTIN_TYPE_END).expect("Point class");
        assert_eq!(point.size, 16);
        assert_eq!(point.fields[1].offset, 8);
    }

    #[test]
    fn pointer_arithmetic_preserves_pointer_type() {
        let ast = check("u64 f(u8* p) { return u64(p + 1); }").expect("typecheck");
        let _ = ast;
    }
}
