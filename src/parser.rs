//! Token stream to AST. Recursive descent with an explicit
//! precedence-climbing expression pass, grounded on the teacher's
//! `get_last_occurence` lowest-precedence-operator scan in `parser.rs`
//! (generalized here into a proper per-level recursive descent over the
//! 15-level table in spec §4.3) and its suffix-scanning `parse_type` loop
//! for indirection levels.

use crate::ast::{
    Ast, FunctionSignature, NodeData, NodeIndex, SysCallName, Tag, TokenRef, NULL_NODE,
};
use crate::tokenizer::{Token, TokenKind};
use crate::types::{BuiltinType, Type};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken {
        message: String,
        line: u32,
        column: u32,
    },
    MissingToken {
        expected: String,
        found: String,
        line: u32,
        column: u32,
    },
    MalformedOperatorSequence {
        message: String,
        line: u32,
        column: u32,
    },
    UnsupportedKeyword {
        keyword: String,
        line: u32,
        column: u32,
    },
}

impl ParseError {
    pub fn position(&self) -> (u32, u32) {
        match self {
            ParseError::UnexpectedToken { line, column, .. }
            | ParseError::MissingToken { line, column, .. }
            | ParseError::MalformedOperatorSequence { line, column, .. }
            | ParseError::UnsupportedKeyword { line, column, .. } => (*line, *column),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ParseError::UnexpectedToken { message, .. } => message.clone(),
            ParseError::MissingToken {
                expected, found, ..
            } => format!("expected {expected}, found {found}"),
            ParseError::MalformedOperatorSequence { message, .. } => message.clone(),
            ParseError::UnsupportedKeyword { keyword, .. } => {
                format!("unsupported keyword '{keyword}'")
            }
        }
    }
}

/// Top-level class-name pre-pass result: lets `<Name>` be recognized as a
/// type during the main parse even when `<Name>` is declared later in the
/// file.
fn prescan_class_names(tokens: &[Token], interner: &mut crate::ast::Interner) -> HashMap<u32, u32> {
    let mut classes = HashMap::new();
    let mut next_class_id = crate::types::BUILTIN_TYPE_END;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Keyword && tokens[i].lexeme == "class" {
            if let Some(name_tok) = tokens.get(i + 1) {
                if name_tok.kind == TokenKind::Identifier {
                    let name_id = interner.intern(&name_tok.lexeme);
                    classes.entry(name_id).or_insert_with(|| {
                        let id = next_class_id;
                        next_class_id += 1;
                        id
                    });
                }
            }
        }
        i += 1;
    }
    classes
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ast: Ast,
    class_ids: HashMap<u32, u32>,
    /// Byte size recorded for each class id as its declaration is parsed;
    /// filled in lazily (0 until the type checker computes real layout).
    class_sizes: HashMap<u32, u32>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        let mut ast = Ast::new();
        let class_ids = prescan_class_names(tokens, &mut ast.interner);
        Parser {
            tokens,
            pos: 0,
            ast,
            class_ids,
            class_sizes: HashMap::new(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind_lexeme(&self, offset: usize) -> Option<(TokenKind, &str)> {
        self.tokens
            .get(self.pos + offset)
            .map(|t| (t.kind, t.lexeme.as_str()))
    }

    fn current_ref(&self) -> TokenRef {
        match self.peek() {
            Some(t) => t.token_ref(),
            None => self
                .tokens
                .last()
                .map(|t| t.token_ref())
                .unwrap_or_default(),
        }
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, kind: TokenKind, lexeme: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == kind && t.lexeme == lexeme)
    }

    fn check_kind(&self, kind: TokenKind) -> bool {
        matches!(self.peek(), Some(t) if t.kind == kind)
    }

    fn eat(&mut self, kind: TokenKind, lexeme: &str) -> Result<&Token, ParseError> {
        if self.check(kind, lexeme) {
            Ok(self.advance().unwrap())
        } else {
            let (line, column) = (self.current_ref().line, self.current_ref().column);
            let found = self
                .peek()
                .map(|t| t.lexeme.clone())
                .unwrap_or_else(|| "end of input".to_string());
            Err(ParseError::MissingToken {
                expected: lexeme.to_string(),
                found,
                line,
                column,
            })
        }
    }

    fn eat_identifier(&mut self) -> Result<String, ParseError> {
        if self.check_kind(TokenKind::Identifier) {
            Ok(self.advance().unwrap().lexeme.clone())
        } else {
            let (line, column) = (self.current_ref().line, self.current_ref().column);
            let found = self
                .peek()
                .map(|t| t.lexeme.clone())
                .unwrap_or_else(|| "end of input".to_string());
            Err(ParseError::MissingToken {
                expected: "identifier".to_string(),
                found,
                line,
                column,
            })
        }
    }

    fn unexpected(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = (self.current_ref().line, self.current_ref().column);
        ParseError::UnexpectedToken {
            message: message.into(),
            line,
            column,
        }
    }

    // ----- top level -----------------------------------------------------

    pub fn parse_program(mut self) -> Result<Ast, ParseError> {
        while !self.at_end() {
            self.parse_top_level_item()?;
        }
        Ok(self.ast)
    }

    fn is_type_start(&self) -> bool {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Type => true,
            Some(t) if t.kind == TokenKind::Identifier => {
                let interned = self.ast.interner.lookup(&t.lexeme);
                matches!(interned, Some(id) if self.class_ids.contains_key(&id))
            }
            _ => false,
        }
    }

    fn parse_top_level_item(&mut self) -> Result<(), ParseError> {
        if self.check(TokenKind::Keyword, "class") {
            let node = self.parse_class_decl()?;
            self.ast.class_declarations.push(node);
            return Ok(());
        }

        if !self.is_type_start() {
            return Err(self.unexpected("expected class, function or variable declaration"));
        }

        let ty = self.parse_type()?;
        let name = self.eat_identifier()?;

        if self.check(TokenKind::SpecialCharacter, "(") {
            let node = self.parse_function_decl(ty, name)?;
            self.ast.function_declarations.push(node);
        } else {
            let node = self.parse_var_decl_rest(ty, name)?;
            self.ast.global_declarations.push(node);
        }
        Ok(())
    }

    fn parse_class_decl(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::Keyword, "class")?;
        let name = self.eat_identifier()?;
        let name_id = self.ast.interner.intern(&name);
        self.eat(TokenKind::SpecialCharacter, "{")?;

        let mut fields = Vec::new();
        while !self.check(TokenKind::SpecialCharacter, "}") {
            let field_type = self.parse_type()?;
            let field_name = self.eat_identifier()?;
            let field_name_id = self.ast.interner.intern(&field_name);
            let type_idx = self.ast.push_type(field_type);
            fields.push(field_name_id);
            fields.push(type_idx);
            self.eat(TokenKind::SpecialCharacter, ";")?;
        }
        self.eat(TokenKind::SpecialCharacter, "}")?;

        let mut extra = vec![name_id, (fields.len() / 2) as u32];
        extra.extend(fields);
        let range = self.ast.push_extra_range(&extra);
        Ok(self
            .ast
            .push(Tag::ClassDecl, token, NodeData::binary(range.start, range.len)))
    }

    fn parse_function_decl(&mut self, return_type: Type, name: String) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        let name_id = self.ast.interner.intern(&name);
        self.eat(TokenKind::SpecialCharacter, "(")?;

        let mut params: Vec<(u32, Type)> = Vec::new();
        while !self.check(TokenKind::SpecialCharacter, ")") {
            let param_type = self.parse_type()?;
            let param_name = self.eat_identifier()?;
            let param_name_id = self.ast.interner.intern(&param_name);
            params.push((param_name_id, param_type));
            if self.check(TokenKind::SpecialCharacter, ",") {
                self.advance();
            } else {
                break;
            }
        }
        self.eat(TokenKind::SpecialCharacter, ")")?;

        let return_type_idx = self.ast.push_type(return_type.clone());
        let body = self.parse_block()?;

        let mut extra = vec![name_id, return_type_idx, body, params.len() as u32];
        for (param_name_id, param_type) in &params {
            let type_idx = self.ast.push_type(param_type.clone());
            extra.push(*param_name_id);
            extra.push(type_idx);
        }
        let range = self.ast.push_extra_range(&extra);

        self.ast.function_signatures.push(FunctionSignature {
            name_id,
            return_type,
            parameters: params,
            locals_size: 0,
        });

        Ok(self
            .ast
            .push(Tag::FunctionDecl, token, NodeData::binary(range.start, range.len)))
    }

    fn parse_var_decl_rest(&mut self, ty: Type, name: String) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        let name_id = self.ast.interner.intern(&name);
        let type_idx = self.ast.push_type(ty);

        let initializer = if self.check(TokenKind::Operator, "=") {
            self.advance();
            self.parse_expression()?
        } else {
            NULL_NODE
        };
        self.eat(TokenKind::SpecialCharacter, ";")?;

        let extra = [type_idx, name_id, initializer];
        let range = self.ast.push_extra_range(&extra);
        Ok(self
            .ast
            .push(Tag::VarDecl, token, NodeData::binary(range.start, range.len)))
    }

    /// Parses a `TYPE`/class-name token followed by any number of `*`
    /// (pointer) or `[n]` (array) suffixes into an indirection list.
    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let token = self.peek().cloned().ok_or_else(|| self.unexpected("expected a type"))?;

        let mut ty = if token.kind == TokenKind::Type {
            self.advance();
            let builtin = BuiltinType::from_str(&token.lexeme)
                .ok_or_else(|| self.unexpected(format!("unknown built-in type '{}'", token.lexeme)))?;
            Type::builtin(builtin)
        } else if token.kind == TokenKind::Identifier {
            let name_id = self.ast.interner.intern(&token.lexeme);
            let class_id = *self
                .class_ids
                .get(&name_id)
                .ok_or_else(|| self.unexpected(format!("'{}' is not a known type", token.lexeme)))?;
            self.advance();
            Type::class(class_id, *self.class_sizes.get(&class_id).unwrap_or(&0))
        } else {
            return Err(self.unexpected("expected a type"));
        };

        let mut indirection = Vec::new();
        loop {
            if self.check(TokenKind::Operator, "*") {
                self.advance();
                indirection.push(0);
            } else if self.check(TokenKind::SpecialCharacter, "[") {
                self.advance();
                let (_, lexeme) = self
                    .peek_kind_lexeme(0)
                    .ok_or_else(|| self.unexpected("expected array length"))?;
                let len: u32 = lexeme
                    .parse()
                    .map_err(|_| self.unexpected("expected a numeric array length"))?;
                self.advance();
                self.eat(TokenKind::SpecialCharacter, "]")?;
                indirection.push(len);
            } else {
                break;
            }
        }
        ty = ty.with_indirection(indirection);
        Ok(ty)
    }

    // ----- statements ------------------------------------------------------

    fn parse_block(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::SpecialCharacter, "{")?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::SpecialCharacter, "}") {
            statements.push(self.parse_statement()?);
        }
        self.eat(TokenKind::SpecialCharacter, "}")?;
        let range = self.ast.push_extra_range(&statements);
        Ok(self
            .ast
            .push(Tag::Block, token, NodeData::binary(range.start, range.len)))
    }

    fn wrap_single_statement_block(&mut self, stmt: NodeIndex, token: TokenRef) -> NodeIndex {
        let range = self.ast.push_extra_range(&[stmt]);
        self.ast
            .push(Tag::Block, token, NodeData::binary(range.start, range.len))
    }

    fn parse_statement(&mut self) -> Result<NodeIndex, ParseError> {
        if self.check(TokenKind::SpecialCharacter, "{") {
            return self.parse_block();
        }
        if self.check(TokenKind::Keyword, "if") {
            return self.parse_if();
        }
        if self.check(TokenKind::Keyword, "while") {
            return self.parse_while();
        }
        if self.check(TokenKind::Keyword, "for") {
            return self.parse_for();
        }
        if self.check(TokenKind::Keyword, "return") {
            return self.parse_return();
        }
        if self.check(TokenKind::Keyword, "break") {
            let token = self.current_ref();
            self.advance();
            self.eat(TokenKind::SpecialCharacter, ";")?;
            return Ok(self.ast.push(Tag::Break, token, NodeData::default()));
        }
        if self.check(TokenKind::Keyword, "continue") {
            let token = self.current_ref();
            self.advance();
            self.eat(TokenKind::SpecialCharacter, ";")?;
            return Ok(self.ast.push(Tag::Continue, token, NodeData::default()));
        }
        if self.check(TokenKind::Keyword, "goto") {
            let (line, column) = (self.current_ref().line, self.current_ref().column);
            return Err(ParseError::UnsupportedKeyword {
                keyword: "goto".to_string(),
                line,
                column,
            });
        }
        if self.check(TokenKind::Keyword, "syscall") {
            return self.parse_syscall_statement();
        }
        if self.is_type_start() {
            let ty = self.parse_type()?;
            let name = self.eat_identifier()?;
            return self.parse_var_decl_rest(ty, name);
        }

        let token = self.current_ref();
        let expr = self.parse_expression()?;
        self.eat(TokenKind::SpecialCharacter, ";")?;
        Ok(self.ast.push(Tag::ExprStatement, token, NodeData::unary(expr)))
    }

    fn parse_if(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::Keyword, "if")?;
        self.eat(TokenKind::SpecialCharacter, "(")?;
        let condition = self.parse_expression()?;
        self.eat(TokenKind::SpecialCharacter, ")")?;
        let then_branch = self.parse_statement()?;

        let else_branch = if self.check(TokenKind::Keyword, "else") {
            let else_token = self.current_ref();
            self.advance();
            if self.check(TokenKind::Keyword, "if") {
                let inner = self.parse_if()?;
                self.wrap_single_statement_block(inner, else_token)
            } else {
                self.parse_statement()?
            }
        } else {
            NULL_NODE
        };

        let extra = [condition, then_branch, else_branch];
        let range = self.ast.push_extra_range(&extra);
        Ok(self
            .ast
            .push(Tag::If, token, NodeData::binary(range.start, range.len)))
    }

    fn parse_while(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::Keyword, "while")?;
        self.eat(TokenKind::SpecialCharacter, "(")?;
        let condition = self.parse_expression()?;
        self.eat(TokenKind::SpecialCharacter, ")")?;
        let body = self.parse_statement()?;
        Ok(self.ast.push(Tag::While, token, NodeData::binary(condition, body)))
    }

    fn parse_for(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::Keyword, "for")?;
        self.eat(TokenKind::SpecialCharacter, "(")?;

        let init = if self.check(TokenKind::SpecialCharacter, ";") {
            NULL_NODE
        } else if self.is_type_start() {
            let ty = self.parse_type()?;
            let name = self.eat_identifier()?;
            self.parse_var_decl_rest(ty, name)?
        } else {
            let e = self.parse_expression()?;
            self.eat(TokenKind::SpecialCharacter, ";")?;
            e
        };

        let condition = if self.check(TokenKind::SpecialCharacter, ";") {
            NULL_NODE
        } else {
            self.parse_expression()?
        };
        self.eat(TokenKind::SpecialCharacter, ";")?;

        let update = if self.check(TokenKind::SpecialCharacter, ")") {
            NULL_NODE
        } else {
            self.parse_expression()?
        };
        self.eat(TokenKind::SpecialCharacter, ")")?;

        let body = self.parse_statement()?;

        let extra = [init, condition, update, body];
        let range = self.ast.push_extra_range(&extra);
        Ok(self
            .ast
            .push(Tag::For, token, NodeData::binary(range.start, range.len)))
    }

    fn parse_return(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::Keyword, "return")?;
        let value = if self.check(TokenKind::SpecialCharacter, ";") {
            NULL_NODE
        } else {
            self.parse_expression()?
        };
        self.eat(TokenKind::SpecialCharacter, ";")?;
        Ok(self.ast.push(Tag::Return, token, NodeData::unary(value)))
    }

    fn syscall_name(&mut self, name: &str) -> Result<SysCallName, ParseError> {
        match name {
            "PRINT_CHAR" => Ok(SysCallName::PrintChar),
            "GET_CHAR" => Ok(SysCallName::GetChar),
            other => Err(self.unexpected(format!("unknown syscall '{other}'"))),
        }
    }

    fn parse_syscall_statement(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        self.eat(TokenKind::Keyword, "syscall")?;
        let name_lexeme = self.eat_identifier()?;
        let syscall = self.syscall_name(&name_lexeme)?;
        self.eat(TokenKind::SpecialCharacter, "(")?;
        let mut args = Vec::new();
        while !self.check(TokenKind::SpecialCharacter, ")") {
            args.push(self.parse_expression()?);
            if self.check(TokenKind::SpecialCharacter, ",") {
                self.advance();
            } else {
                break;
            }
        }
        self.eat(TokenKind::SpecialCharacter, ")")?;
        self.eat(TokenKind::SpecialCharacter, ";")?;

        let discriminant = match syscall {
            SysCallName::PrintChar => 0,
            SysCallName::GetChar => 1,
        };
        let mut extra = vec![discriminant, args.len() as u32];
        extra.extend(args);
        let range = self.ast.push_extra_range(&extra);
        Ok(self
            .ast
            .push(Tag::SysCall, token, NodeData::binary(range.start, range.len)))
    }

    // ----- expressions: precedence climbing, tightest to loosest -----------
    //
    // Levels 15 down to 4 are implemented as a chain of left- (or, for
    // assignment, right-) associative binary folds; level 3 (prefix unary)
    // and level 2 (postfix `++`/`--`, call, index) sit below that; level 1
    // (`::`) has no defined use in this grammar and is left unconsumed here
    // (a stray `::` surfaces as an unexpected token at the statement level).

    pub fn parse_expression(&mut self) -> Result<NodeIndex, ParseError> {
        self.parse_assignment()
    }

    fn assignment_tag(lexeme: &str) -> Option<Tag> {
        Some(match lexeme {
            "=" => Tag::Assign,
            "+=" => Tag::CompoundAdd,
            "-=" => Tag::CompoundSub,
            "*=" => Tag::CompoundMul,
            "/=" => Tag::CompoundDiv,
            "%=" => Tag::CompoundMod,
            "<<=" => Tag::CompoundShl,
            ">>=" => Tag::CompoundShr,
            "&=" => Tag::CompoundBitAnd,
            "^=" => Tag::CompoundBitXor,
            "|=" => Tag::CompoundBitOr,
            _ => return None,
        })
    }

    fn parse_assignment(&mut self) -> Result<NodeIndex, ParseError> {
        let left = self.parse_logical_or()?;
        if let Some(t) = self.peek() {
            if t.kind == TokenKind::Operator {
                if let Some(tag) = Self::assignment_tag(&t.lexeme) {
                    let token = self.current_ref();
                    self.advance();
                    let right = self.parse_assignment()?;
                    return Ok(self.ast.push(tag, token, NodeData::binary(left, right)));
                }
            }
        }
        Ok(left)
    }

    fn binary_level<F>(
        &mut self,
        ops: &[(&str, Tag)],
        mut next: F,
    ) -> Result<NodeIndex, ParseError>
    where
        F: FnMut(&mut Self) -> Result<NodeIndex, ParseError>,
    {
        let mut left = next(self)?;
        loop {
            let matched = self.peek().and_then(|t| {
                if t.kind != TokenKind::Operator {
                    return None;
                }
                ops.iter().find(|(lex, _)| *lex == t.lexeme).copied()
            });
            match matched {
                Some((_, tag)) => {
                    let token = self.current_ref();
                    self.advance();
                    let right = next(self)?;
                    left = self.ast.push(tag, token, NodeData::binary(left, right));
                }
                None => break,
            }
        }
        Ok(left)
    }

    fn parse_logical_or(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("||", Tag::LogicalOr)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("&&", Tag::LogicalAnd)], Self::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("|", Tag::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("^", Tag::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("&", Tag::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("==", Tag::Eq), ("!=", Tag::Ne)], Self::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(
            &[
                ("<=", Tag::Le),
                (">=", Tag::Ge),
                ("<", Tag::Lt),
                (">", Tag::Gt),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("<<", Tag::Shl), (">>", Tag::Shr)], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(&[("+", Tag::Add), ("-", Tag::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeIndex, ParseError> {
        self.binary_level(
            &[("*", Tag::Mul), ("/", Tag::Div), ("%", Tag::Mod)],
            Self::parse_member,
        )
    }

    fn parse_member(&mut self) -> Result<NodeIndex, ParseError> {
        let mut expr = self.parse_prefix()?;
        loop {
            if self.check(TokenKind::Operator, ".") {
                let token = self.current_ref();
                self.advance();
                let field = self.eat_identifier()?;
                let field_id = self.ast.interner.intern(&field);
                expr = self.ast.push(Tag::Member, token, NodeData::binary(expr, field_id));
            } else if self.check(TokenKind::Operator, "->") {
                let token = self.current_ref();
                self.advance();
                let field = self.eat_identifier()?;
                let field_id = self.ast.interner.intern(&field);
                expr = self
                    .ast
                    .push(Tag::MemberArrow, token, NodeData::binary(expr, field_id));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    const PREFIX_OPS: &'static [(&'static str, Tag)] = &[
        ("+", Tag::UnaryPlus),
        ("-", Tag::UnaryMinus),
        ("~", Tag::BitNot),
        ("!", Tag::LogicalNot),
        ("*", Tag::Deref),
        ("&", Tag::AddrOf),
    ];

    fn parse_prefix(&mut self) -> Result<NodeIndex, ParseError> {
        if self.check(TokenKind::Operator, "++") {
            let token = self.current_ref();
            self.advance();
            let operand = self.parse_prefix()?;
            return Ok(self.ast.push(Tag::PreInc, token, NodeData::unary(operand)));
        }
        if self.check(TokenKind::Operator, "--") {
            let token = self.current_ref();
            self.advance();
            let operand = self.parse_prefix()?;
            return Ok(self.ast.push(Tag::PreDec, token, NodeData::unary(operand)));
        }
        if let Some(t) = self.peek() {
            if t.kind == TokenKind::Operator {
                if let Some((_, tag)) = Self::PREFIX_OPS.iter().find(|(lex, _)| *lex == t.lexeme) {
                    let tag = *tag;
                    let token = self.current_ref();
                    self.advance();
                    let operand = self.parse_prefix()?;
                    return Ok(self.ast.push(tag, token, NodeData::unary(operand)));
                }
            }
        }
        // Cast: `TYPE ( expr )` where TYPE starts a known type name.
        if self.is_type_start()
            && self
                .peek_kind_lexeme(1)
                .map(|(k, l)| k == TokenKind::SpecialCharacter && l == "(")
                .unwrap_or(false)
        {
            let token = self.current_ref();
            let ty = self.parse_type()?;
            self.eat(TokenKind::SpecialCharacter, "(")?;
            let operand = self.parse_expression()?;
            self.eat(TokenKind::SpecialCharacter, ")")?;
            let type_idx = self.ast.push_type(ty);
            return Ok(self.ast.push(Tag::Cast, token, NodeData::binary(type_idx, operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<NodeIndex, ParseError> {
        let mut expr = self.parse_call_or_primary()?;
        loop {
            if self.check(TokenKind::Operator, "++") {
                let token = self.current_ref();
                self.advance();
                expr = self.ast.push(Tag::PostInc, token, NodeData::unary(expr));
            } else if self.check(TokenKind::Operator, "--") {
                let token = self.current_ref();
                self.advance();
                expr = self.ast.push(Tag::PostDec, token, NodeData::unary(expr));
            } else if self.check(TokenKind::SpecialCharacter, "[") {
                let token = self.current_ref();
                self.advance();
                let index = self.parse_expression()?;
                self.eat(TokenKind::SpecialCharacter, "]")?;
                expr = self.ast.push(Tag::Index, token, NodeData::binary(expr, index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_or_primary(&mut self) -> Result<NodeIndex, ParseError> {
        if self.check_kind(TokenKind::Identifier)
            && self
                .peek_kind_lexeme(1)
                .map(|(k, l)| k == TokenKind::SpecialCharacter && l == "(")
                .unwrap_or(false)
        {
            let token = self.current_ref();
            let name = self.advance().unwrap().lexeme.clone();
            let name_id = self.ast.interner.intern(&name);
            self.eat(TokenKind::SpecialCharacter, "(")?;
            let mut args = Vec::new();
            while !self.check(TokenKind::SpecialCharacter, ")") {
                args.push(self.parse_expression()?);
                if self.check(TokenKind::SpecialCharacter, ",") {
                    self.advance();
                } else {
                    break;
                }
            }
            self.eat(TokenKind::SpecialCharacter, ")")?;
            let mut extra = vec![name_id, args.len() as u32];
            extra.extend(args);
            let range = self.ast.push_extra_range(&extra);
            return Ok(self
                .ast
                .push(Tag::Call, token, NodeData::binary(range.start, range.len)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<NodeIndex, ParseError> {
        let token = self.current_ref();
        let tok = self
            .peek()
            .cloned()
            .ok_or_else(|| self.unexpected("unexpected end of input"))?;

        match tok.kind {
            TokenKind::LiteralNumber => {
                self.advance();
                parse_number_literal(&tok.lexeme, token, &mut self.ast).map_err(|message| {
                    ParseError::MalformedOperatorSequence {
                        message,
                        line: token.line,
                        column: token.column,
                    }
                })
            }
            TokenKind::LiteralString => {
                self.advance();
                let string_id = self.ast.push_string(tok.lexeme.clone());
                Ok(self
                    .ast
                    .push(Tag::StringLiteral, token, NodeData { lhs: string_id, rhs: 0 }))
            }
            TokenKind::LiteralChar => {
                self.advance();
                let byte = tok.lexeme.bytes().next().unwrap_or(0);
                Ok(self
                    .ast
                    .push(Tag::CharLiteral, token, NodeData { lhs: byte as u32, rhs: 0 }))
            }
            TokenKind::Identifier => {
                self.advance();
                let name_id = self.ast.interner.intern(&tok.lexeme);
                Ok(self
                    .ast
                    .push(Tag::Identifier, token, NodeData { lhs: name_id, rhs: 0 }))
            }
            TokenKind::SpecialCharacter if tok.lexeme == "(" => {
                self.advance();
                let inner = self.parse_expression()?;
                self.eat(TokenKind::SpecialCharacter, ")")?;
                Ok(inner)
            }
            _ => Err(self.unexpected(format!("unexpected token '{}'", tok.lexeme))),
        }
    }
}

fn parse_number_literal(lexeme: &str, token: TokenRef, ast: &mut Ast) -> Result<NodeIndex, String> {
    if let Some(hex) = lexeme.strip_prefix("0x") {
        let value = u64::from_str_radix(&hex.replace('_', ""), 16)
            .map_err(|_| format!("invalid hex literal '{lexeme}'"))?;
        return Ok(ast.push(Tag::IntLiteral, token, NodeData::int_literal(value)));
    }
    if let Some(bin) = lexeme.strip_prefix("0b") {
        let value = u64::from_str_radix(&bin.replace('_', ""), 2)
            .map_err(|_| format!("invalid binary literal '{lexeme}'"))?;
        return Ok(ast.push(Tag::IntLiteral, token, NodeData::int_literal(value)));
    }
    if lexeme.contains('.') {
        let value: f64 = lexeme
            .parse()
            .map_err(|_| format!("invalid floating-point literal '{lexeme}'"))?;
        return Ok(ast.push(Tag::FloatLiteral, token, NodeData::float_literal(value)));
    }
    let value: u64 = lexeme
        .parse()
        .map_err(|_| format!("invalid integer literal '{lexeme}'"))?;
    Ok(ast.push(Tag::IntLiteral, token, NodeData::int_literal(value)))
}

pub fn parse(tokens: &[Token]) -> Result<Ast, ParseError> {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn parse_src(src: &str) -> Ast {
        let tokens = tokenize(src).expect("tokenize");
        parse(&tokens).expect("parse")
    }

    #[test]
    fn parses_global_var_decl() {
        let ast = parse_src("u64 x = 5;");
        assert_eq!(ast.global_declarations.len(), 1);
        assert_eq!(ast.tag(ast.global_declarations[0]), Tag::VarDecl);
    }

    #[test]
    fn parses_function_with_params() {
        let ast = parse_src("u64 add(u64 a, u64 b) { return a + b; }");
        assert_eq!(ast.function_declarations.len(), 1);
        assert_eq!(ast.function_signatures[0].parameters.len(), 2);
    }

    #[test]
    fn precedence_multiplies_before_adding() {
        let ast = parse_src("u64 x = 1 + 2 * 3;");
        let decl = ast.global_declarations[0];
        let range = ast.data(decl).range();
        let initializer = ast.extra_slice(range)[2];
        assert_eq!(ast.tag(initializer), Tag::Add);
    }

    #[test]
    fn assignment_is_right_associative() {
        let ast = parse_src("u64 f() { a = b = 1; }");
        let _ = ast.function_declarations[0]; // smoke: parses without error
    }

    #[test]
    fn class_forward_reference_is_recognized_as_a_type() {
        let ast = parse_src("u64 f(P p) { return 0; } class P { u64 a; }");
        assert!(ast.function_signatures[0].parameters[0].1.is_class());
    }

    #[test]
    fn goto_is_rejected() {
        let tokens = tokenize("u64 f() { goto x; }").unwrap();
        let err = parse(&tokens).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedKeyword { .. }));
    }

    #[test]
    fn else_if_chain_wraps_inner_if_in_a_block() {
        let ast = parse_src("u64 f() { if (1) return 1; else if (2) return 2; }");
        let decl_range = ast.extra_slice(ast.data(ast.function_declarations[0]).range()).to_vec();
        let body = decl_range[2];
        let stmts = ast.extra_slice(ast.data(body).range());
        let if_node = stmts[0];
        let if_range = ast.extra_slice(ast.data(if_node).range());
        let else_branch = if_range[2];
        assert_eq!(ast.tag(else_branch), Tag::Block);
    }
}
