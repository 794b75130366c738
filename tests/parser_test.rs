use tea_core::ast::Tag;
use tea_core::parser::{parse, ParseError};
use tea_core::tokenizer::tokenize;

#[test]
fn parses_a_function_with_two_parameters() {
    let tokens = tokenize("u64 add(u64 a, u64 b) { return a + b; }").expect("tokenize");
    let ast = parse(&tokens).expect("parse");
    assert_eq!(ast.function_signatures.len(), 1);
    let sig = &ast.function_signatures[0];
    assert_eq!(sig.parameters.len(), 2);
    assert_eq!(ast.function_declarations.len(), 1);
    assert_eq!(ast.tag(ast.function_declarations[0]), Tag::FunctionDecl);
}

#[test]
fn parses_a_global_variable_with_an_initializer() {
    let tokens = tokenize("u64 counter = 0;").expect("tokenize");
    let ast = parse(&tokens).expect("parse");
    assert_eq!(ast.global_declarations.len(), 1);
    assert_eq!(ast.tag(ast.global_declarations[0]), Tag::VarDecl);
}

#[test]
fn parses_a_class_with_two_fields() {
    let tokens = tokenize("class P { u64 a; u64 b; }").expect("tokenize");
    let ast = parse(&tokens).expect("parse");
    assert_eq!(ast.class_declarations.len(), 1);
    assert_eq!(ast.tag(ast.class_declarations[0]), Tag::ClassDecl);
}

#[test]
fn parses_if_else_as_a_single_statement_node() {
    let tokens = tokenize("u64 main() { if (1) { return 1; } else { return 2; } }").expect("tokenize");
    let ast = parse(&tokens).expect("parse");
    let range = ast.data(ast.function_declarations[0]).range();
    let body = ast.extra_slice(range).to_vec()[2];
    let stmts = ast.extra_slice(ast.data(body).range()).to_vec();
    assert_eq!(stmts.len(), 1);
    assert_eq!(ast.tag(stmts[0]), Tag::If);
}

#[test]
fn rejects_goto_as_unsupported() {
    let tokens = tokenize("u64 main() { goto somewhere; }").expect("tokenize");
    let err = parse(&tokens).unwrap_err();
    assert!(matches!(err, ParseError::UnsupportedKeyword { .. }));
}

#[test]
fn reports_a_missing_closing_paren() {
    let tokens = tokenize("u64 main( { return 0; }").expect("tokenize");
    let err = parse(&tokens).unwrap_err();
    assert!(matches!(err, ParseError::MissingToken { .. }));
}

#[test]
fn parses_pointer_and_array_type_suffixes() {
    let tokens = tokenize("u64 f(u8* s, u64[4] xs) { return 0; }").expect("tokenize");
    let ast = parse(&tokens).expect("parse");
    let sig = &ast.function_signatures[0];
    assert_eq!(sig.parameters[0].1.pointer_depth(), 1);
    assert_eq!(sig.parameters[1].1.pointer_depth(), 1);
}
