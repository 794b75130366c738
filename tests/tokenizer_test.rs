use tea_core::tokenizer::{tokenize, TokenKind, TokenizeError};

#[test]
fn tokenizes_a_function_declaration() {
    let tokens = tokenize("u64 add(u64 a, u64 b) { return a + b; }").expect("tokenize");
    assert_eq!(tokens[0].kind, TokenKind::Type);
    assert_eq!(tokens[0].lexeme, "u64");
    assert_eq!(tokens[1].kind, TokenKind::Identifier);
    assert_eq!(tokens[1].lexeme, "add");
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Keyword && t.lexeme == "return"));
}

#[test]
fn tracks_line_and_column_across_newlines() {
    let tokens = tokenize("u64 a;\nu64 b;\n").expect("tokenize");
    let second_decl = tokens.iter().find(|t| t.lexeme == "b").expect("found b");
    assert_eq!(second_decl.line, 1);
}

#[test]
fn reads_escape_sequences_in_string_literals() {
    let tokens = tokenize("\"a\\nb\"").expect("tokenize");
    assert_eq!(tokens[0].kind, TokenKind::LiteralString);
    assert_eq!(tokens[0].lexeme, "a\nb");
}

#[test]
fn rejects_an_unterminated_string_literal() {
    let err = tokenize("\"unterminated").unwrap_err();
    assert!(matches!(err, TokenizeError::UnterminatedLiteral { .. }));
}

#[test]
fn rejects_an_unknown_character() {
    let err = tokenize("u64 a = 1 ` 2;").unwrap_err();
    assert!(matches!(err, TokenizeError::UnknownCharacter { .. }));
}

#[test]
fn greedily_matches_multi_character_operators() {
    let tokens = tokenize("a <= b != c += d").expect("tokenize");
    let operator_lexemes: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Operator)
        .map(|t| t.lexeme.as_str())
        .collect();
    assert_eq!(operator_lexemes, vec!["<=", "!=", "+="]);
}
