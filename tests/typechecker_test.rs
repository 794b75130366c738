use std::collections::HashMap;
use tea_core::ast::Ast;
use tea_core::parser::parse;
use tea_core::tokenizer::tokenize;
use tea_core::typechecker::{typecheck, ClassInfo, TypeError};

fn typecheck_source(src: &str) -> Result<(Ast, HashMap<u32, ClassInfo>), TypeError> {
    let tokens = tokenize(src).expect("tokenize");
    let mut ast = parse(&tokens).expect("parse");
    let classes = typecheck(&mut ast)?;
    Ok((ast, classes))
}

#[test]
fn accepts_a_well_typed_program() {
    assert!(typecheck_source("u64 main() { return 0; }").is_ok());
}

#[test]
fn a_pointer_fits_an_integer_slot_of_the_same_byte_size() {
    // `fits` only compares byte size and the builtin-type discriminant,
    // never pointer depth directly, the way the original's `Type::fits`
    // does not distinguish a pointer from its base type either.
    assert!(typecheck_source("u64 main() { u8* s = \"hi\"; return s; }").is_ok());
}

#[test]
fn rejects_returning_a_class_value_from_an_integer_function() {
    let err = typecheck_source("class P { u64 a; } u64 main() { P p; return p; }").unwrap_err();
    assert!(matches!(err, TypeError::TypeMismatch { .. }));
}

#[test]
fn pointer_minus_pointer_of_equal_depth_yields_a_scaled_integer() {
    let src = "u64 main() { u64[4] xs; u64* a = &xs[3]; u64* b = &xs[0]; return a - b; }";
    assert!(typecheck_source(src).is_ok());
}

#[test]
fn rejects_calling_an_undefined_function() {
    let err = typecheck_source("u64 main() { return missing(); }").unwrap_err();
    assert!(matches!(err, TypeError::UndefinedSymbol { .. }));
}

#[test]
fn rejects_an_unknown_field_access() {
    let err = typecheck_source("class P { u64 a; } u64 main() { P p; return p.nope; }").unwrap_err();
    assert!(matches!(err, TypeError::UndefinedField { .. }));
}

#[test]
fn resolves_class_field_offsets_in_declaration_order() {
    let (_, classes) =
        typecheck_source("class P { u64 a; u64 b; } u64 main() { return 0; }").expect("typecheck");
    let info = classes.values().next().expect("one class");
    assert_eq!(info.fields.len(), 2);
    assert_eq!(info.fields[0].offset, 0);
    assert_eq!(info.fields[1].offset, 8);
}

#[test]
fn accepts_comparable_pointer_types_of_equal_depth() {
    assert!(typecheck_source("u64 main() { u8* a; u8* b; return a == b; }").is_ok());
}

#[test]
fn rejects_a_missing_return_value_from_a_non_void_function() {
    let err = typecheck_source("u64 main() { return; }").unwrap_err();
    assert!(matches!(err, TypeError::TypeMismatch { .. }));
}

#[test]
fn rejects_duplicate_function_declarations() {
    let err =
        typecheck_source("u64 f() { return 0; } u64 f() { return 1; } u64 main() { return 0; }")
            .unwrap_err();
    assert!(matches!(err, TypeError::DuplicateDeclaration { .. }));
}
