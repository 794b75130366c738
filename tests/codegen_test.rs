use tea_core::codegenerator::{generate, generate_with_debug, GenError};
use tea_core::parser::parse;
use tea_core::tokenizer::tokenize;
use tea_core::typechecker::typecheck;
use tea_core::vm::{Io, Vm};

struct NullIo;
impl Io for NullIo {
    fn print_char(&mut self, _byte: u8) {}
    fn get_char(&mut self) -> u8 {
        0
    }
}

struct CapturingIo {
    bytes: Vec<u8>,
}

impl Io for CapturingIo {
    fn print_char(&mut self, byte: u8) {
        self.bytes.push(byte);
    }
    fn get_char(&mut self) -> u8 {
        0
    }
}

struct FixedCharIo(u8);
impl Io for FixedCharIo {
    fn print_char(&mut self, _byte: u8) {}
    fn get_char(&mut self) -> u8 {
        self.0
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

fn run_program_capturing(src: &str) -> (i64, Vec<u8>) {
    let tokens = tokenize(src).expect("tokenize");
    let mut ast = parse(&tokens).expect("parse");
    let classes = typecheck(&mut ast).expect("typecheck");
    let (program, static_data) = generate(&ast, classes).expect("codegen");
    let mut vm = Vm::new(program, static_data);
    let mut io = CapturingIo { bytes: Vec::new() };
    let exit_code = vm.run(&mut io).expect("run");
    (exit_code, io.bytes)
}

#[test]
fn indexes_a_fixed_size_array() {
    let src = "u64 main() { u64[4] xs; xs[0] = 10; xs[1] = 20; xs[2] = 30; xs[3] = 40; return xs[1] + xs[2]; }";
    assert_eq!(run_program(src), 50);
}

#[test]
fn reads_and_writes_a_global_variable() {
    let src = "u64 counter = 0; u64 bump() { counter = counter + 1; return counter; } u64 main() { bump(); bump(); return bump(); }";
    assert_eq!(run_program(src), 3);
}

#[test]
fn prints_the_bytes_of_a_string_literal_through_a_pointer_loop() {
    let src = "u64 print_str(u8* s) { u64 i = 0; while (s[i] != 0) { syscall PRINT_CHAR(s[i]); i = i + 1; } return 0; } u64 main() { print_str(\"hi\"); return 0; }";
    let (exit_code, bytes) = run_program_capturing(src);
    assert_eq!(exit_code, 0);
    assert_eq!(bytes, b"hi");
}

#[test]
fn pointer_arithmetic_is_scaled_by_the_pointee_size() {
    let src = "u64 main() { u64[3] xs; xs[0] = 1; xs[1] = 2; xs[2] = 3; u64* p = &xs[0]; p = p + 1; return *p; }";
    assert_eq!(run_program(src), 2);
}

#[test]
fn get_char_stores_the_read_character_through_the_pointer_argument() {
    let src = "u64 main() { u16 c; syscall GET_CHAR(&c); return c; }";
    let tokens = tokenize(src).expect("tokenize");
    let mut ast = parse(&tokens).expect("parse");
    let classes = typecheck(&mut ast).expect("typecheck");
    let (program, static_data) = generate(&ast, classes).expect("codegen");
    let mut vm = Vm::new(program, static_data);
    let mut io = FixedCharIo(b'Q');
    let exit_code = vm.run(&mut io).expect("run");
    assert_eq!(exit_code, b'Q' as i64);
}

#[test]
fn assigning_a_whole_class_by_value_is_rejected() {
    let src = "class Point { u64 x; u64 y; } u64 main() { Point a; Point b; a = b; return 0; }";
    let tokens = tokenize(src).expect("tokenize");
    let mut ast = parse(&tokens).expect("parse");
    let classes = typecheck(&mut ast).expect("typecheck");
    let err = generate(&ast, classes).unwrap_err();
    assert!(matches!(err, GenError::InvalidOperation(_)));
}

#[test]
fn debug_symbols_record_every_function_and_its_locals() {
    let src = "u64 helper(u64 n) { u64 doubled = n * 2; return doubled; } u64 main() { return helper(4); }";
    let tokens = tokenize(src).expect("tokenize");
    let mut ast = parse(&tokens).expect("parse");
    let classes = typecheck(&mut ast).expect("typecheck");
    let (_, _, debug) = generate_with_debug(&ast, classes).expect("codegen");

    let names: Vec<&str> = debug.functions.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"helper"));
    assert!(names.contains(&"main"));

    let helper = debug.functions.iter().find(|f| f.name == "helper").unwrap();
    assert!(helper.locals.iter().any(|(name, _)| name == "doubled"));
}
