//! Drives the phases end to end: tokenize -> parse -> typecheck -> codegen
//! -> assemble -> write, and load -> run, plus source-position error
//! printing. Grounded on the teacher's `pipeline.rs` (`run_compilation_pipeline`
//! / `print_error` shape), adapted to the new phase list and error enums.

use std::fmt;
use std::path::Path;

use crate::ast::Ast;
use crate::codegenerator::{self, GenError};
use crate::debugsymbols::DebugSymbols;
use crate::executable::{Executable, ExecutableError};
use crate::parser::{self, ParseError};
use crate::tokenizer::{self, TokenizeError};
use crate::typechecker::{self, TypeError};
use crate::vm::{RuntimeError, StdIo, Vm};

#[derive(Debug)]
pub enum CompileError {
    Tokenize(TokenizeError),
    Parse(ParseError),
    Type(TypeError),
    Gen(GenError),
    Io(std::io::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Tokenize(err) => write!(f, "{}", err.message()),
            CompileError::Parse(err) => write!(f, "{}", err.message()),
            CompileError::Type(err) => write!(f, "{}", err.message()),
            CompileError::Gen(err) => write!(f, "{err}"),
            CompileError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::Io(err)
    }
}

/// Result of compiling a source string: the linked executable image plus
/// an optional debug symbol table (present only when asked for).
pub struct CompileOutput {
    pub executable: Executable,
    pub debug: Option<DebugSymbols>,
}

/// Runs tokenize -> parse -> typecheck -> codegen -> assemble over one
/// source string, stopping at the first phase that fails.
pub fn compile_source(source: &str, with_debug_symbols: bool) -> Result<CompileOutput, CompileError> {
    let tokens = tokenizer::tokenize(source).map_err(CompileError::Tokenize)?;
    let mut ast: Ast = parser::parse(&tokens).map_err(CompileError::Parse)?;
    let classes = typechecker::typecheck(&mut ast).map_err(CompileError::Type)?;

    if with_debug_symbols {
        let (program, static_data, debug) =
            codegenerator::generate_with_debug(&ast, classes).map_err(CompileError::Gen)?;
        Ok(CompileOutput {
            executable: Executable::new(static_data, program),
            debug: Some(debug),
        })
    } else {
        let (program, static_data) = codegenerator::generate(&ast, classes).map_err(CompileError::Gen)?;
        Ok(CompileOutput {
            executable: Executable::new(static_data, program),
            debug: None,
        })
    }
}

/// Reads `input`, compiles it, and writes the resulting executable image
/// to `output`. Returns the debug symbol table when one was requested.
pub fn compile_file(
    input: &Path,
    output: &Path,
    with_debug_symbols: bool,
) -> Result<Option<DebugSymbols>, CompileError> {
    let source = std::fs::read_to_string(input)?;
    let result = compile_source(&source, with_debug_symbols)?;
    result
        .executable
        .write_to_file(output)
        .map_err(|err| match err {
            ExecutableError::Io(io_err) => CompileError::Io(io_err),
            other => CompileError::Io(std::io::Error::other(other.to_string())),
        })?;
    Ok(result.debug)
}

#[derive(Debug)]
pub enum RunError {
    Load(ExecutableError),
    Runtime(RuntimeError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Load(err) => write!(f, "{err}"),
            RunError::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl From<ExecutableError> for RunError {
    fn from(err: ExecutableError) -> Self {
        RunError::Load(err)
    }
}

/// Loads a compiled executable image from `path` and runs it to
/// completion on real stdio, returning the VM's exit code.
pub fn run_file(path: &Path) -> Result<i64, RunError> {
    let executable = Executable::read_from_file(path)?;
    let mut vm = Vm::new(executable.program, executable.static_data);
    let mut io = StdIo;
    vm.run(&mut io).map_err(RunError::Runtime)
}

/// Prints a compile error the way the teacher's `print_error` does: the
/// offending source line, a caret under the column, then the message.
/// Errors with no source position (codegen, I/O) just print the message.
pub fn print_compile_error(error: &CompileError, source: &str) {
    match error {
        CompileError::Tokenize(err) => print_positioned(source, err.position(), err.message()),
        CompileError::Parse(err) => print_positioned(source, err.position(), &err.message()),
        CompileError::Type(err) => print_positioned(source, err.position(), &err.message()),
        CompileError::Gen(err) => println!("Error: {err}"),
        CompileError::Io(err) => println!("Error: {err}"),
    }
}

pub fn print_run_error(error: &RunError) {
    println!("Error: {error}");
}

fn print_positioned(source: &str, position: (u32, u32), message: &str) {
    let (line, column) = position;
    if let Some(text) = source.lines().nth(line as usize) {
        println!("{text}");
        println!("{}^", " ".repeat(column as usize));
    }
    println!("Error: {message} (line {}, col {})", line + 1, column + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program() {
        let output = compile_source("u64 main() { return 0; }", false).expect("compile");
        assert!(!output.executable.to_bytes().is_empty());
        assert!(output.debug.is_none());
    }

    #[test]
    fn with_debug_symbols_records_main() {
        let output = compile_source("u64 main() { return 0; }", true).expect("compile");
        let debug = output.debug.expect("debug symbols requested");
        assert_eq!(debug.functions.len(), 1);
        assert_eq!(debug.functions[0].name, "main");
    }

    #[test]
    fn reports_a_tokenize_error_with_position() {
        let err = compile_source("u64 main() { return `; }", false).unwrap_err();
        assert!(matches!(err, CompileError::Tokenize(_)));
    }

    #[test]
    fn reports_a_parse_error() {
        let err = compile_source("u64 main( { return 0; }", false).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn reports_a_type_error() {
        // A u64-typed literal (integer literals are always u64) is 8 bytes,
        // too wide to fit a u8 return slot.
        let err = compile_source("u8 main() { return 1000000; }", false).unwrap_err();
        assert!(matches!(err, CompileError::Type(_)));
    }

    #[test]
    fn round_trips_compile_and_run_through_files() {
        let dir = std::env::temp_dir();
        let input = dir.join("tea_core_pipeline_test_input.tea");
        let output = dir.join("tea_core_pipeline_test_output.teax");
        std::fs::write(&input, "u64 main() { return 7; }").unwrap();

        compile_file(&input, &output, false).expect("compile_file");
        let exit_code = run_file(&output).expect("run_file");
        assert_eq!(exit_code, 7);

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }
}
