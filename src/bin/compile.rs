use clap::Parser;
use std::process::ExitCode;

use tea_core::pipeline;

/// Compiles a tea source file down to a bytecode executable image.
#[derive(Parser)]
struct Cli {
    /// Path to the .tea source file to compile.
    input: std::path::PathBuf,

    /// Path to write the compiled executable image to.
    output: std::path::PathBuf,

    /// Emit a debug symbol table as a `<output>.debug` sidecar file.
    #[arg(short, long)]
    debug: bool,
}

fn debug_sidecar_path(output: &std::path::Path) -> std::path::PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".debug");
    std::path::PathBuf::from(name)
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(err) => {
            println!("Error: could not read {}: {err}", args.input.display());
            return ExitCode::FAILURE;
        }
    };

    match pipeline::compile_source(&source, args.debug) {
        Ok(output) => {
            if let Err(err) = output.executable.write_to_file(&args.output) {
                println!("Error: could not write {}: {err}", args.output.display());
                return ExitCode::FAILURE;
            }
            if let Some(debug) = &output.debug {
                let debug_path = debug_sidecar_path(&args.output);
                if let Err(err) = std::fs::write(&debug_path, debug.to_bytes()) {
                    println!("Error: could not write {}: {err}", debug_path.display());
                    return ExitCode::FAILURE;
                }
                println!(
                    "{} function(s), {} global(s) written to {}",
                    debug.functions.len(),
                    debug.globals.len(),
                    debug_path.display()
                );
                for function in &debug.functions {
                    println!("  {} @ {:#x}", function.name, function.entry_offset);
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            pipeline::print_compile_error(&err, &source);
            ExitCode::FAILURE
        }
    }
}
