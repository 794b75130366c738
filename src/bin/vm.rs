use clap::Parser;
use std::process::ExitCode;

use tea_core::pipeline;

/// Loads and runs a compiled tea bytecode executable image.
#[derive(Parser)]
struct Cli {
    /// Path to the compiled executable image to run.
    program: std::path::PathBuf,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    match pipeline::run_file(&args.program) {
        Ok(exit_code) => ExitCode::from(exit_code.rem_euclid(256) as u8),
        Err(err) => {
            pipeline::print_run_error(&err);
            ExitCode::FAILURE
        }
    }
}
