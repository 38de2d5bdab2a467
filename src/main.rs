//! Command-line driver.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use inkwell::context::Context;

use xrfc::parser::ParseError;
use xrfc::{codegen, opt, parser};

/// Parse errors are listed up to this count before the listing is cut off.
const MAX_REPORTED_ERRORS: usize = 100;

#[derive(Parser)]
#[command(name = "xrfc", version, about = "Compiles XRF files.")]
struct Cli {
    /// The XRF file to compile.
    file: PathBuf,

    /// Output path for the LLVM IR.
    #[arg(short, long, default_value = "out.ll")]
    output: PathBuf,

    /// Optimization level: 0 = none, 1 = chunk-level, 2 and up adds
    /// program-level chunk fusion.
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 0)]
    opt_level: u32,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Unable to open {}: {}", cli.file.display(), err);
            return ExitCode::from(1);
        }
    };

    let chunks = match parser::parse_source(&source) {
        Ok(chunks) => chunks,
        Err(errors) => {
            report_errors(&errors);
            return ExitCode::from(2);
        }
    };
    log::info!("parsed {} chunks from {}", chunks.len(), cli.file.display());

    let chunks = match cli.opt_level {
        0 => chunks,
        1 => opt::optimize_chunks(&chunks),
        _ => opt::optimize_program(&opt::optimize_chunks(&chunks)),
    };

    let context = Context::create();
    let module = match codegen::generate(&context, &chunks) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("Code generation failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = module.print_to_file(&cli.output) {
        eprintln!("Unable to write {}: {}", cli.output.display(), err);
        return ExitCode::from(3);
    }
    log::info!("wrote LLVM IR to {}", cli.output.display());

    ExitCode::SUCCESS
}

fn report_errors(errors: &[ParseError]) {
    for error in errors.iter().take(MAX_REPORTED_ERRORS) {
        eprintln!("{error}");
    }
    if errors.len() > MAX_REPORTED_ERRORS {
        eprintln!("Too many errors, quitting.");
    }
}
