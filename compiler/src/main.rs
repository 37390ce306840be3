//! P0 compiler CLI entry point.
//!
//! Usage:
//!   p0c compile <input.p0> [-o <output.wat>] [--force]
//!   p0c check <input.p0>      (diagnostics only)
//!   p0c lex <input.p0>        (dump tokens)
//!
//! Logging goes to stderr and is filtered by `P0C_LOG` (default `warn`).

use miette::{NamedSource, Report};
use p0_compiler::{
    errors::CompileError, lexer::Lexer, preprocess, wat, Compilation, CompileOptions,
};
use std::{env, fs, path::PathBuf, process};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: p0c <command> <file.p0> [-o <output.wat>] [--force]";

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("{USAGE}");
        eprintln!("Commands: lex, check, compile");
        process::exit(64);
    }

    let command = &args[1];
    let filename = &args[2];

    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {}", filename, e);
            process::exit(74);
        }
    };

    match command.as_str() {
        "lex" => {
            let text = preprocess::run(&source);
            let mut lexer = Lexer::new(&text);
            for token in lexer.scan_tokens() {
                println!("{token}");
            }
            if !lexer.errors().is_empty() {
                report_errors(filename, &source, lexer.errors());
                process::exit(65);
            }
        }
        "check" => {
            let compilation = p0_compiler::compile(&source);
            report(filename, &source, &compilation);
            if compilation.is_success() {
                println!("No errors.");
            }
            process::exit(exit_code(&compilation));
        }
        "compile" => {
            let options = match parse_options(&args[3..]) {
                Ok(options) => options,
                Err(message) => {
                    eprintln!("{message}");
                    eprintln!("{USAGE}");
                    process::exit(64);
                }
            };

            let compilation = p0_compiler::compile(&source);
            report(filename, &source, &compilation);

            if options.should_write(&compilation) {
                match wat::write_module(&options.output, &compilation.wat()) {
                    Ok(()) => println!("Compiled to {}", options.output.display()),
                    Err(e) => {
                        eprintln!("Error writing output: {}", e);
                        process::exit(74);
                    }
                }
            } else {
                tracing::info!(output = %options.output.display(), "module not written");
            }
            process::exit(exit_code(&compilation));
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            process::exit(64);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("P0C_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse the flags that follow `compile <file>`.
fn parse_options(args: &[String]) -> Result<CompileOptions, String> {
    let mut options = CompileOptions::default();
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => match args.next() {
                Some(path) => options.output = PathBuf::from(path),
                None => return Err("-o needs an output path".to_string()),
            },
            "--force" => options.force = true,
            other => return Err(format!("Unknown option: {other}")),
        }
    }
    Ok(options)
}

fn report(filename: &str, source: &str, compilation: &Compilation) {
    report_errors(filename, source, &compilation.diagnostics);
    for err in &compilation.internal_errors {
        eprintln!("{:?}", Report::new(err.clone()));
    }
}

fn report_errors(filename: &str, source: &str, errors: &[CompileError]) {
    for err in errors {
        let report = Report::new(err.clone())
            .with_source_code(NamedSource::new(filename, source.to_string()));
        eprintln!("{:?}", report);
    }
}

/// Internal errors outrank plain diagnostics.
fn exit_code(compilation: &Compilation) -> i32 {
    if !compilation.internal_errors.is_empty() {
        70
    } else if !compilation.diagnostics.is_empty() {
        65
    } else {
        0
    }
}
