//! bas2wasm - BASIC to WebAssembly compiler
//!
//! This is the command-line interface for the bas2wasm compiler.

use clap::Parser;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use bas2wasm::compiler::{Kind, lookup_builtin};
use bas2wasm::lexer::{Lexer, Token, TokenKind};

/// bas2wasm - compiles BASIC scripts to WebAssembly modules
#[derive(Parser, Debug)]
#[command(name = "bas2wasm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input BASIC source file (.bas)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (default: input name with .wasm extension)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print each source line with its tokens instead of compiling
    #[arg(long)]
    tokens: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let source = match fs::read_to_string(&args.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {e}", args.input.display());
            return ExitCode::FAILURE;
        }
    };

    debug!(
        "{}: {} bytes, {} lines",
        args.input.display(),
        source.len(),
        source.lines().count()
    );

    if args.tokens {
        return dump_tokens(&args, &source);
    }

    let assembled = match bas2wasm::compile_with_summary(&source) {
        Ok(assembled) => assembled,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("wasm"));
    debug!("writing {} bytes to {}", assembled.bytes.len(), output.display());
    if let Err(e) = fs::write(&output, &assembled.bytes) {
        eprintln!("error: cannot write '{}': {e}", output.display());
        return ExitCode::FAILURE;
    }

    info!(
        "{} -> {} ({} bytes)",
        args.input.display(),
        output.display(),
        assembled.bytes.len()
    );
    if args.verbose {
        println!("Module: {}", assembled.summary);
    }
    ExitCode::SUCCESS
}

/// Prints every line that holds tokens, followed by the tokens the
/// compiler sees on it. Blank and comment-only lines are listed too with
/// `--verbose`.
fn dump_tokens(args: &Args, source: &str) -> ExitCode {
    let mut total = 0;
    for (index, line) in source.lines().enumerate() {
        let tokens = match Lexer::new(line).collect_tokens() {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("error: line {}: {e}", index + 1);
                return ExitCode::FAILURE;
            }
        };
        if tokens.is_empty() && !args.verbose {
            continue;
        }
        println!("{:4} | {}", index + 1, line.trim_end());
        for token in &tokens {
            println!(
                "     | {:>3}..{:<3} {:<14} {}",
                token.span.start,
                token.span.end,
                token.text,
                annotate(token)
            );
        }
        total += tokens.len();
    }
    info!("{total} tokens in {} lines", source.lines().count());
    ExitCode::SUCCESS
}

/// What a token means to the compiler, for the token dump.
fn annotate(token: &Token) -> String {
    match token.kind {
        TokenKind::Identifier if lookup_builtin(&token.name()).is_some() => "built-in".to_string(),
        TokenKind::Identifier => match Kind::from_sigil(&token.text) {
            Some(kind) => format!("name, {kind}"),
            None => "name".to_string(),
        },
        TokenKind::IntegerLiteral | TokenKind::HexLiteral => {
            format!("integer {}", token.int_value().unwrap_or_default())
        }
        TokenKind::FloatLiteral => format!("float {}", token.float_value().unwrap_or_default()),
        TokenKind::StringLiteral => {
            format!("string {:?}", token.string_value().unwrap_or_default())
        }
        kind if kind.is_keyword() => "keyword".to_string(),
        _ => "operator".to_string(),
    }
}
