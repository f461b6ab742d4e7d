//! Orus CLI: a thin binary wrapping `orus-compiler` + `orus-runtime`.
//!
//! Grounded on `examples/navicore-cem3/crates/compiler/src/main.rs`'s
//! `clap::Parser` + `Subcommand` shape and its `process::exit` error
//! reporting style; pared down to the two entry points `spec.md` §6 names
//! (`orus <file>` and the interactive REPL) since this crate carries no
//! language semantics of its own.

use clap::{Parser, Subcommand};
use orus_compiler::{compile_file, CompileError, CompilerConfig};
use orus_core::error::Diagnostic;
use orus_runtime::Vm;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "orus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Orus: a statically-typed, register-based scripting language")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run this file directly, equivalent to `orus run <file>`.
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a source file.
    Run {
        file: PathBuf,
        /// Path to an `orus.toml` config file overriding the defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Start the interactive REPL.
    Repl {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    install_tracing();
    let cli = Cli::parse();

    match (cli.command, cli.file) {
        (Some(Commands::Run { file, config }), _) => run_file(&file, config.as_deref()),
        (Some(Commands::Repl { config }), _) => run_repl(config.as_deref()),
        (None, Some(file)) => run_file(&file, None),
        (None, None) => run_repl(None),
    }
}

fn install_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("ORUS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_config(path: Option<&std::path::Path>) -> CompilerConfig {
    match path {
        Some(path) => match CompilerConfig::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("orus: failed to read config {}: {err}", path.display());
                CompilerConfig::default()
            }
        },
        None => CompilerConfig::default(),
    }
}

/// `orus <file>`: exit 0 on success, 1 on a compile error, 2 on a runtime
/// error (`spec.md` §6).
fn run_file(file: &std::path::Path, config_path: Option<&std::path::Path>) -> ExitCode {
    let config = load_config(config_path);
    let module = match compile_file(file, &config) {
        Ok(module) => module,
        Err(CompileError::Diagnostics { diagnostics, .. }) => {
            report_diagnostics(&diagnostics);
            return ExitCode::from(1);
        }
    };

    let mut vm = Vm::load(file, module, config);
    match vm.run_reporting_diagnostics() {
        Ok(()) => ExitCode::SUCCESS,
        Err(diagnostic) => {
            report_diagnostics(std::slice::from_ref(&diagnostic));
            ExitCode::from(2)
        }
    }
}

fn report_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}

/// A line-at-a-time REPL: each entry is compiled and run as its own
/// top-level module, sharing nothing with the previous entry beyond what
/// the user sees printed — `spec.md` treats the REPL itself as an external
/// collaborator, so this is deliberately minimal rather than a stateful
/// incremental-compile session.
fn run_repl(config_path: Option<&std::path::Path>) -> ExitCode {
    let config = load_config(config_path);
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("orus: failed to start the REPL: {err}");
            return ExitCode::from(1);
        }
    };

    println!("Orus {} -- interactive REPL. Ctrl-D to exit.", env!("CARGO_PKG_VERSION"));
    loop {
        match editor.readline(">>> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                run_repl_line(&line, config);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("orus: readline error: {err}");
                break;
            }
        }
    }
    ExitCode::SUCCESS
}

fn run_repl_line(line: &str, config: CompilerConfig) {
    let path = PathBuf::from("<repl>");
    let module = match orus_compiler::compile_source(&path, line, &config) {
        Ok(module) => module,
        Err(CompileError::Diagnostics { diagnostics, .. }) => {
            report_diagnostics(&diagnostics);
            return;
        }
    };
    let mut vm = Vm::load(path, module, config);
    if let Err(diagnostic) = vm.run_reporting_diagnostics() {
        report_diagnostics(std::slice::from_ref(&diagnostic));
    }
}
