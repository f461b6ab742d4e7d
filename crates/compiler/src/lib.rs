//! Orus's ahead-of-time compiler: lexer, parser, typechecker, optimizer,
//! codegen, and module resolution, wired into a single `compile` entry
//! point.
//!
//! Grounded on `examples/navicore-cem3`'s `lib.rs`, which exposes the same
//! pipeline shape (`resolve` -> `parse` -> `typecheck` -> `codegen`) behind
//! one public function and re-exports its stages as modules for callers
//! (the CLI, test harnesses) that want to stop partway through.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod lexer;
pub mod module_manager;
pub mod optimizer;
pub mod parser;
pub mod symbol;
pub mod typechecker;
pub mod typed_ast;

pub use codegen::CompiledModule;
pub use config::{CompilerConfig, ConfigError, DispatchMode, GcConfig};
pub use module_manager::{ModuleError, ModuleManager};

use orus_core::error::{Diagnostic, DiagnosticSink, ErrorCode};
use orus_core::span::{Position, Span};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation failed with {count} error(s)")]
    Diagnostics { count: usize, diagnostics: Vec<Diagnostic> },
}

/// Runs the full pipeline over one source file: lex, parse, typecheck,
/// optimize, codegen. Imports reachable from `path` are resolved and
/// compiled via a [`ModuleManager`] rooted at the file's own directory
/// plus `ORUSPATH`.
pub fn compile_file(path: impl AsRef<Path>, config: &CompilerConfig) -> Result<CompiledModule, CompileError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).unwrap_or_default();
    compile_source(path, &source, config)
}

pub fn compile_source(path: &Path, source: &str, config: &CompilerConfig) -> Result<CompiledModule, CompileError> {
    debug!("compiling {}", path.display());
    let (tokens, lex_errors) = lexer::tokenize(path.to_path_buf(), source);
    let mut sink = DiagnosticSink::new();
    for err in &lex_errors {
        warn!("lex error in {}: {}", path.display(), err);
        sink.push(Diagnostic::new(
            orus_core::error::ErrorCode::ParseError,
            err.to_string(),
            orus_core::span::Span::point(path.to_path_buf(), orus_core::span::Position::new(1, 1)),
        ));
    }

    let program = parser::parse(&tokens, path.to_path_buf(), &mut sink);
    let typed = typechecker::TypeChecker::new(&mut sink).check_program(&program);

    if sink.has_fatal() {
        warn!("{} failed typechecking with {} diagnostic(s)", path.display(), sink.iter().count());
        return Err(CompileError::Diagnostics { count: sink.iter().count(), diagnostics: sink.into_vec() });
    }

    let (optimized, affinity, residency) = optimizer::optimize(typed, config.passes);
    let compiled = codegen::CodeGenerator::new(&mut sink, &affinity, &residency).compile(&optimized);

    if !sink.is_empty() {
        warn!("{} failed codegen with {} diagnostic(s)", path.display(), sink.iter().count());
        return Err(CompileError::Diagnostics { count: sink.iter().count(), diagnostics: sink.into_vec() });
    }

    if !compiled.imports.is_empty() {
        debug!("{} imports {} name(s), resolving modules", path.display(), compiled.imports.len());
        let fallback_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let mut modules = ModuleManager::from_env(fallback_dir);
        validate_imports(path, &compiled, &mut modules)?;
    }

    debug!("compiled {} successfully", path.display());
    Ok(compiled)
}

/// Resolves and compiles every module `compiled` imports from, purely to
/// check each import names a real module exporting the name it asks for —
/// values aren't read here (a module may have side effects, so running one
/// happens once at VM load time, not at every compile of every importer).
/// A missing module, an import cycle, a failed compile of the imported
/// module, or a name that module doesn't export is reported against
/// `importer_path` rather than the imported module's own file, since
/// that's the file the user actually asked to compile.
fn validate_imports(
    importer_path: &Path,
    compiled: &CompiledModule,
    modules: &mut ModuleManager,
) -> Result<(), CompileError> {
    let mut diagnostics = Vec::new();
    let span_here = Span::point(importer_path.to_path_buf(), Position::new(1, 1));
    for record in &compiled.imports {
        match modules.load(&record.module_name) {
            Ok(loaded) => {
                if !loaded.compiled.exports.iter().any(|e| e == &record.export_name) {
                    diagnostics.push(Diagnostic::new(
                        ErrorCode::Module("unknown-export"),
                        format!("module `{}` has no export named `{}`", record.module_name, record.export_name),
                        span_here.clone(),
                    ));
                }
            }
            Err(err) => {
                diagnostics.push(Diagnostic::new(
                    ErrorCode::Module("import-resolution"),
                    err.to_string(),
                    span_here.clone(),
                ));
            }
        }
    }
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(CompileError::Diagnostics { count: diagnostics.len(), diagnostics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn compiles_a_trivial_program_end_to_end() {
        let config = CompilerConfig::default();
        let result = compile_source(&PathBuf::from("t.orus"), "x = 1 + 2\nprint x\n", &config);
        assert!(result.is_ok());
    }

    #[test]
    fn a_type_error_is_reported_without_panicking() {
        let config = CompilerConfig::default();
        let result = compile_source(&PathBuf::from("t.orus"), "x: bool = 1\n", &config);
        assert!(result.is_err());
    }
}
