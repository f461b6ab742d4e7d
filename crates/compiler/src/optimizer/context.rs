//! Shared context and result types threaded through every optimizer pass.
//!
//! No teacher equivalent exists (Seq emits LLVM IR and leans on LLVM's own
//! optimizer); this is grounded directly on `spec.md` §5's pass list and
//! ordering, shaped like the rest of this crate's "run a named stage,
//! collect what changed" modules (c.f. `typechecker.rs`'s `DefaultingLog`).

use crate::typed_ast::TypedProgram;
use orus_core::error::DiagnosticSink;

/// Picked by [`crate::config::CompilerConfig`]; each pass checks its own
/// flag before running so passes can be toggled independently for testing
/// and for `-O0`/`-O1`/`-O2`-style presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassToggles {
    pub constant_fold: bool,
    pub loop_affinity: bool,
    pub loop_residency: bool,
    pub licm: bool,
}

impl Default for PassToggles {
    fn default() -> Self {
        PassToggles { constant_fold: true, loop_affinity: true, loop_residency: true, licm: true }
    }
}

impl PassToggles {
    pub fn none() -> Self {
        PassToggles { constant_fold: false, loop_affinity: false, loop_residency: false, licm: false }
    }
}

/// Per-pass bookkeeping: how many rewrites it made, for logging and for
/// deciding whether a fixed-point pass (constant folding feeding LICM, say)
/// needs another round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassResult {
    pub rewrites: usize,
}

impl PassResult {
    pub fn changed(&self) -> bool {
        self.rewrites > 0
    }

    pub fn merge(&mut self, other: PassResult) {
        self.rewrites += other.rewrites;
    }
}

/// Carries the program being transformed plus shared facilities (a
/// diagnostic sink for pass-level warnings, e.g. "loop never iterates")
/// across the whole optimizer pipeline.
pub struct OptimizerContext<'a> {
    pub program: TypedProgram,
    pub sink: &'a mut DiagnosticSink,
}

impl<'a> OptimizerContext<'a> {
    pub fn new(program: TypedProgram, sink: &'a mut DiagnosticSink) -> Self {
        OptimizerContext { program, sink }
    }
}
