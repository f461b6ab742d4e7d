//! The Orus bytecode VM.
//!
//! Consumes an `orus_compiler::CompiledModule` and executes it: a register
//! file split into global/module/frame-local storage (`spec.md` §4.6), a
//! dispatch loop with two interchangeable strategies (`spec.md` §4.7), a
//! mark-and-sweep heap (`spec.md` §4.8), and the small built-in function set
//! callable from bytecode (`spec.md` §4.4).
//!
//! Grounded on `examples/navicore-cem3`'s own crate-root re-export style:
//! one `lib.rs` declaring each stage as its own module and re-exporting the
//! handful of types a caller (the CLI, test harnesses) actually needs.

pub mod arithmetic;
pub mod builtins;
pub mod frame;
pub mod gc;
pub mod register_file;
pub mod vm;

pub use gc::{Gc, GcStats};
pub use vm::{RunOutcome, Vm, VmError};
