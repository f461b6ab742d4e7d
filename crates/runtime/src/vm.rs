//! The Orus bytecode VM: owns the register file, call stack, heap, and the
//! dispatch loop.
//!
//! `spec.md` §4.7: two dispatch strategies that must be behaviorally
//! equivalent. Rust has no computed-goto, so both are rendered as the design
//! note in §9 suggests — "an indirect-call table of handler functions" for
//! `Threaded`, "a match on opcode within a tight loop" for `Switch` — and
//! both call the exact same `Vm::h_*` methods, so there is exactly one
//! implementation of every opcode's semantics; only the means of reaching it
//! differs. Grounded on the opcode-handler-table idiom in
//! `other_examples/NiltonVolpato-melbi/instruction_set.rs` and
//! `other_examples/pliniker-eval-rs/bytecode.rs`.

use crate::arithmetic::{f64_op, i32_op, i64_op, numeric_binary, u32_op, u64_op};
use crate::frame::Frame;
use crate::gc::Gc;
use crate::register_file::{FRAME_WINDOW_BASE, MODULE_BASE};
use orus_compiler::CompiledModule;
use orus_compiler::{CompilerConfig, DispatchMode};
use orus_core::chunk::Chunk;
use orus_core::error::{Diagnostic, ErrorCode};
use orus_core::opcode::Opcode;
use orus_core::span::Span;
use orus_core::value::{Heap, HeapObject, ObjectId, Upvalue, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace, warn};

const MAX_CALL_DEPTH: usize = 512;

/// Anything that can go wrong while executing already-compiled bytecode.
/// `spec.md` §7 "Runtime errors": unwinds frame-by-frame to the nearest
/// `try`, or terminates the program if none is active.
#[derive(Debug, Error, PartialEq)]
pub enum VmError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("wrong number of arguments: expected {expected}, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("call stack exhausted")]
    StackOverflow,
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("invalid opcode byte at offset {offset}")]
    InvalidOpcode { offset: usize },
    #[error("unknown builtin id {0}")]
    UnknownBuiltin(u8),
    #[error("integer overflow")]
    Overflow,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("unsupported instruction: {0}")]
    Unsupported(&'static str),
}

impl VmError {
    /// Lowers a runtime error to the shared diagnostic taxonomy so the CLI
    /// can report it the same way it reports a compile error.
    pub fn into_diagnostic(self, span: Span) -> Diagnostic {
        let tag: &'static str = match &self {
            VmError::DivisionByZero => "division-by-zero",
            VmError::TypeMismatch { .. } => "type-mismatch",
            VmError::Arity { .. } => "arity",
            VmError::StackOverflow => "stack-overflow",
            VmError::IndexOutOfBounds { .. } => "index-out-of-bounds",
            VmError::InvalidOpcode { .. } => "invalid-opcode",
            VmError::UnknownBuiltin(_) => "unknown-builtin",
            VmError::Overflow => "overflow",
            VmError::Io(_) => "io",
            VmError::Unsupported(_) => "unsupported",
        };
        let message = self.to_string();
        Diagnostic::new(ErrorCode::Runtime(tag), message, span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    Continue,
    Halted,
}

struct CompiledFunction {
    chunk: Rc<Chunk>,
    arity: u8,
    upvalue_count: u8,
}

/// The VM for one loaded module: register file, heap, call stack, and GC.
pub struct Vm {
    #[allow(dead_code)]
    file: PathBuf,
    functions: Vec<CompiledFunction>,
    call_stack: Vec<Frame>,
    globals: crate::register_file::GlobalRegisters,
    pub(crate) heap: Heap,
    gc: Gc,
    config: CompilerConfig,
    intern_table: HashMap<String, ObjectId>,
    /// One resolved value per entry of the compiled module's `imports`
    /// table, in order — `ImportBinding`'s operand is an index into this,
    /// not into the table itself. Resolved once, up front, in `load`/
    /// `load_with_modules`; a module whose imports don't resolve (not
    /// found, import cycle, or a compile/runtime error in the imported
    /// module) binds `Value::Nil` for the affected names rather than
    /// failing `load` itself.
    import_values: Vec<Value>,
}

impl Vm {
    /// Loads a compiled module: resolves every [`orus_compiler::codegen::PendingString`]
    /// placeholder into a real heap-backed string constant, wraps each
    /// chunk in an `Rc` so frames can cheaply share it, and pushes the entry
    /// frame ready to run. Imports are resolved against a fresh
    /// [`orus_compiler::ModuleManager`] rooted at `file`'s own directory
    /// plus `ORUSPATH`; see [`Self::load_with_modules`] to share one
    /// manager (and its cycle/cache state) across a whole import graph.
    pub fn load(file: impl Into<PathBuf>, module: CompiledModule, config: CompilerConfig) -> Self {
        let file = file.into();
        let fallback_dir = file.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let mut modules = orus_compiler::ModuleManager::from_env(fallback_dir);
        Self::load_with_modules(file, module, config, &mut modules)
    }

    /// Like [`Self::load`], but resolves imports through a caller-supplied
    /// [`orus_compiler::ModuleManager`] so a whole tree of imports shares one
    /// cache and one cycle-detection stack instead of each nested import
    /// starting a fresh manager rooted at its own directory.
    pub fn load_with_modules(
        file: impl Into<PathBuf>,
        mut module: CompiledModule,
        config: CompilerConfig,
        modules: &mut orus_compiler::ModuleManager,
    ) -> Self {
        let file = file.into();
        debug!("loading {} ({} function(s), {} import(s))", file.display(), module.functions.len(), module.imports.len());
        let mut heap = Heap::new();
        let mut intern_table = HashMap::new();

        let pending = std::mem::take(&mut module.pending_strings);
        for item in pending {
            let id = intern_string_into(&mut heap, &mut intern_table, &item.text, config.string_interning_threshold);
            match item.function_index {
                None => module.chunk.patch_constant(item.constant_index, Value::String(id)),
                Some(fi) => module.functions[fi as usize].chunk.patch_constant(item.constant_index, Value::String(id)),
            }
        }

        let import_values = Self::resolve_imports(&module.imports, config, modules);

        let functions = module
            .functions
            .into_iter()
            .map(|proto| CompiledFunction { chunk: Rc::new(proto.chunk), arity: proto.arity, upvalue_count: proto.upvalue_count })
            .collect();

        let gc = Gc::new(config.gc);
        let entry_chunk = Rc::new(module.chunk);
        let entry_frame = Frame::new(None, entry_chunk, None);

        Vm {
            file,
            functions,
            call_stack: vec![entry_frame],
            globals: crate::register_file::GlobalRegisters::new(),
            heap,
            gc,
            config,
            intern_table,
            import_values,
        }
    }

    /// Resolves every `(module_name, export_name)` pair a chunk's
    /// `ImportBinding` instructions address by position: compiles each
    /// distinct imported module at most once via `modules`, runs it to
    /// completion in its own `Vm`, and reads the named export's value off
    /// that run's global registers (`CompiledModule::export_registers`).
    /// A module referenced by more than one import is only compiled and run
    /// once even across nested imports, since `modules` threads through the
    /// whole recursion.
    fn resolve_imports(
        imports: &[orus_core::chunk::ImportRecord],
        config: CompilerConfig,
        modules: &mut orus_compiler::ModuleManager,
    ) -> Vec<Value> {
        let mut by_module: HashMap<String, HashMap<String, Value>> = HashMap::new();
        imports
            .iter()
            .map(|record| {
                let exported = by_module
                    .entry(record.module_name.clone())
                    .or_insert_with(|| Self::run_module_for_exports(&record.module_name, config, modules));
                exported.get(&record.export_name).cloned().unwrap_or(Value::Nil)
            })
            .collect()
    }

    /// Compiles, loads, and runs one imported module to completion, then
    /// snapshots the value behind every name it `export`s.
    fn run_module_for_exports(
        name: &str,
        config: CompilerConfig,
        modules: &mut orus_compiler::ModuleManager,
    ) -> HashMap<String, Value> {
        let loaded = match modules.load(name) {
            Ok(loaded) => loaded,
            Err(_) => return HashMap::new(),
        };
        let compiled = loaded.compiled.clone();
        let export_registers = compiled.export_registers.clone();
        let mut sub_vm = Vm::load_with_modules(loaded.path.clone(), compiled, config, modules);
        if sub_vm.run().is_err() {
            return HashMap::new();
        }
        export_registers
            .into_iter()
            .map(|(name, raw)| (name, sub_vm.globals.get(raw).clone()))
            .collect()
    }

    /// Runs to completion (`Halt`), ignoring any configured instruction
    /// budget.
    pub fn run(&mut self) -> Result<(), VmError> {
        match self.run_with_budget(None)? {
            RunOutcome::Completed => Ok(()),
            RunOutcome::Interrupted => unreachable!("an unbounded run cannot be interrupted"),
        }
    }

    /// Runs until `Halt`, or until `budget` instructions have executed
    /// without completing (`spec.md` §5 "Cancellation": a host may decrement
    /// an instruction budget between dispatches and reclaim control
    /// cooperatively). `None` runs to completion.
    pub fn run_with_budget(&mut self, budget: Option<u64>) -> Result<RunOutcome, VmError> {
        trace!("dispatch loop starting for {} with budget {:?}", self.file.display(), budget);
        let mut remaining = budget;
        loop {
            if remaining == Some(0) {
                return Ok(RunOutcome::Interrupted);
            }
            let outcome = match self.config.dispatch_mode {
                DispatchMode::Switch => self.step_switch()?,
                DispatchMode::Threaded => self.step_threaded()?,
            };
            if outcome == StepOutcome::Halted {
                return Ok(RunOutcome::Completed);
            }
            if let Some(r) = remaining.as_mut() {
                *r -= 1;
            }
        }
    }

    fn current_span(&self) -> Span {
        let frame = self.call_stack.last().unwrap();
        let line = frame.chunk.line_at(frame.ip.min(frame.chunk.len().saturating_sub(1)));
        let column = frame.chunk.column_at(frame.ip.min(frame.chunk.len().saturating_sub(1)));
        Span::point(self.file.clone(), orus_core::span::Position::new(line, column))
    }

    /// Runs to completion and converts any runtime error into a diagnostic
    /// carrying the offending instruction's source location.
    pub fn run_reporting_diagnostics(&mut self) -> Result<(), Diagnostic> {
        self.run().map_err(|err| {
            let span = self.current_span();
            warn!("{} aborted: {}", self.file.display(), err);
            err.into_diagnostic(span)
        })
    }

    // --- dispatch --------------------------------------------------------

    fn fetch_opcode(&self) -> Result<Opcode, VmError> {
        let frame = self.call_stack.last().unwrap();
        frame.chunk.read_op(frame.ip).ok_or(VmError::InvalidOpcode { offset: frame.ip })
    }

    fn step_switch(&mut self) -> Result<StepOutcome, VmError> {
        let op = self.fetch_opcode()?;
        self.dispatch(op)
    }

    fn step_threaded(&mut self) -> Result<StepOutcome, VmError> {
        let op = self.fetch_opcode()?;
        HANDLERS[op as usize](self, op)
    }

    /// The single switch/table-dispatched entry point every opcode's
    /// semantics actually live behind.
    fn dispatch(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        use Opcode::*;
        match op {
            Nop => self.h_nop(),
            LoadConst | LoadI32Const | LoadI64Const | LoadF64Const => self.h_load_const(),
            LoadNil => self.h_load_nil(),
            LoadBool => self.h_load_bool(),
            Move => self.h_move(),
            Add | Sub | Mul | Div | Mod | Eq | NotEq | Lt | LtEq | Gt | GtEq | And | Or => {
                self.h_binary_generic(op)
            }
            Neg | Not => self.h_unary(op),
            AddI32Typed | SubI32Typed | MulI32Typed | DivI32Typed | LtI32Typed | EqI32Typed => {
                self.h_typed_i32(op)
            }
            AddI32TypedChecked => self.h_add_i32_checked(),
            AddI64Typed | SubI64Typed | MulI64Typed | DivI64Typed | LtI64Typed | EqI64Typed => {
                self.h_typed_i64(op)
            }
            AddI64TypedChecked => self.h_add_i64_checked(),
            AddU32Typed | SubU32Typed | MulU32Typed => self.h_typed_u32(op),
            AddU64Typed | SubU64Typed | MulU64Typed => self.h_typed_u64(op),
            AddF64Typed | SubF64Typed | MulF64Typed | DivF64Typed | LtF64Typed | EqF64Typed => {
                self.h_typed_f64(op)
            }
            Cast => self.h_cast(),
            Jump => self.h_jump(),
            JumpIfFalse => self.h_jump_if_false(),
            Loop => self.h_loop(),
            Call => self.h_call(),
            Return => self.h_return(),
            ReturnNil => self.h_return_nil(),
            Closure => self.h_closure(),
            GetField => self.h_get_field(),
            SetField => self.h_set_field(),
            NewArray => self.h_new_array(),
            GetIndex => self.h_get_index(),
            SetIndex => self.h_set_index(),
            NewStruct => Err(VmError::Unsupported("NEW_STRUCT: no struct literal expression reaches codegen yet")),
            LoadSpill => self.h_load_spill(),
            StoreSpill => self.h_store_spill(),
            ImportBinding => self.h_import_binding(),
            CallBuiltin => self.h_call_builtin(),
            Print => self.h_print(),
            Wide => Err(VmError::Unsupported("WIDE: no operand codegen emits today needs the 16-bit escape")),
            Halt => Ok(StepOutcome::Halted),
        }
    }

    // --- cursor helpers ----------------------------------------------------

    fn advance_opcode_byte(&mut self) {
        self.call_stack.last_mut().unwrap().ip += 1;
    }

    fn read_op_u8(&mut self) -> u8 {
        let frame = self.call_stack.last_mut().unwrap();
        let byte = frame.chunk.read_u8(frame.ip);
        frame.ip += 1;
        byte
    }

    fn read_op_u16(&mut self) -> u16 {
        let frame = self.call_stack.last_mut().unwrap();
        let value = frame.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn set_ip(&mut self, ip: usize) {
        self.call_stack.last_mut().unwrap().ip = ip;
    }

    fn constant(&self, idx: u16) -> Value {
        self.call_stack.last().unwrap().chunk.constant(idx).clone()
    }

    // --- register access ----------------------------------------------------

    fn read_reg(&self, raw: u8) -> Value {
        if raw < FRAME_WINDOW_BASE {
            self.globals.get(raw).clone()
        } else if raw < MODULE_BASE {
            self.call_stack.last().unwrap().window.get(raw).clone()
        } else {
            self.globals.get_module(raw).clone()
        }
    }

    fn write_reg(&mut self, raw: u8, value: Value) {
        if raw < FRAME_WINDOW_BASE {
            self.globals.set(raw, value);
        } else if raw < MODULE_BASE {
            self.call_stack.last_mut().unwrap().window.set(raw, value);
        } else {
            self.globals.set_module(raw, value);
        }
    }

    fn expect_i32(&self, raw: u8) -> Result<i32, VmError> {
        match self.read_reg(raw) {
            Value::I32(v) => Ok(v),
            other => Err(VmError::TypeMismatch { expected: "i32", found: other.type_name() }),
        }
    }

    fn expect_i64(&self, raw: u8) -> Result<i64, VmError> {
        match self.read_reg(raw) {
            Value::I64(v) => Ok(v),
            other => Err(VmError::TypeMismatch { expected: "i64", found: other.type_name() }),
        }
    }

    fn expect_u32(&self, raw: u8) -> Result<u32, VmError> {
        match self.read_reg(raw) {
            Value::U32(v) => Ok(v),
            other => Err(VmError::TypeMismatch { expected: "u32", found: other.type_name() }),
        }
    }

    fn expect_u64(&self, raw: u8) -> Result<u64, VmError> {
        match self.read_reg(raw) {
            Value::U64(v) => Ok(v),
            other => Err(VmError::TypeMismatch { expected: "u64", found: other.type_name() }),
        }
    }

    fn expect_f64(&self, raw: u8) -> Result<f64, VmError> {
        match self.read_reg(raw) {
            Value::F64(v) => Ok(v),
            other => Err(VmError::TypeMismatch { expected: "f64", found: other.type_name() }),
        }
    }

    fn expect_index(&self, raw: u8) -> Result<usize, VmError> {
        match self.read_reg(raw) {
            Value::I32(v) => Ok(v as usize),
            Value::I64(v) => Ok(v as usize),
            Value::U32(v) => Ok(v as usize),
            Value::U64(v) => Ok(v as usize),
            other => Err(VmError::TypeMismatch { expected: "integer index", found: other.type_name() }),
        }
    }

    // --- string interning / display -----------------------------------------

    /// Interns `text` if it meets the configured threshold (`spec.md` §3,
    /// resolved to 32 bytes in `DESIGN.md`); otherwise allocates a fresh,
    /// uninterned string object.
    pub(crate) fn intern_string(&mut self, text: String) -> ObjectId {
        intern_string_into(&mut self.heap, &mut self.intern_table, &text, self.config.string_interning_threshold)
    }

    pub(crate) fn heap_string(&self, id: ObjectId) -> Result<&str, VmError> {
        match self.heap.get(id) {
            HeapObject::String(s) => Ok(s.as_str()),
            other => Err(VmError::TypeMismatch { expected: "string", found: other.kind_name() }),
        }
    }

    pub(crate) fn display_value(&self, value: &Value) -> String {
        match value {
            Value::String(id) => self.heap.get(*id).to_owned_string(),
            Value::Array(id) => match self.heap.get(*id) {
                HeapObject::Array(items) => {
                    let parts: Vec<String> = items.iter().map(|v| self.display_value(v)).collect();
                    format!("[{}]", parts.join(", "))
                }
                other => other.kind_name().to_string(),
            },
            Value::StructInstance(id) => match self.heap.get(*id) {
                HeapObject::StructInstance { type_name, fields } => {
                    let parts: Vec<String> = fields.iter().map(|v| self.display_value(v)).collect();
                    format!("{type_name} {{ {} }}", parts.join(", "))
                }
                other => other.kind_name().to_string(),
            },
            other => other.to_string(),
        }
    }

    fn numeric_as_i64(&self, value: &Value) -> Result<i64, VmError> {
        match value {
            Value::I32(v) => Ok(*v as i64),
            Value::I64(v) => Ok(*v),
            Value::U32(v) => Ok(*v as i64),
            Value::U64(v) => Ok(*v as i64),
            Value::F64(v) => Ok(*v as i64),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(VmError::TypeMismatch { expected: "numeric", found: other.type_name() }),
        }
    }

    fn numeric_as_f64(&self, value: &Value) -> Result<f64, VmError> {
        match value {
            Value::I32(v) => Ok(*v as f64),
            Value::I64(v) => Ok(*v as f64),
            Value::U32(v) => Ok(*v as f64),
            Value::U64(v) => Ok(*v as f64),
            Value::F64(v) => Ok(*v),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(VmError::TypeMismatch { expected: "numeric", found: other.type_name() }),
        }
    }

    fn cast_value(&mut self, value: Value, tag: u8) -> Result<Value, VmError> {
        Ok(match tag {
            0 => Value::I32(self.numeric_as_i64(&value)? as i32),
            1 => Value::I64(self.numeric_as_i64(&value)?),
            2 => Value::U32(self.numeric_as_i64(&value)? as u32),
            3 => Value::U64(self.numeric_as_i64(&value)? as u64),
            4 => Value::F64(self.numeric_as_f64(&value)?),
            5 => Value::Bool(value.is_truthy()),
            6 => {
                let text = self.display_value(&value);
                Value::String(self.intern_string(text))
            }
            _ => return Err(VmError::Unsupported("cast to an unknown type tag")),
        })
    }

    fn generic_binary(&mut self, op: Opcode, left: Value, right: Value) -> Result<Value, VmError> {
        use Opcode::*;
        match (op, &left, &right) {
            (Add, Value::String(a), Value::String(b)) => {
                let mut out = self.heap_string(*a)?.to_string();
                out.push_str(self.heap_string(*b)?);
                Ok(Value::String(self.intern_string(out)))
            }
            (Eq, _, _) => Ok(Value::Bool(left.values_equal(&right))),
            (NotEq, _, _) => Ok(Value::Bool(!left.values_equal(&right))),
            (And, _, _) => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
            (Or, _, _) => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
            (Add | Sub | Mul | Div | Mod | Lt | LtEq | Gt | GtEq, _, _) => numeric_binary(op, left, right),
            _ => Err(VmError::TypeMismatch { expected: "numeric or string operands", found: left.type_name() }),
        }
    }

    fn generic_unary(&self, op: Opcode, value: Value) -> Result<Value, VmError> {
        match (op, value) {
            (Opcode::Not, v) => Ok(Value::Bool(!v.is_truthy())),
            (Opcode::Neg, Value::I32(v)) => Ok(Value::I32(v.wrapping_neg())),
            (Opcode::Neg, Value::I64(v)) => Ok(Value::I64(v.wrapping_neg())),
            (Opcode::Neg, Value::F64(v)) => Ok(Value::F64(-v)),
            (Opcode::Neg, other) => Err(VmError::TypeMismatch { expected: "a signed numeric value", found: other.type_name() }),
            _ => Err(VmError::Unsupported("unary opcode outside Neg/Not")),
        }
    }

    // --- opcode handlers -----------------------------------------------------

    fn h_nop(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        Ok(StepOutcome::Continue)
    }

    fn h_load_const(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let idx = self.read_op_u16();
        let value = self.constant(idx);
        self.write_reg(dst, value);
        Ok(StepOutcome::Continue)
    }

    fn h_load_nil(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        self.write_reg(dst, Value::Nil);
        Ok(StepOutcome::Continue)
    }

    fn h_load_bool(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let imm = self.read_op_u8();
        self.write_reg(dst, Value::Bool(imm != 0));
        Ok(StepOutcome::Continue)
    }

    fn h_move(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let src = self.read_op_u8();
        let value = self.read_reg(src);
        self.write_reg(dst, value);
        Ok(StepOutcome::Continue)
    }

    fn h_binary_generic(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let left = self.read_reg(l);
        let right = self.read_reg(r);
        let result = self.generic_binary(op, left, right)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_unary(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let src = self.read_op_u8();
        let value = self.read_reg(src);
        let result = self.generic_unary(op, value)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    /// `LOAD_SPILL dst, spill_index`: materializes a register the allocator
    /// could not fit in R64-239 back into a real register before its value
    /// is consumed (`codegen::registers::RegisterId::spilled`).
    fn h_load_spill(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let index = self.read_op_u16();
        let value = self.call_stack.last().unwrap().load_spill(index);
        self.write_reg(dst, value);
        Ok(StepOutcome::Continue)
    }

    /// `STORE_SPILL spill_index, src`: relocates a value out of a real
    /// register into the current frame's spill area, the counterpart to
    /// [`Self::h_load_spill`].
    fn h_store_spill(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let index = self.read_op_u16();
        let src = self.read_op_u8();
        let value = self.read_reg(src);
        self.call_stack.last_mut().unwrap().store_spill(index, value);
        Ok(StepOutcome::Continue)
    }

    /// `IMPORT_BINDING dst, import_index`: writes a cross-module import's
    /// already-resolved value (computed once up front by
    /// [`Self::resolve_imports`]) into the importing module's register
    /// file. All the real work — compiling and running the other module,
    /// reading its exported globals — happened before this module's code
    /// ever started executing; this instruction is just the load.
    fn h_import_binding(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let index = self.read_op_u16();
        let value = self.import_values.get(index as usize).cloned().unwrap_or(Value::Nil);
        self.write_reg(dst, value);
        Ok(StepOutcome::Continue)
    }

    fn h_typed_i32(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_i32(l)?;
        let b = self.expect_i32(r)?;
        let result = i32_op(base_op(op), a, b)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_typed_i64(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_i64(l)?;
        let b = self.expect_i64(r)?;
        let result = i64_op(base_op(op), a, b)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_typed_u32(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_u32(l)?;
        let b = self.expect_u32(r)?;
        let result = u32_op(base_op(op), a, b)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_typed_u64(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_u64(l)?;
        let b = self.expect_u64(r)?;
        let result = u64_op(base_op(op), a, b)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_typed_f64(&mut self, op: Opcode) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_f64(l)?;
        let b = self.expect_f64(r)?;
        let result = f64_op(base_op(op), a, b)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    /// `AddI32TypedChecked`: on overflow, widen to i64 rather than wrap —
    /// representable since `Value` has a wider signed variant.
    fn h_add_i32_checked(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_i32(l)?;
        let b = self.expect_i32(r)?;
        let result = match a.checked_add(b) {
            Some(v) => Value::I32(v),
            None => Value::I64(a as i64 + b as i64),
        };
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    /// `AddI64TypedChecked`: `Value` has no wider signed variant than i64, so
    /// `DESIGN.md`'s Open Question resolution is to raise a runtime error
    /// instead of silently wrapping.
    fn h_add_i64_checked(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let l = self.read_op_u8();
        let r = self.read_op_u8();
        let a = self.expect_i64(l)?;
        let b = self.expect_i64(r)?;
        let result = a.checked_add(b).ok_or(VmError::Overflow)?;
        self.write_reg(dst, Value::I64(result));
        Ok(StepOutcome::Continue)
    }

    fn h_cast(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let src = self.read_op_u8();
        let tag = self.read_op_u8();
        let value = self.read_reg(src);
        let result = self.cast_value(value, tag)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_jump(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let target = self.read_op_u16();
        self.set_ip(target as usize);
        Ok(StepOutcome::Continue)
    }

    fn h_jump_if_false(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let cond = self.read_op_u8();
        let target = self.read_op_u16();
        if !self.read_reg(cond).is_truthy() {
            self.set_ip(target as usize);
        }
        Ok(StepOutcome::Continue)
    }

    fn h_loop(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let target = self.read_op_u16();
        self.set_ip(target as usize);
        Ok(StepOutcome::Continue)
    }

    fn h_call(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let func_reg = self.read_op_u8();
        let argc = self.read_op_u8();
        let dst = self.read_op_u8();
        self.do_call(func_reg, argc, dst)?;
        Ok(StepOutcome::Continue)
    }

    /// Resolves the callee (a bare function-table index, a `Function`, or a
    /// `Closure`), collects its `argc` arguments from the registers
    /// immediately following `func_reg` (`func_reg+1 ..= func_reg+argc`, per
    /// the calling convention fixed in codegen's `emit_call`), and pushes a
    /// fresh frame with those values bound to the callee's parameter
    /// registers (R64, R65, ... — the same order `declare_local` assigns
    /// them in during codegen).
    fn do_call(&mut self, func_reg: u8, argc: u8, dst: u8) -> Result<(), VmError> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(VmError::StackOverflow);
        }
        let callee = self.read_reg(func_reg);
        let mut args = Vec::with_capacity(argc as usize);
        for i in 0..argc {
            args.push(self.read_reg(func_reg + 1 + i));
        }

        let function_index = match &callee {
            Value::I64(index) => *index as u32,
            Value::Function(id) => match self.heap.get(*id) {
                HeapObject::Function { chunk_index, .. } => *chunk_index,
                _ => return Err(VmError::TypeMismatch { expected: "function", found: "non-function heap object" }),
            },
            Value::Closure(id) => match self.heap.get(*id) {
                HeapObject::Closure { function, .. } => match self.heap.get(*function) {
                    HeapObject::Function { chunk_index, .. } => *chunk_index,
                    _ => return Err(VmError::TypeMismatch { expected: "function", found: "non-function heap object" }),
                },
                _ => return Err(VmError::TypeMismatch { expected: "closure", found: "non-closure heap object" }),
            },
            other => {
                return Err(VmError::TypeMismatch {
                    expected: "function, closure, or function-table index",
                    found: other.type_name(),
                })
            }
        };

        // Upvalues a closure captured at creation time: bound into the new
        // frame's locals right after the arguments, at the same registers
        // `emit_function` declared them at while compiling the closure's
        // body (`spec.md` §4.5 "Closures capture upvalues by value or by
        // reference depending on declaration").
        let captured: Vec<Value> = match &callee {
            Value::Closure(id) => match self.heap.get(*id) {
                HeapObject::Closure { captured, .. } => captured
                    .iter()
                    .map(|up| match up {
                        Upvalue::Value(v) => v.clone(),
                        Upvalue::Cell(cell_id) => match self.heap.get(*cell_id) {
                            HeapObject::Cell(v) => v.clone(),
                            _ => Value::Nil,
                        },
                    })
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        let callee_proto = self
            .functions
            .get(function_index as usize)
            .ok_or(VmError::TypeMismatch { expected: "a valid function index", found: "an out-of-range index" })?;
        if args.len() != callee_proto.arity as usize {
            return Err(VmError::Arity { expected: callee_proto.arity as usize, found: args.len() });
        }

        let chunk = callee_proto.chunk.clone();
        let mut frame = Frame::new(Some(function_index), chunk, Some(dst));
        for (i, value) in args.into_iter().enumerate() {
            frame.window.set(FRAME_WINDOW_BASE + i as u8, value);
        }
        for (i, value) in captured.into_iter().enumerate() {
            frame.window.set(FRAME_WINDOW_BASE + argc + i as u8, value);
        }
        self.call_stack.push(frame);
        Ok(())
    }

    fn h_return(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let src = self.read_op_u8();
        let value = self.read_reg(src);
        self.do_return(value)
    }

    fn h_return_nil(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        self.do_return(Value::Nil)
    }

    fn do_return(&mut self, value: Value) -> Result<StepOutcome, VmError> {
        let finished = self.call_stack.pop().expect("the entry frame is never popped by a bare return");
        match finished.return_register {
            Some(dst) => {
                self.write_reg(dst, value);
                self.collect_if_needed();
                Ok(StepOutcome::Continue)
            }
            None => {
                // A top-level `return` in script code: there is no caller to
                // hand the value to, so it's discarded and the entry frame
                // goes back on top to keep executing toward `Halt`.
                self.call_stack.push(finished);
                Ok(StepOutcome::Continue)
            }
        }
    }

    /// `CLOSURE dst, func_idx16` followed by `upvalue_count` `(is_local: u8,
    /// index: u8)` descriptor pairs, `upvalue_count` itself read off the
    /// target function's already-loaded proto rather than re-encoded in the
    /// instruction (`orus_core::opcode::Opcode::Closure`'s doc comment).
    /// Each descriptor's `index` is a register `codegen::emit_nested_function`
    /// already bridged through any spill, so it's read the same way any
    /// other register operand is — no separate spill-aware path needed
    /// here. Single-level nesting only: every descriptor codegen emits
    /// today has `is_local = true` (captured straight from the immediately
    /// enclosing frame); `is_local = false`, forwarding an outer closure's
    /// own upvalue to a doubly-nested one, is accepted here but never
    /// produced by codegen yet, so it degrades to reading register `index`
    /// out of the current frame the same as the local case.
    fn h_closure(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let func_idx = self.read_op_u16();
        let (arity, upvalue_count) = {
            let callee = self
                .functions
                .get(func_idx as usize)
                .ok_or(VmError::TypeMismatch { expected: "a valid function index", found: "an out-of-range index" })?;
            (callee.arity, callee.upvalue_count)
        };
        let mut captured = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let _is_local = self.read_op_u8();
            let index = self.read_op_u8();
            captured.push(Upvalue::Value(self.read_reg(index)));
        }
        let function_id =
            self.heap.allocate(HeapObject::Function { chunk_index: func_idx as u32, arity, upvalue_count });
        let closure_id = self.heap.allocate(HeapObject::Closure { function: function_id, captured });
        self.write_reg(dst, Value::Closure(closure_id));
        self.collect_if_needed();
        Ok(StepOutcome::Continue)
    }

    fn h_get_field(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let base = self.read_op_u8();
        let field_index = self.read_op_u8();
        let base_value = self.read_reg(base);
        let value = match base_value {
            Value::StructInstance(id) => match self.heap.get(id) {
                HeapObject::StructInstance { fields, .. } => fields
                    .get(field_index as usize)
                    .cloned()
                    .ok_or(VmError::IndexOutOfBounds { index: field_index as i64, len: fields.len() })?,
                _ => unreachable!("Value::StructInstance always points at a HeapObject::StructInstance"),
            },
            other => return Err(VmError::TypeMismatch { expected: "struct", found: other.type_name() }),
        };
        self.write_reg(dst, value);
        Ok(StepOutcome::Continue)
    }

    fn h_set_field(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let base = self.read_op_u8();
        let field_index = self.read_op_u8();
        let value_reg = self.read_op_u8();
        let base_value = self.read_reg(base);
        let value = self.read_reg(value_reg);
        match base_value {
            Value::StructInstance(id) => match self.heap.get_mut(id) {
                HeapObject::StructInstance { fields, .. } => {
                    if field_index as usize >= fields.len() {
                        return Err(VmError::IndexOutOfBounds { index: field_index as i64, len: fields.len() });
                    }
                    fields[field_index as usize] = value;
                }
                _ => unreachable!("Value::StructInstance always points at a HeapObject::StructInstance"),
            },
            other => return Err(VmError::TypeMismatch { expected: "struct", found: other.type_name() }),
        }
        Ok(StepOutcome::Continue)
    }

    fn h_new_array(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let count = self.read_op_u8();
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let reg = self.read_op_u8();
            items.push(self.read_reg(reg));
        }
        let id = self.heap.allocate(HeapObject::Array(items));
        self.write_reg(dst, Value::Array(id));
        self.collect_if_needed();
        Ok(StepOutcome::Continue)
    }

    fn h_get_index(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let base = self.read_op_u8();
        let index_reg = self.read_op_u8();
        let base_value = self.read_reg(base);
        let index = self.expect_index(index_reg)?;
        let value = match base_value {
            Value::Array(id) => match self.heap.get(id) {
                HeapObject::Array(items) => items
                    .get(index)
                    .cloned()
                    .ok_or(VmError::IndexOutOfBounds { index: index as i64, len: items.len() })?,
                _ => unreachable!("Value::Array always points at a HeapObject::Array"),
            },
            Value::String(id) => {
                let s = self.heap_string(id)?;
                let ch = s
                    .chars()
                    .nth(index)
                    .ok_or(VmError::IndexOutOfBounds { index: index as i64, len: s.chars().count() })?;
                Value::String(self.intern_string(ch.to_string()))
            }
            other => return Err(VmError::TypeMismatch { expected: "array or string", found: other.type_name() }),
        };
        self.write_reg(dst, value);
        Ok(StepOutcome::Continue)
    }

    fn h_set_index(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let base = self.read_op_u8();
        let index_reg = self.read_op_u8();
        let value_reg = self.read_op_u8();
        let base_value = self.read_reg(base);
        let index = self.expect_index(index_reg)?;
        let value = self.read_reg(value_reg);
        match base_value {
            Value::Array(id) => match self.heap.get_mut(id) {
                HeapObject::Array(items) => {
                    if index >= items.len() {
                        return Err(VmError::IndexOutOfBounds { index: index as i64, len: items.len() });
                    }
                    items[index] = value;
                }
                _ => unreachable!("Value::Array always points at a HeapObject::Array"),
            },
            other => return Err(VmError::TypeMismatch { expected: "array", found: other.type_name() }),
        }
        Ok(StepOutcome::Continue)
    }

    fn h_call_builtin(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let dst = self.read_op_u8();
        let builtin_id = self.read_op_u8();
        let argc = self.read_op_u8();
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            let reg = self.read_op_u8();
            args.push(self.read_reg(reg));
        }
        let result = self.call_builtin(builtin_id, &args)?;
        self.write_reg(dst, result);
        Ok(StepOutcome::Continue)
    }

    fn h_print(&mut self) -> Result<StepOutcome, VmError> {
        self.advance_opcode_byte();
        let src = self.read_op_u8();
        let value = self.read_reg(src);
        println!("{}", self.display_value(&value));
        Ok(StepOutcome::Continue)
    }

    // --- GC orchestration ----------------------------------------------------

    /// Every `ObjectId` directly reachable from the VM's own state: global
    /// and module slots, every active frame's window, and (since a frame's
    /// chunk can itself be dropped and re-allocated no further) nothing else
    /// — constants never hold heap pointers until the module is loaded, and
    /// once loaded they're all simple string constants that get interned via
    /// `intern_table`, which the sweep must also be able to see.
    fn roots(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.globals
            .iter()
            .chain(self.call_stack.iter().flat_map(|f| f.window.iter()))
            .chain(self.call_stack.iter().flat_map(|f| f.spill.iter()))
            .filter_map(|v| v.heap_ref())
            .chain(self.intern_table.values().copied())
    }

    fn collect_if_needed(&mut self) {
        let roots: Vec<ObjectId> = self.roots().collect();
        if self.gc.maybe_collect(&mut self.heap, roots) {
            debug!(
                "gc collection #{} freed {} byte(s), heap now {} byte(s)",
                self.gc.stats().collections,
                self.gc.stats().bytes_freed,
                self.heap.bytes_allocated()
            );
        }
    }
}

/// Maps a type-specialized opcode to the generic operator it specializes,
/// so the per-type arithmetic helpers only need to know `Add`/`Sub`/etc.
fn base_op(op: Opcode) -> Opcode {
    use Opcode::*;
    match op {
        AddI32Typed | AddI64Typed | AddU32Typed | AddU64Typed | AddF64Typed => Add,
        SubI32Typed | SubI64Typed | SubU32Typed | SubU64Typed | SubF64Typed => Sub,
        MulI32Typed | MulI64Typed | MulU32Typed | MulU64Typed | MulF64Typed => Mul,
        DivI32Typed | DivI64Typed | DivF64Typed => Div,
        LtI32Typed | LtI64Typed | LtF64Typed => Lt,
        EqI32Typed | EqI64Typed | EqF64Typed => Eq,
        other => other,
    }
}

fn intern_string_into(
    heap: &mut Heap,
    table: &mut HashMap<String, ObjectId>,
    text: &str,
    threshold: usize,
) -> ObjectId {
    if text.len() < threshold {
        return heap.allocate(HeapObject::String(text.to_string()));
    }
    if let Some(&id) = table.get(text) {
        return id;
    }
    let id = heap.allocate(HeapObject::String(text.to_string()));
    table.insert(text.to_string(), id);
    id
}

trait DisplayHeapObject {
    fn to_owned_string(&self) -> String;
}

impl DisplayHeapObject for HeapObject {
    fn to_owned_string(&self) -> String {
        match self {
            HeapObject::String(s) => s.clone(),
            other => format!("<{}>", other.kind_name()),
        }
    }
}

type Handler = fn(&mut Vm, Opcode) -> Result<StepOutcome, VmError>;

// One free function per opcode, in exactly `Opcode::from_u8`'s decode order.
// Each forwards to the same `Vm::h_*` method `dispatch`'s match calls for
// that opcode, so `step_threaded` (array-indexed call through `HANDLERS`)
// and `step_switch` (the `match` in `dispatch`) are two genuinely distinct
// dispatch mechanisms reaching identical opcode semantics, rather than one
// being a relabeled copy of the other.
fn th_nop(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_nop()
}
fn th_load_const(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_const()
}
fn th_load_i32_const(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_const()
}
fn th_load_i64_const(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_const()
}
fn th_load_f64_const(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_const()
}
fn th_load_nil(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_nil()
}
fn th_load_bool(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_bool()
}
fn th_move(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_move()
}
fn th_add(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_sub(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_mul(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_div(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_mod(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_neg(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_unary(op)
}
fn th_eq(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_not_eq(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_lt(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_lt_eq(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_gt(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_gt_eq(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_and(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_or(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_binary_generic(op)
}
fn th_not(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_unary(op)
}
fn th_add_i32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i32(op)
}
fn th_sub_i32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i32(op)
}
fn th_mul_i32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i32(op)
}
fn th_div_i32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i32(op)
}
fn th_add_i32_typed_checked(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_add_i32_checked()
}
fn th_add_i64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i64(op)
}
fn th_sub_i64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i64(op)
}
fn th_mul_i64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i64(op)
}
fn th_div_i64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i64(op)
}
fn th_add_i64_typed_checked(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_add_i64_checked()
}
fn th_add_u32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_u32(op)
}
fn th_sub_u32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_u32(op)
}
fn th_mul_u32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_u32(op)
}
fn th_add_u64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_u64(op)
}
fn th_sub_u64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_u64(op)
}
fn th_mul_u64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_u64(op)
}
fn th_add_f64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_f64(op)
}
fn th_sub_f64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_f64(op)
}
fn th_mul_f64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_f64(op)
}
fn th_div_f64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_f64(op)
}
fn th_lt_i32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i32(op)
}
fn th_lt_i64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i64(op)
}
fn th_lt_f64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_f64(op)
}
fn th_eq_i32_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i32(op)
}
fn th_eq_i64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_i64(op)
}
fn th_eq_f64_typed(vm: &mut Vm, op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_typed_f64(op)
}
fn th_cast(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_cast()
}
fn th_jump(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_jump()
}
fn th_jump_if_false(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_jump_if_false()
}
fn th_loop(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_loop()
}
fn th_call(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_call()
}
fn th_return(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_return()
}
fn th_return_nil(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_return_nil()
}
fn th_closure(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_closure()
}
fn th_get_field(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_get_field()
}
fn th_set_field(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_set_field()
}
fn th_new_array(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_new_array()
}
fn th_get_index(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_get_index()
}
fn th_set_index(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_set_index()
}
fn th_new_struct(_vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    Err(VmError::Unsupported("NEW_STRUCT: no struct literal expression reaches codegen yet"))
}
fn th_load_spill(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_load_spill()
}
fn th_store_spill(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_store_spill()
}
fn th_import_binding(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_import_binding()
}
fn th_call_builtin(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_call_builtin()
}
fn th_print(vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    vm.h_print()
}
fn th_wide(_vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    Err(VmError::Unsupported("WIDE: no operand codegen emits today needs the 16-bit escape"))
}
fn th_halt(_vm: &mut Vm, _op: Opcode) -> Result<StepOutcome, VmError> {
    Ok(StepOutcome::Halted)
}

/// The "threaded" dispatch table: an array of function pointers indexed by
/// opcode byte, in exactly `Opcode::from_u8`'s decode order. Each slot is a
/// distinct top-level function; see the module doc comment for why this
/// (array-indexed call) is a genuine second dispatch mechanism alongside
/// `Switch`'s `match` in [`Vm::dispatch`], not a relabeled copy of it.
static HANDLERS: [Handler; Opcode::COUNT] = [
    th_nop,
    th_load_const,
    th_load_i32_const,
    th_load_i64_const,
    th_load_f64_const,
    th_load_nil,
    th_load_bool,
    th_move,
    th_add,
    th_sub,
    th_mul,
    th_div,
    th_mod,
    th_neg,
    th_eq,
    th_not_eq,
    th_lt,
    th_lt_eq,
    th_gt,
    th_gt_eq,
    th_and,
    th_or,
    th_not,
    th_add_i32_typed,
    th_sub_i32_typed,
    th_mul_i32_typed,
    th_div_i32_typed,
    th_add_i32_typed_checked,
    th_add_i64_typed,
    th_sub_i64_typed,
    th_mul_i64_typed,
    th_div_i64_typed,
    th_add_i64_typed_checked,
    th_add_u32_typed,
    th_sub_u32_typed,
    th_mul_u32_typed,
    th_add_u64_typed,
    th_sub_u64_typed,
    th_mul_u64_typed,
    th_add_f64_typed,
    th_sub_f64_typed,
    th_mul_f64_typed,
    th_div_f64_typed,
    th_lt_i32_typed,
    th_lt_i64_typed,
    th_lt_f64_typed,
    th_eq_i32_typed,
    th_eq_i64_typed,
    th_eq_f64_typed,
    th_cast,
    th_jump,
    th_jump_if_false,
    th_loop,
    th_call,
    th_return,
    th_return_nil,
    th_closure,
    th_get_field,
    th_set_field,
    th_new_array,
    th_get_index,
    th_set_index,
    th_new_struct,
    th_load_spill,
    th_store_spill,
    th_import_binding,
    th_call_builtin,
    th_print,
    th_wide,
    th_halt,
];

#[cfg(test)]
mod tests {
    use super::*;
    use orus_compiler::{compile_source, CompilerConfig};
    use rstest::rstest;
    use std::path::PathBuf;

    fn run_source(src: &str) -> Vm {
        let config = CompilerConfig::default();
        let module = compile_source(&PathBuf::from("t.orus"), src, &config).expect("compiles");
        let mut vm = Vm::load("t.orus", module, config);
        vm.run().expect("runs");
        vm
    }

    fn exported_value(src: &str, name: &str) -> Value {
        let config = CompilerConfig::default();
        let module = compile_source(&PathBuf::from("t.orus"), src, &config).expect("compiles");
        let reg = *module.export_registers.get(name).expect("name is exported");
        let mut vm = Vm::load("t.orus", module, config);
        vm.run().expect("runs");
        vm.globals.get(reg).clone()
    }

    #[rstest]
    #[case("+", 4, 3, Value::I32(7))]
    #[case("-", 4, 3, Value::I32(1))]
    #[case("*", 4, 3, Value::I32(12))]
    #[case("/", 12, 3, Value::I32(4))]
    #[case("%", 7, 3, Value::I32(1))]
    fn typed_i32_arithmetic_opcodes_agree_with_the_source_operator(
        #[case] op: &str,
        #[case] left: i32,
        #[case] right: i32,
        #[case] expected: Value,
    ) {
        let src = format!("answer: i32 = {left} {op} {right}\nexport answer\n");
        assert_eq!(exported_value(&src, "answer"), expected);
    }

    #[rstest]
    #[case("<", 2, 3, Value::Bool(true))]
    #[case(">", 2, 3, Value::Bool(false))]
    #[case("==", 3, 3, Value::Bool(true))]
    #[case("!=", 2, 3, Value::Bool(true))]
    fn comparison_opcodes_agree_with_the_source_operator(
        #[case] op: &str,
        #[case] left: i32,
        #[case] right: i32,
        #[case] expected: Value,
    ) {
        let src = format!("answer: bool = {left} {op} {right}\nexport answer\n");
        assert_eq!(exported_value(&src, "answer"), expected);
    }

    #[test]
    fn runs_a_trivial_arithmetic_program() {
        run_source("x = 1 + 2\n");
    }

    #[test]
    fn print_does_not_error() {
        run_source("print 1 + 2\n");
    }

    #[test]
    fn string_literals_round_trip_through_the_heap() {
        let vm = run_source("s = \"hi\"\n");
        assert!(vm.heap.object_count() >= 1);
    }

    #[test]
    fn division_by_zero_surfaces_as_a_vm_error() {
        let config = CompilerConfig::default();
        let module = compile_source(&PathBuf::from("t.orus"), "x = 1 / 0\n", &config).expect("compiles");
        let mut vm = Vm::load("t.orus", module, config);
        assert!(matches!(vm.run(), Err(VmError::DivisionByZero)));
    }

    #[test]
    fn switch_and_threaded_dispatch_agree() {
        let src = "x: i32 = 1 + 2\nprint x\n";
        let mut switch_config = CompilerConfig::default();
        switch_config.dispatch_mode = DispatchMode::Switch;
        let mut threaded_config = CompilerConfig::default();
        threaded_config.dispatch_mode = DispatchMode::Threaded;

        let switch_module = compile_source(&PathBuf::from("t.orus"), src, &switch_config).expect("compiles");
        let threaded_module = compile_source(&PathBuf::from("t.orus"), src, &threaded_config).expect("compiles");

        let mut switch_vm = Vm::load("t.orus", switch_module, switch_config);
        let mut threaded_vm = Vm::load("t.orus", threaded_module, threaded_config);
        assert!(switch_vm.run().is_ok());
        assert!(threaded_vm.run().is_ok());
    }

    #[test]
    fn a_closure_captures_an_enclosing_local_by_value() {
        let src = "fn outer(n: i32) -> i32:\n    fn inner(x: i32) -> i32:\n        return x + n\n    result: i32 = inner(n)\n    return result\n\nanswer: i32 = outer(10)\nexport answer\n";
        let config = CompilerConfig::default();
        let module = compile_source(&PathBuf::from("t.orus"), src, &config).expect("compiles");
        let reg = *module.export_registers.get("answer").expect("answer is exported");
        let mut vm = Vm::load("t.orus", module, config);
        vm.run().expect("runs");
        assert_eq!(vm.globals.get(reg).clone(), Value::I32(20));
    }
}
