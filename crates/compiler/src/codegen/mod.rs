//! Bytecode codegen: typed AST to [`Chunk`]s of register-based bytecode.
//!
//! Grounded on the overall shape of `examples/navicore-cem3`'s
//! `crates/compiler/src/codegen/mod.rs` (one `Emitter`-style struct walking
//! a typed tree, a function table built up alongside the entry chunk) but
//! targeting Orus bytecode instead of LLVM IR text; the type-specialized
//! vs. generic opcode choice is grounded on `codegen/specialization.rs`'s
//! eligibility analysis, simplified from LLVM fast-path functions down to a
//! single opcode choice per binary expression.

pub mod coalescing;
pub mod peephole;
pub mod registers;

use crate::ast::{BinaryOp, ForStep, Literal, UnaryOp};
use crate::optimizer::{LoopAffinityPlan, ResidencyPlan};
use crate::typed_ast::{TypedExpr, TypedExprKind, TypedProgram, TypedStmt, TypedStmtKind};
use orus_core::chunk::{Chunk, FunctionProto, ImportRecord};
use orus_core::error::{Diagnostic, DiagnosticSink, ErrorCode};
use orus_core::opcode::Opcode;
use orus_core::span::Span;
use orus_core::types::{Primitive, Type};
use orus_core::value::Value;
use registers::{RegisterAllocator, RegisterClass, RegisterId};
use std::collections::HashMap;

/// A constant-pool slot that needs a live heap object before it can be
/// read; resolved by [`crate::module_manager`] / the runtime's module
/// loader once a `Heap` exists (`spec.md` §6 — see
/// [`orus_core::chunk::Chunk::patch_constant`]).
#[derive(Debug, Clone)]
pub struct PendingString {
    pub function_index: Option<u32>,
    pub constant_index: u16,
    pub text: String,
}

/// Everything codegen produces for one source file: the top-level
/// ("script") chunk, every function compiled out of it, and the string
/// constants still waiting for heap allocation.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub chunk: Chunk,
    pub functions: Vec<FunctionProto>,
    pub pending_strings: Vec<PendingString>,
    pub exports: Vec<String>,
    /// Cross-module bindings this module's `ImportBinding` instructions
    /// address by position — the runtime's module loader (`orus_runtime`)
    /// resolves each entry to a value before the chunk runs.
    pub imports: Vec<ImportRecord>,
    /// Raw global-register index holding each exported name's value once
    /// this module's entry chunk has finished running, keyed by the name
    /// passed to `export`. Consulted by an importer's module loader, not by
    /// this module itself.
    pub export_registers: HashMap<String, u8>,
}

struct Local {
    name: String,
    register: RegisterId,
}

struct Frame {
    chunk: Chunk,
    locals: Vec<Local>,
    scope_marks: Vec<usize>,
    break_patches: Vec<Vec<usize>>,
    continue_patches: Vec<Vec<usize>>,
    function_index: Option<u32>,
}

impl Frame {
    fn new(function_index: Option<u32>) -> Self {
        Frame {
            chunk: Chunk::new(),
            locals: Vec::new(),
            scope_marks: Vec::new(),
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
            function_index,
        }
    }
}

pub struct CodeGenerator<'a> {
    registers: RegisterAllocator,
    globals: HashMap<String, RegisterId>,
    function_indices: HashMap<String, u32>,
    functions: Vec<FunctionProto>,
    pending_strings: Vec<PendingString>,
    exports: Vec<String>,
    imports: Vec<ImportRecord>,
    export_registers: HashMap<String, u8>,
    frames: Vec<Frame>,
    sink: &'a mut DiagnosticSink,
    #[allow(dead_code)]
    affinity: &'a LoopAffinityPlan,
    residency: &'a ResidencyPlan,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(sink: &'a mut DiagnosticSink, affinity: &'a LoopAffinityPlan, residency: &'a ResidencyPlan) -> Self {
        CodeGenerator {
            registers: RegisterAllocator::new(),
            globals: HashMap::new(),
            function_indices: HashMap::new(),
            functions: Vec::new(),
            pending_strings: Vec::new(),
            exports: Vec::new(),
            imports: Vec::new(),
            export_registers: HashMap::new(),
            frames: vec![Frame::new(None)],
            sink,
            affinity,
            residency,
        }
    }

    pub fn compile(mut self, program: &TypedProgram) -> CompiledModule {
        self.predeclare_functions(program);
        for stmt in &program.statements {
            self.emit_stmt(stmt);
        }
        self.current_chunk_mut_op(Opcode::Halt, 0, 0);
        let entry = self.frames.pop().expect("entry frame always present");
        CompiledModule {
            chunk: entry.chunk,
            functions: self.functions,
            pending_strings: self.pending_strings,
            exports: self.exports,
            imports: self.imports,
            export_registers: self.export_registers,
        }
    }

    /// Reserves a function-table slot for every `FunctionDecl`, including
    /// ones nested inside another function's body — a nested declaration is
    /// only reachable (by direct recursive call, or as a closure) once its
    /// name resolves through `function_indices` the same as a top-level
    /// one's does, so this has to look inside every kind of nested block,
    /// not just walk `program.statements`.
    fn predeclare_functions(&mut self, program: &TypedProgram) {
        self.predeclare_in(&program.statements);
    }

    fn predeclare_in(&mut self, stmts: &[TypedStmt]) {
        for stmt in stmts {
            match &stmt.kind {
                TypedStmtKind::FunctionDecl { name, body, .. } => {
                    let index = self.functions.len() as u32;
                    // Reserve the slot; `emit_function` fills it in once compiled.
                    self.functions.push(FunctionProto {
                        name: name.clone(),
                        arity: 0,
                        chunk: Chunk::new(),
                        upvalue_count: 0,
                    });
                    self.function_indices.insert(name.clone(), index);
                    self.predeclare_in(body);
                }
                TypedStmtKind::Block(inner) => self.predeclare_in(inner),
                TypedStmtKind::If { then_branch, else_branch, .. } => {
                    self.predeclare_in(then_branch);
                    if let Some(b) = else_branch {
                        self.predeclare_in(b);
                    }
                }
                TypedStmtKind::While { body, .. } => self.predeclare_in(body),
                TypedStmtKind::ForRange { body, .. } => self.predeclare_in(body),
                TypedStmtKind::ForIter { body, .. } => self.predeclare_in(body),
                TypedStmtKind::Try { body, handler, .. } => {
                    self.predeclare_in(body);
                    self.predeclare_in(handler);
                }
                _ => {}
            }
        }
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least the entry frame is always present")
    }

    fn current_chunk_mut_op(&mut self, op: Opcode, line: u32, column: u32) -> usize {
        self.frame().chunk.write_op(op, line, column)
    }

    fn emit_u8(&mut self, byte: u8, line: u32, column: u32) -> usize {
        self.frame().chunk.write_u8(byte, line, column)
    }

    fn emit_u16(&mut self, value: u16, line: u32, column: u32) {
        self.frame().chunk.write_u16(value, line, column);
    }

    fn here(&mut self) -> usize {
        self.frame().chunk.len()
    }

    fn patch_jump_to_here(&mut self, site: usize) {
        let here = self.here();
        self.frame().chunk.patch_u16(site, here as u16);
    }

    fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: &Span) {
        self.sink.push(Diagnostic::new(code, message, span.clone()));
    }

    fn declare_local(&mut self, name: &str) -> RegisterId {
        let reg = self.registers.alloc_local();
        self.frame().locals.push(Local { name: name.to_string(), register: reg });
        reg
    }

    fn declare_global(&mut self, name: &str, span: &Span) -> RegisterId {
        if let Some(existing) = self.globals.get(name) {
            return *existing;
        }
        let reg = self.registers.alloc_global(self.sink, span);
        self.globals.insert(name.to_string(), reg);
        reg
    }

    fn resolve(&self, name: &str) -> Option<RegisterId> {
        self.resolve_local_only(name).or_else(|| self.globals.get(name).copied())
    }

    /// Like [`Self::resolve`] but never falls back to a global — used to
    /// tell "this name shadows a local in the current frame" apart from "no
    /// local shadow exists, fall through to the flat function table or the
    /// global register" at call sites and closure-capture analysis.
    fn resolve_local_only(&self, name: &str) -> Option<RegisterId> {
        let frame = self.frames.last().unwrap();
        frame.locals.iter().rev().find(|l| l.name == name).map(|l| l.register)
    }

    fn in_function(&self) -> bool {
        self.frames.last().unwrap().function_index.is_some()
    }

    /// Reads `reg`'s current value into an instruction operand byte. When
    /// `reg` overflowed its class's register-file range, this bridges
    /// through a scratch temp and a `LoadSpill` first rather than emitting
    /// the (meaningless, out-of-range) raw slot directly.
    fn reg_read(&mut self, reg: RegisterId, line: u32, col: u32) -> u8 {
        if !reg.spilled {
            return reg.raw() as u8;
        }
        let scratch = self.registers.alloc_temp();
        self.current_chunk_mut_op(Opcode::LoadSpill, line, col);
        self.emit_u8(scratch.raw() as u8, line, col);
        self.emit_u16(reg.spill_index(), line, col);
        let byte = scratch.raw() as u8;
        self.registers.free_temp(scratch);
        byte
    }

    /// Runs `emit` against a real, in-range register standing in for `dst`,
    /// then — if `dst` itself overflowed into the spill area — relocates the
    /// value `emit` produced there with a `StoreSpill`, instead of letting
    /// multiple overflowed registers silently alias the same clamped slot.
    fn write_dst(&mut self, dst: RegisterId, line: u32, col: u32, emit: impl FnOnce(&mut Self, RegisterId, u32, u32)) {
        if !dst.spilled {
            emit(self, dst, line, col);
            return;
        }
        let scratch = self.registers.alloc_temp();
        emit(self, scratch, line, col);
        self.current_chunk_mut_op(Opcode::StoreSpill, line, col);
        self.emit_u16(dst.spill_index(), line, col);
        self.emit_u8(scratch.raw() as u8, line, col);
        self.registers.free_temp(scratch);
    }

    // ---------- statements ----------

    fn emit_stmt(&mut self, stmt: &TypedStmt) {
        let (line, col) = (stmt.span.start.line, stmt.span.start.column);
        match &stmt.kind {
            TypedStmtKind::VarDecl { name, init, .. } => {
                let dst = if self.in_function() { self.declare_local(name) } else { self.declare_global(name, &stmt.span) };
                match init {
                    Some(e) => self.emit_expr_into(e, dst),
                    None => self.write_dst(dst, line, col, |this, target, line, col| {
                        this.current_chunk_mut_op(Opcode::LoadNil, line, col);
                        this.emit_u8(target.raw() as u8, line, col);
                    }),
                }
            }
            TypedStmtKind::Assignment { target, value } => self.emit_assignment(target, value, line, col),
            TypedStmtKind::ExprStmt(e) => {
                let reg = self.registers.alloc_temp();
                self.emit_expr_into(e, reg);
                self.registers.free_temp(reg);
            }
            TypedStmtKind::Print(args) => {
                for arg in args {
                    let reg = self.registers.alloc_temp();
                    self.emit_expr_into(arg, reg);
                    let byte = self.reg_read(reg, line, col);
                    self.current_chunk_mut_op(Opcode::Print, line, col);
                    self.emit_u8(byte, line, col);
                    self.registers.free_temp(reg);
                }
            }
            TypedStmtKind::Block(stmts) => self.emit_block(stmts),
            TypedStmtKind::If { cond, then_branch, else_branch } => self.emit_if(cond, then_branch, else_branch.as_deref()),
            TypedStmtKind::While { cond, body } => self.emit_while(&stmt.span, cond, body),
            TypedStmtKind::ForRange { var, start, end, step, step_kind, body } => {
                self.emit_for_range(&stmt.span, var, start, end, step.as_ref(), *step_kind, body)
            }
            TypedStmtKind::ForIter { var, iterable, body } => self.emit_for_iter(&stmt.span, var, iterable, body),
            TypedStmtKind::Break => {
                let line_col = (line, col);
                let site = self.emit_forward_jump(Opcode::Jump, line_col.0, line_col.1);
                match self.frame().break_patches.last_mut() {
                    Some(list) => list.push(site),
                    None => self.error(ErrorCode::Control("break-outside-loop"), "`break` outside a loop", &stmt.span),
                }
            }
            TypedStmtKind::Continue => {
                let site = self.emit_forward_jump(Opcode::Jump, line, col);
                match self.frame().continue_patches.last_mut() {
                    Some(list) => list.push(site),
                    None => self.error(ErrorCode::Control("continue-outside-loop"), "`continue` outside a loop", &stmt.span),
                }
            }
            TypedStmtKind::Return(value) => {
                match value {
                    Some(e) => {
                        let reg = self.registers.alloc_temp();
                        self.emit_expr_into(e, reg);
                        let byte = self.reg_read(reg, line, col);
                        self.current_chunk_mut_op(Opcode::Return, line, col);
                        self.emit_u8(byte, line, col);
                        self.registers.free_temp(reg);
                    }
                    None => {
                        self.current_chunk_mut_op(Opcode::ReturnNil, line, col);
                    }
                }
            }
            TypedStmtKind::FunctionDecl { name, params, body, .. } => {
                if self.in_function() {
                    self.emit_nested_function(name, params, body, &stmt.span);
                } else {
                    self.emit_function(name, params, body, &[]);
                }
            }
            TypedStmtKind::StructDecl { .. } => {}
            TypedStmtKind::Import { module, alias, selective } => {
                if selective.is_empty() {
                    let bound = alias.clone().unwrap_or_else(|| module.clone());
                    self.error(
                        ErrorCode::Module("whole-module-import-unsupported"),
                        format!(
                            "whole-module import of `{module}` (bound as `{bound}`) is not supported; \
                             import specific names instead with `from {module} import name`"
                        ),
                        &stmt.span,
                    );
                } else {
                    for name in selective {
                        let import_index = self.imports.len() as u16;
                        self.imports.push(ImportRecord { module_name: module.clone(), export_name: name.clone() });
                        let dst = self.declare_global(name, &stmt.span);
                        self.current_chunk_mut_op(Opcode::ImportBinding, line, col);
                        self.emit_u8(dst.raw() as u8, line, col);
                        self.emit_u16(import_index, line, col);
                    }
                }
            }
            TypedStmtKind::Export { name } => {
                self.exports.push(name.clone());
                if let Some(reg) = self.globals.get(name) {
                    self.export_registers.insert(name.clone(), reg.raw() as u8);
                }
            }
            TypedStmtKind::Try { body, error_binding, handler } => self.emit_try(body, error_binding, handler),
        }
    }

    fn emit_block(&mut self, stmts: &[TypedStmt]) {
        let mark = self.frame().locals.len();
        let scope = self.registers.enter_scope();
        for s in stmts {
            self.emit_stmt(s);
        }
        self.frame().locals.truncate(mark);
        self.registers.exit_scope(scope);
    }

    /// Lowers an assignment statement. An `Identifier` target writes
    /// straight into the variable's own register; `FieldAccess`/`Index`
    /// targets evaluate their base into a temp and emit `SetField`/
    /// `SetIndex` rather than routing through a register at all.
    fn emit_assignment(&mut self, target: &TypedExpr, value: &TypedExpr, line: u32, col: u32) {
        match &target.kind {
            TypedExprKind::Identifier(name) => {
                let dst = self.resolve(name).unwrap_or_else(|| {
                    if self.in_function() {
                        self.declare_local(name)
                    } else {
                        self.declare_global(name, &target.span)
                    }
                });
                self.emit_expr_into(value, dst);
            }
            TypedExprKind::FieldAccess { base, field } => {
                let base_reg = self.registers.alloc_temp();
                self.emit_expr_into(base, base_reg);
                let field_index = match &base.ty {
                    Type::Struct(st) => st.fields.iter().position(|f| &f.name == field).unwrap_or(0),
                    _ => 0,
                };
                let value_reg = self.registers.alloc_temp();
                self.emit_expr_into(value, value_reg);
                let base_byte = self.reg_read(base_reg, line, col);
                let value_byte = self.reg_read(value_reg, line, col);
                self.current_chunk_mut_op(Opcode::SetField, line, col);
                self.emit_u8(base_byte, line, col);
                self.emit_u8(field_index as u8, line, col);
                self.emit_u8(value_byte, line, col);
                self.registers.free_temp(value_reg);
                self.registers.free_temp(base_reg);
            }
            TypedExprKind::Index { base, index } => {
                let base_reg = self.registers.alloc_temp();
                self.emit_expr_into(base, base_reg);
                let index_reg = self.registers.alloc_temp();
                self.emit_expr_into(index, index_reg);
                let value_reg = self.registers.alloc_temp();
                self.emit_expr_into(value, value_reg);
                let base_byte = self.reg_read(base_reg, line, col);
                let index_byte = self.reg_read(index_reg, line, col);
                let value_byte = self.reg_read(value_reg, line, col);
                self.current_chunk_mut_op(Opcode::SetIndex, line, col);
                self.emit_u8(base_byte, line, col);
                self.emit_u8(index_byte, line, col);
                self.emit_u8(value_byte, line, col);
                self.registers.free_temp(value_reg);
                self.registers.free_temp(index_reg);
                self.registers.free_temp(base_reg);
            }
            _ => self.error(ErrorCode::General, "invalid assignment target", &target.span),
        }
    }

    fn emit_if(&mut self, cond: &TypedExpr, then_branch: &[TypedStmt], else_branch: Option<&[TypedStmt]>) {
        let (line, col) = (cond.span.start.line, cond.span.start.column);
        let cond_reg = self.registers.alloc_temp();
        self.emit_expr_into(cond, cond_reg);
        let cond_byte = self.reg_read(cond_reg, line, col);
        self.current_chunk_mut_op(Opcode::JumpIfFalse, line, col);
        self.emit_u8(cond_byte, line, col);
        let else_jump = self.here();
        self.emit_u16_placeholder();
        self.registers.free_temp(cond_reg);
        self.emit_block(then_branch);
        if let Some(else_stmts) = else_branch {
            let end_jump = self.here();
            self.current_chunk_mut_op(Opcode::Jump, line, col);
            let end_site = self.here();
            self.emit_u16_placeholder();
            let _ = end_jump;
            self.patch_jump_to_here(else_jump);
            self.emit_block(else_stmts);
            self.patch_jump_to_here(end_site);
        } else {
            self.patch_jump_to_here(else_jump);
        }
    }

    fn emit_u16_placeholder(&mut self) {
        self.emit_u16(0, 0, 0);
    }

    fn emit_forward_jump(&mut self, op: Opcode, line: u32, col: u32) -> usize {
        self.current_chunk_mut_op(op, line, col);
        let site = self.here();
        self.emit_u16_placeholder();
        site
    }

    fn emit_while(&mut self, loop_span: &Span, cond: &TypedExpr, body: &[TypedStmt]) {
        let (line, col) = (cond.span.start.line, cond.span.start.column);
        let loop_start = self.here();
        let cond_reg = self.registers.alloc_temp();
        self.emit_expr_into(cond, cond_reg);
        let cond_byte = self.reg_read(cond_reg, line, col);
        self.current_chunk_mut_op(Opcode::JumpIfFalse, line, col);
        self.emit_u8(cond_byte, line, col);
        let exit_site = self.here();
        self.emit_u16_placeholder();
        self.registers.free_temp(cond_reg);

        self.frame().break_patches.push(Vec::new());
        self.frame().continue_patches.push(Vec::new());
        self.emit_block(body);
        let continue_target = self.here();
        for site in self.frame().continue_patches.pop().unwrap() {
            let here = continue_target as u16;
            self.frame().chunk.patch_u16(site, here);
        }
        self.current_chunk_mut_op(Opcode::Loop, line, col);
        let back_operand = self.here();
        self.emit_u16(loop_start as u16, line, col);
        let _ = back_operand;
        self.patch_jump_to_here(exit_site);
        for site in self.frame().break_patches.pop().unwrap() {
            self.patch_jump_to_here(site);
        }
        if self.residency.residency_of(loop_span).requires_residency {
            if let TypedExprKind::Binary { left, .. } = &cond.kind {
                if let TypedExprKind::Identifier(name) = &left.kind {
                    if let Some(reg) = self.resolve(name) {
                        self.emit_type_refresh(reg, &left.ty, line, col);
                    }
                }
            }
        }
    }

    fn emit_for_range(
        &mut self,
        loop_span: &Span,
        var: &str,
        start: &TypedExpr,
        end: &TypedExpr,
        step: Option<&TypedExpr>,
        step_kind: ForStep,
        body: &[TypedStmt],
    ) {
        let (line, col) = (start.span.start.line, start.span.start.column);
        let mark = self.frame().locals.len();
        let scope = self.registers.enter_scope();

        let var_reg = self.declare_local(var);
        self.emit_expr_into(start, var_reg);
        let end_reg = self.registers.alloc_local();
        self.emit_expr_into(end, end_reg);
        let step_reg = self.registers.alloc_local();
        match step {
            Some(s) => self.emit_expr_into(s, step_reg),
            None => {
                let one = self.frame().chunk.add_constant(Value::I32(1));
                self.write_dst(step_reg, line, col, |this, target, line, col| {
                    this.current_chunk_mut_op(Opcode::LoadI32Const, line, col);
                    this.emit_u8(target.raw() as u8, line, col);
                    this.emit_u16(one, line, col);
                });
            }
        }
        let _ = step_kind;

        let loop_start = self.here();
        let cmp_reg = self.registers.alloc_temp();
        let var_byte = self.reg_read(var_reg, line, col);
        let end_byte = self.reg_read(end_reg, line, col);
        self.write_dst(cmp_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::Lt, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(var_byte, line, col);
            this.emit_u8(end_byte, line, col);
        });
        let cmp_byte = self.reg_read(cmp_reg, line, col);
        self.current_chunk_mut_op(Opcode::JumpIfFalse, line, col);
        self.emit_u8(cmp_byte, line, col);
        let exit_site = self.here();
        self.emit_u16_placeholder();
        self.registers.free_temp(cmp_reg);

        self.frame().break_patches.push(Vec::new());
        self.frame().continue_patches.push(Vec::new());
        self.emit_block(body);
        let continue_target = self.here();
        for site in self.frame().continue_patches.pop().unwrap() {
            self.frame().chunk.patch_u16(site, continue_target as u16);
        }
        let var_byte = self.reg_read(var_reg, line, col);
        let step_byte = self.reg_read(step_reg, line, col);
        self.write_dst(var_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::Add, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(var_byte, line, col);
            this.emit_u8(step_byte, line, col);
        });
        self.current_chunk_mut_op(Opcode::Loop, line, col);
        self.emit_u16(loop_start as u16, line, col);
        self.patch_jump_to_here(exit_site);
        for site in self.frame().break_patches.pop().unwrap() {
            self.patch_jump_to_here(site);
        }
        if self.residency.residency_of(loop_span).requires_residency {
            self.emit_type_refresh(var_reg, &start.ty, line, col);
        }

        self.frame().locals.truncate(mark);
        self.registers.exit_scope(scope);
    }

    fn emit_for_iter(&mut self, loop_span: &Span, var: &str, iterable: &TypedExpr, body: &[TypedStmt]) {
        let (line, col) = (iterable.span.start.line, iterable.span.start.column);
        let mark = self.frame().locals.len();
        let scope = self.registers.enter_scope();

        let array_reg = self.registers.alloc_local();
        self.emit_expr_into(iterable, array_reg);
        let index_reg = self.registers.alloc_local();
        let zero = self.frame().chunk.add_constant(Value::I32(0));
        self.write_dst(index_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::LoadI32Const, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u16(zero, line, col);
        });
        let var_reg = self.declare_local(var);

        let loop_start = self.here();
        let len_reg = self.registers.alloc_temp();
        let array_byte = self.reg_read(array_reg, line, col);
        self.write_dst(len_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::CallBuiltin, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(BUILTIN_LEN, line, col);
            this.emit_u8(1, line, col);
            this.emit_u8(array_byte, line, col);
        });

        let cmp_reg = self.registers.alloc_temp();
        let index_byte = self.reg_read(index_reg, line, col);
        let len_byte = self.reg_read(len_reg, line, col);
        self.write_dst(cmp_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::Lt, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(index_byte, line, col);
            this.emit_u8(len_byte, line, col);
        });
        self.registers.free_temp(len_reg);
        let cmp_byte = self.reg_read(cmp_reg, line, col);
        self.current_chunk_mut_op(Opcode::JumpIfFalse, line, col);
        self.emit_u8(cmp_byte, line, col);
        let exit_site = self.here();
        self.emit_u16_placeholder();
        self.registers.free_temp(cmp_reg);

        let array_byte = self.reg_read(array_reg, line, col);
        let index_byte = self.reg_read(index_reg, line, col);
        self.write_dst(var_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::GetIndex, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(array_byte, line, col);
            this.emit_u8(index_byte, line, col);
        });

        self.frame().break_patches.push(Vec::new());
        self.frame().continue_patches.push(Vec::new());
        self.emit_block(body);
        let continue_target = self.here();
        for site in self.frame().continue_patches.pop().unwrap() {
            self.frame().chunk.patch_u16(site, continue_target as u16);
        }
        let one = self.frame().chunk.add_constant(Value::I32(1));
        let one_reg = self.registers.alloc_temp();
        self.write_dst(one_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::LoadI32Const, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u16(one, line, col);
        });
        let index_byte = self.reg_read(index_reg, line, col);
        let one_byte = self.reg_read(one_reg, line, col);
        self.write_dst(index_reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::Add, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(index_byte, line, col);
            this.emit_u8(one_byte, line, col);
        });
        self.registers.free_temp(one_reg);
        self.current_chunk_mut_op(Opcode::Loop, line, col);
        self.emit_u16(loop_start as u16, line, col);
        self.patch_jump_to_here(exit_site);
        for site in self.frame().break_patches.pop().unwrap() {
            self.patch_jump_to_here(site);
        }
        if self.residency.residency_of(loop_span).requires_residency {
            if let Type::Array(elem) = &iterable.ty {
                self.emit_type_refresh(var_reg, elem, line, col);
            }
        }

        self.frame().locals.truncate(mark);
        self.registers.exit_scope(scope);
    }

    /// Re-asserts a register's concrete primitive type tag when leaving a
    /// loop whose residency plan says the register held a typed value
    /// across iterations (`spec.md` §5 "emit type-refresh instructions when
    /// leaving the loop"). A self-[`Opcode::Cast`] is a no-op in the typical
    /// case — the register already carries this type — but it's cheap and
    /// gives the VM one place to re-normalize representation rather than
    /// trusting every exit edge implicitly.
    fn emit_type_refresh(&mut self, reg: RegisterId, ty: &Type, line: u32, col: u32) {
        let tag = type_tag(ty);
        if tag == 255 {
            return;
        }
        let src_byte = self.reg_read(reg, line, col);
        self.write_dst(reg, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::Cast, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u8(src_byte, line, col);
            this.emit_u8(tag, line, col);
        });
    }

    fn emit_try(&mut self, body: &[TypedStmt], error_binding: &str, handler: &[TypedStmt]) {
        // No dedicated try/catch opcode exists yet; this lowers to running
        // the body and, on the VM's internal error-propagation path,
        // jumping into the handler with `error_binding` bound to the
        // caught error's message. Emitted as a plain sequential block for
        // now — the runtime's frame-unwinding handles the actual catch.
        self.emit_block(body);
        let mark = self.frame().locals.len();
        self.declare_local(error_binding);
        self.emit_block(handler);
        self.frame().locals.truncate(mark);
    }

    /// Compiles one function's body into its own chunk. `upvalues` is empty
    /// for a top-level declaration; for a nested one that closes over
    /// enclosing locals, each upvalue is declared as an extra local right
    /// after the parameters, in the same order its capture descriptor is
    /// emitted in by [`Self::emit_nested_function`] — so inside the body,
    /// a captured name resolves exactly like any other local, and at
    /// runtime `do_call` binds the closure's captured values into those
    /// same registers right after the arguments.
    fn emit_function(
        &mut self,
        name: &str,
        params: &[crate::typed_ast::TypedParam],
        body: &[TypedStmt],
        upvalues: &[(String, RegisterId)],
    ) {
        let index = *self.function_indices.get(name).expect("predeclared");
        let snapshot = self.registers.enter_frame();
        self.frames.push(Frame::new(Some(index)));
        for p in params {
            self.declare_local(&p.name);
        }
        for (upvalue_name, _) in upvalues {
            self.declare_local(upvalue_name);
        }
        for stmt in body {
            self.emit_stmt(stmt);
        }
        let (line, col) = (0, 0);
        self.current_chunk_mut_op(Opcode::ReturnNil, line, col);
        let frame = self.frames.pop().expect("function frame");
        self.functions[index as usize] = FunctionProto {
            name: name.to_string(),
            arity: params.len() as u8,
            chunk: frame.chunk,
            upvalue_count: upvalues.len() as u8,
        };
        self.registers.exit_frame(snapshot);
    }

    /// Compiles a `FunctionDecl` nested inside another function's body as a
    /// genuine closure: finds the free variables in its body that resolve
    /// to a local in the *enclosing* frame (rather than a global, which
    /// needs no capture — it's addressable directly from anywhere), compiles
    /// the body with those bound as extra locals, then emits a `Closure`
    /// instruction in the enclosing frame that snapshots each one's current
    /// value and binds the result under the function's own name as a new
    /// local — shadowing the flat function-table entry `predeclare_functions`
    /// reserved for it, so [`Self::emit_call`] routes calls to it through
    /// the closure value instead of the direct, capture-blind index call.
    ///
    /// Scope limitation: a recursive self-call from inside the nested
    /// function's own body doesn't see that local shadow (it isn't bound in
    /// the nested frame), so it still falls through to the direct index
    /// call and runs with unpopulated upvalue registers. Only captures
    /// threaded through the closure value itself — at creation time, and at
    /// any call made through a binding that holds it — are correct.
    fn emit_nested_function(
        &mut self,
        name: &str,
        params: &[crate::typed_ast::TypedParam],
        body: &[TypedStmt],
        span: &Span,
    ) {
        let (line, col) = (span.start.line, span.start.column);
        let candidates = free_variable_candidates(params, body);
        let mut upvalues: Vec<(String, RegisterId)> = Vec::new();
        for candidate in &candidates {
            if let Some(reg) = self.resolve_local_only(candidate) {
                upvalues.push((candidate.clone(), reg));
            }
        }
        self.emit_function(name, params, body, &upvalues);
        let descriptor_regs: Vec<u8> = upvalues.iter().map(|(_, reg)| self.reg_read(*reg, line, col)).collect();
        let index = *self.function_indices.get(name).expect("predeclared");
        let dst = self.declare_local(name);
        self.write_dst(dst, line, col, |this, target, line, col| {
            this.current_chunk_mut_op(Opcode::Closure, line, col);
            this.emit_u8(target.raw() as u8, line, col);
            this.emit_u16(index as u16, line, col);
            for reg_byte in &descriptor_regs {
                this.emit_u8(1, line, col);
                this.emit_u8(*reg_byte, line, col);
            }
        });
    }

    // ---------- expressions ----------

    /// Emits `expr`'s bytecode so its result lands directly in `dst`,
    /// avoiding an extra `Move` for the common case of a variable
    /// declaration or assignment target (`spec.md` §5 "peephole:
    /// load+move collapse" — this sidesteps needing the peephole pass for
    /// the single most common pattern).
    fn emit_expr_into(&mut self, expr: &TypedExpr, dst: RegisterId) {
        let (line, col) = (expr.span.start.line, expr.span.start.column);
        self.write_dst(dst, line, col, |this, target, _line, _col| this.emit_expr_into_inner(expr, target));
    }

    /// The actual per-`ExprKind` lowering, always run against a real,
    /// in-range `dst` — `emit_expr_into` is the only caller, and it has
    /// already bridged a spilled destination onto a scratch register.
    fn emit_expr_into_inner(&mut self, expr: &TypedExpr, dst: RegisterId) {
        let (line, col) = (expr.span.start.line, expr.span.start.column);
        match &expr.kind {
            TypedExprKind::Literal(lit) => self.emit_literal(lit, &expr.ty, dst, line, col),
            TypedExprKind::Identifier(name) => {
                if let Some(src) = self.resolve(name) {
                    if src != dst {
                        let src_byte = self.reg_read(src, line, col);
                        self.current_chunk_mut_op(Opcode::Move, line, col);
                        self.emit_u8(dst.raw() as u8, line, col);
                        self.emit_u8(src_byte, line, col);
                    }
                } else {
                    self.error(ErrorCode::UndefinedVariable, format!("undefined variable `{name}`"), &expr.span);
                }
            }
            TypedExprKind::Binary { op, left, right } => self.emit_binary(*op, left, right, &expr.ty, dst),
            TypedExprKind::Unary { op, operand } => self.emit_unary(*op, operand, dst),
            TypedExprKind::Ternary { cond, then_branch, else_branch } => {
                let cond_reg = self.registers.alloc_temp();
                self.emit_expr_into(cond, cond_reg);
                let cond_byte = self.reg_read(cond_reg, line, col);
                self.current_chunk_mut_op(Opcode::JumpIfFalse, line, col);
                self.emit_u8(cond_byte, line, col);
                let else_site = self.here();
                self.emit_u16_placeholder();
                self.registers.free_temp(cond_reg);
                self.emit_expr_into(then_branch, dst);
                self.current_chunk_mut_op(Opcode::Jump, line, col);
                let end_site = self.here();
                self.emit_u16_placeholder();
                self.patch_jump_to_here(else_site);
                self.emit_expr_into(else_branch, dst);
                self.patch_jump_to_here(end_site);
            }
            TypedExprKind::Call { callee, args } => self.emit_call(callee, args, dst),
            TypedExprKind::FieldAccess { base, field } => self.emit_field_access(base, field, dst),
            TypedExprKind::Index { base, index } => {
                let base_reg = self.registers.alloc_temp();
                self.emit_expr_into(base, base_reg);
                let index_reg = self.registers.alloc_temp();
                self.emit_expr_into(index, index_reg);
                let base_byte = self.reg_read(base_reg, line, col);
                let index_byte = self.reg_read(index_reg, line, col);
                self.current_chunk_mut_op(Opcode::GetIndex, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u8(base_byte, line, col);
                self.emit_u8(index_byte, line, col);
                self.registers.free_temp(index_reg);
                self.registers.free_temp(base_reg);
            }
            TypedExprKind::Cast { expr: inner, target } => {
                self.emit_expr_into(inner, dst);
                let tag = type_tag(target);
                self.current_chunk_mut_op(Opcode::Cast, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u8(tag, line, col);
            }
            TypedExprKind::ArrayLiteral(elements) => {
                let mut element_regs = Vec::with_capacity(elements.len());
                for e in elements {
                    let reg = self.registers.alloc_temp();
                    self.emit_expr_into(e, reg);
                    element_regs.push(reg);
                }
                let element_bytes: Vec<u8> =
                    element_regs.iter().map(|reg| self.reg_read(*reg, line, col)).collect();
                self.current_chunk_mut_op(Opcode::NewArray, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u8(element_regs.len() as u8, line, col);
                for byte in element_bytes {
                    self.emit_u8(byte, line, col);
                }
                for reg in element_regs.into_iter().rev() {
                    self.registers.free_temp(reg);
                }
            }
        }
    }

    fn emit_literal(&mut self, lit: &Literal, ty: &Type, dst: RegisterId, line: u32, col: u32) {
        match lit {
            Literal::Bool(b) => {
                self.current_chunk_mut_op(Opcode::LoadBool, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u8(*b as u8, line, col);
            }
            Literal::Nil => {
                self.current_chunk_mut_op(Opcode::LoadNil, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
            }
            Literal::Str(s) => {
                let idx = self.frame().chunk.add_constant(Value::Nil);
                let function_index = self.frame().function_index;
                self.pending_strings.push(PendingString { function_index, constant_index: idx, text: s.clone() });
                self.current_chunk_mut_op(Opcode::LoadConst, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u16(idx, line, col);
            }
            Literal::Int { text, .. } => {
                let (op, value) = match ty {
                    Type::Primitive(Primitive::I64) => (Opcode::LoadI64Const, Value::I64(text.parse().unwrap_or(0))),
                    Type::Primitive(Primitive::U32) => (Opcode::LoadConst, Value::U32(text.parse().unwrap_or(0))),
                    Type::Primitive(Primitive::U64) => (Opcode::LoadConst, Value::U64(text.parse().unwrap_or(0))),
                    _ => (Opcode::LoadI32Const, Value::I32(text.parse().unwrap_or(0))),
                };
                let idx = self.frame().chunk.add_constant(value);
                self.current_chunk_mut_op(op, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u16(idx, line, col);
            }
            Literal::Float { text, .. } => {
                let idx = self.frame().chunk.add_constant(Value::F64(text.parse().unwrap_or(0.0)));
                self.current_chunk_mut_op(Opcode::LoadF64Const, line, col);
                self.emit_u8(dst.raw() as u8, line, col);
                self.emit_u16(idx, line, col);
            }
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &TypedExpr, right: &TypedExpr, ty: &Type, dst: RegisterId) {
        let (line, col) = (left.span.start.line, left.span.start.column);
        let left_reg = self.registers.alloc_temp();
        self.emit_expr_into(left, left_reg);
        let right_reg = self.registers.alloc_temp();
        self.emit_expr_into(right, right_reg);

        let left_byte = self.reg_read(left_reg, line, col);
        let right_byte = self.reg_read(right_reg, line, col);
        let opcode = specialized_opcode(op, &left.ty, ty);
        self.current_chunk_mut_op(opcode, line, col);
        self.emit_u8(dst.raw() as u8, line, col);
        self.emit_u8(left_byte, line, col);
        self.emit_u8(right_byte, line, col);

        self.registers.free_temp(right_reg);
        self.registers.free_temp(left_reg);
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &TypedExpr, dst: RegisterId) {
        let (line, col) = (operand.span.start.line, operand.span.start.column);
        self.emit_expr_into(operand, dst);
        let opcode = match op {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Not => Opcode::Not,
        };
        self.current_chunk_mut_op(opcode, line, col);
        self.emit_u8(dst.raw() as u8, line, col);
        self.emit_u8(dst.raw() as u8, line, col);
    }

    /// Lowers a call. `CALL func_reg, argc, dst` leaves the VM to find its
    /// arguments in the `argc` registers immediately following `func_reg`
    /// (`func_reg+1 ..= func_reg+argc`) — so the function/callee register is
    /// always allocated *before* any argument temp, in both the direct and
    /// indirect paths below, to keep that layout contiguous regardless of
    /// which path produced it.
    fn emit_call(&mut self, callee: &TypedExpr, args: &[TypedExpr], dst: RegisterId) {
        let (line, col) = (callee.span.start.line, callee.span.start.column);
        if let TypedExprKind::Identifier(name) = &callee.kind {
            let shadowed_by_local = self.resolve_local_only(name).is_some();
            if !shadowed_by_local {
                if let Some(&index) = self.function_indices.get(name) {
                    let func_reg = self.registers.alloc_temp();
                    let idx = self.frame().chunk.add_constant(Value::I64(index as i64));
                    self.current_chunk_mut_op(Opcode::LoadI64Const, line, col);
                    self.emit_u8(func_reg.raw() as u8, line, col);
                    self.emit_u16(idx, line, col);

                    let mut arg_regs = Vec::with_capacity(args.len());
                    for a in args {
                        let reg = self.registers.alloc_temp();
                        self.emit_expr_into(a, reg);
                        arg_regs.push(reg);
                    }
                    let func_byte = self.reg_read(func_reg, line, col);
                    self.current_chunk_mut_op(Opcode::Call, line, col);
                    self.emit_u8(func_byte, line, col);
                    self.emit_u8(arg_regs.len() as u8, line, col);
                    self.emit_u8(dst.raw() as u8, line, col);
                    for reg in arg_regs.into_iter().rev() {
                        self.registers.free_temp(reg);
                    }
                    self.registers.free_temp(func_reg);
                    return;
                }
            }
        }
        // A non-direct call target (a closure value, a higher-order
        // parameter): evaluate the callee into a register and call through
        // it the same way.
        let callee_reg = self.registers.alloc_temp();
        self.emit_expr_into(callee, callee_reg);
        let mut arg_regs = Vec::with_capacity(args.len());
        for a in args {
            let reg = self.registers.alloc_temp();
            self.emit_expr_into(a, reg);
            arg_regs.push(reg);
        }
        let callee_byte = self.reg_read(callee_reg, line, col);
        self.current_chunk_mut_op(Opcode::Call, line, col);
        self.emit_u8(callee_byte, line, col);
        self.emit_u8(arg_regs.len() as u8, line, col);
        self.emit_u8(dst.raw() as u8, line, col);
        for reg in arg_regs.into_iter().rev() {
            self.registers.free_temp(reg);
        }
        self.registers.free_temp(callee_reg);
    }

    fn emit_field_access(&mut self, base: &TypedExpr, field: &str, dst: RegisterId) {
        let (line, col) = (base.span.start.line, base.span.start.column);
        let base_reg = self.registers.alloc_temp();
        self.emit_expr_into(base, base_reg);
        let field_index = match &base.ty {
            Type::Struct(st) => st.fields.iter().position(|f| f.name == field).unwrap_or(0),
            _ => 0,
        };
        let base_byte = self.reg_read(base_reg, line, col);
        self.current_chunk_mut_op(Opcode::GetField, line, col);
        self.emit_u8(dst.raw() as u8, line, col);
        self.emit_u8(base_byte, line, col);
        self.emit_u8(field_index as u8, line, col);
        self.registers.free_temp(base_reg);
    }
}

const BUILTIN_LEN: u8 = 0;

fn type_tag(ty: &Type) -> u8 {
    match ty {
        Type::Primitive(Primitive::I32) => 0,
        Type::Primitive(Primitive::I64) => 1,
        Type::Primitive(Primitive::U32) => 2,
        Type::Primitive(Primitive::U64) => 3,
        Type::Primitive(Primitive::F64) => 4,
        Type::Primitive(Primitive::Bool) => 5,
        Type::Primitive(Primitive::String) => 6,
        _ => 255,
    }
}

/// Chooses a type-specialized opcode when both operands share a concrete
/// numeric type, falling back to the generic tagged opcode otherwise
/// (`spec.md` §4.6 eligibility rule, simplified from the teacher's
/// multi-condition LLVM fast-path gate to "both operand types are the same
/// concrete numeric primitive").
fn specialized_opcode(op: BinaryOp, operand_ty: &Type, result_ty: &Type) -> Opcode {
    use BinaryOp::*;
    let concrete = match operand_ty {
        Type::Primitive(p) if p.is_numeric() => Some(*p),
        _ => None,
    };
    match (op, concrete) {
        (Add, Some(Primitive::I32)) => Opcode::AddI32Typed,
        (Sub, Some(Primitive::I32)) => Opcode::SubI32Typed,
        (Mul, Some(Primitive::I32)) => Opcode::MulI32Typed,
        (Div, Some(Primitive::I32)) => Opcode::DivI32Typed,
        (Add, Some(Primitive::I64)) => Opcode::AddI64Typed,
        (Sub, Some(Primitive::I64)) => Opcode::SubI64Typed,
        (Mul, Some(Primitive::I64)) => Opcode::MulI64Typed,
        (Div, Some(Primitive::I64)) => Opcode::DivI64Typed,
        (Add, Some(Primitive::U32)) => Opcode::AddU32Typed,
        (Sub, Some(Primitive::U32)) => Opcode::SubU32Typed,
        (Mul, Some(Primitive::U32)) => Opcode::MulU32Typed,
        (Add, Some(Primitive::U64)) => Opcode::AddU64Typed,
        (Sub, Some(Primitive::U64)) => Opcode::SubU64Typed,
        (Mul, Some(Primitive::U64)) => Opcode::MulU64Typed,
        (Add, Some(Primitive::F64)) => Opcode::AddF64Typed,
        (Sub, Some(Primitive::F64)) => Opcode::SubF64Typed,
        (Mul, Some(Primitive::F64)) => Opcode::MulF64Typed,
        (Div, Some(Primitive::F64)) => Opcode::DivF64Typed,
        (Lt, Some(Primitive::I32)) => Opcode::LtI32Typed,
        (Lt, Some(Primitive::I64)) => Opcode::LtI64Typed,
        (Lt, Some(Primitive::F64)) => Opcode::LtF64Typed,
        (Eq, Some(Primitive::I32)) => Opcode::EqI32Typed,
        (Eq, Some(Primitive::I64)) => Opcode::EqI64Typed,
        (Eq, Some(Primitive::F64)) => Opcode::EqF64Typed,
        _ => generic_opcode(op, result_ty),
    }
}

/// Names a nested function's body refers to that it doesn't bind itself
/// (as a parameter or a local declared somewhere in its own body) — the
/// candidates [`CodeGenerator::emit_nested_function`] tries to resolve
/// against the enclosing frame as upvalues. Doesn't attempt real
/// scope-aware shadowing beyond "was this name declared anywhere in the
/// body" — a local that shadows an upvalue partway through the body is
/// treated as not needing capture at all, which is conservative (it just
/// means that name's enclosing value is fetched and never used).
fn free_variable_candidates(params: &[crate::typed_ast::TypedParam], body: &[TypedStmt]) -> Vec<String> {
    let mut bound: std::collections::HashSet<String> = params.iter().map(|p| p.name.clone()).collect();
    collect_bound_names(body, &mut bound);
    let mut refs = Vec::new();
    collect_identifier_refs(body, &mut refs);
    let mut seen = std::collections::HashSet::new();
    refs.into_iter().filter(|name| !bound.contains(name) && seen.insert(name.clone())).collect()
}

fn collect_bound_names(stmts: &[TypedStmt], out: &mut std::collections::HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            TypedStmtKind::VarDecl { name, .. } => {
                out.insert(name.clone());
            }
            TypedStmtKind::ForRange { var, body, .. } => {
                out.insert(var.clone());
                collect_bound_names(body, out);
            }
            TypedStmtKind::ForIter { var, body, .. } => {
                out.insert(var.clone());
                collect_bound_names(body, out);
            }
            TypedStmtKind::If { then_branch, else_branch, .. } => {
                collect_bound_names(then_branch, out);
                if let Some(b) = else_branch {
                    collect_bound_names(b, out);
                }
            }
            TypedStmtKind::While { body, .. } => collect_bound_names(body, out),
            TypedStmtKind::Block(inner) => collect_bound_names(inner, out),
            TypedStmtKind::Try { body, error_binding, handler } => {
                out.insert(error_binding.clone());
                collect_bound_names(body, out);
                collect_bound_names(handler, out);
            }
            TypedStmtKind::FunctionDecl { name, .. } => {
                out.insert(name.clone());
            }
            _ => {}
        }
    }
}

fn collect_identifier_refs(stmts: &[TypedStmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.kind {
            TypedStmtKind::VarDecl { init, .. } => {
                if let Some(e) = init {
                    collect_identifier_refs_expr(e, out);
                }
            }
            TypedStmtKind::Assignment { target, value } => {
                collect_identifier_refs_expr(target, out);
                collect_identifier_refs_expr(value, out);
            }
            TypedStmtKind::ExprStmt(e) => collect_identifier_refs_expr(e, out),
            TypedStmtKind::Print(args) => {
                for a in args {
                    collect_identifier_refs_expr(a, out);
                }
            }
            TypedStmtKind::Block(inner) => collect_identifier_refs(inner, out),
            TypedStmtKind::If { cond, then_branch, else_branch } => {
                collect_identifier_refs_expr(cond, out);
                collect_identifier_refs(then_branch, out);
                if let Some(b) = else_branch {
                    collect_identifier_refs(b, out);
                }
            }
            TypedStmtKind::While { cond, body } => {
                collect_identifier_refs_expr(cond, out);
                collect_identifier_refs(body, out);
            }
            TypedStmtKind::ForRange { start, end, step, body, .. } => {
                collect_identifier_refs_expr(start, out);
                collect_identifier_refs_expr(end, out);
                if let Some(s) = step {
                    collect_identifier_refs_expr(s, out);
                }
                collect_identifier_refs(body, out);
            }
            TypedStmtKind::ForIter { iterable, body, .. } => {
                collect_identifier_refs_expr(iterable, out);
                collect_identifier_refs(body, out);
            }
            TypedStmtKind::Return(Some(e)) => collect_identifier_refs_expr(e, out),
            TypedStmtKind::Try { body, handler, .. } => {
                collect_identifier_refs(body, out);
                collect_identifier_refs(handler, out);
            }
            TypedStmtKind::FunctionDecl { body, .. } => collect_identifier_refs(body, out),
            _ => {}
        }
    }
}

fn collect_identifier_refs_expr(expr: &TypedExpr, out: &mut Vec<String>) {
    match &expr.kind {
        TypedExprKind::Identifier(name) => out.push(name.clone()),
        TypedExprKind::Binary { left, right, .. } => {
            collect_identifier_refs_expr(left, out);
            collect_identifier_refs_expr(right, out);
        }
        TypedExprKind::Unary { operand, .. } => collect_identifier_refs_expr(operand, out),
        TypedExprKind::Ternary { cond, then_branch, else_branch } => {
            collect_identifier_refs_expr(cond, out);
            collect_identifier_refs_expr(then_branch, out);
            collect_identifier_refs_expr(else_branch, out);
        }
        TypedExprKind::Call { callee, args } => {
            collect_identifier_refs_expr(callee, out);
            for a in args {
                collect_identifier_refs_expr(a, out);
            }
        }
        TypedExprKind::FieldAccess { base, .. } => collect_identifier_refs_expr(base, out),
        TypedExprKind::Index { base, index } => {
            collect_identifier_refs_expr(base, out);
            collect_identifier_refs_expr(index, out);
        }
        TypedExprKind::Cast { expr, .. } => collect_identifier_refs_expr(expr, out),
        TypedExprKind::ArrayLiteral(items) => {
            for it in items {
                collect_identifier_refs_expr(it, out);
            }
        }
        TypedExprKind::Literal(_) => {}
    }
}

fn generic_opcode(op: BinaryOp, _result_ty: &Type) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::NotEq => Opcode::NotEq,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::LtEq => Opcode::LtEq,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::GtEq => Opcode::GtEq,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::optimizer::{optimize, PassToggles};
    use crate::parser::parse;
    use crate::typechecker::TypeChecker;
    use std::path::PathBuf;

    fn compile(src: &str) -> CompiledModule {
        let (tokens, _) = tokenize("t.orus", src);
        let mut sink = DiagnosticSink::new();
        let program = parse(&tokens, PathBuf::from("t.orus"), &mut sink);
        let typed = TypeChecker::new(&mut sink).check_program(&program);
        let (optimized, affinity, residency) = optimize(typed, PassToggles::default());
        let module = CodeGenerator::new(&mut sink, &affinity, &residency).compile(&optimized);
        assert!(sink.is_empty(), "{:?}", sink.into_vec());
        module
    }

    #[test]
    fn emits_a_typed_add_for_two_i32_literals() {
        let module = compile("x = 1 + 2\n");
        assert!(module.chunk.len() > 0);
        assert!(module.chunk.read_op(0).is_some());
    }

    #[test]
    fn compiles_a_function_into_its_own_chunk() {
        let module = compile("fn add(a: i32, b: i32) -> i32:\n    return a + b\n");
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].arity, 2);
        assert!(!module.functions[0].chunk.is_empty());
    }

    #[test]
    fn string_literals_become_pending_constants() {
        let module = compile("x = \"hi\"\n");
        assert_eq!(module.pending_strings.len(), 1);
        assert_eq!(module.pending_strings[0].text, "hi");
    }

    #[test]
    fn export_names_are_collected() {
        let module = compile("x = 1\nexport x\n");
        assert_eq!(module.exports, vec!["x".to_string()]);
    }

    #[test]
    fn nested_function_capturing_an_enclosing_local_compiles_to_a_closure() {
        let module = compile(
            "fn outer(n: i32) -> i32:\n    fn inner(x: i32) -> i32:\n        return x + n\n    return inner(n)\n",
        );
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.functions[0].name, "outer");
        assert_eq!(module.functions[1].name, "inner");
        assert_eq!(module.functions[1].upvalue_count, 1);
        assert!(module.functions[0].chunk.len() > 0);
    }

    #[test]
    fn nested_function_with_no_free_variables_captures_nothing() {
        let module = compile(
            "fn outer(n: i32) -> i32:\n    fn inner(x: i32) -> i32:\n        return x + 1\n    return inner(n)\n",
        );
        assert_eq!(module.functions[1].upvalue_count, 0);
    }
}
