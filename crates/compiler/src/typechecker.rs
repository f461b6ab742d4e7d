//! Hindley-Milner style type inference with numeric defaulting.
//!
//! Grounded on the two-pass (signatures-then-bodies) shape of
//! `examples/navicore-cem3`'s `crates/compiler/src/typechecker.rs`: struct
//! and function signatures are registered before any body is checked, so
//! mutually recursive and forward-referenced functions resolve. Literal
//! numeric defaulting follows `spec.md` §4.3: an integer literal with no
//! suffix and no concrete expected type defaults to `i32`; a float literal
//! defaults to `f64`. Every defaulting decision is recorded in a
//! [`DefaultingLog`] so later stages (and, eventually, a lint pass) can see
//! where the inferencer guessed rather than was told.

use crate::ast::{self, BinaryOp, Literal, NumericSuffix, Program, UnaryOp};
use crate::symbol::SymbolTable;
use crate::typed_ast::{TypedExpr, TypedExprKind, TypedParam, TypedProgram, TypedStmt, TypedStmtKind};
use orus_core::error::{Diagnostic, DiagnosticSink, ErrorCode};
use orus_core::span::Span;
use orus_core::types::{FieldInfo, StructType, Type, TypeArena, TypeVarStore};

/// Records every location where a numeric literal's type was chosen by
/// default rather than by an explicit suffix or surrounding context.
#[derive(Debug, Default)]
pub struct DefaultingLog {
    pub entries: Vec<(Span, Type)>,
}

impl DefaultingLog {
    fn record(&mut self, span: Span, ty: Type) {
        self.entries.push((span, ty));
    }
}

pub struct TypeChecker<'a> {
    symbols: SymbolTable,
    store: TypeVarStore,
    arena: TypeArena,
    sink: &'a mut DiagnosticSink,
    defaulting: DefaultingLog,
    current_return_type: Option<Type>,
    loop_depth: usize,
}

/// A type used in place of a real inference result once an error has
/// already been reported for an expression, so checking of the surrounding
/// tree can continue without cascading the same failure.
fn error_type() -> Type {
    Type::Primitive(orus_core::types::Primitive::Nil)
}

impl<'a> TypeChecker<'a> {
    pub fn new(sink: &'a mut DiagnosticSink) -> Self {
        TypeChecker {
            symbols: SymbolTable::new(),
            store: TypeVarStore::new(),
            arena: TypeArena::new(),
            sink,
            defaulting: DefaultingLog::default(),
            current_return_type: None,
            loop_depth: 0,
        }
    }

    pub fn into_defaulting_log(self) -> DefaultingLog {
        self.defaulting
    }

    pub fn check_program(&mut self, program: &Program) -> TypedProgram {
        self.collect_struct_signatures(program);
        self.collect_function_signatures(program);
        let statements = program
            .statements
            .iter()
            .map(|stmt| self.check_stmt(stmt))
            .collect();
        TypedProgram { statements }
    }

    fn collect_struct_signatures(&mut self, program: &Program) {
        for stmt in &program.statements {
            if let ast::StmtKind::StructDecl { name, fields } = &stmt.kind {
                let fields = fields
                    .iter()
                    .map(|f| FieldInfo { name: f.name.clone(), ty: f.ty.clone() })
                    .collect();
                self.arena.define_struct(StructType { name: name.clone(), fields });
            }
        }
    }

    fn collect_function_signatures(&mut self, program: &Program) {
        for stmt in &program.statements {
            if let ast::StmtKind::FunctionDecl { name, params, return_type, .. } = &stmt.kind {
                let param_types = params.iter().map(|p| p.ty.clone()).collect();
                let fn_type = Type::function(param_types, return_type.clone());
                self.symbols.declare(name.clone(), fn_type, false);
            }
        }
    }

    fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.sink.push(Diagnostic::new(code, message, span));
    }

    // ---------- statements ----------

    fn check_block(&mut self, stmts: &[ast::Stmt]) -> Vec<TypedStmt> {
        self.symbols.push_scope();
        let result = stmts.iter().map(|s| self.check_stmt(s)).collect();
        self.symbols.pop_scope();
        result
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> TypedStmt {
        let span = stmt.span.clone();
        let kind = match &stmt.kind {
            ast::StmtKind::VarDecl { name, declared_type, mutable, init } => {
                let init_typed = init.as_ref().map(|e| self.check_expr(e, declared_type.as_ref()));
                let ty = match (declared_type, &init_typed) {
                    (Some(t), Some(i)) => {
                        if self.store.unify(t, &i.ty).is_err() {
                            self.error(
                                ErrorCode::TypeMismatch,
                                format!("expected {t}, found {}", i.ty),
                                span.clone(),
                            );
                        }
                        t.clone()
                    }
                    (Some(t), None) => t.clone(),
                    (None, Some(i)) => i.ty.clone(),
                    (None, None) => {
                        self.error(ErrorCode::General, "variable declared with no type or initializer", span.clone());
                        error_type()
                    }
                };
                self.symbols.declare(name.clone(), ty.clone(), *mutable);
                TypedStmtKind::VarDecl { name: name.clone(), ty, mutable: *mutable, init: init_typed }
            }
            ast::StmtKind::Assignment { target, value } => {
                let target_typed = self.check_expr(target, None);
                self.check_assignment_target(target, &span);
                let value_typed = self.check_expr(value, Some(&target_typed.ty));
                if self.store.unify(&target_typed.ty, &value_typed.ty).is_err() {
                    self.error(
                        ErrorCode::TypeMismatch,
                        format!("expected {}, found {}", target_typed.ty, value_typed.ty),
                        span.clone(),
                    );
                }
                TypedStmtKind::Assignment { target: target_typed, value: value_typed }
            }
            ast::StmtKind::ExprStmt(expr) => TypedStmtKind::ExprStmt(self.check_expr(expr, None)),
            ast::StmtKind::Print(args) => {
                TypedStmtKind::Print(args.iter().map(|a| self.check_expr(a, None)).collect())
            }
            ast::StmtKind::Block(stmts) => TypedStmtKind::Block(self.check_block(stmts)),
            ast::StmtKind::If { cond, then_branch, else_branch } => {
                let cond_typed = self.check_expr(cond, Some(&Type::bool()));
                self.require_bool(&cond_typed, &span);
                let then_typed = self.check_block(then_branch);
                let else_typed = else_branch.as_ref().map(|b| self.check_block(b));
                TypedStmtKind::If { cond: cond_typed, then_branch: then_typed, else_branch: else_typed }
            }
            ast::StmtKind::While { cond, body } => {
                let cond_typed = self.check_expr(cond, Some(&Type::bool()));
                self.require_bool(&cond_typed, &span);
                self.loop_depth += 1;
                let body_typed = self.check_block(body);
                self.loop_depth -= 1;
                TypedStmtKind::While { cond: cond_typed, body: body_typed }
            }
            ast::StmtKind::ForRange { var, start, end, step, step_kind, body } => {
                let start_typed = self.check_expr(start, Some(&Type::i32()));
                let end_typed = self.check_expr(end, Some(&start_typed.ty));
                let step_typed = step.as_ref().map(|s| self.check_expr(s, Some(&start_typed.ty)));
                self.symbols.push_scope();
                self.symbols.declare(var.clone(), start_typed.ty.clone(), false);
                self.loop_depth += 1;
                let body_typed = body.iter().map(|s| self.check_stmt(s)).collect();
                self.loop_depth -= 1;
                self.symbols.pop_scope();
                TypedStmtKind::ForRange {
                    var: var.clone(),
                    start: start_typed,
                    end: end_typed,
                    step: step_typed,
                    step_kind: *step_kind,
                    body: body_typed,
                }
            }
            ast::StmtKind::ForIter { var, iterable, body } => {
                let iterable_typed = self.check_expr(iterable, None);
                let elem_ty = match &iterable_typed.ty {
                    Type::Array(elem) => (**elem).clone(),
                    other => {
                        self.error(
                            ErrorCode::TypeMismatch,
                            format!("cannot iterate over {other}"),
                            span.clone(),
                        );
                        error_type()
                    }
                };
                self.symbols.push_scope();
                self.symbols.declare(var.clone(), elem_ty, false);
                self.loop_depth += 1;
                let body_typed = body.iter().map(|s| self.check_stmt(s)).collect();
                self.loop_depth -= 1;
                self.symbols.pop_scope();
                TypedStmtKind::ForIter { var: var.clone(), iterable: iterable_typed, body: body_typed }
            }
            ast::StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error(ErrorCode::Control("break-outside-loop"), "`break` outside a loop", span.clone());
                }
                TypedStmtKind::Break
            }
            ast::StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(ErrorCode::Control("continue-outside-loop"), "`continue` outside a loop", span.clone());
                }
                TypedStmtKind::Continue
            }
            ast::StmtKind::Return(value) => {
                let expected = self.current_return_type.clone();
                if expected.is_none() {
                    self.error(ErrorCode::Control("return-outside-function"), "`return` outside a function", span.clone());
                }
                let value_typed = value.as_ref().map(|v| self.check_expr(v, expected.as_ref()));
                if let (Some(exp), Some(v)) = (&expected, &value_typed) {
                    if self.store.unify(exp, &v.ty).is_err() {
                        self.error(
                            ErrorCode::TypeMismatch,
                            format!("expected return type {exp}, found {}", v.ty),
                            span.clone(),
                        );
                    }
                }
                TypedStmtKind::Return(value_typed)
            }
            ast::StmtKind::FunctionDecl { name, params, return_type, body } => {
                // Declared in the *current* scope up front (redundant with
                // `collect_function_signatures` at the top level, but that
                // pass never looks inside a function body — this is the
                // only thing that makes a nested declaration resolvable at
                // all, including by a recursive call from its own body).
                let param_types: Vec<Type> = params.iter().map(|p| p.ty.clone()).collect();
                let fn_type = Type::function(param_types, return_type.clone());
                self.symbols.declare(name.clone(), fn_type, false);
                self.symbols.push_scope();
                let typed_params: Vec<TypedParam> = params
                    .iter()
                    .map(|p| {
                        self.symbols.declare(p.name.clone(), p.ty.clone(), false);
                        TypedParam { name: p.name.clone(), ty: p.ty.clone() }
                    })
                    .collect();
                let previous_return = self.current_return_type.replace(return_type.clone());
                let previous_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
                let body_typed = body.iter().map(|s| self.check_stmt(s)).collect();
                self.loop_depth = previous_loop_depth;
                self.current_return_type = previous_return;
                self.symbols.pop_scope();
                TypedStmtKind::FunctionDecl {
                    name: name.clone(),
                    params: typed_params,
                    return_type: return_type.clone(),
                    body: body_typed,
                }
            }
            ast::StmtKind::StructDecl { name, .. } => TypedStmtKind::StructDecl { name: name.clone() },
            ast::StmtKind::Import { module, alias, selective } => {
                // Each selectively-imported name is bound with a fresh type
                // variable: its real type lives in the imported module and
                // isn't known without compiling that module first, so usage
                // at the call site drives inference same as any other
                // unannotated binding. Whole-module imports (`import foo`,
                // no `selective` names) bind nothing here and are rejected
                // later, in codegen, with a diagnostic naming the module.
                for name in selective {
                    self.symbols.declare(name.clone(), self.store.fresh(), false);
                }
                TypedStmtKind::Import {
                    module: module.clone(),
                    alias: alias.clone(),
                    selective: selective.clone(),
                }
            }
            ast::StmtKind::Export { name } => TypedStmtKind::Export { name: name.clone() },
            ast::StmtKind::Try { body, error_binding, handler } => {
                let body_typed = self.check_block(body);
                self.symbols.push_scope();
                self.symbols.declare(error_binding.clone(), Type::string(), false);
                let handler_typed = handler.iter().map(|s| self.check_stmt(s)).collect();
                self.symbols.pop_scope();
                TypedStmtKind::Try {
                    body: body_typed,
                    error_binding: error_binding.clone(),
                    handler: handler_typed,
                }
            }
        };
        TypedStmt::new(kind, span)
    }

    fn check_assignment_target(&mut self, target: &ast::Expr, span: &Span) {
        if let ast::ExprKind::Identifier(name) = &target.kind {
            match self.symbols.lookup(name) {
                Some(binding) if !binding.mutable => {
                    self.error(
                        ErrorCode::ImmutableAssignment,
                        format!("cannot assign to immutable variable `{name}`"),
                        span.clone(),
                    );
                }
                Some(_) => {}
                None => {
                    self.error(ErrorCode::UndefinedVariable, format!("undefined variable `{name}`"), span.clone());
                }
            }
        }
    }

    fn require_bool(&mut self, expr: &TypedExpr, span: &Span) {
        if self.store.unify(&expr.ty, &Type::bool()).is_err() {
            self.error(ErrorCode::TypeMismatch, format!("expected bool, found {}", expr.ty), span.clone());
        }
    }

    // ---------- expressions ----------

    fn check_expr(&mut self, expr: &ast::Expr, expected: Option<&Type>) -> TypedExpr {
        let span = expr.span.clone();
        match &expr.kind {
            ast::ExprKind::Literal(lit) => self.check_literal(lit, expected, span),
            ast::ExprKind::Identifier(name) => {
                let ty = match self.symbols.lookup(name) {
                    Some(binding) => binding.ty.clone(),
                    None => {
                        self.error(ErrorCode::UndefinedVariable, format!("undefined variable `{name}`"), span.clone());
                        error_type()
                    }
                };
                TypedExpr::new(TypedExprKind::Identifier(name.clone()), ty, span)
            }
            ast::ExprKind::Binary { op, left, right } => self.check_binary(*op, left, right, span),
            ast::ExprKind::Unary { op, operand } => self.check_unary(*op, operand, span),
            ast::ExprKind::Ternary { cond, then_branch, else_branch } => {
                let cond_typed = self.check_expr(cond, Some(&Type::bool()));
                self.require_bool(&cond_typed, &cond_typed.span.clone());
                let then_typed = self.check_expr(then_branch, expected);
                let else_typed = self.check_expr(else_branch, Some(&then_typed.ty));
                let ty = self.store.unify(&then_typed.ty, &else_typed.ty).unwrap_or_else(|_| {
                    self.error(
                        ErrorCode::TypeMismatch,
                        format!("ternary branches disagree: {} vs {}", then_typed.ty, else_typed.ty),
                        span.clone(),
                    );
                    error_type()
                });
                TypedExpr::new(
                    TypedExprKind::Ternary {
                        cond: Box::new(cond_typed),
                        then_branch: Box::new(then_typed),
                        else_branch: Box::new(else_typed),
                    },
                    ty,
                    span,
                )
            }
            ast::ExprKind::Call { callee, args } => self.check_call(callee, args, span),
            ast::ExprKind::FieldAccess { base, field } => self.check_field_access(base, field, span),
            ast::ExprKind::Index { base, index } => self.check_index(base, index, span),
            ast::ExprKind::Cast { expr: inner, target } => {
                let inner_typed = self.check_expr(inner, None);
                TypedExpr::new(
                    TypedExprKind::Cast { expr: Box::new(inner_typed), target: target.clone() },
                    target.clone(),
                    span,
                )
            }
            ast::ExprKind::ArrayLiteral(elements) => self.check_array_literal(elements, expected, span),
        }
    }

    fn check_literal(&mut self, lit: &Literal, expected: Option<&Type>, span: Span) -> TypedExpr {
        match lit {
            Literal::Int { suffix, .. } => {
                let ty = if let Some(suffix) = suffix {
                    suffix_type(*suffix)
                } else if let Some(exp) = expected {
                    if exp.is_integer() { exp.clone() } else { Type::i32() }
                } else {
                    let ty = Type::i32();
                    self.defaulting.record(span.clone(), ty.clone());
                    ty
                };
                TypedExpr::new(TypedExprKind::Literal(lit.clone()), ty, span)
            }
            Literal::Float { suffix, .. } => {
                let ty = if let Some(suffix) = suffix {
                    suffix_type(*suffix)
                } else if matches!(expected, Some(Type::Primitive(orus_core::types::Primitive::F64))) {
                    Type::f64()
                } else {
                    let ty = Type::f64();
                    self.defaulting.record(span.clone(), ty.clone());
                    ty
                };
                TypedExpr::new(TypedExprKind::Literal(lit.clone()), ty, span)
            }
            Literal::Bool(_) => TypedExpr::new(TypedExprKind::Literal(lit.clone()), Type::bool(), span),
            Literal::Str(_) => TypedExpr::new(TypedExprKind::Literal(lit.clone()), Type::string(), span),
            Literal::Nil => TypedExpr::new(TypedExprKind::Literal(lit.clone()), Type::nil(), span),
        }
    }

    fn check_binary(&mut self, op: BinaryOp, left: &ast::Expr, right: &ast::Expr, span: Span) -> TypedExpr {
        let left_typed = self.check_expr(left, None);
        let right_typed = self.check_expr(right, Some(&left_typed.ty));
        let ty = match op {
            BinaryOp::And | BinaryOp::Or => {
                self.require_bool(&left_typed, &span);
                self.require_bool(&right_typed, &span);
                Type::bool()
            }
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                if self.store.unify(&left_typed.ty, &right_typed.ty).is_err() {
                    self.error(
                        ErrorCode::TypeMismatch,
                        format!("cannot compare {} with {}", left_typed.ty, right_typed.ty),
                        span.clone(),
                    );
                }
                Type::bool()
            }
            BinaryOp::Add if left_typed.ty == Type::string() => Type::string(),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                match self.store.unify(&left_typed.ty, &right_typed.ty) {
                    Ok(unified) if unified.is_numeric() => unified,
                    Ok(unified) => {
                        self.error(ErrorCode::TypeMismatch, format!("`{unified}` does not support arithmetic"), span.clone());
                        error_type()
                    }
                    Err(_) => {
                        self.error(
                            ErrorCode::TypeMismatch,
                            format!("mismatched operand types: {} vs {}", left_typed.ty, right_typed.ty),
                            span.clone(),
                        );
                        error_type()
                    }
                }
            }
        };
        TypedExpr::new(
            TypedExprKind::Binary { op, left: Box::new(left_typed), right: Box::new(right_typed) },
            ty,
            span,
        )
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &ast::Expr, span: Span) -> TypedExpr {
        let operand_typed = self.check_expr(operand, None);
        let ty = match op {
            UnaryOp::Neg => {
                if !operand_typed.ty.is_numeric() {
                    self.error(ErrorCode::TypeMismatch, format!("cannot negate `{}`", operand_typed.ty), span.clone());
                    error_type()
                } else {
                    operand_typed.ty.clone()
                }
            }
            UnaryOp::Not => {
                self.require_bool(&operand_typed, &span);
                Type::bool()
            }
        };
        TypedExpr::new(TypedExprKind::Unary { op, operand: Box::new(operand_typed) }, ty, span)
    }

    fn check_call(&mut self, callee: &ast::Expr, args: &[ast::Expr], span: Span) -> TypedExpr {
        let callee_typed = self.check_expr(callee, None);
        let fn_type = match &callee_typed.ty {
            Type::Function(ft) => Some(ft.clone()),
            _ => {
                self.error(ErrorCode::TypeMismatch, format!("`{}` is not callable", callee_typed.ty), span.clone());
                None
            }
        };
        let args_typed: Vec<TypedExpr> = match &fn_type {
            Some(ft) => {
                if ft.params.len() != args.len() {
                    self.error(
                        ErrorCode::FunctionCall,
                        format!("expected {} argument(s), found {}", ft.params.len(), args.len()),
                        span.clone(),
                    );
                }
                args.iter()
                    .enumerate()
                    .map(|(i, a)| {
                        let expected = ft.params.get(i);
                        let typed = self.check_expr(a, expected);
                        if let Some(p) = expected {
                            if self.store.unify(p, &typed.ty).is_err() {
                                self.error(
                                    ErrorCode::TypeMismatch,
                                    format!("argument {}: expected {p}, found {}", i + 1, typed.ty),
                                    typed.span.clone(),
                                );
                            }
                        }
                        typed
                    })
                    .collect()
            }
            None => args.iter().map(|a| self.check_expr(a, None)).collect(),
        };
        let ty = fn_type.map(|ft| ft.result.clone()).unwrap_or_else(error_type);
        TypedExpr::new(TypedExprKind::Call { callee: Box::new(callee_typed), args: args_typed }, ty, span)
    }

    fn check_field_access(&mut self, base: &ast::Expr, field: &str, span: Span) -> TypedExpr {
        let base_typed = self.check_expr(base, None);
        let ty = match &base_typed.ty {
            Type::Struct(st) => st
                .fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| f.ty.clone())
                .unwrap_or_else(|| {
                    self.error(
                        ErrorCode::General,
                        format!("struct `{}` has no field `{field}`", st.name),
                        span.clone(),
                    );
                    error_type()
                }),
            other => {
                self.error(ErrorCode::TypeMismatch, format!("`{other}` has no fields"), span.clone());
                error_type()
            }
        };
        TypedExpr::new(
            TypedExprKind::FieldAccess { base: Box::new(base_typed), field: field.to_string() },
            ty,
            span,
        )
    }

    fn check_index(&mut self, base: &ast::Expr, index: &ast::Expr, span: Span) -> TypedExpr {
        let base_typed = self.check_expr(base, None);
        let index_typed = self.check_expr(index, Some(&Type::i32()));
        if !index_typed.ty.is_integer() {
            self.error(ErrorCode::TypeMismatch, format!("array index must be an integer, found {}", index_typed.ty), span.clone());
        }
        let ty = match &base_typed.ty {
            Type::Array(elem) => (**elem).clone(),
            other => {
                self.error(ErrorCode::TypeMismatch, format!("cannot index `{other}`"), span.clone());
                error_type()
            }
        };
        TypedExpr::new(
            TypedExprKind::Index { base: Box::new(base_typed), index: Box::new(index_typed) },
            ty,
            span,
        )
    }

    fn check_array_literal(&mut self, elements: &[ast::Expr], expected: Option<&Type>, span: Span) -> TypedExpr {
        let elem_expected = match expected {
            Some(Type::Array(elem)) => Some((**elem).clone()),
            _ => None,
        };
        let mut typed_elements = Vec::with_capacity(elements.len());
        let mut elem_ty = elem_expected.unwrap_or_else(|| self.store.fresh());
        for e in elements {
            let typed = self.check_expr(e, Some(&elem_ty));
            match self.store.unify(&elem_ty, &typed.ty) {
                Ok(unified) => elem_ty = unified,
                Err(_) => {
                    self.error(
                        ErrorCode::TypeMismatch,
                        format!("array elements must share a type: {elem_ty} vs {}", typed.ty),
                        typed.span.clone(),
                    );
                }
            }
            typed_elements.push(typed);
        }
        let resolved_elem = self.store.resolve(&elem_ty);
        TypedExpr::new(TypedExprKind::ArrayLiteral(typed_elements), Type::array(resolved_elem), span)
    }
}

fn suffix_type(suffix: NumericSuffix) -> Type {
    match suffix {
        NumericSuffix::I32 => Type::i32(),
        NumericSuffix::I64 => Type::i64(),
        NumericSuffix::U32 => Type::u32(),
        NumericSuffix::U64 => Type::u64(),
        NumericSuffix::F64 => Type::f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use std::path::PathBuf;

    fn check(src: &str) -> (TypedProgram, DiagnosticSink) {
        let (tokens, lex_errors) = tokenize("t.orus", src);
        assert!(lex_errors.is_empty());
        let mut parse_sink = DiagnosticSink::new();
        let program = parse(&tokens, PathBuf::from("t.orus"), &mut parse_sink);
        assert!(parse_sink.is_empty(), "{:?}", parse_sink.into_vec());
        let mut sink = DiagnosticSink::new();
        let typed = {
            let mut checker = TypeChecker::new(&mut sink);
            checker.check_program(&program)
        };
        (typed, sink)
    }

    #[test]
    fn unsuffixed_int_literal_defaults_to_i32() {
        let (typed, sink) = check("x = 1\n");
        assert!(sink.is_empty());
        let TypedStmtKind::Assignment { value, .. } = &typed.statements[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(value.ty, Type::i32());
    }

    #[test]
    fn declared_type_forces_literal_suffix() {
        let (typed, sink) = check("mut x: i64 = 1\n");
        assert!(sink.is_empty());
        let TypedStmtKind::VarDecl { ty, .. } = &typed.statements[0].kind else {
            panic!("expected var decl");
        };
        assert_eq!(*ty, Type::i64());
    }

    #[test]
    fn assigning_to_immutable_binding_is_an_error() {
        let (_, sink) = check("x = 1\nx = 2\n");
        assert!(sink.iter().any(|d| d.code == ErrorCode::ImmutableAssignment));
    }

    #[test]
    fn undefined_variable_is_reported() {
        let (_, sink) = check("y = x\n");
        assert!(sink.iter().any(|d| d.code == ErrorCode::UndefinedVariable));
    }

    #[test]
    fn function_call_arity_mismatch_is_reported() {
        let src = "fn add(a: i32, b: i32) -> i32:\n    return a + b\ny = add(1)\n";
        let (_, sink) = check(src);
        assert!(sink.iter().any(|d| d.code == ErrorCode::FunctionCall));
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let (_, sink) = check("break\n");
        assert!(!sink.is_empty());
    }

    #[test]
    fn forward_reference_to_a_later_function_resolves() {
        let src = "fn main() -> i32:\n    return helper()\nfn helper() -> i32:\n    return 1\n";
        let (_, sink) = check(src);
        assert!(sink.is_empty(), "{:?}", sink.into_vec());
    }
}
