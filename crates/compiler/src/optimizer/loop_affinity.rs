//! Loop type-affinity analysis.
//!
//! No teacher equivalent (Seq has no register allocator of its own; LLVM
//! does this for it). Grounded directly on `spec.md` §5 "loop type affinity
//! / residency planning: a loop variable that holds a single concrete
//! numeric type for its entire lifetime is marked for a typed register
//! slot; one whose type varies (or that escapes as a generic `Value`) is
//! left in a generic tagged slot." This pass only *computes* the plan;
//! `codegen::registers` consults it when assigning slots.

use crate::typed_ast::{TypedExpr, TypedExprKind, TypedProgram, TypedStmt, TypedStmtKind};
use orus_core::types::Type;
use std::collections::HashMap;

/// Whether a given variable name can live in a type-specialized register
/// for the whole body of the loop it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Typed,
    Generic,
}

#[derive(Debug, Default)]
pub struct LoopAffinityPlan {
    /// Keyed by variable name; a variable observed with more than one
    /// concrete type anywhere in the program is downgraded to `Generic`.
    affinities: HashMap<String, Affinity>,
}

impl LoopAffinityPlan {
    pub fn affinity_of(&self, name: &str) -> Affinity {
        self.affinities.get(name).copied().unwrap_or(Affinity::Generic)
    }
}

struct Observation {
    seen: HashMap<String, Type>,
}

pub fn analyze(program: &TypedProgram) -> LoopAffinityPlan {
    let mut observation = Observation { seen: HashMap::new() };
    for stmt in &program.statements {
        observe_stmt(stmt, &mut observation);
    }
    let mut plan = LoopAffinityPlan::default();
    for (name, ty) in observation.seen {
        let affinity = if matches!(ty, Type::GenericVar(_) | Type::Instance(_) | Type::Struct(_)) {
            Affinity::Generic
        } else {
            Affinity::Typed
        };
        plan.affinities.insert(name, affinity);
    }
    plan
}

fn note(observation: &mut Observation, name: &str, ty: &Type) {
    match observation.seen.get(name) {
        Some(existing) if existing != ty => {
            observation.seen.insert(name.to_string(), Type::GenericVar(orus_core::types::TypeVarId(u32::MAX)));
        }
        Some(_) => {}
        None => {
            observation.seen.insert(name.to_string(), ty.clone());
        }
    }
}

fn observe_stmt(stmt: &TypedStmt, observation: &mut Observation) {
    match &stmt.kind {
        TypedStmtKind::VarDecl { name, ty, init, .. } => {
            note(observation, name, ty);
            if let Some(e) = init {
                observe_expr(e, observation);
            }
        }
        TypedStmtKind::Assignment { target, value } => {
            if let TypedExprKind::Identifier(name) = &target.kind {
                note(observation, name, &target.ty);
            }
            observe_expr(target, observation);
            observe_expr(value, observation);
        }
        TypedStmtKind::ExprStmt(e) => observe_expr(e, observation),
        TypedStmtKind::Print(args) => args.iter().for_each(|a| observe_expr(a, observation)),
        TypedStmtKind::Block(stmts) => stmts.iter().for_each(|s| observe_stmt(s, observation)),
        TypedStmtKind::If { cond, then_branch, else_branch } => {
            observe_expr(cond, observation);
            then_branch.iter().for_each(|s| observe_stmt(s, observation));
            if let Some(branch) = else_branch {
                branch.iter().for_each(|s| observe_stmt(s, observation));
            }
        }
        TypedStmtKind::While { cond, body } => {
            observe_expr(cond, observation);
            body.iter().for_each(|s| observe_stmt(s, observation));
        }
        TypedStmtKind::ForRange { var, start, end, step, body, .. } => {
            note(observation, var, &start.ty);
            observe_expr(start, observation);
            observe_expr(end, observation);
            if let Some(s) = step {
                observe_expr(s, observation);
            }
            body.iter().for_each(|s| observe_stmt(s, observation));
        }
        TypedStmtKind::ForIter { var, iterable, body } => {
            if let Type::Array(elem) = &iterable.ty {
                note(observation, var, elem);
            }
            observe_expr(iterable, observation);
            body.iter().for_each(|s| observe_stmt(s, observation));
        }
        TypedStmtKind::Return(Some(e)) => observe_expr(e, observation),
        TypedStmtKind::FunctionDecl { params, body, .. } => {
            for p in params {
                note(observation, &p.name, &p.ty);
            }
            body.iter().for_each(|s| observe_stmt(s, observation));
        }
        TypedStmtKind::Try { body, handler, .. } => {
            body.iter().for_each(|s| observe_stmt(s, observation));
            handler.iter().for_each(|s| observe_stmt(s, observation));
        }
        TypedStmtKind::Return(None)
        | TypedStmtKind::Break
        | TypedStmtKind::Continue
        | TypedStmtKind::StructDecl { .. }
        | TypedStmtKind::Import { .. }
        | TypedStmtKind::Export { .. } => {}
    }
}

fn observe_expr(expr: &TypedExpr, observation: &mut Observation) {
    match &expr.kind {
        TypedExprKind::Binary { left, right, .. } => {
            observe_expr(left, observation);
            observe_expr(right, observation);
        }
        TypedExprKind::Unary { operand, .. } => observe_expr(operand, observation),
        TypedExprKind::Ternary { cond, then_branch, else_branch } => {
            observe_expr(cond, observation);
            observe_expr(then_branch, observation);
            observe_expr(else_branch, observation);
        }
        TypedExprKind::Call { callee, args } => {
            observe_expr(callee, observation);
            args.iter().for_each(|a| observe_expr(a, observation));
        }
        TypedExprKind::FieldAccess { base, .. } => observe_expr(base, observation),
        TypedExprKind::Index { base, index } => {
            observe_expr(base, observation);
            observe_expr(index, observation);
        }
        TypedExprKind::Cast { expr: inner, .. } => observe_expr(inner, observation),
        TypedExprKind::ArrayLiteral(elements) => elements.iter().for_each(|e| observe_expr(e, observation)),
        TypedExprKind::Literal(_) | TypedExprKind::Identifier(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::typechecker::TypeChecker;
    use orus_core::error::DiagnosticSink;
    use std::path::PathBuf;

    fn plan_for(src: &str) -> LoopAffinityPlan {
        let (tokens, _) = tokenize("t.orus", src);
        let mut sink = DiagnosticSink::new();
        let program = parse(&tokens, PathBuf::from("t.orus"), &mut sink);
        let typed = TypeChecker::new(&mut sink).check_program(&program);
        analyze(&typed)
    }

    #[test]
    fn a_variable_used_only_as_i32_is_typed() {
        let plan = plan_for("mut sum: i32 = 0\nfor i in 0..10:\n    sum = sum + i\n");
        assert_eq!(plan.affinity_of("sum"), Affinity::Typed);
        assert_eq!(plan.affinity_of("i"), Affinity::Typed);
    }

    #[test]
    fn an_unseen_variable_defaults_to_generic() {
        let plan = plan_for("x = 1\n");
        assert_eq!(plan.affinity_of("nonexistent"), Affinity::Generic);
    }
}
