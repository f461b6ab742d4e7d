//! Loop type residency planning.
//!
//! Grounded directly on `spec.md` §5 "Loop type residency planning:
//! complementary to affinity; tags each bound/guard node with two bits
//! {prefers-typed, requires-residency}. Codegen uses these to choose between
//! typed and generic register slots and to emit type-refresh instructions
//! when leaving the loop." Distinct from [`crate::optimizer::loop_affinity`],
//! which asks "does this *variable* hold one concrete type everywhere in the
//! program"; this pass asks, per loop, "does *this loop's own* guard/bound
//! computation stay numeric, and does that typed value need to survive from
//! one iteration into the next." No teacher equivalent — Seq hands all of
//! this to LLVM.

use crate::typed_ast::{TypedExpr, TypedExprKind, TypedProgram, TypedStmt, TypedStmtKind};
use orus_core::span::Span;
use orus_core::types::Type;
use std::collections::{HashMap, HashSet};

/// The two bits `spec.md` assigns to a loop's guard/bound node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Residency {
    /// The guard (`While`) or bound expressions (`ForRange`/`ForIter`)
    /// resolve to a primitive numeric type, so a typed register is possible
    /// at all.
    pub prefers_typed: bool,
    /// A typed register holding this loop's driving value must stay live
    /// across iterations rather than being reloaded fresh each time —
    /// codegen must emit a type-refresh (unbox back to a generic slot) on
    /// every exit edge instead of just the fallthrough.
    pub requires_residency: bool,
}

/// Per-loop residency bits, keyed by the loop statement's own [`Span`] since
/// (unlike [`crate::optimizer::loop_affinity::LoopAffinityPlan`]) this plan
/// is about the loop node itself, not a variable name that might recur
/// across unrelated loops.
#[derive(Debug, Default)]
pub struct ResidencyPlan {
    loops: HashMap<Span, Residency>,
}

impl ResidencyPlan {
    pub fn residency_of(&self, span: &Span) -> Residency {
        self.loops.get(span).copied().unwrap_or_default()
    }
}

pub fn analyze(program: &TypedProgram) -> ResidencyPlan {
    let mut plan = ResidencyPlan::default();
    analyze_block(&program.statements, &mut plan);
    plan
}

fn analyze_block(stmts: &[TypedStmt], plan: &mut ResidencyPlan) {
    for stmt in stmts {
        analyze_stmt(stmt, plan);
    }
}

fn analyze_stmt(stmt: &TypedStmt, plan: &mut ResidencyPlan) {
    match &stmt.kind {
        TypedStmtKind::While { cond, body } => {
            let guard_names = collect_identifier_names(cond);
            let prefers_typed = is_numeric(&cond_operand_type(cond));
            let mutated = collect_assigned_names(body);
            let requires_residency = prefers_typed && !guard_names.is_disjoint(&mutated);
            plan.loops.insert(stmt.span.clone(), Residency { prefers_typed, requires_residency });
            analyze_block(body, plan);
        }
        TypedStmtKind::ForRange { start, end, step, body, .. } => {
            let prefers_typed =
                is_numeric(&start.ty) && is_numeric(&end.ty) && step.as_ref().map_or(true, |s| is_numeric(&s.ty));
            // The induction variable is re-derived every iteration from the
            // same typed bounds, so a typed slot for it only pays off if it
            // stays resident rather than being reloaded each pass.
            let requires_residency = prefers_typed;
            plan.loops.insert(stmt.span.clone(), Residency { prefers_typed, requires_residency });
            analyze_block(body, plan);
        }
        TypedStmtKind::ForIter { iterable, body, .. } => {
            let elem_ty = match &iterable.ty {
                Type::Array(elem) => (**elem).clone(),
                other => other.clone(),
            };
            let prefers_typed = is_numeric(&elem_ty);
            let requires_residency = prefers_typed;
            plan.loops.insert(stmt.span.clone(), Residency { prefers_typed, requires_residency });
            analyze_block(body, plan);
        }
        TypedStmtKind::Block(inner) => analyze_block(inner, plan),
        TypedStmtKind::If { then_branch, else_branch, .. } => {
            analyze_block(then_branch, plan);
            if let Some(branch) = else_branch {
                analyze_block(branch, plan);
            }
        }
        TypedStmtKind::FunctionDecl { body, .. } => analyze_block(body, plan),
        TypedStmtKind::Try { body, handler, .. } => {
            analyze_block(body, plan);
            analyze_block(handler, plan);
        }
        _ => {}
    }
}

/// The type of a guard expression's most informative operand: for a
/// comparison, the left operand's type (both sides are already unified by
/// the typechecker); otherwise the expression's own type.
fn cond_operand_type(cond: &TypedExpr) -> Type {
    match &cond.kind {
        TypedExprKind::Binary { left, .. } => left.ty.clone(),
        _ => cond.ty.clone(),
    }
}

fn is_numeric(ty: &Type) -> bool {
    matches!(ty, Type::Primitive(p) if p.is_numeric())
}

fn collect_identifier_names(expr: &TypedExpr) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_identifier_names_into(expr, &mut names);
    names
}

fn collect_identifier_names_into(expr: &TypedExpr, names: &mut HashSet<String>) {
    match &expr.kind {
        TypedExprKind::Identifier(name) => {
            names.insert(name.clone());
        }
        TypedExprKind::Binary { left, right, .. } => {
            collect_identifier_names_into(left, names);
            collect_identifier_names_into(right, names);
        }
        TypedExprKind::Unary { operand, .. } => collect_identifier_names_into(operand, names),
        TypedExprKind::Ternary { cond, then_branch, else_branch } => {
            collect_identifier_names_into(cond, names);
            collect_identifier_names_into(then_branch, names);
            collect_identifier_names_into(else_branch, names);
        }
        TypedExprKind::Call { callee, args } => {
            collect_identifier_names_into(callee, names);
            args.iter().for_each(|a| collect_identifier_names_into(a, names));
        }
        TypedExprKind::FieldAccess { base, .. } => collect_identifier_names_into(base, names),
        TypedExprKind::Index { base, index } => {
            collect_identifier_names_into(base, names);
            collect_identifier_names_into(index, names);
        }
        TypedExprKind::Cast { expr: inner, .. } => collect_identifier_names_into(inner, names),
        TypedExprKind::ArrayLiteral(elements) => elements.iter().for_each(|e| collect_identifier_names_into(e, names)),
        TypedExprKind::Literal(_) => {}
    }
}

/// Names a loop body assigns to (directly, not through a nested function) —
/// the candidates whose typed register would need to outlive one iteration.
fn collect_assigned_names(body: &[TypedStmt]) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in body {
        collect_assigned_from_stmt(stmt, &mut names);
    }
    names
}

fn collect_assigned_from_stmt(stmt: &TypedStmt, names: &mut HashSet<String>) {
    match &stmt.kind {
        TypedStmtKind::Assignment { target, .. } => {
            if let TypedExprKind::Identifier(name) = &target.kind {
                names.insert(name.clone());
            }
        }
        TypedStmtKind::VarDecl { name, .. } => {
            names.insert(name.clone());
        }
        TypedStmtKind::Block(inner) => inner.iter().for_each(|s| collect_assigned_from_stmt(s, names)),
        TypedStmtKind::If { then_branch, else_branch, .. } => {
            then_branch.iter().for_each(|s| collect_assigned_from_stmt(s, names));
            if let Some(branch) = else_branch {
                branch.iter().for_each(|s| collect_assigned_from_stmt(s, names));
            }
        }
        TypedStmtKind::Try { body, handler, .. } => {
            body.iter().for_each(|s| collect_assigned_from_stmt(s, names));
            handler.iter().for_each(|s| collect_assigned_from_stmt(s, names));
        }
        // A nested loop's own counter is scoped to it, not this loop's guard.
        TypedStmtKind::While { .. } | TypedStmtKind::ForRange { .. } | TypedStmtKind::ForIter { .. } => {}
        _ => {}
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

    fn plan_for(src: &str) -> (ResidencyPlan, TypedProgram) {
        let (tokens, _) = tokenize("t.orus", src);
        let mut sink = DiagnosticSink::new();
        let program = parse(&tokens, PathBuf::from("t.orus"), &mut sink);
        let typed = TypeChecker::new(&mut sink).check_program(&program);
        let plan = analyze(&typed);
        (plan, typed)
    }

    #[test]
    fn a_numeric_for_range_prefers_typed_and_requires_residency() {
        let (plan, typed) = plan_for("for i in 0..10:\n    print(i)\n");
        let residency = plan.residency_of(&typed.statements[0].span);
        assert!(residency.prefers_typed);
        assert!(residency.requires_residency);
    }

    #[test]
    fn a_while_guard_whose_variable_is_never_reassigned_does_not_require_residency() {
        let src = "mut flag: bool = true\nx: i32 = 1\nwhile x < 10:\n    print(x)\n";
        let (plan, typed) = plan_for(src);
        let while_stmt = typed.statements.iter().find(|s| matches!(s.kind, TypedStmtKind::While { .. })).unwrap();
        let residency = plan.residency_of(&while_stmt.span);
        assert!(residency.prefers_typed);
        assert!(!residency.requires_residency);
    }

    #[test]
    fn a_while_guard_whose_counter_is_reassigned_in_body_requires_residency() {
        let src = "mut x: i32 = 0\nwhile x < 10:\n    x = x + 1\n";
        let (plan, typed) = plan_for(src);
        let while_stmt = &typed.statements[1];
        let residency = plan.residency_of(&while_stmt.span);
        assert!(residency.prefers_typed);
        assert!(residency.requires_residency);
    }
}
