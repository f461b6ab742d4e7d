//! Folds arithmetic and comparisons over literal operands at compile time.
//!
//! Grounded on `spec.md` §5 "constant folding: literal-operand arithmetic
//! and comparisons are evaluated at compile time". Runs bottom-up so a
//! folded child can feed a fold at its parent in the same pass.

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::optimizer::context::PassResult;
use crate::typed_ast::{TypedExpr, TypedExprKind, TypedProgram, TypedStmt, TypedStmtKind};
use orus_core::types::{Primitive, Type};

pub fn run(program: &mut TypedProgram) -> PassResult {
    let mut result = PassResult::default();
    for stmt in &mut program.statements {
        fold_stmt(stmt, &mut result);
    }
    result
}

fn fold_stmt(stmt: &mut TypedStmt, result: &mut PassResult) {
    match &mut stmt.kind {
        TypedStmtKind::VarDecl { init: Some(e), .. } => fold_expr(e, result),
        TypedStmtKind::VarDecl { init: None, .. } => {}
        TypedStmtKind::Assignment { target, value } => {
            fold_expr(target, result);
            fold_expr(value, result);
        }
        TypedStmtKind::ExprStmt(e) => fold_expr(e, result),
        TypedStmtKind::Print(args) => args.iter_mut().for_each(|a| fold_expr(a, result)),
        TypedStmtKind::Block(stmts) => stmts.iter_mut().for_each(|s| fold_stmt(s, result)),
        TypedStmtKind::If { cond, then_branch, else_branch } => {
            fold_expr(cond, result);
            then_branch.iter_mut().for_each(|s| fold_stmt(s, result));
            if let Some(branch) = else_branch {
                branch.iter_mut().for_each(|s| fold_stmt(s, result));
            }
        }
        TypedStmtKind::While { cond, body } => {
            fold_expr(cond, result);
            body.iter_mut().for_each(|s| fold_stmt(s, result));
        }
        TypedStmtKind::ForRange { start, end, step, body, .. } => {
            fold_expr(start, result);
            fold_expr(end, result);
            if let Some(s) = step {
                fold_expr(s, result);
            }
            body.iter_mut().for_each(|s| fold_stmt(s, result));
        }
        TypedStmtKind::ForIter { iterable, body, .. } => {
            fold_expr(iterable, result);
            body.iter_mut().for_each(|s| fold_stmt(s, result));
        }
        TypedStmtKind::Return(Some(e)) => fold_expr(e, result),
        TypedStmtKind::Return(None) => {}
        TypedStmtKind::FunctionDecl { body, .. } => body.iter_mut().for_each(|s| fold_stmt(s, result)),
        TypedStmtKind::Try { body, handler, .. } => {
            body.iter_mut().for_each(|s| fold_stmt(s, result));
            handler.iter_mut().for_each(|s| fold_stmt(s, result));
        }
        TypedStmtKind::Break
        | TypedStmtKind::Continue
        | TypedStmtKind::StructDecl { .. }
        | TypedStmtKind::Import { .. }
        | TypedStmtKind::Export { .. } => {}
    }
}

/// A literal value pulled out of a [`TypedExpr`] for constant-folding
/// purposes. Integers are carried widened to `i128` so overflow during
/// folding itself can be detected before truncating back to the real width.
enum ConstValue {
    Int(i128),
    Float(f64),
    Bool(bool),
}

fn as_const(expr: &TypedExpr) -> Option<ConstValue> {
    match &expr.kind {
        TypedExprKind::Literal(Literal::Int { text, .. }) => text.parse::<i128>().ok().map(ConstValue::Int),
        TypedExprKind::Literal(Literal::Float { text, .. }) => text.parse::<f64>().ok().map(ConstValue::Float),
        TypedExprKind::Literal(Literal::Bool(b)) => Some(ConstValue::Bool(*b)),
        _ => None,
    }
}

fn fold_expr(expr: &mut TypedExpr, result: &mut PassResult) {
    match &mut expr.kind {
        TypedExprKind::Binary { left, right, .. } => {
            fold_expr(left, result);
            fold_expr(right, result);
        }
        TypedExprKind::Unary { operand, .. } => fold_expr(operand, result),
        TypedExprKind::Ternary { cond, then_branch, else_branch } => {
            fold_expr(cond, result);
            fold_expr(then_branch, result);
            fold_expr(else_branch, result);
        }
        TypedExprKind::Call { callee, args } => {
            fold_expr(callee, result);
            args.iter_mut().for_each(|a| fold_expr(a, result));
        }
        TypedExprKind::FieldAccess { base, .. } => fold_expr(base, result),
        TypedExprKind::Index { base, index } => {
            fold_expr(base, result);
            fold_expr(index, result);
        }
        TypedExprKind::Cast { expr: inner, .. } => fold_expr(inner, result),
        TypedExprKind::ArrayLiteral(elements) => elements.iter_mut().for_each(|e| fold_expr(e, result)),
        TypedExprKind::Literal(_) | TypedExprKind::Identifier(_) => return,
    }

    if let Some(folded) = try_fold(expr) {
        if let TypedExprKind::Literal(lit) = &folded {
            expr.folded = Some(lit.clone());
        }
        expr.kind = folded;
        expr.stable = true;
        result.rewrites += 1;
    }
}

fn try_fold(expr: &TypedExpr) -> Option<TypedExprKind> {
    match &expr.kind {
        TypedExprKind::Unary { op, operand } => {
            let value = as_const(operand)?;
            match (op, value) {
                (UnaryOp::Neg, ConstValue::Int(i)) => Some(int_literal(-i)),
                (UnaryOp::Neg, ConstValue::Float(f)) => Some(float_literal(-f)),
                (UnaryOp::Not, ConstValue::Bool(b)) => Some(bool_literal(!b)),
                _ => None,
            }
        }
        TypedExprKind::Binary { op, left, right } => {
            let l = as_const(left)?;
            let r = as_const(right)?;
            fold_binary(*op, l, r, &expr.ty)
        }
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, l: ConstValue, r: ConstValue, ty: &Type) -> Option<TypedExprKind> {
    use BinaryOp::*;
    match (l, r) {
        (ConstValue::Int(a), ConstValue::Int(b)) => {
            let result = match op {
                Add => a.checked_add(b)?,
                Sub => a.checked_sub(b)?,
                Mul => a.checked_mul(b)?,
                Div if b != 0 => a.checked_div(b)?,
                Mod if b != 0 => a.checked_rem(b)?,
                Div | Mod => return None,
                Eq => return Some(bool_literal(a == b)),
                NotEq => return Some(bool_literal(a != b)),
                Lt => return Some(bool_literal(a < b)),
                LtEq => return Some(bool_literal(a <= b)),
                Gt => return Some(bool_literal(a > b)),
                GtEq => return Some(bool_literal(a >= b)),
                And | Or => return None,
            };
            if !fits(result, ty) {
                return None;
            }
            Some(int_literal(result))
        }
        (ConstValue::Float(a), ConstValue::Float(b)) => Some(match op {
            Add => float_literal(a + b),
            Sub => float_literal(a - b),
            Mul => float_literal(a * b),
            Div if b != 0.0 => float_literal(a / b),
            Div => return None,
            Eq => bool_literal(a == b),
            NotEq => bool_literal(a != b),
            Lt => bool_literal(a < b),
            LtEq => bool_literal(a <= b),
            Gt => bool_literal(a > b),
            GtEq => bool_literal(a >= b),
            Mod | And | Or => return None,
        }),
        (ConstValue::Bool(a), ConstValue::Bool(b)) => Some(match op {
            And => bool_literal(a && b),
            Or => bool_literal(a || b),
            Eq => bool_literal(a == b),
            NotEq => bool_literal(a != b),
            _ => return None,
        }),
        _ => None,
    }
}

fn fits(value: i128, ty: &Type) -> bool {
    match ty {
        Type::Primitive(Primitive::I32) => i32::try_from(value).is_ok(),
        Type::Primitive(Primitive::I64) => i64::try_from(value).is_ok(),
        Type::Primitive(Primitive::U32) => u32::try_from(value).is_ok(),
        Type::Primitive(Primitive::U64) => u64::try_from(value).is_ok(),
        _ => true,
    }
}

fn int_literal(value: i128) -> TypedExprKind {
    TypedExprKind::Literal(Literal::Int { text: value.to_string(), suffix: None })
}

fn float_literal(value: f64) -> TypedExprKind {
    TypedExprKind::Literal(Literal::Float { text: value.to_string(), suffix: None })
}

fn bool_literal(value: bool) -> TypedExprKind {
    TypedExprKind::Literal(Literal::Bool(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orus_core::span::{Position, Span};
    use rstest::rstest;

    fn lit_expr(kind: TypedExprKind, ty: Type) -> TypedExpr {
        TypedExpr::new(kind, ty, Span::point("t.orus", Position::new(1, 1)))
    }

    #[rstest]
    #[case(BinaryOp::Add, 2, 3, 5)]
    #[case(BinaryOp::Sub, 5, 3, 2)]
    #[case(BinaryOp::Mul, 4, 3, 12)]
    #[case(BinaryOp::Div, 10, 2, 5)]
    #[case(BinaryOp::Mod, 10, 3, 1)]
    fn folds_integer_binary_ops(#[case] op: BinaryOp, #[case] left: i128, #[case] right: i128, #[case] expected: i128) {
        let mut expr = lit_expr(
            TypedExprKind::Binary {
                op,
                left: Box::new(lit_expr(int_literal(left), Type::i32())),
                right: Box::new(lit_expr(int_literal(right), Type::i32())),
            },
            Type::i32(),
        );
        let mut result = PassResult::default();
        fold_expr(&mut expr, &mut result);
        assert!(result.changed());
        assert_eq!(expr.kind, int_literal(expected));
    }

    #[rstest]
    #[case(BinaryOp::Eq, 3, 3, true)]
    #[case(BinaryOp::NotEq, 3, 4, true)]
    #[case(BinaryOp::Lt, 2, 3, true)]
    #[case(BinaryOp::GtEq, 2, 3, false)]
    fn folds_integer_comparisons(#[case] op: BinaryOp, #[case] left: i128, #[case] right: i128, #[case] expected: bool) {
        let mut expr = lit_expr(
            TypedExprKind::Binary {
                op,
                left: Box::new(lit_expr(int_literal(left), Type::i32())),
                right: Box::new(lit_expr(int_literal(right), Type::i32())),
            },
            Type::Primitive(Primitive::Bool),
        );
        let mut result = PassResult::default();
        fold_expr(&mut expr, &mut result);
        assert!(result.changed());
        assert_eq!(expr.kind, bool_literal(expected));
    }

    #[test]
    fn folds_integer_addition() {
        let mut expr = lit_expr(
            TypedExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(lit_expr(int_literal(2), Type::i32())),
                right: Box::new(lit_expr(int_literal(3), Type::i32())),
            },
            Type::i32(),
        );
        let mut result = PassResult::default();
        fold_expr(&mut expr, &mut result);
        assert!(result.changed());
        assert_eq!(expr.kind, int_literal(5));
        assert_eq!(expr.folded, Some(Literal::Int { text: "5".to_string(), suffix: None }));
        assert!(expr.stable);
    }

    #[test]
    fn does_not_fold_division_by_zero() {
        let mut expr = lit_expr(
            TypedExprKind::Binary {
                op: BinaryOp::Div,
                left: Box::new(lit_expr(int_literal(1), Type::i32())),
                right: Box::new(lit_expr(int_literal(0), Type::i32())),
            },
            Type::i32(),
        );
        let mut result = PassResult::default();
        fold_expr(&mut expr, &mut result);
        assert!(!result.changed());
    }

    #[test]
    fn does_not_fold_overflowing_i32_addition() {
        let mut expr = lit_expr(
            TypedExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(lit_expr(int_literal(i32::MAX as i128), Type::i32())),
                right: Box::new(lit_expr(int_literal(1), Type::i32())),
            },
            Type::i32(),
        );
        let mut result = PassResult::default();
        fold_expr(&mut expr, &mut result);
        assert!(!result.changed());
    }
}
