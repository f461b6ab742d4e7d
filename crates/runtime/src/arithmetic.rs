//! Numeric operations shared by the generic tagged opcodes and their
//! type-specialized counterparts.
//!
//! Grounded on this crate's own (now-superseded) Seq-era `arithmetic.rs`/
//! `float_ops.rs`: one function per operator, wrapping semantics on overflow
//! by default, a `panic`-free `Result` return in place of the teacher's
//! `panic!` (which was safe there only because the type checker had already
//! proven the stack's shape; Orus's VM has no stack to inspect, so a
//! mismatched operand pair here is a genuine runtime error rather than a
//! compiler bug).
//!
//! `spec.md` §4.7 "Overflow": typed add/sub/mul/div wrap by default;
//! `AddI32TypedChecked`/`AddI64TypedChecked` are handled separately in
//! `vm.rs` since they change *what* happens on overflow rather than *how*
//! the operation itself is computed.

use crate::vm::VmError;
use orus_core::opcode::Opcode;
use orus_core::value::Value;

pub fn i32_op(op: Opcode, a: i32, b: i32) -> Result<Value, VmError> {
    use Opcode::*;
    Ok(match op {
        Add => Value::I32(a.wrapping_add(b)),
        Sub => Value::I32(a.wrapping_sub(b)),
        Mul => Value::I32(a.wrapping_mul(b)),
        Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::I32(a.wrapping_div(b))
        }
        Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::I32(a.wrapping_rem(b))
        }
        Eq => Value::Bool(a == b),
        NotEq => Value::Bool(a != b),
        Lt => Value::Bool(a < b),
        LtEq => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        GtEq => Value::Bool(a >= b),
        _ => return Err(VmError::Unsupported("opcode not valid for an i32 operand pair")),
    })
}

pub fn i64_op(op: Opcode, a: i64, b: i64) -> Result<Value, VmError> {
    use Opcode::*;
    Ok(match op {
        Add => Value::I64(a.wrapping_add(b)),
        Sub => Value::I64(a.wrapping_sub(b)),
        Mul => Value::I64(a.wrapping_mul(b)),
        Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::I64(a.wrapping_div(b))
        }
        Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::I64(a.wrapping_rem(b))
        }
        Eq => Value::Bool(a == b),
        NotEq => Value::Bool(a != b),
        Lt => Value::Bool(a < b),
        LtEq => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        GtEq => Value::Bool(a >= b),
        _ => return Err(VmError::Unsupported("opcode not valid for an i64 operand pair")),
    })
}

pub fn u32_op(op: Opcode, a: u32, b: u32) -> Result<Value, VmError> {
    use Opcode::*;
    Ok(match op {
        Add => Value::U32(a.wrapping_add(b)),
        Sub => Value::U32(a.wrapping_sub(b)),
        Mul => Value::U32(a.wrapping_mul(b)),
        Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::U32(a.wrapping_div(b))
        }
        Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::U32(a.wrapping_rem(b))
        }
        Eq => Value::Bool(a == b),
        NotEq => Value::Bool(a != b),
        Lt => Value::Bool(a < b),
        LtEq => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        GtEq => Value::Bool(a >= b),
        _ => return Err(VmError::Unsupported("opcode not valid for a u32 operand pair")),
    })
}

pub fn u64_op(op: Opcode, a: u64, b: u64) -> Result<Value, VmError> {
    use Opcode::*;
    Ok(match op {
        Add => Value::U64(a.wrapping_add(b)),
        Sub => Value::U64(a.wrapping_sub(b)),
        Mul => Value::U64(a.wrapping_mul(b)),
        Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::U64(a.wrapping_div(b))
        }
        Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::U64(a.wrapping_rem(b))
        }
        Eq => Value::Bool(a == b),
        NotEq => Value::Bool(a != b),
        Lt => Value::Bool(a < b),
        LtEq => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        GtEq => Value::Bool(a >= b),
        _ => return Err(VmError::Unsupported("opcode not valid for a u64 operand pair")),
    })
}

/// `spec.md` §9 Open Question resolution: NaN comparisons follow IEEE-754
/// default semantics via `f64`'s own `PartialOrd`/`PartialEq` — no special
/// casing needed here beyond delegating straight to `==`/`<`/etc.
pub fn f64_op(op: Opcode, a: f64, b: f64) -> Result<Value, VmError> {
    use Opcode::*;
    Ok(match op {
        Add => Value::F64(a + b),
        Sub => Value::F64(a - b),
        Mul => Value::F64(a * b),
        Div => Value::F64(a / b),
        Mod => Value::F64(a % b),
        Eq => Value::Bool(a == b),
        NotEq => Value::Bool(a != b),
        Lt => Value::Bool(a < b),
        LtEq => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        GtEq => Value::Bool(a >= b),
        _ => return Err(VmError::Unsupported("opcode not valid for an f64 operand pair")),
    })
}

/// Dispatches a generic (non-type-specialized) numeric binary opcode over a
/// same-variant `Value` pair. Mismatched variants are a type-checker escape,
/// not something this layer tries to coerce.
pub fn numeric_binary(op: Opcode, left: Value, right: Value) -> Result<Value, VmError> {
    match (left, right) {
        (Value::I32(a), Value::I32(b)) => i32_op(op, a, b),
        (Value::I64(a), Value::I64(b)) => i64_op(op, a, b),
        (Value::U32(a), Value::U32(b)) => u32_op(op, a, b),
        (Value::U64(a), Value::U64(b)) => u64_op(op, a, b),
        (Value::F64(a), Value::F64(b)) => f64_op(op, a, b),
        (l, r) => Err(VmError::TypeMismatch {
            expected: "two operands of the same numeric type",
            found: if is_numeric(&l) { r.type_name() } else { l.type_name() },
        }),
    }
}

fn is_numeric(value: &Value) -> bool {
    matches!(
        value,
        Value::I32(_) | Value::I64(_) | Value::U32(_) | Value::U64(_) | Value::F64(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_add_wraps_on_overflow() {
        let result = i32_op(Opcode::Add, i32::MAX, 1).unwrap();
        assert_eq!(result, Value::I32(i32::MIN));
    }

    #[test]
    fn division_by_zero_is_an_error_not_a_panic() {
        assert!(matches!(i64_op(Opcode::Div, 1, 0), Err(VmError::DivisionByZero)));
    }

    #[test]
    fn nan_is_unequal_to_itself() {
        let result = f64_op(Opcode::Eq, f64::NAN, f64::NAN).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn mismatched_numeric_variants_are_a_type_error() {
        let result = numeric_binary(Opcode::Add, Value::I32(1), Value::I64(2));
        assert!(matches!(result, Err(VmError::TypeMismatch { .. })));
    }
}
