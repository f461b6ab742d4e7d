//! Built-in functions reachable from bytecode via `CALL_BUILTIN`.
//!
//! `spec.md` §4.4 "Built-ins": `len`, `print`, `input`, `is_type`, and
//! `time_stamp` are resolved by the compiler to a fixed numeric id at
//! compile time (`codegen::BUILTIN_LEN` etc.) rather than by name at
//! runtime, so this module is just a dispatch table over those ids plus
//! their actual implementations. Grounded on the teacher's builtin-id
//! dispatch style in its (now-superseded) `list_ops.rs`/`string_ops.rs`,
//! which resolved opcodes to a small fixed set of native operations the
//! same way.

use crate::vm::{Vm, VmError};
use orus_core::value::{HeapObject, Value};
use std::io::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

pub const LEN: u8 = 0;
pub const PRINT: u8 = 1;
pub const INPUT: u8 = 2;
pub const IS_TYPE: u8 = 3;
pub const TIME_STAMP: u8 = 4;

impl Vm {
    pub(crate) fn call_builtin(&mut self, id: u8, args: &[Value]) -> Result<Value, VmError> {
        match id {
            LEN => self.builtin_len(args),
            PRINT => self.builtin_print(args),
            INPUT => self.builtin_input(args),
            IS_TYPE => self.builtin_is_type(args),
            TIME_STAMP => self.builtin_time_stamp(args),
            other => Err(VmError::UnknownBuiltin(other)),
        }
    }

    /// `len(value)`: element count for an array, byte-length-agnostic
    /// character count for a string (`spec.md` §4.3 "strings are sequences
    /// of Unicode scalar values, not bytes").
    fn builtin_len(&self, args: &[Value]) -> Result<Value, VmError> {
        let value = one_arg(args)?;
        let len = match value {
            Value::Array(id) => match self.heap.get(*id) {
                HeapObject::Array(items) => items.len(),
                _ => unreachable!("Value::Array always points at a HeapObject::Array"),
            },
            Value::String(id) => self.heap_string(*id)?.chars().count(),
            other => {
                return Err(VmError::TypeMismatch {
                    expected: "array or string",
                    found: other.type_name(),
                })
            }
        };
        Ok(Value::I64(len as i64))
    }

    /// `print(value)` as a builtin call rather than the `PRINT` opcode — used
    /// when print appears as an expression (its result is `nil`) instead of
    /// a bare statement.
    fn builtin_print(&mut self, args: &[Value]) -> Result<Value, VmError> {
        let value = one_arg(args)?;
        println!("{}", self.display_value(value));
        std::io::stdout().flush().map_err(|e| VmError::Io(e.to_string()))?;
        Ok(Value::Nil)
    }

    /// `input()`: reads one line from stdin, trimming the trailing newline.
    fn builtin_input(&mut self, args: &[Value]) -> Result<Value, VmError> {
        if !args.is_empty() {
            return Err(VmError::Arity { expected: 0, found: args.len() });
        }
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map_err(|e| VmError::Io(e.to_string()))?;
        let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
        Ok(Value::String(self.intern_string(trimmed)))
    }

    /// `is_type(value, tag)`: runtime type probe used by `match`'s type
    /// patterns when the scrutinee's static type is `any` (`spec.md` §4.3).
    /// `tag` uses the same 0..=6 encoding as `CAST`'s type-tag operand.
    fn builtin_is_type(&self, args: &[Value]) -> Result<Value, VmError> {
        let (value, tag) = two_args(args)?;
        let tag = match tag {
            Value::I32(t) => *t as u8,
            Value::I64(t) => *t as u8,
            other => return Err(VmError::TypeMismatch { expected: "integer type tag", found: other.type_name() }),
        };
        let matches = match (tag, value) {
            (0, Value::I32(_)) => true,
            (1, Value::I64(_)) => true,
            (2, Value::U32(_)) => true,
            (3, Value::U64(_)) => true,
            (4, Value::F64(_)) => true,
            (5, Value::Bool(_)) => true,
            (6, Value::String(_)) => true,
            _ => false,
        };
        Ok(Value::Bool(matches))
    }

    /// `time_stamp()`: milliseconds since the Unix epoch, used by scripts
    /// that want wall-clock timing without an external clock builtin.
    fn builtin_time_stamp(&self, args: &[Value]) -> Result<Value, VmError> {
        if !args.is_empty() {
            return Err(VmError::Arity { expected: 0, found: args.len() });
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the Unix epoch");
        Ok(Value::I64(now.as_millis() as i64))
    }
}

fn one_arg(args: &[Value]) -> Result<&Value, VmError> {
    match args {
        [v] => Ok(v),
        _ => Err(VmError::Arity { expected: 1, found: args.len() }),
    }
}

fn two_args(args: &[Value]) -> Result<(&Value, &Value), VmError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(VmError::Arity { expected: 2, found: args.len() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orus_compiler::CompilerConfig;
    use orus_compiler::{codegen::CompiledModule, config::GcConfig};
    use orus_core::chunk::Chunk;

    fn empty_vm() -> Vm {
        let module = CompiledModule {
            chunk: Chunk::new(),
            functions: Vec::new(),
            pending_strings: Vec::new(),
            exports: Vec::new(),
        };
        Vm::load("t.orus", module, CompilerConfig { gc: GcConfig::default(), ..CompilerConfig::default() })
    }

    #[test]
    fn len_counts_array_elements() {
        let mut vm = empty_vm();
        let id = vm.heap.allocate(HeapObject::Array(vec![Value::I32(1), Value::I32(2)]));
        let result = vm.call_builtin(LEN, &[Value::Array(id)]).unwrap();
        assert_eq!(result, Value::I64(2));
    }

    #[test]
    fn len_counts_string_chars_not_bytes() {
        let mut vm = empty_vm();
        let id = vm.heap.allocate(HeapObject::String("héllo".into()));
        let result = vm.call_builtin(LEN, &[Value::String(id)]).unwrap();
        assert_eq!(result, Value::I64(5));
    }

    #[test]
    fn is_type_matches_the_tag_encoding() {
        let vm = empty_vm();
        let result = vm.builtin_is_type(&[Value::I32(3), Value::I32(0)]).unwrap();
        assert_eq!(result, Value::Bool(true));
        let result = vm.builtin_is_type(&[Value::I32(3), Value::I32(4)]).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn unknown_builtin_id_is_an_error() {
        let mut vm = empty_vm();
        assert!(matches!(vm.call_builtin(250, &[]), Err(VmError::UnknownBuiltin(250))));
    }
}
