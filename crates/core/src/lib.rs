//! Orus Core: the shared data model for the Orus compiler and VM.
//!
//! This crate provides the language-agnostic-within-Orus primitives the
//! compiler and runtime both need to agree on bit-for-bit:
//!
//! - `value`: the `Value` tagged union and the heap it lives on.
//! - `chunk`: the compiled bytecode container (code, constants, line table).
//! - `opcode`: the closed opcode set, including type-specialized variants.
//! - `types`: the type system (`Type`, arena, unification).
//! - `span`: source locations attached to tokens, AST nodes, and diagnostics.
//! - `error`: the structured diagnostic taxonomy (`spec.md` §6/§7).

pub mod chunk;
pub mod error;
pub mod opcode;
pub mod span;
pub mod types;
pub mod value;

pub use chunk::{Chunk, FunctionProto, UpvalueDescriptor};
pub use error::{Diagnostic, DiagnosticSink, ErrorCode, SecondarySpan};
pub use opcode::Opcode;
pub use span::{Position, Span};
pub use types::{FieldInfo, FunctionType, InstanceType, Primitive, StructType, Type, TypeArena, TypeVarId, TypeVarStore};
pub use value::{Heap, HeapObject, ObjectId, Upvalue, Value};
