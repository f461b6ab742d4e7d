//! Call frames: one per active function invocation, holding its own
//! register window, program counter, and the bookkeeping needed to resume
//! the caller once it returns.
//!
//! Grounded on `spec.md` §4.5 "Functions" ("calls push a frame with its own
//! local/temp window and a return slot; returns write the result into the
//! caller's designated register and pop the frame") and the teacher's
//! frame-adjacent vocabulary in `codegen/specialization.rs` ("Tail Call
//! Optimization", "recursive calls") — Seq itself has no concrete `Frame`
//! struct to adapt, since its calling convention is LLVM's own stack, so
//! this one is new.

use crate::register_file::FrameWindow;
use orus_core::chunk::Chunk;
use orus_core::value::Value;
use std::rc::Rc;

/// One active call's execution state.
pub struct Frame {
    /// `None` for the top-level script frame; `Some(index)` for a call into
    /// `functions[index]`.
    pub function_index: Option<u32>,
    pub chunk: Rc<Chunk>,
    pub ip: usize,
    pub window: FrameWindow,
    /// Overflow storage for locals/temporaries that codegen's allocator
    /// could not fit in R64-239, addressed by `LoadSpill`/`StoreSpill`'s u16
    /// operand instead of a register-file index (`codegen::registers`'s
    /// `RegisterId::spill_index`). Grows on demand; indices are dense and
    /// assigned in allocation order, so this never needs to look anything
    /// up by register class.
    pub spill: Vec<Value>,
    /// Where the caller wants this call's result written once it returns.
    /// `None` for the entry frame, which has no caller. The register number
    /// is always interpreted against the *caller's* addressing (global if
    /// raw < 64, the caller's own window if 64..240, module if raw >= 240)
    /// once this frame is popped.
    pub return_register: Option<u8>,
}

impl Frame {
    pub fn new(function_index: Option<u32>, chunk: Rc<Chunk>, return_register: Option<u8>) -> Self {
        Frame {
            function_index,
            chunk,
            ip: 0,
            window: FrameWindow::default(),
            spill: Vec::new(),
            return_register,
        }
    }

    pub fn load_spill(&self, index: u16) -> Value {
        self.spill.get(index as usize).cloned().unwrap_or(Value::Nil)
    }

    pub fn store_spill(&mut self, index: u16, value: Value) {
        let index = index as usize;
        if index >= self.spill.len() {
            self.spill.resize(index + 1, Value::Nil);
        }
        self.spill[index] = value;
    }
}
