//! The VM's runtime register storage: globals/module slots live for the
//! whole program, locals/temporaries live for the current call frame.
//!
//! Grounded on `spec.md` §4.6's four-class partition, already modeled at
//! compile time by `orus_compiler::codegen::registers::RegisterAllocator`;
//! this is the execution-side counterpart that actually holds `Value`s
//! instead of handing out slot numbers. Globals and module slots (R0-63,
//! R240-255) are process-wide, so they live directly on the `Vm`; locals and
//! temporaries (R64-239) are per-frame, so each [`crate::frame::Frame`] owns
//! its own window and a register number in that range is always relative to
//! the currently-executing frame, never to the VM as a whole.

use orus_core::value::Value;

pub const GLOBAL_COUNT: usize = 64;
pub const MODULE_COUNT: usize = 16;
pub const FRAME_WINDOW_COUNT: usize = 176; // R64..=R239
pub const FRAME_WINDOW_BASE: u8 = 64;
pub const MODULE_BASE: u8 = 240;

/// Process-wide register storage: globals (R0-63) and module slots
/// (R240-255).
#[derive(Debug)]
pub struct GlobalRegisters {
    globals: [Value; GLOBAL_COUNT],
    modules: [Value; MODULE_COUNT],
}

impl Default for GlobalRegisters {
    fn default() -> Self {
        GlobalRegisters {
            globals: std::array::from_fn(|_| Value::Nil),
            modules: std::array::from_fn(|_| Value::Nil),
        }
    }
}

impl GlobalRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, raw: u8) -> &Value {
        &self.globals[raw as usize]
    }

    pub fn set(&mut self, raw: u8, value: Value) {
        self.globals[raw as usize] = value;
    }

    pub fn get_module(&self, raw: u8) -> &Value {
        &self.modules[(raw - MODULE_BASE) as usize]
    }

    pub fn set_module(&mut self, raw: u8, value: Value) {
        self.modules[(raw - MODULE_BASE) as usize] = value;
    }

    /// Every live value currently held in globals or module slots, for GC
    /// root enumeration.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.globals.iter().chain(self.modules.iter())
    }
}

/// One call frame's private window over R64-239 (locals and temporaries
/// share one array; codegen never lets their ranges overlap within a single
/// frame, so there is nothing to distinguish between here).
#[derive(Debug)]
pub struct FrameWindow {
    slots: [Value; FRAME_WINDOW_COUNT],
}

impl Default for FrameWindow {
    fn default() -> Self {
        FrameWindow { slots: std::array::from_fn(|_| Value::Nil) }
    }
}

impl FrameWindow {
    pub fn get(&self, raw: u8) -> &Value {
        &self.slots[(raw - FRAME_WINDOW_BASE) as usize]
    }

    pub fn set(&mut self, raw: u8, value: Value) {
        self.slots[(raw - FRAME_WINDOW_BASE) as usize] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_slots_round_trip() {
        let mut regs = GlobalRegisters::new();
        regs.set(3, Value::I64(42));
        assert_eq!(regs.get(3), &Value::I64(42));
    }

    #[test]
    fn module_slots_are_addressed_from_240() {
        let mut regs = GlobalRegisters::new();
        regs.set_module(240, Value::Bool(true));
        assert_eq!(regs.get_module(240), &Value::Bool(true));
    }

    #[test]
    fn frame_window_is_addressed_from_64() {
        let mut window = FrameWindow::default();
        window.set(64, Value::I32(7));
        window.set(239, Value::I32(9));
        assert_eq!(window.get(64), &Value::I32(7));
        assert_eq!(window.get(239), &Value::I32(9));
    }
}
