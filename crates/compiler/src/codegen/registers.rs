//! The 256-slot register file partitioning and allocator.
//!
//! `spec.md` §5: R0-63 globals, R64-191 frame locals, R192-239 temporaries,
//! R240-255 module slots. Grounded on the newtype-around-an-index pattern
//! `codegen/state.rs` uses for Seq's SSA value names, generalized to four
//! disjoint ranges instead of one flat namespace.

use orus_core::error::{Diagnostic, DiagnosticSink, ErrorCode};
use orus_core::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    Global,
    Local,
    Temp,
    Module,
}

impl RegisterClass {
    pub fn range(self) -> (u16, u16) {
        match self {
            RegisterClass::Global => (0, 63),
            RegisterClass::Local => (64, 191),
            RegisterClass::Temp => (192, 239),
            RegisterClass::Module => (240, 255),
        }
    }
}

/// An index into the VM's flat 256-entry register file, or — once a
/// class's range is exhausted — into the per-frame spill area addressed by
/// `LoadSpill`/`StoreSpill` instead. Always tagged with the class it was
/// allocated from so a codegen bug that mixes up ranges (e.g. treating a
/// temp as a local) is a type error, not a silent off-by-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterId {
    pub class: RegisterClass,
    /// The logical allocation counter value. Always within `class.range()`
    /// when `spilled` is false; may run past the class's top slot when
    /// `spilled` is true, since a spilled id no longer names a register-file
    /// slot at all.
    pub slot: u16,
    /// Set once `slot` has run past `class.range().1`: this id has no home
    /// in the 256-slot register file and lives in the frame's spill area
    /// instead (`RegisterAllocator::alloc_local`/`alloc_temp`).
    pub spilled: bool,
}

impl RegisterId {
    /// The raw index the bytecode instruction actually encodes. Callers that
    /// read or write a value tied to a possibly-spilled id should go through
    /// `CodeGenerator::reg_read`/`write_dst` instead, which bridge through
    /// `LoadSpill`/`StoreSpill`; this is the fallback for the handful of
    /// purely-internal synthetic registers that don't, and aliases onto the
    /// class's last slot exactly as the old clamp-on-overflow behavior did.
    pub fn raw(self) -> u16 {
        if self.spilled {
            self.class.range().1
        } else {
            self.slot
        }
    }

    /// The 0-based index into the frame's spill area this id was assigned,
    /// valid only when `spilled` is true.
    pub fn spill_index(self) -> u16 {
        debug_assert!(self.spilled, "spill_index() called on a non-spilled register");
        self.slot - self.class.range().1 - 1
    }
}

/// Allocates registers within one function body. Locals are a bump
/// allocator with a free-list restored at scope exit (so sibling blocks
/// reuse slots); temporaries are a LIFO stack freed as soon as an
/// expression's value has been consumed; globals are never freed; module
/// slots are assigned once per import and likewise never freed.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    next_global: u16,
    next_local: u16,
    local_high_water: u16,
    next_temp: u16,
    temp_high_water: u16,
    next_module: u16,
    /// Spilled locals beyond R191, addressed through `LoadSpill`/`StoreSpill`
    /// rather than a direct register operand.
    spill_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalScope {
    mark: u16,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        RegisterAllocator {
            next_global: 0,
            next_local: RegisterClass::Local.range().0,
            local_high_water: RegisterClass::Local.range().0,
            next_temp: RegisterClass::Temp.range().0,
            temp_high_water: RegisterClass::Temp.range().0,
            next_module: RegisterClass::Module.range().0,
            spill_count: 0,
        }
    }

    pub fn alloc_global(&mut self, sink: &mut DiagnosticSink, span: &Span) -> RegisterId {
        let (_, max) = RegisterClass::Global.range();
        if self.next_global > max {
            sink.push_fatal(Diagnostic::new(
                ErrorCode::Runtime("register-pressure"),
                "ran out of global register slots",
                span.clone(),
            ));
        }
        let slot = self.next_global;
        self.next_global = self.next_global.saturating_add(1);
        RegisterId { class: RegisterClass::Global, slot, spilled: false }
    }

    pub fn alloc_module(&mut self) -> RegisterId {
        let slot = self.next_module;
        self.next_module = self.next_module.saturating_add(1);
        RegisterId { class: RegisterClass::Module, slot, spilled: false }
    }

    /// Marks the current local-allocation high-water mark so it can be
    /// restored when the enclosing block exits, per `spec.md`'s "a block's
    /// locals are reclaimed when the block ends".
    pub fn enter_scope(&self) -> LocalScope {
        LocalScope { mark: self.next_local }
    }

    pub fn exit_scope(&mut self, scope: LocalScope) {
        self.next_local = scope.mark;
    }

    /// Allocates one frame-local slot. Once R64-191 is exhausted, `slot` keeps
    /// counting past `max` and the id comes back tagged `spilled`; its true
    /// home is the frame's spill area (`CodeGenerator::write_dst`), addressed
    /// by `LoadSpill`/`StoreSpill` instead of a register operand byte.
    pub fn alloc_local(&mut self) -> RegisterId {
        let (_, max) = RegisterClass::Local.range();
        let slot = self.next_local;
        let spilled = slot > max;
        if spilled {
            self.spill_count += 1;
        }
        self.next_local = self.next_local.saturating_add(1);
        self.local_high_water = self.local_high_water.max(self.next_local);
        RegisterId { class: RegisterClass::Local, slot, spilled }
    }

    pub fn alloc_temp(&mut self) -> RegisterId {
        let (_, max) = RegisterClass::Temp.range();
        let slot = self.next_temp;
        let spilled = slot > max;
        if spilled {
            self.spill_count += 1;
        }
        self.next_temp = self.next_temp.saturating_add(1);
        self.temp_high_water = self.temp_high_water.max(self.next_temp);
        RegisterId { class: RegisterClass::Temp, slot, spilled }
    }

    /// Frees the most recently allocated temporary. Codegen for a binary
    /// expression frees its operand temporaries right after consuming them,
    /// so temp pressure never outlives the single statement being emitted.
    /// A spilled temp's logical `slot` still tracks the LIFO position even
    /// though it has no register-file home, so this reclaims it exactly the
    /// same way.
    pub fn free_temp(&mut self, reg: RegisterId) {
        debug_assert_eq!(reg.class, RegisterClass::Temp);
        if reg.slot + 1 == self.next_temp {
            self.next_temp -= 1;
        }
    }

    pub fn spill_count(&self) -> u32 {
        self.spill_count
    }

    pub fn local_high_water(&self) -> u16 {
        self.local_high_water
    }

    /// Resets the local and temporary counters to the start of a fresh call
    /// frame. Globals and module slots are shared for the whole compile and
    /// are left untouched — only one function body is ever being emitted
    /// into at a time, so reusing one allocator for both is safe as long as
    /// each function's frame resets before it starts.
    pub fn reset_frame(&mut self) {
        self.next_local = RegisterClass::Local.range().0;
        self.local_high_water = self.next_local;
        self.next_temp = RegisterClass::Temp.range().0;
        self.temp_high_water = self.next_temp;
    }

    /// Saves the caller's local/temp counters and resets them to a fresh
    /// frame, for compiling a function body that's nested textually inside
    /// another frame's still-in-progress emission (e.g. a top-level script
    /// statement that comes after a loop which already allocated locals).
    /// Pair with [`Self::exit_frame`] to restore the caller's own counters
    /// afterwards rather than leaving them reset to zero.
    pub fn enter_frame(&mut self) -> FrameSnapshot {
        let snapshot = FrameSnapshot {
            next_local: self.next_local,
            local_high_water: self.local_high_water,
            next_temp: self.next_temp,
            temp_high_water: self.temp_high_water,
        };
        self.reset_frame();
        snapshot
    }

    pub fn exit_frame(&mut self, snapshot: FrameSnapshot) {
        self.next_local = snapshot.next_local;
        self.local_high_water = snapshot.local_high_water;
        self.next_temp = snapshot.next_temp;
        self.temp_high_water = snapshot.temp_high_water;
    }
}

/// Opaque save point produced by [`RegisterAllocator::enter_frame`].
#[derive(Debug, Clone, Copy)]
pub struct FrameSnapshot {
    next_local: u16,
    local_high_water: u16,
    next_temp: u16,
    temp_high_water: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use orus_core::span::Position;

    fn span() -> Span {
        Span::point("t.orus", Position::new(1, 1))
    }

    #[test]
    fn locals_are_reclaimed_when_a_scope_exits() {
        let mut alloc = RegisterAllocator::new();
        let scope = alloc.enter_scope();
        let a = alloc.alloc_local();
        let _b = alloc.alloc_local();
        alloc.exit_scope(scope);
        let reused = alloc.alloc_local();
        assert_eq!(a.slot, reused.slot);
    }

    #[test]
    fn entering_a_nested_frame_does_not_disturb_the_caller_s_counters() {
        let mut alloc = RegisterAllocator::new();
        let outer = alloc.alloc_local();
        let snapshot = alloc.enter_frame();
        let inner = alloc.alloc_local();
        alloc.exit_frame(snapshot);
        let resumed = alloc.alloc_local();
        assert_eq!(outer.slot, RegisterClass::Local.range().0);
        assert_eq!(inner.slot, RegisterClass::Local.range().0);
        assert_eq!(resumed.slot, outer.slot + 1);
    }

    #[test]
    fn temps_are_freed_lifo() {
        let mut alloc = RegisterAllocator::new();
        let a = alloc.alloc_temp();
        let b = alloc.alloc_temp();
        alloc.free_temp(b);
        let reused = alloc.alloc_temp();
        assert_eq!(b.slot, reused.slot);
        alloc.free_temp(reused);
        alloc.free_temp(a);
    }

    #[test]
    fn allocating_past_the_temp_range_yields_a_spilled_register() {
        let mut alloc = RegisterAllocator::new();
        let (_, max) = RegisterClass::Temp.range();
        let mut last = alloc.alloc_temp();
        for _ in 0..(max - last.slot) {
            last = alloc.alloc_temp();
        }
        assert!(!last.spilled);
        let overflow = alloc.alloc_temp();
        assert!(overflow.spilled);
        assert_eq!(overflow.spill_index(), 0);
        let overflow2 = alloc.alloc_temp();
        assert_eq!(overflow2.spill_index(), 1);
        assert_eq!(alloc.spill_count(), 2);
    }

    #[test]
    fn exhausting_global_slots_is_fatal() {
        let mut alloc = RegisterAllocator::new();
        let mut sink = DiagnosticSink::new();
        for _ in 0..=RegisterClass::Global.range().1 {
            alloc.alloc_global(&mut sink, &span());
        }
        assert!(!sink.has_fatal());
        alloc.alloc_global(&mut sink, &span());
        assert!(sink.has_fatal());
    }
}
