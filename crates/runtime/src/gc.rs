//! Mark-and-sweep orchestration atop `orus_core::value::Heap`'s already-built
//! collector.
//!
//! `spec.md` §4.8: "Allocation increments a byte counter; once it crosses a
//! threshold, the collector marks every object reachable from a root set
//! (registers, frames, the constant pool) and sweeps the rest. If a
//! collection frees less than half the live set, the threshold doubles;
//! otherwise it resets to `max(1 MiB, 2 * post-collection bytes)`." `Heap`
//! already implements `mark`/`sweep`/`bytes_allocated` (the intrusive list
//! and free-list allocator described in `spec.md` §3), so this module's job
//! is only the threshold/growth policy and handing it the VM's root set —
//! grounded on the counter-keeping idiom in this crate's own (now-superseded)
//! `memory_stats.rs`, adapted from a cross-thread atomic registry (Seq is
//! multi-threaded via `may`) down to plain fields (the Orus VM is
//! single-threaded, `spec.md` §5).

use orus_compiler::GcConfig;
use orus_core::value::{Heap, ObjectId};

#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub collections: u64,
    pub bytes_freed: u64,
}

/// Drives collection timing and the threshold growth policy; holds no
/// objects itself.
pub struct Gc {
    config: GcConfig,
    threshold: usize,
    paused: bool,
    stats: GcStats,
}

impl Gc {
    pub fn new(config: GcConfig) -> Self {
        Gc { threshold: config.initial_threshold_bytes, config, paused: false, stats: GcStats::default() }
    }

    /// Suspends collection, e.g. while a builtin is mid-construction of a
    /// heap object whose fields aren't all reachable yet.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Runs a collection if `heap`'s allocation counter has crossed the
    /// threshold, marking every id yielded by `roots` and sweeping the rest.
    /// Returns whether a collection actually ran.
    pub fn maybe_collect(&mut self, heap: &mut Heap, roots: impl IntoIterator<Item = ObjectId>) -> bool {
        if self.paused || heap.bytes_allocated() < self.threshold {
            return false;
        }
        let pre = heap.bytes_allocated();
        for id in roots {
            heap.mark(id);
        }
        let freed = heap.sweep();
        self.stats.collections += 1;
        self.stats.bytes_freed += freed as u64;

        let post = heap.bytes_allocated();
        if (freed as f64) < pre as f64 * self.config.grow_if_freed_fraction_below {
            self.threshold = self.threshold.saturating_mul(2);
        } else {
            self.threshold = self.config.initial_threshold_bytes.max(2 * post);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orus_core::value::HeapObject;

    #[test]
    fn collection_only_runs_once_the_threshold_is_crossed() {
        let mut heap = Heap::new();
        let mut gc = Gc::new(GcConfig { initial_threshold_bytes: 1_000_000, grow_if_freed_fraction_below: 0.5 });
        heap.allocate(HeapObject::String("hi".into()));
        assert!(!gc.maybe_collect(&mut heap, std::iter::empty()));
    }

    #[test]
    fn threshold_doubles_when_little_is_freed() {
        let mut heap = Heap::new();
        let mut gc = Gc::new(GcConfig { initial_threshold_bytes: 1, grow_if_freed_fraction_below: 0.5 });
        let keep = heap.allocate(HeapObject::String("kept".into()));
        let initial_threshold = gc.threshold();
        gc.maybe_collect(&mut heap, [keep]);
        assert!(gc.threshold() > initial_threshold);
    }

    #[test]
    fn threshold_resets_to_twice_live_bytes_when_most_is_freed() {
        let mut heap = Heap::new();
        let mut gc = Gc::new(GcConfig { initial_threshold_bytes: 1, grow_if_freed_fraction_below: 0.5 });
        heap.allocate(HeapObject::String("garbage".into()));
        gc.maybe_collect(&mut heap, std::iter::empty());
        let post = heap.bytes_allocated();
        assert_eq!(gc.threshold(), (1usize).max(2 * post));
    }

    #[test]
    fn a_paused_collector_never_runs() {
        let mut heap = Heap::new();
        let mut gc = Gc::new(GcConfig { initial_threshold_bytes: 0, grow_if_freed_fraction_below: 0.5 });
        gc.pause();
        heap.allocate(HeapObject::String("hi".into()));
        assert!(!gc.maybe_collect(&mut heap, std::iter::empty()));
    }
}
