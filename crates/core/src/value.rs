//! Runtime values and the heap they live on.
//!
//! `spec.md` §3 describes a C-style heap: objects linked onto a single
//! intrusive list with a `{kind, mark bit, next}` header, freed through a
//! linked free-list allocator, traced by a mark-and-sweep collector. This
//! module is the safe-Rust rendition of that design: [`Heap`] is a slab of
//! slots addressed by [`ObjectId`] (a generational-free index, since the VM
//! is single-threaded and the GC is stop-the-world so nothing outlives a
//! sweep that would make generations necessary); a freed slot is pushed onto
//! an explicit linked free list (`Slot::Free(Option<ObjectId>)`) exactly as
//! the spec's allocator describes, and `Heap::sweep` is the traversal that
//! would otherwise walk the intrusive `next` chain.

use std::fmt;

/// A scalar or heap-pointing runtime value (`spec.md` §3 "Value").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F64(f64),
    /// A pointer to a `HeapObject::String` on the [`Heap`].
    String(ObjectId),
    /// A pointer to a `HeapObject::Array`.
    Array(ObjectId),
    /// A pointer to a `HeapObject::Error`.
    Error(ObjectId),
    /// A pointer to a `HeapObject::Function`.
    Function(ObjectId),
    /// A pointer to a `HeapObject::Closure`.
    Closure(ObjectId),
    /// A pointer to a `HeapObject::StructInstance`.
    StructInstance(ObjectId),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Error(_) => "error",
            Value::Function(_) => "function",
            Value::Closure(_) => "closure",
            Value::StructInstance(_) => "struct",
        }
    }

    /// IEEE-754-default equality: `NaN == NaN` is `false`, matching the
    /// Open Question resolution in `spec.md` §9 / `DESIGN.md`.
    pub fn values_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::F64(a), Value::F64(b)) => a == b,
            _ => self == other,
        }
    }

    /// Every heap object this value directly points to, for GC root
    /// enumeration (`spec.md` §4.8).
    pub fn heap_ref(&self) -> Option<ObjectId> {
        match self {
            Value::String(id)
            | Value::Array(id)
            | Value::Error(id)
            | Value::Function(id)
            | Value::Closure(id)
            | Value::StructInstance(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(id) => write!(f, "<string#{}>", id.0),
            Value::Array(id) => write!(f, "<array#{}>", id.0),
            Value::Error(id) => write!(f, "<error#{}>", id.0),
            Value::Function(id) => write!(f, "<function#{}>", id.0),
            Value::Closure(id) => write!(f, "<closure#{}>", id.0),
            Value::StructInstance(id) => write!(f, "<struct#{}>", id.0),
        }
    }
}

/// Address of a heap-allocated object. Stable for the object's lifetime;
/// never reused while the object is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

/// A captured upvalue: either the immutable value itself, or a shared cell
/// for a mutable capture (`spec.md` §9 Open Question: "mutable captures are
/// by shared cell; immutable captures are by value").
#[derive(Debug, Clone, PartialEq)]
pub enum Upvalue {
    Value(Value),
    Cell(ObjectId),
}

/// Concrete payloads for each heap object kind (`spec.md` §3 "Heap object").
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    String(String),
    Array(Vec<Value>),
    Error {
        kind: String,
        message: String,
        location: Option<String>,
    },
    Function {
        /// Index into the owning module's function table.
        chunk_index: u32,
        arity: u8,
        upvalue_count: u8,
    },
    Closure {
        function: ObjectId,
        captured: Vec<Upvalue>,
    },
    StructInstance {
        type_name: String,
        fields: Vec<Value>,
    },
    /// A mutable cell backing a by-reference closure capture.
    Cell(Value),
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::Array(_) => "array",
            HeapObject::Error { .. } => "error",
            HeapObject::Function { .. } => "function",
            HeapObject::Closure { .. } => "closure",
            HeapObject::StructInstance { .. } => "struct",
            HeapObject::Cell(_) => "cell",
        }
    }

    /// Approximate byte size used to drive the GC's allocation counter
    /// (`spec.md` §4.8 "Allocation increments a byte counter").
    pub fn approx_size(&self) -> usize {
        match self {
            HeapObject::String(s) => s.len() + 24,
            HeapObject::Array(v) => v.len() * std::mem::size_of::<Value>() + 24,
            HeapObject::Error { message, .. } => message.len() + 48,
            HeapObject::Function { .. } => 24,
            HeapObject::Closure { captured, .. } => {
                captured.len() * std::mem::size_of::<Upvalue>() + 24
            }
            HeapObject::StructInstance { fields, .. } => {
                fields.len() * std::mem::size_of::<Value>() + 24
            }
            HeapObject::Cell(_) => std::mem::size_of::<Value>() + 16,
        }
    }

    /// Every heap object this object directly references, for mark
    /// propagation.
    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        match self {
            HeapObject::Array(items) => {
                for v in items {
                    if let Some(id) = v.heap_ref() {
                        visit(id);
                    }
                }
            }
            HeapObject::Closure { function, captured } => {
                visit(*function);
                for up in captured {
                    match up {
                        Upvalue::Value(v) => {
                            if let Some(id) = v.heap_ref() {
                                visit(id);
                            }
                        }
                        Upvalue::Cell(id) => visit(*id),
                    }
                }
            }
            HeapObject::StructInstance { fields, .. } => {
                for v in fields {
                    if let Some(id) = v.heap_ref() {
                        visit(id);
                    }
                }
            }
            HeapObject::Cell(v) => {
                if let Some(id) = v.heap_ref() {
                    visit(id);
                }
            }
            HeapObject::String(_) | HeapObject::Error { .. } | HeapObject::Function { .. } => {}
        }
    }
}

enum Slot {
    Live { object: HeapObject, marked: bool },
    Free(Option<ObjectId>),
}

/// The VM's single object heap: a slab allocator with a linked free-list and
/// a mark-and-sweep collector over it (`spec.md` §4.8).
pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<ObjectId>,
    bytes_allocated: usize,
    object_count: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free_head: None,
            bytes_allocated: 0,
            object_count: 0,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Allocate an object, reusing a freed slot if the free-list is
    /// non-empty (`spec.md` §4.8 "object allocator with linked free-list").
    pub fn allocate(&mut self, object: HeapObject) -> ObjectId {
        self.bytes_allocated += object.approx_size();
        self.object_count += 1;
        if let Some(id) = self.free_head {
            let next = match &self.slots[id.0 as usize] {
                Slot::Free(next) => *next,
                Slot::Live { .. } => unreachable!("free list pointed at a live slot"),
            };
            self.free_head = next;
            self.slots[id.0 as usize] = Slot::Live {
                object,
                marked: false,
            };
            id
        } else {
            let id = ObjectId(self.slots.len() as u32);
            self.slots.push(Slot::Live {
                object,
                marked: false,
            });
            id
        }
    }

    pub fn get(&self, id: ObjectId) -> &HeapObject {
        match &self.slots[id.0 as usize] {
            Slot::Live { object, .. } => object,
            Slot::Free(_) => panic!("dangling reference to freed object {:?}", id),
        }
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut HeapObject {
        match &mut self.slots[id.0 as usize] {
            Slot::Live { object, .. } => object,
            Slot::Free(_) => panic!("dangling reference to freed object {:?}", id),
        }
    }

    /// Mark `id` (and transitively everything it references) reachable.
    /// Idempotent: re-marking an already-marked object is a no-op
    /// (`spec.md` §3 invariant "marking is idempotent").
    pub fn mark(&mut self, id: ObjectId) {
        let already_marked = match &mut self.slots[id.0 as usize] {
            Slot::Live { marked, .. } => {
                let was = *marked;
                *marked = true;
                was
            }
            Slot::Free(_) => return,
        };
        if already_marked {
            return;
        }
        let mut children = Vec::new();
        if let Slot::Live { object, .. } = &self.slots[id.0 as usize] {
            object.trace(|child| children.push(child));
        }
        for child in children {
            self.mark(child);
        }
    }

    /// Free every unmarked object, clearing mark bits on the survivors.
    /// Returns the number of bytes reclaimed.
    pub fn sweep(&mut self) -> usize {
        let mut freed_bytes = 0;
        for idx in 0..self.slots.len() {
            let id = ObjectId(idx as u32);
            match &self.slots[idx] {
                Slot::Live { marked: true, .. } => {
                    if let Slot::Live { marked, .. } = &mut self.slots[idx] {
                        *marked = false;
                    }
                }
                Slot::Live { marked: false, object } => {
                    freed_bytes += object.approx_size();
                    self.object_count -= 1;
                    self.slots[idx] = Slot::Free(self.free_head);
                    self.free_head = Some(id);
                }
                Slot::Free(_) => {}
            }
        }
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed_bytes);
        freed_bytes
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("object_count", &self.object_count)
            .field("bytes_allocated", &self.bytes_allocated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_read_back() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapObject::String("hi".into()));
        assert_eq!(heap.get(id).kind_name(), "string");
    }

    #[test]
    fn sweep_frees_unmarked_objects_and_reuses_slot() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapObject::String("a".into()));
        let _b = heap.allocate(HeapObject::String("b".into()));
        heap.mark(a);
        let freed = heap.sweep();
        assert!(freed > 0);
        assert_eq!(heap.object_count(), 1);
        // Allocating again should reuse the freed slot from `_b`.
        let c = heap.allocate(HeapObject::String("c".into()));
        assert_eq!(c.0, 1);
    }

    #[test]
    fn mark_traces_through_arrays() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapObject::String("inner".into()));
        let outer = heap.allocate(HeapObject::Array(vec![Value::String(inner)]));
        heap.mark(outer);
        let freed = heap.sweep();
        assert_eq!(freed, 0);
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn marking_twice_is_idempotent() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapObject::String("x".into()));
        heap.mark(id);
        heap.mark(id);
        let freed = heap.sweep();
        assert_eq!(freed, 0);
    }

    #[test]
    fn nan_is_not_equal_to_itself_in_values_equal() {
        let nan = Value::F64(f64::NAN);
        assert!(!nan.values_equal(&nan));
    }
}
