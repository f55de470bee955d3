//! A mock host binding for tests.
//!
//! The real engine supplies roots, the JS value stack and host-object
//! wrapper semantics; tests drive the collector through this stand-in
//! instead. It is compiled unconditionally so integration tests can use it,
//! but it is not part of the supported API.

use crate::heap::{HostBinding, Marker, MemoryManager};
use crate::util::Address;
use crate::vm::{HeapRef, MarkEntry, MarkTable, VTable, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Host object table entry.
#[derive(Copy, Clone, Debug)]
pub struct MockHostObject {
    pub essential: bool,
    pub parent: Option<usize>,
}

/// Counts destroy-hook invocations of [`MockObject`] across all heaps.
pub static DESTROY_COUNT: AtomicUsize = AtomicUsize::new(0);

/// A mock host: explicit root list, a real value stack, and a host-object
/// table with essential/parent flags for the weak keep-alive rule.
#[derive(Default)]
pub struct MockHost {
    pub roots: Vec<Value>,
    pub stack: Vec<Value>,
    /// Maps a wrapper value's raw bits to an index into `host_objects`.
    pub wrappers: HashMap<u64, usize>,
    pub host_objects: Vec<MockHostObject>,
    /// Wrapper values whose destruction hook ran, in order.
    pub destroyed: Vec<Value>,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost::default()
    }

    /// Register `value` as a wrapper for a new host object.
    pub fn add_wrapper(&mut self, value: Value, essential: bool, parent: Option<usize>) -> usize {
        let index = self.host_objects.len();
        self.host_objects.push(MockHostObject { essential, parent });
        self.wrappers.insert(value.raw(), index);
        index
    }
}

impl HostBinding for MockHost {
    type HostObject = usize;

    fn mark_roots(&mut self, marker: &mut Marker) {
        for v in &self.roots {
            v.mark(marker);
        }
    }

    fn js_stack(&self) -> (Address, Address) {
        let base = Address::from_ptr(self.stack.as_ptr());
        (base, base + self.stack.len() * std::mem::size_of::<Value>())
    }

    fn host_object(&self, value: Value) -> Option<usize> {
        self.wrappers.get(&value.raw()).copied()
    }

    fn is_essential(&self, obj: usize) -> bool {
        self.host_objects[obj].essential
    }

    fn parent(&self, obj: usize) -> Option<usize> {
        self.host_objects[obj].parent
    }

    fn destroy_object(&mut self, value: Value, _last_sweep: bool) {
        self.destroyed.push(value);
    }
}

/// A 4-slot test object: the vtable word, two value fields, and payload.
pub const MOCK_OBJECT_SIZE: usize = 4 * crate::util::constants::BYTES_IN_SLOT;

fn mock_vtable() -> &'static VTable {
    unsafe fn destroy(_h: HeapRef) {
        DESTROY_COUNT.fetch_add(1, Ordering::Relaxed);
    }
    static VT: VTable = VTable {
        class_name: "MockObject",
        destroy: Some(destroy),
        mark_objects: None,
        mark_table: MarkTable::EMPTY
            .with(1, MarkEntry::Value)
            .with(2, MarkEntry::Value),
    };
    &VT
}

/// Allocate a mock object with two undefined value fields.
pub fn alloc_mock_object(mm: &mut MemoryManager<MockHost>) -> HeapRef {
    alloc_mock_sized(mm, MOCK_OBJECT_SIZE)
}

/// Allocate a mock object of an arbitrary size (at least 4 slots). Sizes
/// above the chunk data area come from the huge-item allocator.
pub fn alloc_mock_sized(mm: &mut MemoryManager<MockHost>, size: usize) -> HeapRef {
    debug_assert!(size >= MOCK_OBJECT_SIZE);
    let h = mm.alloc_data(size);
    unsafe {
        h.set_vtable(mock_vtable());
        set_field(h, 0, Value::undefined());
        set_field(h, 1, Value::undefined());
    }
    h
}

/// Store a value field (0 or 1) of a mock object, applying the write barrier.
pub fn store_field(mm: &mut MemoryManager<MockHost>, parent: HeapRef, field: usize, v: Value) {
    unsafe { set_field(parent, field, v) };
    mm.write_barrier(parent);
}

unsafe fn set_field(h: HeapRef, field: usize, v: Value) {
    debug_assert!(field < 2);
    (h.to_address() + (1 + field) * std::mem::size_of::<u64>()).store::<u64>(v.raw());
}

/// Read a value field back.
pub fn field(h: HeapRef, field: usize) -> Value {
    debug_assert!(field < 2);
    unsafe {
        Value::from_raw((h.to_address() + (1 + field) * std::mem::size_of::<u64>()).load::<u64>())
    }
}
