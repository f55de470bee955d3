//! The collector core: root enumeration, the mark stack, sweeping and the
//! GC policy.
//!
//! Collection is synchronous and runs only at allocation points or on an
//! explicit [`MemoryManager::run_gc`]. A cycle is either **full** (all black
//! bits cleared up front) or **incremental** (black bits survive from the
//! previous cycle and the gray bits, set by the Steele write barrier, form
//! the re-scan work list).

use crate::heap::chunk::{self, Bitmap, Chunk, HeapItem};
use crate::heap::chunk_allocator::ChunkAllocator;
use crate::heap::block_allocator::BlockAllocator;
use crate::heap::huge_allocator::HugeItemAllocator;
use crate::heap::persistent::PersistentValueStorage;
use crate::heap::stack_allocator::StackAllocator;
use crate::heap::HostBinding;
use crate::util::constants::*;
use crate::util::options::{Options, WriteBarrierKind};
use crate::vm::{HeapRef, MarkEntry, MemberData, Value, ValueArray};

/// Collection is considered before the heap has grown past this many slots.
pub const MIN_SLOTS_GC_LIMIT: usize = chunk::AVAILABLE_SLOTS * 16;

/// Floor for the unmanaged-byte GC limit.
pub const MIN_UNMANAGED_HEAPSIZE_GC_LIMIT: usize = 128 * 1024;

/// Size of a string cell. Strings keep their character data in unmanaged
/// memory; the managed part is a fixed-size header.
pub const STRING_SIZE: usize = 2 * BYTES_IN_SLOT;

/// Default frame size for the call-context stack allocator.
pub const DEFAULT_CALL_CONTEXT_SIZE: usize = 8 * BYTES_IN_SLOT;

/// The mark stack plus the marking operation. Handed to root enumeration and
/// to `mark_objects` hooks.
pub struct Marker {
    stack: Vec<HeapRef>,
}

impl Marker {
    fn new() -> Self {
        Marker { stack: Vec::new() }
    }

    /// Mark an object: set its black bit and queue it for scanning. Objects
    /// that are already black are not re-pushed.
    pub fn mark(&mut self, h: HeapRef) {
        let c = Chunk::containing(h.to_address());
        let index = HeapItem::from_address(h.to_address()).slot_index();
        debug_assert!(c.test_bit(Bitmap::Object, index), "marking a freed object");
        if c.test_bit(Bitmap::Black, index) {
            return;
        }
        c.set_bit(Bitmap::Black, index);
        self.stack.push(h);
    }

    /// Queue an already-black object for (re-)scanning.
    pub(crate) fn push(&mut self, h: HeapRef) {
        self.stack.push(h);
    }

    fn pop(&mut self) -> Option<HeapRef> {
        self.stack.pop()
    }

    /// Drain loop: pop objects and scan them through their `mark_objects`
    /// hook or their compact mark table.
    fn drain(&mut self) {
        while let Some(h) = self.pop() {
            let vt = unsafe { h.vtable() };
            if let Some(mark_objects) = vt.mark_objects {
                unsafe { mark_objects(h, self) };
            }
            let mut m = vt.mark_table.0;
            if m == 0 {
                continue;
            }
            let mut mem = h.to_address();
            while m != 0 {
                match m & 3 {
                    x if x == MarkEntry::NoMark as u64 => {}
                    x if x == MarkEntry::Value as u64 => unsafe {
                        Value::from_raw(mem.load::<u64>()).mark(self);
                    },
                    x if x == MarkEntry::Pointer as u64 => {
                        let p = unsafe { mem.load::<usize>() };
                        if p != 0 {
                            self.mark(HeapRef::from_address(unsafe {
                                crate::util::Address::from_usize(p)
                            }));
                        }
                    }
                    _ => {
                        // ValueArray is terminal.
                        debug_assert_eq!(m, MarkEntry::ValueArray as u64);
                        unsafe {
                            let a = mem.as_ref::<ValueArray>();
                            a.mark(self);
                        }
                    }
                }
                m >>= 2;
                mem += BYTES_IN_WORD;
            }
        }
    }
}

fn is_black(h: HeapRef) -> bool {
    let c = Chunk::containing(h.to_address());
    c.test_bit(
        Bitmap::Black,
        HeapItem::from_address(h.to_address()).slot_index(),
    )
}

/// The per-engine memory manager: allocators, persistent storage and the
/// collector.
pub struct MemoryManager<H: HostBinding> {
    host: H,
    chunk_allocator: ChunkAllocator,
    block_allocator: BlockAllocator,
    huge_item_allocator: HugeItemAllocator,
    stack_allocator: StackAllocator,
    persistent_values: PersistentValueStorage,
    weak_values: PersistentValueStorage,
    options: Options,
    unmanaged_heap_size: usize,
    unmanaged_heap_size_gc_limit: usize,
    gc_blocked: bool,
    next_gc_is_incremental: bool,
    /// Collections since the last full one; caps the incremental streak.
    gc_count: usize,
}

impl<H: HostBinding> MemoryManager<H> {
    pub fn new(host: H) -> Self {
        Self::with_options(host, Options::from_env(), DEFAULT_CALL_CONTEXT_SIZE)
    }

    pub fn with_options(host: H, options: Options, call_context_size: usize) -> Self {
        crate::util::logger::try_init();
        let mut chunk_allocator = ChunkAllocator::new();
        let stack_allocator = StackAllocator::new(&mut chunk_allocator, call_context_size);
        MemoryManager {
            host,
            chunk_allocator,
            block_allocator: BlockAllocator::new(),
            huge_item_allocator: HugeItemAllocator::new(),
            stack_allocator,
            persistent_values: PersistentValueStorage::new(),
            weak_values: PersistentValueStorage::new(),
            options,
            unmanaged_heap_size: 0,
            unmanaged_heap_size_gc_limit: MIN_UNMANAGED_HEAPSIZE_GC_LIMIT,
            gc_blocked: false,
            next_gc_is_incremental: false,
            gc_count: 0,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn block_allocator(&self) -> &BlockAllocator {
        &self.block_allocator
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Allocate a string cell, charging `unmanaged_size` bytes of character
    /// data against the unmanaged-heap GC limit.
    pub fn alloc_string(&mut self, unmanaged_size: usize) -> HeapRef {
        let mut did_gc_run = false;
        if self.options.aggressive_gc {
            self.run_gc(false);
            did_gc_run = true;
        }

        self.unmanaged_heap_size += unmanaged_size;
        if self.unmanaged_heap_size > self.unmanaged_heap_size_gc_limit {
            if !did_gc_run {
                self.run_gc(false);
            }

            if 3 * self.unmanaged_heap_size_gc_limit <= 4 * self.unmanaged_heap_size {
                // more than 75% full, raise limit
                self.unmanaged_heap_size_gc_limit =
                    self.unmanaged_heap_size_gc_limit.max(self.unmanaged_heap_size) * 2;
            } else if self.unmanaged_heap_size * 4 <= self.unmanaged_heap_size_gc_limit {
                // less than 25% full, lower limit
                self.unmanaged_heap_size_gc_limit =
                    MIN_UNMANAGED_HEAPSIZE_GC_LIMIT.max(self.unmanaged_heap_size_gc_limit / 2);
            }
            did_gc_run = true;
        }

        let m = self.allocate_block(STRING_SIZE, did_gc_run);
        crate::util::memory::zero(m.to_address(), STRING_SIZE);
        m.as_heap_ref()
    }

    /// Allocate `size` bytes of zeroed object storage. `size` must be a
    /// positive multiple of the slot size. The caller installs the vtable
    /// word before the next collection.
    pub fn alloc_data(&mut self, size: usize) -> HeapRef {
        debug_assert!(size >= BYTES_IN_SLOT);
        debug_assert!(size % BYTES_IN_SLOT == 0);

        let mut did_gc_run = false;
        if self.options.aggressive_gc {
            self.run_gc(false);
            did_gc_run = true;
        }

        if size > chunk::DATA_BYTES {
            let h = self.huge_item_allocator.allocate(
                &mut self.chunk_allocator,
                size,
                // A huge item allocated while an incremental cycle is pending
                // must be created live: the next sweep keeps exactly the
                // huge chunks whose bit is black.
                self.next_gc_is_incremental,
            );
            crate::util::memory::zero(h.to_address(), size);
            return h.as_heap_ref();
        }

        let m = self.allocate_block(size, did_gc_run);
        crate::util::memory::zero(m.to_address(), size);
        m.as_heap_ref()
    }

    fn allocate_block(&mut self, size: usize, did_gc_run: bool) -> HeapItem {
        match self
            .block_allocator
            .allocate(&mut self.chunk_allocator, size, false)
        {
            Some(m) => m,
            None => {
                if !did_gc_run && self.should_run_gc() {
                    self.run_gc(false);
                }
                self.block_allocator
                    .allocate(&mut self.chunk_allocator, size, true)
                    .expect("forced block allocation cannot fail")
            }
        }
    }

    /// Allocate an object of `size` bytes plus, when `n_members` is nonzero,
    /// a member-data cell with room for `n_members` values. Returns the
    /// object and the initialized member data.
    pub fn alloc_object_with_member_data(
        &mut self,
        size: usize,
        n_members: usize,
    ) -> (HeapRef, Option<*mut MemberData>) {
        let obj = self.alloc_data(size);

        let member_data = (n_members > 0).then(|| {
            let member_size = MemberData::required_size(n_members);
            let m = if member_size > chunk::DATA_BYTES {
                self.huge_item_allocator
                    .allocate(
                        &mut self.chunk_allocator,
                        member_size,
                        self.next_gc_is_incremental,
                    )
            } else {
                self.block_allocator
                    .allocate(&mut self.chunk_allocator, member_size, true)
                    .expect("forced block allocation cannot fail")
            };
            crate::util::memory::zero(m.to_address(), member_size);
            unsafe { MemberData::init(m.as_heap_ref(), member_size) }
        });
        (obj, member_data)
    }

    /// Allocate a call-context frame (LIFO).
    pub fn alloc_call_context(&mut self) -> HeapItem {
        self.stack_allocator.allocate(&mut self.chunk_allocator)
    }

    /// Free the most recently allocated call-context frame.
    pub fn free_call_context(&mut self) {
        self.stack_allocator.free();
    }

    /// A strong persistent slot: its referent survives every collection.
    pub fn persistent_slot(&mut self) -> *mut Value {
        self.persistent_values.allocate()
    }

    /// A weak persistent slot: cleared (after its destruction hook) when its
    /// referent dies.
    pub fn weak_slot(&mut self) -> *mut Value {
        self.weak_values.allocate()
    }

    /// Steele write barrier: a store of a reference into a black `parent`
    /// grays the parent so the next incremental cycle re-scans it. Elided
    /// when no incremental cycle is pending.
    pub fn write_barrier(&mut self, parent: HeapRef) {
        if self.options.write_barrier != WriteBarrierKind::Steele || !self.next_gc_is_incremental {
            return;
        }
        let c = Chunk::containing(parent.to_address());
        let index = HeapItem::from_address(parent.to_address()).slot_index();
        if c.test_bit(Bitmap::Black, index) {
            c.set_bit(Bitmap::Gray, index);
        }
    }

    /// Should an allocation trigger a collection?
    pub fn should_run_gc(&self) -> bool {
        let total = self.block_allocator.total_slots();
        let used_slots = self.block_allocator.used_slots_after_last_sweep;
        total > MIN_SLOTS_GC_LIMIT && used_slots * self.options.gc_overallocation < total * 100
    }

    fn mark(&mut self) {
        let mut marker = Marker::new();

        if self.next_gc_is_incremental {
            // Collect all barrier-dirtied objects and push them onto the mark
            // stack (Steele-style re-mark).
            self.block_allocator.collect_gray_items(&mut marker);
            self.huge_item_allocator.collect_gray_items(&mut marker);
        }

        self.host.mark_roots(&mut marker);
        self.collect_from_js_stack(&mut marker);
        self.persistent_values.mark(&mut marker);

        // A host object with parent-chain ownership keeps its wrappers
        // alive: a weakly-held wrapper survives if the host marks it or any
        // of its ancestors essential.
        //
        // Do this after the stack scan so that processing the weak wrappers
        // here doesn't leave them as stack leftovers that always survive.
        let host = &self.host;
        self.weak_values.for_each(|v| {
            let Some(obj) = host.host_object(*v) else {
                return;
            };
            let mut keep_alive = host.is_essential(obj);
            let mut parent = host.parent(obj);
            while !keep_alive {
                let Some(p) = parent else { break };
                keep_alive = host.is_essential(p);
                parent = host.parent(p);
            }
            if keep_alive {
                v.mark(&mut marker);
            }
        });

        marker.drain();
    }

    fn collect_from_js_stack(&self, marker: &mut Marker) {
        let (mut v, top) = self.host.js_stack();
        while v < top {
            let value = unsafe { Value::from_raw(v.load::<u64>()) };
            if let Some(m) = value.as_managed() {
                // Skip pointers to already freed objects, they are bogus as well
                let c = Chunk::containing(m.to_address());
                let index = HeapItem::from_address(m.to_address()).slot_index();
                if c.test_bit(Bitmap::Object, index) {
                    marker.mark(m);
                }
            }
            v += std::mem::size_of::<Value>();
        }
    }

    fn sweep(&mut self, last_sweep: bool) {
        if last_sweep && self.next_gc_is_incremental {
            // ensure we properly clean up on destruction even if the GC is in incremental mode
            self.block_allocator.reset_black_bits();
            self.huge_item_allocator.reset_black_bits();
        }

        // Weak destruction hooks run strictly before the generic sweep so
        // they may observe other weak slots. A hook can also reassign weak
        // slots, so a second pass clears anything still pointing at an
        // unmarked object.
        let host = &mut self.host;
        self.weak_values.for_each(|v| {
            let Some(m) = v.as_managed() else { return };
            if is_black(m) {
                return;
            }
            host.destroy_object(*v, last_sweep);
            *v = Value::undefined();
        });
        self.weak_values.for_each(|v| {
            let Some(m) = v.as_managed() else { return };
            if !is_black(m) {
                *v = Value::undefined();
            }
        });

        self.block_allocator.sweep();
        self.huge_item_allocator.sweep(&mut self.chunk_allocator);
    }

    /// Run a collection. GC never fails; after it, allocation retries.
    pub fn run_gc(&mut self, force_full_collection: bool) {
        if self.gc_blocked {
            return;
        }

        if force_full_collection {
            // do a full GC
            self.block_allocator.reset_black_bits();
            self.huge_item_allocator.reset_black_bits();
            self.next_gc_is_incremental = false;
        }

        self.gc_blocked = true;

        if !self.options.gc_stats {
            self.mark();
            self.sweep(false);
        } else {
            self.run_gc_with_stats();
        }

        if self.options.aggressive_gc {
            // ensure we don't 'loose' any memory
            let (_, bump_slots) = self.block_allocator.bump_region();
            debug_assert_eq!(
                self.block_allocator.allocated_mem(),
                self.block_allocator.used_mem()
                    + self.block_allocator.dump_bins(false)
                    + bump_slots * BYTES_IN_SLOT
            );
        }

        if self.options.write_barrier == WriteBarrierKind::Steele {
            self.gc_count += 1;
            let total = self.block_allocator.total_slots();
            let used_slots = self.block_allocator.used_slots_after_last_sweep;
            let mostly_empty = used_slots * 4 < total * 3;
            if !self.next_gc_is_incremental {
                // always try an incremental GC after a full one, unless there
                // is anyway lots of memory pressure
                self.next_gc_is_incremental = mostly_empty;
                self.gc_count = 0;
            } else if self.gc_count > self.options.incremental_cycle_cap {
                self.next_gc_is_incremental = false;
            } else {
                self.next_gc_is_incremental = mostly_empty;
            }
        } else {
            self.next_gc_is_incremental = false;
        }

        if !self.next_gc_is_incremental {
            // do a full GC
            self.block_allocator.reset_black_bits();
            self.huge_item_allocator.reset_black_bits();
        }

        self.gc_blocked = false;
    }

    fn run_gc_with_stats(&mut self) {
        let triggered_by_unmanaged_heap =
            self.unmanaged_heap_size > self.unmanaged_heap_size_gc_limit;
        let old_unmanaged_size = self.unmanaged_heap_size;
        let total_mem = self.allocated_mem();
        let used_before = self.used_mem();
        let large_items_before = self.large_items_mem();

        debug!("========== GC ==========");
        debug!("Incremental: {}", self.next_gc_is_incremental);
        debug!(
            "Allocated {} bytes in {} chunks",
            total_mem,
            self.block_allocator.chunk_count()
        );
        debug!("Fragmented memory before GC {}", total_mem - used_before);
        self.block_allocator.dump_bins(true);

        let t = std::time::Instant::now();
        self.mark();
        let mark_time = t.elapsed();
        let t = std::time::Instant::now();
        self.sweep(false);
        let sweep_time = t.elapsed();

        let used_after = self.used_mem();
        let large_items_after = self.large_items_mem();

        if triggered_by_unmanaged_heap {
            debug!("triggered by unmanaged heap:");
            debug!("   old unmanaged heap size: {}", old_unmanaged_size);
            debug!("   new unmanaged heap: {}", self.unmanaged_heap_size);
            debug!(
                "   unmanaged heap limit: {}",
                self.unmanaged_heap_size_gc_limit
            );
        }
        let mem_in_bins = self.block_allocator.dump_bins(true);
        debug!("Marked objects in {:?}.", mark_time);
        debug!("Swept objects in {:?}.", sweep_time);
        debug!("Used memory before GC: {}", used_before);
        debug!("Used memory after GC: {}", used_after);
        debug!("Freed up bytes: {}", used_before - used_after);
        let lost = self.block_allocator.allocated_mem() - mem_in_bins - used_after;
        if lost != 0 {
            debug!("!!!!!!!!!!!!!!!!!!!!! LOST MEM: {} !!!!!!!!!!!!!!!!!!!!", lost);
        }
        if large_items_before != 0 || large_items_after != 0 {
            debug!("Large item memory before GC: {}", large_items_before);
            debug!("Large item memory after GC: {}", large_items_after);
            debug!(
                "Large item memory freed up: {}",
                large_items_before - large_items_after
            );
        }
        debug!("======== End GC ========");
    }

    /// Bytes occupied by live objects in the block allocator.
    pub fn used_mem(&self) -> usize {
        self.block_allocator.used_mem()
    }

    /// Bytes under management.
    pub fn allocated_mem(&self) -> usize {
        self.block_allocator.allocated_mem() + self.huge_item_allocator.used_mem()
    }

    /// Bytes held by huge items.
    pub fn large_items_mem(&self) -> usize {
        self.huge_item_allocator.used_mem()
    }

    /// Is an incremental cycle pending? (The write barrier is live.)
    pub fn incremental_gc_pending(&self) -> bool {
        self.next_gc_is_incremental
    }

    /// Force the next collection to be incremental. Tests use this to drive
    /// the barrier path deterministically.
    pub fn set_next_gc_incremental(&mut self, incremental: bool) {
        debug_assert!(
            !incremental || self.options.write_barrier == WriteBarrierKind::Steele,
            "incremental collection requires the Steele barrier"
        );
        self.next_gc_is_incremental = incremental;
    }
}

impl<H: HostBinding> Drop for MemoryManager<H> {
    fn drop(&mut self) {
        self.sweep(true);
        self.block_allocator.free_all(&mut self.chunk_allocator);
        self.huge_item_allocator.free_all(&mut self.chunk_allocator);
        self.stack_allocator.free_all(&mut self.chunk_allocator);
    }
}
