//! The managed heap: a precise, non-moving mark-sweep collector.
//!
//! Memory is organized as page-aligned [segments](chunk_allocator::MemorySegment)
//! holding naturally-aligned 64 KiB [chunks](chunk::Chunk). A chunk's header
//! carries four bitmaps with one bit per 32-byte slot; the collector reads
//! and writes nothing but these bitmaps and each object's vtable word. The
//! [`BlockAllocator`] serves normally-sized objects from size-class
//! free-lists plus a bump region, the [`HugeItemAllocator`] gives objects
//! larger than a chunk's data area a private chunk, and the
//! [`StackAllocator`] hands out call-context frames in LIFO order.
//!
//! [`MemoryManager`] ties the allocators together with root enumeration,
//! the mark stack, sweeping and the GC policy, including the optional
//! Steele-style incremental mode.

pub mod block_allocator;
pub mod chunk;
pub mod chunk_allocator;
pub mod collector;
pub mod huge_allocator;
pub mod mock;
pub mod persistent;
pub mod stack_allocator;

pub use self::block_allocator::BlockAllocator;
pub use self::chunk::Chunk;
pub use self::chunk::HeapItem;
pub use self::chunk_allocator::ChunkAllocator;
pub use self::collector::Marker;
pub use self::collector::MemoryManager;
pub use self::huge_allocator::HugeItemAllocator;
pub use self::persistent::PersistentValueStorage;
pub use self::stack_allocator::StackAllocator;

use crate::util::Address;
use crate::vm::Value;

/// The engine-side hooks the collector drives a collection through.
///
/// The embedding engine owns the JS value stack, the engine-internal roots
/// (current context chain, identifier table, ...) and the host UI object
/// wrappers the weak table may hold. The collector only sees them through
/// this trait; tests use a mock implementation.
pub trait HostBinding {
    /// An opaque handle to a host UI object wrapped by a managed value.
    type HostObject: Copy;

    /// Mark the engine-internal roots.
    fn mark_roots(&mut self, marker: &mut Marker);

    /// The live range of the JS value stack, `[base, top)`.
    fn js_stack(&self) -> (Address, Address);

    /// If `value` is a wrapper around a host object, return its handle.
    fn host_object(&self, value: Value) -> Option<Self::HostObject>;

    /// Does the host insist this object survives collections regardless of
    /// reachability?
    fn is_essential(&self, obj: Self::HostObject) -> bool;

    /// The host-side parent of an object, if any.
    fn parent(&self, obj: Self::HostObject) -> Option<Self::HostObject>;

    /// Run the destruction hook for a dying weakly-held wrapper. Runs before
    /// the sweep, so the hook may still observe other weak slots.
    fn destroy_object(&mut self, value: Value, last_sweep: bool);
}
