//! LIFO allocation of call-context frames.
//!
//! Frames live in chunks like everything else but follow strict stack
//! discipline, so no bitmaps or sweeping are involved: `allocate` and `free`
//! just move a cursor, stepping across chunks as they fill and drain.

use crate::heap::chunk::{self, Chunk, HeapItem};
use crate::heap::chunk_allocator::ChunkAllocator;
use crate::util::constants::*;

pub struct StackAllocator {
    /// Slots per frame, fixed at construction.
    item_slots: usize,
    chunks: Vec<Chunk>,
    current_chunk: usize,
    first_in_chunk: HeapItem,
    last_in_chunk: HeapItem,
    next_free: HeapItem,
}

impl StackAllocator {
    /// Create a stack allocator handing out frames of `item_size` bytes
    /// (rounded up to whole slots).
    pub fn new(chunk_allocator: &mut ChunkAllocator, item_size: usize) -> Self {
        let item_slots = crate::util::conversions::raw_align_up(item_size, BYTES_IN_SLOT)
            >> LOG_BYTES_IN_SLOT;
        debug_assert!(item_slots >= 1 && item_slots < chunk::AVAILABLE_SLOTS);
        let first = chunk_allocator.allocate(0);
        let first_in_chunk = first.first();
        StackAllocator {
            item_slots,
            chunks: vec![first],
            current_chunk: 0,
            first_in_chunk,
            last_in_chunk: Self::last_for(first_in_chunk, item_slots),
            next_free: first_in_chunk,
        }
    }

    fn last_for(first_in_chunk: HeapItem, item_slots: usize) -> HeapItem {
        first_in_chunk.offset((chunk::AVAILABLE_SLOTS - 1) / item_slots * item_slots)
    }

    pub fn allocate(&mut self, chunk_allocator: &mut ChunkAllocator) -> HeapItem {
        let item = self.next_free;
        if self.next_free == self.last_in_chunk {
            self.next_chunk(chunk_allocator);
        } else {
            self.next_free = self.next_free.offset(self.item_slots);
        }
        item
    }

    pub fn free(&mut self) {
        if self.next_free == self.first_in_chunk {
            self.prev_chunk();
        } else {
            self.next_free = HeapItem::from_address(
                self.next_free.to_address() - self.item_slots * BYTES_IN_SLOT,
            );
        }
    }

    fn next_chunk(&mut self, chunk_allocator: &mut ChunkAllocator) {
        debug_assert!(self.next_free == self.last_in_chunk);
        self.current_chunk += 1;
        if self.current_chunk >= self.chunks.len() {
            self.chunks.push(chunk_allocator.allocate(0));
        }
        self.first_in_chunk = self.chunks[self.current_chunk].first();
        self.next_free = self.first_in_chunk;
        self.last_in_chunk = Self::last_for(self.first_in_chunk, self.item_slots);
    }

    fn prev_chunk(&mut self) {
        debug_assert!(self.next_free == self.first_in_chunk);
        debug_assert!(self.current_chunk > 0);
        self.current_chunk -= 1;
        self.first_in_chunk = self.chunks[self.current_chunk].first();
        self.last_in_chunk = Self::last_for(self.first_in_chunk, self.item_slots);
        self.next_free = self.last_in_chunk;
    }

    pub fn free_all(&mut self, chunk_allocator: &mut ChunkAllocator) {
        for c in self.chunks.drain(..) {
            chunk_allocator.free(c, 0);
        }
    }
}
