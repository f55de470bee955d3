//! Allocation of objects larger than a chunk's data area.
//!
//! Each huge item owns a private (multi-)chunk whose object bitmap has
//! exactly one bit set, for the first slot. Death of the item decommits the
//! whole chunk.

use crate::heap::chunk::{Bitmap, Chunk, HeapItem};
use crate::heap::chunk_allocator::ChunkAllocator;
use crate::heap::collector::Marker;

struct HugeChunk {
    chunk: Chunk,
    size: usize,
}

#[derive(Default)]
pub struct HugeItemAllocator {
    chunks: Vec<HugeChunk>,
}

impl HugeItemAllocator {
    pub fn new() -> Self {
        HugeItemAllocator::default()
    }

    /// Allocate a huge item of `size` bytes. When `pre_marked` is set the
    /// item is created black: an item allocated while an incremental cycle is
    /// pending would otherwise be reclaimed by the next sweep, which only
    /// keeps huge chunks whose sole bit is black.
    pub fn allocate(
        &mut self,
        chunk_allocator: &mut ChunkAllocator,
        size: usize,
        pre_marked: bool,
    ) -> HeapItem {
        let c = chunk_allocator.allocate(size);
        self.chunks.push(HugeChunk { chunk: c, size });
        let first = c.first();
        c.set_bit(Bitmap::Object, first.slot_index());
        if pre_marked {
            c.set_bit(Bitmap::Black, first.slot_index());
        }
        first
    }

    /// Drop every huge chunk whose sole object is not black. On a
    /// non-incremental cycle the survivors' black bits are cleared afterwards
    /// by [`Self::reset_black_bits`]; an incremental cycle retains them.
    pub fn sweep(&mut self, chunk_allocator: &mut ChunkAllocator) {
        self.chunks.retain(|c| {
            let first = c.chunk.first();
            let black = c.chunk.test_bit(Bitmap::Black, first.slot_index());
            if !black {
                Self::free_huge_chunk(chunk_allocator, c);
            }
            black
        });
    }

    pub fn reset_black_bits(&mut self) {
        for c in &self.chunks {
            let first = c.chunk.first();
            c.chunk.clear_bit(Bitmap::Black, first.slot_index());
        }
    }

    /// Re-mark huge items dirtied by the Steele barrier.
    pub fn collect_gray_items(&mut self, marker: &mut Marker) {
        for c in &self.chunks {
            let index = c.chunk.first().slot_index();
            if c.chunk.test_bit(Bitmap::Black, index) && c.chunk.test_bit(Bitmap::Gray, index) {
                c.chunk.clear_bit(Bitmap::Gray, index);
                marker.push(c.chunk.first().as_heap_ref());
            }
        }
    }

    pub fn free_all(&mut self, chunk_allocator: &mut ChunkAllocator) {
        for c in self.chunks.drain(..) {
            Self::free_huge_chunk(chunk_allocator, &c);
        }
    }

    /// Bytes held by live huge items.
    pub fn used_mem(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| ChunkAllocator::required_chunk_size(c.size))
            .sum()
    }

    fn free_huge_chunk(chunk_allocator: &mut ChunkAllocator, c: &HugeChunk) {
        let item = c.chunk.first();
        unsafe {
            let vt = item.as_heap_ref().vtable();
            if let Some(destroy) = vt.destroy {
                destroy(item.as_heap_ref());
            }
        }
        chunk_allocator.free(c.chunk, c.size);
    }
}
