//! Reserving, committing and recycling chunks.
//!
//! A [`MemorySegment`] is one page-aligned reservation large enough for up to
//! 64 chunks, with a one-word occupancy bitmap. The [`ChunkAllocator`] owns
//! the segment list: allocation walks existing segments first-fit and
//! reserves a new segment when none has room. Freeing a chunk decommits its
//! pages, so only the address space stays reserved.

use crate::heap::chunk::Chunk;
use crate::util::constants::*;
use crate::util::conversions::raw_align_up;
use crate::util::memory;
use crate::util::Address;

/// Chunks per segment: the occupancy map is one u64.
pub const CHUNKS_PER_SEGMENT: usize = 64;

/// A page-aligned reservation carved into chunks.
pub struct MemorySegment {
    /// Raw reservation, not chunk aligned.
    reservation: Address,
    reservation_size: usize,
    /// First chunk-aligned address inside the reservation.
    base: Address,
    /// Occupancy: bit i set iff chunk i is allocated.
    allocated_map: u64,
    n_chunks: usize,
}

impl MemorySegment {
    /// Reserve a new segment with room for at least `size` bytes of chunks.
    /// Fatal on reservation failure: the heap cannot recover from an
    /// exhausted address space.
    pub fn new(size: usize) -> Self {
        // Over-reserve one chunk so the base can be aligned up to a chunk
        // boundary.
        let mut size = size + BYTES_IN_CHUNK;
        if size < CHUNKS_PER_SEGMENT * BYTES_IN_CHUNK {
            size = CHUNKS_PER_SEGMENT * BYTES_IN_CHUNK;
        }
        let reservation = match memory::reserve(size) {
            Ok(base) => base,
            Err(e) => panic!("failed to reserve {} bytes for the heap: {}", size, e),
        };
        let base = reservation.align_up(BYTES_IN_CHUNK);
        let mut n_chunks = CHUNKS_PER_SEGMENT;
        if base != reservation {
            n_chunks -= 1;
        }
        debug!(
            "new segment: {} bytes at {}, {} chunks from {}",
            size, reservation, n_chunks, base
        );
        MemorySegment {
            reservation,
            reservation_size: size,
            base,
            allocated_map: 0,
            n_chunks,
        }
    }

    fn test_bit(&self, index: usize) -> bool {
        debug_assert!(index < self.n_chunks);
        self.allocated_map & (1 << index) != 0
    }

    fn set_bit(&mut self, index: usize) {
        debug_assert!(index < self.n_chunks);
        self.allocated_map |= 1 << index;
    }

    fn clear_bit(&mut self, index: usize) {
        debug_assert!(index < self.n_chunks);
        self.allocated_map &= !(1 << index);
    }

    pub fn contains(&self, chunk: Chunk) -> bool {
        chunk.start() >= self.base && chunk.start() < self.base + self.n_chunks * BYTES_IN_CHUNK
    }

    pub fn is_full(&self) -> bool {
        self.allocated_map == !0u64 >> (CHUNKS_PER_SEGMENT - self.n_chunks)
    }

    /// First-fit scan for `size / BYTES_IN_CHUNK` consecutive free chunks.
    /// Commits the backing pages on success.
    pub fn allocate(&mut self, size: usize) -> Option<Chunk> {
        let required_chunks = (size + BYTES_IN_CHUNK - 1) / BYTES_IN_CHUNK;
        let mut sequence = 0;
        let mut candidate = None;
        for i in 0..self.n_chunks {
            if !self.test_bit(i) {
                if candidate.is_none() {
                    candidate = Some(i);
                }
                sequence += 1;
            } else {
                candidate = None;
                sequence = 0;
            }
            if sequence == required_chunks {
                let first = candidate.unwrap();
                let start = self.base + first * BYTES_IN_CHUNK;
                memory::commit(start, size).expect("failed to commit chunk pages");
                for k in first..first + required_chunks {
                    self.set_bit(k);
                }
                trace!("allocated chunk {} ({} bytes)", start, size);
                return Some(Chunk::from_aligned_address(start));
            }
        }
        None
    }

    /// Clear the occupancy bits for a chunk range and decommit its pages.
    pub fn free(&mut self, chunk: Chunk, size: usize) {
        trace!("freeing chunk {}", chunk.start());
        let index = (chunk.start() - self.base) / BYTES_IN_CHUNK;
        let end = index + (size - 1) / BYTES_IN_CHUNK + 1;
        for i in index..end {
            debug_assert!(self.test_bit(i));
            self.clear_bit(i);
        }
        let size = raw_align_up(size, memory::page_size());
        memory::decommit(chunk.start(), size).expect("failed to decommit chunk pages");
    }
}

impl Drop for MemorySegment {
    fn drop(&mut self) {
        if let Err(e) = memory::deallocate(self.reservation, self.reservation_size) {
            warn!("failed to deallocate segment at {}: {}", self.reservation, e);
        }
    }
}

/// Owns all memory segments of one engine and serves chunk requests.
#[derive(Default)]
pub struct ChunkAllocator {
    segments: Vec<MemorySegment>,
}

impl ChunkAllocator {
    pub fn new() -> Self {
        ChunkAllocator::default()
    }

    /// The reservation size needed for `size` bytes of payload: header plus
    /// payload, rounded up to pages, at least one chunk.
    pub fn required_chunk_size(size: usize) -> usize {
        let size = size + crate::heap::chunk::HEADER_BYTES;
        let size = raw_align_up(size, memory::page_size());
        size.max(BYTES_IN_CHUNK)
    }

    /// Allocate a chunk with a usable area of at least `size_hint` bytes
    /// (zero means one plain chunk). The chunk's bitmaps are cleared.
    pub fn allocate(&mut self, size_hint: usize) -> Chunk {
        let size = Self::required_chunk_size(size_hint);
        for segment in &mut self.segments {
            if !segment.is_full() {
                if let Some(c) = segment.allocate(size) {
                    c.clear_bitmaps();
                    return c;
                }
            }
        }

        // No existing segment has room; reserve a new one.
        self.segments.push(MemorySegment::new(size));
        let c = self
            .segments
            .last_mut()
            .unwrap()
            .allocate(size)
            .expect("fresh segment cannot satisfy chunk request");
        c.clear_bitmaps();
        c
    }

    /// Return a chunk allocated with the same `size_hint`.
    pub fn free(&mut self, chunk: Chunk, size_hint: usize) {
        let size = Self::required_chunk_size(size_hint);
        for segment in &mut self.segments {
            if segment.contains(chunk) {
                segment.free(chunk, size);
                return;
            }
        }
        panic!("freed chunk {} does not belong to any segment", chunk.start());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_aligned_and_distinct() {
        let mut allocator = ChunkAllocator::new();
        let a = allocator.allocate(0);
        let b = allocator.allocate(0);
        assert!(a.start().is_aligned_to(BYTES_IN_CHUNK));
        assert!(b.start().is_aligned_to(BYTES_IN_CHUNK));
        assert_ne!(a.start(), b.start());
        allocator.free(a, 0);
        allocator.free(b, 0);
    }

    #[test]
    fn freed_chunk_is_reused() {
        let mut allocator = ChunkAllocator::new();
        let a = allocator.allocate(0);
        allocator.free(a, 0);
        let b = allocator.allocate(0);
        assert_eq!(a.start(), b.start());
    }

    #[test]
    fn oversized_request_spans_chunks() {
        let mut allocator = ChunkAllocator::new();
        let big = 3 * BYTES_IN_CHUNK;
        let a = allocator.allocate(big);
        let b = allocator.allocate(0);
        // The next chunk must start past the whole multi-chunk span.
        assert!(b.start() >= a.start() + ChunkAllocator::required_chunk_size(big));
        allocator.free(a, big);
        allocator.free(b, 0);
    }
}
