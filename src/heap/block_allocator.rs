//! The per-engine allocator for normally-sized objects.
//!
//! Requests are served, in order of preference, from
//! 1. the exact-size free bin,
//! 2. the bump region at the end of the newest chunk,
//! 3. the overflow bin (first entry large enough, split),
//! 4. a larger exact-size bin (split),
//! 5. a fresh chunk, if the caller forces allocation.
//!
//! After a sweep the free bins are rebuilt from scratch by scanning each
//! chunk's bitmaps for gaps, so no two adjacent free runs ever share a bin
//! entry.

use crate::heap::chunk::{self, Chunk, HeapItem};
use crate::heap::chunk_allocator::ChunkAllocator;
use crate::heap::collector::Marker;
use crate::util::constants::*;

/// Number of size-class bins. `bins[n]` holds free runs of exactly `n`
/// slots for `n < NUM_BINS - 1`; the last bin holds all larger runs.
pub const NUM_BINS: usize = 32;

/// Bin index for a free run of `slots` slots.
fn bin_for_slots(slots: usize) -> usize {
    slots.min(NUM_BINS - 1)
}

pub struct BlockAllocator {
    free_bins: [Option<HeapItem>; NUM_BINS],
    /// Bump region: `n_free` free slots starting at `next_free`.
    next_free: Option<HeapItem>,
    n_free: usize,
    chunks: Vec<Chunk>,
    /// Live slots counted by the last sweep; the GC trigger compares this
    /// against the total.
    pub used_slots_after_last_sweep: usize,
}

impl BlockAllocator {
    pub fn new() -> Self {
        BlockAllocator {
            free_bins: [None; NUM_BINS],
            next_free: None,
            n_free: 0,
            chunks: Vec::new(),
            used_slots_after_last_sweep: 0,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total allocatable slots across all chunks.
    pub fn total_slots(&self) -> usize {
        self.chunks.len() * chunk::AVAILABLE_SLOTS
    }

    /// Bytes currently occupied by live objects.
    pub fn used_mem(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.n_used_slots() * BYTES_IN_SLOT)
            .sum()
    }

    /// Bytes under management (all chunk data areas).
    pub fn allocated_mem(&self) -> usize {
        self.chunks.len() * chunk::DATA_BYTES
    }

    /// Allocate `size` bytes (a positive multiple of the slot size). Returns
    /// `None` when no free memory matches and `force_allocation` is off;
    /// with it on, a new chunk is requested.
    pub fn allocate(
        &mut self,
        chunk_allocator: &mut ChunkAllocator,
        size: usize,
        force_allocation: bool,
    ) -> Option<HeapItem> {
        debug_assert!(size > 0 && size % BYTES_IN_SLOT == 0);
        let slots_required = size >> LOG_BYTES_IN_SLOT;
        debug_assert!(slots_required <= chunk::AVAILABLE_SLOTS);

        let item = self
            .take_exact_bin(slots_required)
            .or_else(|| self.take_bump(slots_required))
            .or_else(|| self.take_overflow_bin(slots_required))
            .or_else(|| self.split_bigger_bin(slots_required))
            .or_else(|| {
                if !force_allocation {
                    return None;
                }
                let new_chunk = chunk_allocator.allocate(0);
                self.chunks.push(new_chunk);
                self.next_free = Some(new_chunk.first());
                self.n_free = chunk::AVAILABLE_SLOTS;
                self.take_bump(slots_required)
            })?;

        item.chunk().set_allocated_slots(item, slots_required);
        #[cfg(feature = "extreme_assertions")]
        item.chunk().assert_bitmap_coherence();
        Some(item)
    }

    fn take_exact_bin(&mut self, slots: usize) -> Option<HeapItem> {
        if slots >= NUM_BINS - 1 {
            return None;
        }
        let head = self.free_bins[slots]?;
        self.free_bins[slots] = unsafe { head.next_free() };
        Some(head)
    }

    fn take_bump(&mut self, slots: usize) -> Option<HeapItem> {
        if self.n_free < slots {
            return None;
        }
        let item = self.next_free.expect("bump region with free slots");
        self.next_free = Some(item.offset(slots));
        self.n_free -= slots;
        Some(item)
    }

    /// Scan the overflow bin for the first run large enough and split it.
    /// A remainder bigger than the current bump region displaces it; the
    /// displaced region is binned.
    fn take_overflow_bin(&mut self, slots: usize) -> Option<HeapItem> {
        let mut prev: Option<HeapItem> = None;
        let mut cursor = self.free_bins[NUM_BINS - 1];
        while let Some(m) = cursor {
            let available = unsafe { m.available_slots() };
            if available < slots {
                prev = Some(m);
                cursor = unsafe { m.next_free() };
                continue;
            }
            // Unlink the entry.
            let next = unsafe { m.next_free() };
            match prev {
                Some(p) => unsafe { p.set_next_free(next) },
                None => self.free_bins[NUM_BINS - 1] = next,
            }

            let remaining = available - slots;
            if remaining == 0 {
                return Some(m);
            }
            let remainder = m.offset(slots);
            if remaining > self.n_free {
                if self.n_free > 0 {
                    let bump = self.next_free.expect("bump region with free slots");
                    let bin = bin_for_slots(self.n_free);
                    unsafe {
                        bump.set_available_slots(self.n_free);
                        bump.set_next_free(self.free_bins[bin]);
                    }
                    self.free_bins[bin] = Some(bump);
                }
                self.next_free = Some(remainder);
                self.n_free = remaining;
            } else {
                let bin = bin_for_slots(remaining);
                unsafe {
                    remainder.set_available_slots(remaining);
                    remainder.set_next_free(self.free_bins[bin]);
                }
                self.free_bins[bin] = Some(remainder);
            }
            return Some(m);
        }
        None
    }

    /// Split an entry from the smallest exact bin that can hold the request.
    fn split_bigger_bin(&mut self, slots: usize) -> Option<HeapItem> {
        if slots >= NUM_BINS - 1 {
            return None;
        }
        for i in slots + 1..NUM_BINS - 1 {
            let Some(m) = self.free_bins[i] else { continue };
            self.free_bins[i] = unsafe { m.next_free() };
            let remaining = i - slots;
            debug_assert!(remaining < NUM_BINS - 1);
            let remainder = m.offset(slots);
            unsafe {
                remainder.set_available_slots(remaining);
                remainder.set_next_free(self.free_bins[remaining]);
            }
            self.free_bins[remaining] = Some(remainder);
            return Some(m);
        }
        None
    }

    /// Sweep every chunk: run destroy hooks for unmarked objects, promote the
    /// black bitmap, and rebuild the free bins from the resulting gaps.
    pub fn sweep(&mut self) {
        self.next_free = None;
        self.n_free = 0;
        self.free_bins = [None; NUM_BINS];

        self.used_slots_after_last_sweep = 0;
        for c in &self.chunks {
            c.sweep();
            c.sort_into_bins(&mut self.free_bins);
            self.used_slots_after_last_sweep += c.n_used_slots();
            #[cfg(feature = "extreme_assertions")]
            c.assert_bitmap_coherence();
        }
    }

    /// Destroy every object and return all chunks. Heap teardown only.
    pub fn free_all(&mut self, chunk_allocator: &mut ChunkAllocator) {
        for c in self.chunks.drain(..) {
            c.free_all();
            chunk_allocator.free(c, 0);
        }
        self.next_free = None;
        self.n_free = 0;
        self.free_bins = [None; NUM_BINS];
    }

    pub fn reset_black_bits(&mut self) {
        for c in &self.chunks {
            c.reset_black_bits();
        }
    }

    pub fn collect_gray_items(&mut self, marker: &mut Marker) {
        for c in &self.chunks {
            c.collect_gray_items(marker);
        }
    }

    /// Log the free-bin population. Returns total fragmented bytes.
    pub fn dump_bins(&self, log_output: bool) -> usize {
        let mut total_fragmented_slots = 0;
        if log_output {
            debug!("Fragmentation map:");
        }
        for (i, bin) in self.free_bins.iter().enumerate() {
            let mut n_entries = 0;
            let mut cursor = *bin;
            while let Some(h) = cursor {
                n_entries += 1;
                unsafe {
                    total_fragmented_slots += h.available_slots();
                    cursor = h.next_free();
                }
            }
            if log_output {
                debug!("    number of entries in bin {}: {}", i, n_entries);
            }
        }
        if log_output {
            debug!(
                "  total mem in bins {}",
                total_fragmented_slots * BYTES_IN_SLOT
            );
        }
        total_fragmented_slots * BYTES_IN_SLOT
    }

    /// Free slots in the bump region, for accounting checks.
    pub fn bump_region(&self) -> (Option<HeapItem>, usize) {
        (self.next_free, self.n_free)
    }

    pub fn chunks(&self) -> &[Chunk] {
        self.chunks.as_slice()
    }

    /// Sum of all free-bin run lengths, in slots.
    pub fn slots_in_bins(&self) -> usize {
        let mut total = 0;
        for bin in &self.free_bins {
            let mut cursor = *bin;
            while let Some(h) = cursor {
                unsafe {
                    total += h.available_slots();
                    cursor = h.next_free();
                }
            }
        }
        total
    }

    /// The head of a free bin, for tests asserting where an allocation or a
    /// split remainder landed.
    pub fn bin_head(&self, bin: usize) -> Option<HeapItem> {
        self.free_bins[bin]
    }
}

impl Default for BlockAllocator {
    fn default() -> Self {
        Self::new()
    }
}
