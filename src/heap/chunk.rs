//! Chunks: the unit of heap organization.
//!
//! A chunk is a naturally-aligned 64 KiB span divided into 32-byte slots.
//! The first kilobyte is the header: four parallel bitmaps with one bit per
//! slot.
//!
//! * `object`: the slot starts an allocated object.
//! * `extends`: the slot is a continuation of a multi-slot object.
//! * `black`: the object starting at the slot is marked live.
//! * `gray`: the object is marked but needs (re-)scanning (incremental mode).
//!
//! The header slots themselves never have bits set; the free-run scan masks
//! them out as permanently used.

use crate::heap::collector::Marker;
use crate::util::constants::*;
use crate::util::Address;
use crate::vm::HeapRef;

/// Slots per chunk.
pub const NUM_SLOTS: usize = BYTES_IN_CHUNK / BYTES_IN_SLOT;
/// Words per bitmap.
pub const ENTRIES_IN_BITMAP: usize = NUM_SLOTS / BITS_IN_WORD;
/// Bytes per bitmap.
const BYTES_IN_BITMAP: usize = NUM_SLOTS / BITS_IN_BYTE;
/// Header bytes: four bitmaps.
pub const HEADER_BYTES: usize = 4 * BYTES_IN_BITMAP;
/// Slots occupied by the header.
pub const HEADER_SLOTS: usize = HEADER_BYTES / BYTES_IN_SLOT;
/// Slots usable for allocation in one chunk.
pub const AVAILABLE_SLOTS: usize = NUM_SLOTS - HEADER_SLOTS;
/// Bytes usable for allocation in one chunk.
pub const DATA_BYTES: usize = AVAILABLE_SLOTS * BYTES_IN_SLOT;

// The header must cover a whole number of slots and of bitmap words, so slot
// indices of real data never share a bitmap word boundary with header bytes.
const_assert!(HEADER_BYTES % BYTES_IN_SLOT == 0);
const_assert!(HEADER_SLOTS % BITS_IN_WORD == 0 || BITS_IN_WORD > HEADER_SLOTS);

/// Which of the four bitmaps to operate on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bitmap {
    Object = 0,
    Extends = 1,
    Black = 2,
    Gray = 3,
}

/// A slot-sized cell in a chunk's data area. A free cell carries
/// `{next, available_slots}` in its first two words; an allocated cell is
/// the start of an object whose first word points at its vtable.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct HeapItem(Address);

impl HeapItem {
    pub fn from_address(addr: Address) -> Self {
        debug_assert!(addr.is_aligned_to(BYTES_IN_SLOT));
        HeapItem(addr)
    }

    pub fn to_address(self) -> Address {
        self.0
    }

    pub fn as_heap_ref(self) -> HeapRef {
        HeapRef::from_address(self.0)
    }

    /// The chunk containing this item.
    pub fn chunk(self) -> Chunk {
        Chunk::containing(self.0)
    }

    /// The item `slots` slots after this one.
    pub fn offset(self, slots: usize) -> HeapItem {
        HeapItem(self.0 + slots * BYTES_IN_SLOT)
    }

    /// The slot index of this item within its chunk.
    pub fn slot_index(self) -> usize {
        (self.0 - self.chunk().start()) >> LOG_BYTES_IN_SLOT
    }

    // Free-list fields, stored in the cell itself while it is free.

    /// # Safety
    /// The item must currently be on a free list.
    pub unsafe fn next_free(self) -> Option<HeapItem> {
        let raw = self.0.load::<usize>();
        if raw == 0 {
            None
        } else {
            Some(HeapItem(Address::from_usize(raw)))
        }
    }

    /// # Safety
    /// The item must be free (its cell memory is dead).
    pub unsafe fn set_next_free(self, next: Option<HeapItem>) {
        self.0
            .store::<usize>(next.map_or(0, |n| n.0.as_usize()));
    }

    /// # Safety
    /// The item must currently be on a free list.
    pub unsafe fn available_slots(self) -> usize {
        (self.0 + BYTES_IN_ADDRESS).load::<usize>()
    }

    /// # Safety
    /// The item must be free (its cell memory is dead).
    pub unsafe fn set_available_slots(self, slots: usize) {
        (self.0 + BYTES_IN_ADDRESS).store::<usize>(slots);
    }
}

/// A naturally-aligned chunk, referenced by its base address.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Chunk(Address);

impl Chunk {
    pub fn from_aligned_address(addr: Address) -> Self {
        debug_assert!(addr.is_aligned_to(BYTES_IN_CHUNK));
        Chunk(addr)
    }

    /// The chunk containing an arbitrary heap address.
    pub fn containing(addr: Address) -> Self {
        Chunk(addr.align_down(BYTES_IN_CHUNK))
    }

    pub fn start(self) -> Address {
        self.0
    }

    /// The base the slot indexing is relative to (the chunk start).
    pub fn real_base(self) -> HeapItem {
        HeapItem(self.0)
    }

    /// The first allocatable slot, just past the header.
    pub fn first(self) -> HeapItem {
        HeapItem(self.0 + HEADER_BYTES)
    }

    fn bitmap_base(self, which: Bitmap) -> Address {
        self.0 + which as usize * BYTES_IN_BITMAP
    }

    fn word(self, which: Bitmap, i: usize) -> usize {
        debug_assert!(i < ENTRIES_IN_BITMAP);
        unsafe { (self.bitmap_base(which) + i * BYTES_IN_WORD).load::<usize>() }
    }

    fn set_word(self, which: Bitmap, i: usize, val: usize) {
        debug_assert!(i < ENTRIES_IN_BITMAP);
        unsafe { (self.bitmap_base(which) + i * BYTES_IN_WORD).store::<usize>(val) }
    }

    pub fn test_bit(self, which: Bitmap, index: usize) -> bool {
        self.word(which, index / BITS_IN_WORD) & (1 << (index % BITS_IN_WORD)) != 0
    }

    pub fn set_bit(self, which: Bitmap, index: usize) {
        let i = index / BITS_IN_WORD;
        self.set_word(which, i, self.word(which, i) | 1 << (index % BITS_IN_WORD));
    }

    pub fn clear_bit(self, which: Bitmap, index: usize) {
        let i = index / BITS_IN_WORD;
        self.set_word(which, i, self.word(which, i) & !(1 << (index % BITS_IN_WORD)));
    }

    /// Record an allocation of `slots` slots starting at `item`: one object
    /// bit and `slots - 1` extends bits.
    pub fn set_allocated_slots(self, item: HeapItem, slots: usize) {
        debug_assert!(slots >= 1);
        let index = item.slot_index();
        debug_assert!(index >= HEADER_SLOTS && index + slots <= NUM_SLOTS);
        #[cfg(feature = "extreme_assertions")]
        for k in index..index + slots {
            assert!(!self.test_bit(Bitmap::Object, k));
            assert!(!self.test_bit(Bitmap::Extends, k));
        }
        self.set_bit(Bitmap::Object, index);
        for k in index + 1..index + slots {
            self.set_bit(Bitmap::Extends, k);
        }
    }

    /// Zero all four bitmaps. Called when a chunk is (re-)installed.
    pub fn clear_bitmaps(self) {
        crate::util::memory::zero(self.0, HEADER_BYTES);
    }

    pub fn reset_black_bits(self) {
        crate::util::memory::zero(self.bitmap_base(Bitmap::Black), BYTES_IN_BITMAP);
    }

    /// Push every object that is both black and gray onto the mark stack and
    /// clear the gray bits. This re-scans the objects a Steele barrier
    /// dirtied since they were blackened.
    pub fn collect_gray_items(self, marker: &mut Marker) {
        let base = self.real_base();
        for i in 0..ENTRIES_IN_BITMAP {
            let mut to_mark = self.word(Bitmap::Black, i) & self.word(Bitmap::Gray, i);
            debug_assert_eq!(to_mark & self.word(Bitmap::Object, i), to_mark);
            while to_mark != 0 {
                let index = to_mark.trailing_zeros() as usize;
                to_mark ^= 1 << index;
                let item = base.offset(i * BITS_IN_WORD + index);
                marker.push(item.as_heap_ref());
            }
            self.set_word(Bitmap::Gray, i, 0);
        }
    }

    /// Free every object whose object bit is set but whose black bit is not,
    /// running destroy hooks, then promote the black bitmap to the new object
    /// bitmap.
    pub fn sweep(self) {
        self.release(false);
    }

    /// Free every object unconditionally. Used on heap teardown.
    pub fn free_all(self) {
        self.release(true);
    }

    fn release(self, everything: bool) {
        let base = self.real_base();
        // When a freed object's extents run to the end of a bitmap word, the
        // remaining extents sit at the bottom of the following word and must
        // be cleared before that word is processed.
        let mut carry_clear = false;
        for i in 0..ENTRIES_IN_BITMAP {
            let to_free = if everything {
                self.word(Bitmap::Object, i)
            } else {
                self.word(Bitmap::Object, i) ^ self.word(Bitmap::Black, i)
            };
            debug_assert_eq!(to_free & self.word(Bitmap::Object, i), to_free);
            let mut e = self.word(Bitmap::Extends, i);
            if carry_clear {
                // Leading extends bits belong to the object freed at the end
                // of the previous word.
                let run = (!e).trailing_zeros() as usize;
                if run == BITS_IN_WORD {
                    e = 0;
                } else {
                    e &= !((1 << run) - 1);
                    carry_clear = false;
                }
            }
            let mut remaining = to_free;
            while remaining != 0 {
                let index = remaining.trailing_zeros() as usize;
                let bit = 1usize << index;
                remaining ^= bit;

                // Clear the freed object's extends bits in O(1). With
                //   mask    = ones at and below the head bit,
                //   e|mask  = ones from bit 0 through the last extent of the
                //             freed object (the extents are contiguous above
                //             the head),
                // adding 1 turns that run into a single bit above the object
                // and zeroes everything below it; or-ing the mask back in
                // protects the bits below the head. And-ing the result with e
                // therefore clears exactly the freed object's extents.
                let mask = (bit << 1).wrapping_sub(1);
                let (sum, overflow) = (e | mask).overflowing_add(1);
                if overflow {
                    // The extents reach the end of the word and may continue
                    // into the next one.
                    e &= mask;
                    carry_clear = true;
                } else {
                    e &= sum | mask;
                }

                let item = base.offset(i * BITS_IN_WORD + index);
                unsafe {
                    let vt = item.as_heap_ref().vtable();
                    if let Some(destroy) = vt.destroy {
                        destroy(item.as_heap_ref());
                    }
                }
            }
            if everything {
                self.set_word(Bitmap::Object, i, 0);
            } else {
                let black = self.word(Bitmap::Black, i);
                self.set_word(Bitmap::Object, i, black);
            }
            self.set_word(Bitmap::Gray, i, 0);
            self.set_word(Bitmap::Extends, i, e);
        }
    }

    /// Scan `object|extends` for gaps and thread each free run into the
    /// matching bin: runs of exactly `n < bins.len() - 1` slots go to
    /// `bins[n]`, longer runs to the last (overflow) bin.
    pub fn sort_into_bins(self, bins: &mut [Option<HeapItem>]) {
        let n_bins = bins.len();
        let base = self.real_base();
        let mut i = 0;
        let mut used = self.used_word(0);
        loop {
            // Find the start of the next free run.
            let index = (used + 1).trailing_zeros() as usize;
            if index == BITS_IN_WORD {
                i += 1;
                if i == ENTRIES_IN_BITMAP {
                    break;
                }
                used = self.used_word(i);
                continue;
            }
            let free_start = i * BITS_IN_WORD + index;
            used &= !((1usize << index) - 1);
            // Find the end of the run, crossing words as needed.
            while used == 0 {
                i += 1;
                if i == ENTRIES_IN_BITMAP {
                    used = usize::MAX;
                    break;
                }
                used = self.used_word(i);
            }
            let index = used.trailing_zeros() as usize;
            used |= (1usize << index).wrapping_sub(1);
            let free_end = if i == ENTRIES_IN_BITMAP {
                NUM_SLOTS
            } else {
                i * BITS_IN_WORD + index
            };
            debug_assert!(free_end > free_start && free_end <= NUM_SLOTS);
            let n_slots = free_end - free_start;
            let item = base.offset(free_start);
            unsafe {
                item.set_available_slots(n_slots);
                item.set_next_free(bins[n_slots.min(n_bins - 1)]);
            }
            bins[n_slots.min(n_bins - 1)] = Some(item);
            if i == ENTRIES_IN_BITMAP {
                break;
            }
        }
    }

    /// `object|extends` for word `i`, with the header slots forced used.
    fn used_word(self, i: usize) -> usize {
        let mut used = self.word(Bitmap::Object, i) | self.word(Bitmap::Extends, i);
        if i * BITS_IN_WORD < HEADER_SLOTS {
            let header_bits = HEADER_SLOTS - i * BITS_IN_WORD;
            if header_bits >= BITS_IN_WORD {
                used = usize::MAX;
            } else {
                used |= (1usize << header_bits) - 1;
            }
        }
        used
    }

    /// The number of slots currently occupied by objects (heads + extents).
    pub fn n_used_slots(self) -> usize {
        (0..ENTRIES_IN_BITMAP)
            .map(|i| {
                (self.word(Bitmap::Object, i) | self.word(Bitmap::Extends, i)).count_ones()
                    as usize
            })
            .sum()
    }

    /// Check the chunk bitmap invariants: no slot is both an object head and
    /// an extension, and black bits only appear on object heads. Called after
    /// allocation and sweep when `extreme_assertions` is enabled; tests call
    /// it directly.
    pub fn assert_bitmap_coherence(self) {
        for i in 0..ENTRIES_IN_BITMAP {
            let object = self.word(Bitmap::Object, i);
            let extends = self.word(Bitmap::Extends, i);
            let black = self.word(Bitmap::Black, i);
            assert_eq!(object & extends, 0, "object and extends bits overlap");
            assert_eq!(black & object, black, "black bit on a non-object slot");
        }
    }
}
