//! The heap-visible shape of managed objects.
//!
//! Every allocated cell begins with one machine word pointing at a
//! [`VTable`]. The collector needs nothing else from a type: `destroy` runs
//! when the object dies, and either `mark_objects` or the compact
//! [`MarkTable`] describes where its outgoing references are.

use crate::heap::Marker;
use crate::util::constants::BYTES_IN_SLOT;
use crate::util::Address;
use crate::vm::Value;

/// A reference to a managed heap object (the address of its first slot).
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeapRef(Address);

impl HeapRef {
    pub fn from_address(addr: Address) -> Self {
        debug_assert!(addr.is_aligned_to(BYTES_IN_SLOT));
        HeapRef(addr)
    }

    pub fn to_address(self) -> Address {
        self.0
    }

    /// The object's vtable, read from its first word.
    ///
    /// # Safety
    /// The reference must point at an initialized allocated cell.
    pub unsafe fn vtable(self) -> &'static VTable {
        &*(self.0.load::<*const VTable>())
    }

    /// Install the vtable word.
    ///
    /// # Safety
    /// The reference must point at an allocated cell large enough for the
    /// type the vtable describes.
    pub unsafe fn set_vtable(self, vt: &'static VTable) {
        self.0.store::<*const VTable>(vt);
    }
}

impl std::fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "HeapRef({})", self.0)
    }
}

/// How the collector should treat one machine word of an object.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MarkEntry {
    /// Not a reference.
    NoMark = 0,
    /// A tagged [`Value`].
    Value = 1,
    /// A raw pointer to a managed object, possibly null.
    Pointer = 2,
    /// A [`ValueArray`] header. Terminal: nothing may follow it.
    ValueArray = 3,
}

/// A compact mark descriptor: 32 two-bit [`MarkEntry`] codes, one per machine
/// word of the object, least significant first. An all-zero table means the
/// object holds no references.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MarkTable(pub u64);

impl MarkTable {
    pub const EMPTY: MarkTable = MarkTable(0);

    /// Describe the word at `word_index`.
    pub const fn with(self, word_index: usize, entry: MarkEntry) -> MarkTable {
        debug_assert!(word_index < 32);
        MarkTable(self.0 | (entry as u64) << (2 * word_index))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// The per-type virtual table every allocated cell's first word points at.
pub struct VTable {
    pub class_name: &'static str,
    /// Destruction hook, run by the sweep before the cell is freed.
    pub destroy: Option<unsafe fn(HeapRef)>,
    /// Custom marking hook for types whose reference layout cannot be
    /// expressed as a [`MarkTable`].
    pub mark_objects: Option<unsafe fn(HeapRef, &mut Marker)>,
    /// Compact layout descriptor, consulted when present.
    pub mark_table: MarkTable,
}

/// An out-of-line array of values: `{ptr, alloc}`. The collector marks
/// `alloc` values starting at `ptr`.
#[repr(C)]
pub struct ValueArray {
    pub ptr: *mut Value,
    pub alloc: u32,
    pub size: u32,
}

impl ValueArray {
    /// # Safety
    /// `ptr` must point at at least `alloc` initialized values.
    pub unsafe fn mark(&self, marker: &mut Marker) {
        if self.ptr.is_null() {
            return;
        }
        for i in 0..self.alloc as usize {
            (*self.ptr.add(i)).mark(marker);
        }
    }
}

/// The engine's inline member storage: a managed cell holding a
/// [`ValueArray`] whose backing values live immediately after the header in
/// the same allocation.
#[repr(C)]
pub struct MemberData {
    pub vtable: *const VTable,
    pub values: ValueArray,
}

impl MemberData {
    /// Bytes needed for a member-data cell holding `n` values.
    pub fn required_size(n: usize) -> usize {
        crate::util::conversions::raw_align_up(
            std::mem::size_of::<MemberData>() + n * std::mem::size_of::<Value>(),
            BYTES_IN_SLOT,
        )
    }

    pub fn vtable() -> &'static VTable {
        static VT: VTable = VTable {
            class_name: "MemberData",
            destroy: None,
            mark_objects: None,
            // Word 0 is the vtable, words 1.. are the ValueArray header.
            mark_table: MarkTable::EMPTY.with(1, MarkEntry::ValueArray),
        };
        &VT
    }

    /// Initialize a freshly allocated member-data cell of `size` bytes so its
    /// value array spans the rest of the allocation.
    ///
    /// # Safety
    /// `item` must point at a zeroed allocation of at least `size` bytes.
    pub unsafe fn init(item: HeapRef, size: usize) -> *mut MemberData {
        let md = item.to_address().to_mut_ptr::<MemberData>();
        (*md).vtable = Self::vtable();
        let n = (size - std::mem::size_of::<MemberData>()) / std::mem::size_of::<Value>();
        let values = item.to_address() + std::mem::size_of::<MemberData>();
        (*md).values.ptr = values.to_mut_ptr::<Value>();
        (*md).values.alloc = n as u32;
        (*md).values.size = n as u32;
        for i in 0..n {
            *(*md).values.ptr.add(i) = Value::undefined();
        }
        md
    }
}

const_assert!(std::mem::size_of::<MemberData>() <= BYTES_IN_SLOT);

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    #[test]
    fn member_data_layout_matches_mark_table() {
        // The mark table says word 1 holds the ValueArray header; the struct
        // layout must agree.
        assert_eq!(
            offset_of!(MemberData, values),
            crate::util::constants::BYTES_IN_WORD
        );
        assert_eq!(MemberData::required_size(0), BYTES_IN_SLOT);
        // 24 header bytes + 4 values of 8 bytes round up to 2 slots.
        assert_eq!(MemberData::required_size(4), 2 * BYTES_IN_SLOT);
    }

    #[test]
    fn mark_table_encoding() {
        let t = MarkTable::EMPTY
            .with(1, MarkEntry::Value)
            .with(2, MarkEntry::Pointer);
        assert_eq!(t.0 & 0b11, MarkEntry::NoMark as u64);
        assert_eq!((t.0 >> 2) & 0b11, MarkEntry::Value as u64);
        assert_eq!((t.0 >> 4) & 0b11, MarkEntry::Pointer as u64);
        assert!(MarkTable::EMPTY.is_empty());
    }
}
