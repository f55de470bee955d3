/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// log2 of the number of bytes in a heap slot.
/// The slot is the quantum of allocation: every managed object occupies a
/// whole number of slots, and the chunk bitmaps carry one bit per slot.
pub const LOG_BYTES_IN_SLOT: u8 = 5;
/// The number of bytes in a heap slot
pub const BYTES_IN_SLOT: usize = 1 << LOG_BYTES_IN_SLOT;

/// log2 of the number of bytes in a chunk
pub const LOG_BYTES_IN_CHUNK: u8 = 16;
/// The number of bytes in a chunk (64 KiB)
pub const BYTES_IN_CHUNK: usize = 1 << LOG_BYTES_IN_CHUNK;

// The chunk size must be a power-of-two multiple of the page size so chunk
// ranges can be committed and decommitted page-wise.
const_assert!(BYTES_IN_CHUNK % BYTES_IN_PAGE == 0);
const_assert!(BYTES_IN_CHUNK.is_power_of_two());
