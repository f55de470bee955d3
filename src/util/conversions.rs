use crate::util::constants::*;
use crate::util::Address;

/// Align an address up to a chunk boundary.
pub fn chunk_align_up(addr: Address) -> Address {
    addr.align_up(BYTES_IN_CHUNK)
}

/// Align an address down to a chunk boundary.
pub fn chunk_align_down(addr: Address) -> Address {
    addr.align_down(BYTES_IN_CHUNK)
}

/// Convert a number of pages to bytes.
pub fn pages_to_bytes(pages: usize) -> usize {
    pages << LOG_BYTES_IN_PAGE
}

/// Convert bytes to the number of pages required to hold them.
pub fn bytes_to_pages_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_PAGE - 1) >> LOG_BYTES_IN_PAGE
}

/// Round a byte count up to whole pages.
pub fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/master/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

/// Is the value aligned to the given power-of-two alignment?
pub fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_align_up() {
        assert_eq!(raw_align_up(0, BYTES_IN_PAGE), 0);
        assert_eq!(raw_align_up(1, BYTES_IN_PAGE), BYTES_IN_PAGE);
        assert_eq!(raw_align_up(BYTES_IN_PAGE, BYTES_IN_PAGE), BYTES_IN_PAGE);
    }

    #[test]
    fn test_chunk_align() {
        let addr = unsafe { Address::from_usize(BYTES_IN_CHUNK + 1) };
        assert_eq!(chunk_align_down(addr).as_usize(), BYTES_IN_CHUNK);
        assert_eq!(chunk_align_up(addr).as_usize(), 2 * BYTES_IN_CHUNK);
    }
}
