//! Page-granular virtual memory operations.
//!
//! The heap reserves large, page-aligned address ranges up front and commits
//! and decommits physical pages inside them as chunks come and go. Reserved
//! but uncommitted pages are mapped `PROT_NONE` so stray accesses fault.

use crate::util::Address;
use std::io::Result;

/// The protection flags for a mapping.
#[repr(i32)]
#[derive(Debug, Copy, Clone)]
pub enum MmapProtection {
    /// Allow read + write
    ReadWrite,
    /// Do not allow any access
    NoAccess,
}

impl MmapProtection {
    fn get_native_flags(&self) -> i32 {
        use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
        match self {
            Self::ReadWrite => PROT_READ | PROT_WRITE,
            Self::NoAccess => PROT_NONE,
        }
    }
}

/// The operating system page size.
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Reserve `size` bytes of address space without committing backing store.
/// The returned range is mapped `PROT_NONE`; individual sub-ranges become
/// usable after [`commit`].
pub fn reserve(size: usize) -> Result<Address> {
    let mut flags = libc::MAP_ANON | libc::MAP_PRIVATE;
    #[cfg(target_os = "linux")]
    {
        flags |= libc::MAP_NORESERVE;
    }
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_NONE,
            flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    trace!("reserved {} bytes at {}", size, Address::from_mut_ptr(ptr));
    Ok(Address::from_mut_ptr(ptr))
}

/// Commit backing store for a previously reserved range.
pub fn commit(start: Address, size: usize) -> Result<()> {
    mprotect(start, size, MmapProtection::ReadWrite)
}

/// Return a committed range to the reserved-but-unbacked state. The physical
/// pages are released back to the OS.
pub fn decommit(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) },
        0,
    )?;
    mprotect(start, size, MmapProtection::NoAccess)
}

/// Unmap a reserved range entirely.
pub fn deallocate(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Change the protection of a memory region.
pub fn mprotect(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot.get_native_flags()) },
        0,
    )
}

/// Does the given OS error number indicate an out-of-memory condition?
pub fn is_mmap_oom(os_errno: i32) -> bool {
    os_errno == libc::ENOMEM
}

/// Set a range of memory to zero.
pub fn zero(start: Address, len: usize) {
    set(start, 0, len);
}

/// Set a range of memory to the given value. Similar to memset.
pub fn set(start: Address, val: u8, len: usize) {
    unsafe {
        std::ptr::write_bytes(start.to_mut_ptr::<u8>(), val, len);
    }
}

pub fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;

    #[test]
    fn reserve_commit_decommit() {
        let size = 4 * BYTES_IN_PAGE;
        let base = reserve(size).unwrap();
        assert!(base.is_aligned_to(page_size()));

        commit(base, size).unwrap();
        unsafe { base.store::<usize>(0xdead_beef) };
        assert_eq!(unsafe { base.load::<usize>() }, 0xdead_beef);

        decommit(base, size).unwrap();
        commit(base, size).unwrap();
        // Decommitted pages read back as zero once recommitted.
        assert_eq!(unsafe { base.load::<usize>() }, 0);

        deallocate(base, size).unwrap();
    }
}
