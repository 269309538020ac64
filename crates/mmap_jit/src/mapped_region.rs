use std::ptr;
use std::slice;

use libc::{c_int, c_void};
use log::{trace, warn};

use crate::error::MappingError;

/// A region of memory mapped by `mmap(2)`.
///
/// The `munmap(2)` is automatically called when the value is dropped.
pub struct MappedRegion {
    addr: *mut u8,
    len: usize,
}

impl MappedRegion {
    /// Maps a fresh anonymous, process-private, read-write region of at least `size` bytes.
    ///
    /// The length is rounded up to a whole number of pages.
    pub(crate) fn allocate_read_write(size: usize) -> crate::Result<Self> {
        use libc::{MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

        let len = crate::round_up_to_page_size(size);
        let memory = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };

        if memory == MAP_FAILED {
            return Err(MappingError::last("mmap"));
        }

        trace!("mapped {} bytes at {:p}", len, memory);

        Ok(MappedRegion {
            addr: memory as *mut u8,
            len,
        })
    }

    /// Changes the protection of the entire region.
    pub(crate) fn protect(&self, protection: c_int) -> crate::Result<()> {
        let result = unsafe { libc::mprotect(self.addr as *mut c_void, self.len, protection) };
        if result != 0 {
            return Err(MappingError::last("mprotect"));
        }

        Ok(())
    }

    /// Returns a pointer to mapped memory.
    pub fn addr(&self) -> *const u8 {
        self.addr
    }

    /// Returns a mutable pointer to this region.
    ///
    /// Note: to write to this memory, it must currently be a [crate::WritableRegion].
    pub fn addr_mut(&self) -> *mut u8 {
        self.addr
    }

    /// Return the length of region. Always a multiple of the page size.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Mappings are never empty, but clippy likes to ask.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole region as bytes. Every protection we use includes `PROT_READ`.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.addr, self.len) }
    }

    /// # Safety
    ///
    /// The region must currently be writable.
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.addr, self.len)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.addr as *mut c_void, self.len) };
        if result != 0 {
            // Leaking the mapping is the only option left here.
            let error = MappingError::last("munmap");
            warn!("could not release {} bytes at {:p}: {}", self.len, self.addr, error);
        } else {
            trace!("unmapped {} bytes at {:p}", self.len, self.addr);
        }
    }
}
