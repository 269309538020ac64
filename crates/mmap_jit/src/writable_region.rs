use std::ops::{Deref, DerefMut};

use crate::ExecutableRegion;
use crate::MappedRegion;

/// A region of memory that can be written to, but NOT executed.
pub struct WritableRegion {
    region: MappedRegion,
}

impl WritableRegion {
    /// Allocate a writable region of at least `size` bytes, rounded up to the page size.
    pub fn allocate(size: usize) -> crate::Result<Self> {
        let region = MappedRegion::allocate_read_write(size)?;
        Ok(Self { region })
    }

    /// Allocates a region just big enough for `code` and copies it in.
    pub fn with_contents(code: &[u8]) -> crate::Result<Self> {
        let mut region = Self::allocate(code.len())?;
        region[..code.len()].copy_from_slice(code);
        Ok(region)
    }

    /// Consumes the region and returns an executable region. That means you can run it!
    ///
    /// Write access is revoked before execute access is granted, so the pages are never both.
    pub fn into_executable(self) -> crate::Result<ExecutableRegion> {
        ExecutableRegion::from(self.region)
    }
}

impl Deref for WritableRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.region.as_slice()
    }
}

impl DerefMut for WritableRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        // Only ever mapped read-write while it is a WritableRegion.
        unsafe { self.region.as_mut_slice() }
    }
}
