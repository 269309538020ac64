use crate::MappedRegion;

/// An executable region of memory. Use [as_function!] to run code from here!
///
/// The pages are readable and executable, never writable.
pub struct ExecutableRegion {
    region: MappedRegion,
}

impl ExecutableRegion {
    /// Consumes the [MappedRegion] and marks its memory as read-only and executable.
    pub(crate) fn from(region: MappedRegion) -> crate::Result<Self> {
        use libc::{PROT_EXEC, PROT_READ};

        region.protect(PROT_READ | PROT_EXEC)?;

        Ok(Self { region })
    }

    /// Returns the address of the mapped memory.
    ///
    /// Use [as_function!] to call this region of memory like a function.
    pub fn addr(&self) -> *const u8 {
        self.region.addr()
    }

    /// Length of the mapping in bytes (a whole number of pages).
    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// A read-only view of the code.
    pub fn as_bytes(&self) -> &[u8] {
        self.region.as_slice()
    }
}
