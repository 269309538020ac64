//! Memory for just-in-time compiled code.
//!
//! Memory moves through three states, each its own type:
//!
//!  - a [MappedRegion] is the raw `mmap(2)` allocation; it owns the pages and unmaps them on drop;
//!  - a [WritableRegion] can be filled with machine code, but not run;
//!  - an [ExecutableRegion] can be run (see [as_function!]), but never written again.
//!
//! Converting a [WritableRegion] into an [ExecutableRegion] consumes it, so no page is ever
//! writable and executable at the same time.

extern crate errno;
extern crate libc;

use std::sync::OnceLock;

mod error;
mod executable_region;
mod mapped_region;
mod writable_region;

pub use crate::error::{MappingError, Result};
pub use crate::executable_region::ExecutableRegion;
pub use crate::mapped_region::MappedRegion;
pub use crate::writable_region::WritableRegion;

/// Reinterprets the start of an [ExecutableRegion] as a function pointer of the given type.
///
/// Must be used inside an `unsafe` block: nothing checks that the code in the region actually
/// has the given signature.
#[macro_export]
macro_rules! as_function {
    ($region:expr, $fn_type:ty) => {
        ::std::mem::transmute::<*const u8, $fn_type>($region.addr())
    };
}

const FALLBACK_PAGE_SIZE: usize = 4096;

/// The size of a page, as reported by `sysconf(3)`.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            FALLBACK_PAGE_SIZE
        }
    })
}

/// Rounds `size` up to a whole number of pages. Empty requests still get one page.
pub fn round_up_to_page_size(size: usize) -> usize {
    let page = page_size();
    size.max(1).div_ceil(page) * page
}
