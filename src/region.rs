//! Region ingest (spec.md §4.2).
//!
//! A [`Region`] is the Rust-side equivalent of the C API's
//! `(start_addr, length)` descriptor pair. Because Rust slices already carry
//! their own length, the null/zero-length terminator the original C contract
//! used to mark the end of a region array is unnecessary here; callers pass
//! an ordinary `&[Region]`.

use crate::error::InitError;
use crate::instance::Engine;
use crate::layout::{align_down, align_up, Header, ALIGN};

/// A contiguous byte region donated to an allocator instance.
///
/// # Safety
/// The bytes `[start, start + len)` must be valid for reads and writes for
/// as long as the owning [`crate::instance::Instance`] exists, and must not
/// be accessed by the application except through pointers the instance later
/// hands back from `alloc`/`realloc`.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    pub start: *mut u8,
    pub len: usize,
}

impl Region {
    /// Construct a region descriptor from a raw pointer and a byte length.
    pub const fn new(start: *mut u8, len: usize) -> Self {
        Self { start, len }
    }

    /// Construct a region descriptor from a `'static` byte slice, the common
    /// case for a statically-allocated backing buffer.
    pub fn from_static(buf: &'static mut [u8]) -> Self {
        Self {
            start: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }
}

/// Validates that `regions` is non-empty and strictly increasing / disjoint
/// (spec.md §4.2 preconditions).
pub(crate) fn validate(regions: &[Region]) -> Result<(), InitError> {
    if regions.is_empty() {
        return Err(InitError::NoRegions);
    }
    for pair in regions.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if (b.start as usize) <= (a.start as usize) + a.len {
            return Err(InitError::OverlappingRegions);
        }
    }
    Ok(())
}

/// Installs `regions` into `engine`, aligning and laying down the initial
/// free block plus end sentinel for each one that is large enough to host
/// both (spec.md §4.2 steps 1-9). Returns the number of regions installed;
/// `regions` must already have passed [`validate`].
pub(crate) fn assign_memory(engine: &mut Engine, regions: &[Region]) -> usize {
    let hdr = Header::size_of_header();
    let mut installed = 0usize;

    for region in regions {
        let aligned_start = align_up(region.start as usize, ALIGN);
        let shrink = aligned_start - region.start as usize;
        if shrink > region.len {
            log::warn!("region at {:p} too small after alignment, skipping", region.start);
            continue;
        }
        let len = align_down(region.len - shrink, ALIGN);
        if len < 2 * hdr {
            log::warn!(
                "region at {:p} ({} bytes) too small to host a block, skipping",
                region.start,
                region.len
            );
            continue;
        }

        let prev_end = engine.end_block;
        // SAFETY: `aligned_start..aligned_start+len` is caller-donated per
        // `Region`'s safety contract, large enough for a first block plus
        // end sentinel per the `len < 2 * hdr` check above.
        unsafe {
            let end_sentinel = (aligned_start + len - hdr) as *mut Header;
            (*end_sentinel).size = 0;
            (*end_sentinel).next = core::ptr::null_mut();
            engine.end_block = end_sentinel;

            let first_block = aligned_start as *mut Header;
            (*first_block).size = len - hdr;
            (*first_block).next = end_sentinel;

            if installed == 0 {
                engine.start.next = first_block;
            }
            if !prev_end.is_null() {
                (*prev_end).next = first_block;
            }
        }

        engine.mem_available += len - hdr;
        engine.region_count += 1;
        installed += 1;
        log::debug!(
            "installed region at {:p}: {} usable bytes",
            aligned_start as *const u8,
            len - hdr
        );
    }

    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_sequence() {
        assert_eq!(validate(&[]), Err(InitError::NoRegions));
    }

    #[test]
    fn rejects_overlapping_regions() {
        let a = Region::new(0x1000 as *mut u8, 0x100);
        let b = Region::new(0x1050 as *mut u8, 0x100);
        assert_eq!(validate(&[a, b]), Err(InitError::OverlappingRegions));
    }

    #[test]
    fn rejects_descending_regions() {
        let a = Region::new(0x2000 as *mut u8, 0x100);
        let b = Region::new(0x1000 as *mut u8, 0x100);
        assert_eq!(validate(&[a, b]), Err(InitError::OverlappingRegions));
    }

    #[test]
    fn accepts_disjoint_increasing_regions() {
        let a = Region::new(0x1000 as *mut u8, 0x100);
        let b = Region::new(0x2000 as *mut u8, 0x100);
        assert!(validate(&[a, b]).is_ok());
    }
}
