//! Allocation and deallocation (spec.md §4.5, §4.6).

use crate::free_list::{insert_free, split_if_too_big};
use crate::instance::Engine;
use crate::layout::{header_from_user, raw_size, user_from_header, Header, ALLOC_BIT, ALLOC_SENTINEL};

/// First-fit walk over the free list, optionally restricted to a preferred
/// region's address span (spec.md §4.5 "Search").
///
/// Returns the chosen block together with its immediate predecessor in the
/// free list (needed to unlink it), or `None` if no block satisfies the
/// request.
unsafe fn find_fit(
    engine: &Engine,
    preferred: Option<(usize, usize)>,
    final_size: usize,
) -> Option<(*mut Header, *mut Header)> {
    unsafe {
        let mut prev = &engine.start as *const Header as *mut Header;
        let mut cur = engine.start.next;
        let region_bounds = preferred.map(|(start, len)| (start, start + len));

        loop {
            if cur.is_null() || raw_size((*cur).size) == 0 {
                return None; // end sentinel or list exhausted
            }
            if let Some((region_start, region_end)) = region_bounds {
                if (cur as usize) < region_start {
                    prev = cur;
                    cur = (*cur).next;
                    continue;
                }
                if (cur as usize) >= region_end {
                    return None;
                }
            }
            if raw_size((*cur).size) >= final_size {
                return Some((prev, cur));
            }
            prev = cur;
            cur = (*cur).next;
        }
    }
}

/// Computes `ALIGN_UP(user_size) + HDR`, rejecting requests that would be
/// zero-sized after header accounting or that would overflow into the
/// allocated bit (spec.md §4.5 preconditions, §4.7).
pub(crate) fn final_size_of(user_size: usize) -> Option<usize> {
    let hdr = Header::size_of_header();
    let rounded = crate::layout::align_up(user_size, crate::layout::ALIGN);
    let final_size = rounded.checked_add(hdr)?;
    if final_size == hdr || final_size & ALLOC_BIT != 0 {
        return None;
    }
    Some(final_size)
}

/// Allocates `user_size` bytes, optionally restricted to `preferred`
/// `(start, len)` (spec.md §4.5).
pub(crate) fn alloc(engine: &mut Engine, preferred: Option<(usize, usize)>, user_size: usize) -> Option<*mut u8> {
    let final_size = final_size_of(user_size)?;
    unsafe {
        let (prev, chosen) = find_fit(engine, preferred, final_size)?;

        (*prev).next = (*chosen).next;
        engine.mem_available -= raw_size((*chosen).size);
        split_if_too_big(engine, chosen, final_size);

        (*chosen).next = ALLOC_SENTINEL as *mut Header;
        // `split_if_too_big` already leaves `chosen.size` at `final_size` when
        // it split, or at its legitimately oversized total when the leftover
        // slack was too small to host its own header -- OR in the allocated
        // bit rather than reassigning from `final_size`, or that oversized
        // slack is lost forever (leaked and miscoalesced later).
        (*chosen).size |= ALLOC_BIT;

        #[cfg(feature = "stats")]
        engine.stats.on_alloc(engine.mem_available);

        log::trace!("alloc({}) -> {:p}", user_size, chosen);
        Some(user_from_header(chosen))
    }
}

/// Frees `user_ptr`. No-op on null or on a pointer lacking the allocated
/// sentinel (spec.md §4.6, §7 `InvalidPointer`).
pub(crate) fn free(engine: &mut Engine, user_ptr: *mut u8) {
    if user_ptr.is_null() {
        return;
    }
    unsafe {
        let block = header_from_user(user_ptr);
        if (*block).next as usize != ALLOC_SENTINEL || (*block).size & ALLOC_BIT == 0 {
            log::warn!("free({:p}): invalid or already-freed pointer, ignoring", user_ptr);
            return;
        }

        let raw = raw_size((*block).size);

        #[cfg(feature = "clean-memory")]
        core::ptr::write_bytes(user_ptr, 0, raw - Header::size_of_header());

        (*block).size = raw;
        engine.mem_available += raw;

        #[cfg(feature = "stats")]
        engine.stats.on_free();

        log::trace!("free({:p})", user_ptr);
        insert_free(engine, block);
    }
}

/// Returns the user-visible capacity of an allocated block, or `0` if
/// `user_ptr` is null or not a currently-allocated block (spec.md §6.2
/// `block_user_size`).
pub(crate) fn block_user_size(user_ptr: *mut u8) -> usize {
    if user_ptr.is_null() {
        return 0;
    }
    unsafe {
        let block = header_from_user(user_ptr);
        if (*block).next as usize != ALLOC_SENTINEL || (*block).size & ALLOC_BIT == 0 {
            return 0;
        }
        raw_size((*block).size) - Header::size_of_header()
    }
}
