//! Reallocation: the four-case in-place resize engine plus copy-fallback
//! (spec.md §4.7).

use crate::core_alloc::{alloc, final_size_of, free};
use crate::free_list::{locate, split_if_too_big};
use crate::instance::Engine;
use crate::layout::{header_from_user, raw_size, user_from_header, Header, ALLOC_BIT};

/// Dispatches on the `(ptr, size)` edge cases (spec.md §4.7 "Cases by
/// `(ptr, size)`") before falling into the real resize algorithm.
pub(crate) fn realloc(
    engine: &mut Engine,
    preferred: Option<(usize, usize)>,
    user_ptr: *mut u8,
    user_size: usize,
) -> Option<*mut u8> {
    if user_ptr.is_null() {
        return if user_size == 0 { None } else { alloc(engine, preferred, user_size) };
    }
    if user_size == 0 {
        free(engine, user_ptr);
        return None;
    }

    let final_size = final_size_of(user_size)?;
    unsafe {
        let block = header_from_user(user_ptr);
        let block_size = raw_size((*block).size);

        if block_size == final_size {
            return Some(user_ptr);
        }
        if final_size < block_size {
            return Some(shrink(engine, block, final_size));
        }
        grow(engine, preferred, block, block_size, final_size, user_size)
    }
}

/// Case A: shrink in place (spec.md §4.7 "Case A").
unsafe fn shrink(engine: &mut Engine, block: *mut Header, final_size: usize) -> *mut u8 {
    unsafe {
        let hdr = Header::size_of_header();
        let block_size = raw_size((*block).size);
        let slack = block_size - final_size;

        if slack >= hdr {
            split_if_too_big(engine, block, final_size);
            (*block).size = final_size | ALLOC_BIT;
            return user_from_header(block);
        }

        if slack > 0 {
            // Look for a free neighbor immediately following `block`. Since
            // `block` is allocated and therefore absent from the free list,
            // `locate`'s successor pointer is exactly that neighbor, if one
            // exists and is adjacent.
            let (_, prev) = locate(engine, block as usize);
            let neighbor = (*prev).next;
            let neighbor_is_adjacent =
                !neighbor.is_null() && (neighbor as usize) == block as usize + block_size;
            if neighbor_is_adjacent && raw_size((*neighbor).size) > 0 {
                let combined = raw_size((*neighbor).size) + slack;
                let next = (*neighbor).next;
                let replacement = (block as *mut u8).add(final_size).cast::<Header>();
                (*replacement).size = combined;
                (*replacement).next = next;
                (*prev).next = replacement;
                engine.mem_available += slack;
                (*block).size = final_size | ALLOC_BIT;
                return user_from_header(block);
            }
        }

        // Neither condition applies: leave `block` slightly oversized.
        user_from_header(block)
    }
}

/// Case B: grow, trying extend / slide / sandwich / copy in order (spec.md
/// §4.7 "Case B").
unsafe fn grow(
    engine: &mut Engine,
    preferred: Option<(usize, usize)>,
    block: *mut Header,
    block_size: usize,
    final_size: usize,
    user_size: usize,
) -> Option<*mut u8> {
    unsafe {
        let hdr = Header::size_of_header();
        let block_addr = block as usize;
        let start = &engine.start as *const Header as *mut Header;

        let (prev_prev, prev) = locate(engine, block_addr);
        let next_free = (*prev).next;

        let next_adjacent = !next_free.is_null()
            && raw_size((*next_free).size) > 0
            && block_addr + block_size == next_free as usize;
        let prev_adjacent = prev != start && (prev as usize) + raw_size((*prev).size) == block_addr;

        // 1. Extend into the trailing free neighbor.
        if next_adjacent {
            let next_size = raw_size((*next_free).size);
            if block_size + next_size >= final_size {
                (*prev).next = (*next_free).next;
                engine.mem_available -= next_size;
                // `size` already carries `ALLOC_BIT` here, so whether or not
                // `split_if_too_big` actually splits off a tail, it leaves
                // `block.size` at the right value on its own -- reassigning
                // from `final_size` afterward would discard a legitimately
                // oversized leftover (slack < HDR) instead of keeping it part
                // of the allocated block, leaking it and corrupting later
                // coalescing.
                (*block).size = (block_size + next_size) | ALLOC_BIT;
                split_if_too_big(engine, block, final_size);
                #[cfg(feature = "stats")]
                engine.stats.note_available(engine.mem_available);
                log::trace!("realloc: extended block at {:p} in place", block);
                return Some(user_from_header(block));
            }
        }

        // 2. Slide backward into the leading free neighbor.
        if prev_adjacent {
            let prev_size = raw_size((*prev).size);
            if prev_size + block_size >= final_size {
                let old_user_len = block_size - hdr;
                core::ptr::copy(user_from_header(block), user_from_header(prev), old_user_len);
                (*prev_prev).next = (*prev).next;
                engine.mem_available -= prev_size;
                // Same reasoning as the extend case above: set `ALLOC_BIT`
                // before calling `split_if_too_big` so it carries through
                // whether or not a tail actually gets split off, instead of
                // reassigning from `final_size` and losing a sub-HDR leftover.
                (*prev).size = (prev_size + block_size) | ALLOC_BIT;
                split_if_too_big(engine, prev, final_size);
                #[cfg(feature = "stats")]
                engine.stats.note_available(engine.mem_available);
                log::trace!("realloc: slid block backward to {:p}", prev);
                return Some(user_from_header(prev));
            }
        }

        // 3. Sandwich: absorb both neighbors at once.
        if next_adjacent && prev_adjacent {
            let prev_size = raw_size((*prev).size);
            let next_size = raw_size((*next_free).size);
            if prev_size + block_size + next_size >= final_size {
                let old_user_len = block_size - hdr;
                core::ptr::copy(user_from_header(block), user_from_header(prev), old_user_len);
                (*prev_prev).next = (*next_free).next;
                engine.mem_available -= prev_size + next_size;
                // Same reasoning as the extend case above.
                (*prev).size = (prev_size + block_size + next_size) | ALLOC_BIT;
                split_if_too_big(engine, prev, final_size);
                #[cfg(feature = "stats")]
                engine.stats.note_available(engine.mem_available);
                log::trace!("realloc: merged both neighbors into block at {:p}", prev);
                return Some(user_from_header(prev));
            }
        }

        // 4. Copy fallback: the original pointer is left untouched on failure.
        let new_ptr = alloc(engine, preferred, user_size)?;
        let old_user_len = block_size - hdr;
        let copy_len = core::cmp::min(old_user_len, final_size - hdr);
        core::ptr::copy_nonoverlapping(user_from_header(block), new_ptr, copy_len);
        free(engine, user_from_header(block));
        log::trace!("realloc: copy-fallback to {:p}", new_ptr);
        Some(new_ptr)
    }
}

/// The `*pp`-updating safe variant (spec.md §4.7 "Safe variant").
///
/// Rejects a null `pp`. On success, `*pp` is updated to the new pointer. On
/// `size == 0`, frees `*pp` and sets it to null, returning success. On
/// failure, `*pp` is left untouched.
pub(crate) fn realloc_safe(
    engine: &mut Engine,
    preferred: Option<(usize, usize)>,
    pp: *mut *mut u8,
    size: usize,
) -> bool {
    if pp.is_null() {
        return false;
    }
    unsafe {
        if size == 0 {
            free(engine, *pp);
            *pp = core::ptr::null_mut();
            return true;
        }
        match realloc(engine, preferred, *pp, size) {
            Some(new_ptr) => {
                *pp = new_ptr;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_alloc::{alloc, free};
    use crate::instance::Engine;
    use crate::region::{assign_memory, Region};
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    struct Backing {
        ptr: *mut u8,
        layout: Layout,
    }

    impl Backing {
        fn new(len: usize) -> Self {
            let layout = Layout::from_size_align(len, crate::layout::ALIGN).unwrap();
            let ptr = unsafe { alloc_zeroed(layout) };
            Self { ptr, layout }
        }
    }

    impl Drop for Backing {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }

    fn engine_with_region(len: usize) -> (Engine, Backing) {
        let backing = Backing::new(len);
        let mut engine = Engine::empty();
        let region = Region::new(backing.ptr, backing.layout.size());
        assign_memory(&mut engine, core::slice::from_ref(&region));
        (engine, backing)
    }

    #[test]
    fn realloc_same_final_size_returns_same_pointer() {
        let (mut engine, _backing) = engine_with_region(128);
        let p = alloc(&mut engine, None, 8).unwrap();
        let q = realloc(&mut engine, None, p, 8).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn realloc_null_with_size_allocates() {
        let (mut engine, _backing) = engine_with_region(128);
        let p = realloc(&mut engine, None, core::ptr::null_mut(), 8);
        assert!(p.is_some());
    }

    #[test]
    fn realloc_null_with_zero_returns_none() {
        let (mut engine, _backing) = engine_with_region(128);
        assert!(realloc(&mut engine, None, core::ptr::null_mut(), 0).is_none());
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_none() {
        let (mut engine, _backing) = engine_with_region(128);
        let initial = engine.mem_available;
        let p = alloc(&mut engine, None, 8).unwrap();
        assert!(realloc(&mut engine, None, p, 0).is_none());
        assert_eq!(engine.mem_available, initial);
    }

    #[test]
    #[cfg(feature = "stats")]
    fn realloc_slide_backward_does_not_double_count_as_a_fresh_alloc() {
        let (mut engine, _backing) = engine_with_region(256);
        engine.stats.on_init(engine.mem_available);
        let hdr = Header::size_of_header();

        // `d` stays allocated so `c`'s free block can't merge with the rest
        // of the region -- without that anchor, extending forward into `c`
        // alone would satisfy the grow and this test would never reach the
        // backward-slide path it means to exercise (spec.md §4.7 tries
        // extend before slide).
        let a = alloc(&mut engine, None, 8).unwrap();
        let b = alloc(&mut engine, None, 4).unwrap();
        let c = alloc(&mut engine, None, 4).unwrap();
        let d = alloc(&mut engine, None, 16).unwrap();
        free(&mut engine, a);
        free(&mut engine, c);

        let before = engine.stats.snapshot(engine.mem_available);
        let grown = realloc(&mut engine, None, b, 12 + hdr).unwrap();
        assert_eq!(grown, a, "this grow should take the backward-slide path");

        // Sliding `b` backward into freed `a` is a net allocation that never
        // goes through `core_alloc::alloc`, so `alloc_count` must not move,
        // while the historical floor can only ever stay the same or drop.
        let after = engine.stats.snapshot(engine.mem_available);
        assert_eq!(after.alloc_count, before.alloc_count);
        assert!(after.min_ever_available_bytes <= before.min_ever_available_bytes);
        free(&mut engine, d);
    }

    #[test]
    fn realloc_preserves_content_on_copy_fallback() {
        let (mut engine, _backing) = engine_with_region(1024);
        let a = alloc(&mut engine, None, 8).unwrap();
        unsafe {
            core::ptr::write_bytes(a, 0xAB, 8);
        }
        let b = alloc(&mut engine, None, 8).unwrap();
        let _ = b;
        // Shrinking `a` away and growing far past any in-place capacity
        // forces the copy-fallback path.
        let grown = realloc(&mut engine, None, a, 200).unwrap();
        unsafe {
            for i in 0..8 {
                assert_eq!(*grown.add(i), 0xAB);
            }
        }
        free(&mut engine, grown);
        free(&mut engine, b);
    }

    /// Regression test: the extend-in-place path merges `block` with its
    /// trailing free neighbor *before* calling `split_if_too_big`, which may
    /// decline to split off a leftover slack smaller than `HDR` and leave the
    /// merged total oversized (spec.md §4.4). That oversized total must
    /// survive unchanged afterward instead of being clobbered down to
    /// `final_size`, or the slack leaks outside both the allocated block and
    /// the free list.
    #[test]
    fn realloc_extend_preserves_undersized_slack_instead_of_leaking_it() {
        let (mut engine, _backing) = engine_with_region(256);
        let hdr = Header::size_of_header();
        let initial_available = engine.mem_available;

        let a = alloc(&mut engine, None, 8).unwrap();
        let b = alloc(&mut engine, None, 4).unwrap();
        let c = alloc(&mut engine, None, 4).unwrap();
        let d = alloc(&mut engine, None, 16).unwrap();
        free(&mut engine, c); // `c` becomes `b`'s trailing free neighbor.

        let b_block_size = 4 + hdr;
        let c_block_size = 4 + hdr;
        let combined = b_block_size + c_block_size;
        let new_user_size = hdr + 4;
        let final_size = crate::layout::align_up(new_user_size, crate::layout::ALIGN) + hdr;
        let slack = combined - final_size;
        assert!(slack > 0 && slack < hdr, "test setup must land in the undersized-slack band");

        let grown = realloc(&mut engine, None, b, new_user_size).expect("extend should succeed");
        assert_eq!(grown, b, "extending in place must not move the block");

        unsafe {
            let block = header_from_user(grown);
            assert_eq!(
                raw_size((*block).size),
                combined,
                "the undersized slack must stay part of the allocated block"
            );
            assert!((*block).size & ALLOC_BIT != 0);
        }

        free(&mut engine, a);
        free(&mut engine, grown);
        free(&mut engine, d);
        assert_eq!(
            engine.mem_available, initial_available,
            "freeing everything must restore full availability, with no leaked slack"
        );
    }
}
