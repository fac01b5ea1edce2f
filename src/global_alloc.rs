//! An optional [`GlobalAlloc`] shim over the public facade, gated behind the
//! `global-alloc` feature.
//!
//! `spec.md` targets a C-style facade (explicit instance pointers, sentinel
//! return values), not `GlobalAlloc` -- the teacher crate (`emballoc`) is the
//! other way around: it exists solely to be a `#[global_allocator]`. This
//! module is grounded directly on the teacher's own `Allocator::align_to`,
//! `alloc`, and `dealloc` implementations, adapted to call through
//! [`crate::Instance`] instead of a private `spin`-locked raw allocator.
//!
//! One divergence from the teacher is load-bearing: the teacher's own
//! `RawAllocator::free` tolerates any pointer inside a live entry's memory,
//! so its `dealloc` can forward the (possibly shifted-for-alignment) pointer
//! unchanged. This crate's [`crate::core_alloc::free`] is strict -- it
//! requires the exact user pointer `alloc` returned, per spec.md §4.6 -- so
//! an over-aligned request's shift has to be undone before `free` ever sees
//! it. This shim stashes the true block pointer just behind the aligned
//! pointer it hands out, the way most allocator shims over a base allocator
//! that doesn't track alignment handle this.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr;

use crate::instance::Engine;
use crate::mutex::DefaultLock;
use crate::Instance;

/// Aligns `ptr` upward to `align` (`align` must be a power of two and `ptr`
/// must point into a region large enough that the aligned pointer is still
/// in bounds).
///
/// # Safety
/// Same contract as the teacher's `Allocator::align_to`: `align` is a power
/// of two, and advancing `ptr` by up to `align - 1` bytes must stay in
/// bounds of the same allocation.
unsafe fn align_to(ptr: *mut u8, align: usize) -> *mut u8 {
    let addr = ptr as usize;
    let mismatch = addr & (align - 1);
    let offset = if mismatch != 0 { align - mismatch } else { 0 };
    // SAFETY: forwarded from the caller's contract above.
    unsafe { ptr.add(offset) }
}

/// A [`GlobalAlloc`] implementation delegating to a [`crate::Instance`].
///
/// Unlike the teacher's `Allocator<const N: usize>`, this type does not own
/// its backing memory: the wrapped instance must already have had
/// [`crate::Instance::assign_memory`] called on it (typically via the crate's
/// shorthand facade and the process-wide default instance).
pub struct GlobalAllocShim<'a> {
    instance: &'a Instance<DefaultLock<Engine>>,
}

impl<'a> GlobalAllocShim<'a> {
    pub const fn new(instance: &'a Instance<DefaultLock<Engine>>) -> Self {
        Self { instance }
    }
}

// SAFETY: the safety contract of `GlobalAlloc` is that this impl must not
// panic and must honor `Layout`'s size/align requirements; both are upheld
// exactly as in the teacher's impl (over-allocate for alignments above the
// engine's native `ALIGN`, then shift the returned pointer into place), plus
// the block-pointer stash described above so `dealloc` can recover the exact
// pointer `free` requires.
unsafe impl GlobalAlloc for GlobalAllocShim<'_> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align();
        if align <= crate::layout::ALIGN {
            return match self.instance.alloc(None, layout.size()) {
                Some(memory) => memory,
                None => ptr::null_mut(),
            };
        }

        // Over-aligned request: allocate room for the worst-case alignment
        // shift plus one stash word, then record the real block pointer just
        // behind the aligned pointer we hand out.
        let stash = size_of::<usize>();
        let size = layout.size() + align + stash;
        match self.instance.alloc(None, size) {
            Some(block) => {
                // SAFETY: `align` is a power of two per `Layout`'s contract,
                // and `size` reserves `align` bytes of slack plus `stash`
                // bytes ahead of the aligned pointer, so both the shift and
                // the stash write land within the same allocation.
                unsafe {
                    let user = align_to(block.add(stash), align);
                    (user.sub(stash) as *mut usize).write(block as usize);
                    user
                }
            }
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let align = layout.align();
        if align <= crate::layout::ALIGN {
            self.instance.free(ptr);
            return;
        }
        // SAFETY: `ptr` is a pointer this shim's `alloc` returned for an
        // over-aligned layout, so the stash word sits exactly `stash` bytes
        // behind it.
        let block = unsafe { *(ptr.sub(size_of::<usize>()) as *mut usize) as *mut u8 };
        self.instance.free(block);
    }
}
