//! Per-instance state and the public-facing `Instance` wrapper (spec.md §3.1,
//! §5, §6.2).
//!
//! `Engine` is the raw, `&mut`-manipulated allocator state: the embedded
//! start block, the end-sentinel chain, the aggregate free-byte counter, and
//! (optionally) statistics. `Instance` wraps an `Engine` behind a
//! [`LockCell`], exactly generalizing the teacher's
//! `spin::Mutex<RawAllocator<N>>` field to an abstract lock backend plus
//! donated (rather than const-sized) regions.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::InitError;
use crate::layout::Header;
use crate::mutex::{DefaultLock, LockCell};
use crate::region::{self, Region};
use crate::{core_alloc, realloc as realloc_mod};

#[cfg(feature = "stats")]
use crate::stats::{Stats, StatsInner};

/// The mutable allocator state manipulated under an instance's lock.
///
/// Public only so [`Instance`] can be named as a concrete type (e.g.
/// `Instance<NullLock<Engine>>`) from outside this crate; its fields stay
/// `pub(crate)` since nothing outside the free-list algorithms should touch
/// them directly.
pub struct Engine {
    /// Permanent list head. `size` is always `0`; `next` points at the
    /// lowest-address free block across all regions, or null.
    pub(crate) start: Header,
    /// The most-recently-installed region's end sentinel.
    pub(crate) end_block: *mut Header,
    /// Aggregate bytes currently free across all regions (I6).
    pub(crate) mem_available: usize,
    pub(crate) region_count: usize,
    #[cfg(feature = "stats")]
    pub(crate) stats: StatsInner,
}

// SAFETY: `Engine` is only ever reachable through a `LockCell`, whose
// implementations guarantee exclusive access for the duration of any
// operation that dereferences its raw pointers.
unsafe impl Send for Engine {}

impl Engine {
    pub(crate) const fn empty() -> Self {
        Self {
            start: Header {
                next: core::ptr::null_mut(),
                size: 0,
            },
            end_block: core::ptr::null_mut(),
            mem_available: 0,
            region_count: 0,
            #[cfg(feature = "stats")]
            stats: StatsInner::new(),
        }
    }
}

/// A complete allocator instance: free-list engine, lock, and lifecycle flag.
///
/// Create one as a `static` (the usual embedded pattern) or on the stack;
/// once [`Instance::assign_memory`] has succeeded, the instance must not be
/// moved, since its free list contains pointers into region memory that are
/// independent of the instance's own address, but the engine's embedded
/// start-block header is addressed by those same pointers' `next` chains.
pub struct Instance<L: LockCell<Engine> = DefaultLock<Engine>> {
    engine: L,
    initialized: AtomicBool,
}

impl Instance<DefaultLock<Engine>> {
    /// `const fn` constructor for a `static` instance using the feature-
    /// selected default lock backend -- the Rust equivalent of the teacher's
    /// `static ALLOCATOR: Allocator<N> = Allocator::new()` pattern (spec.md
    /// §9 "Global default instance"). Bypasses [`LockCell::try_new`], which
    /// cannot be `const` as a trait method.
    pub const fn new_static() -> Self {
        Self {
            engine: crate::mutex::default_lock_new(Engine::empty()),
            initialized: AtomicBool::new(false),
        }
    }
}

impl<L: LockCell<Engine>> Instance<L> {
    /// Construct a fresh, uninitialized instance.
    ///
    /// # Panics
    /// Panics if the lock backend fails to construct. Use
    /// [`Instance::try_new`] to handle that case explicitly.
    pub fn new() -> Self {
        Self::try_new().expect("lock backend failed to initialize")
    }

    /// Fallible counterpart to [`Instance::new`].
    pub fn try_new() -> Result<Self, InitError> {
        Ok(Self {
            engine: L::try_new(Engine::empty()).map_err(|_| InitError::LockCreationFailed)?,
            initialized: AtomicBool::new(false),
        })
    }

    /// Whether [`Instance::assign_memory`] has already succeeded on this
    /// instance (spec.md §3.3).
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Installs `regions` into this (uninitialized) instance (spec.md §4.2).
    ///
    /// Returns the number of regions actually installed, or `0` on total
    /// failure: empty/overlapping/descending regions, a prior
    /// `assign_memory` call, or every region being too small to host a block.
    /// This is the public facade's sentinel-collapsing form (spec.md §6.2,
    /// §7); see [`Instance::try_assign_memory`] for the cause behind a `0`.
    pub fn assign_memory(&self, regions: &[Region]) -> usize {
        self.try_assign_memory(regions).unwrap_or(0)
    }

    /// Fallible counterpart to [`Instance::assign_memory`] that keeps the
    /// [`InitError`] cause behind a rejection instead of collapsing it to `0`
    /// (spec.md §7's taxonomy is preserved here; only the public facade's
    /// sentinel-return entry point discards it, per the C heritage).
    pub fn try_assign_memory(&self, regions: &[Region]) -> Result<usize, InitError> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("assign_memory: instance already initialized");
            return Err(InitError::AlreadyInitialized);
        }
        if let Err(err) = region::validate(regions) {
            log::warn!("assign_memory: {err}");
            self.initialized.store(false, Ordering::Release);
            return Err(err);
        }

        let installed = self.engine.with_lock(|engine| region::assign_memory(engine, regions));

        if installed == 0 {
            log::warn!("assign_memory: every region was rejected as too small");
            self.initialized.store(false, Ordering::Release);
            return Err(InitError::AllRegionsTooSmall);
        }

        #[cfg(feature = "stats")]
        self.engine.with_lock(|engine| {
            let total = engine.mem_available;
            engine.stats.on_init(total);
        });

        Ok(installed)
    }

    /// Allocates `user_size` bytes, optionally restricted to `region`
    /// (spec.md §4.5, §6.2 `alloc`).
    pub fn alloc(&self, region: Option<&Region>, user_size: usize) -> Option<*mut u8> {
        if !self.is_initialized() {
            return None;
        }
        let preferred = region.map(|r| (r.start as usize, r.len));
        self.engine.with_lock(|engine| core_alloc::alloc(engine, preferred, user_size))
    }

    /// Like [`Instance::alloc`], but zero-fills the returned block (spec.md
    /// §6.2 `alloc_zeroed`).
    pub fn alloc_zeroed(&self, region: Option<&Region>, n_items: usize, item_size: usize) -> Option<*mut u8> {
        let total = n_items.checked_mul(item_size)?;
        let ptr = self.alloc(region, total)?;
        // SAFETY: `ptr` was just allocated with at least `total` usable bytes.
        unsafe { core::ptr::write_bytes(ptr, 0, total) };
        Some(ptr)
    }

    /// Reallocates `ptr` to `size` bytes (spec.md §4.7, §6.2 `realloc`).
    pub fn realloc(&self, region: Option<&Region>, ptr: *mut u8, size: usize) -> Option<*mut u8> {
        if !self.is_initialized() {
            return None;
        }
        let preferred = region.map(|r| (r.start as usize, r.len));
        self.engine
            .with_lock(|engine| realloc_mod::realloc(engine, preferred, ptr, size))
    }

    /// The `*pp`-updating safe variant of [`Instance::realloc`] (spec.md
    /// §4.7 "Safe variant", §6.2 `realloc_safe`).
    pub fn realloc_safe(&self, region: Option<&Region>, pp: *mut *mut u8, size: usize) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let preferred = region.map(|r| (r.start as usize, r.len));
        self.engine
            .with_lock(|engine| realloc_mod::realloc_safe(engine, preferred, pp, size))
    }

    /// Frees `ptr` (spec.md §4.6, §6.2 `free`). No-op if uninitialized, null,
    /// or invalid.
    pub fn free(&self, ptr: *mut u8) {
        if !self.is_initialized() {
            return;
        }
        self.engine.with_lock(|engine| core_alloc::free(engine, ptr));
    }

    /// Frees `*pp` and sets it to null (spec.md §6.2 `free_safe`).
    pub fn free_safe(&self, pp: *mut *mut u8) {
        if pp.is_null() {
            return;
        }
        // SAFETY: caller guarantees `pp` is a valid pointer to a pointer
        // previously handed out by this instance (or null).
        unsafe {
            self.free(*pp);
            *pp = core::ptr::null_mut();
        }
    }

    /// Returns the user-visible size of an allocated block, or `0` if `ptr`
    /// is null or not currently allocated (spec.md §6.2 `block_user_size`).
    pub fn block_user_size(&self, ptr: *mut u8) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        core_alloc::block_user_size(ptr)
    }

    /// Returns the aggregate bytes currently free across all of this
    /// instance's regions (spec.md I6 `mem_available_bytes`). `0` if
    /// uninitialized.
    pub fn available_bytes(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.engine.with_lock(|engine| engine.mem_available)
    }

    /// Returns a snapshot of this instance's usage statistics (spec.md §4.8,
    /// §6.2 `get_stats`).
    #[cfg(feature = "stats")]
    pub fn get_stats(&self) -> Stats {
        self.engine.with_lock(|engine| engine.stats.snapshot(engine.mem_available))
    }
}

impl<L: LockCell<Engine>> Default for Instance<L> {
    fn default() -> Self {
        Self::new()
    }
}
