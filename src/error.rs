//! Internal failure causes (spec.md §7).
//!
//! The public facade never propagates these: every public entry point
//! collapses failure to the sentinel its C heritage expects (null, zero, or
//! `false`, see spec.md §7). These types exist so the *cause* of a sentinel
//! isn't silently lost before that collapse happens, and so `log` call sites
//! have something concrete to print.

/// Why [`crate::instance::Instance::assign_memory`] rejected its input or
/// returned `0`.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum InitError {
    /// The region sequence was empty.
    #[error("no regions supplied")]
    NoRegions,
    /// Regions were not strictly increasing / overlapped.
    #[error("regions are not disjoint and strictly increasing by address")]
    OverlappingRegions,
    /// `assign_memory` was already called once on this instance.
    #[error("instance already initialized")]
    AlreadyInitialized,
    /// The lock backend failed to construct.
    #[error("mutex creation failed")]
    LockCreationFailed,
    /// Every supplied region was too small to hold even one free block.
    #[error("no region was large enough to install")]
    AllRegionsTooSmall,
}

/// Why the lock backend failed to construct (spec.md §6.1 `mutex_create`).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
#[error("lock backend failed to initialize")]
pub struct LockError;
