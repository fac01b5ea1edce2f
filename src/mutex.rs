//! The abstract mutual-exclusion capability (spec.md §6.1 / §5).
//!
//! `spec.md` names four collaborator operations a host OS must provide:
//! `mutex_create`, `mutex_is_valid`, `mutex_acquire`, `mutex_release`. A
//! closure-scoped critical section is the idiomatic Rust shape for an
//! acquire/release pair -- it makes "forgot to release" unrepresentable --
//! so the four operations collapse to two trait methods here: fallible
//! construction, and `with_lock`, which acquires, runs the closure, and
//! releases even on unwind.
//!
//! The teacher crate hard-codes `spin::Mutex`; this crate keeps that as the
//! `os`-enabled backend but makes it one implementor of [`LockCell`] among
//! others, so that builds with the `os` feature disabled compile in a
//! zero-cost [`NullLock`] instead (spec.md §5: "otherwise the application
//! must externally serialize").

use crate::error::LockError;
use core::cell::UnsafeCell;

/// A mutual-exclusion cell around a `T`, abstracting the host mutex.
///
/// Implementations must guarantee that `with_lock` calls for a given cell
/// never execute concurrently -- this is the entire safety contract the rest
/// of the crate relies on to hand out `&mut T` from `&self`.
pub trait LockCell<T>: Sized {
    /// Construct a new cell. Mirrors `mutex_create`; may fail if the host
    /// backend's resources are exhausted.
    fn try_new(value: T) -> Result<Self, LockError>;

    /// Run `f` with exclusive access to the protected value.
    fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

/// `spin`-backed lock, used when the `os` feature is enabled.
///
/// This is exactly the teacher's `spin::Mutex<RawAllocator<N>>` pattern,
/// generalized over the protected type.
impl<T> LockCell<T> for spin::Mutex<T> {
    fn try_new(value: T) -> Result<Self, LockError> {
        Ok(spin::Mutex::new(value))
    }

    fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

/// A no-op lock for builds without the `os` feature.
///
/// The caller is responsible for external serialization, per spec.md §5; this
/// type only exists to give [`crate::instance::Instance`] a uniform interior
/// mutability story in both configurations.
pub struct NullLock<T>(UnsafeCell<T>);

// SAFETY: `NullLock` grants `&mut T` access from `&self` without any actual
// synchronization. This is sound only under the spec.md §5 contract that the
// application serializes access itself when `os` is disabled; that contract
// is documented on every public entry point reachable without an OS lock.
unsafe impl<T> Sync for NullLock<T> {}

impl<T> NullLock<T> {
    /// `const fn` constructor, used for `static` instances where the `os`
    /// feature is disabled (trait methods cannot be `const`, so the global
    /// default instance's initializer bypasses [`LockCell::try_new`]).
    pub const fn new_const(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }
}

impl<T> LockCell<T> for NullLock<T> {
    fn try_new(value: T) -> Result<Self, LockError> {
        Ok(Self(UnsafeCell::new(value)))
    }

    fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: see the `unsafe impl Sync` comment above.
        f(unsafe { &mut *self.0.get() })
    }
}

/// The lock backend selected by the `os` feature.
#[cfg(feature = "os")]
pub type DefaultLock<T> = spin::Mutex<T>;
#[cfg(not(feature = "os"))]
pub type DefaultLock<T> = NullLock<T>;

/// `const fn` constructor for [`DefaultLock`], used to initialize the crate's
/// `static` default instance without going through the non-`const`
/// [`LockCell::try_new`].
#[cfg(feature = "os")]
pub(crate) const fn default_lock_new<T>(value: T) -> DefaultLock<T> {
    spin::Mutex::new(value)
}
#[cfg(not(feature = "os"))]
pub(crate) const fn default_lock_new<T>(value: T) -> DefaultLock<T> {
    NullLock::new_const(value)
}
