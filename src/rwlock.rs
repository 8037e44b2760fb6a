//! RwSpinlock - lock-free arbitration for concurrent readers and one writer
//!
//! A single atomic word encodes the lock state: `0` = unlocked, `n > 0` =
//! `n` active readers, `-1` = writer. Contenders never block in the kernel;
//! they retry the CAS with capped exponential backoff, yielding the CPU
//! 1, 2, 4, ... up to 1024 times between attempts.
//!
//! The word and the payload live on separate cache lines so reader spinning
//! does not invalidate the writer's line.
//!
//! # Memory ordering
//! - acquisition CAS: `Acquire` on success, `Relaxed` on failure
//! - reader release: `fetch_sub(1, Release)`
//! - writer release: `store(0, Release)`
//!
//! A writer's payload store therefore happens-before any subsequent reader's
//! payload load, and reader loads happen-before the next writer's store.

use crate::flat::Flat;
use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicI32, Ordering};

/// Lock word value with no readers and no writer
const UNLOCKED: i32 = 0;

/// Lock word value while the writer holds the lock
const WRITER: i32 = -1;

/// Upper bound on yields per backoff round
const BACKOFF_CAP: i32 = 1024;

/// Ensures the wrapped value is on its own cache line
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// Capped exponential yield backoff between CAS attempts
struct Backoff {
    yields: i32,
}

impl Backoff {
    #[inline]
    fn new() -> Self {
        Self { yields: 1 }
    }

    #[inline]
    fn snooze(&mut self) {
        for _ in 0..self.yields {
            std::thread::yield_now();
        }
        self.yields = (self.yields * 2).min(BACKOFF_CAP);
    }
}

/// Readers/single-writer spinlock colocated with its payload
///
/// The layout is `#[repr(C)]` with payload first, then the lock word, each
/// on its own cache line, so an instance can live inside a shared memory
/// mapping and be driven from several processes. All-zero bytes are a valid
/// instance: unlocked, payload zeroed.
#[repr(C)]
pub struct RwSpinlock<T> {
    payload: CacheAligned<UnsafeCell<T>>,
    state: CacheAligned<AtomicI32>,
}

// SAFETY: the lock word serializes all payload access; readers only share
// `&T` while the writer is excluded. Same bounds as std's RwLock.
unsafe impl<T: Send> Send for RwSpinlock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinlock<T> {}

impl<T: Flat> RwSpinlock<T> {
    /// Create an unlocked lock holding `initial`
    pub const fn new(initial: T) -> Self {
        Self {
            payload: CacheAligned(UnsafeCell::new(initial)),
            state: CacheAligned(AtomicI32::new(UNLOCKED)),
        }
    }

    /// Initialize a lock in place
    ///
    /// Intended for instances living inside a shared memory mapping. A
    /// freshly created (kernel-zeroed) mapping is already a valid unlocked
    /// lock over a zeroed payload, so this is only needed for a non-zero
    /// initial value.
    ///
    /// # Safety
    /// - `ptr` must be valid for writes and 64-byte aligned
    /// - no other process may hold or contend the lock during init
    pub unsafe fn init_at(ptr: *mut Self, initial: T) {
        (*ptr).payload.0 = UnsafeCell::new(initial);
        (*ptr).state.0 = AtomicI32::new(UNLOCKED);
    }

    /// Borrow a lock placed in raw memory
    ///
    /// # Safety
    /// - `ptr` must point to a valid instance (via [`RwSpinlock::init_at`]
    ///   or all-zero bytes) that outlives the returned reference
    /// - `ptr` must be 64-byte aligned
    pub unsafe fn from_raw<'a>(ptr: *const Self) -> &'a Self {
        &*ptr
    }

    /// Acquire a reader slot, spinning while a writer holds the lock
    ///
    /// The slot is held until the returned guard drops, so the borrowed
    /// payload cannot be torn by a writer regardless of its size.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut backoff = Backoff::new();
        loop {
            let s = self.state.0.load(Ordering::Relaxed);
            if s >= 0
                && self
                    .state
                    .0
                    .compare_exchange_weak(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return ReadGuard { lock: self };
            }
            backoff.snooze();
        }
    }

    /// Copy the payload out under a reader slot
    #[inline]
    pub fn load(&self) -> T {
        *self.read()
    }

    /// Replace the payload, spinning until all readers leave
    ///
    /// The writer transition only happens from the fully unlocked state.
    pub fn write(&self, value: T) {
        let mut backoff = Backoff::new();
        while self
            .state
            .0
            .compare_exchange_weak(UNLOCKED, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }

        unsafe {
            *self.payload.0.get() = value;
        }

        self.state.0.store(UNLOCKED, Ordering::Release);
    }
}

/// RAII reader slot; payload is borrowable while this is alive
pub struct ReadGuard<'a, T> {
    lock: &'a RwSpinlock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Writers are excluded while the reader count is positive
        unsafe { &*self.lock.payload.0.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.0.fetch_sub(1, Ordering::Release);
    }
}
