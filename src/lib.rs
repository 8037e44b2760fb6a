//! flatshm - Typed shared memory IPC for flat payloads
//!
//! This library moves fixed-layout values between processes through named
//! POSIX shared memory, with a lock-free readers/writer word for in-place
//! coordination, kernel named semaphores for cross-process mutual
//! exclusion, and a background runner for decoupled consumption.
//!
//! # Architecture
//!
//! - **[`Flat`]**: compile-time contract restricting payloads to types that
//!   are meaningful as raw bytes (any `#[repr(C)]` struct deriving `Pod`)
//! - **[`SharedMemory<T>`]**: a named region under `/dev/shm` holding
//!   exactly one payload, mapped read/write
//! - **[`RwSpinlock<T>`]**: payload plus arbitration word on separate cache
//!   lines; many readers or one writer, capped exponential backoff
//! - **[`NamedSemaphore`]**: kernel-named mutual exclusion with a
//!   scope-bound [`SemaphoreGuard`]
//! - **[`AsyncRunner`]**: one worker thread consuming counted triggers,
//!   with panics contained and reported to a diagnostic sink
//!
//! Unsynchronized regions carry single-word values or externally
//! coordinated data; place an [`RwSpinlock<T>`] inside a region (a zeroed
//! mapping is already a valid unlocked lock) when readers and a writer
//! race on the same payload.
//!
//! # Example
//!
//! ```
//! use flatshm::SharedMemory;
//!
//! # fn main() -> flatshm::Result<()> {
//! let name = format!("flatshm_doc_{}", std::process::id());
//!
//! let mut region = SharedMemory::<i32>::create(&name)?;
//! region.write(&7);
//!
//! let reader = SharedMemory::<i32>::open(&name)?;
//! assert_eq!(reader.read(), 7);
//!
//! drop(reader);
//! drop(region);
//! SharedMemory::<i32>::unlink(&name)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod flat;
pub mod shm;
pub mod region;
pub mod rwlock;
pub mod semaphore;
pub mod runner;

pub use error::{FlatShmError, Result};
pub use flat::{Flat, Pod, Zeroable};
pub use region::SharedMemory;
pub use runner::AsyncRunner;
pub use rwlock::{CacheAligned, ReadGuard, RwSpinlock};
pub use semaphore::{NamedSemaphore, SemaphoreGuard};
pub use shm::ShmMapping;
