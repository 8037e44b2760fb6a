//! Typed shared memory region holding a single flat payload
//!
//! [`SharedMemory<T>`] sizes a [`ShmMapping`] to exactly one `T` and exposes
//! whole-payload reads and writes. Access is deliberately unsynchronized:
//! this layer is the raw substrate, and concurrent producers/consumers wrap
//! the payload in [`RwSpinlock`](crate::RwSpinlock) instead.

use crate::error::{FlatShmError, Result};
use crate::flat::Flat;
use crate::shm::ShmMapping;
use std::marker::PhantomData;

/// A named shared memory region holding one `T`
///
/// The handle is move-only; dropping the last handle in a process unmaps the
/// region but leaves the name alive for other processes. Remove the name
/// with [`SharedMemory::unlink`] once every process is done with it.
pub struct SharedMemory<T: Flat> {
    shm: ShmMapping,
    _marker: PhantomData<T>,
}

impl<T: Flat> SharedMemory<T> {
    /// Open or create a region named `name` sized to one `T`
    ///
    /// Attaching to an existing object preserves its contents; a fresh
    /// object starts zeroed, which is a valid value for any flat payload.
    pub fn create(name: &str) -> Result<Self> {
        let size = payload_size::<T>()?;
        let shm = ShmMapping::create(name, size)?;
        Ok(Self {
            shm,
            _marker: PhantomData,
        })
    }

    /// Attach to an existing region, verifying it holds exactly one `T`
    pub fn open(name: &str) -> Result<Self> {
        let size = payload_size::<T>()?;
        let shm = ShmMapping::open(name)?;
        if shm.size() != size {
            return Err(FlatShmError::SizeMismatch {
                name: name.to_string(),
                expected: size,
                got: shm.size(),
            });
        }
        Ok(Self {
            shm,
            _marker: PhantomData,
        })
    }

    /// Copy `value` into the region
    ///
    /// No synchronization: a reader in another process can observe a torn
    /// payload. Wrap the payload in `RwSpinlock` when that matters.
    #[inline]
    pub fn write(&mut self, value: &T) {
        unsafe {
            std::ptr::copy_nonoverlapping(value, self.as_ptr(), 1);
        }
    }

    /// Copy the current payload out of the region
    #[inline]
    pub fn read(&self) -> T {
        unsafe { std::ptr::read(self.as_ptr()) }
    }

    /// Get a typed pointer to the payload
    ///
    /// The mapping is page-aligned, which satisfies any flat payload's
    /// alignment.
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut T {
        self.shm.as_ptr().cast::<T>()
    }

    /// Borrow the payload in place
    ///
    /// # Safety
    /// The caller must ensure no process writes the region for the lifetime
    /// of the returned reference.
    #[inline]
    pub unsafe fn as_ref(&self) -> &T {
        &*self.as_ptr()
    }

    /// Payload size in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Region name
    #[inline(always)]
    pub fn name(&self) -> &str {
        self.shm.name()
    }

    /// Filesystem path of the region under `/dev/shm`
    #[inline(always)]
    pub fn path(&self) -> &str {
        self.shm.path()
    }

    /// Check if this handle created the region
    #[inline(always)]
    pub fn created(&self) -> bool {
        self.shm.created()
    }

    /// Remove the region's name from the shm namespace
    pub fn unlink(name: &str) -> Result<()> {
        ShmMapping::unlink(name)
    }
}

fn payload_size<T: Flat>() -> Result<usize> {
    let size = std::mem::size_of::<T>();
    if size == 0 {
        return Err(FlatShmError::ZeroSizedPayload {
            type_name: std::any::type_name::<T>(),
        });
    }
    Ok(size)
}
