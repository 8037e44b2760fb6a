//! Low-level POSIX shared memory operations
//!
//! A [`ShmMapping`] is one named object under `/dev/shm`, sized exactly once
//! at creation and mapped read-write into this process. Dropping the handle
//! unmaps and closes it but never removes the name; the object stays visible
//! to other processes until [`ShmMapping::unlink`] is called explicitly.

use crate::error::{FlatShmError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;

/// Directory where the kernel exposes POSIX shm objects
const SHM_DIR: &str = "/dev/shm/";

/// POSIX shm names are limited to NAME_MAX, one char of which is the
/// leading slash added below
const MAX_NAME_LEN: usize = 254;

/// Handle to a mapped POSIX shared memory object
pub struct ShmMapping {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    path: String,
    created: bool,
}

// SAFETY: ShmMapping is a plain byte mapping plus an owned fd; both can move
// between threads. Concurrent access to the mapped bytes is synchronized by
// the layers above (RwSpinlock), not by this handle.
unsafe impl Send for ShmMapping {}
unsafe impl Sync for ShmMapping {}

impl ShmMapping {
    /// Open or create a named shared memory object sized to `size` bytes
    ///
    /// If the name already exists the live object is attached and resized;
    /// its contents are preserved. Fresh objects are zero-filled by the
    /// kernel. The object is created world read/write (0666) so unrelated
    /// processes can attach.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = validate_name(name)?;

        // Try to create exclusively first, fall back to attaching if it
        // already exists
        let mode = Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH | Mode::WOTH;
        let (fd, created) = match shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            mode,
        ) {
            Ok(fd) => (fd, true),
            Err(_) => {
                let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(
                    |e| FlatShmError::ShmOpen {
                        name: name.to_string(),
                        source: e.into(),
                    },
                )?;
                (fd, false)
            }
        };

        ftruncate(&fd, size as u64).map_err(|e| FlatShmError::ShmResize {
            name: name.to_string(),
            source: e.into(),
        })?;

        let mapping = Self::map(fd, size, name, created)?;
        tracing::debug!(name = %name, size, created, "Opened shared memory mapping");
        Ok(mapping)
    }

    /// Attach to an existing shared memory object, taking its current size
    ///
    /// Fails if the name does not exist.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = validate_name(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            FlatShmError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = fstat(&fd).map_err(|e| FlatShmError::ShmStat {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;

        let mapping = Self::map(fd, size, name, false)?;
        tracing::debug!(name = %name, size, "Attached shared memory mapping");
        Ok(mapping)
    }

    fn map(fd: OwnedFd, size: usize, name: &str, created: bool) -> Result<Self> {
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(|e| FlatShmError::ShmMap {
                name: name.to_string(),
                source: e.into(),
            })?
        };

        let addr = NonNull::new(addr.cast::<u8>()).expect("mmap returned null");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            path: format!("{}{}", SHM_DIR, name),
            created,
        })
    }

    /// Get raw pointer to the mapped bytes
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Get size of the mapping in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the object name
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the filesystem path of the object under `/dev/shm`
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if this handle created the object (vs. attached to a live one)
    #[inline(always)]
    pub fn created(&self) -> bool {
        self.created
    }

    /// Remove a named object from the shm namespace
    ///
    /// Live mappings in this or other processes stay valid; the backing
    /// memory is freed once the last one unmaps.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = validate_name(name)?;
        shm_unlink(c_name.as_c_str()).map_err(|e| FlatShmError::ShmUnlink {
            name: name.to_string(),
            source: e.into(),
        })?;
        tracing::debug!(name = %name, "Unlinked shared memory object");
        Ok(())
    }
}

impl Drop for ShmMapping {
    fn drop(&mut self) {
        // Unmap; the fd closes when OwnedFd drops. The name is left in
        // place for other processes.
        if let Err(e) = unsafe { munmap(self.addr.as_ptr().cast(), self.size) } {
            tracing::error!(name = %self.name, error = %e, "Failed to unmap shared memory");
        }
    }
}

/// Check the name is usable as a POSIX shm object name and prepend the slash
fn validate_name(name: &str) -> Result<CString> {
    if name.is_empty() {
        return Err(FlatShmError::InvalidName {
            name: name.to_string(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FlatShmError::NameTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    CString::new(format!("/{}", name)).map_err(|_| FlatShmError::InvalidName {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("{}_{}", name, std::process::id())
    }

    #[test]
    fn test_create_and_open() {
        let name = unique("flatshm_test_mapping");
        let size = 4096;

        let shm1 = ShmMapping::create(&name, size).unwrap();
        assert!(shm1.created());
        assert_eq!(shm1.size(), size);
        assert_eq!(shm1.path(), format!("/dev/shm/{}", name));

        // Write some data
        unsafe {
            std::ptr::write(shm1.as_ptr(), 42u8);
        }

        // Attach from another handle
        let shm2 = ShmMapping::open(&name).unwrap();
        assert!(!shm2.created());
        assert_eq!(shm2.size(), size);

        let val = unsafe { std::ptr::read(shm2.as_ptr()) };
        assert_eq!(val, 42u8);

        drop(shm2);
        drop(shm1);
        ShmMapping::unlink(&name).unwrap();
    }

    #[test]
    fn test_create_attaches_to_existing() {
        let name = unique("flatshm_test_reattach");

        let shm1 = ShmMapping::create(&name, 64).unwrap();
        unsafe {
            std::ptr::write(shm1.as_ptr(), 7u8);
        }

        // Second create attaches instead of clobbering
        let shm2 = ShmMapping::create(&name, 64).unwrap();
        assert!(!shm2.created());
        let val = unsafe { std::ptr::read(shm2.as_ptr()) };
        assert_eq!(val, 7u8);

        drop(shm1);
        drop(shm2);
        ShmMapping::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_missing_fails() {
        let name = unique("flatshm_test_missing");
        assert!(ShmMapping::open(&name).is_err());
    }

    #[test]
    fn test_name_validation() {
        assert!(matches!(
            ShmMapping::create("", 16),
            Err(FlatShmError::InvalidName { .. })
        ));

        let long = "x".repeat(300);
        assert!(matches!(
            ShmMapping::create(&long, 16),
            Err(FlatShmError::NameTooLong { .. })
        ));
    }

    #[test]
    fn test_unlink_removes_name() {
        let name = unique("flatshm_test_unlink");

        let shm = ShmMapping::create(&name, 16).unwrap();
        ShmMapping::unlink(&name).unwrap();

        // The name is gone even while the mapping is still live
        assert!(ShmMapping::open(&name).is_err());
        drop(shm);
    }
}
