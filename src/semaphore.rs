//! POSIX named semaphores with a scope-bound guard
//!
//! [`NamedSemaphore`] wraps a kernel semaphore visible to every process
//! under its global name. The creating instance owns the name and unlinks
//! it on drop; later attachers (via [`NamedSemaphore::open`]) only close
//! their handle. [`SemaphoreGuard`] ties one wait/post pair to a lexical
//! scope so a panic or early return cannot leak the token.

use crate::error::{FlatShmError, Result};
use std::ffi::CString;
use std::io;
use std::os::raw::c_int;

/// Linux backs a named semaphore with a `sem.<name>` file under `/dev/shm`,
/// which costs four chars of the NAME_MAX budget
const MAX_NAME_LEN: usize = 251;

/// Handle to a kernel named semaphore
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
    created: bool,
}

// SAFETY: sem_t operations are async-signal-safe kernel calls; the raw
// pointer is only ever passed back to them.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a semaphore named `name` with the given initial token count
    ///
    /// Creation is exclusive: if the name already exists in the kernel this
    /// fails, which catches stale names left behind by a crashed process.
    /// The created name is world-readable (0644). This instance becomes the
    /// creator and removes the name when dropped.
    pub fn create(name: &str, initial: u32) -> Result<Self> {
        let c_name = sem_name(name)?;

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o644 as libc::mode_t,
                initial,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(FlatShmError::SemCreate {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        tracing::debug!(name = %name, initial, "Created named semaphore");
        Ok(Self {
            sem,
            name: name.to_string(),
            created: true,
        })
    }

    /// Attach to an existing semaphore
    ///
    /// The attached handle never unlinks the name; that stays the
    /// creator's job.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = sem_name(name)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(FlatShmError::SemOpen {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        tracing::debug!(name = %name, "Attached named semaphore");
        Ok(Self {
            sem,
            name: name.to_string(),
            created: false,
        })
    }

    /// Block until a token is available, then take it
    ///
    /// Signal interruptions are retried.
    pub fn wait(&self) -> Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(FlatShmError::SemWait {
                    name: self.name.clone(),
                    source: err,
                });
            }
        }
    }

    /// Take a token if one is available without blocking
    ///
    /// Returns `Ok(false)` when the count is zero.
    pub fn try_wait(&self) -> Result<bool> {
        if unsafe { libc::sem_trywait(self.sem) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            Ok(false)
        } else {
            Err(FlatShmError::SemWait {
                name: self.name.clone(),
                source: err,
            })
        }
    }

    /// Release one token, waking a blocked waiter if there is one
    pub fn post(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(FlatShmError::SemPost {
                name: self.name.clone(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Snapshot of the current token count
    pub fn value(&self) -> Result<i32> {
        let mut val: c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem, &mut val) } != 0 {
            return Err(FlatShmError::SemValue {
                name: self.name.clone(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(val)
    }

    /// Wait for a token and hold it for the guard's scope
    ///
    /// The wait outcome is reported by [`SemaphoreGuard::is_locked`]; a
    /// failed wait yields an unlocked guard that will not post on drop.
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let locked = match self.wait() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(name = %self.name, error = %e, "Semaphore guard failed to acquire");
                false
            }
        };
        SemaphoreGuard { sem: self, locked }
    }

    /// Semaphore name
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle created the semaphore (vs. attached)
    #[inline(always)]
    pub fn created(&self) -> bool {
        self.created
    }

    /// Remove a semaphore name from the kernel namespace
    ///
    /// Handles holding the semaphore open stay valid; the kernel object is
    /// destroyed once the last one closes.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = sem_name(name)?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            return Err(FlatShmError::SemUnlink {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if unsafe { libc::sem_close(self.sem) } != 0 {
            tracing::error!(
                name = %self.name,
                error = %io::Error::last_os_error(),
                "Failed to close semaphore"
            );
        }
        if self.created {
            if let Err(e) = Self::unlink(&self.name) {
                tracing::error!(name = %self.name, error = %e, "Failed to unlink semaphore");
            }
        }
    }
}

/// Scope-bound token: taken on [`NamedSemaphore::acquire`], returned on drop
pub struct SemaphoreGuard<'a> {
    sem: &'a NamedSemaphore,
    locked: bool,
}

impl SemaphoreGuard<'_> {
    /// Check whether this guard actually holds a token
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if self.locked {
            if let Err(e) = self.sem.post() {
                tracing::error!(name = %self.sem.name(), error = %e, "Semaphore guard failed to release");
            }
        }
    }
}

/// Check the name is usable as a POSIX semaphore name and prepend the slash
fn sem_name(name: &str) -> Result<CString> {
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
