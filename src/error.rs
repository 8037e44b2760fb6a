//! Error types for flatshm

use std::io;
use thiserror::Error;

/// Result type for flatshm operations
pub type Result<T> = std::result::Result<T, FlatShmError>;

/// Errors that can occur in flatshm operations
#[derive(Debug, Error)]
pub enum FlatShmError {
    /// Failed to open or create a shared memory object
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to size a shared memory object
    #[error("Failed to resize shared memory '{name}': {source}")]
    ShmResize {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map a shared memory object
    #[error("Failed to map shared memory '{name}': {source}")]
    ShmMap {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to stat a shared memory object
    #[error("Failed to stat shared memory '{name}': {source}")]
    ShmStat {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to unlink a shared memory object
    #[error("Failed to unlink shared memory '{name}': {source}")]
    ShmUnlink {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Existing object does not hold the expected payload size
    #[error("Shared memory '{name}' size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Name too long for the shm namespace
    #[error("Shared memory name too long: max {max} chars, got {got}")]
    NameTooLong { max: usize, got: usize },

    /// Name is empty or contains an interior NUL byte
    #[error("Invalid shared memory name '{name}'")]
    InvalidName { name: String },

    /// Payload type has zero size
    #[error("Payload type '{type_name}' has zero size")]
    ZeroSizedPayload { type_name: &'static str },

    /// Failed to create a named semaphore
    #[error("Failed to create semaphore '{name}': {source}")]
    SemCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open a named semaphore
    #[error("Failed to open semaphore '{name}': {source}")]
    SemOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to wait on a named semaphore
    #[error("Failed to wait on semaphore '{name}': {source}")]
    SemWait {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to post a named semaphore
    #[error("Failed to post semaphore '{name}': {source}")]
    SemPost {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to read the value of a named semaphore
    #[error("Failed to read value of semaphore '{name}': {source}")]
    SemValue {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to unlink a named semaphore
    #[error("Failed to unlink semaphore '{name}': {source}")]
    SemUnlink {
        name: String,
        #[source]
        source: io::Error,
    },
}
