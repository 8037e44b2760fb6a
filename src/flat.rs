//! Flat payload contract
//!
//! Shared memory transports raw bytes between address spaces, so anything
//! stored there must be meaningful as bytes alone: fixed size, no pointers,
//! no heap ownership, no drop glue. [`Flat`] captures that as a trait bound
//! checked at compile time, so misuse is unrepresentable rather than a
//! runtime failure.
//!
//! The bound is [`bytemuck::Pod`]: any `#[repr(C)]` struct of plain data
//! can opt in by deriving it. `Pod` also rules out padding bytes and types
//! with invalid bit patterns, which keeps reinterpreting mapped bytes as a
//! payload reference sound.

pub use bytemuck::{Pod, Zeroable};

/// Marker for types that can live in shared memory
///
/// Implemented automatically for every [`Pod`] type; fixed-size primitives,
/// arrays of them, and `#[repr(C)]` structs composed of those all qualify:
///
/// ```
/// use flatshm::{Flat, Pod, Zeroable};
///
/// #[repr(C)]
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// struct Telemetry {
///     sequence: u64,
///     position: [f64; 3],
///     flags: u32,
///     _pad: u32,
/// }
///
/// fn assert_flat<T: Flat>() {}
/// assert_flat::<Telemetry>();
/// ```
///
/// Heap-owning types are rejected at compile time:
///
/// ```compile_fail
/// fn assert_flat<T: flatshm::Flat>() {}
/// assert_flat::<String>();
/// ```
pub trait Flat: Pod {}

impl<T: Pod> Flat for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_flat<T: Flat>() {}

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Inner {
        values: [i32; 10],
        scale: f64,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Outer {
        inner: Inner,
        label: [u8; 50],
        count: u16,
        _pad: [u8; 12],
    }

    #[test]
    fn test_primitives_are_flat() {
        assert_flat::<i32>();
        assert_flat::<u64>();
        assert_flat::<f64>();
        assert_flat::<[i32; 10]>();
    }

    #[test]
    fn test_repr_c_structs_are_flat() {
        assert_flat::<Inner>();
        assert_flat::<Outer>();
    }
}
