//! Arena allocation and variable-length integer decoding.
//!
//! Two small building blocks for tools that parse compact binary traces:
//!
//! - [`arena::Arena`]: a bump allocator that carves many same-lifetime
//!   allocations out of large blocks and releases them all at once.
//! - [`wire`] and [`decoding`]: a decoder for unsigned LEB128 varints, from an
//!   in-memory buffer or from a pull-based byte stream.
//!
//! # Example
//!
//! ```
//! use vbarena::{arena::Arena, wire};
//! use allocator_api2::alloc::Global;
//!
//! let mut arena = Arena::new(&Global);
//! let p = arena.zalloc(24);
//! assert_eq!(p.as_ptr() as usize % core::mem::size_of::<usize>(), 0);
//!
//! let (value, len) = wire::decode(&[0x80, 0x01]).unwrap();
//! assert_eq!((value, len), (128, 2));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(feature = "nightly", feature(allocator_api))]

extern crate alloc;

pub mod arena;
pub mod decoding;
pub mod wire;

#[cfg(feature = "std")]
pub mod test_utils;

pub use allocator_api2::alloc::{Allocator, Global};

use core::alloc::Layout;
use core::convert::Infallible;
use core::fmt;

/// Errors produced by arena allocation and varint decoding.
///
/// `E` is the error type of the byte source for stream decoding; operations
/// that cannot fail on I/O use the default `Infallible`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E = Infallible> {
    /// The block allocator refused to hand out a block of this layout.
    OutOfMemory(Layout),
    /// The requested size overflows once rounded up and sized into a block.
    CapacityOverflow {
        /// Size in bytes asked for by the caller.
        requested: usize,
    },
    /// Input ended in the middle of a varint.
    Truncated {
        /// Bytes read before the input ran out.
        consumed: usize,
    },
    /// The varint does not fit in 64 bits.
    Overflow {
        /// Bytes read when the overflow was detected.
        consumed: usize,
    },
    /// The underlying byte source failed.
    Source(E),
}

impl<E> Error<E> {
    /// Lift an error from an infallible context into one with a source error.
    pub fn widen(err: Error) -> Self {
        match err {
            Error::OutOfMemory(layout) => Error::OutOfMemory(layout),
            Error::CapacityOverflow { requested } => Error::CapacityOverflow { requested },
            Error::Truncated { consumed } => Error::Truncated { consumed },
            Error::Overflow { consumed } => Error::Overflow { consumed },
            Error::Source(never) => match never {},
        }
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory(layout) => write!(
                f,
                "out of memory: failed to acquire a block of {} bytes (align {})",
                layout.size(),
                layout.align()
            ),
            Self::CapacityOverflow { requested } => {
                write!(f, "capacity overflow: cannot allocate {requested} bytes")
            }
            Self::Truncated { consumed } => {
                write!(f, "truncated varint: input ended after {consumed} bytes")
            }
            Self::Overflow { consumed } => {
                write!(f, "varint exceeds 64 bits after {consumed} bytes")
            }
            Self::Source(err) => write!(f, "byte source error: {err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> core::error::Error for Error<E> {}
