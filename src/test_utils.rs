//! Test utilities for vbarena - available to downstream crates for testing.

use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator, Global};

/// A [`Global`] wrapper that counts allocations and can be told to fail.
///
/// Used to check that an arena releases every block exactly once.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    live_bytes: Cell<usize>,
    fail_after: Option<usize>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every allocation after the first `n` succeeded.
    pub fn fail_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.get()
    }

    /// Number of allocations not yet released.
    pub fn live(&self) -> usize {
        self.allocations.get() - self.deallocations.get()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }
}

unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if self
            .fail_after
            .is_some_and(|n| self.allocations.get() >= n)
        {
            return Err(AllocError);
        }
        let block = Global.allocate(layout)?;
        self.allocations.set(self.allocations.get() + 1);
        self.live_bytes.set(self.live_bytes.get() + layout.size());
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.set(self.deallocations.get() + 1);
        self.live_bytes.set(self.live_bytes.get() - layout.size());
        unsafe { Global.deallocate(ptr, layout) }
    }
}

/// Reference LEB128 encoder, used to check the decoders against known-good input.
///
/// Produces the minimal encoding: `ceil(bits / 7)` groups, one group for 0.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push(value as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_encoder_is_minimal() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (300, &[0xAC, 0x02]),
            (0x0FFF_FFFF, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for &(value, expected) in cases {
            let mut out = Vec::new();
            encode_varint(value, &mut out);
            assert_eq!(out, expected, "value {value}");
        }
        let mut out = Vec::new();
        encode_varint(u64::MAX, &mut out);
        assert_eq!(out.len(), 10);
        assert_eq!(out[9], 0x01);
    }

    #[test]
    fn counting_allocator_tracks_live_blocks() {
        let counting = CountingAllocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        let block = counting.allocate(layout).unwrap();
        assert_eq!((counting.live(), counting.live_bytes()), (1, 64));
        unsafe { counting.deallocate(block.cast(), layout) };
        assert_eq!((counting.live(), counting.live_bytes()), (0, 0));

        let failing = CountingAllocator::fail_after(1);
        let block = failing.allocate(layout).unwrap();
        assert!(failing.allocate(layout).is_err());
        unsafe { failing.deallocate(block.cast(), layout) };
    }
}
