// Arena hands out many small allocations that are freed all at once. Memory is
// taken from the underlying allocator in large blocks and bump allocated from
// the current one. Like the rest of the crate the arena is not generic over
// the allocator: it batches small requests into sporadic block requests, so
// going through a `dyn Allocator` costs next to nothing.
//
// Requests that do not fit the current block take one of two routes. If the
// current block still has a sizeable tail left (at least 1/8 of the nominal
// block size) the request gets a dedicated block of exactly its size, and the
// tail stays around for the small requests that follow. Otherwise the tail is
// abandoned and a fresh block of `max(block_size, size)` becomes the bump
// target.

use core::alloc::Layout;
use core::ffi::CStr;
use core::ptr::{self, NonNull};

use allocator_api2::vec::Vec;

use crate::{Allocator, Error};

/// Block size used when the caller asks for 0.
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Every allocation is rounded up to, and aligned on, the native pointer size.
pub const ALIGN: usize = core::mem::size_of::<usize>();

/// A request that overflows the current block gets a dedicated block while the
/// current block has at least `block_size / DEDICATED_THRESHOLD_DIVISOR` bytes left.
pub const DEDICATED_THRESHOLD_DIVISOR: usize = 8;

// Blocks tracked by a fresh chain before it first has to grow.
const MIN_CHAIN_CAPACITY: usize = 4;

// A block is one contiguous allocation from the underlying allocator. There is
// no in-band header; the layout is kept on the side so the block can be
// released with the exact layout it was acquired with.
struct MemBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

/// A bump allocator backed by blocks from a [`dyn Allocator`](Allocator).
///
/// Allocations are never freed individually. [`Arena::destroy`] (or dropping
/// the arena) releases every block and invalidates every pointer handed out.
///
/// The arena does no internal synchronization; it is neither `Send` nor `Sync`.
/// Use one arena per thread.
pub struct Arena<'a> {
    block_size: usize,
    // Most recently acquired block last.
    blocks: Vec<MemBlock, &'a dyn Allocator>,
    // Free region [ptr, top) of the current bump block; both null before the
    // first generic block exists.
    ptr: *mut u8,
    top: *mut u8,
    allocator: &'a dyn Allocator,
}

impl<'a> Arena<'a> {
    /// Create an empty arena with the default block size.
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self::with_block_size(allocator, 0)
    }

    /// Create an empty arena. A `block_size` of 0 selects [`DEFAULT_BLOCK_SIZE`].
    ///
    /// No memory is acquired until the first allocation.
    pub fn with_block_size(allocator: &'a dyn Allocator, block_size: usize) -> Self {
        let block_size = if block_size != 0 {
            block_size
        } else {
            DEFAULT_BLOCK_SIZE
        };
        Self {
            block_size,
            blocks: Vec::new_in(allocator),
            ptr: ptr::null_mut(),
            top: ptr::null_mut(),
            allocator,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently owned, dedicated ones included.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total bytes acquired from the underlying allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.layout.size()).sum()
    }

    /// Bytes left in the current bump block.
    pub fn remaining(&self) -> usize {
        self.top.addr() - self.ptr.addr()
    }

    /// Allocate `size` bytes aligned to [`ALIGN`]. The contents are unspecified.
    pub fn try_alloc(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        let requested = size;
        let size = size
            .checked_next_multiple_of(ALIGN)
            .ok_or(Error::CapacityOverflow { requested })?;
        if size == 0 {
            return Ok(NonNull::new(self.ptr).unwrap_or(NonNull::<usize>::dangling().cast()));
        }

        let available = self.remaining();
        if available < size {
            if available >= self.block_size / DEDICATED_THRESHOLD_DIVISOR {
                // Keep the current tail for later; it is still worth bumping into.
                let block = self.acquire_block(size, requested)?;
                log::trace!(
                    "arena: dedicated block of {size} bytes, keeping {available} bytes in current block"
                );
                return Ok(block);
            }

            let block_size = self.block_size.max(size);
            let block = self.acquire_block(block_size, requested)?;
            log::trace!(
                "arena: new block of {block_size} bytes, abandoning {available} bytes"
            );
            self.ptr = block.as_ptr();
            // Safety: the block is exactly `block_size` bytes long.
            self.top = unsafe { self.ptr.add(block_size) };
        }

        let data = self.ptr;
        // Safety: `size <= top - ptr`, so this stays inside the current block.
        unsafe {
            self.ptr = self.ptr.add(size);
            Ok(NonNull::new_unchecked(data))
        }
    }

    /// Like [`Arena::try_alloc`], but aborts on allocator failure.
    ///
    /// # Panics
    ///
    /// Panics if `size` overflows when rounded up to a block.
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        self.try_alloc(size).unwrap_or_else(|err| fatal(err))
    }

    /// Allocate `size` zeroed bytes aligned to [`ALIGN`].
    pub fn try_zalloc(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        let data = self.try_alloc(size)?;
        // Safety: `data` is valid for `size` bytes of writes.
        unsafe { ptr::write_bytes(data.as_ptr(), 0, size) };
        Ok(data)
    }

    pub fn zalloc(&mut self, size: usize) -> NonNull<u8> {
        self.try_zalloc(size).unwrap_or_else(|err| fatal(err))
    }

    /// Allocate memory for `layout`, honoring alignments larger than [`ALIGN`].
    pub fn try_alloc_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, Error> {
        if layout.align() <= ALIGN {
            return self.try_alloc(layout.size());
        }
        let padded = layout
            .size()
            .checked_add(layout.align() - ALIGN)
            .ok_or(Error::CapacityOverflow {
                requested: layout.size(),
            })?;
        let data = self.try_alloc(padded)?;
        let offset = data.as_ptr().align_offset(layout.align());
        debug_assert!(offset <= layout.align() - ALIGN);
        // Safety: `data` is ALIGN aligned, so the padding covers the offset.
        Ok(unsafe { data.add(offset) })
    }

    pub fn alloc_layout(&mut self, layout: Layout) -> NonNull<u8> {
        self.try_alloc_layout(layout)
            .unwrap_or_else(|err| fatal(err))
    }

    /// Copy `slice` into the arena.
    pub fn try_alloc_slice_copy<T: Copy>(&mut self, slice: &[T]) -> Result<NonNull<[T]>, Error> {
        let data = self
            .try_alloc_layout(Layout::for_value(slice))?
            .cast::<T>();
        // Safety: freshly allocated for exactly this layout.
        unsafe {
            ptr::copy_nonoverlapping(slice.as_ptr(), data.as_ptr(), slice.len());
        }
        Ok(NonNull::slice_from_raw_parts(data, slice.len()))
    }

    pub fn alloc_slice_copy<T: Copy>(&mut self, slice: &[T]) -> NonNull<[T]> {
        self.try_alloc_slice_copy(slice)
            .unwrap_or_else(|err| fatal(err))
    }

    /// Copy a NUL terminated string, terminator included, into the arena.
    pub fn try_strdup(&mut self, s: &CStr) -> Result<NonNull<CStr>, Error> {
        let bytes = s.to_bytes_with_nul();
        let data = self.try_alloc(bytes.len())?;
        // Safety: `data` holds `bytes.len()` bytes and now a copy of a valid CStr.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.as_ptr(), bytes.len());
            let copy = core::slice::from_raw_parts(data.as_ptr(), bytes.len());
            Ok(NonNull::from(CStr::from_bytes_with_nul_unchecked(copy)))
        }
    }

    pub fn strdup(&mut self, s: &CStr) -> NonNull<CStr> {
        self.try_strdup(s).unwrap_or_else(|err| fatal(err))
    }

    /// Release every block. All pointers handed out so far dangle afterwards.
    ///
    /// The arena stays usable and behaves like a freshly created one with the
    /// same block size. Calling this twice releases nothing the second time.
    pub fn destroy(&mut self) {
        let blocks = core::mem::replace(&mut self.blocks, Vec::new_in(self.allocator));
        if !blocks.is_empty() {
            log::debug!(
                "arena: releasing {} blocks, {} bytes",
                blocks.len(),
                blocks.iter().map(|b| b.layout.size()).sum::<usize>()
            );
        }
        for block in blocks {
            // Safety: acquired from `self.allocator` with this exact layout and
            // released only here, after being taken out of the chain.
            unsafe { self.allocator.deallocate(block.ptr, block.layout) };
        }
        self.ptr = ptr::null_mut();
        self.top = ptr::null_mut();
    }

    fn acquire_block(&mut self, size: usize, requested: usize) -> Result<NonNull<u8>, Error> {
        let layout =
            Layout::from_size_align(size, ALIGN).map_err(|_| Error::CapacityOverflow { requested })?;
        // Make room in the chain first so a block is never acquired without an owner.
        if self.blocks.len() == self.blocks.capacity() {
            let new_cap = (self.blocks.capacity() * 2).max(MIN_CHAIN_CAPACITY);
            let chain_layout = Layout::array::<MemBlock>(new_cap)
                .map_err(|_| Error::CapacityOverflow { requested })?;
            self.blocks
                .try_reserve_exact(new_cap - self.blocks.len())
                .map_err(|_| Error::OutOfMemory(chain_layout))?;
        }
        let ptr = self
            .allocator
            .allocate(layout)
            .map_err(|_| Error::OutOfMemory(layout))?
            .cast::<u8>();
        self.blocks.push(MemBlock { ptr, layout });
        Ok(ptr)
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl core::fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("block_size", &self.block_size)
            .field("blocks", &self.blocks.len())
            .field("reserved_bytes", &self.reserved_bytes())
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cold]
fn fatal(err: Error) -> ! {
    match err {
        Error::OutOfMemory(layout) => alloc::alloc::handle_alloc_error(layout),
        err => panic!("{err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CountingAllocator;
    use allocator_api2::alloc::Global;
    use proptest::prelude::*;

    fn range(p: NonNull<u8>, size: usize) -> core::ops::Range<usize> {
        p.as_ptr().addr()..p.as_ptr().addr() + size
    }

    #[test]
    fn zero_block_size_selects_default() {
        let arena = Arena::with_block_size(&Global, 0);
        assert_eq!(arena.block_size(), DEFAULT_BLOCK_SIZE);
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.remaining(), 0);
        assert_eq!(Arena::new(&Global).block_size(), 128 * 1024);
    }

    #[test]
    fn sizes_are_rounded_to_pointer_size() {
        let mut arena = Arena::with_block_size(&Global, 1024);
        let a = arena.alloc(1);
        let b = arena.alloc(ALIGN + 1);
        let c = arena.alloc(3);
        assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), ALIGN);
        assert_eq!(c.as_ptr().addr() - b.as_ptr().addr(), 2 * ALIGN);
        assert_eq!(arena.remaining(), 1024 - 4 * ALIGN);
    }

    #[test]
    fn zero_sized_requests_are_aligned_and_free() {
        let mut arena = Arena::with_block_size(&Global, 1024);
        let p = arena.alloc(0);
        assert_eq!(p.as_ptr().addr() % ALIGN, 0);
        assert_eq!(arena.block_count(), 0);

        arena.alloc(8);
        let remaining = arena.remaining();
        let q = arena.alloc(0);
        assert_eq!(q.as_ptr().addr() % ALIGN, 0);
        assert_eq!(arena.remaining(), remaining);
    }

    #[test]
    fn small_requests_share_a_block() {
        let mut arena = Arena::with_block_size(&Global, 4096);
        for _ in 0..100 {
            arena.alloc(16);
        }
        assert_eq!(arena.block_count(), 1);
        assert_eq!(arena.reserved_bytes(), 4096);
        assert_eq!(arena.remaining(), 4096 - 1600);
    }

    #[test]
    fn first_request_larger_than_block_size_gets_a_bump_block() {
        let mut arena = Arena::with_block_size(&Global, 1024);
        arena.alloc(5000);
        assert_eq!(arena.block_count(), 1);
        assert_eq!(arena.reserved_bytes(), 5000usize.next_multiple_of(ALIGN));
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn small_leftover_starts_a_new_bump_block() {
        let mut arena = Arena::with_block_size(&Global, 1024);
        arena.alloc(1000);
        assert!(arena.remaining() < 1024 / DEDICATED_THRESHOLD_DIVISOR);

        let p = arena.alloc(100);
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.reserved_bytes(), 2048);
        assert_eq!(arena.remaining(), 1024 - 104);
        // The new allocation sits at the start of the new bump block.
        assert_eq!(arena.top.addr() - p.as_ptr().addr(), 1024);
    }

    #[test]
    fn large_request_with_large_leftover_gets_dedicated_block() {
        let mut arena = Arena::with_block_size(&Global, 1024);
        let first = arena.alloc(8);
        let (ptr, top) = (arena.ptr, arena.top);

        let big = arena.alloc(2000);
        assert_eq!(arena.ptr, ptr);
        assert_eq!(arena.top, top);
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.reserved_bytes(), 1024 + 2000);
        assert!(!range(first, 1024).contains(&big.as_ptr().addr()));

        // The leftover keeps serving small requests.
        let next = arena.alloc(8);
        assert_eq!(next.as_ptr().addr(), first.as_ptr().addr() + 8);
        assert_eq!(arena.block_count(), 2);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut arena = Arena::with_block_size(&Global, 1024);
        // Leave exactly block_size / 8 bytes.
        arena.alloc(1024 - 128);
        assert_eq!(arena.remaining(), 128);
        let (ptr, top) = (arena.ptr, arena.top);
        arena.alloc(136);
        assert_eq!((arena.ptr, arena.top), (ptr, top));

        // One word less and the tail is abandoned.
        arena.alloc(8);
        assert_eq!(arena.remaining(), 120);
        arena.alloc(136);
        assert_eq!(arena.remaining(), 1024 - 136);
    }

    #[test]
    fn zalloc_zeroes_recycled_looking_memory() {
        let mut arena = Arena::with_block_size(&Global, 256);
        for size in [0, 1, 7, 8, 100, 255, 300] {
            let p = arena.zalloc(size);
            let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
            assert!(bytes.iter().all(|&b| b == 0), "size {size}");
            unsafe { ptr::write_bytes(p.as_ptr(), 0xAA, size) };
        }
    }

    #[test]
    fn strdup_copies_terminator() {
        let mut arena = Arena::new(&Global);
        let copy = arena.strdup(c"perf.data");
        let copy = unsafe { copy.as_ref() };
        assert_eq!(copy, c"perf.data");
        assert_eq!(copy.to_bytes_with_nul().last(), Some(&0));
        assert_eq!(copy.as_ptr().addr() % ALIGN, 0);

        let empty = arena.strdup(c"");
        assert_eq!(unsafe { empty.as_ref() }.to_bytes_with_nul(), b"\0");
    }

    #[test]
    fn over_aligned_layouts() {
        let mut arena = Arena::with_block_size(&Global, 4096);
        arena.alloc(8);
        for align in [16, 64, 256] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let p = arena.alloc_layout(layout);
            assert_eq!(p.as_ptr().addr() % align, 0);
        }
    }

    #[test]
    fn slice_copy() {
        let mut arena = Arena::new(&Global);
        let src = [1u64, 2, 3, u64::MAX];
        let copy = arena.alloc_slice_copy(&src);
        assert_eq!(unsafe { copy.as_ref() }, &src);
    }

    #[test]
    fn destroy_releases_everything_once() {
        let counting = CountingAllocator::new();
        let mut arena = Arena::with_block_size(&counting, 512);
        arena.alloc(100);
        arena.alloc(1000);
        arena.alloc(500);
        assert!(arena.block_count() >= 2);
        assert!(counting.live() > 0);

        arena.destroy();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.remaining(), 0);
        assert_eq!(counting.live(), 0);
        let released = counting.deallocations();

        arena.destroy();
        assert_eq!(counting.deallocations(), released);

        // Usable again after destroy.
        arena.alloc(16);
        assert_eq!(arena.block_count(), 1);
        drop(arena);
        assert_eq!(counting.live(), 0);
        assert_eq!(counting.allocations(), counting.deallocations());
    }

    #[test]
    fn allocator_failure_is_reported() {
        let failing = CountingAllocator::fail_after(0);
        let mut arena = Arena::with_block_size(&failing, 512);
        // The chain itself could not grow; the error names its layout.
        assert_eq!(
            arena.try_alloc(8),
            Err(Error::OutOfMemory(
                Layout::array::<MemBlock>(MIN_CHAIN_CAPACITY).unwrap()
            ))
        );
        assert_eq!(arena.block_count(), 0);

        // One allocation for the chain, one for the first block.
        let failing = CountingAllocator::fail_after(2);
        let mut arena = Arena::with_block_size(&failing, 512);
        let first = arena.try_alloc(8).unwrap();
        assert!(matches!(arena.try_alloc(4096), Err(Error::OutOfMemory(_))));
        assert_eq!(arena.block_count(), 1);
        // The failed request left the bump cursor alone.
        let next = arena.try_alloc(8).unwrap();
        assert_eq!(next.as_ptr().addr(), first.as_ptr().addr() + 8);

        // A failing block request reports the block's own layout.
        let failing = CountingAllocator::fail_after(1);
        let mut arena = Arena::with_block_size(&failing, 512);
        assert_eq!(
            arena.try_alloc(8),
            Err(Error::OutOfMemory(Layout::from_size_align(512, ALIGN).unwrap()))
        );
        assert_eq!(arena.block_count(), 0);
    }

    #[test]
    fn oversized_requests_overflow() {
        let mut arena = Arena::new(&Global);
        assert_eq!(
            arena.try_alloc(usize::MAX),
            Err(Error::CapacityOverflow {
                requested: usize::MAX
            })
        );
        assert!(matches!(
            arena.try_alloc(isize::MAX as usize),
            Err(Error::CapacityOverflow { .. })
        ));
        assert_eq!(arena.block_count(), 0);
    }

    proptest! {
        #[test]
        fn allocations_are_aligned_and_disjoint(
            block_size in 0usize..4096,
            sizes in proptest::collection::vec(0usize..3000, 1..200),
        ) {
            let counting = CountingAllocator::new();
            let mut arena = Arena::with_block_size(&counting, block_size);
            let mut ranges = std::vec::Vec::new();
            for &size in &sizes {
                let p = arena.alloc(size);
                prop_assert_eq!(p.as_ptr().addr() % ALIGN, 0);
                prop_assert!(arena.ptr <= arena.top);
                unsafe { ptr::write_bytes(p.as_ptr(), 0x5A, size) };
                if size > 0 {
                    ranges.push(range(p, size));
                }
            }
            ranges.sort_by_key(|r| r.start);
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
            drop(arena);
            prop_assert_eq!(counting.live(), 0);
        }

        #[test]
        fn zalloc_is_zeroed(sizes in proptest::collection::vec(0usize..600, 1..50)) {
            let mut arena = Arena::with_block_size(&Global, 1024);
            for &size in &sizes {
                // Dirty the next chunk so zeroing is observable.
                let dirty = arena.alloc(size);
                unsafe { ptr::write_bytes(dirty.as_ptr(), 0xFF, size) };
                let p = arena.zalloc(size);
                let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
                prop_assert!(bytes.iter().all(|&b| b == 0));
            }
        }
    }
}
