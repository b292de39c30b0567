#![no_main]

use std::ffi::CString;

use allocator_api2::alloc::Global;
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vbarena::arena::{ALIGN, Arena};

#[derive(Arbitrary, Debug)]
enum Op {
    Alloc(u16),
    Zalloc(u16),
    Strdup(Vec<u8>),
    Destroy,
}

#[derive(Arbitrary, Debug)]
struct Input {
    block_size: u16,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let mut arena = Arena::with_block_size(&Global, input.block_size as usize);
    // Live ranges, tagged with the byte each one was filled with.
    let mut live: Vec<(usize, usize, u8)> = Vec::new();

    for (i, op) in input.ops.iter().enumerate() {
        let tag = i as u8;
        let (ptr, len) = match op {
            Op::Alloc(size) => (arena.alloc(*size as usize), *size as usize),
            Op::Zalloc(size) => {
                let size = *size as usize;
                let p = arena.zalloc(size);
                let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == 0));
                (p, size)
            }
            Op::Strdup(bytes) => {
                let s = CString::new(bytes.iter().copied().filter(|&b| b != 0).collect::<Vec<_>>())
                    .unwrap();
                let copy = arena.strdup(&s);
                assert_eq!(unsafe { copy.as_ref() }, s.as_c_str());
                (copy.cast::<u8>(), s.as_bytes_with_nul().len())
            }
            Op::Destroy => {
                arena.destroy();
                live.clear();
                continue;
            }
        };
        assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), tag, len) };
        live.push((ptr.as_ptr() as usize, len, tag));
    }

    // Nothing written later may have clobbered an earlier allocation.
    for &(addr, len, tag) in &live {
        let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, len) };
        assert!(bytes.iter().all(|&b| b == tag));
    }
});
