//! Test that vbarena works in a no_std environment.
//!
//! This crate verifies that the arena and the varint decoders compile and
//! work without the standard library.
//!
//! Build with: cargo build -p no-std-test --target thumbv7m-none-eabi

#![no_std]

use vbarena::arena::Arena;
use vbarena::decoding::decode_from_stream;
use vbarena::wire::{ReadCursor, decode};
use vbarena::{Allocator, Error};

/// Test arena allocation works in no_std
pub fn test_arena(alloc: &dyn Allocator) -> bool {
    let mut arena = Arena::with_block_size(alloc, 256);

    let Ok(p) = arena.try_zalloc(64) else {
        return false;
    };
    let zeroed = unsafe { core::slice::from_raw_parts(p.as_ptr(), 64) }
        .iter()
        .all(|&b| b == 0);

    let Ok(name) = arena.try_strdup(c"no-std") else {
        return false;
    };
    let copied = unsafe { name.as_ref() } == c"no-std";

    arena.destroy();
    zeroed && copied && arena.block_count() == 0
}

/// Test buffer decoding works in no_std
pub fn test_decode() -> bool {
    let data: &[u8] = &[0x00, 0x80, 0x01, 0xFF, 0xFF, 0xFF, 0x7F];
    let mut cursor = ReadCursor::new(data);
    matches!(cursor.read_varint(), Ok(0))
        && matches!(cursor.read_varint(), Ok(128))
        && matches!(cursor.read_varint(), Ok(0x0FFF_FFFF))
        && cursor.is_empty()
        && matches!(decode(&[0x80]), Err(Error::Truncated { consumed: 1 }))
}

/// Test stream decoding works in no_std
pub fn test_stream() -> bool {
    let mut empty: &[u8] = &[];
    let mut source: &[u8] = &[0xAC, 0x02];
    matches!(decode_from_stream(&mut empty), Ok(None))
        && matches!(decode_from_stream(&mut source), Ok(Some(d)) if d.value == 300 && d.len == 2)
}
