#![no_main]

use libfuzzer_sys::fuzz_target;
use vbarena::Error;
use vbarena::decoding::{Decoded, decode_from_stream};
use vbarena::wire::{MAX_VARINT_LEN, decode};

// The buffer and stream decoders must agree on every input.
fuzz_target!(|data: &[u8]| {
    let mut source = data;
    let streamed = decode_from_stream(&mut source);
    match decode(data) {
        Ok((value, len)) => {
            assert!(len <= MAX_VARINT_LEN);
            assert_eq!(streamed, Ok(Some(Decoded { value, len })));
            assert_eq!(source.len(), data.len() - len);
        }
        Err(Error::Truncated { consumed: 0 }) => assert_eq!(streamed, Ok(None)),
        Err(err) => assert_eq!(streamed, Err(Error::widen(err))),
    }
});
