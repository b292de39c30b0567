//! Shared inputs for the criterion benches.

/// Allocation sizes shaped like a trace parser's: mostly small records with
/// the occasional large buffer.
pub fn allocation_sizes(count: usize) -> Vec<usize> {
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    (0..count)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if i % 64 == 63 {
                16 * 1024 + (state % 32_768) as usize
            } else {
                8 + (state % 120) as usize
            }
        })
        .collect()
}

/// `count` varints with a spread of encoded lengths, back to back.
pub fn varint_stream(count: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    for i in 0..count as u64 {
        let value = i.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> (i % 64);
        vbarena::test_utils::encode_varint(value, &mut buf);
    }
    buf
}
