//! Unsigned LEB128 varints read from memory.
//!
//! Each byte carries 7 payload bits in its low bits; the high bit (0x80) marks
//! that more bytes follow. Groups are little endian: byte `i` contributes bits
//! `7 * i .. 7 * i + 7` of the value.
//!
//! Decoding is bounds checked. Running off the end of the buffer is reported
//! as [`Error::Truncated`], and a value that needs more than 64 bits as
//! [`Error::Overflow`] rather than silently dropping the high bits.
//! Non-minimal encodings (`[0x80, 0x00]` for 0) are accepted.

use core::iter::FusedIterator;

use crate::Error;

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

// Shared between the buffer and stream decoders.
#[derive(Debug, Default)]
pub(crate) struct VarintAccumulator {
    value: u64,
    groups: usize,
}

impl VarintAccumulator {
    /// Feed the next byte. Returns `true` once the terminating byte was seen.
    #[inline(always)]
    pub(crate) fn push(&mut self, byte: u8) -> Result<bool, Error> {
        let payload = (byte & 0x7F) as u64;
        let shift = 7 * self.groups;
        self.groups += 1;
        // The tenth group only has room for bit 63 and must be the last.
        if self.groups == MAX_VARINT_LEN && (payload > 1 || byte & 0x80 != 0) {
            return Err(Error::Overflow {
                consumed: self.groups,
            });
        }
        self.value |= payload << shift;
        Ok(byte & 0x80 == 0)
    }

    pub(crate) fn groups(&self) -> usize {
        self.groups
    }

    pub(crate) fn finish(self) -> (u64, usize) {
        (self.value, self.groups)
    }

    /// Outcome when the input ends before the terminating byte.
    pub(crate) fn end_of_input(&self) -> Result<(), Error> {
        if self.groups == 0 {
            Ok(())
        } else {
            Err(Error::Truncated {
                consumed: self.groups,
            })
        }
    }
}

/// Decode one varint from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), Error> {
    if let Some(&byte) = buf.first()
        && byte < 0x80
    {
        return Ok((byte as u64, 1));
    }
    let mut acc = VarintAccumulator::default();
    for &byte in buf {
        if acc.push(byte)? {
            return Ok(acc.finish());
        }
    }
    Err(Error::Truncated {
        consumed: buf.len(),
    })
}

/// A bounds checked read position in a byte buffer.
#[derive(Debug, Clone)]
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next unread byte.
    pub const fn position(&self) -> usize {
        self.pos
    }

    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread part of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Decode the next varint and advance past it.
    ///
    /// On error the cursor does not move.
    #[inline]
    pub fn read_varint(&mut self) -> Result<u64, Error> {
        let (value, len) = decode(self.rest())?;
        self.pos += len;
        Ok(value)
    }

    /// Iterate over the varints in the rest of the buffer.
    pub fn varints(self) -> Varints<'a> {
        Varints {
            cursor: self,
            failed: false,
        }
    }
}

/// Iterator over consecutive varints, stopping after the first error.
#[derive(Debug, Clone)]
pub struct Varints<'a> {
    cursor: ReadCursor<'a>,
    failed: bool,
}

impl Varints<'_> {
    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }
}

impl Iterator for Varints<'_> {
    type Item = Result<u64, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_empty() {
            return None;
        }
        let result = self.cursor.read_varint();
        self.failed = result.is_err();
        Some(result)
    }
}

impl FusedIterator for Varints<'_> {}

/// Iterate over the varints packed back to back in `buf`.
pub fn varints(buf: &[u8]) -> Varints<'_> {
    ReadCursor::new(buf).varints()
}
