//! Varints pulled one byte at a time from a sequential source.
//!
//! [`decode_from_stream`] separates three outcomes: a value, a clean end of
//! input before the first byte (`Ok(None)`), and input that ends in the middle
//! of a varint ([`Error::Truncated`]).

use core::convert::Infallible;

use crate::Error;
use crate::wire::VarintAccumulator;

/// A sequential byte source: yields the next byte, or `None` at end of input.
pub trait ByteSource {
    type Error;

    fn pull(&mut self) -> Result<Option<u8>, Self::Error>;
}

impl ByteSource for &[u8] {
    type Error = Infallible;

    fn pull(&mut self) -> Result<Option<u8>, Infallible> {
        let Some((&byte, rest)) = self.split_first() else {
            return Ok(None);
        };
        *self = rest;
        Ok(Some(byte))
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    type Error = S::Error;

    fn pull(&mut self) -> Result<Option<u8>, S::Error> {
        (**self).pull()
    }
}

#[cfg(feature = "std")]
impl<R: std::io::Read> ByteSource for std::io::Bytes<R> {
    type Error = std::io::Error;

    fn pull(&mut self) -> Result<Option<u8>, std::io::Error> {
        self.next().transpose()
    }
}

/// A decoded value and the number of bytes (7-bit groups) it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub value: u64,
    pub len: usize,
}

impl Decoded {
    fn from_accumulator(acc: VarintAccumulator) -> Self {
        let (value, len) = acc.finish();
        Decoded { value, len }
    }
}

fn end_of_input<E>(acc: &VarintAccumulator) -> Result<Option<Decoded>, Error<E>> {
    acc.end_of_input().map_err(Error::widen)?;
    Ok(None)
}

/// Decode one varint from `source`.
///
/// Returns `Ok(None)` if the source is exhausted before the first byte.
pub fn decode_from_stream<S: ByteSource + ?Sized>(
    source: &mut S,
) -> Result<Option<Decoded>, Error<S::Error>> {
    let mut acc = VarintAccumulator::default();
    loop {
        let Some(byte) = source.pull().map_err(Error::Source)? else {
            if acc.groups() != 0 {
                log::trace!("varint stream ended after {} bytes", acc.groups());
            }
            return end_of_input(&acc);
        };
        if acc.push(byte).map_err(Error::widen)? {
            return Ok(Some(Decoded::from_accumulator(acc)));
        }
    }
}

/// Decode one varint from a reader, one `read` call per byte.
///
/// Nothing past the varint is consumed, so wrap slow readers in a
/// [`BufReader`](std::io::BufReader) that is kept for subsequent reads, or use
/// [`decode_from_bufread`].
#[cfg(feature = "std")]
pub fn decode_from_read(reader: &mut impl std::io::Read) -> anyhow::Result<Option<Decoded>> {
    let mut source = std::io::Read::bytes(&mut *reader);
    Ok(decode_from_stream(&mut source)?)
}

/// Decode one varint from a buffered reader, consuming exactly its bytes.
#[cfg(feature = "std")]
pub fn decode_from_bufread(reader: &mut impl std::io::BufRead) -> anyhow::Result<Option<Decoded>> {
    let mut acc = VarintAccumulator::default();
    loop {
        let buffer = match reader.fill_buf() {
            Ok(buffer) => buffer,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if buffer.is_empty() {
            return Ok(end_of_input::<Infallible>(&acc)?);
        }
        let mut used = 0;
        let mut outcome = Ok(false);
        for &byte in buffer {
            used += 1;
            outcome = acc.push(byte);
            if !matches!(outcome, Ok(false)) {
                break;
            }
        }
        // Bytes examined are consumed even on overflow, as the other decoders do.
        reader.consume(used);
        if outcome? {
            return Ok(Some(Decoded::from_accumulator(acc)));
        }
    }
}

/// Decode every varint in a buffered reader until a clean end of input.
#[cfg(feature = "std")]
pub fn decode_all_from_bufread(
    reader: &mut impl std::io::BufRead,
) -> anyhow::Result<std::vec::Vec<u64>> {
    let mut values = std::vec::Vec::new();
    while let Some(decoded) = decode_from_bufread(reader)? {
        values.push(decoded.value);
    }
    Ok(values)
}

/// Decode one varint from an async reader, one `read` call per byte.
#[cfg(feature = "std")]
pub async fn decode_from_async_read(
    reader: &mut (impl futures::io::AsyncRead + Unpin),
) -> anyhow::Result<Option<Decoded>> {
    use futures::io::AsyncReadExt;

    let mut acc = VarintAccumulator::default();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte).await {
            Ok(0) => return Ok(end_of_input::<Infallible>(&acc)?),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
        if acc.push(byte[0])? {
            return Ok(Some(Decoded::from_accumulator(acc)));
        }
    }
}
