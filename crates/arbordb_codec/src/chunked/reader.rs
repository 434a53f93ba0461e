//! Chunked buffer reader.

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io;

/// Single-pass byte stream over a chunk list.
///
/// Reads cross chunk boundaries transparently. Reading past the end yields
/// end-of-stream (`None` or `Ok(0)`), never an error.
#[derive(Debug)]
pub struct ChunkedInputStream {
    pending: VecDeque<Bytes>,
    current: Bytes,
    remaining: usize,
}

impl ChunkedInputStream {
    pub(crate) fn new(chunks: Vec<Bytes>, size: usize) -> Self {
        Self {
            pending: chunks.into(),
            current: Bytes::new(),
            remaining: size,
        }
    }

    /// Returns how many logical bytes are left.
    #[must_use]
    pub fn bytes_remaining(&self) -> usize {
        self.remaining
    }

    /// Reads one byte, or `None` at end of stream.
    pub fn read_byte(&mut self) -> Option<u8> {
        if !self.advance_chunk() {
            return None;
        }
        self.remaining -= 1;
        Some(self.current.get_u8())
    }

    /// Skips up to `n` bytes and returns how many were skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let target = n.min(self.remaining);
        let mut left = target;
        while left > 0 && self.advance_chunk() {
            let step = left.min(self.current.remaining());
            self.current.advance(step);
            self.remaining -= step;
            left -= step;
        }
        target - left
    }

    /// Makes sure `current` has unread bytes. Returns false at end of stream.
    fn advance_chunk(&mut self) -> bool {
        while !self.current.has_remaining() {
            match self.pending.pop_front() {
                Some(next) => self.current = next,
                None => return false,
            }
        }
        true
    }
}

impl io::Read for ChunkedInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && self.advance_chunk() {
            let count = (buf.len() - filled).min(self.current.remaining());
            self.current.copy_to_slice(&mut buf[filled..filled + count]);
            self.remaining -= count;
            filled += count;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ChunkingConfig;
    use crate::{ChunkedByteArray, ChunkedOutputStream};
    use std::io::Read;

    const MAX: usize = 32;

    fn array_of(len: usize) -> (Vec<u8>, ChunkedByteArray) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let mut out = ChunkedOutputStream::new(
            ChunkingConfig::new()
                .initial_capacity(1)
                .min_chunk_size(4)
                .max_chunk_size(MAX),
        );
        out.write_at(&data, 0, len).unwrap();
        (data, out.into_byte_array())
    }

    #[test]
    fn byte_by_byte_readback() {
        for len in [0, 1, MAX - 1, MAX, MAX + 1, 10 * MAX + 7] {
            let (data, array) = array_of(len);
            let mut stream = array.open_stream();
            let mut read = Vec::new();
            while let Some(byte) = stream.read_byte() {
                read.push(byte);
            }
            assert_eq!(read, data, "length {len}");
            assert_eq!(stream.bytes_remaining(), 0);
            assert_eq!(stream.read_byte(), None);
        }
    }

    #[test]
    fn bulk_read_crosses_chunks() {
        let (data, array) = array_of(3 * MAX + 5);
        let mut stream = array.open_stream();
        let mut first = vec![0u8; MAX + 3];
        stream.read_exact(&mut first).unwrap();
        assert_eq!(first, data[..MAX + 3]);
        assert_eq!(stream.bytes_remaining(), 2 * MAX + 2);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, data[MAX + 3..]);
    }

    #[test]
    fn read_past_end_returns_zero() {
        let (_, array) = array_of(3);
        let mut stream = array.open_stream();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn skip_is_clamped() {
        let (data, array) = array_of(2 * MAX + 1);
        let mut stream = array.open_stream();
        assert_eq!(stream.skip(MAX + 1), MAX + 1);
        assert_eq!(stream.read_byte(), Some(data[MAX + 1]));
        assert_eq!(stream.skip(1000), MAX - 1);
        assert_eq!(stream.bytes_remaining(), 0);
        assert_eq!(stream.skip(1), 0);
    }

    #[test]
    fn streams_are_independent() {
        let (data, array) = array_of(MAX * 2);
        let mut first = array.open_stream();
        first.skip(10);
        let mut second = array.open_stream();
        assert_eq!(second.read_byte(), Some(data[0]));
        assert_eq!(first.read_byte(), Some(data[10]));
    }
}
