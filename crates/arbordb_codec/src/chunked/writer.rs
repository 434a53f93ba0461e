//! Chunked buffer writer.

use crate::chunked::ChunkedByteArray;
use crate::config::ChunkingConfig;
use crate::error::{CodecError, CodecResult};
use bytes::{Bytes, BytesMut};
use std::io;

/// An append-only byte sink which grows in chunks.
///
/// The current chunk doubles its capacity until it reaches the configured
/// maximum. From then on, a full chunk is sealed and a fresh one is started,
/// so no allocation ever exceeds `max_chunk_size`.
#[derive(Debug)]
pub struct ChunkedOutputStream {
    config: ChunkingConfig,
    /// Chunks which reached the maximum size and are frozen.
    sealed: Vec<Bytes>,
    /// Chunk currently being filled.
    current: BytesMut,
    /// Logical capacity of `current`. Tracked explicitly since `BytesMut`
    /// may reserve more than asked.
    capacity: usize,
    /// Total bytes written.
    size: usize,
    closed: bool,
}

impl ChunkedOutputStream {
    /// Creates a writer with the given sizing policy.
    pub fn new(config: ChunkingConfig) -> Self {
        let config = config.normalized();
        let capacity = config.first_chunk_capacity();
        Self {
            config,
            sealed: Vec::new(),
            current: BytesMut::with_capacity(capacity),
            capacity,
            size: 0,
            closed: false,
        }
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the largest chunk this writer will allocate.
    #[must_use]
    pub fn max_chunk_size(&self) -> usize {
        self.config.max_chunk_size
    }

    /// Whether the writer has been sealed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends a single byte.
    pub fn write_byte(&mut self, byte: u8) -> CodecResult<()> {
        self.write_at(&[byte], 0, 1)
    }

    /// Appends `src[offset..offset + len]`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BufferClosed`] after [`close`](Self::close) and
    /// [`CodecError::InvalidLength`] if the range falls outside `src`.
    pub fn write_at(&mut self, src: &[u8], offset: usize, len: usize) -> CodecResult<()> {
        if self.closed {
            return Err(CodecError::BufferClosed);
        }
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= src.len())
            .ok_or(CodecError::InvalidLength {
                offset,
                len,
                available: src.len(),
            })?;

        let mut remaining = &src[offset..end];
        while !remaining.is_empty() {
            let available = self.capacity - self.current.len();
            if available == 0 {
                self.next_chunk(remaining.len());
                continue;
            }
            let count = available.min(remaining.len());
            self.current.extend_from_slice(&remaining[..count]);
            self.size += count;
            remaining = &remaining[count..];
        }
        Ok(())
    }

    /// Makes room once the current chunk is full.
    fn next_chunk(&mut self, requested: usize) {
        let max = self.config.max_chunk_size;
        if self.capacity < max {
            // Grow in place: next power of two covering the request, capped.
            let wanted = (self.capacity + requested)
                .checked_next_power_of_two()
                .unwrap_or(max);
            let grown = wanted.max(self.config.first_chunk_capacity()).min(max);
            self.current.reserve(grown - self.current.len());
            self.capacity = grown;
        } else {
            let full = std::mem::take(&mut self.current);
            self.sealed.push(full.freeze());
            let next = requested.clamp(self.config.min_chunk_size, max);
            self.current = BytesMut::with_capacity(next);
            self.capacity = next;
        }
    }

    /// Seals the writer. The last partial chunk is trimmed to its length.
    /// Further writes fail with [`CodecError::BufferClosed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.current.is_empty() {
            let last = std::mem::take(&mut self.current);
            self.sealed.push(last.freeze());
        }
        self.capacity = 0;
    }

    /// Seals the writer and returns its contents.
    #[must_use]
    pub fn into_byte_array(mut self) -> ChunkedByteArray {
        self.close();
        ChunkedByteArray::new(self.size, self.sealed)
    }
}

impl Default for ChunkedOutputStream {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl io::Write for ChunkedOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, 0, buf.len())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
