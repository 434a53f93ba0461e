//! Frozen chunk list.

use crate::chunked::ChunkedInputStream;
use crate::error::{CodecError, CodecResult};
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};

/// The sealed output of a [`ChunkedOutputStream`](crate::ChunkedOutputStream).
///
/// Chunks are reference counted, so cloning the array or opening streams
/// over it never copies payload bytes.
#[derive(Debug, Clone, Default)]
pub struct ChunkedByteArray {
    size: usize,
    chunks: Vec<Bytes>,
}

impl ChunkedByteArray {
    pub(crate) fn new(size: usize, chunks: Vec<Bytes>) -> Self {
        debug_assert_eq!(size, chunks.iter().map(Bytes::len).sum::<usize>());
        Self { size, chunks }
    }

    /// Wraps a single contiguous buffer.
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::default();
        }
        Self {
            size: bytes.len(),
            chunks: vec![bytes],
        }
    }

    /// Reads exactly `size` bytes from `input`, allocating at most
    /// `chunk_size` bytes at a time.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if the input ends early.
    pub fn read_from<R: Read + ?Sized>(
        input: &mut R,
        size: usize,
        chunk_size: usize,
    ) -> CodecResult<Self> {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::with_capacity(size.div_ceil(chunk_size));
        let mut remaining = size;
        while remaining > 0 {
            let len = remaining.min(chunk_size);
            let mut chunk = BytesMut::zeroed(len);
            input.read_exact(&mut chunk)?;
            chunks.push(chunk.freeze());
            remaining -= len;
        }
        Ok(Self { size, chunks })
    }

    /// Returns the logical size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the array holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the chunk list.
    #[must_use]
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Opens a fresh single-pass reader over the chunks.
    #[must_use]
    pub fn open_stream(&self) -> ChunkedInputStream {
        ChunkedInputStream::new(self.chunks.clone(), self.size)
    }

    /// Writes every chunk, in order, to `out`.
    pub fn copy_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        for chunk in &self.chunks {
            out.write_all(chunk)?;
        }
        Ok(())
    }

    /// Joins the chunks into one buffer. A single chunk is shared, not copied.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            chunks => {
                let mut joined = BytesMut::with_capacity(self.size);
                for chunk in chunks {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }

    /// Copies the contents into a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    fn iter_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter().copied())
    }
}

impl PartialEq for ChunkedByteArray {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.iter_bytes().eq(other.iter_bytes())
    }
}

impl Eq for ChunkedByteArray {}

impl TryFrom<&ChunkedByteArray> for Vec<u8> {
    type Error = CodecError;

    fn try_from(array: &ChunkedByteArray) -> CodecResult<Self> {
        let mut out = Vec::with_capacity(array.size());
        array.copy_to(&mut out)?;
        Ok(out)
    }
}
