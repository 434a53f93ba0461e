//! Buffer sizing configuration.

/// Sizing policy for [`ChunkedOutputStream`](crate::ChunkedOutputStream).
///
/// No single allocation made by a chunked buffer exceeds `max_chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Requested capacity of the first chunk.
    pub initial_capacity: usize,

    /// Smallest chunk ever allocated.
    pub min_chunk_size: usize,

    /// Largest chunk ever allocated. Rounded up to a power of two.
    pub max_chunk_size: usize,
}

impl ChunkingConfig {
    /// Default smallest chunk.
    pub const DEFAULT_MIN_CHUNK_SIZE: usize = 32;

    /// Default largest chunk.
    pub const DEFAULT_MAX_CHUNK_SIZE: usize = 256 * 1024;

    /// Default first chunk request.
    pub const DEFAULT_INITIAL_CAPACITY: usize = 512;

    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested capacity of the first chunk.
    #[must_use]
    pub const fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the smallest chunk size.
    #[must_use]
    pub const fn min_chunk_size(mut self, size: usize) -> Self {
        self.min_chunk_size = size;
        self
    }

    /// Sets the largest chunk size.
    #[must_use]
    pub const fn max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Returns a copy with the invariants applied: the maximum is a power of
    /// two no smaller than the minimum, and the minimum is at least one byte.
    #[must_use]
    pub fn normalized(self) -> Self {
        let min = self.min_chunk_size.max(1);
        let max = self
            .max_chunk_size
            .max(min)
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        Self {
            initial_capacity: self.initial_capacity,
            min_chunk_size: min.min(max),
            max_chunk_size: max,
        }
    }

    /// Capacity of the first chunk: the requested initial capacity rounded up
    /// to a power of two and clamped into the normalized `[min, max]`.
    #[must_use]
    pub fn first_chunk_capacity(&self) -> usize {
        let bounds = self.normalized();
        let requested = self
            .initial_capacity
            .checked_next_power_of_two()
            .unwrap_or(bounds.max_chunk_size);
        requested.clamp(bounds.min_chunk_size, bounds.max_chunk_size)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            min_chunk_size: Self::DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: Self::DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}
