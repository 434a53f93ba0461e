//! Payload and commit configuration.

use arbordb_codec::ChunkingConfig;

/// Configuration for encoding and reading log payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadConfig {
    /// Sizing of the chunked buffers payload bodies are encoded into.
    pub chunking: ChunkingConfig,

    /// Largest commit payload body kept as one contiguous array. Larger
    /// bodies stay chunked in memory and are read back in chunks.
    pub max_array_size: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            max_array_size: 256 * 1024, // 256 KiB
        }
    }
}

impl PayloadConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer sizing policy.
    #[must_use]
    pub const fn chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Sets the largest contiguous commit body.
    #[must_use]
    pub const fn max_array_size(mut self, size: usize) -> Self {
        self.max_array_size = size;
        self
    }
}

/// Configuration for the commit coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitConfig {
    /// Whether commit counts and durations are recorded.
    pub record_stats: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self { record_stats: true }
    }
}

impl CommitConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether statistics are recorded.
    #[must_use]
    pub const fn record_stats(mut self, value: bool) -> Self {
        self.record_stats = value;
        self
    }
}
