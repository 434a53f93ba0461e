//! Error types for the codec crate.

use crate::version::VersionTag;
use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A version code that does not map onto a supported [`VersionTag`].
///
/// Both variants carry the code that was attempted and the nearest version
/// this build understands, so a caller can decide whether to reject the peer
/// or fall back to an older format.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionError {
    /// The code is newer than anything this build knows about.
    #[error("version {attempted} is too new, newest known is {closest}")]
    FutureVersion {
        /// The version code that was read.
        attempted: u16,
        /// The newest supported version.
        closest: VersionTag,
    },

    /// The code predates the oldest version this build still reads.
    #[error("version {attempted} is too old, oldest supported is {closest}")]
    PastVersion {
        /// The version code that was read.
        attempted: u16,
        /// The oldest supported version.
        closest: VersionTag,
    },
}

impl VersionError {
    /// Returns the version code which failed to resolve.
    #[must_use]
    pub const fn attempted(&self) -> u16 {
        match self {
            Self::FutureVersion { attempted, .. } | Self::PastVersion { attempted, .. } => {
                *attempted
            }
        }
    }

    /// Returns the closest version this build knows about.
    #[must_use]
    pub const fn closest(&self) -> VersionTag {
        match self {
            Self::FutureVersion { closest, .. } | Self::PastVersion { closest, .. } => *closest,
        }
    }
}

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The stream header carries an unsupported version.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// The stream is structurally invalid.
    #[error("corrupt stream: {message}")]
    CorruptStream {
        /// Description of the corruption.
        message: String,
    },

    /// Decoding finished before the input was exhausted.
    #[error("{count} trailing bytes after decoded content")]
    TrailingBytes {
        /// Number of bytes left unread.
        count: usize,
    },

    /// A tree candidate node carried an unknown modification tag.
    #[error("unknown candidate node kind {tag}")]
    UnknownNodeKind {
        /// The offending tag byte.
        tag: u8,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A write was attempted on a sealed chunked buffer.
    #[error("buffer is closed")]
    BufferClosed,

    /// A write referenced bytes outside of its source slice.
    #[error("invalid length: offset {offset} + length {len} exceeds {available} bytes")]
    InvalidLength {
        /// Requested offset into the source.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Bytes actually available in the source.
        available: usize,
    },

    /// I/O error from an underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl CodecError {
    /// Create a corrupt stream error.
    pub fn corrupt_stream(message: impl Into<String>) -> Self {
        Self::CorruptStream {
            message: message.into(),
        }
    }

    /// Returns true if this error stems from the shape of the input rather
    /// than from an unsupported version.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CorruptStream { .. }
                | Self::UnexpectedEof
                | Self::UnknownNodeKind { .. }
                | Self::Io(_)
        )
    }
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(err)
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(inner) => inner,
            CodecError::UnexpectedEof => io::Error::from(io::ErrorKind::UnexpectedEof),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_eof_maps_to_unexpected_eof() {
        let err: CodecError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, CodecError::UnexpectedEof));
    }

    #[test]
    fn version_errors_are_not_structural() {
        let err = CodecError::from(VersionError::FutureVersion {
            attempted: 99,
            closest: VersionTag::current(),
        });
        assert!(!err.is_structural());
        assert!(CodecError::corrupt_stream("bad").is_structural());
        assert!(!CodecError::TrailingBytes { count: 3 }.is_structural());
    }

    #[test]
    fn error_display() {
        let err = CodecError::UnknownNodeKind { tag: 9 };
        assert_eq!(err.to_string(), "unknown candidate node kind 9");
    }
}
