//! Error types for ArborDB core.

use crate::identifier::TransactionIdentifier;
use crate::payload::PayloadKind;
use arbordb_codec::{CodecError, QName};
use thiserror::Error;

/// Result type for payload operations.
pub type PayloadResult<T> = Result<T, PayloadError>;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Result type for commit coordination.
pub type CommitResult<T> = Result<T, CommitError>;

/// Result type for transaction chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for RPC routing.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors raised while framing or decoding log payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// A payload body could not be decoded.
    #[error("corrupt {kind} payload: {cause}")]
    CorruptPayload {
        /// Kind of the payload being decoded.
        kind: PayloadKind,
        /// The underlying decode failure.
        #[source]
        cause: CodecError,
    },

    /// The frame names a payload kind this build does not know.
    #[error("unknown payload kind {tag}")]
    UnknownPayloadKind {
        /// The offending kind byte.
        tag: u8,
    },

    /// The frame around a payload is malformed or truncated.
    #[error("payload framing error: {0}")]
    Frame(#[from] CodecError),
}

impl PayloadError {
    /// Wraps a decode failure for a payload kind.
    pub fn corrupt(kind: PayloadKind, cause: CodecError) -> Self {
        Self::CorruptPayload { kind, cause }
    }
}

/// Errors raised while decoding a shard snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot could not be decoded.
    #[error("snapshot decode failed: {0}")]
    Codec(#[from] CodecError),

    /// The versioned decode failed and the legacy retry failed too. The
    /// versioned failure is reported as the cause.
    #[error("snapshot decode failed: {primary}; legacy decode also failed: {legacy}")]
    FallbackFailed {
        /// Failure of the versioned decode.
        #[source]
        primary: CodecError,
        /// Failure of the legacy retry.
        legacy: CodecError,
    },
}

impl SnapshotError {
    /// Returns the failure of the first decode attempt.
    #[must_use]
    pub fn cause(&self) -> &CodecError {
        match self {
            Self::Codec(cause) | Self::FallbackFailed { primary: cause, .. } => cause,
        }
    }
}

/// Failure reported by a single commit cohort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CohortError {
    /// The cohort voted against committing.
    #[error("cohort rejected the transaction")]
    Rejected,

    /// The cohort operation failed.
    #[error("cohort failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl CohortError {
    /// Creates a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Transaction-level commit failures. Every variant is reported only after
/// all cohorts have been aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// A cohort refused or failed `can_commit`.
    #[error("transaction {transaction} failed can-commit: {cause}")]
    CanCommitFailed {
        /// The transaction being committed.
        transaction: TransactionIdentifier,
        /// First cohort failure, in cohort order.
        #[source]
        cause: CohortError,
    },

    /// A cohort failed `pre_commit`.
    #[error("transaction {transaction} failed pre-commit: {cause}")]
    PreCommitFailed {
        /// The transaction being committed.
        transaction: TransactionIdentifier,
        /// First cohort failure, in cohort order.
        #[source]
        cause: CohortError,
    },

    /// A cohort failed `commit`.
    #[error("transaction {transaction} failed commit: {cause}")]
    CommitFailed {
        /// The transaction being committed.
        transaction: TransactionIdentifier,
        /// First cohort failure, in cohort order.
        #[source]
        cause: CohortError,
    },

    /// Aborting after a phase failure failed as well.
    #[error("{cause} (abort failed on {} cohort(s))", .abort_errors.len())]
    AbortFailed {
        /// The phase failure which triggered the abort.
        #[source]
        cause: Box<CommitError>,
        /// Failures reported by `abort`.
        abort_errors: Vec<CohortError>,
    },
}

impl CommitError {
    /// Returns the phase failure which started the abort.
    #[must_use]
    pub fn root_cause(&self) -> &CommitError {
        match self {
            Self::AbortFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Returns the transaction this failure belongs to.
    #[must_use]
    pub fn transaction(&self) -> &TransactionIdentifier {
        match self {
            Self::CanCommitFailed { transaction, .. }
            | Self::PreCommitFailed { transaction, .. }
            | Self::CommitFailed { transaction, .. } => transaction,
            Self::AbortFailed { cause, .. } => cause.transaction(),
        }
    }
}

/// Errors raised by the ping-pong transaction chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A transaction is already allocated and not yet readied.
    #[error("another transaction is still open on this chain")]
    ConcurrentTransaction,

    /// The chain has been closed.
    #[error("transaction chain is closed")]
    ChainClosed,

    /// Transactions on a ping-pong chain cannot be cancelled.
    #[error("cancellation is not supported on a ping-pong chain")]
    CancellationUnsupported,

    /// The backing store refused to allocate a transaction.
    #[error("backing store failed: {message}")]
    Backing {
        /// Description of the failure.
        message: String,
    },

    /// The backing commit failed.
    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Errors raised by RPC routing and invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// No implementation is registered for the operation and context.
    #[error("no implementation available for {operation}")]
    ImplementationNotAvailable {
        /// The requested operation.
        operation: QName,
    },

    /// The implementation failed.
    #[error("invocation of {operation} failed: {message}")]
    Invocation {
        /// The requested operation.
        operation: QName,
        /// Description of the failure.
        message: String,
    },
}
