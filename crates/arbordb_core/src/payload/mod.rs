//! Replicated log payloads.
//!
//! Every state-machine operation that goes through the replicated log is a
//! payload: a domain identifier plus a serialized body. Payloads are framed
//! on the log as
//!
//! ```text
//! | kind (1) | body length (4, signed) | body |
//! ```
//!
//! The body of most kinds is just the encoded identifier. Commit payloads
//! append a tree candidate stream and decode it lazily; skip payloads append
//! a set of transaction ids.

mod commit;
mod history;
mod skip;

pub use commit::{CandidateTransaction, CommitBody, CommitTransactionPayload};
pub use history::{
    AbortTransactionPayload, CloseLocalHistoryPayload, CreateLocalHistoryPayload,
    DisableTrackingPayload, PurgeLocalHistoryPayload, PurgeTransactionPayload,
};
pub use skip::SkipTransactionsPayload;

use crate::config::PayloadConfig;
use crate::error::{PayloadError, PayloadResult};
use crate::identifier::WireIdentifier;
use arbordb_codec::{read_untrusted, ChunkedByteArray, CodecResult, DataInput, DataOutput};
use bytes::Bytes;
use std::fmt;
use std::io::{Read, Write};

/// Discriminates payload kinds on the log. Codes are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// A transaction was aborted.
    Abort = 1,
    /// A transaction committed a tree candidate.
    Commit = 2,
    /// A finished transaction can be forgotten.
    Purge = 3,
    /// A closed local history can be forgotten.
    PurgeHistory = 4,
    /// A local history was closed.
    CloseHistory = 5,
    /// A local history was created.
    CreateHistory = 6,
    /// A range of transactions was skipped.
    SkipTransactions = 7,
    /// Client tracking was disabled. Kept readable for old logs only.
    DisableTracking = 8,
}

impl PayloadKind {
    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Resolves a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Abort),
            2 => Some(Self::Commit),
            3 => Some(Self::Purge),
            4 => Some(Self::PurgeHistory),
            5 => Some(Self::CloseHistory),
            6 => Some(Self::CreateHistory),
            7 => Some(Self::SkipTransactions),
            8 => Some(Self::DisableTracking),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Abort => "ABORT",
            Self::Commit => "COMMIT",
            Self::Purge => "PURGE",
            Self::PurgeHistory => "PURGE_HISTORY",
            Self::CloseHistory => "CLOSE_HISTORY",
            Self::CreateHistory => "CREATE_HISTORY",
            Self::SkipTransactions => "SKIP_TRANSACTIONS",
            Self::DisableTracking => "DISABLE_TRACKING",
        };
        f.write_str(name)
    }
}

/// Common contract of all payload kinds.
pub trait IdentifiablePayload {
    /// The domain identifier this payload is about.
    type Identifier: WireIdentifier;

    /// The log discriminator of this kind.
    const KIND: PayloadKind;

    /// Returns the domain identifier.
    fn identifier(&self) -> &Self::Identifier;

    /// Returns the exact encoded body length.
    fn size(&self) -> usize;

    /// Writes the encoded body.
    fn write_body<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()>;
}

/// A payload of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// See [`AbortTransactionPayload`].
    Abort(AbortTransactionPayload),
    /// See [`CommitTransactionPayload`].
    Commit(CommitTransactionPayload),
    /// See [`PurgeTransactionPayload`].
    Purge(PurgeTransactionPayload),
    /// See [`PurgeLocalHistoryPayload`].
    PurgeHistory(PurgeLocalHistoryPayload),
    /// See [`CloseLocalHistoryPayload`].
    CloseHistory(CloseLocalHistoryPayload),
    /// See [`CreateLocalHistoryPayload`].
    CreateHistory(CreateLocalHistoryPayload),
    /// See [`SkipTransactionsPayload`].
    SkipTransactions(SkipTransactionsPayload),
    /// See [`DisableTrackingPayload`].
    DisableTracking(DisableTrackingPayload),
}

/// Dispatches `$body` over every payload variant with `$p` bound to the
/// concrete payload.
macro_rules! for_each_payload {
    ($payload:expr, $p:ident => $body:expr) => {
        match $payload {
            Payload::Abort($p) => $body,
            Payload::Commit($p) => $body,
            Payload::Purge($p) => $body,
            Payload::PurgeHistory($p) => $body,
            Payload::CloseHistory($p) => $body,
            Payload::CreateHistory($p) => $body,
            Payload::SkipTransactions($p) => $body,
            Payload::DisableTracking($p) => $body,
        }
    };
}

impl Payload {
    /// Returns the kind of this payload.
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Abort(_) => PayloadKind::Abort,
            Self::Commit(_) => PayloadKind::Commit,
            Self::Purge(_) => PayloadKind::Purge,
            Self::PurgeHistory(_) => PayloadKind::PurgeHistory,
            Self::CloseHistory(_) => PayloadKind::CloseHistory,
            Self::CreateHistory(_) => PayloadKind::CreateHistory,
            Self::SkipTransactions(_) => PayloadKind::SkipTransactions,
            Self::DisableTracking(_) => PayloadKind::DisableTracking,
        }
    }

    /// Returns the exact encoded body length.
    #[must_use]
    pub fn size(&self) -> usize {
        for_each_payload!(self, p => p.size())
    }

    /// Returns the exact framed length: kind byte, length and body.
    #[must_use]
    pub fn framed_size(&self) -> usize {
        1 + 4 + self.size()
    }

    /// Returns the identifier rendered for diagnostics.
    #[must_use]
    pub fn identifier_string(&self) -> String {
        for_each_payload!(self, p => p.identifier().to_string())
    }

    /// Writes the framed payload.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_u8(self.kind().code())?;
        out.write_len(self.size())?;
        for_each_payload!(self, p => p.write_body(out))
    }

    /// Encodes the framed payload into a fresh buffer.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.framed_size());
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Reads one framed payload.
    ///
    /// Commit bodies larger than `config.max_array_size` are read into
    /// chunks instead of one contiguous allocation.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::UnknownPayloadKind`] for unknown kinds,
    /// [`PayloadError::Frame`] for a truncated or malformed frame and
    /// [`PayloadError::CorruptPayload`] if the body does not decode.
    pub fn read_from<R: Read + ?Sized>(
        input: &mut R,
        config: &PayloadConfig,
    ) -> PayloadResult<Self> {
        let tag = input.read_u8()?;
        let kind = PayloadKind::from_code(tag).ok_or(PayloadError::UnknownPayloadKind { tag })?;
        let len = input.read_len()?;

        if kind == PayloadKind::Commit {
            let body = if len > config.max_array_size {
                let chunk_size = config.chunking.normalized().max_chunk_size;
                CommitBody::Chunked(ChunkedByteArray::read_from(input, len, chunk_size)?)
            } else {
                CommitBody::Simple(Bytes::from(read_untrusted(input, len)?))
            };
            return CommitTransactionPayload::decode(body).map(Self::Commit);
        }

        let body = Bytes::from(read_untrusted(input, len)?);
        Self::decode(kind, body)
    }

    /// Decodes a body of a known kind.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::CorruptPayload`] if the body does not decode.
    pub fn decode(kind: PayloadKind, body: Bytes) -> PayloadResult<Self> {
        let payload = match kind {
            PayloadKind::Abort => Self::Abort(AbortTransactionPayload::decode(body)?),
            PayloadKind::Commit => {
                Self::Commit(CommitTransactionPayload::decode(CommitBody::Simple(body))?)
            }
            PayloadKind::Purge => Self::Purge(PurgeTransactionPayload::decode(body)?),
            PayloadKind::PurgeHistory => {
                Self::PurgeHistory(PurgeLocalHistoryPayload::decode(body)?)
            }
            PayloadKind::CloseHistory => {
                Self::CloseHistory(CloseLocalHistoryPayload::decode(body)?)
            }
            PayloadKind::CreateHistory => {
                Self::CreateHistory(CreateLocalHistoryPayload::decode(body)?)
            }
            PayloadKind::SkipTransactions => {
                Self::SkipTransactions(SkipTransactionsPayload::decode(body)?)
            }
            PayloadKind::DisableTracking => {
                Self::DisableTracking(DisableTrackingPayload::decode(body)?)
            }
        };
        Ok(payload)
    }
}

/// Reads a value from a body and insists the whole body was consumed.
pub(crate) fn decode_exact<T>(
    body: &[u8],
    read: impl FnOnce(&mut &[u8]) -> CodecResult<T>,
) -> CodecResult<T> {
    let mut input = body;
    let value = read(&mut input)?;
    if !input.is_empty() {
        return Err(arbordb_codec::CodecError::TrailingBytes { count: input.len() });
    }
    Ok(value)
}
