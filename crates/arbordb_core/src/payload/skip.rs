//! Skipped transaction ranges.

use super::{decode_exact, IdentifiablePayload, PayloadKind};
use crate::error::{PayloadError, PayloadResult};
use crate::identifier::{LocalHistoryIdentifier, WireIdentifier};
use arbordb_codec::{CodecResult, UnsignedLongSet};
use bytes::Bytes;
use std::io::Write;

/// A set of transactions in a local history were skipped: they will never
/// be committed and their ids can be treated as purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipTransactionsPayload {
    identifier: LocalHistoryIdentifier,
    transaction_ids: UnsignedLongSet,
    body: Bytes,
}

impl SkipTransactionsPayload {
    /// Creates the payload.
    ///
    /// # Panics
    ///
    /// Panics if the range set cannot be encoded into memory.
    #[must_use]
    pub fn create(identifier: LocalHistoryIdentifier, transaction_ids: UnsignedLongSet) -> Self {
        let mut out = identifier.to_bytes();
        if let Err(err) = transaction_ids.write_to(&mut out) {
            panic!("encoding skipped transactions of {identifier} failed: {err}");
        }
        Self {
            identifier,
            transaction_ids,
            body: Bytes::from(out),
        }
    }

    /// Decodes a body.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::CorruptPayload`] if the body does not decode
    /// exactly.
    pub fn decode(body: Bytes) -> PayloadResult<Self> {
        let (identifier, transaction_ids) = decode_exact(&body, |input| {
            let identifier = LocalHistoryIdentifier::read_from(input)?;
            let transaction_ids = UnsignedLongSet::read_from(input)?;
            Ok((identifier, transaction_ids))
        })
        .map_err(|cause| PayloadError::corrupt(PayloadKind::SkipTransactions, cause))?;
        Ok(Self {
            identifier,
            transaction_ids,
            body,
        })
    }

    /// Returns the skipped transaction ids.
    #[must_use]
    pub fn transaction_ids(&self) -> &UnsignedLongSet {
        &self.transaction_ids
    }

    /// Returns the encoded body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl IdentifiablePayload for SkipTransactionsPayload {
    type Identifier = LocalHistoryIdentifier;
    const KIND: PayloadKind = PayloadKind::SkipTransactions;

    fn identifier(&self) -> &LocalHistoryIdentifier {
        &self.identifier
    }

    fn size(&self) -> usize {
        self.body.len()
    }

    fn write_body<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_all(&self.body)?;
        Ok(())
    }
}
