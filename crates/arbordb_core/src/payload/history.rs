//! Payloads whose body is just their identifier.

use super::{decode_exact, IdentifiablePayload, PayloadKind};
use crate::error::{PayloadError, PayloadResult};
use crate::identifier::{
    ClientIdentifier, LocalHistoryIdentifier, TransactionIdentifier, WireIdentifier,
};
use arbordb_codec::CodecResult;
use bytes::Bytes;
use std::io::Write;

macro_rules! identifier_payload {
    ($(#[$meta:meta])* $name:ident, $identifier:ty, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            identifier: $identifier,
            body: Bytes,
        }

        impl $name {
            /// Creates the payload, encoding the identifier as its body.
            #[must_use]
            pub fn create(identifier: $identifier) -> Self {
                let body = Bytes::from(identifier.to_bytes());
                Self { identifier, body }
            }

            /// Decodes a body, eagerly re-reading the identifier.
            ///
            /// # Errors
            ///
            /// Returns [`PayloadError::CorruptPayload`] if the body is not
            /// exactly one encoded identifier.
            pub fn decode(body: Bytes) -> PayloadResult<Self> {
                let identifier = decode_exact(&body, |input| <$identifier>::read_from(input))
                    .map_err(|cause| PayloadError::corrupt($kind, cause))?;
                Ok(Self { identifier, body })
            }

            /// Returns the encoded body.
            #[must_use]
            pub fn body(&self) -> &Bytes {
                &self.body
            }
        }

        impl IdentifiablePayload for $name {
            type Identifier = $identifier;
            const KIND: PayloadKind = $kind;

            fn identifier(&self) -> &$identifier {
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
    };
}

identifier_payload!(
    /// A transaction was aborted before committing.
    AbortTransactionPayload,
    TransactionIdentifier,
    PayloadKind::Abort
);

identifier_payload!(
    /// A finished transaction's tracking state can be dropped.
    PurgeTransactionPayload,
    TransactionIdentifier,
    PayloadKind::Purge
);

identifier_payload!(
    /// A closed local history's tracking state can be dropped.
    PurgeLocalHistoryPayload,
    LocalHistoryIdentifier,
    PayloadKind::PurgeHistory
);

identifier_payload!(
    /// A local history was closed; no further transactions will be allocated in it.
    CloseLocalHistoryPayload,
    LocalHistoryIdentifier,
    PayloadKind::CloseHistory
);

identifier_payload!(
    /// A local history was created.
    CreateLocalHistoryPayload,
    LocalHistoryIdentifier,
    PayloadKind::CreateHistory
);

identifier_payload!(
    /// A client stopped being tracked. Only produced by old releases; it is
    /// still decoded so their logs replay.
    DisableTrackingPayload,
    ClientIdentifier,
    PayloadKind::DisableTracking
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::FrontendIdentifier;
    use arbordb_codec::CodecError;

    fn history() -> LocalHistoryIdentifier {
        let client = ClientIdentifier::new(FrontendIdentifier::new("member-3", "config"), 0);
        LocalHistoryIdentifier::new(client, 12, 1)
    }

    #[test]
    fn body_is_the_identifier() {
        let payload = CreateLocalHistoryPayload::create(history());
        assert_eq!(payload.body().as_ref(), history().to_bytes().as_slice());
        assert_eq!(payload.size(), payload.body().len());
        assert_eq!(CreateLocalHistoryPayload::KIND, PayloadKind::CreateHistory);
    }

    #[test]
    fn decode_roundtrip() {
        let tx = TransactionIdentifier::new(history(), 99);
        let payload = AbortTransactionPayload::create(tx.clone());
        let decoded = AbortTransactionPayload::decode(payload.body().clone()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.identifier(), &tx);
    }

    #[test]
    fn truncated_body_is_corrupt() {
        let payload = PurgeLocalHistoryPayload::create(history());
        let body = payload.body().slice(..payload.size() - 1);
        match PurgeLocalHistoryPayload::decode(body) {
            Err(PayloadError::CorruptPayload { kind, cause }) => {
                assert_eq!(kind, PayloadKind::PurgeHistory);
                assert!(matches!(cause, CodecError::UnexpectedEof));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn disable_tracking_still_decodes() {
        let client = history().client().clone();
        let payload = DisableTrackingPayload::create(client.clone());
        let decoded = DisableTrackingPayload::decode(payload.body().clone()).unwrap();
        assert_eq!(decoded.identifier(), &client);
    }
}
