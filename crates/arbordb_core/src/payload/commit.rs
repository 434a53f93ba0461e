//! Committed transaction payloads.

use super::{IdentifiablePayload, PayloadKind};
use crate::config::PayloadConfig;
use crate::error::{PayloadError, PayloadResult};
use crate::identifier::{TransactionIdentifier, WireIdentifier};
use arbordb_codec::{
    read_candidate, write_candidate, ChunkedByteArray, ChunkedInputStream, ChunkedOutputStream,
    CodecError, CodecResult, NodeDataInput, NodeDataOutput, TreeCandidate, VersionTag,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::trace;

/// Serialized body of a commit payload.
#[derive(Debug, Clone)]
pub enum CommitBody {
    /// One contiguous array.
    Simple(Bytes),
    /// Chunks no larger than the configured maximum chunk size.
    Chunked(ChunkedByteArray),
}

impl CommitBody {
    /// Returns the body length.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Simple(bytes) => bytes.len(),
            Self::Chunked(array) => array.size(),
        }
    }

    /// Whether the body is kept in chunks.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }

    /// Opens a reader over the body. Chunks are joined transparently.
    #[must_use]
    pub fn open_stream(&self) -> ChunkedInputStream {
        self.to_array().open_stream()
    }

    fn to_array(&self) -> ChunkedByteArray {
        match self {
            Self::Simple(bytes) => ChunkedByteArray::from_bytes(bytes.clone()),
            Self::Chunked(array) => array.clone(),
        }
    }

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        match self {
            Self::Simple(bytes) => {
                out.write_all(bytes)?;
                Ok(())
            }
            Self::Chunked(array) => array.copy_to(out),
        }
    }
}

impl PartialEq for CommitBody {
    fn eq(&self, other: &Self) -> bool {
        self.size() == other.size() && self.to_array() == other.to_array()
    }
}

impl Eq for CommitBody {}

/// A decoded commit: the transaction, its candidate and the stream version
/// the candidate was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTransaction {
    identifier: TransactionIdentifier,
    candidate: TreeCandidate,
    version: VersionTag,
}

impl CandidateTransaction {
    /// Returns the transaction.
    #[must_use]
    pub fn identifier(&self) -> &TransactionIdentifier {
        &self.identifier
    }

    /// Returns the candidate.
    #[must_use]
    pub fn candidate(&self) -> &TreeCandidate {
        &self.candidate
    }

    /// Returns the version the candidate was written in.
    #[must_use]
    pub fn version(&self) -> VersionTag {
        self.version
    }
}

/// A transaction committed a tree candidate.
///
/// The body is the transaction identifier followed by a versioned candidate
/// stream. Only the identifier is decoded up front. The candidate is decoded
/// on first use and cached; [`acquire_candidate`](Self::acquire_candidate)
/// hands the cached value out and forgets it, so a large tree is not kept
/// alive past its single consumer.
#[derive(Debug)]
pub struct CommitTransactionPayload {
    identifier: TransactionIdentifier,
    body: CommitBody,
    candidate: Mutex<Option<Arc<CandidateTransaction>>>,
}

impl CommitTransactionPayload {
    /// Creates a payload in the current stream version.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptStream`] if the candidate is malformed,
    /// such as a non-root node without a name.
    pub fn create(
        identifier: TransactionIdentifier,
        candidate: &TreeCandidate,
        config: &PayloadConfig,
    ) -> CodecResult<Self> {
        Self::create_with_version(identifier, candidate, VersionTag::current(), config)
    }

    /// Creates a payload in a specific stream version.
    ///
    /// Bodies larger than `config.max_array_size` are kept chunked.
    ///
    /// # Errors
    ///
    /// Fails like [`create`](Self::create).
    pub fn create_with_version(
        identifier: TransactionIdentifier,
        candidate: &TreeCandidate,
        version: VersionTag,
        config: &PayloadConfig,
    ) -> CodecResult<Self> {
        let mut out = ChunkedOutputStream::new(config.chunking);
        identifier.write_to(&mut out)?;
        {
            let mut stream = NodeDataOutput::with_header(&mut out, version)?;
            write_candidate(&mut stream, candidate)?;
        }

        let array = out.into_byte_array();
        let body = if array.size() > config.max_array_size {
            CommitBody::Chunked(array)
        } else {
            CommitBody::Simple(array.to_bytes())
        };
        trace!(
            transaction = %identifier,
            size = body.size(),
            chunked = body.is_chunked(),
            "encoded commit payload"
        );
        Ok(Self {
            identifier,
            body,
            candidate: Mutex::new(None),
        })
    }

    /// Decodes a body. The identifier is read eagerly; the candidate is not.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::CorruptPayload`] if the identifier does not
    /// decode.
    pub fn decode(body: CommitBody) -> PayloadResult<Self> {
        let mut stream = body.open_stream();
        let identifier = TransactionIdentifier::read_from(&mut stream)
            .map_err(|cause| PayloadError::corrupt(PayloadKind::Commit, cause))?;
        Ok(Self {
            identifier,
            body,
            candidate: Mutex::new(None),
        })
    }

    /// Returns the serialized body.
    #[must_use]
    pub fn body(&self) -> &CommitBody {
        &self.body
    }

    /// Returns the decoded candidate, decoding it on first use.
    ///
    /// Concurrent first callers are serialized; exactly one of them decodes
    /// and all of them receive the same instance.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::CorruptPayload`] if the candidate does not
    /// decode.
    pub fn candidate(&self) -> PayloadResult<Arc<CandidateTransaction>> {
        let mut cached = self.candidate.lock();
        if let Some(decoded) = cached.as_ref() {
            return Ok(Arc::clone(decoded));
        }
        let decoded = Arc::new(self.decode_candidate()?);
        *cached = Some(Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Returns the decoded candidate and drops the cached copy.
    ///
    /// If nothing is cached the body is decoded again.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::CorruptPayload`] if the candidate does not
    /// decode.
    pub fn acquire_candidate(&self) -> PayloadResult<Arc<CandidateTransaction>> {
        let cached = self.candidate.lock().take();
        match cached {
            Some(decoded) => Ok(decoded),
            None => Ok(Arc::new(self.decode_candidate()?)),
        }
    }

    /// Whether a decoded candidate is currently cached.
    #[must_use]
    pub fn is_candidate_cached(&self) -> bool {
        self.candidate.lock().is_some()
    }

    fn decode_candidate(&self) -> PayloadResult<CandidateTransaction> {
        self.read_candidate_transaction()
            .map_err(|cause| PayloadError::corrupt(PayloadKind::Commit, cause))
    }

    fn read_candidate_transaction(&self) -> CodecResult<CandidateTransaction> {
        let mut stream = self.body.open_stream();
        let identifier = TransactionIdentifier::read_from(&mut stream)?;
        let mut input = NodeDataInput::new(&mut stream)?;
        let candidate = read_candidate(&mut input)?;
        let version = input.version();

        let count = stream.bytes_remaining();
        if count > 0 {
            return Err(CodecError::TrailingBytes { count });
        }
        Ok(CandidateTransaction {
            identifier,
            candidate,
            version,
        })
    }
}

impl IdentifiablePayload for CommitTransactionPayload {
    type Identifier = TransactionIdentifier;
    const KIND: PayloadKind = PayloadKind::Commit;

    fn identifier(&self) -> &TransactionIdentifier {
        &self.identifier
    }

    fn size(&self) -> usize {
        self.body.size()
    }

    fn write_body<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        self.body.write_to(out)
    }
}

impl Clone for CommitTransactionPayload {
    fn clone(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            body: self.body.clone(),
            candidate: Mutex::new(self.candidate.lock().clone()),
        }
    }
}

impl PartialEq for CommitTransactionPayload {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.body == other.body
    }
}

impl Eq for CommitTransactionPayload {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{ClientIdentifier, FrontendIdentifier, LocalHistoryIdentifier};
    use crate::payload::Payload;
    use arbordb_codec::{
        CandidateNode, ChunkingConfig, InstanceIdentifier, ModificationKind, NormalizedNode,
        PathArgument, QName, Value,
    };
    use std::thread;

    fn tx() -> TransactionIdentifier {
        let client = ClientIdentifier::new(FrontendIdentifier::new("member-1", "datastore"), 0);
        TransactionIdentifier::new(LocalHistoryIdentifier::new(client, 1, 0), 42)
    }

    fn arg(local: &str) -> PathArgument {
        PathArgument::NodeIdentifier(QName::new("urn:test:commit", local))
    }

    fn candidate(leaves: usize) -> TreeCandidate {
        let children = (0..leaves)
            .map(|i| {
                CandidateNode::write(NormalizedNode::leaf(
                    arg(&format!("leaf-{i}")),
                    Value::String("x".repeat(32)),
                ))
            })
            .collect();
        TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(ModificationKind::SubtreeModified, None, children),
        )
    }

    fn small_chunks() -> PayloadConfig {
        PayloadConfig::new()
            .max_array_size(256)
            .chunking(ChunkingConfig::new().initial_capacity(32).max_chunk_size(128))
    }

    #[test]
    fn malformed_candidate_is_not_encoded() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![CandidateNode::Write {
                    name: Some(arg("renamed")),
                    data: NormalizedNode::leaf(arg("original"), Value::Uint(1)),
                }],
            ),
        );
        assert!(matches!(
            CommitTransactionPayload::create(tx(), &candidate, &PayloadConfig::default()),
            Err(CodecError::CorruptStream { .. })
        ));
    }

    #[test]
    fn candidate_decodes_lazily_and_is_memoized() {
        let payload =
            CommitTransactionPayload::create(tx(), &candidate(3), &PayloadConfig::default())
                .unwrap();
        let decoded = CommitTransactionPayload::decode(payload.body().clone()).unwrap();
        assert_eq!(decoded.identifier(), &tx());
        assert!(!decoded.is_candidate_cached());

        let first = decoded.candidate().unwrap();
        let second = decoded.candidate().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.candidate(), &candidate(3));
        assert_eq!(first.version(), VersionTag::current());
        assert_eq!(first.identifier(), &tx());
    }

    #[test]
    fn acquire_clears_the_cache() {
        let payload =
            CommitTransactionPayload::create(tx(), &candidate(2), &PayloadConfig::default())
                .unwrap();
        let cached = payload.candidate().unwrap();
        assert!(payload.is_candidate_cached());

        let acquired = payload.acquire_candidate().unwrap();
        assert!(Arc::ptr_eq(&cached, &acquired));
        assert!(!payload.is_candidate_cached());

        let again = payload.acquire_candidate().unwrap();
        assert!(!Arc::ptr_eq(&acquired, &again));
        assert_eq!(*acquired, *again);
    }

    #[test]
    fn racing_readers_share_one_decode() {
        let payload = Arc::new(
            CommitTransactionPayload::create(tx(), &candidate(50), &PayloadConfig::default())
                .unwrap(),
        );
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let payload = Arc::clone(&payload);
                thread::spawn(move || payload.candidate().unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], result));
        }
    }

    #[test]
    fn large_body_is_chunked_and_reads_back() {
        let config = small_chunks();
        let payload = CommitTransactionPayload::create(tx(), &candidate(20), &config).unwrap();
        assert!(payload.body().is_chunked());
        assert!(payload.size() > config.max_array_size);

        let framed = Payload::Commit(payload.clone());
        let bytes = framed.to_bytes().unwrap();
        let read = Payload::read_from(&mut bytes.as_slice(), &config).unwrap();
        let Payload::Commit(read) = read else {
            panic!("expected a commit payload");
        };
        assert!(read.body().is_chunked());
        assert_eq!(read, payload);
        assert_eq!(read.candidate().unwrap().candidate(), &candidate(20));
    }

    #[test]
    fn simple_and_chunked_bodies_compare_by_content() {
        let chunked =
            CommitTransactionPayload::create(tx(), &candidate(20), &small_chunks()).unwrap();
        let simple =
            CommitTransactionPayload::create(tx(), &candidate(20), &PayloadConfig::default())
                .unwrap();
        assert!(chunked.body().is_chunked());
        assert!(!simple.body().is_chunked());
        assert_eq!(chunked, simple);
    }

    #[test]
    fn older_versions_roundtrip() {
        for version in [VersionTag::SodiumSr1, VersionTag::Magnesium, VersionTag::ChlorineSr2] {
            let payload = CommitTransactionPayload::create_with_version(
                tx(),
                &candidate(2),
                version,
                &PayloadConfig::default(),
            )
            .unwrap();
            let decoded = CommitTransactionPayload::decode(payload.body().clone()).unwrap();
            assert_eq!(decoded.candidate().unwrap().version(), version);
        }
    }

    #[test]
    fn corrupt_candidate_fails_on_access_not_decode() {
        let mut body = tx().to_bytes();
        body.extend_from_slice(&VersionTag::current().to_bytes());
        body.extend_from_slice(&0i32.to_be_bytes());
        body.push(0xEE);
        let payload = CommitTransactionPayload::decode(CommitBody::Simple(body.into())).unwrap();
        match payload.candidate() {
            Err(PayloadError::CorruptPayload { kind, cause }) => {
                assert_eq!(kind, PayloadKind::Commit);
                assert!(matches!(cause, CodecError::UnknownNodeKind { tag: 0xEE }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_candidate_bytes_are_corrupt() {
        let payload =
            CommitTransactionPayload::create(tx(), &candidate(1), &PayloadConfig::default())
                .unwrap();
        let CommitBody::Simple(bytes) = payload.body().clone() else {
            panic!("expected a simple body");
        };
        let mut extended = bytes.to_vec();
        extended.push(7);
        let payload =
            CommitTransactionPayload::decode(CommitBody::Simple(extended.into())).unwrap();
        assert!(matches!(
            payload.candidate(),
            Err(PayloadError::CorruptPayload {
                cause: CodecError::TrailingBytes { count: 1 },
                ..
            })
        ));
    }
}
