//! Shard snapshots.
//!
//! A snapshot is the whole data tree at a point in time plus the bookkeeping
//! a replica needs to resume tracking frontends. Snapshots written before
//! version headers existed carry only the tree; [`ShardSnapshot::deserialize`]
//! tells the two formats apart by their first two bytes.

mod codec;
mod metadata;

pub use metadata::{
    FrontendClientMetadata, FrontendHistoryMetadata, FrontendShardDataTreeSnapshotMetadata,
    MetadataKind, SnapshotMetadata,
};

use crate::error::{SnapshotError, SnapshotResult};
use arbordb_codec::{CodecResult, NormalizedNode, VersionTag};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardSnapshot {
    /// A bare tree from before version headers.
    Legacy {
        /// The tree, if the shard had one.
        root: Option<NormalizedNode>,
    },
    /// A versioned snapshot.
    Versioned {
        /// Format the tree was written in.
        version: VersionTag,
        /// The tree, if the shard had one.
        root: Option<NormalizedNode>,
        /// Auxiliary records, at most one per kind.
        metadata: BTreeMap<MetadataKind, SnapshotMetadata>,
    },
}

impl ShardSnapshot {
    /// Creates a snapshot in the current format. A later record replaces an
    /// earlier one of the same kind.
    pub fn new(
        root: Option<NormalizedNode>,
        metadata: impl IntoIterator<Item = SnapshotMetadata>,
    ) -> Self {
        Self::with_version(VersionTag::current(), root, metadata)
    }

    /// Creates a snapshot in a specific format.
    pub fn with_version(
        version: VersionTag,
        root: Option<NormalizedNode>,
        metadata: impl IntoIterator<Item = SnapshotMetadata>,
    ) -> Self {
        let metadata = metadata
            .into_iter()
            .map(|record| (record.kind(), record))
            .collect();
        Self::Versioned {
            version,
            root,
            metadata,
        }
    }

    /// Creates a legacy snapshot.
    #[must_use]
    pub fn legacy(root: Option<NormalizedNode>) -> Self {
        Self::Legacy { root }
    }

    /// Returns the tree.
    #[must_use]
    pub fn root(&self) -> Option<&NormalizedNode> {
        match self {
            Self::Legacy { root } | Self::Versioned { root, .. } => root.as_ref(),
        }
    }

    /// Consumes the snapshot, returning the tree.
    #[must_use]
    pub fn into_root(self) -> Option<NormalizedNode> {
        match self {
            Self::Legacy { root } | Self::Versioned { root, .. } => root,
        }
    }

    /// Returns the format version; legacy snapshots have none.
    #[must_use]
    pub fn version(&self) -> Option<VersionTag> {
        match self {
            Self::Legacy { .. } => None,
            Self::Versioned { version, .. } => Some(*version),
        }
    }

    /// Whether this is a legacy snapshot.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }

    /// Returns the record of a kind, if present.
    #[must_use]
    pub fn metadata(&self, kind: MetadataKind) -> Option<&SnapshotMetadata> {
        match self {
            Self::Legacy { .. } => None,
            Self::Versioned { metadata, .. } => metadata.get(&kind),
        }
    }

    /// Returns the frontend tracking record, if present.
    #[must_use]
    pub fn frontend_metadata(&self) -> Option<&FrontendShardDataTreeSnapshotMetadata> {
        match self.metadata(MetadataKind::Frontend)? {
            SnapshotMetadata::Frontend(metadata) => Some(metadata),
        }
    }

    /// Encodes the snapshot.
    pub fn serialize(&self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Legacy { root } => codec::write_legacy(&mut out, root.as_ref())?,
            Self::Versioned {
                version,
                root,
                metadata,
            } => codec::write_versioned(&mut out, *version, root.as_ref(), metadata)?,
        }
        Ok(out)
    }

    /// Decodes a snapshot of either format.
    ///
    /// Blobs shorter than two bytes, or whose second byte is the legacy
    /// marker behind a nonzero first byte, are read as legacy. Everything
    /// else is read as versioned and must be consumed exactly. A versioned
    /// read that fails on the shape of the input is retried once as a legacy
    /// tree, ignoring the two bytes that were taken for a version.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Codec`] if the blob does not decode, or
    /// [`SnapshotError::FallbackFailed`] if the legacy retry failed too.
    pub fn deserialize(bytes: &[u8]) -> SnapshotResult<Self> {
        if codec::is_legacy(bytes) {
            let root = codec::read_legacy(bytes)?;
            return Ok(Self::Legacy { root });
        }

        match codec::read_versioned(bytes) {
            Ok(versioned) => Ok(Self::Versioned {
                version: versioned.version,
                root: versioned.root,
                metadata: versioned.metadata,
            }),
            Err(primary) if primary.is_structural() => {
                debug!(error = %primary, "versioned snapshot decode failed, retrying as legacy");
                match codec::read_legacy_body(bytes) {
                    Ok(root) => {
                        warn!(
                            error = %primary,
                            "snapshot decoded as legacy after versioned failure"
                        );
                        Ok(Self::Legacy { root: Some(root) })
                    }
                    Err(legacy) => Err(SnapshotError::FallbackFailed { primary, legacy }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
