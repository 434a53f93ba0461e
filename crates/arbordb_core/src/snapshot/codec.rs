//! Snapshot wire formats.
//!
//! Legacy snapshots predate version headers:
//!
//! ```text
//! | 0x4C | 0xAB | SodiumSR1 node |
//! ```
//!
//! An empty blob, or a single zero byte, is a legacy snapshot without a
//! root. Versioned snapshots start with their version:
//!
//! ```text
//! | version (2) | present (1) | node? | count (4) | { tag (1) | len (4) | body } * |
//! ```

use super::metadata::{MetadataKind, SnapshotMetadata};
use arbordb_codec::{
    CodecError, CodecResult, DataInput, DataOutput, NodeDataInput, NodeDataOutput,
    NormalizedNode, VersionTag,
};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::warn;

/// First byte of a rooted legacy snapshot.
pub(crate) const LEGACY_MAGIC: u8 = 0x4C;

/// Second byte of a rooted legacy snapshot. No versioned header can carry
/// it together with a nonzero first byte.
pub(crate) const LEGACY_MARKER: u8 = 0xAB;

/// Format the legacy node stream was written in.
const LEGACY_VERSION: VersionTag = VersionTag::SodiumSr1;

/// Whether a blob looks like a legacy snapshot.
pub(crate) fn is_legacy(bytes: &[u8]) -> bool {
    bytes.len() < 2 || (bytes[0] != 0 && bytes[1] == LEGACY_MARKER)
}

pub(crate) fn write_legacy<W: Write>(
    out: &mut W,
    root: Option<&NormalizedNode>,
) -> CodecResult<()> {
    let Some(root) = root else {
        return Ok(());
    };
    out.write_u8(LEGACY_MAGIC)?;
    out.write_u8(LEGACY_MARKER)?;
    NodeDataOutput::new(out, LEGACY_VERSION).write_node(root)
}

pub(crate) fn read_legacy(bytes: &[u8]) -> CodecResult<Option<NormalizedNode>> {
    match bytes {
        [] | [0] => Ok(None),
        [LEGACY_MAGIC, LEGACY_MARKER, ..] => read_legacy_body(bytes).map(Some),
        _ => Err(CodecError::corrupt_stream("not a legacy snapshot")),
    }
}

/// Reads the tree of a rooted legacy snapshot without checking the first
/// two bytes, which may have been damaged or rewritten.
pub(crate) fn read_legacy_body(bytes: &[u8]) -> CodecResult<NormalizedNode> {
    let Some(mut input) = bytes.get(2..) else {
        return Err(CodecError::UnexpectedEof);
    };
    let root = NodeDataInput::headerless(&mut input, LEGACY_VERSION).read_node()?;
    ensure_consumed(input)?;
    Ok(root)
}

pub(crate) fn write_versioned<W: Write>(
    out: &mut W,
    version: VersionTag,
    root: Option<&NormalizedNode>,
    metadata: &BTreeMap<MetadataKind, SnapshotMetadata>,
) -> CodecResult<()> {
    let mut stream = NodeDataOutput::with_header(out, version)?;
    stream.write_optional_node(root)?;
    stream.write_len(metadata.len())?;
    for (kind, record) in metadata {
        let mut body = Vec::new();
        record.write_body(&mut body)?;
        stream.write_u8(kind.code())?;
        stream.write_byte_array(&body)?;
    }
    Ok(())
}

/// Decoded parts of a versioned snapshot.
pub(crate) struct Versioned {
    pub(crate) version: VersionTag,
    pub(crate) root: Option<NormalizedNode>,
    pub(crate) metadata: BTreeMap<MetadataKind, SnapshotMetadata>,
}

pub(crate) fn read_versioned(bytes: &[u8]) -> CodecResult<Versioned> {
    let mut input = bytes;
    let mut stream = NodeDataInput::new(&mut input)?;
    let version = stream.version();
    let root = stream.read_optional_node()?;

    let count = stream.read_len()?;
    let mut metadata = BTreeMap::new();
    for _ in 0..count {
        let tag = stream.read_u8()?;
        let body = stream.read_byte_array()?;
        let Some(kind) = MetadataKind::from_code(tag) else {
            if tag == 0 {
                warn!(len = body.len(), "skipping null snapshot metadata");
            } else {
                warn!(tag, len = body.len(), "skipping unknown snapshot metadata");
            }
            continue;
        };
        let mut body = body.as_slice();
        let record = SnapshotMetadata::read_body(kind, &mut body)?;
        ensure_consumed(body)?;
        metadata.insert(kind, record);
    }
    drop(stream);

    ensure_consumed(input)?;
    Ok(Versioned {
        version,
        root,
        metadata,
    })
}

fn ensure_consumed(rest: &[u8]) -> CodecResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes { count: rest.len() })
    }
}
