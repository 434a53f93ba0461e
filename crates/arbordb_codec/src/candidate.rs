//! Tree candidates and their stream codec.
//!
//! A candidate is a rooted forward diff: every node records how it was
//! modified and, for writes, the data after the change. Before-images are
//! never serialized.
//!
//! ## Wire layout
//!
//! ```text
//! candidate := path root_tag root_body
//! root_body := node                      (WRITE)
//!            | i32 child*                (SUBTREE_MODIFIED, APPEARED, DISAPPEARED)
//!            | <empty>                   (DELETE, UNMODIFIED)
//! child     := DELETE path_arg
//!            | WRITE node
//!            | UNMODIFIED
//!            | kind path_arg i32 child*  (subtree kinds)
//! ```
//!
//! Decoding drops unmodified children, and a non-root subtree node whose
//! decoded children are all dropped is dropped as well. The root is always
//! kept.

use crate::error::{CodecError, CodecResult};
use crate::io::{DataInput, DataOutput};
use crate::node::{InstanceIdentifier, NormalizedNode, PathArgument};
use crate::stream::{NodeDataInput, NodeDataOutput};
use crate::version::VersionTag;
use std::io::{Read, Write};
use tracing::debug;

/// How a candidate node was modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModificationKind {
    /// The node was removed.
    Delete = 0,
    /// Some descendants changed.
    SubtreeModified = 1,
    /// Nothing changed.
    Unmodified = 2,
    /// The node was replaced wholesale.
    Write = 3,
    /// A non-presence node came into existence through its children.
    Appeared = 4,
    /// A non-presence node vanished because its children did.
    Disappeared = 5,
}

impl ModificationKind {
    /// Returns the wire tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Resolves a wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownNodeKind`] for unassigned tags.
    pub fn from_tag(tag: u8) -> CodecResult<Self> {
        match tag {
            0 => Ok(Self::Delete),
            1 => Ok(Self::SubtreeModified),
            2 => Ok(Self::Unmodified),
            3 => Ok(Self::Write),
            4 => Ok(Self::Appeared),
            5 => Ok(Self::Disappeared),
            _ => Err(CodecError::UnknownNodeKind { tag }),
        }
    }

    /// Whether nodes of this kind carry a child list.
    #[must_use]
    pub const fn is_subtree(self) -> bool {
        matches!(
            self,
            Self::SubtreeModified | Self::Appeared | Self::Disappeared
        )
    }
}

/// One node of a [`TreeCandidate`]. The name is absent only at the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateNode {
    /// Nothing changed at or below this node.
    Unmodified {
        /// Path step to this node.
        name: Option<PathArgument>,
    },
    /// The node was written; `data` is the value after the change.
    Write {
        /// Path step to this node. Below the root it must equal the name of
        /// `data`, since only `data` is encoded.
        name: Option<PathArgument>,
        /// Data after the change.
        data: NormalizedNode,
    },
    /// The node was deleted.
    Delete {
        /// Path step to this node.
        name: Option<PathArgument>,
    },
    /// Some descendants changed.
    Modified {
        /// One of the subtree kinds.
        kind: ModificationKind,
        /// Path step to this node.
        name: Option<PathArgument>,
        /// Modified children.
        children: Vec<CandidateNode>,
    },
}

impl CandidateNode {
    /// Creates a write node named after its data.
    #[must_use]
    pub fn write(data: NormalizedNode) -> Self {
        Self::Write {
            name: Some(data.name().clone()),
            data,
        }
    }

    /// Creates a delete node.
    #[must_use]
    pub fn delete(name: PathArgument) -> Self {
        Self::Delete { name: Some(name) }
    }

    /// Creates a subtree node.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is not a subtree kind.
    #[must_use]
    pub fn modified(
        kind: ModificationKind,
        name: Option<PathArgument>,
        children: Vec<CandidateNode>,
    ) -> Self {
        assert!(kind.is_subtree(), "{kind:?} does not carry children");
        Self::Modified {
            kind,
            name,
            children,
        }
    }

    /// Returns the modification kind.
    #[must_use]
    pub fn kind(&self) -> ModificationKind {
        match self {
            Self::Unmodified { .. } => ModificationKind::Unmodified,
            Self::Write { .. } => ModificationKind::Write,
            Self::Delete { .. } => ModificationKind::Delete,
            Self::Modified { kind, .. } => *kind,
        }
    }

    /// Returns the path step, or `None` at the root.
    #[must_use]
    pub fn name(&self) -> Option<&PathArgument> {
        match self {
            Self::Unmodified { name }
            | Self::Write { name, .. }
            | Self::Delete { name }
            | Self::Modified { name, .. } => name.as_ref(),
        }
    }

    /// Returns the data after the change, for writes.
    #[must_use]
    pub fn data_after(&self) -> Option<&NormalizedNode> {
        match self {
            Self::Write { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns the modified children. Empty for every non-subtree kind.
    #[must_use]
    pub fn children(&self) -> &[CandidateNode] {
        match self {
            Self::Modified { children, .. } => children,
            _ => &[],
        }
    }

    /// Applies the decode-side elision rule in memory: unmodified nodes
    /// vanish, and so do subtree nodes left without children.
    #[must_use]
    pub fn elide_unmodified(self) -> Option<Self> {
        match self {
            Self::Unmodified { .. } => None,
            Self::Modified {
                kind,
                name,
                children,
            } => {
                let children: Vec<_> = children
                    .into_iter()
                    .filter_map(Self::elide_unmodified)
                    .collect();
                if children.is_empty() {
                    None
                } else {
                    Some(Self::Modified {
                        kind,
                        name,
                        children,
                    })
                }
            }
            other => Some(other),
        }
    }
}

/// A rooted modification diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeCandidate {
    root_path: InstanceIdentifier,
    root: CandidateNode,
}

impl TreeCandidate {
    /// Creates a candidate rooted at `root_path`.
    ///
    /// The root node's own name is discarded: the root is addressed by
    /// `root_path` alone.
    #[must_use]
    pub fn new(root_path: InstanceIdentifier, root: CandidateNode) -> Self {
        let root = match root {
            CandidateNode::Unmodified { .. } => CandidateNode::Unmodified { name: None },
            CandidateNode::Write { data, .. } => CandidateNode::Write { name: None, data },
            CandidateNode::Delete { .. } => CandidateNode::Delete { name: None },
            CandidateNode::Modified { kind, children, .. } => CandidateNode::Modified {
                kind,
                name: None,
                children,
            },
        };
        Self { root_path, root }
    }

    /// Returns the path of the root node.
    #[must_use]
    pub fn root_path(&self) -> &InstanceIdentifier {
        &self.root_path
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> &CandidateNode {
        &self.root
    }

    /// Returns the candidate as it reads back after a round trip.
    #[must_use]
    pub fn without_unmodified(self) -> Self {
        let root = match self.root {
            CandidateNode::Modified { kind, children, .. } => CandidateNode::Modified {
                kind,
                name: None,
                children: children
                    .into_iter()
                    .filter_map(CandidateNode::elide_unmodified)
                    .collect(),
            },
            other => other,
        };
        Self {
            root_path: self.root_path,
            root,
        }
    }
}

/// Writes a candidate body into an open node stream.
pub fn write_candidate<W: Write>(
    out: &mut NodeDataOutput<W>,
    candidate: &TreeCandidate,
) -> CodecResult<()> {
    out.write_instance_identifier(candidate.root_path())?;
    let root = candidate.root();
    out.write_u8(root.kind().tag())?;
    match root {
        CandidateNode::Write { data, .. } => out.write_node(data),
        CandidateNode::Modified { children, .. } => write_children(out, children),
        CandidateNode::Delete { .. } | CandidateNode::Unmodified { .. } => Ok(()),
    }
}

fn write_children<W: Write>(
    out: &mut NodeDataOutput<W>,
    children: &[CandidateNode],
) -> CodecResult<()> {
    out.write_len(children.len())?;
    for child in children {
        write_child(out, child)?;
    }
    Ok(())
}

fn write_child<W: Write>(out: &mut NodeDataOutput<W>, node: &CandidateNode) -> CodecResult<()> {
    out.write_u8(node.kind().tag())?;
    match node {
        CandidateNode::Unmodified { .. } => Ok(()),
        CandidateNode::Write { name, data } => {
            let name = required_name(name)?;
            if name != data.name() {
                return Err(CodecError::corrupt_stream(format!(
                    "write node {name} carries data named {}",
                    data.name()
                )));
            }
            out.write_node(data)
        }
        CandidateNode::Delete { name } => out.write_path_argument(required_name(name)?),
        CandidateNode::Modified { name, children, .. } => {
            out.write_path_argument(required_name(name)?)?;
            write_children(out, children)
        }
    }
}

fn required_name(name: &Option<PathArgument>) -> CodecResult<&PathArgument> {
    name.as_ref()
        .ok_or_else(|| CodecError::corrupt_stream("non-root candidate node without a name"))
}

/// Reads a candidate body from an open node stream.
///
/// # Errors
///
/// Returns [`CodecError::UnknownNodeKind`] for unassigned modification tags
/// and structural errors for malformed input.
pub fn read_candidate<R: Read>(input: &mut NodeDataInput<R>) -> CodecResult<TreeCandidate> {
    let root_path = input.read_instance_identifier()?;
    let kind = ModificationKind::from_tag(input.read_u8()?)?;
    let root = match kind {
        ModificationKind::Delete => CandidateNode::Delete { name: None },
        ModificationKind::Unmodified => CandidateNode::Unmodified { name: None },
        ModificationKind::Write => CandidateNode::Write {
            name: None,
            data: input.read_node()?,
        },
        _ => CandidateNode::Modified {
            kind,
            name: None,
            children: read_children(input)?,
        },
    };
    Ok(TreeCandidate { root_path, root })
}

fn read_children<R: Read>(input: &mut NodeDataInput<R>) -> CodecResult<Vec<CandidateNode>> {
    let count = input.read_len()?;
    let mut children = Vec::new();
    for _ in 0..count {
        if let Some(child) = read_child(input)? {
            children.push(child);
        }
    }
    Ok(children)
}

fn read_child<R: Read>(input: &mut NodeDataInput<R>) -> CodecResult<Option<CandidateNode>> {
    let kind = ModificationKind::from_tag(input.read_u8()?)?;
    match kind {
        ModificationKind::Unmodified => Ok(None),
        ModificationKind::Delete => Ok(Some(CandidateNode::delete(input.read_path_argument()?))),
        ModificationKind::Write => Ok(Some(CandidateNode::write(input.read_node()?))),
        _ => {
            input.enter()?;
            let name = input.read_path_argument()?;
            let children = read_children(input)?;
            input.leave();
            if children.is_empty() {
                debug!(%name, ?kind, "eliding modified candidate node without modified children");
                return Ok(None);
            }
            Ok(Some(CandidateNode::Modified {
                kind,
                name: Some(name),
                children,
            }))
        }
    }
}

/// Encodes a candidate as a standalone stream with a version header.
pub fn encode_candidate(candidate: &TreeCandidate, version: VersionTag) -> CodecResult<Vec<u8>> {
    let mut out = NodeDataOutput::with_header(Vec::new(), version)?;
    write_candidate(&mut out, candidate)?;
    Ok(out.into_inner())
}

/// Decodes a standalone candidate stream, returning the candidate and the
/// version it was written in.
///
/// # Errors
///
/// Fails on unsupported versions, malformed content and
/// [`CodecError::TrailingBytes`] if the input is not consumed exactly.
pub fn decode_candidate(bytes: &[u8]) -> CodecResult<(TreeCandidate, VersionTag)> {
    let mut input = NodeDataInput::new(bytes)?;
    let candidate = read_candidate(&mut input)?;
    let version = input.version();
    let rest = input.into_inner();
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes { count: rest.len() });
    }
    Ok((candidate, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{QName, Value};

    fn arg(local: &str) -> PathArgument {
        PathArgument::NodeIdentifier(QName::new("urn:example:cand", local))
    }

    fn leaf(local: &str, value: i64) -> NormalizedNode {
        NormalizedNode::leaf(arg(local), Value::Int(value))
    }

    fn roundtrip(candidate: &TreeCandidate, version: VersionTag) -> TreeCandidate {
        let bytes = encode_candidate(candidate, version).unwrap();
        let (decoded, read_version) = decode_candidate(&bytes).unwrap();
        assert_eq!(read_version, version);
        decoded
    }

    #[test]
    fn write_root_roundtrip() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root().child(arg("top")),
            CandidateNode::write(NormalizedNode::container(arg("top"), vec![leaf("a", 1)])),
        );
        assert_eq!(roundtrip(&candidate, VersionTag::current()), candidate);
        assert!(candidate.root().name().is_none());
    }

    #[test]
    fn mixed_children_roundtrip() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![
                    CandidateNode::write(leaf("w", 5)),
                    CandidateNode::delete(arg("d")),
                    CandidateNode::modified(
                        ModificationKind::Appeared,
                        Some(arg("app")),
                        vec![CandidateNode::write(leaf("x", 1))],
                    ),
                    CandidateNode::modified(
                        ModificationKind::Disappeared,
                        Some(arg("gone")),
                        vec![CandidateNode::delete(arg("y"))],
                    ),
                ],
            ),
        );
        for version in [VersionTag::SodiumSr1, VersionTag::Magnesium, VersionTag::Potassium] {
            assert_eq!(roundtrip(&candidate, version), candidate);
        }
    }

    #[test]
    fn unmodified_children_are_dropped() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![
                    CandidateNode::Unmodified { name: Some(arg("u")) },
                    CandidateNode::write(leaf("w", 5)),
                ],
            ),
        );
        let decoded = roundtrip(&candidate, VersionTag::current());
        assert_eq!(decoded.root().children().len(), 1);
        assert_eq!(decoded.root().children()[0].kind(), ModificationKind::Write);
        assert_eq!(decoded, candidate.without_unmodified());
    }

    #[test]
    fn modified_child_with_only_unmodified_children_is_elided() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![CandidateNode::modified(
                    ModificationKind::SubtreeModified,
                    Some(arg("inner")),
                    vec![CandidateNode::Unmodified { name: Some(arg("u")) }],
                )],
            ),
        );
        let decoded = roundtrip(&candidate, VersionTag::current());
        assert!(decoded.root().children().is_empty());
        assert_eq!(decoded.root().kind(), ModificationKind::SubtreeModified);
    }

    #[test]
    fn empty_root_is_kept() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(ModificationKind::Appeared, None, Vec::new()),
        );
        assert_eq!(roundtrip(&candidate, VersionTag::current()), candidate);
    }

    #[test]
    fn delete_and_unmodified_roots() {
        for root in [
            CandidateNode::Delete { name: None },
            CandidateNode::Unmodified { name: None },
        ] {
            let candidate = TreeCandidate::new(InstanceIdentifier::root().child(arg("r")), root);
            assert_eq!(roundtrip(&candidate, VersionTag::current()), candidate);
        }
    }

    #[test]
    fn unknown_tag_fails() {
        let mut bytes = VersionTag::current().to_bytes().to_vec();
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.push(9);
        assert!(matches!(
            decode_candidate(&bytes),
            Err(CodecError::UnknownNodeKind { tag: 9 })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::Delete { name: None },
        );
        let mut bytes = encode_candidate(&candidate, VersionTag::current()).unwrap();
        bytes.extend_from_slice(&[1, 2]);
        assert!(matches!(
            decode_candidate(&bytes),
            Err(CodecError::TrailingBytes { count: 2 })
        ));
    }

    #[test]
    fn write_named_apart_from_its_data_is_rejected() {
        let candidate = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![CandidateNode::Write {
                    name: Some(arg("a")),
                    data: leaf("b", 1),
                }],
            ),
        );
        assert!(matches!(
            encode_candidate(&candidate, VersionTag::current()),
            Err(CodecError::CorruptStream { .. })
        ));

        let unnamed = TreeCandidate::new(
            InstanceIdentifier::root(),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![CandidateNode::Write {
                    name: None,
                    data: leaf("b", 1),
                }],
            ),
        );
        assert!(encode_candidate(&unnamed, VersionTag::current()).is_err());
    }

    #[test]
    fn kind_tags_are_stable() {
        let expected = [
            (ModificationKind::Delete, 0),
            (ModificationKind::SubtreeModified, 1),
            (ModificationKind::Unmodified, 2),
            (ModificationKind::Write, 3),
            (ModificationKind::Appeared, 4),
            (ModificationKind::Disappeared, 5),
        ];
        for (kind, tag) in expected {
            assert_eq!(kind.tag(), tag);
            assert_eq!(ModificationKind::from_tag(tag).unwrap(), kind);
        }
    }

    #[test]
    #[should_panic(expected = "does not carry children")]
    fn modified_rejects_leaf_kinds() {
        let _ = CandidateNode::modified(ModificationKind::Write, None, Vec::new());
    }
}
