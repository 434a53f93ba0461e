//! # ArborDB Codec
//!
//! Versioned binary formats for the ArborDB tree store.
//!
//! This crate provides:
//! - [`VersionTag`], the wire-stable format revision carried by every
//!   versioned stream
//! - Chunked byte buffers which never allocate beyond a configured maximum
//! - Big-endian [`DataOutput`]/[`DataInput`] primitives with compact longs
//! - The normalized-node model and its versioned stream format
//! - Tree candidates and their codec
//! - Range sets over unsigned 64-bit identifiers
//!
//! ## Usage
//!
//! ```
//! use arbordb_codec::{
//!     decode_candidate, encode_candidate, CandidateNode, InstanceIdentifier, NormalizedNode,
//!     PathArgument, QName, TreeCandidate, Value, VersionTag,
//! };
//!
//! let name = PathArgument::NodeIdentifier(QName::new("urn:example", "counter"));
//! let candidate = TreeCandidate::new(
//!     InstanceIdentifier::root().child(name.clone()),
//!     CandidateNode::write(NormalizedNode::leaf(name, Value::Uint(1))),
//! );
//!
//! let bytes = encode_candidate(&candidate, VersionTag::current()).unwrap();
//! let (decoded, version) = decode_candidate(&bytes).unwrap();
//! assert_eq!(decoded, candidate);
//! assert_eq!(version, VersionTag::current());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod candidate;
mod chunked;
mod config;
mod error;
mod io;
mod node;
mod range_set;
mod stream;
mod version;

pub use candidate::{
    decode_candidate, encode_candidate, read_candidate, write_candidate, CandidateNode,
    ModificationKind, TreeCandidate,
};
pub use chunked::{ChunkedByteArray, ChunkedInputStream, ChunkedOutputStream};
pub use config::ChunkingConfig;
pub use error::{CodecError, CodecResult, VersionError};
pub use io::{read_untrusted, DataInput, DataOutput};
pub use node::{InstanceIdentifier, NormalizedNode, PathArgument, QName, Value};
pub use range_set::{UnsignedLongBitmap, UnsignedLongSet};
pub use stream::{NodeDataInput, NodeDataOutput, MAX_NESTING_DEPTH};
pub use version::VersionTag;
