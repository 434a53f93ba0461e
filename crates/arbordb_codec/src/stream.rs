//! Versioned normalized-node streams.
//!
//! A stream starts with a [`VersionTag`] header followed by tagged items.
//! The version decides how qualified names are written: literally in
//! [`VersionTag::SodiumSr1`], and through a per-stream interning table from
//! [`VersionTag::Magnesium`] on, where the first occurrence defines a name
//! and later occurrences refer back to it by index.
//!
//! ## Item layout
//!
//! ```text
//! node      := LEAF path_arg value | CONTAINER path_arg i32 node*
//! path_arg  := NODE qname | PREDICATES qname i32 (qname value)* | VALUE qname value
//! value     := EMPTY | BOOL u8 | INT i64 | UINT u64 | STRING str | BINARY bytes | IDENTIFIER path
//! path      := i32 path_arg*
//! qname     := str str                       (SodiumSr1)
//!            | DEFINE str str | REF i32      (Magnesium and later)
//! ```

use crate::error::{CodecError, CodecResult};
use crate::io::{DataInput, DataOutput};
use crate::node::{InstanceIdentifier, NormalizedNode, PathArgument, QName, Value};
use crate::version::VersionTag;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};

/// Nesting limit for decoded trees and paths.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Upper bound on preallocation driven by an untrusted count.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

mod node_tag {
    pub const LEAF: u8 = 1;
    pub const CONTAINER: u8 = 2;
}

mod path_tag {
    pub const NODE: u8 = 1;
    pub const PREDICATES: u8 = 2;
    pub const VALUE: u8 = 3;
}

mod value_tag {
    pub const EMPTY: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const UINT: u8 = 3;
    pub const STRING: u8 = 4;
    pub const BINARY: u8 = 5;
    pub const IDENTIFIER: u8 = 6;
}

mod qname_tag {
    pub const DEFINE: u8 = 0;
    pub const REF: u8 = 1;
}

fn with_bounded_capacity<T>(count: usize) -> Vec<T> {
    Vec::with_capacity(count.min(MAX_PREALLOCATED_ITEMS))
}

/// Writes normalized nodes in a given stream version.
#[derive(Debug)]
pub struct NodeDataOutput<W> {
    out: W,
    version: VersionTag,
    names: HashMap<QName, i32>,
}

impl<W: Write> NodeDataOutput<W> {
    /// Creates an output without writing the version header.
    pub fn new(out: W, version: VersionTag) -> Self {
        Self {
            out,
            version,
            names: HashMap::new(),
        }
    }

    /// Creates an output and writes the version header.
    pub fn with_header(mut out: W, version: VersionTag) -> CodecResult<Self> {
        version.write_to(&mut out)?;
        Ok(Self::new(out, version))
    }

    /// Returns the stream version.
    #[must_use]
    pub fn version(&self) -> VersionTag {
        self.version
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes a qualified name.
    pub fn write_qname(&mut self, name: &QName) -> CodecResult<()> {
        if !self.version.interns_names() {
            self.out.write_str(name.namespace())?;
            return self.out.write_str(name.local_name());
        }
        if let Some(index) = self.names.get(name) {
            self.out.write_u8(qname_tag::REF)?;
            return self.out.write_i32(*index);
        }
        let index = i32::try_from(self.names.len())
            .map_err(|_| CodecError::corrupt_stream("too many distinct names in stream"))?;
        self.names.insert(name.clone(), index);
        self.out.write_u8(qname_tag::DEFINE)?;
        self.out.write_str(name.namespace())?;
        self.out.write_str(name.local_name())
    }

    /// Writes a leaf value.
    pub fn write_value(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Empty => self.out.write_u8(value_tag::EMPTY),
            Value::Bool(v) => {
                self.out.write_u8(value_tag::BOOL)?;
                self.out.write_bool(*v)
            }
            Value::Int(v) => {
                self.out.write_u8(value_tag::INT)?;
                self.out.write_i64(*v)
            }
            Value::Uint(v) => {
                self.out.write_u8(value_tag::UINT)?;
                self.out.write_u64(*v)
            }
            Value::String(v) => {
                self.out.write_u8(value_tag::STRING)?;
                self.out.write_str(v)
            }
            Value::Binary(v) => {
                self.out.write_u8(value_tag::BINARY)?;
                self.out.write_byte_array(v)
            }
            Value::Identifier(path) => {
                self.out.write_u8(value_tag::IDENTIFIER)?;
                self.write_instance_identifier(path)
            }
        }
    }

    /// Writes one path step.
    pub fn write_path_argument(&mut self, arg: &PathArgument) -> CodecResult<()> {
        match arg {
            PathArgument::NodeIdentifier(name) => {
                self.out.write_u8(path_tag::NODE)?;
                self.write_qname(name)
            }
            PathArgument::NodeWithPredicates(name, keys) => {
                self.out.write_u8(path_tag::PREDICATES)?;
                self.write_qname(name)?;
                self.out.write_len(keys.len())?;
                for (key, value) in keys {
                    self.write_qname(key)?;
                    self.write_value(value)?;
                }
                Ok(())
            }
            PathArgument::NodeWithValue(name, value) => {
                self.out.write_u8(path_tag::VALUE)?;
                self.write_qname(name)?;
                self.write_value(value)
            }
        }
    }

    /// Writes an absolute path.
    pub fn write_instance_identifier(&mut self, path: &InstanceIdentifier) -> CodecResult<()> {
        self.out.write_len(path.steps().len())?;
        for step in path.steps() {
            self.write_path_argument(step)?;
        }
        Ok(())
    }

    /// Writes a node and everything below it.
    pub fn write_node(&mut self, node: &NormalizedNode) -> CodecResult<()> {
        match node {
            NormalizedNode::Leaf { name, value } => {
                self.out.write_u8(node_tag::LEAF)?;
                self.write_path_argument(name)?;
                self.write_value(value)
            }
            NormalizedNode::Container { name, children } => {
                self.out.write_u8(node_tag::CONTAINER)?;
                self.write_path_argument(name)?;
                self.out.write_len(children.len())?;
                for child in children {
                    self.write_node(child)?;
                }
                Ok(())
            }
        }
    }

    /// Writes a presence flag followed by the node, if any.
    pub fn write_optional_node(&mut self, node: Option<&NormalizedNode>) -> CodecResult<()> {
        self.out.write_bool(node.is_some())?;
        match node {
            Some(node) => self.write_node(node),
            None => Ok(()),
        }
    }
}

impl<W: Write> Write for NodeDataOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Reads normalized nodes written by a [`NodeDataOutput`].
#[derive(Debug)]
pub struct NodeDataInput<R> {
    input: R,
    version: VersionTag,
    names: Vec<QName>,
    depth: usize,
}

impl<R: Read> NodeDataInput<R> {
    /// Reads and resolves the version header.
    ///
    /// # Errors
    ///
    /// Fails with [`CodecError::Version`] if the header names an unsupported
    /// version.
    pub fn new(mut input: R) -> CodecResult<Self> {
        let version = VersionTag::read_from(&mut input)?;
        Ok(Self::headerless(input, version))
    }

    /// Creates an input for a stream without a header.
    pub fn headerless(input: R, version: VersionTag) -> Self {
        Self {
            input,
            version,
            names: Vec::new(),
            depth: 0,
        }
    }

    /// Returns the stream version.
    #[must_use]
    pub fn version(&self) -> VersionTag {
        self.version
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.input
    }

    /// Returns a mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.input
    }

    /// Reads a qualified name.
    pub fn read_qname(&mut self) -> CodecResult<QName> {
        if !self.version.interns_names() {
            return self.read_literal_qname();
        }
        match self.input.read_u8()? {
            qname_tag::DEFINE => {
                let name = self.read_literal_qname()?;
                self.names.push(name.clone());
                Ok(name)
            }
            qname_tag::REF => {
                let index = self.input.read_i32()?;
                usize::try_from(index)
                    .ok()
                    .and_then(|index| self.names.get(index))
                    .cloned()
                    .ok_or_else(|| {
                        CodecError::corrupt_stream(format!(
                            "name reference {index} outside table of {}",
                            self.names.len()
                        ))
                    })
            }
            other => Err(CodecError::corrupt_stream(format!(
                "invalid name tag {other}"
            ))),
        }
    }

    fn read_literal_qname(&mut self) -> CodecResult<QName> {
        let namespace = self.input.read_str()?;
        let local_name = self.input.read_str()?;
        Ok(QName::new(namespace, local_name))
    }

    /// Reads a leaf value.
    pub fn read_value(&mut self) -> CodecResult<Value> {
        let value = match self.input.read_u8()? {
            value_tag::EMPTY => Value::Empty,
            value_tag::BOOL => Value::Bool(self.input.read_bool()?),
            value_tag::INT => Value::Int(self.input.read_i64()?),
            value_tag::UINT => Value::Uint(self.input.read_u64()?),
            value_tag::STRING => Value::String(self.input.read_str()?),
            value_tag::BINARY => Value::Binary(self.input.read_byte_array()?),
            value_tag::IDENTIFIER => Value::Identifier(self.read_instance_identifier()?),
            other => {
                return Err(CodecError::corrupt_stream(format!(
                    "invalid value tag {other}"
                )))
            }
        };
        Ok(value)
    }

    /// Reads one path step.
    pub fn read_path_argument(&mut self) -> CodecResult<PathArgument> {
        match self.input.read_u8()? {
            path_tag::NODE => Ok(PathArgument::NodeIdentifier(self.read_qname()?)),
            path_tag::PREDICATES => {
                let name = self.read_qname()?;
                let count = self.input.read_len()?;
                let mut keys = BTreeMap::new();
                for _ in 0..count {
                    let key = self.read_qname()?;
                    let value = self.read_value()?;
                    keys.insert(key, value);
                }
                Ok(PathArgument::NodeWithPredicates(name, keys))
            }
            path_tag::VALUE => {
                let name = self.read_qname()?;
                let value = self.read_value()?;
                Ok(PathArgument::NodeWithValue(name, value))
            }
            other => Err(CodecError::corrupt_stream(format!(
                "invalid path argument tag {other}"
            ))),
        }
    }

    /// Reads an absolute path.
    pub fn read_instance_identifier(&mut self) -> CodecResult<InstanceIdentifier> {
        self.enter()?;
        let count = self.input.read_len()?;
        let mut steps = with_bounded_capacity(count);
        for _ in 0..count {
            steps.push(self.read_path_argument()?);
        }
        self.leave();
        Ok(InstanceIdentifier::new(steps))
    }

    /// Reads a node and everything below it.
    pub fn read_node(&mut self) -> CodecResult<NormalizedNode> {
        match self.input.read_u8()? {
            node_tag::LEAF => {
                let name = self.read_path_argument()?;
                let value = self.read_value()?;
                Ok(NormalizedNode::leaf(name, value))
            }
            node_tag::CONTAINER => {
                self.enter()?;
                let name = self.read_path_argument()?;
                let count = self.input.read_len()?;
                let mut children = with_bounded_capacity(count);
                for _ in 0..count {
                    children.push(self.read_node()?);
                }
                self.leave();
                Ok(NormalizedNode::container(name, children))
            }
            other => Err(CodecError::corrupt_stream(format!(
                "invalid node tag {other}"
            ))),
        }
    }

    /// Reads a presence flag followed by the node, if present.
    pub fn read_optional_node(&mut self) -> CodecResult<Option<NormalizedNode>> {
        if self.input.read_bool()? {
            self.read_node().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Tracks recursion so corrupt input cannot exhaust the stack.
    pub(crate) fn enter(&mut self) -> CodecResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CodecError::corrupt_stream(format!(
                "nesting deeper than {MAX_NESTING_DEPTH}"
            )));
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth -= 1;
    }
}

impl<R: Read> Read for NodeDataInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}
