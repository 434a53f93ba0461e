//! Normalized data tree model.
//!
//! Nodes are addressed by [`PathArgument`]s and carry either a leaf
//! [`Value`] or an ordered list of children. Schema typing is not modelled
//! here; the codec only needs enough structure to persist and restore trees.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    namespace: Arc<str>,
    local_name: Arc<str>,
}

impl QName {
    /// Creates a qualified name.
    pub fn new(namespace: impl Into<Arc<str>>, local_name: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the local name.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", self.namespace, self.local_name)
    }
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Presence-only value.
    Empty,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// UTF-8 string.
    String(String),
    /// Opaque bytes.
    Binary(Vec<u8>),
    /// Reference to another node.
    Identifier(InstanceIdentifier),
}

/// One step of a path through the tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathArgument {
    /// A named node.
    NodeIdentifier(QName),
    /// A list entry selected by its key leaves.
    NodeWithPredicates(QName, BTreeMap<QName, Value>),
    /// A leaf-list entry selected by its value.
    NodeWithValue(QName, Value),
}

impl PathArgument {
    /// Returns the node type of this step.
    #[must_use]
    pub fn node_type(&self) -> &QName {
        match self {
            Self::NodeIdentifier(name)
            | Self::NodeWithPredicates(name, _)
            | Self::NodeWithValue(name, _) => name,
        }
    }
}

impl fmt::Display for PathArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeIdentifier(name) => write!(f, "{name}"),
            Self::NodeWithPredicates(name, keys) => {
                write!(f, "{name}[")?;
                for (i, (key, value)) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}={value:?}", key.local_name())?;
                }
                write!(f, "]")
            }
            Self::NodeWithValue(name, value) => write!(f, "{name}[.={value:?}]"),
        }
    }
}

/// An absolute path from the tree root. The empty path is the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceIdentifier(Vec<PathArgument>);

impl InstanceIdentifier {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Creates a path from its steps.
    #[must_use]
    pub fn new(steps: Vec<PathArgument>) -> Self {
        Self(steps)
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the steps of this path.
    #[must_use]
    pub fn steps(&self) -> &[PathArgument] {
        &self.0
    }

    /// Returns the last step, if any.
    #[must_use]
    pub fn last(&self) -> Option<&PathArgument> {
        self.0.last()
    }

    /// Returns a child path.
    #[must_use]
    pub fn child(&self, step: PathArgument) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for step in &self.0 {
            write!(f, "/{step}")?;
        }
        Ok(())
    }
}

/// A node in the normalized data tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedNode {
    /// Terminal node carrying a value.
    Leaf {
        /// Node identifier.
        name: PathArgument,
        /// Leaf value.
        value: Value,
    },
    /// Interior node carrying ordered children.
    Container {
        /// Node identifier.
        name: PathArgument,
        /// Child nodes.
        children: Vec<NormalizedNode>,
    },
}

impl NormalizedNode {
    /// Creates a leaf.
    #[must_use]
    pub fn leaf(name: PathArgument, value: Value) -> Self {
        Self::Leaf { name, value }
    }

    /// Creates a container.
    #[must_use]
    pub fn container(name: PathArgument, children: Vec<NormalizedNode>) -> Self {
        Self::Container { name, children }
    }

    /// Returns the node identifier.
    #[must_use]
    pub fn name(&self) -> &PathArgument {
        match self {
            Self::Leaf { name, .. } | Self::Container { name, .. } => name,
        }
    }

    /// Returns the children of a container, or an empty slice for a leaf.
    #[must_use]
    pub fn children(&self) -> &[NormalizedNode] {
        match self {
            Self::Leaf { .. } => &[],
            Self::Container { children, .. } => children,
        }
    }

    /// Looks up a direct child by identifier.
    #[must_use]
    pub fn child(&self, name: &PathArgument) -> Option<&NormalizedNode> {
        self.children().iter().find(|child| child.name() == name)
    }

    /// Resolves a relative path below this node.
    #[must_use]
    pub fn find(&self, path: &[PathArgument]) -> Option<&NormalizedNode> {
        path.iter().try_fold(self, |node, step| node.child(step))
    }

    /// Returns the leaf value, if this is a leaf.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Leaf { value, .. } => Some(value),
            Self::Container { .. } => None,
        }
    }
}
