//! RPC routing.
//!
//! An operation can be implemented globally or per context, where the
//! context is an instance identifier carried in the operation's input.
//! [`RpcRoutingTable`] is an immutable value; [`RpcRouter`] publishes a new
//! table on every registration change and tells availability listeners
//! about routes appearing and disappearing.

mod router;
mod table;

pub use router::{AvailabilityListener, ListenerRegistration, RpcRegistration, RpcRouter};
pub use table::{RoutingEntry, RpcRoutingTable};

use crate::error::RpcError;
use arbordb_codec::{InstanceIdentifier, NormalizedNode, PathArgument, QName, Value};
use async_trait::async_trait;
use std::fmt;

/// An operation implementation.
#[async_trait]
pub trait RpcImplementation: Send + Sync {
    /// Invokes the operation.
    async fn invoke(
        &self,
        operation: &QName,
        input: NormalizedNode,
    ) -> Result<Option<NormalizedNode>, RpcError>;
}

/// Extracts the routing context from an operation's input.
pub trait ContextKeyExtractor: Send + Sync {
    /// Returns the context, or `None` to route globally.
    fn extract(&self, input: &NormalizedNode) -> Option<InstanceIdentifier>;
}

/// Routes by an identifier-valued leaf directly below the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafContextExtractor {
    leaf: PathArgument,
}

impl LeafContextExtractor {
    /// Creates an extractor reading the named leaf.
    #[must_use]
    pub fn new(leaf: PathArgument) -> Self {
        Self { leaf }
    }
}

impl ContextKeyExtractor for LeafContextExtractor {
    fn extract(&self, input: &NormalizedNode) -> Option<InstanceIdentifier> {
        match input.child(&self.leaf)?.value()? {
            Value::Identifier(context) => Some(context.clone()),
            _ => None,
        }
    }
}

/// An operation plus the context it is implemented for. A `None` context
/// is the global implementation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RpcRoute {
    operation: QName,
    context: Option<InstanceIdentifier>,
}

impl RpcRoute {
    /// Creates a global route.
    #[must_use]
    pub fn global(operation: QName) -> Self {
        Self {
            operation,
            context: None,
        }
    }

    /// Creates a route for one context.
    #[must_use]
    pub fn routed(operation: QName, context: InstanceIdentifier) -> Self {
        Self {
            operation,
            context: Some(context),
        }
    }

    /// Returns the operation.
    #[must_use]
    pub fn operation(&self) -> &QName {
        &self.operation
    }

    /// Returns the context, if routed.
    #[must_use]
    pub fn context(&self) -> Option<&InstanceIdentifier> {
        self.context.as_ref()
    }
}

impl fmt::Display for RpcRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}@{}", self.operation, context),
            None => write!(f, "{}", self.operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(local: &str) -> PathArgument {
        PathArgument::NodeIdentifier(QName::new("urn:test:rpc", local))
    }

    #[test]
    fn leaf_extractor_reads_identifier_leaves_only() {
        let context = InstanceIdentifier::root().child(arg("node-1"));
        let extractor = LeafContextExtractor::new(arg("target"));

        let routed = NormalizedNode::container(
            arg("input"),
            vec![NormalizedNode::leaf(
                arg("target"),
                Value::Identifier(context.clone()),
            )],
        );
        assert_eq!(extractor.extract(&routed), Some(context));

        let wrong_type = NormalizedNode::container(
            arg("input"),
            vec![NormalizedNode::leaf(arg("target"), Value::Uint(1))],
        );
        assert_eq!(extractor.extract(&wrong_type), None);
        assert_eq!(
            extractor.extract(&NormalizedNode::container(arg("input"), vec![])),
            None
        );
    }

    #[test]
    fn route_display() {
        let op = QName::new("urn:test:rpc", "reset");
        assert_eq!(RpcRoute::global(op.clone()).to_string(), "(urn:test:rpc)reset");
        let routed = RpcRoute::routed(op, InstanceIdentifier::root().child(arg("a")));
        assert_eq!(routed.to_string(), "(urn:test:rpc)reset@/(urn:test:rpc)a");
    }
}
