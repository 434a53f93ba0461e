//! Immutable routing table.

use super::{ContextKeyExtractor, RpcImplementation, RpcRoute};
use crate::error::{RpcError, RpcResult};
use arbordb_codec::{InstanceIdentifier, NormalizedNode, QName};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

type Implementations = Vec<Arc<dyn RpcImplementation>>;

fn same_implementation(a: &Arc<dyn RpcImplementation>, b: &Arc<dyn RpcImplementation>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Implementations of one operation, keyed by context. The `None` key holds
/// the global implementations. Earlier registrations are preferred.
#[derive(Clone, Default)]
pub struct RoutingEntry {
    implementations: BTreeMap<Option<InstanceIdentifier>, Implementations>,
}

impl RoutingEntry {
    /// Returns the implementations registered for a context.
    #[must_use]
    pub fn implementations(
        &self,
        context: Option<&InstanceIdentifier>,
    ) -> &[Arc<dyn RpcImplementation>] {
        self.implementations
            .get(&context.cloned())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the contexts with at least one implementation.
    pub fn contexts(&self) -> impl Iterator<Item = Option<&InstanceIdentifier>> + '_ {
        self.implementations.keys().map(Option::as_ref)
    }

    /// Whether the entry has no implementations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }

    fn with(
        &self,
        context: Option<InstanceIdentifier>,
        implementation: Arc<dyn RpcImplementation>,
    ) -> Self {
        let mut entry = self.clone();
        entry
            .implementations
            .entry(context)
            .or_default()
            .push(implementation);
        entry
    }

    fn without(
        &self,
        context: &Option<InstanceIdentifier>,
        implementation: &Arc<dyn RpcImplementation>,
    ) -> Self {
        let mut entry = self.clone();
        if let Some(list) = entry.implementations.get_mut(context) {
            list.retain(|candidate| !same_implementation(candidate, implementation));
            if list.is_empty() {
                entry.implementations.remove(context);
            }
        }
        entry
    }

    fn first(&self, context: &Option<InstanceIdentifier>) -> Option<&Arc<dyn RpcImplementation>> {
        self.implementations.get(context).and_then(|list| list.first())
    }
}

impl fmt::Debug for RoutingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.implementations
                    .iter()
                    .map(|(context, list)| (context, list.len())),
            )
            .finish()
    }
}

/// Maps operations to their implementations.
///
/// A table is never changed once built: [`add`](Self::add),
/// [`remove`](Self::remove) and [`with_rule`](Self::with_rule) return a new
/// table which shares every untouched entry with this one. Readers can hold
/// on to a table without locking.
#[derive(Clone, Default)]
pub struct RpcRoutingTable {
    entries: Arc<HashMap<QName, Arc<RoutingEntry>>>,
    rules: Arc<HashMap<QName, Arc<dyn ContextKeyExtractor>>>,
}

impl RpcRoutingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a table with one more implementation for a route.
    #[must_use]
    pub fn add(&self, route: &RpcRoute, implementation: Arc<dyn RpcImplementation>) -> Self {
        let entry = match self.entries.get(route.operation()) {
            Some(entry) => entry.with(route.context().cloned(), implementation),
            None => RoutingEntry::default().with(route.context().cloned(), implementation),
        };
        let mut entries = (*self.entries).clone();
        entries.insert(route.operation().clone(), Arc::new(entry));
        Self {
            entries: Arc::new(entries),
            rules: Arc::clone(&self.rules),
        }
    }

    /// Returns a table without one implementation of a route. The
    /// implementation is matched by identity.
    #[must_use]
    pub fn remove(&self, route: &RpcRoute, implementation: &Arc<dyn RpcImplementation>) -> Self {
        let Some(entry) = self.entries.get(route.operation()) else {
            return self.clone();
        };
        let entry = entry.without(&route.context().cloned(), implementation);
        let mut entries = (*self.entries).clone();
        if entry.is_empty() {
            entries.remove(route.operation());
        } else {
            entries.insert(route.operation().clone(), Arc::new(entry));
        }
        Self {
            entries: Arc::new(entries),
            rules: Arc::clone(&self.rules),
        }
    }

    /// Returns a table which extracts routing contexts for an operation
    /// with the given rule.
    #[must_use]
    pub fn with_rule(&self, operation: QName, extractor: Arc<dyn ContextKeyExtractor>) -> Self {
        let mut rules = (*self.rules).clone();
        rules.insert(operation, extractor);
        Self {
            entries: Arc::clone(&self.entries),
            rules: Arc::new(rules),
        }
    }

    /// Returns the entry of an operation.
    #[must_use]
    pub fn entry(&self, operation: &QName) -> Option<&Arc<RoutingEntry>> {
        self.entries.get(operation)
    }

    /// Whether a route has at least one implementation.
    #[must_use]
    pub fn contains(&self, route: &RpcRoute) -> bool {
        self.entries
            .get(route.operation())
            .is_some_and(|entry| !entry.implementations(route.context()).is_empty())
    }

    /// Returns every route with at least one implementation, sorted.
    #[must_use]
    pub fn routes(&self) -> Vec<RpcRoute> {
        let mut routes: Vec<RpcRoute> = self
            .entries
            .iter()
            .flat_map(|(operation, entry)| {
                entry.contexts().map(move |context| match context {
                    Some(context) => RpcRoute::routed(operation.clone(), context.clone()),
                    None => RpcRoute::global(operation.clone()),
                })
            })
            .collect();
        routes.sort();
        routes
    }

    /// Whether no operation has an implementation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Selects the implementation for an invocation.
    ///
    /// If the operation has a context rule and the input names a context
    /// with an implementation, that implementation wins. Otherwise the
    /// global implementation is used.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ImplementationNotAvailable`] if neither exists.
    pub fn lookup(
        &self,
        operation: &QName,
        input: &NormalizedNode,
    ) -> RpcResult<Arc<dyn RpcImplementation>> {
        let not_available = || RpcError::ImplementationNotAvailable {
            operation: operation.clone(),
        };
        let entry = self.entries.get(operation).ok_or_else(not_available)?;

        let context = self
            .rules
            .get(operation)
            .and_then(|rule| rule.extract(input));
        if context.is_some() {
            if let Some(implementation) = entry.first(&context) {
                return Ok(Arc::clone(implementation));
            }
        }
        entry.first(&None).cloned().ok_or_else(not_available)
    }
}

impl fmt::Debug for RpcRoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRoutingTable")
            .field("routes", &self.routes())
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::LeafContextExtractor;
    use arbordb_codec::{PathArgument, Value};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl RpcImplementation for Named {
        async fn invoke(
            &self,
            _operation: &QName,
            _input: NormalizedNode,
        ) -> Result<Option<NormalizedNode>, RpcError> {
            Ok(Some(NormalizedNode::leaf(
                arg("from"),
                Value::String(self.0.to_string()),
            )))
        }
    }

    fn arg(local: &str) -> PathArgument {
        PathArgument::NodeIdentifier(QName::new("urn:test:rpc", local))
    }

    fn op() -> QName {
        QName::new("urn:test:rpc", "reset")
    }

    fn context(name: &str) -> InstanceIdentifier {
        InstanceIdentifier::root().child(arg(name))
    }

    fn input(target: Option<InstanceIdentifier>) -> NormalizedNode {
        let children = target
            .map(|t| vec![NormalizedNode::leaf(arg("target"), Value::Identifier(t))])
            .unwrap_or_default();
        NormalizedNode::container(arg("input"), children)
    }

    fn implementation(name: &'static str) -> Arc<dyn RpcImplementation> {
        Arc::new(Named(name))
    }

    fn routed_table(
        global: &Arc<dyn RpcImplementation>,
        routed: &Arc<dyn RpcImplementation>,
    ) -> RpcRoutingTable {
        RpcRoutingTable::new()
            .with_rule(op(), Arc::new(LeafContextExtractor::new(arg("target"))))
            .add(&RpcRoute::global(op()), Arc::clone(global))
            .add(&RpcRoute::routed(op(), context("a")), Arc::clone(routed))
    }

    #[test]
    fn context_implementation_wins() {
        let global = implementation("global");
        let routed = implementation("routed");
        let table = routed_table(&global, &routed);

        let found = table.lookup(&op(), &input(Some(context("a")))).unwrap();
        assert!(same_implementation(&found, &routed));
    }

    #[test]
    fn unknown_context_falls_back_to_global() {
        let global = implementation("global");
        let routed = implementation("routed");
        let table = routed_table(&global, &routed);

        let found = table.lookup(&op(), &input(Some(context("b")))).unwrap();
        assert!(same_implementation(&found, &global));
        let found = table.lookup(&op(), &input(None)).unwrap();
        assert!(same_implementation(&found, &global));
    }

    #[test]
    fn missing_implementation_is_reported() {
        let routed = implementation("routed");
        let table = RpcRoutingTable::new()
            .with_rule(op(), Arc::new(LeafContextExtractor::new(arg("target"))))
            .add(&RpcRoute::routed(op(), context("a")), routed);
        assert_eq!(
            table.lookup(&op(), &input(Some(context("b")))).err(),
            Some(RpcError::ImplementationNotAvailable { operation: op() })
        );
        let other = QName::new("urn:test:rpc", "other");
        assert!(matches!(
            table.lookup(&other, &input(None)),
            Err(RpcError::ImplementationNotAvailable { .. })
        ));
    }

    #[test]
    fn published_tables_are_never_mutated() {
        let first = implementation("first");
        let empty = RpcRoutingTable::new();
        let one = empty.add(&RpcRoute::global(op()), Arc::clone(&first));
        let two = one.add(&RpcRoute::global(op()), implementation("second"));

        assert!(empty.is_empty());
        assert_eq!(one.entry(&op()).unwrap().implementations(None).len(), 1);
        assert_eq!(two.entry(&op()).unwrap().implementations(None).len(), 2);

        let found = two.lookup(&op(), &input(None)).unwrap();
        assert!(same_implementation(&found, &first));
    }

    #[test]
    fn untouched_entries_are_shared() {
        let other = QName::new("urn:test:rpc", "other");
        let table =
            RpcRoutingTable::new().add(&RpcRoute::global(other.clone()), implementation("x"));
        let next = table.add(&RpcRoute::global(op()), implementation("y"));
        assert!(Arc::ptr_eq(
            table.entry(&other).unwrap(),
            next.entry(&other).unwrap()
        ));
    }

    #[test]
    fn remove_matches_by_identity() {
        let first = implementation("same-name");
        let second = implementation("same-name");
        let route = RpcRoute::global(op());
        let table = RpcRoutingTable::new()
            .add(&route, Arc::clone(&first))
            .add(&route, Arc::clone(&second));

        let table = table.remove(&route, &first);
        let found = table.lookup(&op(), &input(None)).unwrap();
        assert!(same_implementation(&found, &second));

        let table = table.remove(&route, &second);
        assert!(!table.contains(&route));
        assert!(table.entry(&op()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn routes_are_listed_sorted() {
        let global = implementation("global");
        let routed = implementation("routed");
        let table = routed_table(&global, &routed);
        assert_eq!(
            table.routes(),
            vec![
                RpcRoute::global(op()),
                RpcRoute::routed(op(), context("a")),
            ]
        );
    }
}
