//! Router owning the current routing table.

use super::{ContextKeyExtractor, RpcImplementation, RpcRoute, RpcRoutingTable};
use crate::error::RpcResult;
use arbordb_codec::{NormalizedNode, QName};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Told when routes gain their first or lose their last implementation.
///
/// Callbacks run on the router's notification task, one at a time and in
/// listener registration order. A panicking listener is logged and skipped.
pub trait AvailabilityListener: Send + Sync {
    /// Routes which became available.
    fn on_available(&self, routes: &[RpcRoute]);

    /// Routes which are no longer available.
    fn on_unavailable(&self, routes: &[RpcRoute]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Available,
    Unavailable,
}

struct Notification {
    change: Change,
    routes: Vec<RpcRoute>,
    /// Listeners registered when the change happened, in registration order.
    targets: Vec<Arc<dyn AvailabilityListener>>,
}

type Listeners = Vec<(u64, Arc<dyn AvailabilityListener>)>;

struct RouterInner {
    /// Lock order: `table` before `listeners`.
    table: RwLock<Arc<RpcRoutingTable>>,
    listeners: Mutex<Listeners>,
    next_listener: AtomicU64,
    events: mpsc::UnboundedSender<Notification>,
}

impl RouterInner {
    /// Swaps in `update(current)` and queues a notification if the route
    /// changed availability.
    fn update(&self, route: &RpcRoute, update: impl FnOnce(&RpcRoutingTable) -> RpcRoutingTable) {
        let mut table = self.table.write();
        let before = table.contains(route);
        let next = Arc::new(update(&**table));
        let after = next.contains(route);
        *table = next;

        let change = match (before, after) {
            (false, true) => Change::Available,
            (true, false) => Change::Unavailable,
            _ => return,
        };
        debug!(%route, ?change, "route availability changed");
        // Queued under the table lock so listeners see changes in table order.
        self.notify(change, vec![route.clone()], self.targets());
    }

    fn targets(&self) -> Vec<Arc<dyn AvailabilityListener>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn notify(
        &self,
        change: Change,
        routes: Vec<RpcRoute>,
        targets: Vec<Arc<dyn AvailabilityListener>>,
    ) {
        if targets.is_empty() || routes.is_empty() {
            return;
        }
        let notification = Notification {
            change,
            routes,
            targets,
        };
        if self.events.send(notification).is_err() {
            warn!("notification task has stopped, dropping availability change");
        }
    }

    fn unregister(&self, route: &RpcRoute, implementation: &Arc<dyn RpcImplementation>) {
        trace!(%route, "unregistering implementation");
        self.update(route, |table| table.remove(route, implementation));
    }

    fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|(candidate, _)| *candidate != id);
    }
}

async fn dispatch(mut events: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = events.recv().await {
        for listener in &notification.targets {
            let routes = notification.routes.as_slice();
            let outcome = catch_unwind(AssertUnwindSafe(|| match notification.change {
                Change::Available => listener.on_available(routes),
                Change::Unavailable => listener.on_unavailable(routes),
            }));
            if outcome.is_err() {
                warn!(
                    change = ?notification.change,
                    routes = routes.len(),
                    "availability listener panicked"
                );
            }
        }
    }
    trace!("availability notification task finished");
}

/// Dispatches operation invocations through the current routing table.
///
/// Registration changes publish a new [`RpcRoutingTable`]; invocations
/// already running keep the table they started with.
#[derive(Clone)]
pub struct RpcRouter {
    inner: Arc<RouterInner>,
}

impl RpcRouter {
    /// Creates a router notifying listeners on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(&Handle::current())
    }

    /// Creates a router notifying listeners on the given runtime.
    #[must_use]
    pub fn with_runtime(runtime: &Handle) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        runtime.spawn(dispatch(rx));
        Self {
            inner: Arc::new(RouterInner {
                table: RwLock::new(Arc::new(RpcRoutingTable::new())),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Returns the current table.
    #[must_use]
    pub fn table(&self) -> Arc<RpcRoutingTable> {
        self.inner.table.read().clone()
    }

    /// Registers an implementation for a route. It stays registered until
    /// the returned handle is closed or dropped.
    pub fn register(
        &self,
        route: RpcRoute,
        implementation: Arc<dyn RpcImplementation>,
    ) -> RpcRegistration {
        trace!(%route, "registering implementation");
        self.inner
            .update(&route, |table| table.add(&route, Arc::clone(&implementation)));
        RpcRegistration {
            router: Arc::downgrade(&self.inner),
            route,
            implementation,
            closed: false,
        }
    }

    /// Installs the rule extracting routing contexts for an operation.
    pub fn add_rule(&self, operation: QName, extractor: Arc<dyn ContextKeyExtractor>) {
        let mut table = self.inner.table.write();
        *table = Arc::new(table.with_rule(operation, extractor));
    }

    /// Registers an availability listener. The listener is first told about
    /// every route available at registration time.
    pub fn register_listener(
        &self,
        listener: Arc<dyn AvailabilityListener>,
    ) -> ListenerRegistration {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let table = self.inner.table.read();
        self.inner.listeners.lock().push((id, Arc::clone(&listener)));
        self.inner
            .notify(Change::Available, table.routes(), vec![listener]);
        drop(table);
        ListenerRegistration {
            router: Arc::downgrade(&self.inner),
            id,
            closed: false,
        }
    }

    /// Invokes an operation on the implementation selected for its input.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RpcError::ImplementationNotAvailable`] if no
    /// implementation matches, or the implementation's own failure.
    pub async fn invoke(
        &self,
        operation: &QName,
        input: NormalizedNode,
    ) -> RpcResult<Option<NormalizedNode>> {
        let implementation = self.table().lookup(operation, &input)?;
        implementation.invoke(operation, input).await
    }
}

impl Default for RpcRouter {
    /// Same as [`RpcRouter::new`].
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RpcRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRouter")
            .field("table", &self.table())
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

/// Keeps an implementation registered. Dropping the handle unregisters it.
#[must_use = "dropping the registration unregisters the implementation"]
pub struct RpcRegistration {
    router: Weak<RouterInner>,
    route: RpcRoute,
    implementation: Arc<dyn RpcImplementation>,
    closed: bool,
}

impl RpcRegistration {
    /// Returns the registered route.
    #[must_use]
    pub fn route(&self) -> &RpcRoute {
        &self.route
    }

    /// Unregisters the implementation.
    pub fn close(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.unregister(&self.route, &self.implementation);
        }
    }
}

impl Drop for RpcRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for RpcRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRegistration")
            .field("route", &self.route)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Keeps a listener registered. Dropping the handle unregisters it.
///
/// Notifications queued before the listener was removed may still be
/// delivered.
#[derive(Debug)]
#[must_use = "dropping the registration unregisters the listener"]
pub struct ListenerRegistration {
    router: Weak<RouterInner>,
    id: u64,
    closed: bool,
}

impl ListenerRegistration {
    /// Unregisters the listener.
    pub fn close(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove_listener(self.id);
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::rpc::LeafContextExtractor;
    use arbordb_codec::{InstanceIdentifier, PathArgument, Value};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    fn arg(local: &str) -> PathArgument {
        PathArgument::NodeIdentifier(QName::new("urn:test:router", local))
    }

    fn op() -> QName {
        QName::new("urn:test:router", "reset")
    }

    fn context(name: &str) -> InstanceIdentifier {
        InstanceIdentifier::root().child(arg(name))
    }

    struct Echo(&'static str);

    #[async_trait]
    impl RpcImplementation for Echo {
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

    fn from(output: Option<NormalizedNode>) -> String {
        match output.as_ref().and_then(NormalizedNode::value) {
            Some(Value::String(name)) => name.clone(),
            other => panic!("unexpected output {other:?}"),
        }
    }

    /// Forwards every callback as `(name, change, routes)`.
    struct Recorder {
        name: &'static str,
        tx: UnboundedSender<(&'static str, Change, Vec<RpcRoute>)>,
    }

    impl AvailabilityListener for Recorder {
        fn on_available(&self, routes: &[RpcRoute]) {
            let _ = self.tx.send((self.name, Change::Available, routes.to_vec()));
        }

        fn on_unavailable(&self, routes: &[RpcRoute]) {
            let _ = self.tx.send((self.name, Change::Unavailable, routes.to_vec()));
        }
    }

    struct Panicking;

    impl AvailabilityListener for Panicking {
        fn on_available(&self, _routes: &[RpcRoute]) {
            panic!("listener failure");
        }

        fn on_unavailable(&self, _routes: &[RpcRoute]) {
            panic!("listener failure");
        }
    }

    async fn next(
        rx: &mut UnboundedReceiver<(&'static str, Change, Vec<RpcRoute>)>,
    ) -> (&'static str, Change, Vec<RpcRoute>) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener was not notified")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn invocations_are_routed_by_context() {
        let router = RpcRouter::new();
        router.add_rule(op(), Arc::new(LeafContextExtractor::new(arg("target"))));
        let _global = router.register(RpcRoute::global(op()), Arc::new(Echo("global")));
        let _routed = router.register(
            RpcRoute::routed(op(), context("a")),
            Arc::new(Echo("routed")),
        );

        let input = |target: &str| {
            NormalizedNode::container(
                arg("input"),
                vec![NormalizedNode::leaf(
                    arg("target"),
                    Value::Identifier(context(target)),
                )],
            )
        };
        assert_eq!(from(router.invoke(&op(), input("a")).await.unwrap()), "routed");
        assert_eq!(from(router.invoke(&op(), input("b")).await.unwrap()), "global");
    }

    #[tokio::test]
    async fn default_router_starts_empty() {
        let router = RpcRouter::default();
        assert!(router.table().is_empty());
        assert_eq!(
            router.invoke(&op(), NormalizedNode::container(arg("input"), vec![])).await,
            Err(RpcError::ImplementationNotAvailable { operation: op() })
        );
    }

    #[tokio::test]
    async fn closed_registration_is_no_longer_invoked() {
        let router = RpcRouter::new();
        let registration = router.register(RpcRoute::global(op()), Arc::new(Echo("only")));
        let input = NormalizedNode::container(arg("input"), vec![]);
        assert!(router.invoke(&op(), input.clone()).await.is_ok());

        registration.close();
        assert_eq!(
            router.invoke(&op(), input).await,
            Err(RpcError::ImplementationNotAvailable { operation: op() })
        );
        assert!(router.table().is_empty());
    }

    #[tokio::test]
    async fn tables_seen_by_readers_stay_unchanged() {
        let router = RpcRouter::new();
        let before = router.table();
        let _registration = router.register(RpcRoute::global(op()), Arc::new(Echo("x")));
        assert!(before.is_empty());
        assert!(router.table().contains(&RpcRoute::global(op())));
    }

    #[tokio::test]
    async fn listeners_are_told_about_transitions_only() {
        let router = RpcRouter::new();
        let (tx, mut rx) = unbounded_channel();
        let _listener = router.register_listener(Arc::new(Recorder { name: "l", tx }));
        let route = RpcRoute::global(op());

        let first = router.register(route.clone(), Arc::new(Echo("1")));
        let second = router.register(route.clone(), Arc::new(Echo("2")));
        assert_eq!(next(&mut rx).await, ("l", Change::Available, vec![route.clone()]));

        drop(first);
        second.close();
        assert_eq!(next(&mut rx).await, ("l", Change::Unavailable, vec![route]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_listeners_receive_current_routes() {
        let router = RpcRouter::new();
        let _a = router.register(RpcRoute::global(op()), Arc::new(Echo("a")));
        let _b = router.register(RpcRoute::routed(op(), context("x")), Arc::new(Echo("b")));

        let (tx, mut rx) = unbounded_channel();
        let _listener = router.register_listener(Arc::new(Recorder { name: "late", tx }));
        assert_eq!(
            next(&mut rx).await,
            (
                "late",
                Change::Available,
                vec![RpcRoute::global(op()), RpcRoute::routed(op(), context("x"))]
            )
        );
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_later_listeners() {
        let router = RpcRouter::new();
        let (tx, mut rx) = unbounded_channel();
        let _bad = router.register_listener(Arc::new(Panicking));
        let _first = router.register_listener(Arc::new(Recorder {
            name: "first",
            tx: tx.clone(),
        }));
        let _second = router.register_listener(Arc::new(Recorder { name: "second", tx }));

        let _registration = router.register(RpcRoute::global(op()), Arc::new(Echo("x")));
        assert_eq!(next(&mut rx).await.0, "first");
        assert_eq!(next(&mut rx).await.0, "second");
    }

    #[tokio::test]
    async fn closed_listener_stops_receiving() {
        let router = RpcRouter::new();
        let (tx, mut rx) = unbounded_channel();
        let (witness_tx, mut witness) = unbounded_channel();
        let listener = router.register_listener(Arc::new(Recorder { name: "gone", tx }));
        listener.close();
        let _witness = router.register_listener(Arc::new(Recorder {
            name: "witness",
            tx: witness_tx,
        }));

        let _registration = router.register(RpcRoute::global(op()), Arc::new(Echo("x")));
        assert_eq!(next(&mut witness).await.0, "witness");
        assert!(rx.try_recv().is_err());
    }
}
