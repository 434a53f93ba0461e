//! Chain state machine and frontend transaction handles.

use super::{BackingChain, BackingTransaction, CommitFuture};
use crate::error::{ChainError, ChainResult, CommitError};
use arbordb_codec::{InstanceIdentifier, NormalizedNode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// A backing transaction plus the frontends folded into it.
struct PingPongTransaction<T> {
    backing: T,
    waiters: Vec<oneshot::Sender<Result<(), CommitError>>>,
}

impl<T: BackingTransaction> PingPongTransaction<T> {
    fn new(backing: T) -> Self {
        Self {
            backing,
            waiters: Vec::new(),
        }
    }
}

struct ChainState<T> {
    /// A frontend transaction is allocated and not yet readied.
    locked: bool,
    /// Readied while a commit was in flight; committed next.
    ready: Option<PingPongTransaction<T>>,
    /// A backing commit is running.
    inflight: bool,
    closed: bool,
    backing_closed: bool,
}

struct ChainInner<C: BackingChain> {
    backing: C,
    runtime: Handle,
    state: Mutex<ChainState<C::Transaction>>,
}

impl<C: BackingChain> ChainInner<C> {
    fn allocate(&self) -> ChainResult<PingPongTransaction<C::Transaction>> {
        let mut state = self.state.lock();
        if state.locked {
            return Err(ChainError::ConcurrentTransaction);
        }
        if state.closed {
            return Err(ChainError::ChainClosed);
        }
        let tx = match state.ready.take() {
            Some(tx) => {
                trace!(waiters = tx.waiters.len(), "reusing ready backing transaction");
                tx
            }
            None => PingPongTransaction::new(self.backing.new_transaction()?),
        };
        state.locked = true;
        Ok(tx)
    }

    /// Unlocks the chain and commits `tx` now, or after the in-flight commit.
    fn readied(self: &Arc<Self>, tx: PingPongTransaction<C::Transaction>) {
        let mut state = self.state.lock();
        state.locked = false;
        if state.inflight {
            trace!(waiters = tx.waiters.len(), "parking transaction behind in-flight commit");
            state.ready = Some(tx);
            return;
        }
        state.inflight = true;
        drop(state);
        self.submit(tx);
    }

    /// Unlocks the chain without readying the frontend. A backing
    /// transaction other frontends were folded into is still committed.
    fn release(self: &Arc<Self>, tx: PingPongTransaction<C::Transaction>) {
        if tx.waiters.is_empty() {
            self.state.lock().locked = false;
            trace!("discarding unused backing transaction");
        } else {
            self.readied(tx);
        }
    }

    fn submit(self: &Arc<Self>, tx: PingPongTransaction<C::Transaction>) {
        let chain = Arc::clone(self);
        self.runtime.spawn(async move {
            let PingPongTransaction { backing, waiters } = tx;
            let result = backing.commit().await;
            chain.completed(waiters, result);
        });
    }

    fn completed(
        self: &Arc<Self>,
        waiters: Vec<oneshot::Sender<Result<(), CommitError>>>,
        result: Result<(), CommitError>,
    ) {
        if let Err(err) = &result {
            warn!(error = %err, frontends = waiters.len(), "backing transaction failed to commit");
        }

        let (next, close_backing) = {
            let mut state = self.state.lock();
            let next = state.ready.take();
            state.inflight = next.is_some();
            let close_backing = next.is_none() && state.closed && !state.backing_closed;
            if close_backing {
                state.backing_closed = true;
            }
            (next, close_backing)
        };

        if let Some(next) = next {
            debug!(frontends = next.waiters.len(), "committing parked transaction");
            self.submit(next);
        }
        for waiter in waiters {
            // the frontend may have dropped its future
            let _ = waiter.send(result.clone());
        }
        if close_backing {
            debug!("closing backing chain after final commit");
            self.backing.close();
        }
    }
}

/// A transaction chain which keeps at most two backing transactions alive.
///
/// Only one frontend transaction may be open at a time; allocating another
/// before readying or dropping the first fails with
/// [`ChainError::ConcurrentTransaction`]. Commits are started in the order
/// frontends were readied.
pub struct PingPongTransactionChain<C: BackingChain> {
    inner: Arc<ChainInner<C>>,
}

impl<C: BackingChain> PingPongTransactionChain<C> {
    /// Creates a chain which commits on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(backing: C) -> Self {
        Self::with_runtime(backing, Handle::current())
    }

    /// Creates a chain which commits on the given runtime.
    pub fn with_runtime(backing: C, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                backing,
                runtime,
                state: Mutex::new(ChainState {
                    locked: false,
                    ready: None,
                    inflight: false,
                    closed: false,
                    backing_closed: false,
                }),
            }),
        }
    }

    /// Returns the backing chain.
    #[must_use]
    pub fn backing(&self) -> &C {
        &self.inner.backing
    }

    /// Opens a write transaction, reusing a backing transaction which is
    /// waiting for the in-flight commit if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::ConcurrentTransaction`] if a transaction is
    /// already open, [`ChainError::ChainClosed`] after [`close`](Self::close)
    /// and [`ChainError::Backing`] if the store cannot allocate.
    pub fn new_write_transaction(&self) -> ChainResult<PingPongWriteTransaction<C>> {
        let tx = self.inner.allocate()?;
        Ok(PingPongWriteTransaction {
            lease: Lease::new(&self.inner, tx),
        })
    }

    /// Opens a read-only view over the backing transaction a write
    /// transaction would use. It holds the chain lock until closed.
    ///
    /// # Errors
    ///
    /// Same as [`new_write_transaction`](Self::new_write_transaction).
    pub fn new_read_only_transaction(&self) -> ChainResult<PingPongReadTransaction<C>> {
        let tx = self.inner.allocate()?;
        Ok(PingPongReadTransaction {
            lease: Lease::new(&self.inner, tx),
        })
    }

    /// Closes the chain. A transaction still waiting for the in-flight
    /// commit is committed first; the backing chain is closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::ConcurrentTransaction`] if a transaction is
    /// still open.
    pub fn close(&self) -> ChainResult<()> {
        let close_backing = {
            let mut state = self.inner.state.lock();
            if state.locked {
                return Err(ChainError::ConcurrentTransaction);
            }
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let idle = !state.inflight && !state.backing_closed;
            if idle {
                state.backing_closed = true;
            }
            idle
        };
        if close_backing {
            self.inner.backing.close();
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl<C: BackingChain> fmt::Debug for PingPongTransactionChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PingPongTransactionChain")
            .field("locked", &state.locked)
            .field("ready", &state.ready.is_some())
            .field("inflight", &state.inflight)
            .field("closed", &state.closed)
            .finish()
    }
}

/// The chain lock held by an open frontend transaction. Dropping it
/// releases the lock.
struct Lease<C: BackingChain> {
    chain: Arc<ChainInner<C>>,
    tx: Option<PingPongTransaction<C::Transaction>>,
}

impl<C: BackingChain> Lease<C> {
    fn new(chain: &Arc<ChainInner<C>>, tx: PingPongTransaction<C::Transaction>) -> Self {
        Self {
            chain: Arc::clone(chain),
            tx: Some(tx),
        }
    }

    fn transaction(&self) -> &PingPongTransaction<C::Transaction> {
        match &self.tx {
            Some(tx) => tx,
            None => unreachable!("lease used after release"),
        }
    }

    fn transaction_mut(&mut self) -> &mut PingPongTransaction<C::Transaction> {
        match &mut self.tx {
            Some(tx) => tx,
            None => unreachable!("lease used after release"),
        }
    }

    fn ready(mut self) -> CommitFuture {
        let (sender, receiver) = oneshot::channel();
        if let Some(mut tx) = self.tx.take() {
            tx.waiters.push(sender);
            self.chain.readied(tx);
        }
        CommitFuture::new(receiver)
    }
}

impl<C: BackingChain> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.chain.release(tx);
        }
    }
}

/// A frontend write transaction.
///
/// Dropping it without calling [`ready`](Self::ready) releases the chain.
/// Writes made through it are lost unless earlier frontends were folded into
/// the same backing transaction, in which case they are committed with them.
pub struct PingPongWriteTransaction<C: BackingChain> {
    lease: Lease<C>,
}

impl<C: BackingChain> PingPongWriteTransaction<C> {
    /// Writes a node at a path.
    pub fn put(&mut self, path: InstanceIdentifier, data: NormalizedNode) {
        self.lease.transaction_mut().backing.put(path, data);
    }

    /// Deletes the node at a path.
    pub fn delete(&mut self, path: InstanceIdentifier) {
        self.lease.transaction_mut().backing.delete(path);
    }

    /// Reads through the backing transaction.
    #[must_use]
    pub fn read(&self, path: &InstanceIdentifier) -> Option<NormalizedNode> {
        self.lease.transaction().backing.read(path)
    }

    /// Always fails: a backing transaction may be shared, so one frontend's
    /// writes cannot be withdrawn.
    ///
    /// # Errors
    ///
    /// Always returns [`ChainError::CancellationUnsupported`].
    pub fn cancel(&self) -> ChainResult<()> {
        Err(ChainError::CancellationUnsupported)
    }

    /// Readies the transaction and unlocks the chain. The returned future
    /// completes with the outcome of the backing commit.
    pub fn ready(self) -> CommitFuture {
        self.lease.ready()
    }
}

impl<C: BackingChain> fmt::Debug for PingPongWriteTransaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingPongWriteTransaction")
            .field("folded", &self.lease.transaction().waiters.len())
            .finish()
    }
}

/// A frontend read-only transaction.
pub struct PingPongReadTransaction<C: BackingChain> {
    lease: Lease<C>,
}

impl<C: BackingChain> PingPongReadTransaction<C> {
    /// Reads through the backing transaction.
    #[must_use]
    pub fn read(&self, path: &InstanceIdentifier) -> Option<NormalizedNode> {
        self.lease.transaction().backing.read(path)
    }

    /// Releases the chain. Same as dropping.
    pub fn close(self) {}
}

impl<C: BackingChain> fmt::Debug for PingPongReadTransaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingPongReadTransaction").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbordb_codec::{PathArgument, QName, Value};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Shared {
        log: Log,
        gate: Semaphore,
        allocated: AtomicUsize,
        closes: AtomicUsize,
        failing: Mutex<Vec<usize>>,
    }

    impl Shared {
        fn new() -> Self {
            Self {
                log: Log::default(),
                gate: Semaphore::new(0),
                allocated: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                failing: Mutex::new(Vec::new()),
            }
        }
    }

    struct GatedChain {
        shared: Arc<Shared>,
    }

    struct GatedTransaction {
        id: usize,
        data: BTreeMap<InstanceIdentifier, NormalizedNode>,
        shared: Arc<Shared>,
    }

    impl BackingChain for GatedChain {
        type Transaction = GatedTransaction;

        fn new_transaction(&self) -> Result<GatedTransaction, ChainError> {
            let id = self.shared.allocated.fetch_add(1, Ordering::SeqCst);
            Ok(GatedTransaction {
                id,
                data: BTreeMap::new(),
                shared: Arc::clone(&self.shared),
            })
        }

        fn close(&self) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            self.shared.log.lock().push("close".into());
        }
    }

    #[async_trait]
    impl BackingTransaction for GatedTransaction {
        fn put(&mut self, path: InstanceIdentifier, data: NormalizedNode) {
            self.data.insert(path, data);
        }

        fn delete(&mut self, path: InstanceIdentifier) {
            self.data.remove(&path);
        }

        fn read(&self, path: &InstanceIdentifier) -> Option<NormalizedNode> {
            self.data.get(path).cloned()
        }

        async fn commit(self) -> Result<(), CommitError> {
            let log = &self.shared.log;
            log.lock().push(format!("start {} ({} writes)", self.id, self.data.len()));
            let permit = self.shared.gate.acquire().await;
            if let Ok(permit) = permit {
                permit.forget();
            }
            log.lock().push(format!("end {}", self.id));
            if self.shared.failing.lock().contains(&self.id) {
                return Err(CommitError::CommitFailed {
                    transaction: test_tx(),
                    cause: crate::error::CohortError::failed("backing refused"),
                });
            }
            Ok(())
        }
    }

    fn test_tx() -> crate::identifier::TransactionIdentifier {
        use crate::identifier::{ClientIdentifier, FrontendIdentifier, LocalHistoryIdentifier};
        let client = ClientIdentifier::new(FrontendIdentifier::new("member-1", "chain"), 0);
        crate::identifier::TransactionIdentifier::new(LocalHistoryIdentifier::new(client, 1, 0), 0)
    }

    fn chain() -> (PingPongTransactionChain<GatedChain>, Arc<Shared>) {
        let shared = Arc::new(Shared::new());
        let chain = PingPongTransactionChain::new(GatedChain {
            shared: Arc::clone(&shared),
        });
        (chain, shared)
    }

    fn path(local: &str) -> InstanceIdentifier {
        InstanceIdentifier::root()
            .child(PathArgument::NodeIdentifier(QName::new("urn:test", local)))
    }

    fn leaf(local: &str, value: u64) -> NormalizedNode {
        NormalizedNode::leaf(
            PathArgument::NodeIdentifier(QName::new("urn:test", local)),
            Value::Uint(value),
        )
    }

    async fn wait_for(log: &Log, entry: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !log.lock().iter().any(|e| e == entry) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("`{entry}` never logged: {:?}", log.lock()));
    }

    #[tokio::test]
    async fn second_ready_is_committed_when_first_completes() {
        let (chain, shared) = chain();

        let mut tx1 = chain.new_write_transaction().unwrap();
        tx1.put(path("a"), leaf("a", 1));
        let first = tx1.ready();
        wait_for(&shared.log, "start 0 (1 writes)").await;

        let mut tx2 = chain.new_write_transaction().unwrap();
        tx2.put(path("b"), leaf("b", 2));
        let second = tx2.ready();
        tokio::task::yield_now().await;
        assert_eq!(shared.log.lock().len(), 1, "second commit started early");

        shared.gate.add_permits(1);
        first.await.unwrap();
        wait_for(&shared.log, "start 1 (1 writes)").await;

        shared.gate.add_permits(1);
        second.await.unwrap();
        assert_eq!(shared.allocated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parked_transaction_is_reused() {
        let (chain, shared) = chain();
        let first = chain.new_write_transaction().unwrap().ready();
        wait_for(&shared.log, "start 0 (0 writes)").await;

        let mut tx2 = chain.new_write_transaction().unwrap();
        tx2.put(path("b"), leaf("b", 2));
        let second = tx2.ready();

        let mut tx3 = chain.new_write_transaction().unwrap();
        assert_eq!(tx3.read(&path("b")), Some(leaf("b", 2)));
        tx3.put(path("c"), leaf("c", 3));
        let third = tx3.ready();

        shared.gate.add_permits(2);
        first.await.unwrap();
        second.await.unwrap();
        third.await.unwrap();
        assert_eq!(shared.allocated.load(Ordering::SeqCst), 2);
        assert!(shared.log.lock().contains(&"start 1 (2 writes)".to_string()));
    }

    #[tokio::test]
    async fn outcomes_resolve_per_transaction() {
        let (chain, shared) = chain();
        shared.failing.lock().push(0);

        let first = chain.new_write_transaction().unwrap().ready();
        wait_for(&shared.log, "start 0 (0 writes)").await;
        let second = chain.new_write_transaction().unwrap().ready();

        shared.gate.add_permits(2);
        assert!(matches!(first.await, Err(ChainError::Commit(_))));
        second.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_allocation_fails() {
        let (chain, _) = chain();
        let _open = chain.new_write_transaction().unwrap();
        assert_eq!(
            chain.new_write_transaction().unwrap_err(),
            ChainError::ConcurrentTransaction
        );
        assert_eq!(
            chain.new_read_only_transaction().unwrap_err(),
            ChainError::ConcurrentTransaction
        );
    }

    #[tokio::test]
    async fn cancel_is_unsupported() {
        let (chain, _) = chain();
        let tx = chain.new_write_transaction().unwrap();
        assert_eq!(tx.cancel(), Err(ChainError::CancellationUnsupported));
    }

    #[tokio::test]
    async fn dropped_transaction_releases_the_chain() {
        let (chain, shared) = chain();
        drop(chain.new_write_transaction().unwrap());
        chain.new_read_only_transaction().unwrap().close();
        let tx = chain.new_write_transaction().unwrap();
        shared.gate.add_permits(1);
        tx.ready().await.unwrap();
        assert_eq!(shared.allocated.load(Ordering::SeqCst), 3);
        assert_eq!(shared.log.lock().len(), 2);
    }

    #[tokio::test]
    async fn read_only_over_folded_transaction_still_commits_it() {
        let (chain, shared) = chain();
        let first = chain.new_write_transaction().unwrap().ready();
        wait_for(&shared.log, "start 0 (0 writes)").await;

        let mut tx2 = chain.new_write_transaction().unwrap();
        tx2.put(path("x"), leaf("x", 1));
        let second = tx2.ready();

        let reader = chain.new_read_only_transaction().unwrap();
        assert_eq!(reader.read(&path("x")), Some(leaf("x", 1)));
        reader.close();

        shared.gate.add_permits(2);
        first.await.unwrap();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn close_fails_while_locked() {
        let (chain, _) = chain();
        let tx = chain.new_write_transaction().unwrap();
        assert_eq!(chain.close(), Err(ChainError::ConcurrentTransaction));
        drop(tx);
        chain.close().unwrap();
        assert_eq!(
            chain.new_write_transaction().unwrap_err(),
            ChainError::ChainClosed
        );
    }

    #[tokio::test]
    async fn close_commits_leftover_before_closing_backing() {
        let (chain, shared) = chain();
        let first = chain.new_write_transaction().unwrap().ready();
        wait_for(&shared.log, "start 0 (0 writes)").await;
        let second = chain.new_write_transaction().unwrap().ready();

        chain.close().unwrap();
        assert_eq!(shared.closes.load(Ordering::SeqCst), 0);

        shared.gate.add_permits(2);
        first.await.unwrap();
        second.await.unwrap();
        wait_for(&shared.log, "close").await;
        assert_eq!(
            *shared.log.lock(),
            vec!["start 0 (0 writes)", "end 0", "start 1 (0 writes)", "end 1", "close"]
        );

        chain.close().unwrap();
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idle_close_closes_backing_immediately() {
        let (chain, shared) = chain();
        chain.close().unwrap();
        assert!(chain.is_closed());
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
    }
}
