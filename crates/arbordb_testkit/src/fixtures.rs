//! Test fixtures for commit, chain and routing tests.
//!
//! Provides scripted commit cohorts, an in-memory backing store for
//! transaction chains and recording RPC implementations and listeners.

use arbordb_codec::{
    CandidateNode, InstanceIdentifier, NormalizedNode, PathArgument, QName, TreeCandidate, Value,
};
use arbordb_core::{
    AvailabilityListener, BackingChain, BackingTransaction, ChainError, ClientIdentifier,
    CohortError, CommitCohort, CommitError, FrontendIdentifier, LocalHistoryIdentifier, RpcError,
    RpcImplementation, RpcRoute, TransactionIdentifier,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Namespace used by fixture-built names.
pub const TEST_NAMESPACE: &str = "urn:arbordb:testkit";

/// Builds a name in [`TEST_NAMESPACE`].
pub fn qname(local: &str) -> QName {
    QName::new(TEST_NAMESPACE, local)
}

/// Builds a plain path step in [`TEST_NAMESPACE`].
pub fn step(local: &str) -> PathArgument {
    PathArgument::NodeIdentifier(qname(local))
}

/// Builds a path of plain steps.
pub fn path(steps: &[&str]) -> InstanceIdentifier {
    InstanceIdentifier::new(steps.iter().map(|s| step(s)).collect())
}

/// Builds a leaf carrying an unsigned value.
pub fn uint_leaf(local: &str, value: u64) -> NormalizedNode {
    NormalizedNode::leaf(step(local), Value::Uint(value))
}

/// The history every fixture transaction belongs to.
pub fn test_history() -> LocalHistoryIdentifier {
    let client = ClientIdentifier::new(FrontendIdentifier::new("member-1", "datastore-config"), 0);
    LocalHistoryIdentifier::new(client, 1, 0)
}

/// A transaction of [`test_history`].
pub fn test_transaction(id: u64) -> TransactionIdentifier {
    TransactionIdentifier::new(test_history(), id)
}

/// Shared, ordered record of fixture calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    /// Returns a copy of every entry.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Returns the entries starting with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Outcome a [`ScriptedCohort`] reports for each phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortScript {
    /// Vote returned by `can_commit`.
    pub vote: bool,
    /// Fails `can_commit` with this message.
    pub fail_can_commit: Option<String>,
    /// Fails `pre_commit` with this message.
    pub fail_pre_commit: Option<String>,
    /// Fails `commit` with this message.
    pub fail_commit: Option<String>,
    /// Fails `abort` with this message.
    pub fail_abort: Option<String>,
    /// Delay before every answer.
    pub delay: Duration,
}

impl Default for CohortScript {
    fn default() -> Self {
        Self {
            vote: true,
            fail_can_commit: None,
            fail_pre_commit: None,
            fail_commit: None,
            fail_abort: None,
            delay: Duration::ZERO,
        }
    }
}

/// A commit cohort following a [`CohortScript`] and logging each call as
/// `"{name}:{phase}"`.
#[derive(Debug)]
pub struct ScriptedCohort {
    name: String,
    script: CohortScript,
    log: CallLog,
}

impl ScriptedCohort {
    /// Creates a cohort which agrees to everything.
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            script: CohortScript::default(),
            log: log.clone(),
        }
    }

    /// Replaces the script.
    #[must_use]
    pub fn with_script(mut self, script: CohortScript) -> Self {
        self.script = script;
        self
    }

    /// Votes no in `can_commit`.
    #[must_use]
    pub fn voting_no(mut self) -> Self {
        self.script.vote = false;
        self
    }

    /// Fails `pre_commit`.
    #[must_use]
    pub fn failing_pre_commit(mut self, message: &str) -> Self {
        self.script.fail_pre_commit = Some(message.to_string());
        self
    }

    /// Fails `commit`.
    #[must_use]
    pub fn failing_commit(mut self, message: &str) -> Self {
        self.script.fail_commit = Some(message.to_string());
        self
    }

    /// Fails `abort`.
    #[must_use]
    pub fn failing_abort(mut self, message: &str) -> Self {
        self.script.fail_abort = Some(message.to_string());
        self
    }

    /// Waits before every answer.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.script.delay = delay;
        self
    }

    /// Wraps the cohort for submission.
    pub fn shared(self) -> Arc<dyn CommitCohort> {
        Arc::new(self)
    }

    async fn answer(&self, phase: &str, failure: &Option<String>) -> Result<(), CohortError> {
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.log.push(format!("{}:{phase}", self.name));
        match failure {
            Some(message) => Err(CohortError::failed(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CommitCohort for ScriptedCohort {
    async fn can_commit(&self) -> Result<bool, CohortError> {
        self.answer("can-commit", &self.script.fail_can_commit)
            .await
            .map(|()| self.script.vote)
    }

    async fn pre_commit(&self) -> Result<(), CohortError> {
        self.answer("pre-commit", &self.script.fail_pre_commit).await
    }

    async fn commit(&self) -> Result<(), CohortError> {
        self.answer("commit", &self.script.fail_commit).await
    }

    async fn abort(&self) -> Result<(), CohortError> {
        self.answer("abort", &self.script.fail_abort).await
    }
}

#[derive(Debug, Default)]
struct StoreState {
    data: BTreeMap<InstanceIdentifier, NormalizedNode>,
    journal: Vec<TreeCandidate>,
    allocated: usize,
    committed: usize,
    fail_next_commit: Option<String>,
    closes: usize,
}

#[derive(Debug)]
struct StoreShared {
    state: Mutex<StoreState>,
    /// Present while commits wait for [`MemoryStore::release_commits`].
    gate: Option<Semaphore>,
}

/// An in-memory backing store for transaction chains.
///
/// Data is kept as a flat map from path to node. Every committed write or
/// delete is also journalled as a [`TreeCandidate`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<StoreShared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store which commits immediately.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StoreShared {
                state: Mutex::new(StoreState::default()),
                gate: None,
            }),
        }
    }

    /// Creates a store whose commits wait for
    /// [`release_commits`](Self::release_commits).
    pub fn gated() -> Self {
        Self {
            shared: Arc::new(StoreShared {
                state: Mutex::new(StoreState::default()),
                gate: Some(Semaphore::new(0)),
            }),
        }
    }

    /// Lets `count` waiting or future commits proceed.
    pub fn release_commits(&self, count: usize) {
        if let Some(gate) = &self.shared.gate {
            gate.add_permits(count);
        }
    }

    /// Makes the next commit fail with `message`.
    pub fn fail_next_commit(&self, message: &str) {
        self.shared.state.lock().fail_next_commit = Some(message.to_string());
    }

    /// Returns the committed node at a path.
    pub fn get(&self, path: &InstanceIdentifier) -> Option<NormalizedNode> {
        self.shared.state.lock().data.get(path).cloned()
    }

    /// Returns every committed candidate, oldest first.
    pub fn journal(&self) -> Vec<TreeCandidate> {
        self.shared.state.lock().journal.clone()
    }

    /// Number of backing transactions allocated.
    pub fn allocated(&self) -> usize {
        self.shared.state.lock().allocated
    }

    /// Number of backing transactions committed.
    pub fn committed(&self) -> usize {
        self.shared.state.lock().committed
    }

    /// Number of times the store chain was closed.
    pub fn closes(&self) -> usize {
        self.shared.state.lock().closes
    }

    /// Creates a chain over this store.
    pub fn chain(&self) -> MemoryChain {
        MemoryChain {
            store: self.clone(),
        }
    }
}

/// A [`BackingChain`] over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryChain {
    store: MemoryStore,
}

impl MemoryChain {
    /// Returns the store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl BackingChain for MemoryChain {
    type Transaction = MemoryTransaction;

    fn new_transaction(&self) -> Result<MemoryTransaction, ChainError> {
        let mut state = self.store.shared.state.lock();
        state.allocated += 1;
        Ok(MemoryTransaction {
            store: self.store.clone(),
            id: state.allocated,
            writes: BTreeMap::new(),
        })
    }

    fn close(&self) {
        self.store.shared.state.lock().closes += 1;
    }
}

/// A transaction on a [`MemoryStore`]. `None` marks a delete.
#[derive(Debug)]
pub struct MemoryTransaction {
    store: MemoryStore,
    id: usize,
    writes: BTreeMap<InstanceIdentifier, Option<NormalizedNode>>,
}

impl MemoryTransaction {
    /// Allocation number of this transaction, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl BackingTransaction for MemoryTransaction {
    fn put(&mut self, path: InstanceIdentifier, data: NormalizedNode) {
        self.writes.insert(path, Some(data));
    }

    fn delete(&mut self, path: InstanceIdentifier) {
        self.writes.insert(path, None);
    }

    fn read(&self, path: &InstanceIdentifier) -> Option<NormalizedNode> {
        match self.writes.get(path) {
            Some(write) => write.clone(),
            None => self.store.get(path),
        }
    }

    async fn commit(self) -> Result<(), CommitError> {
        if let Some(gate) = &self.store.shared.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = self.store.shared.state.lock();
        if let Some(message) = state.fail_next_commit.take() {
            return Err(CommitError::CommitFailed {
                transaction: test_transaction(self.id as u64),
                cause: CohortError::failed(message),
            });
        }
        for (path, write) in self.writes {
            let candidate = match write {
                Some(data) => {
                    state.data.insert(path.clone(), data.clone());
                    TreeCandidate::new(path, CandidateNode::write(data))
                }
                None => {
                    state.data.remove(&path);
                    let name = path.last().cloned();
                    TreeCandidate::new(path, CandidateNode::Delete { name })
                }
            };
            state.journal.push(candidate);
        }
        state.committed += 1;
        Ok(())
    }
}

/// An RPC implementation answering with its own name and recording calls.
#[derive(Debug)]
pub struct RecordingRpc {
    name: String,
    failure: Option<String>,
    calls: Mutex<Vec<(QName, NormalizedNode)>>,
}

impl RecordingRpc {
    /// Creates an implementation answering with a `from` leaf holding `name`.
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Creates an implementation failing every call with `message`.
    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Returns the calls received so far.
    pub fn calls(&self) -> Vec<(QName, NormalizedNode)> {
        self.calls.lock().clone()
    }

    /// Reads the implementation name back from an output.
    pub fn answered_by(output: &Option<NormalizedNode>) -> Option<&str> {
        match output.as_ref()?.value()? {
            Value::String(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

#[async_trait]
impl RpcImplementation for RecordingRpc {
    async fn invoke(
        &self,
        operation: &QName,
        input: NormalizedNode,
    ) -> Result<Option<NormalizedNode>, RpcError> {
        self.calls.lock().push((operation.clone(), input));
        if let Some(message) = &self.failure {
            return Err(RpcError::Invocation {
                operation: operation.clone(),
                message: message.clone(),
            });
        }
        Ok(Some(NormalizedNode::leaf(
            step("from"),
            Value::String(self.name.clone()),
        )))
    }
}

/// An availability change seen by a [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityEvent {
    /// Routes became available.
    Available(Vec<RpcRoute>),
    /// Routes became unavailable.
    Unavailable(Vec<RpcRoute>),
}

/// Forwards availability changes to a channel.
#[derive(Debug)]
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<AvailabilityEvent>,
}

impl RecordingListener {
    /// Creates a listener and the receiving end of its events.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AvailabilityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl AvailabilityListener for RecordingListener {
    fn on_available(&self, routes: &[RpcRoute]) {
        let _ = self.tx.send(AvailabilityEvent::Available(routes.to_vec()));
    }

    fn on_unavailable(&self, routes: &[RpcRoute]) {
        let _ = self.tx.send(AvailabilityEvent::Unavailable(routes.to_vec()));
    }
}

/// Receives the next event, failing the test after five seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<AvailabilityEvent>) -> AvailabilityEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no availability event within 5s")
        .expect("listener dropped")
}

/// Installs a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        let chain = store.chain();
        let mut tx = chain.new_transaction().unwrap();
        tx.put(path(&["a"]), uint_leaf("a", 1));
        assert_eq!(tx.read(&path(&["a"])), Some(uint_leaf("a", 1)));
        assert_eq!(store.get(&path(&["a"])), None);

        tx.commit().await.unwrap();
        assert_eq!(store.get(&path(&["a"])), Some(uint_leaf("a", 1)));
        assert_eq!(store.journal().len(), 1);

        let mut tx = chain.new_transaction().unwrap();
        tx.delete(path(&["a"]));
        assert_eq!(tx.read(&path(&["a"])), None);
        tx.commit().await.unwrap();
        assert_eq!(store.get(&path(&["a"])), None);
        assert_eq!(store.allocated(), 2);
        assert_eq!(store.committed(), 2);
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let store = MemoryStore::new();
        store.fail_next_commit("disk full");
        let mut tx = store.chain().new_transaction().unwrap();
        tx.put(path(&["a"]), uint_leaf("a", 1));
        assert!(tx.commit().await.is_err());
        assert_eq!(store.get(&path(&["a"])), None);

        let tx = store.chain().new_transaction().unwrap();
        assert!(tx.commit().await.is_ok());
    }

    #[tokio::test]
    async fn scripted_cohort_logs_calls() {
        let log = CallLog::new();
        let cohort = ScriptedCohort::new("s1", &log).failing_commit("boom");
        assert_eq!(cohort.can_commit().await, Ok(true));
        assert!(cohort.commit().await.is_err());
        assert_eq!(log.entries(), vec!["s1:can-commit", "s1:commit"]);
        assert_eq!(log.matching("s1:c").len(), 2);
    }

    #[tokio::test]
    async fn recording_rpc_answers_with_its_name() {
        let rpc = RecordingRpc::new("east");
        let output = rpc
            .invoke(&qname("ping"), NormalizedNode::container(step("input"), vec![]))
            .await
            .unwrap();
        assert_eq!(RecordingRpc::answered_by(&output), Some("east"));
        assert_eq!(rpc.calls().len(), 1);
    }
}
