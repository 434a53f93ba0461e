//! Cross-crate integration test helpers.
//!
//! [`ShardHarness`] plays the role of one shard replica: payloads are
//! appended to an in-memory log, applied to a data tree and to frontend
//! tracking state, and the whole state can be snapshotted and recovered.

use arbordb_codec::{
    CandidateNode, CodecResult, InstanceIdentifier, NormalizedNode, PathArgument, TreeCandidate,
};
use arbordb_core::{
    ClientIdentifier, FrontendClientMetadata, FrontendHistoryMetadata,
    FrontendShardDataTreeSnapshotMetadata, IdentifiablePayload, LocalHistoryIdentifier, Payload,
    PayloadConfig, PayloadResult, ShardSnapshot, SnapshotMetadata, SnapshotResult,
    TransactionIdentifier,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::fixtures::step;

/// Name of the root container of every harness tree.
pub fn root_name() -> PathArgument {
    step("data")
}

fn empty_root() -> NormalizedNode {
    NormalizedNode::container(root_name(), Vec::new())
}

/// A single replica: log, data tree and frontend tracking.
#[derive(Debug, Clone)]
pub struct ShardHarness {
    config: PayloadConfig,
    log: Vec<Vec<u8>>,
    root: NormalizedNode,
    clients: BTreeMap<ClientIdentifier, FrontendClientMetadata>,
}

impl Default for ShardHarness {
    fn default() -> Self {
        Self::new(PayloadConfig::default())
    }
}

impl ShardHarness {
    /// Creates an empty replica.
    pub fn new(config: PayloadConfig) -> Self {
        Self {
            config,
            log: Vec::new(),
            root: empty_root(),
            clients: BTreeMap::new(),
        }
    }

    /// Encodes a payload, appends it to the log and applies the decoded
    /// copy.
    pub fn append(&mut self, payload: &Payload) -> PayloadResult<()> {
        let bytes = payload.to_bytes()?;
        let decoded = Payload::read_from(&mut bytes.as_slice(), &self.config)?;
        self.apply(&decoded)?;
        self.log.push(bytes);
        Ok(())
    }

    /// Applies every framed payload in `entries`, in order. Returns the
    /// number applied.
    pub fn replay(&mut self, entries: &[Vec<u8>]) -> PayloadResult<usize> {
        for entry in entries {
            let payload = Payload::read_from(&mut entry.as_slice(), &self.config)?;
            self.apply(&payload)?;
            self.log.push(entry.clone());
        }
        Ok(entries.len())
    }

    /// Applies one payload to the replica state.
    pub fn apply(&mut self, payload: &Payload) -> PayloadResult<()> {
        trace!(kind = %payload.kind(), id = %payload.identifier_string(), "applying payload");
        match payload {
            Payload::Commit(commit) => {
                let tx = commit.candidate()?;
                self.apply_candidate(tx.candidate());
                self.finish_transaction(tx.identifier(), true);
            }
            Payload::Abort(abort) => self.finish_transaction(abort.identifier(), false),
            Payload::Purge(purge) => {
                let tx = purge.identifier();
                if let Some(history) = self.history_mut(tx.history()) {
                    history.purge_transaction(tx.transaction_id());
                }
            }
            Payload::SkipTransactions(skip) => {
                if let Some(history) = self.history_mut(skip.identifier()) {
                    for range in skip.transaction_ids().ranges() {
                        for id in range {
                            history.purge_transaction(id);
                        }
                    }
                }
            }
            Payload::CreateHistory(create) => {
                let id = create.identifier();
                let added = self
                    .client_mut(id.client())
                    .add_history(FrontendHistoryMetadata::open(id.history_id(), id.cookie()));
                if !added {
                    debug!(history = %id, "history already known or purged");
                }
            }
            Payload::CloseHistory(close) => {
                if let Some(history) = self.history_mut(close.identifier()) {
                    history.close();
                }
            }
            Payload::PurgeHistory(purge) => {
                let id = purge.identifier();
                self.client_mut(id.client()).purge_history(id.history_id());
            }
            Payload::DisableTracking(disable) => {
                self.clients.remove(disable.identifier());
            }
        }
        Ok(())
    }

    /// Applies a candidate to the data tree.
    pub fn apply_candidate(&mut self, candidate: &TreeCandidate) {
        apply_node(
            &mut self.root,
            candidate.root_path().steps(),
            candidate.root(),
        );
    }

    /// Returns the node at a path below the root container.
    pub fn read(&self, path: &InstanceIdentifier) -> Option<&NormalizedNode> {
        self.root.find(path.steps())
    }

    /// Returns the root container.
    pub fn root(&self) -> &NormalizedNode {
        &self.root
    }

    /// Returns the framed entries appended since the last snapshot.
    pub fn log(&self) -> &[Vec<u8>] {
        &self.log
    }

    /// Returns the tracking state of a client.
    pub fn client(&self, client: &ClientIdentifier) -> Option<&FrontendClientMetadata> {
        self.clients.get(client)
    }

    /// Returns the tracking state of a history.
    pub fn history(&self, id: &LocalHistoryIdentifier) -> Option<&FrontendHistoryMetadata> {
        self.clients.get(id.client())?.history(id.history_id())
    }

    /// Builds a snapshot of the current state.
    pub fn snapshot(&self) -> ShardSnapshot {
        let metadata = FrontendShardDataTreeSnapshotMetadata::new(
            self.clients.values().cloned().collect(),
        );
        ShardSnapshot::new(
            Some(self.root.clone()),
            [SnapshotMetadata::from(metadata)],
        )
    }

    /// Serializes a snapshot and drops the log entries it covers.
    pub fn compact(&mut self) -> CodecResult<Vec<u8>> {
        let bytes = self.snapshot().serialize()?;
        debug!(entries = self.log.len(), bytes = bytes.len(), "compacting log");
        self.log.clear();
        Ok(bytes)
    }

    /// Recovers a replica from a serialized snapshot.
    pub fn restore(bytes: &[u8], config: PayloadConfig) -> SnapshotResult<Self> {
        let snapshot = ShardSnapshot::deserialize(bytes)?;
        let clients = snapshot
            .frontend_metadata()
            .map(|metadata| {
                metadata
                    .clients()
                    .iter()
                    .map(|client| (client.client().clone(), client.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            config,
            log: Vec::new(),
            root: snapshot.into_root().unwrap_or_else(empty_root),
            clients,
        })
    }

    fn client_mut(&mut self, client: &ClientIdentifier) -> &mut FrontendClientMetadata {
        self.clients.entry(client.clone()).or_insert_with(|| {
            FrontendClientMetadata::new(client.clone(), Default::default(), Vec::new())
        })
    }

    /// Returns a tracked history, starting to track it if needed. Purged
    /// histories stay untracked.
    fn history_mut(&mut self, id: &LocalHistoryIdentifier) -> Option<&mut FrontendHistoryMetadata> {
        let client = self.client_mut(id.client());
        if client.history(id.history_id()).is_none() {
            client.add_history(FrontendHistoryMetadata::open(id.history_id(), id.cookie()));
        }
        client.history_mut(id.history_id())
    }

    fn finish_transaction(&mut self, tx: &TransactionIdentifier, committed: bool) {
        if let Some(history) = self.history_mut(tx.history()) {
            history.close_transaction(tx.transaction_id(), committed);
        }
    }
}

fn apply_node(target: &mut NormalizedNode, path: &[PathArgument], node: &CandidateNode) {
    match node {
        CandidateNode::Unmodified { .. } => {}
        CandidateNode::Write { data, .. } => put(target, path, data.clone()),
        CandidateNode::Delete { .. } => remove(target, path),
        CandidateNode::Modified { children, .. } => {
            for child in children {
                let Some(name) = child.name() else {
                    continue;
                };
                let mut child_path = path.to_vec();
                child_path.push(name.clone());
                apply_node(target, &child_path, child);
            }
        }
    }
}

/// Stores `data` at `path`, creating missing containers on the way.
fn put(target: &mut NormalizedNode, path: &[PathArgument], data: NormalizedNode) {
    let Some((first, rest)) = path.split_first() else {
        *target = data;
        return;
    };
    if let NormalizedNode::Leaf { name, .. } = target {
        *target = NormalizedNode::container(name.clone(), Vec::new());
    }
    let NormalizedNode::Container { children, .. } = target else {
        return;
    };
    let index = match children.iter().position(|child| child.name() == first) {
        Some(index) => index,
        None => {
            children.push(NormalizedNode::container(first.clone(), Vec::new()));
            children.len() - 1
        }
    };
    put(&mut children[index], rest, data);
}

/// Removes the node at `path`. Removing the root leaves an empty container.
fn remove(target: &mut NormalizedNode, path: &[PathArgument]) {
    match path {
        [] => *target = NormalizedNode::container(target.name().clone(), Vec::new()),
        [last] => {
            if let NormalizedNode::Container { children, .. } = target {
                children.retain(|child| child.name() != last);
            }
        }
        [first, rest @ ..] => {
            if let NormalizedNode::Container { children, .. } = target {
                if let Some(child) = children.iter_mut().find(|child| child.name() == first) {
                    remove(child, rest);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{path, uint_leaf};
    use arbordb_codec::ModificationKind;
    use arbordb_core::{
        AbortTransactionPayload, CommitTransactionPayload, CreateLocalHistoryPayload,
        FrontendIdentifier, PurgeLocalHistoryPayload,
    };

    fn history() -> LocalHistoryIdentifier {
        let client = ClientIdentifier::new(FrontendIdentifier::new("member-1", "config"), 0);
        LocalHistoryIdentifier::new(client, 1, 0)
    }

    fn commit(id: u64, candidate: &TreeCandidate) -> Payload {
        let tx = TransactionIdentifier::new(history(), id);
        Payload::Commit(
            CommitTransactionPayload::create(tx, candidate, &PayloadConfig::default()).unwrap(),
        )
    }

    #[test]
    fn candidates_build_and_prune_the_tree() {
        let mut shard = ShardHarness::default();
        shard.apply_candidate(&TreeCandidate::new(
            path(&["inventory", "count"]),
            CandidateNode::write(uint_leaf("count", 1)),
        ));
        assert_eq!(
            shard.read(&path(&["inventory", "count"])),
            Some(&uint_leaf("count", 1))
        );

        shard.apply_candidate(&TreeCandidate::new(
            path(&["inventory"]),
            CandidateNode::modified(
                ModificationKind::SubtreeModified,
                None,
                vec![
                    CandidateNode::delete(step("count")),
                    CandidateNode::write(uint_leaf("limit", 5)),
                ],
            ),
        ));
        assert_eq!(shard.read(&path(&["inventory", "count"])), None);
        assert_eq!(
            shard.read(&path(&["inventory", "limit"])),
            Some(&uint_leaf("limit", 5))
        );
    }

    #[test]
    fn payloads_update_frontend_tracking() {
        let mut shard = ShardHarness::default();
        shard
            .append(&Payload::CreateHistory(CreateLocalHistoryPayload::create(history())))
            .unwrap();
        let candidate = TreeCandidate::new(path(&["a"]), CandidateNode::write(uint_leaf("a", 1)));
        shard.append(&commit(0, &candidate)).unwrap();
        shard
            .append(&Payload::Abort(
                AbortTransactionPayload::create(TransactionIdentifier::new(history(), 1)),
            ))
            .unwrap();

        let tracked = shard.history(&history()).unwrap();
        assert_eq!(tracked.closed_transactions().get(0), Some(true));
        assert_eq!(tracked.closed_transactions().get(1), Some(false));
        assert_eq!(shard.log().len(), 3);

        shard
            .append(&Payload::PurgeHistory(PurgeLocalHistoryPayload::create(history())))
            .unwrap();
        assert!(shard.history(&history()).is_none());
        assert!(shard
            .client(history().client())
            .unwrap()
            .purged_histories()
            .contains(1));
    }

    #[test]
    fn compaction_and_restore_preserve_state() {
        let mut shard = ShardHarness::default();
        let candidate = TreeCandidate::new(path(&["a"]), CandidateNode::write(uint_leaf("a", 7)));
        shard.append(&commit(3, &candidate)).unwrap();

        let bytes = shard.compact().unwrap();
        assert!(shard.log().is_empty());

        let restored = ShardHarness::restore(&bytes, PayloadConfig::default()).unwrap();
        assert_eq!(restored.root(), shard.root());
        assert_eq!(
            restored.history(&history()).unwrap().closed_transactions().get(3),
            Some(true)
        );
    }
}
