//! Frontend tracking state carried in shard snapshots.
//!
//! A recovering replica needs to know, per client, which local histories and
//! transactions were already closed or purged so replayed requests are not
//! applied twice.

use crate::identifier::{ClientIdentifier, WireIdentifier};
use arbordb_codec::{CodecResult, DataInput, DataOutput, UnsignedLongBitmap, UnsignedLongSet};
use std::fmt;
use std::io::{Read, Write};

/// Discriminates snapshot metadata records. Codes are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MetadataKind {
    /// Per-client frontend tracking state.
    Frontend = 1,
}

impl MetadataKind {
    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Resolves a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Frontend),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frontend => f.write_str("frontend"),
        }
    }
}

/// A typed metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMetadata {
    /// See [`FrontendShardDataTreeSnapshotMetadata`].
    Frontend(FrontendShardDataTreeSnapshotMetadata),
}

impl SnapshotMetadata {
    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> MetadataKind {
        match self {
            Self::Frontend(_) => MetadataKind::Frontend,
        }
    }

    pub(crate) fn write_body<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        match self {
            Self::Frontend(metadata) => metadata.write_to(out),
        }
    }

    pub(crate) fn read_body<R: Read + ?Sized>(
        kind: MetadataKind,
        input: &mut R,
    ) -> CodecResult<Self> {
        match kind {
            MetadataKind::Frontend => {
                FrontendShardDataTreeSnapshotMetadata::read_from(input).map(Self::Frontend)
            }
        }
    }
}

impl From<FrontendShardDataTreeSnapshotMetadata> for SnapshotMetadata {
    fn from(metadata: FrontendShardDataTreeSnapshotMetadata) -> Self {
        Self::Frontend(metadata)
    }
}

/// Tracking state of every client known to a shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontendShardDataTreeSnapshotMetadata {
    clients: Vec<FrontendClientMetadata>,
}

impl FrontendShardDataTreeSnapshotMetadata {
    /// Creates the record.
    #[must_use]
    pub fn new(clients: Vec<FrontendClientMetadata>) -> Self {
        Self { clients }
    }

    /// Returns the clients.
    #[must_use]
    pub fn clients(&self) -> &[FrontendClientMetadata] {
        &self.clients
    }

    /// Finds a client by identifier.
    #[must_use]
    pub fn client(&self, client: &ClientIdentifier) -> Option<&FrontendClientMetadata> {
        self.clients.iter().find(|c| c.client() == client)
    }

    /// Writes the record body.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_len(self.clients.len())?;
        for client in &self.clients {
            client.write_to(out)?;
        }
        Ok(())
    }

    /// Reads a record body.
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let count = input.read_len()?;
        let mut clients = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            clients.push(FrontendClientMetadata::read_from(input)?);
        }
        Ok(Self { clients })
    }
}

/// Tracking state of one client generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendClientMetadata {
    client: ClientIdentifier,
    purged_histories: UnsignedLongSet,
    histories: Vec<FrontendHistoryMetadata>,
}

impl FrontendClientMetadata {
    /// Creates client state. Histories that are already purged are dropped.
    #[must_use]
    pub fn new(
        client: ClientIdentifier,
        purged_histories: UnsignedLongSet,
        histories: Vec<FrontendHistoryMetadata>,
    ) -> Self {
        let histories = histories
            .into_iter()
            .filter(|h| !purged_histories.contains(h.history_id()))
            .collect();
        Self {
            client,
            purged_histories,
            histories,
        }
    }

    /// Returns the client.
    #[must_use]
    pub fn client(&self) -> &ClientIdentifier {
        &self.client
    }

    /// Returns the purged history ids.
    #[must_use]
    pub fn purged_histories(&self) -> &UnsignedLongSet {
        &self.purged_histories
    }

    /// Returns the live histories.
    #[must_use]
    pub fn histories(&self) -> &[FrontendHistoryMetadata] {
        &self.histories
    }

    /// Finds a live history.
    #[must_use]
    pub fn history(&self, history_id: u64) -> Option<&FrontendHistoryMetadata> {
        self.histories.iter().find(|h| h.history_id() == history_id)
    }

    /// Finds a live history for update.
    pub fn history_mut(&mut self, history_id: u64) -> Option<&mut FrontendHistoryMetadata> {
        self.histories
            .iter_mut()
            .find(|h| h.history_id() == history_id)
    }

    /// Starts tracking a history. Returns `false` if the history was purged
    /// or is already tracked.
    pub fn add_history(&mut self, history: FrontendHistoryMetadata) -> bool {
        let id = history.history_id();
        if self.purged_histories.contains(id) || self.history(id).is_some() {
            return false;
        }
        self.histories.push(history);
        true
    }

    /// Marks a history purged and stops tracking it.
    pub fn purge_history(&mut self, history_id: u64) {
        self.purged_histories.add(history_id);
        self.histories.retain(|h| h.history_id() != history_id);
    }

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        self.client.write_to(out)?;
        self.purged_histories.write_to(out)?;
        out.write_len(self.histories.len())?;
        for history in &self.histories {
            history.write_to(out)?;
        }
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let client = ClientIdentifier::read_from(input)?;
        let purged_histories = UnsignedLongSet::read_from(input)?;
        let count = input.read_len()?;
        let mut histories = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            histories.push(FrontendHistoryMetadata::read_from(input)?);
        }
        Ok(Self::new(client, purged_histories, histories))
    }
}

/// Tracking state of one local history.
///
/// `closed_transactions` maps a finished transaction to whether it
/// committed. A purged transaction is never tracked as closed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendHistoryMetadata {
    history_id: u64,
    cookie: u64,
    closed: bool,
    closed_transactions: UnsignedLongBitmap,
    purged_transactions: UnsignedLongSet,
}

impl FrontendHistoryMetadata {
    /// Creates history state. Purged ids are removed from the closed map.
    #[must_use]
    pub fn new(
        history_id: u64,
        cookie: u64,
        closed: bool,
        mut closed_transactions: UnsignedLongBitmap,
        purged_transactions: UnsignedLongSet,
    ) -> Self {
        let stale: Vec<u64> = closed_transactions
            .iter()
            .map(|(id, _)| id)
            .filter(|id| purged_transactions.contains(*id))
            .collect();
        for id in stale {
            closed_transactions.remove(id);
        }
        Self {
            history_id,
            cookie,
            closed,
            closed_transactions,
            purged_transactions,
        }
    }

    /// Creates state for a freshly opened history.
    #[must_use]
    pub fn open(history_id: u64, cookie: u64) -> Self {
        Self::new(
            history_id,
            cookie,
            false,
            UnsignedLongBitmap::new(),
            UnsignedLongSet::new(),
        )
    }

    /// Returns the history id.
    #[must_use]
    pub fn history_id(&self) -> u64 {
        self.history_id
    }

    /// Returns the cookie.
    #[must_use]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Whether the history was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the closed transactions.
    #[must_use]
    pub fn closed_transactions(&self) -> &UnsignedLongBitmap {
        &self.closed_transactions
    }

    /// Returns the purged transactions.
    #[must_use]
    pub fn purged_transactions(&self) -> &UnsignedLongSet {
        &self.purged_transactions
    }

    /// Marks the history closed.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Records a finished transaction. Returns `false` if it was already
    /// purged and the record was ignored.
    pub fn close_transaction(&mut self, transaction_id: u64, committed: bool) -> bool {
        if self.purged_transactions.contains(transaction_id) {
            return false;
        }
        self.closed_transactions.set(transaction_id, committed);
        true
    }

    /// Marks a transaction purged.
    pub fn purge_transaction(&mut self, transaction_id: u64) {
        self.closed_transactions.remove(transaction_id);
        self.purged_transactions.add(transaction_id);
    }

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_longs(self.history_id, self.cookie)?;
        out.write_bool(self.closed)?;
        self.closed_transactions.write_to(out)?;
        self.purged_transactions.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let (history_id, cookie) = input.read_longs()?;
        let closed = input.read_bool()?;
        let closed_transactions = UnsignedLongBitmap::read_from(input)?;
        let purged_transactions = UnsignedLongSet::read_from(input)?;
        Ok(Self::new(
            history_id,
            cookie,
            closed,
            closed_transactions,
            purged_transactions,
        ))
    }
}
