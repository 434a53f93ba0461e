//! Ping-pong transaction chains.
//!
//! A chain hands out one frontend transaction at a time. Underneath, at most
//! two backing transactions exist: one committing and one being filled.
//! Frontend transactions readied while a commit is in flight are folded into
//! the same backing transaction, which is committed as soon as the previous
//! commit completes. Each frontend transaction still gets its own
//! completion future.

mod chain;

pub use chain::{PingPongReadTransaction, PingPongTransactionChain, PingPongWriteTransaction};

use crate::error::{ChainError, CommitError};
use arbordb_codec::{InstanceIdentifier, NormalizedNode};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// The transaction chain of the underlying store.
pub trait BackingChain: Send + Sync + 'static {
    /// The read-write transaction type of the store.
    type Transaction: BackingTransaction;

    /// Allocates a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Backing`] if the store cannot allocate one.
    fn new_transaction(&self) -> Result<Self::Transaction, ChainError>;

    /// Closes the store chain. Called once, after the last commit finished.
    fn close(&self);
}

/// A read-write transaction of the underlying store.
#[async_trait]
pub trait BackingTransaction: Send + 'static {
    /// Writes a node at a path.
    fn put(&mut self, path: InstanceIdentifier, data: NormalizedNode);

    /// Deletes the node at a path.
    fn delete(&mut self, path: InstanceIdentifier);

    /// Reads the node at a path, including this transaction's own writes.
    fn read(&self, path: &InstanceIdentifier) -> Option<NormalizedNode>;

    /// Commits the transaction.
    async fn commit(self) -> Result<(), CommitError>;
}

/// Completes when the backing transaction a frontend transaction was folded
/// into has committed.
#[derive(Debug)]
#[must_use = "commit futures report the outcome of the commit"]
pub struct CommitFuture {
    rx: oneshot::Receiver<Result<(), CommitError>>,
}

impl CommitFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), CommitError>>) -> Self {
        Self { rx }
    }
}

impl Future for CommitFuture {
    type Output = Result<(), ChainError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.map_err(ChainError::from)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ChainError::Backing {
                message: "commit task ended without reporting".into(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
