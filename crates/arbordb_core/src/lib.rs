//! # ArborDB Core
//!
//! Replicated-shard plumbing for the ArborDB tree store.
//!
//! This crate provides:
//! - Log payloads for transaction and history lifecycle events, with lazy
//!   decoding of committed tree candidates
//! - Versioned shard snapshots with frontend metadata and legacy fallback
//! - A three-phase commit coordinator fanning out to commit cohorts
//! - Ping-pong transaction chains which fold frontend transactions into at
//!   most two backing transactions
//! - An immutable RPC routing table and the router publishing it
//!
//! ## Usage
//!
//! ```
//! use arbordb_codec::{CandidateNode, InstanceIdentifier, NormalizedNode, PathArgument, QName,
//!     TreeCandidate, Value};
//! use arbordb_core::{
//!     ClientIdentifier, CommitTransactionPayload, FrontendIdentifier, LocalHistoryIdentifier,
//!     Payload, PayloadConfig, TransactionIdentifier,
//! };
//!
//! let client = ClientIdentifier::new(FrontendIdentifier::new("member-1", "config"), 0);
//! let tx = TransactionIdentifier::new(LocalHistoryIdentifier::new(client, 1, 0), 0);
//!
//! let name = PathArgument::NodeIdentifier(QName::new("urn:example", "counter"));
//! let candidate = TreeCandidate::new(
//!     InstanceIdentifier::root().child(name.clone()),
//!     CandidateNode::write(NormalizedNode::leaf(name, Value::Uint(1))),
//! );
//!
//! let config = PayloadConfig::default();
//! let payload =
//!     Payload::Commit(CommitTransactionPayload::create(tx, &candidate, &config).unwrap());
//! let bytes = payload.to_bytes().unwrap();
//!
//! let decoded = Payload::read_from(&mut bytes.as_slice(), &config).unwrap();
//! let Payload::Commit(decoded) = decoded else {
//!     unreachable!()
//! };
//! assert_eq!(decoded.candidate().unwrap().candidate(), &candidate);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commit;
pub mod config;
pub mod error;
pub mod identifier;
pub mod payload;
pub mod pingpong;
pub mod rpc;
pub mod snapshot;
pub mod stats;

pub use commit::{CommitCohort, CommitCoordinator, CommitPhase, ThreePhaseCommit};
pub use config::{CommitConfig, PayloadConfig};
pub use error::{
    ChainError, ChainResult, CohortError, CommitError, CommitResult, PayloadError, PayloadResult,
    RpcError, RpcResult, SnapshotError, SnapshotResult,
};
pub use identifier::{
    ClientIdentifier, FrontendIdentifier, LocalHistoryIdentifier, TransactionIdentifier,
    WireIdentifier,
};
pub use payload::{
    AbortTransactionPayload, CandidateTransaction, CloseLocalHistoryPayload, CommitBody,
    CommitTransactionPayload, CreateLocalHistoryPayload, DisableTrackingPayload,
    IdentifiablePayload, Payload, PayloadKind, PurgeLocalHistoryPayload, PurgeTransactionPayload,
    SkipTransactionsPayload,
};
pub use pingpong::{
    BackingChain, BackingTransaction, CommitFuture, PingPongReadTransaction,
    PingPongTransactionChain, PingPongWriteTransaction,
};
pub use rpc::{
    AvailabilityListener, ContextKeyExtractor, LeafContextExtractor, ListenerRegistration,
    RpcImplementation, RpcRegistration, RpcRoute, RpcRouter, RpcRoutingTable, RoutingEntry,
};
pub use snapshot::{
    FrontendClientMetadata, FrontendHistoryMetadata, FrontendShardDataTreeSnapshotMetadata,
    MetadataKind, ShardSnapshot, SnapshotMetadata,
};
pub use stats::{CommitStats, CommitStatsSnapshot};
