//! Three-phase commit coordination.
//!
//! A write transaction spanning several shards is committed by asking every
//! shard's [`CommitCohort`] to vote, prepare and commit, in that order, with
//! a full barrier between phases. Any failure aborts every cohort before it
//! is reported.

mod cohort;
mod coordinator;

pub use cohort::CommitCohort;
pub use coordinator::{CommitCoordinator, CommitPhase, ThreePhaseCommit};
