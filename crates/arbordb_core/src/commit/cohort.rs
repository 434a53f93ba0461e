//! Commit cohort contract.

use crate::error::CohortError;
use async_trait::async_trait;

/// One participant of a distributed commit, typically one shard.
///
/// A cohort is created for a single transaction and sees at most one call
/// of each phase. `abort` may follow any phase, including a failed one, and
/// must be safe to call after `can_commit` voted no.
#[async_trait]
pub trait CommitCohort: Send + Sync {
    /// Votes on whether the transaction can commit.
    async fn can_commit(&self) -> Result<bool, CohortError>;

    /// Prepares the commit. After this succeeds the cohort must be able to
    /// commit.
    async fn pre_commit(&self) -> Result<(), CohortError>;

    /// Makes the transaction durable and visible.
    async fn commit(&self) -> Result<(), CohortError>;

    /// Rolls back whatever the earlier phases did.
    async fn abort(&self) -> Result<(), CohortError>;
}
