//! Three-phase commit over a set of cohorts.

use super::cohort::CommitCohort;
use crate::config::CommitConfig;
use crate::error::{CohortError, CommitError, CommitResult};
use crate::identifier::TransactionIdentifier;
use crate::stats::CommitStats;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Progress of a single commit.
///
/// Phases only move forward one step at a time. `Aborted` can be entered
/// from any phase before `Committed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    /// Not started yet.
    Submitted,
    /// Collecting votes.
    CanCommit,
    /// Preparing.
    PreCommit,
    /// Committing.
    Commit,
    /// Every cohort committed.
    Committed,
    /// The transaction was rolled back.
    Aborted,
}

impl CommitPhase {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "submitted",
            Self::CanCommit => "can-commit",
            Self::PreCommit => "pre-commit",
            Self::Commit => "commit",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Drives one transaction through can-commit, pre-commit and commit.
///
/// Each phase is sent to every cohort at once and completes only when every
/// cohort has answered. A failure in any phase is reported after all
/// cohorts of that phase have answered and after every cohort was aborted.
pub struct ThreePhaseCommit {
    transaction: TransactionIdentifier,
    cohorts: Vec<Arc<dyn CommitCohort>>,
    phase: Mutex<CommitPhase>,
}

impl ThreePhaseCommit {
    /// Creates a commit in the `Submitted` phase.
    pub fn new(transaction: TransactionIdentifier, cohorts: Vec<Arc<dyn CommitCohort>>) -> Self {
        Self {
            transaction,
            cohorts,
            phase: Mutex::new(CommitPhase::Submitted),
        }
    }

    /// Returns the transaction.
    #[must_use]
    pub fn transaction(&self) -> &TransactionIdentifier {
        &self.transaction
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> CommitPhase {
        *self.phase.lock()
    }

    /// Runs the protocol to completion.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first failing phase, wrapped in
    /// [`CommitError::AbortFailed`] if aborting the cohorts failed too.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub async fn run(&self) -> CommitResult<()> {
        self.advance(CommitPhase::Submitted, CommitPhase::CanCommit);
        debug!(transaction = %self.transaction, cohorts = self.cohorts.len(), "can-commit");
        let votes = join_all(self.cohorts.iter().map(|cohort| cohort.can_commit())).await;
        let refusal = votes.into_iter().find_map(|vote| match vote {
            Ok(true) => None,
            Ok(false) => Some(CohortError::Rejected),
            Err(err) => Some(err),
        });
        if let Some(cause) = refusal {
            let err = CommitError::CanCommitFailed {
                transaction: self.transaction.clone(),
                cause,
            };
            return Err(self.abort(err).await);
        }

        self.advance(CommitPhase::CanCommit, CommitPhase::PreCommit);
        debug!(transaction = %self.transaction, "pre-commit");
        let results = join_all(self.cohorts.iter().map(|cohort| cohort.pre_commit())).await;
        if let Some(cause) = first_failure(results) {
            let err = CommitError::PreCommitFailed {
                transaction: self.transaction.clone(),
                cause,
            };
            return Err(self.abort(err).await);
        }

        self.advance(CommitPhase::PreCommit, CommitPhase::Commit);
        debug!(transaction = %self.transaction, "commit");
        let results = join_all(self.cohorts.iter().map(|cohort| cohort.commit())).await;
        if let Some(cause) = first_failure(results) {
            let err = CommitError::CommitFailed {
                transaction: self.transaction.clone(),
                cause,
            };
            return Err(self.abort(err).await);
        }

        self.advance(CommitPhase::Commit, CommitPhase::Committed);
        debug!(transaction = %self.transaction, "committed");
        Ok(())
    }

    /// Aborts every cohort and returns the error to report.
    async fn abort(&self, cause: CommitError) -> CommitError {
        {
            let mut phase = self.phase.lock();
            assert!(
                !phase.is_terminal(),
                "cannot abort {} in phase {}",
                self.transaction,
                *phase
            );
            *phase = CommitPhase::Aborted;
        }
        warn!(transaction = %self.transaction, error = %cause, "aborting transaction");

        let results = join_all(self.cohorts.iter().map(|cohort| cohort.abort())).await;
        let abort_errors: Vec<CohortError> = results.into_iter().filter_map(Result::err).collect();
        if abort_errors.is_empty() {
            return cause;
        }
        warn!(
            transaction = %self.transaction,
            failures = abort_errors.len(),
            "abort failed on some cohorts"
        );
        CommitError::AbortFailed {
            cause: Box::new(cause),
            abort_errors,
        }
    }

    fn advance(&self, from: CommitPhase, to: CommitPhase) {
        let mut phase = self.phase.lock();
        assert_eq!(
            *phase, from,
            "transaction {} cannot move to {to} from phase {}",
            self.transaction, *phase
        );
        *phase = to;
    }
}

impl fmt::Debug for ThreePhaseCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreePhaseCommit")
            .field("transaction", &self.transaction)
            .field("cohorts", &self.cohorts.len())
            .field("phase", &self.phase())
            .finish()
    }
}

fn first_failure(results: Vec<Result<(), CohortError>>) -> Option<CohortError> {
    results.into_iter().find_map(Result::err)
}

/// Submits transactions for three-phase commit and records statistics.
#[derive(Debug, Default)]
pub struct CommitCoordinator {
    config: CommitConfig,
    stats: Arc<CommitStats>,
}

impl CommitCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(config: CommitConfig) -> Self {
        Self {
            config,
            stats: Arc::new(CommitStats::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CommitConfig {
        &self.config
    }

    /// Returns the statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<CommitStats> {
        &self.stats
    }

    /// Commits a transaction across its cohorts.
    ///
    /// # Errors
    ///
    /// See [`ThreePhaseCommit::run`].
    pub async fn submit(
        &self,
        transaction: TransactionIdentifier,
        cohorts: Vec<Arc<dyn CommitCohort>>,
    ) -> CommitResult<()> {
        let started = Instant::now();
        if self.config.record_stats {
            self.stats.record_submit();
        }

        let result = ThreePhaseCommit::new(transaction, cohorts).run().await;

        if self.config.record_stats {
            let elapsed = started.elapsed();
            match &result {
                Ok(()) => self.stats.record_commit(elapsed),
                Err(err) => self
                    .stats
                    .record_abort(elapsed, matches!(err, CommitError::AbortFailed { .. })),
            }
        }
        result
    }
}
