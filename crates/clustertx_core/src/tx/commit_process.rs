//! Client side of the commit pipeline.

use crate::config::CommitConfig;
use crate::error::CoreResult;
use crate::replication::Replicator;
use crate::session::LocalSessionPool;
use crate::tx::{
    CommittingTransactions, ReplicatedTransaction, TransactionRepresentation, WaitOutcome,
};
use crate::types::TransactionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters of commit process activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Commits that returned a transaction id.
    pub commits: u64,
    /// Proposals made, including re-proposals.
    pub proposals: u64,
    /// Proposals made after the first one of an operation.
    pub reproposals: u64,
    /// Re-proposal failures that were logged and ignored.
    pub swallowed_failures: u64,
    /// Waits that ended without an outcome.
    pub timeouts: u64,
    /// Waits cut short by an interrupt.
    pub interrupts: u64,
    /// Commits abandoned because their first proposal failed.
    pub first_proposal_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    commits: AtomicU64,
    proposals: AtomicU64,
    reproposals: AtomicU64,
    swallowed_failures: AtomicU64,
    timeouts: AtomicU64,
    interrupts: AtomicU64,
    first_proposal_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CommitStats {
        CommitStats {
            commits: self.commits.load(Ordering::Relaxed),
            proposals: self.proposals.load(Ordering::Relaxed),
            reproposals: self.reproposals.load(Ordering::Relaxed),
            swallowed_failures: self.swallowed_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            first_proposal_failures: self.first_proposal_failures.load(Ordering::Relaxed),
        }
    }
}

/// Commits locally built transactions through the replicated log.
///
/// Each call leases an operation id, registers a waiter and proposes the
/// transaction until the applier reports an outcome. Re-proposing is safe
/// because the applier accepts each operation id at most once.
///
/// Only a failed *first* proposal aborts a commit: after that, an earlier
/// proposal may still be agreed by the cluster, so the loop keeps waiting
/// and re-proposing.
#[derive(Debug)]
pub struct ReplicatedTransactionCommitProcess<R> {
    replicator: R,
    pool: LocalSessionPool,
    registry: Arc<CommittingTransactions>,
    config: CommitConfig,
    counters: Counters,
}

impl<R: Replicator> ReplicatedTransactionCommitProcess<R> {
    /// Creates a commit process proposing through `replicator` under the
    /// registry's global session.
    pub fn new(replicator: R, registry: Arc<CommittingTransactions>, config: CommitConfig) -> Self {
        let pool = LocalSessionPool::with_max_idle(
            registry.global_session().clone(),
            config.max_pooled_sessions,
        );
        Self {
            replicator,
            pool,
            registry,
            config,
            counters: Counters::default(),
        }
    }

    /// Commits `tx`, returning the id it was committed under locally.
    ///
    /// Blocks the calling thread until the entry is applied.
    ///
    /// # Errors
    ///
    /// Returns the replication error if the first proposal fails, or the
    /// failure reported by the applier (such as an expired lock session).
    pub fn commit(&self, tx: &TransactionRepresentation) -> CoreResult<TransactionId> {
        let payload = tx.encode()?;
        let context = self.pool.acquire_session();
        let operation_id = context.local_operation_id();
        let replicated = ReplicatedTransaction::under_context(payload, &context);
        let entry = self.registry.register(operation_id);

        let mut first_proposal = true;
        let mut interrupted = false;

        loop {
            Counters::bump(&self.counters.proposals);
            if !first_proposal {
                Counters::bump(&self.counters.reproposals);
            }

            if let Err(err) = self.replicator.replicate(&replicated) {
                if first_proposal {
                    Counters::bump(&self.counters.first_proposal_failures);
                    warn!(%operation_id, error = %err, "first proposal failed, abandoning commit");
                    self.registry.close(&entry);
                    // The id was never agreed; reusing the local session would
                    // leave a gap in its sequence.
                    self.pool.retire_session(context);
                    return Err(err);
                }
                Counters::bump(&self.counters.swallowed_failures);
                warn!(%operation_id, error = %err, "re-proposal failed, still waiting");
            }
            first_proposal = false;

            let outcome = entry.wait_until_committed(self.config.retry_interval);
            let result = match outcome {
                WaitOutcome::Committed(tx_id) => Ok(tx_id),
                WaitOutcome::Failed(err) => Err(err),
                WaitOutcome::TimedOut => {
                    Counters::bump(&self.counters.timeouts);
                    debug!(%operation_id, "no outcome within retry interval, re-proposing");
                    continue;
                }
                WaitOutcome::Interrupted => {
                    Counters::bump(&self.counters.interrupts);
                    interrupted = true;
                    continue;
                }
            };

            self.pool.release_session(context);
            if interrupted {
                info!(%operation_id, "commit was interrupted while waiting");
            }
            if result.is_ok() {
                Counters::bump(&self.counters.commits);
            }
            return result;
        }
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> CommitStats {
        self.counters.snapshot()
    }

    /// The local session pool leasing operation ids.
    pub fn pool(&self) -> &LocalSessionPool {
        &self.pool
    }

    /// The registry of in-flight commits.
    pub fn registry(&self) -> &Arc<CommittingTransactions> {
        &self.registry
    }

    /// The replicator proposals go through.
    pub fn replicator(&self) -> &R {
        &self.replicator
    }
}
