//! In-flight commit waiters, keyed by operation id.

use crate::error::CoreError;
use crate::session::{GlobalSession, LocalOperationId};
use crate::types::TransactionId;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of waiting on a [`CommittingTransaction`].
#[derive(Debug)]
pub enum WaitOutcome {
    /// The transaction was committed locally under this id.
    Committed(TransactionId),
    /// The transaction was rejected at apply time.
    Failed(CoreError),
    /// Nothing happened within the timeout.
    TimedOut,
    /// The wait was interrupted before completion.
    Interrupted,
}

#[derive(Debug, Default)]
struct Slot {
    outcome: Option<Result<TransactionId, CoreError>>,
    completed: bool,
    interrupted: bool,
}

/// Completion slot for one commit attempt.
///
/// Completed at most once by the applier. The outcome is handed to the
/// first waiter that observes it.
#[derive(Debug)]
pub struct CommittingTransaction {
    operation_id: LocalOperationId,
    slot: Mutex<Slot>,
    completed: Condvar,
}

impl CommittingTransaction {
    fn new(operation_id: LocalOperationId) -> Self {
        Self {
            operation_id,
            slot: Mutex::new(Slot::default()),
            completed: Condvar::new(),
        }
    }

    /// Operation this entry waits for.
    pub fn operation_id(&self) -> LocalOperationId {
        self.operation_id
    }

    /// Completes the entry with a committed id. Returns false if it was
    /// already completed.
    pub fn notify_successfully_committed(&self, tx_id: TransactionId) -> bool {
        self.complete(Ok(tx_id))
    }

    /// Completes the entry with a failure. Returns false if it was already
    /// completed.
    pub fn notify_commit_failed(&self, error: CoreError) -> bool {
        self.complete(Err(error))
    }

    fn complete(&self, outcome: Result<TransactionId, CoreError>) -> bool {
        let mut slot = self.slot.lock();
        if slot.completed {
            return false;
        }
        slot.completed = true;
        slot.outcome = Some(outcome);
        self.completed.notify_all();
        true
    }

    /// Wakes a waiter with [`WaitOutcome::Interrupted`], unless an outcome
    /// is already available.
    pub fn interrupt(&self) {
        let mut slot = self.slot.lock();
        slot.interrupted = true;
        self.completed.notify_all();
    }

    /// Returns true once the applier has completed the entry.
    pub fn is_completed(&self) -> bool {
        self.slot.lock().completed
    }

    /// Blocks until the entry is completed, interrupted or `timeout`
    /// elapses.
    pub fn wait_until_committed(&self, timeout: Duration) -> WaitOutcome {
        // A timeout too large to represent waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        let mut timed_out = false;

        loop {
            if let Some(outcome) = slot.outcome.take() {
                slot.interrupted = false;
                return match outcome {
                    Ok(tx_id) => WaitOutcome::Committed(tx_id),
                    Err(error) => WaitOutcome::Failed(error),
                };
            }
            if std::mem::take(&mut slot.interrupted) {
                return WaitOutcome::Interrupted;
            }
            if timed_out {
                return WaitOutcome::TimedOut;
            }
            match deadline {
                Some(deadline) => {
                    timed_out = self.completed.wait_until(&mut slot, deadline).timed_out();
                }
                None => self.completed.wait(&mut slot),
            }
        }
    }
}

/// Registry of commit attempts waiting for their entry to be applied.
///
/// Owned by one member; only operations of its own [`GlobalSession`] are
/// ever registered or retrieved. Committer threads register and close
/// entries while the applier thread retrieves them, so the map is sharded
/// rather than behind one lock.
#[derive(Debug)]
pub struct CommittingTransactions {
    global_session: GlobalSession,
    entries: DashMap<LocalOperationId, Arc<CommittingTransaction>>,
}

impl CommittingTransactions {
    /// Creates an empty registry for `global_session`.
    pub fn new(global_session: GlobalSession) -> Self {
        Self {
            global_session,
            entries: DashMap::new(),
        }
    }

    /// Session whose operations this registry tracks.
    pub fn global_session(&self) -> &GlobalSession {
        &self.global_session
    }

    /// Inserts a pending entry, replacing any previous one for the id.
    pub fn register(&self, operation_id: LocalOperationId) -> Arc<CommittingTransaction> {
        let entry = Arc::new(CommittingTransaction::new(operation_id));
        if self
            .entries
            .insert(operation_id, Arc::clone(&entry))
            .is_some()
        {
            debug!(%operation_id, "replaced committing transaction");
        }
        entry
    }

    /// Removes and returns the entry for `operation_id`.
    pub fn retrieve(&self, operation_id: &LocalOperationId) -> Option<Arc<CommittingTransaction>> {
        self.entries.remove(operation_id).map(|(_, entry)| entry)
    }

    /// Deregisters `entry` without completing it.
    ///
    /// Only removes the map entry if it is still this exact entry; returns
    /// false if it was already retrieved or replaced.
    pub fn close(&self, entry: &Arc<CommittingTransaction>) -> bool {
        self.entries
            .remove_if(&entry.operation_id(), |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Interrupts the waiter registered for `operation_id`.
    pub fn interrupt(&self, operation_id: &LocalOperationId) -> bool {
        match self.entries.get(operation_id) {
            Some(entry) => {
                entry.interrupt();
                true
            }
            None => false,
        }
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
