//! Replication layer abstraction.

use crate::error::{CoreError, CoreResult};
use crate::tx::ReplicatedTransaction;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Proposes entries to the replicated consensus log.
///
/// A successful return only means the entry was handed to the log; it
/// says nothing about whether it will ever be committed.
pub trait Replicator: Send + Sync {
    /// Proposes `tx` for replication.
    fn replicate(&self, tx: &ReplicatedTransaction) -> CoreResult<()>;
}

impl<T: Replicator + ?Sized> Replicator for Arc<T> {
    fn replicate(&self, tx: &ReplicatedTransaction) -> CoreResult<()> {
        (**self).replicate(tx)
    }
}

/// Receives committed log entries, one at a time, in log order.
pub trait CommittedEntryListener: Send {
    /// Handles the entry committed at `command_index`.
    ///
    /// An error means the listener can no longer follow the log.
    fn on_entry_committed(&mut self, frame: &[u8], command_index: u64) -> CoreResult<()>;
}

/// Handle returned by [`ReplicatedLog::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// A replicated log that can also deliver its committed entries.
pub trait ReplicatedLog: Replicator {
    /// Starts delivering committed entries to `listener`.
    fn subscribe(&self, listener: Box<dyn CommittedEntryListener>) -> ListenerId;

    /// Stops delivering to a listener. Returns false if it was unknown.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

type ReplicateHook = Box<dyn Fn(&ReplicatedTransaction) + Send + Sync>;

/// A scripted replicator for testing.
///
/// Results queued with [`MockReplicator::fail_next`] and
/// [`MockReplicator::succeed_next`] are consumed in order; once the queue
/// is empty every proposal succeeds. Successful proposals are passed to the
/// hook set with [`MockReplicator::on_replicate`].
#[derive(Default)]
pub struct MockReplicator {
    script: Mutex<VecDeque<Option<String>>>,
    proposals: Mutex<Vec<ReplicatedTransaction>>,
    hook: RwLock<Option<ReplicateHook>>,
}

impl fmt::Debug for MockReplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockReplicator")
            .field("script", &self.script.lock().len())
            .field("proposals", &self.proposals.lock().len())
            .finish_non_exhaustive()
    }
}

impl MockReplicator {
    /// Creates a replicator that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next unscripted proposal fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.script.lock().push_back(Some(message.into()));
    }

    /// Makes the next unscripted proposal succeed.
    pub fn succeed_next(&self) {
        self.script.lock().push_back(None);
    }

    /// Calls `hook` for every successful proposal.
    pub fn on_replicate<F>(&self, hook: F)
    where
        F: Fn(&ReplicatedTransaction) + Send + Sync + 'static,
    {
        *self.hook.write() = Some(Box::new(hook));
    }

    /// Every proposal seen so far, failed ones included.
    pub fn proposals(&self) -> Vec<ReplicatedTransaction> {
        self.proposals.lock().clone()
    }

    /// Number of proposals seen so far.
    pub fn proposal_count(&self) -> usize {
        self.proposals.lock().len()
    }
}

impl Replicator for MockReplicator {
    fn replicate(&self, tx: &ReplicatedTransaction) -> CoreResult<()> {
        self.proposals.lock().push(tx.clone());

        if let Some(Some(message)) = self.script.lock().pop_front() {
            return Err(CoreError::replication_failed(message));
        }

        if let Some(hook) = self.hook.read().as_ref() {
            hook(tx);
        }
        Ok(())
    }
}
