//! An in-memory local commit path.

use clustertx_core::{
    ApplicationMode, CommitEvent, CoreError, CoreResult, LocalCommitter, TransactionId,
    TransactionRepresentation,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A transaction as stored by [`InMemoryCommitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    /// Id handed back to the applier.
    pub tx_id: TransactionId,
    /// Log index it was applied at.
    pub command_index: u64,
    /// How it reached the store.
    pub mode: ApplicationMode,
    /// The committed transaction, with its command index stamped.
    pub representation: TransactionRepresentation,
}

#[derive(Debug, Default)]
struct Store {
    committed: Vec<CommittedTransaction>,
    fail_next: usize,
}

/// Local storage that outlives state machine restarts.
///
/// Clones share the same store, so a restarted member can be handed the
/// committer its previous incarnation wrote to.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommitter {
    store: Arc<Mutex<Store>>,
}

impl InMemoryCommitter {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail.
    pub fn fail_next_commits(&self, count: usize) {
        self.store.lock().fail_next = count;
    }

    /// Every committed transaction, in commit order.
    pub fn committed(&self) -> Vec<CommittedTransaction> {
        self.store.lock().committed.clone()
    }

    /// Command bytes of every committed transaction, in commit order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.store
            .lock()
            .committed
            .iter()
            .map(|tx| tx.representation.commands.clone())
            .collect()
    }

    /// Number of committed transactions.
    pub fn len(&self) -> usize {
        self.store.lock().committed.len()
    }

    /// Returns true if nothing was committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalCommitter for InMemoryCommitter {
    fn commit(
        &self,
        representation: TransactionRepresentation,
        event: &CommitEvent,
        mode: ApplicationMode,
    ) -> CoreResult<TransactionId> {
        let mut store = self.store.lock();
        if store.fail_next > 0 {
            store.fail_next -= 1;
            return Err(CoreError::local_commit_failed("injected commit failure"));
        }
        let tx_id = TransactionId::new(store.committed.len() as u64 + 1);
        store.committed.push(CommittedTransaction {
            tx_id,
            command_index: event.command_index(),
            mode,
            representation,
        });
        Ok(tx_id)
    }

    fn last_committed_command_index(&self) -> CoreResult<Option<u64>> {
        Ok(self
            .store
            .lock()
            .committed
            .last()
            .and_then(|tx| tx.representation.command_index()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustertx_core::LockSessionId;

    #[test]
    fn ids_increase_and_index_is_recovered() {
        let committer = InMemoryCommitter::new();
        assert_eq!(committer.last_committed_command_index().unwrap(), None);

        for index in [3, 7] {
            let mut tx = TransactionRepresentation::new(vec![index as u8], LockSessionId::NONE);
            tx.stamp_command_index(index);
            committer
                .commit(tx, &CommitEvent::new(index), ApplicationMode::External)
                .unwrap();
        }

        let shared = committer.clone();
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.committed()[1].tx_id, TransactionId::new(2));
        assert_eq!(shared.last_committed_command_index().unwrap(), Some(7));
    }

    #[test]
    fn injected_failure() {
        let committer = InMemoryCommitter::new();
        committer.fail_next_commits(1);
        let tx = TransactionRepresentation::new(Vec::new(), LockSessionId::NONE);

        assert!(committer
            .commit(tx.clone(), &CommitEvent::new(0), ApplicationMode::External)
            .is_err());
        assert!(committer
            .commit(tx, &CommitEvent::new(0), ApplicationMode::External)
            .is_ok());
    }
}
