//! Bridge from the replicated log to the state machine and the registry.

use crate::error::CoreResult;
use crate::local::{LocalCommitter, LockTokenSource};
use crate::marshal;
use crate::replication::CommittedEntryListener;
use crate::tx::{CommittingTransactions, ReplicatedTransactionStateMachine};
use std::sync::Arc;

/// Log listener that applies committed entries and wakes local waiters.
///
/// Entries proposed by other members are applied the same way; only the
/// waiters of this member's own global session are looked up.
#[derive(Debug)]
pub struct TransactionApplier<C, L> {
    state_machine: ReplicatedTransactionStateMachine<C, L>,
    registry: Arc<CommittingTransactions>,
}

impl<C: LocalCommitter, L: LockTokenSource> TransactionApplier<C, L> {
    /// Creates an applier completing waiters in `registry`.
    pub fn new(
        state_machine: ReplicatedTransactionStateMachine<C, L>,
        registry: Arc<CommittingTransactions>,
    ) -> Self {
        Self {
            state_machine,
            registry,
        }
    }

    /// Recovers the state machine before the first entry is delivered.
    pub fn recover(&mut self) -> CoreResult<()> {
        self.state_machine.recover()
    }

    /// The wrapped state machine.
    pub fn state_machine(&self) -> &ReplicatedTransactionStateMachine<C, L> {
        &self.state_machine
    }

    /// The registry waiters are completed in.
    pub fn registry(&self) -> &Arc<CommittingTransactions> {
        &self.registry
    }
}

impl<C: LocalCommitter, L: LockTokenSource> CommittedEntryListener for TransactionApplier<C, L> {
    fn on_entry_committed(&mut self, frame: &[u8], command_index: u64) -> CoreResult<()> {
        let tx = match marshal::decode_transaction(frame) {
            Ok(tx) => tx,
            Err(err) => return Err(self.state_machine.halt(command_index, err.to_string())),
        };

        let registry = &self.registry;
        let local = tx.global_session() == registry.global_session();
        self.state_machine
            .apply_command(&tx, command_index, |result| {
                if !local {
                    return;
                }
                let Some(entry) = registry.retrieve(tx.operation_id()) else {
                    return;
                };
                match result {
                    Ok(tx_id) => entry.notify_successfully_committed(tx_id),
                    Err(err) => entry.notify_commit_failed(err),
                };
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::local::{ApplicationMode, CommitEvent, FixedLockTokens};
    use crate::session::{GlobalSession, LocalOperationId, MemberId, SessionTracker};
    use crate::tx::{ReplicatedTransaction, TransactionRepresentation, WaitOutcome};
    use crate::types::{LockSessionId, TransactionId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingCommitter {
        next: AtomicU64,
    }

    impl LocalCommitter for CountingCommitter {
        fn commit(
            &self,
            _tx: TransactionRepresentation,
            _event: &CommitEvent,
            _mode: ApplicationMode,
        ) -> CoreResult<TransactionId> {
            Ok(TransactionId::new(self.next.fetch_add(1, Ordering::SeqCst) + 1))
        }

        fn last_committed_command_index(&self) -> CoreResult<Option<u64>> {
            Ok(None)
        }
    }

    fn applier(session: GlobalSession) -> TransactionApplier<CountingCommitter, FixedLockTokens> {
        let machine = ReplicatedTransactionStateMachine::new(
            CountingCommitter::default(),
            FixedLockTokens::default(),
            SessionTracker::in_memory(),
        );
        TransactionApplier::new(machine, Arc::new(CommittingTransactions::new(session)))
    }

    fn frame(session: &GlobalSession, op: LocalOperationId) -> Vec<u8> {
        let tx = TransactionRepresentation::new(b"w".to_vec(), LockSessionId::NONE);
        marshal::encode_transaction(&ReplicatedTransaction::new(
            tx.encode().unwrap(),
            session.clone(),
            op,
        ))
        .unwrap()
    }

    #[test]
    fn completes_local_waiter() {
        let session = GlobalSession::random(MemberId::random());
        let mut applier = applier(session.clone());
        let op = LocalOperationId::new(0, 0);
        let entry = applier.registry().register(op);

        applier.on_entry_committed(&frame(&session, op), 0).unwrap();

        assert!(matches!(
            entry.wait_until_committed(Duration::ZERO),
            WaitOutcome::Committed(TransactionId(1))
        ));
        assert!(applier.registry().is_empty());
    }

    #[test]
    fn foreign_entries_leave_registry_alone() {
        let own = GlobalSession::random(MemberId::random());
        let foreign = GlobalSession::random(MemberId::random());
        let mut applier = applier(own);
        let op = LocalOperationId::new(0, 0);
        let entry = applier.registry().register(op);

        applier.on_entry_committed(&frame(&foreign, op), 0).unwrap();

        assert!(!entry.is_completed());
        assert_eq!(applier.registry().len(), 1);
        assert_eq!(applier.state_machine().last_applied_commit_index(), Some(0));
    }

    #[test]
    fn missing_waiter_is_silent() {
        let session = GlobalSession::random(MemberId::random());
        let mut applier = applier(session.clone());

        applier
            .on_entry_committed(&frame(&session, LocalOperationId::new(0, 0)), 0)
            .unwrap();
        assert_eq!(applier.state_machine().last_applied_commit_index(), Some(0));
    }

    #[test]
    fn corrupt_frame_halts() {
        let session = GlobalSession::random(MemberId::random());
        let mut applier = applier(session.clone());

        let err = applier.on_entry_committed(&[0x09, 0x01], 5).unwrap_err();
        assert!(matches!(err, CoreError::Diverged { command_index: 5, .. }));
        assert!(applier.state_machine().is_halted());

        let valid = frame(&session, LocalOperationId::new(0, 0));
        assert!(applier.on_entry_committed(&valid, 6).is_err());
    }
}
