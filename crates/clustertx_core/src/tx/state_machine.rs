//! Deterministic application of agreed entries to local storage.

use crate::error::{CoreError, CoreResult};
use crate::local::{ApplicationMode, CommitEvent, LocalCommitter, LockTokenSource};
use crate::session::SessionTracker;
use crate::tx::ReplicatedTransaction;
use crate::types::TransactionId;
use tracing::{debug, error, info};

/// Applies replicated transactions in log order.
///
/// For every entry, in order:
///
/// 1. Entries at or below `last_applied_commit_index` were committed in an
///    earlier run; they only catch the ledger up and are otherwise skipped.
/// 2. Operations the ledger rejects (duplicates, out-of-order retries) are
///    recorded and skipped without a callback.
/// 3. Transactions prepared under a lock session other than the current
///    one are rejected with [`CoreError::LockSessionExpired`].
/// 4. Everything else is committed locally, then recorded in the ledger.
///
/// A failed local commit means this replica can no longer reproduce the
/// agreed history. The state machine halts and every later call returns
/// [`CoreError::Diverged`].
///
/// Not thread-safe by construction: it takes `&mut self` and is driven by
/// exactly one applier.
#[derive(Debug)]
pub struct ReplicatedTransactionStateMachine<C, L> {
    committer: C,
    lock_tokens: L,
    tracker: SessionTracker,
    last_applied_commit_index: Option<u64>,
    halted: Option<(u64, String)>,
}

impl<C: LocalCommitter, L: LockTokenSource> ReplicatedTransactionStateMachine<C, L> {
    /// Creates a state machine that has applied nothing yet.
    pub fn new(committer: C, lock_tokens: L, tracker: SessionTracker) -> Self {
        Self {
            committer,
            lock_tokens,
            tracker,
            last_applied_commit_index: None,
            halted: None,
        }
    }

    /// Installs the last applied index from the local commit path.
    pub fn recover(&mut self) -> CoreResult<()> {
        self.last_applied_commit_index = self.committer.last_committed_command_index()?;
        debug!(
            last_applied_commit_index = ?self.last_applied_commit_index,
            ledger_index = ?self.tracker.last_applied_index(),
            "state machine recovered"
        );
        Ok(())
    }

    /// Applies the entry committed at `command_index`.
    ///
    /// `callback` is invoked with the local transaction id or the fencing
    /// failure. It is not invoked for skipped entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Diverged`] if the entry cannot be applied, or
    /// if the state machine already halted.
    pub fn apply_command<F>(
        &mut self,
        tx: &ReplicatedTransaction,
        command_index: u64,
        callback: F,
    ) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<TransactionId>),
    {
        if let Some((index, message)) = &self.halted {
            return Err(CoreError::diverged(*index, message.clone()));
        }

        let session = tx.global_session();
        let operation_id = tx.operation_id();

        if self
            .last_applied_commit_index
            .is_some_and(|last| command_index <= last)
        {
            debug!(command_index, "entry already applied, skipping");
            self.track(tx, command_index)?;
            return Ok(());
        }

        if !self.tracker.validate_operation(session, operation_id) {
            debug!(
                command_index,
                owner = ?session.owner(),
                local_session = operation_id.local_session_id(),
                sequence = operation_id.sequence_number(),
                "operation rejected by session ledger"
            );
            self.track(tx, command_index)?;
            return Ok(());
        }

        let mut representation = match tx.decode_representation() {
            Ok(representation) => representation,
            Err(err) => return Err(self.halt(command_index, err.to_string())),
        };
        representation.stamp_command_index(command_index);

        let transaction_token = representation.lock_session_id();
        let current_token = self.lock_tokens.current_token();
        if transaction_token != current_token && !transaction_token.is_none() {
            info!(
                command_index,
                %transaction_token,
                %current_token,
                "rejecting transaction from expired lock session"
            );
            self.track(tx, command_index)?;
            callback(Err(CoreError::LockSessionExpired {
                transaction_token,
                current_token,
            }));
            return Ok(());
        }

        let tx_id = match self.committer.commit(
            representation,
            &CommitEvent::new(command_index),
            ApplicationMode::External,
        ) {
            Ok(tx_id) => tx_id,
            Err(err) => return Err(self.halt(command_index, err.to_string())),
        };
        self.last_applied_commit_index = Some(command_index);
        self.track(tx, command_index)?;

        callback(Ok(tx_id));
        Ok(())
    }

    fn track(&mut self, tx: &ReplicatedTransaction, command_index: u64) -> CoreResult<()> {
        if let Err(err) = self
            .tracker
            .update(tx.global_session(), tx.operation_id(), command_index)
        {
            return Err(self.halt(command_index, format!("ledger write failed: {err}")));
        }
        Ok(())
    }

    pub(crate) fn halt(&mut self, command_index: u64, message: String) -> CoreError {
        error!(command_index, error = %message, "failed to apply agreed entry, halting");
        let err = CoreError::diverged(command_index, message.clone());
        self.halted = Some((command_index, message));
        err
    }

    /// Index of the last entry committed locally.
    pub fn last_applied_commit_index(&self) -> Option<u64> {
        self.last_applied_commit_index
    }

    /// Returns true once an apply failure halted the state machine.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// The session ledger.
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// The local commit path.
    pub fn committer(&self) -> &C {
        &self.committer
    }
}
