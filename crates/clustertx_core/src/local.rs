//! Seams to the local storage commit path and the lock-token state machine.

use crate::error::CoreResult;
use crate::tx::TransactionRepresentation;
use crate::types::{LockSessionId, TransactionId};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// How a transaction reaches local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationMode {
    /// Applied from the replicated log during normal operation.
    External,
    /// Produced and applied by this instance itself.
    Internal,
    /// Re-applied while recovering local storage.
    Recovery,
}

/// Commit metadata handed to the local commit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEvent {
    command_index: u64,
}

impl CommitEvent {
    /// Creates an event for the log entry at `command_index`.
    pub const fn new(command_index: u64) -> Self {
        Self { command_index }
    }

    /// Log index of the entry being committed.
    pub const fn command_index(&self) -> u64 {
        self.command_index
    }
}

/// The local storage commit path.
///
/// Implementations must remember the command index of the last committed
/// transaction so replay can resume after it.
pub trait LocalCommitter: Send + Sync {
    /// Commits `tx` to local storage.
    fn commit(
        &self,
        tx: TransactionRepresentation,
        event: &CommitEvent,
        mode: ApplicationMode,
    ) -> CoreResult<TransactionId>;

    /// Command index of the last transaction committed locally.
    fn last_committed_command_index(&self) -> CoreResult<Option<u64>>;
}

impl<T: LocalCommitter + ?Sized> LocalCommitter for Arc<T> {
    fn commit(
        &self,
        tx: TransactionRepresentation,
        event: &CommitEvent,
        mode: ApplicationMode,
    ) -> CoreResult<TransactionId> {
        (**self).commit(tx, event, mode)
    }

    fn last_committed_command_index(&self) -> CoreResult<Option<u64>> {
        (**self).last_committed_command_index()
    }
}

/// Source of the currently valid lock session token.
pub trait LockTokenSource: Send + Sync {
    /// The token a transaction must carry to be applied.
    fn current_token(&self) -> LockSessionId;
}

impl<T: LockTokenSource + ?Sized> LockTokenSource for Arc<T> {
    fn current_token(&self) -> LockSessionId {
        (**self).current_token()
    }
}

/// A settable lock token, for tests and single-node setups.
#[derive(Debug)]
pub struct FixedLockTokens {
    token: AtomicI64,
}

impl FixedLockTokens {
    /// Creates a source currently handing out `token`.
    pub fn new(token: LockSessionId) -> Self {
        Self {
            token: AtomicI64::new(token.as_i64()),
        }
    }

    /// Replaces the current token.
    pub fn set(&self, token: LockSessionId) {
        self.token.store(token.as_i64(), Ordering::SeqCst);
    }
}

impl Default for FixedLockTokens {
    fn default() -> Self {
        Self::new(LockSessionId::NONE)
    }
}

impl LockTokenSource for FixedLockTokens {
    fn current_token(&self) -> LockSessionId {
        LockSessionId::new(self.token.load(Ordering::SeqCst))
    }
}
