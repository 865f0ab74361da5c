//! # clustertx core
//!
//! Exactly-once commit of locally built transactions through a replicated
//! consensus log.
//!
//! This crate provides:
//! - Operation identity: [`GlobalSession`], [`LocalOperationId`]
//! - The [`LocalSessionPool`] handing out gapless operation ids
//! - The [`CommittingTransactions`] registry of in-flight commit waiters
//! - The [`SessionTracker`] dedup/fencing ledger and its double-buffered
//!   [`LedgerStore`]
//! - The client-side [`ReplicatedTransactionCommitProcess`]
//! - The single-threaded [`ReplicatedTransactionStateMachine`] and the
//!   [`TransactionApplier`] that feeds it from the replicated log
//! - The wire/log encoding in [`marshal`]
//!
//! ## Flow
//!
//! ```text
//! commit process ── register ──► registry
//!       │                           ▲
//!       └─ replicate ─► log ─► applier ─► ledger ─► local commit ─┘
//! ```
//!
//! The consensus log, the local storage commit path and the lock-token
//! state machine are external; they plug in through [`Replicator`],
//! [`LocalCommitter`] and [`LockTokenSource`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod local;
pub mod marshal;
mod replication;
mod session;
mod tx;
mod types;

pub use config::{CommitConfig, LedgerConfig};
pub use error::{CoreError, CoreResult};
pub use local::{ApplicationMode, CommitEvent, FixedLockTokens, LocalCommitter, LockTokenSource};
pub use replication::{
    CommittedEntryListener, ListenerId, MockReplicator, ReplicatedLog, Replicator,
};
pub use session::{
    GlobalSession, GlobalSessionTrackerState, LedgerStore, LocalOperationId, LocalSession,
    LocalSessionPool, LocalSessionRecord, MemberId, OperationContext, OwnerSessions,
    SessionTracker, SlotStatus,
};
pub use tx::{
    CommitStats, CommittingTransaction, CommittingTransactions, ReplicatedTransaction,
    ReplicatedTransactionCommitProcess, ReplicatedTransactionStateMachine, TransactionApplier,
    TransactionHeader, TransactionRepresentation, WaitOutcome,
};
pub use types::{LockSessionId, TransactionId};
