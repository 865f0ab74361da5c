//! Client sessions and the replica-side session ledger.
//!
//! A process commits under one [`GlobalSession`]. Each in-flight commit
//! leases a [`LocalSession`] from the [`LocalSessionPool`] and tags its
//! proposal with the next [`LocalOperationId`] of that local session.
//! Replicas run every agreed entry through the [`SessionTracker`], which
//! accepts an operation id only if it is the next one for its local
//! session, so re-proposals and redeliveries apply at most once.

mod durable;
mod identity;
mod pool;
mod tracker;

pub use durable::{LedgerStore, SlotStatus};
pub use identity::{GlobalSession, LocalOperationId, LocalSession, MemberId, OperationContext};
pub use pool::LocalSessionPool;
pub use tracker::{GlobalSessionTrackerState, LocalSessionRecord, OwnerSessions, SessionTracker};
