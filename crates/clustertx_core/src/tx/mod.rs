//! The commit pipeline: from a locally built transaction to a committed id.

mod applier;
mod commit_process;
mod registry;
mod replicated;
mod representation;
mod state_machine;

pub use applier::TransactionApplier;
pub use commit_process::{CommitStats, ReplicatedTransactionCommitProcess};
pub use registry::{CommittingTransaction, CommittingTransactions, WaitOutcome};
pub use replicated::ReplicatedTransaction;
pub use representation::{TransactionHeader, TransactionRepresentation};
pub use state_machine::ReplicatedTransactionStateMachine;
