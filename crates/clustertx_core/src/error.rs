//! Error types for the commit pipeline.

use crate::types::LockSessionId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the commit pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] clustertx_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame, payload or ledger slot could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// The replication layer refused or lost a proposal.
    #[error("replication failed: {message}")]
    ReplicationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The transaction was prepared under a lock session that is no longer
    /// the installed one.
    #[error(
        "lock session expired: transaction holds {transaction_token}, current is {current_token}"
    )]
    LockSessionExpired {
        /// Lock session captured when the transaction was built.
        transaction_token: LockSessionId,
        /// Lock session installed when the transaction was applied.
        current_token: LockSessionId,
    },

    /// The local storage commit path rejected a transaction.
    #[error("local commit failed: {message}")]
    LocalCommitFailed {
        /// Description of the failure.
        message: String,
    },

    /// An already agreed entry could not be applied. This replica no longer
    /// matches its peers and must stop serving.
    #[error("replica diverged applying command {command_index}: {message}")]
    Diverged {
        /// Index of the entry that failed.
        command_index: u64,
        /// Description of the underlying failure.
        message: String,
    },

    /// Ledger files are unreadable.
    #[error("ledger corruption: {message}")]
    LedgerCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Another process holds the ledger directory.
    #[error("ledger locked: another process has exclusive access")]
    LedgerLocked,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a replication failure.
    pub fn replication_failed(message: impl Into<String>) -> Self {
        Self::ReplicationFailed {
            message: message.into(),
        }
    }

    /// Creates a local commit failure.
    pub fn local_commit_failed(message: impl Into<String>) -> Self {
        Self::LocalCommitFailed {
            message: message.into(),
        }
    }

    /// Creates a divergence error.
    pub fn diverged(command_index: u64, message: impl Into<String>) -> Self {
        Self::Diverged {
            command_index,
            message: message.into(),
        }
    }

    /// Creates a ledger corruption error.
    pub fn ledger_corruption(message: impl Into<String>) -> Self {
        Self::LedgerCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ReplicationFailed { .. })
    }

    /// Returns true if the process must stop serving after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Diverged { .. })
    }
}
