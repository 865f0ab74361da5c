//! Test fixtures.

use clustertx_core::{CommitConfig, LedgerConfig, LockSessionId, TransactionRepresentation};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Commit configuration with a short retry interval, so tests that lose
/// proposals re-propose quickly.
pub fn fast_config() -> CommitConfig {
    CommitConfig::new().retry_interval(Duration::from_millis(50))
}

/// Commit configuration for tests that lose nothing: the retry interval
/// is long enough that no proposal is ever repeated.
pub fn steady_config() -> CommitConfig {
    CommitConfig::new().retry_interval(Duration::from_secs(30))
}

/// A transaction whose commands are `label`, prepared without a lock
/// session.
pub fn transaction(label: &str) -> TransactionRepresentation {
    TransactionRepresentation::new(label.as_bytes().to_vec(), LockSessionId::NONE)
}

/// A transaction prepared under `token`.
pub fn transaction_under(label: &str, token: LockSessionId) -> TransactionRepresentation {
    TransactionRepresentation::new(label.as_bytes().to_vec(), token)
}

/// A temporary directory holding one ledger per member.
pub struct TestLedgerDir {
    dir: TempDir,
}

impl TestLedgerDir {
    /// Creates a fresh temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Ledger directory of member `index`.
    pub fn member_dir(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("member-{index}"))
    }

    /// Ledger configuration of member `index`.
    pub fn member_config(&self, index: usize) -> LedgerConfig {
        LedgerConfig::new(self.member_dir(index))
    }
}

impl Default for TestLedgerDir {
    fn default() -> Self {
        Self::new()
    }
}
