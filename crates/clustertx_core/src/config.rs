//! Commit pipeline configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration of the client-side commit process.
#[derive(Debug, Clone)]
pub struct CommitConfig {
    /// How long a committer waits for its entry to be applied before
    /// proposing it again.
    pub retry_interval: Duration,

    /// Upper bound on idle local sessions kept by the pool.
    pub max_pooled_sessions: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            max_pooled_sessions: 64,
        }
    }
}

impl CommitConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the re-proposal interval.
    #[must_use]
    pub const fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the maximum number of idle pooled sessions.
    #[must_use]
    pub const fn max_pooled_sessions(mut self, max: usize) -> Self {
        self.max_pooled_sessions = max;
        self
    }
}

/// Where and how the durable session ledger is stored.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Directory holding the slot files and the LOCK file.
    pub dir: PathBuf,

    /// Base name of the slot files; slots are `<base>.a` and `<base>.b`.
    pub base_name: String,

    /// Whether each slot write is fsynced before the active slot flips.
    pub sync_writes: bool,
}

impl LedgerConfig {
    /// Creates a ledger configuration rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            base_name: "session-tracker".to_string(),
            sync_writes: true,
        }
    }

    /// Sets the slot file base name.
    #[must_use]
    pub fn base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = name.into();
        self
    }

    /// Sets whether slot writes are fsynced.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Paths of the two slot files.
    #[must_use]
    pub fn slot_paths(&self) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{}.a", self.base_name)),
            self.dir.join(format!("{}.b", self.base_name)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_commit_config() {
        let config = CommitConfig::default();
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.max_pooled_sessions, 64);
    }

    #[test]
    fn builder_pattern() {
        let config = CommitConfig::new()
            .retry_interval(Duration::from_millis(50))
            .max_pooled_sessions(2);

        assert_eq!(config.retry_interval, Duration::from_millis(50));
        assert_eq!(config.max_pooled_sessions, 2);
    }

    #[test]
    fn ledger_slot_paths() {
        let config = LedgerConfig::new("/var/lib/ledger").base_name("tracker");
        let [a, b] = config.slot_paths();
        assert_eq!(a, Path::new("/var/lib/ledger/tracker.a"));
        assert_eq!(b, Path::new("/var/lib/ledger/tracker.b"));
        assert!(config.sync_writes);
    }
}
