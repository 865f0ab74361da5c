//! CLI command implementations.

pub mod inspect;
pub mod verify;

use clustertx_core::{LedgerConfig, LedgerStore};
use tracing::debug;

/// Opens an existing ledger directory without locking or creating files.
fn open_existing(config: &LedgerConfig) -> Result<LedgerStore, Box<dyn std::error::Error>> {
    if !config.dir.is_dir() {
        return Err(format!("No ledger directory at {:?}", config.dir).into());
    }
    debug!(dir = ?config.dir, base_name = %config.base_name, "opening ledger");
    Ok(LedgerStore::open_read_only(config)?)
}
