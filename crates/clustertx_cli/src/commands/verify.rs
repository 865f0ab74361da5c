//! Verify command implementation.

use super::inspect::{slot_report, SLOT_NAMES};
use super::open_existing;
use clustertx_core::{LedgerConfig, LedgerStore, SlotStatus};

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of slots holding a valid image.
    pub valid_slots: usize,
    /// Number of torn or corrupted slots.
    pub invalid_slots: usize,
    /// Problems found.
    pub errors: Vec<String>,
    /// Whether a usable image could be recovered.
    pub recoverable: bool,
}

impl VerifyResult {
    fn is_ok(&self, strict: bool) -> bool {
        self.recoverable && (!strict || self.invalid_slots == 0)
    }
}

/// Checks both slots of an opened store.
pub fn verify(store: &mut LedgerStore) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let statuses = store.inspect()?;
    let mut result = VerifyResult {
        valid_slots: 0,
        invalid_slots: 0,
        errors: Vec::new(),
        recoverable: false,
    };

    for (status, name) in statuses.iter().zip(SLOT_NAMES) {
        match status {
            SlotStatus::Valid { .. } => result.valid_slots += 1,
            SlotStatus::Invalid { reason } => {
                result.invalid_slots += 1;
                result.errors.push(format!("slot {name}: {reason}"));
            }
            SlotStatus::Empty => {}
        }
        let report = slot_report(name, status);
        println!("Slot {}: {}", report.name, report.status);
    }

    match store.recover() {
        Ok(_) => result.recoverable = true,
        Err(err) => result.errors.push(err.to_string()),
    }
    Ok(result)
}

/// Runs the verify command.
pub fn run(config: &LedgerConfig, strict: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying ledger at {:?}", config.dir);
    println!();

    let mut store = open_existing(config)?;
    let result = verify(&mut store)?;

    for error in &result.errors {
        println!("  {error}");
    }
    println!();
    if result.is_ok(strict) {
        println!("✓ Ledger verification passed");
        Ok(())
    } else {
        println!("✗ Ledger verification failed");
        Err("Verification failed".into())
    }
}
