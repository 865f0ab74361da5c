//! Inspect command implementation.

use super::open_existing;
use clustertx_core::{LedgerConfig, LedgerStore, SlotStatus};
use serde::Serialize;

/// Ledger inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Ledger directory.
    pub path: String,
    /// Slot the recovered image came from.
    pub active_slot: Option<String>,
    /// Generation of the recovered image.
    pub generation: u64,
    /// Last log index recorded.
    pub last_applied_index: Option<u64>,
    /// Per-slot status.
    pub slots: Vec<SlotReport>,
    /// Tracked owners.
    pub owners: Vec<OwnerReport>,
}

/// Status of one slot file.
#[derive(Debug, Serialize)]
pub struct SlotReport {
    /// Slot name (`a` or `b`).
    pub name: String,
    /// `empty`, `valid` or `invalid`.
    pub status: String,
    /// Generation, for valid slots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Decode failure, for invalid slots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Counters of one owner.
#[derive(Debug, Serialize)]
pub struct OwnerReport {
    /// Member id, if the session has an owner.
    pub owner: Option<String>,
    /// Global session id.
    pub session_id: String,
    /// Local session counters.
    pub local_sessions: Vec<LocalSessionReport>,
}

/// Counter of one local session.
#[derive(Debug, Serialize)]
pub struct LocalSessionReport {
    /// Local session id.
    pub local_session_id: u64,
    /// Last accepted sequence number.
    pub last_sequence_number: u64,
    /// Log index at which it was accepted.
    pub accepted_at: u64,
}

pub(crate) const SLOT_NAMES: [&str; 2] = ["a", "b"];

pub(crate) fn slot_report(name: &str, status: &SlotStatus) -> SlotReport {
    let (label, generation, reason) = match status {
        SlotStatus::Empty => ("empty", None, None),
        SlotStatus::Valid { generation, .. } => ("valid", Some(*generation), None),
        SlotStatus::Invalid { reason } => ("invalid", None, Some(reason.clone())),
    };
    SlotReport {
        name: name.to_string(),
        status: label.to_string(),
        generation,
        reason,
    }
}

/// Builds the report for an opened store.
pub fn inspect(path: &str, store: &mut LedgerStore) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let slots = store
        .inspect()?
        .iter()
        .zip(SLOT_NAMES)
        .map(|(status, name)| slot_report(name, status))
        .collect();
    let state = store.recover()?;

    let owners = state
        .owners()
        .map(|owner| OwnerReport {
            owner: owner.global_session().owner().map(ToString::to_string),
            session_id: owner.global_session().session_id().to_string(),
            local_sessions: owner
                .local_sessions()
                .iter()
                .map(|(id, record)| LocalSessionReport {
                    local_session_id: *id,
                    last_sequence_number: record.last_sequence_number,
                    accepted_at: record.accepted_at,
                })
                .collect(),
        })
        .collect();

    Ok(InspectResult {
        path: path.to_string(),
        active_slot: store.active_slot().map(|i| SLOT_NAMES[i].to_string()),
        generation: store.generation(),
        last_applied_index: state.last_applied_index(),
        slots,
        owners,
    })
}

/// Runs the inspect command.
pub fn run(config: &LedgerConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = open_existing(config)?;
    let result = inspect(&config.dir.display().to_string(), &mut store)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text(&result),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Ledger: {}", result.path);
    println!(
        "Active slot: {}",
        result.active_slot.as_deref().unwrap_or("none")
    );
    println!("Generation: {}", result.generation);
    match result.last_applied_index {
        Some(index) => println!("Last applied index: {index}"),
        None => println!("Last applied index: none"),
    }
    println!();

    for slot in &result.slots {
        match (&slot.generation, &slot.reason) {
            (Some(generation), _) => {
                println!("Slot {}: {} (generation {generation})", slot.name, slot.status)
            }
            (_, Some(reason)) => println!("Slot {}: {} ({reason})", slot.name, slot.status),
            _ => println!("Slot {}: {}", slot.name, slot.status),
        }
    }
    println!();

    println!("Owners: {}", result.owners.len());
    for owner in &result.owners {
        println!(
            "  {} session {}",
            owner.owner.as_deref().unwrap_or("<none>"),
            owner.session_id
        );
        for local in &owner.local_sessions {
            println!(
                "    local {:>4}  seq {:>8}  at index {}",
                local.local_session_id, local.last_sequence_number, local.accepted_at
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustertx_core::{
        GlobalSession, GlobalSessionTrackerState, LocalOperationId, MemberId,
    };
    use tempfile::tempdir;

    #[test]
    fn reports_recovered_state() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig::new(dir.path());
        let session = GlobalSession::random(MemberId::random());

        let mut state = GlobalSessionTrackerState::new();
        state.update(&session, &LocalOperationId::new(2, 0), 0);
        state.update(&session, &LocalOperationId::new(2, 1), 1);
        {
            let mut store = LedgerStore::open(&config).unwrap();
            store.persist(&state).unwrap();
        }

        let mut store = LedgerStore::open(&config).unwrap();
        let result = inspect("ledger", &mut store).unwrap();
        assert_eq!(result.active_slot.as_deref(), Some("a"));
        assert_eq!(result.last_applied_index, Some(1));
        assert_eq!(result.slots[0].status, "valid");
        assert_eq!(result.slots[1].status, "empty");
        assert_eq!(result.owners.len(), 1);
        assert_eq!(result.owners[0].local_sessions[0].last_sequence_number, 1);

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"local_session_id\":2"));
    }

    #[test]
    fn inspects_a_ledger_held_by_a_member() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig::new(dir.path());
        let mut member = LedgerStore::open(&config).unwrap();
        member.persist(&GlobalSessionTrackerState::new()).unwrap();

        assert!(run(&config, "json").is_ok());
        drop(member);

        let empty = tempdir().unwrap();
        assert!(run(&LedgerConfig::new(empty.path()), "text").is_ok());
        assert_eq!(std::fs::read_dir(empty.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig::new(dir.path().join("absent"));
        assert!(run(&config, "text").is_err());
    }
}
