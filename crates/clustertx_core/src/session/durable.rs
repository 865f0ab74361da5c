//! Double-buffered persistence of the session ledger.
//!
//! The ledger lives in two slot files, `<base>.a` and `<base>.b`. Every
//! write serializes the whole state into the slot that is *not* active,
//! syncs it and only then flips the active pointer, so a crash mid-write
//! leaves the previous image intact. Recovery picks the valid slot with the
//! highest generation.

use crate::config::LedgerConfig;
use crate::error::{CoreError, CoreResult};
use crate::marshal;
use crate::session::GlobalSessionTrackerState;
use clustertx_storage::{FileBackend, InMemoryBackend, StorageBackend};
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";

/// What a single slot currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// Never written.
    Empty,
    /// A complete image.
    Valid {
        /// Write generation of the image.
        generation: u64,
        /// Last log index recorded in the image.
        last_applied_index: Option<u64>,
        /// Number of owners tracked.
        owners: usize,
    },
    /// Torn or corrupted.
    Invalid {
        /// Why the slot could not be decoded.
        reason: String,
    },
}

impl SlotStatus {
    /// Returns true for [`SlotStatus::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Two-slot store of [`GlobalSessionTrackerState`] images.
pub struct LedgerStore {
    slots: [Box<dyn StorageBackend>; 2],
    active: Option<usize>,
    generation: u64,
    sync_writes: bool,
    read_only: bool,
    _lock_file: Option<File>,
}

impl fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerStore")
            .field("active", &self.active)
            .field("generation", &self.generation)
            .field("sync_writes", &self.sync_writes)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Opens the file-backed store described by `config`.
    ///
    /// Creates the directory if missing and takes an exclusive advisory
    /// lock on its `LOCK` file for the lifetime of the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LedgerLocked`] if another process holds the
    /// lock.
    pub fn open(config: &LedgerConfig) -> CoreResult<Self> {
        fs::create_dir_all(&config.dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LedgerLocked);
        }

        let [a, b] = config.slot_paths();
        let mut store = Self::with_backends(
            Box::new(FileBackend::open(&a)?),
            Box::new(FileBackend::open(&b)?),
            config.sync_writes,
        );
        store._lock_file = Some(lock_file);
        Ok(store)
    }

    /// Opens an existing ledger directory for inspection.
    ///
    /// Creates nothing and takes no lock, so a ledger in use by a running
    /// member can be read. A missing slot file reads as empty. The store
    /// rejects [`LedgerStore::persist`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory does not exist.
    pub fn open_read_only(config: &LedgerConfig) -> CoreResult<Self> {
        if !config.dir.is_dir() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no ledger directory at {}", config.dir.display()),
            )));
        }

        let [a, b] = config.slot_paths();
        let mut store = Self::with_backends(
            Self::read_only_slot(&a)?,
            Self::read_only_slot(&b)?,
            false,
        );
        store.read_only = true;
        Ok(store)
    }

    fn read_only_slot(path: &Path) -> CoreResult<Box<dyn StorageBackend>> {
        if path.exists() {
            Ok(Box::new(FileBackend::open_read_only(path)?))
        } else {
            Ok(Box::new(InMemoryBackend::new()))
        }
    }

    /// Creates a store over two arbitrary backends.
    pub fn with_backends(
        a: Box<dyn StorageBackend>,
        b: Box<dyn StorageBackend>,
        sync_writes: bool,
    ) -> Self {
        Self {
            slots: [a, b],
            active: None,
            generation: 0,
            sync_writes,
            read_only: false,
            _lock_file: None,
        }
    }

    /// Reads the newest valid image and makes its slot active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LedgerCorruption`] if neither slot holds a
    /// valid image but at least one is non-empty.
    pub fn recover(&mut self) -> CoreResult<GlobalSessionTrackerState> {
        let mut best: Option<(usize, u64, GlobalSessionTrackerState)> = None;
        let mut failures = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            let data = slot.read_all()?;
            if data.is_empty() {
                continue;
            }
            match marshal::decode_slot(&data) {
                Ok((generation, state)) => {
                    if best.as_ref().map_or(true, |(_, g, _)| generation > *g) {
                        best = Some((index, generation, state));
                    }
                }
                Err(err) => failures.push((index, err)),
            }
        }

        match best {
            Some((index, generation, state)) => {
                for (slot, err) in &failures {
                    warn!(slot, error = %err, "ignoring invalid ledger slot");
                }
                debug!(
                    slot = index,
                    generation,
                    last_applied_index = ?state.last_applied_index(),
                    "recovered session ledger"
                );
                self.active = Some(index);
                self.generation = generation;
                Ok(state)
            }
            None if failures.is_empty() => {
                self.active = None;
                self.generation = 0;
                Ok(GlobalSessionTrackerState::new())
            }
            None => {
                let reasons: Vec<String> = failures
                    .iter()
                    .map(|(slot, err)| format!("slot {slot}: {err}"))
                    .collect();
                Err(CoreError::ledger_corruption(format!(
                    "no valid ledger image ({})",
                    reasons.join("; ")
                )))
            }
        }
    }

    /// Writes `state` to the inactive slot and flips the active pointer.
    pub fn persist(&mut self, state: &GlobalSessionTrackerState) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::invalid_operation("ledger opened read-only"));
        }
        let target = self.active.map_or(0, |active| 1 - active);
        let generation = self.generation + 1;
        let image = marshal::encode_slot(generation, state)?;

        let slot = &mut self.slots[target];
        slot.truncate(0)?;
        slot.append(&image)?;
        slot.flush()?;
        if self.sync_writes {
            slot.sync()?;
        }

        self.active = Some(target);
        self.generation = generation;
        Ok(())
    }

    /// Reports the status of both slots without changing the store.
    pub fn inspect(&self) -> CoreResult<[SlotStatus; 2]> {
        Ok([
            Self::slot_status(self.slots[0].as_ref())?,
            Self::slot_status(self.slots[1].as_ref())?,
        ])
    }

    fn slot_status(slot: &dyn StorageBackend) -> CoreResult<SlotStatus> {
        let data = slot.read_all()?;
        if data.is_empty() {
            return Ok(SlotStatus::Empty);
        }
        Ok(match marshal::decode_slot(&data) {
            Ok((generation, state)) => SlotStatus::Valid {
                generation,
                last_applied_index: state.last_applied_index(),
                owners: state.owners().count(),
            },
            Err(err) => SlotStatus::Invalid {
                reason: err.to_string(),
            },
        })
    }

    /// Index of the active slot, if any image has been written or recovered.
    pub fn active_slot(&self) -> Option<usize> {
        self.active
    }

    /// Generation of the active image.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
