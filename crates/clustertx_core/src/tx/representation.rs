//! The locally built transaction carried inside a replicated entry.

use crate::error::{CoreError, CoreResult};
use crate::types::LockSessionId;
use serde::{Deserialize, Serialize};

/// Metadata captured when a transaction was prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// Lock session the transaction was prepared under.
    pub lock_session_id: LockSessionId,
    /// Start time in milliseconds since the epoch.
    pub time_started: u64,
    /// Commit time in milliseconds since the epoch.
    pub time_committed: u64,
    /// Last committed transaction id visible when it started.
    pub latest_committed_tx_when_started: u64,
    /// Opaque extra header; holds the command index once applied.
    pub additional_header: Vec<u8>,
}

impl TransactionHeader {
    /// Log index stamped into the additional header, if any.
    pub fn command_index(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.additional_header.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

/// A transaction ready to be committed to local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRepresentation {
    /// Commit metadata.
    pub header: TransactionHeader,
    /// Storage commands, opaque to the pipeline.
    pub commands: Vec<u8>,
}

impl TransactionRepresentation {
    /// Creates a representation with zeroed timestamps.
    pub fn new(commands: Vec<u8>, lock_session_id: LockSessionId) -> Self {
        Self {
            header: TransactionHeader {
                lock_session_id,
                time_started: 0,
                time_committed: 0,
                latest_committed_tx_when_started: 0,
                additional_header: Vec::new(),
            },
            commands,
        }
    }

    /// Lock session the transaction was prepared under.
    pub fn lock_session_id(&self) -> LockSessionId {
        self.header.lock_session_id
    }

    /// Records the log index this transaction was applied at.
    pub fn stamp_command_index(&mut self, command_index: u64) {
        self.header.additional_header = command_index.to_be_bytes().to_vec();
    }

    /// Log index stamped by [`Self::stamp_command_index`], if any.
    pub fn command_index(&self) -> Option<u64> {
        self.header.command_index()
    }

    /// Serializes to CBOR.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::codec(format!("failed to encode transaction: {e}")))?;
        Ok(buf)
    }

    /// Deserializes from CBOR.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| CoreError::codec(format!("failed to decode transaction: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_roundtrip() {
        let mut tx = TransactionRepresentation::new(b"SET a=1".to_vec(), LockSessionId::new(7));
        tx.header.time_started = 1_700_000_000_000;
        let decoded = TransactionRepresentation::decode(&tx.encode().unwrap()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn command_index_stamp() {
        let mut tx = TransactionRepresentation::new(Vec::new(), LockSessionId::NONE);
        assert_eq!(tx.command_index(), None);

        tx.stamp_command_index(42);
        assert_eq!(tx.command_index(), Some(42));
        assert_eq!(tx.header.additional_header.len(), 8);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(matches!(
            TransactionRepresentation::decode(&[0xff, 0x00, 0x13]),
            Err(CoreError::Codec { .. })
        ));
    }
}
