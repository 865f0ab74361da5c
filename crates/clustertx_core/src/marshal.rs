//! Binary encodings of replicated frames and ledger slots.
//!
//! # Replicated frame
//!
//! ```text
//! ┌──────────┬─────────────┬────────────────────┬───────────┬─────────┬─────────┬─────────┐
//! │ type (1) │ session(16) │ owner (1 or 1+16)  │ local (8) │ seq (8) │ len (4) │ payload │
//! └──────────┴─────────────┴────────────────────┴───────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! # Ledger slot
//!
//! ```text
//! ┌───────────┬─────────────┬────────────────┬──────────┬──────┬─────────┐
//! │ magic (4) │ version (2) │ generation (8) │ len (4)  │ body │ crc (4) │
//! └───────────┴─────────────┴────────────────┴──────────┴──────┴─────────┘
//! ```
//!
//! All integers are big-endian. The CRC32 covers every byte before it.

use crate::error::{CoreError, CoreResult};
use crate::session::{
    GlobalSession, GlobalSessionTrackerState, LocalOperationId, LocalSessionRecord, MemberId,
    OwnerSessions,
};
use crate::tx::ReplicatedTransaction;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Content type tag of a replicated transaction frame.
pub const TRANSACTION_CONTENT: u8 = 0x01;

/// Magic bytes of a ledger slot.
pub const SLOT_MAGIC: [u8; 4] = *b"CTSL";

/// Current ledger slot format version.
pub const SLOT_VERSION: u16 = 1;

/// Magic + version + generation + body length.
const SLOT_HEADER_LEN: usize = 4 + 2 + 8 + 4;
const SLOT_CRC_LEN: usize = 4;

/// Encodes a replicated transaction into a frame.
pub fn encode_transaction(tx: &ReplicatedTransaction) -> CoreResult<Vec<u8>> {
    let payload = tx.payload();
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::codec(format!("payload too large: {} bytes", payload.len())))?;

    let mut buf = BytesMut::with_capacity(1 + 33 + 16 + 4 + payload.len());
    buf.put_u8(TRANSACTION_CONTENT);
    put_global_session(&mut buf, tx.global_session());
    put_operation_id(&mut buf, tx.operation_id());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

/// Decodes a frame produced by [`encode_transaction`].
///
/// # Errors
///
/// Returns [`CoreError::Codec`] for unknown content types, truncated frames
/// and trailing bytes.
pub fn decode_transaction(frame: &[u8]) -> CoreResult<ReplicatedTransaction> {
    let mut buf = frame;
    let content_type = get_u8(&mut buf, "content type")?;
    if content_type != TRANSACTION_CONTENT {
        return Err(CoreError::codec(format!(
            "unknown content type 0x{content_type:02x}"
        )));
    }

    let global_session = get_global_session(&mut buf)?;
    let operation_id = get_operation_id(&mut buf)?;
    let len = get_u32(&mut buf, "payload length")? as usize;
    if buf.remaining() < len {
        return Err(CoreError::codec(format!(
            "truncated payload: expected {len} bytes, found {}",
            buf.remaining()
        )));
    }
    let payload = buf[..len].to_vec();
    buf.advance(len);
    ensure_consumed(buf, "frame")?;

    Ok(ReplicatedTransaction::new(
        payload,
        global_session,
        operation_id,
    ))
}

/// Encodes a full ledger image into a slot.
pub fn encode_slot(generation: u64, state: &GlobalSessionTrackerState) -> CoreResult<Vec<u8>> {
    let body = encode_tracker_state(state)?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| CoreError::codec(format!("ledger image too large: {} bytes", body.len())))?;

    let mut buf = BytesMut::with_capacity(SLOT_HEADER_LEN + body.len() + SLOT_CRC_LEN);
    buf.put_slice(&SLOT_MAGIC);
    buf.put_u16(SLOT_VERSION);
    buf.put_u64(generation);
    buf.put_u32(body_len);
    buf.put_slice(&body);
    let crc = crc32fast::hash(&buf);
    buf.put_u32(crc);
    Ok(buf.to_vec())
}

/// Decodes a slot, returning its generation and ledger image.
///
/// # Errors
///
/// Returns [`CoreError::ChecksumMismatch`] for torn or corrupted slots and
/// [`CoreError::Codec`] for anything structurally wrong.
pub fn decode_slot(data: &[u8]) -> CoreResult<(u64, GlobalSessionTrackerState)> {
    if data.len() < SLOT_HEADER_LEN + SLOT_CRC_LEN {
        return Err(CoreError::codec(format!(
            "slot too short: {} bytes",
            data.len()
        )));
    }

    let mut buf = data;
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != SLOT_MAGIC {
        return Err(CoreError::codec("bad slot magic"));
    }
    let version = buf.get_u16();
    if version != SLOT_VERSION {
        return Err(CoreError::codec(format!(
            "unsupported slot version {version}"
        )));
    }
    let generation = buf.get_u64();
    let body_len = buf.get_u32() as usize;

    let crc_start = SLOT_HEADER_LEN + body_len;
    if data.len() != crc_start + SLOT_CRC_LEN {
        return Err(CoreError::codec(format!(
            "slot length {} does not match body length {body_len}",
            data.len()
        )));
    }

    let mut stored = &data[crc_start..];
    let expected = stored.get_u32();
    let actual = crc32fast::hash(&data[..crc_start]);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }

    let state = decode_tracker_state(&data[SLOT_HEADER_LEN..crc_start])?;
    Ok((generation, state))
}

fn encode_tracker_state(state: &GlobalSessionTrackerState) -> CoreResult<Vec<u8>> {
    let mut buf = BytesMut::new();
    match state.last_applied_index() {
        Some(index) => {
            buf.put_u8(1);
            buf.put_u64(index);
        }
        None => buf.put_u8(0),
    }

    let owners: Vec<&OwnerSessions> = state.owners().collect();
    buf.put_u32(count(owners.len(), "owners")?);
    for owner in owners {
        put_global_session(&mut buf, owner.global_session());
        buf.put_u32(count(owner.local_sessions().len(), "local sessions")?);
        for (local_session_id, record) in owner.local_sessions() {
            buf.put_u64(*local_session_id);
            buf.put_u64(record.last_sequence_number);
            buf.put_u64(record.accepted_at);
        }
    }
    Ok(buf.to_vec())
}

fn decode_tracker_state(body: &[u8]) -> CoreResult<GlobalSessionTrackerState> {
    let mut buf = body;
    let last_applied_index = match get_u8(&mut buf, "index flag")? {
        0 => None,
        1 => Some(get_u64(&mut buf, "last applied index")?),
        other => return Err(CoreError::codec(format!("bad index flag {other}"))),
    };

    let owner_count = get_u32(&mut buf, "owner count")?;
    let mut owners = BTreeMap::new();
    for _ in 0..owner_count {
        let global_session = get_global_session(&mut buf)?;
        let local_count = get_u32(&mut buf, "local session count")?;
        let mut local_sessions = BTreeMap::new();
        for _ in 0..local_count {
            let local_session_id = get_u64(&mut buf, "local session id")?;
            let record = LocalSessionRecord {
                last_sequence_number: get_u64(&mut buf, "sequence number")?,
                accepted_at: get_u64(&mut buf, "accepted index")?,
            };
            local_sessions.insert(local_session_id, record);
        }
        let key = global_session.owner().copied();
        if owners
            .insert(key, OwnerSessions::from_parts(global_session, local_sessions))
            .is_some()
        {
            return Err(CoreError::codec("duplicate owner in ledger image"));
        }
    }
    ensure_consumed(buf, "ledger image")?;

    Ok(GlobalSessionTrackerState::from_parts(
        owners,
        last_applied_index,
    ))
}

fn put_global_session(buf: &mut impl BufMut, session: &GlobalSession) {
    put_uuid(buf, session.session_id());
    match session.owner() {
        Some(owner) => {
            buf.put_u8(1);
            put_uuid(buf, owner.as_uuid());
        }
        None => buf.put_u8(0),
    }
}

fn get_global_session(buf: &mut &[u8]) -> CoreResult<GlobalSession> {
    let session_id = get_uuid(buf, "session id")?;
    let owner = match get_u8(buf, "owner flag")? {
        0 => None,
        1 => Some(MemberId::new(get_uuid(buf, "owner id")?)),
        other => return Err(CoreError::codec(format!("bad owner flag {other}"))),
    };
    Ok(GlobalSession::new(session_id, owner))
}

fn put_operation_id(buf: &mut impl BufMut, id: &LocalOperationId) {
    buf.put_u64(id.local_session_id());
    buf.put_u64(id.sequence_number());
}

fn get_operation_id(buf: &mut &[u8]) -> CoreResult<LocalOperationId> {
    let local_session_id = get_u64(buf, "local session id")?;
    let sequence_number = get_u64(buf, "sequence number")?;
    Ok(LocalOperationId::new(local_session_id, sequence_number))
}

fn put_uuid(buf: &mut impl BufMut, id: &Uuid) {
    let bits = id.as_u128();
    buf.put_u64((bits >> 64) as u64);
    buf.put_u64(bits as u64);
}

fn get_uuid(buf: &mut &[u8], what: &str) -> CoreResult<Uuid> {
    let msb = get_u64(buf, what)?;
    let lsb = get_u64(buf, what)?;
    Ok(Uuid::from_u128((u128::from(msb) << 64) | u128::from(lsb)))
}

fn get_u8(buf: &mut &[u8], what: &str) -> CoreResult<u8> {
    need(buf, 1, what)?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8], what: &str) -> CoreResult<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut &[u8], what: &str) -> CoreResult<u64> {
    need(buf, 8, what)?;
    Ok(buf.get_u64())
}

fn need(buf: &[u8], len: usize, what: &str) -> CoreResult<()> {
    if buf.remaining() < len {
        return Err(CoreError::codec(format!(
            "truncated {what}: need {len} bytes, found {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn ensure_consumed(buf: &[u8], what: &str) -> CoreResult<()> {
    if buf.has_remaining() {
        return Err(CoreError::codec(format!(
            "{} trailing bytes after {what}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn count(len: usize, what: &str) -> CoreResult<u32> {
    u32::try_from(len).map_err(|_| CoreError::codec(format!("too many {what}: {len}")))
}
