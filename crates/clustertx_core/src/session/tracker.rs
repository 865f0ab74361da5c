//! Replica-side dedup and fencing ledger.

use crate::error::CoreResult;
use crate::session::durable::LedgerStore;
use crate::session::identity::{GlobalSession, LocalOperationId, MemberId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Last accepted operation of one local session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalSessionRecord {
    /// Highest accepted sequence number.
    pub last_sequence_number: u64,
    /// Command index at which it was accepted.
    pub accepted_at: u64,
}

/// Local session counters of one owner under its current global session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSessions {
    global_session: GlobalSession,
    local_sessions: BTreeMap<u64, LocalSessionRecord>,
}

impl OwnerSessions {
    fn new(global_session: GlobalSession) -> Self {
        Self {
            global_session,
            local_sessions: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        global_session: GlobalSession,
        local_sessions: BTreeMap<u64, LocalSessionRecord>,
    ) -> Self {
        Self {
            global_session,
            local_sessions,
        }
    }

    /// Returns the global session these counters belong to.
    pub fn global_session(&self) -> &GlobalSession {
        &self.global_session
    }

    /// Returns the per-local-session records, ordered by local session id.
    pub fn local_sessions(&self) -> &BTreeMap<u64, LocalSessionRecord> {
        &self.local_sessions
    }

    fn is_valid(&self, session_id: &Uuid, operation: &LocalOperationId) -> bool {
        if self.global_session.session_id() != session_id {
            return operation.sequence_number() == 0;
        }
        match self.local_sessions.get(&operation.local_session_id()) {
            Some(record) => operation.sequence_number() == record.last_sequence_number + 1,
            None => operation.sequence_number() == 0,
        }
    }

    fn track(&mut self, operation: &LocalOperationId, command_index: u64) -> bool {
        if !self.is_valid(self.global_session.session_id(), operation) {
            return false;
        }
        self.local_sessions.insert(
            operation.local_session_id(),
            LocalSessionRecord {
                last_sequence_number: operation.sequence_number(),
                accepted_at: command_index,
            },
        );
        true
    }
}

/// Mapping owner → local session → last accepted sequence number.
///
/// An operation is valid iff its sequence number is one past the last
/// accepted one for its `(owner, local session)`, or 0 when none is
/// recorded. A global session id that differs from the tracked one for the
/// same owner counts as a restart of that owner: every local session starts
/// over from 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSessionTrackerState {
    owners: BTreeMap<Option<MemberId>, OwnerSessions>,
    last_applied_index: Option<u64>,
}

impl GlobalSessionTrackerState {
    /// Creates an empty ledger state.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        owners: BTreeMap<Option<MemberId>, OwnerSessions>,
        last_applied_index: Option<u64>,
    ) -> Self {
        Self {
            owners,
            last_applied_index,
        }
    }

    /// Returns true if `operation` is the next valid one for its session.
    pub fn validate_operation(&self, session: &GlobalSession, operation: &LocalOperationId) -> bool {
        match self.owners.get(&session.owner().copied()) {
            Some(owner) => owner.is_valid(session.session_id(), operation),
            None => operation.sequence_number() == 0,
        }
    }

    /// Records an observed operation at `command_index`.
    ///
    /// Returns true if the operation was accepted and advanced its local
    /// session. Observations at or below the last applied index were
    /// already recorded and are ignored.
    pub fn update(
        &mut self,
        session: &GlobalSession,
        operation: &LocalOperationId,
        command_index: u64,
    ) -> bool {
        if self
            .last_applied_index
            .is_some_and(|last| command_index <= last)
        {
            return false;
        }
        self.last_applied_index = Some(command_index);

        let owner = self
            .owners
            .entry(session.owner().copied())
            .or_insert_with(|| OwnerSessions::new(session.clone()));

        if owner.global_session.session_id() != session.session_id() {
            debug!(
                %session,
                previous = %owner.global_session,
                "new global session for owner, resetting local sessions"
            );
            *owner = OwnerSessions::new(session.clone());
        }

        owner.track(operation, command_index)
    }

    /// Index of the last entry observed, if any.
    pub fn last_applied_index(&self) -> Option<u64> {
        self.last_applied_index
    }

    /// Tracked owners and their counters.
    pub fn owners(&self) -> impl Iterator<Item = &OwnerSessions> {
        self.owners.values()
    }

    /// Last accepted sequence number for an owner's local session.
    pub fn last_sequence_number(&self, session: &GlobalSession, local_session_id: u64) -> Option<u64> {
        self.owners
            .get(&session.owner().copied())
            .filter(|owner| owner.global_session.session_id() == session.session_id())
            .and_then(|owner| owner.local_sessions.get(&local_session_id))
            .map(|record| record.last_sequence_number)
    }
}

/// The ledger consulted by the applier, optionally backed by a
/// [`LedgerStore`].
///
/// A durable tracker writes the whole state to the store after every
/// accepted observation; rejected ones change nothing worth persisting.
#[derive(Debug)]
pub struct SessionTracker {
    state: GlobalSessionTrackerState,
    store: Option<LedgerStore>,
}

impl SessionTracker {
    /// Creates a volatile tracker.
    pub fn in_memory() -> Self {
        Self {
            state: GlobalSessionTrackerState::new(),
            store: None,
        }
    }

    /// Creates a tracker recovered from `store`.
    pub fn durable(mut store: LedgerStore) -> CoreResult<Self> {
        let state = store.recover()?;
        Ok(Self {
            state,
            store: Some(store),
        })
    }

    /// Returns true if `operation` is the next valid one for its session.
    pub fn validate_operation(&self, session: &GlobalSession, operation: &LocalOperationId) -> bool {
        self.state.validate_operation(session, operation)
    }

    /// Records an observed operation, persisting it if accepted.
    pub fn update(
        &mut self,
        session: &GlobalSession,
        operation: &LocalOperationId,
        command_index: u64,
    ) -> CoreResult<bool> {
        let accepted = self.state.update(session, operation, command_index);
        if accepted {
            if let Some(store) = self.store.as_mut() {
                store.persist(&self.state)?;
            }
        }
        Ok(accepted)
    }

    /// Index of the last entry this tracker has observed.
    pub fn last_applied_index(&self) -> Option<u64> {
        self.state.last_applied_index()
    }

    /// Returns the current state.
    pub fn state(&self) -> &GlobalSessionTrackerState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustertx_storage::InMemoryBackend;
    use proptest::prelude::*;

    fn session() -> GlobalSession {
        GlobalSession::random(MemberId::random())
    }

    /// Feeds operations at consecutive indices starting at 0.
    fn feed(state: &mut GlobalSessionTrackerState, session: &GlobalSession, ops: &[LocalOperationId]) -> Vec<bool> {
        let start = state.last_applied_index().map_or(0, |i| i + 1);
        ops.iter()
            .enumerate()
            .map(|(i, op)| state.update(session, op, start + i as u64))
            .collect()
    }

    #[test]
    fn first_operation_must_be_zero() {
        let state = GlobalSessionTrackerState::new();
        let s = session();
        assert!(state.validate_operation(&s, &LocalOperationId::new(0, 0)));
        assert!(!state.validate_operation(&s, &LocalOperationId::new(0, 1)));
    }

    #[test]
    fn out_of_order_submission_example() {
        let mut state = GlobalSessionTrackerState::new();
        let s = session();
        let ops: Vec<_> = [0, 1, 3, 2, 3]
            .into_iter()
            .map(|seq| LocalOperationId::new(0, seq))
            .collect();

        let mut verdicts = Vec::new();
        for (index, op) in ops.iter().enumerate() {
            verdicts.push(state.validate_operation(&s, op));
            state.update(&s, op, index as u64);
        }

        assert_eq!(verdicts, vec![true, true, false, true, true]);
        assert_eq!(state.last_sequence_number(&s, 0), Some(3));
    }

    #[test]
    fn duplicate_is_accepted_once() {
        let mut state = GlobalSessionTrackerState::new();
        let s = session();
        let op = LocalOperationId::new(7, 0);

        assert_eq!(feed(&mut state, &s, &[op, op]), vec![true, false]);
        let next = LocalOperationId::new(7, 1);
        assert_eq!(feed(&mut state, &s, &[next, op, next]), vec![true, false, false]);
    }

    #[test]
    fn owners_are_tracked_independently() {
        let mut state = GlobalSessionTrackerState::new();
        let a = session();
        let b = session();

        feed(&mut state, &a, &[LocalOperationId::new(0, 0), LocalOperationId::new(0, 1)]);

        assert!(state.validate_operation(&b, &LocalOperationId::new(0, 0)));
        assert!(!state.validate_operation(&b, &LocalOperationId::new(0, 2)));
        assert!(state.validate_operation(&a, &LocalOperationId::new(0, 2)));
    }

    #[test]
    fn local_sessions_are_tracked_independently() {
        let mut state = GlobalSessionTrackerState::new();
        let s = session();

        let verdicts = feed(
            &mut state,
            &s,
            &[
                LocalOperationId::new(0, 0),
                LocalOperationId::new(1, 0),
                LocalOperationId::new(0, 1),
                LocalOperationId::new(1, 1),
            ],
        );
        assert_eq!(verdicts, vec![true; 4]);
    }

    #[test]
    fn new_global_session_resets_owner() {
        let mut state = GlobalSessionTrackerState::new();
        let owner = MemberId::random();
        let old = GlobalSession::random(owner);
        let op = LocalOperationId::new(0, 0);

        assert_eq!(feed(&mut state, &old, &[op]), vec![true]);
        assert!(!state.validate_operation(&old, &op));

        let restarted = GlobalSession::random(owner);
        assert!(state.validate_operation(&restarted, &op));
        assert_eq!(feed(&mut state, &restarted, &[op]), vec![true]);
        assert!(!state.validate_operation(&restarted, &op));
        assert_eq!(state.owners().count(), 1);
    }

    #[test]
    fn stale_indices_are_ignored() {
        let mut state = GlobalSessionTrackerState::new();
        let s = session();

        assert!(state.update(&s, &LocalOperationId::new(0, 0), 5));
        assert!(!state.update(&s, &LocalOperationId::new(0, 1), 5));
        assert!(!state.update(&s, &LocalOperationId::new(0, 1), 3));
        assert_eq!(state.last_applied_index(), Some(5));
        assert!(state.update(&s, &LocalOperationId::new(0, 1), 6));
    }

    #[test]
    fn rejected_observation_still_advances_index() {
        let mut state = GlobalSessionTrackerState::new();
        let s = session();

        assert!(!state.update(&s, &LocalOperationId::new(0, 4), 0));
        assert_eq!(state.last_applied_index(), Some(0));
        assert_eq!(state.last_sequence_number(&s, 0), None);
    }

    #[test]
    fn durable_tracker_persists_only_accepted() {
        let a = InMemoryBackend::new();
        let b = InMemoryBackend::new();
        let store = LedgerStore::with_backends(Box::new(a.clone()), Box::new(b.clone()), true);
        let mut tracker = SessionTracker::durable(store).unwrap();
        let s = session();

        assert!(tracker.update(&s, &LocalOperationId::new(0, 0), 0).unwrap());
        let after_accept = (a.data(), b.data());

        assert!(!tracker.update(&s, &LocalOperationId::new(0, 0), 1).unwrap());
        assert_eq!((a.data(), b.data()), after_accept);

        let reopened = LedgerStore::with_backends(Box::new(a), Box::new(b), true);
        let recovered = SessionTracker::durable(reopened).unwrap();
        assert_eq!(recovered.state().last_sequence_number(&s, 0), Some(0));
        assert_eq!(recovered.last_applied_index(), Some(0));
    }

    proptest! {
        #[test]
        fn accepted_sequences_are_gapless(seqs in prop::collection::vec(0u64..12, 0..64)) {
            let mut state = GlobalSessionTrackerState::new();
            let s = session();
            let mut accepted = Vec::new();

            for (index, seq) in seqs.iter().enumerate() {
                if state.update(&s, &LocalOperationId::new(0, *seq), index as u64) {
                    accepted.push(*seq);
                }
            }

            let expected: Vec<u64> = (0..accepted.len() as u64).collect();
            prop_assert_eq!(accepted, expected);
        }

        #[test]
        fn each_id_accepted_at_most_once(
            seqs in prop::collection::vec(0u64..6, 0..48),
            sessions in prop::collection::vec(0u64..3, 0..48),
        ) {
            let mut state = GlobalSessionTrackerState::new();
            let s = session();
            let mut seen = std::collections::HashSet::new();

            for (index, (seq, local)) in seqs.iter().zip(sessions.iter()).enumerate() {
                let op = LocalOperationId::new(*local, *seq);
                if state.update(&s, &op, index as u64) {
                    prop_assert!(seen.insert(op));
                }
            }
        }
    }
}
