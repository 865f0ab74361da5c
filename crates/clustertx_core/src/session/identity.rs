//! Operation identity value types.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identity of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Wraps an existing UUID.
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a member id with a random UUID.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member:{}", self.0)
    }
}

/// Identity of one process's replication relationship with the cluster.
///
/// A fresh `GlobalSession` is created whenever the process (re)starts; the
/// replica ledger treats a new session id for a known owner as a restart
/// and forgets that owner's previous local sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GlobalSession {
    session_id: Uuid,
    owner: Option<MemberId>,
}

impl GlobalSession {
    /// Creates a session with an explicit id.
    #[must_use]
    pub const fn new(session_id: Uuid, owner: Option<MemberId>) -> Self {
        Self { session_id, owner }
    }

    /// Creates a session with a random id for `owner`.
    #[must_use]
    pub fn random(owner: MemberId) -> Self {
        Self::new(Uuid::new_v4(), Some(owner))
    }

    /// Returns the 128-bit session id.
    #[must_use]
    pub const fn session_id(&self) -> &Uuid {
        &self.session_id
    }

    /// Returns the owning member, if known.
    #[must_use]
    pub const fn owner(&self) -> Option<&MemberId> {
        self.owner.as_ref()
    }
}

impl fmt::Display for GlobalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "session:{}@{}", self.session_id, owner),
            None => write!(f, "session:{}@?", self.session_id),
        }
    }
}

/// Names one commit attempt within a [`GlobalSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LocalOperationId {
    local_session_id: u64,
    sequence_number: u64,
}

impl LocalOperationId {
    /// Creates an operation id.
    #[must_use]
    pub const fn new(local_session_id: u64, sequence_number: u64) -> Self {
        Self {
            local_session_id,
            sequence_number,
        }
    }

    /// Returns the local session this operation belongs to.
    #[must_use]
    pub const fn local_session_id(&self) -> u64 {
        self.local_session_id
    }

    /// Returns the position of this operation within its local session.
    #[must_use]
    pub const fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

impl fmt::Display for LocalOperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}/{}", self.local_session_id, self.sequence_number)
    }
}

/// A local session and its operation counter.
///
/// Sequence numbers start at 0 and are never handed out twice.
#[derive(Debug, PartialEq, Eq)]
pub struct LocalSession {
    local_session_id: u64,
    next_sequence_number: u64,
}

impl LocalSession {
    pub(crate) const fn new(local_session_id: u64) -> Self {
        Self {
            local_session_id,
            next_sequence_number: 0,
        }
    }

    /// Returns the local session id.
    #[must_use]
    pub const fn local_session_id(&self) -> u64 {
        self.local_session_id
    }

    pub(crate) fn next_operation_id(&mut self) -> LocalOperationId {
        let id = LocalOperationId::new(self.local_session_id, self.next_sequence_number);
        self.next_sequence_number += 1;
        id
    }
}

/// Everything a single commit attempt needs to identify itself.
///
/// Leased from a [`crate::LocalSessionPool`] and handed back when the
/// attempt reaches a terminal outcome.
#[derive(Debug)]
pub struct OperationContext {
    global_session: GlobalSession,
    local_session: LocalSession,
    operation_id: LocalOperationId,
}

impl OperationContext {
    pub(crate) const fn new(
        global_session: GlobalSession,
        local_session: LocalSession,
        operation_id: LocalOperationId,
    ) -> Self {
        Self {
            global_session,
            local_session,
            operation_id,
        }
    }

    /// Returns the global session of the committing process.
    #[must_use]
    pub const fn global_session(&self) -> &GlobalSession {
        &self.global_session
    }

    /// Returns the leased local session.
    #[must_use]
    pub const fn local_session(&self) -> &LocalSession {
        &self.local_session
    }

    /// Returns the operation id of this attempt.
    #[must_use]
    pub const fn local_operation_id(&self) -> LocalOperationId {
        self.operation_id
    }

    pub(crate) fn into_local_session(self) -> LocalSession {
        self.local_session
    }
}
