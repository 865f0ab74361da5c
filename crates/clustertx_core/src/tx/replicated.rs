//! The unit proposed to the replicated log.

use crate::error::CoreResult;
use crate::session::{GlobalSession, LocalOperationId, OperationContext};
use crate::tx::TransactionRepresentation;

/// A serialized transaction tagged with the operation that produced it.
///
/// Immutable once built; every retry of one commit proposes an equal
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedTransaction {
    payload: Vec<u8>,
    global_session: GlobalSession,
    operation_id: LocalOperationId,
}

impl ReplicatedTransaction {
    /// Creates a replicated transaction from an already encoded payload.
    pub fn new(payload: Vec<u8>, global_session: GlobalSession, operation_id: LocalOperationId) -> Self {
        Self {
            payload,
            global_session,
            operation_id,
        }
    }

    /// Tags an encoded transaction with the identity leased in `context`.
    ///
    /// Encoding happens before the lease, so a codec failure never
    /// consumes a sequence number.
    pub fn under_context(payload: Vec<u8>, context: &OperationContext) -> Self {
        Self::new(
            payload,
            context.global_session().clone(),
            context.local_operation_id(),
        )
    }

    /// Decodes the carried transaction.
    pub fn decode_representation(&self) -> CoreResult<TransactionRepresentation> {
        TransactionRepresentation::decode(&self.payload)
    }

    /// Encoded transaction bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Session of the member that proposed it.
    pub fn global_session(&self) -> &GlobalSession {
        &self.global_session
    }

    /// Operation id within that session.
    pub fn operation_id(&self) -> &LocalOperationId {
        &self.operation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LocalSessionPool, MemberId};
    use crate::types::LockSessionId;

    #[test]
    fn carries_leased_identity() {
        let pool = LocalSessionPool::new(GlobalSession::random(MemberId::random()));
        let ctx = pool.acquire_session();
        let tx = TransactionRepresentation::new(b"x".to_vec(), LockSessionId::new(1));

        let replicated = ReplicatedTransaction::under_context(tx.encode().unwrap(), &ctx);
        assert_eq!(replicated.global_session(), pool.global_session());
        assert_eq!(*replicated.operation_id(), ctx.local_operation_id());
        assert_eq!(replicated.decode_representation().unwrap(), tx);
    }

    #[test]
    fn equality_covers_identity() {
        let session = GlobalSession::random(MemberId::random());
        let a = ReplicatedTransaction::new(vec![1], session.clone(), LocalOperationId::new(0, 0));
        let b = ReplicatedTransaction::new(vec![1], session, LocalOperationId::new(0, 1));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
