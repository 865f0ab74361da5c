//! Pool of local sessions for one global session.

use crate::session::identity::{GlobalSession, LocalSession, OperationContext};
use parking_lot::Mutex;
use tracing::debug;

/// Hands out local sessions and their next operation ids.
///
/// Idle sessions are reused most-recently-released first. A session keeps
/// its counter across leases, so the ids issued for any local session are
/// gapless and strictly increasing for the lifetime of the pool.
#[derive(Debug)]
pub struct LocalSessionPool {
    global_session: GlobalSession,
    state: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    idle: Vec<LocalSession>,
    next_local_session_id: u64,
    max_idle: usize,
    leased: usize,
    retired: usize,
}

impl LocalSessionPool {
    /// Creates an empty pool keeping at most 64 idle sessions.
    pub fn new(global_session: GlobalSession) -> Self {
        Self::with_max_idle(global_session, 64)
    }

    /// Creates an empty pool keeping at most `max_idle` idle sessions.
    pub fn with_max_idle(global_session: GlobalSession, max_idle: usize) -> Self {
        Self {
            global_session,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                next_local_session_id: 0,
                max_idle,
                leased: 0,
                retired: 0,
            }),
        }
    }

    /// Returns the global session all contexts from this pool carry.
    pub fn global_session(&self) -> &GlobalSession {
        &self.global_session
    }

    /// Leases a local session and advances it to its next operation id.
    pub fn acquire_session(&self) -> OperationContext {
        let mut state = self.state.lock();
        let mut session = match state.idle.pop() {
            Some(session) => session,
            None => {
                let id = state.next_local_session_id;
                state.next_local_session_id += 1;
                LocalSession::new(id)
            }
        };
        state.leased += 1;
        drop(state);

        let operation_id = session.next_operation_id();
        OperationContext::new(self.global_session.clone(), session, operation_id)
    }

    /// Returns a leased session to the pool.
    pub fn release_session(&self, context: OperationContext) {
        let session = context.into_local_session();
        let mut state = self.state.lock();
        state.leased = state.leased.saturating_sub(1);
        if state.idle.len() < state.max_idle {
            state.idle.push(session);
        } else {
            debug!(
                local_session = session.local_session_id(),
                "pool full, dropping local session"
            );
        }
    }

    /// Takes a leased session out of circulation for good.
    ///
    /// Used when an operation id was consumed but its proposal never
    /// reached the log: later ids from that session would be rejected.
    pub fn retire_session(&self, context: OperationContext) {
        let session = context.into_local_session();
        let mut state = self.state.lock();
        state.leased = state.leased.saturating_sub(1);
        state.retired += 1;
        debug!(
            local_session = session.local_session_id(),
            "retired local session"
        );
    }

    /// Number of sessions currently leased out.
    pub fn open_session_count(&self) -> usize {
        self.state.lock().leased
    }

    /// Number of idle sessions ready for reuse.
    pub fn idle_session_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Number of sessions retired after a failed first proposal.
    pub fn retired_session_count(&self) -> usize {
        self.state.lock().retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::identity::{LocalOperationId, MemberId};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn pool() -> LocalSessionPool {
        LocalSessionPool::new(GlobalSession::random(MemberId::random()))
    }

    #[test]
    fn pools_and_reuses_local_session() {
        let pool = pool();

        let first = pool.acquire_session();
        assert_eq!(first.local_operation_id(), LocalOperationId::new(0, 0));
        pool.release_session(first);

        let second = pool.acquire_session();
        assert_eq!(second.local_operation_id(), LocalOperationId::new(0, 1));
        pool.release_session(second);

        assert_eq!(pool.idle_session_count(), 1);
    }

    #[test]
    fn concurrent_leases_get_distinct_sessions() {
        let pool = pool();

        let a = pool.acquire_session();
        let b = pool.acquire_session();
        assert_ne!(
            a.local_operation_id().local_session_id(),
            b.local_operation_id().local_session_id()
        );
        assert_eq!(a.local_operation_id().sequence_number(), 0);
        assert_eq!(b.local_operation_id().sequence_number(), 0);
        assert_eq!(pool.open_session_count(), 2);

        pool.release_session(a);
        pool.release_session(b);
        assert_eq!(pool.open_session_count(), 0);
    }

    #[test]
    fn contexts_carry_pool_global_session() {
        let pool = pool();
        let ctx = pool.acquire_session();
        assert_eq!(ctx.global_session(), pool.global_session());
    }

    #[test]
    fn retired_session_is_never_reused() {
        let pool = pool();

        let doomed = pool.acquire_session();
        let doomed_id = doomed.local_operation_id().local_session_id();
        pool.retire_session(doomed);

        let next = pool.acquire_session();
        assert_ne!(next.local_operation_id().local_session_id(), doomed_id);
        assert_eq!(pool.retired_session_count(), 1);
        assert_eq!(pool.open_session_count(), 1);
    }

    #[test]
    fn excess_idle_sessions_are_dropped() {
        let pool = LocalSessionPool::with_max_idle(GlobalSession::random(MemberId::random()), 1);

        let a = pool.acquire_session();
        let b = pool.acquire_session();
        pool.release_session(a);
        pool.release_session(b);

        assert_eq!(pool.idle_session_count(), 1);
        // A dropped session's id is not minted again.
        let c = pool.acquire_session();
        let d = pool.acquire_session();
        assert_eq!(d.local_operation_id().local_session_id(), 2);
        drop(c);
    }

    #[test]
    fn sequences_stay_gapless_under_contention() {
        let pool = Arc::new(pool());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    let ctx = pool.acquire_session();
                    seen.push(ctx.local_operation_id());
                    pool.release_session(ctx);
                }
                seen
            }));
        }

        let mut by_session: HashMap<u64, Vec<u64>> = HashMap::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                by_session
                    .entry(id.local_session_id())
                    .or_default()
                    .push(id.sequence_number());
            }
        }

        for (_, mut sequences) in by_session {
            sequences.sort_unstable();
            let expected: Vec<u64> = (0..sequences.len() as u64).collect();
            assert_eq!(sequences, expected);
        }
    }
}
