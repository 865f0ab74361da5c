//! A multi-member cluster sharing one [`InProcessLog`].

use crate::committer::InMemoryCommitter;
use crate::log::InProcessLog;
use clustertx_core::{
    CommitConfig, CommitStats, CommittingTransactions, CoreResult, FixedLockTokens, GlobalSession,
    LedgerConfig, LedgerStore, ListenerId, LockSessionId, MemberId, ReplicatedLog,
    ReplicatedTransactionCommitProcess, ReplicatedTransactionStateMachine, SessionTracker,
    TransactionApplier, TransactionId, TransactionRepresentation,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// One member: a commit process, and an applier subscribed to the log.
#[derive(Debug)]
pub struct ClusterMember {
    member_id: MemberId,
    log: InProcessLog,
    lock_tokens: Arc<FixedLockTokens>,
    committer: InMemoryCommitter,
    ledger: Option<LedgerConfig>,
    config: CommitConfig,
    process: ReplicatedTransactionCommitProcess<InProcessLog>,
    listener: ListenerId,
}

impl ClusterMember {
    /// Starts a member with a fresh global session.
    pub fn start(
        log: InProcessLog,
        lock_tokens: Arc<FixedLockTokens>,
        committer: InMemoryCommitter,
        ledger: Option<LedgerConfig>,
        config: CommitConfig,
    ) -> CoreResult<Self> {
        let member_id = MemberId::random();
        let (process, listener) =
            Self::boot(member_id, &log, &lock_tokens, &committer, ledger.as_ref(), &config)?;
        Ok(Self {
            member_id,
            log,
            lock_tokens,
            committer,
            ledger,
            config,
            process,
            listener,
        })
    }

    fn boot(
        member_id: MemberId,
        log: &InProcessLog,
        lock_tokens: &Arc<FixedLockTokens>,
        committer: &InMemoryCommitter,
        ledger: Option<&LedgerConfig>,
        config: &CommitConfig,
    ) -> CoreResult<(ReplicatedTransactionCommitProcess<InProcessLog>, ListenerId)> {
        let session = GlobalSession::random(member_id);
        let registry = Arc::new(CommittingTransactions::new(session.clone()));

        let tracker = match ledger {
            Some(ledger) => SessionTracker::durable(LedgerStore::open(ledger)?)?,
            None => SessionTracker::in_memory(),
        };
        let state_machine = ReplicatedTransactionStateMachine::new(
            committer.clone(),
            Arc::clone(lock_tokens),
            tracker,
        );
        let mut applier = TransactionApplier::new(state_machine, Arc::clone(&registry));
        applier.recover()?;

        let listener = log.subscribe(Box::new(applier));
        let process = ReplicatedTransactionCommitProcess::new(log.clone(), registry, config.clone());
        debug!(%session, ?listener, "member started");
        Ok((process, listener))
    }

    /// Commits a transaction through the log.
    pub fn commit(&self, tx: &TransactionRepresentation) -> CoreResult<TransactionId> {
        self.process.commit(tx)
    }

    /// Simulates a process restart: new global session, new registry and
    /// state machine, same local store and ledger directory. The new
    /// applier replays the log from the start.
    pub fn restart(&mut self) -> CoreResult<()> {
        self.stop();
        let (process, listener) = Self::boot(
            self.member_id,
            &self.log,
            &self.lock_tokens,
            &self.committer,
            self.ledger.as_ref(),
            &self.config,
        )?;
        self.process = process;
        self.listener = listener;
        Ok(())
    }

    /// Unsubscribes the applier; commits made afterwards never complete.
    pub fn stop(&self) {
        self.log.unsubscribe(self.listener);
    }

    /// Waits until the applier has processed every entry in the log.
    pub fn wait_until_caught_up(&self, timeout: Duration) -> bool {
        self.log.wait_until_caught_up(self.listener, timeout)
    }

    /// Error that halted this member's applier, if any.
    pub fn applier_failure(&self) -> Option<String> {
        self.log.listener_failure(self.listener)
    }

    /// Member identity.
    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    /// Current global session.
    pub fn global_session(&self) -> &GlobalSession {
        self.process.registry().global_session()
    }

    /// Local store.
    pub fn committer(&self) -> &InMemoryCommitter {
        &self.committer
    }

    /// Commit process counters.
    pub fn stats(&self) -> CommitStats {
        self.process.stats()
    }

    /// Number of in-flight registry entries.
    pub fn in_flight(&self) -> usize {
        self.process.registry().len()
    }
}

/// Members sharing one log and one lock token state.
#[derive(Debug)]
pub struct Cluster {
    log: InProcessLog,
    lock_tokens: Arc<FixedLockTokens>,
    members: Vec<ClusterMember>,
}

impl Cluster {
    /// Starts `size` members with in-memory ledgers.
    pub fn new(size: usize, config: CommitConfig) -> CoreResult<Self> {
        Self::build(size, config, |_| None)
    }

    /// Starts `size` members whose ledgers live under `ledger(index)`.
    pub fn with_ledgers<F>(size: usize, config: CommitConfig, ledger: F) -> CoreResult<Self>
    where
        F: Fn(usize) -> LedgerConfig,
    {
        Self::build(size, config, |index| Some(ledger(index)))
    }

    fn build<F>(size: usize, config: CommitConfig, ledger: F) -> CoreResult<Self>
    where
        F: Fn(usize) -> Option<LedgerConfig>,
    {
        let log = InProcessLog::new();
        let lock_tokens = Arc::new(FixedLockTokens::default());
        let members = (0..size)
            .map(|index| {
                ClusterMember::start(
                    log.clone(),
                    Arc::clone(&lock_tokens),
                    InMemoryCommitter::new(),
                    ledger(index),
                    config.clone(),
                )
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            log,
            lock_tokens,
            members,
        })
    }

    /// Member at `index`.
    pub fn member(&self, index: usize) -> &ClusterMember {
        &self.members[index]
    }

    /// Mutable member at `index`, for restarts.
    pub fn member_mut(&mut self, index: usize) -> &mut ClusterMember {
        &mut self.members[index]
    }

    /// All members.
    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    /// The shared log.
    pub fn log(&self) -> &InProcessLog {
        &self.log
    }

    /// Installs a new current lock session.
    pub fn set_lock_token(&self, token: LockSessionId) {
        self.lock_tokens.set(token);
    }

    /// Waits until every member has applied every entry in the log.
    pub fn wait_until_caught_up(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        self.members.iter().all(|member| {
            let remaining = deadline.map_or(timeout, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            member.wait_until_caught_up(remaining)
        })
    }

    /// Waits until every member's store holds at least `count` transactions.
    pub fn wait_for_applied(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        while deadline.is_none_or(|deadline| Instant::now() < deadline) {
            if self.members.iter().all(|m| m.committer().len() >= count) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.members.iter().all(|m| m.committer().len() >= count)
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.log.shutdown();
    }
}
