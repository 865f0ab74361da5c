//! An in-process replicated log.
//!
//! Proposals are appended to a single shared sequence of frames, which
//! stands in for the agreed order of a consensus log. Every subscriber gets
//! its own delivery thread that walks the whole sequence from index 0, so
//! all subscribers see identical entries in identical order, each exactly
//! when the thread gets to it.
//!
//! ## Fault injection
//!
//! - dropped proposals: `replicate` succeeds but nothing is appended
//! - failed proposals: `replicate` returns an error and nothing is appended
//!
//! Pending drops are consumed before pending failures.
//! - duplicated proposals: the frame is appended twice
//! - delivery delay: every delivery sleeps first

use clustertx_core::{
    marshal, CommittedEntryListener, CoreError, CoreResult, ListenerId, ReplicatedLog,
    ReplicatedTransaction, Replicator,
};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Faults {
    fail: usize,
    drop: usize,
    duplicate: usize,
    delivery_delay: Duration,
}

struct Subscriber {
    stop: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    entries: Mutex<Vec<Arc<[u8]>>>,
    appended: Condvar,
    faults: Mutex<Faults>,
    subscribers: Mutex<HashMap<ListenerId, Subscriber>>,
    next_listener: AtomicU64,
}

/// A replicated log shared by all members of a test cluster.
///
/// Cheap to clone; clones share the same log.
#[derive(Clone, Default)]
pub struct InProcessLog {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InProcessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessLog")
            .field("entries", &self.len())
            .field("subscribers", &self.shared.subscribers.lock().len())
            .finish()
    }
}

impl InProcessLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Returns true if nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes every entry in log order.
    pub fn transactions(&self) -> CoreResult<Vec<ReplicatedTransaction>> {
        self.shared
            .entries
            .lock()
            .iter()
            .map(|frame| marshal::decode_transaction(frame))
            .collect()
    }

    /// Appends a raw frame, bypassing fault injection.
    pub fn append_raw(&self, frame: Vec<u8>) {
        self.append(Arc::from(frame));
    }

    /// Makes the next `count` proposals fail.
    pub fn fail_next_proposals(&self, count: usize) {
        self.shared.faults.lock().fail = count;
    }

    /// Makes the next `count` proposals vanish after being accepted.
    pub fn drop_next_proposals(&self, count: usize) {
        self.shared.faults.lock().drop = count;
    }

    /// Makes the next `count` proposals land in the log twice.
    pub fn duplicate_next_proposals(&self, count: usize) {
        self.shared.faults.lock().duplicate = count;
    }

    /// Delays every delivery by `delay`.
    pub fn set_delivery_delay(&self, delay: Duration) {
        self.shared.faults.lock().delivery_delay = delay;
    }

    /// Number of entries a subscriber has processed.
    pub fn delivered(&self, id: ListenerId) -> u64 {
        self.shared
            .subscribers
            .lock()
            .get(&id)
            .map_or(0, |sub| sub.delivered.load(Ordering::SeqCst))
    }

    /// Error that stopped a subscriber, if any.
    pub fn listener_failure(&self, id: ListenerId) -> Option<String> {
        self.shared
            .subscribers
            .lock()
            .get(&id)
            .and_then(|sub| sub.failure.lock().clone())
    }

    /// Waits until a subscriber has processed every entry currently in the
    /// log. Returns false on timeout or if the subscriber stopped.
    pub fn wait_until_caught_up(&self, id: ListenerId, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let target = self.len() as u64;
            if self.delivered(id) >= target {
                return true;
            }
            let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
            if self.listener_failure(id).is_some() || expired {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Stops every delivery thread.
    pub fn shutdown(&self) {
        let ids: Vec<ListenerId> = self.shared.subscribers.lock().keys().copied().collect();
        for id in ids {
            self.unsubscribe(id);
        }
    }

    fn append(&self, frame: Arc<[u8]>) {
        let mut entries = self.shared.entries.lock();
        entries.push(frame);
        self.shared.appended.notify_all();
    }

    fn deliver(
        shared: &Shared,
        mut listener: Box<dyn CommittedEntryListener>,
        stop: &AtomicBool,
        delivered: &AtomicU64,
        failure: &Mutex<Option<String>>,
    ) {
        let mut next = 0usize;
        loop {
            let frame = {
                let mut entries = shared.entries.lock();
                while next >= entries.len() {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    shared.appended.wait_for(&mut entries, Duration::from_millis(20));
                }
                Arc::clone(&entries[next])
            };
            if stop.load(Ordering::SeqCst) {
                return;
            }

            let delay = shared.faults.lock().delivery_delay;
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            if let Err(err) = listener.on_entry_committed(&frame, next as u64) {
                error!(command_index = next, error = %err, "listener failed, stopping delivery");
                *failure.lock() = Some(err.to_string());
                return;
            }
            next += 1;
            delivered.store(next as u64, Ordering::SeqCst);
        }
    }
}

impl Replicator for InProcessLog {
    fn replicate(&self, tx: &ReplicatedTransaction) -> CoreResult<()> {
        let copies = {
            let mut faults = self.shared.faults.lock();
            if faults.drop > 0 {
                faults.drop -= 1;
                debug!(operation = %tx.operation_id(), "dropping proposal");
                return Ok(());
            }
            if faults.fail > 0 {
                faults.fail -= 1;
                return Err(CoreError::replication_failed("injected proposal failure"));
            }
            if faults.duplicate > 0 {
                faults.duplicate -= 1;
                2
            } else {
                1
            }
        };

        let frame: Arc<[u8]> = Arc::from(marshal::encode_transaction(tx)?);
        for _ in 0..copies {
            self.append(Arc::clone(&frame));
        }
        Ok(())
    }
}

impl ReplicatedLog for InProcessLog {
    fn subscribe(&self, listener: Box<dyn CommittedEntryListener>) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::SeqCst));
        let stop = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));
        let failure = Arc::new(Mutex::new(None));

        let handle = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            let delivered = Arc::clone(&delivered);
            let failure = Arc::clone(&failure);
            thread::spawn(move || Self::deliver(&shared, listener, &stop, &delivered, &failure))
        };

        self.shared.subscribers.lock().insert(
            id,
            Subscriber {
                stop,
                delivered,
                failure,
                handle: Some(handle),
            },
        );
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let Some(mut subscriber) = self.shared.subscribers.lock().remove(&id) else {
            return false;
        };
        subscriber.stop.store(true, Ordering::SeqCst);
        {
            let _entries = self.shared.entries.lock();
            self.shared.appended.notify_all();
        }
        if let Some(handle) = subscriber.handle.take() {
            let _ = handle.join();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustertx_core::{GlobalSession, LocalOperationId, MemberId};

    struct Recorder {
        seen: Arc<Mutex<Vec<(u64, LocalOperationId)>>>,
    }

    impl CommittedEntryListener for Recorder {
        fn on_entry_committed(&mut self, frame: &[u8], command_index: u64) -> CoreResult<()> {
            let tx = marshal::decode_transaction(frame)?;
            self.seen.lock().push((command_index, *tx.operation_id()));
            Ok(())
        }
    }

    fn proposal(seq: u64) -> ReplicatedTransaction {
        ReplicatedTransaction::new(
            vec![seq as u8],
            GlobalSession::random(MemberId::random()),
            LocalOperationId::new(0, seq),
        )
    }

    #[test]
    fn subscribers_see_identical_order() {
        let log = InProcessLog::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let id_a = log.subscribe(Box::new(Recorder { seen: Arc::clone(&a) }));

        for seq in 0..5 {
            log.replicate(&proposal(seq)).unwrap();
        }
        // A late subscriber replays from the start.
        let id_b = log.subscribe(Box::new(Recorder { seen: Arc::clone(&b) }));

        assert!(log.wait_until_caught_up(id_a, Duration::from_secs(5)));
        assert!(log.wait_until_caught_up(id_b, Duration::from_secs(5)));
        assert_eq!(*a.lock(), *b.lock());
        assert_eq!(a.lock().len(), 5);
        assert!(log.unsubscribe(id_a));
        assert!(log.unsubscribe(id_b));
        assert!(!log.unsubscribe(id_b));
    }

    #[test]
    fn unbounded_catch_up_wait() {
        let log = InProcessLog::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = log.subscribe(Box::new(Recorder { seen: Arc::clone(&seen) }));

        log.replicate(&proposal(0)).unwrap();
        assert!(log.wait_until_caught_up(id, Duration::MAX));
        assert_eq!(seen.lock().len(), 1);
        log.shutdown();
    }

    #[test]
    fn injected_faults() {
        let log = InProcessLog::new();

        log.fail_next_proposals(1);
        assert!(log.replicate(&proposal(0)).is_err());
        assert!(log.is_empty());

        log.drop_next_proposals(1);
        log.replicate(&proposal(0)).unwrap();
        assert!(log.is_empty());

        log.duplicate_next_proposals(1);
        log.replicate(&proposal(0)).unwrap();
        assert_eq!(log.len(), 2);

        log.replicate(&proposal(1)).unwrap();
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn failing_listener_stops() {
        struct Failing;
        impl CommittedEntryListener for Failing {
            fn on_entry_committed(&mut self, _frame: &[u8], index: u64) -> CoreResult<()> {
                Err(CoreError::diverged(index, "boom"))
            }
        }

        let log = InProcessLog::new();
        let id = log.subscribe(Box::new(Failing));
        log.replicate(&proposal(0)).unwrap();

        assert!(!log.wait_until_caught_up(id, Duration::from_secs(5)));
        assert!(log.listener_failure(id).unwrap().contains("boom"));
        assert_eq!(log.delivered(id), 0);
    }
}
