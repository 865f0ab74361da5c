//! Restarted members replay the log without committing anything twice.

use clustertx_core::{LedgerStore, SlotStatus};
use clustertx_testkit::prelude::*;
use std::time::Duration;

#[test]
fn restart_with_durable_ledger_replays_without_recommit() {
    let ledgers = TestLedgerDir::new();
    let mut cluster =
        Cluster::with_ledgers(2, steady_config(), |i| ledgers.member_config(i)).unwrap();

    for i in 0..5 {
        cluster.member(i % 2).commit(&transaction(&format!("before {i}"))).unwrap();
    }
    assert!(cluster.wait_until_caught_up(Duration::from_secs(5)));
    let old_session = cluster.member(1).global_session().clone();

    cluster.member_mut(1).restart().unwrap();
    assert_ne!(cluster.member(1).global_session(), &old_session);
    assert!(cluster.member(1).wait_until_caught_up(Duration::from_secs(5)));
    assert_eq!(cluster.member(1).committer().len(), 5);

    // The restarted member starts its sequences over under the new session.
    cluster.member(1).commit(&transaction("after")).unwrap();
    assert!(cluster.wait_until_caught_up(Duration::from_secs(5)));
    assert_eq!(
        cluster.member(0).committer().commands(),
        cluster.member(1).committer().commands()
    );
    assert_eq!(cluster.member(0).committer().len(), 6);
}

#[test]
fn lost_ledger_is_rebuilt_from_replay() {
    let ledgers = TestLedgerDir::new();
    let mut cluster =
        Cluster::with_ledgers(1, steady_config(), |i| ledgers.member_config(i)).unwrap();

    for i in 0..3 {
        cluster.member(0).commit(&transaction(&i.to_string())).unwrap();
    }
    assert!(cluster.wait_until_caught_up(Duration::from_secs(5)));

    cluster.member(0).stop();
    std::fs::remove_dir_all(ledgers.member_dir(0)).unwrap();
    cluster.member_mut(0).restart().unwrap();
    assert!(cluster.member(0).wait_until_caught_up(Duration::from_secs(5)));
    assert_eq!(cluster.member(0).committer().len(), 3);

    // Re-deliver an already applied entry after the replay; it is rejected.
    let frames = cluster.log().transactions().unwrap();
    cluster
        .log()
        .append_raw(clustertx_core::marshal::encode_transaction(&frames[2]).unwrap());
    assert!(cluster.member(0).wait_until_caught_up(Duration::from_secs(5)));
    assert_eq!(cluster.member(0).committer().len(), 3);
}

#[test]
fn ledger_files_reflect_applied_entries() {
    let ledgers = TestLedgerDir::new();
    let cluster =
        Cluster::with_ledgers(1, steady_config(), |i| ledgers.member_config(i)).unwrap();

    for i in 0..4 {
        cluster.member(0).commit(&transaction(&i.to_string())).unwrap();
    }
    assert!(cluster.wait_until_caught_up(Duration::from_secs(5)));
    let session = cluster.member(0).global_session().clone();
    drop(cluster);

    let mut store = LedgerStore::open(&ledgers.member_config(0)).unwrap();
    let status = store.inspect().unwrap();
    assert!(status.iter().all(SlotStatus::is_valid));

    let state = store.recover().unwrap();
    assert_eq!(state.last_applied_index(), Some(3));
    assert_eq!(state.last_sequence_number(&session, 0), Some(3));
}
