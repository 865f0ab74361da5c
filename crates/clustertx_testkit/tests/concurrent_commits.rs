//! Concurrent committers on several members sharing one log.

use clustertx_testkit::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn every_member_applies_identical_history() {
    let cluster = Arc::new(Cluster::new(3, steady_config()).unwrap());
    let threads_per_member = 4;
    let commits_per_thread = 20;

    let handles: Vec<_> = (0..3)
        .flat_map(|member| (0..threads_per_member).map(move |t| (member, t)))
        .map(|(member, t)| {
            let cluster = Arc::clone(&cluster);
            thread::spawn(move || {
                (0..commits_per_thread)
                    .map(|i| {
                        cluster
                            .member(member)
                            .commit(&transaction(&format!("m{member}-t{t}-{i}")))
                            .unwrap()
                    })
                    .count()
            })
        })
        .collect();

    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let expected = 3 * threads_per_member * commits_per_thread;
    assert_eq!(committed, expected);
    assert!(cluster.wait_until_caught_up(Duration::from_secs(10)));

    let reference = cluster.member(0).committer().commands();
    assert_eq!(reference.len(), expected);
    let distinct: BTreeSet<_> = reference.iter().collect();
    assert_eq!(distinct.len(), expected);

    for member in cluster.members() {
        assert_eq!(member.committer().commands(), reference);
        assert_eq!(member.in_flight(), 0);
        assert!(member.applier_failure().is_none());
    }
}

#[test]
fn committed_ids_are_local_store_ids() {
    let cluster = Cluster::new(2, steady_config()).unwrap();

    let first = cluster.member(0).commit(&transaction("a")).unwrap();
    let second = cluster.member(1).commit(&transaction("b")).unwrap();
    assert!(cluster.wait_for_applied(2, Duration::from_secs(5)));

    let store = cluster.member(1).committer().committed();
    assert_eq!(store[0].tx_id, first);
    assert_eq!(store[1].tx_id, second);
    assert_eq!(store[1].command_index, 1);
    assert_eq!(store[1].representation.command_index(), Some(1));
}

#[test]
fn operations_use_gapless_sequences() {
    let cluster = Cluster::new(1, steady_config()).unwrap();
    for i in 0..5 {
        cluster.member(0).commit(&transaction(&i.to_string())).unwrap();
    }

    let seqs: Vec<u64> = cluster
        .log()
        .transactions()
        .unwrap()
        .iter()
        .map(|tx| tx.operation_id().sequence_number())
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}
