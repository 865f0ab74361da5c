//! Property-based test generators.

use clustertx_core::LocalOperationId;
use proptest::prelude::*;

/// Generates a delivery order for `sessions` local sessions of `ops` operations
/// each: every operation appears at least once, in per-session order,
/// with random duplicates of already delivered operations interleaved.
pub fn redelivery_schedule(
    sessions: u64,
    ops: u64,
) -> impl Strategy<Value = Vec<LocalOperationId>> {
    let total = (sessions * ops) as usize;
    (
        prop::collection::vec(0..sessions, total..=total),
        prop::collection::vec(any::<prop::sample::Index>(), 0..total.max(1)),
    )
        .prop_map(move |(picks, duplicates)| {
            let mut next = vec![0u64; sessions as usize];
            let mut schedule: Vec<LocalOperationId> = Vec::new();
            let mut duplicates = duplicates.into_iter();

            for pick in picks {
                // Fall back to any session that still has operations left.
                let local = (0..sessions)
                    .map(|offset| (pick + offset) % sessions)
                    .find(|candidate| next[*candidate as usize] < ops);
                let Some(local) = local else { break };

                let seq = next[local as usize];
                next[local as usize] += 1;
                schedule.push(LocalOperationId::new(local, seq));

                if let Some(index) = duplicates.next() {
                    let earlier = schedule[index.index(schedule.len())];
                    schedule.push(earlier);
                }
            }
            schedule
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    proptest! {
        #[test]
        fn schedule_covers_every_operation(schedule in redelivery_schedule(3, 4)) {
            let distinct: BTreeSet<_> = schedule.iter().copied().collect();
            prop_assert_eq!(distinct.len(), 12);
        }
    }
}
