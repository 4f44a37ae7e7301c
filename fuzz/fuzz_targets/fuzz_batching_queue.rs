//! Fuzz target for the batching queue.
//!
//! Drives arbitrary add / take / requeue sequences and checks that waiting
//! task ids stay unique and batches never exceed the size limit.

#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_replication::{BatchConfig, BatchingQueue, ReplicationTask};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

fuzz_target!(|data: (u8, Vec<(u8, u8)>)| {
    let (size, ops) = data;
    let max_batch_size = (size % 16) as usize + 1;
    let mut queue = BatchingQueue::new(
        "peer-1",
        BatchConfig {
            max_batch_size,
            max_batch_delay: Duration::from_millis(5),
        },
    );
    let now = Instant::now();
    let mut in_flight: Vec<ReplicationTask> = Vec::new();

    for (op, instance) in ops {
        let id = format!("i-{}", instance % 32);
        match op % 4 {
            0 => {
                queue.add(
                    ReplicationTask::cancel("peer-1", "APP", id, Duration::from_secs(60)),
                    now,
                );
            }
            1 => {
                queue.add(
                    ReplicationTask::heartbeat("peer-1", "APP", id, None, None),
                    now,
                );
            }
            2 => {
                let batch = queue.take_batch(now);
                assert!(batch.tasks.len() <= max_batch_size);
                let ids: HashSet<_> = batch.tasks.iter().map(ReplicationTask::id).collect();
                assert_eq!(ids.len(), batch.tasks.len());
                in_flight = batch.tasks;
            }
            _ => {
                let retried = std::mem::take(&mut in_flight);
                let count = retried.len();
                assert!(queue.requeue_front(retried, Duration::from_millis(10), now) <= count);
            }
        }

        // Two actions over 32 instances: at most 64 distinct ids.
        assert!(queue.len() <= 64);
    }
});
