// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for Peer Replication
//!
//! Drives a real [`PeerNodeClient`] worker against a scripted in-memory
//! transport. All tests run on a paused clock, so batching delays and
//! retry back-off are deterministic.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Run specific group
//! cargo test --test integration batching_
//! ```
//!
//! # Test Organization
//! - `batching_*` - Size/delay flushing and coalescing
//! - `reconcile_*` - Self-healing and conflict adoption
//! - `retry_*` - Congestion, transient failures, expiry
//! - `shutdown_*` - Graceful drain
//! - `single_*` - Resource-group updates and prime heartbeats
//! - `cluster_*` - Fan-out over several peers

mod common;

use common::{instance, BatchScript, MockTransport, RecordingRegistry, RegistryCall};
use peer_replication::protocol::{ReplicationInstanceResponse, SingleRequest};
use peer_replication::transport::SingleReply;
use peer_replication::{
    Action, InstanceStatus, NodeState, PeerCluster, PeerConfig, PeerNodeClient, ProcessingResult,
    ReplicationConfig, ReplicationError, ReplicationSettings, ResourceGroupStatus, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn peer() -> PeerConfig {
    PeerConfig::for_testing("registry-2", "http://registry-2:8080/v2")
}

fn client_with(
    settings: ReplicationSettings,
) -> (Arc<MockTransport>, PeerNodeClient<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let client = PeerNodeClient::new(&peer(), &settings, Arc::clone(&transport)).unwrap();
    (transport, client)
}

fn client_with_registry(
    settings: ReplicationSettings,
) -> (
    Arc<MockTransport>,
    Arc<RecordingRegistry>,
    PeerNodeClient<MockTransport, RecordingRegistry>,
) {
    let transport = Arc::new(MockTransport::new());
    let registry = Arc::new(RecordingRegistry::new());
    let client = PeerNodeClient::with_registry(
        &peer(),
        &settings,
        Arc::clone(&transport),
        Arc::clone(&registry),
    )
    .unwrap();
    (transport, registry, client)
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test(start_paused = true)]
async fn batching_flushes_when_size_reached() {
    let settings = ReplicationSettings {
        max_batching_delay_ms: 10_000,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);

    for i in 0..10 {
        client.register(instance("BILLING", &format!("billing-{}", i))).unwrap();
    }
    sleep(Duration::from_millis(1)).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 1, "full batch should go out without waiting");
    assert_eq!(batches[0].list.len(), 10);
    assert_eq!(client.stats().tasks_finished, 10);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batching_splits_into_max_sized_batches() {
    let settings = ReplicationSettings {
        max_batching_delay_ms: 10_000,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);

    for i in 0..25 {
        client.cancel("BILLING", &format!("billing-{}", i)).unwrap();
    }
    sleep(Duration::from_millis(1)).await;

    // Two full batches go out at once; the remaining five wait for the delay.
    assert_eq!(transport.batches().len(), 2);
    sleep(Duration::from_secs(11)).await;

    let sizes: Vec<_> = transport.batches().iter().map(|b| b.list.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batching_flushes_after_delay() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    let start = Instant::now();

    client.register(instance("BILLING", "billing-1")).unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    client.heartbeat("BILLING", "billing-3", None, None, false).unwrap();

    sleep(Duration::from_millis(2)).await;
    assert!(transport.batches().is_empty(), "nothing should flush before the delay");

    sleep(Duration::from_millis(20)).await;
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].at - start >= Duration::from_millis(5));
    assert_eq!(
        batches[0].items(),
        vec![
            (Action::Register, "billing-1".to_string()),
            (Action::Cancel, "billing-2".to_string()),
            (Action::Heartbeat, "billing-3".to_string()),
        ]
    );
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batching_coalesces_same_task_id() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());

    client.heartbeat("BILLING", "billing-1", None, None, false).unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    client
        .heartbeat("BILLING", "billing-1", None, Some(InstanceStatus::OutOfService), false)
        .unwrap();
    client.heartbeat("BILLING", "billing-1", None, None, false).unwrap();

    sleep(Duration::from_millis(20)).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    // Latest wins but keeps the first arrival's position.
    assert_eq!(
        batches[0].items(),
        vec![
            (Action::Heartbeat, "billing-1".to_string()),
            (Action::Cancel, "billing-2".to_string()),
        ]
    );
    let stats = client.stats();
    assert_eq!(stats.tasks_submitted, 4);
    assert_eq!(stats.tasks_superseded, 2);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batching_different_actions_do_not_coalesce() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());

    client
        .status_update("BILLING", "billing-1", InstanceStatus::OutOfService, None)
        .unwrap();
    client.delete_status_override("BILLING", "billing-1", None).unwrap();

    sleep(Duration::from_millis(20)).await;

    assert_eq!(
        transport.sent_items(),
        vec![
            (Action::StatusUpdate, "billing-1".to_string()),
            (Action::DeleteStatusOverride, "billing-1".to_string()),
        ]
    );
    assert_eq!(client.stats().tasks_superseded, 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batching_item_failures_are_per_task() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_batch(BatchScript::Items(vec![
        ReplicationInstanceResponse::new(200),
        ReplicationInstanceResponse::new(500),
        ReplicationInstanceResponse::new(200),
    ]));

    client.cancel("BILLING", "billing-1").unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    client.cancel("BILLING", "billing-3").unwrap();
    sleep(Duration::from_millis(20)).await;

    let stats = client.stats();
    assert_eq!(stats.tasks_finished, 2);
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(transport.batches().len(), 1, "item failures are not retried");
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batching_malformed_reply_fails_whole_batch() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_batch(BatchScript::Items(vec![ReplicationInstanceResponse::new(200)]));
    transport.script_batch(BatchScript::NoBody);

    client.cancel("BILLING", "billing-1").unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    sleep(Duration::from_millis(20)).await;

    client.cancel("BILLING", "billing-3").unwrap();
    sleep(Duration::from_millis(20)).await;

    let stats = client.stats();
    assert_eq!(transport.batches().len(), 2);
    assert_eq!(stats.tasks_failed, 3);
    assert_eq!(stats.tasks_finished, 0);
    client.shutdown().await;
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reconcile_heartbeat_not_found_reregisters_once() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.reply_to_item(Action::Heartbeat, "billing-1", 404, None);

    let info = instance("BILLING", "billing-1");
    client
        .heartbeat("BILLING", "billing-1", Some(info), None, false)
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].items(), vec![(Action::Heartbeat, "billing-1".to_string())]);
    assert_eq!(batches[1].items(), vec![(Action::Register, "billing-1".to_string())]);

    let register = &batches[1].list.replication_list[0];
    assert_eq!(
        register.instance_info.as_ref().map(|i| i.host_name.as_str()),
        Some("billing-1.local")
    );

    let stats = client.stats();
    assert_eq!(stats.self_heals, 1);
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.tasks_finished, 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_heartbeat_not_found_without_record_does_nothing() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.reply_to_item(Action::Heartbeat, "billing-1", 404, None);

    client.heartbeat("BILLING", "billing-1", None, None, false).unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.batches().len(), 1);
    assert_eq!(client.stats().self_heals, 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_cancel_not_found_is_not_retried() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.reply_to_item(Action::Cancel, "billing-1", 404, None);

    client.cancel("BILLING", "billing-1").unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.batches().len(), 1);
    let stats = client.stats();
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.self_heals, 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_adopts_peer_record_once() {
    let (transport, registry, client) = client_with_registry(ReplicationSettings::for_testing());

    let mut peer_record = instance("BILLING", "billing-1");
    peer_record.last_dirty_timestamp += 5_000;
    peer_record.overridden_status = Some(InstanceStatus::OutOfService);
    transport.reply_to_item(Action::Heartbeat, "billing-1", 409, Some(peer_record.clone()));

    client
        .heartbeat("BILLING", "billing-1", Some(instance("BILLING", "billing-1")), None, false)
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(
        registry.calls(),
        vec![
            RegistryCall::StoreOverriddenStatus {
                app_name: "BILLING".to_string(),
                instance_id: "billing-1".to_string(),
                status: InstanceStatus::OutOfService,
            },
            RegistryCall::RegisterLocally {
                info: peer_record,
                is_replication: true,
            },
        ]
    );
    assert_eq!(client.stats().adoptions, 1);
    assert_eq!(transport.batches().len(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_adoption_disabled_leaves_registry_alone() {
    let settings = ReplicationSettings {
        sync_when_timestamp_differs: false,
        ..ReplicationSettings::for_testing()
    };
    let (transport, registry, client) = client_with_registry(settings);
    transport.reply_to_item(
        Action::Heartbeat,
        "billing-1",
        409,
        Some(instance("BILLING", "billing-1")),
    );

    client.heartbeat("BILLING", "billing-1", None, None, false).unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(registry.calls().is_empty());
    assert_eq!(client.stats().adoptions, 0);
    client.shutdown().await;
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn retry_congestion_backs_off_without_counting() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_batch(BatchScript::Status(503));
    transport.script_batch(BatchScript::Error(TransportError::ReadTimeout(
        "no reply".to_string(),
    )));

    client.cancel("BILLING", "billing-1").unwrap();
    sleep(Duration::from_millis(100)).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 3);
    for pair in batches.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(10));
    }
    let stats = client.stats();
    assert_eq!(stats.tasks_finished, 1);
    assert_eq!(stats.consecutive_network_failures, 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_keeps_order_ahead_of_newer_tasks() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_batch(BatchScript::Status(503));

    client.cancel("BILLING", "billing-1").unwrap();
    sleep(Duration::from_millis(7)).await;
    assert_eq!(transport.batches().len(), 1);

    client.cancel("BILLING", "billing-2").unwrap();
    sleep(Duration::from_millis(50)).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(
        batches[1].items(),
        vec![
            (Action::Cancel, "billing-1".to_string()),
            (Action::Cancel, "billing-2".to_string()),
        ]
    );
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_transient_until_max_retries_then_permanent() {
    let settings = ReplicationSettings {
        max_retries: 3,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);
    transport.script_batches(
        BatchScript::Error(TransportError::ConnectionRefused("refused".to_string())),
        3,
    );

    client.cancel("BILLING", "billing-1").unwrap();
    sleep(Duration::from_millis(100)).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 3, "third network failure is permanent");
    for pair in batches.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(5));
    }
    let stats = client.stats();
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.consecutive_network_failures, 3);

    // Any reply from the peer resets the counter.
    client.cancel("BILLING", "billing-2").unwrap();
    sleep(Duration::from_millis(20)).await;
    let stats = client.stats();
    assert_eq!(stats.tasks_finished, 1);
    assert_eq!(stats.consecutive_network_failures, 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_tls_failure_is_permanent_immediately() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_batch(BatchScript::Error(TransportError::Tls(
        "invalid peer certificate".to_string(),
    )));

    client.cancel("BILLING", "billing-1").unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.batches().len(), 1);
    let stats = client.stats();
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.consecutive_network_failures, 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_non_503_error_status_fails_batch() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_batch(BatchScript::Status(500));

    client.cancel("BILLING", "billing-1").unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.batches().len(), 1);
    assert_eq!(client.stats().tasks_failed, 2);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_stops_when_task_expires() {
    let settings = ReplicationSettings {
        max_time_for_replication_ms: 50,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);
    transport.script_batches(BatchScript::Status(503), 100);

    client.cancel("BILLING", "billing-1").unwrap();
    sleep(Duration::from_millis(200)).await;

    let sent = transport.batches().len();
    assert!(sent >= 2, "expected a few congestion retries, got {}", sent);
    let stats = client.stats();
    assert_eq!(stats.tasks_expired, 1);
    assert_eq!(stats.tasks_failed, 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.batches().len(), sent, "expired task must not be sent again");
    client.shutdown().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_drains_waiting_tasks() {
    let settings = ReplicationSettings {
        max_batching_delay_ms: 10_000,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);

    client.cancel("BILLING", "billing-1").unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    client.register(instance("BILLING", "billing-3")).unwrap();

    client.shutdown().await;

    assert_eq!(transport.batches().len(), 1);
    assert_eq!(transport.batches()[0].list.len(), 3);
    assert_eq!(client.stats().tasks_finished, 3);
    assert_eq!(client.state(), NodeState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_retryable_tasks() {
    let settings = ReplicationSettings {
        max_batching_delay_ms: 10_000,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);
    transport.script_batches(BatchScript::Status(503), 10);

    client.cancel("BILLING", "billing-1").unwrap();
    client.cancel("BILLING", "billing-2").unwrap();
    client.shutdown().await;

    assert_eq!(transport.batches().len(), 1, "no retries during drain");
    let stats = client.stats();
    assert_eq!(stats.tasks_discarded, 2);
    assert_eq!(stats.tasks_finished, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_sends_self_heal_register_during_drain() {
    let settings = ReplicationSettings {
        max_batching_delay_ms: 10_000,
        ..ReplicationSettings::for_testing()
    };
    let (transport, client) = client_with(settings);
    transport.reply_to_item(Action::Heartbeat, "billing-1", 404, None);

    client
        .heartbeat("BILLING", "billing-1", Some(instance("BILLING", "billing-1")), None, false)
        .unwrap();
    client.shutdown().await;

    assert_eq!(
        transport.sent_items(),
        vec![
            (Action::Heartbeat, "billing-1".to_string()),
            (Action::Register, "billing-1".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_work_and_is_idempotent() {
    let (_transport, client) = client_with(ReplicationSettings::for_testing());
    let mut state = client.state_receiver();

    client.shutdown().await;
    client.shutdown().await;

    assert_eq!(*state.borrow_and_update(), NodeState::Stopped);
    assert!(!client.is_running());
    assert!(matches!(
        client.register(instance("BILLING", "billing-1")),
        Err(ReplicationError::InvalidState { .. })
    ));
    assert!(matches!(
        client
            .resource_group_status_update("billing-v1", ResourceGroupStatus::Enabled)
            .await,
        Err(ReplicationError::InvalidState { .. })
    ));
}

// =============================================================================
// Singles
// =============================================================================

#[tokio::test(start_paused = true)]
async fn single_resource_group_update_bypasses_batching() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());

    let result = client
        .resource_group_status_update("billing-v2", ResourceGroupStatus::Disabled)
        .await
        .unwrap();

    assert_eq!(result, ProcessingResult::Success);
    assert!(transport.batches().is_empty());
    assert_eq!(
        transport.singles(),
        vec![SingleRequest::ResourceGroupStatus {
            group_name: "billing-v2".to_string(),
            status: ResourceGroupStatus::Disabled,
        }]
    );
    assert_eq!(client.stats().singles_sent, 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_resource_group_update_retries_congestion() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_single(Ok(SingleReply::status(503)));
    transport.script_single(Err(TransportError::ConnectionReset("reset".to_string())));

    let result = client
        .resource_group_status_update("billing-v2", ResourceGroupStatus::Enabled)
        .await
        .unwrap();

    assert_eq!(result, ProcessingResult::Success);
    assert_eq!(transport.singles().len(), 3);
    assert_eq!(client.stats().consecutive_network_failures, 0);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_resource_group_update_reports_permanent_failure() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_single(Ok(SingleReply::status(400)));

    let result = client
        .resource_group_status_update("billing-v2", ResourceGroupStatus::Enabled)
        .await
        .unwrap();

    assert_eq!(result, ProcessingResult::PermanentError);
    assert_eq!(client.stats().tasks_failed, 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_prime_heartbeat_is_not_counted() {
    let (transport, client) = client_with(ReplicationSettings::for_testing());
    transport.script_single(Err(TransportError::ConnectionRefused("refused".to_string())));

    client.heartbeat("BILLING", "billing-1", None, None, true).unwrap();
    sleep(Duration::from_millis(20)).await;

    let singles = transport.singles();
    assert_eq!(singles.len(), 1);
    assert!(matches!(
        &singles[0],
        SingleRequest::Instance(wire) if wire.action == Action::Heartbeat
    ));
    assert!(transport.batches().is_empty());
    let stats = client.stats();
    assert_eq!(stats.consecutive_network_failures, 0);
    assert_eq!(stats.tasks_submitted, 0);
    client.shutdown().await;
}

// =============================================================================
// Cluster
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cluster_broadcasts_to_every_remote_peer() {
    let mut config = ReplicationConfig::for_testing("registry-1");
    config.peers = vec![
        PeerConfig::for_testing("registry-1", "http://registry-1:8080/v2"),
        PeerConfig::for_testing("registry-2", "http://registry-2:8080/v2"),
        PeerConfig::for_testing("registry-3", "http://registry-3:8080/v2"),
    ];
    let transport = Arc::new(MockTransport::new());
    let cluster = PeerCluster::new(&config, Arc::clone(&transport)).unwrap();

    cluster.register(&instance("BILLING", "billing-1")).unwrap();
    cluster
        .status_update("BILLING", "billing-1", InstanceStatus::Down, None)
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    // One batch per remote peer, each carrying both tasks.
    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.list.len() == 2));

    let stats = cluster.stats();
    assert_eq!(
        stats.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
        vec!["registry-2", "registry-3"]
    );
    assert!(stats.iter().all(|(_, s)| s.tasks_finished == 2));
    cluster.shutdown().await;
}
