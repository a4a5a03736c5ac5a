//! Integration tests for quiescer actors and the thrasher group.
//!
//! These tests run whole actors against `MockCluster` on a paused clock, so
//! holds, active waits and backoffs complete instantly and at exact instants.

use std::sync::Arc;
use std::time::Duration;

use qa_quiescer::transport::RecordedCall;
use qa_quiescer::{
    ActorConfig, ActorState, CommandOutput, MockCluster, NodeId, QuiesceError, Quiescer,
    ThrasherGroup,
};
use tokio::time::Instant;

/// min = max = 10s, factor 0.5, no initial delay: quiesce 10s, active 10s.
fn fixed_config() -> ActorConfig {
    ActorConfig::new(30, 0.5, 10, 10, 0).unwrap()
}

fn start(cluster: &Arc<MockCluster>, fs: &str, config: ActorConfig) -> qa_quiescer::QuiescerHandle {
    Quiescer::new(fs, config, cluster.clone(), cluster.clone()).start()
}

fn offsets(calls: &[RecordedCall], origin: Instant) -> Vec<Duration> {
    calls.iter().map(|c| c.at - origin).collect()
}

#[tokio::test(start_paused = true)]
async fn test_cycle_cadence() {
    let cluster = Arc::new(MockCluster::new(NodeId(1)));
    let origin = Instant::now();
    let mut handle = start(&cluster, "cephfs", fixed_config());

    tokio::time::sleep(Duration::from_secs(25)).await;

    let calls = cluster.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].request.is_quiesce());
    assert_eq!(calls[0].request.arg_after("--expiration"), Some("70"));
    assert!(calls[1].request.is_release());
    assert!(calls[2].request.is_quiesce());
    assert_eq!(
        offsets(&calls, origin),
        vec![
            Duration::ZERO,
            Duration::from_secs(10),
            Duration::from_secs(20)
        ]
    );
    assert_eq!(handle.state(), ActorState::Holding);
    assert_eq!(handle.cycles_completed(), 1);

    // stop while holding: cancel goes out, the held set is not released
    handle.stop().await;
    let joined = tokio::time::timeout(Duration::from_secs(1), handle.join()).await;
    assert!(matches!(joined, Ok(None)));

    let calls = cluster.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[3].request.is_cancel());
    assert_eq!(handle.state(), ActorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_active_wait_joins_promptly() {
    let cluster = Arc::new(MockCluster::new(NodeId(1)));
    let mut handle = start(&cluster, "cephfs", fixed_config());

    // quiesce at 0s, release at 10s, active until 20s
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(handle.state(), ActorState::Idle);

    let stop_at = Instant::now();
    handle.stop().await;
    let joined = tokio::time::timeout(Duration::from_secs(1), handle.join()).await;

    assert!(matches!(joined, Ok(None)));
    assert!(stop_at.elapsed() < Duration::from_secs(1));

    let calls = cluster.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].request.is_quiesce());
    assert!(calls[1].request.is_release());
    assert!(calls[2].request.is_cancel());
}

#[tokio::test(start_paused = true)]
async fn test_leader_change_between_cycles() {
    let cluster = Arc::new(MockCluster::new(NodeId(1)));
    let mut handle = start(&cluster, "cephfs", fixed_config());

    tokio::time::sleep(Duration::from_secs(15)).await;
    cluster.set_leader(Some(NodeId(2)));
    tokio::time::sleep(Duration::from_secs(10)).await;

    // second quiesce hit the stale leader once, then followed the redirect
    let targets: Vec<NodeId> = cluster.calls().iter().map(|c| c.request.target).collect();
    assert_eq!(targets, vec![NodeId(1), NodeId(1), NodeId(1), NodeId(2)]);
    assert_eq!(handle.state(), ActorState::Holding);

    handle.stop().await;
    assert!(handle.join().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_actor_stops_cycling() {
    let cluster = Arc::new(MockCluster::new(NodeId(1)));
    cluster.fail_quiesce_with(-libc::EINVAL);
    let handle = start(&cluster, "cephfs", fixed_config());

    handle.wait_for_state(ActorState::Failed).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(cluster.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_group_surfaces_failure() {
    let healthy = Arc::new(MockCluster::new(NodeId(1)));
    let broken = Arc::new(MockCluster::new(NodeId(1)));
    broken.fail_quiesce_with(-5);

    let mut group = ThrasherGroup::new();
    group.push(start(&healthy, "good", fixed_config()));
    group.push(start(&broken, "bad", fixed_config()));

    tokio::time::sleep(Duration::from_secs(35)).await;
    let err = group.stop_all().await.unwrap_err();

    match &err {
        QuiesceError::ThrasherFailed { name, failed, total, source } => {
            assert_eq!(name, "quiescer.fs.[bad]");
            assert_eq!(*failed, 1);
            assert_eq!(*total, 2);
            assert!(matches!(**source, QuiesceError::Quiesce { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("5 (EIO)"));

    // the healthy actor kept cycling until stopped and was cancelled
    assert!(healthy.calls().iter().any(|c| c.request.is_release()));
    assert!(healthy.calls().last().unwrap().request.is_cancel());
    assert!(group.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_group_stop_all_clean() {
    let cluster = Arc::new(MockCluster::new(NodeId(3)));
    let mut group = ThrasherGroup::new();
    group.push(start(&cluster, "a", fixed_config()));
    group.push(start(&cluster, "b", fixed_config()));

    tokio::time::sleep(Duration::from_secs(45)).await;
    group.stop_all().await.unwrap();

    let cancels = cluster.calls().iter().filter(|c| c.request.is_cancel()).count();
    assert_eq!(cancels, 2);
}

#[tokio::test(start_paused = true)]
async fn test_redirect_without_leader_recovers() {
    let cluster = Arc::new(MockCluster::new(NodeId(4)));
    cluster.push_response(CommandOutput::new(-libc::ENOTTY, "{\"unexpected\": true}"));
    let mut handle = start(&cluster, "cephfs", fixed_config());

    // malformed redirect at 0s, backoff 5s, re-resolve, quiesce at 5s, release at 15s
    tokio::time::sleep(Duration::from_secs(16)).await;

    let calls = cluster.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[2].request.is_release());
    assert_eq!(cluster.topology_queries(), 2);
    assert_eq!(handle.cycles_completed(), 1);

    handle.stop().await;
    assert!(handle.join().await.is_none());
}
