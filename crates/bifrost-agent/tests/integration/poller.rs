use std::sync::Arc;
use std::time::Duration;

use bifrost_agent::healthcheck::{HealthPoller, InstanceHealthChecker};
use bifrost_agent::k8s::applier::ConfigApplier;
use bifrost_agent::keys::Selector;

use crate::fixtures::{pod, poller_config, spawn_probe, wait_for_verdicts, ScriptedApplier};

#[tokio::test]
/// Probes against a live endpoint land in the cache with the pod's phase
/// and start time; a pod without an assigned IP is never probed.
async fn test_probe_verdicts_cached() {
    let probe = spawn_probe(200, Duration::ZERO).await;
    let applier = Arc::new(ScriptedApplier::default());
    let selector = Selector::parse("app=gateway");
    applier.pods.lock().unwrap().insert(
        selector.to_string(),
        vec![
            pod("default", "gateway-0", Some("127.0.0.1"), "Running"),
            pod("default", "gateway-1", None, "Pending"),
        ],
    );

    let poller = HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        poller_config(probe.port, Duration::from_millis(100)),
    );
    poller.set_collectors(vec![selector.clone()]).await;

    let cached = wait_for_verdicts(&poller, &selector, "first verdict", |cached| {
        !cached.is_empty()
    })
    .await;
    assert_eq!(cached.len(), 1);
    let verdict = &cached["default/gateway-0"];
    assert!(verdict.healthy);
    assert_eq!(verdict.status, "Running");
    assert!(verdict.start_time_unix_nano > 0);
    assert!(verdict.last_error.is_empty());

    poller.close().await;
}

#[tokio::test]
/// A probe that completes with a failure status overwrites the previous
/// verdict; the error names the endpoint.
async fn test_completed_probe_overwrites_verdict() {
    let probe = spawn_probe(200, Duration::ZERO).await;
    let applier = Arc::new(ScriptedApplier::default());
    let selector = Selector::parse("app=gateway");
    applier.pods.lock().unwrap().insert(
        selector.to_string(),
        vec![pod("default", "gateway-0", Some("127.0.0.1"), "Running")],
    );

    let poller = HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        poller_config(probe.port, Duration::from_millis(100)),
    );
    poller.set_collectors(vec![selector.clone()]).await;
    wait_for_verdicts(&poller, &selector, "healthy verdict", |cached| {
        cached
            .get("default/gateway-0")
            .map_or(false, |verdict| verdict.healthy)
    })
    .await;

    probe.set_status(503);
    let cached = wait_for_verdicts(&poller, &selector, "unhealthy verdict", |cached| {
        cached
            .get("default/gateway-0")
            .map_or(false, |verdict| !verdict.healthy)
    })
    .await;
    let verdict = &cached["default/gateway-0"];
    assert!(verdict.last_error.contains("non-2xx"));
    assert_eq!(verdict.status, "Running");

    poller.close().await;
}

#[tokio::test]
/// A probe that never completes leaves the previous verdict in place
/// instead of flapping the instance to unhealthy.
async fn test_unreachable_probe_keeps_verdict() {
    let probe = spawn_probe(200, Duration::ZERO).await;
    let applier = Arc::new(ScriptedApplier::default());
    let selector = Selector::parse("app=gateway");
    applier.pods.lock().unwrap().insert(
        selector.to_string(),
        vec![pod("default", "gateway-0", Some("127.0.0.1"), "Running")],
    );

    let poller = HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        poller_config(probe.port, Duration::from_millis(100)),
    );
    poller.set_collectors(vec![selector.clone()]).await;
    wait_for_verdicts(&poller, &selector, "healthy verdict", |cached| {
        cached
            .get("default/gateway-0")
            .map_or(false, |verdict| verdict.healthy)
    })
    .await;

    probe.stop();
    // several more cycles run against the dead endpoint
    tokio::time::sleep(Duration::from_millis(400)).await;

    let cached = poller.get_component_health(&selector).await;
    let verdict = cached
        .get("default/gateway-0")
        .expect("verdict should survive the outage");
    assert!(verdict.healthy);

    poller.close().await;
}

#[tokio::test]
/// A large fleet is probed by the fixed worker pool, never all at once.
async fn test_probe_concurrency_bounded() {
    let probe = spawn_probe(200, Duration::from_millis(50)).await;
    let applier = Arc::new(ScriptedApplier::default());
    let selector = Selector::parse("app=fleet");
    let pods = (0..6)
        .map(|i| pod("default", &format!("fleet-{}", i), Some("127.0.0.1"), "Running"))
        .collect();
    applier.pods.lock().unwrap().insert(selector.to_string(), pods);

    let poller = HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        poller_config(probe.port, Duration::from_millis(150)),
    );
    poller.set_collectors(vec![selector.clone()]).await;

    let cached = wait_for_verdicts(&poller, &selector, "full fleet probed", |cached| {
        cached.len() == 6
    })
    .await;
    assert!(cached.values().all(|verdict| verdict.healthy));
    assert!(
        probe.max_in_flight() <= 2,
        "observed {} concurrent probes with 2 workers",
        probe.max_in_flight()
    );

    poller.close().await;
}
