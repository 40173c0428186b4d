use std::sync::Arc;
use std::time::Duration;

use bifrost_agent::agent::Agent;
use bifrost_agent::clock::SystemClock;
use bifrost_agent::healthcheck::{HealthPoller, InstanceHealthChecker};
use bifrost_agent::k8s::applier::ConfigApplier;
use bifrost_agent::session::HttpSession;
use bifrost_protocol::messages::MessageData;
use bifrost_protocol::session::{ManagementClient, SessionCallbacks};

use crate::fixtures::{
    agent_config, collector, pod, poller_config, remote_config, spawn_probe, wait_for_verdicts,
    ScriptedApplier,
};

fn idle_session() -> Arc<HttpSession> {
    Arc::new(HttpSession::new(
        Duration::from_secs(3600),
        Duration::from_secs(5),
    ))
}

#[tokio::test]
/// The health tree folds real probe verdicts into the live listing: a
/// probed pod reports its verdict, an unprobed pod counts against its
/// definition, and the live phase rides each entry.
async fn test_health_tree_merges_live_probes() {
    let probe = spawn_probe(200, Duration::ZERO).await;
    let applier = Arc::new(ScriptedApplier::default());
    let gateway = collector("default", "gateway", "app=gateway");
    let selector = gateway.selector();
    applier.instances.lock().unwrap().push(gateway);
    applier.pods.lock().unwrap().insert(
        selector.to_string(),
        vec![
            pod("default", "gateway-0", Some("127.0.0.1"), "Running"),
            pod("default", "gateway-1", None, "Pending"),
        ],
    );

    let poller = Arc::new(HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        poller_config(probe.port, Duration::from_millis(100)),
    ));
    poller.set_collectors(vec![selector.clone()]).await;
    wait_for_verdicts(poller.as_ref(), &selector, "probed verdict", |cached| {
        cached
            .get("default/gateway-0")
            .map_or(false, |verdict| verdict.healthy)
    })
    .await;

    let agent = Arc::new(Agent::new(
        agent_config("http://127.0.0.1:4320/v1/bridge"),
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        Arc::clone(&poller) as Arc<dyn InstanceHealthChecker>,
        idle_session() as Arc<dyn ManagementClient>,
        Arc::new(SystemClock),
    ));

    let health = agent.get_health().await;
    assert!(health.healthy);

    let child = &health.component_health_map["default/gateway"];
    assert!(!child.healthy);
    assert_eq!(child.status, "2/2");
    assert!(child.start_time_unix_nano > 0);
    assert_eq!(child.component_health_map.len(), 2);

    let probed = &child.component_health_map["default/gateway-0"];
    assert!(probed.healthy);
    assert_eq!(probed.status, "Running");

    let unprobed = &child.component_health_map["default/gateway-1"];
    assert!(!unprobed.healthy);
    assert_eq!(unprobed.status, "Pending");

    poller.close().await;
}

#[tokio::test]
/// Processing a remote configuration rebuilds the watched set from the
/// listing, and the poller's next cycles probe the instances behind it.
async fn test_reconcile_seeds_probes() {
    let probe = spawn_probe(200, Duration::ZERO).await;
    let applier = Arc::new(ScriptedApplier::default());
    let gateway = collector("default", "gateway", "app=gateway");
    let selector = gateway.selector();
    applier.instances.lock().unwrap().push(gateway);
    applier.pods.lock().unwrap().insert(
        selector.to_string(),
        vec![pod("default", "gateway-0", Some("127.0.0.1"), "Running")],
    );

    let poller = Arc::new(HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        poller_config(probe.port, Duration::from_millis(100)),
    ));
    let agent = Arc::new(Agent::new(
        agent_config("http://127.0.0.1:4320/v1/bridge"),
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        Arc::clone(&poller) as Arc<dyn InstanceHealthChecker>,
        idle_session() as Arc<dyn ManagementClient>,
        Arc::new(SystemClock),
    ));

    agent
        .on_message(MessageData {
            remote_config: Some(remote_config(&[("default/gateway", "receivers: {}")])),
            ..Default::default()
        })
        .await;
    assert_eq!(applier.applies(), vec!["default/gateway".to_string()]);

    let cached = wait_for_verdicts(
        poller.as_ref(),
        &selector,
        "probe after reconcile",
        |cached| !cached.is_empty(),
    )
    .await;
    assert!(cached["default/gateway-0"].healthy);

    poller.close().await;
}
