use std::sync::Arc;
use std::time::Duration;

use bifrost_agent::agent::Agent;
use bifrost_agent::clock::SystemClock;
use bifrost_agent::healthcheck::InstanceHealthChecker;
use bifrost_agent::k8s::applier::ConfigApplier;
use bifrost_agent::session::HttpSession;
use bifrost_protocol::messages::envelope::ServerToAgent;
use bifrost_protocol::messages::{AgentIdentification, RemoteConfigStatuses};
use bifrost_protocol::session::ManagementClient;

use crate::fixtures::{
    agent_config, collector, remote_config, spawn_management, wait_until, ManagementServer,
    NullChecker, ScriptedApplier,
};

/// Wires a fresh agent to the given server through a real HTTP session.
/// The caller starts it, so pre-start state can still be observed.
async fn bridge(
    server: &Arc<ManagementServer>,
    applier: &Arc<ScriptedApplier>,
    headers: &[(&str, &str)],
) -> Arc<Agent> {
    let endpoint = spawn_management(Arc::clone(server)).await;
    let mut config = agent_config(&endpoint);
    for (key, value) in headers {
        config.headers.insert(key.to_string(), value.to_string());
    }
    let session = Arc::new(HttpSession::new(
        Duration::from_secs(3600),
        Duration::from_secs(5),
    ));
    Arc::new(Agent::new(
        config,
        Arc::clone(applier) as Arc<dyn ConfigApplier>,
        Arc::new(NullChecker) as Arc<dyn InstanceHealthChecker>,
        session as Arc<dyn ManagementClient>,
        Arc::new(SystemClock),
    ))
}

#[tokio::test]
/// A pushed configuration is applied to the store, its status is reported
/// back with the pushed hash, and shutdown flushes one final unhealthy
/// report. Every request carries the configured headers.
async fn test_config_push_applies_and_reports() {
    let server = Arc::new(ManagementServer::default());
    let pushed = remote_config(&[("default/gateway", "receivers: {}")]);
    let pushed_hash = pushed.config_hash.clone();
    server.queue(ServerToAgent {
        remote_config: Some(pushed),
        ..Default::default()
    });

    let applier = Arc::new(ScriptedApplier::default());
    applier
        .instances
        .lock()
        .unwrap()
        .push(collector("default", "gateway", "app=gateway"));

    let agent = bridge(&server, &applier, &[("Authorization", "Bearer integration")]).await;
    agent.start().await.expect("agent start should succeed");

    wait_until("config application", || {
        applier.applies().contains(&"default/gateway".to_string())
    })
    .await;
    wait_until("status report", || {
        server
            .reports()
            .iter()
            .any(|report| report.remote_config_status.is_some())
    })
    .await;

    let reports = server.reports();
    assert_eq!(reports[0].instance_uid, agent.instance_id().to_string());
    let description = reports[0]
        .agent_description
        .as_ref()
        .expect("description should ride the first report");
    assert_eq!(description.attribute("service.name"), Some("bifrost-bridge"));
    let effective = reports[0]
        .effective_config
        .as_ref()
        .expect("effective config should ride the first report");
    assert!(effective.config_map.config_map.contains_key("default/gateway"));

    let status = reports
        .iter()
        .find_map(|report| report.remote_config_status.as_ref())
        .expect("no status reported");
    assert_eq!(status.status, RemoteConfigStatuses::Applied);
    assert_eq!(status.last_remote_config_hash, pushed_hash);
    assert!(server
        .auth_headers()
        .iter()
        .all(|header| header.as_deref() == Some("Bearer integration")));

    let before = server.report_count();
    agent.shutdown().await;
    assert!(server.report_count() > before);

    let reports = server.reports();
    let final_health = reports
        .last()
        .expect("no reports recorded")
        .health
        .as_ref()
        .expect("final report should carry health");
    assert!(!final_health.healthy);
    assert_eq!(final_health.last_error, "agent shutting down");
}

#[tokio::test]
/// The same push twice applies once; the stored status is resent
/// unchanged for the duplicate.
async fn test_duplicate_push_not_reapplied() {
    let server = Arc::new(ManagementServer::default());
    let pushed = remote_config(&[("default/gateway", "receivers: {}")]);
    server.queue(ServerToAgent {
        remote_config: Some(pushed.clone()),
        ..Default::default()
    });
    server.queue(ServerToAgent {
        remote_config: Some(pushed),
        ..Default::default()
    });

    let applier = Arc::new(ScriptedApplier::default());
    let agent = bridge(&server, &applier, &[]).await;
    agent.start().await.expect("agent start should succeed");

    // the third report can only post after the duplicate was dispatched
    wait_until("three reports", || server.report_count() >= 3).await;

    assert_eq!(applier.applies().len(), 1);
    assert!(applier.deletes().is_empty());

    let statuses: Vec<_> = server
        .reports()
        .iter()
        .filter_map(|report| report.remote_config_status.clone())
        .collect();
    assert!(statuses.len() >= 2);
    assert!(statuses.iter().all(|status| status == &statuses[0]));
    assert_eq!(statuses[0].status, RemoteConfigStatuses::Applied);

    agent.shutdown().await;
}

#[tokio::test]
/// A server-assigned identity reaches the agent core and stamps every
/// later report.
async fn test_identity_rotation_flows_through() {
    let server = Arc::new(ManagementServer::default());
    server.queue(ServerToAgent {
        agent_identification: Some(AgentIdentification {
            new_instance_uid: "11111111-2222-3333-4444-555555555555".to_string(),
        }),
        ..Default::default()
    });

    let applier = Arc::new(ScriptedApplier::default());
    let agent = bridge(&server, &applier, &[]).await;
    let original = agent.instance_id();
    agent.start().await.expect("agent start should succeed");

    wait_until("identity rotation", || agent.instance_id() != original).await;
    assert_eq!(
        agent.instance_id().to_string(),
        "11111111-2222-3333-4444-555555555555"
    );

    wait_until("post-rotation report", || server.report_count() >= 2).await;
    let reports = server.reports();
    assert_eq!(reports[0].instance_uid, original.to_string());
    assert_eq!(
        reports.last().expect("no reports recorded").instance_uid,
        "11111111-2222-3333-4444-555555555555"
    );

    agent.shutdown().await;
}
