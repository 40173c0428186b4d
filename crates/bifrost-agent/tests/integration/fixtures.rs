use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use bifrost_agent::agent::AgentConfig;
use bifrost_agent::healthcheck::{InstanceHealthChecker, PollerConfig};
use bifrost_agent::k8s::applier::{ApplyError, ConfigApplier};
use bifrost_agent::k8s::objects::{Collector, PodRef};
use bifrost_agent::keys::{config_hash, Selector};
use bifrost_protocol::messages::envelope::{AgentToServer, ServerToAgent};
use bifrost_protocol::messages::{
    AgentCapabilities, AgentConfigFile, AgentConfigMap, AgentDescription, AgentRemoteConfig,
    ComponentHealth,
};

/// Store double with scripted listings and recorded mutations.
#[derive(Default)]
pub struct ScriptedApplier {
    pub instances: Mutex<Vec<Collector>>,
    pub pods: Mutex<HashMap<String, Vec<PodRef>>>,
    applies: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
}

impl ScriptedApplier {
    pub fn applies(&self) -> Vec<String> {
        self.applies.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigApplier for ScriptedApplier {
    async fn apply(
        &self,
        name: &str,
        namespace: &str,
        _config: &AgentConfigFile,
    ) -> Result<(), ApplyError> {
        self.applies
            .lock()
            .unwrap()
            .push(format!("{}/{}", namespace, name));
        Ok(())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ApplyError> {
        self.deletes
            .lock()
            .unwrap()
            .push(format!("{}/{}", namespace, name));
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<Collector>, ApplyError> {
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn get_collector_pods(
        &self,
        selector: &Selector,
        _namespace: &str,
    ) -> Result<Vec<PodRef>, ApplyError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&selector.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

/// Health checker that watches nothing, for flows that exercise the
/// session rather than the poller.
pub struct NullChecker;

#[async_trait]
impl InstanceHealthChecker for NullChecker {
    async fn set_collectors(&self, _selectors: Vec<Selector>) {}

    async fn get_component_health(
        &self,
        _selector: &Selector,
    ) -> BTreeMap<String, ComponentHealth> {
        BTreeMap::new()
    }
}

/// In-process management server: records every report and answers each
/// with the next queued response, defaulting to an empty one.
#[derive(Default)]
pub struct ManagementServer {
    reports: Mutex<Vec<AgentToServer>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    responses: Mutex<VecDeque<ServerToAgent>>,
}

impl ManagementServer {
    pub fn queue(&self, response: ServerToAgent) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn reports(&self) -> Vec<AgentToServer> {
        self.reports.lock().unwrap().clone()
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().unwrap().clone()
    }
}

async fn handle_report(
    State(server): State<Arc<ManagementServer>>,
    headers: HeaderMap,
    Json(report): Json<AgentToServer>,
) -> Json<ServerToAgent> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    server.auth_headers.lock().unwrap().push(auth);
    server.reports.lock().unwrap().push(report);
    let next = server
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_default();
    Json(next)
}

pub async fn spawn_management(server: Arc<ManagementServer>) -> String {
    let app = Router::new()
        .route("/v1/bridge", post(handle_report))
        .with_state(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    format!("http://{}/v1/bridge", addr)
}

struct ProbeState {
    status: Arc<AtomicU16>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Local stand-in for the instances' health endpoints. The served status
/// can be flipped mid-test, and the high-water mark of concurrent probes
/// is recorded.
pub struct ProbeServer {
    pub port: u16,
    status: Arc<AtomicU16>,
    max_in_flight: Arc<AtomicUsize>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProbeServer {
    pub fn set_status(&self, code: u16) {
        self.status.store(code, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_probe(State(state): State<Arc<ProbeState>>) -> StatusCode {
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    StatusCode::from_u16(state.status.load(Ordering::SeqCst)).expect("bad probe status")
}

pub async fn spawn_probe(status: u16, delay: Duration) -> ProbeServer {
    let status = Arc::new(AtomicU16::new(status));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(ProbeState {
        status: Arc::clone(&status),
        delay,
        in_flight: Arc::new(AtomicUsize::new(0)),
        max_in_flight: Arc::clone(&max_in_flight),
    });
    let app = Router::new()
        .route("/healthz", get(handle_probe))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let port = listener.local_addr().expect("no local addr").port();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .expect("probe server failed");
    });
    ProbeServer {
        port,
        status,
        max_in_flight,
        shutdown: Mutex::new(Some(tx)),
    }
}

pub fn collector(namespace: &str, name: &str, selector: &str) -> Collector {
    let yaml = format!(
        "apiVersion: bifrost.io/v1alpha1\nkind: Collector\nmetadata:\n  name: {}\n  namespace: {}\n  creationTimestamp: \"2025-01-01T00:00:00Z\"\nstatus:\n  scale:\n    selector: {}\n    statusReplicas: \"2/2\"\n",
        name, namespace, selector
    );
    Collector::from_object(serde_yaml::from_str(&yaml).expect("bad collector fixture"))
}

pub fn pod(namespace: &str, name: &str, ip: Option<&str>, phase: &str) -> PodRef {
    PodRef {
        name: name.to_string(),
        namespace: namespace.to_string(),
        ip: ip.map(str::to_string),
        phase: phase.to_string(),
        start_time: Some(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()),
    }
}

pub fn remote_config(entries: &[(&str, &str)]) -> AgentRemoteConfig {
    let mut config_map = BTreeMap::new();
    for (key, body) in entries {
        config_map.insert(key.to_string(), AgentConfigFile::yaml(*body));
    }
    let config_hash = config_hash(&config_map);
    AgentRemoteConfig {
        config: AgentConfigMap { config_map },
        config_hash,
    }
}

pub fn full_capabilities() -> AgentCapabilities {
    let mut names = BTreeMap::new();
    names.insert("reports_status".to_string(), true);
    names.insert("accepts_remote_config".to_string(), true);
    names.insert("reports_effective_config".to_string(), true);
    names.insert("reports_health".to_string(), true);
    AgentCapabilities::from_names(&names)
}

pub fn poller_config(port: u16, interval: Duration) -> PollerConfig {
    PollerConfig {
        interval,
        port,
        path: "/healthz".to_string(),
        timeout: Duration::from_secs(1),
        workers: 2,
    }
}

pub fn agent_config(endpoint: &str) -> AgentConfig {
    AgentConfig {
        service_name: "bifrost-bridge".to_string(),
        service_version: "0.1.0".to_string(),
        endpoint: endpoint.to_string(),
        headers: BTreeMap::new(),
        capabilities: full_capabilities(),
        description: AgentDescription::new("bifrost-bridge", Some("0.1.0"), &BTreeMap::new()),
        heartbeat_interval: Duration::ZERO,
    }
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Polls the checker's cache until the verdicts satisfy `done`, returning
/// the satisfying snapshot.
pub async fn wait_for_verdicts(
    checker: &dyn InstanceHealthChecker,
    selector: &Selector,
    what: &str,
    mut done: impl FnMut(&BTreeMap<String, ComponentHealth>) -> bool,
) -> BTreeMap<String, ComponentHealth> {
    for _ in 0..300 {
        let cached = checker.get_component_health(selector).await;
        if done(&cached) {
            return cached;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
