/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Bridge Agent Core
//!
//! The reconciliation engine between the management server and the cluster.
//!
//! The agent owns the session callbacks: every server message arrives here
//! on the session's single dispatcher task. A remote configuration is
//! reconciled against the set of keys the agent currently owns (apply the
//! new and changed, delete the withdrawn), per-key failures are isolated
//! and aggregated into one status, and the map's hash is committed
//! unconditionally so the same payload is never reprocessed. The agent
//! also assembles the recursive health report from the store's listing and
//! the health poller's cache, and drives the heartbeat loop.

use async_trait::async_trait;
use bifrost_utils::logging::prelude::*;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use bifrost_protocol::messages::{
    AgentCapabilities, AgentConfigFile, AgentConfigMap, AgentDescription, AgentRemoteConfig,
    ComponentHealth, EffectiveConfig, MessageData, RemoteConfigStatus, RemoteConfigStatuses,
    ServerErrorResponse, TelemetryConnectionSettings,
};
use bifrost_protocol::session::{ManagementClient, SessionCallbacks, SessionError, StartSettings};
use bifrost_protocol::time::to_unix_nano;

use crate::clock::Clock;
use crate::healthcheck::InstanceHealthChecker;
use crate::k8s::applier::ConfigApplier;
use crate::keys::{body_digest, ResourceKey};
use crate::metrics;
use crate::reporter::MetricReporter;

/// Construction parameters for the agent core.
pub struct AgentConfig {
    /// Identifying service name, also reported on the reporter's resource.
    pub service_name: String,
    /// Reported service version.
    pub service_version: String,
    /// Management server endpoint the session posts to.
    pub endpoint: String,
    /// Headers attached to every session request.
    pub headers: BTreeMap<String, String>,
    /// Advertised capability mask.
    pub capabilities: AgentCapabilities,
    /// Advertised agent description.
    pub description: AgentDescription,
    /// Heartbeat cadence; zero disables the loop.
    pub heartbeat_interval: Duration,
}

/// Reconciliation state guarded by one mutex.
///
/// `applied` maps each owned key to the digest of the body last applied
/// for it; its key set is the set of definitions this agent owns. The
/// stored status carries the hash of the most recently processed map,
/// which is the duplicate guard.
#[derive(Default)]
struct ReconcileState {
    applied: HashMap<ResourceKey, Vec<u8>>,
    last_status: RemoteConfigStatus,
}

/// The bridge agent.
pub struct Agent {
    config: AgentConfig,
    applier: Arc<dyn ConfigApplier>,
    checker: Arc<dyn InstanceHealthChecker>,
    client: Arc<dyn ManagementClient>,
    clock: Arc<dyn Clock>,
    start_time: DateTime<Utc>,
    state: Mutex<ReconcileState>,
    instance_id: Mutex<Uuid>,
    reporter: Mutex<Option<MetricReporter>>,
    shutdown: broadcast::Sender<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        applier: Arc<dyn ConfigApplier>,
        checker: Arc<dyn InstanceHealthChecker>,
        client: Arc<dyn ManagementClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let start_time = clock.now();
        let (shutdown, _) = broadcast::channel(1);
        Agent {
            config,
            applier,
            checker,
            client,
            clock,
            start_time,
            state: Mutex::new(ReconcileState::default()),
            instance_id: Mutex::new(Uuid::new_v4()),
            reporter: Mutex::new(None),
            shutdown,
            heartbeat: Mutex::new(None),
        }
    }

    /// Current session identity; rotated when the server instructs.
    pub fn instance_id(&self) -> Uuid {
        *self
            .instance_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, ReconcileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends the description, opens the session with this agent as the
    /// callback handler, reports initial health, seeds the poller's
    /// watched selectors, and spawns the heartbeat.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        info!("Starting bridge agent '{}'", self.config.service_name);

        self.client
            .set_agent_description(self.config.description.clone())
            .await?;

        let remote_config_status = {
            let state = self.lock_state();
            if state.last_status.status == RemoteConfigStatuses::Unset {
                None
            } else {
                Some(state.last_status.clone())
            }
        };
        self.client
            .start(StartSettings {
                endpoint: self.config.endpoint.clone(),
                headers: self.config.headers.clone(),
                instance_uid: self.instance_id().to_string(),
                capabilities: self.config.capabilities,
                remote_config_status,
                callbacks: Arc::clone(self) as Arc<dyn SessionCallbacks>,
            })
            .await?;

        self.client.set_health(self.get_health().await).await?;
        self.resync_selectors().await;
        self.spawn_heartbeat();
        Ok(())
    }

    /// Signals the heartbeat, reports one final unhealthy status, stops
    /// the session, and shuts the metric reporter down.
    pub async fn shutdown(&self) {
        info!("Bridge agent shutting down");
        let _ = self.shutdown.send(());

        let final_health = ComponentHealth {
            healthy: false,
            start_time_unix_nano: to_unix_nano(&self.start_time).unwrap_or_default(),
            status_time_unix_nano: to_unix_nano(&self.clock.now()).unwrap_or_default(),
            last_error: "agent shutting down".to_string(),
            ..Default::default()
        };
        if let Err(e) = self.client.set_health(final_health).await {
            warn!("Failed to report final health: {}", e);
        }
        if let Err(e) = self.client.stop().await {
            warn!("Failed to stop the session cleanly: {}", e);
        }

        let heartbeat = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        let reporter = self
            .reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reporter) = reporter {
            reporter.shutdown();
        }
    }

    /// Reconciles the cluster against one inbound remote configuration.
    ///
    /// All applies run before any delete. A key whose body digest matches
    /// what was last applied for it is left untouched. Failures are
    /// isolated per key and aggregated; the inbound hash is committed
    /// unconditionally, so a map is processed at most once per hash.
    async fn apply_remote_config(&self, remote: &AgentRemoteConfig) -> RemoteConfigStatus {
        info!(
            "Processing remote configuration with {} entries",
            remote.config.config_map.len()
        );
        let mut next_applied = self.lock_state().applied.clone();
        let mut errors: Vec<String> = Vec::new();

        for (raw_key, file) in &remote.config.config_map {
            if raw_key.is_empty() {
                debug!("Skipping entry with an empty key");
                continue;
            }
            if file.body.is_empty() {
                debug!("Skipping entry '{}' with an empty body", raw_key);
                continue;
            }
            let key = match ResourceKey::from_str(raw_key) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping malformed key '{}': {}", raw_key, e);
                    errors.push(format!("{}: {}", raw_key, e));
                    continue;
                }
            };

            let digest = body_digest(&file.body);
            if next_applied.get(&key) == Some(&digest) {
                trace!("Config for '{}' unchanged, skipping apply", key);
                continue;
            }

            let timer = metrics::apply_duration_seconds()
                .with_label_values(&[])
                .start_timer();
            let result = self.applier.apply(key.name(), key.namespace(), file).await;
            timer.observe_duration();
            match result {
                Ok(()) => {
                    metrics::remote_config_operations_total()
                        .with_label_values(&["apply", "success"])
                        .inc();
                    next_applied.insert(key, digest);
                }
                Err(e) => {
                    metrics::remote_config_operations_total()
                        .with_label_values(&["apply", "failure"])
                        .inc();
                    error!("Failed to apply config for '{}': {}", key, e);
                    errors.push(format!("{}: {}", key, e));
                }
            }
        }

        // Withdraw owned keys the server no longer sends. Presence of the
        // raw key string is what keeps a resource alive, so an entry that
        // was skipped above (empty body) still protects its resource.
        let owned: Vec<ResourceKey> = next_applied.keys().cloned().collect();
        for key in owned {
            if remote.config.config_map.contains_key(&key.to_string()) {
                continue;
            }
            match self.applier.delete(key.name(), key.namespace()).await {
                Ok(()) => {
                    metrics::remote_config_operations_total()
                        .with_label_values(&["delete", "success"])
                        .inc();
                    next_applied.remove(&key);
                }
                Err(e) => {
                    metrics::remote_config_operations_total()
                        .with_label_values(&["delete", "failure"])
                        .inc();
                    error!("Failed to delete '{}': {}", key, e);
                    errors.push(format!("{}: {}", key, e));
                }
            }
        }

        let status = RemoteConfigStatus {
            last_remote_config_hash: remote.config_hash.clone(),
            status: if errors.is_empty() {
                RemoteConfigStatuses::Applied
            } else {
                RemoteConfigStatuses::Failed
            },
            error_message: errors.join("\n"),
        };

        // Single commit: the new key set, the hash, and the outcome land
        // together whatever happened above.
        {
            let mut state = self.lock_state();
            state.applied = next_applied;
            state.last_status = status.clone();
            metrics::applied_keys().set(state.applied.len() as i64);
        }
        status
    }

    async fn handle_message(&self, msg: MessageData) {
        if let Some(remote) = msg.remote_config.as_ref() {
            if !self
                .config
                .capabilities
                .contains(AgentCapabilities::ACCEPTS_REMOTE_CONFIG)
            {
                debug!("Ignoring remote configuration: capability disabled");
            } else {
                let stored = {
                    let state = self.lock_state();
                    if state.last_status.status != RemoteConfigStatuses::Unset
                        && state.last_status.last_remote_config_hash == remote.config_hash
                    {
                        debug!("Remote configuration hash unchanged, not reprocessing");
                        Some(state.last_status.clone())
                    } else {
                        None
                    }
                };
                let changed = stored.is_none();
                let status = match stored {
                    Some(status) => status,
                    None => self.apply_remote_config(remote).await,
                };
                if let Err(e) = self.client.set_remote_config_status(status).await {
                    error!("Failed to report remote configuration status: {}", e);
                    return;
                }
                if let Err(e) = self.client.update_effective_config().await {
                    error!("Failed to refresh the effective configuration: {}", e);
                }
                if changed {
                    self.resync_selectors().await;
                }
            }
        }

        // Identity rotates before any telemetry reinitialization so a new
        // reporter is born under the new id.
        if let Some(identification) = msg.agent_identification.as_ref() {
            match Uuid::parse_str(&identification.new_instance_uid) {
                Ok(new_id) => {
                    let mut id = self
                        .instance_id
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    info!("Instance identity rotated from {} to {}", *id, new_id);
                    *id = new_id;
                }
                Err(e) => {
                    error!(
                        "Server sent an unparseable instance uid '{}': {}",
                        identification.new_instance_uid, e
                    );
                    return;
                }
            }
        }

        if let Some(settings) = msg.own_metrics_conn_settings.as_ref() {
            self.swap_reporter(settings);
        }
    }

    /// Builds a reporter for the offered settings and swaps it in; the
    /// previous reporter is shut down only after the replacement is live.
    /// A construction failure keeps the previous reporter running.
    fn swap_reporter(&self, settings: &TelemetryConnectionSettings) {
        let reporter = MetricReporter::new(
            settings,
            &self.config.service_name,
            &self.config.service_version,
            self.instance_id(),
            self.start_time,
        );
        match reporter {
            Ok(reporter) => {
                let previous = self
                    .reporter
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(reporter);
                if let Some(previous) = previous {
                    previous.shutdown();
                }
            }
            Err(e) => error!("Failed to start the own-metrics reporter: {}", e),
        }
    }

    /// Assembles the recursive health report.
    ///
    /// Root is the agent itself; each listed definition is a child whose
    /// grandchildren merge the poller's cached verdicts with the live pod
    /// phase and start time. A definition with no live instances is
    /// vacuously healthy. A listing failure yields an unhealthy root
    /// carrying the error; this never returns an error itself.
    pub async fn get_health(&self) -> ComponentHealth {
        let status_time = to_unix_nano(&self.clock.now()).unwrap_or_default();
        let start_time = to_unix_nano(&self.start_time).unwrap_or_default();

        let instances = match self.applier.list_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                return ComponentHealth {
                    healthy: false,
                    start_time_unix_nano: start_time,
                    status_time_unix_nano: status_time,
                    last_error: format!("failed to list managed instances: {}", e),
                    ..Default::default()
                };
            }
        };

        let mut children = BTreeMap::new();
        for collector in &instances {
            let child_key = format!("{}/{}", collector.namespace(), collector.name());
            let selector = collector.selector();
            let cached = self.checker.get_component_health(&selector).await;

            let pods = match self
                .applier
                .get_collector_pods(&selector, &collector.namespace())
                .await
            {
                Ok(pods) => pods,
                Err(e) => {
                    warn!("Failed to list pods for '{}': {}", child_key, e);
                    Vec::new()
                }
            };

            let mut pod_health = BTreeMap::new();
            for pod in &pods {
                let pod_key = format!("{}/{}", pod.namespace, pod.name);
                let mut entry = cached.get(&pod_key).cloned().unwrap_or_default();
                // live phase and start time win over the cached copy
                entry.status = pod.phase.clone();
                if let Some(start) = pod.start_time.as_ref() {
                    entry.start_time_unix_nano =
                        to_unix_nano(start).unwrap_or(entry.start_time_unix_nano);
                }
                entry.status_time_unix_nano = status_time;
                pod_health.insert(pod_key, entry);
            }

            let healthy = pod_health.values().all(|p| p.healthy);
            children.insert(
                child_key,
                ComponentHealth {
                    healthy,
                    start_time_unix_nano: collector
                        .creation_timestamp()
                        .map(|t| to_unix_nano(&t).unwrap_or_default())
                        .unwrap_or_default(),
                    status_time_unix_nano: status_time,
                    status: collector.replica_summary(),
                    last_error: String::new(),
                    component_health_map: pod_health,
                },
            );
        }

        ComponentHealth {
            healthy: true,
            start_time_unix_nano: start_time,
            status_time_unix_nano: status_time,
            component_health_map: children,
            ..Default::default()
        }
    }

    /// Rebuilds the poller's watched-selector set from the store's
    /// current listing.
    async fn resync_selectors(&self) {
        match self.applier.list_instances().await {
            Ok(instances) => {
                let selectors = instances.iter().map(|c| c.selector()).collect();
                self.checker.set_collectors(selectors).await;
            }
            Err(e) => warn!("Failed to resync watched selectors: {}", e),
        }
    }

    /// Recomputes the effective configuration from the store's listing,
    /// never from any applied delta.
    async fn effective_config(&self) -> Result<EffectiveConfig, SessionError> {
        let instances = self
            .applier
            .list_instances()
            .await
            .map_err(|e| SessionError::Callback(e.to_string()))?;

        let mut config_map = BTreeMap::new();
        for collector in &instances {
            let key = format!("{}/{}", collector.namespace(), collector.name());
            match collector.to_yaml() {
                Ok(body) => {
                    config_map.insert(key, AgentConfigFile::yaml(body));
                }
                Err(e) => warn!("Failed to render '{}' for the effective config: {}", key, e),
            }
        }
        Ok(EffectiveConfig {
            config_map: AgentConfigMap { config_map },
        })
    }

    /// Spawns the heartbeat loop unless the interval is zero. Each tick
    /// reports fresh health; a send failure terminates the loop.
    fn spawn_heartbeat(self: &Arc<Self>) {
        if self.config.heartbeat_interval.is_zero() {
            info!("Heartbeat disabled (zero interval)");
            return;
        }
        let agent = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let interval = self.config.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let health = agent.get_health().await;
                        if let Err(e) = agent.client.set_health(health).await {
                            error!("Heartbeat failed, stopping the loop: {}", e);
                            break;
                        }
                        metrics::heartbeat_sent_total().inc();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Heartbeat loop stopped");
        });
        *self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

#[async_trait]
impl SessionCallbacks for Agent {
    async fn on_connect(&self) {
        info!("Management session established");
    }

    async fn on_connect_failed(&self, err: SessionError) {
        error!("Failed to establish the management session: {}", err);
    }

    async fn on_error(&self, err: ServerErrorResponse) {
        error!("Management server rejected a report: {}", err);
    }

    async fn on_message(&self, msg: MessageData) {
        self.handle_message(msg).await;
    }

    async fn save_remote_config_status(&self, status: RemoteConfigStatus) {
        self.lock_state().last_status = status;
    }

    async fn get_effective_config(&self) -> Result<EffectiveConfig, SessionError> {
        self.effective_config().await
    }
}
