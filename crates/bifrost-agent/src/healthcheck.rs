/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Instance Health Poller
//!
//! Background poller that probes every live instance behind the watched
//! selectors and keeps the latest verdicts in a cache the agent folds into
//! its health reports.
//!
//! Each cycle the ticker resolves the pods for every watched selector and
//! fans the probes out to a fixed pool of workers over a bounded queue, so
//! a large fleet never produces more than `workers` concurrent probes. A
//! probe that never completes (timeout, refused connection) leaves the
//! previous cached verdict in place; only a completed probe overwrites it.

use async_trait::async_trait;
use bifrost_utils::logging::prelude::*;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use bifrost_protocol::messages::ComponentHealth;
use bifrost_protocol::time::to_unix_nano;

use crate::k8s::applier::ConfigApplier;
use crate::k8s::objects::PodRef;
use crate::keys::Selector;
use crate::metrics;

/// Latest probe results per watched selector, keyed by the probed pod's
/// `namespace/name`.
type HealthCache = HashMap<Selector, BTreeMap<String, ComponentHealth>>;

/// Read side of the poller: the agent swaps the watched set after every
/// reconcile and reads cached verdicts when it assembles a health report.
#[async_trait]
pub trait InstanceHealthChecker: Send + Sync {
    /// Replaces the watched selector set. Newly added selectors are probed
    /// from the next cycle; selectors no longer present are purged along
    /// with their cached results.
    async fn set_collectors(&self, selectors: Vec<Selector>);

    /// Latest cached verdicts for one selector, keyed by `namespace/name`
    /// of the probed pod. Unknown selectors yield an empty map.
    async fn get_component_health(
        &self,
        selector: &Selector,
    ) -> BTreeMap<String, ComponentHealth>;
}

/// Tuning for the poll loop and its probe workers.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Cadence of the poll cycle
    pub interval: Duration,
    /// Port probed on each instance
    pub port: u16,
    /// Path probed on each instance
    pub path: String,
    /// Per-probe HTTP timeout
    pub timeout: Duration,
    /// Concurrency ceiling for outbound probes
    pub workers: usize,
}

struct ProbeTask {
    selector: Selector,
    pod: PodRef,
}

/// Concurrent fleet-health poller.
pub struct HealthPoller {
    cache: Arc<RwLock<HealthCache>>,
    work: Mutex<Option<mpsc::Sender<ProbeTask>>>,
    shutdown: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthPoller {
    /// Spawns the poll ticker and its probe workers.
    pub fn start(applier: Arc<dyn ConfigApplier>, config: PollerConfig) -> Self {
        let cache = Arc::new(RwLock::new(HealthCache::new()));
        let (shutdown, _) = broadcast::channel(1);
        let workers = config.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel::<ProbeTask>(workers * 2);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let client = reqwest::Client::new();

        let mut handles = Vec::with_capacity(workers + 1);
        for worker in 0..workers {
            let work_rx = Arc::clone(&work_rx);
            let cache = Arc::clone(&cache);
            let client = client.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    // Lock only around recv so probes run in parallel.
                    let task = {
                        let mut rx = work_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else { break };
                    probe_pod(&client, &cache, &config, task).await;
                }
                trace!("Probe worker {} stopped", worker);
            }));
        }

        let ticker_cache = Arc::clone(&cache);
        let mut shutdown_rx = shutdown.subscribe();
        let tx = work_tx.clone();
        let interval = config.interval;
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_poll_cycle(applier.as_ref(), &ticker_cache, &tx).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            trace!("Health poll ticker stopped");
        }));

        HealthPoller {
            cache,
            work: Mutex::new(Some(work_tx)),
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Stops the ticker, lets the workers run the queue dry, and joins
    /// every task. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.shutdown.send(());
        // The workers exit once every sender is gone: ours here, the
        // ticker's when its task ends.
        self.work.lock().await.take();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("Health poller stopped");
    }
}

#[async_trait]
impl InstanceHealthChecker for HealthPoller {
    async fn set_collectors(&self, selectors: Vec<Selector>) {
        let mut cache = self.cache.write().await;
        cache.retain(|selector, _| selectors.contains(selector));
        for selector in selectors {
            cache.entry(selector).or_default();
        }
        metrics::watched_selectors().set(cache.len() as i64);
    }

    async fn get_component_health(
        &self,
        selector: &Selector,
    ) -> BTreeMap<String, ComponentHealth> {
        self.cache
            .read()
            .await
            .get(selector)
            .cloned()
            .unwrap_or_default()
    }
}

/// One poll cycle: resolve the pods behind every watched selector and queue
/// a probe for each pod that already has an IP.
async fn run_poll_cycle(
    applier: &dyn ConfigApplier,
    cache: &RwLock<HealthCache>,
    work: &mpsc::Sender<ProbeTask>,
) {
    let selectors: Vec<Selector> = cache.read().await.keys().cloned().collect();
    trace!("Starting poll cycle over {} selectors", selectors.len());

    for selector in selectors {
        let pods = match applier.get_collector_pods(&selector, "").await {
            Ok(pods) => pods,
            Err(e) => {
                warn!("Failed to resolve pods for selector '{}': {}", selector, e);
                continue;
            }
        };
        for pod in pods {
            if pod.ip.is_none() {
                trace!(
                    "Skipping pod '{}/{}' without an assigned IP",
                    pod.namespace,
                    pod.name
                );
                continue;
            }
            let task = ProbeTask {
                selector: selector.clone(),
                pod,
            };
            // Bounded queue: a full pool pushes back on the cycle instead
            // of piling up probes.
            if work.send(task).await.is_err() {
                return;
            }
        }
    }
}

/// Probes one pod and records the verdict. Transport failures keep the
/// previous verdict; a selector purged mid-flight is never resurrected.
async fn probe_pod(
    client: &reqwest::Client,
    cache: &RwLock<HealthCache>,
    config: &PollerConfig,
    task: ProbeTask,
) {
    let ProbeTask { selector, pod } = task;
    let Some(ip) = pod.ip.as_deref() else { return };

    let start_time_unix_nano = match pod.start_time.as_ref().map(to_unix_nano).transpose() {
        Ok(t) => t.unwrap_or_default(),
        Err(e) => {
            debug!(
                "Unusable start time on pod '{}/{}': {}",
                pod.namespace, pod.name, e
            );
            metrics::probe_results_total()
                .with_label_values(&["error"])
                .inc();
            return;
        }
    };

    let url = format!("http://{}:{}{}", ip, config.port, config.path);
    let healthy = match client.get(&url).timeout(config.timeout).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!(
                "Probe for pod '{}/{}' did not complete: {}",
                pod.namespace, pod.name, e
            );
            metrics::probe_results_total()
                .with_label_values(&["error"])
                .inc();
            return;
        }
    };
    metrics::probe_results_total()
        .with_label_values(&[if healthy { "healthy" } else { "unhealthy" }])
        .inc();

    let entry = ComponentHealth {
        healthy,
        start_time_unix_nano,
        status_time_unix_nano: to_unix_nano(&Utc::now()).unwrap_or_default(),
        last_error: if healthy {
            String::new()
        } else {
            format!("health probe of {} returned a non-2xx status", url)
        },
        status: pod.phase.clone(),
        component_health_map: BTreeMap::new(),
    };

    let mut cache = cache.write().await;
    if let Some(components) = cache.get_mut(&selector) {
        components.insert(format!("{}/{}", pod.namespace, pod.name), entry);
    }
}
