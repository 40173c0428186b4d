/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! This module provides Prometheus metrics for the Bifrost Agent.
//! It exposes metrics about remote configuration reconciliation, instance
//! health probing, and the management session.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all agent metrics
static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Remote configuration operation counter
/// Labels: operation (apply/delete), status (success/failure)
pub fn remote_config_operations_total() -> &'static CounterVec {
    static COUNTER: OnceLock<CounterVec> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "bifrost_agent_remote_config_operations_total",
            "Total number of remote configuration operations by type and outcome",
        );
        let counter = CounterVec::new(opts, &["operation", "status"])
            .expect("Failed to create remote config operations counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register remote config operations counter");
        counter
    })
}

/// Remote configuration apply duration histogram
pub fn apply_duration_seconds() -> &'static HistogramVec {
    static HISTOGRAM: OnceLock<HistogramVec> = OnceLock::new();
    HISTOGRAM.get_or_init(|| {
        let opts = HistogramOpts::new(
            "bifrost_agent_apply_duration_seconds",
            "Remote configuration apply latency distribution in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]);
        let histogram =
            HistogramVec::new(opts, &[]).expect("Failed to create apply duration histogram");
        registry()
            .register(Box::new(histogram.clone()))
            .expect("Failed to register apply duration histogram");
        histogram
    })
}

/// Instance health probe counter
/// Labels: status (healthy/unhealthy/error)
pub fn probe_results_total() -> &'static CounterVec {
    static COUNTER: OnceLock<CounterVec> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "bifrost_agent_probe_results_total",
            "Total number of instance health probes by outcome",
        );
        let counter =
            CounterVec::new(opts, &["status"]).expect("Failed to create probe results counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register probe results counter");
        counter
    })
}

/// Heartbeat sent counter
pub fn heartbeat_sent_total() -> &'static IntCounter {
    static COUNTER: OnceLock<IntCounter> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "bifrost_agent_heartbeat_sent_total",
            "Total number of heartbeats sent to the management server",
        );
        let counter = IntCounter::with_opts(opts).expect("Failed to create heartbeat counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register heartbeat counter");
        counter
    })
}

/// Number of selectors the health poller currently watches
pub fn watched_selectors() -> &'static IntGauge {
    static GAUGE: OnceLock<IntGauge> = OnceLock::new();
    GAUGE.get_or_init(|| {
        let opts = Opts::new(
            "bifrost_agent_watched_selectors",
            "Number of instance selectors currently under health polling",
        );
        let gauge = IntGauge::with_opts(opts).expect("Failed to create watched selectors gauge");
        registry()
            .register(Box::new(gauge.clone()))
            .expect("Failed to register watched selectors gauge");
        gauge
    })
}

/// Number of resource keys currently applied to the cluster
pub fn applied_keys() -> &'static IntGauge {
    static GAUGE: OnceLock<IntGauge> = OnceLock::new();
    GAUGE.get_or_init(|| {
        let opts = Opts::new(
            "bifrost_agent_applied_keys",
            "Number of remote configuration keys currently applied",
        );
        let gauge = IntGauge::with_opts(opts).expect("Failed to create applied keys gauge");
        registry()
            .register(Box::new(gauge.clone()))
            .expect("Failed to register applied keys gauge");
        gauge
    })
}

/// Last successful status report timestamp (Unix timestamp)
pub fn last_report_timestamp() -> &'static Gauge {
    static GAUGE: OnceLock<Gauge> = OnceLock::new();
    GAUGE.get_or_init(|| {
        let opts = Opts::new(
            "bifrost_agent_last_report_timestamp",
            "Unix timestamp of the last status report accepted by the management server",
        );
        let gauge = Gauge::with_opts(opts).expect("Failed to create last report timestamp gauge");
        registry()
            .register(Box::new(gauge.clone()))
            .expect("Failed to register last report timestamp gauge");
        gauge
    })
}

/// Encodes all registered metrics in Prometheus text format
///
/// # Returns
///
/// Returns a String containing all metrics in Prometheus exposition format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to UTF-8")
}
