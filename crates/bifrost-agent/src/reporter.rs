/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Own-Metrics Reporter
//!
//! When the management server offers telemetry connection settings, the
//! agent starts reporting its own metrics over OTLP/HTTP to the offered
//! destination. The reporter owns the meter provider for that destination;
//! a fresh offer builds a fresh reporter and the previous one is shut down
//! only after its replacement is up.

use chrono::{DateTime, Utc};
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use bifrost_protocol::messages::TelemetryConnectionSettings;
use bifrost_utils::logging::prelude::*;

const EXPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Error building the own-metrics reporter.
#[derive(Debug, PartialEq, Eq)]
pub enum ReporterError {
    /// The offer carried no destination endpoint.
    MissingEndpoint,
    /// The OTLP exporter could not be constructed.
    Exporter(String),
}

impl fmt::Display for ReporterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReporterError::MissingEndpoint => {
                write!(f, "connection settings offer has no destination endpoint")
            }
            ReporterError::Exporter(message) => {
                write!(f, "failed to build OTLP exporter: {}", message)
            }
        }
    }
}

impl std::error::Error for ReporterError {}

/// Periodic OTLP/HTTP exporter for the agent's own metrics.
#[derive(Debug)]
pub struct MetricReporter {
    provider: SdkMeterProvider,
    instance_id: Uuid,
}

impl MetricReporter {
    /// Builds a reporter for one connection-settings offer.
    ///
    /// The exporter is constructed eagerly so a bad offer fails here, but
    /// no connection is made until the first export tick.
    pub fn new(
        settings: &TelemetryConnectionSettings,
        service_name: &str,
        service_version: &str,
        instance_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<Self, ReporterError> {
        if settings.destination_endpoint.is_empty() {
            return Err(ReporterError::MissingEndpoint);
        }
        let headers: HashMap<String, String> = settings
            .header_pairs()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        let exporter = MetricExporter::builder()
            .with_http()
            .with_endpoint(&settings.destination_endpoint)
            .with_headers(headers)
            .build()
            .map_err(|e| ReporterError::Exporter(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio)
            .with_interval(EXPORT_INTERVAL)
            .build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(Resource::new(vec![
                KeyValue::new(resource::SERVICE_NAME, service_name.to_string()),
                KeyValue::new(resource::SERVICE_VERSION, service_version.to_string()),
                KeyValue::new(resource::SERVICE_INSTANCE_ID, instance_id.to_string()),
            ]))
            .build();

        let meter = provider.meter("bifrost-agent");
        let _uptime = meter
            .u64_observable_gauge("bifrost.agent.uptime_seconds")
            .with_description("Seconds since the bridge agent started")
            .with_unit("s")
            .with_callback(move |observer| {
                let uptime = (Utc::now() - started_at).num_seconds().max(0) as u64;
                observer.observe(uptime, &[]);
            })
            .build();

        info!(
            "Own-metrics reporter started, exporting to {}",
            settings.destination_endpoint
        );
        Ok(MetricReporter {
            provider,
            instance_id,
        })
    }

    /// The agent identity this reporter was built under.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Flushes outstanding metrics and stops the periodic exporter.
    pub fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            warn!("Metric reporter shutdown reported an error: {}", e);
        }
    }
}
