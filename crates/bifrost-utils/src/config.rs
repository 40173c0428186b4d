/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Bifrost Config Module
//!
//! Shared configuration for the bridge agent. Values are loaded and
//! overridden in this order (later sources win):
//!
//! 1. Defaults from the embedded `default.toml`
//! 2. An optional external configuration file
//! 3. Environment variables prefixed with `BIFROST__`, using `__` as the
//!    nesting separator (e.g. `BIFROST__SERVER__ENDPOINT`,
//!    `BIFROST__HEALTHCHECK__WORKERS`)
//!
//! Commonly overridden values:
//!
//! - `BIFROST__LOG__LEVEL` — "trace" | "debug" | "info" | "warn" | "error"
//! - `BIFROST__LOG__FORMAT` — "text" | "json"
//! - `BIFROST__SERVER__ENDPOINT` — management server URL
//! - `BIFROST__AGENT__NAMESPACE` — namespace the bridge itself runs in
//! - `BIFROST__AGENT__HEARTBEAT_INTERVAL_SECONDS` — 0 disables heartbeats
//! - `BIFROST__HEALTHCHECK__PORT` / `BIFROST__HEALTHCHECK__PATH` — probe target

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;

// Compiled-in defaults; every key used by the agent has a value here.
const DEFAULT_SETTINGS: &str = include_str!("../default.toml");

/// Root settings structure for the bridge agent.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Logging configuration
    pub log: Log,
    /// Management server session configuration
    pub server: Server,
    /// Agent identity and cluster configuration
    pub agent: Agent,
    /// Liveness-probe poller configuration
    pub healthcheck: HealthCheck,
    /// Capability name -> enabled. Unknown names are ignored.
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
    /// Allowed pipeline components per section (empty means allow all).
    #[serde(default)]
    pub components_allowed: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Log level ("trace" through "error")
    pub level: String,
    /// Output format, "text" or "json"
    pub format: String,
}

/// Connection settings for the management server session.
#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    /// Base URL the session client posts status reports to
    pub endpoint: String,
    /// Cadence of the session poll loop
    pub poll_interval_seconds: u64,
    /// Per-request timeout for session traffic
    pub request_timeout_seconds: u64,
    /// Extra headers sent with every session request (e.g. authorization)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Agent {
    /// Namespace the bridge itself runs in, reported in the agent description
    pub namespace: String,
    /// Reported as the identifying `service.name` attribute
    pub service_name: String,
    /// Overrides the reported `service.version` (defaults to the crate version)
    #[serde(default)]
    pub service_version: Option<String>,
    /// Heartbeat cadence; 0 disables the heartbeat loop
    pub heartbeat_interval_seconds: u64,
    /// Bind port for the /healthz, /readyz and /metrics endpoints
    pub health_port: u16,
    /// Path to a kubeconfig file; in-cluster config is used when unset
    #[serde(default)]
    pub kubeconfig_path: Option<String>,
    /// Additional non-identifying description attributes
    #[serde(default)]
    pub description: BTreeMap<String, String>,
}

/// Settings for the instance liveness poller.
#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheck {
    /// Poll cycle cadence
    pub interval_seconds: u64,
    /// Port probed on each live instance
    pub port: u16,
    /// Path probed on each live instance
    pub path: String,
    /// Per-probe HTTP timeout
    pub timeout_seconds: u64,
    /// Concurrency ceiling for outbound probes
    pub workers: usize,
}

impl Settings {
    /// Loads settings from the embedded defaults, an optional file, and the
    /// environment, in that order of precedence.
    pub fn new(config_file: Option<String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::from_str(DEFAULT_SETTINGS, config::FileFormat::Toml));

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(&path));
        }

        builder = builder.add_source(
            Environment::with_prefix("BIFROST")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
