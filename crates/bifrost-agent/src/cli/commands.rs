/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # CLI Commands Module
//!
//! Implements the command-line interface for the Bifrost bridge agent.
//!
//! ## Main Command
//!
//! ```rust,ignore
//! pub async fn start(config_file: Option<String>) -> Result<(), Box<dyn std::error::Error>>
//! ```
//!
//! The primary entry point for the bridge, which:
//! 1. Loads configuration
//! 2. Initializes logging
//! 3. Connects to the Kubernetes cluster
//! 4. Starts the instance health poller
//! 5. Opens the management session and serves the probe endpoints
//!
//! ## Startup Sequence
//!
//! ```mermaid
//! flowchart TD
//!     A[Load Config] --> B[Init Logger]
//!     B --> C[Create Kubernetes Client]
//!     C --> D[Start Health Poller]
//!     D --> E[Open Management Session]
//!     E --> F[Serve Probe Endpoints]
//!
//!     F --> G{Session Loop}
//!     G --> H[Apply Remote Config]
//!     H --> I[Report Status]
//!     I --> G
//! ```
//!
//! ## Signal Handling
//!
//! On SIGINT the bridge reports one final unhealthy status, flushes a last
//! report over the session, and drains the poller's workers before exiting.

use crate::agent::{Agent, AgentConfig};
use crate::clock::SystemClock;
use crate::healthcheck::{HealthPoller, InstanceHealthChecker, PollerConfig};
use crate::k8s::applier::{ConfigApplier, KubeApplier};
use crate::session::HttpSession;
use crate::{health, k8s};
use bifrost_protocol::messages::{AgentCapabilities, AgentDescription};
use bifrost_protocol::session::ManagementClient;
use bifrost_utils::config::Settings;
use bifrost_utils::logging::prelude::*;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::signal::ctrl_c;

pub async fn start(config_file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Settings::new(config_file).expect("Failed to load configuration");
    bifrost_utils::logging::init_with_format(&config.log.level, &config.log.format)
        .expect("Failed to initialize logger");
    info!("Starting Bifrost bridge agent");

    info!("Initializing Kubernetes client");
    let k8s_client = k8s::create_k8s_client(config.agent.kubeconfig_path.as_deref())
        .await
        .expect("Failed to create Kubernetes client");

    let applier = Arc::new(KubeApplier::new(
        k8s_client.clone(),
        config.agent.service_name.clone(),
        config.components_allowed.clone(),
    ));

    info!(
        "Starting instance health poller with {} workers",
        config.healthcheck.workers
    );
    let poller = Arc::new(HealthPoller::start(
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        PollerConfig {
            interval: Duration::from_secs(config.healthcheck.interval_seconds),
            port: config.healthcheck.port,
            path: config.healthcheck.path.clone(),
            timeout: Duration::from_secs(config.healthcheck.timeout_seconds),
            workers: config.healthcheck.workers,
        },
    ));

    let session = Arc::new(HttpSession::new(
        Duration::from_secs(config.server.poll_interval_seconds),
        Duration::from_secs(config.server.request_timeout_seconds),
    ));

    let service_version = config
        .agent
        .service_version
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    let mut extra_attributes = config.agent.description.clone();
    extra_attributes.insert(
        "k8s.namespace.name".to_string(),
        config.agent.namespace.clone(),
    );

    let agent = Arc::new(Agent::new(
        AgentConfig {
            service_name: config.agent.service_name.clone(),
            service_version: service_version.clone(),
            endpoint: config.server.endpoint.clone(),
            headers: config.server.headers.clone(),
            capabilities: AgentCapabilities::from_names(&config.capabilities),
            description: AgentDescription::new(
                &config.agent.service_name,
                Some(&service_version),
                &extra_attributes,
            ),
            heartbeat_interval: Duration::from_secs(config.agent.heartbeat_interval_seconds),
        },
        Arc::clone(&applier) as Arc<dyn ConfigApplier>,
        Arc::clone(&poller) as Arc<dyn InstanceHealthChecker>,
        Arc::clone(&session) as Arc<dyn ManagementClient>,
        Arc::new(SystemClock),
    ));

    // Start health check HTTP server
    let health_state = health::HealthState {
        k8s_client: k8s_client.clone(),
        start_time: SystemTime::now(),
    };
    let health_port = config.agent.health_port;
    info!("Starting health check server on port {}", health_port);
    let health_router = health::configure_health_routes(health_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", health_port))
        .await
        .expect("Failed to bind health check server");
    let _health_server = tokio::spawn(async move {
        axum::serve(listener, health_router)
            .await
            .expect("Health check server failed");
    });

    info!(
        "Opening management session to {}",
        config.server.endpoint
    );
    agent.start().await?;

    info!("Bridge agent running");
    ctrl_c().await.expect("Failed to listen for shutdown signal");
    info!("Received shutdown signal");

    agent.shutdown().await;
    poller.close().await;
    info!("Shutdown complete");
    Ok(())
}
