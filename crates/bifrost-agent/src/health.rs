/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Health Check Module
//!
//! HTTP endpoints for Kubernetes liveness and readiness probes, plus the
//! Prometheus exposition endpoint.
//!
//! ## Endpoints
//!
//! - `GET /healthz`: liveness check, 200 OK while the process runs
//! - `GET /readyz`: readiness check validating Kubernetes API connectivity
//! - `GET /health`: detailed JSON status (cluster, session, uptime, version)
//! - `GET /metrics`: Prometheus text exposition
//!
//! Session status is derived from the last-report timestamp gauge the
//! dispatcher maintains, so no extra wiring between the session and this
//! server is needed.

use crate::metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use bifrost_utils::logging::prelude::*;
use kube::Client;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared state for health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub k8s_client: Client,
    pub start_time: SystemTime,
}

/// Health status response structure
#[derive(Serialize)]
struct HealthStatus {
    status: String,
    kubernetes: KubernetesStatus,
    session: SessionStatus,
    uptime_seconds: u64,
    version: String,
    timestamp: String,
}

/// Kubernetes connectivity for the response
#[derive(Serialize)]
struct KubernetesStatus {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Management session status for the response
#[derive(Serialize)]
struct SessionStatus {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_report: Option<String>,
}

/// Configures and returns the health check router
pub fn configure_health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Simple liveness check endpoint
///
/// Returns 200 OK if the process is running.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check endpoint
///
/// Validates Kubernetes API connectivity.
/// Returns 200 OK if the API is accessible, 503 if not.
async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    match state.k8s_client.apiserver_version().await {
        Ok(_) => (StatusCode::OK, "Ready"),
        Err(e) => {
            error!("Kubernetes API connectivity check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Kubernetes API unavailable",
            )
        }
    }
}

/// Management-session status derived from the last accepted report.
fn session_status() -> SessionStatus {
    let last = metrics::last_report_timestamp().get();
    if last <= 0.0 {
        return SessionStatus {
            connected: false,
            last_report: None,
        };
    }
    SessionStatus {
        connected: true,
        last_report: chrono::DateTime::from_timestamp(last as i64, 0).map(|t| t.to_rfc3339()),
    }
}

/// Detailed health check endpoint
///
/// Returns 200 OK if the cluster is reachable and the management session
/// has delivered at least one report, 503 otherwise.
async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    let timestamp = chrono::Utc::now().to_rfc3339();

    let uptime = now.as_secs().saturating_sub(
        state
            .start_time
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs(),
    );

    let (k8s_connected, k8s_error) = match state.k8s_client.apiserver_version().await {
        Ok(_) => (true, None),
        Err(e) => {
            error!("Kubernetes API connectivity check failed: {:?}", e);
            (false, Some(format!("{:?}", e)))
        }
    };

    let session = session_status();
    let healthy = k8s_connected && session.connected;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let health_status = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        kubernetes: KubernetesStatus {
            connected: k8s_connected,
            error: k8s_error,
        },
        session,
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp,
    };

    (status_code, Json(health_status))
}

/// Prometheus metrics endpoint
///
/// Returns metrics in text exposition format: remote config operations,
/// probe outcomes, heartbeats, and session reporting.
async fn metrics_handler() -> impl IntoResponse {
    let metrics_data = metrics::encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics_data,
    )
}
