/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Telemetry and Identity Messages
//!
//! Server-initiated settings that reconfigure the agent mid-session: where
//! to ship the agent's own metrics, a replacement instance identity, and
//! the error envelope the server uses to reject a report.

use serde::{Deserialize, Serialize};

/// One HTTP header attached to telemetry export requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// Where and how the agent should ship its own metrics.
///
/// An empty `destination_endpoint` is invalid; the agent rejects it and
/// keeps whatever reporter it already has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConnectionSettings {
    #[serde(default)]
    pub destination_endpoint: String,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl TelemetryConnectionSettings {
    /// Header pairs as (key, value) tuples, in wire order.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|h| (h.key.as_str(), h.value.as_str()))
    }
}

/// A server-assigned replacement for the agent's instance identity.
///
/// The agent must adopt the new identity before reinitializing anything
/// that embeds it, such as the metric reporter's resource attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentification {
    #[serde(default)]
    pub new_instance_uid: String,
}

/// Error the server attaches when it cannot process a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorResponse {
    #[serde(default)]
    pub error_message: String,
}

impl std::fmt::Display for ServerErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error: {}", self.error_message)
    }
}
