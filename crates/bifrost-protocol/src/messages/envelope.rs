/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Wire Envelopes
//!
//! The two top-level messages exchanged with the management server.
//!
//! The agent posts an [`AgentToServer`] report on every poll tick, on every
//! explicit nudge, and once more at shutdown. The server's response body,
//! when non-empty, decodes to a [`ServerToAgent`] whose payload fields are
//! distilled into a [`MessageData`] for delivery to the agent core.

use serde::{Deserialize, Serialize};

use crate::messages::capabilities::AgentCapabilities;
use crate::messages::description::AgentDescription;
use crate::messages::health::ComponentHealth;
use crate::messages::remote_config::{AgentRemoteConfig, EffectiveConfig, RemoteConfigStatus};
use crate::messages::telemetry::{
    AgentIdentification, ServerErrorResponse, TelemetryConnectionSettings,
};

/// Flag bit requesting fresh connection settings from the server.
pub const FLAG_REQUEST_CONNECTION_SETTINGS: u64 = 1 << 0;

/// One status report from the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentToServer {
    pub instance_uid: String,
    /// Monotonic per-session counter, for server-side gap detection.
    #[serde(default)]
    pub sequence_num: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_description: Option<AgentDescription>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ComponentHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_config_status: Option<RemoteConfigStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_config: Option<EffectiveConfig>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub flags: u64,
}

fn is_zero(flags: &u64) -> bool {
    *flags == 0
}

/// Connection settings the server offers mid-session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettingsOffers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub own_metrics: Option<TelemetryConnectionSettings>,
}

/// The server's response to one report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerToAgent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_config: Option<AgentRemoteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_settings: Option<ConnectionSettingsOffers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_identification: Option<AgentIdentification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_response: Option<ServerErrorResponse>,
}

impl ServerToAgent {
    /// Distills the payload fields into the callback-facing message,
    /// leaving the error response behind for separate delivery.
    pub fn into_message_data(self) -> MessageData {
        MessageData {
            remote_config: self.remote_config,
            own_metrics_conn_settings: self
                .connection_settings
                .and_then(|offers| offers.own_metrics),
            agent_identification: self.agent_identification,
        }
    }
}

/// Inbound payload delivered to the agent core, one field per concern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageData {
    pub remote_config: Option<AgentRemoteConfig>,
    pub own_metrics_conn_settings: Option<TelemetryConnectionSettings>,
    pub agent_identification: Option<AgentIdentification>,
}

impl MessageData {
    /// True when the server sent nothing the agent core needs to act on.
    pub fn is_empty(&self) -> bool {
        self.remote_config.is_none()
            && self.own_metrics_conn_settings.is_none()
            && self.agent_identification.is_none()
    }
}
