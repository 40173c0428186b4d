/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Session Contract
//!
//! The two trait seams between the agent core and the wire.
//!
//! [`ManagementClient`] is the outbound surface: the agent core updates
//! its reported state through it and never touches the transport directly.
//! [`SessionCallbacks`] is the inbound surface: the transport delivers
//! server payloads through it, one message at a time, from a single
//! dispatcher task. Fakes of both traits stand in for the wire in tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::messages::{
    AgentCapabilities, AgentDescription, ComponentHealth, EffectiveConfig, MessageData,
    RemoteConfigStatus, ServerErrorResponse,
};

/// Error raised by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session has not been started yet.
    NotStarted,
    /// `start` was called on a session that is already running.
    AlreadyStarted,
    /// The session was stopped and can no longer accept state updates.
    Closed,
    /// The configured endpoint could not be parsed.
    InvalidEndpoint(String),
    /// The request never produced an HTTP response.
    Transport(String),
    /// The server answered with a non-success status.
    Server { status: u16, message: String },
    /// A callback the session depends on failed.
    Callback(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotStarted => write!(f, "session not started"),
            SessionError::AlreadyStarted => write!(f, "session already started"),
            SessionError::Closed => write!(f, "session closed"),
            SessionError::InvalidEndpoint(endpoint) => {
                write!(f, "invalid management endpoint: {}", endpoint)
            }
            SessionError::Transport(message) => write!(f, "transport failure: {}", message),
            SessionError::Server { status, message } => {
                write!(f, "server returned {}: {}", status, message)
            }
            SessionError::Callback(message) => write!(f, "callback failure: {}", message),
        }
    }
}

impl std::error::Error for SessionError {}

/// Everything a session needs to open up.
#[derive(Clone)]
pub struct StartSettings {
    /// Management server endpoint, e.g. `http://bifrost-server:4320/v1/bridge`.
    pub endpoint: String,
    /// Headers attached to every report, typically authorization.
    pub headers: BTreeMap<String, String>,
    /// Instance identity advertised in every report.
    pub instance_uid: String,
    /// Capability mask advertised in every report.
    pub capabilities: AgentCapabilities,
    /// Last known remote config status, carried over across restarts.
    pub remote_config_status: Option<RemoteConfigStatus>,
    /// Receiver for everything the server sends back.
    pub callbacks: Arc<dyn SessionCallbacks>,
}

impl std::fmt::Debug for StartSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartSettings")
            .field("endpoint", &self.endpoint)
            .field("instance_uid", &self.instance_uid)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Inbound surface: how the transport hands server traffic to the core.
///
/// The transport invokes these from one dispatcher task, so implementations
/// observe messages in wire order and never concurrently.
#[async_trait]
pub trait SessionCallbacks: Send + Sync {
    /// The first report of the session was accepted.
    async fn on_connect(&self);

    /// The first report of the session was rejected or never delivered.
    async fn on_connect_failed(&self, err: SessionError);

    /// The server attached an error response to a report.
    async fn on_error(&self, err: ServerErrorResponse);

    /// The server sent actionable payload; fields absent from the wire
    /// message are `None`.
    async fn on_message(&self, msg: MessageData);

    /// The session is about to report this status; persist it so a restart
    /// can resume from the same hash.
    async fn save_remote_config_status(&self, status: RemoteConfigStatus);

    /// Recompute the effective configuration for inclusion in a report.
    async fn get_effective_config(&self) -> Result<EffectiveConfig, SessionError>;
}

/// Outbound surface: how the agent core updates its reported state.
///
/// Setters record state for the next report and nudge the dispatcher; they
/// fail only when the session is unusable, not when an individual report
/// fails in transit.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Opens the session and spawns the report dispatcher.
    async fn start(&self, settings: StartSettings) -> Result<(), SessionError>;

    /// Sends one final report and stops the dispatcher.
    async fn stop(&self) -> Result<(), SessionError>;

    /// Replaces the advertised agent description.
    async fn set_agent_description(&self, description: AgentDescription)
        -> Result<(), SessionError>;

    /// Replaces the health subtree carried in every subsequent report.
    async fn set_health(&self, health: ComponentHealth) -> Result<(), SessionError>;

    /// Records the outcome of the most recently processed remote config.
    async fn set_remote_config_status(
        &self,
        status: RemoteConfigStatus,
    ) -> Result<(), SessionError>;

    /// Marks the effective config stale; the next report recomputes it
    /// through [`SessionCallbacks::get_effective_config`].
    async fn update_effective_config(&self) -> Result<(), SessionError>;

    /// Asks the server to re-offer connection settings.
    async fn request_connection_settings(&self) -> Result<(), SessionError>;
}
