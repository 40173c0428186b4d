/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Message types exchanged over the bridge management protocol.

pub mod capabilities;
pub mod description;
pub mod envelope;
pub mod health;
pub mod remote_config;
pub mod telemetry;

pub use capabilities::AgentCapabilities;
pub use description::{AgentDescription, KeyValue};
pub use envelope::{AgentToServer, ConnectionSettingsOffers, MessageData, ServerToAgent};
pub use health::ComponentHealth;
pub use remote_config::{
    AgentConfigFile, AgentConfigMap, AgentRemoteConfig, EffectiveConfig, RemoteConfigStatus,
    RemoteConfigStatuses,
};
pub use telemetry::{
    AgentIdentification, Header, ServerErrorResponse, TelemetryConnectionSettings,
};
