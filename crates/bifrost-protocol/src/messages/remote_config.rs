/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Remote Configuration
//!
//! The desired-state payload the management server pushes to the bridge,
//! the status the bridge reports back, and the effective configuration it
//! recomputes from the cluster.
//!
//! A remote configuration arrives atomically as one map from resource key
//! (`namespace/name`) to an opaque config blob, plus a content hash of the
//! whole map. The bridge reports the hash of the most recently processed
//! map on every status, regardless of whether applying it fully succeeded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One opaque configuration blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigFile {
    /// Raw config body; empty bodies are skipped by the apply algorithm.
    #[serde(default)]
    pub body: Vec<u8>,
    /// Body encoding, "yaml" for everything this bridge produces.
    #[serde(default)]
    pub content_type: String,
}

impl AgentConfigFile {
    pub fn yaml(body: impl Into<Vec<u8>>) -> Self {
        AgentConfigFile {
            body: body.into(),
            content_type: "yaml".to_string(),
        }
    }
}

/// Mapping from resource-key string to config blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigMap {
    #[serde(default)]
    pub config_map: BTreeMap<String, AgentConfigFile>,
}

/// A complete desired-state message from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRemoteConfig {
    pub config: AgentConfigMap,
    /// Content hash of the entire map; the idempotence guard compares this.
    #[serde(default)]
    pub config_hash: Vec<u8>,
}

/// Outcome of processing one remote configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteConfigStatuses {
    #[default]
    Unset,
    Applying,
    Applied,
    Failed,
}

/// Status reported upstream after each processed configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfigStatus {
    /// Hash of the most recently processed map, applied or not.
    #[serde(default)]
    pub last_remote_config_hash: Vec<u8>,
    pub status: RemoteConfigStatuses,
    /// Newline-joined per-key errors when `status` is `Failed`.
    #[serde(default)]
    pub error_message: String,
}

/// The configuration currently in effect, recomputed from the cluster's
/// listing of managed resources rather than from any applied delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub config_map: AgentConfigMap,
}
