/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Component Health
//!
//! Recursive health report for the agent and everything it manages.
//!
//! The agent's own health is the root node. Each managed collector
//! definition appears as a child keyed by its `namespace/name` string, and
//! each live instance of that definition appears as a grandchild keyed by
//! the instance name. A parent is healthy only when all of its children are
//! (a node with no children is vacuously healthy).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health of one component, with nested health for its subcomponents.
///
/// Fields:
/// - `healthy`: whether this component and all of its children are healthy
/// - `start_time_unix_nano`: when the component started, in protocol time
/// - `status_time_unix_nano`: when this report was produced
/// - `last_error`: human-readable error when unhealthy, empty otherwise
/// - `status`: free-form status text (replica summary, pod phase, HTTP code)
/// - `component_health_map`: child components keyed by their identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub start_time_unix_nano: u64,
    #[serde(default)]
    pub status_time_unix_nano: u64,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub component_health_map: BTreeMap<String, ComponentHealth>,
}

impl ComponentHealth {
    /// True when every child in the map is healthy; true for no children.
    pub fn children_all_healthy(&self) -> bool {
        self.component_health_map.values().all(|c| c.healthy)
    }
}
