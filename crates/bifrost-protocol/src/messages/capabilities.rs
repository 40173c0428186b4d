/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Agent Capabilities
//!
//! Bitmask advertising what this agent can do, sent once at session start.
//!
//! Capabilities are configured by name (snake_case keys in the agent's
//! configuration file) and folded into a single `u64`. The status-reporting
//! bit is always set: an agent that cannot report status has no business
//! opening a session, so configuration cannot switch it off.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability bitmask advertised to the management server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentCapabilities(u64);

impl AgentCapabilities {
    pub const REPORTS_STATUS: AgentCapabilities = AgentCapabilities(1 << 0);
    pub const ACCEPTS_REMOTE_CONFIG: AgentCapabilities = AgentCapabilities(1 << 1);
    pub const REPORTS_EFFECTIVE_CONFIG: AgentCapabilities = AgentCapabilities(1 << 2);
    pub const ACCEPTS_PACKAGES: AgentCapabilities = AgentCapabilities(1 << 3);
    pub const REPORTS_PACKAGE_STATUSES: AgentCapabilities = AgentCapabilities(1 << 4);
    pub const REPORTS_OWN_TRACES: AgentCapabilities = AgentCapabilities(1 << 5);
    pub const REPORTS_OWN_METRICS: AgentCapabilities = AgentCapabilities(1 << 6);
    pub const REPORTS_OWN_LOGS: AgentCapabilities = AgentCapabilities(1 << 7);
    pub const ACCEPTS_CONNECTION_SETTINGS: AgentCapabilities = AgentCapabilities(1 << 8);
    pub const ACCEPTS_RESTART_COMMAND: AgentCapabilities = AgentCapabilities(1 << 9);
    pub const REPORTS_HEALTH: AgentCapabilities = AgentCapabilities(1 << 10);
    pub const REPORTS_REMOTE_CONFIG: AgentCapabilities = AgentCapabilities(1 << 11);

    /// Builds a mask from configured capability names.
    ///
    /// Names map to bits as listed in [`AgentCapabilities::from_name`];
    /// entries set to `false` and names with no matching bit are ignored.
    /// `reports_status` is always included whether configured or not.
    pub fn from_names(names: &BTreeMap<String, bool>) -> Self {
        let mut mask = AgentCapabilities::REPORTS_STATUS;
        for (name, enabled) in names {
            if !enabled {
                continue;
            }
            if let Some(capability) = AgentCapabilities::from_name(name) {
                mask.0 |= capability.0;
            }
        }
        mask
    }

    /// Maps one snake_case capability name to its bit, if known.
    pub fn from_name(name: &str) -> Option<AgentCapabilities> {
        match name {
            "reports_status" => Some(Self::REPORTS_STATUS),
            "accepts_remote_config" => Some(Self::ACCEPTS_REMOTE_CONFIG),
            "reports_effective_config" => Some(Self::REPORTS_EFFECTIVE_CONFIG),
            "accepts_packages" => Some(Self::ACCEPTS_PACKAGES),
            "reports_package_statuses" => Some(Self::REPORTS_PACKAGE_STATUSES),
            "reports_own_traces" => Some(Self::REPORTS_OWN_TRACES),
            "reports_own_metrics" => Some(Self::REPORTS_OWN_METRICS),
            "reports_own_logs" => Some(Self::REPORTS_OWN_LOGS),
            "accepts_connection_settings" => Some(Self::ACCEPTS_CONNECTION_SETTINGS),
            "accepts_restart_command" => Some(Self::ACCEPTS_RESTART_COMMAND),
            "reports_health" => Some(Self::REPORTS_HEALTH),
            "reports_remote_config" => Some(Self::REPORTS_REMOTE_CONFIG),
            _ => None,
        }
    }

    /// True when every bit in `other` is set in `self`.
    pub fn contains(&self, other: AgentCapabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}
