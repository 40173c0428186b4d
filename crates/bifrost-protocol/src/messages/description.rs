/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Agent Description
//!
//! Identifying and non-identifying attributes reported at session start.
//!
//! Identifying attributes (`service.name`, `service.version`) distinguish
//! this agent from every other agent the server manages. Non-identifying
//! attributes carry environmental detail such as the host name and OS
//! family, plus whatever extra pairs the operator configures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One string attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Attributes describing this agent to the management server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescription {
    #[serde(default)]
    pub identifying_attributes: Vec<KeyValue>,
    #[serde(default)]
    pub non_identifying_attributes: Vec<KeyValue>,
}

impl AgentDescription {
    /// Builds a description from the agent's service identity plus any
    /// operator-configured extra attributes. `service.version` is omitted
    /// when unset rather than reported as an empty string.
    pub fn new(
        service_name: &str,
        service_version: Option<&str>,
        extra: &BTreeMap<String, String>,
    ) -> Self {
        let mut identifying = vec![KeyValue::new("service.name", service_name)];
        if let Some(version) = service_version {
            identifying.push(KeyValue::new("service.version", version));
        }

        let mut non_identifying: Vec<KeyValue> = extra
            .iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect();
        non_identifying.push(KeyValue::new("os.family", std::env::consts::OS));
        if let Ok(host) = std::env::var("HOSTNAME") {
            if !host.is_empty() {
                non_identifying.push(KeyValue::new("host.name", host));
            }
        }

        AgentDescription {
            identifying_attributes: identifying,
            non_identifying_attributes: non_identifying,
        }
    }

    /// Looks up an attribute by key, identifying attributes first.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.identifying_attributes
            .iter()
            .chain(self.non_identifying_attributes.iter())
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}
