/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Resource Store
//!
//! The write path between the reconciliation engine and the cluster.
//!
//! [`ConfigApplier`] is the seam the agent core sees; [`KubeApplier`] is the
//! real implementation backed by the Kubernetes API. Every blob the
//! management server pushes is validated before it touches the cluster:
//! it must parse as a collector manifest, carry a non-empty `spec.config`,
//! use only allow-listed components, match the resource key it was sent
//! under, and respect the ownership labels of whatever already exists.

use async_trait::async_trait;
use bifrost_utils::logging::prelude::*;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use kube::{Api, Client, Error as KubeError};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use bifrost_protocol::messages::AgentConfigFile;

use crate::k8s::objects::{
    collector_api_resource, Collector, PodRef, API_GROUP, API_VERSION, COLLECTOR_KIND,
    CREATED_BY_LABEL, CREATED_BY_VALUE, FIELD_MANAGER, MANAGED_LABEL, REPORTING_LABEL,
};
use crate::k8s::{with_retries, RetryConfig};
use crate::keys::Selector;

/// Error applying, deleting, or listing managed resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The blob was empty or its `spec.config` carried no components.
    EmptyConfig,
    /// The blob did not parse as a collector manifest.
    InvalidManifest(String),
    /// The config names components outside the allow-list.
    DisallowedComponents(Vec<String>),
    /// The target exists but is not labeled for this agent to manage.
    NotManaged(String),
    /// The manifest's own identity contradicts the resource key.
    KeyMismatch { expected: String, found: String },
    /// The cluster call itself failed.
    Api(String),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::EmptyConfig => write!(f, "must supply a valid non-empty configuration"),
            ApplyError::InvalidManifest(message) => {
                write!(f, "invalid collector manifest: {}", message)
            }
            ApplyError::DisallowedComponents(items) => {
                write!(f, "items in config are not allowed: [{}]", items.join(", "))
            }
            ApplyError::NotManaged(message) => write!(f, "{}", message),
            ApplyError::KeyMismatch { expected, found } => {
                write!(
                    f,
                    "manifest identity {:?} does not match resource key {:?}",
                    found, expected
                )
            }
            ApplyError::Api(message) => write!(f, "cluster call failed: {}", message),
        }
    }
}

impl std::error::Error for ApplyError {}

/// The contract the reconciliation engine writes through.
///
/// An empty `namespace` on `get_collector_pods` queries all namespaces,
/// which is how the poller resolves instances for selectors it only knows
/// by label.
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Creates the managed resource if absent, otherwise updates it in place.
    async fn apply(
        &self,
        name: &str,
        namespace: &str,
        config: &AgentConfigFile,
    ) -> Result<(), ApplyError>;

    /// Deletes the resource; an already-absent resource is success.
    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ApplyError>;

    /// Every resource owned by or reporting to this agent.
    async fn list_instances(&self) -> Result<Vec<Collector>, ApplyError>;

    /// Live pods matching the selector.
    async fn get_collector_pods(
        &self,
        selector: &Selector,
        namespace: &str,
    ) -> Result<Vec<PodRef>, ApplyError>;
}

/// Parses a config blob into a collector manifest.
///
/// The full identity is stamped from the resource key before apply, but a
/// manifest claiming to be some other kind is rejected outright.
fn parse_manifest(body: &[u8]) -> Result<DynamicObject, ApplyError> {
    let manifest: DynamicObject =
        serde_yaml::from_slice(body).map_err(|e| ApplyError::InvalidManifest(e.to_string()))?;
    if let Some(types) = &manifest.types {
        if !types.kind.is_empty() && types.kind != COLLECTOR_KIND {
            return Err(ApplyError::InvalidManifest(format!(
                "unexpected kind {:?}, expected {:?}",
                types.kind, COLLECTOR_KIND
            )));
        }
    }
    Ok(manifest)
}

/// Rejects manifests whose `spec.config` is missing or empty.
fn validate_config_present(manifest: &DynamicObject) -> Result<(), ApplyError> {
    match manifest.data.pointer("/spec/config") {
        Some(serde_json::Value::Object(config)) if !config.is_empty() => Ok(()),
        _ => Err(ApplyError::EmptyConfig),
    }
}

/// Checks every component in `spec.config` against the allow-list.
///
/// An empty allow-list disables the check. The `service` section is
/// exempt: pipelines can only reference components declared elsewhere in
/// the config, so those are already covered.
fn validate_components(
    manifest: &DynamicObject,
    allowed: &BTreeMap<String, Vec<String>>,
) -> Result<(), ApplyError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let Some(config) = manifest
        .data
        .pointer("/spec/config")
        .and_then(|v| v.as_object())
    else {
        return Ok(());
    };

    let mut invalid = Vec::new();
    for (section, components) in config {
        if section == "service" {
            continue;
        }
        match allowed.get(section) {
            None => invalid.push(section.clone()),
            Some(names) => {
                if let Some(components) = components.as_object() {
                    for name in components.keys() {
                        if !names.contains(name) {
                            invalid.push(format!("{}.{}", section, name));
                        }
                    }
                }
            }
        }
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ApplyError::DisallowedComponents(invalid))
    }
}

/// Rejects manifests that claim a different name or namespace than the
/// resource key they arrived under. An omitted identity is fine; it is
/// stamped from the key before apply.
fn validate_key(manifest: &DynamicObject, name: &str, namespace: &str) -> Result<(), ApplyError> {
    let found_name = manifest.metadata.name.as_deref().unwrap_or(name);
    let found_namespace = manifest.metadata.namespace.as_deref().unwrap_or(namespace);
    if found_name != name || found_namespace != namespace {
        return Err(ApplyError::KeyMismatch {
            expected: format!("{}/{}", namespace, name),
            found: format!("{}/{}", found_namespace, found_name),
        });
    }
    Ok(())
}

fn labels_contain(labels: Option<&BTreeMap<String, String>>, key: &str, value: &str) -> bool {
    labels
        .and_then(|l| l.get(key))
        .map(|v| v.eq_ignore_ascii_case(value))
        .unwrap_or(false)
}

/// Ownership check over both the live object and the inbound manifest.
///
/// Anything labeled reporting-only is off limits. Beyond that, at least
/// one of the two must carry the managed label set to `true` or to this
/// agent's name.
fn validate_ownership(
    existing: Option<&DynamicObject>,
    inbound: &DynamicObject,
    agent_name: &str,
) -> Result<(), ApplyError> {
    let existing_labels = existing.and_then(|o| o.metadata.labels.as_ref());
    let inbound_labels = inbound.metadata.labels.as_ref();

    if labels_contain(existing_labels, REPORTING_LABEL, "true")
        || labels_contain(inbound_labels, REPORTING_LABEL, "true")
    {
        return Err(ApplyError::NotManaged(format!(
            "cannot modify a collector with `{}: true`",
            REPORTING_LABEL
        )));
    }
    if !labels_contain(existing_labels, MANAGED_LABEL, "true")
        && !labels_contain(existing_labels, MANAGED_LABEL, agent_name)
        && !labels_contain(inbound_labels, MANAGED_LABEL, "true")
        && !labels_contain(inbound_labels, MANAGED_LABEL, agent_name)
    {
        return Err(ApplyError::NotManaged(format!(
            "cannot modify a collector that doesn't have `{}: true | {}` set",
            MANAGED_LABEL, agent_name
        )));
    }
    Ok(())
}

/// Stamps the manifest with its final identity before apply: TypeMeta,
/// name and namespace from the key, the created-by label, and the
/// ownership label the live object already carries (updates never strip
/// a resource out of the agent's own listing).
fn build_desired(
    mut manifest: DynamicObject,
    existing: Option<&DynamicObject>,
    name: &str,
    namespace: &str,
) -> DynamicObject {
    manifest.types = Some(TypeMeta {
        api_version: format!("{}/{}", API_GROUP, API_VERSION),
        kind: COLLECTOR_KIND.to_string(),
    });
    manifest.metadata.name = Some(name.to_string());
    manifest.metadata.namespace = Some(namespace.to_string());

    let mut labels = manifest.metadata.labels.take().unwrap_or_default();
    labels.insert(CREATED_BY_LABEL.to_string(), CREATED_BY_VALUE.to_string());
    if let Some(existing_labels) = existing.and_then(|o| o.metadata.labels.as_ref()) {
        if let Some(managed) = existing_labels.get(MANAGED_LABEL) {
            labels
                .entry(MANAGED_LABEL.to_string())
                .or_insert_with(|| managed.clone());
        }
    }
    manifest.metadata.labels = Some(labels);
    manifest
}

/// Resource store backed by the Kubernetes API.
pub struct KubeApplier {
    client: Client,
    resource: ApiResource,
    agent_name: String,
    components_allowed: BTreeMap<String, Vec<String>>,
}

impl KubeApplier {
    pub fn new(
        client: Client,
        agent_name: impl Into<String>,
        components_allowed: BTreeMap<String, Vec<String>>,
    ) -> Self {
        KubeApplier {
            client,
            resource: collector_api_resource(),
            agent_name: agent_name.into(),
            components_allowed,
        }
    }

    fn collectors(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    fn all_collectors(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.resource)
    }

    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>, ApplyError> {
        match self.collectors(namespace).get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(KubeError::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(ApplyError::Api(e.to_string())),
        }
    }
}

#[async_trait]
impl ConfigApplier for KubeApplier {
    async fn apply(
        &self,
        name: &str,
        namespace: &str,
        config: &AgentConfigFile,
    ) -> Result<(), ApplyError> {
        info!("Received new config for Collector '{}/{}'", namespace, name);
        if config.body.is_empty() {
            return Err(ApplyError::EmptyConfig);
        }
        let manifest = parse_manifest(&config.body)?;
        validate_config_present(&manifest)?;
        validate_components(&manifest, &self.components_allowed)?;
        validate_key(&manifest, name, namespace)?;

        let existing = self.get_instance(name, namespace).await?;
        validate_ownership(existing.as_ref(), &manifest, &self.agent_name)?;

        let desired = build_desired(manifest, existing.as_ref(), name, namespace);
        let data =
            serde_json::to_value(&desired).map_err(|e| ApplyError::InvalidManifest(e.to_string()))?;
        let api = self.collectors(namespace);
        let params = PatchParams::apply(FIELD_MANAGER);
        let patch_name = name.to_string();

        with_retries(
            move || {
                let api = api.clone();
                let data = data.clone();
                let params = params.clone();
                let name = patch_name.clone();
                async move { api.patch(&name, &params, &Patch::Apply(data)).await }
            },
            RetryConfig::default(),
        )
        .await
        .map_err(|e| ApplyError::Api(e.to_string()))?;

        info!("Successfully applied Collector '{}/{}'", namespace, name);
        Ok(())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ApplyError> {
        if self.get_instance(name, namespace).await?.is_none() {
            debug!("Collector '{}/{}' already absent", namespace, name);
            return Ok(());
        }

        let api = self.collectors(namespace);
        let delete_name = name.to_string();
        let result = with_retries(
            move || {
                let api = api.clone();
                let name = delete_name.clone();
                async move { api.delete(&name, &DeleteParams::default()).await }
            },
            RetryConfig::default(),
        )
        .await;

        match result {
            Ok(_) => {
                info!("Successfully deleted Collector '{}/{}'", namespace, name);
                Ok(())
            }
            // Lost a race with another deleter; absent is what we wanted.
            Err(KubeError::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(ApplyError::Api(e.to_string())),
        }
    }

    async fn list_instances(&self) -> Result<Vec<Collector>, ApplyError> {
        let selectors = [
            format!("{} in ({},true)", MANAGED_LABEL, self.agent_name),
            format!("{}=true", REPORTING_LABEL),
        ];

        let mut instances = Vec::new();
        let mut seen = HashSet::new();
        for selector in selectors {
            let api = self.all_collectors();
            let params = ListParams::default().labels(&selector);
            let list = with_retries(
                move || {
                    let api = api.clone();
                    let params = params.clone();
                    async move { api.list(&params).await }
                },
                RetryConfig::default(),
            )
            .await
            .map_err(|e| ApplyError::Api(e.to_string()))?;

            for mut object in list.items {
                object.metadata.managed_fields = None;
                let identity = (
                    object.metadata.namespace.clone().unwrap_or_default(),
                    object.metadata.name.clone().unwrap_or_default(),
                );
                // A resource carrying both labels only appears once.
                if seen.insert(identity) {
                    instances.push(Collector::from_object(object));
                }
            }
        }
        Ok(instances)
    }

    async fn get_collector_pods(
        &self,
        selector: &Selector,
        namespace: &str,
    ) -> Result<Vec<PodRef>, ApplyError> {
        let api: Api<Pod> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let params = ListParams::default().labels(&selector.to_string());

        let list = with_retries(
            move || {
                let api = api.clone();
                let params = params.clone();
                async move { api.list(&params).await }
            },
            RetryConfig::default(),
        )
        .await
        .map_err(|e| ApplyError::Api(e.to_string()))?;

        Ok(list.items.iter().map(PodRef::from_pod).collect())
    }
}
