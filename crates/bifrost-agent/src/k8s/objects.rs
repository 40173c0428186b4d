//! Typed views over the managed collector resources and their pods.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use std::collections::BTreeMap;

use crate::keys::Selector;

pub static API_GROUP: &str = "bifrost.io";
pub static API_VERSION: &str = "v1alpha1";
pub static COLLECTOR_KIND: &str = "Collector";

pub static MANAGED_LABEL: &str = "bifrost.io/managed";
pub static REPORTING_LABEL: &str = "bifrost.io/reporting";
pub static CREATED_BY_LABEL: &str = "created-by";
pub static CREATED_BY_VALUE: &str = "bifrost-agent";

/// Field manager name stamped on server-side apply patches.
pub static FIELD_MANAGER: &str = "bifrost-agent";

pub fn collector_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(API_GROUP, API_VERSION, COLLECTOR_KIND)
}

pub fn collector_api_resource() -> ApiResource {
    ApiResource::from_gvk(&collector_gvk())
}

/// Conventional pod selector for definitions whose status does not carry
/// an explicit scale selector.
pub fn default_selector(namespace: &str, name: &str) -> Selector {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "bifrost-operator".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        format!("{}.{}", namespace, name),
    );
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        "bifrost".to_string(),
    );
    Selector::new(labels)
}

/// One managed collector definition, as listed from the cluster.
///
/// Wraps the raw dynamic object and reads the fields the bridge cares
/// about out of its untyped `status` subtree.
#[derive(Debug, Clone)]
pub struct Collector {
    object: DynamicObject,
}

impl Collector {
    pub fn from_object(object: DynamicObject) -> Self {
        Collector { object }
    }

    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    pub fn name(&self) -> String {
        self.object.metadata.name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> String {
        self.object.metadata.namespace.clone().unwrap_or_default()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.object.metadata.labels.clone().unwrap_or_default()
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.object
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
    }

    /// Replica summary from `status.scale.statusReplicas`, e.g. `"2/2"`.
    pub fn replica_summary(&self) -> String {
        self.object
            .data
            .pointer("/status/scale/statusReplicas")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Pod selector for this definition's live instances.
    ///
    /// Prefers the selector the operator published under
    /// `status.scale.selector`; falls back to the naming convention when
    /// the status has none.
    pub fn selector(&self) -> Selector {
        let published = self
            .object
            .data
            .pointer("/status/scale/selector")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if !published.is_empty() {
            let selector = Selector::parse(published);
            if !selector.is_empty() {
                return selector;
            }
        }
        default_selector(&self.namespace(), &self.name())
    }

    /// The whole definition rendered as YAML, for effective-config reports.
    pub fn to_yaml(&self) -> Result<Vec<u8>, serde_yaml::Error> {
        serde_yaml::to_string(&self.object).map(String::into_bytes)
    }
}

/// The slice of pod state the bridge reads: address, phase, start time.
#[derive(Debug, Clone, PartialEq)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    pub ip: Option<String>,
    pub phase: String,
    pub start_time: Option<DateTime<Utc>>,
}

impl PodRef {
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        PodRef {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            ip: status.and_then(|s| s.pod_ip.clone()),
            phase: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_default(),
            start_time: status.and_then(|s| s.start_time.as_ref().map(|t| t.0)),
        }
    }

    /// True when the pod phase indicates a running instance.
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}
