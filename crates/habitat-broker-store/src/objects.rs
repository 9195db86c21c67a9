//! Cluster objects the broker reads and writes.
//!
//! These are backend-neutral views: the Kubernetes store converts them to
//! and from `k8s-openapi` types, the memory store keeps them as-is.

use std::collections::BTreeMap;
use std::fmt;

use habitat_broker_core::WorkloadDescriptor;
use serde::{Deserialize, Serialize};

/// `apiVersion` of workload resources.
pub const WORKLOAD_API_VERSION: &str = "habitat.sh/v1beta1";
/// `kind` of workload resources.
pub const WORKLOAD_KIND: &str = "Habitat";
/// Label carrying the id of the instance a workload was provisioned for.
pub const OWNER_LABEL: &str = "osb.habitat.sh/instance-id";

/// Kinds of object the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Namespace,
    ConfigMap,
    Secret,
    Workload,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::ConfigMap => "configmap",
            ObjectKind::Secret => "secret",
            ObjectKind::Workload => "habitat",
        };
        f.write_str(s)
    }
}

/// Store verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
}

/// Human-readable `kind namespace/name` for errors and logs.
pub fn object_ref(kind: ObjectKind, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("{kind} {name}")
    } else {
        format!("{kind} {namespace}/{name}")
    }
}

/// A flat string map stored under a fixed name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
    /// Opaque optimistic-concurrency token; `None` on objects never persisted.
    pub resource_version: Option<String>,
}

impl ConfigMap {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data: BTreeMap::new(),
            resource_version: None,
        }
    }
}

/// An opaque secret holding string data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// A secret with a single `key = value` entry.
    pub fn single(namespace: &str, name: &str, key: &str, value: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data: BTreeMap::from([(key.to_string(), value.to_string())]),
        }
    }
}

/// The cluster-side representation of a provisioned service instance.
///
/// Named after the service type, so a namespace holds at most one live
/// workload per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResource {
    pub namespace: String,
    pub name: String,
    pub descriptor: WorkloadDescriptor,
    /// Name of the secret currently bound to this workload, if any.
    pub credential_secret_ref: Option<String>,
    /// Instance id the workload was provisioned for. `None` on workloads
    /// created without an owner label.
    pub owner: Option<String>,
    pub resource_version: Option<String>,
}

impl WorkloadResource {
    pub fn new(descriptor: WorkloadDescriptor, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: descriptor.service_name.clone(),
            descriptor,
            credential_secret_ref: None,
            owner: None,
            resource_version: None,
        }
    }

    pub fn owned_by(mut self, instance_id: &str) -> Self {
        self.owner = Some(instance_id.to_string());
        self
    }

    /// True unless the workload is labelled with a different instance id.
    pub fn belongs_to(&self, instance_id: &str) -> bool {
        self.owner.as_deref().is_none_or(|owner| owner == instance_id)
    }
}
