//! KubeStore — the object store backed by a Kubernetes API server.
//!
//! Namespaces, config maps and secrets map onto the core API; workloads
//! are `Habitat` custom resources (`habitat.sh/v1beta1`) reconciled by the
//! Habitat operator.

use std::collections::BTreeMap;

use habitat_broker_core::{PersistentStorage, Topology, WorkloadDescriptor};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap as KubeConfigMap, Namespace, Secret as KubeSecret};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::{Client, CustomResource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::objects::*;
use crate::store::{ObjectStore, StoreFuture};

/// Spec of the Habitat custom resource.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "habitat.sh",
    version = "v1beta1",
    kind = "Habitat",
    plural = "habitats",
    namespaced,
    schema = "disabled"
)]
pub struct HabitatSpec {
    pub v1beta2: HabitatV1beta2,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HabitatV1beta2 {
    pub image: String,
    pub count: u32,
    pub service: HabitatService,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_storage: Option<PersistentStorage>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HabitatService {
    pub name: String,
    pub topology: Topology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret_name: Option<String>,
}

fn to_habitat(w: &WorkloadResource) -> Habitat {
    let d = &w.descriptor;
    let mut hab = Habitat::new(
        &w.name,
        HabitatSpec {
            v1beta2: HabitatV1beta2 {
                image: d.image.clone(),
                count: d.instance_count,
                service: HabitatService {
                    name: d.service_name.clone(),
                    topology: d.topology,
                    group: Some(d.group.clone()),
                    config_secret_name: w.credential_secret_ref.clone(),
                },
                persistent_storage: d.persistent_storage.clone(),
            },
        },
    );
    hab.metadata.namespace = Some(w.namespace.clone());
    hab.metadata.labels = w
        .owner
        .as_ref()
        .map(|owner| BTreeMap::from([(OWNER_LABEL.to_string(), owner.clone())]));
    hab.metadata.resource_version = w.resource_version.clone();
    hab
}

fn from_habitat(hab: Habitat, namespace: &str) -> WorkloadResource {
    let owner = hab.metadata.labels.as_ref().and_then(|l| l.get(OWNER_LABEL)).cloned();
    let spec = hab.spec.v1beta2;
    WorkloadResource {
        namespace: hab.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
        name: hab.metadata.name.unwrap_or_default(),
        descriptor: WorkloadDescriptor {
            service_name: spec.service.name,
            image: spec.image,
            topology: spec.service.topology,
            group: spec.service.group.unwrap_or_else(|| "default".to_string()),
            instance_count: spec.count,
            persistent_storage: spec.persistent_storage,
        },
        credential_secret_ref: spec.service.config_secret_name,
        owner,
        resource_version: hab.metadata.resource_version,
    }
}

fn to_kube_config_map(cm: &ConfigMap) -> KubeConfigMap {
    KubeConfigMap {
        metadata: ObjectMeta {
            name: Some(cm.name.clone()),
            namespace: Some(cm.namespace.clone()),
            resource_version: cm.resource_version.clone(),
            ..Default::default()
        },
        data: Some(cm.data.clone()),
        ..Default::default()
    }
}

fn from_kube_config_map(cm: KubeConfigMap, namespace: &str) -> ConfigMap {
    ConfigMap {
        namespace: cm.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
        name: cm.metadata.name.unwrap_or_default(),
        data: cm.data.unwrap_or_default(),
        resource_version: cm.metadata.resource_version,
    }
}

fn to_kube_secret(s: &Secret) -> KubeSecret {
    let data = s
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
        .collect();
    KubeSecret {
        metadata: ObjectMeta {
            name: Some(s.name.clone()),
            namespace: Some(s.namespace.clone()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

fn from_kube_secret(s: KubeSecret, namespace: &str) -> Secret {
    let data: BTreeMap<String, String> = s
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    Secret {
        namespace: s.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
        name: s.metadata.name.unwrap_or_default(),
        data,
    }
}

/// Classify a client error for the object named by `what`.
fn classify(e: kube::Error, what: String) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(what)
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(format!("{what}: {}", ae.message)),
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(what),
        kube::Error::SerdeError(e) => StoreError::Serialize(format!("{what}: {e}")),
        other => StoreError::Backend(format!("{what}: {other}")),
    }
}

/// Object store talking to the cluster the broker runs in.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn connect() -> StoreResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| StoreError::Backend(format!("kubernetes client: {e}")))?;
        Ok(Self::new(client))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn config_maps(&self, namespace: &str) -> Api<KubeConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<KubeSecret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn habitats(&self, namespace: &str) -> Api<Habitat> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl ObjectStore for KubeStore {
    fn get_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.namespaces()
                .get(name)
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Namespace, "", name)))?;
            Ok(())
        })
    }

    fn create_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let ns = Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            self.namespaces()
                .create(&PostParams::default(), &ns)
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Namespace, "", name)))?;
            debug!(%name, "namespace created");
            Ok(())
        })
    }

    fn get_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ConfigMap> {
        Box::pin(async move {
            let cm = self
                .config_maps(namespace)
                .get(name)
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::ConfigMap, namespace, name)))?;
            Ok(from_kube_config_map(cm, namespace))
        })
    }

    fn create_config_map<'a>(&'a self, config_map: &'a ConfigMap) -> StoreFuture<'a, ConfigMap> {
        Box::pin(async move {
            let ns = &config_map.namespace;
            let cm = self
                .config_maps(ns)
                .create(&PostParams::default(), &to_kube_config_map(config_map))
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::ConfigMap, ns, &config_map.name)))?;
            Ok(from_kube_config_map(cm, ns))
        })
    }

    fn update_config_map<'a>(&'a self, config_map: &'a ConfigMap) -> StoreFuture<'a, ConfigMap> {
        Box::pin(async move {
            let ns = &config_map.namespace;
            let cm = self
                .config_maps(ns)
                .replace(&config_map.name, &PostParams::default(), &to_kube_config_map(config_map))
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::ConfigMap, ns, &config_map.name)))?;
            Ok(from_kube_config_map(cm, ns))
        })
    }

    fn get_secret<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let s = self
                .secrets(namespace)
                .get(name)
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Secret, namespace, name)))?;
            Ok(from_kube_secret(s, namespace))
        })
    }

    fn create_secret<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let ns = &secret.namespace;
            let s = self
                .secrets(ns)
                .create(&PostParams::default(), &to_kube_secret(secret))
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Secret, ns, &secret.name)))?;
            Ok(from_kube_secret(s, ns))
        })
    }

    fn delete_secret<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.secrets(namespace)
                .delete(name, &DeleteParams::default())
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Secret, namespace, name)))?;
            Ok(())
        })
    }

    fn get_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, WorkloadResource> {
        Box::pin(async move {
            let hab = self
                .habitats(namespace)
                .get(name)
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Workload, namespace, name)))?;
            Ok(from_habitat(hab, namespace))
        })
    }

    fn create_workload<'a>(&'a self, workload: &'a WorkloadResource) -> StoreFuture<'a, WorkloadResource> {
        Box::pin(async move {
            let ns = &workload.namespace;
            let hab = self
                .habitats(ns)
                .create(&PostParams::default(), &to_habitat(workload))
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Workload, ns, &workload.name)))?;
            Ok(from_habitat(hab, ns))
        })
    }

    fn update_workload<'a>(&'a self, workload: &'a WorkloadResource) -> StoreFuture<'a, WorkloadResource> {
        Box::pin(async move {
            let ns = &workload.namespace;
            let hab = self
                .habitats(ns)
                .replace(&workload.name, &PostParams::default(), &to_habitat(workload))
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Workload, ns, &workload.name)))?;
            Ok(from_habitat(hab, ns))
        })
    }

    fn delete_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.habitats(namespace)
                .delete(name, &DeleteParams::default())
                .await
                .map_err(|e| classify(e, object_ref(ObjectKind::Workload, namespace, name)))?;
            Ok(())
        })
    }
}
