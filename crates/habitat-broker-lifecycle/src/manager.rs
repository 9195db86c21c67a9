//! The lifecycle manager — one method per broker operation.

use std::sync::Arc;

use habitat_broker_core::catalog::{self, CatalogResponse, ServicePlan};
use habitat_broker_core::osb::{
    BindRequest, BindResponse, DeprovisionRequest, OperationResponse, ProvisionRequest, UnbindRequest,
    UpdateRequest,
};
use habitat_broker_core::{BrokerConfig, ProvisionContext, ProvisionParameters, WorkloadDescriptor};
use habitat_broker_store::{ObjectStore, Secret, StoreError, WorkloadResource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::credentials::{CredentialIssuer, RetryPolicy, random_token};
use crate::error::{BrokerError, BrokerResult};
use crate::locks::InstanceLocks;
use crate::registry::{InstanceRegistry, namespace_key};

pub struct LifecycleManager {
    store: Arc<dyn ObjectStore>,
    registry: InstanceRegistry,
    issuer: CredentialIssuer,
    locks: InstanceLocks,
    async_mode: bool,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: InstanceRegistry,
        policy: RetryPolicy,
        async_mode: bool,
    ) -> Self {
        Self {
            issuer: CredentialIssuer::new(store.clone(), policy),
            store,
            registry,
            locks: InstanceLocks::new(),
            async_mode,
        }
    }

    /// Bootstrap the registry and build a manager from `config`.
    pub async fn bootstrap(store: Arc<dyn ObjectStore>, config: &BrokerConfig) -> BrokerResult<Self> {
        let registry =
            InstanceRegistry::bootstrap(store.clone(), &config.registry.namespace, &config.registry.config_map)
                .await?;
        Ok(Self::new(
            store,
            registry,
            RetryPolicy::from(&config.credentials),
            config.broker.async_mode,
        ))
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn async_mode(&self) -> bool {
        self.async_mode
    }

    fn marks_async(&self, accepts_incomplete: bool) -> bool {
        accepts_incomplete && self.async_mode
    }

    pub fn catalog(&self) -> CatalogResponse {
        catalog::catalog()
    }

    // ── Provision / deprovision ──────────────────────────────────

    /// Create the workload resource and record the instance.
    ///
    /// Parameters and context are validated before anything is written. If
    /// the registry write fails the workload is deleted again.
    pub async fn provision(
        &self,
        req: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> BrokerResult<OperationResponse> {
        let params = ProvisionParameters::from_map(req.parameters.as_ref())?;
        resolve_plan(&req.service_id, &req.plan_id)?;
        let descriptor = WorkloadDescriptor::for_plan(&req.plan_id, &params)?;
        let ctx = ProvisionContext::from_map(req.context.as_ref())?;

        let _guard = self.locks.lock(&req.instance_id).await;
        ensure_live(cancel, "provision")?;

        if let Some(existing) = self.registry.get(&namespace_key(&req.instance_id)).await {
            return Err(BrokerError::InstanceExists(format!(
                "instance {} already provisioned in namespace {existing}",
                req.instance_id
            )));
        }

        let workload = WorkloadResource::new(descriptor, &ctx.namespace).owned_by(&req.instance_id);
        let created = self.store.create_workload(&workload).await?;

        if let Err(e) = self
            .registry
            .put(&namespace_key(&req.instance_id), &ctx.namespace)
            .await
        {
            match self.store.delete_workload(&created.namespace, &created.name).await {
                Ok(()) => warn!(
                    instance_id = %req.instance_id,
                    workload = %created.name,
                    "registry write failed, workload deleted"
                ),
                Err(cleanup) => error!(
                    instance_id = %req.instance_id,
                    workload = %created.name,
                    namespace = %created.namespace,
                    error = %cleanup,
                    "registry write failed and workload could not be deleted"
                ),
            }
            return Err(e);
        }

        info!(
            instance_id = %req.instance_id,
            service = %created.descriptor.service_name,
            namespace = %created.namespace,
            topology = %created.descriptor.topology.as_str(),
            count = created.descriptor.instance_count,
            "instance provisioned"
        );
        Ok(OperationResponse {
            is_async: self.marks_async(req.accepts_incomplete),
        })
    }

    /// Delete the workload resource and forget the instance.
    ///
    /// The registry entry is removed only after the workload delete
    /// succeeded; any failure on the way, a missing workload included,
    /// leaves it in place.
    pub async fn deprovision(
        &self,
        req: &DeprovisionRequest,
        cancel: &CancellationToken,
    ) -> BrokerResult<OperationResponse> {
        let plan = resolve_plan(&req.service_id, &req.plan_id)?;

        let _guard = self.locks.lock(&req.instance_id).await;
        ensure_live(cancel, "deprovision")?;

        let namespace = self.registry.namespace_of(&req.instance_id).await?;
        self.owned_workload(&namespace, plan, &req.instance_id).await?;
        self.store.delete_workload(&namespace, plan.service_name).await?;

        self.registry.remove(&namespace_key(&req.instance_id)).await?;

        info!(instance_id = %req.instance_id, service = %plan.service_name, %namespace, "instance deprovisioned");
        Ok(OperationResponse {
            is_async: self.marks_async(req.accepts_incomplete),
        })
    }

    /// Accepted and acknowledged; nothing is mutated.
    pub async fn update(&self, req: &UpdateRequest) -> BrokerResult<OperationResponse> {
        info!(instance_id = %req.instance_id, plan_id = ?req.plan_id, "update acknowledged");
        Ok(OperationResponse {
            is_async: self.marks_async(req.accepts_incomplete),
        })
    }

    pub async fn last_operation(&self, instance_id: &str) -> BrokerResult<()> {
        Err(BrokerError::NotImplemented(format!(
            "last operation polling for instance {instance_id}"
        )))
    }

    // ── Bind / unbind ────────────────────────────────────────────

    /// Issue a fresh credential secret and attach it to the workload.
    ///
    /// A secret previously attached to the workload is deleted once the new
    /// one is in place. If attaching fails the new secret is deleted again.
    pub async fn bind(&self, req: &BindRequest, cancel: &CancellationToken) -> BrokerResult<BindResponse> {
        let plan = resolve_plan(&req.service_id, &req.plan_id)?;

        let _guard = self.locks.lock(&req.instance_id).await;
        ensure_live(cancel, "bind")?;

        let namespace = self.registry.namespace_of(&req.instance_id).await?;
        let Some(recipe) = plan.credentials else {
            return Err(BrokerError::NotImplemented(format!(
                "binding is not supported for service {}",
                plan.service_name
            )));
        };

        let payload = recipe.render(&random_token(recipe.password_len));
        let secret = self
            .issuer
            .issue_secret(recipe.secret_prefix, recipe.data_key, &payload, &namespace, cancel)
            .await?;

        let previous = match self.attach_secret(&secret, plan, &req.instance_id, cancel).await {
            Ok(previous) => previous,
            Err(e) => {
                self.discard_secret(&secret, &req.instance_id).await;
                return Err(e);
            }
        };

        if let Some(old) = previous.filter(|old| *old != secret.name) {
            match self.store.delete_secret(&namespace, &old).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {
                    info!(instance_id = %req.instance_id, secret = %old, "replaced credential secret deleted");
                }
                Err(e) => warn!(
                    instance_id = %req.instance_id,
                    secret = %old,
                    error = %e,
                    "could not delete replaced credential secret"
                ),
            }
        }

        info!(
            instance_id = %req.instance_id,
            binding_id = %req.binding_id,
            secret = %secret.name,
            %namespace,
            "instance bound"
        );
        Ok(BindResponse {
            is_async: self.marks_async(req.accepts_incomplete),
            exists: true,
        })
    }

    /// Wait for `secret`, then point the workload at it. Returns the secret
    /// the workload referenced before.
    async fn attach_secret(
        &self,
        secret: &Secret,
        plan: &ServicePlan,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> BrokerResult<Option<String>> {
        self.issuer
            .verify_secret_exists(&secret.name, &secret.namespace, cancel)
            .await?;

        let mut workload = self.owned_workload(&secret.namespace, plan, instance_id).await?;
        let previous = workload.credential_secret_ref.replace(secret.name.clone());
        self.store.update_workload(&workload).await?;
        Ok(previous)
    }

    async fn discard_secret(&self, secret: &Secret, instance_id: &str) {
        match self.store.delete_secret(&secret.namespace, &secret.name).await {
            Ok(()) => warn!(%instance_id, secret = %secret.name, "bind failed, secret deleted"),
            Err(e) => error!(
                %instance_id,
                secret = %secret.name,
                namespace = %secret.namespace,
                error = %e,
                "bind failed and secret could not be deleted"
            ),
        }
    }

    /// Detach the credential secret from the workload, then delete it.
    pub async fn unbind(
        &self,
        req: &UnbindRequest,
        cancel: &CancellationToken,
    ) -> BrokerResult<OperationResponse> {
        let plan = resolve_plan(&req.service_id, &req.plan_id)?;

        let _guard = self.locks.lock(&req.instance_id).await;
        ensure_live(cancel, "unbind")?;

        let namespace = self.registry.namespace_of(&req.instance_id).await?;
        if !plan.bindable() {
            return Err(BrokerError::NotImplemented(format!(
                "unbinding is not supported for service {}",
                plan.service_name
            )));
        }

        let mut workload = self.owned_workload(&namespace, plan, &req.instance_id).await?;
        let Some(secret_name) = workload.credential_secret_ref.take() else {
            return Err(BrokerError::BindingNotFound(format!(
                "instance {} has no bound credentials",
                req.instance_id
            )));
        };

        self.store.update_workload(&workload).await?;

        match self.store.delete_secret(&namespace, &secret_name).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                warn!(instance_id = %req.instance_id, secret = %secret_name, "credential secret already gone");
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            instance_id = %req.instance_id,
            binding_id = %req.binding_id,
            secret = %secret_name,
            %namespace,
            "instance unbound"
        );
        Ok(OperationResponse {
            is_async: self.marks_async(req.accepts_incomplete),
        })
    }

    /// Fetch the plan's workload in `namespace`, refusing one labelled with
    /// another instance id.
    async fn owned_workload(
        &self,
        namespace: &str,
        plan: &ServicePlan,
        instance_id: &str,
    ) -> BrokerResult<WorkloadResource> {
        let workload = self.store.get_workload(namespace, plan.service_name).await?;
        if !workload.belongs_to(instance_id) {
            return Err(BrokerError::InvalidPlan(format!(
                "{} in namespace {namespace} belongs to instance {}, not {instance_id}",
                plan.service_name,
                workload.owner.as_deref().unwrap_or_default()
            )));
        }
        Ok(workload)
    }
}

/// Resolve `plan_id`, checking it against `service_id` when the caller sent one.
fn resolve_plan(service_id: &str, plan_id: &str) -> BrokerResult<&'static ServicePlan> {
    let plan = catalog::resolve(plan_id)?;
    if !service_id.is_empty() && service_id != plan.service_id {
        return Err(BrokerError::InvalidPlan(format!(
            "plan {plan_id} does not belong to service {service_id}"
        )));
    }
    Ok(plan)
}

/// Fail fast when the caller gave up while waiting for the instance lock.
fn ensure_live(cancel: &CancellationToken, op: &str) -> BrokerResult<()> {
    if cancel.is_cancelled() {
        return Err(BrokerError::Cancelled(format!("{op} was cancelled")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitat_broker_core::Topology;
    use habitat_broker_store::{MemoryStore, ObjectKind, StoreCall, StoreOp};
    use serde_json::{Map, Value, json};
    use std::time::Duration;

    const REDIS: &str = "002341cf-f895-49f4-ba04-bb70291b895c";
    const NGINX: &str = "86064792-7ea2-467b-af93-ac9694d96d5b";
    const NGINX_SERVICE: &str = "1ac7de1d-d89a-41c7-b9a8-744f9256e375";

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    fn obj(v: Value) -> Option<Map<String, Value>> {
        v.as_object().cloned()
    }

    async fn manager(store: &MemoryStore) -> LifecycleManager {
        manager_with(store, false).await
    }

    async fn manager_with(store: &MemoryStore, async_mode: bool) -> LifecycleManager {
        let mut config = BrokerConfig::default();
        config.broker.async_mode = async_mode;
        let mgr = LifecycleManager::bootstrap(Arc::new(store.clone()), &config).await.unwrap();
        store.clear_journal();
        mgr
    }

    fn provision_req(instance_id: &str, plan_id: &str, namespace: &str) -> ProvisionRequest {
        ProvisionRequest {
            instance_id: instance_id.into(),
            plan_id: plan_id.into(),
            context: obj(json!({"platform": "kubernetes", "namespace": namespace})),
            ..Default::default()
        }
    }

    fn bind_req(instance_id: &str, plan_id: &str) -> BindRequest {
        BindRequest {
            instance_id: instance_id.into(),
            binding_id: "b1".into(),
            plan_id: plan_id.into(),
            ..Default::default()
        }
    }

    fn unbind_req(instance_id: &str, plan_id: &str) -> UnbindRequest {
        UnbindRequest {
            instance_id: instance_id.into(),
            binding_id: "b1".into(),
            plan_id: plan_id.into(),
            ..Default::default()
        }
    }

    fn deprovision_req(instance_id: &str, plan_id: &str) -> DeprovisionRequest {
        DeprovisionRequest {
            instance_id: instance_id.into(),
            plan_id: plan_id.into(),
            ..Default::default()
        }
    }

    fn registry_cm(store: &MemoryStore) -> std::collections::BTreeMap<String, String> {
        store
            .config_map("habitat-service-broker-configuration", "habitat-service-broker")
            .unwrap()
            .data
    }

    #[tokio::test]
    async fn provision_creates_workload_and_registry_entry() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;

        let resp = mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        assert!(!resp.is_async);

        let w = store.workload("ns1", "redis").unwrap();
        assert_eq!(w.descriptor.image, "kinvolk/osb-redis:latest");
        assert_eq!(w.descriptor.topology, Topology::Standalone);
        assert_eq!(w.descriptor.group, "default");
        assert_eq!(w.descriptor.instance_count, 1);
        assert_eq!(w.owner.as_deref(), Some("i1"));
        assert_eq!(registry_cm(&store).get("i1.namespace").unwrap(), "ns1");
    }

    #[tokio::test]
    async fn leader_topology_runs_three_members() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        let mut req = provision_req("i1", NGINX, "ns1");
        req.parameters = obj(json!({"topology": "leader", "group": "blue"}));

        mgr.provision(&req, &live()).await.unwrap();

        let w = store.workload("ns1", "nginx").unwrap();
        assert_eq!(w.descriptor.topology, Topology::Leader);
        assert_eq!(w.descriptor.group, "blue");
        assert_eq!(w.descriptor.instance_count, 3);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_store_call() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;

        let mut bad_topology = provision_req("i1", REDIS, "ns1");
        bad_topology.parameters = obj(json!({"topology": "mesh"}));
        assert!(matches!(mgr.provision(&bad_topology, &live()).await, Err(BrokerError::InvalidParameter(_))));

        let mut unknown_key = provision_req("i1", REDIS, "ns1");
        unknown_key.parameters = obj(json!({"replicas": 5}));
        assert!(matches!(mgr.provision(&unknown_key, &live()).await, Err(BrokerError::InvalidParameter(_))));

        let mut bad_ctx = provision_req("i1", REDIS, "ns1");
        bad_ctx.context = obj(json!({"namespace": 42}));
        assert!(matches!(mgr.provision(&bad_ctx, &live()).await, Err(BrokerError::InvalidParameter(_))));

        let unknown_plan = provision_req("i1", "no-such-plan", "ns1");
        assert!(matches!(mgr.provision(&unknown_plan, &live()).await, Err(BrokerError::InvalidPlan(_))));

        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn provision_twice_is_rejected() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.clear_journal();

        let err = mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::InstanceExists(_)));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn duplicate_service_in_namespace_is_a_conflict() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();

        let err = mgr.provision(&provision_req("i2", REDIS, "ns1"), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Upstream(StoreError::AlreadyExists(_))));
        assert!(!registry_cm(&store).contains_key("i2.namespace"));
        assert!(store.workload("ns1", "redis").is_some());
    }

    #[tokio::test]
    async fn failed_registry_write_deletes_workload() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        store.fail_times(StoreOp::Update, ObjectKind::ConfigMap, StoreError::Backend("etcd".into()), 1);

        let err = mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap_err();
        assert_eq!(err, BrokerError::Upstream(StoreError::Backend("etcd".into())));
        assert!(store.workload("ns1", "redis").is_none());
        assert!(registry_cm(&store).is_empty());
        assert_eq!(store.calls(StoreOp::Delete, ObjectKind::Workload), 1);
    }

    #[tokio::test]
    async fn failed_workload_create_writes_nothing() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        store.fail_times(StoreOp::Create, ObjectKind::Workload, StoreError::Backend("quota".into()), 1);

        assert!(mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.is_err());
        assert_eq!(store.calls(StoreOp::Update, ObjectKind::ConfigMap), 0);
        assert!(registry_cm(&store).is_empty());
    }

    #[tokio::test]
    async fn provision_then_deprovision_in_order() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.clear_journal();

        mgr.deprovision(&deprovision_req("i1", REDIS), &live()).await.unwrap();

        let mutating: Vec<StoreCall> = store
            .journal()
            .into_iter()
            .filter(|c| c.op != StoreOp::Get)
            .collect();
        assert_eq!(mutating.len(), 2);
        assert_eq!((mutating[0].op, mutating[0].kind), (StoreOp::Delete, ObjectKind::Workload));
        assert_eq!(mutating[0].namespace, "ns1");
        assert_eq!(mutating[0].name, "redis");
        assert_eq!((mutating[1].op, mutating[1].kind), (StoreOp::Update, ObjectKind::ConfigMap));
        assert!(store.workload("ns1", "redis").is_none());
        assert!(registry_cm(&store).is_empty());
    }

    #[tokio::test]
    async fn deprovision_unknown_instance_touches_nothing() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;

        let err = mgr.deprovision(&deprovision_req("ghost", REDIS), &live()).await.unwrap_err();
        assert_eq!(err, BrokerError::InstanceNotFound("ghost".into()));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn failed_workload_delete_keeps_registry_entry() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.fail_times(StoreOp::Delete, ObjectKind::Workload, StoreError::Backend("down".into()), 1);

        assert!(mgr.deprovision(&deprovision_req("i1", REDIS), &live()).await.is_err());
        assert_eq!(registry_cm(&store).get("i1.namespace").unwrap(), "ns1");

        mgr.deprovision(&deprovision_req("i1", REDIS), &live()).await.unwrap();
        assert!(registry_cm(&store).is_empty());
    }

    #[tokio::test]
    async fn missing_workload_keeps_registry_entry() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.fail_times(StoreOp::Delete, ObjectKind::Workload, StoreError::NotFound("redis".into()), 1);

        let err = mgr.deprovision(&deprovision_req("i1", REDIS), &live()).await.unwrap_err();
        assert_eq!(err, BrokerError::Upstream(StoreError::NotFound("redis".into())));
        assert_eq!(registry_cm(&store).get("i1.namespace").unwrap(), "ns1");
    }

    #[tokio::test]
    async fn deprovision_with_another_services_plan_deletes_nothing() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        mgr.provision(&provision_req("i2", NGINX, "ns1"), &live()).await.unwrap();
        mgr.provision(&provision_req("i3", REDIS, "ns2"), &live()).await.unwrap();

        // nginx in ns1 exists but belongs to i2.
        let err = mgr.deprovision(&deprovision_req("i1", NGINX), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidPlan(_)));

        // No nginx in ns2 at all.
        let err = mgr.deprovision(&deprovision_req("i3", NGINX), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Upstream(StoreError::NotFound(_))));

        assert!(store.workload("ns1", "redis").is_some());
        assert!(store.workload("ns1", "nginx").is_some());
        assert!(store.workload("ns2", "redis").is_some());
        assert_eq!(store.calls(StoreOp::Delete, ObjectKind::Workload), 0);
        assert_eq!(registry_cm(&store).len(), 3);
    }

    #[tokio::test]
    async fn service_id_must_match_plan() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.clear_journal();

        let mut deprovision = deprovision_req("i1", REDIS);
        deprovision.service_id = NGINX_SERVICE.into();
        let mut bind = bind_req("i1", REDIS);
        bind.service_id = NGINX_SERVICE.into();
        let mut unbind = unbind_req("i1", REDIS);
        unbind.service_id = NGINX_SERVICE.into();
        let mut provision = provision_req("i9", REDIS, "ns9");
        provision.service_id = NGINX_SERVICE.into();

        assert!(matches!(mgr.deprovision(&deprovision, &live()).await, Err(BrokerError::InvalidPlan(_))));
        assert!(matches!(mgr.bind(&bind, &live()).await, Err(BrokerError::InvalidPlan(_))));
        assert!(matches!(mgr.unbind(&unbind, &live()).await, Err(BrokerError::InvalidPlan(_))));
        assert!(matches!(mgr.provision(&provision, &live()).await, Err(BrokerError::InvalidPlan(_))));
        assert!(store.journal().is_empty());

        let mut matching = deprovision_req("i1", REDIS);
        matching.service_id = "50e86479-4c66-4236-88fb-a1e61b4c9448".into();
        mgr.deprovision(&matching, &live()).await.unwrap();
    }

    #[tokio::test]
    async fn bind_refuses_another_instances_workload() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i2", REDIS, "ns1"), &live()).await.unwrap();
        mgr.registry().put("i1.namespace", "ns1").await.unwrap();

        let err = mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidPlan(_)));
        assert!(store.secrets_in("ns1").is_empty());
        assert!(store.workload("ns1", "redis").unwrap().credential_secret_ref.is_none());
    }

    #[tokio::test]
    async fn bind_attaches_a_fresh_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();

        let resp = mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap();
        assert!(resp.exists);
        assert!(!resp.is_async);

        let secrets = store.secrets_in("ns1");
        assert_eq!(secrets.len(), 1);
        let secret = &secrets[0];
        assert!(secret.name.starts_with("habitat-osb-redis-"));
        assert_eq!(secret.name.len(), "habitat-osb-redis-".len() + 5);

        let payload = secret.data.get("user.toml").unwrap();
        let password = payload
            .strip_prefix("requirepass = \"")
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap();
        assert_eq!(password.len(), 10);
        assert!(password.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));

        let w = store.workload("ns1", "redis").unwrap();
        assert_eq!(w.credential_secret_ref.as_deref(), Some(secret.name.as_str()));
    }

    #[tokio::test]
    async fn rebinding_replaces_the_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        let cancel = CancellationToken::new();

        mgr.bind(&bind_req("i1", REDIS), &cancel).await.unwrap();
        let first = store.workload("ns1", "redis").unwrap().credential_secret_ref.unwrap();
        mgr.bind(&bind_req("i1", REDIS), &cancel).await.unwrap();

        let secrets = store.secrets_in("ns1");
        assert_eq!(secrets.len(), 1);
        assert_ne!(secrets[0].name, first);
        assert_eq!(
            store.workload("ns1", "redis").unwrap().credential_secret_ref.as_deref(),
            Some(secrets[0].name.as_str())
        );
    }

    #[tokio::test]
    async fn bind_unknown_instance_is_not_found() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;

        let err = mgr.bind(&bind_req("ghost", REDIS), &live()).await.unwrap_err();
        assert_eq!(err, BrokerError::InstanceNotFound("ghost".into()));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn non_bindable_service_is_not_implemented() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", NGINX, "ns1"), &live()).await.unwrap();
        store.clear_journal();

        let err = mgr.bind(&bind_req("i1", NGINX), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotImplemented(_)));
        let err = mgr.unbind(&unbind_req("i1", NGINX), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotImplemented(_)));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn failed_workload_update_deletes_new_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.fail_times(StoreOp::Update, ObjectKind::Workload, StoreError::Conflict("stale".into()), 1);

        let err = mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap_err();
        assert_eq!(err, BrokerError::Upstream(StoreError::Conflict("stale".into())));
        assert!(store.secrets_in("ns1").is_empty());
        assert!(store.workload("ns1", "redis").unwrap().credential_secret_ref.is_none());
    }

    #[tokio::test]
    async fn bind_on_missing_workload_deletes_new_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.registry().put("i1.namespace", "ns1").await.unwrap();

        let err = mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Upstream(StoreError::NotFound(_))));
        assert!(store.secrets_in("ns1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bind_gives_up_on_persistent_collisions() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.fail_always(StoreOp::Create, ObjectKind::Secret, StoreError::AlreadyExists("taken".into()));

        let err = mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::RetriesExhausted(_)));
        assert!(store.workload("ns1", "redis").unwrap().credential_secret_ref.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_verification_deletes_new_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        store.fail_always(StoreOp::Get, ObjectKind::Secret, StoreError::NotFound("lagging".into()));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let err = mgr.bind(&bind_req("i1", REDIS), &cancel).await.unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled(_)));
        assert!(store.secrets_in("ns1").is_empty());
    }

    #[tokio::test]
    async fn unbind_detaches_then_deletes() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap();
        store.clear_journal();

        mgr.unbind(&unbind_req("i1", REDIS), &live()).await.unwrap();

        assert!(store.secrets_in("ns1").is_empty());
        assert!(store.workload("ns1", "redis").unwrap().credential_secret_ref.is_none());
        let order: Vec<(StoreOp, ObjectKind)> = store.journal().into_iter().map(|c| (c.op, c.kind)).collect();
        assert_eq!(
            order,
            vec![
                (StoreOp::Get, ObjectKind::Workload),
                (StoreOp::Update, ObjectKind::Workload),
                (StoreOp::Delete, ObjectKind::Secret),
            ]
        );
    }

    #[tokio::test]
    async fn unbind_without_binding_is_binding_not_found() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();

        let err = mgr.unbind(&unbind_req("i1", REDIS), &live()).await.unwrap_err();
        assert!(matches!(err, BrokerError::BindingNotFound(_)));
    }

    #[tokio::test]
    async fn unbind_tolerates_an_already_deleted_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap();
        store.fail_times(StoreOp::Delete, ObjectKind::Secret, StoreError::NotFound("gone".into()), 1);

        mgr.unbind(&unbind_req("i1", REDIS), &live()).await.unwrap();
        assert!(store.workload("ns1", "redis").unwrap().credential_secret_ref.is_none());
        assert_eq!(store.calls(StoreOp::Delete, ObjectKind::Secret), 1);
    }

    #[tokio::test]
    async fn failed_detach_keeps_the_secret() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        mgr.provision(&provision_req("i1", REDIS, "ns1"), &live()).await.unwrap();
        mgr.bind(&bind_req("i1", REDIS), &live()).await.unwrap();
        store.fail_times(StoreOp::Update, ObjectKind::Workload, StoreError::Backend("down".into()), 1);

        assert!(mgr.unbind(&unbind_req("i1", REDIS), &live()).await.is_err());
        assert_eq!(store.secrets_in("ns1").len(), 1);
        assert!(store.workload("ns1", "redis").unwrap().credential_secret_ref.is_some());
    }

    #[tokio::test]
    async fn async_flag_needs_mode_and_caller_consent() {
        let store = MemoryStore::new();
        let mgr = manager_with(&store, true).await;

        let mut req = provision_req("i1", REDIS, "ns1");
        req.accepts_incomplete = true;
        assert!(mgr.provision(&req, &live()).await.unwrap().is_async);

        let update = UpdateRequest {
            instance_id: "i1".into(),
            accepts_incomplete: false,
            ..Default::default()
        };
        assert!(!mgr.update(&update).await.unwrap().is_async);

        let sync_store = MemoryStore::new();
        let sync_mgr = manager(&sync_store).await;
        let mut req = provision_req("i1", REDIS, "ns1");
        req.accepts_incomplete = true;
        assert!(!sync_mgr.provision(&req, &live()).await.unwrap().is_async);
    }

    #[tokio::test]
    async fn update_mutates_nothing() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;

        let req = UpdateRequest {
            instance_id: "i1".into(),
            plan_id: Some(REDIS.into()),
            parameters: obj(json!({"topology": "leader"})),
            ..Default::default()
        };
        mgr.update(&req).await.unwrap();
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn cancelled_caller_mutates_nothing() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = mgr.provision(&provision_req("i1", REDIS, "ns1"), &cancel).await.unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled(_)));
        assert!(store.journal().is_empty());
        assert!(registry_cm(&store).is_empty());
    }

    #[tokio::test]
    async fn last_operation_is_not_implemented() {
        let store = MemoryStore::new();
        let mgr = manager(&store).await;
        assert!(matches!(mgr.last_operation("i1").await, Err(BrokerError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn concurrent_provisions_of_one_instance_succeed_once() {
        let store = MemoryStore::new();
        let mgr = Arc::new(manager(&store).await);

        let mut handles = Vec::new();
        for ns in ["ns1", "ns2", "ns3", "ns4"] {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.provision(&provision_req("i1", REDIS, ns), &live()).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, BrokerError::InstanceExists(_))),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(store.calls(StoreOp::Create, ObjectKind::Workload), 1);
        assert_eq!(registry_cm(&store).len(), 1);
    }

    #[tokio::test]
    async fn concurrent_provisions_of_different_instances_all_register() {
        let store = MemoryStore::new();
        let mgr = Arc::new(manager(&store).await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.provision(&provision_req(&format!("i{i}"), REDIS, &format!("ns{i}")), &live()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(registry_cm(&store).len(), 8);
    }
}
