//! MemoryStore — an in-process object store.
//!
//! Used by the daemon's `--store memory` mode and as the test double for the
//! lifecycle layer. Besides plain storage it can be told to fail specific
//! (operation, kind) pairs and keeps a journal of every call it receives.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::objects::*;
use crate::store::{ObjectStore, StoreFuture};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// One call received by the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

/// An injected failure.
struct Fault {
    op: StoreOp,
    kind: ObjectKind,
    error: StoreError,
    /// `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    namespaces: BTreeSet<String>,
    config_maps: BTreeMap<Key, ConfigMap>,
    secrets: BTreeMap<Key, Secret>,
    workloads: BTreeMap<Key, WorkloadResource>,
    faults: Vec<Fault>,
    journal: Vec<StoreCall>,
    revision: u64,
}

impl Inner {
    fn next_version(&mut self) -> Option<String> {
        self.revision += 1;
        Some(self.revision.to_string())
    }

    /// Take the first matching fault, consuming one use of it.
    fn injected(&mut self, op: StoreOp, kind: ObjectKind) -> Option<StoreError> {
        let idx = self.faults.iter().position(|f| f.op == op && f.kind == kind)?;
        let fault = &mut self.faults[idx];
        let error = fault.error.clone();
        let exhausted = match fault.remaining.as_mut() {
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.faults.remove(idx);
        }
        Some(error)
    }
}

/// Thread-safe in-memory store; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal the call and apply any injected fault.
    fn begin(&self, op: StoreOp, kind: ObjectKind, namespace: &str, name: &str) -> StoreResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        inner.journal.push(StoreCall {
            op,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if let Some(err) = inner.injected(op, kind) {
            debug!(?op, %kind, %namespace, %name, error = %err, "injected store failure");
            return Err(err);
        }
        Ok(inner)
    }

    // ── Fault injection & inspection ───────────────────────────────

    /// Fail every `op` on `kind` with `error` until [`Self::clear_faults`].
    pub fn fail_always(&self, op: StoreOp, kind: ObjectKind, error: StoreError) {
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` calls of `op` on `kind` with `error`.
    pub fn fail_times(&self, op: StoreOp, kind: ObjectKind, error: StoreError, times: usize) {
        if times == 0 {
            return;
        }
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: Some(times),
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Every call received so far.
    pub fn journal(&self) -> Vec<StoreCall> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Count journaled calls of `op` on `kind`.
    pub fn calls(&self, op: StoreOp, kind: ObjectKind) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|c| c.op == op && c.kind == kind)
            .count()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains(name)
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock().config_maps.get(&key(namespace, name)).cloned()
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadResource> {
        self.lock().workloads.get(&key(namespace, name)).cloned()
    }

    /// All secrets in `namespace`, ordered by name.
    pub fn secrets_in(&self, namespace: &str) -> Vec<Secret> {
        self.lock()
            .secrets
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Seed a secret without journaling (to stage name collisions).
    pub fn insert_secret(&self, secret: Secret) {
        self.lock()
            .secrets
            .insert(key(&secret.namespace, &secret.name), secret);
    }

    // ── Synchronous operations ─────────────────────────────────────

    fn do_get_namespace(&self, name: &str) -> StoreResult<()> {
        let inner = self.begin(StoreOp::Get, ObjectKind::Namespace, "", name)?;
        if inner.namespaces.contains(name) {
            Ok(())
        } else {
            Err(StoreError::NotFound(object_ref(ObjectKind::Namespace, "", name)))
        }
    }

    fn do_create_namespace(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.begin(StoreOp::Create, ObjectKind::Namespace, "", name)?;
        if !inner.namespaces.insert(name.to_string()) {
            return Err(StoreError::AlreadyExists(object_ref(ObjectKind::Namespace, "", name)));
        }
        Ok(())
    }

    fn do_get_config_map(&self, namespace: &str, name: &str) -> StoreResult<ConfigMap> {
        let inner = self.begin(StoreOp::Get, ObjectKind::ConfigMap, namespace, name)?;
        inner
            .config_maps
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(object_ref(ObjectKind::ConfigMap, namespace, name)))
    }

    fn do_create_config_map(&self, cm: &ConfigMap) -> StoreResult<ConfigMap> {
        let mut inner = self.begin(StoreOp::Create, ObjectKind::ConfigMap, &cm.namespace, &cm.name)?;
        let k = key(&cm.namespace, &cm.name);
        if inner.config_maps.contains_key(&k) {
            return Err(StoreError::AlreadyExists(object_ref(
                ObjectKind::ConfigMap,
                &cm.namespace,
                &cm.name,
            )));
        }
        let mut stored = cm.clone();
        stored.resource_version = inner.next_version();
        inner.config_maps.insert(k, stored.clone());
        Ok(stored)
    }

    fn do_update_config_map(&self, cm: &ConfigMap) -> StoreResult<ConfigMap> {
        let mut inner = self.begin(StoreOp::Update, ObjectKind::ConfigMap, &cm.namespace, &cm.name)?;
        let what = object_ref(ObjectKind::ConfigMap, &cm.namespace, &cm.name);
        let k = key(&cm.namespace, &cm.name);
        let current = inner
            .config_maps
            .get(&k)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        check_version(&what, current.resource_version.as_deref(), cm.resource_version.as_deref())?;

        let mut stored = cm.clone();
        stored.resource_version = inner.next_version();
        inner.config_maps.insert(k, stored.clone());
        Ok(stored)
    }

    fn do_get_secret(&self, namespace: &str, name: &str) -> StoreResult<Secret> {
        let inner = self.begin(StoreOp::Get, ObjectKind::Secret, namespace, name)?;
        inner
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(object_ref(ObjectKind::Secret, namespace, name)))
    }

    fn do_create_secret(&self, secret: &Secret) -> StoreResult<Secret> {
        let mut inner = self.begin(StoreOp::Create, ObjectKind::Secret, &secret.namespace, &secret.name)?;
        let k = key(&secret.namespace, &secret.name);
        if inner.secrets.contains_key(&k) {
            return Err(StoreError::AlreadyExists(object_ref(
                ObjectKind::Secret,
                &secret.namespace,
                &secret.name,
            )));
        }
        inner.secrets.insert(k, secret.clone());
        Ok(secret.clone())
    }

    fn do_delete_secret(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut inner = self.begin(StoreOp::Delete, ObjectKind::Secret, namespace, name)?;
        inner
            .secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(object_ref(ObjectKind::Secret, namespace, name)))
    }

    fn do_get_workload(&self, namespace: &str, name: &str) -> StoreResult<WorkloadResource> {
        let inner = self.begin(StoreOp::Get, ObjectKind::Workload, namespace, name)?;
        inner
            .workloads
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(object_ref(ObjectKind::Workload, namespace, name)))
    }

    fn do_create_workload(&self, w: &WorkloadResource) -> StoreResult<WorkloadResource> {
        let mut inner = self.begin(StoreOp::Create, ObjectKind::Workload, &w.namespace, &w.name)?;
        let k = key(&w.namespace, &w.name);
        if inner.workloads.contains_key(&k) {
            return Err(StoreError::AlreadyExists(object_ref(
                ObjectKind::Workload,
                &w.namespace,
                &w.name,
            )));
        }
        let mut stored = w.clone();
        stored.resource_version = inner.next_version();
        inner.workloads.insert(k, stored.clone());
        Ok(stored)
    }

    fn do_update_workload(&self, w: &WorkloadResource) -> StoreResult<WorkloadResource> {
        let mut inner = self.begin(StoreOp::Update, ObjectKind::Workload, &w.namespace, &w.name)?;
        let what = object_ref(ObjectKind::Workload, &w.namespace, &w.name);
        let k = key(&w.namespace, &w.name);
        let current = inner
            .workloads
            .get(&k)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        check_version(&what, current.resource_version.as_deref(), w.resource_version.as_deref())?;

        let mut stored = w.clone();
        stored.resource_version = inner.next_version();
        inner.workloads.insert(k, stored.clone());
        Ok(stored)
    }

    fn do_delete_workload(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut inner = self.begin(StoreOp::Delete, ObjectKind::Workload, namespace, name)?;
        inner
            .workloads
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(object_ref(ObjectKind::Workload, namespace, name)))
    }
}

/// An update carrying a version must match the stored one.
fn check_version(what: &str, current: Option<&str>, proposed: Option<&str>) -> StoreResult<()> {
    match proposed {
        Some(v) if current != Some(v) => Err(StoreError::Conflict(format!(
            "{what} has been modified (have version {v}, store has {})",
            current.unwrap_or("none")
        ))),
        _ => Ok(()),
    }
}

impl ObjectStore for MemoryStore {
    fn get_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(std::future::ready(self.do_get_namespace(name)))
    }

    fn create_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(std::future::ready(self.do_create_namespace(name)))
    }

    fn get_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ConfigMap> {
        Box::pin(std::future::ready(self.do_get_config_map(namespace, name)))
    }

    fn create_config_map<'a>(&'a self, config_map: &'a ConfigMap) -> StoreFuture<'a, ConfigMap> {
        Box::pin(std::future::ready(self.do_create_config_map(config_map)))
    }

    fn update_config_map<'a>(&'a self, config_map: &'a ConfigMap) -> StoreFuture<'a, ConfigMap> {
        Box::pin(std::future::ready(self.do_update_config_map(config_map)))
    }

    fn get_secret<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, Secret> {
        Box::pin(std::future::ready(self.do_get_secret(namespace, name)))
    }

    fn create_secret<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret> {
        Box::pin(std::future::ready(self.do_create_secret(secret)))
    }

    fn delete_secret<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(std::future::ready(self.do_delete_secret(namespace, name)))
    }

    fn get_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, WorkloadResource> {
        Box::pin(std::future::ready(self.do_get_workload(namespace, name)))
    }

    fn create_workload<'a>(&'a self, workload: &'a WorkloadResource) -> StoreFuture<'a, WorkloadResource> {
        Box::pin(std::future::ready(self.do_create_workload(workload)))
    }

    fn update_workload<'a>(&'a self, workload: &'a WorkloadResource) -> StoreFuture<'a, WorkloadResource> {
        Box::pin(std::future::ready(self.do_update_workload(workload)))
    }

    fn delete_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(std::future::ready(self.do_delete_workload(namespace, name)))
    }
}
