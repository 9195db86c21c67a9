//! The object store contract.

use std::future::Future;
use std::pin::Pin;

use crate::error::StoreResult;
use crate::objects::{ConfigMap, Secret, WorkloadResource};

/// Boxed future alias for store results.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Get/create/update/delete over the object kinds the broker touches.
///
/// `create_*` fails with `AlreadyExists` on a name collision, `get_*`,
/// `update_*` and `delete_*` with `NotFound` on a miss, and `update_*` with
/// `Conflict` when the object's resource version is stale. Returned objects
/// carry the version assigned by the store.
pub trait ObjectStore: Send + Sync {
    fn get_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;

    fn create_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;

    fn get_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ConfigMap>;

    fn create_config_map<'a>(&'a self, config_map: &'a ConfigMap) -> StoreFuture<'a, ConfigMap>;

    /// Replace the whole object.
    fn update_config_map<'a>(&'a self, config_map: &'a ConfigMap) -> StoreFuture<'a, ConfigMap>;

    fn get_secret<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, Secret>;

    fn create_secret<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret>;

    fn delete_secret<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()>;

    fn get_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, WorkloadResource>;

    fn create_workload<'a>(&'a self, workload: &'a WorkloadResource) -> StoreFuture<'a, WorkloadResource>;

    fn update_workload<'a>(&'a self, workload: &'a WorkloadResource) -> StoreFuture<'a, WorkloadResource>;

    fn delete_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, ()>;
}
