//! Instance registry.
//!
//! Maps each provisioned instance id to the namespace its workload lives in.
//! The whole mapping is one config map, bootstrapped at startup and cached
//! in memory. Writes go through a mutex held across the read-modify-write,
//! so concurrent updates to different instances cannot overwrite each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use habitat_broker_store::{ConfigMap, ObjectStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BrokerError, BrokerResult};

/// Registry key under which an instance's namespace is stored.
pub fn namespace_key(instance_id: &str) -> String {
    format!("{instance_id}.namespace")
}

pub struct InstanceRegistry {
    store: Arc<dyn ObjectStore>,
    config_map: Mutex<ConfigMap>,
}

impl InstanceRegistry {
    /// Load the registry, creating its namespace and config map if missing.
    pub async fn bootstrap(store: Arc<dyn ObjectStore>, namespace: &str, name: &str) -> BrokerResult<Self> {
        match store.get_namespace(namespace).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                info!(%namespace, "creating registry namespace");
                match store.create_namespace(namespace).await {
                    Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        let config_map = match store.get_config_map(namespace, name).await {
            Ok(cm) => cm,
            Err(StoreError::NotFound(_)) => {
                info!(%namespace, config_map = %name, "creating registry config map");
                match store.create_config_map(&ConfigMap::new(namespace, name)).await {
                    Ok(cm) => cm,
                    Err(StoreError::AlreadyExists(_)) => store.get_config_map(namespace, name).await?,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        debug!(%namespace, config_map = %name, entries = config_map.data.len(), "registry loaded");
        Ok(Self {
            store,
            config_map: Mutex::new(config_map),
        })
    }

    /// Cached value for `key`. Makes no store calls.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.config_map.lock().await.data.get(key).cloned()
    }

    /// Set `key` and persist. The cache is unchanged if the write fails.
    pub async fn put(&self, key: &str, value: &str) -> BrokerResult<()> {
        let mut cm = self.config_map.lock().await;
        let mut next = cm.clone();
        next.data.insert(key.to_string(), value.to_string());
        *cm = self.store.update_config_map(&next).await?;
        debug!(%key, %value, "registry entry written");
        Ok(())
    }

    /// Delete `key` and persist. The cache is unchanged if the write fails.
    pub async fn remove(&self, key: &str) -> BrokerResult<()> {
        let mut cm = self.config_map.lock().await;
        if !cm.data.contains_key(key) {
            return Err(BrokerError::InstanceNotFound(format!("no registry entry {key}")));
        }
        let mut next = cm.clone();
        next.data.remove(key);
        *cm = self.store.update_config_map(&next).await?;
        debug!(%key, "registry entry removed");
        Ok(())
    }

    /// Namespace recorded for `instance_id`.
    pub async fn namespace_of(&self, instance_id: &str) -> BrokerResult<String> {
        self.get(&namespace_key(instance_id))
            .await
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))
    }

    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.config_map.lock().await.data.clone()
    }
}
