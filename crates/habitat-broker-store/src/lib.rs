//! habitat-broker-store — the object store the broker drives.
//!
//! The broker never caches cluster objects of its own; every lifecycle step
//! is a get/create/update/delete against an [`ObjectStore`] keyed by
//! `(kind, namespace, name)`.
//!
//! # Backends
//!
//! ```text
//! ObjectStore
//!   ├── KubeStore   (kube::Client; Namespace, ConfigMap, Secret, Habitat CRD)
//!   └── MemoryStore (maps behind a mutex; fault injection + call journal)
//! ```
//!
//! Both report collisions as [`StoreError::AlreadyExists`], misses as
//! [`StoreError::NotFound`] and stale resource versions as
//! [`StoreError::Conflict`], which is all the lifecycle layer branches on.

pub mod error;
pub mod kubernetes;
pub mod memory;
pub mod objects;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, StoreCall};
pub use objects::*;
pub use store::{ObjectStore, StoreFuture};
