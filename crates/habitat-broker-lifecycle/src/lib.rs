//! habitat-broker-lifecycle — provisioning and binding of Habitat services.
//!
//! Turns typed broker operations into object store traffic:
//!
//! - Provision creates a workload resource and records which namespace holds
//!   the instance
//! - Deprovision deletes it and forgets the instance
//! - Bind issues a uniquely named secret and points the workload at it
//! - Unbind detaches the secret, then deletes it
//!
//! # Architecture
//!
//! ```text
//! LifecycleManager
//!   ├── InstanceLocks     (one async mutex per instance id)
//!   ├── InstanceRegistry  (instance id → namespace, in one config map)
//!   ├── CredentialIssuer  (collision-tolerant secret creation + visibility polling)
//!   └── ObjectStore       (workload resources, secrets)
//! ```
//!
//! Two-step operations compensate on failure: a workload whose registry
//! entry cannot be written is deleted again, and a secret that cannot be
//! attached to its workload is deleted again.

pub mod credentials;
pub mod error;
pub mod locks;
pub mod manager;
pub mod registry;

pub use credentials::{CredentialIssuer, RetryPolicy};
pub use error::{BrokerError, BrokerResult};
pub use locks::InstanceLocks;
pub use manager::LifecycleManager;
pub use registry::InstanceRegistry;
