//! habitat-broker-core — pure building blocks of the Habitat service broker.
//!
//! Nothing in this crate performs I/O (apart from reading a config file).
//! It answers three questions for the layers above it:
//!
//! - which services and plans are offered ([`catalog`])
//! - what workload a plan plus its provisioning parameters turns into
//!   ([`descriptor`], [`params`])
//! - what a typed broker request and response look like ([`osb`])

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod osb;
pub mod params;

pub use catalog::{CredentialRecipe, ServicePlan, resolve};
pub use config::BrokerConfig;
pub use descriptor::{PersistentStorage, Topology, WorkloadDescriptor};
pub use error::{CoreError, CoreResult};
pub use params::{ProvisionContext, ProvisionParameters};
