//! Workload descriptors — the concrete shape of a provisioned service.

use serde::{Deserialize, Serialize};

use crate::catalog::{self, ServicePlan};
use crate::error::CoreResult;
use crate::params::ProvisionParameters;

/// Minimum member count of a leader/follower group.
pub const LEADER_QUORUM: u32 = 3;

/// Deployment shape of a Habitat service group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    #[default]
    Standalone,
    Leader,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Standalone => "standalone",
            Topology::Leader => "leader",
        }
    }
}

/// Persistent volume requested for each member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentStorage {
    pub size: String,
    pub mount_path: String,
    pub storage_class_name: String,
}

/// Everything needed to build a workload resource for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub service_name: String,
    pub image: String,
    pub topology: Topology,
    pub group: String,
    pub instance_count: u32,
    pub persistent_storage: Option<PersistentStorage>,
}

impl WorkloadDescriptor {
    /// Build the descriptor for `plan` shaped by validated `params`.
    pub fn new(plan: &ServicePlan, params: &ProvisionParameters) -> Self {
        let instance_count = match params.topology {
            Topology::Leader => LEADER_QUORUM,
            Topology::Standalone => 1,
        };

        Self {
            service_name: plan.service_name.to_string(),
            image: plan.image.to_string(),
            topology: params.topology,
            group: params.group.clone(),
            instance_count,
            persistent_storage: None,
        }
    }

    /// Resolve `plan_id` and build its descriptor.
    pub fn for_plan(plan_id: &str, params: &ProvisionParameters) -> CoreResult<Self> {
        let plan = catalog::resolve(plan_id)?;
        Ok(Self::new(plan, params))
    }
}
