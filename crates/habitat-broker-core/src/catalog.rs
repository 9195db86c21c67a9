//! Service catalog and plan resolution.
//!
//! The broker offers a fixed set of Habitat-packaged services, one plan each.
//! [`resolve`] maps an opaque plan identifier onto the [`ServicePlan`] that
//! describes what to run; [`catalog`] renders the same table in the shape the
//! broker protocol expects for `GET /v2/catalog`.

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{CoreError, CoreResult};

/// How credentials are issued for a bindable service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialRecipe {
    /// Secret names are `{secret_prefix}-{5 random chars}`.
    pub secret_prefix: &'static str,
    /// Key of the single data entry in the secret.
    pub data_key: &'static str,
    /// Length of the generated password.
    pub password_len: usize,
}

impl CredentialRecipe {
    /// Render the secret payload for a freshly generated password.
    pub fn render(&self, password: &str) -> String {
        format!("requirepass = \"{password}\"")
    }
}

/// One offered service together with its (single) plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePlan {
    pub service_id: &'static str,
    /// Catalog-visible service name, e.g. `redis-habitat`.
    pub catalog_name: &'static str,
    /// Short service type name; also the name of the workload resource.
    pub service_name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub plan_id: &'static str,
    pub plan_name: &'static str,
    pub plan_description: &'static str,
    /// Container image reference.
    pub image: &'static str,
    /// `Some` iff the service is bindable.
    pub credentials: Option<CredentialRecipe>,
}

impl ServicePlan {
    pub fn bindable(&self) -> bool {
        self.credentials.is_some()
    }

    /// Readable alias accepted by [`resolve`] in place of the plan UUID.
    pub fn alias(&self) -> String {
        format!("{}-plan", self.service_name)
    }
}

const IMAGE_URL: &str = "https://avatars2.githubusercontent.com/u/19862012?s=200&v=4";

/// Every plan the broker knows about.
pub static PLANS: [ServicePlan; 2] = [
    ServicePlan {
        service_id: "1ac7de1d-d89a-41c7-b9a8-744f9256e375",
        catalog_name: "nginx-habitat",
        service_name: "nginx",
        display_name: "Habitat Nginx service",
        description: "Nginx packaged with Habitat",
        plan_id: "86064792-7ea2-467b-af93-ac9694d96d5b",
        plan_name: "default",
        plan_description: "The default plan for the Nginx Habitat service",
        image: "kinvolk/osb-nginx:latest",
        credentials: None,
    },
    ServicePlan {
        service_id: "50e86479-4c66-4236-88fb-a1e61b4c9448",
        catalog_name: "redis-habitat",
        service_name: "redis",
        display_name: "Habitat Redis service",
        description: "Redis packaged with Habitat",
        plan_id: "002341cf-f895-49f4-ba04-bb70291b895c",
        plan_name: "default",
        plan_description: "The default plan for the Redis Habitat service",
        image: "kinvolk/osb-redis:latest",
        credentials: Some(CredentialRecipe {
            secret_prefix: "habitat-osb-redis",
            data_key: "user.toml",
            password_len: 10,
        }),
    },
];

/// Resolve a plan identifier (UUID or `{service}-plan` alias).
pub fn resolve(plan_id: &str) -> CoreResult<&'static ServicePlan> {
    if plan_id.is_empty() {
        return Err(CoreError::InvalidPlan("plan id is empty".to_string()));
    }

    PLANS
        .iter()
        .find(|p| p.plan_id == plan_id || p.alias() == plan_id)
        .ok_or_else(|| CoreError::InvalidPlan(format!("plan id {plan_id:?} does not match any plan")))
}

// ── Catalog document ──────────────────────────────────────────────

/// `GET /v2/catalog` response body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogResponse {
    pub services: Vec<CatalogService>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogService {
    pub name: String,
    pub id: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub metadata: Value,
    pub plans: Vec<CatalogPlan>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogPlan {
    pub name: String,
    pub id: String,
    pub description: String,
    pub free: bool,
    pub schemas: Value,
}

/// Build the catalog document from [`PLANS`].
pub fn catalog() -> CatalogResponse {
    CatalogResponse {
        services: PLANS.iter().map(catalog_service).collect(),
    }
}

fn catalog_service(plan: &ServicePlan) -> CatalogService {
    CatalogService {
        name: plan.catalog_name.to_string(),
        id: plan.service_id.to_string(),
        description: plan.description.to_string(),
        bindable: plan.bindable(),
        plan_updateable: false,
        metadata: json!({
            "displayName": plan.display_name,
            "imageUrl": IMAGE_URL,
        }),
        plans: vec![CatalogPlan {
            name: plan.plan_name.to_string(),
            id: plan.plan_id.to_string(),
            description: plan.plan_description.to_string(),
            free: true,
            schemas: provision_schema(),
        }],
    }
}

/// JSON schema advertising exactly the parameters provisioning accepts.
fn provision_schema() -> Value {
    json!({
        "service_instance": {
            "create": {
                "parameters": {
                    "$schema": "http://json-schema.org/draft-04/schema",
                    "type": "object",
                    "title": "Parameters",
                    "additionalProperties": false,
                    "properties": {
                        "topology": {
                            "title": "Topology",
                            "type": "string",
                            "default": "standalone",
                            "enum": ["standalone", "leader"]
                        },
                        "group": {
                            "title": "Service group",
                            "type": "string",
                            "default": "default"
                        }
                    }
                }
            }
        }
    })
}
