//! Typed broker operations.
//!
//! The HTTP layer decodes wire requests into these structs and encodes the
//! responses back. `parameters` and `context` stay raw here; the lifecycle
//! manager validates them into [`crate::params`] types before mutating
//! anything.

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub accepts_incomplete: bool,
    pub parameters: Option<Map<String, Value>>,
    pub context: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeprovisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub accepts_incomplete: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: Option<String>,
    pub accepts_incomplete: bool,
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub accepts_incomplete: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnbindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub accepts_incomplete: bool,
}

/// Response to provision, deprovision, update and unbind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationResponse {
    /// Whether the response is marked asynchronous. The work itself has
    /// always completed by the time a response exists.
    #[serde(skip)]
    pub is_async: bool,
}

/// Response to bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BindResponse {
    #[serde(skip)]
    pub is_async: bool,
    #[serde(skip)]
    pub exists: bool,
}
