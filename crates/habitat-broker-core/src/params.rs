//! Typed provisioning parameters and request context.
//!
//! The broker protocol delivers both as free-form JSON objects. They are
//! validated once, at the boundary, into the structs below.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::descriptor::Topology;
use crate::error::{CoreError, CoreResult};

fn default_group() -> String {
    "default".to_string()
}

/// Recognized provisioning parameters. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionParameters {
    #[serde(default)]
    pub topology: Topology,
    #[serde(default = "default_group")]
    pub group: String,
}

impl Default for ProvisionParameters {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            group: default_group(),
        }
    }
}

impl ProvisionParameters {
    /// Validate the raw `parameters` object. A missing object means defaults.
    pub fn from_map(raw: Option<&Map<String, Value>>) -> CoreResult<Self> {
        match raw {
            None => Ok(Self::default()),
            Some(map) => serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| CoreError::InvalidParameter(e.to_string())),
        }
    }
}

/// Recognized request context. Other platform keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionContext {
    pub namespace: String,
}

impl ProvisionContext {
    pub fn from_map(raw: Option<&Map<String, Value>>) -> CoreResult<Self> {
        let namespace = raw
            .and_then(|ctx| ctx.get("namespace"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::InvalidParameter(r#"key "namespace" in context is not a string"#.to_string())
            })?;

        if namespace.is_empty() {
            return Err(CoreError::InvalidParameter(
                r#"key "namespace" in context is empty"#.to_string(),
            ));
        }

        Ok(Self {
            namespace: namespace.to_string(),
        })
    }
}
