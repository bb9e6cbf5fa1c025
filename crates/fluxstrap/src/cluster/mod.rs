//! Cluster capability used by the installer and the health monitor.

mod client;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod object;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use client::KubeCluster;
#[cfg(any(test, feature = "testing"))]
pub use memory::{ClusterCall, MemoryCluster};
pub use object::{KubeObject, ListSelector, ObjectMeta, ObjectRef};

/// Field manager used for server-side apply.
pub const FIELD_OWNER: &str = "flux";

/// Label carried by every object the installer creates.
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const PART_OF_VALUE: &str = "flux";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A status condition as reported by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(condition_type: &str, status: ConditionStatus, message: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: String::new(),
            message: message.to_string(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// What an apply did to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Created,
    Configured,
    Unchanged,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyAction::Created => "created",
            ApplyAction::Configured => "configured",
            ApplyAction::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedObject {
    pub object: ObjectRef,
    pub action: ApplyAction,
}

/// Access to the Kubernetes API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Server-side applies objects in order, owned by `field_owner`.
    async fn apply(&self, objects: &[KubeObject], field_owner: &str) -> Result<Vec<AppliedObject>>;

    async fn get(&self, object: &ObjectRef) -> Result<Option<KubeObject>>;

    async fn list(&self, selector: &ListSelector) -> Result<Vec<KubeObject>>;

    /// Deletes an object. Returns false if it did not exist.
    async fn delete(&self, object: &ObjectRef) -> Result<bool>;

    async fn remove_finalizers(&self, object: &ObjectRef) -> Result<()>;

    async fn condition(&self, object: &ObjectRef, condition_type: &str)
        -> Result<Option<Condition>>;

    /// Reports whether the condition is true, with the controller's message.
    async fn poll_condition(&self, object: &ObjectRef, condition_type: &str) -> Result<(bool, String)> {
        Ok(match self.condition(object, condition_type).await? {
            Some(condition) => (condition.is_true(), condition.message),
            None => (false, format!("{} condition not reported", condition_type)),
        })
    }
}
