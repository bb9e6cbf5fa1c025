//! In-process cluster backend.
//!
//! Behaves like a cluster with healthy Flux controllers: applied source and
//! sync objects gain the controller finalizer and report ready, CRDs refuse to
//! go away while instances still hold finalizers, and deleting a namespace
//! removes its contents. Every call is recorded so callers can assert on the
//! exact sequence of requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::object::api_group;
use super::{
    AppliedObject, ApplyAction, ClusterClient, Condition, ConditionStatus, KubeObject,
    ListSelector, ObjectRef,
};
use crate::error::{BootstrapError, Result};

const CONTROLLER_FINALIZER: &str = "finalizers.fluxcd.io";

/// A request made against [`MemoryCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    Apply(Vec<ObjectRef>),
    Get(ObjectRef),
    List {
        kind: String,
        namespace: Option<String>,
    },
    Delete(ObjectRef),
    RemoveFinalizers(ObjectRef),
    Condition(ObjectRef, String),
}

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<ObjectRef, KubeObject>,
    calls: Vec<ClusterCall>,
    conditions: HashMap<(ObjectRef, String), Condition>,
    controllers_stopped: bool,
    failing_applies: BTreeMap<String, String>,
    failing_deletes: BTreeMap<String, String>,
    unreachable: Option<String>,
}

impl ClusterState {
    fn check_reachable(&self) -> Result<()> {
        match &self.unreachable {
            Some(reason) => Err(BootstrapError::ClusterUnreachable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Cluster kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an object without recording a call.
    pub fn insert(&self, object: KubeObject) {
        self.state().objects.insert(object.object_ref(), object);
    }

    pub fn object(&self, object: &ObjectRef) -> Option<KubeObject> {
        self.state().objects.get(object).cloned()
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.state().objects.contains_key(object)
    }

    pub fn objects(&self) -> Vec<KubeObject> {
        self.state().objects.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Forces a condition for one object, taking precedence over the simulated controllers.
    pub fn set_condition(&self, object: &ObjectRef, condition: Condition) {
        self.state()
            .conditions
            .insert((object.clone(), condition.condition_type.clone()), condition);
    }

    pub fn clear_conditions(&self) {
        self.state().conditions.clear();
    }

    /// Simulated controllers stop reporting conditions.
    pub fn stop_controllers(&self) {
        self.state().controllers_stopped = true;
    }

    pub fn fail_applies_of(&self, kind: &str, message: &str) {
        self.state()
            .failing_applies
            .insert(kind.to_string(), message.to_string());
    }

    pub fn fail_deletes_of(&self, kind: &str, message: &str) {
        self.state()
            .failing_deletes
            .insert(kind.to_string(), message.to_string());
    }

    pub fn set_unreachable(&self, reason: Option<&str>) {
        self.state().unreachable = reason.map(str::to_string);
    }
}

fn is_controller_managed(object: &ObjectRef) -> bool {
    matches!(object.kind.as_str(), "GitRepository" | "Kustomization")
        && api_group(&object.api_version).ends_with(".toolkit.fluxcd.io")
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn apply(&self, objects: &[KubeObject], _field_owner: &str) -> Result<Vec<AppliedObject>> {
        let mut state = self.state();
        state
            .calls
            .push(ClusterCall::Apply(objects.iter().map(KubeObject::object_ref).collect()));
        state.check_reachable()?;

        let mut applied = Vec::with_capacity(objects.len());
        for incoming in objects {
            let key = incoming.object_ref();
            if let Some(message) = state.failing_applies.get(&incoming.kind) {
                return Err(BootstrapError::Cluster {
                    object: key.to_string(),
                    message: message.clone(),
                });
            }

            let action = match state.objects.get(&key).cloned() {
                Some(existing) => {
                    let mut merged = incoming.without_status();
                    merged.metadata.finalizers = existing.metadata.finalizers.clone();
                    if let Some(status) = existing.body.get("status") {
                        merged.body.insert("status".to_string(), status.clone());
                    }
                    if merged == existing {
                        ApplyAction::Unchanged
                    } else {
                        state.objects.insert(key.clone(), merged);
                        ApplyAction::Configured
                    }
                }
                None => {
                    let mut created = incoming.without_status();
                    if is_controller_managed(&key) {
                        created.metadata.finalizers = vec![CONTROLLER_FINALIZER.to_string()];
                    }
                    state.objects.insert(key.clone(), created);
                    ApplyAction::Created
                }
            };
            applied.push(AppliedObject { object: key, action });
        }
        Ok(applied)
    }

    async fn get(&self, object: &ObjectRef) -> Result<Option<KubeObject>> {
        let mut state = self.state();
        state.calls.push(ClusterCall::Get(object.clone()));
        state.check_reachable()?;
        Ok(state.objects.get(object).cloned())
    }

    async fn list(&self, selector: &ListSelector) -> Result<Vec<KubeObject>> {
        let mut state = self.state();
        state.calls.push(ClusterCall::List {
            kind: selector.kind.clone(),
            namespace: selector.namespace.clone(),
        });
        state.check_reachable()?;
        Ok(state
            .objects
            .values()
            .filter(|obj| selector.matches(obj))
            .cloned()
            .collect())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<bool> {
        let mut state = self.state();
        state.calls.push(ClusterCall::Delete(object.clone()));
        state.check_reachable()?;

        if let Some(message) = state.failing_deletes.get(&object.kind) {
            return Err(BootstrapError::Cluster {
                object: object.to_string(),
                message: message.clone(),
            });
        }

        let Some(existing) = state.objects.get(object).cloned() else {
            return Ok(false);
        };

        let dependents: Vec<ObjectRef> = match object.kind.as_str() {
            "CustomResourceDefinition" => {
                let group = existing.str_field(&["spec", "group"]).unwrap_or_default();
                let kind = existing
                    .str_field(&["spec", "names", "kind"])
                    .unwrap_or_default();
                state
                    .objects
                    .keys()
                    .filter(|r| r.kind == kind && r.group() == group)
                    .cloned()
                    .collect()
            }
            "Namespace" => state
                .objects
                .keys()
                .filter(|r| r.namespace.as_deref() == Some(object.name.as_str()))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };

        let blocked: Vec<String> = dependents
            .iter()
            .filter(|r| {
                state
                    .objects
                    .get(*r)
                    .is_some_and(|obj| !obj.metadata.finalizers.is_empty())
            })
            .map(ToString::to_string)
            .collect();
        if !blocked.is_empty() {
            return Err(BootstrapError::Cluster {
                object: object.to_string(),
                message: format!("deletion blocked by finalizers on {}", blocked.join(", ")),
            });
        }

        for dependent in dependents {
            state.objects.remove(&dependent);
        }
        state.objects.remove(object);
        Ok(true)
    }

    async fn remove_finalizers(&self, object: &ObjectRef) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ClusterCall::RemoveFinalizers(object.clone()));
        state.check_reachable()?;
        if let Some(existing) = state.objects.get_mut(object) {
            existing.metadata.finalizers.clear();
        }
        Ok(())
    }

    async fn condition(
        &self,
        object: &ObjectRef,
        condition_type: &str,
    ) -> Result<Option<Condition>> {
        let mut state = self.state();
        state
            .calls
            .push(ClusterCall::Condition(object.clone(), condition_type.to_string()));
        state.check_reachable()?;

        if let Some(forced) = state
            .conditions
            .get(&(object.clone(), condition_type.to_string()))
        {
            return Ok(Some(forced.clone()));
        }

        let Some(existing) = state.objects.get(object) else {
            return Ok(None);
        };
        if let Some(reported) = existing
            .conditions()
            .into_iter()
            .find(|c| c.condition_type == condition_type)
        {
            return Ok(Some(reported));
        }
        if state.controllers_stopped {
            return Ok(None);
        }

        let message = match existing.field(&["spec", "ref", "branch"]).and_then(Value::as_str) {
            Some(branch) => format!("stored artifact for revision '{}'", branch),
            None => "Applied".to_string(),
        };
        Ok(Some(Condition::new(
            condition_type,
            ConditionStatus::True,
            &message,
        )))
    }
}
