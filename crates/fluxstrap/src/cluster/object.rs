//! Minimal typed view of Kubernetes objects.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Condition, ConditionStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

/// A Kubernetes object: type, metadata and everything else as untyped JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl KubeObject {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            body: Map::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.metadata.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        self.metadata
            .labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Sets a top-level body field such as `spec` or `data`.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.body.insert(key.to_string(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Looks up a nested body field, e.g. `["spec", "ref", "branch"]`.
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.body.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        Some(current)
    }

    pub fn str_field(&self, path: &[&str]) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    /// Conditions reported under `status.conditions`.
    pub fn conditions(&self) -> Vec<Condition> {
        let Some(items) = self.field(&["status", "conditions"]).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let condition_type = item.get("type")?.as_str()?.to_string();
                let status = match item.get("status").and_then(Value::as_str) {
                    Some("True") => ConditionStatus::True,
                    Some("False") => ConditionStatus::False,
                    _ => ConditionStatus::Unknown,
                };
                Some(Condition {
                    condition_type,
                    status,
                    reason: item
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    message: item
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }

    /// Copy without server-populated fields, for comparison across applies.
    pub fn without_status(&self) -> Self {
        let mut copy = self.clone();
        copy.body.remove("status");
        copy
    }
}

/// Identity of an object in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// API group, empty for the core group.
    pub fn group(&self) -> &str {
        api_group(&self.api_version)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Selects objects of one type by namespace and labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSelector {
    pub api_version: String,
    pub kind: String,
    /// `None` lists across all namespaces (or cluster-scoped objects).
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ListSelector {
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn matches(&self, object: &KubeObject) -> bool {
        object.api_version == self.api_version
            && object.kind == self.kind
            && (self.namespace.is_none() || object.metadata.namespace == self.namespace)
            && self
                .labels
                .iter()
                .all(|(k, v)| object.metadata.labels.get(k) == Some(v))
    }

    /// `key=value,...` form used by label selectors.
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ListSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ns) = &self.namespace {
            write!(f, " in {}", ns)?;
        }
        if !self.labels.is_empty() {
            write!(f, " ({})", self.label_selector())?;
        }
        Ok(())
    }
}

pub(crate) fn api_group(api_version: &str) -> &str {
    match api_version.rsplit_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn git_repository() -> KubeObject {
        KubeObject::new("source.toolkit.fluxcd.io/v1", "GitRepository", "flux-system")
            .in_namespace("flux-system")
            .with_label("app.kubernetes.io/part-of", "flux")
            .with(
                "spec",
                json!({"ref": {"branch": "main"}, "url": "ssh://git@example.com/fleet"}),
            )
            .with(
                "status",
                json!({"conditions": [
                    {"type": "Ready", "status": "False", "reason": "AuthFailed", "message": "auth failed"},
                    {"type": "Reconciling", "status": "Maybe"}
                ]}),
            )
    }

    #[test]
    fn test_field_lookup() {
        let obj = git_repository();
        assert_eq!(obj.str_field(&["spec", "ref", "branch"]), Some("main"));
        assert!(obj.field(&["spec", "missing"]).is_none());
        assert!(obj.field(&[]).is_none());
    }

    #[test]
    fn test_conditions() {
        let conditions = git_repository().conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].message, "auth failed");
        assert_eq!(conditions[1].status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_yaml_layout() {
        let obj = KubeObject::new("v1", "Namespace", "flux-system")
            .with_label("app.kubernetes.io/part-of", "flux");
        let yaml = serde_yaml::to_string(&obj).unwrap();
        assert_eq!(
            yaml,
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: flux-system\n  labels:\n    app.kubernetes.io/part-of: flux\n"
        );
        let back: KubeObject = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn test_selector_matching() {
        let obj = git_repository();
        let selector = ListSelector::new("source.toolkit.fluxcd.io/v1", "GitRepository")
            .with_label("app.kubernetes.io/part-of", "flux");
        assert!(selector.matches(&obj));
        assert!(!selector.clone().in_namespace("other").matches(&obj));
        assert_eq!(selector.label_selector(), "app.kubernetes.io/part-of=flux");
    }

    #[test]
    fn test_ref_display_and_group() {
        let obj = git_repository();
        let r = obj.object_ref();
        assert_eq!(r.to_string(), "GitRepository/flux-system/flux-system");
        assert_eq!(r.group(), "source.toolkit.fluxcd.io");
        assert_eq!(ObjectRef::new("v1", "Namespace", None, "x").group(), "");
    }
}
