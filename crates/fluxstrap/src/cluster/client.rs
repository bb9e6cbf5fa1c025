//! Cluster backend on the Kubernetes API through `kube`.
//!
//! Every object goes through `Api<DynamicObject>` so CRDs applied in the same
//! run are reachable without discovery. Applies are server-side and forced,
//! owned by the field manager passed in by the installer. The client is built
//! on first use, so commands that never touch the cluster need no kubeconfig.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as ApiObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use super::object::ObjectMeta;
use super::{
    AppliedObject, ApplyAction, ClusterClient, Condition, KubeObject, ListSelector, ObjectRef,
};
use crate::config::ClusterSettings;
use crate::error::{BootstrapError, Result};

pub struct KubeCluster {
    settings: ClusterSettings,
    client: OnceCell<Client>,
}

impl KubeCluster {
    pub fn new(settings: &ClusterSettings) -> Self {
        Self {
            settings: settings.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| connect(&self.settings))
            .await
            .cloned()
    }

    async fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let client = self.client().await?;
        Ok(match namespace {
            Some(ns) => Api::namespaced_with(client, ns, resource),
            None => Api::all_with(client, resource),
        })
    }

    async fn api_for(&self, object: &ObjectRef) -> Result<Api<DynamicObject>> {
        self.api(
            &api_resource(&object.api_version, &object.kind),
            object.namespace.as_deref(),
        )
        .await
    }
}

/// Builds a client from the configured kubeconfig and context, falling back
/// to the in-cluster or default kubeconfig environment.
async fn connect(settings: &ClusterSettings) -> Result<Client> {
    let options = KubeConfigOptions {
        context: settings.context.clone(),
        ..Default::default()
    };

    let config = match &settings.kubeconfig {
        Some(path) => {
            let path = crate::secrets::expand_home(path);
            let kubeconfig = read_kubeconfig(&path)?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| BootstrapError::ClusterUnreachable(e.to_string()))?
        }
        None if settings.context.is_some() => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| BootstrapError::ClusterUnreachable(e.to_string()))?,
        None => Config::infer()
            .await
            .map_err(|e| BootstrapError::ClusterUnreachable(e.to_string()))?,
    };

    log::debug!("Connecting to Kubernetes API at {}", config.cluster_url);
    Client::try_from(config).map_err(|e| BootstrapError::ClusterUnreachable(e.to_string()))
}

fn read_kubeconfig(path: &Path) -> Result<Kubeconfig> {
    Kubeconfig::read_from(path).map_err(|e| {
        BootstrapError::ClusterUnreachable(format!(
            "failed to read kubeconfig {}: {}",
            path.display(),
            e
        ))
    })
}

/// Resource descriptor for an `apiVersion`/`kind` pair, with the plural
/// derived from the kind.
fn api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == 404)
}

fn cluster_error(target: &str, error: kube::Error) -> BootstrapError {
    match error {
        kube::Error::Api(ae) if ae.code == 401 => BootstrapError::ClusterUnreachable(ae.message),
        kube::Error::Api(ae) => BootstrapError::Cluster {
            object: target.to_string(),
            message: format!("{} ({})", ae.message, ae.reason),
        },
        kube::Error::SerdeError(e) => BootstrapError::Cluster {
            object: target.to_string(),
            message: format!("unexpected API response: {}", e),
        },
        other => BootstrapError::ClusterUnreachable(other.to_string()),
    }
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.clone())
}

fn to_dynamic(object: &KubeObject) -> DynamicObject {
    let resource = api_resource(&object.api_version, &object.kind);
    let mut dynamic = DynamicObject::new(object.name(), &resource);
    dynamic.metadata = ApiObjectMeta {
        name: Some(object.metadata.name.clone()),
        namespace: object.metadata.namespace.clone(),
        labels: non_empty(&object.metadata.labels),
        annotations: non_empty(&object.metadata.annotations),
        finalizers: (!object.metadata.finalizers.is_empty())
            .then(|| object.metadata.finalizers.clone()),
        ..Default::default()
    };
    dynamic.data = Value::Object(object.body.clone());
    dynamic
}

/// Converts an API object back into a [`KubeObject`]. List items of built-in
/// types come without `apiVersion`/`kind`, so the requested type fills them in.
fn from_dynamic(dynamic: DynamicObject, api_version: &str, kind: &str) -> KubeObject {
    let (api_version, kind) = match &dynamic.types {
        Some(types) => (types.api_version.clone(), types.kind.clone()),
        None => (api_version.to_string(), kind.to_string()),
    };
    let metadata = dynamic.metadata;
    let mut body = match dynamic.data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for key in ["apiVersion", "kind", "metadata"] {
        body.remove(key);
    }

    KubeObject {
        api_version,
        kind,
        metadata: ObjectMeta {
            name: metadata.name.unwrap_or_default(),
            namespace: metadata.namespace,
            labels: metadata.labels.unwrap_or_default(),
            annotations: metadata.annotations.unwrap_or_default(),
            finalizers: metadata.finalizers.unwrap_or_default(),
        },
        body,
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn apply(&self, objects: &[KubeObject], field_owner: &str) -> Result<Vec<AppliedObject>> {
        let params = PatchParams::apply(field_owner).force();
        let mut applied = Vec::with_capacity(objects.len());

        for object in objects {
            let target = object.object_ref();
            let api = self.api_for(&target).await?;
            let before = match api.get_opt(object.name()).await {
                Ok(existing) => existing.and_then(|o| o.metadata.resource_version),
                Err(e) => return Err(cluster_error(&target.to_string(), e)),
            };
            let existed = before.is_some();

            let after = api
                .patch(object.name(), &params, &Patch::Apply(&to_dynamic(object)))
                .await
                .map_err(|e| cluster_error(&target.to_string(), e))?;

            let action = if !existed {
                ApplyAction::Created
            } else if after.metadata.resource_version == before {
                ApplyAction::Unchanged
            } else {
                ApplyAction::Configured
            };
            log::debug!("{} {}", target, action);
            applied.push(AppliedObject {
                object: target,
                action,
            });
        }
        Ok(applied)
    }

    async fn get(&self, object: &ObjectRef) -> Result<Option<KubeObject>> {
        match self.api_for(object).await?.get_opt(&object.name).await {
            Ok(found) => Ok(found.map(|d| from_dynamic(d, &object.api_version, &object.kind))),
            Err(e) => Err(cluster_error(&object.to_string(), e)),
        }
    }

    async fn list(&self, selector: &ListSelector) -> Result<Vec<KubeObject>> {
        let api = self
            .api(
                &api_resource(&selector.api_version, &selector.kind),
                selector.namespace.as_deref(),
            )
            .await?;
        let mut params = ListParams::default();
        if !selector.labels.is_empty() {
            params = params.labels(&selector.label_selector());
        }

        match api.list(&params).await {
            Ok(list) => Ok(list
                .items
                .into_iter()
                .map(|d| from_dynamic(d, &selector.api_version, &selector.kind))
                .collect()),
            Err(e) if is_not_found(&e) => {
                log::debug!("{} is not served by the cluster", selector.kind);
                Ok(Vec::new())
            }
            Err(e) => Err(cluster_error(&selector.to_string(), e)),
        }
    }

    async fn delete(&self, object: &ObjectRef) -> Result<bool> {
        match self
            .api_for(object)
            .await?
            .delete(&object.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(cluster_error(&object.to_string(), e)),
        }
    }

    async fn remove_finalizers(&self, object: &ObjectRef) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": null } });
        match self
            .api_for(object)
            .await?
            .patch(&object.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(cluster_error(&object.to_string(), e)),
        }
    }

    async fn condition(
        &self,
        object: &ObjectRef,
        condition_type: &str,
    ) -> Result<Option<Condition>> {
        Ok(self.get(object).await?.and_then(|obj| {
            obj.conditions()
                .into_iter()
                .find(|c| c.condition_type == condition_type)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed: {}", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_api_resource() {
        let namespace = api_resource("v1", "Namespace");
        assert_eq!(namespace.group, "");
        assert_eq!(namespace.version, "v1");
        assert_eq!(namespace.plural, "namespaces");

        let sync = api_resource("kustomize.toolkit.fluxcd.io/v1", "Kustomization");
        assert_eq!(sync.group, "kustomize.toolkit.fluxcd.io");
        assert_eq!(sync.api_version, "kustomize.toolkit.fluxcd.io/v1");
        assert_eq!(sync.plural, "kustomizations");

        assert_eq!(
            api_resource("networking.k8s.io/v1", "NetworkPolicy").plural,
            "networkpolicies"
        );
    }

    #[test]
    fn test_dynamic_conversion_keeps_metadata_and_body() {
        let object = KubeObject::new("source.toolkit.fluxcd.io/v1", "GitRepository", "flux-system")
            .in_namespace("flux-system")
            .with_label("app.kubernetes.io/part-of", "flux")
            .with("spec", json!({"url": "ssh://git@example.com/fleet"}));

        let dynamic = to_dynamic(&object);
        assert_eq!(dynamic.metadata.namespace.as_deref(), Some("flux-system"));
        assert!(dynamic.metadata.annotations.is_none());
        assert_eq!(
            dynamic.types.as_ref().map(|t| t.kind.as_str()),
            Some("GitRepository")
        );

        let back = from_dynamic(dynamic, "unused/v1", "Unused");
        assert_eq!(back, object);
    }

    #[test]
    fn test_list_items_take_requested_type() {
        let item: DynamicObject = serde_json::from_value(json!({
            "metadata": {"name": "source-controller", "namespace": "flux-system", "resourceVersion": "42"},
            "spec": {"replicas": 1}
        }))
        .unwrap();

        let object = from_dynamic(item, "apps/v1", "Deployment");
        assert_eq!(object.api_version, "apps/v1");
        assert_eq!(object.kind, "Deployment");
        assert_eq!(object.field(&["spec", "replicas"]), Some(&json!(1)));
        assert!(object.field(&["metadata"]).is_none());
    }

    #[test]
    fn test_error_classification() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(409, "Conflict")));
        assert!(matches!(
            cluster_error("Secret/flux-system/flux-system", api_error(422, "Invalid")),
            BootstrapError::Cluster { .. }
        ));
        assert!(matches!(
            cluster_error("Namespace/flux-system", api_error(401, "Unauthorized")),
            BootstrapError::ClusterUnreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_connect_selects_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kubeconfig");
        std::fs::write(
            &path,
            r#"apiVersion: v1
kind: Config
clusters:
- name: dev
  cluster:
    server: https://127.0.0.1:6443
    insecure-skip-tls-verify: true
- name: prod
  cluster:
    server: https://10.0.0.1:6443
    insecure-skip-tls-verify: true
users:
- name: admin
  user:
    token: test-token
contexts:
- name: dev
  context: {cluster: dev, user: admin}
- name: prod
  context: {cluster: prod, user: admin}
current-context: dev
"#,
        )
        .unwrap();

        let settings = ClusterSettings {
            kubeconfig: Some(path.display().to_string()),
            context: Some("prod".to_string()),
        };
        assert!(connect(&settings).await.is_ok());

        let unknown_context = ClusterSettings {
            context: Some("staging".to_string()),
            ..settings
        };
        assert!(matches!(
            connect(&unknown_context).await,
            Err(BootstrapError::ClusterUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_surfaces_on_first_call() {
        let dir = tempfile::TempDir::new().unwrap();
        let cluster = KubeCluster::new(&ClusterSettings {
            kubeconfig: Some(dir.path().join("absent").display().to_string()),
            context: None,
        });

        let err = cluster
            .get(&ObjectRef::new("v1", "Namespace", None, "flux-system"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::ClusterUnreachable(_)));
    }
}
