//! Applies the installation to the cluster and tears it down again.

use std::time::Duration;

use tokio::time::Instant;

use crate::cluster::{
    AppliedObject, ClusterClient, KubeObject, ListSelector, ObjectRef, FIELD_OWNER,
    INSTANCE_LABEL, PART_OF_LABEL, PART_OF_VALUE,
};
use crate::config::Configuration;
use crate::error::{BootstrapError, Result};
use crate::manifests::install::TOOLKIT_APIS;
use crate::manifests::secret::credential_secret;
use crate::manifests::sync::{source_ref, sync_ref};
use crate::manifests::{parse_objects, ExpectedFileSet, ManifestPaths};

/// Interval between readiness polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Objects applied by one install, in apply order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub applied: Vec<AppliedObject>,
}

/// Namespaced workload kinds removed first on uninstall.
const COMPONENT_KINDS: &[(&str, &str)] = &[
    ("apps/v1", "Deployment"),
    ("v1", "Service"),
    ("networking.k8s.io/v1", "NetworkPolicy"),
    ("v1", "ServiceAccount"),
];

/// Cluster-scoped RBAC kinds removed with the components.
const CLUSTER_KINDS: &[(&str, &str)] = &[
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
    ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
];

pub struct ClusterInstaller<'a, C: ClusterClient + ?Sized> {
    cluster: &'a C,
    poll_interval: Duration,
}

impl<'a, C: ClusterClient + ?Sized> ClusterInstaller<'a, C> {
    pub fn new(cluster: &'a C) -> Self {
        Self {
            cluster,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Applies the committed manifests and waits for the installation to report ready.
    pub async fn install(
        &self,
        files: &ExpectedFileSet,
        config: &Configuration,
        deadline: Instant,
    ) -> Result<InstallReport> {
        let config = config.normalized();
        let paths = ManifestPaths::for_config(&config);
        let mut report = InstallReport::default();

        let components = manifest_objects(files, &paths.install)?;
        tracing::info!(namespace = %config.namespace, objects = components.len(), "applying install manifest");
        report
            .applied
            .extend(self.cluster.apply(&components, FIELD_OWNER).await?);

        for deployment in components.iter().filter(|o| o.kind == "Deployment") {
            self.wait_for(&deployment.object_ref(), "Available", deadline)
                .await?;
        }

        if let Some(secret) = credential_secret(&config)? {
            tracing::info!(secret = %secret.name(), "applying credential secret");
            report
                .applied
                .extend(self.cluster.apply(&[secret], FIELD_OWNER).await?);
        }

        let sync = manifest_objects(files, &paths.sync)?;
        tracing::info!(namespace = %config.namespace, "applying sync manifest");
        report
            .applied
            .extend(self.cluster.apply(&sync, FIELD_OWNER).await?);

        for object in [
            source_ref(&config.namespace, &config.namespace),
            sync_ref(&config.namespace, &config.namespace),
        ] {
            self.wait_for(&object, "Ready", deadline).await?;
        }

        tracing::info!(namespace = %config.namespace, "installation ready");
        Ok(report)
    }

    /// Polls a condition until it is true or `deadline` passes.
    pub async fn wait_for(&self, object: &ObjectRef, condition: &str, deadline: Instant) -> Result<()> {
        loop {
            let (ready, message) = self.cluster.poll_condition(object, condition).await?;
            if ready {
                tracing::debug!(object = %object, condition, "condition met");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BootstrapError::ReadinessTimeout {
                    object: object.to_string(),
                    message,
                });
            }
            tracing::debug!(object = %object, condition, message = %message, "waiting");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Removes the installation in dependency order, continuing past failures.
    pub async fn uninstall(&self, namespace: &str, keep_namespace: bool) -> Result<()> {
        let mut failures = Vec::new();

        tracing::info!(namespace, "deleting components");
        for (api_version, kind) in COMPONENT_KINDS {
            let selector = ListSelector::new(api_version, kind)
                .in_namespace(namespace)
                .with_label(PART_OF_LABEL, PART_OF_VALUE);
            self.delete_selected(&selector, &mut failures).await;
        }
        for (api_version, kind) in CLUSTER_KINDS {
            let selector = ListSelector::new(api_version, kind)
                .with_label(PART_OF_LABEL, PART_OF_VALUE)
                .with_label(INSTANCE_LABEL, namespace);
            self.delete_selected(&selector, &mut failures).await;
        }

        tracing::info!(namespace, "removing finalizers");
        for api in TOOLKIT_APIS {
            let selector = ListSelector::new(&api.api_version(), api.kind);
            match self.cluster.list(&selector).await {
                Ok(objects) => {
                    for object in objects {
                        let object = object.object_ref();
                        if let Err(e) = self.cluster.remove_finalizers(&object).await {
                            tracing::error!(object = %object, error = %e, "failed to remove finalizers");
                            failures.push(format!("{}: {}", object, e));
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(kind = api.kind, error = %e, "failed to list custom resources");
                    failures.push(format!("{}: {}", api.kind, e));
                }
            }
        }

        tracing::info!(namespace, "deleting custom resource definitions");
        let crds = ListSelector::new("apiextensions.k8s.io/v1", "CustomResourceDefinition")
            .with_label(PART_OF_LABEL, PART_OF_VALUE);
        self.delete_selected(&crds, &mut failures).await;

        if keep_namespace {
            tracing::info!(namespace, "keeping namespace");
        } else {
            tracing::info!(namespace, "deleting namespace");
            let object = ObjectRef::new("v1", "Namespace", None, namespace);
            if let Err(e) = self.cluster.delete(&object).await {
                tracing::error!(object = %object, error = %e, "failed to delete namespace");
                failures.push(format!("{}: {}", object, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BootstrapError::Teardown { failures })
        }
    }

    async fn delete_selected(&self, selector: &ListSelector, failures: &mut Vec<String>) {
        let objects = match self.cluster.list(selector).await {
            Ok(objects) => objects,
            Err(e) => {
                tracing::error!(selector = %selector, error = %e, "failed to list objects");
                failures.push(format!("{}: {}", selector, e));
                return;
            }
        };
        for object in objects {
            let object = object.object_ref();
            match self.cluster.delete(&object).await {
                Ok(true) => tracing::debug!(object = %object, "deleted"),
                Ok(false) => tracing::debug!(object = %object, "already gone"),
                Err(e) => {
                    tracing::error!(object = %object, error = %e, "failed to delete");
                    failures.push(format!("{}: {}", object, e));
                }
            }
        }
    }
}

fn manifest_objects(files: &ExpectedFileSet, path: &str) -> Result<Vec<KubeObject>> {
    let content = files
        .get(path)
        .ok_or_else(|| BootstrapError::State(format!("manifest '{}' missing from file set", path)))?;
    parse_objects(content, path)
}
