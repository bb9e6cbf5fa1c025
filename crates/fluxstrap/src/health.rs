//! Readiness checks for an installation.

use crate::cluster::{ClusterClient, ListSelector, ObjectRef, PART_OF_LABEL, PART_OF_VALUE};
use crate::error::{BootstrapError, Result};
use crate::manifests::sync::{source_ref, sync_ref};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The first object found not ready, with its controller's message.
    NotReady { object: String, message: String },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

pub struct HealthMonitor<'a, C: ClusterClient + ?Sized> {
    cluster: &'a C,
}

impl<'a, C: ClusterClient + ?Sized> HealthMonitor<'a, C> {
    pub fn new(cluster: &'a C) -> Self {
        Self { cluster }
    }

    /// Probes the cluster, then checks the source and sync objects.
    pub async fn check_ready(&self, namespace: &str) -> Result<Readiness> {
        self.probe(namespace).await?;

        for object in [source_ref(namespace, namespace), sync_ref(namespace, namespace)] {
            if self.cluster.get(&object).await?.is_none() {
                tracing::warn!(object = %object, "object not found");
                return Ok(Readiness::NotReady {
                    object: object.to_string(),
                    message: "not found".to_string(),
                });
            }
            let (ready, message) = self.cluster.poll_condition(&object, "Ready").await?;
            if !ready {
                tracing::warn!(object = %object, message = %message, "object not ready");
                return Ok(Readiness::NotReady {
                    object: object.to_string(),
                    message,
                });
            }
        }

        tracing::debug!(namespace, "installation ready");
        Ok(Readiness::Ready)
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let object = ObjectRef::new("v1", "Namespace", None, namespace);
        Ok(self.cluster.get(&object).await?.is_some())
    }

    /// Lists the controller Deployments; any failure means the cluster cannot be used.
    async fn probe(&self, namespace: &str) -> Result<()> {
        let selector = ListSelector::new("apps/v1", "Deployment")
            .in_namespace(namespace)
            .with_label(PART_OF_LABEL, PART_OF_VALUE);
        match self.cluster.list(&selector).await {
            Ok(_) => Ok(()),
            Err(BootstrapError::ClusterUnreachable(message)) => {
                Err(BootstrapError::ClusterUnreachable(message))
            }
            Err(e) => Err(BootstrapError::ClusterUnreachable(e.to_string())),
        }
    }
}
