//! Request/response boundary over the reconciler.
//!
//! Every operation takes and returns plain serde structs so any host (the
//! CLI, an orchestrator, a test harness) can drive an installation without
//! depending on the reconciler's generics.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterClient;
use crate::config::{prepare_configuration, Configuration};
use crate::error::Result;
use crate::git::VersionControl;
use crate::lifecycle::{BootstrapReconciler, Diagnostics, Plan};
use crate::manifests;
use crate::state::PersistedState;

/// Envelope used when a response is written out as JSON.
#[derive(Debug, Serialize)]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl<T> From<Result<T>> for ServiceResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub configuration: Configuration,
    #[serde(default)]
    pub state: Option<PersistedState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub configuration: Configuration,
    pub state: PersistedState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub configuration: Configuration,
    pub state: PersistedState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub configuration: Configuration,
    pub state: PersistedState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    /// Namespace of the installation to import.
    pub id: String,
    /// Values that cannot be read from the cluster, such as credentials.
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub configuration: Configuration,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureResponse {
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan: Plan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub state: PersistedState,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    /// `None` when the installation no longer exists.
    pub state: Option<PersistedState>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub state: PersistedState,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub configuration: Configuration,
    pub state: PersistedState,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub path: String,
    pub content: String,
}

// ============================================================================
// Service
// ============================================================================

pub struct BootstrapService<V: VersionControl, C: ClusterClient> {
    reconciler: BootstrapReconciler<V, C>,
}

impl<V: VersionControl, C: ClusterClient> BootstrapService<V, C> {
    pub fn new(reconciler: BootstrapReconciler<V, C>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &BootstrapReconciler<V, C> {
        &self.reconciler
    }

    pub fn into_reconciler(self) -> BootstrapReconciler<V, C> {
        self.reconciler
    }

    /// Validates a configuration and returns it with defaults applied.
    pub fn configure(&self, request: ConfigureRequest) -> Result<ConfigureResponse> {
        Ok(ConfigureResponse {
            configuration: prepare_configuration(request.configuration)?,
        })
    }

    pub fn plan(&self, request: PlanRequest) -> Result<PlanResponse> {
        Ok(PlanResponse {
            plan: self
                .reconciler
                .plan(&request.configuration, request.state.as_ref())?,
        })
    }

    pub async fn create(&self, request: CreateRequest) -> Result<CreateResponse> {
        let outcome = self.reconciler.create(&request.configuration).await?;
        Ok(CreateResponse {
            state: outcome.value,
            diagnostics: outcome.diagnostics,
        })
    }

    pub async fn read(&self, request: ReadRequest) -> Result<ReadResponse> {
        let outcome = self
            .reconciler
            .refresh(&request.configuration, &request.state)
            .await?;
        Ok(ReadResponse {
            state: outcome.value,
            diagnostics: outcome.diagnostics,
        })
    }

    pub async fn update(&self, request: UpdateRequest) -> Result<UpdateResponse> {
        let outcome = self
            .reconciler
            .update(&request.configuration, &request.state)
            .await?;
        Ok(UpdateResponse {
            state: outcome.value,
            diagnostics: outcome.diagnostics,
        })
    }

    /// Never fails outright; the installation is untracked afterwards.
    pub async fn delete(&self, request: DeleteRequest) -> DeleteResponse {
        let outcome = self
            .reconciler
            .delete(&request.configuration, &request.state)
            .await;
        DeleteResponse {
            diagnostics: outcome.diagnostics,
            error: outcome.error.map(|e| e.to_string()),
        }
    }

    pub async fn import(&self, request: ImportRequest) -> Result<ImportResponse> {
        let outcome = self
            .reconciler
            .import(&request.id, &request.configuration)
            .await?;
        Ok(ImportResponse {
            configuration: outcome.value.configuration,
            state: outcome.value.state,
            diagnostics: outcome.diagnostics,
        })
    }

    pub fn render_install(&self, request: RenderRequest) -> Result<RenderResponse> {
        let config = prepare_configuration(request.configuration)?;
        let manifest = manifests::render_install(&config)?;
        Ok(RenderResponse {
            path: manifest.path,
            content: manifest.content,
        })
    }

    pub fn render_sync(&self, request: RenderRequest) -> Result<RenderResponse> {
        let config = prepare_configuration(request.configuration)?;
        let manifest = manifests::render_sync(&config)?;
        Ok(RenderResponse {
            path: manifest.path,
            content: manifest.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::config::default_configuration;
    use crate::git::MemoryRemote;

    fn service() -> BootstrapService<MemoryRemote, MemoryCluster> {
        BootstrapService::new(BootstrapReconciler::new(MemoryRemote::new(), MemoryCluster::new()))
    }

    fn configuration() -> Configuration {
        let mut config = default_configuration();
        config.repository.url = "https://example.com/acme/fleet.git".to_string();
        config
    }

    #[test]
    fn test_configure_normalizes() {
        let mut config = configuration();
        config.version = "latest".to_string();
        config.components.reverse();
        let response = service().configure(ConfigureRequest { configuration: config }).unwrap();
        assert_eq!(response.configuration.version, "v2.1.2");
        assert_eq!(response.configuration.components[0], "helm-controller");
    }

    #[test]
    fn test_configure_rejects_invalid() {
        let mut config = configuration();
        config.log_level = "trace".to_string();
        assert!(service().configure(ConfigureRequest { configuration: config }).is_err());
    }

    #[test]
    fn test_requests_deserialize_camel_case() {
        let request: PlanRequest = serde_json::from_value(serde_json::json!({
            "configuration": {
                "namespace": "flux",
                "repository": { "url": "https://example.com/fleet.git" }
            }
        }))
        .unwrap();
        assert_eq!(request.configuration.namespace, "flux");
        assert!(request.state.is_none());
    }

    #[test]
    fn test_render_sync() {
        let response = service()
            .render_sync(RenderRequest {
                configuration: configuration(),
            })
            .unwrap();
        assert_eq!(response.path, "flux-system/gotk-sync.yaml");
        assert!(response.content.contains("kind: GitRepository"));
    }

    #[tokio::test]
    async fn test_lifecycle_through_service() {
        let service = service();
        let created = service
            .create(CreateRequest {
                configuration: configuration(),
            })
            .await
            .unwrap();
        assert!(created.diagnostics.is_empty());

        let read = service
            .read(ReadRequest {
                configuration: configuration(),
                state: created.state.clone(),
            })
            .await
            .unwrap();
        assert_eq!(read.state.as_ref(), Some(&created.state));

        let plan = service
            .plan(PlanRequest {
                configuration: configuration(),
                state: read.state,
            })
            .unwrap();
        assert!(!plan.plan.has_changes());

        let deleted = service
            .delete(DeleteRequest {
                configuration: configuration(),
                state: created.state,
            })
            .await;
        assert!(deleted.error.is_none());
        let json = serde_json::to_value(&deleted).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_envelope_from_error() {
        let response: ServiceResponse<()> =
            Err(crate::error::BootstrapError::Configuration("bad".to_string())).into();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("bad"));
    }
}
