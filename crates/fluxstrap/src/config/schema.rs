//! Typed configuration for a bootstrap installation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration::parse_duration;
use crate::error::{BootstrapError, Result};
use crate::secrets::SecretSource;

/// Flux version used when `latest` is requested.
pub const DEFAULT_FLUX_VERSION: &str = "v2.1.2";
pub const DEFAULT_NAMESPACE: &str = "flux-system";
pub const DEFAULT_REGISTRY: &str = "ghcr.io/fluxcd";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_AUTHOR: &str = "Flux";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_INTERVAL: &str = "1m0s";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Toolkit controllers that may appear in `components`.
pub const TOOLKIT_COMPONENTS: &[&str] = &[
    "source-controller",
    "kustomize-controller",
    "helm-controller",
    "notification-controller",
];

/// Controllers that may appear in `componentsExtra`.
pub const EXTRA_COMPONENTS: &[&str] = &["image-reflector-controller", "image-automation-controller"];

/// Components without which the source and sync objects cannot reconcile.
pub const REQUIRED_COMPONENTS: &[&str] = &["source-controller", "kustomize-controller"];

pub const LOG_LEVELS: &[&str] = &["info", "debug", "error"];

/// Full configuration of one bootstrap installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Namespace the controllers are installed into. Immutable after creation.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Flux version, `latest` or a `v`-prefixed release.
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_components")]
    pub components: Vec<String>,

    #[serde(default)]
    pub components_extra: Vec<String>,

    /// Container registry the controller images are pulled from.
    #[serde(default = "default_registry")]
    pub registry: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub network_policy: bool,

    #[serde(default)]
    pub toleration_keys: Vec<String>,

    #[serde(default = "default_true")]
    pub watch_all_namespaces: bool,

    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    /// Reconciliation interval of the source object.
    #[serde(default = "default_interval")]
    pub interval: String,

    #[serde(default)]
    pub repository: RepositorySettings,

    #[serde(default)]
    pub commit: CommitSettings,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub timeouts: Timeouts,

    /// Skip creating the credential Secret in the cluster.
    #[serde(default)]
    pub disable_secret_creation: bool,

    /// Leave the namespace in place on delete.
    #[serde(default)]
    pub keep_namespace: bool,

    /// Remove the committed manifests from the repository on delete.
    #[serde(default)]
    pub delete_git_manifests: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        default_configuration()
    }
}

/// Builds a configuration populated with every default.
pub fn default_configuration() -> Configuration {
    Configuration {
        namespace: default_namespace(),
        version: default_version(),
        components: default_components(),
        components_extra: Vec::new(),
        registry: default_registry(),
        image_pull_secret: None,
        log_level: default_log_level(),
        network_policy: true,
        toleration_keys: Vec::new(),
        watch_all_namespaces: true,
        cluster_domain: default_cluster_domain(),
        interval: default_interval(),
        repository: RepositorySettings::default(),
        commit: CommitSettings::default(),
        credentials: Credentials::default(),
        cluster: ClusterSettings::default(),
        timeouts: Timeouts::default(),
        disable_secret_creation: false,
        keep_namespace: false,
        delete_git_manifests: false,
    }
}

impl Configuration {
    /// Sorts and dedups list fields and resolves `latest`.
    ///
    /// Rendering depends on stable ordering, so this runs before every build.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.components,
            &mut self.components_extra,
            &mut self.toleration_keys,
        ] {
            list.iter_mut().for_each(|item| *item = item.trim().to_string());
            list.retain(|item| !item.is_empty());
            list.sort();
            list.dedup();
        }
        if self.version == "latest" {
            self.version = DEFAULT_FLUX_VERSION.to_string();
        }
        if self
            .image_pull_secret
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            self.image_pull_secret = None;
        }
        self.repository.path = self.repository.path.trim_matches('/').to_string();
    }

    /// Returns a normalized copy.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.normalize();
        config
    }

    /// Name of the credential Secret, defaulting to the namespace.
    pub fn secret_name(&self) -> &str {
        match self.repository.secret_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.namespace,
        }
    }

    /// Copy with credential material and signing keys removed, safe to persist.
    pub fn without_secrets(&self) -> Self {
        let mut config = self.clone();
        config.credentials = Credentials::default();
        config.commit.gpg_key_ring = None;
        config.commit.gpg_passphrase = None;
        config
    }

    /// Parsed reconciliation interval.
    pub fn interval_duration(&self) -> Result<Duration> {
        parse_duration(&self.interval).map_err(|e| {
            BootstrapError::Configuration(format!("interval '{}': {}", self.interval, e))
        })
    }
}

/// Repository identity and layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    /// Clone URL (`ssh://`, `https://`, `http://` or `file://`). Immutable after creation.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Directory inside the repository that holds `<namespace>/`.
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default)]
    pub recurse_submodules: bool,

    /// Raw kustomization.yaml used instead of the generated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomization_override: Option<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
            path: String::new(),
            secret_name: None,
            recurse_submodules: false,
            kustomization_override: None,
        }
    }
}

/// Commit author and signing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSettings {
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default)]
    pub author_email: String,

    /// Armored GPG key ring holding the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpg_key_ring: Option<SecretSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpg_passphrase: Option<SecretSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpg_key_id: Option<String>,

    /// Appended to every commit message after a blank line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_appendix: Option<String>,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: String::new(),
            gpg_key_ring: None,
            gpg_passphrase: None,
            gpg_key_id: None,
            message_appendix: None,
        }
    }
}

/// Transport credentials for the repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCredentials>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshCredentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCredentials {
    #[serde(default = "default_http_username")]
    pub username: String,

    pub password: SecretSource,

    /// PEM bundle used to verify the server certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshCredentials {
    #[serde(default = "default_ssh_username")]
    pub username: String,

    pub private_key: SecretSource,

    /// Passphrase of the private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretSource>,

    /// known_hosts lines for the Git host. Host keys are accepted on first use when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<String>,
}

/// How to reach the cluster. Without a kubeconfig the in-cluster or default
/// kubeconfig environment is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Lifecycle operations that run under their own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-operation timeouts as duration strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(default = "default_write_timeout")]
    pub create: String,
    #[serde(default = "default_read_timeout")]
    pub read: String,
    #[serde(default = "default_write_timeout")]
    pub update: String,
    #[serde(default = "default_write_timeout")]
    pub delete: String,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: default_write_timeout(),
            read: default_read_timeout(),
            update: default_write_timeout(),
            delete: default_write_timeout(),
        }
    }
}

impl Timeouts {
    pub fn for_operation(&self, operation: Operation) -> Result<Duration> {
        let raw = match operation {
            Operation::Create => &self.create,
            Operation::Read => &self.read,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        };
        parse_duration(raw).map_err(|e| {
            BootstrapError::Configuration(format!("{} timeout '{}': {}", operation, raw, e))
        })
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_version() -> String {
    DEFAULT_FLUX_VERSION.to_string()
}

fn default_components() -> Vec<String> {
    TOOLKIT_COMPONENTS.iter().map(|c| c.to_string()).collect()
}

fn default_registry() -> String {
    DEFAULT_REGISTRY.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_cluster_domain() -> String {
    DEFAULT_CLUSTER_DOMAIN.to_string()
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_author_name() -> String {
    DEFAULT_AUTHOR.to_string()
}

fn default_http_username() -> String {
    "git".to_string()
}

fn default_ssh_username() -> String {
    "git".to_string()
}

fn default_write_timeout() -> String {
    "10m".to_string()
}

fn default_read_timeout() -> String {
    "5m".to_string()
}
