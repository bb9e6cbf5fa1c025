//! Validation of bootstrap configuration.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use super::duration::parse_duration;
use super::options::repository_url;
use super::schema::{
    Configuration, Operation, EXTRA_COMPONENTS, LOG_LEVELS, REQUIRED_COMPONENTS,
    TOOLKIT_COMPONENTS,
};
use crate::error::{BootstrapError, Result};
use crate::git::signing::normalize_key_id;
use crate::manifests::kustomization::check_override;

static RE_DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

static RE_DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

static RE_TOLERATION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*)$").unwrap());

const MAX_LABEL_LEN: usize = 63;
const MAX_SUBDOMAIN_LEN: usize = 253;

/// Collects every problem in a configuration before failing.
pub struct ConfigValidator {
    errors: Vec<String>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Validates a normalized configuration.
    pub fn validate(&mut self, config: &Configuration) -> Result<()> {
        self.errors.clear();

        self.validate_names(config);
        self.validate_components(config);
        self.validate_install_settings(config);
        self.validate_repository(config);
        self.validate_commit(config);
        self.validate_timeouts(config);

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(BootstrapError::Configuration(self.errors.join("; ")))
        }
    }

    fn validate_names(&mut self, config: &Configuration) {
        if config.namespace.is_empty() {
            self.errors.push("namespace must not be empty".to_string());
        } else if !is_dns_label(&config.namespace) {
            self.errors.push(format!(
                "namespace '{}' must be a lowercase RFC 1123 label of at most {} characters",
                config.namespace, MAX_LABEL_LEN
            ));
        }

        if !is_dns_subdomain(config.secret_name()) {
            self.errors.push(format!(
                "secretName '{}' must be a lowercase RFC 1123 subdomain of at most {} characters",
                config.secret_name(),
                MAX_SUBDOMAIN_LEN
            ));
        }

        if let Some(secret) = &config.image_pull_secret {
            if !is_dns_subdomain(secret) {
                self.errors.push(format!(
                    "imagePullSecret '{}' must be a lowercase RFC 1123 subdomain",
                    secret
                ));
            }
        }

        for key in &config.toleration_keys {
            if key.len() > MAX_SUBDOMAIN_LEN || !RE_TOLERATION_KEY.is_match(key) {
                self.errors
                    .push(format!("toleration key '{}' is not a valid taint key", key));
            }
        }
    }

    fn validate_components(&mut self, config: &Configuration) {
        if config.components.len() < 2 {
            self.errors
                .push("components must list at least 2 controllers".to_string());
        }
        for component in &config.components {
            if !TOOLKIT_COMPONENTS.contains(&component.as_str()) {
                self.errors.push(format!(
                    "unknown component '{}', expected one of: {}",
                    component,
                    TOOLKIT_COMPONENTS.join(", ")
                ));
            }
        }
        for required in REQUIRED_COMPONENTS {
            if !config.components.iter().any(|c| c == required) {
                self.errors
                    .push(format!("components must contain '{}'", required));
            }
        }

        if config.components_extra.len() > EXTRA_COMPONENTS.len() {
            self.errors.push(format!(
                "componentsExtra may list at most {} controllers",
                EXTRA_COMPONENTS.len()
            ));
        }
        for component in &config.components_extra {
            if !EXTRA_COMPONENTS.contains(&component.as_str()) {
                self.errors.push(format!(
                    "unknown extra component '{}', expected one of: {}",
                    component,
                    EXTRA_COMPONENTS.join(", ")
                ));
            }
        }
    }

    fn validate_install_settings(&mut self, config: &Configuration) {
        if !LOG_LEVELS.contains(&config.log_level.as_str()) {
            self.errors.push(format!(
                "logLevel '{}' must be one of: {}",
                config.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if config.version != "latest" && !config.version.starts_with('v') {
            self.errors.push(format!(
                "version '{}' must either be latest or start with 'v'",
                config.version
            ));
        }

        if config.registry.trim().is_empty() {
            self.errors.push("registry must not be empty".to_string());
        }

        if config.cluster_domain.is_empty() || !is_dns_subdomain(&config.cluster_domain) {
            self.errors.push(format!(
                "clusterDomain '{}' is not a valid domain",
                config.cluster_domain
            ));
        }

        match parse_duration(&config.interval) {
            Ok(interval) if interval.is_zero() => {
                self.errors.push("interval must be greater than zero".to_string())
            }
            Ok(_) => {}
            Err(e) => self
                .errors
                .push(format!("interval '{}': {}", config.interval, e)),
        }
    }

    fn validate_repository(&mut self, config: &Configuration) {
        let repository = &config.repository;

        if repository.url.trim().is_empty() {
            self.errors.push("repository.url must not be empty".to_string());
        } else if let Err(e) = repository_url(config) {
            self.errors.push(e.to_string());
        }

        if repository.branch.trim().is_empty() {
            self.errors
                .push("repository.branch must not be empty".to_string());
        }

        let path = Path::new(&repository.path);
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            self.errors.push(format!(
                "repository.path '{}' must be relative and stay inside the repository",
                repository.path
            ));
        }

        if let Some(content) = &repository.kustomization_override {
            if let Err(message) = check_override(content) {
                self.errors.push(message);
            }
        }

        if config.credentials.http.is_some() && config.credentials.ssh.is_some() {
            self.errors.push(
                "credentials may configure either http or ssh, not both".to_string(),
            );
        }
        if let Some(http) = &config.credentials.http {
            if !http.password.is_configured() {
                self.errors
                    .push("credentials.http.password has no source".to_string());
            }
        }
        if let Some(ssh) = &config.credentials.ssh {
            if !ssh.private_key.is_configured() {
                self.errors
                    .push("credentials.ssh.privateKey has no source".to_string());
            }
        }
    }

    fn validate_commit(&mut self, config: &Configuration) {
        let commit = &config.commit;
        if commit.author_name.trim().is_empty() {
            self.errors
                .push("commit.authorName must not be empty".to_string());
        }
        if let Some(key_id) = &commit.gpg_key_id {
            if let Err(e) = normalize_key_id(key_id) {
                self.errors.push(e.to_string());
            }
        }
        if (commit.gpg_passphrase.is_some() || commit.gpg_key_id.is_some())
            && commit.gpg_key_ring.is_none()
        {
            self.errors.push(
                "commit.gpgKeyRing is required when a passphrase or key id is set".to_string(),
            );
        }
    }

    fn validate_timeouts(&mut self, config: &Configuration) {
        for operation in [
            Operation::Create,
            Operation::Read,
            Operation::Update,
            Operation::Delete,
        ] {
            if let Err(e) = config.timeouts.for_operation(operation) {
                self.errors.push(e.to_string());
            }
        }
    }
}

/// Returns true for a lowercase RFC 1123 label.
pub fn is_dns_label(value: &str) -> bool {
    value.len() <= MAX_LABEL_LEN && RE_DNS_LABEL.is_match(value)
}

/// Returns true for a lowercase RFC 1123 subdomain.
pub fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= MAX_SUBDOMAIN_LEN && RE_DNS_SUBDOMAIN.is_match(value)
}
