//! Builders for test configurations.

#![allow(dead_code)]

use fluxstrap::config::{default_configuration, Configuration, HttpCredentials};
use fluxstrap::secrets::SecretSource;

pub const REPOSITORY_URL: &str = "https://example.com/acme/fleet.git";

/// Builder for `Configuration` instances pointing at the test remote.
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        let mut config = default_configuration();
        config.repository.url = REPOSITORY_URL.to_string();
        Self { config }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.config.namespace = namespace.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.config.repository.path = path.to_string();
        self
    }

    pub fn components(mut self, components: &[&str]) -> Self {
        self.config.components = components.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn keep_namespace(mut self, keep: bool) -> Self {
        self.config.keep_namespace = keep;
        self
    }

    pub fn delete_git_manifests(mut self, delete: bool) -> Self {
        self.config.delete_git_manifests = delete;
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.config.timeouts.create = timeout.to_string();
        self.config.timeouts.update = timeout.to_string();
        self.config.timeouts.delete = timeout.to_string();
        self.config.timeouts.read = timeout.to_string();
        self
    }

    pub fn http_password(mut self, password: &str) -> Self {
        self.config.credentials.http = Some(HttpCredentials {
            username: "git".to_string(),
            password: SecretSource::from_value(password),
            certificate_authority: None,
        });
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
