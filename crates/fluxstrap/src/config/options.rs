//! Options consumed by the manifest generators.

use std::time::Duration;

use url::Url;

use super::schema::Configuration;
use crate::error::{BootstrapError, Result};

/// Options for the controller install manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Repository directory that holds `<namespace>/`.
    pub base_path: String,
    pub namespace: String,
    pub version: String,
    /// Toolkit components followed by extra components, each group sorted.
    pub components: Vec<String>,
    pub registry: String,
    pub image_pull_secret: Option<String>,
    pub watch_all_namespaces: bool,
    pub network_policy: bool,
    pub log_level: String,
    pub cluster_domain: String,
    pub toleration_keys: Vec<String>,
}

/// Options for the source and sync objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub base_path: String,
    pub namespace: String,
    pub name: String,
    pub url: String,
    pub branch: String,
    pub secret_name: String,
    pub interval: Duration,
    pub recurse_submodules: bool,
}

/// Splits a configuration into generator options.
///
/// The input is normalized first so that equal configurations always render
/// identical options.
pub fn render_options(config: &Configuration) -> Result<(InstallOptions, SyncOptions)> {
    let config = config.normalized();

    let mut components = config.components.clone();
    components.extend(config.components_extra.iter().cloned());

    let install = InstallOptions {
        base_path: config.repository.path.clone(),
        namespace: config.namespace.clone(),
        version: config.version.clone(),
        components,
        registry: config.registry.trim_end_matches('/').to_string(),
        image_pull_secret: config.image_pull_secret.clone(),
        watch_all_namespaces: config.watch_all_namespaces,
        network_policy: config.network_policy,
        log_level: config.log_level.clone(),
        cluster_domain: config.cluster_domain.clone(),
        toleration_keys: config.toleration_keys.clone(),
    };

    let sync = SyncOptions {
        base_path: config.repository.path.clone(),
        namespace: config.namespace.clone(),
        name: config.namespace.clone(),
        url: repository_url(&config)?.to_string(),
        branch: config.repository.branch.clone(),
        secret_name: config.secret_name().to_string(),
        interval: config.interval_duration()?,
        recurse_submodules: config.repository.recurse_submodules,
    };

    Ok((install, sync))
}

/// Parses the repository URL, adding the SSH user when the URL carries none.
pub fn repository_url(config: &Configuration) -> Result<Url> {
    let raw = config.repository.url.trim();
    let mut url = Url::parse(raw).map_err(|e| BootstrapError::InvalidRepositoryUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "ssh" => {
            if url.username().is_empty() {
                let user = config
                    .credentials
                    .ssh
                    .as_ref()
                    .map(|ssh| ssh.username.as_str())
                    .unwrap_or("git");
                url.set_username(user)
                    .map_err(|_| BootstrapError::InvalidRepositoryUrl {
                        url: raw.to_string(),
                        message: "cannot set SSH username".to_string(),
                    })?;
            }
        }
        "http" | "https" | "file" => {}
        other => {
            return Err(BootstrapError::InvalidRepositoryUrl {
                url: raw.to_string(),
                message: format!("unsupported scheme '{}'", other),
            })
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{default_configuration, SshCredentials};
    use crate::secrets::SecretSource;

    fn config() -> Configuration {
        let mut config = default_configuration();
        config.repository.url = "ssh://github.com/acme/fleet".to_string();
        config
    }

    #[test]
    fn test_components_then_extras() {
        let mut config = config();
        config.components = vec![
            "source-controller".to_string(),
            "kustomize-controller".to_string(),
        ];
        config.components_extra = vec![
            "image-reflector-controller".to_string(),
            "image-automation-controller".to_string(),
        ];
        let (install, _) = render_options(&config).unwrap();
        assert_eq!(
            install.components,
            vec![
                "kustomize-controller",
                "source-controller",
                "image-automation-controller",
                "image-reflector-controller",
            ]
        );
    }

    #[test]
    fn test_ssh_user_injected() {
        let (_, sync) = render_options(&config()).unwrap();
        assert_eq!(sync.url, "ssh://git@github.com/acme/fleet");

        let mut custom = config();
        custom.credentials.ssh = Some(SshCredentials {
            username: "deploy".to_string(),
            private_key: SecretSource::from_value("key"),
            password: None,
            known_hosts: None,
        });
        let (_, sync) = render_options(&custom).unwrap();
        assert_eq!(sync.url, "ssh://deploy@github.com/acme/fleet");
    }

    #[test]
    fn test_existing_user_kept() {
        let mut config = config();
        config.repository.url = "ssh://flux@example.com:2222/fleet.git".to_string();
        let url = repository_url(&config).unwrap();
        assert_eq!(url.as_str(), "ssh://flux@example.com:2222/fleet.git");
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let mut config = config();
        config.repository.url = "ftp://example.com/fleet".to_string();
        assert!(matches!(
            repository_url(&config),
            Err(BootstrapError::InvalidRepositoryUrl { .. })
        ));

        config.repository.url = "not a url".to_string();
        assert!(repository_url(&config).is_err());
    }

    #[test]
    fn test_sync_defaults() {
        let (install, sync) = render_options(&config()).unwrap();
        assert_eq!(sync.name, "flux-system");
        assert_eq!(sync.secret_name, "flux-system");
        assert_eq!(sync.branch, "main");
        assert_eq!(sync.interval, Duration::from_secs(60));
        assert_eq!(install.registry, "ghcr.io/fluxcd");
        assert_eq!(install.base_path, "");
    }
}
