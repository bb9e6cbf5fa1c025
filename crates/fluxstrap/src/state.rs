//! Durable state of a bootstrapped installation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::error::{BootstrapError, Result};
use crate::manifests::RecordedFileSet;

/// What survives between lifecycle operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Identity of the installation; equal to the namespace.
    pub id: String,
    pub namespace: String,
    pub repository_files: RecordedFileSet,
    /// Configuration the installation was last written with, without secrets.
    pub settings: Configuration,
}

impl PersistedState {
    pub fn new(config: &Configuration, repository_files: RecordedFileSet) -> Self {
        Self {
            id: config.namespace.clone(),
            namespace: config.namespace.clone(),
            repository_files,
            settings: config.without_secrets(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BootstrapError::State(format!("failed to serialize state: {}", e)))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let state: Self = serde_json::from_str(content)
            .map_err(|e| BootstrapError::State(format!("failed to parse state: {}", e)))?;
        if state.namespace.is_empty() {
            return Err(BootstrapError::State("state has no namespace".to_string()));
        }
        Ok(state)
    }

    /// Reads state from `path`; `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BootstrapError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Writes state to `path` through a temporary file in the same directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| BootstrapError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| BootstrapError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Removes the state file, ignoring a missing one.
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BootstrapError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_configuration;
    use crate::manifests::FileSet;
    use crate::secrets::SecretSource;
    use tempfile::TempDir;

    fn state() -> PersistedState {
        let mut config = default_configuration();
        config.repository.url = "https://example.com/fleet.git".to_string();
        config.commit.gpg_passphrase = Some(SecretSource::from_value("s3cret"));
        let mut files = FileSet::new();
        files.insert("flux-system/gotk-sync.yaml", "sync");
        PersistedState::new(&config, files)
    }

    #[test]
    fn test_json_layout() {
        let json = state().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "flux-system");
        assert_eq!(value["repositoryFiles"]["flux-system/gotk-sync.yaml"], "sync");
        assert_eq!(value["settings"]["repository"]["url"], "https://example.com/fleet.git");
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            PersistedState::from_json("{\"id\": 1}"),
            Err(BootstrapError::State(_))
        ));
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        assert!(PersistedState::load(&path).unwrap().is_none());

        let saved = state();
        saved.save(&path).unwrap();
        assert_eq!(PersistedState::load(&path).unwrap(), Some(saved));

        PersistedState::remove(&path).unwrap();
        PersistedState::remove(&path).unwrap();
        assert!(!path.exists());
    }
}
