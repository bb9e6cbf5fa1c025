//! Builds the set of files committed to the repository.

pub mod install;
pub mod kustomization;
pub mod secret;
pub mod sync;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::KubeObject;
use crate::config::{render_options, Configuration, InstallOptions, SyncOptions};
use crate::error::{BootstrapError, Result};

pub const INSTALL_FILE: &str = "gotk-components.yaml";
pub const SYNC_FILE: &str = "gotk-sync.yaml";
pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

pub(crate) const GENERATED_HEADER: &str = "# This manifest was generated by fluxstrap. DO NOT EDIT.";

/// Repository-relative path to file content, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet(BTreeMap<String, String>);

/// Files a configuration renders to.
pub type ExpectedFileSet = FileSet;

/// Files last confirmed written to the repository.
pub type RecordedFileSet = FileSet;

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.0.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.0.remove(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Paths present here but absent from `desired`.
    pub fn removed_in(&self, desired: &FileSet) -> Vec<String> {
        self.0
            .keys()
            .filter(|path| !desired.0.contains_key(*path))
            .cloned()
            .collect()
    }

    /// Paths present in both sets whose content differs.
    pub fn changed_in(&self, desired: &FileSet) -> Vec<String> {
        self.0
            .iter()
            .filter(|(path, content)| {
                desired
                    .0
                    .get(*path)
                    .is_some_and(|wanted| wanted != *content)
            })
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl FromIterator<(String, String)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Locations of the three generated files for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPaths {
    pub install: String,
    pub sync: String,
    pub kustomization: String,
}

impl ManifestPaths {
    pub fn new(base_path: &str, namespace: &str) -> Self {
        Self {
            install: join_path(base_path, namespace, INSTALL_FILE),
            sync: join_path(base_path, namespace, SYNC_FILE),
            kustomization: join_path(base_path, namespace, KUSTOMIZATION_FILE),
        }
    }

    pub fn for_config(config: &Configuration) -> Self {
        let config = config.normalized();
        Self::new(&config.repository.path, &config.namespace)
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.install, &self.sync, &self.kustomization]
    }
}

fn join_path(base_path: &str, namespace: &str, file: &str) -> String {
    let base = base_path.trim_matches('/');
    if base.is_empty() {
        format!("{}/{}", namespace, file)
    } else {
        format!("{}/{}/{}", base, namespace, file)
    }
}

/// A rendered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub path: String,
    pub content: String,
}

/// Turns generator options into manifests.
pub trait ManifestGenerator {
    fn generate_install(&self, options: &InstallOptions) -> Result<Manifest>;
    fn generate_sync(&self, options: &SyncOptions) -> Result<Manifest>;
}

/// Renders manifests from typed objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGenerator;

impl ManifestGenerator for DefaultGenerator {
    fn generate_install(&self, options: &InstallOptions) -> Result<Manifest> {
        let header = format!(
            "{}\n# Flux Version: {}\n# Components: {}",
            GENERATED_HEADER,
            options.version,
            options.components.join(",")
        );
        Ok(Manifest {
            path: join_path(&options.base_path, &options.namespace, INSTALL_FILE),
            content: render_documents(&header, &install::objects(options), INSTALL_FILE)?,
        })
    }

    fn generate_sync(&self, options: &SyncOptions) -> Result<Manifest> {
        Ok(Manifest {
            path: join_path(&options.base_path, &options.namespace, SYNC_FILE),
            content: render_documents(GENERATED_HEADER, &sync::objects(options), SYNC_FILE)?,
        })
    }
}

/// Builds the expected repository files for a configuration.
pub fn build(config: &Configuration) -> Result<ExpectedFileSet> {
    build_with(&DefaultGenerator, config)
}

pub fn build_with<G: ManifestGenerator>(generator: &G, config: &Configuration) -> Result<ExpectedFileSet> {
    let (install_options, sync_options) = render_options(config)?;
    let install = generator.generate_install(&install_options)?;
    let sync = generator.generate_sync(&sync_options)?;

    let paths = ManifestPaths::new(&install_options.base_path, &install_options.namespace);
    let kustomization = match &config.repository.kustomization_override {
        Some(content) => {
            kustomization::check_override(content).map_err(BootstrapError::Configuration)?;
            content.clone()
        }
        None => kustomization::default_kustomization(),
    };

    let mut files = FileSet::new();
    files.insert(install.path, install.content);
    files.insert(sync.path, sync.content);
    files.insert(paths.kustomization, kustomization);
    Ok(files)
}

/// The files committed ahead of installation when a kustomization override is set:
/// empty generated manifests next to the override.
pub fn placeholder_files(config: &Configuration, expected: &ExpectedFileSet) -> FileSet {
    let paths = ManifestPaths::for_config(config);
    let mut files = FileSet::new();
    files.insert(paths.install.clone(), "");
    files.insert(paths.sync.clone(), "");
    if let Some(content) = expected.get(&paths.kustomization) {
        files.insert(paths.kustomization, content);
    }
    files
}

/// Renders install manifests without touching the repository or cluster.
pub fn render_install(config: &Configuration) -> Result<Manifest> {
    let (install_options, _) = render_options(config)?;
    DefaultGenerator.generate_install(&install_options)
}

/// Renders sync manifests without touching the repository or cluster.
pub fn render_sync(config: &Configuration) -> Result<Manifest> {
    let (_, sync_options) = render_options(config)?;
    DefaultGenerator.generate_sync(&sync_options)
}

/// Serializes objects as a multi-document YAML stream with a comment header.
pub fn render_documents(header: &str, objects: &[KubeObject], manifest: &str) -> Result<String> {
    let mut out = String::new();
    for (index, object) in objects.iter().enumerate() {
        out.push_str("---\n");
        if index == 0 {
            out.push_str(header);
            out.push('\n');
        }
        let yaml = serde_yaml::to_string(object).map_err(|e| BootstrapError::Render {
            manifest: manifest.to_string(),
            message: format!("{}: {}", object.object_ref(), e),
        })?;
        out.push_str(&yaml);
    }
    Ok(out)
}

/// Parses a multi-document YAML stream, skipping empty documents.
pub fn parse_objects(content: &str, path: &str) -> Result<Vec<KubeObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| BootstrapError::ParseYaml {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        let object = serde_yaml::from_value(value).map_err(|e| BootstrapError::ParseYaml {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        objects.push(object);
    }
    Ok(objects)
}
