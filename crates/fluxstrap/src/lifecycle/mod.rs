//! Create, refresh, update, delete and import of a bootstrapped installation.
//!
//! Every operation runs to a deadline derived from the configured timeout.
//! Retries and readiness polls stop at that deadline with a descriptive error;
//! the whole operation is additionally bounded by `tokio::time::timeout` so a
//! hung network call still ends in [`BootstrapError::Timeout`].

pub mod diagnostics;
pub mod import;
pub mod plan;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::cluster::ClusterClient;
use crate::config::{prepare_configuration, repository_url, Configuration, Operation};
use crate::error::{BootstrapError, Result};
use crate::git::{CommitIntent, SigningKey, VersionControl, WorkingCopy};
use crate::health::{HealthMonitor, Readiness};
use crate::installer::{ClusterInstaller, POLL_INTERVAL};
use crate::manifests::{self, placeholder_files, FileSet, ManifestPaths, RecordedFileSet};
use crate::retry::{retry, Backoff};
use crate::state::PersistedState;
use crate::sync::{RepositorySynchronizer, SyncReport};

pub use diagnostics::{DeleteOutcome, Diagnostic, Diagnostics, Outcome, Severity};
pub use plan::{immutable_changes, Plan};

/// Extra time the outer timeout allows past the deadline so that deadline
/// errors from retries and readiness polls surface first.
const DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// A configuration reconstructed from the cluster together with its state.
#[derive(Debug, Clone, PartialEq)]
pub struct Imported {
    pub configuration: Configuration,
    pub state: PersistedState,
}

/// Drives an installation through its lifecycle.
pub struct BootstrapReconciler<V: VersionControl, C: ClusterClient> {
    vcs: V,
    cluster: C,
    backoff: Backoff,
    poll_interval: Duration,
}

impl<V: VersionControl, C: ClusterClient> BootstrapReconciler<V, C> {
    pub fn new(vcs: V, cluster: C) -> Self {
        Self {
            vcs,
            cluster,
            backoff: Backoff::default(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Commits the manifests, installs them and records what was committed.
    pub async fn create(&self, config: &Configuration) -> Result<Outcome<PersistedState>> {
        let config = prepare_configuration(config.clone())?;
        self.bounded("create", Operation::Create, &config, |deadline| {
            self.create_inner(&config, deadline)
        })
        .await
    }

    async fn create_inner(&self, config: &Configuration, deadline: Instant) -> Result<Outcome<PersistedState>> {
        let expected = manifests::build(config)?;
        let url = repository_url(config)?.to_string();
        let synchronizer = self.synchronizer(config, &url);
        let placeholder = config
            .repository
            .kustomization_override
            .as_ref()
            .map(|_| placeholder_files(config, &expected));

        let working_copy = retry("create", deadline, self.backoff, |attempt| {
            let (url, synchronizer, expected, placeholder) = (&url, &synchronizer, &expected, &placeholder);
            async move {
                tracing::debug!(attempt, "cloning repository");
                let working_copy = self
                    .vcs
                    .clone_repository(url, &config.repository.branch)
                    .await?;

                let previous = match placeholder {
                    Some(placeholder) => {
                        tracing::info!("committing kustomization override");
                        synchronizer
                            .sync_in(
                                &working_copy,
                                &FileSet::new(),
                                placeholder,
                                commit_intent(config, "Add kustomize override")?,
                            )
                            .await?;
                        placeholder.clone()
                    }
                    None => FileSet::new(),
                };

                let message = format!("Add Flux {} manifests", config.version);
                synchronizer
                    .sync_in(&working_copy, &previous, expected, commit_intent(config, &message)?)
                    .await?;
                Ok::<_, BootstrapError>(working_copy)
            }
        })
        .await?;

        let recorded = read_back(&working_copy, &ManifestPaths::for_config(config))?;
        self.installer().install(&recorded, config, deadline).await?;

        tracing::info!(namespace = %config.namespace, "installation created");
        Ok(Outcome::new(
            PersistedState::new(config, recorded),
            Diagnostics::new(),
        ))
    }

    /// Re-reads the recorded files from the repository and checks health.
    ///
    /// Returns `None` when the namespace no longer exists. An unhealthy
    /// installation gets its sync manifest blanked in the returned state so
    /// the next update rewrites it.
    pub async fn refresh(
        &self,
        config: &Configuration,
        state: &PersistedState,
    ) -> Result<Outcome<Option<PersistedState>>> {
        self.bounded("read", Operation::Read, config, |deadline| {
            self.refresh_inner(config, state, deadline)
        })
        .await
    }

    async fn refresh_inner(
        &self,
        config: &Configuration,
        state: &PersistedState,
        deadline: Instant,
    ) -> Result<Outcome<Option<PersistedState>>> {
        let mut diagnostics = Diagnostics::new();
        let monitor = HealthMonitor::new(&self.cluster);

        if !monitor.namespace_exists(&state.namespace).await? {
            diagnostics.warning(
                "Installation not found",
                format!(
                    "namespace '{}' no longer exists; the installation will be recreated",
                    state.namespace
                ),
            );
            return Ok(Outcome::new(None, diagnostics));
        }

        let url = repository_url(config)?.to_string();
        let (url, branch) = (url.as_str(), config.repository.branch.as_str());
        let working_copy = retry("refresh", deadline, self.backoff, |_| {
            self.vcs.clone_repository(url, branch)
        })
        .await?;

        let mut files = FileSet::new();
        for path in state.repository_files.paths() {
            match working_copy.read_file(path)? {
                Some(content) => files.insert(path, content),
                None => tracing::debug!(path, "skip reading file that no longer exists in repository"),
            }
        }
        drop(working_copy);

        if let Readiness::NotReady { object, message } = monitor.check_ready(&state.namespace).await? {
            let sync_path = ManifestPaths::for_config(&state.settings).sync;
            diagnostics.warning(
                "Installation not ready",
                format!(
                    "{}: {}; {} will be rewritten on the next update",
                    object, message, sync_path
                ),
            );
            files.insert(sync_path, "");
        }

        Ok(Outcome::new(
            Some(PersistedState {
                repository_files: files,
                ..state.clone()
            }),
            diagnostics,
        ))
    }

    /// Commits the manifests for `config` and converges the cluster to them.
    pub async fn update(
        &self,
        config: &Configuration,
        state: &PersistedState,
    ) -> Result<Outcome<PersistedState>> {
        let config = prepare_configuration(config.clone())?;
        let immutable = immutable_changes(&state.settings, &config);
        if !immutable.is_empty() {
            return Err(BootstrapError::Configuration(format!(
                "{} cannot be changed without recreating the installation",
                immutable.join(", ")
            )));
        }

        self.bounded("update", Operation::Update, &config, |deadline| {
            self.update_inner(&config, state, deadline)
        })
        .await
    }

    async fn update_inner(
        &self,
        config: &Configuration,
        state: &PersistedState,
        deadline: Instant,
    ) -> Result<Outcome<PersistedState>> {
        let expected = manifests::build(config)?;
        let url = repository_url(config)?.to_string();
        for path in state.repository_files.removed_in(&expected) {
            tracing::info!(path = %path, "file no longer expected");
        }

        let report = self
            .synchronizer(config, &url)
            .sync(
                &state.repository_files,
                &expected,
                commit_intent(config, "Update Flux")?,
                deadline,
            )
            .await?;
        self.installer().install(&report.files, config, deadline).await?;

        tracing::info!(namespace = %config.namespace, pushed = report.pushed, "installation updated");
        Ok(Outcome::new(
            PersistedState {
                id: state.id.clone(),
                ..PersistedState::new(config, report.files)
            },
            Diagnostics::new(),
        ))
    }

    /// Tears the installation down and optionally removes its files from the
    /// repository. The installation is no longer tracked afterwards, whatever
    /// `error` reports.
    pub async fn delete(&self, config: &Configuration, state: &PersistedState) -> DeleteOutcome {
        let config = match prepare_configuration(config.clone()) {
            Ok(config) => config,
            Err(e) => return DeleteOutcome::failed(e),
        };

        let mut diagnostics = Diagnostics::new();
        let result = self
            .bounded("delete", Operation::Delete, &config, |deadline| {
                self.delete_inner(&config, state, deadline, &mut diagnostics)
            })
            .await;

        let error = match result {
            Ok(error) => error,
            Err(e) => {
                diagnostics.error_from("Delete did not complete", &e);
                Some(e)
            }
        };
        DeleteOutcome { diagnostics, error }
    }

    async fn delete_inner(
        &self,
        config: &Configuration,
        state: &PersistedState,
        deadline: Instant,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<BootstrapError>> {
        let mut error = None;

        if let Err(e) = self
            .installer()
            .uninstall(&state.namespace, config.keep_namespace)
            .await
        {
            diagnostics.error_from("Unable to remove Flux components", &e);
            error = Some(e);
        }

        if config.delete_git_manifests {
            match self.remove_manifests(config, state, deadline).await {
                Ok(report) => {
                    tracing::info!(pushed = report.pushed, "removed manifests from repository")
                }
                Err(e) => {
                    diagnostics.error_from("Unable to remove manifests from repository", &e);
                    error.get_or_insert(e);
                }
            }
        }

        Ok(error)
    }

    async fn remove_manifests(
        &self,
        config: &Configuration,
        state: &PersistedState,
        deadline: Instant,
    ) -> Result<SyncReport> {
        let url = repository_url(config)?.to_string();
        self.synchronizer(config, &url)
            .sync(
                &state.repository_files,
                &FileSet::new(),
                commit_intent(config, "Uninstall Flux")?,
                deadline,
            )
            .await
    }

    /// Reconstructs configuration and state from a ready installation without
    /// writing anything.
    pub async fn import(&self, namespace: &str, base: &Configuration) -> Result<Outcome<Imported>> {
        let mut base = base.clone();
        base.namespace = namespace.to_string();
        self.bounded("import", Operation::Read, &base, |_| self.import_inner(namespace, &base))
            .await
    }

    async fn import_inner(&self, namespace: &str, base: &Configuration) -> Result<Outcome<Imported>> {
        if let Readiness::NotReady { object, message } =
            HealthMonitor::new(&self.cluster).check_ready(namespace).await?
        {
            return Err(BootstrapError::ImportRefused(format!(
                "{} is not ready: {}",
                object, message
            )));
        }

        let configuration =
            prepare_configuration(import::read_configuration(&self.cluster, namespace, base).await?)?;
        let files = manifests::build(&configuration)?;

        tracing::info!(namespace, files = files.len(), "imported installation");
        Ok(Outcome::new(
            Imported {
                state: PersistedState::new(&configuration, files),
                configuration,
            },
            Diagnostics::new(),
        ))
    }

    /// Compares the files `config` renders to against the recorded state.
    pub fn plan(&self, config: &Configuration, state: Option<&PersistedState>) -> Result<Plan> {
        let config = prepare_configuration(config.clone())?;
        let expected = manifests::build(&config)?;
        Ok(Plan::compute(
            expected,
            state.map(|s| (&s.repository_files, &s.settings)),
            &config,
        ))
    }

    fn synchronizer<'a>(&'a self, config: &Configuration, url: &str) -> RepositorySynchronizer<'a, V> {
        RepositorySynchronizer::new(&self.vcs, url, &config.repository.branch).with_backoff(self.backoff)
    }

    fn installer(&self) -> ClusterInstaller<'_, C> {
        ClusterInstaller::new(&self.cluster).with_poll_interval(self.poll_interval)
    }

    /// Runs `run` inside an operation span, bounded by the configured timeout.
    async fn bounded<T, F, Fut>(
        &self,
        name: &'static str,
        operation: Operation,
        config: &Configuration,
        run: F,
    ) -> Result<T>
    where
        F: FnOnce(Instant) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = config.timeouts.for_operation(operation)?;
        let span = tracing::info_span!(
            "operation",
            operation = name,
            id = %Uuid::new_v4(),
            namespace = %config.namespace,
        );

        let deadline = Instant::now() + timeout;
        let bounded = tokio::time::timeout(timeout + DEADLINE_GRACE, run(deadline));
        match bounded.instrument(span.clone()).await {
            Ok(result) => {
                if let Err(e) = &result {
                    span.in_scope(|| tracing::error!(error = %e, "operation failed"));
                }
                result
            }
            Err(_) => {
                span.in_scope(|| tracing::error!(timeout = ?timeout, "operation timed out"));
                Err(BootstrapError::Timeout {
                    operation: name.to_string(),
                    timeout,
                })
            }
        }
    }
}

/// Author, message and signer from the commit settings.
pub fn commit_intent(config: &Configuration, message: &str) -> Result<CommitIntent> {
    let mut intent = CommitIntent::new(
        &config.commit.author_name,
        &config.commit.author_email,
        message,
    );
    intent.appendix = config.commit.message_appendix.clone();
    intent.signing = SigningKey::from_settings(&config.commit)?;
    Ok(intent)
}

/// The three generated files as committed in `working_copy`.
fn read_back(working_copy: &WorkingCopy, paths: &ManifestPaths) -> Result<RecordedFileSet> {
    let mut files = FileSet::new();
    for path in paths.all() {
        let content = working_copy
            .read_file(path)?
            .ok_or_else(|| BootstrapError::RepositoryVerification {
                path: path.to_string(),
            })?;
        files.insert(path, content);
    }
    Ok(files)
}
