pub mod cluster;
pub mod config;
pub mod error;
pub mod git;
pub mod health;
pub mod installer;
pub mod lifecycle;
pub mod logging;
pub mod manifests;
pub mod retry;
pub mod scheduler;
pub mod secrets;
pub mod service;
pub mod state;
pub mod sync;

pub use cluster::{ClusterClient, KubeCluster};
pub use config::{default_configuration, load_configuration, Configuration, ConfigValidator};
pub use error::{classify_git_error, BootstrapError, ErrorClass, Result};
pub use git::{GitCli, VersionControl};
pub use health::{HealthMonitor, Readiness};
pub use installer::ClusterInstaller;
pub use lifecycle::{BootstrapReconciler, DeleteOutcome, Diagnostics, Imported, Outcome, Plan};
pub use logging::LogFormat;
pub use manifests::{build, ExpectedFileSet, FileSet, RecordedFileSet};
pub use scheduler::{DriftScheduler, TickReport};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::BootstrapService;
pub use state::PersistedState;
pub use sync::RepositorySynchronizer;

#[cfg(any(test, feature = "testing"))]
pub use cluster::MemoryCluster;
#[cfg(any(test, feature = "testing"))]
pub use git::MemoryRemote;
