//! Configuration loading, defaults and validation.

pub mod duration;
pub mod loader;
pub mod options;
pub mod schema;
pub mod validation;

pub use duration::{format_duration, parse_duration};
pub use loader::{load_configuration, load_configuration_from_str, prepare_configuration};
pub use options::{render_options, repository_url, InstallOptions, SyncOptions};
pub use schema::{
    default_configuration, ClusterSettings, CommitSettings, Configuration, Credentials,
    HttpCredentials, Operation, RepositorySettings, SshCredentials, Timeouts,
    DEFAULT_AUTHOR, DEFAULT_FLUX_VERSION,
};
pub use validation::ConfigValidator;
