//! Error types for bootstrap reconciliation.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::secrets::SecretError;

/// Whether an error may succeed on a later attempt within the same operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Errors that can occur while reconciling an installation.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to render {manifest}: {message}")]
    Render { manifest: String, message: String },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: String, message: String },

    #[error("Invalid repository URL '{url}': {message}")]
    InvalidRepositoryUrl { url: String, message: String },

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git push rejected: {0}")]
    GitPushRejected(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Git merge conflict: {0}")]
    GitMergeConflict(String),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Commit signing failed: {0}")]
    Signing(String),

    #[error("Repository content for '{path}' does not match the desired manifest after commit")]
    RepositoryVerification { path: String },

    #[error("Cluster request for {object} failed: {message}")]
    Cluster { object: String, message: String },

    #[error("Cluster is unreachable: {0}")]
    ClusterUnreachable(String),

    #[error("Timed out waiting for {object} to become ready: {message}")]
    ReadinessTimeout { object: String, message: String },

    #[error("Teardown finished with {} failure(s): {}", failures.len(), failures.join("; "))]
    Teardown { failures: Vec<String> },

    #[error("Import refused: {0}")]
    ImportRefused(String),

    #[error("{operation} did not complete within {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<BootstrapError>,
    },

    #[error("Invalid state: {0}")]
    State(String),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl From<serde_yaml::Error> for BootstrapError {
    fn from(err: serde_yaml::Error) -> Self {
        BootstrapError::ParseYaml {
            path: String::new(),
            message: err.to_string(),
        }
    }
}

impl BootstrapError {
    /// Classifies the error for the retry combinator.
    pub fn class(&self) -> ErrorClass {
        match self {
            BootstrapError::GitNetworkError(_)
            | BootstrapError::GitPushRejected(_)
            | BootstrapError::GitTimeout(_) => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> BootstrapError {
    let lower = stderr.to_lowercase();

    if lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("[rejected]")
        || lower.contains("updates were rejected")
        || lower.contains("cannot lock ref")
    {
        return BootstrapError::GitPushRejected(stderr.trim().to_string());
    }

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return BootstrapError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("merge conflict") || lower.contains("conflict") && lower.contains("merge") {
        return BootstrapError::GitMergeConflict(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
        || lower.contains("host key verification failed")
    {
        return BootstrapError::GitAuthFailed(stderr.trim().to_string());
    }

    BootstrapError::GitOperation(stderr.trim().to_string())
}

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_push_rejection() {
        let stderr = " ! [rejected]        HEAD -> main (fetch first)\nerror: failed to push some refs";
        let err = classify_git_error(stderr);
        assert!(matches!(err, BootstrapError::GitPushRejected(_)));
        assert!(err.is_retryable());

        let err = classify_git_error("hint: Updates were rejected because the tip of your current branch is behind (non-fast-forward)");
        assert!(matches!(err, BootstrapError::GitPushRejected(_)));
    }

    #[test]
    fn test_classify_network_error() {
        let err = classify_git_error("fatal: unable to access 'https://example.com/': Could not resolve host: example.com");
        assert!(matches!(err, BootstrapError::GitNetworkError(_)));
        assert_eq!(err.class(), ErrorClass::Retryable);
    }

    #[test]
    fn test_classify_auth_error_is_fatal() {
        let err = classify_git_error("git@github.com: Permission denied (publickey).");
        assert!(matches!(err, BootstrapError::GitAuthFailed(_)));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_classify_merge_conflict() {
        let err = classify_git_error("CONFLICT (content): Merge conflict in flux-system/gotk-sync.yaml");
        assert!(matches!(err, BootstrapError::GitMergeConflict(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_fallback() {
        let err = classify_git_error("  fatal: something unexpected  ");
        match err {
            BootstrapError::GitOperation(msg) => assert_eq!(msg, "fatal: something unexpected"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_teardown_message_lists_failures() {
        let err = BootstrapError::Teardown {
            failures: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Teardown finished with 2 failure(s): a; b");
    }

    #[test]
    fn test_retries_exhausted_is_fatal() {
        let err = BootstrapError::RetriesExhausted {
            operation: "push".to_string(),
            attempts: 3,
            source: Box::new(BootstrapError::GitNetworkError("down".to_string())),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
