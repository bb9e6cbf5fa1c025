//! Version control through the `git` binary.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use super::auth::{build_auth_env, AuthEnv};
use super::parse::{format_command_error, is_clean_status, is_missing_branch, is_missing_path};
use super::signing::CommitSigner;
use super::types::{CommitIntent, CommitOutcome, FileChanges, WorkingCopy};
use super::VersionControl;
use crate::config::Credentials;
use crate::error::{classify_git_error, BootstrapError, Result};

/// Time allowed for a single network-bound git command.
const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

/// `git` CLI backend.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    gpg: String,
    credentials: Credentials,
    network_timeout: Duration,
}

impl GitCli {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            binary: "git".to_string(),
            gpg: "gpg".to_string(),
            credentials: credentials.clone(),
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Runs a local git command in `dir`.
    async fn run_git(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        log::debug!("git {}", args.join(" "));
        TokioCommand::new(&self.binary)
            .current_dir(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BootstrapError::GitOperation(e.to_string()))
    }

    async fn run_git_checked(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let output = self.run_git(dir, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(BootstrapError::GitOperation(format_command_error(&output)))
        }
    }

    /// Runs a git command that talks to the remote, with credentials and a timeout.
    async fn run_remote(&self, dir: &Path, args: &[&str], auth: &AuthEnv) -> Result<Output> {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.current_dir(dir);
        for setting in &auth.config_args {
            cmd.arg("-c").arg(setting);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        log::debug!("git {}", args.join(" "));
        match tokio::time::timeout(self.network_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| BootstrapError::GitOperation(e.to_string())),
            Err(_) => Err(BootstrapError::GitTimeout(self.network_timeout.as_secs())),
        }
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn clone_repository(&self, url: &str, branch: &str) -> Result<WorkingCopy> {
        let dir = tempfile::Builder::new()
            .prefix("fluxstrap-")
            .tempdir()
            .map_err(|e| BootstrapError::GitOperation(format!("failed to create working directory: {}", e)))?;
        let root = dir.path().join("repo");
        let target = root.display().to_string();
        let auth = build_auth_env(&self.credentials)?;

        let output = self
            .run_remote(
                dir.path(),
                &["clone", "--branch", branch, "--single-branch", url, &target],
                &auth,
            )
            .await?;

        if !output.status.success() {
            let message = format_command_error(&output);
            if !is_missing_branch(&message) {
                return Err(classify_git_error(&message));
            }

            log::info!("Branch {} not found on remote, creating it", branch);
            if root.exists() {
                std::fs::remove_dir_all(&root).map_err(|source| BootstrapError::WriteFile {
                    path: root.clone(),
                    source,
                })?;
            }
            let output = self
                .run_remote(dir.path(), &["clone", url, &target], &auth)
                .await?;
            if !output.status.success() {
                return Err(classify_git_error(&format_command_error(&output)));
            }
            self.run_git_checked(&root, &["checkout", "-B", branch]).await?;
        }

        Ok(WorkingCopy::new(dir, root, url, branch))
    }

    async fn commit(
        &self,
        working_copy: &WorkingCopy,
        intent: &CommitIntent,
        changes: &FileChanges,
    ) -> Result<CommitOutcome> {
        let dir = working_copy.path();
        working_copy.apply_changes(changes)?;

        self.run_git_checked(dir, &["add", "-A"]).await?;
        let status = self.run_git_checked(dir, &["status", "--porcelain"]).await?;
        let clean = is_clean_status(&String::from_utf8_lossy(&status.stdout));
        if clean && !intent.allow_empty {
            log::info!("Nothing to commit on {}", working_copy.branch());
            return Ok(CommitOutcome::NothingToCommit);
        }

        let signer = match &intent.signing {
            Some(key) => Some(CommitSigner::prepare(key, &self.gpg).await?),
            None => None,
        };

        let message = intent.full_message();
        let mut args: Vec<String> = Vec::new();
        if let Some(signer) = &signer {
            for setting in signer.git_config() {
                args.push("-c".to_string());
                args.push(setting);
            }
        }
        args.extend(["commit".to_string(), "-m".to_string(), message]);
        if intent.allow_empty {
            args.push("--allow-empty".to_string());
        }

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.current_dir(dir)
            .args(&args)
            .env("GIT_AUTHOR_NAME", &intent.author_name)
            .env("GIT_AUTHOR_EMAIL", &intent.author_email)
            .env("GIT_COMMITTER_NAME", &intent.author_name)
            .env("GIT_COMMITTER_EMAIL", &intent.author_email)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(signer) = &signer {
            cmd.env("GNUPGHOME", signer.home());
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| BootstrapError::GitOperation(e.to_string()))?;
        drop(signer);

        if !output.status.success() {
            let message = format_command_error(&output);
            if intent.signing.is_some() && message.to_lowercase().contains("gpg") {
                return Err(BootstrapError::Signing(message));
            }
            return Err(BootstrapError::GitOperation(message));
        }

        let head = self.run_git_checked(dir, &["rev-parse", "HEAD"]).await?;
        let hash = String::from_utf8_lossy(&head.stdout).trim().to_string();
        log::info!("Committed {} on {}", hash, working_copy.branch());
        Ok(CommitOutcome::Committed { hash })
    }

    async fn push(&self, working_copy: &WorkingCopy) -> Result<()> {
        let auth = build_auth_env(&self.credentials)?;
        let refspec = format!("HEAD:refs/heads/{}", working_copy.branch());
        let output = self
            .run_remote(working_copy.path(), &["push", "origin", &refspec], &auth)
            .await?;
        drop(auth);

        if output.status.success() {
            log::info!("Pushed {} to {}", working_copy.branch(), working_copy.url());
            Ok(())
        } else {
            let message = format_command_error(&output);
            log::warn!("Push to {} failed: {}", working_copy.url(), message);
            Err(classify_git_error(&message))
        }
    }

    async fn committed_content(&self, working_copy: &WorkingCopy, path: &str) -> Result<Option<String>> {
        let spec = format!("HEAD:{}", path);
        let output = self.run_git(working_copy.path(), &["show", &spec]).await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        let message = format_command_error(&output);
        if is_missing_path(&message) {
            Ok(None)
        } else {
            Err(BootstrapError::GitOperation(message))
        }
    }
}
