//! In-process remote used by tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::types::{CommitIntent, CommitOutcome, FileChanges, WorkingCopy};
use super::VersionControl;
use crate::error::{BootstrapError, Result};
use crate::manifests::FileSet;

/// A failure to return from the next push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    Rejected,
    Network,
    AuthFailed,
}

impl PushFailure {
    fn into_error(self) -> BootstrapError {
        match self {
            PushFailure::Rejected => BootstrapError::GitPushRejected(
                "! [rejected] HEAD -> main (fetch first)".to_string(),
            ),
            PushFailure::Network => {
                BootstrapError::GitNetworkError("the remote end hung up unexpectedly".to_string())
            }
            PushFailure::AuthFailed => {
                BootstrapError::GitAuthFailed("Authentication failed".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCall {
    Clone { branch: String },
    Commit { message: String, allow_empty: bool, signed: bool },
    Push { branch: String },
}

/// A commit that reached the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedCommit {
    pub branch: String,
    pub message: String,
    pub author_name: String,
    pub files: FileSet,
}

#[derive(Debug, Default)]
struct Branch {
    version: u64,
    files: FileSet,
}

#[derive(Debug)]
struct LocalCommit {
    files: FileSet,
    message: String,
    author_name: String,
}

#[derive(Debug)]
struct Checkout {
    branch: String,
    base_version: u64,
    base_files: FileSet,
    pending: Vec<LocalCommit>,
}

#[derive(Debug, Default)]
struct RemoteState {
    branches: BTreeMap<String, Branch>,
    checkouts: HashMap<PathBuf, Checkout>,
    push_failures: VecDeque<PushFailure>,
    clone_failure: Option<String>,
    pushed: Vec<PushedCommit>,
    calls: Vec<GitCall>,
}

/// A remote repository held in memory. Clones are real temp directories so
/// working-copy behaviour matches the git backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Content of a file at the head of a branch.
    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.lock()
            .branches
            .get(branch)
            .and_then(|b| b.files.get(path).map(str::to_string))
    }

    pub fn files(&self, branch: &str) -> FileSet {
        self.lock()
            .branches
            .get(branch)
            .map(|b| b.files.clone())
            .unwrap_or_default()
    }

    /// Edits the branch out-of-band, as another writer would.
    pub fn set_file(&self, branch: &str, path: &str, content: &str) {
        let mut state = self.lock();
        let entry = state.branches.entry(branch.to_string()).or_default();
        entry.files.insert(path, content);
        entry.version += 1;
    }

    pub fn remove_file(&self, branch: &str, path: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.branches.get_mut(branch) {
            entry.files.remove(path);
            entry.version += 1;
        }
    }

    /// Queues failures returned by upcoming pushes, in order.
    pub fn fail_pushes(&self, failures: impl IntoIterator<Item = PushFailure>) {
        self.lock().push_failures.extend(failures);
    }

    /// Makes every clone fail with a network error until cleared.
    pub fn set_unreachable(&self, message: Option<&str>) {
        self.lock().clone_failure = message.map(str::to_string);
    }

    pub fn push_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, GitCall::Push { .. }))
            .count()
    }

    pub fn pushed_commits(&self) -> Vec<PushedCommit> {
        self.lock().pushed.clone()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.lock().pushed.iter().map(|c| c.message.clone()).collect()
    }

    pub fn calls(&self) -> Vec<GitCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

fn read_tree(root: &Path) -> Result<FileSet> {
    let mut files = FileSet::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| BootstrapError::ReadFile {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| BootstrapError::ReadFile {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|source| BootstrapError::ReadFile {
                path: path.clone(),
                source,
            })?;
            let relative = path
                .strip_prefix(root)
                .map_err(|e| BootstrapError::GitOperation(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(relative, content);
        }
    }
    Ok(files)
}

#[async_trait]
impl VersionControl for MemoryRemote {
    async fn clone_repository(&self, url: &str, branch: &str) -> Result<WorkingCopy> {
        let (version, files) = {
            let mut state = self.lock();
            state.calls.push(GitCall::Clone {
                branch: branch.to_string(),
            });
            if let Some(message) = &state.clone_failure {
                return Err(BootstrapError::GitNetworkError(message.clone()));
            }
            state
                .branches
                .get(branch)
                .map(|b| (b.version, b.files.clone()))
                .unwrap_or_default()
        };

        let dir = tempfile::tempdir()
            .map_err(|e| BootstrapError::GitOperation(format!("failed to create working directory: {}", e)))?;
        let root = dir.path().to_path_buf();
        let working_copy = WorkingCopy::new(dir, root.clone(), url, branch);
        working_copy.apply_changes(&FileChanges {
            writes: files.clone(),
            deletes: Vec::new(),
        })?;

        self.lock().checkouts.insert(
            root,
            Checkout {
                branch: branch.to_string(),
                base_version: version,
                base_files: files,
                pending: Vec::new(),
            },
        );
        Ok(working_copy)
    }

    async fn commit(
        &self,
        working_copy: &WorkingCopy,
        intent: &CommitIntent,
        changes: &FileChanges,
    ) -> Result<CommitOutcome> {
        working_copy.apply_changes(changes)?;
        let tree = read_tree(working_copy.path())?;

        let mut state = self.lock();
        state.calls.push(GitCall::Commit {
            message: intent.full_message(),
            allow_empty: intent.allow_empty,
            signed: intent.signing.is_some(),
        });
        let checkout = state
            .checkouts
            .get_mut(working_copy.path())
            .ok_or_else(|| BootstrapError::GitOperation("working copy not cloned from this remote".to_string()))?;

        let head = checkout
            .pending
            .last()
            .map(|c| &c.files)
            .unwrap_or(&checkout.base_files);
        if *head == tree && !intent.allow_empty {
            return Ok(CommitOutcome::NothingToCommit);
        }

        let base_version = checkout.base_version;
        checkout.pending.push(LocalCommit {
            files: tree,
            message: intent.full_message(),
            author_name: intent.author_name.clone(),
        });
        let hash = format!("{:040x}", base_version * 1000 + checkout.pending.len() as u64);
        Ok(CommitOutcome::Committed { hash })
    }

    async fn push(&self, working_copy: &WorkingCopy) -> Result<()> {
        let mut state = self.lock();
        let branch = working_copy.branch().to_string();
        state.calls.push(GitCall::Push {
            branch: branch.clone(),
        });

        if let Some(failure) = state.push_failures.pop_front() {
            return Err(failure.into_error());
        }

        let remote_version = state.branches.get(&branch).map(|b| b.version).unwrap_or(0);
        let Some(checkout) = state.checkouts.get_mut(working_copy.path()) else {
            return Err(BootstrapError::GitOperation(
                "working copy not cloned from this remote".to_string(),
            ));
        };
        if checkout.pending.is_empty() {
            return Ok(());
        }
        if checkout.base_version != remote_version {
            return Err(BootstrapError::GitPushRejected(format!(
                "! [rejected] HEAD -> {} (fetch first)",
                checkout.branch
            )));
        }

        let commits: Vec<LocalCommit> = checkout.pending.drain(..).collect();
        let mut version = remote_version;
        let mut files = checkout.base_files.clone();
        let mut pushed = Vec::new();
        for commit in commits {
            version += 1;
            files = commit.files;
            pushed.push(PushedCommit {
                branch: branch.clone(),
                message: commit.message,
                author_name: commit.author_name,
                files: files.clone(),
            });
        }
        checkout.base_version = version;
        checkout.base_files = files.clone();

        state.branches.insert(branch, Branch { version, files });
        state.pushed.extend(pushed);
        Ok(())
    }

    async fn committed_content(&self, working_copy: &WorkingCopy, path: &str) -> Result<Option<String>> {
        let state = self.lock();
        let checkout = state
            .checkouts
            .get(working_copy.path())
            .ok_or_else(|| BootstrapError::GitOperation("working copy not cloned from this remote".to_string()))?;
        let head = checkout
            .pending
            .last()
            .map(|c| &c.files)
            .unwrap_or(&checkout.base_files);
        Ok(head.get(path).map(str::to_string))
    }
}
