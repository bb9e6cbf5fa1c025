//! Writes the expected file set to the repository.

use tokio::time::Instant;

use crate::error::{BootstrapError, Result};
use crate::git::{CommitIntent, CommitOutcome, FileChanges, VersionControl, WorkingCopy};
use crate::manifests::{ExpectedFileSet, RecordedFileSet};
use crate::retry::{retry, Backoff};

/// Result of one synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// The new recorded file set; equal to the desired set.
    pub files: RecordedFileSet,
    pub outcome: CommitOutcome,
    pub pushed: bool,
}

impl SyncReport {
    pub fn committed(&self) -> bool {
        matches!(self.outcome, CommitOutcome::Committed { .. })
    }
}

/// Commits and pushes file sets to one repository branch.
pub struct RepositorySynchronizer<'a, V: VersionControl + ?Sized> {
    vcs: &'a V,
    url: String,
    branch: String,
    backoff: Backoff,
}

impl<'a, V: VersionControl + ?Sized> RepositorySynchronizer<'a, V> {
    pub fn new(vcs: &'a V, url: &str, branch: &str) -> Self {
        Self {
            vcs,
            url: url.to_string(),
            branch: branch.to_string(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Synchronizes `desired` into a fresh clone, retrying retryable failures
    /// from a new clone each time until `deadline`.
    pub async fn sync(
        &self,
        previous: &RecordedFileSet,
        desired: &ExpectedFileSet,
        intent: CommitIntent,
        deadline: Instant,
    ) -> Result<SyncReport> {
        let intent = force_stale(intent, previous, desired);
        retry("repository sync", deadline, self.backoff, |attempt| {
            let intent = &intent;
            async move {
                tracing::debug!(attempt, branch = %self.branch, "cloning repository");
                let working_copy = self.vcs.clone_repository(&self.url, &self.branch).await?;
                self.attempt(&working_copy, previous, desired, intent).await
            }
        })
        .await
    }

    /// Runs a single attempt on a working copy the caller keeps.
    pub async fn sync_in(
        &self,
        working_copy: &WorkingCopy,
        previous: &RecordedFileSet,
        desired: &ExpectedFileSet,
        intent: CommitIntent,
    ) -> Result<SyncReport> {
        let intent = force_stale(intent, previous, desired);
        self.attempt(working_copy, previous, desired, &intent).await
    }

    async fn attempt(
        &self,
        working_copy: &WorkingCopy,
        previous: &RecordedFileSet,
        desired: &ExpectedFileSet,
        intent: &CommitIntent,
    ) -> Result<SyncReport> {
        let changes = FileChanges {
            writes: desired.clone(),
            deletes: previous.removed_in(desired),
        };
        for path in &changes.deletes {
            tracing::info!(path = %path, "removing file from repository");
        }

        let outcome = self.vcs.commit(working_copy, intent, &changes).await?;
        let pushed = match &outcome {
            CommitOutcome::NothingToCommit => {
                self.verify(working_copy, desired).await?;
                tracing::info!(branch = %self.branch, "repository already up to date");
                false
            }
            CommitOutcome::Committed { hash } => {
                self.vcs.push(working_copy).await?;
                tracing::info!(branch = %self.branch, commit = %hash, "pushed manifests");
                true
            }
        };

        Ok(SyncReport {
            files: desired.clone(),
            outcome,
            pushed,
        })
    }

    /// Confirms the committed tree holds exactly the desired bytes.
    async fn verify(&self, working_copy: &WorkingCopy, desired: &ExpectedFileSet) -> Result<()> {
        for (path, content) in desired.iter() {
            let committed = self.vcs.committed_content(working_copy, path).await?;
            if committed.as_deref() != Some(content) {
                return Err(BootstrapError::RepositoryVerification {
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Paths whose recorded content differs from the desired content must produce
/// a commit even when the repository already holds the desired bytes.
fn force_stale(mut intent: CommitIntent, previous: &RecordedFileSet, desired: &ExpectedFileSet) -> CommitIntent {
    let stale = previous.changed_in(desired);
    if !stale.is_empty() {
        tracing::debug!(paths = ?stale, "recorded content is stale, forcing commit");
        intent.allow_empty = true;
    }
    intent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{GitCall, MemoryRemote, PushFailure};
    use crate::manifests::FileSet;
    use std::time::Duration;

    fn files(entries: &[(&str, &str)]) -> FileSet {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn intent() -> CommitIntent {
        CommitIntent::new("Flux", "flux@example.com", "Update Flux")
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[tokio::test]
    async fn test_writes_and_removes() {
        let remote = MemoryRemote::new();
        remote.set_file("main", "old/flux-system/gotk-sync.yaml", "old");
        let sync = RepositorySynchronizer::new(&remote, "mem://fleet", "main");

        let previous = files(&[("old/flux-system/gotk-sync.yaml", "old")]);
        let desired = files(&[("new/flux-system/gotk-sync.yaml", "new")]);
        let report = sync.sync(&previous, &desired, intent(), deadline()).await.unwrap();

        assert!(report.pushed);
        assert_eq!(report.files, desired);
        assert_eq!(remote.files("main"), desired);
    }

    #[tokio::test]
    async fn test_unchanged_set_skips_push() {
        let remote = MemoryRemote::new();
        let desired = files(&[("ns/a.yaml", "a")]);
        let sync = RepositorySynchronizer::new(&remote, "mem://fleet", "main");
        sync.sync(&FileSet::new(), &desired, intent(), deadline()).await.unwrap();
        remote.clear_calls();

        let report = sync.sync(&desired, &desired, intent(), deadline()).await.unwrap();
        assert_eq!(report.outcome, CommitOutcome::NothingToCommit);
        assert_eq!(remote.push_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_record_forces_commit() {
        let remote = MemoryRemote::new();
        let desired = files(&[("ns/gotk-sync.yaml", "sync")]);
        remote.set_file("main", "ns/gotk-sync.yaml", "sync");
        let sync = RepositorySynchronizer::new(&remote, "mem://fleet", "main");

        let previous = files(&[("ns/gotk-sync.yaml", "")]);
        let report = sync.sync(&previous, &desired, intent(), deadline()).await.unwrap();
        assert!(report.committed());
        assert_eq!(remote.push_count(), 1);
        assert!(remote
            .calls()
            .contains(&GitCall::Commit { message: "Update Flux".to_string(), allow_empty: true, signed: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_push_retried_from_fresh_clone() {
        let remote = MemoryRemote::new();
        remote.fail_pushes([PushFailure::Rejected, PushFailure::Network]);
        let sync = RepositorySynchronizer::new(&remote, "mem://fleet", "main");
        let desired = files(&[("ns/a.yaml", "a")]);

        let report = sync.sync(&FileSet::new(), &desired, intent(), deadline()).await.unwrap();
        assert!(report.pushed);
        let clones = remote
            .calls()
            .iter()
            .filter(|c| matches!(c, GitCall::Clone { .. }))
            .count();
        assert_eq!(clones, 3);
        assert_eq!(remote.push_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_push_not_retried() {
        let remote = MemoryRemote::new();
        remote.fail_pushes([PushFailure::AuthFailed]);
        let sync = RepositorySynchronizer::new(&remote, "mem://fleet", "main");
        let err = sync
            .sync(&FileSet::new(), &files(&[("a", "a")]), intent(), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::GitAuthFailed(_)));
        assert_eq!(remote.push_count(), 1);
    }

    #[tokio::test]
    async fn test_file_removed_out_of_band_is_tolerated() {
        let remote = MemoryRemote::new();
        remote.set_file("main", "ns/keep.yaml", "k");
        let sync = RepositorySynchronizer::new(&remote, "mem://fleet", "main");
        let previous = files(&[("ns/gone.yaml", "g"), ("ns/keep.yaml", "k")]);
        let report = sync
            .sync(&previous, &FileSet::new(), intent(), deadline())
            .await
            .unwrap();
        assert!(report.pushed);
        assert!(remote.files("main").is_empty());
    }
}
