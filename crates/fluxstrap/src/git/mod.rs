//! Version-control capability used by the repository synchronizer.

pub mod auth;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod parse;
pub mod repository;
pub mod signing;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

#[cfg(any(test, feature = "testing"))]
pub use memory::{GitCall, MemoryRemote, PushFailure, PushedCommit};
pub use repository::GitCli;
pub use signing::{CommitSigner, SigningKey};
pub use types::*;

/// Clone, commit and push against one remote repository.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clones `branch`, creating it locally when the remote does not have it yet.
    async fn clone_repository(&self, url: &str, branch: &str) -> Result<WorkingCopy>;

    /// Applies `changes` and commits them. Reports `NothingToCommit` when the
    /// tree is unchanged, unless the intent allows empty commits.
    async fn commit(
        &self,
        working_copy: &WorkingCopy,
        intent: &CommitIntent,
        changes: &FileChanges,
    ) -> Result<CommitOutcome>;

    /// Pushes the checked out branch. Non-fast-forward rejections are retryable.
    async fn push(&self, working_copy: &WorkingCopy) -> Result<()>;

    /// Content of `path` at the working copy's HEAD.
    async fn committed_content(&self, working_copy: &WorkingCopy, path: &str) -> Result<Option<String>>;
}
