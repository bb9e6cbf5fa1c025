//! Data passed across the version-control capability.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::signing::SigningKey;
use crate::error::{BootstrapError, Result};
use crate::manifests::FileSet;

/// An ephemeral checkout of one branch. The directory is removed on drop.
#[derive(Debug)]
pub struct WorkingCopy {
    _dir: TempDir,
    root: PathBuf,
    url: String,
    branch: String,
}

impl WorkingCopy {
    pub fn new(dir: TempDir, root: PathBuf, url: &str, branch: &str) -> Self {
        Self {
            _dir: dir,
            root,
            url: url.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Reads a repository-relative file, or `None` if it is absent.
    pub fn read_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.root.join(path);
        match std::fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BootstrapError::ReadFile { path: full, source }),
        }
    }

    /// Deletes then writes files in the checkout.
    ///
    /// Deleting a file that is already gone is not an error.
    pub fn apply_changes(&self, changes: &FileChanges) -> Result<()> {
        for path in &changes.deletes {
            let full = self.root.join(path);
            match std::fs::remove_file(&full) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("{} already absent from working copy", path);
                }
                Err(source) => return Err(BootstrapError::WriteFile { path: full, source }),
            }
        }

        for (path, content) in changes.writes.iter() {
            let full = self.root.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|source| BootstrapError::WriteFile {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&full, content)
                .map_err(|source| BootstrapError::WriteFile { path: full, source })?;
        }
        Ok(())
    }
}

/// File writes and deletions for one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub writes: FileSet,
    pub deletes: Vec<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// Author, message and optional signer for one commit.
#[derive(Debug)]
pub struct CommitIntent {
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub appendix: Option<String>,
    pub signing: Option<SigningKey>,
    /// Commit even when the tree is unchanged.
    pub allow_empty: bool,
}

impl CommitIntent {
    pub fn new(author_name: &str, author_email: &str, message: &str) -> Self {
        Self {
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            message: message.to_string(),
            appendix: None,
            signing: None,
            allow_empty: false,
        }
    }

    pub fn full_message(&self) -> String {
        match self.appendix.as_deref() {
            Some(appendix) if !appendix.is_empty() => format!("{}\n\n{}", self.message, appendix),
            _ => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { hash: String },
    NothingToCommit,
}
