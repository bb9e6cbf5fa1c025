use serde::Serialize;

use crate::config::Configuration;
use crate::manifests::{ExpectedFileSet, RecordedFileSet};

/// What an update would change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub expected: ExpectedFileSet,
    /// Recorded paths the update would delete.
    pub removed: Vec<String>,
    /// Paths that would be written with new content.
    pub changed: Vec<String>,
    /// Fields that differ from the recorded installation and cannot be updated in place.
    pub requires_replacement: Vec<String>,
}

impl Plan {
    pub fn compute(
        expected: ExpectedFileSet,
        recorded: Option<(&RecordedFileSet, &Configuration)>,
        config: &Configuration,
    ) -> Self {
        let Some((files, previous)) = recorded else {
            let changed = expected.paths().map(str::to_string).collect();
            return Self {
                expected,
                removed: Vec::new(),
                changed,
                requires_replacement: Vec::new(),
            };
        };

        let changed = expected
            .iter()
            .filter(|(path, content)| files.get(path) != Some(*content))
            .map(|(path, _)| path.to_string())
            .collect();
        Self {
            removed: files.removed_in(&expected),
            changed,
            requires_replacement: immutable_changes(previous, config),
            expected,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.removed.is_empty() || !self.changed.is_empty()
    }
}

/// Names of identity fields that differ between two configurations.
pub fn immutable_changes(previous: &Configuration, next: &Configuration) -> Vec<String> {
    let mut changed = Vec::new();
    if previous.namespace != next.namespace {
        changed.push("namespace");
    }
    if previous.repository.url.trim() != next.repository.url.trim() {
        changed.push("repository.url");
    }
    if previous.repository.branch != next.repository.branch {
        changed.push("repository.branch");
    }
    if previous.secret_name() != next.secret_name() {
        changed.push("repository.secretName");
    }
    changed.into_iter().map(str::to_string).collect()
}
