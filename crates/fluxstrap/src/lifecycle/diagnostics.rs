use std::fmt;

use serde::Serialize;

use crate::error::BootstrapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A human-readable note attached to an operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", level, self.summary, self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warning(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Warning, summary.into(), detail.into());
    }

    pub fn error(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Error, summary.into(), detail.into());
    }

    /// Records an error, expanding teardown failures into one entry each.
    pub fn error_from(&mut self, summary: &str, error: &BootstrapError) {
        match error {
            BootstrapError::Teardown { failures } => {
                for failure in failures {
                    self.error(summary, failure.clone());
                }
            }
            other => self.error(summary, other.to_string()),
        }
    }

    fn push(&mut self, severity: Severity, summary: String, detail: String) {
        match severity {
            Severity::Warning => tracing::warn!(summary = %summary, detail = %detail, "diagnostic"),
            Severity::Error => tracing::error!(summary = %summary, detail = %detail, "diagnostic"),
        }
        self.0.push(Diagnostic {
            severity,
            summary,
            detail,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A successful operation's value and the warnings it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub diagnostics: Diagnostics,
}

impl<T> Outcome<T> {
    pub fn new(value: T, diagnostics: Diagnostics) -> Self {
        Self { value, diagnostics }
    }
}

/// Result of a delete. The installation is untracked afterwards even when
/// `error` is set.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub diagnostics: Diagnostics,
    pub error: Option<BootstrapError>,
}

impl DeleteOutcome {
    pub fn failed(error: BootstrapError) -> Self {
        let mut diagnostics = Diagnostics::new();
        diagnostics.error_from("Delete failed", &error);
        Self {
            diagnostics,
            error: Some(error),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_failures_expand() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warning("Installation not ready", "GitRepository/flux-system/flux-system: auth failed");
        diagnostics.error_from(
            "Unable to remove Flux components",
            &BootstrapError::Teardown {
                failures: vec!["a".to_string(), "b".to_string()],
            },
        );
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.has_errors());
        assert_eq!(
            diagnostics.iter().next().unwrap().to_string(),
            "warning: Installation not ready: GitRepository/flux-system/flux-system: auth failed"
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.error("Unable to push", "rejected");
        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json[0]["severity"], "error");
        assert_eq!(json[0]["summary"], "Unable to push");
    }
}
