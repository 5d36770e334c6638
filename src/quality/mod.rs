//! Document quality gate collaborator interface.
//!
//! The indexing pipeline consumes this as a narrow seam: a file with any
//! critical issue is skipped (never deleted or modified) and reported in the
//! index result. Rule sets live behind the trait.

use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Checks a single file for quality issues. Must never modify the file.
pub trait QualityGate: Send + Sync {
    fn check(&self, path: &Path, rel_path: &str) -> Vec<Issue>;
}

/// Joined messages of all critical issues, or `None` when the file passes.
pub fn critical_reasons(issues: &[Issue]) -> Option<String> {
    let reasons: Vec<&str> = issues
        .iter()
        .filter(|i| i.severity == Severity::Critical)
        .map(|i| i.message.as_str())
        .collect();
    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_reasons_joins_only_critical() {
        let issues = vec![
            Issue::new(Severity::Warning, "heading depth"),
            Issue::new(Severity::Critical, "empty body"),
            Issue::new(Severity::Critical, "broken link"),
            Issue::new(Severity::Info, "style"),
        ];
        assert_eq!(critical_reasons(&issues).unwrap(), "empty body; broken link");
    }

    #[test]
    fn no_critical_issues_passes() {
        let issues = vec![Issue::new(Severity::Warning, "minor")];
        assert!(critical_reasons(&issues).is_none());
        assert!(critical_reasons(&[]).is_none());
    }
}
