//! Run reports - per-resource outcomes aggregated over one apply

use crate::resource::{ResourceRef, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors scoped to one resource during convergence
///
/// These never abort the run; they are captured in the report and mark
/// dependents as skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConvergenceError {
    #[error("state query failed: {reason}")]
    StateQueryFailed { reason: String },

    #[error("state change failed: {reason}")]
    StateChangeFailed { reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Live state still diverges from desired after the change was issued
    #[error("still divergent after apply: {summary}")]
    PostApplyMismatch { summary: String },
}

/// One attribute's desired-vs-live delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrChange {
    pub attribute: String,
    /// Observed value before the change; `None` if the attribute was absent
    pub before: Option<Scalar>,
    pub after: Scalar,
}

impl fmt::Display for AttrChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.before {
            Some(before) => write!(f, "{}: {} -> {}", self.attribute, before, self.after),
            None => write!(f, "{}: (absent) -> {}", self.attribute, self.after),
        }
    }
}

/// Difference between desired attributes and live state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDiff {
    changes: Vec<AttrChange>,
}

impl AttrDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: AttrChange) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[AttrChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// One-line rendering, e.g. `ensure: stopped -> running, enable: false -> true`
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-resource result of one apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Live state already matched; no side effects
    Unchanged,
    /// Live state was changed and re-verified
    Changed,
    /// This resource could not be converged
    Failed(ConvergenceError),
    /// Not attempted (failed dependency, dry run, ...)
    Skipped { reason: String },
}

impl Outcome {
    /// Whether dependents may proceed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Unchanged | Self::Changed)
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// Report entry: `(type, title, outcome, diff)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub resource: ResourceRef,
    pub outcome: Outcome,
    /// Pending diff observed before acting (empty when already converged)
    pub diff: AttrDiff,
}

/// Counters over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Changed => self.changed += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unchanged + self.changed + self.failed + self.skipped
    }

    /// A run succeeds iff no resource failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Ordered list of per-resource outcomes for one apply
///
/// Entries appear in the catalog's topological order, so a dependency's
/// outcome is always recorded before any of its dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    resources: Vec<ResourceReport>,
    summary: RunSummary,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ResourceReport) {
        self.summary.add(&entry.outcome);
        self.resources.push(entry);
    }

    pub fn resources(&self) -> &[ResourceReport] {
        &self.resources
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn outcome_of(&self, reference: &ResourceRef) -> Option<&Outcome> {
        self.resources
            .iter()
            .find(|r| &r.resource == reference)
            .map(|r| &r.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    /// Process exit code for CLI consumers: 0 iff no resource failed
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, outcome: Outcome) -> ResourceReport {
        ResourceReport {
            resource: ResourceRef::service(title),
            outcome,
            diff: AttrDiff::new(),
        }
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut report = RunReport::new();
        report.push(entry("a", Outcome::Unchanged));
        report.push(entry("b", Outcome::Changed));
        report.push(entry(
            "c",
            Outcome::Failed(ConvergenceError::StateChangeFailed {
                reason: "boom".into(),
            }),
        ));
        report.push(entry(
            "d",
            Outcome::Skipped {
                reason: "dependency service[c] did not converge".into(),
            },
        ));

        let summary = report.summary();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 4);
        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_skips_do_not_fail_the_run() {
        let mut report = RunReport::new();
        report.push(entry("a", Outcome::Skipped { reason: "dry run".into() }));
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_diff_summary_rendering() {
        let mut diff = AttrDiff::new();
        diff.push(AttrChange {
            attribute: "ensure".into(),
            before: Some(Scalar::Str("stopped".into())),
            after: Scalar::Str("running".into()),
        });
        diff.push(AttrChange {
            attribute: "enable".into(),
            before: None,
            after: Scalar::Bool(true),
        });
        assert_eq!(
            diff.summary(),
            "ensure: stopped -> running, enable: (absent) -> true"
        );
    }
}
