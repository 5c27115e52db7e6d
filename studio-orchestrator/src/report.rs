//! Aggregate results of orchestrator operations.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CreateProfiles,
    CreateWorkspaces,
    DeleteSessions,
    DeleteWorkspaces,
    DeleteProfiles,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::CreateProfiles => "create profiles",
            Stage::CreateWorkspaces => "create workspaces",
            Stage::DeleteSessions => "delete sessions",
            Stage::DeleteWorkspaces => "delete workspaces",
            Stage::DeleteProfiles => "delete profiles",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub resource: String,
    pub reason: String,
}

/// Outcome of one fan-out stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<ResourceFailure>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            attempted: 0,
            succeeded: 0,
            failures: Vec::new(),
        }
    }

    /// True when every item converged. An empty stage counts as clean.
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty() && self.succeeded == self.attempted
    }

    pub fn failed_resources(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.resource.as_str())
    }

    pub(crate) fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub(crate) fn record_failure(&mut self, resource: impl fmt::Display, reason: impl Into<String>) {
        self.attempted += 1;
        self.failures.push(ResourceFailure {
            resource: resource.to_string(),
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "report", rename_all = "lowercase")]
pub enum StageOutcome {
    Completed(StageReport),
    /// Not run because an earlier stage did not fully succeed.
    Skipped,
}

impl StageOutcome {
    pub fn report(&self) -> Option<&StageReport> {
        match self {
            StageOutcome::Completed(report) => Some(report),
            StageOutcome::Skipped => None,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, StageOutcome::Completed(report) if report.all_succeeded())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub profiles: StageReport,
    pub workspaces: StageReport,
    /// Entries written to the membership store.
    pub persisted: usize,
}

impl ProvisionReport {
    pub fn all_succeeded(&self) -> bool {
        self.profiles.all_succeeded() && self.workspaces.all_succeeded()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub sessions: StageOutcome,
    pub workspaces: StageOutcome,
    pub profiles: StageOutcome,
    pub store_cleared: bool,
}

impl PurgeReport {
    /// First stage that did not fully succeed, if any.
    pub fn stalled_at(&self) -> Option<Stage> {
        [
            (&self.sessions, Stage::DeleteSessions),
            (&self.workspaces, Stage::DeleteWorkspaces),
            (&self.profiles, Stage::DeleteProfiles),
        ]
        .into_iter()
        .find(|(outcome, _)| !outcome.is_clean())
        .map(|(_, stage)| stage)
    }

    pub fn is_clean(&self) -> bool {
        self.stalled_at().is_none() && self.store_cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(stage: Stage) -> StageOutcome {
        let mut report = StageReport::new(stage);
        report.record_success();
        StageOutcome::Completed(report)
    }

    #[test]
    fn test_empty_stage_is_clean() {
        assert!(StageReport::new(Stage::DeleteSessions).all_succeeded());
    }

    #[test]
    fn test_failure_marks_stage_dirty() {
        let mut report = StageReport::new(Stage::DeleteWorkspaces);
        report.record_success();
        report.record_failure("workspace 'alice-ce-space'", "in use");
        assert!(!report.all_succeeded());
        assert_eq!(report.attempted, 2);
        assert_eq!(
            report.failed_resources().collect::<Vec<_>>(),
            vec!["workspace 'alice-ce-space'"]
        );
    }

    #[test]
    fn test_stalled_at_names_first_dirty_stage() {
        let mut dirty = StageReport::new(Stage::DeleteWorkspaces);
        dirty.record_failure("workspace 'w'", "in use");

        let report = PurgeReport {
            sessions: clean(Stage::DeleteSessions),
            workspaces: StageOutcome::Completed(dirty),
            profiles: StageOutcome::Skipped,
            store_cleared: false,
        };
        assert_eq!(report.stalled_at(), Some(Stage::DeleteWorkspaces));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_clean_purge() {
        let report = PurgeReport {
            sessions: clean(Stage::DeleteSessions),
            workspaces: clean(Stage::DeleteWorkspaces),
            profiles: clean(Stage::DeleteProfiles),
            store_cleared: true,
        };
        assert_eq!(report.stalled_at(), None);
        assert!(report.is_clean());
    }

    #[test]
    fn test_report_serializes() {
        let json = serde_json::to_value(StageOutcome::Skipped).unwrap();
        assert_eq!(json["state"], "skipped");
    }
}
