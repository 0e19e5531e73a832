use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Hint};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_LOCK_HELD: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Validating,
    GeneratingArtifact,
    SyncingRepo,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    FailedContinuable,
    FailedFatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    GenerateArtifact,
    SyncRepo,
}

impl Stage {
    pub fn state(self) -> RunState {
        match self {
            Stage::Validate => RunState::Validating,
            Stage::GenerateArtifact => RunState::GeneratingArtifact,
            Stage::SyncRepo => RunState::SyncingRepo,
        }
    }
}

/// Error summary carried in a report. Details are kept so a JSON consumer
/// sees the failing step and its exit code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    pub code: String,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

impl From<&Error> for StageError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
            hints: err.hints.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StageError>,
}

impl StageReport {
    pub fn succeeded(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Succeeded,
            message: Some(message.into()),
            errors: Vec::new(),
        }
    }

    pub fn failed(stage: Stage, outcome: StageOutcome, errors: &[Error]) -> Self {
        Self {
            stage,
            outcome,
            message: errors.first().map(|e| e.message.clone()),
            errors: errors.iter().map(StageError::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub state: RunState,
    pub exit_code: i32,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Stage>,
    /// Why the run never reached its stages (lock held, lock not writable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<StageError>,
    pub elapsed_secs: f64,
}

impl SyncReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn ran(&self, stage: Stage) -> bool {
        self.stage(stage).is_some()
    }
}

/// Run switches taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub check_only: bool,
    pub skip_types: bool,
    pub skip_git: bool,
    pub force: bool,
    pub timeout_network: Option<u64>,
    pub timeout_push: Option<u64>,
}
