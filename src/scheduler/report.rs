// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Job states, run results and progress events

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::errors::ReflowError;

/// Lifecycle of one job within a run
///
/// `Pending -> Ready -> Running -> {Succeeded, Failed}`, with `Skipped`
/// reachable from `Pending` and `Ready` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall run outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Terminal status of a job or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Result of a whole run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub reference: String,
    pub status: RunStatus,
    /// Set when the run was stopped through its cancel handle
    pub cancelled: bool,
    pub duration_ms: u64,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Count of jobs with `status`
    pub fn count(&self, status: Status) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

/// Result of one job
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub name: String,
    pub status: Status,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<ReflowError>,
    /// Why a skipped job never ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    pub steps: Vec<StepReport>,
}

impl JobReport {
    pub(crate) fn skipped(name: &str, reason: String, steps: impl Iterator<Item = String>) -> Self {
        Self {
            name: name.to_string(),
            status: Status::Skipped,
            error: None,
            reason: Some(reason),
            duration_ms: 0,
            steps: steps.map(StepReport::skipped).collect(),
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured output with secret values masked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl StepReport {
    pub(crate) fn failed(name: String) -> Self {
        Self {
            name,
            status: Status::Failed,
            exit_code: None,
            output: None,
        }
    }

    pub(crate) fn skipped(name: String) -> Self {
        Self {
            name,
            status: Status::Skipped,
            exit_code: None,
            output: None,
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<ReflowError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Progress notifications emitted while a run executes
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    JobStarted { job: String },
    JobFinished { job: String, status: Status, duration: Duration },
    JobSkipped { job: String, reason: String },
    StepStarted { job: String, step: String },
    StepFinished { job: String, step: String, status: Status },
    CancelRequested,
}

/// Replace every occurrence of each secret value with `***`
pub fn mask(text: &str, secrets: &[crate::binding::Secret]) -> String {
    let mut values: Vec<&str> = secrets
        .iter()
        .map(|s| s.expose())
        .filter(|v| !v.is_empty())
        .collect();
    // Longest first so a secret containing another is masked whole
    values.sort_by_key(|v| std::cmp::Reverse(v.len()));

    let mut masked = text.to_string();
    for value in values {
        masked = masked.replace(value, "***");
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Secret;

    #[test]
    fn test_transitions() {
        assert!(JobState::Pending.can_become(JobState::Ready));
        assert!(JobState::Pending.can_become(JobState::Skipped));
        assert!(JobState::Running.can_become(JobState::Failed));
        assert!(!JobState::Running.can_become(JobState::Skipped));
        assert!(!JobState::Succeeded.can_become(JobState::Failed));
        assert!(!JobState::Pending.can_become(JobState::Running));
        assert!(JobState::Skipped.is_terminal());
        assert!(!JobState::Ready.is_terminal());
    }

    #[test]
    fn test_mask() {
        let secrets = vec![Secret::new("abc"), Secret::new("abcdef"), Secret::new("")];
        assert_eq!(mask("token=abcdef; short=abc", &secrets), "token=***; short=***");
        assert_eq!(mask("nothing here", &[]), "nothing here");
    }

    #[test]
    fn test_report_json() {
        let report = RunReport {
            reference: "acme/ci@v1".into(),
            status: RunStatus::Failed,
            cancelled: false,
            duration_ms: 12,
            jobs: vec![JobReport {
                name: "test".into(),
                status: Status::Failed,
                error: Some(ReflowError::Timeout {
                    job: "test".into(),
                    limit: Duration::from_secs(1),
                }),
                reason: None,
                duration_ms: 10,
                steps: vec![StepReport::skipped("lint".into())],
            }],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["jobs"][0]["error"], "Job 'test' timed out after 1s");
        assert_eq!(json["jobs"][0]["steps"][0]["status"], "skipped");
        assert!(json["jobs"][0].get("reason").is_none());
    }
}
