// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Step executors
//!
//! The scheduler treats step execution as an opaque capability: it hands an
//! executor a command and environment and gets back an exit status and the
//! captured output.

mod shell;

pub use shell::ShellExecutor;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::binding::{PlannedStep, Secret};
use crate::errors::ReflowError;

/// What an executor is asked to run
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub job: String,
    pub step: String,
    pub command: String,
    pub shell: String,
    pub env: BTreeMap<String, String>,
    pub secret_env: BTreeMap<String, Secret>,
}

impl StepInvocation {
    pub fn from_planned(job: &str, step: &PlannedStep) -> Self {
        Self {
            job: job.to_string(),
            step: step.name.clone(),
            command: step.command.clone(),
            shell: step.shell.clone(),
            env: step.env.clone(),
            secret_env: step.secret_env.clone(),
        }
    }
}

/// Result of running one step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Whether execution succeeded
    pub success: bool,

    /// Exit code
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Execution duration
    pub duration: Duration,
}

impl StepOutcome {
    /// Create a successful result
    pub fn success(stdout: String, duration: Duration) -> Self {
        Self {
            success: true,
            exit_code: 0,
            stdout,
            stderr: String::new(),
            duration,
        }
    }

    /// Create a failed result
    pub fn failure(stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr,
            duration,
        }
    }

    /// Captured output, stdout followed by stderr
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Trait for step executors
///
/// Dropping the returned future must stop the step; the scheduler relies on
/// that for timeouts and cancellation.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute a step
    ///
    /// `Err` means the step could not be started at all; a step that ran and
    /// exited non-zero is an `Ok` outcome with `success == false`.
    async fn execute(
        &self,
        invocation: &StepInvocation,
        working_dir: &Path,
    ) -> Result<StepOutcome, ReflowError>;

    /// Check if the executor can run `shell`
    async fn check_available(&self, shell: &str) -> Result<bool, ReflowError>;
}
