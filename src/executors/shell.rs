// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Shell executor
//!
//! Runs each step as `<shell> -c <command>`.

use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;

use super::{StepExecutor, StepInvocation, StepOutcome};
use crate::errors::ReflowError;

/// Shell executor
pub struct ShellExecutor;

impl ShellExecutor {
    /// Create a new shell executor
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(
        &self,
        invocation: &StepInvocation,
        working_dir: &Path,
    ) -> Result<StepOutcome, ReflowError> {
        let start = Instant::now();

        let mut cmd = Command::new(&invocation.shell);
        cmd.arg("-c").arg(&invocation.command);
        cmd.current_dir(working_dir);
        cmd.envs(&invocation.env);
        cmd.envs(
            invocation
                .secret_env
                .iter()
                .map(|(k, v)| (k.as_str(), v.expose())),
        );
        cmd.stdin(std::process::Stdio::null());
        // Timeouts and cancellation drop this future; the child must go with it
        cmd.kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| ReflowError::StepExecution {
            job: invocation.job.clone(),
            step: invocation.step.clone(),
            message: format!("failed to start '{}': {}", invocation.shell, e),
            exit_code: None,
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(StepOutcome {
            success: output.status.success(),
            exit_code,
            stdout,
            stderr,
            duration,
        })
    }

    async fn check_available(&self, shell: &str) -> Result<bool, ReflowError> {
        Ok(which::which(shell).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Secret;
    use std::collections::BTreeMap;

    fn make_invocation(command: &str) -> StepInvocation {
        StepInvocation {
            job: "job".into(),
            step: "step".into(),
            command: command.into(),
            shell: "sh".into(),
            env: BTreeMap::new(),
            secret_env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let executor = ShellExecutor::new();
        let outcome = executor
            .execute(&make_invocation("echo hello"), Path::new("."))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_outcome() {
        let executor = ShellExecutor::new();
        let outcome = executor
            .execute(&make_invocation("echo nope >&2; exit 3"), Path::new("."))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stderr.contains("nope"));
    }

    #[tokio::test]
    async fn test_env_and_secret_env_are_passed() {
        let executor = ShellExecutor::new();
        let mut invocation = make_invocation("echo \"$GREETING $TOKEN\"");
        invocation.env.insert("GREETING".into(), "hi".into());
        invocation
            .secret_env
            .insert("TOKEN".into(), Secret::new("t0k"));

        let outcome = executor.execute(&invocation, Path::new(".")).await.unwrap();
        assert_eq!(outcome.stdout.trim(), "hi t0k");
    }

    #[tokio::test]
    async fn test_missing_shell_is_an_error() {
        let executor = ShellExecutor::new();
        let mut invocation = make_invocation("true");
        invocation.shell = "definitely-not-a-shell-xyz".into();

        let result = executor.execute(&invocation, Path::new(".")).await;
        assert!(matches!(result, Err(ReflowError::StepExecution { exit_code: None, .. })));
        assert!(!executor.check_available("definitely-not-a-shell-xyz").await.unwrap());
    }
}
