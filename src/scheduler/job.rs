// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::report::{mask, JobReport, RunEvent, Status, StepReport};
use crate::binding::PlannedJob;
use crate::errors::{ReflowError, ReflowResult};
use crate::executors::{StepExecutor, StepInvocation, StepOutcome};

/// Everything a job task owns
pub(super) struct JobTask {
    pub job: PlannedJob,
    pub executor: Arc<dyn StepExecutor>,
    pub working_dir: PathBuf,
    pub create_dir: bool,
    pub timeout: Option<Duration>,
    pub stop: watch::Receiver<bool>,
    pub events: Option<mpsc::UnboundedSender<RunEvent>>,
}

enum StepEnd {
    Finished(ReflowResult<StepOutcome>),
    TimedOut,
    Stopped,
}

impl JobTask {
    fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }

    /// Run steps in order until one fails, the deadline passes or the run stops
    pub async fn run(mut self) -> JobReport {
        let start = Instant::now();
        let deadline = self.timeout.map(|t| start + t);
        let name = self.job.name.clone();

        self.emit(RunEvent::JobStarted { job: name.clone() });
        tracing::info!(job = %name, "job started");

        let mut error = None;
        let mut steps = Vec::with_capacity(self.job.steps.len());

        if self.create_dir {
            if let Err(e) = tokio::fs::create_dir_all(&self.working_dir).await {
                error = Some(ReflowError::FileWriteError {
                    path: self.working_dir.clone(),
                    error: e.to_string(),
                });
            }
        }

        let planned = std::mem::take(&mut self.job.steps);
        for step in &planned {
            if error.is_some() {
                steps.push(StepReport::skipped(step.name.clone()));
                continue;
            }

            let invocation = StepInvocation::from_planned(&name, step);
            self.emit(RunEvent::StepStarted {
                job: name.clone(),
                step: step.name.clone(),
            });

            let (report, failure) = match self.run_step(&invocation, deadline).await {
                StepEnd::Finished(Ok(outcome)) => self.record(&invocation, outcome),
                StepEnd::Finished(Err(e)) => (StepReport::failed(step.name.clone()), Some(e)),
                StepEnd::TimedOut => {
                    let limit = self.timeout.unwrap_or_default();
                    tracing::warn!(job = %name, step = %step.name, "job timed out after {:?}", limit);
                    (
                        StepReport::failed(step.name.clone()),
                        Some(ReflowError::Timeout {
                            job: name.clone(),
                            limit,
                        }),
                    )
                }
                StepEnd::Stopped => {
                    tracing::warn!(job = %name, step = %step.name, "job cancelled");
                    (
                        StepReport::failed(step.name.clone()),
                        Some(ReflowError::Cancelled { job: name.clone() }),
                    )
                }
            };

            self.emit(RunEvent::StepFinished {
                job: name.clone(),
                step: step.name.clone(),
                status: report.status,
            });
            steps.push(report);
            error = failure;
        }

        let status = if error.is_some() {
            Status::Failed
        } else {
            Status::Succeeded
        };
        let duration = start.elapsed();

        self.emit(RunEvent::JobFinished {
            job: name.clone(),
            status,
            duration,
        });
        match error {
            Some(ref e) => tracing::info!(job = %name, "job failed: {}", e),
            None => tracing::info!(job = %name, "job succeeded in {:.2}s", duration.as_secs_f64()),
        }

        JobReport {
            name,
            status,
            error,
            reason: None,
            duration_ms: duration.as_millis() as u64,
            steps,
        }
    }

    async fn run_step(&mut self, invocation: &StepInvocation, deadline: Option<Instant>) -> StepEnd {
        let already_stopped = *self.stop.borrow();
        if already_stopped {
            return StepEnd::Stopped;
        }

        let execute = self.executor.execute(invocation, &self.working_dir);
        let bounded = async {
            match deadline {
                Some(at) => match tokio::time::timeout_at(at, execute).await {
                    Ok(result) => StepEnd::Finished(result),
                    Err(_) => StepEnd::TimedOut,
                },
                None => StepEnd::Finished(execute.await),
            }
        };

        // Losing branches are dropped, which kills the step's process
        tokio::select! {
            end = bounded => end,
            _ = stopped(&mut self.stop) => StepEnd::Stopped,
        }
    }

    fn record(&self, invocation: &StepInvocation, outcome: StepOutcome) -> (StepReport, Option<ReflowError>) {
        let output = mask(&outcome.combined_output(), &self.job.secrets);
        let report = StepReport {
            name: invocation.step.clone(),
            status: if outcome.success {
                Status::Succeeded
            } else {
                Status::Failed
            },
            exit_code: Some(outcome.exit_code),
            output: (!output.trim().is_empty()).then_some(output),
        };

        let error = (!outcome.success).then(|| {
            ReflowError::step_exit(
                &invocation.job,
                &invocation.step,
                outcome.exit_code,
                &mask(&outcome.stderr, &self.job.secrets),
            )
        });

        (report, error)
    }
}

/// Resolves once the stop flag is raised; never if the sender is gone
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
