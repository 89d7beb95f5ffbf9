// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Execution scheduler
//!
//! Runs the jobs of an [`ExecutionPlan`] in dependency order. Independent
//! jobs run concurrently as tokio tasks, bounded by `max_parallel`; the steps
//! of one job run sequentially and stop at the first failure.
//!
//! A job is started once every job it needs has succeeded. If a need failed
//! or was skipped the job is skipped too, unless it is marked `always`, in
//! which case it starts once every need is terminal.

mod job;
mod report;

pub use report::{
    mask, JobReport, JobState, RunEvent, RunReport, RunStatus, Status, StepReport,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::binding::{ExecutionPlan, PlannedJob};
use crate::errors::{ReflowError, ReflowResult};
use crate::executors::StepExecutor;
use crate::pipeline::JobGraph;
use job::JobTask;

/// Scheduler options
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of jobs running at once
    pub max_parallel: usize,
    /// Stop the whole run at the first failed job
    pub halt_on_failure: bool,
    /// Applied to jobs that declare no timeout
    pub default_timeout: Option<Duration>,
    /// Give each job its own directory under `workspace`
    pub isolate_workspaces: bool,
    /// Root for per-job directories
    pub workspace: PathBuf,
    /// Working directory for steps when workspaces are shared
    pub working_dir: PathBuf,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_parallel: default_parallelism(),
            halt_on_failure: false,
            default_timeout: None,
            isolate_workspaces: false,
            workspace: PathBuf::from(".reflow/work"),
            working_dir: PathBuf::from("."),
        }
    }
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Requests cancellation of a run
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Job scheduler
pub struct Scheduler {
    executor: Arc<dyn StepExecutor>,
    options: SchedulerOptions,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(executor: Arc<dyn StepExecutor>, options: SchedulerOptions) -> Self {
        Self {
            executor,
            options,
            events: None,
        }
    }

    /// Send progress events to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Execute a plan to completion, or until `cancel` fires
    ///
    /// Only a malformed job graph is an `Err`; job failures are reported in
    /// the returned [`RunReport`].
    pub async fn run(&self, plan: &ExecutionPlan, cancel: &CancelHandle) -> ReflowResult<RunReport> {
        let graph = JobGraph::build(&plan.jobs)?;
        let order = graph.topological_order();
        let started = Instant::now();
        let limit = self.options.max_parallel.max(1);

        let mut run = RunState {
            plan,
            states: vec![JobState::Pending; plan.jobs.len()],
            reports: plan.jobs.iter().map(|_| None).collect(),
            events: self.events.clone(),
        };

        let (stop_tx, _) = watch::channel(false);
        let mut cancel_rx = cancel.subscribe();
        let mut cancel_open = true;
        let mut cancelled = cancel.is_cancelled();
        let mut stopping = cancelled;
        let mut tasks: JoinSet<(usize, JobReport)> = JoinSet::new();

        tracing::info!(
            reference = %plan.reference,
            jobs = plan.jobs.len(),
            max_parallel = limit,
            "starting run"
        );

        loop {
            if stopping {
                run.skip_waiting(if cancelled {
                    "run was cancelled"
                } else {
                    "run halted after a failure"
                });
            } else {
                run.promote(&graph, &order);
                while tasks.len() < limit {
                    let Some(idx) = order.iter().copied().find(|&i| run.states[i] == JobState::Ready)
                    else {
                        break;
                    };
                    run.transition(idx, JobState::Running);
                    let task = self.job_task(&plan.jobs[idx], stop_tx.subscribe());
                    tasks.spawn(async move { (idx, task.run().await) });
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((idx, report))) => {
                        let failed = report.status == Status::Failed;
                        run.finish(idx, report);
                        if failed && self.options.halt_on_failure && !stopping {
                            tracing::warn!("halting run after failure of '{}'", plan.jobs[idx].name);
                            stopping = true;
                            stop_tx.send_replace(true);
                        }
                    }
                    Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    _ => {}
                },
                // Still polled while a halted run drains
                changed = cancel_rx.changed(), if cancel_open && !cancelled => {
                    if changed.is_err() {
                        cancel_open = false;
                    } else if *cancel_rx.borrow_and_update() {
                        tracing::warn!("cancellation requested");
                        run.emit(RunEvent::CancelRequested);
                        cancelled = true;
                        stopping = true;
                        stop_tx.send_replace(true);
                    }
                }
            }
        }

        let jobs = run.into_reports();
        let status = if jobs.iter().any(|j| j.status == Status::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        let duration = started.elapsed();

        tracing::info!(
            reference = %plan.reference,
            status = ?status,
            cancelled,
            "run finished in {:.2}s",
            duration.as_secs_f64()
        );

        Ok(RunReport {
            reference: plan.reference.to_string(),
            status,
            cancelled,
            duration_ms: duration.as_millis() as u64,
            jobs,
        })
    }

    fn job_task(&self, job: &PlannedJob, stop: watch::Receiver<bool>) -> JobTask {
        let (working_dir, create_dir) = if self.options.isolate_workspaces {
            (job_workspace(&self.options.workspace, &job.name), true)
        } else {
            (self.options.working_dir.clone(), false)
        };

        JobTask {
            job: job.clone(),
            executor: Arc::clone(&self.executor),
            working_dir,
            create_dir,
            timeout: job.timeout.or(self.options.default_timeout),
            stop,
            events: self.events.clone(),
        }
    }
}

/// Directory for one job's isolated workspace
pub fn job_workspace(root: &Path, job: &str) -> PathBuf {
    let safe: String = job
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    root.join(safe)
}

/// Bookkeeping for one run
struct RunState<'a> {
    plan: &'a ExecutionPlan,
    states: Vec<JobState>,
    reports: Vec<Option<JobReport>>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunState<'_> {
    fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }

    fn transition(&mut self, idx: usize, next: JobState) {
        let current = self.states[idx];
        debug_assert!(
            current.can_become(next),
            "illegal transition {} -> {} for '{}'",
            current,
            next,
            self.plan.jobs[idx].name
        );
        tracing::debug!(job = %self.plan.jobs[idx].name, "{} -> {}", current, next);
        self.states[idx] = next;
    }

    /// Move pending jobs whose needs are settled to Ready or Skipped
    ///
    /// Walking in topological order settles whole skipped chains in one pass.
    fn promote(&mut self, graph: &JobGraph, order: &[usize]) {
        for &idx in order {
            if self.states[idx] != JobState::Pending {
                continue;
            }

            let needs = graph.dependency_indices(idx);
            if needs.iter().all(|&d| self.states[d] == JobState::Succeeded) {
                self.transition(idx, JobState::Ready);
                continue;
            }
            if !needs.iter().all(|&d| self.states[d].is_terminal()) {
                continue;
            }

            if self.plan.jobs[idx].always {
                self.transition(idx, JobState::Ready);
            } else {
                let blocker = needs
                    .iter()
                    .find(|&&d| self.states[d] != JobState::Succeeded)
                    .map(|&d| self.plan.jobs[d].name.as_str())
                    .unwrap_or_default();
                let reason = format!("needed job '{}' did not succeed", blocker);
                self.skip(idx, reason);
            }
        }
    }

    fn skip_waiting(&mut self, reason: &str) {
        for idx in 0..self.states.len() {
            if matches!(self.states[idx], JobState::Pending | JobState::Ready) {
                self.skip(idx, reason.to_string());
            }
        }
    }

    fn skip(&mut self, idx: usize, reason: String) {
        let plan = self.plan;
        let job = &plan.jobs[idx];
        tracing::info!(job = %job.name, "job skipped: {}", reason);
        self.emit(RunEvent::JobSkipped {
            job: job.name.clone(),
            reason: reason.clone(),
        });
        self.reports[idx] = Some(JobReport::skipped(
            &job.name,
            reason,
            job.steps.iter().map(|s| s.name.clone()),
        ));
        self.transition(idx, JobState::Skipped);
    }

    fn finish(&mut self, idx: usize, report: JobReport) {
        let next = match report.status {
            Status::Succeeded => JobState::Succeeded,
            _ => JobState::Failed,
        };
        self.transition(idx, next);
        self.reports[idx] = Some(report);
    }

    /// Reports in definition order
    fn into_reports(self) -> Vec<JobReport> {
        let plan = self.plan;
        self.reports
            .into_iter()
            .enumerate()
            .map(|(idx, report)| {
                report.unwrap_or_else(|| JobReport {
                    name: plan.jobs[idx].name.clone(),
                    status: Status::Failed,
                    error: Some(ReflowError::Cancelled {
                        job: plan.jobs[idx].name.clone(),
                    }),
                    reason: None,
                    duration_ms: 0,
                    steps: plan.jobs[idx]
                        .steps
                        .iter()
                        .map(|s| StepReport::skipped(s.name.clone()))
                        .collect(),
                })
            })
            .collect()
    }
}
