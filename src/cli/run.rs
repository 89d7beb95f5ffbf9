// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Run command - resolve, bind and execute a definition

use colored::Colorize;
use indicatif::ProgressBar;
use miette::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Context, OutputFormat};
use crate::binding::{ExecutionPlan, Invocation, Planner, Secret};
use crate::errors::ReflowError;
use crate::executors::{ShellExecutor, StepExecutor};
use crate::pipeline::{JobGraph, Reference};
use crate::scheduler::{CancelHandle, RunEvent, RunReport, Scheduler, Status};
use crate::utils::create_spinner;

/// Command-line options for a run
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub reference: Reference,
    pub inputs: Vec<String>,
    pub secrets: Vec<String>,
    pub max_parallel: Option<usize>,
    pub halt_on_failure: bool,
    pub dry_run: bool,
    pub format: OutputFormat,
}

/// Run a definition
pub async fn run(args: RunArgs, ctx: Context) -> Result<()> {
    let inputs = parse_inputs(&args.inputs)?;
    let secrets = parse_secrets(&args.secrets, |var| std::env::var(var).ok())?;

    let resolver = ctx.resolver()?;
    let resolved = resolver.resolve(&args.reference).await?;

    let invocation = Invocation {
        reference: args.reference.clone(),
        inputs,
        secrets,
    };
    let plan = Planner::plan(&resolved, &invocation)?;

    if args.dry_run {
        return print_plan(&plan);
    }

    let mut options = ctx.config.scheduler_options(&ctx.working_dir);
    if let Some(n) = args.max_parallel {
        if n == 0 {
            return Err(miette::miette!("--max-parallel must be at least 1"));
        }
        options.max_parallel = n;
    }
    options.halt_on_failure |= args.halt_on_failure;

    let executor = Arc::new(ShellExecutor::new());
    check_shells(&plan, executor.as_ref()).await?;

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(executor, options).with_events(tx);

    let printer = match args.format {
        OutputFormat::Text => {
            println!();
            println!("{}: {}", "Running".bold(), plan.reference);
            println!("{}", "═".repeat(50));
            Some(tokio::spawn(print_progress(rx)))
        }
        OutputFormat::Json => None,
    };

    let report = scheduler.run(&plan, &cancel).await;
    drop(scheduler);
    if let Some(handle) = printer {
        let _ = handle.await;
    }
    let report = report?;

    match args.format {
        OutputFormat::Text => print_summary(&report, ctx.verbose),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).map_err(ReflowError::from)?;
            println!("{}", json);
        }
    }

    if report.cancelled {
        return Err(miette::miette!("Run was cancelled"));
    }
    if !report.succeeded() {
        return Err(miette::miette!("Run failed"));
    }

    Ok(())
}

/// Parse `KEY=VALUE` pairs
pub fn parse_inputs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut inputs = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| miette::miette!("Invalid input '{}': expected KEY=VALUE", pair))?;
        inputs.insert(key.to_string(), value.to_string());
    }
    Ok(inputs)
}

/// Parse `NAME` / `NAME=VAR` secret specs, reading values through `lookup`
pub fn parse_secrets(
    specs: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<BTreeMap<String, Secret>> {
    let mut secrets = BTreeMap::new();
    for spec in specs {
        let (name, var) = spec.split_once('=').unwrap_or((spec.as_str(), spec.as_str()));
        if name.is_empty() || var.is_empty() {
            return Err(miette::miette!("Invalid secret '{}': expected NAME or NAME=VAR", spec));
        }
        let value = lookup(var).ok_or_else(|| {
            miette::miette!("Secret '{}' reads environment variable '{}', which is not set", name, var)
        })?;
        secrets.insert(name.to_string(), Secret::new(value));
    }
    Ok(secrets)
}

/// Fail early if a step's shell is not installed
async fn check_shells(plan: &ExecutionPlan, executor: &dyn StepExecutor) -> Result<()> {
    let shells: BTreeSet<&str> = plan
        .jobs
        .iter()
        .flat_map(|j| j.steps.iter().map(|s| s.shell.as_str()))
        .collect();

    let mut missing = Vec::new();
    for shell in shells {
        if !executor.check_available(shell).await.unwrap_or(false) {
            missing.push(shell);
        }
    }

    if !missing.is_empty() {
        eprintln!("{}", "Missing shells:".red().bold());
        for shell in &missing {
            eprintln!("  {} {}", "✗".red(), shell);
        }
        return Err(miette::miette!("Required shells are not installed"));
    }

    Ok(())
}

/// Print what a run would execute
fn print_plan(plan: &ExecutionPlan) -> Result<()> {
    let graph = JobGraph::build(&plan.jobs)?;

    println!();
    println!("{}: {}", "Definition".bold(), plan.reference);
    println!("{}", "═".repeat(50));

    if !plan.inputs.is_empty() {
        println!("{}:", "Inputs".bold());
        for (key, value) in plan.inputs.iter() {
            println!("  {} = {}", key, value);
        }
        println!();
    }

    println!(
        "Execution plan ({} job{}):",
        plan.jobs.len(),
        if plan.jobs.len() == 1 { "" } else { "s" }
    );

    for (level, jobs) in graph.levels().iter().enumerate() {
        println!();
        println!("  {}", format!("level {}", level).dimmed());
        for &idx in jobs {
            let job = &plan.jobs[idx];
            print!("  {} {}", "•".blue(), job.name.bold());
            if !job.needs.is_empty() {
                print!(" {}", format!("[needs: {}]", job.needs.join(", ")).dimmed());
            }
            if job.always {
                print!(" {}", "(always)".dimmed());
            }
            println!();
            for (i, step) in job.steps.iter().enumerate() {
                println!("      {}. {} {}", i + 1, step.name, format!("$ {}", step.command).dimmed());
            }
        }
    }

    println!();
    println!("{}", "Dry run: nothing was executed.".dimmed());

    Ok(())
}

/// Show job progress while the run executes
async fn print_progress(mut rx: mpsc::UnboundedReceiver<RunEvent>) {
    let spinner = create_spinner("waiting for jobs");
    let mut running: Vec<String> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::JobStarted { job } => {
                say(&spinner, format!("  {} {}", "→".blue(), job));
                running.push(job);
            }
            RunEvent::JobFinished { job, status, duration } => {
                running.retain(|j| *j != job);
                let line = match status {
                    Status::Succeeded => format!(
                        "  {} {} ({:.2}s)",
                        "✓".green(),
                        job.bold(),
                        duration.as_secs_f64()
                    ),
                    _ => format!("  {} {} failed", "✗".red(), job.bold()),
                };
                say(&spinner, line);
            }
            RunEvent::JobSkipped { job, reason } => {
                say(&spinner, format!(
                    "  {} {} {}",
                    "○".dimmed(),
                    job.dimmed(),
                    format!("(skipped: {})", reason).dimmed()
                ));
            }
            RunEvent::StepStarted { job, step } => {
                spinner.set_message(format!("{}: {}", job, step));
            }
            RunEvent::StepFinished { .. } => {}
            RunEvent::CancelRequested => {
                say(&spinner, format!("  {} cancelling...", "⚠".yellow()));
            }
        }

        if running.is_empty() {
            spinner.set_message("waiting for jobs");
        }
    }

    spinner.finish_and_clear();
}

/// Print above the spinner; still printed when stdout is not a terminal
fn say(spinner: &ProgressBar, line: String) {
    spinner.suspend(|| println!("{}", line));
}

fn print_summary(report: &RunReport, verbose: bool) {
    for job in &report.jobs {
        let show_output = verbose || job.status == Status::Failed;
        if !show_output || job.status == Status::Skipped {
            continue;
        }

        if let Some(ref error) = job.error {
            eprintln!();
            eprintln!("{}", format!("Job '{}' failed:", job.name).red().bold());
            eprintln!("  {}", error);
        }

        for step in &job.steps {
            if let Some(ref output) = step.output {
                if verbose || step.status == Status::Failed {
                    eprintln!();
                    eprintln!("  {} {}", "─".dimmed(), step.name.bold());
                    for line in output.lines() {
                        eprintln!("    {}", line.dimmed());
                    }
                }
            }
        }
    }

    let seconds = report.duration_ms as f64 / 1000.0;
    let counts = format!(
        "{} succeeded, {} failed, {} skipped",
        report.count(Status::Succeeded),
        report.count(Status::Failed),
        report.count(Status::Skipped)
    );

    println!();
    if report.succeeded() && !report.cancelled {
        println!(
            "{} {}",
            format!("Run completed successfully in {:.2}s", seconds).green(),
            format!("({})", counts).dimmed()
        );
    } else if report.cancelled {
        println!(
            "{} {}",
            format!("Run cancelled after {:.2}s", seconds).yellow(),
            format!("({})", counts).dimmed()
        );
    } else {
        println!(
            "{} {}",
            format!("Run failed after {:.2}s", seconds).red(),
            format!("({})", counts).dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_inputs() {
        let inputs = parse_inputs(&strings(&["env=prod", "flags=--a=b", "empty="])).unwrap();
        assert_eq!(inputs["env"], "prod");
        assert_eq!(inputs["flags"], "--a=b");
        assert_eq!(inputs["empty"], "");

        assert!(parse_inputs(&strings(&["novalue"])).is_err());
        assert!(parse_inputs(&strings(&["=x"])).is_err());
    }

    #[test]
    fn test_parse_secrets() {
        let env = |var: &str| match var {
            "token" => Some("t1".to_string()),
            "DEPLOY_KEY" => Some("k2".to_string()),
            _ => None,
        };

        let secrets = parse_secrets(&strings(&["token", "key=DEPLOY_KEY"]), env).unwrap();
        assert_eq!(secrets["token"].expose(), "t1");
        assert_eq!(secrets["key"].expose(), "k2");

        let err = parse_secrets(&strings(&["missing"]), env).unwrap_err();
        assert!(err.to_string().contains("not set"));
        assert!(parse_secrets(&strings(&["name="]), env).is_err());
    }
}
