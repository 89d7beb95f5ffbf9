// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Execution planning
//!
//! Binds an invocation against a resolved definition and flattens every
//! job into the primitive steps the scheduler runs. All contract and
//! expression errors surface here, before any job starts.

use std::collections::BTreeMap;
use std::time::Duration;

use super::expr::{interpolate, Scope};
use super::{Binder, ResolvedBindings, Secret};
use crate::errors::ReflowResult;
use crate::pipeline::{JobNode, Reference};
use crate::resolver::{ResolvedDefinition, ResolvedStep};

/// A pipeline invocation request
#[derive(Debug, Clone)]
pub struct Invocation {
    pub reference: Reference,
    pub inputs: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, Secret>,
}

impl Invocation {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            inputs: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn secret(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.secrets.insert(key.into(), value);
        self
    }
}

/// Bound, flattened pipeline ready to schedule
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub reference: Reference,
    pub digest: String,
    pub inputs: ResolvedBindings,
    pub jobs: Vec<PlannedJob>,
}

/// A job reduced to primitive steps
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub name: String,
    pub needs: Vec<String>,
    pub always: bool,
    pub timeout: Option<Duration>,
    pub steps: Vec<PlannedStep>,
    /// Secret values this job can see, masked in its output
    pub secrets: Vec<Secret>,
}

impl JobNode for PlannedJob {
    fn job_name(&self) -> &str {
        &self.name
    }

    fn job_needs(&self) -> &[String] {
        &self.needs
    }
}

/// A shell command with its final environment
#[derive(Debug, Clone)]
pub struct PlannedStep {
    /// Bundle steps are named `<uses step> / <inner step>`
    pub name: String,
    pub command: String,
    pub shell: String,
    pub env: BTreeMap<String, String>,
    pub secret_env: BTreeMap<String, Secret>,
}

#[derive(Debug, Clone, Default)]
struct EnvLayer {
    plain: BTreeMap<String, String>,
    secret: BTreeMap<String, Secret>,
}

impl EnvLayer {
    /// Overlay `env`, interpolated in `scope`
    fn overlay(
        &self,
        env: &BTreeMap<String, String>,
        location: &str,
        scope: Scope<'_>,
        masks: &mut Vec<Secret>,
    ) -> ReflowResult<Self> {
        let mut next = self.clone();
        for (key, raw) in env {
            let value = interpolate(raw, &format!("{} env {}", location, key), scope, true)?;
            if value.has_secrets() {
                for s in value.secrets {
                    if !masks.contains(&s) {
                        masks.push(s);
                    }
                }
                next.plain.remove(key);
                next.secret.insert(key.clone(), Secret::new(value.value));
            } else {
                next.secret.remove(key);
                next.plain.insert(key.clone(), value.value);
            }
        }
        Ok(next)
    }
}

/// Turns a resolved definition plus an invocation into an execution plan
pub struct Planner;

impl Planner {
    pub fn plan(resolved: &ResolvedDefinition, invocation: &Invocation) -> ReflowResult<ExecutionPlan> {
        let scope_name = format!("definition '{}'", resolved.reference);
        let inputs = Binder::bind(&scope_name, &resolved.inputs, &invocation.inputs)?;
        let secrets = Binder::bind_secrets(&scope_name, &resolved.secrets, &invocation.secrets)?;

        let scope = Scope {
            inputs: &inputs,
            secrets: Some(&secrets),
        };

        let mut jobs = Vec::with_capacity(resolved.jobs.len());
        for job in &resolved.jobs {
            let location = format!("job '{}'", job.name);
            let mut masks = Vec::new();

            let base = EnvLayer::default()
                .overlay(&resolved.env, &location, scope, &mut masks)?
                .overlay(&job.env, &location, scope, &mut masks)?;

            let mut steps = Vec::new();
            plan_steps(&job.steps, scope, &base, None, &location, &mut steps, &mut masks)?;

            jobs.push(PlannedJob {
                name: job.name.clone(),
                needs: job.needs.clone(),
                always: job.always,
                timeout: job.timeout_secs.map(Duration::from_secs),
                steps,
                secrets: masks,
            });
        }

        Ok(ExecutionPlan {
            reference: resolved.reference.clone(),
            digest: resolved.digest.clone(),
            inputs,
            jobs,
        })
    }
}

fn plan_steps(
    steps: &[ResolvedStep],
    scope: Scope<'_>,
    env: &EnvLayer,
    prefix: Option<&str>,
    location: &str,
    out: &mut Vec<PlannedStep>,
    masks: &mut Vec<Secret>,
) -> ReflowResult<()> {
    for step in steps {
        let name = match prefix {
            Some(p) => format!("{} / {}", p, step.name()),
            None => step.name().to_string(),
        };
        let step_location = format!("{} step '{}'", location, name);

        match step {
            ResolvedStep::Run(run) => {
                let command = interpolate(&run.command, &step_location, scope, false)?;
                let step_env = env.overlay(&run.env, &step_location, scope, masks)?;
                out.push(PlannedStep {
                    name,
                    command: command.value,
                    shell: run.shell.clone(),
                    env: step_env.plain,
                    secret_env: step_env.secret,
                });
            }
            ResolvedStep::Bundle(bundle) => {
                let mut with = BTreeMap::new();
                for (key, raw) in &bundle.with {
                    let value =
                        interpolate(raw, &format!("{} with {}", step_location, key), scope, false)?;
                    with.insert(key.clone(), value.value);
                }

                let bound = Binder::bind(
                    &format!("bundle '{}'", bundle.reference),
                    &bundle.inputs,
                    &with,
                )?;
                let inner_env = env.overlay(&bundle.env, &step_location, scope, masks)?;
                let inner_scope = Scope {
                    inputs: &bound,
                    secrets: None,
                };

                plan_steps(
                    &bundle.steps,
                    inner_scope,
                    &inner_env,
                    Some(&name),
                    &format!("bundle '{}'", bundle.reference),
                    out,
                    masks,
                )?;
            }
        }
    }

    Ok(())
}
