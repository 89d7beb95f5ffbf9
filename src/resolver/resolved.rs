// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Fully materialized definitions
//!
//! After resolution every `uses` step has been replaced by the bundle it
//! points at, with the bundle's contract kept alongside its `with` map so the
//! binder can check it later.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::pipeline::{Contract, JobNode, Reference};

/// A definition with all bundle references inlined
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDefinition {
    pub reference: Reference,
    pub digest: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub inputs: Contract,
    pub secrets: Contract,
    pub env: BTreeMap<String, String>,
    pub jobs: Vec<ResolvedJob>,

    /// Every bundle tag pulled in, with the digest it resolved to
    pub bundles: BTreeMap<String, String>,
}

impl ResolvedDefinition {
    /// Canonical JSON, identical for identical content
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn get_job(&self, name: &str) -> Option<&ResolvedJob> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// A job whose steps are fully expanded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedJob {
    pub name: String,
    pub needs: Vec<String>,
    pub always: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    pub env: BTreeMap<String, String>,
    pub steps: Vec<ResolvedStep>,
}

impl JobNode for ResolvedJob {
    fn job_name(&self) -> &str {
        &self.name
    }

    fn job_needs(&self) -> &[String] {
        &self.needs
    }
}

/// A primitive step or an inlined bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolvedStep {
    Run(RunStep),
    Bundle(InlinedBundle),
}

impl ResolvedStep {
    pub fn name(&self) -> &str {
        match self {
            Self::Run(run) => &run.name,
            Self::Bundle(bundle) => &bundle.name,
        }
    }

    /// Number of primitive steps this expands to
    pub fn primitive_count(&self) -> usize {
        match self {
            Self::Run(_) => 1,
            Self::Bundle(bundle) => bundle.steps.iter().map(Self::primitive_count).sum(),
        }
    }
}

/// Shell command step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStep {
    pub name: String,
    pub command: String,
    pub shell: String,
    pub env: BTreeMap<String, String>,
}

/// A bundle expanded in place
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlinedBundle {
    /// Name of the `uses` step
    pub name: String,
    pub reference: Reference,
    pub digest: String,

    /// The bundle's own input contract
    pub inputs: Contract,

    /// Caller-side bindings, still unevaluated
    pub with: BTreeMap<String, String>,

    /// Caller-side environment applied to every inner step
    pub env: BTreeMap<String, String>,

    pub steps: Vec<ResolvedStep>,
}
