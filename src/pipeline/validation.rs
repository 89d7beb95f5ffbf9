// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Document validation
//!
//! Validates definitions and bundles before they are published.

use std::collections::HashSet;

use crate::errors::ReflowError;
use crate::pipeline::{Contract, Document, JobGraph, Reference, Step};

/// Document validator
pub struct DocumentValidator;

impl DocumentValidator {
    /// Validate a definition or bundle
    pub fn validate(document: &Document) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_contract("inputs", document.inputs(), &mut result);

        match document {
            Document::Definition(def) => {
                Self::validate_contract("secrets", &def.secrets, &mut result);
                for (name, spec) in &def.secrets {
                    if spec.default.is_some() {
                        result.add_error(&format!("Secret '{}' cannot have a default", name));
                    }
                }

                if def.jobs.is_empty() {
                    result.add_error("Definition has no jobs defined");
                }

                let mut seen_names = HashSet::new();
                for job in &def.jobs {
                    if !seen_names.insert(&job.name) {
                        result.add_error(&format!("Duplicate job name: '{}'", job.name));
                    }
                    if job.name.trim().is_empty() {
                        result.add_error("Job with an empty name");
                    }
                    if job.steps.is_empty() {
                        result.add_error(&format!("Job '{}' has no steps", job.name));
                    }
                    if job.timeout_secs == Some(0) {
                        result.add_error(&format!("Job '{}': timeout_secs must be positive", job.name));
                    }
                    if job.always && job.needs.is_empty() {
                        result.add_warning(&format!(
                            "Job '{}': 'always' has no effect without 'needs'",
                            job.name
                        ));
                    }

                    let scope = format!("Job '{}'", job.name);
                    for (i, step) in job.steps.iter().enumerate() {
                        Self::validate_step(&scope, i, step, &mut result);
                    }
                }

                // Duplicates were reported above
                if seen_names.len() == def.jobs.len() {
                    match JobGraph::build(&def.jobs) {
                        Ok(_) => {}
                        Err(ReflowError::Cycle { members }) => {
                            result.add_error(&format!(
                                "Circular 'needs' between jobs: {}",
                                members.join(", ")
                            ));
                        }
                        Err(ReflowError::UnknownDependency { job, dependency }) => {
                            result.add_error(&format!(
                                "Job '{}' needs unknown job '{}'",
                                job, dependency
                            ));
                        }
                        Err(e) => result.add_error(&format!("Job graph error: {}", e)),
                    }
                }
            }
            Document::Bundle(bundle) => {
                if bundle.steps.is_empty() {
                    result.add_error("Bundle has no steps");
                }

                let own = bundle.reference().location();
                let scope = format!("Bundle '{}'", own);
                for (i, step) in bundle.steps.iter().enumerate() {
                    Self::validate_step(&scope, i, step, &mut result);

                    if let Some(Ok(uses)) = step.uses.as_deref().map(str::parse::<Reference>) {
                        if uses.location() == own && uses.version == bundle.version {
                            result.add_error(&format!("{}: step uses the bundle itself", scope));
                        }
                    }
                }
            }
        }

        result
    }

    fn validate_step(scope: &str, index: usize, step: &Step, result: &mut ValidationResult) {
        let name = step.display_name(index);

        match (&step.run, &step.uses) {
            (Some(_), Some(_)) => {
                result.add_error(&format!("{} step '{}': has both 'run' and 'uses'", scope, name));
            }
            (None, None) => {
                result.add_error(&format!("{} step '{}': needs 'run' or 'uses'", scope, name));
            }
            (Some(run), None) => {
                if run.trim().is_empty() {
                    result.add_error(&format!("{} step '{}': command is empty", scope, name));
                }
                if !step.with.is_empty() {
                    result.add_error(&format!(
                        "{} step '{}': 'with' is only valid on 'uses' steps",
                        scope, name
                    ));
                }
            }
            (None, Some(uses)) => {
                if let Err(e) = uses.parse::<Reference>() {
                    result.add_error(&format!("{} step '{}': {}", scope, name, e));
                }
                if step.shell.is_some() {
                    result.add_warning(&format!(
                        "{} step '{}': 'shell' is ignored on 'uses' steps",
                        scope, name
                    ));
                }
            }
        }
    }

    fn validate_contract(kind: &str, contract: &Contract, result: &mut ValidationResult) {
        for (name, spec) in contract {
            if name.trim().is_empty() {
                result.add_error(&format!("Empty parameter name in {}", kind));
            }
            if let Some(ref default) = spec.default {
                if !spec.param_type.accepts(default) {
                    result.add_error(&format!(
                        "Default for {} '{}' is not a valid {}: '{}'",
                        kind, name, spec.param_type, default
                    ));
                }
                if spec.required {
                    result.add_warning(&format!(
                        "{} '{}' is required but also has a default; the default is never used",
                        kind, name
                    ));
                }
            }
        }
    }
}

/// Result of validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Errors (will prevent publishing)
    pub errors: Vec<String>,
    /// Warnings (informational)
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a new empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error
    pub fn add_error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    /// Add a warning
    pub fn add_warning(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    /// Check if validation passed (no errors)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check if there are warnings
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> ValidationResult {
        DocumentValidator::validate(&Document::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_valid_definition() {
        let result = validate(
            r#"
kind: definition
owner: acme
name: ci
version: v1
jobs:
  - name: build
    steps:
      - run: make
  - name: test
    needs: [build]
    steps:
      - uses: acme/test-runner@v1
        with:
          suite: unit
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_duplicate_jobs_and_empty_steps() {
        let result = validate(
            r#"
kind: definition
owner: acme
name: ci
version: v1
jobs:
  - name: build
    steps: []
  - name: build
    steps:
      - run: make
"#,
        );
        assert!(result.errors.iter().any(|e| e.contains("Duplicate job name")));
        assert!(result.errors.iter().any(|e| e.contains("has no steps")));
    }

    #[test]
    fn test_cycle_is_reported() {
        let result = validate(
            r#"
kind: definition
owner: acme
name: ci
version: v1
jobs:
  - name: a
    needs: [b]
    steps: [{run: "true"}]
  - name: b
    needs: [a]
    steps: [{run: "true"}]
"#,
        );
        assert!(result.errors.iter().any(|e| e.contains("Circular") && e.contains("a, b")));
    }

    #[test]
    fn test_step_shape_errors() {
        let result = validate(
            r#"
kind: bundle
owner: acme
name: tools
version: v1
steps:
  - run: make
    uses: acme/x@v1
  - name: nothing
  - run: make
    with:
      a: b
  - uses: not-a-reference
  - uses: acme/tools@v1
"#,
        );
        assert!(result.errors.iter().any(|e| e.contains("both 'run' and 'uses'")));
        assert!(result.errors.iter().any(|e| e.contains("needs 'run' or 'uses'")));
        assert!(result.errors.iter().any(|e| e.contains("'with' is only valid")));
        assert!(result.errors.iter().any(|e| e.contains("Invalid reference")));
        assert!(result.errors.iter().any(|e| e.contains("uses the bundle itself")));
    }

    #[test]
    fn test_contract_defaults_are_type_checked() {
        let result = validate(
            r#"
kind: bundle
owner: acme
name: tools
version: v1
inputs:
  retries:
    type: number
    default: many
  verbose:
    type: boolean
    required: true
    default: false
steps:
  - run: make
"#,
        );
        assert!(result.errors.iter().any(|e| e.contains("retries")));
        assert!(result.warnings.iter().any(|w| w.contains("verbose")));
    }

    #[test]
    fn test_secret_defaults_rejected() {
        let result = validate(
            r#"
kind: definition
owner: acme
name: deploy
version: v1
secrets:
  token:
    default: hunter2
jobs:
  - name: ship
    steps: [{run: ./ship.sh}]
"#,
        );
        assert!(result.errors.iter().any(|e| e.contains("Secret 'token'")));
    }
}
