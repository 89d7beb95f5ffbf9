// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Error types
//!
//! Every failure carries the reference, job, step or key it concerns so the
//! caller can tell exactly which part of an invocation was rejected.

use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for reflow operations
pub type ReflowResult<T> = Result<T, ReflowError>;

/// Main error type for reflow
#[derive(Error, Debug, Diagnostic)]
pub enum ReflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Resolution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("'{reference}' not found")]
    #[diagnostic(
        code(reflow::not_found),
        help("Publish it first with 'reflow publish', or check the owner, name and version")
    )]
    NotFound { reference: String },

    #[error("Invalid reference '{reference}': {reason}")]
    #[diagnostic(
        code(reflow::invalid_reference),
        help("References look like 'owner/name@version', e.g. 'acme/ci/rust@v1'")
    )]
    InvalidReference { reference: String, reason: String },

    #[error("'{reference}' is a {actual}, expected a {expected}")]
    #[diagnostic(code(reflow::unexpected_kind))]
    UnexpectedKind {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("Version '{reference}' is immutable: content changed from {expected} to {actual}")]
    #[diagnostic(
        code(reflow::version_immutability),
        help("Published tags never change. Publish the new content under a new version.")
    )]
    VersionImmutability {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("Bundle nesting under '{reference}' exceeds the maximum depth of {max_depth}")]
    #[diagnostic(code(reflow::resolution_depth_exceeded))]
    ResolutionDepthExceeded { reference: String, max_depth: usize },

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cycle detected: {}", .members.join(" -> "))]
    #[diagnostic(
        code(reflow::cycle),
        help("Remove one of the 'needs' or 'uses' edges between the listed items")
    )]
    Cycle { members: Vec<String> },

    #[error("Job '{job}' needs unknown job '{dependency}'")]
    #[diagnostic(
        code(reflow::unknown_dependency),
        help("Check that '{dependency}' is defined in the same definition")
    )]
    UnknownDependency { job: String, dependency: String },

    #[error("Job '{job}' is defined more than once")]
    #[diagnostic(code(reflow::duplicate_job))]
    DuplicateJob { job: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Binding Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Missing required input '{key}' for {scope}")]
    #[diagnostic(code(reflow::missing_required_input))]
    MissingRequiredInput { scope: String, key: String },

    #[error("Unknown input '{key}' for {scope}")]
    #[diagnostic(
        code(reflow::unknown_input),
        help("Only parameters declared in the contract may be bound")
    )]
    UnknownInput { scope: String, key: String },

    #[error("Input '{key}' for {scope} expects a {expected}, got a {actual}")]
    #[diagnostic(code(reflow::type_mismatch))]
    TypeMismatch {
        scope: String,
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid expression '{expression}' in {location}: {reason}")]
    #[diagnostic(code(reflow::invalid_expression))]
    InvalidExpression {
        expression: String,
        location: String,
        reason: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Job '{job}' timed out after {}s", .limit.as_secs_f64())]
    #[diagnostic(code(reflow::timeout))]
    Timeout { job: String, limit: Duration },

    #[error("Step '{step}' of job '{job}' failed: {message}")]
    #[diagnostic(code(reflow::step_execution))]
    StepExecution {
        job: String,
        step: String,
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Job '{job}' was cancelled")]
    #[diagnostic(code(reflow::cancelled))]
    Cancelled { job: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Document / Config Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid document '{name}': {reason}")]
    #[diagnostic(code(reflow::invalid_document))]
    InvalidDocument {
        name: String,
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(reflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(reflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(reflow::config_error))]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(reflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(reflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(reflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(reflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(reflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for ReflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ReflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ReflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for ReflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for ReflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl ReflowError {
    /// Whether this error belongs to the resolution or binding stage.
    ///
    /// These abort an invocation before any job runs.
    pub fn is_pre_execution(&self) -> bool {
        !matches!(
            self,
            Self::Timeout { .. } | Self::StepExecution { .. } | Self::Cancelled { .. }
        )
    }

    /// Create a step failure from a non-zero exit status
    pub fn step_exit(job: &str, step: &str, exit_code: i32, stderr: &str) -> Self {
        let tail = stderr.lines().rev().find(|l| !l.trim().is_empty());
        let message = match tail {
            Some(line) => format!("exit code {}: {}", exit_code, line.trim()),
            None => format!("exit code {}", exit_code),
        };

        Self::StepExecution {
            job: job.to_string(),
            step: step.to_string(),
            message,
            exit_code: Some(exit_code),
        }
    }
}
