// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for reflow.

pub mod graph;
pub mod publish;
pub mod resolve;
pub mod run;
pub mod validate;
pub mod versions;

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::pipeline::Reference;
use crate::resolver::Resolver;
use crate::store::FilesystemStore;

/// Reusable workflow engine
///
/// Publish versioned pipeline definitions and bundles, then resolve and run them.
#[derive(Parser, Debug)]
#[clap(
    name = "reflow",
    version,
    about = "Reusable workflow engine: publish, resolve and run versioned pipelines",
    long_about = None,
    after_help = "Examples:\n\
        reflow publish bundle.yaml deploy.yaml   Publish documents to the store\n\
        reflow graph acme/deploy@v1              Show the job graph\n\
        reflow run acme/deploy@v1 -i env=prod    Run a definition\n\
        reflow versions acme/deploy              List published versions\n\n\
        See 'reflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Store directory (overrides the config file)
    #[clap(long, global = true, env = "REFLOW_STORE", value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Config file (defaults to ./.reflow.toml when present)
    #[clap(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish definitions and bundles to the store
    Publish {
        /// Document files
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Validate a definition or bundle file
    Validate {
        /// Document file to validate
        file: PathBuf,
    },

    /// Resolve a definition, inlining every bundle
    Resolve {
        /// Definition reference (owner/name@version)
        reference: Reference,

        /// Output format
        #[clap(short, long, default_value = "yaml")]
        format: DocumentFormat,
    },

    /// Show a definition's jobs as a graph
    Graph {
        /// Definition reference (owner/name@version)
        reference: Reference,

        /// Output format
        #[clap(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// List published versions
    Versions {
        /// Name to list (owner/name)
        name: String,
    },

    /// Run a definition
    Run {
        /// Definition reference (owner/name@version)
        reference: Reference,

        /// Input binding (repeatable)
        #[clap(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Secret read from the environment: NAME reads $NAME, NAME=VAR reads $VAR
        #[clap(short, long = "secret", value_name = "NAME[=VAR]")]
        secrets: Vec<String>,

        /// Maximum number of jobs running at once
        #[clap(long)]
        max_parallel: Option<usize>,

        /// Stop the run at the first failed job
        #[clap(long)]
        halt_on_failure: bool,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,

        /// Output format
        #[clap(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output format for resolved definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown document format: {}", s)),
        }
    }
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

/// Settings shared by every command
pub struct Context {
    pub config: EngineConfig,
    pub working_dir: PathBuf,
    pub store_path: PathBuf,
    pub verbose: bool,
}

impl Context {
    /// Load config and apply command-line overrides
    pub fn load(store: Option<PathBuf>, config: Option<&Path>, verbose: bool) -> Result<Self> {
        let working_dir = std::env::current_dir()
            .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
        let config = EngineConfig::discover(config, &working_dir)?;
        let store_path = store.unwrap_or_else(|| config.store_path());

        Ok(Self {
            config,
            working_dir,
            store_path,
            verbose,
        })
    }

    pub fn store(&self) -> Result<Arc<FilesystemStore>> {
        tracing::debug!("using store at {}", self.store_path.display());
        Ok(Arc::new(FilesystemStore::new(self.store_path.clone())?))
    }

    pub fn resolver(&self) -> Result<Resolver> {
        Ok(Resolver::with_options(
            self.store()?,
            self.config.resolver_options(),
        ))
    }
}
