// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! reflow - Reusable Workflow Engine
//!
//! Publish, resolve and run versioned pipeline definitions.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reflow::cli::run::RunArgs;
use reflow::cli::{Cli, Commands, Context};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "reflow=info" } else { "reflow=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let ctx = Context::load(cli.store, cli.config.as_deref(), cli.verbose)?;

    // Dispatch to command handlers
    match cli.command {
        Commands::Publish { files } => reflow::cli::publish::run(files, ctx).await,
        Commands::Validate { file } => reflow::cli::validate::run(file, ctx).await,
        Commands::Resolve { reference, format } => {
            reflow::cli::resolve::run(reference, format, ctx).await
        }
        Commands::Graph { reference, format } => {
            reflow::cli::graph::run(reference, format, ctx).await
        }
        Commands::Versions { name } => reflow::cli::versions::run(name, ctx).await,
        Commands::Run {
            reference,
            inputs,
            secrets,
            max_parallel,
            halt_on_failure,
            dry_run,
            format,
        } => {
            let args = RunArgs {
                reference,
                inputs,
                secrets,
                max_parallel,
                halt_on_failure,
                dry_run,
                format,
            };
            reflow::cli::run::run(args, ctx).await
        }
    }
}
