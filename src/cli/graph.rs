// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Graph command - visualize a definition's jobs as a graph

use miette::Result;

use super::{Context, GraphFormat};
use crate::pipeline::{JobGraph, Reference};

/// Run the graph command
pub async fn run(reference: Reference, format: GraphFormat, ctx: Context) -> Result<()> {
    let resolver = ctx.resolver()?;
    let resolved = resolver.resolve(&reference).await?;

    // Build DAG
    let dag = JobGraph::build(&resolved.jobs)?;

    // Output in requested format
    let output = match format {
        GraphFormat::Text => dag.to_text(),
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output.trim_end());

    Ok(())
}
