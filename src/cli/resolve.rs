// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Resolve command - print a definition with every bundle inlined

use miette::Result;

use super::{Context, DocumentFormat};
use crate::errors::ReflowError;
use crate::pipeline::Reference;

/// Run the resolve command
pub async fn run(reference: Reference, format: DocumentFormat, ctx: Context) -> Result<()> {
    let resolver = ctx.resolver()?;
    let resolved = resolver.resolve(&reference).await?;

    let output = match format {
        DocumentFormat::Yaml => serde_yaml::to_string(&resolved).map_err(ReflowError::from)?,
        DocumentFormat::Json => serde_json::to_string_pretty(&resolved).map_err(ReflowError::from)?,
    };

    println!("{}", output.trim_end());

    Ok(())
}
