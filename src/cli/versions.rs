// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Versions command - list published tags of a name

use colored::Colorize;
use miette::Result;

use super::Context;
use crate::store::DefinitionStore;

/// Run the versions command
pub async fn run(name: String, ctx: Context) -> Result<()> {
    let (owner, rest) = name
        .split_once('/')
        .filter(|(o, n)| !o.is_empty() && !n.is_empty())
        .ok_or_else(|| miette::miette!("Expected 'owner/name', got '{}'", name))?;

    let store = ctx.store()?;
    let versions = store.versions(owner, rest).await?;

    if versions.is_empty() {
        println!("{}", format!("No versions of '{}' are published.", name).dimmed());
        return Ok(());
    }

    for version in &versions {
        println!("{}@{}", name, version);
    }

    Ok(())
}
