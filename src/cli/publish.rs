// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Publish command - add documents to the store

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::Context;
use crate::pipeline::Document;
use crate::store::{short, DefinitionStore, PublishOutcome};

/// Run the publish command
///
/// Every file is attempted; the command fails if any of them was rejected.
pub async fn run(files: Vec<PathBuf>, ctx: Context) -> Result<()> {
    let store = ctx.store()?;
    let mut failures = 0;

    for path in &files {
        let result = match Document::from_file(path) {
            Ok(document) => store.publish(&document).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(PublishOutcome::Published { reference, digest }) => {
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    reference.to_string().bold(),
                    short(&digest).dimmed()
                );
            }
            Ok(PublishOutcome::Unchanged { reference, .. }) => {
                println!(
                    "  {} {} {}",
                    "○".dimmed(),
                    reference.to_string().bold(),
                    "(unchanged)".dimmed()
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {} {}: {}", "✗".red(), path.display(), e);
            }
        }
    }

    if ctx.verbose {
        println!();
        println!("Store: {}", store.root().display());
    }

    if failures > 0 {
        return Err(miette::miette!(
            "{} of {} document(s) could not be published",
            failures,
            files.len()
        ));
    }

    Ok(())
}
