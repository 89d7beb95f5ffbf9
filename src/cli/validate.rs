// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Validate command - check a document before publishing

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::Context;
use crate::errors::ReflowError;
use crate::pipeline::{Document, DocumentValidator, Step};
use crate::store::DefinitionStore;

/// Run the validate command
pub async fn run(path: PathBuf, ctx: Context) -> Result<()> {
    println!("{}", "Validating document...".bold());
    println!();

    // Load document
    let document = match Document::from_file(&path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("  {} Failed to parse {}", "✗".red(), path.display());
            eprintln!();
            return Err(e.into());
        }
    };

    println!(
        "  {} {} {} parsed",
        "✓".green(),
        document.kind(),
        document.reference().to_string().bold()
    );

    let validation = DocumentValidator::validate(&document);
    let missing = missing_bundles(&document, &ctx).await?;

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !missing.is_empty() {
        println!();
        println!("{}:", "Unpublished bundles".yellow().bold());
        for reference in &missing {
            println!("  {} {}", "⚠".yellow(), reference);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if ctx.verbose {
        if let Document::Definition(ref def) = document {
            println!();
            println!("{}:", "Definition summary".bold());
            println!("  Inputs: {}", def.inputs.len());
            println!("  Secrets: {}", def.secrets.len());
            println!("  Jobs: {}", def.jobs.len());
            for job in &def.jobs {
                let deps = if job.needs.is_empty() {
                    String::new()
                } else {
                    format!(" [needs: {}]", job.needs.join(", "))
                };
                println!("    - {} ({} steps){}", job.name, job.steps.len(), deps.dimmed());
            }
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Document validation failed"));
    }

    if validation.has_warnings() || !missing.is_empty() {
        println!("{}", "Document is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Document is valid!".green().bold());
    }

    Ok(())
}

/// `uses` references the store cannot serve yet
async fn missing_bundles(document: &Document, ctx: &Context) -> Result<Vec<String>> {
    let steps: Vec<&Step> = match document {
        Document::Definition(def) => def.jobs.iter().flat_map(|j| j.steps.iter()).collect(),
        Document::Bundle(bundle) => bundle.steps.iter().collect(),
    };

    let store = ctx.store()?;
    let mut missing = Vec::new();
    for uses in steps.iter().filter_map(|s| s.uses.as_deref()) {
        let Ok(reference) = uses.parse() else {
            // Already reported by the validator
            continue;
        };
        match store.fetch(&reference).await {
            Ok(_) => {}
            Err(ReflowError::NotFound { .. }) => {
                if !missing.iter().any(|m| m == uses) {
                    missing.push(uses.to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(missing)
}
