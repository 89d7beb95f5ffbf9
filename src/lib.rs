// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! # reflow - Reusable Workflow Engine
//!
//! `reflow` publishes versioned pipeline definitions and reusable step
//! bundles, resolves references between them into a self-contained graph,
//! and runs the resulting jobs.
//!
//! ## Features
//!
//! - **Immutable versions** - a published `owner/name@version` never changes
//! - **Reusable bundles** - steps shared across definitions through `uses:`
//! - **Typed contracts** - inputs and secrets checked before anything runs
//! - **Parallel execution** - independent jobs run concurrently
//!
//! ## Quick Start
//!
//! ```bash
//! # Publish a bundle and a definition
//! reflow publish setup-node.yaml deploy.yaml
//!
//! # Inspect the job graph
//! reflow graph acme/deploy@v1
//!
//! # Run it
//! reflow run acme/deploy@v1 -i target=prod -s token=DEPLOY_TOKEN
//! ```

pub mod binding;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use errors::{ReflowError, ReflowResult};
pub use pipeline::{Definition, Document, Reference};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
