// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Definitions, bundles and the job graph
//!
//! The document model as published to a store, the `owner/name@version`
//! reference format, static validation, and the dependency graph between
//! jobs.

mod dag;
mod definition;
mod reference;
mod validation;

pub use dag::{JobGraph, JobNode};
pub use definition::*;
pub use reference::Reference;
pub use validation::{DocumentValidator, ValidationResult};
