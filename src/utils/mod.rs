// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Utility modules
//!
//! Common utilities for the reflow CLI.

pub mod spinner;

pub use spinner::*;
