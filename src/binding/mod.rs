// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Input and secret binding
//!
//! Checks caller-supplied values against a declared contract and fills
//! defaults. Binding has no side effects beyond the returned map.

mod expr;
mod plan;

pub use expr::{interpolate, Interpolated, Scope};
pub use plan::{ExecutionPlan, Invocation, PlannedJob, PlannedStep, Planner};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{ReflowError, ReflowResult};
use crate::pipeline::Contract;

/// An opaque secret value
///
/// Never printed, logged or serialized; only [`Secret::expose`] yields the
/// value, for handing to a step's environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Input values after contract checking and defaulting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedBindings {
    values: BTreeMap<String, String>,
    #[serde(skip)]
    declared: Vec<String>,
}

impl ResolvedBindings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether the contract declares `key`, bound or not
    pub fn declares(&self, key: &str) -> bool {
        self.declared.iter().any(|k| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Secret values after contract checking
#[derive(Debug, Clone, Default)]
pub struct SecretBindings {
    values: BTreeMap<String, Secret>,
    declared: Vec<String>,
}

impl SecretBindings {
    pub fn get(&self, key: &str) -> Option<&Secret> {
        self.values.get(key)
    }

    pub fn declares(&self, key: &str) -> bool {
        self.declared.iter().any(|k| k == key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Contract binder
pub struct Binder;

impl Binder {
    /// Bind input values against a contract
    ///
    /// `scope` names the definition or bundle in error messages.
    pub fn bind(
        scope: &str,
        contract: &Contract,
        bindings: &BTreeMap<String, String>,
    ) -> ReflowResult<ResolvedBindings> {
        check_keys(scope, contract, bindings.keys())?;

        let mut values = BTreeMap::new();
        for (key, spec) in contract {
            let value = match bindings.get(key) {
                Some(v) => v.clone(),
                None => match spec.default {
                    Some(ref d) if !spec.required => d.clone(),
                    _ => continue,
                },
            };

            if !spec.param_type.accepts(&value) {
                return Err(ReflowError::TypeMismatch {
                    scope: scope.to_string(),
                    key: key.clone(),
                    expected: spec.param_type.to_string(),
                    actual: crate::pipeline::ParamType::infer(&value).to_string(),
                });
            }

            values.insert(key.clone(), value);
        }

        Ok(ResolvedBindings {
            values,
            declared: contract.keys().cloned().collect(),
        })
    }

    /// Bind secrets against a secret contract
    pub fn bind_secrets(
        scope: &str,
        contract: &Contract,
        secrets: &BTreeMap<String, Secret>,
    ) -> ReflowResult<SecretBindings> {
        check_keys(scope, contract, secrets.keys())?;

        let values = secrets
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(SecretBindings {
            values,
            declared: contract.keys().cloned().collect(),
        })
    }
}

/// Missing required keys first, then unknown keys
fn check_keys<'a>(
    scope: &str,
    contract: &Contract,
    supplied: impl Iterator<Item = &'a String> + Clone,
) -> ReflowResult<()> {
    for (key, spec) in contract {
        if spec.required && !supplied.clone().any(|k| k == key) {
            return Err(ReflowError::MissingRequiredInput {
                scope: scope.to_string(),
                key: key.clone(),
            });
        }
    }

    if let Some(unknown) = supplied.into_iter().find(|k| !contract.contains_key(*k)) {
        return Err(ReflowError::UnknownInput {
            scope: scope.to_string(),
            key: unknown.clone(),
        });
    }

    Ok(())
}
