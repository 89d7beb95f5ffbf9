// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! `${{ inputs.NAME }}` / `${{ secrets.NAME }}` substitution

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::{ResolvedBindings, Secret, SecretBindings};
use crate::errors::{ReflowError, ReflowResult};

fn expression_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([^}]*?)\s*\}\}").expect("expression pattern is valid")
    })
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(inputs|secrets)\.([A-Za-z_][A-Za-z0-9_-]*)$").expect("name pattern is valid")
    })
}

/// Values visible to expressions at one nesting level
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub inputs: &'a ResolvedBindings,
    /// Only the definition level has secrets
    pub secrets: Option<&'a SecretBindings>,
}

/// Interpolated text and the secrets that went into it
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub value: String,
    pub secrets: Vec<Secret>,
}

impl Interpolated {
    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }
}

/// Substitute expressions in `text`
///
/// Declared but unbound inputs become the empty string. Secrets are only
/// accepted where `allow_secrets` is set (environment values).
pub fn interpolate(
    text: &str,
    location: &str,
    scope: Scope<'_>,
    allow_secrets: bool,
) -> ReflowResult<Interpolated> {
    let mut secrets = Vec::new();
    let mut failure = None;

    let value = expression_pattern().replace_all(text, |caps: &Captures<'_>| {
        if failure.is_some() {
            return String::new();
        }
        match evaluate(&caps[0], &caps[1], location, scope, allow_secrets) {
            Ok(Value::Plain(v)) => v,
            Ok(Value::Secret(s)) => {
                let exposed = s.expose().to_string();
                secrets.push(s);
                exposed
            }
            Err(e) => {
                failure = Some(e);
                String::new()
            }
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }

    Ok(Interpolated {
        value: value.into_owned(),
        secrets,
    })
}

enum Value {
    Plain(String),
    Secret(Secret),
}

fn evaluate(
    raw: &str,
    expression: &str,
    location: &str,
    scope: Scope<'_>,
    allow_secrets: bool,
) -> ReflowResult<Value> {
    let invalid = |reason: &str| ReflowError::InvalidExpression {
        expression: raw.to_string(),
        location: location.to_string(),
        reason: reason.to_string(),
    };

    let caps = name_pattern()
        .captures(expression)
        .ok_or_else(|| invalid("expected 'inputs.NAME' or 'secrets.NAME'"))?;
    let name = &caps[2];

    match &caps[1] {
        "inputs" => {
            if !scope.inputs.declares(name) {
                return Err(invalid(&format!("no input named '{}' is declared", name)));
            }
            Ok(Value::Plain(scope.inputs.get(name).unwrap_or_default().to_string()))
        }
        _ => {
            if !allow_secrets {
                return Err(invalid("secrets may only be referenced from 'env' values"));
            }
            let secrets = scope
                .secrets
                .ok_or_else(|| invalid("secrets are not available inside bundles"))?;
            if !secrets.declares(name) {
                return Err(invalid(&format!("no secret named '{}' is declared", name)));
            }
            Ok(secrets
                .get(name)
                .map(|s| Value::Secret(s.clone()))
                .unwrap_or_else(|| Value::Plain(String::new())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binder;
    use crate::pipeline::{Contract, ParamSpec, ParamType};
    use std::collections::BTreeMap;

    fn fixtures() -> (ResolvedBindings, SecretBindings) {
        let mut inputs = Contract::new();
        inputs.insert("env".into(), ParamSpec::optional(ParamType::String, Some("staging")));
        inputs.insert("tag".into(), ParamSpec::optional(ParamType::String, None));

        let mut secret_contract = Contract::new();
        secret_contract.insert("token".into(), ParamSpec::required(ParamType::String));

        let mut supplied = BTreeMap::new();
        supplied.insert("token".to_string(), Secret::new("abc123"));

        (
            Binder::bind("test", &inputs, &BTreeMap::new()).unwrap(),
            Binder::bind_secrets("test", &secret_contract, &supplied).unwrap(),
        )
    }

    #[test]
    fn test_inputs_substituted() {
        let (inputs, secrets) = fixtures();
        let scope = Scope {
            inputs: &inputs,
            secrets: Some(&secrets),
        };

        let out = interpolate("deploy --to ${{inputs.env}} --tag '${{ inputs.tag }}'", "run", scope, false)
            .unwrap();
        assert_eq!(out.value, "deploy --to staging --tag ''");
        assert!(!out.has_secrets());
    }

    #[test]
    fn test_secrets_only_where_allowed() {
        let (inputs, secrets) = fixtures();
        let scope = Scope {
            inputs: &inputs,
            secrets: Some(&secrets),
        };

        let env = interpolate("Bearer ${{ secrets.token }}", "env TOKEN", scope, true).unwrap();
        assert_eq!(env.value, "Bearer abc123");
        assert_eq!(env.secrets, vec![Secret::new("abc123")]);

        let run = interpolate("echo ${{ secrets.token }}", "run", scope, false);
        assert!(matches!(run, Err(ReflowError::InvalidExpression { .. })));
    }

    #[test]
    fn test_bundle_scope_has_no_secrets() {
        let (inputs, _) = fixtures();
        let scope = Scope {
            inputs: &inputs,
            secrets: None,
        };
        let result = interpolate("${{ secrets.token }}", "env", scope, true);
        assert!(matches!(result, Err(ReflowError::InvalidExpression { ref reason, .. }) if reason.contains("bundles")));
    }

    #[test]
    fn test_undeclared_and_malformed() {
        let (inputs, secrets) = fixtures();
        let scope = Scope {
            inputs: &inputs,
            secrets: Some(&secrets),
        };
        assert!(interpolate("${{ inputs.missing }}", "run", scope, false).is_err());
        assert!(interpolate("${{ github.sha }}", "run", scope, false).is_err());
        assert_eq!(
            interpolate("no expressions here", "run", scope, false).unwrap().value,
            "no expressions here"
        );
    }
}
