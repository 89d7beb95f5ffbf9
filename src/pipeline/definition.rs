// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Definition and bundle documents
//!
//! Defines the YAML schema for published pipeline definitions and step
//! bundles.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::Reference;
use crate::errors::{ReflowError, ReflowResult};

/// Declared parameters of a definition or bundle, keyed by name
pub type Contract = BTreeMap<String, ParamSpec>;

/// A published document, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Document {
    Definition(Definition),
    Bundle(Bundle),
}

impl Document {
    /// Load a document from a YAML file
    pub fn from_file(path: &Path) -> ReflowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ReflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse a document from a YAML string
    pub fn from_yaml(yaml: &str) -> ReflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> ReflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// The tag this document is published under
    pub fn reference(&self) -> Reference {
        match self {
            Self::Definition(d) => d.reference(),
            Self::Bundle(b) => b.reference(),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::Definition(_) => DocumentKind::Definition,
            Self::Bundle(_) => DocumentKind::Bundle,
        }
    }

    pub fn inputs(&self) -> &Contract {
        match self {
            Self::Definition(d) => &d.inputs,
            Self::Bundle(b) => &b.inputs,
        }
    }
}

/// Document kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Definition,
    Bundle,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Definition => write!(f, "definition"),
            Self::Bundle => write!(f, "bundle"),
        }
    }
}

/// Top-level pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub owner: String,
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input contract
    #[serde(default)]
    pub inputs: Contract,

    /// Secret contract (only `required` and `description` are meaningful)
    #[serde(default)]
    pub secrets: Contract,

    /// Environment shared by every job
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Jobs in declaration order
    pub jobs: Vec<Job>,
}

impl Definition {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.owner, &self.name, &self.version)
    }

    /// Get a job by name
    pub fn get_job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Get all job names
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }
}

/// Reusable, versioned sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub owner: String,
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub inputs: Contract,

    pub steps: Vec<Step>,
}

impl Bundle {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.owner, &self.name, &self.version)
    }
}

/// A unit of work within a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job name (unique within the definition)
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Jobs that must succeed before this one starts
    #[serde(default)]
    pub needs: Vec<String>,

    /// Run even if a needed job failed or was skipped
    #[serde(default)]
    pub always: bool,

    /// Maximum wall-clock duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    pub steps: Vec<Step>,
}

/// A single action invocation: either `run` or `uses`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Shell command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Shell used for `run` (defaults to bash)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Bundle reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,

    /// Bindings for the bundle's input contract
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "scalar_map"
    )]
    pub with: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// What a step does, once checked
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction<'a> {
    Run { command: &'a str, shell: &'a str },
    Uses(Reference),
}

impl Step {
    /// Classify the step, rejecting steps with both or neither of `run`/`uses`
    pub fn action(&self) -> ReflowResult<StepAction<'_>> {
        match (&self.run, &self.uses) {
            (Some(command), None) => Ok(StepAction::Run {
                command,
                shell: self.shell.as_deref().unwrap_or(DEFAULT_SHELL),
            }),
            (None, Some(uses)) => Ok(StepAction::Uses(uses.parse()?)),
            (Some(_), Some(_)) => Err(ReflowError::InvalidDocument {
                name: self.display_name(0),
                reason: "step has both 'run' and 'uses'".into(),
                help: None,
            }),
            (None, None) => Err(ReflowError::InvalidDocument {
                name: self.display_name(0),
                reason: "step has neither 'run' nor 'uses'".into(),
                help: Some("Every step needs a shell command or a bundle reference".into()),
            }),
        }
    }

    /// Name used in reports: the explicit name, else derived from the action
    pub fn display_name(&self, index: usize) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        if let Some(ref uses) = self.uses {
            return uses.clone();
        }
        match self.run.as_deref().and_then(|r| r.lines().next()) {
            Some(first) if !first.trim().is_empty() => first.trim().to_string(),
            _ => format!("step-{}", index + 1),
        }
    }
}

/// Shell used by `run` steps without an explicit `shell`
pub const DEFAULT_SHELL: &str = "bash";

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,

    #[serde(default)]
    pub required: bool,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_scalar"
    )]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(param_type: ParamType, default: Option<&str>) -> Self {
        Self {
            param_type,
            required: false,
            default: default.map(String::from),
            description: None,
        }
    }
}

/// Parameter types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Number,
    Boolean,
}

impl ParamType {
    /// The narrowest type a raw value parses as
    pub fn infer(value: &str) -> Self {
        if value == "true" || value == "false" {
            Self::Boolean
        } else if value.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false) {
            Self::Number
        } else {
            Self::String
        }
    }

    /// Whether a raw value is acceptable for this type
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::String => true,
            other => Self::infer(value) == *other,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// YAML scalars written unquoted (`20`, `true`) are kept as their text
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<RawScalar> for String {
    fn from(raw: RawScalar) -> Self {
        match raw {
            RawScalar::Bool(b) => b.to_string(),
            RawScalar::Int(i) => i.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Str(s) => s,
        }
    }
}

fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, RawScalar>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}

fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawScalar>::deserialize(deserializer)?.map(Into::into))
}
