// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Engine configuration
//!
//! Read from `.reflow.toml` in the working directory (or an explicit path).
//! Every section and key is optional:
//!
//! ```toml
//! [store]
//! path = "/var/lib/reflow/store"
//!
//! [resolver]
//! max_depth = 32
//!
//! [scheduler]
//! max_parallel = 4
//! halt_on_failure = false
//! default_timeout_secs = 3600
//! isolate_workspaces = false
//! workspace = ".reflow/work"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ReflowError, ReflowResult};
use crate::resolver::{ResolverOptions, DEFAULT_MAX_DEPTH};
use crate::scheduler::{default_parallelism, SchedulerOptions};

/// File looked up in the working directory when no path is given
pub const CONFIG_FILE: &str = ".reflow.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Root of the filesystem store
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_parallelism")]
    pub max_parallel: usize,

    #[serde(default)]
    pub halt_on_failure: bool,

    pub default_timeout_secs: Option<u64>,

    #[serde(default)]
    pub isolate_workspaces: bool,

    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_parallelism(),
            halt_on_failure: false,
            default_timeout_secs: None,
            isolate_workspaces: false,
            workspace: default_workspace(),
        }
    }
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".reflow/work")
}

impl EngineConfig {
    /// Load from an explicit file
    pub fn load_from_file(path: &Path) -> ReflowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ReflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| ReflowError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Load `explicit` if given, else `.reflow.toml` under `dir` if present,
    /// else defaults
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> ReflowResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            tracing::debug!("loading config from {}", candidate.display());
            Self::load_from_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> ReflowResult<Self> {
        let config: Self = toml::from_str(content)?;
        if config.scheduler.max_parallel == 0 {
            return Err(ReflowError::Config {
                message: "scheduler.max_parallel must be at least 1".into(),
            });
        }
        Ok(config)
    }

    /// Store root, falling back to the platform data directory
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_store_path)
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            max_depth: self.resolver.max_depth,
            ..ResolverOptions::default()
        }
    }

    pub fn scheduler_options(&self, working_dir: &Path) -> SchedulerOptions {
        let workspace = if self.scheduler.workspace.is_absolute() {
            self.scheduler.workspace.clone()
        } else {
            working_dir.join(&self.scheduler.workspace)
        };

        SchedulerOptions {
            max_parallel: self.scheduler.max_parallel,
            halt_on_failure: self.scheduler.halt_on_failure,
            default_timeout: self.scheduler.default_timeout_secs.map(Duration::from_secs),
            isolate_workspaces: self.scheduler.isolate_workspaces,
            workspace,
            working_dir: working_dir.to_path_buf(),
        }
    }
}

/// `<data dir>/reflow/store`, or `.reflow/store` when there is no home
pub fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "reflow")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".reflow/store"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::discover(None, dir.path()).unwrap();
        assert_eq!(config.resolver.max_depth, DEFAULT_MAX_DEPTH);
        assert!(!config.scheduler.halt_on_failure);
        assert!(config.scheduler.max_parallel >= 1);
        assert!(config.store.path.is_none());
    }

    #[test]
    fn test_discovers_file_in_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[store]
path = "/srv/reflow"

[scheduler]
max_parallel = 3
default_timeout_secs = 60
isolate_workspaces = true
"#,
        )
        .unwrap();

        let config = EngineConfig::discover(None, dir.path()).unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/srv/reflow"));

        let options = config.scheduler_options(dir.path());
        assert_eq!(options.max_parallel, 3);
        assert_eq!(options.default_timeout, Some(Duration::from_secs(60)));
        assert!(options.isolate_workspaces);
        assert_eq!(options.workspace, dir.path().join(".reflow/work"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_toml("[scheduler]\nmax_parallel = 0\n"),
            Err(ReflowError::Config { .. })
        ));
        assert!(matches!(
            EngineConfig::from_toml("[store]\nroot = \"x\"\n"),
            Err(ReflowError::Toml { .. })
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = EngineConfig::discover(Some(Path::new("/nonexistent/reflow.toml")), Path::new("."));
        assert!(matches!(result, Err(ReflowError::FileReadError { .. })));
    }
}
