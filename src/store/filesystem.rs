// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Filesystem-based store
//!
//! Stores each tag as `<root>/<owner>/<name>/<version>.yaml`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{check_republish, compare_versions, prepare_publish, short, DefinitionStore, PublishOutcome, StoredDocument};
use crate::errors::{ReflowError, ReflowResult};
use crate::pipeline::{Document, Reference};

/// Filesystem-based store
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: PathBuf) -> ReflowResult<Self> {
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| ReflowError::FileWriteError {
                path: root.clone(),
                error: e.to_string(),
            })?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a tag
    pub fn document_path(&self, reference: &Reference) -> PathBuf {
        let mut path = self.root.join(&reference.owner);
        for segment in reference.name.split('/') {
            path.push(segment);
        }
        path.join(format!("{}.yaml", reference.version))
    }

    async fn read_stored(&self, path: &Path, reference: &Reference) -> ReflowResult<StoredDocument> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReflowError::NotFound {
                    reference: reference.to_string(),
                }
            } else {
                ReflowError::FileReadError {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                }
            }
        })?;

        let document = Document::from_yaml(&content)?;
        if document.reference() != *reference {
            return Err(ReflowError::InvalidDocument {
                name: reference.to_string(),
                reason: format!(
                    "file {} declares '{}'",
                    path.display(),
                    document.reference()
                ),
                help: None,
            });
        }

        StoredDocument::new(document)
    }
}

#[async_trait]
impl DefinitionStore for FilesystemStore {
    async fn fetch(&self, reference: &Reference) -> ReflowResult<StoredDocument> {
        let path = self.document_path(reference);
        self.read_stored(&path, reference).await
    }

    async fn publish(&self, document: &Document) -> ReflowResult<PublishOutcome> {
        let stored = prepare_publish(document)?;
        let reference = document.reference();
        let path = self.document_path(&reference);

        if path.exists() {
            let existing = self.read_stored(&path, &reference).await?;
            return check_republish(&reference, &existing.digest, &stored.digest);
        }

        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| ReflowError::FileWriteError {
                path: parent.clone(),
                error: e.to_string(),
            })?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let tmp = parent.join(format!(
            ".{}.yaml.{}-{}.tmp",
            reference.version,
            std::process::id(),
            nanos
        ));

        let yaml = document.to_yaml()?;
        tokio::fs::write(&tmp, yaml)
            .await
            .map_err(|e| ReflowError::FileWriteError {
                path: tmp.clone(),
                error: e.to_string(),
            })?;

        // hard_link never clobbers, so a concurrent publisher of the same tag
        // loses here and falls back to the digest comparison
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => {
                tracing::info!(reference = %reference, digest = %short(&stored.digest), "published");
                Ok(PublishOutcome::Published {
                    reference,
                    digest: stored.digest,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = self.read_stored(&path, &reference).await?;
                check_republish(&reference, &existing.digest, &stored.digest)
            }
            Err(e) => Err(ReflowError::FileWriteError {
                path,
                error: e.to_string(),
            }),
        }
    }

    async fn versions(&self, owner: &str, name: &str) -> ReflowResult<Vec<String>> {
        Reference::check_location(owner, name)?;
        let file = self.document_path(&Reference::new(owner, name, "_"));
        let dir = file.parent().unwrap_or(&self.root);
        let pattern = format!("{}/*.yaml", glob::Pattern::escape(&dir.to_string_lossy()));

        let mut versions: Vec<String> = glob::glob(&pattern)?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .filter(|v| !v.starts_with('.'))
            .collect();

        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CHECKOUT_V1: &str = r#"
kind: bundle
owner: acme
name: actions/checkout
version: v1
steps:
  - run: git fetch --depth 1
"#;

    #[tokio::test]
    async fn test_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        let doc = Document::from_yaml(CHECKOUT_V1).unwrap();
        let outcome = store.publish(&doc).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published { .. }));

        let reference: Reference = "acme/actions/checkout@v1".parse().unwrap();
        assert!(temp_dir
            .path()
            .join("acme/actions/checkout/v1.yaml")
            .is_file());

        let fetched = store.fetch(&reference).await.unwrap();
        assert_eq!(fetched.digest, outcome.digest());
        assert_eq!(*fetched.document, doc);
    }

    #[tokio::test]
    async fn test_republish_different_content_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        store
            .publish(&Document::from_yaml(CHECKOUT_V1).unwrap())
            .await
            .unwrap();

        let changed = CHECKOUT_V1.replace("--depth 1", "--depth 50");
        let result = store.publish(&Document::from_yaml(&changed).unwrap()).await;
        assert!(matches!(result, Err(ReflowError::VersionImmutability { .. })));

        let again = store
            .publish(&Document::from_yaml(CHECKOUT_V1).unwrap())
            .await
            .unwrap();
        assert!(matches!(again, PublishOutcome::Unchanged { .. }));
    }

    #[tokio::test]
    async fn test_versions_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        for version in ["v2", "v1", "v10"] {
            let yaml = CHECKOUT_V1.replace("version: v1", &format!("version: {version}"));
            store.publish(&Document::from_yaml(&yaml).unwrap()).await.unwrap();
        }

        assert_eq!(
            store.versions("acme", "actions/checkout").await.unwrap(),
            vec!["v1", "v2", "v10"]
        );
        assert!(store.versions("acme", "nothing").await.unwrap().is_empty());

        let missing = store.fetch(&"acme/actions/checkout@v3".parse().unwrap()).await;
        assert!(matches!(missing, Err(ReflowError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_versions_rejects_patterns_and_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().join("store")).unwrap();

        for name in ["a", "b"] {
            let yaml = CHECKOUT_V1.replace("actions/checkout", name);
            store.publish(&Document::from_yaml(&yaml).unwrap()).await.unwrap();
        }

        for (owner, name) in [("acme", "*"), ("acme", "[ab]"), ("acme", "../acme/a"), ("..", "store/acme/a")] {
            let result = store.versions(owner, name).await;
            assert!(
                matches!(result, Err(ReflowError::InvalidReference { .. })),
                "{owner}/{name} gave {result:?}"
            );
        }
        assert_eq!(store.versions("acme", "a").await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_versions_with_glob_characters_in_root() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().join("st[o]re")).unwrap();

        store
            .publish(&Document::from_yaml(CHECKOUT_V1).unwrap())
            .await
            .unwrap();
        assert_eq!(
            store.versions("acme", "actions/checkout").await.unwrap(),
            vec!["v1"]
        );
    }

    #[tokio::test]
    async fn test_fetch_rejects_misplaced_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        let path = temp_dir.path().join("acme/other/v1.yaml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, CHECKOUT_V1).unwrap();

        let result = store.fetch(&"acme/other@v1".parse().unwrap()).await;
        assert!(matches!(result, Err(ReflowError::InvalidDocument { .. })));
    }
}
