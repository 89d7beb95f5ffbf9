// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! In-memory store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{check_republish, compare_versions, prepare_publish, DefinitionStore, PublishOutcome, StoredDocument};
use crate::errors::{ReflowError, ReflowResult};
use crate::pipeline::{Document, Reference};

/// Store backed by a map, for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Reference, StoredDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from documents, publishing each in order
    pub async fn with_documents(documents: Vec<Document>) -> ReflowResult<Self> {
        let store = Self::new();
        for document in &documents {
            store.publish(document).await?;
        }
        Ok(store)
    }

    /// Number of published tags
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn fetch(&self, reference: &Reference) -> ReflowResult<StoredDocument> {
        self.documents
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| ReflowError::NotFound {
                reference: reference.to_string(),
            })
    }

    async fn publish(&self, document: &Document) -> ReflowResult<PublishOutcome> {
        let stored = prepare_publish(document)?;
        let reference = document.reference();

        let mut documents = self.documents.write().await;
        if let Some(existing) = documents.get(&reference) {
            return check_republish(&reference, &existing.digest, &stored.digest);
        }

        tracing::info!(reference = %reference, digest = %super::short(&stored.digest), "published");
        let digest = stored.digest.clone();
        documents.insert(reference.clone(), stored);

        Ok(PublishOutcome::Published { reference, digest })
    }

    async fn versions(&self, owner: &str, name: &str) -> ReflowResult<Vec<String>> {
        Reference::check_location(owner, name)?;
        let mut versions: Vec<String> = self
            .documents
            .read()
            .await
            .keys()
            .filter(|r| r.owner == owner && r.name == name)
            .map(|r| r.version.clone())
            .collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }
}
