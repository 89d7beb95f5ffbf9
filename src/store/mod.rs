// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Definition store
//!
//! Holds published definitions and bundles by `(owner, name, version)`.
//! A version tag is a permanent pointer to one digest: re-publishing the
//! same content is a no-op, publishing different content under an existing
//! tag is rejected.

mod digest;
mod filesystem;
mod memory;

pub use digest::{document_digest, short};
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::errors::{ReflowError, ReflowResult};
use crate::pipeline::{Document, DocumentValidator, Reference};

/// A document together with its content digest
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document: Arc<Document>,
    pub digest: String,
}

impl StoredDocument {
    pub fn new(document: Document) -> ReflowResult<Self> {
        let digest = document_digest(&document)?;
        Ok(Self {
            document: Arc::new(document),
            digest,
        })
    }
}

/// Result of a publish action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The tag was new and now points at this digest
    Published { reference: Reference, digest: String },
    /// The tag already pointed at identical content
    Unchanged { reference: Reference, digest: String },
}

impl PublishOutcome {
    pub fn reference(&self) -> &Reference {
        match self {
            Self::Published { reference, .. } | Self::Unchanged { reference, .. } => reference,
        }
    }

    pub fn digest(&self) -> &str {
        match self {
            Self::Published { digest, .. } | Self::Unchanged { digest, .. } => digest,
        }
    }
}

/// Trait for store implementations
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetch a published document
    async fn fetch(&self, reference: &Reference) -> ReflowResult<StoredDocument>;

    /// Publish a document under the tag it declares
    async fn publish(&self, document: &Document) -> ReflowResult<PublishOutcome>;

    /// Published versions of `owner/name`, oldest first
    async fn versions(&self, owner: &str, name: &str) -> ReflowResult<Vec<String>>;
}

/// Validate a document and compute its digest ahead of publishing
pub(crate) fn prepare_publish(document: &Document) -> ReflowResult<StoredDocument> {
    let validation = DocumentValidator::validate(document);
    if let Some(first) = validation.errors.first() {
        return Err(ReflowError::InvalidDocument {
            name: document.reference().to_string(),
            reason: first.clone(),
            help: (validation.errors.len() > 1).then(|| {
                format!(
                    "{} more problem(s); run 'reflow validate' for the full list",
                    validation.errors.len() - 1
                )
            }),
        });
    }

    StoredDocument::new(document.clone())
}

/// Compare an incoming digest with the one already behind a tag
pub(crate) fn check_republish(
    reference: &Reference,
    existing: &str,
    incoming: &str,
) -> ReflowResult<PublishOutcome> {
    if existing == incoming {
        Ok(PublishOutcome::Unchanged {
            reference: reference.clone(),
            digest: incoming.to_string(),
        })
    } else {
        Err(ReflowError::VersionImmutability {
            reference: reference.to_string(),
            expected: short(existing).to_string(),
            actual: short(incoming).to_string(),
        })
    }
}

/// Orders `v1.10` after `v1.9`: numeric runs compare as numbers
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(v: &str) -> Vec<Result<u64, &str>> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .map(|p| p.parse::<u64>().map_err(|_| p))
            .collect()
    }

    let (pa, pb) = (parts(a), parts(b));
    for (x, y) in pa.iter().zip(pb.iter()) {
        let ord = match (x, y) {
            (Ok(x), Ok(y)) => x.cmp(y),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(x), Err(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    pa.len().cmp(&pb.len()).then_with(|| a.cmp(b))
}
