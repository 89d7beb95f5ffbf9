// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Content digests for published documents
//!
//! Uses BLAKE3 over the canonical JSON form of a document, so formatting and
//! key order in the source YAML never change the digest.

use blake3::Hasher;
use serde::Serialize;

use crate::errors::ReflowError;
use crate::pipeline::Document;

/// Incremental hasher for building digests
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    /// Create a new content hasher
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash the canonical JSON serialization of a value
    pub fn update_canonical<T: Serialize>(&mut self, value: &T) -> Result<(), ReflowError> {
        let json = serde_json::to_vec(value)?;
        self.hasher.update(&json);
        Ok(())
    }

    /// Finalize and get the hash
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of a document's content
pub fn document_digest(document: &Document) -> Result<String, ReflowError> {
    let mut hasher = ContentHasher::new();
    hasher.update_canonical(document)?;
    Ok(hasher.finalize())
}

/// First 12 hex characters, for display
pub fn short(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_ignores_yaml_layout() {
        let a = Document::from_yaml(
            "kind: bundle\nowner: acme\nname: lint\nversion: v1\nsteps:\n  - run: make lint\n",
        )
        .unwrap();
        let b = Document::from_yaml(
            "version: v1\nname: lint\nowner: acme\nkind: bundle\n\nsteps: [{run: 'make lint'}]\n",
        )
        .unwrap();

        assert_eq!(document_digest(&a).unwrap(), document_digest(&b).unwrap());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let a = Document::from_yaml(
            "kind: bundle\nowner: acme\nname: lint\nversion: v1\nsteps:\n  - run: make lint\n",
        )
        .unwrap();
        let b = Document::from_yaml(
            "kind: bundle\nowner: acme\nname: lint\nversion: v1\nsteps:\n  - run: make lint-all\n",
        )
        .unwrap();

        assert_ne!(document_digest(&a).unwrap(), document_digest(&b).unwrap());
        assert_eq!(short(&document_digest(&a).unwrap()).len(), 12);
    }
}
