//! Fallback-chain resolution of artifacts to registry metadata.
//!
//! One resolution fingerprints the artifact, then walks the registries in
//! priority order trying a hash search followed by a name search, and stops at
//! the first match. Results are cached per local path for the session, and
//! concurrent requests for the same path share a single resolution.

use crate::config::ProvenanceConfig;
use crate::error::{ProvenanceError, Result};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::metadata::{Artifact, Provider, RegistryRecord, ResolvedMetadata};
use crate::registry::{registries_from_config, Capability, DynRegistryClient, RegistryClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

type InFlight = Arc<OnceCell<Arc<ResolvedMetadata>>>;

/// Counters for one resolver session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    /// Calls answered from the result cache.
    pub cache_hits: u64,
    /// Underlying resolutions actually executed.
    pub resolutions_started: u64,
    /// Calls that awaited a resolution already in flight.
    pub joined_in_flight: u64,
    /// Resolutions that ended as `unknown`.
    pub not_found: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    resolutions_started: AtomicU64,
    joined_in_flight: AtomicU64,
    not_found: AtomicU64,
}

struct ResolverInner {
    registries: Vec<DynRegistryClient>,
    fingerprinter: Fingerprinter,
    results: RwLock<HashMap<PathBuf, Arc<ResolvedMetadata>>>,
    fingerprints: RwLock<HashMap<PathBuf, Fingerprint>>,
    in_flight: Mutex<HashMap<PathBuf, InFlight>>,
    counters: Counters,
}

/// Resolves artifacts against an ordered list of registries.
///
/// Cloning is cheap; clones share caches and the in-flight map.
#[derive(Clone)]
pub struct MetadataResolver {
    inner: Arc<ResolverInner>,
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<_> = self.inner.registries.iter().map(|r| r.provider()).collect();
        f.debug_struct("MetadataResolver")
            .field("registries", &providers)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MetadataResolver {
    /// Build a resolver with the registries enabled in `config`.
    pub fn new(config: &ProvenanceConfig) -> Result<Self> {
        let registries = registries_from_config(config)?;
        Ok(Self::with_registries(
            registries,
            Fingerprinter::new(config.fingerprint),
        ))
    }

    /// Build a resolver over explicit registry clients, consulted in the given order.
    pub fn with_registries(registries: Vec<DynRegistryClient>, fingerprinter: Fingerprinter) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                registries,
                fingerprinter,
                results: RwLock::new(HashMap::new()),
                fingerprints: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn registries(&self) -> &[DynRegistryClient] {
        &self.inner.registries
    }

    /// Resolve an artifact.
    ///
    /// Without `force_refresh` a cached result is returned as is. A forced call
    /// that finds a resolution already in flight joins it instead of starting
    /// another one.
    pub async fn resolve(&self, artifact: &Artifact, force_refresh: bool) -> Arc<ResolvedMetadata> {
        let key = artifact.local_path.clone();

        if !force_refresh {
            if let Some(hit) = self.cached(&key).await {
                self.hit();
                return hit;
            }
        }

        let (cell, joined) = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(cell) = in_flight.get(&key) {
                (cell.clone(), true)
            } else {
                // A resolution may have finished between the cache check and the lock.
                if !force_refresh {
                    if let Some(hit) = self.cached(&key).await {
                        self.hit();
                        return hit;
                    }
                }
                let cell: InFlight = Arc::new(OnceCell::new());
                in_flight.insert(key.clone(), cell.clone());
                (cell, false)
            }
        };

        if joined {
            self.inner
                .counters
                .joined_in_flight
                .fetch_add(1, Ordering::Relaxed);
            debug!("Joining in-flight resolution of {}", artifact.filename);
        }

        let resolved = cell
            .get_or_init(|| self.run_resolution(artifact, force_refresh))
            .await
            .clone();

        let mut in_flight = self.inner.in_flight.lock().await;
        if in_flight.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(&key);
        }

        resolved
    }

    /// Forced re-resolution against one registry chosen by the user.
    ///
    /// With a `model_id` the record is fetched directly; otherwise the usual hash
    /// then name search runs against that registry only. `Provider::Unknown`
    /// records the artifact as unresolved. The result replaces the cached one.
    pub async fn resolve_with_override(
        &self,
        artifact: &Artifact,
        provider: Provider,
        model_id: Option<&str>,
    ) -> Result<Arc<ResolvedMetadata>> {
        self.inner
            .counters
            .resolutions_started
            .fetch_add(1, Ordering::Relaxed);
        let fingerprint = self.fingerprint_for(artifact, true).await;

        let resolved = if provider == Provider::Unknown {
            ResolvedMetadata::unknown(artifact.clone(), fingerprint)
        } else {
            let client = self
                .inner
                .registries
                .iter()
                .find(|c| c.provider() == provider)
                .ok_or_else(|| {
                    ProvenanceError::config(format!("{} is not enabled for this session", provider))
                })?;

            let matched = match model_id {
                Some(id) => Some((client.get_by_id(id).await?, false)),
                None => self.match_in_registry(client, artifact, fingerprint.as_ref()).await,
            };

            match matched {
                Some((record, verified)) => {
                    ResolvedMetadata::from_record(artifact.clone(), fingerprint, record, verified)
                }
                None => ResolvedMetadata::unknown(artifact.clone(), fingerprint),
            }
        };

        info!(
            "Override resolved {} as {}",
            artifact.filename,
            resolved.provider()
        );
        Ok(self.store(resolved).await)
    }

    /// Cached result for a local path, if any.
    pub async fn cached(&self, path: &Path) -> Option<Arc<ResolvedMetadata>> {
        self.inner.results.read().await.get(path).cloned()
    }

    /// Forget the cached result and fingerprint of one path.
    pub async fn invalidate(&self, path: &Path) {
        self.inner.results.write().await.remove(path);
        self.inner.fingerprints.write().await.remove(path);
    }

    /// Drop cached results, fingerprints and every registry response cache.
    pub async fn clear_caches(&self) {
        self.inner.results.write().await.clear();
        self.inner.fingerprints.write().await.clear();
        for registry in &self.inner.registries {
            registry.clear_cache();
        }
    }

    pub fn stats(&self) -> ResolverStats {
        let c = &self.inner.counters;
        ResolverStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            resolutions_started: c.resolutions_started.load(Ordering::Relaxed),
            joined_in_flight: c.joined_in_flight.load(Ordering::Relaxed),
            not_found: c.not_found.load(Ordering::Relaxed),
        }
    }

    fn hit(&self) {
        self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    async fn store(&self, resolved: ResolvedMetadata) -> Arc<ResolvedMetadata> {
        let resolved = Arc::new(resolved);
        self.inner
            .results
            .write()
            .await
            .insert(resolved.artifact().local_path.clone(), resolved.clone());
        resolved
    }

    async fn run_resolution(&self, artifact: &Artifact, force_refresh: bool) -> Arc<ResolvedMetadata> {
        self.inner
            .counters
            .resolutions_started
            .fetch_add(1, Ordering::Relaxed);
        let fingerprint = self.fingerprint_for(artifact, force_refresh).await;

        for client in &self.inner.registries {
            if let Some((record, verified)) = self
                .match_in_registry(client, artifact, fingerprint.as_ref())
                .await
            {
                info!(
                    "Resolved {} to {} {} ({})",
                    artifact.filename,
                    record.provider(),
                    record.registry_id(),
                    if verified { "hash match" } else { "name match" }
                );
                let resolved =
                    ResolvedMetadata::from_record(artifact.clone(), fingerprint, record, verified);
                return self.store(resolved).await;
            }
        }

        self.inner.counters.not_found.fetch_add(1, Ordering::Relaxed);
        info!("No registry match for {}", artifact.filename);
        self.store(ResolvedMetadata::unknown(artifact.clone(), fingerprint))
            .await
    }

    /// Session-cached fingerprint; failures degrade to `None`.
    async fn fingerprint_for(&self, artifact: &Artifact, recompute: bool) -> Option<Fingerprint> {
        let path = &artifact.local_path;
        if !recompute {
            if let Some(fp) = self.inner.fingerprints.read().await.get(path) {
                return Some(fp.clone());
            }
        }

        match self.inner.fingerprinter.fingerprint(path.clone()).await {
            Ok(fp) => {
                debug!(
                    "Fingerprinted {} ({:?}): {}",
                    artifact.filename, fp.mode, fp.value
                );
                self.inner
                    .fingerprints
                    .write()
                    .await
                    .insert(path.clone(), fp.clone());
                Some(fp)
            }
            Err(e) => {
                warn!(
                    "Could not fingerprint {}, falling back to name search: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Hash search, then name search, against one registry.
    ///
    /// Registry errors count as "no match". The bool is true for a hash match.
    async fn match_in_registry(
        &self,
        client: &DynRegistryClient,
        artifact: &Artifact,
        fingerprint: Option<&Fingerprint>,
    ) -> Option<(RegistryRecord, bool)> {
        let provider = client.provider();

        if let Some(fp) = fingerprint.filter(|_| client.supports(Capability::SearchByHash)) {
            match client.search_by_hash(&fp.value).await {
                Ok(records) => {
                    if let Some(record) = records.into_iter().next() {
                        return Some((record, true));
                    }
                    debug!("{} has no hash match for {}", provider, artifact.filename);
                }
                Err(e) => warn!("{} hash search failed for {}: {}", provider, artifact.filename, e),
            }
        }

        let record = client
            .search_by_name(&artifact.filename)
            .await
            .into_iter()
            .next()?;

        // Search results carry a partial card; fetch the full one.
        let record = match record {
            RegistryRecord::HuggingFace(model) => match client.get_by_id(&model.id).await {
                Ok(full) => full,
                Err(e) => {
                    debug!("Keeping search record for {}: {}", model.id, e);
                    RegistryRecord::HuggingFace(model)
                }
            },
            other => other,
        };

        Some((record, false))
    }
}
