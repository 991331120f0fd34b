//! Registry clients for CivitAI and HuggingFace.
//!
//! Every client owns its own response cache and rate gate, so outbound calls
//! are serialized per registry but never across registries.
//!
//! # Module Organization
//!
//! - [`http`] - Transport seam, request signatures and the shared request path
//! - [`rate_gate`] - Minimum-interval gate between outbound calls
//! - [`cache`] - Per-client response cache
//! - [`civitai`] - CivitAI client and payload types
//! - [`huggingface`] - HuggingFace Hub client and payload types

mod cache;
pub mod civitai;
mod http;
pub mod huggingface;
mod rate_gate;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::ResponseCache;
pub use civitai::CivitaiClient;
pub use http::{HttpFetch, RegistryHttp, ReqwestFetcher, RequestSignature};
pub use huggingface::HuggingFaceClient;
pub use rate_gate::{RateGate, RateGateGuard};

use crate::config::ProvenanceConfig;
use crate::error::{ProvenanceError, Result};
use crate::metadata::{Provider, RegistryRecord};
use crate::naming::SearchVariations;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Operations a registry may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    SearchByHash,
    SearchByName,
    GetById,
    GetVersionById,
    ListFiles,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SearchByHash => "search by hash",
            Capability::SearchByName => "search by name",
            Capability::GetById => "lookup by id",
            Capability::GetVersionById => "version lookup by id",
            Capability::ListFiles => "file listing",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A weight file published under a registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    pub path: String,
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 when the registry publishes it.
    pub sha256: Option<String>,
}

/// Read-only query surface of a model registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn supports(&self, capability: Capability) -> bool;

    /// One free-text search request.
    async fn search_query(&self, query: &str) -> Result<Vec<RegistryRecord>>;

    /// Records whose published files carry this content hash.
    async fn search_by_hash(&self, hash: &str) -> Result<Vec<RegistryRecord>>;

    /// Direct lookup. Any failure is reported as [`ProvenanceError::NotFound`].
    async fn get_by_id(&self, id: &str) -> Result<RegistryRecord>;

    /// Lookup of one published version. Failures are reported as not found.
    async fn get_version_by_id(&self, version_id: &str) -> Result<RegistryRecord>;

    async fn list_files(&self, id: &str) -> Result<Vec<RegistryFile>> {
        let _ = id;
        Err(ProvenanceError::Unsupported {
            provider: self.provider(),
            capability: Capability::ListFiles.as_str(),
        })
    }

    /// Drop every cached response of this client.
    fn clear_cache(&self);

    /// Fuzzy name search over the variations of `filename`.
    ///
    /// Variations are queried one at a time; a failing variation is logged and
    /// skipped. Results are merged by registry id in first-seen order.
    async fn search_by_name(&self, filename: &str) -> Vec<RegistryRecord> {
        let provider = self.provider();
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for variation in SearchVariations::from_filename(filename) {
            match self.search_query(&variation).await {
                Ok(records) => {
                    debug!(
                        "{} search '{}' returned {} results",
                        provider,
                        variation,
                        records.len()
                    );
                    for record in records {
                        if seen.insert(record.registry_id()) {
                            merged.push(record);
                        }
                    }
                }
                Err(e) => {
                    warn!("{} search '{}' failed, skipping: {}", provider, variation, e);
                }
            }
        }

        merged
    }
}

pub type DynRegistryClient = Arc<dyn RegistryClient>;

/// Build the enabled registry clients in lookup priority order.
///
/// Registries that are disabled are left out; registries with a configuration
/// error are left out with a warning.
pub fn registries_from_config(config: &ProvenanceConfig) -> Result<Vec<DynRegistryClient>> {
    let fetcher: Arc<dyn HttpFetch> = Arc::new(ReqwestFetcher::new(config.request_timeout())?);
    Ok(registries_with_fetcher(config, fetcher))
}

/// Same as [`registries_from_config`] with a caller-supplied transport.
pub fn registries_with_fetcher(
    config: &ProvenanceConfig,
    fetcher: Arc<dyn HttpFetch>,
) -> Vec<DynRegistryClient> {
    let mut clients: Vec<DynRegistryClient> = Vec::new();

    for provider in Provider::PRIORITY {
        match config.validate_registry(provider) {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} disabled, skipping", provider);
                continue;
            }
            Err(e) => {
                warn!("Skipping {} for this session: {}", provider, e);
                continue;
            }
        }

        let client: DynRegistryClient = match provider {
            Provider::HuggingFace => Arc::new(HuggingFaceClient::with_fetcher(
                &config.huggingface,
                config,
                fetcher.clone(),
            )),
            Provider::Civitai => Arc::new(CivitaiClient::with_fetcher(
                &config.civitai,
                config,
                fetcher.clone(),
            )),
            Provider::Unknown => continue,
        };
        clients.push(client);
    }

    clients
}
