//! CivitAI registry client.
//!
//! Endpoints (relative to the API base):
//! - `GET /models?hash=<sha256>&limit=1`
//! - `GET /models?query=<text>&limit=N`
//! - `GET /models/{id}`
//! - `GET /model-versions/{id}`

use super::http::{HttpFetch, RegistryHttp, ReqwestFetcher, RequestSignature};
use super::{Capability, RegistryClient, RegistryFile};
use crate::config::{NetworkConfig, ProvenanceConfig, RegistrySettings};
use crate::error::{ProvenanceError, Result};
use crate::metadata::{Provider, RegistryRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Model entry as returned by `/models` and `/models/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiModel {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Checkpoint, LORA, TextualInversion, ...
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: Option<CivitaiCreator>,
    #[serde(default)]
    pub stats: CivitaiStats,
    #[serde(default)]
    pub model_versions: Vec<CivitaiModelVersion>,
    /// Either a single permission string or a list of them.
    #[serde(default)]
    pub allow_commercial_use: Option<serde_json::Value>,
    #[serde(default)]
    pub allow_derivatives: Option<bool>,
    #[serde(default)]
    pub allow_no_credit: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CivitaiCreator {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiStats {
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub favorite_count: u64,
    #[serde(default)]
    pub thumbs_up_count: u64,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiModelVersion {
    pub id: u64,
    #[serde(default)]
    pub model_id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub trained_words: Vec<String>,
    #[serde(default)]
    pub files: Vec<CivitaiFile>,
    /// Parent model summary, present on `/model-versions/{id}`.
    #[serde(default)]
    pub model: Option<CivitaiVersionModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiVersionModel {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiFile {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "sizeKB")]
    pub size_kb: Option<f64>,
    #[serde(default)]
    pub primary: Option<bool>,
    /// Keyed by algorithm name (`SHA256`, `AutoV2`, `BLAKE3`, ...).
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl CivitaiFile {
    pub fn sha256(&self) -> Option<String> {
        self.hashes
            .iter()
            .find(|(algo, _)| algo.eq_ignore_ascii_case("sha256"))
            .map(|(_, hash)| hash.to_lowercase())
    }
}

impl CivitaiModel {
    pub fn canonical_url(&self) -> String {
        format!("{}/models/{}", NetworkConfig::CIVITAI_WEB_BASE, self.id)
    }

    pub fn author(&self) -> Option<&str> {
        self.creator.as_ref().and_then(|c| c.username.as_deref())
    }

    /// Base model of the newest version, e.g. `SD 1.5`, `SDXL 1.0`.
    pub fn base_model(&self) -> Option<&str> {
        self.model_versions
            .first()
            .and_then(|v| v.base_model.as_deref())
    }

    pub fn likes(&self) -> u64 {
        self.stats.thumbs_up_count.max(self.stats.favorite_count)
    }

    /// Short license summary built from the permission flags.
    pub fn license_summary(&self) -> Option<String> {
        let commercial = match &self.allow_commercial_use {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join("|"),
            )
            .map(|s| if s.is_empty() { "None".to_string() } else { s }),
            _ => None,
        };

        let mut parts = Vec::new();
        if let Some(commercial) = commercial {
            parts.push(format!("commercial:{}", commercial));
        }
        if let Some(derivatives) = self.allow_derivatives {
            parts.push(format!("derivatives:{}", derivatives));
        }
        if let Some(no_credit) = self.allow_no_credit {
            parts.push(format!("no-credit:{}", no_credit));
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    /// Every file of every version.
    pub fn files(&self) -> impl Iterator<Item = &CivitaiFile> {
        self.model_versions.iter().flat_map(|v| v.files.iter())
    }

    /// Wrap a single version from `/model-versions/{id}` as a model record.
    fn from_version(version: CivitaiModelVersion) -> Option<Self> {
        let model_id = version.model_id?;
        let summary = version.model.clone();
        Some(Self {
            id: model_id,
            name: summary.as_ref().map(|m| m.name.clone()).unwrap_or_default(),
            description: None,
            model_type: summary.as_ref().and_then(|m| m.model_type.clone()),
            nsfw: summary.as_ref().map(|m| m.nsfw).unwrap_or(false),
            tags: Vec::new(),
            creator: None,
            stats: CivitaiStats::default(),
            model_versions: vec![version],
            allow_commercial_use: None,
            allow_derivatives: None,
            allow_no_credit: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CivitaiPage {
    #[serde(default)]
    items: Vec<CivitaiModel>,
}

/// Client for the CivitAI REST API.
#[derive(Debug)]
pub struct CivitaiClient {
    http: RegistryHttp,
    search_limit: u32,
}

impl CivitaiClient {
    pub fn new(settings: &RegistrySettings, config: &ProvenanceConfig) -> Result<Self> {
        let fetcher = Arc::new(ReqwestFetcher::new(config.request_timeout())?);
        Ok(Self::with_fetcher(settings, config, fetcher))
    }

    pub fn with_fetcher(
        settings: &RegistrySettings,
        config: &ProvenanceConfig,
        fetcher: Arc<dyn HttpFetch>,
    ) -> Self {
        Self {
            http: RegistryHttp::new(
                Provider::Civitai,
                NetworkConfig::CIVITAI_API_BASE,
                settings,
                config,
                fetcher,
            ),
            search_limit: config.search_limit,
        }
    }

    pub fn http(&self) -> &RegistryHttp {
        &self.http
    }

    /// Signature of the hash search request, for cache seeding.
    pub fn hash_signature(hash: &str) -> RequestSignature {
        RequestSignature::new("/models")
            .param("hash", hash)
            .param("limit", NetworkConfig::HASH_SEARCH_LIMIT)
    }

    fn not_found(id: &str) -> ProvenanceError {
        ProvenanceError::NotFound {
            provider: Provider::Civitai,
            id: id.to_string(),
        }
    }

    async fn search_page(&self, signature: RequestSignature) -> Result<Vec<RegistryRecord>> {
        let page: CivitaiPage = self.http.get_as(&signature).await?;
        Ok(page.items.into_iter().map(RegistryRecord::Civitai).collect())
    }
}

#[async_trait]
impl RegistryClient for CivitaiClient {
    fn provider(&self) -> Provider {
        Provider::Civitai
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn search_query(&self, query: &str) -> Result<Vec<RegistryRecord>> {
        self.search_page(
            RequestSignature::new("/models")
                .param("query", query)
                .param("limit", self.search_limit),
        )
        .await
    }

    async fn search_by_hash(&self, hash: &str) -> Result<Vec<RegistryRecord>> {
        self.search_page(Self::hash_signature(hash)).await
    }

    async fn get_by_id(&self, id: &str) -> Result<RegistryRecord> {
        let signature = RequestSignature::new(format!("/models/{}", urlencoding::encode(id)));
        match self.http.get_as::<CivitaiModel>(&signature).await {
            Ok(model) => Ok(RegistryRecord::Civitai(model)),
            Err(e) if e.is_not_found() => Err(Self::not_found(id)),
            Err(e) => Err(e),
        }
    }

    async fn get_version_by_id(&self, version_id: &str) -> Result<RegistryRecord> {
        let signature = RequestSignature::new(format!(
            "/model-versions/{}",
            urlencoding::encode(version_id)
        ));
        let version = match self.http.get_as::<CivitaiModelVersion>(&signature).await {
            Ok(version) => version,
            Err(e) if e.is_not_found() => return Err(Self::not_found(version_id)),
            Err(e) => return Err(e),
        };
        CivitaiModel::from_version(version)
            .map(RegistryRecord::Civitai)
            .ok_or_else(|| {
                ProvenanceError::parse(format!("Version {} has no parent model id", version_id))
            })
    }

    async fn list_files(&self, id: &str) -> Result<Vec<RegistryFile>> {
        let RegistryRecord::Civitai(model) = self.get_by_id(id).await? else {
            return Ok(Vec::new());
        };
        Ok(model
            .files()
            .map(|f| RegistryFile {
                path: f.name.clone(),
                size: f.size_kb.map(|kb| (kb * 1024.0) as u64),
                sha256: f.sha256(),
            })
            .collect())
    }

    fn clear_cache(&self) {
        self.http.cache().clear();
    }
}
