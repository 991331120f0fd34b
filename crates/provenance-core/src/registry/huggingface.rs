//! HuggingFace Hub registry client.
//!
//! The Hub has no content-hash search, so [`Capability::SearchByHash`] is not
//! offered and hash lookups return no records.

use super::http::{HttpFetch, RegistryHttp, ReqwestFetcher, RequestSignature};
use super::{Capability, RegistryClient, RegistryFile};
use crate::config::{NetworkConfig, ProvenanceConfig, RegistrySettings};
use crate::error::{ProvenanceError, Result};
use crate::metadata::{Provider, RegistryRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Model entry from `/api/models` (with `full=true`) or `/api/models/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuggingFaceModel {
    /// Repository id, `owner/name`.
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub downloads: Option<u64>,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "pipeline_tag")]
    pub pipeline_tag: Option<String>,
    #[serde(default, rename = "library_name")]
    pub library_name: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    /// Commit the record describes.
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub siblings: Vec<HfSibling>,
    #[serde(default)]
    pub card_data: Option<HfCardData>,
    #[serde(default)]
    pub config: Option<HfModelConfig>,
    /// `false`, `"auto"` or `"manual"`.
    #[serde(default)]
    pub gated: Option<serde_json::Value>,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HfSibling {
    pub rfilename: String,
}

/// Model card front matter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HfCardData {
    #[serde(default)]
    pub license: Option<String>,
    /// A single repo id or a list of them.
    #[serde(default)]
    pub base_model: Option<serde_json::Value>,
}

/// Subset of `config.json` used to infer the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HfModelConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub model_type: Option<String>,
}

/// Entry of `/api/models/{id}/tree/{rev}`.
#[derive(Debug, Clone, Deserialize)]
struct HfFileEntry {
    path: String,
    #[serde(default, rename = "type")]
    entry_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<HfLfsInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct HfLfsInfo {
    /// SHA-256 of the stored object.
    oid: String,
    size: u64,
}

impl HuggingFaceModel {
    /// Repository name without the owner.
    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }

    pub fn canonical_url(&self) -> String {
        format!("{}/{}", NetworkConfig::HUGGINGFACE_WEB_BASE, self.id)
    }

    pub fn owner(&self) -> Option<&str> {
        self.author
            .as_deref()
            .or_else(|| self.id.split_once('/').map(|(owner, _)| owner))
    }

    /// Base model from the card, falling back to the `base_model:` tag.
    pub fn base_model(&self) -> Option<String> {
        let from_card = self
            .card_data
            .as_ref()
            .and_then(|card| card.base_model.as_ref())
            .and_then(|value| match value {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Array(items) => {
                    items.iter().find_map(|v| v.as_str()).map(String::from)
                }
                _ => None,
            });

        from_card.or_else(|| {
            self.tags
                .iter()
                .filter_map(|t| t.strip_prefix("base_model:"))
                .find_map(|rest| rest.rsplit(':').next())
                .map(String::from)
        })
    }

    pub fn license(&self) -> Option<String> {
        self.card_data
            .as_ref()
            .and_then(|card| card.license.clone())
            .or_else(|| {
                self.tags
                    .iter()
                    .find_map(|t| t.strip_prefix("license:"))
                    .map(String::from)
            })
    }

    /// Task tag, inferred from the model config when the Hub leaves it empty.
    pub fn pipeline(&self) -> Option<String> {
        self.pipeline_tag
            .clone()
            .or_else(|| infer_pipeline_tag(self.config.as_ref()))
    }

    pub fn is_gated(&self) -> bool {
        match &self.gated {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(_)) => true,
            _ => false,
        }
    }
}

/// Map a config's architecture or model type to a pipeline tag.
fn infer_pipeline_tag(config: Option<&HfModelConfig>) -> Option<String> {
    let config = config?;

    if let Some(arch) = config.architectures.first() {
        const SUFFIXES: &[(&str, &str)] = &[
            ("ForConditionalGeneration", "text2text-generation"),
            ("ForSequenceClassification", "text-classification"),
            ("ForImageClassification", "image-classification"),
            ("ForTokenClassification", "token-classification"),
            ("ForQuestionAnswering", "question-answering"),
            ("ForSpeechSeq2Seq", "automatic-speech-recognition"),
            ("ForCausalLM", "text-generation"),
            ("ForMaskedLM", "fill-mask"),
        ];
        if let Some((_, tag)) = SUFFIXES.iter().find(|(suffix, _)| arch.ends_with(suffix)) {
            return Some(tag.to_string());
        }
    }

    let tag = match config.model_type.as_deref()? {
        "llama" | "mistral" | "mixtral" | "gpt2" | "gpt_neox" | "phi" | "phi3" | "qwen2"
        | "qwen3" | "gemma" | "gemma2" | "gemma3" | "falcon" | "mamba" => "text-generation",
        "t5" | "bart" | "mt5" => "text2text-generation",
        "stable_diffusion" | "sdxl" | "pixart" => "text-to-image",
        "whisper" | "wav2vec2" => "automatic-speech-recognition",
        "clip" | "siglip" => "zero-shot-image-classification",
        "vit" | "dinov2" => "image-classification",
        "bert" | "roberta" | "distilbert" | "deberta" => "fill-mask",
        _ => return None,
    };
    Some(tag.to_string())
}

/// Client for the HuggingFace Hub API.
#[derive(Debug)]
pub struct HuggingFaceClient {
    http: RegistryHttp,
    search_limit: u32,
}

impl HuggingFaceClient {
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
                Provider::HuggingFace,
                NetworkConfig::HUGGINGFACE_API_BASE,
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

    fn not_found(id: &str) -> ProvenanceError {
        ProvenanceError::NotFound {
            provider: Provider::HuggingFace,
            id: id.to_string(),
        }
    }

    async fn fetch_model(&self, signature: RequestSignature, id: &str) -> Result<RegistryRecord> {
        match self.http.get_as::<HuggingFaceModel>(&signature).await {
            Ok(model) => Ok(RegistryRecord::HuggingFace(model)),
            Err(e) => {
                debug!("HuggingFace lookup of {} failed: {}", id, e);
                Err(Self::not_found(id))
            }
        }
    }
}

#[async_trait]
impl RegistryClient for HuggingFaceClient {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    fn supports(&self, capability: Capability) -> bool {
        !matches!(capability, Capability::SearchByHash)
    }

    async fn search_query(&self, query: &str) -> Result<Vec<RegistryRecord>> {
        let signature = RequestSignature::new("/models")
            .param("search", query)
            .param("limit", self.search_limit)
            .param("full", "true");
        let models: Vec<HuggingFaceModel> = self.http.get_as(&signature).await?;
        Ok(models.into_iter().map(RegistryRecord::HuggingFace).collect())
    }

    async fn search_by_hash(&self, _hash: &str) -> Result<Vec<RegistryRecord>> {
        Ok(Vec::new())
    }

    async fn get_by_id(&self, id: &str) -> Result<RegistryRecord> {
        self.fetch_model(RequestSignature::new(format!("/models/{}", id)), id)
            .await
    }

    /// `version_id` is `owner/name@revision`; a bare repo id means `main`.
    async fn get_version_by_id(&self, version_id: &str) -> Result<RegistryRecord> {
        let (repo, revision) = version_id.split_once('@').unwrap_or((version_id, "main"));
        let signature = RequestSignature::new(format!(
            "/models/{}/revision/{}",
            repo,
            urlencoding::encode(revision)
        ));
        self.fetch_model(signature, version_id).await
    }

    async fn list_files(&self, id: &str) -> Result<Vec<RegistryFile>> {
        let signature = RequestSignature::new(format!("/models/{}/tree/main", id));
        let entries: Vec<HfFileEntry> = self.http.get_as(&signature).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.entry_type.as_deref() != Some("directory"))
            .map(|e| RegistryFile {
                size: e.lfs.as_ref().map(|l| l.size).or(e.size),
                sha256: e.lfs.map(|l| l.oid.to_lowercase()),
                path: e.path,
            })
            .collect())
    }

    fn clear_cache(&self) {
        self.http.cache().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::MockFetcher;
    use super::*;
    use serde_json::json;

    fn client(fetcher: &MockFetcher) -> HuggingFaceClient {
        let config = ProvenanceConfig {
            min_request_interval_ms: 0,
            ..ProvenanceConfig::default()
        };
        HuggingFaceClient::with_fetcher(&config.huggingface, &config, fetcher.shared())
    }

    fn model_json() -> serde_json::Value {
        json!({
            "_id": "abc",
            "id": "stabilityai/sdxl-turbo",
            "modelId": "stabilityai/sdxl-turbo",
            "author": "stabilityai",
            "downloads": 1000,
            "likes": 42,
            "tags": ["diffusers", "license:other", "base_model:finetune:stabilityai/stable-diffusion-xl-base-1.0"],
            "pipeline_tag": "text-to-image",
            "library_name": "diffusers",
            "sha": "462165984030d82259a11f4367a4eed129e94a7b",
            "siblings": [{"rfilename": "sd_xl_turbo_1.0_fp16.safetensors"}],
            "cardData": {"license": "other"}
        })
    }

    #[test]
    fn test_model_accessors() {
        let model: HuggingFaceModel = serde_json::from_value(model_json()).unwrap();
        assert_eq!(model.name(), "sdxl-turbo");
        assert_eq!(model.owner(), Some("stabilityai"));
        assert_eq!(model.canonical_url(), "https://huggingface.co/stabilityai/sdxl-turbo");
        assert_eq!(
            model.base_model().as_deref(),
            Some("stabilityai/stable-diffusion-xl-base-1.0")
        );
        assert_eq!(model.license().as_deref(), Some("other"));
        assert_eq!(model.pipeline().as_deref(), Some("text-to-image"));
        assert!(!model.is_gated());
    }

    #[test]
    fn test_card_base_model_list() {
        let model: HuggingFaceModel = serde_json::from_value(json!({
            "id": "someone/lora",
            "cardData": {"base_model": ["black-forest-labs/FLUX.1-dev"]}
        }))
        .unwrap();
        assert_eq!(model.base_model().as_deref(), Some("black-forest-labs/FLUX.1-dev"));
    }

    #[test]
    fn test_pipeline_inferred_from_config() {
        let model: HuggingFaceModel = serde_json::from_value(json!({
            "id": "org/llm",
            "config": {"architectures": ["LlamaForCausalLM"], "model_type": "llama"}
        }))
        .unwrap();
        assert_eq!(model.pipeline().as_deref(), Some("text-generation"));

        let model: HuggingFaceModel = serde_json::from_value(json!({
            "id": "org/custom",
            "config": {"model_type": "whisper"}
        }))
        .unwrap();
        assert_eq!(model.pipeline().as_deref(), Some("automatic-speech-recognition"));
    }

    #[tokio::test]
    async fn test_hash_search_is_unsupported_and_empty() {
        let fetcher = MockFetcher::new();
        let client = client(&fetcher);
        assert!(!client.supports(Capability::SearchByHash));
        assert!(client.supports(Capability::SearchByName));
        assert!(client.search_by_hash("abc").await.unwrap().is_empty());
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_query() {
        let fetcher = MockFetcher::new();
        fetcher.respond(
            "/models",
            &[("search", "sdxl turbo"), ("full", "true")],
            json!([model_json()]),
        );

        let records = client(&fetcher).search_query("sdxl turbo").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].registry_id(), "stabilityai/sdxl-turbo");
        assert_eq!(records[0].provider(), Provider::HuggingFace);
    }

    #[tokio::test]
    async fn test_get_version_by_id_uses_revision() {
        let fetcher = MockFetcher::new();
        fetcher.respond("/models/stabilityai/sdxl-turbo/revision/abc123", &[], model_json());

        let client = client(&fetcher);
        let record = client
            .get_version_by_id("stabilityai/sdxl-turbo@abc123")
            .await
            .unwrap();
        assert_eq!(record.registry_id(), "stabilityai/sdxl-turbo");

        let err = client.get_by_id("nobody/missing").await.unwrap_err();
        assert!(matches!(
            err,
            ProvenanceError::NotFound {
                provider: Provider::HuggingFace,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_files_reads_lfs_hashes() {
        let fetcher = MockFetcher::new();
        fetcher.respond(
            "/models/stabilityai/sdxl-turbo/tree/main",
            &[],
            json!([
                {"type": "file", "path": "README.md", "size": 120},
                {"type": "directory", "path": "unet"},
                {
                    "type": "file",
                    "path": "sd_xl_turbo_1.0_fp16.safetensors",
                    "size": 6938040682u64,
                    "lfs": {"oid": "E869AC7D6942CB327D68D5ED83A40447AADF20E0C3358D98B2CC9E270DB0DA26", "size": 6938040682u64}
                }
            ]),
        );

        let files = client(&fetcher)
            .list_files("stabilityai/sdxl-turbo")
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].sha256, None);
        assert_eq!(files[1].size, Some(6938040682));
        assert_eq!(
            files[1].sha256.as_deref(),
            Some("e869ac7d6942cb327d68d5ed83a40447aadf20e0c3358d98b2cc9e270db0da26")
        );
    }
}
