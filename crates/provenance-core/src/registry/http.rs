//! Shared request path for registry clients.
//!
//! A request goes through three stages: the response cache (a hit returns
//! immediately), the rate gate, and the transport.

use super::cache::ResponseCache;
use super::rate_gate::RateGate;
use crate::config::{NetworkConfig, ProvenanceConfig, RegistrySettings};
use crate::error::{ProvenanceError, Result};
use crate::metadata::Provider;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Transport used by registry clients.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// GET `url` and parse the body as JSON. Non-success statuses are network errors.
    async fn get_json(&self, url: &Url, bearer: Option<&str>) -> Result<serde_json::Value>;
}

/// [`HttpFetch`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ProvenanceError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                status: None,
            })?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get_json(&self, url: &Url, bearer: Option<&str>) -> Result<serde_json::Value> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProvenanceError::Timeout(self.timeout)
            } else {
                ProvenanceError::Network {
                    message: format!("GET {} failed: {}", url, e),
                    status: None,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvenanceError::Network {
                message: format!("GET {} returned {}", url, status),
                status: Some(status.as_u16()),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProvenanceError::Parse {
            message: format!("Malformed response from {}: {}", url, e),
            source: Some(e),
        })
    }
}

/// Endpoint plus sorted query parameters.
///
/// The rendered form is the response cache key, so two requests that differ
/// only in parameter order share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature {
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl RequestSignature {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stable cache key: `endpoint?k1=v1&k2=v2` with keys sorted and values encoded.
    pub fn cache_key(&self) -> String {
        if self.params.is_empty() {
            return self.endpoint.clone();
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}?{}", self.endpoint, query.join("&"))
    }

    /// Full request URL under `base`.
    pub fn to_url(&self, base: &str) -> Result<Url> {
        let raw = format!("{}{}", base.trim_end_matches('/'), self.endpoint);
        let mut url = Url::parse(&raw).map_err(|e| {
            ProvenanceError::config(format!("Invalid registry URL {}: {}", raw, e))
        })?;
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// Cached, rate-limited GET access to one registry.
pub struct RegistryHttp {
    provider: Provider,
    base_url: String,
    api_key: Option<String>,
    fetcher: Arc<dyn HttpFetch>,
    gate: RateGate,
    cache: ResponseCache,
}

impl std::fmt::Debug for RegistryHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHttp")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl RegistryHttp {
    pub fn new(
        provider: Provider,
        default_base: &str,
        settings: &RegistrySettings,
        config: &ProvenanceConfig,
        fetcher: Arc<dyn HttpFetch>,
    ) -> Self {
        Self {
            provider,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string()),
            api_key: settings.api_key().map(String::from),
            fetcher,
            gate: RateGate::new(config.min_request_interval()),
            cache: ResponseCache::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// GET a JSON document, consulting the cache before the rate gate.
    pub async fn get(&self, signature: &RequestSignature) -> Result<serde_json::Value> {
        let key = signature.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            debug!("{} cache hit for {}", self.provider, key);
            return Ok(cached);
        }

        let url = signature.to_url(&self.base_url)?;
        let value = {
            let _slot = self.gate.acquire().await;
            debug!("{} GET {}", self.provider, url);
            self.fetcher.get_json(&url, self.api_key.as_deref()).await?
        };

        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// GET and deserialize into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, signature: &RequestSignature) -> Result<T> {
        let value = self.get(signature).await?;
        serde_json::from_value(value).map_err(|e| ProvenanceError::Parse {
            message: format!(
                "Unexpected {} response for {}: {}",
                self.provider,
                signature.endpoint(),
                e
            ),
            source: Some(e),
        })
    }
}
