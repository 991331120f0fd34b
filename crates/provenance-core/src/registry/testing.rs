//! Scripted [`HttpFetch`] for unit tests.

use super::http::HttpFetch;
use crate::error::{ProvenanceError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

struct Route {
    path: String,
    query: Vec<(String, String)>,
    reply: std::result::Result<Value, u16>,
}

impl Route {
    fn matches(&self, url: &Url) -> bool {
        url.path().ends_with(&self.path)
            && self.query.iter().all(|(k, v)| {
                url.query_pairs()
                    .any(|(qk, qv)| qk == k.as_str() && qv == v.as_str())
            })
    }
}

/// Answers requests from registered routes; unmatched URLs get a 404.
#[derive(Clone, Default)]
pub(crate) struct MockFetcher {
    routes: Arc<Mutex<Vec<Route>>>,
    calls: Arc<Mutex<Vec<Url>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn HttpFetch> {
        Arc::new(self.clone())
    }

    fn add(&self, path: &str, query: &[(&str, &str)], reply: std::result::Result<Value, u16>) {
        self.routes.lock().unwrap().push(Route {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            reply,
        });
    }

    /// Answer requests whose path ends with `path` and whose query contains `query`.
    pub fn respond(&self, path: &str, query: &[(&str, &str)], body: Value) {
        self.add(path, query, Ok(body));
    }

    pub fn fail(&self, path: &str, query: &[(&str, &str)], status: u16) {
        self.add(path, query, Err(status));
    }

    /// Make every request take this long (in tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }

    /// Values of query parameter `key` across all requests, in call order.
    pub fn queried_values(&self, key: &str) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.into_owned())
            })
            .collect()
    }
}

#[async_trait]
impl HttpFetch for MockFetcher {
    async fn get_json(&self, url: &Url, _bearer: Option<&str>) -> Result<Value> {
        self.calls.lock().unwrap().push(url.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|route| route.matches(url))
            .map(|route| route.reply.clone());

        match reply {
            Some(Ok(body)) => Ok(body),
            Some(Err(status)) => Err(ProvenanceError::Network {
                message: format!("GET {} returned {}", url, status),
                status: Some(status),
            }),
            None => Err(ProvenanceError::Network {
                message: format!("GET {} returned 404", url),
                status: Some(404),
            }),
        }
    }
}
