//! In-memory response cache owned by one registry client.
//!
//! Entries live as long as the client (one session) unless cleared. There is
//! no size bound and no expiry.

use mini_moka::sync::Cache;
use serde_json::Value;

pub struct ResponseCache {
    entries: Cache<String, Value>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(&key.to_string())
    }

    /// Store a response. Public so callers can pre-seed known answers.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(&key.to_string());
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
