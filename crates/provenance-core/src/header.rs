//! Structured front-matter header emitted for a resolved artifact.
//!
//! The header is a `---` delimited block of `key: value` lines. Values are
//! JSON scalars and arrays, which are also valid YAML flow values, so the
//! block reads as ordinary YAML front matter. Parsing accepts hand edits:
//! a value that is not valid JSON is taken as a bare string.

use crate::error::{ProvenanceError, Result};
use crate::metadata::{Provider, ResolvedMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DELIMITER: &str = "---";

/// Header fields, in the order they are rendered.
pub const HEADER_FIELDS: &[&str] = &[
    "provider",
    "downloads",
    "likes",
    "verified",
    "author",
    "model_type",
    "pipeline",
    "relationship_base_model",
    "model_id",
    "model_filename",
    "model_path",
    "source",
    "tags",
    "license",
    "last_synced",
];

/// Fields holding text, where a hand-written `model_id: 123` still means a string.
const TEXT_FIELDS: &[&str] = &[
    "author",
    "model_type",
    "pipeline",
    "relationship_base_model",
    "model_id",
    "model_filename",
    "model_path",
    "source",
    "license",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceHeader {
    pub provider: Provider,
    #[serde(default)]
    pub downloads: Option<u64>,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub relationship_base_model: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub model_filename: String,
    #[serde(default)]
    pub model_path: String,
    /// Canonical registry URL.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    pub last_synced: DateTime<Utc>,
}

/// A user-requested re-resolution against a specific registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRequest {
    pub provider: Provider,
    pub model_id: Option<String>,
}

impl ProvenanceHeader {
    pub fn from_resolved(resolved: &ResolvedMetadata) -> Self {
        let artifact = resolved.artifact();
        let mut header = Self {
            provider: resolved.provider(),
            downloads: None,
            likes: None,
            verified: resolved.verified(),
            author: None,
            model_type: None,
            pipeline: None,
            relationship_base_model: resolved.relationships().base_model.clone(),
            model_id: None,
            model_filename: artifact.filename.clone(),
            model_path: artifact.local_path.display().to_string(),
            source: None,
            tags: Vec::new(),
            license: None,
            last_synced: resolved.resolved_at(),
        };

        if let Some(m) = resolved.civitai_record() {
            header.downloads = Some(m.stats.download_count);
            header.likes = Some(m.likes());
            header.author = m.author().map(String::from);
            header.model_type = m.model_type.clone();
            header.model_id = Some(m.id.to_string());
            header.source = Some(m.canonical_url());
            header.tags = m.tags.clone();
            header.license = m.license_summary();
        } else if let Some(m) = resolved.huggingface_record() {
            header.downloads = m.downloads;
            header.likes = m.likes;
            header.author = m.owner().map(String::from);
            header.model_type = m
                .config
                .as_ref()
                .and_then(|c| c.model_type.clone())
                .or_else(|| m.library_name.clone());
            header.pipeline = m.pipeline();
            header.model_id = Some(m.id.clone());
            header.source = Some(m.canonical_url());
            header.tags = m.tags.clone();
            header.license = m.license();
        }

        header
    }

    /// Render as a front-matter block, including both delimiters and a trailing newline.
    pub fn render(&self) -> Result<String> {
        let Value::Object(fields) = serde_json::to_value(self)? else {
            return Err(ProvenanceError::Other("header did not serialize to a map".into()));
        };

        let mut out = String::from(DELIMITER);
        out.push('\n');
        for key in HEADER_FIELDS {
            let value = fields.get(*key).unwrap_or(&Value::Null);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&serde_json::to_string(value)?);
            out.push('\n');
        }
        out.push_str(DELIMITER);
        out.push('\n');
        Ok(out)
    }

    /// Parse the front matter at the start of `document`.
    ///
    /// Unknown keys are ignored. `provider` is matched case-insensitively.
    pub fn parse(document: &str) -> Result<Self> {
        let block = front_matter(document)
            .ok_or_else(|| ProvenanceError::parse("document has no front matter"))?;

        let mut fields = Map::new();
        for line in block.lines() {
            let Some((key, raw)) = line.split_once(':') else {
                continue;
            };
            let (key, raw) = (key.trim(), raw.trim());
            if key.is_empty() || key.starts_with('#') {
                continue;
            }

            let value = if key == "provider" {
                let text = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string());
                let provider: Provider = text.parse().map_err(ProvenanceError::parse)?;
                Value::String(provider.as_str().to_string())
            } else if raw.is_empty() {
                Value::Null
            } else {
                match serde_json::from_str(raw) {
                    Ok(Value::Number(_) | Value::Bool(_)) if TEXT_FIELDS.contains(&key) => {
                        Value::String(raw.to_string())
                    }
                    Ok(value) => value,
                    Err(_) => Value::String(raw.to_string()),
                }
            };
            fields.insert(key.to_string(), value);
        }

        serde_json::from_value(Value::Object(fields)).map_err(|e| ProvenanceError::Parse {
            message: format!("invalid provenance header: {}", e),
            source: Some(e),
        })
    }
}

/// Text between the opening and closing delimiter lines, if the document starts with one.
fn front_matter(document: &str) -> Option<&str> {
    let rest = document.trim_start_matches('\u{feff}');
    let rest = rest
        .strip_prefix(DELIMITER)?
        .strip_prefix('\n')
        .or_else(|| rest.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

/// The provider the user wrote into `header`, if it differs from what was emitted.
pub fn detect_provider_override(header: &ProvenanceHeader, emitted: Provider) -> Option<Provider> {
    (header.provider != emitted).then_some(header.provider)
}
