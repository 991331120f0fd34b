//! Resolution data model: artifacts, providers, registry records and the
//! canonical [`ResolvedMetadata`] snapshot.

use crate::fingerprint::Fingerprint;
use crate::registry::civitai::CivitaiModel;
use crate::registry::huggingface::HuggingFaceModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A local model file whose registry provenance is not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub local_path: PathBuf,
    pub filename: String,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let local_path = path.into();
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            local_path,
            filename,
        }
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }
}

/// Registry a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    HuggingFace,
    Civitai,
    Unknown,
}

impl Provider {
    /// Fixed lookup priority for resolution.
    pub const PRIORITY: [Provider; 2] = [Provider::HuggingFace, Provider::Civitai];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "huggingface",
            Provider::Civitai => "civitai",
            Provider::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Provider::HuggingFace),
            "civitai" => Ok(Provider::Civitai),
            "unknown" | "" => Ok(Provider::Unknown),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Raw provider-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "record", rename_all = "lowercase")]
pub enum RegistryRecord {
    Civitai(CivitaiModel),
    HuggingFace(HuggingFaceModel),
}

impl RegistryRecord {
    pub fn provider(&self) -> Provider {
        match self {
            RegistryRecord::Civitai(_) => Provider::Civitai,
            RegistryRecord::HuggingFace(_) => Provider::HuggingFace,
        }
    }

    /// Registry-unique identifier used to merge search results.
    pub fn registry_id(&self) -> String {
        match self {
            RegistryRecord::Civitai(m) => m.id.to_string(),
            RegistryRecord::HuggingFace(m) => m.id.clone(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RegistryRecord::Civitai(m) => &m.name,
            RegistryRecord::HuggingFace(m) => m.name(),
        }
    }

    /// Canonical web page for the record.
    pub fn canonical_url(&self) -> String {
        match self {
            RegistryRecord::Civitai(m) => m.canonical_url(),
            RegistryRecord::HuggingFace(m) => m.canonical_url(),
        }
    }

    pub fn base_model(&self) -> Option<String> {
        match self {
            RegistryRecord::Civitai(m) => m.base_model().map(String::from),
            RegistryRecord::HuggingFace(m) => m.base_model(),
        }
    }
}

/// Links from a resolved model to related models.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    pub base_model: Option<String>,
}

/// Canonical result of resolving one artifact.
///
/// `provider` always agrees with the populated record: `Unknown` carries no
/// record, the other providers carry exactly their own. Deserialization
/// rejects values that break this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResolvedMetadata")]
pub struct ResolvedMetadata {
    artifact: Artifact,
    fingerprint: Option<Fingerprint>,
    provider: Provider,
    civitai_record: Option<CivitaiModel>,
    huggingface_record: Option<HuggingFaceModel>,
    relationships: Relationships,
    verified: bool,
    resolved_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawResolvedMetadata {
    artifact: Artifact,
    fingerprint: Option<Fingerprint>,
    provider: Provider,
    civitai_record: Option<CivitaiModel>,
    huggingface_record: Option<HuggingFaceModel>,
    #[serde(default)]
    relationships: Relationships,
    verified: bool,
    resolved_at: DateTime<Utc>,
}

impl TryFrom<RawResolvedMetadata> for ResolvedMetadata {
    type Error = String;

    fn try_from(raw: RawResolvedMetadata) -> Result<Self, Self::Error> {
        let populated = (raw.civitai_record.is_some(), raw.huggingface_record.is_some());
        let consistent = match raw.provider {
            Provider::Unknown => populated == (false, false) && !raw.verified,
            Provider::Civitai => populated == (true, false),
            Provider::HuggingFace => populated == (false, true),
        };
        if !consistent {
            return Err(format!(
                "provider '{}' does not match the populated registry record",
                raw.provider
            ));
        }
        Ok(Self {
            artifact: raw.artifact,
            fingerprint: raw.fingerprint,
            provider: raw.provider,
            civitai_record: raw.civitai_record,
            huggingface_record: raw.huggingface_record,
            relationships: raw.relationships,
            verified: raw.verified,
            resolved_at: raw.resolved_at,
        })
    }
}

impl ResolvedMetadata {
    /// No registry matched.
    pub fn unknown(artifact: Artifact, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            artifact,
            fingerprint,
            provider: Provider::Unknown,
            civitai_record: None,
            huggingface_record: None,
            relationships: Relationships::default(),
            verified: false,
            resolved_at: Utc::now(),
        }
    }

    /// Build from the canonical registry record. `verified` marks a content-hash match.
    pub fn from_record(
        artifact: Artifact,
        fingerprint: Option<Fingerprint>,
        record: RegistryRecord,
        verified: bool,
    ) -> Self {
        let relationships = Relationships {
            base_model: record.base_model(),
        };
        let provider = record.provider();
        let (civitai_record, huggingface_record) = match record {
            RegistryRecord::Civitai(m) => (Some(m), None),
            RegistryRecord::HuggingFace(m) => (None, Some(m)),
        };
        Self {
            artifact,
            fingerprint,
            provider,
            civitai_record,
            huggingface_record,
            relationships,
            verified,
            resolved_at: Utc::now(),
        }
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn is_unknown(&self) -> bool {
        self.provider == Provider::Unknown
    }

    pub fn civitai_record(&self) -> Option<&CivitaiModel> {
        self.civitai_record.as_ref()
    }

    pub fn huggingface_record(&self) -> Option<&HuggingFaceModel> {
        self.huggingface_record.as_ref()
    }

    /// The populated record, re-wrapped.
    pub fn record(&self) -> Option<RegistryRecord> {
        match (&self.civitai_record, &self.huggingface_record) {
            (Some(m), _) => Some(RegistryRecord::Civitai(m.clone())),
            (_, Some(m)) => Some(RegistryRecord::HuggingFace(m.clone())),
            _ => None,
        }
    }

    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn civitai_model(id: u64) -> CivitaiModel {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "CyberRealistic",
            "modelVersions": [{"id": 9, "name": "v5", "baseModel": "SD 1.5"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_artifact_from_path() {
        let artifact = Artifact::new("/models/sd/cyberRealistic_v5.safetensors");
        assert_eq!(artifact.filename, "cyberRealistic_v5.safetensors");
        assert_eq!(artifact.stem(), "cyberRealistic_v5");
    }

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!("HuggingFace".parse::<Provider>(), Ok(Provider::HuggingFace));
        assert_eq!(" civitai ".parse::<Provider>(), Ok(Provider::Civitai));
        assert!("modelscope".parse::<Provider>().is_err());
        assert_eq!(Provider::Civitai.to_string(), "civitai");
        assert_eq!(
            serde_json::to_string(&Provider::HuggingFace).unwrap(),
            "\"huggingface\""
        );
    }

    #[test]
    fn test_provider_matches_record() {
        let artifact = Artifact::new("/m/a.safetensors");
        let resolved = ResolvedMetadata::from_record(
            artifact.clone(),
            None,
            RegistryRecord::Civitai(civitai_model(123)),
            false,
        );
        assert_eq!(resolved.provider(), Provider::Civitai);
        assert!(resolved.civitai_record().is_some());
        assert!(resolved.huggingface_record().is_none());
        assert_eq!(resolved.relationships().base_model.as_deref(), Some("SD 1.5"));

        let unknown = ResolvedMetadata::unknown(artifact, None);
        assert!(unknown.is_unknown());
        assert!(unknown.record().is_none());
    }

    #[test]
    fn test_deserialize_enforces_provider_record_agreement() {
        let artifact = Artifact::new("/m/a.safetensors");
        let resolved = ResolvedMetadata::from_record(
            artifact.clone(),
            None,
            RegistryRecord::Civitai(civitai_model(123)),
            true,
        );
        let json = serde_json::to_value(&resolved).unwrap();
        let back: ResolvedMetadata = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, resolved);

        let mut missing_record = json.clone();
        missing_record["civitai_record"] = serde_json::Value::Null;
        assert!(serde_json::from_value::<ResolvedMetadata>(missing_record).is_err());

        let mut wrong_provider = json;
        wrong_provider["provider"] = serde_json::json!("huggingface");
        assert!(serde_json::from_value::<ResolvedMetadata>(wrong_provider).is_err());

        let mut unknown = serde_json::to_value(ResolvedMetadata::unknown(artifact, None)).unwrap();
        assert!(serde_json::from_value::<ResolvedMetadata>(unknown.clone()).is_ok());
        unknown["civitai_record"] = serde_json::to_value(civitai_model(1)).unwrap();
        assert!(serde_json::from_value::<ResolvedMetadata>(unknown).is_err());
    }
}
