//! Markdown note per resolved artifact.
//!
//! Notes mirror the layout of the models directory: `sdxl/model.safetensors`
//! gets `sdxl/model.safetensors.md` under the notes directory. A file outside
//! the models root is named after its full file name plus a short hash of its
//! path. Each note starts with the provenance header. The body ends with a marker comment recording what was
//! emitted, so a later refresh can tell when the user edited the `provider`
//! field by hand.

use crate::error::{ProvenanceError, Result};
use crate::header::{detect_provider_override, OverrideRequest, ProvenanceHeader};
use crate::metadata::{Artifact, Provider, ResolvedMetadata};
use crate::tree::ArtifactSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const NOTE_EXTENSION: &str = "md";
const MARKER_PREFIX: &str = "<!-- provenance: ";
const MARKER_SUFFIX: &str = " -->";
/// Hex digits of the path hash used for notes outside the models root.
const PATH_HASH_LEN: usize = 8;

/// What a note recorded when it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedMarker {
    pub provider: Provider,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl EmittedMarker {
    fn render(&self) -> Result<String> {
        Ok(format!(
            "{}{}{}",
            MARKER_PREFIX,
            serde_json::to_string(self)?,
            MARKER_SUFFIX
        ))
    }

    /// Last marker line in `document`, if any.
    fn find(document: &str) -> Option<Self> {
        document.lines().rev().find_map(|line| {
            let json = line
                .trim()
                .strip_prefix(MARKER_PREFIX)?
                .strip_suffix(MARKER_SUFFIX)?;
            serde_json::from_str(json).ok()
        })
    }
}

/// Writes one markdown note per artifact into a notes directory.
#[derive(Debug)]
pub struct NoteSink {
    notes_dir: PathBuf,
    models_root: Option<PathBuf>,
    writes: AtomicU64,
}

impl NoteSink {
    pub fn new(notes_dir: impl Into<PathBuf>) -> Self {
        Self {
            notes_dir: notes_dir.into(),
            models_root: None,
            writes: AtomicU64::new(0),
        }
    }

    /// Mirror the directory layout below `root` into the notes directory.
    pub fn with_models_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.models_root = Some(root.into());
        self
    }

    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    /// Where the note for `artifact` lives. Distinct artifacts never share a note.
    pub fn note_path(&self, artifact: &Artifact) -> PathBuf {
        let note_name = format!("{}.{}", artifact.filename, NOTE_EXTENSION);

        let relative = self
            .models_root
            .as_deref()
            .and_then(|root| artifact.local_path.strip_prefix(root).ok())
            .filter(|rel| {
                rel.file_name().is_some()
                    && rel.components().all(|c| matches!(c, Component::Normal(_)))
            });

        match relative {
            Some(rel) => self.notes_dir.join(rel).with_file_name(note_name),
            None => {
                let digest = hex::encode(Sha256::digest(
                    artifact.local_path.to_string_lossy().as_bytes(),
                ));
                self.notes_dir.join(format!(
                    "{}.{}.{}",
                    artifact.filename,
                    &digest[..PATH_HASH_LEN],
                    NOTE_EXTENSION
                ))
            }
        }
    }

    /// Full note text for a resolution.
    pub fn render_note(resolved: &ResolvedMetadata) -> Result<String> {
        let header = ProvenanceHeader::from_resolved(resolved);
        let mut note = header.render()?;

        let title = resolved
            .record()
            .map(|r| r.name().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| resolved.artifact().stem().to_string());
        note.push_str(&format!("\n# {}\n\n", title));

        if let Some(source) = &header.source {
            note.push_str(&format!("Source: <{}>\n", source));
        }
        if let Some(base) = &header.relationship_base_model {
            note.push_str(&format!("Base model: {}\n", base));
        }
        if let Some(fp) = resolved.fingerprint() {
            note.push_str(&format!("Fingerprint ({:?}): `{}`\n", fp.mode, fp.value));
        }

        let marker = EmittedMarker {
            provider: header.provider,
            model_id: header.model_id.clone(),
        };
        note.push('\n');
        note.push_str(&marker.render()?);
        note.push('\n');
        Ok(note)
    }

    /// Header and marker of an existing note. `Ok(None)` when there is no note.
    pub async fn read_note(
        &self,
        artifact: &Artifact,
    ) -> Result<Option<(ProvenanceHeader, Option<EmittedMarker>)>> {
        let path = self.note_path(artifact);
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(document) => document,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProvenanceError::io_with_path(e, path)),
        };
        let header = ProvenanceHeader::parse(&document)?;
        Ok(Some((header, EmittedMarker::find(&document))))
    }

    /// Write to a temp file next to the target, then rename over it.
    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProvenanceError::io_with_path(e, parent))?;
        }

        let n = self.writes.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.{}.{}.tmp", NOTE_EXTENSION, std::process::id(), n));

        if let Err(e) = tokio::fs::write(&temp_path, contents).await {
            return Err(ProvenanceError::io_with_path(e, &temp_path));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ProvenanceError::io_with_path(e, path));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactSink for NoteSink {
    async fn is_materialized(&self, artifact: &Artifact) -> bool {
        tokio::fs::try_exists(self.note_path(artifact))
            .await
            .unwrap_or(false)
    }

    async fn emit(&self, artifact: &Artifact, resolved: &ResolvedMetadata) -> Result<()> {
        let path = self.note_path(artifact);
        let note = Self::render_note(resolved)?;
        self.write_atomic(&path, &note).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn provider_override(&self, artifact: &Artifact) -> Option<OverrideRequest> {
        let (header, marker) = match self.read_note(artifact).await {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                warn!("Ignoring unreadable note for {}: {}", artifact.filename, e);
                return None;
            }
        };
        let marker = marker?;
        let provider = detect_provider_override(&header, marker.provider)?;

        // An id copied over from the old registry means nothing to the new one.
        let model_id = header.model_id.filter(|id| Some(id) != marker.model_id.as_ref());
        Some(OverrideRequest { provider, model_id })
    }
}
