//! Resolution of a whole directory tree of model files.
//!
//! Directories are visited breadth-first. Within one directory every artifact
//! that needs work is resolved concurrently, and the pass waits for all of them
//! before moving on, which bounds outstanding requests to one directory's worth.
//!
//! There is no way to cancel a pass once it has started.

use crate::error::{ProvenanceError, Result};
use crate::header::OverrideRequest;
use crate::metadata::{Artifact, Provider, ResolvedMetadata};
use crate::naming::is_model_file;
use crate::resolver::MetadataResolver;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One directory and the model files directly inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirectory {
    pub path: PathBuf,
    /// Distance from the scan root (the root itself is 0).
    pub depth: usize,
    pub artifacts: Vec<Artifact>,
}

/// Model files under a root, grouped by directory in breadth-first order.
#[derive(Debug, Clone, Default)]
pub struct ArtifactTree {
    root: PathBuf,
    directories: Vec<ArtifactDirectory>,
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

impl ArtifactTree {
    /// Walk `root` for model files. Hidden files and directories are skipped
    /// and unreadable entries are logged and ignored.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ProvenanceError::FileNotFound(root.to_path_buf()));
        }

        // Keyed by (depth, path) so iteration is already breadth-first.
        let mut grouped: BTreeMap<(usize, PathBuf), Vec<Artifact>> = BTreeMap::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_model_file(entry.file_name()) {
                continue;
            }
            let Some(parent) = entry.path().parent() else {
                continue;
            };
            grouped
                .entry((entry.depth() - 1, parent.to_path_buf()))
                .or_default()
                .push(Artifact::new(entry.path()));
        }

        let directories: Vec<_> = grouped
            .into_iter()
            .map(|((depth, path), artifacts)| ArtifactDirectory {
                path,
                depth,
                artifacts,
            })
            .collect();

        debug!(
            "Scanned {}: {} model files in {} directories",
            root.display(),
            directories.iter().map(|d| d.artifacts.len()).sum::<usize>(),
            directories.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            directories,
        })
    }

    /// Build a tree from directories already in visiting order.
    pub fn from_directories(root: impl Into<PathBuf>, directories: Vec<ArtifactDirectory>) -> Self {
        Self {
            root: root.into(),
            directories,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directories(&self) -> &[ArtifactDirectory] {
        &self.directories
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.directories.iter().flat_map(|d| d.artifacts.iter())
    }

    pub fn len(&self) -> usize {
        self.directories.iter().map(|d| d.artifacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Downstream consumer of resolutions (for example a note writer).
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Whether output for this artifact already exists.
    async fn is_materialized(&self, artifact: &Artifact) -> bool;

    /// Persist the resolution of one artifact.
    async fn emit(&self, artifact: &Artifact, resolved: &ResolvedMetadata) -> Result<()>;

    /// A registry the user chose by editing previously emitted output.
    async fn provider_override(&self, _artifact: &Artifact) -> Option<OverrideRequest> {
        None
    }
}

/// Final state of one artifact after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Output already existed (or was written earlier in the same pass).
    Skipped,
    /// No registry matched.
    NotFound,
    /// Matched, but emission failed.
    Found,
    /// Matched and emitted in this pass.
    Materialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A message meant for the user rather than the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub path: PathBuf,
    pub state: ArtifactState,
    pub provider: Option<Provider>,
}

/// Summary of one tree pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeReport {
    pub artifacts: Vec<ArtifactReport>,
    pub skipped: usize,
    pub resolved: usize,
    pub not_found: usize,
    pub emitted: usize,
    pub emit_failures: usize,
    pub notices: Vec<Notice>,
}

impl TreeReport {
    pub fn state_of(&self, path: &Path) -> Option<ArtifactState> {
        self.artifacts
            .iter()
            .find(|a| a.path == path)
            .map(|a| a.state)
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome.state {
            ArtifactState::Skipped => self.skipped += 1,
            ArtifactState::NotFound => {
                self.resolved += 1;
                self.not_found += 1;
            }
            ArtifactState::Found => {
                self.resolved += 1;
                self.emit_failures += 1;
            }
            ArtifactState::Materialized => {
                self.resolved += 1;
                self.emitted += 1;
            }
        }
        self.artifacts.push(ArtifactReport {
            path: outcome.path,
            state: outcome.state,
            provider: outcome.provider,
        });
        self.notices.extend(outcome.notices);
    }
}

struct Outcome {
    path: PathBuf,
    state: ArtifactState,
    provider: Option<Provider>,
    notices: Vec<Notice>,
}

/// Drives a [`MetadataResolver`] over an [`ArtifactTree`].
#[derive(Debug, Clone)]
pub struct TreeResolver {
    resolver: MetadataResolver,
}

impl TreeResolver {
    pub fn new(resolver: MetadataResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    /// Resolve every artifact of `tree` and hand matches to `sink`.
    ///
    /// Outside a refresh, artifacts the sink already materialized are not
    /// resolved at all. A refresh forces resolution, honours provider
    /// overrides from the sink and re-emits over existing output. Each artifact
    /// is emitted at most once per pass; emit failures are reported and the pass
    /// continues.
    pub async fn resolve_tree<S>(&self, tree: &ArtifactTree, sink: &S, is_refresh: bool) -> TreeReport
    where
        S: ArtifactSink + ?Sized,
    {
        let emitted = Mutex::new(HashSet::new());
        let mut report = TreeReport::default();

        for directory in tree.directories() {
            debug!(
                "Resolving {} artifacts in {}",
                directory.artifacts.len(),
                directory.path.display()
            );
            let outcomes = join_all(
                directory
                    .artifacts
                    .iter()
                    .map(|artifact| self.process(artifact, sink, is_refresh, &emitted)),
            )
            .await;
            for outcome in outcomes {
                report.record(outcome);
            }
        }

        if report.not_found > 0 {
            report.notices.push(Notice::new(
                Severity::Info,
                format!("{} model files had no registry match", report.not_found),
            ));
        }

        info!(
            "Tree pass over {}: {} resolved, {} emitted, {} skipped, {} unmatched, {} emit failures",
            tree.root().display(),
            report.resolved,
            report.emitted,
            report.skipped,
            report.not_found,
            report.emit_failures
        );
        report
    }

    async fn process<S>(
        &self,
        artifact: &Artifact,
        sink: &S,
        is_refresh: bool,
        emitted: &Mutex<HashSet<PathBuf>>,
    ) -> Outcome
    where
        S: ArtifactSink + ?Sized,
    {
        let mut notices = Vec::new();
        let outcome = |state, provider, notices| Outcome {
            path: artifact.local_path.clone(),
            state,
            provider,
            notices,
        };

        if !is_refresh && sink.is_materialized(artifact).await {
            debug!("{} already materialized, skipping", artifact.filename);
            return outcome(ArtifactState::Skipped, None, notices);
        }

        let resolved = match self.resolve_one(artifact, sink, is_refresh).await {
            Ok(resolved) => resolved,
            Err(notice) => {
                notices.push(notice);
                self.resolver.resolve(artifact, true).await
            }
        };

        if resolved.is_unknown() {
            return outcome(ArtifactState::NotFound, Some(Provider::Unknown), notices);
        }
        let provider = Some(resolved.provider());

        if !emitted.lock().await.insert(artifact.local_path.clone()) {
            debug!("{} already emitted in this pass", artifact.filename);
            return outcome(ArtifactState::Skipped, provider, notices);
        }

        match sink.emit(artifact, &resolved).await {
            Ok(()) => outcome(ArtifactState::Materialized, provider, notices),
            Err(e) => {
                warn!("Failed to emit {}: {}", artifact.filename, e);
                emitted.lock().await.remove(&artifact.local_path);
                notices.push(Notice::new(
                    Severity::Error,
                    format!("Could not save metadata for {}: {}", artifact.filename, e),
                ));
                outcome(ArtifactState::Found, provider, notices)
            }
        }
    }

    /// Plain or override resolution. An `Err` carries the notice for a failed
    /// override, after which the caller falls back to a forced resolution.
    async fn resolve_one<S>(
        &self,
        artifact: &Artifact,
        sink: &S,
        is_refresh: bool,
    ) -> std::result::Result<Arc<ResolvedMetadata>, Notice>
    where
        S: ArtifactSink + ?Sized,
    {
        if is_refresh {
            if let Some(request) = sink.provider_override(artifact).await {
                info!(
                    "{} was reassigned to {}, re-resolving",
                    artifact.filename, request.provider
                );
                return self
                    .resolver
                    .resolve_with_override(artifact, request.provider, request.model_id.as_deref())
                    .await
                    .map_err(|e| {
                        warn!("Override for {} failed: {}", artifact.filename, e);
                        Notice::new(
                            Severity::Warning,
                            format!(
                                "Could not use {} for {}: {}",
                                request.provider, artifact.filename, e
                            ),
                        )
                    });
            }
        }
        Ok(self.resolver.resolve(artifact, is_refresh).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvenanceConfig;
    use crate::fingerprint::Fingerprinter;
    use crate::registry::registries_with_fetcher;
    use crate::registry::testing::MockFetcher;
    use serde_json::json;
    use std::fs;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        materialized: StdMutex<HashSet<PathBuf>>,
        emitted: StdMutex<Vec<(PathBuf, Provider)>>,
        failing: HashSet<PathBuf>,
        overrides: Vec<(PathBuf, OverrideRequest)>,
    }

    impl RecordingSink {
        fn emitted_paths(&self) -> Vec<PathBuf> {
            self.emitted
                .lock()
                .unwrap()
                .iter()
                .map(|(p, _)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ArtifactSink for RecordingSink {
        async fn is_materialized(&self, artifact: &Artifact) -> bool {
            self.materialized
                .lock()
                .unwrap()
                .contains(&artifact.local_path)
        }

        async fn emit(&self, artifact: &Artifact, resolved: &ResolvedMetadata) -> Result<()> {
            if self.failing.contains(&artifact.local_path) {
                return Err(ProvenanceError::Other("disk full".into()));
            }
            self.emitted
                .lock()
                .unwrap()
                .push((artifact.local_path.clone(), resolved.provider()));
            self.materialized
                .lock()
                .unwrap()
                .insert(artifact.local_path.clone());
            Ok(())
        }

        async fn provider_override(&self, artifact: &Artifact) -> Option<OverrideRequest> {
            self.overrides
                .iter()
                .find(|(p, _)| *p == artifact.local_path)
                .map(|(_, r)| r.clone())
        }
    }

    fn civitai_resolver(fetcher: &MockFetcher) -> MetadataResolver {
        let mut config = ProvenanceConfig {
            min_request_interval_ms: 0,
            ..ProvenanceConfig::default()
        };
        config.huggingface.enabled = false;
        MetadataResolver::with_registries(
            registries_with_fetcher(&config, fetcher.shared()),
            Fingerprinter::new(config.fingerprint),
        )
    }

    fn every_query_matches(fetcher: &MockFetcher) {
        fetcher.respond(
            "/v1/models",
            &[],
            json!({"items": [{"id": 1, "name": "Match"}]}),
        );
    }

    fn tree_of(paths: &[&str]) -> ArtifactTree {
        ArtifactTree::from_directories(
            "/lib",
            vec![ArtifactDirectory {
                path: PathBuf::from("/lib"),
                depth: 0,
                artifacts: paths.iter().map(|p| Artifact::new(*p)).collect(),
            }],
        )
    }

    #[test]
    fn test_scan_groups_breadth_first_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sd/loras")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::create_dir_all(root.join("llm")).unwrap();
        for file in [
            "top.safetensors",
            "notes.md",
            ".hidden.safetensors",
            "sd/b_model.ckpt",
            "sd/a_model.safetensors",
            "sd/loras/detail.safetensors",
            ".cache/cached.safetensors",
            "llm/llama.Q4_K_M.gguf",
        ] {
            fs::write(root.join(file), b"x").unwrap();
        }

        let tree = ArtifactTree::scan(root).unwrap();
        let layout: Vec<(usize, PathBuf, Vec<String>)> = tree
            .directories()
            .iter()
            .map(|d| {
                (
                    d.depth,
                    d.path.clone(),
                    d.artifacts.iter().map(|a| a.filename.clone()).collect(),
                )
            })
            .collect();

        assert_eq!(
            layout,
            vec![
                (0, root.to_path_buf(), vec!["top.safetensors".to_string()]),
                (1, root.join("llm"), vec!["llama.Q4_K_M.gguf".to_string()]),
                (
                    1,
                    root.join("sd"),
                    vec!["a_model.safetensors".to_string(), "b_model.ckpt".to_string()]
                ),
                (2, root.join("sd/loras"), vec!["detail.safetensors".to_string()]),
            ]
        );
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_scan_missing_root() {
        let err = ArtifactTree::scan("/definitely/not/here").unwrap_err();
        assert!(matches!(err, ProvenanceError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_materialized_artifacts_are_not_resolved() {
        let fetcher = MockFetcher::new();
        every_query_matches(&fetcher);
        let resolver = civitai_resolver(&fetcher);
        let tree_resolver = TreeResolver::new(resolver.clone());

        let sink = RecordingSink::default();
        sink.materialized
            .lock()
            .unwrap()
            .insert(PathBuf::from("/lib/done_model.safetensors"));

        let tree = tree_of(&["/lib/done_model.safetensors", "/lib/new_model.safetensors"]);
        let report = tree_resolver.resolve_tree(&tree, &sink, false).await;

        assert_eq!(
            report.state_of(Path::new("/lib/done_model.safetensors")),
            Some(ArtifactState::Skipped)
        );
        assert_eq!(
            report.state_of(Path::new("/lib/new_model.safetensors")),
            Some(ArtifactState::Materialized)
        );
        assert_eq!(resolver.stats().resolutions_started, 1);
        assert!(resolver
            .cached(Path::new("/lib/done_model.safetensors"))
            .await
            .is_none());
        assert!(fetcher
            .queried_values("query")
            .iter()
            .all(|q| !q.to_lowercase().contains("done")));
        assert_eq!(sink.emitted_paths(), vec![PathBuf::from("/lib/new_model.safetensors")]);
    }

    #[tokio::test]
    async fn test_emit_failure_does_not_stop_siblings() {
        let fetcher = MockFetcher::new();
        every_query_matches(&fetcher);
        let tree_resolver = TreeResolver::new(civitai_resolver(&fetcher));

        let sink = RecordingSink {
            failing: HashSet::from([PathBuf::from("/lib/bad_model.safetensors")]),
            ..RecordingSink::default()
        };
        let tree = tree_of(&["/lib/bad_model.safetensors", "/lib/good_model.safetensors"]);
        let report = tree_resolver.resolve_tree(&tree, &sink, false).await;

        assert_eq!(report.emitted, 1);
        assert_eq!(report.emit_failures, 1);
        assert_eq!(
            report.state_of(Path::new("/lib/bad_model.safetensors")),
            Some(ArtifactState::Found)
        );
        assert!(report
            .notices
            .iter()
            .any(|n| n.severity == Severity::Error && n.message.contains("bad_model")));
        assert_eq!(sink.emitted_paths(), vec![PathBuf::from("/lib/good_model.safetensors")]);
    }

    #[tokio::test]
    async fn test_unknown_results_are_not_emitted() {
        let fetcher = MockFetcher::new();
        fetcher.respond("/v1/models", &[], json!({"items": []}));
        let tree_resolver = TreeResolver::new(civitai_resolver(&fetcher));
        let sink = RecordingSink::default();

        let report = tree_resolver
            .resolve_tree(&tree_of(&["/lib/mystery.safetensors"]), &sink, false)
            .await;

        assert_eq!(report.not_found, 1);
        assert!(sink.emitted_paths().is_empty());
        assert!(report.notices.iter().any(|n| n.severity == Severity::Info));
    }

    #[tokio::test]
    async fn test_duplicate_artifact_is_emitted_once() {
        let fetcher = MockFetcher::new();
        every_query_matches(&fetcher);
        let resolver = civitai_resolver(&fetcher);
        let tree_resolver = TreeResolver::new(resolver.clone());
        let sink = RecordingSink::default();

        let tree = tree_of(&["/lib/twice.safetensors", "/lib/twice.safetensors"]);
        let report = tree_resolver.resolve_tree(&tree, &sink, false).await;

        assert_eq!(sink.emitted_paths().len(), 1);
        assert_eq!(report.emitted, 1);
        assert_eq!(resolver.stats().resolutions_started, 1);
    }

    #[tokio::test]
    async fn test_refresh_resolves_and_reemits_materialized() {
        let fetcher = MockFetcher::new();
        every_query_matches(&fetcher);
        let resolver = civitai_resolver(&fetcher);
        let tree_resolver = TreeResolver::new(resolver.clone());
        let sink = RecordingSink::default();
        let tree = tree_of(&["/lib/some_model.safetensors"]);

        tree_resolver.resolve_tree(&tree, &sink, false).await;
        let again = tree_resolver.resolve_tree(&tree, &sink, false).await;
        assert_eq!(again.skipped, 1);

        let refreshed = tree_resolver.resolve_tree(&tree, &sink, true).await;
        assert_eq!(refreshed.emitted, 1);
        assert_eq!(sink.emitted_paths().len(), 2);
        assert_eq!(resolver.stats().resolutions_started, 2);
    }

    #[tokio::test]
    async fn test_refresh_applies_provider_override() {
        let fetcher = MockFetcher::new();
        fetcher.respond("/v1/models/55", &[], json!({"id": 55, "name": "Chosen"}));
        let resolver = civitai_resolver(&fetcher);
        let tree_resolver = TreeResolver::new(resolver.clone());

        let path = PathBuf::from("/lib/renamed.safetensors");
        let sink = RecordingSink {
            overrides: vec![(
                path.clone(),
                OverrideRequest {
                    provider: Provider::Civitai,
                    model_id: Some("55".into()),
                },
            )],
            ..RecordingSink::default()
        };

        let report = tree_resolver
            .resolve_tree(&tree_of(&["/lib/renamed.safetensors"]), &sink, true)
            .await;
        assert_eq!(report.emitted, 1);
        let cached = resolver.cached(&path).await.unwrap();
        assert_eq!(cached.civitai_record().unwrap().id, 55);
    }

    #[tokio::test]
    async fn test_failed_override_falls_back_with_warning() {
        let fetcher = MockFetcher::new();
        fetcher.respond("/v1/models", &[], json!({"items": []}));
        let tree_resolver = TreeResolver::new(civitai_resolver(&fetcher));

        let path = PathBuf::from("/lib/renamed.safetensors");
        let sink = RecordingSink {
            overrides: vec![(
                path.clone(),
                OverrideRequest {
                    provider: Provider::HuggingFace,
                    model_id: None,
                },
            )],
            ..RecordingSink::default()
        };

        let report = tree_resolver
            .resolve_tree(&tree_of(&["/lib/renamed.safetensors"]), &sink, true)
            .await;
        assert!(report.notices.iter().any(|n| n.severity == Severity::Warning));
        assert_eq!(report.state_of(&path), Some(ArtifactState::NotFound));
    }

    /// Sink whose checks and writes take `delay` and are logged in tokio time.
    struct SlowSink {
        delay: std::time::Duration,
        log: StdMutex<Vec<(PathBuf, &'static str, tokio::time::Instant)>>,
    }

    impl SlowSink {
        fn times(&self, event: &str, paths: &[&str]) -> Vec<tokio::time::Instant> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, e, _)| *e == event && paths.iter().any(|q| p == Path::new(q)))
                .map(|(_, _, t)| *t)
                .collect()
        }

        fn note(&self, artifact: &Artifact, event: &'static str) {
            self.log.lock().unwrap().push((
                artifact.local_path.clone(),
                event,
                tokio::time::Instant::now(),
            ));
        }
    }

    #[async_trait]
    impl ArtifactSink for SlowSink {
        async fn is_materialized(&self, artifact: &Artifact) -> bool {
            self.note(artifact, "check");
            tokio::time::sleep(self.delay).await;
            false
        }

        async fn emit(&self, artifact: &Artifact, _resolved: &ResolvedMetadata) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.note(artifact, "emitted");
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_siblings_overlap_and_levels_run_in_order() {
        let fetcher = MockFetcher::new();
        every_query_matches(&fetcher);
        let tree_resolver = TreeResolver::new(civitai_resolver(&fetcher));

        let delay = std::time::Duration::from_secs(1);
        let sink = SlowSink {
            delay,
            log: StdMutex::new(Vec::new()),
        };
        let level0 = ["/lib/first.safetensors", "/lib/second.safetensors"];
        let level1 = ["/lib/sub/third.safetensors"];
        let tree = ArtifactTree::from_directories(
            "/lib",
            vec![
                ArtifactDirectory {
                    path: PathBuf::from("/lib"),
                    depth: 0,
                    artifacts: level0.iter().map(|p| Artifact::new(*p)).collect(),
                },
                ArtifactDirectory {
                    path: PathBuf::from("/lib/sub"),
                    depth: 1,
                    artifacts: level1.iter().map(|p| Artifact::new(*p)).collect(),
                },
            ],
        );

        let start = tokio::time::Instant::now();
        let report = tree_resolver.resolve_tree(&tree, &sink, false).await;
        let elapsed = start.elapsed();
        assert_eq!(report.emitted, 3);

        // Both siblings were checked at once rather than one after the other.
        let checks = sink.times("check", &level0);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0], checks[1]);

        // The next level starts only once the previous one is fully done.
        let level0_done = sink.times("emitted", &level0).into_iter().max().unwrap();
        let level1_start = sink.times("check", &level1).into_iter().min().unwrap();
        assert!(level1_start >= level0_done);

        // Two levels of check + emit; a sequential walk would take 6 delays.
        assert!(elapsed >= delay * 4);
        assert!(elapsed < delay * 6);
    }
}
