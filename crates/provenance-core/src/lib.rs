//! Provenance Core - resolve local AI model files to registry metadata.
//!
//! Given a model file, this crate works out which CivitAI or HuggingFace
//! record it came from. Files are fingerprinted by content, looked up by hash
//! where the registry supports it, and otherwise matched by fuzzy name search.
//! Results are cached per session and concurrent lookups of the same file are
//! collapsed into one.
//!
//! # Example
//!
//! ```rust,ignore
//! use provenance_core::{ArtifactTree, MetadataResolver, NoteSink, ProvenanceConfig, TreeResolver};
//!
//! #[tokio::main]
//! async fn main() -> provenance_core::Result<()> {
//!     let config = ProvenanceConfig::load(&ProvenanceConfig::default_path().unwrap())?;
//!     let resolver = MetadataResolver::new(&config)?;
//!
//!     let tree = ArtifactTree::scan("/path/to/models")?;
//!     let sink = NoteSink::new("/path/to/notes").with_models_root("/path/to/models");
//!     let report = TreeResolver::new(resolver).resolve_tree(&tree, &sink, false).await;
//!     println!("{} notes written", report.emitted);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod header;
pub mod metadata;
pub mod naming;
pub mod notes;
pub mod registry;
pub mod resolver;
pub mod tree;

// Re-export commonly used types
pub use config::{DeviceSettings, PerPlatform, Platform, ProvenanceConfig, RegistrySettings};
pub use error::{ErrorKind, ProvenanceError, Result};
pub use fingerprint::{compute_fingerprint, Fingerprint, FingerprintMode, Fingerprinter};
pub use header::{detect_provider_override, OverrideRequest, ProvenanceHeader};
pub use metadata::{Artifact, Provider, RegistryRecord, Relationships, ResolvedMetadata};
pub use naming::{is_model_file, SearchVariations};
pub use notes::NoteSink;
pub use registry::{
    registries_from_config, registries_with_fetcher, Capability, CivitaiClient, DynRegistryClient,
    HttpFetch, HuggingFaceClient, RegistryClient,
};
pub use resolver::{MetadataResolver, ResolverStats};
pub use tree::{ArtifactSink, ArtifactState, ArtifactTree, Notice, Severity, TreeReport, TreeResolver};
