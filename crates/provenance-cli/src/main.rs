//! Provenance CLI - resolve local model files against CivitAI and HuggingFace.
//!
//! Logs go to stderr; command results (JSON, variation lists) go to stdout.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use provenance_core::{
    registries_from_config, Artifact, ArtifactTree, MetadataResolver, NoteSink, Provider,
    ProvenanceConfig, SearchVariations, Severity, TreeResolver,
};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "provenance")]
#[command(about = "Find where local AI model files came from")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve every model file under a directory and write notes
    Scan {
        /// Models directory (defaults to the configured models root)
        dir: Option<PathBuf>,

        /// Notes directory (defaults to the configured notes dir)
        #[arg(long)]
        notes: Option<PathBuf>,

        /// Re-resolve and rewrite notes that already exist
        #[arg(long)]
        refresh: bool,
    },
    /// Resolve one model file and print the result as JSON
    Resolve {
        file: PathBuf,

        /// Skip the session cache
        #[arg(long)]
        force: bool,
    },
    /// Fetch a registry record by id and print it as JSON
    Lookup {
        /// civitai or huggingface
        provider: Provider,

        id: String,

        /// Fetch a specific version instead of the model (a CivitAI version id
        /// or a HuggingFace revision)
        #[arg(long)]
        version: Option<String>,
    },
    /// Print the name-search variations generated for a filename
    Variations { filename: String },
}

fn init_logging(debug: bool, json: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ProvenanceConfig> {
    match path.or_else(ProvenanceConfig::default_path) {
        Some(path) => ProvenanceConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(ProvenanceConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.json_logs);
    let config = load_config(cli.config)?;

    match cli.command {
        Command::Scan {
            dir,
            notes,
            refresh,
        } => scan(&config, dir, notes, refresh).await,
        Command::Resolve { file, force } => {
            if !file.is_file() {
                bail!("{} is not a file", file.display());
            }
            let resolver = MetadataResolver::new(&config)?;
            let resolved = resolver.resolve(&Artifact::new(file), force).await;
            println!("{}", serde_json::to_string_pretty(&*resolved)?);
            Ok(())
        }
        Command::Lookup {
            provider,
            id,
            version,
        } => {
            let registries = registries_from_config(&config)?;
            let client = registries
                .iter()
                .find(|c| c.provider() == provider)
                .ok_or_else(|| anyhow!("{} is not enabled", provider))?;
            let record = match version {
                Some(version) => {
                    client
                        .get_version_by_id(&version_lookup_id(provider, &id, &version))
                        .await?
                }
                None => client.get_by_id(&id).await?,
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Variations { filename } => {
            for variation in SearchVariations::from_filename(&filename) {
                println!("{}", variation);
            }
            Ok(())
        }
    }
}

/// Version reference in the form the registry's version lookup expects.
///
/// HuggingFace revisions belong to a repo (`owner/name@rev`); CivitAI version
/// ids are global.
fn version_lookup_id(provider: Provider, id: &str, version: &str) -> String {
    match provider {
        Provider::HuggingFace => format!("{}@{}", id, version),
        _ => version.to_string(),
    }
}

async fn scan(
    config: &ProvenanceConfig,
    dir: Option<PathBuf>,
    notes: Option<PathBuf>,
    refresh: bool,
) -> Result<()> {
    let device = config.device();
    let dir = dir
        .or_else(|| device.models_root.clone())
        .ok_or_else(|| anyhow!("no models directory given or configured"))?;
    let notes = notes
        .or_else(|| device.notes_dir.clone())
        .ok_or_else(|| anyhow!("no notes directory given or configured"))?;

    let tree = ArtifactTree::scan(&dir)?;
    info!("Found {} model files under {}", tree.len(), dir.display());

    let resolver = MetadataResolver::new(config)?;
    let sink = NoteSink::new(&notes).with_models_root(&dir);
    let report = TreeResolver::new(resolver.clone())
        .resolve_tree(&tree, &sink, refresh)
        .await;

    for notice in &report.notices {
        match notice.severity {
            Severity::Info => info!("{}", notice.message),
            Severity::Warning => warn!("{}", notice.message),
            Severity::Error => error!("{}", notice.message),
        }
    }

    let stats = resolver.stats();
    println!(
        "{} notes written, {} already present, {} unmatched, {} failed ({} registry resolutions)",
        report.emitted,
        report.skipped,
        report.not_found,
        report.emit_failures,
        stats.resolutions_started
    );
    Ok(())
}
