//! Tessera CLI - command line interface for the storage engine.
//!
//! Stores, versions and inspects artifacts under a local data root, and
//! exposes the reference manager of versioned artifacts.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tessera_common::{Backend, Locator};
use tessera_engine::{EngineConfig, ResourceFilter, StorageEngine, StorageResource, StoreOptions};
use tessera_storage::{HeadState, RefManager, VersionedProvider};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - multi-backend artifact storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Data root (default: the platform data directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// JSON configuration file; overrides --root.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file and print its locator.
    Store {
        /// File to store.
        file: PathBuf,

        /// Backend: disk, memory, versioned, cloud or hybrid (default: chosen by size and type).
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Mime type (default: guessed from the file name).
        #[arg(long)]
        mime: Option<String>,

        /// Name recorded for the artifact (default: the file name).
        #[arg(short, long)]
        name: Option<String>,

        /// History message for versioned backends.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Write an artifact's content to a file or stdout.
    Get {
        locator: Locator,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Historical version to read instead of the current content.
        #[arg(long)]
        version: Option<String>,
    },

    /// Store a new version of a versioned artifact.
    Version {
        locator: Locator,

        /// File holding the new content.
        file: PathBuf,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the versions of an artifact, newest first.
    Versions { locator: Locator },

    /// Show an artifact's record.
    Info { locator: Locator },

    /// List recorded artifacts.
    List {
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Mime type prefix, e.g. "text/".
        #[arg(long)]
        mime: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete an artifact's content and record.
    Rm {
        locator: Locator,

        /// Keep the record after deleting the content.
        #[arg(long)]
        keep_record: bool,
    },

    /// Show storage statistics.
    Stats,

    /// Print the effective configuration.
    Config,

    /// Inspect and edit the references of a versioned artifact.
    Refs {
        locator: Locator,

        #[command(subcommand)]
        command: RefsCommand,
    },
}

#[derive(Subcommand)]
enum RefsCommand {
    /// List references, optionally only one kind ("heads", "tags").
    List {
        #[arg(short, long, default_value = "")]
        kind: String,
    },

    /// Resolve a reference to its object id.
    Read { name: String },

    /// Point a reference at an object id.
    Update { name: String, sha1: String },

    /// Create a symbolic reference.
    Symbolic { name: String, target: String },

    /// Delete a reference.
    Delete { name: String },

    /// Resolve HEAD.
    Head,

    /// Point HEAD at a branch, or detach it at an object id.
    SetHead {
        branch: Option<String>,

        #[arg(long, conflicts_with = "branch")]
        detached: Option<String>,
    },

    /// Show the current branch.
    Branch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Store {
            file,
            backend,
            mime,
            name,
            message,
        } => cmd_store(config, &file, backend, mime, name, message).await,

        Commands::Get {
            locator,
            output,
            version,
        } => cmd_get(config, &locator, output.as_deref(), version.as_deref()).await,

        Commands::Version {
            locator,
            file,
            message,
        } => cmd_version(config, &locator, &file, message.as_deref()).await,

        Commands::Versions { locator } => cmd_versions(config, &locator).await,

        Commands::Info { locator } => cmd_info(config, &locator).await,

        Commands::List {
            backend,
            mime,
            limit,
        } => cmd_list(config, backend, mime, limit).await,

        Commands::Rm {
            locator,
            keep_record,
        } => cmd_rm(config, &locator, keep_record).await,

        Commands::Stats => cmd_stats(config).await,

        Commands::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }

        Commands::Refs { locator, command } => cmd_refs(&config, &locator, command),
    }
}

/// Configuration from `--config`, else defaults under `--root` or the data directory.
fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> Result<EngineConfig> {
    if let Some(path) = path {
        return EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let root = match root {
        Some(root) => root,
        None => dirs::data_dir()
            .context("No platform data directory; pass --root")?
            .join("tessera"),
    };
    Ok(EngineConfig::with_root(root))
}

fn open_engine(config: EngineConfig) -> Result<StorageEngine> {
    let root = config.root.clone();
    StorageEngine::open(config)
        .with_context(|| format!("Failed to open storage at {}", root.display()))
}

async fn find(engine: &StorageEngine, locator: &Locator) -> Result<StorageResource> {
    engine
        .get(locator)
        .await?
        .with_context(|| format!("No artifact recorded as {}", locator))
}

/// Store a file.
async fn cmd_store(
    config: EngineConfig,
    file: &Path,
    backend: Option<Backend>,
    mime: Option<String>,
    name: Option<String>,
    message: Option<String>,
) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Source path has no file name; pass --name")?,
    };

    let engine = open_engine(config)?;
    let options = StoreOptions {
        mime_type: mime,
        message,
        cancel: None,
    };
    let resource = engine
        .store(Bytes::from(content), &file_name, backend, &options)
        .await
        .context("Failed to store file")?;

    println!("{}", resource.locator);
    info!(
        "{} stored on {} ({} bytes, sha256 {})",
        resource.file_name, resource.backend, resource.file_size, resource.checksum
    );
    Ok(())
}

/// Extract content.
async fn cmd_get(
    config: EngineConfig,
    locator: &Locator,
    output: Option<&Path>,
    version: Option<&str>,
) -> Result<()> {
    let engine = open_engine(config)?;
    let resource = find(&engine, locator).await?;

    let content = match version {
        Some(version) => engine.retrieve_version(&resource, version).await,
        None => engine.retrieve(&resource).await,
    }
    .context("Failed to read content")?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}", content.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Create a version.
async fn cmd_version(
    config: EngineConfig,
    locator: &Locator,
    file: &Path,
    message: Option<&str>,
) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let engine = open_engine(config)?;
    let resource = find(&engine, locator).await?;
    let updated = engine
        .create_version(&resource, Bytes::from(content), message)
        .await
        .context("Failed to create version")?;

    println!("{} is now at version {}", updated.locator, updated.version);
    Ok(())
}

async fn cmd_versions(config: EngineConfig, locator: &Locator) -> Result<()> {
    let engine = open_engine(config)?;
    let resource = find(&engine, locator).await?;
    let versions = engine
        .list_versions(&resource)
        .await
        .context("Failed to list versions")?;

    for version in versions {
        println!(
            "v{:<4} {}  {}  {}",
            version.sequence,
            version.version_id,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            version.message
        );
    }
    Ok(())
}

async fn cmd_info(config: EngineConfig, locator: &Locator) -> Result<()> {
    let engine = open_engine(config)?;
    let resource = find(&engine, locator).await?;
    println!("{}", serde_json::to_string_pretty(&resource)?);
    Ok(())
}

async fn cmd_list(
    config: EngineConfig,
    backend: Option<Backend>,
    mime: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let engine = open_engine(config)?;
    let filter = ResourceFilter {
        backend,
        mime_prefix: mime,
        limit,
        ..ResourceFilter::default()
    };
    let resources = engine.query(&filter).await?;

    if resources.is_empty() {
        println!("No artifacts.");
        return Ok(());
    }
    for resource in resources {
        println!(
            "{}  {:<9} v{:<3} {:>10}  {}",
            resource.locator,
            resource.backend,
            resource.version,
            resource.file_size,
            resource.file_name
        );
    }
    Ok(())
}

async fn cmd_rm(config: EngineConfig, locator: &Locator, keep_record: bool) -> Result<()> {
    let engine = open_engine(config)?;
    let resource = find(&engine, locator).await?;
    engine
        .delete(&resource)
        .await
        .context("Failed to delete content")?;
    if !keep_record {
        engine.forget(locator).await?;
    }
    println!("Removed {}", locator);
    Ok(())
}

async fn cmd_stats(config: EngineConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let stats = engine.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Reference commands work on the repository directly; no engine needed.
fn cmd_refs(config: &EngineConfig, locator: &Locator, command: RefsCommand) -> Result<()> {
    let provider = VersionedProvider::new(config.root.join("versioned"))?;
    let refs: RefManager = provider.refs(locator);

    match command {
        RefsCommand::List { kind } => {
            for name in refs.list_refs(&kind)? {
                println!("{}", name);
            }
        }
        RefsCommand::Read { name } => println!("{}", refs.read_ref(&name)?),
        RefsCommand::Update { name, sha1 } => {
            refs.update_ref(&name, &sha1)?;
            println!("{} -> {}", name, sha1);
        }
        RefsCommand::Symbolic { name, target } => {
            refs.create_symbolic(&name, &target)?;
            println!("{} -> {}", name, target);
        }
        RefsCommand::Delete { name } => {
            refs.delete_ref(&name)?;
            println!("Deleted {}", name);
        }
        RefsCommand::Head => println!("{}", refs.read_head()?),
        RefsCommand::SetHead { branch, detached } => match (branch, detached) {
            (_, Some(sha1)) => {
                refs.set_head_detached(&sha1)?;
                println!("HEAD detached at {}", sha1);
            }
            (Some(branch), None) => {
                refs.set_head(&branch)?;
                println!("HEAD -> {}", branch);
            }
            (None, None) => anyhow::bail!("Pass a branch or --detached <sha1>"),
        },
        RefsCommand::Branch => match refs.current_branch()? {
            HeadState::Branch(branch) => println!("{}", branch),
            HeadState::Detached(id) => println!("(detached at {})", id),
        },
    }
    Ok(())
}
