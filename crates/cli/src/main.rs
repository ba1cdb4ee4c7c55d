//! Command-line client for larder.

mod config;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use larder_client::{HttpCacheClient, HttpClientConfig, StaticCredentials};
use larder_core::{ArtifactId, ClientConfig};
use larder_signer::{KeyPair, StaticKeyProvider};
use larder_transfer::{EngineOptions, EstimateMemo, LocalChunkCache, TransferEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "larder")]
#[command(about = "Push and pull build artifacts through a larder binary cache")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Client config file path
    #[arg(long, global = true, env = "LARDER_CONFIG")]
    config: Option<PathBuf>,

    /// Cache server URL (overrides config)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Cache name (overrides config)
    #[arg(long, global = true)]
    cache: Option<String>,

    /// Number of parallel chunk transfers (skips the bandwidth probe)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Assume this bandwidth in Mbit/s instead of probing
    #[arg(long, global = true)]
    bandwidth_mbps: Option<f64>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, sign and upload a file
    Push {
        /// File to upload
        file: PathBuf,
        /// Artifact id (defaults to the file name)
        #[arg(long)]
        artifact: Option<String>,
        /// Secret key file used to sign the manifest (overrides config)
        #[arg(long)]
        signing_key_file: Option<PathBuf>,
    },
    /// Download, verify and reassemble an artifact
    Pull {
        /// Artifact id or store path
        artifact: String,
        /// Where to write the artifact
        #[arg(short, long)]
        output: PathBuf,
        /// Additional trusted public key (name:base64), repeatable
        #[arg(long = "trusted-key")]
        trusted_keys: Vec<String>,
    },
    /// Generate a new signing key pair
    Keygen {
        /// Key name, e.g. cache.example.com-1
        name: String,
        /// Write the secret key to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Measure bandwidth and show the tuning the next transfer would use
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { global, command } = Cli::parse();

    match command {
        Commands::Push {
            file,
            artifact,
            signing_key_file,
        } => {
            let mut config = load_config(&global)?;
            if signing_key_file.is_some() {
                config.signing_key_file = signing_key_file;
            }
            handle_push(&config, &global, &file, artifact).await
        }
        Commands::Pull {
            artifact,
            output,
            trusted_keys,
        } => {
            let mut config = load_config(&global)?;
            config.trusted_keys.extend(trusted_keys);
            handle_pull(&config, &global, &artifact, &output).await
        }
        Commands::Keygen { name, output } => handle_keygen(&name, output.as_deref()).await,
        Commands::Probe => {
            let config = load_config(&global)?;
            handle_probe(&config, &global).await
        }
    }
}

fn load_config(global: &GlobalArgs) -> Result<ClientConfig> {
    let mut config = config::load(global.config.as_deref())?;
    if let Some(server) = &global.server {
        config.server = server.clone();
    }
    if let Some(cache) = &global.cache {
        config.cache = cache.clone();
    }
    if global.concurrency.is_some() {
        config.transfer.concurrency = global.concurrency;
    }
    if global.bandwidth_mbps.is_some() {
        config.transfer.bandwidth_mbps = global.bandwidth_mbps;
    }
    config
        .validate()
        .context("invalid command-line overrides")?;
    Ok(config)
}

async fn build_engine(config: &ClientConfig) -> Result<TransferEngine> {
    let backend = HttpCacheClient::new(HttpClientConfig::from(config))
        .context("failed to create HTTP client")?;
    let credentials = StaticCredentials::from(config.token.clone());
    let keys = StaticKeyProvider::load(config.signing_key_file.as_deref(), &config.trusted_keys)
        .context("failed to load keys")?;

    let mut options = EngineOptions::from_config(config);
    if let Some(dir) = &config.local_cache_dir {
        let cache = LocalChunkCache::open(dir)
            .await
            .with_context(|| format!("failed to open local cache {}", dir.display()))?;
        options = options.with_local_cache(cache);
    }

    let memo = Arc::new(EstimateMemo::new(config.probe.memo_ttl()));
    Ok(TransferEngine::new(
        Arc::new(backend),
        Arc::new(credentials),
        Arc::new(keys),
        options,
    )
    .with_memo(memo))
}

/// Cancel `token` on Ctrl-C so in-flight chunks drain before exit.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight chunks");
            child.cancel();
        }
    });
    token
}

fn artifact_id(file: &Path, explicit: Option<String>) -> Result<ArtifactId> {
    let raw = match explicit {
        Some(id) => id,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("cannot derive an artifact id from {}", file.display()))?,
    };
    ArtifactId::new(raw).context("invalid artifact id")
}

async fn handle_push(
    config: &ClientConfig,
    global: &GlobalArgs,
    file: &Path,
    artifact: Option<String>,
) -> Result<()> {
    let artifact = artifact_id(file, artifact)?;
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let engine = build_engine(config).await?;
    let cancel = cancel_on_interrupt();

    let report = engine
        .push(artifact.clone(), Bytes::from(data), &cancel)
        .await
        .with_context(|| format!("push of {artifact} failed"))?;

    if global.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pushed {} ({} bytes)", report.artifact, report.total_size);
        println!("  Root hash:   {}", report.root_hash);
        println!("  Signed by:   {}", report.key_name);
        println!("  Manifest:    {:?}", report.manifest);
        println!(
            "  Chunks:      {} total, {} uploaded, {} already present",
            report.summary.chunks, report.summary.transferred, report.summary.already_present
        );
        println!(
            "  Bytes:       {} uploaded, {} skipped",
            report.summary.bytes_transferred, report.summary.bytes_skipped
        );
        println!(
            "  Concurrency: {} ({})",
            report.summary.concurrency, report.summary.concurrency_source
        );
    }
    Ok(())
}

async fn handle_pull(
    config: &ClientConfig,
    global: &GlobalArgs,
    artifact: &str,
    output: &Path,
) -> Result<()> {
    let artifact = ArtifactId::new(artifact).context("invalid artifact id")?;
    let engine = build_engine(config).await?;
    let cancel = cancel_on_interrupt();

    let pulled = engine
        .pull(&artifact, &cancel)
        .await
        .with_context(|| format!("pull of {artifact} failed"))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output, &pulled.data)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    let report = &pulled.report;
    if global.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("Pulled {} ({} bytes)", report.artifact, report.total_size);
        println!("  Written to:  {}", output.display());
        println!("  Root hash:   {}", report.root_hash);
        println!("  Signed by:   {}", report.key_name);
        println!(
            "  Chunks:      {} total, {} downloaded, {} from local cache",
            report.summary.chunks, report.summary.transferred, report.summary.locally_present
        );
        println!(
            "  Concurrency: {} ({})",
            report.summary.concurrency, report.summary.concurrency_source
        );
    }
    Ok(())
}

async fn handle_keygen(name: &str, output: Option<&Path>) -> Result<()> {
    let keypair = KeyPair::generate(name);
    let secret_key = keypair.to_nix_secret_key();
    let public_key = keypair.to_nix_public_key();

    if let Some(path) = output {
        tokio::fs::write(path, &secret_key)
            .await
            .with_context(|| format!("failed to write key to {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        println!("Secret key written to: {}", path.display());
    } else {
        println!("Secret key:");
        println!("{secret_key}");
    }

    println!("\nPublic key:");
    println!("{public_key}");
    println!("\nTrust it on pulling machines with:");
    println!("  trusted_keys = [\"{public_key}\"]");
    Ok(())
}

async fn handle_probe(config: &ClientConfig, global: &GlobalArgs) -> Result<()> {
    let engine = build_engine(config).await?;
    let tuning = engine
        .resolve_tuning()
        .await
        .context("failed to resolve transfer tuning")?;

    if global.json {
        let value = serde_json::json!({
            "concurrency": tuning.concurrency,
            "chunk_size": tuning.chunk_size,
            "tier": tuning.tier.map(|t| format!("{t:?}")),
            "source": tuning.source.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Concurrency: {}", tuning.concurrency);
        println!("Chunk size:  {}", tuning.chunk_size);
        if let Some(tier) = tuning.tier {
            println!("Tier:        {tier:?}");
        }
        println!("Source:      {}", tuning.source);
    }
    Ok(())
}
