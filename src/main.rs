use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use asset_ingest::app::{Collaborators, IngestionEngine};
use asset_ingest::config::Config;
use asset_ingest::dedupe::content_hash;
use asset_ingest::infra::{FsDocumentStore, ReqwestHttp};
use asset_ingest::rate_limiter::AdmissionMode;
use asset_ingest::types::{AssetKind, OwnerScope, UploadRequest};
use asset_ingest::{logging, metrics};

#[derive(Parser)]
#[command(name = "asset_ingest")]
#[command(about = "Submit assets to the catalog and reconcile their moderation status")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./ingest.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one file
    Submit {
        file: PathBuf,
        #[arg(long, value_enum)]
        kind: AssetKind,
        /// Display name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Submit on behalf of a group instead of the individual account
        #[arg(long)]
        group: Option<u64>,
        /// Fail immediately instead of waiting when rate limited
        #[arg(long)]
        fail_fast: bool,
    },
    /// Resolve the moderation status of an asset
    Status {
        asset_id: u64,
        #[arg(long, value_enum)]
        kind: AssetKind,
        /// Ignore any cached verdict
        #[arg(long)]
        fresh: bool,
        /// Keep polling until the verdict settles
        #[arg(long)]
        poll: bool,
    },
    /// Check whether a file (or asset id) was already submitted
    CheckDuplicate {
        #[arg(required_unless_present = "asset_id")]
        file: Option<PathBuf>,
        #[arg(long)]
        group: Option<u64>,
        #[arg(long, conflicts_with = "file")]
        asset_id: Option<u64>,
    },
    /// Print the content hash used for duplicate detection
    Hash { file: PathBuf },
    /// List stored successful submissions
    History,
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn build_engine(config: &Config) -> Result<IngestionEngine> {
    let credential = config.credential()?;
    let collaborators = Collaborators {
        store: Arc::new(FsDocumentStore::new(&config.storage.state_dir)),
        http: Arc::new(ReqwestHttp::new()),
        privileged: None,
    };
    Ok(IngestionEngine::from_config(config, credential, collaborators)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    logging::init_logging(&config.storage.log_dir);
    metrics::init_metrics();

    match cli.command {
        Commands::Hash { file } => {
            println!("{}", content_hash(&read_file(&file)?));
        }
        Commands::Submit { file, kind, name, description, group, fail_fast } => {
            if fail_fast {
                config.rate_limits.mode = AdmissionMode::FailFast;
            }
            let engine = build_engine(&config)?;
            let display_name = match name {
                Some(n) => n,
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .context("Cannot derive a display name from the file path; pass --name")?,
            };
            let mut request = UploadRequest::new(read_file(&file)?, display_name, kind, OwnerScope::from_group(group));
            if let Some(description) = description {
                request = request.with_description(description);
            }
            info!(file = %file.display(), hash = request.content_hash(), "Submitting");

            let result = engine.submit(&request, &cancel_on_ctrl_c()).await;
            print_json(&result)?;
            if let Some(error) = &result.error {
                bail!("Submission failed ({}): {}", error.kind, error.message);
            }
        }
        Commands::Status { asset_id, kind, fresh, poll } => {
            let engine = build_engine(&config)?;
            let cancel = cancel_on_ctrl_c();
            let verdict = if poll {
                engine.poll_until_settled(asset_id, kind, &cancel).await?
            } else if fresh {
                engine.resolve_status_fresh(asset_id, kind, &cancel).await?
            } else {
                engine.resolve_status(asset_id, kind, &cancel).await?
            };
            print_json(&verdict)?;
        }
        Commands::CheckDuplicate { file, group, asset_id } => {
            let engine = build_engine(&config)?;
            let check = match (asset_id, file) {
                (Some(id), _) => engine.check_duplicate_by_asset_id(id).await?,
                (None, Some(file)) => {
                    let hash = content_hash(&read_file(&file)?);
                    // The kind is not part of the duplicate key.
                    engine
                        .check_duplicate(&hash, AssetKind::Image, &OwnerScope::from_group(group))
                        .await?
                }
                (None, None) => bail!("Pass a file or --asset-id"),
            };
            print_json(&check)?;
        }
        Commands::History => {
            let engine = build_engine(&config)?;
            print_json(&engine.history().await?)?;
        }
    }

    Ok(())
}
