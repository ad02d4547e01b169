//! btk-tagger - szurubooru metadata tagger and uploader
//!
//! Subcommands:
//! - `auto-tag <QUERY>`: tag existing posts matching a board query
//!   (`--sankaku-url` tags the single post `<QUERY>` from a Sankaku page)
//! - `upload [PATH]...`: upload media files or directories
//! - `import [DIR]`: upload downloader output with `<file>.json` sidecars
//!
//! Upload paths default to `upload_media.src_path`. `--cleanup` deletes what
//! was uploaded and prunes the emptied directories.
//!
//! Ctrl-C cancels the run; statistics collected so far are still reported.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use btk_common::config::LoggingConfig;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use btk_tagger::board::SzurubooruClient;
use btk_tagger::providers::{ProviderSet, SankakuScraper};
use btk_tagger::services::{cleanup_dirs, MediaScanner, ProviderController, SessionState};
use btk_tagger::types::ProviderId;
use btk_tagger::workflow::{Orchestrator, OrchestratorOptions, RunStatistics, TagEdits, TaggerEvent, UploadItem};
use btk_tagger::TaggerConfig;

/// Command-line arguments for btk-tagger
#[derive(Parser, Debug)]
#[command(name = "btk-tagger")]
#[command(about = "Tag and upload media on a szurubooru board")]
#[command(version)]
struct Args {
    /// Config file (default: $BTK_CONFIG, ~/.config/btk/config.toml, ./config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tag existing posts matching QUERY
    AutoTag {
        /// Board query, or a post id
        query: String,

        /// Tags added to every post
        #[arg(long, value_delimiter = ',')]
        add_tags: Vec<String>,

        /// Tags removed from every post
        #[arg(long, value_delimiter = ',')]
        remove_tags: Vec<String>,

        /// Take tags from this Sankaku post page (QUERY must be a post id)
        #[arg(long)]
        sankaku_url: Option<String>,
    },

    /// Upload media files or directories (default: upload_media.src_path)
    Upload {
        paths: Vec<PathBuf>,

        /// Tags added to every upload
        #[arg(long, value_delimiter = ',')]
        add_tags: Vec<String>,

        /// Delete uploaded files and prune emptied directories
        #[arg(long)]
        cleanup: bool,
    },

    /// Upload downloader output (media with .json metadata sidecars)
    Import {
        dir: Option<PathBuf>,

        /// Tags added to every upload
        #[arg(long, value_delimiter = ',')]
        add_tags: Vec<String>,

        /// Delete uploaded files and prune emptied directories
        #[arg(long)]
        cleanup: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Bridge run events to progress logs
fn spawn_event_logger(mut rx: mpsc::Receiver<TaggerEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TaggerEvent::RunStarted { mode, total, .. } => info!(mode = %mode, total, "Run started"),
                TaggerEvent::ItemStarted { index, total, label } => {
                    info!("[{}/{}] {}", index + 1, total, label)
                }
                TaggerEvent::ProviderFinished {
                    label,
                    provider,
                    outcome,
                    candidates,
                } => debug!(item = %label, provider = %provider, outcome = %outcome, candidates, "Provider finished"),
                TaggerEvent::ItemCompleted { label, outcome } => {
                    debug!(item = %label, outcome = outcome.as_str(), "Item finished")
                }
                TaggerEvent::RunCompleted { cancelled, .. } => debug!(cancelled, "Run completed"),
            }
        }
    })
}

/// Upload roots from the command line, else `upload_media.src_path`
fn upload_roots(paths: Vec<PathBuf>, config: &TaggerConfig) -> Result<Vec<PathBuf>> {
    if !paths.is_empty() {
        return Ok(paths);
    }
    match &config.upload_media.src_path {
        Some(src_path) => Ok(vec![src_path.clone()]),
        None => bail!("No upload path given and upload_media.src_path is not set"),
    }
}

/// Scan `roots`, upload, then prune the roots when cleaning up
async fn run_upload(
    orchestrator: &Orchestrator,
    mode: &str,
    roots: &[PathBuf],
    add_tags: &[String],
    cleanup: bool,
) -> Result<RunStatistics> {
    let files = MediaScanner::new().scan(roots)?;
    let items = files.into_iter().map(UploadItem::File).collect();
    let stats = orchestrator.upload(mode, items, add_tags).await;

    if cleanup {
        for root in roots {
            match cleanup_dirs(root) {
                Ok(removed) => debug!(root = %root.display(), removed, "Source directory cleaned up"),
                Err(e) => warn!(root = %root.display(), error = %e, "Could not clean up source directory"),
            }
        }
    }
    Ok(stats)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing current item and stopping");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TaggerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!(user_agent = btk_tagger::USER_AGENT, build = env!("BTK_BUILD_INFO"), "Starting btk-tagger");

    config.validate().context("Invalid configuration")?;
    if matches!(args.command, Command::AutoTag { sankaku_url: None, .. }) && !config.any_provider_enabled() {
        bail!("No metadata provider is enabled; enable saucenao, md5_search or deepbooru");
    }

    let board = Arc::new(SzurubooruClient::from_config(&config.board).context("Failed to create board client")?);
    let mut providers = ProviderSet::from_config(&config)?;
    if matches!(args.command, Command::AutoTag { sankaku_url: Some(_), .. })
        && providers.mirror(ProviderId::Sankaku).is_none()
    {
        let scraper = SankakuScraper::new(config.retry.timeout(), config.retry.requests_per_second)
            .context("Failed to create Sankaku client")?;
        providers = providers.with_mirror(Arc::new(scraper));
    }

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let controller = ProviderController::from_config(&config.retry, Arc::new(SessionState::new()), cancel);

    let (event_tx, event_rx) = mpsc::channel(100);
    let event_logger = spawn_event_logger(event_rx);

    let mut options = OrchestratorOptions::from_config(&config);
    if let Command::Upload { cleanup: true, .. } | Command::Import { cleanup: true, .. } = args.command {
        options.cleanup = true;
    }
    let cleanup = options.cleanup;

    let orchestrator = Orchestrator::new(board, providers, controller, options).with_event_channel(event_tx);
    orchestrator.ping().await?;
    info!(url = %config.board.url, "Board reachable");

    let stats: RunStatistics = match args.command {
        Command::AutoTag {
            query,
            add_tags,
            remove_tags,
            sankaku_url,
        } => {
            let edits = TagEdits {
                add: add_tags,
                remove: remove_tags,
            };
            match sankaku_url {
                Some(url) => orchestrator.tag_from_sankaku(&query, &url, &edits).await?,
                None => orchestrator.auto_tag(&query, &edits).await?,
            }
        }
        Command::Upload { paths, add_tags, .. } => {
            let roots = upload_roots(paths, &config)?;
            run_upload(&orchestrator, "upload", &roots, &add_tags, cleanup).await?
        }
        Command::Import { dir, add_tags, .. } => {
            let roots = upload_roots(dir.into_iter().collect(), &config)?;
            run_upload(&orchestrator, "import", &roots, &add_tags, cleanup).await?
        }
    };

    drop(orchestrator);
    let _ = event_logger.await;

    info!("{}", stats.display_string());
    Ok(())
}
