//! `docket` - watch a folder (or process one file) for barcode-labelled scans.

use anyhow::{bail, Context, Result};
use clap::Parser;
use docket::{DocketConfig, Pipeline, ShutdownToken, WatchSession};
use docket_logging::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

/// 128 + SIGINT, as shells report an interrupted command.
const FORCED_EXIT: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "docket",
    version,
    about = "Rename scanned documents by barcode and file them by form and month"
)]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Configuration file (defaults to ~/.docket/docket.toml when present)
    #[arg(short = 'c', long, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Hash ledger file
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Event log file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Root of the form/month hierarchy
    #[arg(long)]
    root: Option<PathBuf>,

    /// Pipeline worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Directory to watch, or a single document to process
    path: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "docket",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.path.exists() {
        bail!("path does not exist: {}", cli.path.display());
    }
    let config = load_config(&cli)?;

    if cli.path.is_dir() {
        watch(&cli.path, config)
    } else {
        process_once(&cli.path, config)
    }
}

fn load_config(cli: &Cli) -> Result<DocketConfig> {
    let mut config = DocketConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(ledger) = &cli.ledger {
        config.ledger_path = ledger.clone();
    }
    if let Some(log) = &cli.log {
        config.log_path = log.clone();
    }
    if let Some(root) = &cli.root {
        config.organize_root = Some(root.clone());
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn watch(root: &Path, config: DocketConfig) -> Result<()> {
    let organize_root = config
        .organize_root
        .clone()
        .unwrap_or_else(|| root.to_path_buf());
    let pipeline =
        Pipeline::from_config(&config, organize_root).context("Failed to start pipeline")?;

    let shutdown = ShutdownToken::new();
    install_signal_handlers(&shutdown)?;

    let mut session = WatchSession::new(root, pipeline);
    info!(root = %root.display(), "Starting watch session (Ctrl+C to stop)");
    session
        .run(&shutdown)
        .with_context(|| format!("Watch session on {} failed", root.display()))?;
    info!("Watch session stopped");
    Ok(())
}

fn process_once(path: &Path, config: DocketConfig) -> Result<()> {
    let organize_root = match &config.organize_root {
        Some(root) => root.clone(),
        None => path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let pipeline =
        Pipeline::from_config(&config, organize_root).context("Failed to start pipeline")?;

    let outcome = pipeline
        .process_exclusive(path)
        .with_context(|| format!("Cannot process {}", path.display()))?;
    let Some(ctx) = outcome else {
        bail!(
            "failed to process {} (see {})",
            path.display(),
            config.log_path.display()
        );
    };
    match &ctx.digest {
        Some(digest) => println!("{}  {}", digest, ctx.current.display()),
        None => println!("{} (not recorded)", ctx.current.display()),
    }
    Ok(())
}

/// First signal drains and stops the session; a second one exits at once.
fn install_signal_handlers(shutdown: &ShutdownToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let token = shutdown.clone();
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
        std::thread::spawn(move || {
            for sig in signals.forever() {
                if token.request() {
                    warn!("Received signal {} again, exiting without draining", sig);
                    std::process::exit(FORCED_EXIT);
                }
                info!("Received signal {}, shutting down (repeat to force)...", sig);
            }
        });
    }

    #[cfg(windows)]
    {
        let token = shutdown.clone();
        ctrlc::set_handler(move || {
            if token.request() {
                warn!("Received Ctrl+C again, exiting without draining");
                std::process::exit(FORCED_EXIT);
            }
            info!("Received Ctrl+C, shutting down (repeat to force)...");
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}
