//! Command-line interface for hoard.

mod config_cmd;
mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hoard_core::{HoardConfig, SourceType};
use hoard_engine::{CacheError, CacheManager, DedupPlan};
use hoard_sources::{AcquireContext, Progress};
use output::Output;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hoard")]
#[command(about = "Unified model-weight cache with cross-source deduplication")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Config file path
    #[arg(long, global = true, env = "HOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change configuration
    Config {
        /// Key to show or set (e.g. cache_root, download.max_retries)
        key: Option<String>,
        /// New value for the key
        value: Option<String>,
    },
    #[command(flatten)]
    Cache(CacheCommands),
}

/// Commands that operate on an open cache.
#[derive(Subcommand)]
enum CacheCommands {
    /// List tracked artifacts and the applications using them
    Status {
        /// Only show artifacts from this source (e.g. hf, hub, ollama, local)
        #[arg(long)]
        source: Option<SourceType>,
    },
    /// Acquire an artifact and start tracking it
    Add {
        /// Source-qualified identifier (e.g. hf:org/model, ollama:llama3.2:7b, local:/path)
        identifier: String,
    },
    /// Stop tracking an artifact and delete the payload hoard owns
    Remove {
        identifier: String,
        /// Remove even while applications use it
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Register an application and the artifacts it uses
    Link {
        /// Application root directory
        app_path: PathBuf,
        /// Application name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
        /// Artifact identifier the application uses (repeatable)
        #[arg(long = "uses", value_name = "ID")]
        uses: Vec<String>,
    },
    /// Unregister an application
    Unlink {
        app_name: String,
    },
    /// Remove orphaned artifacts and deduplicate payloads
    Clean {
        /// Report what would change without changing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Apply deduplication without asking
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
    /// Show cache size and savings
    Stats,
    /// Re-scan sources and bring the registry up to date
    Sync {
        /// Source to scan (all when omitted)
        source: Option<SourceType>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let Cli { command, global } = Cli::parse();
    init_tracing(global.verbose);

    let out = Output::new(global.json);
    match run(command, &global, &out).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = out.error(&err);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(global: &GlobalArgs) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(hoard_core::config::default_config_path)
}

async fn open_manager(global: &GlobalArgs) -> Result<CacheManager> {
    let path = config_path(global);
    let config = HoardConfig::load(&path).map_err(CacheError::from)?;
    let manager = CacheManager::open(config)
        .await
        .with_context(|| format!("failed to open cache (config: {})", path.display()))?;
    Ok(manager)
}

/// A token cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling");
            token.cancel();
        }
    });
    cancel
}

async fn run(command: Commands, global: &GlobalArgs, out: &Output) -> Result<()> {
    match command {
        Commands::Config { key, value } => {
            config_cmd::handle(&config_path(global), key.as_deref(), value.as_deref(), out)
        }
        Commands::Cache(command) => run_cache_command(command, global, out).await,
    }
}

async fn run_cache_command(command: CacheCommands, global: &GlobalArgs, out: &Output) -> Result<()> {
    let manager = open_manager(global).await?;
    let cancel = cancel_on_interrupt();

    match command {
        CacheCommands::Status { source } => {
            let entries = manager.status(source).await?;
            out.status(&entries)
        }
        CacheCommands::Add { identifier } => {
            let mut ctx = AcquireContext::new(cancel);
            if !out.is_json() && std::io::stderr().is_terminal() {
                ctx = ctx.with_progress(progress_reporter());
            }
            let artifact = manager.add(&identifier, &ctx).await?;
            out.added(&artifact)
        }
        CacheCommands::Remove { identifier, force } => {
            let report = manager.remove(&identifier, force).await?;
            out.removed(&report)
        }
        CacheCommands::Link {
            app_path,
            name,
            uses,
        } => {
            let report = manager.link(&app_path, name.as_deref(), &uses).await?;
            out.linked(&report)
        }
        CacheCommands::Unlink { app_name } => {
            let released = manager.unlink(&app_name).await?;
            out.unlinked(&app_name, released)
        }
        CacheCommands::Clean { dry_run, yes } => handle_clean(&manager, dry_run, yes, &cancel, out).await,
        CacheCommands::Stats => {
            let stats = manager.stats().await?;
            out.stats(&stats)
        }
        CacheCommands::Sync { source } => {
            let reports = match source {
                Some(source) => vec![manager.sync(source, &cancel).await?],
                None => manager.sync_all(&cancel).await?,
            };
            let plan = manager.dedup_plan(&cancel).await?;
            out.synced(&reports, &plan)
        }
    }
}

async fn handle_clean(
    manager: &CacheManager,
    dry_run: bool,
    yes: bool,
    cancel: &CancellationToken,
    out: &Output,
) -> Result<()> {
    let report = manager.clean(dry_run, cancel).await?;
    if dry_run {
        let plan = manager.dedup_preview(cancel).await?;
        return out.cleaned(&report, &plan, None);
    }

    let plan = manager.dedup_plan(cancel).await?;
    if plan.actions.is_empty() || !(yes || confirm_dedup(&plan)?) {
        return out.cleaned(&report, &plan, None);
    }
    let applied = manager.apply_dedup(&plan, cancel).await?;
    out.cleaned(&report, &plan, Some(&applied))
}

/// Ask on stderr; anything but `y` declines, including a closed stdin.
fn confirm_dedup(plan: &DedupPlan) -> Result<bool> {
    let mut stderr = std::io::stderr();
    write!(
        stderr,
        "\nReplace {} duplicate payload(s) with links, reclaiming {}? [y/N]: ",
        plan.actions.len(),
        output::format_bytes(plan.actions.iter().map(|a| a.size_bytes).sum()),
    )?;
    stderr.flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Progress on stderr, one line per 10% step.
fn progress_reporter() -> hoard_sources::ProgressFn {
    let last = Arc::new(AtomicU64::new(0));
    Arc::new(move |p: &Progress| {
        let Some(total) = p.bytes_total.filter(|t| *t > 0) else {
            return;
        };
        let step = p.bytes_done * 10 / total;
        if step > last.swap(step, Ordering::Relaxed) {
            eprintln!(
                "  {:>3}%  {} / {}  {}",
                step * 10,
                output::format_bytes(p.bytes_done),
                output::format_bytes(total),
                p.file
            );
        }
    })
}
