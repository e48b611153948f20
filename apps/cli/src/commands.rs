//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use jobpulse_core::{
    Coordinator, ProgressReporter, ScheduleSpec, Scheduler, SchedulerFlags, SilentProgress,
};
use jobpulse_shared::{
    AppConfig, PipelineState, RunRecord, RunStatus, init_config, load_config, load_config_from,
};
use jobpulse_storage::Store;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// JobPulse: collect recruitment listings and track what the market asks for.
#[derive(Parser)]
#[command(
    name = "jobpulse",
    version,
    about = "Collect recruitment listings, clean them, and snapshot keyword and salary statistics.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.jobpulse/jobpulse.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory holding the listing database.
    #[arg(long, env = "JOBPULSE_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the directory receiving analysis snapshots.
    #[arg(long, env = "JOBPULSE_ANALYSIS_DIR", global = true)]
    pub analysis_dir: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline once and exit.
    Run,

    /// Run the pipeline on the configured schedule until interrupted.
    Schedule {
        /// Trigger a run immediately instead of waiting for the first interval.
        #[arg(long)]
        run_now: bool,

        /// Trigger exactly one run, then exit.
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Print the most recent analysis snapshot as JSON.
    Latest,

    /// Print stored listings as JSON.
    Listings {
        /// Only listings in this category.
        #[arg(long)]
        category: Option<String>,

        /// Only listings in this city.
        #[arg(long)]
        city: Option<String>,

        /// Maximum number of listings to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the snapshot index as JSON, newest first.
    Snapshots,

    /// Print recent run records as JSON, newest first.
    Runs {
        /// Maximum number of runs to print.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "jobpulse=info",
        1 => "jobpulse=debug",
        _ => "jobpulse=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()),
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?),
        };
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Run => cmd_run(&config, !matches!(cli.log_format, LogFormat::Json)).await,
        Command::Schedule {
            run_now,
            no_scheduler,
        } => cmd_schedule(&config, run_now, no_scheduler).await,
        Command::Latest => cmd_latest(&config).await,
        Command::Listings {
            category,
            city,
            limit,
        } => cmd_listings(&config, category.as_deref(), city.as_deref(), limit).await,
        Command::Snapshots => cmd_snapshots(&config).await,
        Command::Runs { limit } => cmd_runs(&config, limit).await,
        Command::Config { .. } => Ok(()),
    }
}

/// Load the config file and apply directory overrides from flags/env.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.paths.data_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(dir) = &cli.analysis_dir {
        config.paths.analysis_dir = dir.to_string_lossy().into_owned();
    }
    Ok(config)
}

/// Cancelled on the first Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            token.cancel();
        }
    });
    cancel
}

async fn build_coordinator(config: &AppConfig, progress: Arc<dyn ProgressReporter>) -> Result<Coordinator> {
    if config.sources.is_empty() {
        return Err(eyre!(
            "no [[sources]] configured; add at least one to your config file"
        ));
    }
    let store = Store::open(&config.data_dir(), &config.analysis_dir()).await?;
    Ok(Coordinator::from_config(config, Arc::new(store))?.with_progress(progress))
}

async fn open_reader(config: &AppConfig) -> Result<Store> {
    Ok(Store::open_readonly(&config.data_dir(), &config.analysis_dir()).await?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, interactive: bool) -> Result<()> {
    let progress: Arc<dyn ProgressReporter> = if interactive {
        Arc::new(CliProgress::new())
    } else {
        Arc::new(SilentProgress)
    };
    let coordinator = build_coordinator(config, progress).await?;

    info!(sources = config.sources.len(), "starting run");
    let record = coordinator.run_once(&shutdown_token()).await?;
    print_summary(&record);

    if record.status == RunStatus::Failed {
        return Err(eyre!(
            "run failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

async fn cmd_schedule(config: &AppConfig, run_now: bool, no_scheduler: bool) -> Result<()> {
    let coordinator = build_coordinator(config, Arc::new(SilentProgress)).await?;
    let spec = ScheduleSpec::from_config(&config.schedule)?;
    let scheduler = Scheduler::new(
        spec,
        SchedulerFlags {
            disabled: no_scheduler,
            run_now,
        },
    );

    info!(?spec, run_now, no_scheduler, "scheduler started");
    let runs = scheduler.run(&coordinator, &shutdown_token()).await;
    info!(runs, "scheduler exited");
    Ok(())
}

fn print_summary(record: &RunRecord) {
    let counts = &record.counts;
    println!();
    println!("  Run {}", record.id);
    println!("  Status:      {}", record.status);
    println!("  Fetched:     {}", counts.fetched);
    println!("  Page errors: {}", counts.fetch_failures);
    println!("  Rejected:    {}", counts.rejected);
    println!("  Duplicates:  {}", counts.duplicates);
    println!("  Stored:      {}", counts.upserted);
    println!(
        "  Snapshot:    {}",
        if record.snapshot_written { "written" } else { "none" }
    );
    if let Some(finished) = record.finished_at {
        let elapsed = finished - record.started_at;
        println!("  Time:        {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
    if let Some(error) = &record.error {
        println!("  Error:       {error}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, state: PipelineState) {
        let message = match state {
            PipelineState::Idle => "Idle",
            PipelineState::Fetching => "Fetching listings",
            PipelineState::Cleaning => "Cleaning listings",
            PipelineState::Analyzing => "Analyzing keywords",
            PipelineState::Persisting => "Writing to store",
            PipelineState::Failed => "Run failed",
        };
        self.spinner.set_message(message);
    }

    fn page_fetched(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {url}"));
    }

    fn done(&self, _record: &RunRecord) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

async fn cmd_latest(config: &AppConfig) -> Result<()> {
    match open_reader(config).await?.read_latest().await? {
        Some(snapshot) => print_json(&snapshot),
        None => {
            println!("null");
            Ok(())
        }
    }
}

async fn cmd_listings(
    config: &AppConfig,
    category: Option<&str>,
    city: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let listings: Vec<_> = open_reader(config)
        .await?
        .read_all()
        .await?
        .into_iter()
        .filter(|l| category.is_none_or(|c| l.category == c))
        .filter(|l| city.is_none_or(|c| l.city == c))
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    print_json(&listings)
}

async fn cmd_snapshots(config: &AppConfig) -> Result<()> {
    print_json(&open_reader(config).await?.list_snapshots().await?)
}

async fn cmd_runs(config: &AppConfig, limit: usize) -> Result<()> {
    print_json(&open_reader(config).await?.list_runs(limit).await?)
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
