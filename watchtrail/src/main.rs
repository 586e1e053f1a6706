//! watchtrail - watch-session tracker and event shipper
//!
//! This tool provides commands for:
//! - Checking configuration, client identity and collector health
//! - Replaying recorded page/player signal scripts through the tracker
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/watchtrail/config.toml (~/.config/watchtrail/config.toml)
//! - Client id: $XDG_DATA_HOME/watchtrail/client_session_id
//! - Logs: $XDG_STATE_HOME/watchtrail/watchtrail.log.YYYY-MM-DD

mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use watchtrail_core::collector::{CollectorClient, Dispatcher};
use watchtrail_core::identity::{FileIdentityStore, IdentityStore};
use watchtrail_core::{logging, Clock, Config, SystemClock};

use replay::{parse_script, Replayer, StdoutSink};

#[derive(Parser)]
#[command(name = "watchtrail")]
#[command(about = "Track watch sessions and ship engagement events")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration, client identity and collector health
    Status,

    /// Replay a recorded signal script through the session tracker
    Replay {
        /// JSON-lines script, one step per line
        script: PathBuf,

        /// Print events as JSON lines instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Collector base URL (default: from config)
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config).await,
        Command::Replay {
            script,
            dry_run,
            endpoint,
        } => cmd_replay(&config, &script, dry_run, endpoint).await,
    }
}

async fn cmd_status(config: &Config) -> Result<()> {
    println!("watchtrail Configuration");
    println!("========================");
    println!();

    let config_path = Config::config_path();
    println!(
        "Config File:     {}{}",
        config_path.display(),
        if config_path.exists() {
            ""
        } else {
            " (not found, using defaults)"
        }
    );

    let store = FileIdentityStore::default_location();
    let client_id = store
        .get_or_create()
        .context("failed to load client session id")?;
    println!("Client ID:       {}", client_id);
    println!(
        "Log File:        {} (rotated daily)",
        logging::log_file_path().display()
    );

    let tracker = &config.tracker;
    println!();
    println!("Tracker");
    println!("  Tick Interval:   {}ms", tracker.tick_interval_ms);
    println!("  Max Tick Delta:  {}ms", tracker.max_tick_delta_ms);
    println!("  Poll Interval:   {}ms", tracker.poll_interval_ms);
    println!("  Observe:         {}ms", tracker.observe_interval_ms);

    let collector = &config.collector;
    println!();
    println!("Collector");
    println!("  Endpoint:        {}", collector.endpoint);
    println!("  Batch Size:      {}", collector.max_batch_size);
    println!("  Flush Interval:  {}ms", collector.flush_interval_ms);
    println!("  Timeout:         {}s", collector.timeout_secs);

    let client =
        CollectorClient::new(collector.clone()).context("failed to create collector client")?;
    println!();
    match client.health_check().await {
        Ok(true) => println!("Status: Collector reachable"),
        Ok(false) => println!("Status: Collector unreachable at {}", client.endpoint()),
        Err(e) => println!("Status: Health check failed ({})", e),
    }

    Ok(())
}

async fn cmd_replay(
    config: &Config,
    script: &Path,
    dry_run: bool,
    endpoint: Option<String>,
) -> Result<()> {
    let text = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    let steps = parse_script(&text)?;

    let client_id = FileIdentityStore::default_location()
        .get_or_create()
        .context("failed to load client session id")?;
    let start_ms = SystemClock.now_ms();

    if dry_run {
        let mut replayer =
            Replayer::new(&client_id, config.tracker.clone(), Arc::new(StdoutSink), start_ms);
        for step in &steps {
            replayer.apply(step);
        }
        eprintln!("Replayed {} steps (dry run)", steps.len());
        return Ok(());
    }

    let mut collector = config.collector.clone();
    if let Some(endpoint) = endpoint {
        collector.endpoint = endpoint;
    }
    let client =
        CollectorClient::new(collector.clone()).context("failed to create collector client")?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(client), &collector));

    let mut replayer = Replayer::new(
        &client_id,
        config.tracker.clone(),
        dispatcher.clone(),
        start_ms,
    );
    for step in &steps {
        replayer.apply(step);
    }

    let queued = dispatcher.pending_count();
    println!("Replayed {} steps, {} events queued", steps.len(), queued);

    let delivered = dispatcher.drain().await;
    let stats = dispatcher.stats();
    println!();
    println!("Delivered:       {}", delivered);
    println!("Accepted:        {}", stats.events_sent);
    println!("Rejected:        {}", stats.events_rejected);
    println!("API Calls:       {}", stats.api_calls);

    if dispatcher.has_pending() {
        bail!(
            "{} events could not be delivered to {}",
            dispatcher.pending_count(),
            collector.endpoint
        );
    }

    Ok(())
}
