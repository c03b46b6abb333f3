//! # sentinel-runner
//!
//! Replays a JSON-lines event stream through the trading safety core.
//!
//! Loads the risk configuration, feeds bars to the volatility gate worker,
//! applies fills to the position ledger, reconciles against every broker
//! snapshot and scores shadow candidates for promotion. At end of input the
//! aggregated health JSON is printed to stdout.
//!
//! # Usage
//!
//! ```bash
//! sentinel-runner risk.json events.jsonl --recon-csv recon.csv --log-level info
//! ```

mod event;
mod gate_worker;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sentinel_core::logging::{LogFormat, init_logging};
use sentinel_core::time_util::to_iso8601;
use sentinel_risk::EngineState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::replay::Replay;

/// Trading safety core replay runner.
#[derive(Parser)]
#[command(name = "sentinel-runner", about = "Trading safety core replay runner")]
struct Cli {
    /// Risk configuration file path (JSON).
    config: PathBuf,

    /// Event stream (JSON lines).
    events: PathBuf,

    /// Write the last reconciliation report to this CSV file.
    #[arg(long)]
    recon_csv: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit console logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Pretty };
    init_logging(&cli.log_level, cli.log_dir.as_deref(), "sentinel-runner", format);

    info!(config = %cli.config.display(), events = %cli.events.display(), "sentinel-runner starting");

    // 2. Load configuration
    let config = sentinel_core::config::load_config(&cli.config)?;
    info!(
        config_hash = %config.config_hash,
        gate = config.global_volatility_gate.is_some(),
        promotion = config.promotion.is_some(),
        news_blackout = config.news_blackout.is_some(),
        "config loaded"
    );

    // 3. Build engines
    let state = Arc::new(EngineState::new(config.config_hash.clone()));
    let mut replay = Replay::new(config, Arc::clone(&state))?;

    // 4. Replay events
    let file = tokio::fs::File::open(&cli.events)
        .await
        .with_context(|| format!("failed to open event stream {}", cli.events.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match event::parse_line(&line) {
            None => {}
            Some(Ok(ev)) => replay.handle(ev)?,
            Some(Err(e)) => warn!(line = line_no, error = %e, "skipping malformed event"),
        }
    }
    if let Some(at) = replay.last_event_at() {
        info!(lines = line_no, last_event = %to_iso8601(&at), "end of input");
    }
    let stats = replay.finish()?;
    info!(?stats, "replay stats");

    // 5. Report
    let snapshot = state.current_snapshot();
    println!("{}", serde_json::to_string_pretty(&*snapshot)?);

    if let Some(path) = cli.recon_csv {
        match snapshot.reconciliation {
            Some(ref report) => {
                tokio::fs::write(&path, report.to_csv()?)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), records = report.records.len(), "reconciliation csv written");
            }
            None => warn!("no broker snapshot in input, reconciliation csv not written"),
        }
    }

    Ok(())
}
