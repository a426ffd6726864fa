//! bgt: drive background timers from the command line.
//!
//! `bgt run` schedules timers, lets them run for a fixed wall-clock window,
//! then tears the scheduler down. Every firing and the final snapshot are
//! printed to stdout as JSON lines; logs go to stderr.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bgtimer_core::config::{Config, LogFormat};
use bgtimer_core::logging::init_logging;
use bgtimer_core::{BackgroundTimer, BridgeTimers, TimerKind};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

/// Background-safe timers
#[derive(Parser, Debug)]
#[command(name = "bgt", version, about = "Drive background-safe timers from the command line")]
struct Cli {
    /// Path to a bgtimer.toml config file
    #[arg(long, global = true, env = "BGT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule timers and report firings until the window closes
    Run {
        /// One-shot timer as ID:DELAY_MS (repeatable)
        #[arg(long = "once", value_name = "ID:MS")]
        once: Vec<TimerArg>,

        /// Repeating timer as ID:INTERVAL_MS (repeatable)
        #[arg(long = "every", value_name = "ID:MS")]
        every: Vec<TimerArg>,

        /// Cancel one-shot ID after MS (repeatable)
        #[arg(long = "cancel-once", value_name = "ID:MS")]
        cancel_once: Vec<TimerArg>,

        /// Cancel repeating ID after MS (repeatable)
        #[arg(long = "cancel-every", value_name = "ID:MS")]
        cancel_every: Vec<TimerArg>,

        /// How long to keep running before shutdown (ms)
        #[arg(long = "for", value_name = "MS", default_value_t = 1000)]
        run_for: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// `ID:MS` pair as the boundary sees it: two plain numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimerArg {
    id: f64,
    ms: f64,
}

impl FromStr for TimerArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, ms) = s
            .split_once(':')
            .ok_or_else(|| format!("expected ID:MS, got '{s}'"))?;
        let id = id
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid id '{id}': {e}"))?;
        let ms = ms
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid milliseconds '{ms}': {e}"))?;
        Ok(Self { id, ms })
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    Config::load(path).map_err(|err| match err.remediation() {
        Some(hint) => anyhow!("{err}\n\n{}", hint.render_plain()),
        None => anyhow!(err),
    })
}

fn print_event(value: &serde_json::Value) {
    println!("{value}");
}

fn firing_printer(kind: TimerKind, started: Instant) -> impl Fn(f64) + Send + Sync + 'static {
    move |id| {
        print_event(&json!({
            "event": "fired",
            "kind": kind,
            "id": id,
            "at_ms": started.elapsed().as_millis() as u64,
        }));
    }
}

async fn run(
    config: &Config,
    once: &[TimerArg],
    every: &[TimerArg],
    cancel_once: &[TimerArg],
    cancel_every: &[TimerArg],
    run_for: u64,
) -> Result<()> {
    let timers = BackgroundTimer::spawn(config).context("failed to start background timer")?;
    let bridge = BridgeTimers::new(timers);
    let started = Instant::now();

    for arg in once {
        bridge.set_timeout(arg.id, arg.ms, firing_printer(TimerKind::OneShot, started));
    }
    for arg in every {
        bridge.set_interval(arg.id, arg.ms, firing_printer(TimerKind::Repeating, started));
    }

    let mut cancels = Vec::new();
    for (kind, arg) in cancel_once
        .iter()
        .map(|arg| (TimerKind::OneShot, *arg))
        .chain(cancel_every.iter().map(|arg| (TimerKind::Repeating, *arg)))
    {
        let bridge = bridge.clone();
        let after = bgtimer_core::bridge::coerce_millis(arg.ms);
        cancels.push(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            debug!(raw_id = arg.id, kind = %kind, "Cancelling timer");
            match kind {
                TimerKind::OneShot => bridge.clear_timeout(arg.id),
                TimerKind::Repeating => bridge.clear_interval(arg.id),
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(run_for)).await;
    for task in cancels {
        task.abort();
    }

    let snapshot = bridge
        .timers()
        .shutdown()
        .await
        .ok_or_else(|| anyhow!("background timer stopped before shutdown"))?;
    info!(
        fired = snapshot.stats.fired,
        cancelled = snapshot.stats.cancelled,
        "Run window closed"
    );
    print_event(&json!({
        "event": "shutdown",
        "elapsed_ms": started.elapsed().as_millis() as u64,
        "snapshot": snapshot,
    }));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.json_logs {
        config.log.format = LogFormat::Json;
    }
    if let Some(level) = &cli.log_level {
        config.log.level.clone_from(level);
    }
    init_logging(&config.log).context("failed to initialize logging")?;

    match cli.command {
        Commands::Run {
            once,
            every,
            cancel_once,
            cancel_every,
            run_for,
        } => run(&config, &once, &every, &cancel_once, &cancel_every, run_for).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
