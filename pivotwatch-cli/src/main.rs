//! pivotwatch CLI: live loop, replay, and inspection commands.
//!
//! Commands:
//! - `run`: poll the configured CSV feed and emit signals until Ctrl-C
//! - `replay`: replay a recorded sample log and print its fingerprint
//! - `pivots`: compute a pivot set from an OHLC triple
//! - `state`: summarize a saved state file
//! - `check-config`: load and validate a config file

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use pivotwatch_core::domain::{SessionKind, SessionOhlc};
use pivotwatch_core::pivot;
use pivotwatch_runner::{
    replay, CsvMarketData, FileThresholds, JsonStateStore, JsonlSignalSink, Orchestrator,
    ReplayOptions, SampleLog, ServiceConfig, StateStore, StaticThresholds, ThresholdSource,
};

#[derive(Parser)]
#[command(
    name = "pivotwatch",
    about = "pivotwatch: pivot-point breakout signals for a single instrument"
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured feed and emit signals until interrupted.
    Run {
        /// Path to the service TOML config.
        #[arg(long)]
        config: PathBuf,
    },
    /// Replay a recorded sample log deterministically.
    Replay {
        /// CSV with `timestamp,price` rows.
        #[arg(long)]
        samples: PathBuf,

        /// Service config; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Classic high for the trading day before the log.
        #[arg(long, requires_all = ["seed_low", "seed_close"])]
        seed_high: Option<Decimal>,

        #[arg(long, requires_all = ["seed_high", "seed_close"])]
        seed_low: Option<Decimal>,

        #[arg(long, requires_all = ["seed_high", "seed_low"])]
        seed_close: Option<Decimal>,

        /// Simulated seconds between ticks. Defaults to the poll interval.
        #[arg(long)]
        step_secs: Option<i64>,

        /// Write emitted signals here as JSONL.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute a pivot set from session high, low and close.
    Pivots {
        #[arg(long)]
        high: Decimal,

        #[arg(long)]
        low: Decimal,

        #[arg(long)]
        close: Decimal,

        /// classic, asia or europe.
        #[arg(long, default_value = "classic")]
        session: SessionKind,

        /// Session date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Summarize a saved state file.
    State {
        #[arg(long, default_value = "data/state.json")]
        path: PathBuf,
    },
    /// Load and validate a config file.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pivotwatch_core=info,pivotwatch_runner=info,warn"));
    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    match cli.command {
        Commands::Run { config } => run_live(&config).await,
        Commands::Replay {
            samples,
            config,
            seed_high,
            seed_low,
            seed_close,
            step_secs,
            out,
        } => {
            let seed = match (seed_high, seed_low, seed_close) {
                (Some(h), Some(l), Some(c)) => Some(SessionOhlc::new(h, l, c)),
                (None, None, None) => None,
                _ => bail!("--seed-high, --seed-low and --seed-close go together"),
            };
            run_replay(&samples, config.as_deref(), seed, step_secs, out.as_deref()).await
        }
        Commands::Pivots {
            high,
            low,
            close,
            session,
            date,
        } => run_pivots(high, low, close, session, date),
        Commands::State { path } => run_state(&path),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

async fn run_live(config_path: &Path) -> Result<()> {
    let config = ServiceConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    match config.paths.thresholds_file.clone() {
        Some(path) => {
            info!(path = %path.display(), "thresholds hot-reload enabled");
            let source = FileThresholds::new(path, config.thresholds.clone());
            serve(config, source).await
        }
        None => {
            let source = StaticThresholds(config.thresholds.clone());
            serve(config, source).await
        }
    }
}

async fn serve<T: ThresholdSource>(config: ServiceConfig, thresholds: T) -> Result<()> {
    let paths = &config.paths;
    info!(
        samples = %paths.samples.display(),
        signals = %paths.signals.display(),
        state = %paths.state.display(),
        "starting"
    );
    let mut orchestrator = Orchestrator::open(
        config.engine_config(),
        CsvMarketData::new(paths.samples.clone(), config.sessions.clone()),
        JsonlSignalSink::new(paths.signals.clone()),
        thresholds,
        config.service.clone(),
        Box::new(JsonStateStore::new(paths.state.clone())),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("interrupt received");
    };
    orchestrator.run(shutdown).await?;
    Ok(())
}

async fn run_replay(
    samples: &Path,
    config_path: Option<&Path>,
    seed: Option<SessionOhlc>,
    step_secs: Option<i64>,
    out: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ServiceConfig::default(),
    };
    let log = SampleLog::read_csv(samples)
        .with_context(|| format!("reading {}", samples.display()))?;
    let options = ReplayOptions {
        step: step_secs.map(chrono::Duration::seconds),
        seed,
    };

    let report = replay(&config.engine_config(), &config.service, log, options).await?;

    println!("Replay: {} samples over {} ticks", report.samples, report.ticks);
    for set in &report.pivot_sets {
        println!("  pivots   {set}");
    }
    for t in &report.transitions {
        println!("  {}  {} -> {}  ({})", t.at, t.from, t.to, t.reason);
    }
    for s in &report.signals {
        println!(
            "  {}  SIGNAL {} {} amplitude={} velocity_ok={} session={} reason={}",
            s.timestamp,
            s.direction,
            s.level,
            s.breakout_amplitude,
            s.velocity_ok,
            s.active_pivot_levels.session,
            s.reason
        );
    }
    println!("Tension zones: {}", report.tension_zones);
    println!("Fingerprint:   {}", report.fingerprint);

    if let Some(path) = out {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        for s in &report.signals {
            writeln!(file, "{}", serde_json::to_string(s)?)?;
        }
        file.flush()?;
        println!("Signals written to: {}", path.display());
    }
    Ok(())
}

fn run_pivots(
    high: Decimal,
    low: Decimal,
    close: Decimal,
    session: SessionKind,
    date: Option<NaiveDate>,
) -> Result<()> {
    let now = Utc::now();
    let date = date.unwrap_or_else(|| now.date_naive());
    let set = pivot::compute(session, date, &SessionOhlc::new(high, low, close), now)?;
    println!("{} pivots for {}", set.session, set.session_date);
    println!("  R2 {:>10}", set.r2);
    println!("  R1 {:>10}", set.r1);
    println!("  P  {:>10}", set.pivot);
    println!("  S1 {:>10}", set.s1);
    println!("  S2 {:>10}", set.s2);
    Ok(())
}

fn run_state(path: &Path) -> Result<()> {
    let Some(snapshot) = JsonStateStore::new(path.to_path_buf()).load()? else {
        println!("No saved state at {}", path.display());
        return Ok(());
    };
    let state = &snapshot.state;
    println!("State saved at {}", snapshot.saved_at);
    println!("  mode:           {}", state.mode());
    println!("  active pivots:  {}", state.active_pivot);
    println!(
        "  switches today: {} ({})",
        state.switches_today, state.last_switch_date
    );
    if let Some(at) = snapshot.last_sample_at {
        println!("  last sample:    {at}");
    }
    for set in &snapshot.eligible {
        println!("  eligible:       {set}");
    }
    for (kind, date) in &snapshot.session_marks {
        println!("  {kind} close acknowledged for {date}");
    }
    for (key, stats) in &state.level_stats {
        println!(
            "  {key:<12} attempts={} validated={} invalidated={} score={}%",
            stats.attempts, stats.validated, stats.invalidated, stats.score_pct
        );
    }
    let recent = state.history.len().saturating_sub(5);
    for t in &state.history[recent..] {
        println!("  {}  {} -> {}  ({})", t.at, t.from, t.to, t.reason);
    }
    Ok(())
}

fn run_check_config(path: &Path) -> Result<()> {
    let config = ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    println!("{} is valid", path.display());
    println!("  poll every {}s", config.service.poll_interval_secs);
    println!("  samples    {}", config.paths.samples.display());
    println!("  state      {}", config.paths.state.display());
    println!("  signals    {}", config.paths.signals.display());
    if let Some(t) = &config.paths.thresholds_file {
        println!("  thresholds {} (hot reload)", t.display());
    }
    Ok(())
}
