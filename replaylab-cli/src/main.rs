//! ReplayLab CLI — run backtests over CSV bar tables.
//!
//! Commands:
//! - `run` — execute a backtest from a TOML run request and a decision schedule
//! - `inspect` — list the bar tables in a data directory with their ranges

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use replaylab_core::data::{BarCache, BarTable, CsvBarTable, Resolver};
use replaylab_runner::{
    run_backtest, BacktestResult, ExecutionMode, ProgressEvent, RunOptions, RunRequest,
    ScheduledDecisions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replaylab", about = "ReplayLab CLI — multi-symbol backtest replay engine")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML run request.
    Run {
        /// Path to the run request (TOML).
        #[arg(long)]
        request: PathBuf,

        /// Decision schedule (TOML with [[signal]] tables).
        #[arg(long)]
        decisions: PathBuf,

        /// Directory holding `<exchange>_<SYMBOL>_<tf>.csv` bar tables.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Override the request's execution mode.
        #[arg(long, value_parser = parse_mode)]
        mode: Option<ExecutionMode>,

        /// Write the full result as JSON here.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print progress to stderr.
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// List bar tables and their time ranges.
    Inspect {
        /// Directory holding CSV bar tables.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Run {
            request,
            decisions,
            data_dir,
            mode,
            out,
            progress,
        } => run_cmd(&request, &decisions, data_dir, mode, out.as_deref(), progress),
        Commands::Inspect { data_dir } => inspect_cmd(data_dir),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_mode(s: &str) -> Result<ExecutionMode, String> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "timeline" => Ok(ExecutionMode::Timeline),
        "batch" | "batch_open_close" => Ok(ExecutionMode::BatchOpenClose),
        other => Err(format!(
            "unknown mode '{other}'. Valid: timeline, batch_open_close"
        )),
    }
}

fn run_cmd(
    request_path: &Path,
    decisions_path: &Path,
    data_dir: PathBuf,
    mode: Option<ExecutionMode>,
    out: Option<&Path>,
    show_progress: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(request_path)
        .with_context(|| format!("reading {}", request_path.display()))?;
    let mut request = RunRequest::from_toml_str(&text)?;
    if let Some(mode) = mode {
        request.mode = mode;
    }

    let text = std::fs::read_to_string(decisions_path)
        .with_context(|| format!("reading {}", decisions_path.display()))?;
    let decisions = ScheduledDecisions::from_toml_str(&text)?;
    if decisions.is_empty() {
        bail!("{} contains no signals", decisions_path.display());
    }

    if !data_dir.is_dir() {
        bail!("data directory does not exist: {}", data_dir.display());
    }
    let resolver = Resolver::new(Arc::new(BarCache::new()))
        .with_table(Arc::new(CsvBarTable::new(data_dir)))
        .with_page_size(request.page_size);

    let printer = |e: &ProgressEvent| {
        eprintln!(
            "[{:?}] {}/{} ({:.0}%){}",
            e.stage,
            e.processed,
            e.total,
            e.fraction() * 100.0,
            if e.completed { " done" } else { "" }
        );
    };
    let mut options = RunOptions::default();
    if show_progress {
        options = options.with_progress(&printer);
    }

    info!(signals = decisions.len(), "decisions loaded");
    let result = run_backtest(&request, &resolver, &decisions, options)?;
    print_summary(&result);

    if let Some(path) = out {
        std::fs::write(path, result.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Result saved to: {}", path.display());
    }
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let r = &result.report;
    println!("Run {} ({:?})", &result.run_id[..12], result.mode);
    println!(
        "Bars: {}  Signals: {}  Trades: {}  Elapsed: {} ms",
        result.bar_count, result.signal_count, result.closed_count, result.elapsed_ms
    );
    println!(
        "Profit: {:.2}  Return: {:.2}%  Win rate: {:.1}%  Profit factor: {:.2}",
        r.total_profit,
        r.total_return * 100.0,
        r.win_rate * 100.0,
        r.profit_factor
    );
    println!(
        "Max DD: {:.2}%  Sharpe: {:.2}  Sortino: {:.2}  Calmar: {:.2}",
        r.max_drawdown * 100.0,
        r.sharpe,
        r.sortino,
        r.calmar
    );
    println!();
    println!(
        "{:<12} {:>7} {:>12} {:>10} {:>8}",
        "Symbol", "Trades", "Profit", "Funding", "Win %"
    );
    println!("{}", "-".repeat(53));
    for s in &result.symbols {
        println!(
            "{:<12} {:>7} {:>12.2} {:>10.4} {:>7.1}%",
            s.symbol,
            s.report.total_trades,
            s.report.total_profit,
            s.accumulated_funding,
            s.report.win_rate * 100.0
        );
    }
}

fn inspect_cmd(data_dir: PathBuf) -> Result<()> {
    if !data_dir.is_dir() {
        println!("Data directory does not exist: {}", data_dir.display());
        return Ok(());
    }
    let table = CsvBarTable::new(data_dir);
    let names = table.list_tables()?;
    if names.is_empty() {
        println!("No bar tables in {}", table.dir().display());
        return Ok(());
    }

    println!("Tables: {}", names.len());
    println!();
    println!("{:<32} {:>8} {:<20} {:<20}", "Table", "Bars", "First", "Last");
    println!("{}", "-".repeat(83));
    for name in &names {
        let bars = table.scan_after(name, i64::MIN, i64::MAX, usize::MAX)?;
        let first = bars.first().map_or_else(|| "-".into(), |b| format_ts(b.timestamp));
        let last = bars.last().map_or_else(|| "-".into(), |b| format_ts(b.timestamp));
        println!("{:<32} {:>8} {:<20} {:<20}", name, bars.len(), first, last);
    }
    Ok(())
}

fn format_ts(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}
