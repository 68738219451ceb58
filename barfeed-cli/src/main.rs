//! barfeed CLI: fetch historical bars from the configured vendor.
//!
//! Commands:
//! - `fetch`: bars for one ticker, printed as a table, JSON or CSV
//! - `batch`: every ticker in a watchlist, optionally written as CSV files
//! - `providers`: list backends, their aliases and capabilities
//!
//! Exit status 75 (EX_TEMPFAIL) means the vendor could not be reached in time
//! and the same command should be run again later.

mod logging;

use anyhow::{bail, Context, Result};
use barfeed_core::data::config::process_env;
use barfeed_core::data::{
    build_provider, fetch_batch, provider_from_name, BarProvider, BarResult, DataConfig,
    LogProgress, ProviderKind, Watchlist,
};
use barfeed_core::domain::{Granularity, OhlcvBar, WindowTime};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// BSD `EX_TEMPFAIL`: try again later.
const EXIT_RETRY_LATER: i32 = 75;

#[derive(Parser)]
#[command(name = "barfeed", about = "barfeed: historical OHLCV bars from Alpaca, Polygon or IB")]
struct Cli {
    /// Backend name (alpaca, polygon/massive, ib). Defaults to DATA_BACKEND, then alpaca.
    #[arg(long, global = true)]
    provider: Option<String>,

    /// TOML config file with per-vendor settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch bars for one ticker.
    Fetch {
        ticker: String,

        /// Window start: RFC 3339, or naive YYYY-MM-DD[ HH:MM[:SS]].
        #[arg(long)]
        start: WindowTime,

        /// Window end. Defaults to now.
        #[arg(long)]
        end: Option<WindowTime>,

        /// minute, hour or day.
        #[arg(long, default_value = "minute")]
        granularity: Granularity,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Fetch every ticker in a watchlist.
    Batch {
        /// Watchlist TOML file.
        #[arg(long)]
        watchlist: PathBuf,

        /// Only this group of the watchlist.
        #[arg(long)]
        group: Option<String>,

        #[arg(long)]
        start: WindowTime,

        #[arg(long)]
        end: Option<WindowTime>,

        #[arg(long, default_value = "day")]
        granularity: Granularity,

        /// Write one `<TICKER>.csv` per ticker with data into this directory.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// List backends and what they support.
    Providers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(&cli.log_level, cli.json_logs);

    let file = match &cli.config {
        Some(path) => DataConfig::from_file(path)?,
        None => DataConfig::default(),
    };

    match cli.command {
        Commands::Fetch {
            ticker,
            start,
            end,
            granularity,
            format,
        } => run_fetch(
            cli.provider.as_deref(),
            &file,
            &ticker,
            start,
            end,
            granularity,
            format,
        ),
        Commands::Batch {
            watchlist,
            group,
            start,
            end,
            granularity,
            out_dir,
        } => run_batch(
            cli.provider.as_deref(),
            &file,
            &watchlist,
            group.as_deref(),
            start,
            end,
            granularity,
            out_dir.as_deref(),
        ),
        Commands::Providers => run_providers(&file),
    }
}

fn open_provider(name: Option<&str>, file: &DataConfig) -> Result<Box<dyn BarProvider>> {
    Ok(provider_from_name(name, file, &process_env)?)
}

fn end_or_now(end: Option<WindowTime>) -> WindowTime {
    end.unwrap_or_else(|| chrono::Utc::now().into())
}

fn run_fetch(
    provider_name: Option<&str>,
    file: &DataConfig,
    ticker: &str,
    start: WindowTime,
    end: Option<WindowTime>,
    granularity: Granularity,
    format: OutputFormat,
) -> Result<()> {
    let mut provider = open_provider(provider_name, file)?;
    let end = end_or_now(end);
    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        bail!("ticker must not be empty");
    }

    match provider.fetch(&ticker, start, end, granularity)? {
        BarResult::Found(bars) => {
            warn_insane(&ticker, &bars);
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            match format {
                OutputFormat::Table => write_table(&mut out, &bars)?,
                OutputFormat::Json => {
                    serde_json::to_writer_pretty(&mut out, &bars)?;
                    writeln!(out)?;
                }
                OutputFormat::Csv => write_csv(&mut out, &bars)?,
            }
            Ok(())
        }
        BarResult::Empty => {
            eprintln!("{}: no bars for {ticker} between {start} and {end}", provider.name());
            Ok(())
        }
        BarResult::RetryLater => {
            eprintln!(
                "{}: could not complete the request for {ticker}; try again later",
                provider.name()
            );
            std::process::exit(EXIT_RETRY_LATER);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_batch(
    provider_name: Option<&str>,
    file: &DataConfig,
    watchlist: &Path,
    group: Option<&str>,
    start: WindowTime,
    end: Option<WindowTime>,
    granularity: Granularity,
    out_dir: Option<&Path>,
) -> Result<()> {
    let tickers = Watchlist::from_file(watchlist)?.tickers(group)?;
    if tickers.is_empty() {
        bail!("watchlist {} has no tickers", watchlist.display());
    }

    let mut provider = open_provider(provider_name, file)?;
    let end = end_or_now(end);
    let summary = fetch_batch(
        provider.as_mut(),
        &tickers,
        start,
        end,
        granularity,
        &LogProgress,
    )?;

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
        for (ticker, bars) in &summary.found {
            warn_insane(ticker, bars);
            let path = dir.join(format!("{ticker}.csv"));
            let f = std::fs::File::create(&path)
                .with_context(|| format!("create {}", path.display()))?;
            write_csv(f, bars)?;
        }
    }

    println!(
        "{} tickers: {} with data ({} bars), {} empty, {} pending",
        summary.total,
        summary.found.len(),
        summary.bar_count(),
        summary.empty.len(),
        summary.pending().len()
    );
    if !summary.all_settled() {
        eprintln!("retry later: {}", summary.pending().join(" "));
        std::process::exit(EXIT_RETRY_LATER);
    }
    Ok(())
}

fn run_providers(file: &DataConfig) -> Result<()> {
    println!(
        "{:<10} {:<28} {:>14} {:>10}",
        "NAME", "ALIASES", "EXTENDED_HRS", "PACING"
    );
    for kind in ProviderKind::ALL {
        let provider = build_provider(kind, file, &process_env)?;
        println!(
            "{:<10} {:<28} {:>14} {:>9.1}s",
            kind.as_str(),
            kind.aliases().join(", "),
            if provider.supports_extended_hours() { "yes" } else { "no" },
            provider.min_request_interval().as_secs_f64(),
        );
    }
    Ok(())
}

fn warn_insane(ticker: &str, bars: &[OhlcvBar]) {
    let bad = bars.iter().filter(|b| !b.is_sane()).count();
    if bad > 0 {
        warn!(ticker, bad, "bars failing OHLC sanity checks");
    }
}

fn write_table(out: &mut impl Write, bars: &[OhlcvBar]) -> Result<()> {
    writeln!(
        out,
        "{:<20} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
        "TIMESTAMP", "OPEN", "HIGH", "LOW", "CLOSE", "VOLUME", "VWAP"
    )?;
    for b in bars {
        let vwap = b.vwap.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into());
        writeln!(
            out,
            "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>12} {:>10}",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume,
            vwap
        )?;
    }
    writeln!(out, "{} bars", bars.len())?;
    Ok(())
}

fn write_csv(out: impl Write, bars: &[OhlcvBar]) -> Result<()> {
    let mut w = csv::Writer::from_writer(out);
    for b in bars {
        w.serialize(b)?;
    }
    w.flush()?;
    Ok(())
}
