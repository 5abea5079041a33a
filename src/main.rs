//! CC-Insights - usage statistics from Claude Code telemetry
//!
//! Reads the OTEL metrics the collector writes under the data directory,
//! keeps a local SQLite copy, and prints usage and estimated cost.
//!
//! ## Usage
//!
//! ```bash
//! # Today's usage (default)
//! cci
//!
//! # Last 7 / 30 days
//! cci week
//! cci month
//!
//! # Any window, as JSON
//! cci --json stats --days 14 --label "Sprint"
//!
//! # Only ingest new telemetry
//! cci sync
//!
//! # Payloads the collector failed to forward upstream
//! cci check
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cci_core::{InsightsError, InsightsPaths, LogGuard, init_logging};
use cci_stats::{
    CostModel, ForwardingStatus, MetricsDatabase, OtelParser, PricingConfig, StatsError,
    StatsQuery, StatsSummary, SyncReport, Syncer, Trend, check_failed_forwards,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, error};

/// CC-Insights usage statistics
///
/// Syncs new telemetry into the local database, then reports token usage,
/// estimated cost, and trends over a rolling window.
#[derive(Parser, Debug)]
#[command(name = "cci")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (defaults to $CC_INSIGHTS_DATA_DIR or ~/.claude/cc-insights)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Usage for today
    Today,
    /// Usage for the last 7 days
    Week,
    /// Usage for the last 30 days
    Month,
    /// Usage for a custom window
    Stats {
        /// Window length in days, ending today
        #[arg(long, default_value_t = 1)]
        days: u32,

        /// Heading for the report
        #[arg(long)]
        label: Option<String>,
    },
    /// Ingest new telemetry without reporting
    Sync,
    /// Check for payloads that failed to forward upstream
    Check,
}

impl Command {
    /// Window length and heading for the reporting commands.
    fn window(&self) -> Option<(u32, String)> {
        match self {
            Command::Today => Some((1, "Today".to_string())),
            Command::Week => Some((7, "This Week".to_string())),
            Command::Month => Some((30, "This Month".to_string())),
            Command::Stats { days, label } => Some((
                *days,
                label.clone().unwrap_or_else(|| format!("Last {days} Days")),
            )),
            Command::Sync | Command::Check => None,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match resolve_paths(&cli) {
        Ok(paths) => paths,
        Err(e) => {
            report_error(&e);
            return ExitCode::from(1);
        }
    };

    let _guard = match setup_logging(&cli, &paths) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(&cli, &paths) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            report_error(&e);
            ExitCode::from(1)
        }
    }
}

fn resolve_paths(cli: &Cli) -> Result<InsightsPaths> {
    let paths = match &cli.data_dir {
        Some(dir) => InsightsPaths::new(dir),
        None => InsightsPaths::from_env()?,
    };
    paths.ensure_data_dir()?;
    Ok(paths)
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli, paths: &InsightsPaths) -> cci_core::Result<LogGuard> {
    init_logging(Some(paths.log_dir()), cli.verbose > 0)
}

fn run(cli: &Cli, paths: &InsightsPaths) -> Result<()> {
    let command = cli.command.clone().unwrap_or(Command::Today);
    debug!(?command, data_dir = %paths.data_dir().display(), "Running command");

    let db = MetricsDatabase::open(paths.db_path())
        .with_context(|| format!("opening {}", paths.db_path().display()))?;
    let report = Syncer::new(&db, OtelParser::new(), paths.raw_dir())
        .run()
        .context("sync failed")?;

    if let Command::Check = command {
        let status = check_failed_forwards(paths.failed_dir())
            .with_context(|| format!("checking {}", paths.failed_dir().display()))?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            print_forwarding(&status);
        }
        return Ok(());
    }

    let Some((days, label)) = command.window() else {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_sync(&report);
        }
        return Ok(());
    };

    let pricing = PricingConfig::load(paths.pricing_file())
        .with_context(|| format!("loading {}", paths.pricing_file().display()))?;
    let cost_model = CostModel::new(pricing);
    let summary = StatsQuery::new(&db, &cost_model).summarize(days, &label)?;

    if cli.json {
        let view = json!({
            "summary": summary,
            "cache_hit_rate": summary.cache_hit_rate(),
            "trends": {
                "requests": summary.request_trend(),
                "tokens": summary.token_trend(),
                "cost": summary.cost_trend(),
            },
            "sync": report,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn report_error(e: &anyhow::Error) {
    eprintln!("Error: {}", describe(e));
    if let Some(hint) = guidance(e) {
        eprintln!("Hint: {hint}");
    }
}

/// Error text for the terminal. Storage and query failures use their
/// friendly wording under the outermost context.
fn describe(e: &anyhow::Error) -> String {
    let Some(stats) = e.downcast_ref::<StatsError>() else {
        return format!("{e:#}");
    };
    let detail = stats.friendly_message();
    if e.to_string() == stats.to_string() {
        detail
    } else {
        format!("{e}: {detail}")
    }
}

fn guidance(e: &anyhow::Error) -> Option<&'static str> {
    e.downcast_ref::<InsightsError>().map(InsightsError::guidance)
}

fn print_sync(report: &SyncReport) {
    println!(
        "Synced {} new records from {} lines ({} files).",
        report.records_inserted, report.lines_read, report.files_updated
    );
    if report.malformed_lines + report.anomalies > 0 {
        println!(
            "Skipped {} malformed lines and {} unexpected payloads.",
            report.malformed_lines, report.anomalies
        );
    }
    if report.files_failed > 0 {
        println!("{} files could not be read; see the log.", report.files_failed);
    }
}

fn print_summary(summary: &StatsSummary) {
    let rule = "=".repeat(60);
    let totals = &summary.totals;

    println!("\n{rule}");
    println!("  Claude Code Usage - {}", summary.label);
    println!("  {} to {}", summary.start_date, summary.end_date);
    println!("{rule}");
    println!("  Total Requests:      {}", thousands(totals.request_count));
    println!("  Input Tokens:        {}", thousands(totals.tokens.input));
    println!("  Output Tokens:       {}", thousands(totals.tokens.output));
    println!("  Cache Read Tokens:   {}", thousands(totals.tokens.cache_read));
    println!("  Cache Create Tokens: {}", thousands(totals.tokens.cache_creation));
    println!("  Total Tokens:        {}", thousands(totals.total_tokens()));
    println!("  Est. Cost:           ${:.2}", totals.cost_usd);
    if let Some(rate) = summary.cache_hit_rate() {
        println!("  Cache Hit Rate:      {rate:.1}%");
    }

    println!("\n  vs previous {} days:", summary.window_days);
    println!("    requests {}", trend(summary.request_trend()));
    println!("    tokens   {}", trend(summary.token_trend()));
    println!("    cost     {}", trend(summary.cost_trend()));

    if !summary.by_model.is_empty() {
        println!("\n  By Model:");
        println!("  {}", "-".repeat(56));
        for usage in &summary.by_model {
            println!(
                "  {:<14} |  {:>5} req  |  {:>12} tokens  |  ${:.2}",
                usage.model.as_deref().unwrap_or("(unknown)"),
                usage.request_count,
                thousands(usage.tokens.total()),
                usage.cost_usd
            );
        }
    }

    if !summary.hourly.is_empty() {
        let peak = summary
            .hourly
            .iter()
            .map(|h| h.request_count)
            .max()
            .unwrap_or(1)
            .max(1);
        println!("\n  By Hour:");
        for hour in &summary.hourly {
            let width = (hour.request_count * 30 / peak).max(1) as usize;
            println!(
                "  {:02}:00 {:>5}  {}",
                hour.hour,
                hour.request_count,
                "#".repeat(width)
            );
        }
    }

    if summary.window_days > 1 && !summary.daily.is_empty() {
        println!("\n  Daily Breakdown:");
        println!("  {}", "-".repeat(56));
        for day in &summary.daily {
            println!(
                "  {}  |  {:>5} req  |  {:>12} tokens  |  ${:.2}",
                day.date,
                day.totals.request_count,
                thousands(day.totals.total_tokens()),
                day.totals.cost_usd
            );
        }
    }

    println!("{rule}\n");
}

fn print_forwarding(status: &ForwardingStatus) {
    let rule = "=".repeat(50);
    println!("\n{rule}");
    println!("  Upstream Forwarding Status");
    println!("{rule}");

    if !status.dir_exists {
        println!("  [OK] No failed directory found");
    } else if status.is_ok() {
        println!("  [OK] All data successfully forwarded");
    } else {
        for file in &status.files {
            println!("  [!] {}: {} failed records", file.name, file.records);
        }
        println!("\n  Total failed: {} records", status.total_failed());
    }

    println!("{rule}\n");
}

fn trend(trend: Trend) -> String {
    match trend {
        Trend::Change(percent) => format!("{percent:+.1}%"),
        Trend::NoData => "n/a (no previous data)".to_string(),
    }
}

/// `1234567` → `1,234,567`
fn thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0 {
        out.insert(0, '-');
    }
    out
}
