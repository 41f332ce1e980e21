//! # Newsroom Scraper
//!
//! Crawls the configured local news sections and stores new articles in
//! SQLite. Re-running only fetches URLs that are not stored yet.
//!
//! ## Usage
//!
//! ```sh
//! newsroom_scraper -l 20 -d articles.db
//! ```
//!
//! ## Exit status
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | run completed |
//! | 1 | fatal error: bad config, database unavailable, client construction |
//! | 2 | too many article failures (`--max-failure-ratio`) or every section failed |
//! | 130 | interrupted with Ctrl-C |

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use newsroom_scraper::utils::ensure_parent_dir;
use newsroom_scraper::{ArticleStore, Database, Orchestrator, RunSummary, ScraperConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::Cli;

/// Process outcome, mapped onto the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Fatal,
    FailureRatio,
    Cancelled,
}

impl ProcessExit {
    fn from_summary(summary: &RunSummary, max_failure_ratio: f64) -> Self {
        if summary.cancelled {
            Self::Cancelled
        } else if summary.exceeds_failure_ratio(max_failure_ratio) {
            Self::FailureRatio
        } else {
            Self::Success
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Fatal => 1,
            Self::FailureRatio => 2,
            Self::Cancelled => 130,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI first so --help works without log noise
    let args = Cli::parse();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("newsroom_scraper starting up");
    debug!(?args, "Parsed CLI arguments");

    let outcome = match run(&args).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Run aborted");
            ProcessExit::Fatal
        }
    };

    info!(
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        exit_code = outcome.code(),
        "newsroom_scraper finished"
    );
    ExitCode::from(outcome.code())
}

async fn run(args: &Cli) -> Result<ProcessExit> {
    // ---- Sources ----
    let config = match &args.config {
        Some(path) => ScraperConfig::load(path).await?,
        None => ScraperConfig::builtin(),
    };
    let sources = config.compile(&args.sources)?;
    info!(
        sources = %sources.iter().map(|s| s.id.as_str()).join(", "),
        "Sources selected"
    );

    // ---- Database ----
    ensure_parent_dir(&args.database)
        .await
        .with_context(|| format!("cannot create directory for {}", args.database.display()))?;
    let db = Database::new(&args.database)
        .await
        .with_context(|| format!("cannot open database {}", args.database.display()))?;
    let store = ArticleStore::new(db.clone());

    // ---- Ctrl-C ----
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current article and stopping");
            signal.cancel();
        }
    });

    // ---- Crawl ----
    let summary = Orchestrator::new(store, args.run_options(), cancel)
        .run(&sources)
        .await?;
    db.close().await;

    for target in &summary.targets {
        debug!(
            source = %target.source,
            section = %target.section,
            discovered = target.discovered,
            persisted = target.persisted,
            failed = target.failed,
            discovery_failed = target.discovery_failed,
            "Section summary"
        );
    }

    let outcome = ProcessExit::from_summary(&summary, args.max_failure_ratio);
    if outcome == ProcessExit::FailureRatio {
        warn!(
            failed = summary.failed(),
            attempted = summary.attempted(),
            failed_targets = summary.failed_targets(),
            max_failure_ratio = args.max_failure_ratio,
            "Failure ratio exceeded"
        );
    }
    Ok(outcome)
}
