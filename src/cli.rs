//! Command-line interface definitions for the newsroom scraper.
//!
//! All arguments can be provided via command-line flags; the database path
//! also falls back to the `SCRAPER_DATABASE` environment variable.

use std::path::PathBuf;

use clap::Parser;
use newsroom_scraper::RunOptions;

/// Command-line arguments for a scrape run.
///
/// # Examples
///
/// ```sh
/// # Every built-in source, default database
/// newsroom_scraper
///
/// # Quick sample of one source into a scratch database
/// newsroom_scraper -l 5 --source hyattsville_wire -d /tmp/sample.db
///
/// # Custom source definitions, no image probing
/// newsroom_scraper -c sources.yaml --no-image-probe
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Maximum candidate URLs processed per section
    #[arg(short, long)]
    pub limit_per_section: Option<usize>,

    /// SQLite database file
    #[arg(short, long, env = "SCRAPER_DATABASE", default_value = "articles.db")]
    pub database: PathBuf,

    /// Optional YAML source configuration (built-in sources when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only run this source; repeat for several
    #[arg(long = "source", value_name = "ID")]
    pub sources: Vec<String>,

    /// Exit with status 2 when more than this share of articles fail
    #[arg(long, default_value_t = 0.5, value_parser = parse_ratio)]
    pub max_failure_ratio: f64,

    /// Leave undeclared image dimensions null instead of probing them
    #[arg(long)]
    pub no_image_probe: bool,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            limit_per_section: self.limit_per_section,
            probe_images: !self.no_image_probe,
        }
    }
}

fn parse_ratio(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("{raw:?} is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0.0..=1.0"))
    }
}
