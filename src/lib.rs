//! # Newsroom Scraper
//!
//! Incrementally crawls section pages of local news sites, extracts a
//! normalized set of per-article metrics, and stores each article exactly
//! once per source in SQLite.
//!
//! ## Architecture
//!
//! The pipeline for each configured source:
//! 1. **Discovery**: walk a section's listing pages and keep links that match
//!    the source's article URL rule ([`discovery`])
//! 2. **Dedup**: skip URLs already stored for the source ([`store`])
//! 3. **Extraction**: fetch each new article and measure headline, body,
//!    links, images, ads and publication date ([`extract`], [`images`])
//! 4. **Persistence**: insert the record, tolerating concurrent duplicates
//!
//! Sources run concurrently; everything inside one source is sequential and
//! throttled per host by the shared [`fetch::HostRateLimiter`].

pub mod config;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod images;
pub mod models;
pub mod orchestrator;
pub mod scrapers;
pub mod store;
pub mod utils;

pub use config::{ConfigError, ScraperConfig, Source};
pub use orchestrator::{Orchestrator, RunError, RunOptions, RunSummary};
pub use store::{ArticleStore, Database};
