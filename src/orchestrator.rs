//! Run driver: discover, extract and persist for every configured target.
//!
//! Sources run concurrently and share only the host rate limiter and the
//! database pool. Within a source, targets and their articles are processed
//! one at a time by the task that owns that source's [`CrawlState`].
//!
//! A failing article is logged and counted, never fatal. A failing listing
//! page fails only its target. Not being able to build a source's HTTP
//! client or load its known URLs aborts the run, because without the known
//! set every URL would be fetched again.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::Source;
use crate::discovery::LinkDiscovery;
use crate::extract::{ArticleExtractor, ExtractError};
use crate::fetch::{FetchClient, FetchError, HostRateLimiter};
use crate::images::ImageResolver;
use crate::models::SectionTarget;
use crate::store::{ArticleStore, CrawlState, InsertOutcome, StoreError};

/// Per-run knobs from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum candidate URLs processed per target, taken in sorted order.
    pub limit_per_section: Option<usize>,
    /// Probe undeclared image dimensions over the network.
    pub probe_images: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit_per_section: None,
            probe_images: true,
        }
    }
}

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("source {source_id}: could not build HTTP client: {source}")]
    Client {
        source_id: String,
        #[source]
        source: FetchError,
    },

    #[error("source {source_id}: could not load known URLs: {source}")]
    KnownSet {
        source_id: String,
        #[source]
        source: StoreError,
    },
}

/// Failure of a single article; counted, then the run moves on.
#[derive(Debug, Error)]
pub enum ArticleError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters for one (source, section) target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub source: String,
    pub section: String,
    /// Candidate URLs found by discovery, before the per-section limit.
    pub discovered: usize,
    /// Candidates already stored for this source.
    pub skipped: usize,
    pub persisted: usize,
    pub failed: usize,
    /// Inserts that found an existing row.
    pub conflicts: usize,
    /// The first listing page could not be fetched.
    pub discovery_failed: bool,
}

impl TargetSummary {
    fn new(target: &SectionTarget) -> Self {
        Self {
            source: target.source.clone(),
            section: target.section.clone(),
            ..Self::default()
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Targets that started, grouped by source in configuration order.
    pub targets: Vec<TargetSummary>,
    /// The run was interrupted before finishing.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn discovered(&self) -> usize {
        self.targets.iter().map(|t| t.discovered).sum()
    }

    pub fn skipped(&self) -> usize {
        self.targets.iter().map(|t| t.skipped).sum()
    }

    pub fn persisted(&self) -> usize {
        self.targets.iter().map(|t| t.persisted).sum()
    }

    pub fn failed(&self) -> usize {
        self.targets.iter().map(|t| t.failed).sum()
    }

    pub fn conflicts(&self) -> usize {
        self.targets.iter().map(|t| t.conflicts).sum()
    }

    pub fn failed_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.discovery_failed).count()
    }

    /// Articles that reached extraction, whatever the outcome.
    pub fn attempted(&self) -> usize {
        self.persisted() + self.failed() + self.conflicts()
    }

    /// True when more than `ratio` of attempted articles failed, or when
    /// every target failed discovery.
    pub fn exceeds_failure_ratio(&self, ratio: f64) -> bool {
        let all_targets_failed =
            !self.targets.is_empty() && self.failed_targets() == self.targets.len();
        let attempted = self.attempted();
        let ratio_exceeded = attempted > 0 && self.failed() as f64 / attempted as f64 > ratio;
        all_targets_failed || ratio_exceeded
    }
}

/// Drives a run over compiled sources.
#[derive(Debug)]
pub struct Orchestrator {
    store: ArticleStore,
    limiter: Arc<HostRateLimiter>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(store: ArticleStore, options: RunOptions, cancel: CancellationToken) -> Self {
        Self {
            store,
            limiter: Arc::new(HostRateLimiter::new()),
            options,
            cancel,
        }
    }

    /// Runs every source concurrently and collects their summaries.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunError`] raised by any source. The remaining
    /// sources are dropped at their next await point.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run(&self, sources: &[Source]) -> Result<RunSummary, RunError> {
        let per_source = try_join_all(sources.iter().map(|source| self.run_source(source))).await?;

        let mut summary = RunSummary {
            targets: per_source.into_iter().flatten().collect(),
            ..RunSummary::default()
        };
        summary.cancelled = self.cancel.is_cancelled();

        info!(
            discovered = summary.discovered(),
            skipped = summary.skipped(),
            persisted = summary.persisted(),
            failed = summary.failed(),
            conflicts = summary.conflicts(),
            failed_targets = summary.failed_targets(),
            cancelled = summary.cancelled,
            "Run finished"
        );
        Ok(summary)
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn run_source(&self, source: &Source) -> Result<Vec<TargetSummary>, RunError> {
        let client = FetchClient::new(&source.id, &source.fetch, Arc::clone(&self.limiter))
            .map_err(|e| RunError::Client {
                source_id: source.id.clone(),
                source: e,
            })?;
        let mut state = self
            .store
            .load_known(&source.id)
            .await
            .map_err(|e| RunError::KnownSet {
                source_id: source.id.clone(),
                source: e,
            })?;
        info!(known = state.len(), targets = source.targets.len(), "Starting source");

        let discovery = LinkDiscovery::new(&client);
        let extractor = ArticleExtractor::new(
            &client,
            &source.rules,
            ImageResolver::new(&client, self.options.probe_images),
            source.store_body_text,
        );

        let mut summaries = Vec::with_capacity(source.targets.len());
        for target in &source.targets {
            if self.cancel.is_cancelled() {
                warn!("Cancelled; skipping remaining sections");
                break;
            }
            let summary = self
                .run_target(target, &discovery, &extractor, &mut state)
                .await;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    #[instrument(level = "info", skip_all, fields(section = %target.section))]
    async fn run_target(
        &self,
        target: &SectionTarget,
        discovery: &LinkDiscovery<'_>,
        extractor: &ArticleExtractor<'_>,
        state: &mut CrawlState,
    ) -> TargetSummary {
        let mut summary = TargetSummary::new(target);

        let discovered = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return summary,
            result = discovery.discover(target) => result,
        };
        let urls = match discovered {
            Ok(urls) => urls,
            Err(e) => {
                error!(listing = %target.listing_url, error = %e, "Discovery failed");
                summary.discovery_failed = true;
                return summary;
            }
        };
        summary.discovered = urls.len();

        let limit = self.options.limit_per_section.unwrap_or(usize::MAX);
        for url in urls.into_iter().take(limit) {
            if state.contains(&url) {
                summary.skipped += 1;
                continue;
            }

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = self.process_article(extractor, &target.source, &url, &target.section) => Some(result),
            };
            let Some(outcome) = outcome else {
                warn!("Cancelled; leaving section early");
                break;
            };

            match outcome {
                Ok(InsertOutcome::Inserted) => {
                    state.record_known(&url);
                    summary.persisted += 1;
                }
                Ok(InsertOutcome::AlreadyPresent) => {
                    state.record_known(&url);
                    summary.conflicts += 1;
                }
                Err(e) => {
                    warn!(%url, error = %e, "Article failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            discovered = summary.discovered,
            skipped = summary.skipped,
            persisted = summary.persisted,
            failed = summary.failed,
            conflicts = summary.conflicts,
            "Section done"
        );
        summary
    }

    async fn process_article(
        &self,
        extractor: &ArticleExtractor<'_>,
        source_id: &str,
        url: &str,
        section: &str,
    ) -> Result<InsertOutcome, ArticleError> {
        let record = extractor.extract(url, section).await?;
        Ok(self.store.insert(source_id, &record).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ClassificationConfig, DateConfig, PaginationConfig, RulesConfig, SectionConfig,
        SourceConfig,
    };
    use crate::models::ArticleRecord;
    use crate::store::Database;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer, id: &str, sections: &[&str]) -> Source {
        SourceConfig {
            id: id.to_string(),
            user_agent: "orchestrator-test".to_string(),
            accept_language: None,
            min_delay_ms: 0,
            timeout_secs: 5,
            max_retries: 0,
            store_body_text: false,
            classification: ClassificationConfig {
                pattern: r"^/news/\d+/$".to_string(),
                prefixes: Default::default(),
            },
            pagination: PaginationConfig::SinglePage,
            rules: RulesConfig {
                headline: "h1".to_string(),
                body: "div.body".to_string(),
                paragraph: "p".to_string(),
                image: "img".to_string(),
                ad_marker: None,
                date: DateConfig::Meta {
                    property: "article:published_time".to_string(),
                },
            },
            sections: sections
                .iter()
                .map(|label| SectionConfig {
                    label: (*label).to_string(),
                    url: format!("{}/{label}/", server.uri()),
                })
                .collect(),
        }
        .compile()
        .unwrap()
    }

    fn article(n: u32, dated: bool) -> String {
        let meta = if dated {
            r#"<meta property="article:published_time" content="2024-03-10T12:00:00Z">"#
        } else {
            ""
        };
        format!(
            r#"<html><head>{meta}</head><body>
                 <h1>Story number {n}</h1>
                 <div class="body">
                   <p>First paragraph of story {n}.</p>
                   <img src="/img/{n}.jpg" width="10" height="10">
                 </div>
               </body></html>"#
        )
    }

    async fn mount_listing(server: &MockServer, section: &str) {
        let body = r#"<a href="/news/1/">1</a> <a href="/news/2/">2</a>
                      <a href="/news/3/#comments">3</a> <a href="/about/">about</a>"#;
        Mock::given(method("GET"))
            .and(path(format!("/{section}/")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_article(server: &MockServer, n: u32, dated: bool) {
        Mock::given(method("GET"))
            .and(path(format!("/news/{n}/")))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(n, dated)))
            .mount(server)
            .await;
    }

    async fn store() -> ArticleStore {
        ArticleStore::new(Database::new_in_memory().await.unwrap())
    }

    fn options() -> RunOptions {
        RunOptions {
            limit_per_section: None,
            probe_images: false,
        }
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        for n in 1..=3 {
            mount_article(&server, n, true).await;
        }
        let store = store().await;
        let sources = vec![source(&server, "paper", &["local"])];

        let first = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&sources)
            .await
            .unwrap();
        assert_eq!(first.discovered(), 3);
        assert_eq!(first.persisted(), 3);

        let second = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&sources)
            .await
            .unwrap();
        assert_eq!(second.persisted(), 0);
        assert_eq!(second.skipped(), 3);
        assert_eq!(store.count("paper").await.unwrap(), 3);
        assert!(!second.exceeds_failure_ratio(0.5));
    }

    #[tokio::test]
    async fn test_failing_article_does_not_stop_the_section() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        mount_article(&server, 1, true).await;
        Mock::given(method("GET"))
            .and(path("/news/2/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_article(&server, 3, true).await;
        let store = store().await;

        let summary = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&[source(&server, "paper", &["local"])])
            .await
            .unwrap();

        assert_eq!(summary.persisted(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.exceeds_failure_ratio(0.5));
        assert!(summary.exceeds_failure_ratio(0.2));

        let urls: Vec<_> = store
            .list("paper")
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.url)
            .collect();
        assert_eq!(
            urls,
            [
                format!("{}/news/1/", server.uri()),
                format!("{}/news/3/", server.uri())
            ]
        );
    }

    #[tokio::test]
    async fn test_stored_rows_hold_derived_counts_and_null_dates() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        mount_article(&server, 1, true).await;
        mount_article(&server, 2, false).await;
        mount_article(&server, 3, true).await;
        let store = store().await;

        Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&[source(&server, "paper", &["local"])])
            .await
            .unwrap();

        let rows = store.list("paper").await.unwrap();
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.headline_len as usize, row.headline.split_whitespace().count());
            assert_eq!(row.num_images as usize, row.images().unwrap().len());
            assert_eq!(row.section, "local");
        }
        let undated = rows.iter().find(|r| r.url.ends_with("/news/2/")).unwrap();
        assert_eq!(undated.pub_date, None);
        assert_eq!(undated.word_count, 5);
    }

    #[tokio::test]
    async fn test_known_urls_are_not_fetched() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        Mock::given(method("GET"))
            .and(path("/news/1/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(1, true)))
            .expect(0)
            .mount(&server)
            .await;
        mount_article(&server, 2, true).await;
        mount_article(&server, 3, true).await;

        let store = store().await;
        let seeded = ArticleRecord {
            url: format!("{}/news/1/", server.uri()),
            section: "local".to_string(),
            headline: "Seeded".to_string(),
            pub_date: None,
            word_count: 0,
            num_links: 0,
            images: vec![],
            num_ads_est: 0,
            body_text: None,
        };
        store.insert("paper", &seeded).await.unwrap();

        let summary = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&[source(&server, "paper", &["local"])])
            .await
            .unwrap();
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.persisted(), 2);
    }

    #[tokio::test]
    async fn test_limit_per_section_caps_candidates() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        for n in 1..=3 {
            mount_article(&server, n, true).await;
        }
        let store = store().await;
        let options = RunOptions {
            limit_per_section: Some(1),
            probe_images: false,
        };

        let summary = Orchestrator::new(store.clone(), options, CancellationToken::new())
            .run(&[source(&server, "paper", &["local"])])
            .await
            .unwrap();
        assert_eq!(summary.discovered(), 3);
        assert_eq!(summary.persisted(), 1);
        assert_eq!(store.count("paper").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_url_across_sections_is_fetched_once() {
        let server = MockServer::start().await;
        mount_listing(&server, "politics").await;
        mount_listing(&server, "business").await;
        for n in 1..=3 {
            mount_article(&server, n, true).await;
        }
        let store = store().await;

        let summary = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&[source(&server, "paper", &["politics", "business"])])
            .await
            .unwrap();
        assert_eq!(summary.targets.len(), 2);
        assert_eq!(summary.targets[0].persisted, 3);
        assert_eq!(summary.targets[1].skipped, 3);
        assert_eq!(store.count("paper").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sources_run_independently() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        for n in 1..=3 {
            mount_article(&server, n, true).await;
        }
        let store = store().await;
        let sources = vec![
            source(&server, "paper_a", &["local"]),
            source(&server, "paper_b", &["local"]),
        ];

        let summary = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&sources)
            .await
            .unwrap();
        assert_eq!(summary.persisted(), 6);
        assert_eq!(summary.targets[0].source, "paper_a");
        assert_eq!(summary.targets[1].source, "paper_b");
        assert_eq!(store.count("paper_b").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unusable_client_aborts_every_source() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        for n in 1..=3 {
            mount_article(&server, n, true).await;
        }
        let store = store().await;
        let mut broken = source(&server, "broken", &["local"]);
        broken.fetch.accept_language = Some("bad\nvalue".to_string());
        let sources = vec![broken, source(&server, "healthy", &["local"])];

        let err = Orchestrator::new(store.clone(), options(), CancellationToken::new())
            .run(&sources)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Client { ref source_id, .. } if source_id == "broken"));
        assert!(server.received_requests().await.unwrap().is_empty());
        assert_eq!(store.count("healthy").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_only_the_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let store = store().await;

        let summary = Orchestrator::new(store, options(), CancellationToken::new())
            .run(&[source(&server, "paper", &["broken"])])
            .await
            .unwrap();
        assert_eq!(summary.failed_targets(), 1);
        assert!(summary.exceeds_failure_ratio(0.5));
    }

    #[tokio::test]
    async fn test_cancelled_run_makes_no_requests() {
        let server = MockServer::start().await;
        mount_listing(&server, "local").await;
        let store = store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = Orchestrator::new(store.clone(), options(), cancel)
            .run(&[source(&server, "paper", &["local"])])
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert!(summary.targets.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
        assert_eq!(store.count("paper").await.unwrap(), 0);
    }

    #[test]
    fn test_failure_ratio_edges() {
        let empty = RunSummary::default();
        assert!(!empty.exceeds_failure_ratio(0.0));

        let all_failed = RunSummary {
            targets: vec![TargetSummary {
                failed: 2,
                ..TargetSummary::default()
            }],
            cancelled: false,
        };
        assert!(all_failed.exceeds_failure_ratio(0.5));
        assert!(!all_failed.exceeds_failure_ratio(1.0));

        let nothing_new = RunSummary {
            targets: vec![TargetSummary {
                discovered: 4,
                skipped: 4,
                ..TargetSummary::default()
            }],
            cancelled: false,
        };
        assert!(!nothing_new.exceeds_failure_ratio(0.0));
    }
}
