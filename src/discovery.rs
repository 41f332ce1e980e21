//! Listing-page walker that turns a section into candidate article URLs.
//!
//! Every `a[href]` on a listing page is resolved against the page URL,
//! stripped of its fragment, and kept only if it stays on the serving host
//! and its path matches the section's [`ClassificationRule`]. Links that
//! match nothing are dropped silently: navigation, tag pages and section
//! fronts are exactly what the rule exists to reject.
//!
//! # Pagination
//!
//! | Strategy | Behaviour |
//! |----------|-----------|
//! | [`Pagination::SinglePage`] | one fetch, then stop |
//! | [`Pagination::LoadMore`] | follow the first element matching the "load more" selector until none is found, a page repeats, or `max_pages` is hit |

use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetch::{FetchClient, FetchError};
use crate::models::SectionTarget;

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector is valid"));

/// Placeholder substituted with a section's path prefix in rule templates.
pub const PREFIX_PLACEHOLDER: &str = "{prefix}";

/// Default cap on listing pages followed for one section.
pub const DEFAULT_MAX_PAGES: usize = 50;

/// Decides whether a resolved URL is an article.
///
/// The regex is matched against the URL's path, with `?query` appended when
/// the URL has one, so anchoring with `$` also rejects query-string variants.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pattern: Regex,
}

impl ClassificationRule {
    /// Compiles a rule from a path regex.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Compiles a rule for one section, substituting `{prefix}` with the
    /// regex-escaped prefix mapped to `label` (or `label` itself when the
    /// map has no entry).
    pub fn for_section(
        template: &str,
        prefixes: &BTreeMap<String, String>,
        label: &str,
    ) -> Result<Self, regex::Error> {
        let prefix = prefixes.get(label).map(String::as_str).unwrap_or(label);
        Self::new(&template.replace(PREFIX_PLACEHOLDER, &regex::escape(prefix)))
    }

    /// The compiled pattern source, for logging.
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Whether `url` looks like an article under this rule.
    pub fn matches(&self, url: &Url) -> bool {
        match url.query() {
            Some(q) => self.pattern.is_match(&format!("{}?{}", url.path(), q)),
            None => self.pattern.is_match(url.path()),
        }
    }
}

/// How a section's listing continues past its first page.
#[derive(Debug, Clone)]
pub enum Pagination {
    /// The listing has no next-page affordance.
    SinglePage,
    /// Follow the first element matching `next` (its `href`).
    LoadMore {
        /// Selector for the "load more" / next-page control.
        next: Selector,
        /// Hard stop on pages fetched for one section.
        max_pages: usize,
    },
}

/// Errors that abort discovery for a whole section.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The first listing page could not be fetched.
    #[error("failed to fetch listing page {url}: {source}")]
    Listing {
        /// Listing URL.
        url: String,
        /// Underlying fetch failure.
        #[source]
        source: FetchError,
    },
}

/// Links found on a single listing page.
#[derive(Debug, Default)]
struct ListingScan {
    articles: Vec<String>,
    next_page: Option<Url>,
}

/// Walks listing pages through a [`FetchClient`].
#[derive(Debug)]
pub struct LinkDiscovery<'a> {
    client: &'a FetchClient,
}

impl<'a> LinkDiscovery<'a> {
    pub fn new(client: &'a FetchClient) -> Self {
        Self { client }
    }

    /// Collects article URLs for `target`, sorted and de-duplicated.
    ///
    /// A failure on the first page is an error; a failure on a later page
    /// ends pagination and keeps what was found so far.
    #[instrument(level = "info", skip_all, fields(source = %target.source, section = %target.section))]
    pub async fn discover(&self, target: &SectionTarget) -> Result<Vec<String>, DiscoveryError> {
        let mut links = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut next = Some(target.listing_url.clone());
        let mut pages = 0usize;

        while let Some(page_url) = next.take() {
            if !visited.insert(page_url.to_string()) {
                debug!(url = %page_url, "Listing page already visited; stopping");
                break;
            }

            let page = match self.client.fetch(page_url.as_str()).await {
                Ok(page) => page,
                Err(source) if pages == 0 => {
                    return Err(DiscoveryError::Listing {
                        url: page_url.to_string(),
                        source,
                    });
                }
                Err(e) => {
                    warn!(url = %page_url, error = %e, "Listing page failed; ending pagination");
                    break;
                }
            };
            pages += 1;

            let base = Url::parse(&page.final_url).unwrap_or(page_url);
            if base.host_str() != target.listing_url.host_str() {
                info!(
                    from = %target.listing_url,
                    to = %base,
                    "Listing redirected to another host"
                );
            }
            let scan = scan_listing(&page.body, &base, target);
            debug!(url = %base, found = scan.articles.len(), "Scanned listing page");
            links.extend(scan.articles);

            next = match &target.pagination {
                Pagination::SinglePage => None,
                Pagination::LoadMore { max_pages, .. } if pages >= *max_pages => {
                    warn!(pages, "Reached listing page cap");
                    None
                }
                Pagination::LoadMore { .. } => scan.next_page,
            };
        }

        info!(count = links.len(), pages, "Indexed article URLs");
        Ok(links.into_iter().collect())
    }
}

/// Extracts article links and the next-page URL from one listing page.
/// Only links on the host that served the page are kept.
fn scan_listing(html: &str, base: &Url, target: &SectionTarget) -> ListingScan {
    let document = Html::parse_document(html);
    let host = base.host_str();

    let articles = document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| normalize_link(base, href))
        .filter(|url| url.host_str() == host && target.rule.matches(url))
        .map(String::from)
        .collect();

    let next_page = match &target.pagination {
        Pagination::SinglePage => None,
        Pagination::LoadMore { next, .. } => document
            .select(next)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| normalize_link(base, href)),
    };

    ListingScan {
        articles,
        next_page,
    }
}

/// Resolves `href` against `base`, drops the fragment, and keeps http(s) only.
pub fn normalize_link(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchSettings, HostRateLimiter, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTICLE_RULE: &str = r"^/section/\d{4}/\d{2}/\d{2}/[^/]+/$";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn client() -> FetchClient {
        let settings = FetchSettings {
            min_interval: Duration::ZERO,
            retry: RetryPolicy::none(),
            ..FetchSettings::default()
        };
        FetchClient::new("fixture", &settings, Arc::new(HostRateLimiter::new())).unwrap()
    }

    fn target(server: &MockServer, listing: &str, pagination: Pagination) -> SectionTarget {
        SectionTarget {
            source: "fixture".to_string(),
            section: "section".to_string(),
            listing_url: url(&format!("{}{}", server.uri(), listing)),
            rule: ClassificationRule::new(ARTICLE_RULE).unwrap(),
            pagination,
        }
    }

    fn load_more() -> Pagination {
        Pagination::LoadMore {
            next: Selector::parse("a[data-cy='load-more']").unwrap(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    async fn mount_page(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[test]
    fn test_scan_keeps_links_on_the_redirected_host() {
        let target = SectionTarget {
            source: "fixture".to_string(),
            section: "section".to_string(),
            listing_url: url("https://news.example/section/"),
            rule: ClassificationRule::new(ARTICLE_RULE).unwrap(),
            pagination: Pagination::SinglePage,
        };
        let base = url("https://www.news.example/section/");
        let html = r#"<a href="/section/2024/03/10/moved/">Moved</a>
            <a href="https://news.example/section/2024/03/10/apex/">Apex</a>"#;

        let scan = scan_listing(html, &base, &target);
        assert_eq!(
            scan.articles,
            vec!["https://www.news.example/section/2024/03/10/moved/".to_string()]
        );
    }

    #[test]
    fn test_rule_keeps_article_shaped_paths() {
        let rule = ClassificationRule::new(ARTICLE_RULE).unwrap();
        assert!(rule.matches(&url("https://news.example/section/2024/03/10/some-slug/")));
        assert!(!rule.matches(&url("https://news.example/section/")));
        assert!(!rule.matches(&url("https://news.example/tag/x/")));
        assert!(!rule.matches(&url("https://news.example/section/2024/03/10/")));
        assert!(!rule.matches(&url(
            "https://news.example/section/2024/03/10/some-slug/?outputType=amp"
        )));
    }

    #[test]
    fn test_rule_substitutes_section_prefix() {
        let mut prefixes = BTreeMap::new();
        prefixes.insert("politics".to_string(), "politics-power".to_string());
        let template = r"^/{prefix}/.+-[A-Z0-9]{15,}/$";

        let rule = ClassificationRule::for_section(template, &prefixes, "politics").unwrap();
        assert!(rule.matches(&url(
            "https://www.thebaltimorebanner.com/politics-power/state-government/vote-ABCDEFGHIJ12345/"
        )));
        assert!(!rule.matches(&url(
            "https://www.thebaltimorebanner.com/topic/politics-power/"
        )));

        let sports = ClassificationRule::for_section(template, &prefixes, "sports").unwrap();
        assert!(sports.matches(&url(
            "https://www.thebaltimorebanner.com/sports/ravens/game-recap-ZYXWVUTSRQ987654/"
        )));
    }

    #[test]
    fn test_normalize_link_resolves_and_strips_fragment() {
        let base = url("https://news.example/section/");
        assert_eq!(
            normalize_link(&base, "/section/2024/03/10/a/#comments-header")
                .unwrap()
                .as_str(),
            "https://news.example/section/2024/03/10/a/"
        );
        assert_eq!(
            normalize_link(&base, "2024/03/10/b/").unwrap().as_str(),
            "https://news.example/section/2024/03/10/b/"
        );
        assert!(normalize_link(&base, "mailto:tips@news.example").is_none());
        assert!(normalize_link(&base, "javascript:void(0)").is_none());
    }

    #[tokio::test]
    async fn test_discover_returns_exactly_article_links() {
        let server = MockServer::start().await;
        let body = format!(
            r#"<html><body>
                <nav><a href="/section/">Section</a><a href="/tag/x/">Tag</a></nav>
                <a href="/section/2024/03/10/some-slug/">One</a>
                <a href="/section/2024/03/10/some-slug/#comments">One again</a>
                <a href="{uri}/section/2024/03/09/older-story/">Two</a>
                <a href="https://elsewhere.example/section/2024/03/10/offsite/">Offsite</a>
                <a>No href</a>
            </body></html>"#,
            uri = server.uri()
        );
        mount_page(&server, "/section/", body).await;

        let client = client();
        let links = LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", Pagination::SinglePage))
            .await
            .unwrap();

        assert_eq!(
            links,
            vec![
                format!("{}/section/2024/03/09/older-story/", server.uri()),
                format!("{}/section/2024/03/10/some-slug/", server.uri()),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_page_strategy_fetches_once() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/section/",
            r#"<a href="/section/2024/01/01/a/">a</a>
               <a data-cy="load-more" href="/section/?page=2">More</a>"#
                .to_string(),
        )
        .await;

        let client = client();
        let links = LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", Pagination::SinglePage))
            .await
            .unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_load_more_without_control_fetches_once() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/section/",
            r#"<a href="/section/2024/01/01/a/">a</a>"#.to_string(),
        )
        .await;

        let client = client();
        let links = LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", load_more()))
            .await
            .unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_load_more_chain_of_three_pages() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/section/",
            r#"<a href="/section/2024/01/03/c/">c</a>
               <a data-cy="load-more" href="/section/page-2/">More</a>"#
                .to_string(),
        )
        .await;
        mount_page(
            &server,
            "/section/page-2/",
            r#"<a href="/section/2024/01/02/b/">b</a>
               <a data-cy="load-more" href="/section/page-3/">More</a>"#
                .to_string(),
        )
        .await;
        mount_page(
            &server,
            "/section/page-3/",
            r#"<a href="/section/2024/01/01/a/">a</a>"#.to_string(),
        )
        .await;

        let client = client();
        let links = LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", load_more()))
            .await
            .unwrap();

        assert_eq!(links.len(), 3);
        assert!(links[0].ends_with("/section/2024/01/01/a/"));
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_load_more_stops_on_self_link() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/section/",
            r#"<a href="/section/2024/01/01/a/">a</a>
               <a data-cy="load-more" href="/section/#more">More</a>"#
                .to_string(),
        )
        .await;

        let client = client();
        LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", load_more()))
            .await
            .unwrap();

        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_load_more_respects_page_cap() {
        let server = MockServer::start().await;
        for (route, next) in [("/section/", "/section/p2/"), ("/section/p2/", "/section/p3/")] {
            mount_page(
                &server,
                route,
                format!(r#"<a data-cy="load-more" href="{next}">More</a>"#),
            )
            .await;
        }

        let client = client();
        let pagination = Pagination::LoadMore {
            next: Selector::parse("a[data-cy='load-more']").unwrap(),
            max_pages: 2,
        };
        LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", pagination))
            .await
            .unwrap();

        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_first_page_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/section/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client();
        let err = LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", Pagination::SinglePage))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Listing { .. }));
    }

    #[tokio::test]
    async fn test_later_page_failure_keeps_earlier_links() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/section/",
            r#"<a href="/section/2024/01/01/a/">a</a>
               <a data-cy="load-more" href="/section/broken/">More</a>"#
                .to_string(),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/section/broken/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client();
        let links = LinkDiscovery::new(&client)
            .discover(&target(&server, "/section/", load_more()))
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
    }
}
