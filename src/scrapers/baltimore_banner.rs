//! The Baltimore Banner.
//!
//! Topic pages paginate through a "load more" link. Article paths live under
//! a per-section prefix and end in an uppercase story id, for example
//! `/politics-power/state-government/session-recap-ABCDEFGHIJKLMNO/`.
//! The visible byline date is preferred over the meta timestamp.

use std::collections::BTreeMap;

use super::sections;
use crate::config::{
    ClassificationConfig, DateConfig, PaginationConfig, RulesConfig, SourceConfig,
};
use crate::discovery::DEFAULT_MAX_PAGES;
use crate::fetch::DEFAULT_USER_AGENT;

pub const ID: &str = "baltimore_banner";

pub fn source() -> SourceConfig {
    let prefixes: BTreeMap<String, String> = [
        ("politics", "politics-power"),
        ("business", "economy"),
        ("sports", "sports"),
        ("education", "education"),
    ]
    .into_iter()
    .map(|(label, prefix)| (label.to_string(), prefix.to_string()))
    .collect();

    SourceConfig {
        id: ID.to_string(),
        user_agent: DEFAULT_USER_AGENT.to_string(),
        accept_language: Some("en-US,en;q=0.9".to_string()),
        min_delay_ms: 800,
        timeout_secs: 20,
        max_retries: 2,
        store_body_text: false,
        classification: ClassificationConfig {
            pattern: r"^/{prefix}/.+-[A-Z0-9]{15,}/$".to_string(),
            prefixes,
        },
        pagination: PaginationConfig::LoadMore {
            selector: "a[data-cy='load-more']".to_string(),
            max_pages: DEFAULT_MAX_PAGES,
        },
        rules: RulesConfig {
            headline: "h1.headline strong".to_string(),
            body: "div.article-body".to_string(),
            paragraph: "p[data-testid='text-container']".to_string(),
            image: "img".to_string(),
            ad_marker: Some("div[id^='arcad-feature']".to_string()),
            date: DateConfig::Element {
                selector: "span[data-testid='attribution-date__published']".to_string(),
                fallback_meta: Some("article:published_time".to_string()),
            },
        },
        sections: sections(&[
            ("politics", "https://www.thebaltimorebanner.com/topic/politics-power/"),
            ("business", "https://www.thebaltimorebanner.com/topic/economy/"),
            ("sports", "https://www.thebaltimorebanner.com/topic/sports/"),
            ("education", "https://www.thebaltimorebanner.com/topic/education/"),
        ]),
    }
}
