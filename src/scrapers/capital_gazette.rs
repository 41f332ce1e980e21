//! Capital Gazette (Annapolis).
//!
//! Section fronts link articles at dated slugs such as
//! `/2024/03/10/county-council-budget/`. Listings are a single page; the
//! publication time comes from `article:published_time`.

use super::sections;
use crate::config::{
    ClassificationConfig, DateConfig, PaginationConfig, RulesConfig, SourceConfig,
};
use crate::fetch::DEFAULT_USER_AGENT;

pub const ID: &str = "capital_gazette";

pub fn source() -> SourceConfig {
    SourceConfig {
        id: ID.to_string(),
        user_agent: DEFAULT_USER_AGENT.to_string(),
        accept_language: Some("en-US,en;q=0.9".to_string()),
        min_delay_ms: 800,
        timeout_secs: 20,
        max_retries: 2,
        store_body_text: false,
        classification: ClassificationConfig {
            pattern: r"^/\d{4}/\d{2}/\d{2}/[^/]+/$".to_string(),
            prefixes: Default::default(),
        },
        pagination: PaginationConfig::SinglePage,
        rules: RulesConfig {
            headline: "h1.entry-title".to_string(),
            body: "div.body-copy".to_string(),
            paragraph: "p".to_string(),
            image: "img".to_string(),
            ad_marker: Some("div[id^='arcad-feature']".to_string()),
            date: DateConfig::Meta {
                property: "article:published_time".to_string(),
            },
        },
        sections: sections(&[
            ("politics", "https://www.capitalgazette.com/news/politics/"),
            ("business", "https://www.capitalgazette.com/business/"),
            ("sports", "https://www.capitalgazette.com/sports/"),
            ("education", "https://www.capitalgazette.com/news/education/"),
        ]),
    }
}
