//! Hyattsville Wire, a Prince George's County neighbourhood outlet.
//!
//! Sections are neighbourhood pages. Articles use dated slugs with an
//! optional trailing slash. The site serves a Safari user agent without
//! `Accept-Language`, and this source keeps paragraph text.

use super::sections;
use crate::config::{
    ClassificationConfig, DateConfig, PaginationConfig, RulesConfig, SourceConfig,
};

pub const ID: &str = "hyattsville_wire";

const SAFARI_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15";

pub fn source() -> SourceConfig {
    SourceConfig {
        id: ID.to_string(),
        user_agent: SAFARI_USER_AGENT.to_string(),
        accept_language: None,
        min_delay_ms: 800,
        timeout_secs: 20,
        max_retries: 2,
        store_body_text: true,
        classification: ClassificationConfig {
            pattern: r"^/\d{4}/\d{2}/\d{2}/[^/]+/?$".to_string(),
            prefixes: Default::default(),
        },
        pagination: PaginationConfig::SinglePage,
        rules: RulesConfig {
            headline: "h1.entry-title".to_string(),
            body: "div.entry-content".to_string(),
            paragraph: "p".to_string(),
            image: "img".to_string(),
            ad_marker: None,
            date: DateConfig::Meta {
                property: "article:published_time".to_string(),
            },
        },
        sections: sections(&[
            ("riverdale-park", "https://www.hyattsvillewire.com/riverdale-park/"),
            ("college-park", "https://www.hyattsvillewire.com/college-park/"),
            ("mount-rainier", "https://www.hyattsvillewire.com/mount-rainier/"),
            ("brentwood", "https://www.hyattsvillewire.com/brentwood/"),
            ("bladensburg", "https://www.hyattsvillewire.com/bladensburg/"),
            ("edmonston", "https://www.hyattsvillewire.com/edmonston/"),
            ("hyattsville", "https://www.hyattsvillewire.com/hyattsville/"),
            ("greenbelt", "https://www.hyattsvillewire.com/greenbelt/"),
        ]),
    }
}
