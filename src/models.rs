//! Data models for scraped articles and crawl targets.
//!
//! - [`ArticleRecord`]: the normalized unit persisted for every captured URL
//! - [`ImageInfo`]: one image found inside an article body
//! - [`SectionTarget`]: a compiled (source, section, listing URL, rule) unit
//!   driving one discovery pass
//!
//! `headline_len` and `num_images` are derived from the record's own fields
//! rather than stored alongside them, so they cannot drift from `headline`
//! and `images`.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::discovery::{ClassificationRule, Pagination};

/// An image referenced from an article body, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// The `src` attribute exactly as it appeared in the markup.
    pub src: String,
    /// Pixel width, either declared in markup or probed; `None` when unknown.
    pub width: Option<u32>,
    /// Pixel height, either declared in markup or probed; `None` when unknown.
    pub height: Option<u32>,
}

/// A scraped article, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Canonical article URL; unique within a source.
    pub url: String,
    /// Section label of the target that discovered this URL.
    pub section: String,
    /// Headline text with whitespace collapsed to single spaces.
    pub headline: String,
    /// Publication timestamp, or `None` when absent or unparsable.
    pub pub_date: Option<DateTime<FixedOffset>>,
    /// Number of whitespace-delimited words across body paragraphs.
    pub word_count: u32,
    /// Number of hyperlinks nested inside body paragraphs.
    pub num_links: u32,
    /// Images inside the body container.
    pub images: Vec<ImageInfo>,
    /// Heuristic count of ad slots on the page. An estimate, not a guarantee.
    pub num_ads_est: u32,
    /// Concatenated paragraph text, kept only for sources that ask for it.
    pub body_text: Option<String>,
}

impl ArticleRecord {
    /// Number of whitespace-delimited tokens in the headline.
    pub fn headline_len(&self) -> u32 {
        saturating_count(self.headline.split_whitespace().count())
    }

    /// Number of images captured for this article.
    pub fn num_images(&self) -> u32 {
        saturating_count(self.images.len())
    }
}

/// Convert a `usize` count into the `u32` used by records and the schema.
pub fn saturating_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// One section of one source: where to start listing, and how to tell
/// articles from navigation.
#[derive(Debug, Clone)]
pub struct SectionTarget {
    /// Identifier of the source this section belongs to.
    pub source: String,
    /// Human-readable section label, persisted with every record.
    pub section: String,
    /// First listing page of the section.
    pub listing_url: Url,
    /// Rule deciding which discovered links are articles.
    pub rule: ClassificationRule,
    /// How to move from one listing page to the next.
    pub pagination: Pagination,
}
