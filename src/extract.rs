//! Article page parsing.
//!
//! [`parse_article`] is synchronous and owns the parsed DOM for its whole
//! lifetime, so no `scraper::Html` is ever held across an `.await`. The async
//! [`ArticleExtractor`] wraps it: fetch, parse, then probe the dimensions of
//! any images whose markup did not declare them.
//!
//! Paragraphs and images count only when they sit inside a body container.
//! They are collected in document order, and each element is counted once
//! even when body containers nest.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::fetch::{FetchClient, FetchError};
use crate::images::ImageResolver;
use crate::models::{ArticleRecord, ImageInfo, saturating_count};
use crate::utils::{
    count_words, normalize_whitespace, parse_loose_date, parse_timestamp, truncate_for_log,
};

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector is valid"));

/// Where a source keeps its publication date.
#[derive(Debug, Clone)]
pub enum DateSource {
    /// A `<meta>` element; its `content` attribute is parsed strictly.
    Meta(Selector),
    /// A visible element. Its `datetime` attribute wins when present,
    /// otherwise its text is parsed leniently. When the element is absent
    /// the optional `<meta>` fallback is consulted.
    Element {
        selector: Selector,
        fallback: Option<Selector>,
    },
}

/// Compiled selectors for one source's article template.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    pub headline: Selector,
    pub body: Selector,
    pub paragraph: Selector,
    pub image: Selector,
    /// Elements counted as ad slots anywhere on the page.
    pub ad_marker: Option<Selector>,
    pub date: DateSource,
}

/// The page is missing structure every article must have.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no headline found at {url}")]
    MissingHeadline { url: String },

    #[error("no body container found at {url}")]
    MissingBody { url: String },
}

/// Failure to turn one article URL into a record.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// An image as found in markup, before any probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImage {
    /// Raw `src` attribute.
    pub src: String,
    /// `src` resolved against the page URL, when resolvable.
    pub resolved: Option<String>,
    /// Width and height, when the markup declares both as integers.
    pub declared: Option<(u32, u32)>,
}

/// Everything [`parse_article`] reads from a page.
#[derive(Debug, Clone)]
pub struct ParsedArticle {
    pub headline: String,
    pub pub_date: Option<DateTime<FixedOffset>>,
    pub word_count: u32,
    pub num_links: u32,
    pub images: Vec<ParsedImage>,
    pub num_ads_est: u32,
    /// Paragraph texts joined by blank lines.
    pub body_text: String,
}

/// Parses one article page.
///
/// `url` is only used in error values; relative image sources resolve
/// against `base`.
///
/// # Errors
///
/// [`ParseError::MissingHeadline`] when no headline element has text, and
/// [`ParseError::MissingBody`] when no body container exists. A body with
/// no paragraphs is not an error.
pub fn parse_article(
    html: &str,
    base: &Url,
    url: &str,
    rules: &ExtractionRules,
) -> Result<ParsedArticle, ParseError> {
    let document = Html::parse_document(html);

    let headline = document
        .select(&rules.headline)
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
        .ok_or_else(|| ParseError::MissingHeadline {
            url: url.to_string(),
        })?;

    let bodies: HashSet<_> = document.select(&rules.body).map(|el| el.id()).collect();
    if bodies.is_empty() {
        return Err(ParseError::MissingBody {
            url: url.to_string(),
        });
    }
    let in_body = |el: &ElementRef<'_>| el.ancestors().any(|a| bodies.contains(&a.id()));

    let paragraphs: Vec<ElementRef<'_>> = document
        .select(&rules.paragraph)
        .filter(|p| in_body(p))
        .collect();

    let texts: Vec<String> = paragraphs
        .iter()
        .map(|p| normalize_whitespace(&p.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();
    let word_count: usize = texts.iter().map(|t| count_words(t)).sum();

    let mut seen_links = HashSet::new();
    let num_links = paragraphs
        .iter()
        .flat_map(|p| p.select(&LINK_SELECTOR))
        .filter(|a| seen_links.insert(a.id()))
        .count();

    let images = document
        .select(&rules.image)
        .filter(|img| in_body(img))
        .filter_map(|img| parse_image(img, base))
        .collect();

    let num_ads_est = rules
        .ad_marker
        .as_ref()
        .map_or(0, |sel| document.select(sel).count());

    Ok(ParsedArticle {
        headline,
        pub_date: extract_date(&document, &rules.date),
        word_count: saturating_count(word_count),
        num_links: saturating_count(num_links),
        images,
        num_ads_est: saturating_count(num_ads_est),
        body_text: texts.join("\n\n"),
    })
}

fn parse_image(img: ElementRef<'_>, base: &Url) -> Option<ParsedImage> {
    let el = img.value();
    let src = el.attr("src").map(str::trim).filter(|s| !s.is_empty())?;
    let dimension = |name: &str| el.attr(name).and_then(|v| v.trim().parse::<u32>().ok());
    let declared = dimension("width").zip(dimension("height"));
    Some(ParsedImage {
        src: src.to_string(),
        resolved: base.join(src).ok().map(String::from),
        declared,
    })
}

fn extract_date(document: &Html, source: &DateSource) -> Option<DateTime<FixedOffset>> {
    match source {
        DateSource::Meta(meta) => meta_date(document, meta),
        DateSource::Element { selector, fallback } => match document.select(selector).next() {
            Some(el) => match el.value().attr("datetime") {
                Some(attr) => parse_timestamp(attr),
                None => parse_loose_date(&normalize_whitespace(&el.text().collect::<String>())),
            },
            None => fallback.as_ref().and_then(|meta| meta_date(document, meta)),
        },
    }
}

fn meta_date(document: &Html, meta: &Selector) -> Option<DateTime<FixedOffset>> {
    document
        .select(meta)
        .find_map(|el| el.value().attr("content"))
        .and_then(parse_timestamp)
}

/// Fetches and parses article pages for one source.
#[derive(Debug)]
pub struct ArticleExtractor<'a> {
    client: &'a FetchClient,
    rules: &'a ExtractionRules,
    images: ImageResolver<'a>,
    keep_body_text: bool,
}

impl<'a> ArticleExtractor<'a> {
    pub fn new(
        client: &'a FetchClient,
        rules: &'a ExtractionRules,
        images: ImageResolver<'a>,
        keep_body_text: bool,
    ) -> Self {
        Self {
            client,
            rules,
            images,
            keep_body_text,
        }
    }

    /// Builds the record for `url`, labelled with `section`.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Fetch`] when the page cannot be retrieved and
    /// [`ExtractError::Parse`] when it lacks a headline or body.
    #[instrument(level = "debug", skip(self), fields(source = %self.client.source()))]
    pub async fn extract(&self, url: &str, section: &str) -> Result<ArticleRecord, ExtractError> {
        let page = self.client.fetch(url).await?;
        let base = Url::parse(&page.final_url).or_else(|_| Url::parse(url)).map_err(|_| {
            FetchError::InvalidUrl {
                url: url.to_string(),
            }
        })?;
        let parsed = parse_article(&page.body, &base, url, self.rules)?;

        if parsed.word_count == 0 {
            warn!(%url, "Article body has no text");
        }

        let mut images = Vec::with_capacity(parsed.images.len());
        for image in parsed.images {
            let (width, height) = match image.declared {
                Some((w, h)) => (Some(w), Some(h)),
                None => {
                    let target = image.resolved.as_deref().unwrap_or(&image.src);
                    self.images.resolve(target).await
                }
            };
            images.push(ImageInfo {
                src: image.src,
                width,
                height,
            });
        }

        debug!(
            %url,
            headline = %truncate_for_log(&parsed.headline, 80),
            words = parsed.word_count,
            links = parsed.num_links,
            images = images.len(),
            ads = parsed.num_ads_est,
            "Parsed article"
        );

        Ok(ArticleRecord {
            url: url.to_string(),
            section: section.to_string(),
            headline: parsed.headline,
            pub_date: parsed.pub_date,
            word_count: parsed.word_count,
            num_links: parsed.num_links,
            images,
            num_ads_est: parsed.num_ads_est,
            body_text: self.keep_body_text.then_some(parsed.body_text),
        })
    }
}
