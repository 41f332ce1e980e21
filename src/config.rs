//! Source configuration: YAML schema, built-in defaults, and compilation.
//!
//! A [`ScraperConfig`] is plain data that round-trips through `serde_yaml`.
//! [`ScraperConfig::compile`] validates it and produces runtime [`Source`]s
//! with parsed URLs, compiled selectors and classification regexes, so
//! nothing downstream has to handle malformed configuration.
//!
//! ```yaml
//! sources:
//!   - id: hyattsville_wire
//!     min_delay_ms: 800
//!     store_body_text: true
//!     classification:
//!       pattern: '^/\d{4}/\d{2}/\d{2}/[^/]+/?$'
//!     rules:
//!       headline: h1.entry-title
//!       body: div.entry-content
//!       date: { kind: meta, property: "article:published_time" }
//!     sections:
//!       - { label: hyattsville, url: "https://www.hyattsvillewire.com/hyattsville/" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::discovery::{ClassificationRule, DEFAULT_MAX_PAGES, PREFIX_PLACEHOLDER, Pagination};
use crate::extract::{DateSource, ExtractionRules};
use crate::fetch::{DEFAULT_USER_AGENT, FetchSettings, RetryPolicy};
use crate::models::SectionTarget;
use crate::scrapers;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("no sources selected")]
    NoSources,

    #[error("source {0:?} is defined more than once")]
    DuplicateSource(String),

    #[error("unknown source {0:?}")]
    UnknownSource(String),

    #[error("source {source_id:?} has no sections")]
    NoSections { source_id: String },

    #[error("source {source_id:?}: invalid listing URL {url:?}")]
    InvalidUrl { source_id: String, url: String },

    #[error("source {source_id:?}: invalid {field} selector {selector:?}: {message}")]
    InvalidSelector {
        source_id: String,
        field: &'static str,
        selector: String,
        message: String,
    },

    #[error("source {source_id:?}: invalid classification pattern: {source}")]
    InvalidPattern {
        source_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("source {source_id:?}: no prefix mapped for section {section:?}")]
    MissingPrefix { source_id: String, section: String },

    #[error("source {source_id:?}: {field} must be greater than zero")]
    ZeroValue {
        source_id: String,
        field: &'static str,
    },
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScraperConfig {
    pub sources: Vec<SourceConfig>,
}

/// One news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Identifier stored with every row; must be unique.
    pub id: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: Option<String>,
    /// Minimum spacing between requests to one host.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Persist the concatenated paragraph text.
    #[serde(default)]
    pub store_body_text: bool,
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    pub rules: RulesConfig,
    pub sections: Vec<SectionConfig>,
}

/// Path regex deciding which links are articles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationConfig {
    /// Regex over the URL path; may contain `{prefix}`.
    pub pattern: String,
    /// Section label to path prefix. Labels without an entry substitute
    /// themselves, unless the map is non-empty.
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationConfig {
    #[default]
    SinglePage,
    LoadMore {
        selector: String,
        #[serde(default = "default_max_pages")]
        max_pages: usize,
    },
}

/// Selector table for article pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    pub headline: String,
    pub body: String,
    #[serde(default = "default_paragraph")]
    pub paragraph: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub ad_marker: Option<String>,
    pub date: DateConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateConfig {
    /// `<meta property=...>` or `<meta name=...>` with a machine timestamp.
    Meta { property: String },
    /// Visible byline element, with an optional meta property fallback.
    Element {
        selector: String,
        #[serde(default)]
        fallback_meta: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionConfig {
    pub label: String,
    pub url: String,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_accept_language() -> Option<String> {
    Some("en-US,en;q=0.9".to_string())
}

fn default_min_delay_ms() -> u64 {
    800
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_paragraph() -> String {
    "p".to_string()
}

fn default_image() -> String {
    "img".to_string()
}

/// A validated, compiled source ready for a run.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub fetch: FetchSettings,
    pub rules: ExtractionRules,
    /// Sections in configuration order.
    pub targets: Vec<SectionTarget>,
    pub store_body_text: bool,
}

impl ScraperConfig {
    /// The built-in source profiles.
    pub fn builtin() -> Self {
        Self {
            sources: scrapers::builtin_sources(),
        }
    }

    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses a YAML file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::from_yaml(&yaml)?;
        info!(sources = config.sources.len(), "Loaded source configuration");
        Ok(config)
    }

    /// Validates every source and compiles those selected by `only`
    /// (all of them when `only` is empty), preserving configuration order.
    pub fn compile(&self, only: &[String]) -> Result<Vec<Source>, ConfigError> {
        let mut ids = HashSet::new();
        for source in &self.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
        }
        if let Some(unknown) = only.iter().find(|id| !ids.contains(id.as_str())) {
            return Err(ConfigError::UnknownSource(unknown.clone()));
        }

        let compiled = self
            .sources
            .iter()
            .filter(|s| only.is_empty() || only.contains(&s.id))
            .map(SourceConfig::compile)
            .collect::<Result<Vec<_>, _>>()?;

        if compiled.is_empty() {
            return Err(ConfigError::NoSources);
        }
        Ok(compiled)
    }
}

impl SourceConfig {
    /// Validates this source and compiles its selectors, rules and targets.
    pub fn compile(&self) -> Result<Source, ConfigError> {
        let id = self.id.as_str();
        if self.sections.is_empty() {
            return Err(ConfigError::NoSections {
                source_id: id.to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroValue {
                source_id: id.to_string(),
                field: "timeout_secs",
            });
        }

        let pagination = match &self.pagination {
            PaginationConfig::SinglePage => Pagination::SinglePage,
            PaginationConfig::LoadMore { max_pages: 0, .. } => {
                return Err(ConfigError::ZeroValue {
                    source_id: id.to_string(),
                    field: "max_pages",
                });
            }
            PaginationConfig::LoadMore {
                selector,
                max_pages,
            } => Pagination::LoadMore {
                next: selector_for(id, "pagination", selector)?,
                max_pages: *max_pages,
            },
        };

        let uses_prefix = self.classification.pattern.contains(PREFIX_PLACEHOLDER);
        let mut targets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let listing_url = Url::parse(&section.url)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
                .ok_or_else(|| ConfigError::InvalidUrl {
                    source_id: id.to_string(),
                    url: section.url.clone(),
                })?;
            if uses_prefix
                && !self.classification.prefixes.is_empty()
                && !self.classification.prefixes.contains_key(&section.label)
            {
                return Err(ConfigError::MissingPrefix {
                    source_id: id.to_string(),
                    section: section.label.clone(),
                });
            }
            let rule = ClassificationRule::for_section(
                &self.classification.pattern,
                &self.classification.prefixes,
                &section.label,
            )
            .map_err(|source| ConfigError::InvalidPattern {
                source_id: id.to_string(),
                source,
            })?;
            debug!(source = id, section = %section.label, rule = rule.as_str(), "Compiled section");
            targets.push(SectionTarget {
                source: id.to_string(),
                section: section.label.clone(),
                listing_url,
                rule,
                pagination: pagination.clone(),
            });
        }

        let fetch = FetchSettings {
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            min_interval: Duration::from_millis(self.min_delay_ms),
            retry: RetryPolicy::new(self.max_retries),
        };

        Ok(Source {
            id: id.to_string(),
            fetch,
            rules: self.rules.compile(id)?,
            targets,
            store_body_text: self.store_body_text,
        })
    }
}

impl RulesConfig {
    fn compile(&self, source_id: &str) -> Result<ExtractionRules, ConfigError> {
        let date = match &self.date {
            DateConfig::Meta { property } => DateSource::Meta(meta_selector(source_id, property)?),
            DateConfig::Element {
                selector,
                fallback_meta,
            } => DateSource::Element {
                selector: selector_for(source_id, "date", selector)?,
                fallback: fallback_meta
                    .as_deref()
                    .map(|p| meta_selector(source_id, p))
                    .transpose()?,
            },
        };
        Ok(ExtractionRules {
            headline: selector_for(source_id, "headline", &self.headline)?,
            body: selector_for(source_id, "body", &self.body)?,
            paragraph: selector_for(source_id, "paragraph", &self.paragraph)?,
            image: selector_for(source_id, "image", &self.image)?,
            ad_marker: self
                .ad_marker
                .as_deref()
                .map(|s| selector_for(source_id, "ad_marker", s))
                .transpose()?,
            date,
        })
    }
}

fn selector_for(source_id: &str, field: &'static str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::InvalidSelector {
        source_id: source_id.to_string(),
        field,
        selector: css.to_string(),
        message: e.to_string(),
    })
}

fn meta_selector(source_id: &str, property: &str) -> Result<Selector, ConfigError> {
    let css = format!("meta[property=\"{property}\"], meta[name=\"{property}\"]");
    selector_for(source_id, "date", &css)
}
