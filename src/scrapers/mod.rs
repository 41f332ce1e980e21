//! Built-in source profiles.
//!
//! Each submodule describes one outlet declaratively as a [`SourceConfig`]:
//! headers, politeness, the article URL rule, pagination, and the selector
//! table for article pages. All of them run through the same discovery and
//! extraction path; nothing here issues requests itself.
//!
//! # Supported Sources
//!
//! | Source | Module | Pagination | Notes |
//! |--------|--------|------------|-------|
//! | Capital Gazette | [`capital_gazette`] | single page | dated slugs, meta timestamp |
//! | Baltimore Banner | [`baltimore_banner`] | load more | per-section path prefix, visible byline date |
//! | Hyattsville Wire | [`hyattsville_wire`] | single page | neighbourhood sections, keeps body text |
//!
//! A YAML file passed with `--config` replaces this list entirely.

pub mod baltimore_banner;
pub mod capital_gazette;
pub mod hyattsville_wire;

use crate::config::{SectionConfig, SourceConfig};

/// Built-in profiles in run order.
pub fn builtin_sources() -> Vec<SourceConfig> {
    vec![
        capital_gazette::source(),
        baltimore_banner::source(),
        hyattsville_wire::source(),
    ]
}

/// Builds section entries from `(label, listing URL)` pairs.
fn sections(pairs: &[(&str, &str)]) -> Vec<SectionConfig> {
    pairs
        .iter()
        .map(|(label, url)| SectionConfig {
            label: (*label).to_string(),
            url: (*url).to_string(),
        })
        .collect()
}
