//! News sources.
//!
//! Every outlet is described by the same [`NewsSource`] capability: where
//! its listing pages are, how to read them, how to read its article pages
//! and in which order new articles should be announced. The three concrete
//! sources only differ in their selector tables and URL patterns, so they
//! are all instances of [`Site`].
//!
//! # Supported Sources
//!
//! | Source | Module | Listing | Notes |
//! |--------|--------|---------|-------|
//! | ProPublica | [`propublica`] | DOM items | Newest first, largest asset-host image |
//! | Truthout | [`truthout`] | Link pattern | 24h window, undated entries dropped |
//! | ConsortiumNews | [`consortiumnews`] | Link pattern, two pages | Date in path, full-resolution images |
//!
//! Network access lives in [`client::SourceClient`], which pairs a source
//! with its fetcher and image resolver.

pub mod client;
pub mod consortiumnews;
pub mod propublica;
pub mod truthout;

use crate::errors::ExtractError;
use crate::extract::article::ArticleRules;
use crate::extract::listing::ListingExtractor;
use crate::models::{ArticleRef, ParsedArticle};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

/// Order in which newly discovered articles are announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOrder {
    /// By parsed publish date, newest first; undated entries last.
    NewestFirst,
    /// Sorted by URL.
    Canonical,
}

impl EmitOrder {
    /// Sort `entries` in place. Ordering is best-effort recency only.
    pub fn sort(self, entries: &mut [ArticleRef]) {
        match self {
            EmitOrder::NewestFirst => {
                entries.sort_by(|a, b| b.publish_date.cmp(&a.publish_date))
            }
            EmitOrder::Canonical => entries.sort_by(|a, b| a.url.cmp(&b.url)),
        }
    }
}

/// The synchronous, site-specific half of a news source.
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self) -> &Url;

    /// Listing pages in fallback order; never empty.
    fn listing_pages(&self) -> &[Url];

    fn emit_order(&self) -> EmitOrder;

    /// Whether resized thumbnails should be rewritten to their originals.
    fn full_resolution_images(&self) -> bool {
        false
    }

    fn extract_listing(
        &self,
        html: &str,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArticleRef>, ExtractError>;

    fn extract_article(&self, url: &str, html: &str) -> Result<ParsedArticle, ExtractError>;
}

/// A news source defined entirely by data.
#[derive(Debug, Clone)]
pub struct Site {
    pub name: &'static str,
    pub base: Url,
    pub listing_pages: Vec<Url>,
    pub listing: ListingExtractor,
    pub article: ArticleRules,
    pub emit_order: EmitOrder,
    pub full_resolution: bool,
}

impl NewsSource for Site {
    fn name(&self) -> &str {
        self.name
    }

    fn base_url(&self) -> &Url {
        &self.base
    }

    fn listing_pages(&self) -> &[Url] {
        &self.listing_pages
    }

    fn emit_order(&self) -> EmitOrder {
        self.emit_order
    }

    fn full_resolution_images(&self) -> bool {
        self.full_resolution
    }

    fn extract_listing(
        &self,
        html: &str,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArticleRef>, ExtractError> {
        self.listing.extract(html, is_startup, now)
    }

    fn extract_article(&self, url: &str, html: &str) -> Result<ParsedArticle, ExtractError> {
        self.article.extract(url, html)
    }
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, ExtractError> {
    Url::parse(raw).map_err(|e| ExtractError::InvalidUrl(format!("{raw}: {e}")))
}

/// Names accepted by [`build_source`], in start-up order.
pub const SOURCE_NAMES: &[&str] = &[propublica::NAME, truthout::NAME, consortiumnews::NAME];

pub fn build_source(name: &str) -> Result<Option<Arc<dyn NewsSource>>, ExtractError> {
    let site = match name {
        propublica::NAME => propublica::site()?,
        truthout::NAME => truthout::site()?,
        consortiumnews::NAME => consortiumnews::site()?,
        _ => return Ok(None),
    };
    Ok(Some(Arc::new(site)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dated(url: &str, day: Option<u32>) -> ArticleRef {
        ArticleRef {
            publish_date: day.map(|d| Utc.with_ymd_and_hms(2026, 10, d, 0, 0, 0).unwrap()),
            ..ArticleRef::new(url)
        }
    }

    #[test]
    fn test_emit_order() {
        let mut entries = vec![
            dated("https://x/b", Some(14)),
            dated("https://x/c", None),
            dated("https://x/a", Some(16)),
        ];
        EmitOrder::NewestFirst.sort(&mut entries);
        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x/a", "https://x/b", "https://x/c"]);

        EmitOrder::Canonical.sort(&mut entries);
        assert_eq!(entries[0].url, "https://x/a");
        assert_eq!(entries[2].url, "https://x/c");
    }

    #[test]
    fn test_every_named_source_builds() {
        for name in SOURCE_NAMES {
            let source = build_source(name).unwrap().unwrap();
            assert_eq!(source.name(), *name);
            assert!(!source.listing_pages().is_empty());
        }
        assert!(build_source("nope").unwrap().is_none());
    }
}
