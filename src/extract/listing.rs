//! Listing-page extraction.
//!
//! A listing (archive) page is turned into [`ArticleRef`]s in two steps:
//! per-source [`ListingRules`] pull raw entries out of the page, then a
//! [`ListingFilter`] drops non-article links, administrative titles and
//! stale entries. The startup phase relaxes the filter so that everything
//! currently listed can be seeded as already seen.

use super::dates::{date_from_parts, parse_loose_date};
use super::{Cascade, collapse_whitespace, compile, element_text};
use crate::errors::ExtractError;
use crate::images::widest_srcset_entry;
use crate::models::ArticleRef;
use chrono::{DateTime, TimeDelta, Utc};
use itertools::Itertools;
use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

pub const DEFAULT_URL_DENYLIST: &[&str] = &[
    "/tag/",
    "/tags/",
    "/category/",
    "/author/",
    "/feed/",
    "/newsletter",
    "/page/",
];

pub const DEFAULT_TITLE_DENYLIST: &[&str] = &["donate", "subscribe", "newsletter"];

/// DOM rules: repeated item containers, each holding one article link.
#[derive(Debug, Clone)]
pub struct ItemRules {
    pub items: Cascade,
    pub link: Selector,
    pub date: Option<Selector>,
    pub preview_image: Option<Selector>,
}

/// How a source's listing page is read.
#[derive(Debug, Clone)]
pub enum ListingRules {
    /// Structured markup, read through CSS selectors.
    Items(ItemRules),
    /// Raw-HTML patterns with named groups `url` (required), `title`,
    /// `date`, and `year`/`month`/`day` for dates embedded in the path.
    /// The first pattern with at least one match wins.
    Links(Vec<Regex>),
}

impl ListingRules {
    pub fn items(
        items: &[&str],
        link: &str,
        date: Option<&str>,
        preview_image: Option<&str>,
    ) -> Result<Self, ExtractError> {
        Ok(Self::Items(ItemRules {
            items: Cascade::new(items)?,
            link: compile(link)?,
            date: date.map(compile).transpose()?,
            preview_image: preview_image.map(compile).transpose()?,
        }))
    }

    pub fn links(patterns: &[&str]) -> Result<Self, ExtractError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                let regex = Regex::new(p).map_err(|e| ExtractError::InvalidPattern(e.to_string()))?;
                if !regex.capture_names().flatten().any(|name| name == "url") {
                    return Err(ExtractError::InvalidPattern(format!(
                        "pattern `{p}` has no `url` group"
                    )));
                }
                Ok(regex)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Links(compiled))
    }
}

/// What to do with entries whose date could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndatedPolicy {
    AssumeNow,
    Drop,
}

/// Steady-state filtering applied after extraction.
#[derive(Debug, Clone)]
pub struct ListingFilter {
    /// Lowercase substrings that mark a URL as a non-article.
    pub url_denylist: Vec<String>,
    /// Lowercase substrings that mark a title as administrative content.
    pub title_denylist: Vec<String>,
    /// Entries older than this are dropped.
    pub recency: Option<TimeDelta>,
    pub undated: UndatedPolicy,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            url_denylist: DEFAULT_URL_DENYLIST.iter().map(|s| s.to_string()).collect(),
            title_denylist: DEFAULT_TITLE_DENYLIST.iter().map(|s| s.to_string()).collect(),
            recency: None,
            undated: UndatedPolicy::AssumeNow,
        }
    }
}

impl ListingFilter {
    pub fn deny_urls(mut self, extra: &[&str]) -> Self {
        self.url_denylist
            .extend(extra.iter().map(|s| s.to_ascii_lowercase()));
        self
    }

    pub fn deny_titles(mut self, extra: &[&str]) -> Self {
        self.title_denylist
            .extend(extra.iter().map(|s| s.to_ascii_lowercase()));
        self
    }

    pub fn within(mut self, window: TimeDelta) -> Self {
        self.recency = Some(window);
        self
    }

    pub fn drop_undated(mut self) -> Self {
        self.undated = UndatedPolicy::Drop;
        self
    }

    /// Decide whether `entry` survives. Kept undated entries count as
    /// recent but stay undated, so newest-first ordering puts them last.
    fn admit(&self, entry: &ArticleRef, is_startup: bool, now: DateTime<Utc>) -> bool {
        if entry.publish_date.is_none() && !is_startup && self.undated == UndatedPolicy::Drop {
            debug!(url = %entry.url, "Dropping undated listing entry");
            return false;
        }

        if is_startup {
            return true;
        }

        let url = entry.url.to_ascii_lowercase();
        if self.url_denylist.iter().any(|d| url.contains(d.as_str())) {
            return false;
        }
        let title = entry.title.to_ascii_lowercase();
        if self.title_denylist.iter().any(|d| title.contains(d.as_str())) {
            return false;
        }

        match (self.recency, entry.publish_date) {
            (Some(window), Some(date)) => date >= now - window,
            _ => true,
        }
    }
}

/// Resolve `raw` against `base` and normalize it into an article identity:
/// absolute http(s), no fragment, and no query string when `strip_query`.
pub fn canonical_url(raw: &str, base: &Url, strip_query: bool) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.starts_with('#')
        || raw.starts_with("javascript:")
        || raw.starts_with("mailto:")
    {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    if strip_query {
        url.set_query(None);
    }
    Some(url.into())
}

/// Listing extraction for one source.
#[derive(Debug, Clone)]
pub struct ListingExtractor {
    pub rules: ListingRules,
    pub filter: ListingFilter,
    pub base: Url,
    pub strip_query: bool,
}

impl ListingExtractor {
    /// Extract the de-duplicated, filtered entries of a listing page in
    /// document order.
    pub fn extract(
        &self,
        html: &str,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArticleRef>, ExtractError> {
        if html.trim().is_empty() {
            return Err(ExtractError::InvalidDocument(
                "empty listing page".to_string(),
            ));
        }

        let raw = match &self.rules {
            ListingRules::Items(rules) => {
                let document = Html::parse_document(html);
                self.extract_items(rules, &document)
            }
            ListingRules::Links(patterns) => self.extract_links(patterns, html),
        };
        let found = raw.len();

        let entries: Vec<ArticleRef> = raw
            .into_iter()
            .unique_by(|entry| entry.url.clone())
            .filter(|entry| self.filter.admit(entry, is_startup, now))
            .collect();

        debug!(
            base = %self.base,
            found,
            kept = entries.len(),
            is_startup,
            "Extracted listing entries"
        );
        Ok(entries)
    }

    fn extract_items(&self, rules: &ItemRules, document: &Html) -> Vec<ArticleRef> {
        rules
            .items
            .first_match_in(document, |item| self.item_entry(rules, item))
            .map(|matched| matched.values)
            .unwrap_or_default()
    }

    fn item_entry(&self, rules: &ItemRules, item: ElementRef<'_>) -> Option<ArticleRef> {
        let link = item.select(&rules.link).next()?;
        let url = canonical_url(link.value().attr("href")?, &self.base, self.strip_query)?;

        let publish_date = rules
            .date
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|el| {
                el.value()
                    .attr("datetime")
                    .and_then(parse_loose_date)
                    .or_else(|| parse_loose_date(&element_text(el)))
            });

        let preview_image_url = rules
            .preview_image
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(preview_source)
            .and_then(|src| canonical_url(&src, &self.base, false));

        Some(ArticleRef {
            url,
            title: element_text(link),
            publish_date,
            preview_image_url,
        })
    }

    fn extract_links(&self, patterns: &[Regex], html: &str) -> Vec<ArticleRef> {
        for pattern in patterns {
            let entries: Vec<ArticleRef> = pattern
                .captures_iter(html)
                .filter_map(|caps| self.link_entry(&caps))
                .collect();
            if !entries.is_empty() {
                return entries;
            }
        }
        Vec::new()
    }

    fn link_entry(&self, caps: &Captures<'_>) -> Option<ArticleRef> {
        let url = canonical_url(
            &decode_text(caps.name("url")?.as_str()),
            &self.base,
            self.strip_query,
        )?;
        let title = caps
            .name("title")
            .map(|m| decode_text(m.as_str()))
            .unwrap_or_default();
        let publish_date = caps
            .name("date")
            .and_then(|m| parse_loose_date(&decode_text(m.as_str())))
            .or_else(|| {
                date_from_parts(
                    caps.name("year")?.as_str(),
                    caps.name("month")?.as_str(),
                    caps.name("day").map(|d| d.as_str()),
                )
            });

        Some(ArticleRef {
            url,
            title,
            publish_date,
            preview_image_url: None,
        })
    }
}

fn preview_source(img: ElementRef<'_>) -> Option<String> {
    let el = img.value();
    el.attr("srcset")
        .and_then(widest_srcset_entry)
        .or_else(|| el.attr("data-src"))
        .or_else(|| el.attr("src"))
        .map(str::to_string)
}

/// Decode entities and strip tags from a raw HTML snippet.
fn decode_text(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    collapse_whitespace(&parsed.root_element().text().collect::<String>())
}
