//! Hero image resolution.
//!
//! Article parsing yields raw [`ImageCandidate`]s grouped in tiers. This
//! module turns them into absolute, de-duplicated URLs, drops structural
//! images (logos, avatars, ads, widgets) and validates the survivors with a
//! `HEAD` request. Tiers are tried in order; the first tier producing a
//! valid image wins, and the page's `og:image` is the last resort.
//!
//! # Source Order
//!
//! For each `<img>`: widest `srcset` entry, lazy-load attributes, `src`.
//! URLs differing only in their query string are collapsed to the shortest.

use crate::errors::ImageValidationError;
use crate::models::{ImageCandidate, ImageTier};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Maximum number of validated hero images kept per article.
pub const MAX_HERO_IMAGES: usize = 3;

/// `-WIDTHxHEIGHT` before the extension, as produced by WordPress resizing.
static THUMBNAIL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\d{2,5}x\d{2,5}(\.[A-Za-z0-9]{3,4})$").unwrap());

/// Structural markers matched anywhere in a class list or URL path.
const DENIED_PARTS: &[&str] = &[
    "logo",
    "avatar",
    "banner",
    "placeholder",
    "sidebar",
    "footer",
    "widget",
    "navbar",
    "sprite",
    "button",
    "rssfeed",
];

/// Short markers that only count as a whole token (`ad` must not match
/// `uploads` or `header`).
const DENIED_TOKENS: &[&str] = &["ad", "ads", "icon", "icons", "nav", "menu"];

/// Pick the widest entry of a `srcset` attribute.
///
/// Width (`800w`) and density (`2x`) descriptors are compared numerically;
/// without descriptors the last entry wins.
pub fn widest_srcset_entry(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?;
            let weight = parts
                .next()
                .and_then(|d| d.strip_suffix('w').or_else(|| d.strip_suffix('x')))
                .and_then(|n| n.parse::<f64>().ok())
                .unwrap_or(0.0);
            Some((url, weight))
        })
        .fold(None, |best: Option<(&str, f64)>, (url, weight)| match best {
            Some((_, best_weight)) if best_weight > weight => best,
            _ => Some((url, weight)),
        })
        .map(|(url, _)| url)
}

/// Rewrite a resized thumbnail URL to its full-resolution original.
///
/// `https://x/wp-content/uploads/img-500x345.jpg` becomes
/// `https://x/wp-content/uploads/img.jpg`. Returns `None` when the URL has
/// no size suffix.
pub fn full_resolution_image(url: &str) -> Option<String> {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    if !THUMBNAIL_SUFFIX.is_match(path) {
        return None;
    }
    let rewritten = THUMBNAIL_SUFFIX.replace(path, "$1");
    Some(match query {
        Some(query) => format!("{rewritten}?{query}"),
        None => rewritten.into_owned(),
    })
}

/// Resolve `raw` against `base`; data URIs and non-http schemes are dropped.
pub fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.into())
}

fn base_path(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Collapse URLs that only differ in their query string, keeping the
/// shortest form at the position of the first occurrence.
pub fn dedupe_by_base_path(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for url in urls {
        match kept
            .iter_mut()
            .find(|existing| base_path(existing) == base_path(&url))
        {
            Some(existing) => {
                if url.len() < existing.len() {
                    *existing = url;
                }
            }
            None => kept.push(url),
        }
    }
    kept
}

/// Every source URL an `<img>` offers, absolute and de-duplicated.
pub fn collect_sources(candidate: &ImageCandidate, base: &Url) -> Vec<String> {
    let raw = candidate
        .srcset
        .as_deref()
        .and_then(widest_srcset_entry)
        .into_iter()
        .chain(candidate.lazy_srcs.iter().map(String::as_str))
        .chain(candidate.src.as_deref());
    dedupe_by_base_path(raw.filter_map(|s| absolutize(s, base)))
}

fn tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Whether a class list or URL path carries a structural marker.
fn is_denied(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    DENIED_PARTS.iter().any(|p| text.contains(p))
        || tokens(&text).any(|t| DENIED_TOKENS.contains(&t))
}

/// Whether the element itself or one of its ancestors marks it as page
/// furniture rather than article art.
pub fn is_structural_element(candidate: &ImageCandidate) -> bool {
    is_denied(&candidate.class) || is_denied(&candidate.ancestor_classes)
}

/// Whether `url` is a data URI or its path names page furniture.
pub fn is_structural_url(url: &str) -> bool {
    if url.starts_with("data:") {
        return true;
    }
    match Url::parse(url) {
        Ok(parsed) => is_denied(parsed.path()),
        Err(_) => is_denied(url),
    }
}

/// Validates and orders hero image candidates.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    client: Client,
    timeout: Duration,
    max_images: usize,
    full_resolution: bool,
}

impl ImageResolver {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            max_images: MAX_HERO_IMAGES,
            full_resolution: false,
        }
    }

    /// Also try the full-resolution form of resized thumbnails, ahead of
    /// the thumbnail itself. The thumbnail is only kept when its original
    /// fails validation.
    pub fn with_full_resolution(mut self, enabled: bool) -> Self {
        self.full_resolution = enabled;
        self
    }

    /// Ordered candidate URLs of one tier, before validation.
    pub fn candidate_urls(&self, tier: &ImageTier, base: &Url) -> Vec<String> {
        let mut urls = Vec::new();
        for candidate in &tier.candidates {
            if is_structural_element(candidate) {
                continue;
            }
            for src in collect_sources(candidate, base) {
                if is_structural_url(&src) {
                    continue;
                }
                if self.full_resolution
                    && let Some(full) = full_resolution_image(&src)
                {
                    urls.push(full);
                }
                urls.push(src);
            }
        }
        dedupe_by_base_path(urls)
    }

    /// Check that `url` exists and serves a raster image.
    pub async fn validate(&self, url: &str) -> Result<(), ImageValidationError> {
        let response = self
            .client
            .head(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ImageValidationError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageValidationError::Status {
                url: url.to_string(),
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());
        match content_type {
            Some(ct) if ct.starts_with("image/") && !ct.contains("svg") => Ok(()),
            other => Err(ImageValidationError::ContentType {
                url: url.to_string(),
                content_type: other,
            }),
        }
    }

    async fn validate_all(&self, urls: &[String]) -> Vec<String> {
        let mut valid: Vec<String> = Vec::new();
        for url in urls {
            if valid.len() >= self.max_images {
                break;
            }
            // A thumbnail whose original already validated is the same picture.
            if self.full_resolution
                && let Some(full) = full_resolution_image(url)
                && valid.contains(&full)
            {
                continue;
            }
            match self.validate(url).await {
                Ok(()) => valid.push(url.clone()),
                Err(e) => debug!(error = %e, "Dropping image candidate"),
            }
        }
        valid
    }

    /// Resolve validated hero images for an article, best first.
    #[instrument(level = "debug", skip_all, fields(page = %page_url))]
    pub async fn resolve_hero_images(
        &self,
        page_url: &Url,
        tiers: &[ImageTier],
        meta_image: Option<&str>,
    ) -> Vec<String> {
        for tier in tiers {
            let urls = self.candidate_urls(tier, page_url);
            if urls.is_empty() {
                continue;
            }
            let valid = self.validate_all(&urls).await;
            if !valid.is_empty() {
                debug!(tier = %tier.label, count = valid.len(), "Resolved hero images");
                return valid;
            }
        }

        if let Some(meta) = meta_image.and_then(|m| absolutize(m, page_url))
            && !is_structural_url(&meta)
        {
            match self.validate(&meta).await {
                Ok(()) => return vec![meta],
                Err(e) => debug!(error = %e, "Meta image rejected"),
            }
        }
        Vec::new()
    }
}
