//! Article-page extraction.
//!
//! [`ArticleRules`] holds a source's selector tables. Parsing is
//! synchronous and produces a [`ParsedArticle`]; image candidates are
//! snapshotted into owned [`ImageCandidate`]s so the document can be dropped
//! before any network validation happens.

use super::dates::parse_loose_date;
use super::{Cascade, compile, element_text, has_class_like};
use crate::errors::ExtractError;
use crate::models::{ImageCandidate, ImageTier, ParsedArticle, UNTITLED};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

pub const DEFAULT_MIN_PARAGRAPH_LEN: usize = 10;

pub const CAPTION_CLASSES: &[&str] = &["caption", "credit", "wp-caption-text"];

const LAZY_ATTRS: &[&str] = &["data-src", "data-full-src", "data-lazy-src"];

/// Where a publish date may be found, tried in order.
#[derive(Debug, Clone)]
pub enum DateSource {
    Attr { selector: Selector, attr: &'static str },
    Text(Selector),
}

/// Which of a tier's matched images are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPick {
    All,
    First,
    /// The image with the largest declared `width * height`.
    Largest,
}

#[derive(Debug, Clone)]
pub struct ImageTierRule {
    pub label: String,
    pub selector: Selector,
    /// Only keep images whose source mentions this host.
    pub require_host: Option<String>,
    pub pick: TierPick,
}

/// Selector tables for a source's article pages.
#[derive(Debug, Clone)]
pub struct ArticleRules {
    pub title: Cascade,
    pub body: Cascade,
    pub caption_classes: Vec<String>,
    pub min_paragraph_len: usize,
    pub dates: Vec<DateSource>,
    pub image_tiers: Vec<ImageTierRule>,
    meta_image: Cascade,
}

impl ArticleRules {
    pub fn new(title: &[&str], body: &[&str]) -> Result<Self, ExtractError> {
        let dates = vec![
            DateSource::Attr {
                selector: compile(r#"meta[property="article:published_time"]"#)?,
                attr: "content",
            },
            DateSource::Attr {
                selector: compile("time[datetime]")?,
                attr: "datetime",
            },
            DateSource::Attr {
                selector: compile(r#"meta[name="parsely-pub-date"]"#)?,
                attr: "content",
            },
            DateSource::Text(compile("time")?),
        ];
        Ok(Self {
            title: Cascade::new(title)?,
            body: Cascade::new(body)?,
            caption_classes: CAPTION_CLASSES.iter().map(|s| s.to_string()).collect(),
            min_paragraph_len: DEFAULT_MIN_PARAGRAPH_LEN,
            dates,
            image_tiers: Vec::new(),
            meta_image: Cascade::new(&[
                r#"meta[property="og:image"]"#,
                r#"meta[name="twitter:image"]"#,
                r#"meta[property="twitter:image"]"#,
            ])?,
        })
    }

    /// Append an image tier; tiers are tried in the order they are added.
    pub fn image_tier(
        mut self,
        label: &str,
        selector: &str,
        pick: TierPick,
        require_host: Option<&str>,
    ) -> Result<Self, ExtractError> {
        self.image_tiers.push(ImageTierRule {
            label: label.to_string(),
            selector: compile(selector)?,
            require_host: require_host.map(str::to_string),
            pick,
        });
        Ok(self)
    }

    /// Parse an article page.
    pub fn extract(&self, url: &str, html: &str) -> Result<ParsedArticle, ExtractError> {
        if html.trim().is_empty() {
            return Err(ExtractError::InvalidDocument(format!(
                "empty article page at {url}"
            )));
        }
        let document = Html::parse_document(html);

        let title = self
            .title
            .first_match_in(&document, |el| {
                let text = element_text(el);
                (!text.is_empty()).then_some(text)
            })
            .and_then(|matched| matched.values.into_iter().next())
            .unwrap_or_else(|| UNTITLED.to_string());

        let body = self
            .body
            .first_match_in(&document, |el| self.paragraph(el))
            .ok_or_else(|| ExtractError::NoContentFound {
                url: url.to_string(),
                what: "body paragraphs",
            })?;
        debug!(%url, selector = %body.selector, paragraphs = body.values.len(), "Extracted article body");

        let meta_image = self
            .meta_image
            .first_match_in(&document, |el| {
                el.value()
                    .attr("content")
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
            })
            .and_then(|matched| matched.values.into_iter().next());

        Ok(ParsedArticle {
            url: url.to_string(),
            title,
            body_paragraphs: body.values,
            publish_date: self.publish_date(&document),
            image_tiers: self.image_tiers(&document),
            meta_image,
        })
    }

    fn paragraph(&self, el: ElementRef<'_>) -> Option<String> {
        let captions: Vec<&str> = self.caption_classes.iter().map(String::as_str).collect();
        let in_caption = has_class_like(el, &captions)
            || el.ancestors().filter_map(ElementRef::wrap).any(|a| {
                a.value().name() == "figcaption" || has_class_like(a, &captions)
            });
        if in_caption {
            return None;
        }
        let text = element_text(el);
        (text.chars().count() >= self.min_paragraph_len).then_some(text)
    }

    fn publish_date(&self, document: &Html) -> Option<DateTime<Utc>> {
        self.dates.iter().find_map(|source| match source {
            DateSource::Attr { selector, attr } => document
                .select(selector)
                .filter_map(|el| el.value().attr(attr))
                .find_map(parse_loose_date),
            DateSource::Text(selector) => document
                .select(selector)
                .find_map(|el| parse_loose_date(&element_text(el))),
        })
    }

    fn image_tiers(&self, document: &Html) -> Vec<ImageTier> {
        self.image_tiers
            .iter()
            .filter_map(|rule| {
                let matched: Vec<ImageCandidate> = document
                    .select(&rule.selector)
                    .map(snapshot)
                    .filter(|c| match &rule.require_host {
                        Some(host) => mentions_host(c, host),
                        None => true,
                    })
                    .collect();

                let candidates = match rule.pick {
                    TierPick::All => matched,
                    TierPick::First => matched.into_iter().take(1).collect(),
                    TierPick::Largest => matched
                        .into_iter()
                        .rev()
                        .max_by_key(ImageCandidate::area)
                        .into_iter()
                        .collect(),
                };

                (!candidates.is_empty()).then(|| ImageTier {
                    label: rule.label.clone(),
                    candidates,
                })
            })
            .collect()
    }
}

fn mentions_host(candidate: &ImageCandidate, host: &str) -> bool {
    candidate
        .src
        .iter()
        .chain(candidate.srcset.iter())
        .chain(candidate.lazy_srcs.iter())
        .any(|s| s.contains(host))
}

/// Owned copy of everything the image resolver needs from an `<img>`.
fn snapshot(img: ElementRef<'_>) -> ImageCandidate {
    let el = img.value();
    let dimension = |name: &str| {
        el.attr(name)
            .and_then(|v| v.trim().trim_end_matches("px").parse().ok())
            .unwrap_or(0)
    };
    ImageCandidate {
        src: el.attr("src").map(str::to_string),
        lazy_srcs: LAZY_ATTRS
            .iter()
            .filter_map(|a| el.attr(a))
            .map(str::to_string)
            .collect(),
        srcset: el
            .attr("srcset")
            .or_else(|| el.attr("data-srcset"))
            .map(str::to_string),
        class: el.attr("class").unwrap_or_default().to_string(),
        ancestor_classes: img
            .ancestors()
            .filter_map(|node| node.value().as_element())
            .filter_map(|e| e.attr("class"))
            .join(" "),
        width: dimension("width"),
        height: dimension("height"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    const STORY: &str = r#"
        <html><head>
          <meta property="og:image" content="https://cdn.example.org/og.jpg">
          <meta property="article:published_time" content="2026-10-15T14:00:00Z">
        </head><body>
          <div class="article-header">
            <h1 class="hed">  The Water Report </h1>
            <div class="lead-art">
              <img src="https://img.assets-d.example.org/small.jpg" width="300" height="200">
              <img src="https://img.assets-d.example.org/large.jpg" width="1200" height="800">
              <img src="https://elsewhere.example.com/huge.jpg" width="4000" height="3000">
            </div>
          </div>
          <div class="story-body">
            <p>The city shut off the wells on Monday morning.</p>
            <figure><figcaption><p>Residents line up for bottled water at dawn.</p></figcaption></figure>
            <p class="photo-credit">Photo by A. Photographer for the newsroom</p>
            <p>Too short</p>
            <p>Officials said testing would continue through the week.</p>
          </div>
        </body></html>
    "#;

    fn rules() -> ArticleRules {
        ArticleRules::new(
            &["h1[data-qa=\"article-title\"]", "h1.hed"],
            &[".body-content p", ".story-body p"],
        )
        .unwrap()
        .image_tier(
            "asset host",
            ".lead-art img",
            TierPick::Largest,
            Some("img.assets-d.example.org"),
        )
        .unwrap()
        .image_tier("any lead art", ".lead-art img", TierPick::All, None)
        .unwrap()
    }

    #[test]
    fn test_extracts_title_body_and_date() {
        let parsed = rules().extract("https://example.org/a", STORY).unwrap();
        assert_eq!(parsed.title, "The Water Report");
        assert_eq!(
            parsed.body_paragraphs,
            vec![
                "The city shut off the wells on Monday morning.",
                "Officials said testing would continue through the week.",
            ]
        );
        assert_eq!(
            parsed.publish_date,
            Some(Utc.with_ymd_and_hms(2026, 10, 15, 14, 0, 0).unwrap())
        );
        assert_eq!(parsed.meta_image.as_deref(), Some("https://cdn.example.org/og.jpg"));
    }

    #[test]
    fn test_image_tiers_pick_and_filter() {
        let parsed = rules().extract("https://example.org/a", STORY).unwrap();
        assert_eq!(parsed.image_tiers.len(), 2);

        let first = &parsed.image_tiers[0];
        assert_eq!(first.candidates.len(), 1);
        assert_eq!(
            first.candidates[0].src.as_deref(),
            Some("https://img.assets-d.example.org/large.jpg")
        );
        assert!(first.candidates[0].ancestor_classes.contains("lead-art"));

        assert_eq!(parsed.image_tiers[1].candidates.len(), 3);
    }

    #[test]
    fn test_missing_title_uses_sentinel() {
        let html = r#"<html><body><div class="story-body"><p>A long enough paragraph here.</p></div></body></html>"#;
        let parsed = rules().extract("https://example.org/b", html).unwrap();
        assert_eq!(parsed.title, UNTITLED);
        assert!(parsed.image_tiers.is_empty());
        assert!(parsed.publish_date.is_none());
    }

    #[test]
    fn test_empty_body_is_extraction_failure() {
        let html = r#"<html><body><h1 class="hed">Title</h1><div class="story-body"><p>short</p></div></body></html>"#;
        let err = rules().extract("https://example.org/c", html).unwrap_err();
        assert_eq!(
            err,
            ExtractError::NoContentFound {
                url: "https://example.org/c".to_string(),
                what: "body paragraphs",
            }
        );
    }

    #[test]
    fn test_empty_page_is_invalid_document() {
        let err = rules().extract("https://example.org/d", "").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidDocument(_)));
    }

    #[test]
    fn test_visible_date_text_fallback() {
        let html = r#"<html><body><time>Oct. 16, 2026, 5 a.m. EDT</time>
            <div class="story-body"><p>A long enough paragraph here.</p></div></body></html>"#;
        let parsed = rules().extract("https://example.org/e", html).unwrap();
        assert_eq!(parsed.publish_date.map(|d| d.day()), Some(16));
    }
}
