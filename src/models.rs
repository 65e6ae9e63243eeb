//! Data models for discovered and parsed articles.
//!
//! - [`ArticleRef`]: an entry found on a listing page
//! - [`ParsedArticle`]: the synchronous result of parsing an article page,
//!   still carrying raw image candidates
//! - [`ArticleDetail`]: a parsed article with resolved hero images, ready
//!   for summarization
//! - [`ImageCandidate`]: an owned snapshot of an `<img>` element
//!
//! Identity of an article is its canonical URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title used when none of a source's heading selectors match.
pub const UNTITLED: &str = "Untitled Article";

/// An article as announced by a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    /// Canonical absolute URL.
    pub url: String,
    pub title: String,
    pub publish_date: Option<DateTime<Utc>>,
    pub preview_image_url: Option<String>,
}

impl ArticleRef {
    #[cfg(test)]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            publish_date: None,
            preview_image_url: None,
        }
    }
}

/// Everything needed from an `<img>` element once the document is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCandidate {
    pub src: Option<String>,
    /// Lazy-load attributes (`data-src`, `data-full-src`, `data-lazy-src`).
    pub lazy_srcs: Vec<String>,
    pub srcset: Option<String>,
    pub class: String,
    /// Space-joined classes of every ancestor element.
    pub ancestor_classes: String,
    pub width: u32,
    pub height: u32,
}

impl ImageCandidate {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Image candidates grouped by the selector tier that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTier {
    pub label: String,
    pub candidates: Vec<ImageCandidate>,
}

/// Output of parsing an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArticle {
    pub url: String,
    pub title: String,
    pub body_paragraphs: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub image_tiers: Vec<ImageTier>,
    /// `og:image` / `twitter:image`, used when no tier validates.
    pub meta_image: Option<String>,
}

impl ParsedArticle {
    pub fn into_detail(self, hero_images: Vec<String>) -> ArticleDetail {
        ArticleDetail {
            url: self.url,
            title: self.title,
            body_paragraphs: self.body_paragraphs,
            hero_images,
            publish_date: self.publish_date,
        }
    }
}

/// A fully parsed article.
///
/// `body_paragraphs` is in document order and never empty; an empty body
/// is reported as an extraction failure instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDetail {
    pub url: String,
    pub title: String,
    pub body_paragraphs: Vec<String>,
    /// Validated image URLs, best candidate first.
    pub hero_images: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
}

impl ArticleDetail {
    pub fn best_image(&self) -> Option<&str> {
        self.hero_images.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_ref_new() {
        let article = ArticleRef::new("https://example.com/a");
        assert_eq!(article.url, "https://example.com/a");
        assert!(article.title.is_empty());
        assert!(article.publish_date.is_none());
    }

    #[test]
    fn test_into_detail_keeps_body_order() {
        let parsed = ParsedArticle {
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            body_paragraphs: vec!["first".to_string(), "second".to_string()],
            publish_date: None,
            image_tiers: vec![],
            meta_image: None,
        };
        let detail = parsed.into_detail(vec!["https://example.com/i.jpg".to_string()]);
        assert_eq!(detail.body_paragraphs, vec!["first", "second"]);
        assert_eq!(detail.best_image(), Some("https://example.com/i.jpg"));
    }

    #[test]
    fn test_article_ref_serialization() {
        let article = ArticleRef {
            url: "https://example.com/a".to_string(),
            title: "Title".to_string(),
            publish_date: None,
            preview_image_url: Some("https://example.com/p.jpg".to_string()),
        };
        let json = serde_json::to_string(&article).unwrap();
        let back: ArticleRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, article);
    }

    #[test]
    fn test_candidate_area() {
        let img = ImageCandidate {
            width: 800,
            height: 600,
            ..Default::default()
        };
        assert_eq!(img.area(), 480_000);
    }
}
