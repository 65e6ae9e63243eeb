//! ProPublica.
//!
//! The archive page is a "story river" of structured items carrying a
//! headline link, a `<time>` stamp and lead art. Article pages have gone
//! through several redesigns, hence the long title and body cascades. The
//! best hero image is usually the largest one served from the asset host.

use super::{EmitOrder, Site, parse_url};
use crate::errors::ExtractError;
use crate::extract::article::{ArticleRules, TierPick};
use crate::extract::listing::{ListingExtractor, ListingFilter, ListingRules};

pub const NAME: &str = "propublica";

const ASSET_HOST: &str = "img.assets-d.propublica.org";

const IMAGE_FALLBACKS: &[&str] = &[
    ".lead-art img[width][height]",
    "figure.lead-art img[src]",
    ".hero-image img[src]",
    "article figure img[width]",
    ".article-header img",
    ".story-header img",
    "article img[width]",
];

/// Build the ProPublica source.
///
/// # Returns
///
/// A [`Site`] polling the archive page and announcing newest first.
///
/// # Errors
///
/// Only when one of the built-in selectors or patterns fails to compile.
pub fn site() -> Result<Site, ExtractError> {
    let base = parse_url("https://www.propublica.org/")?;

    let listing = ListingExtractor {
        rules: ListingRules::items(
            &[".story-river-item"],
            "h4.story-river-item__hed a",
            Some("time.timestamp"),
            Some(".lead-art img"),
        )?,
        filter: ListingFilter::default(),
        base: base.clone(),
        strip_query: true,
    };

    let mut article = ArticleRules::new(
        &[
            "h1.hed",
            "article h1",
            ".story-header h1",
            ".article-header h1",
            r#"h1[data-qa="article-title"]"#,
        ],
        &[
            ".body-content p",
            ".story-body p",
            "article .article-body p",
            ".story-text p",
        ],
    )?
    .image_tier("asset host", "img", TierPick::Largest, Some(ASSET_HOST))?;
    for selector in IMAGE_FALLBACKS {
        article = article.image_tier(selector, selector, TierPick::All, None)?;
    }

    Ok(Site {
        name: NAME,
        listing_pages: vec![parse_url("https://www.propublica.org/archive/")?],
        base,
        listing,
        article,
        emit_order: EmitOrder::NewestFirst,
        full_resolution: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::NewsSource;
    use chrono::{TimeZone, Utc};

    const ARCHIVE: &str = r#"
        <div class="story-river-item">
          <div class="lead-art"><img src="https://img.assets-d.propublica.org/v5/images/a.jpg?w=300"
               srcset="https://img.assets-d.propublica.org/v5/images/a.jpg?w=300 300w, https://img.assets-d.propublica.org/v5/images/a.jpg?w=1200 1200w"></div>
          <h4 class="story-river-item__hed"><a href="/article/older-investigation">Older investigation</a></h4>
          <time class="timestamp">Oct. 14, 2026, 6 a.m. EDT</time>
        </div>
        <div class="story-river-item">
          <h4 class="story-river-item__hed"><a href="https://www.propublica.org/article/newer-investigation?utm_source=river">Newer investigation</a></h4>
          <time class="timestamp">Oct. 16, 2026, 5 a.m. EDT</time>
        </div>
        <div class="story-river-item">
          <h4 class="story-river-item__hed"><a href="/newsletters/the-big-story">Sign up for our newsletter</a></h4>
        </div>
    "#;

    #[test]
    fn test_archive_listing() {
        let site = site().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let mut entries = site.extract_listing(ARCHIVE, false, now).unwrap();
        site.emit_order().sort(&mut entries);

        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.propublica.org/article/newer-investigation",
                "https://www.propublica.org/article/older-investigation",
            ]
        );
        assert_eq!(
            entries[1].preview_image_url.as_deref(),
            Some("https://img.assets-d.propublica.org/v5/images/a.jpg?w=1200")
        );
    }

    #[test]
    fn test_article_prefers_largest_asset_host_image() {
        let html = r#"
            <article>
              <h1 class="hed">Investigation</h1>
              <figure class="lead-art">
                <img src="https://img.assets-d.propublica.org/v5/images/hero.jpg" width="1600" height="900">
              </figure>
              <img src="https://img.assets-d.propublica.org/v5/images/inline.jpg" width="400" height="300">
              <div class="article-body"><p>Paragraph one has enough text.</p></div>
            </article>
        "#;
        let parsed = site()
            .unwrap()
            .extract_article("https://www.propublica.org/article/x", html)
            .unwrap();
        assert_eq!(parsed.title, "Investigation");
        assert_eq!(parsed.body_paragraphs.len(), 1);
        assert_eq!(parsed.image_tiers[0].label, "asset host");
        assert_eq!(
            parsed.image_tiers[0].candidates[0].src.as_deref(),
            Some("https://img.assets-d.propublica.org/v5/images/hero.jpg")
        );
    }
}
