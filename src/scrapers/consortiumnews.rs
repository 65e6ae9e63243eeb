//! ConsortiumNews.
//!
//! A WordPress site: article URLs carry their date in the path, so the
//! listing is read with a pattern over the raw HTML and the date comes from
//! the URL itself. The home page is tried first and the "recent stories"
//! page is the fallback. Inline images are resized thumbnails, rewritten to
//! their full-resolution originals before validation.

use super::{EmitOrder, Site, parse_url};
use crate::errors::ExtractError;
use crate::extract::article::{ArticleRules, TierPick};
use crate::extract::listing::{ListingExtractor, ListingFilter, ListingRules};
use chrono::TimeDelta;

pub const NAME: &str = "consortiumnews";

const DATED_LINK: &str = r#"href="(?P<url>https://consortiumnews\.com/(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/[\w-]+/?)""#;

/// Build the Consortium News source.
///
/// Listing dates come from the `/YYYY/MM/DD/` URL path and anything older
/// than 30 days is ignored. Article images are WordPress thumbnails, so the
/// resolver is told to try their full-resolution originals first.
pub fn site() -> Result<Site, ExtractError> {
    let base = parse_url("https://consortiumnews.com/")?;

    let listing = ListingExtractor {
        rules: ListingRules::links(&[DATED_LINK])?,
        filter: ListingFilter::default().within(TimeDelta::days(30)),
        base: base.clone(),
        strip_query: true,
    };

    let article = ArticleRules::new(&["h1.entry-title", "article h1", "h1"], &[".entry-content > p"])?
        .image_tier("caption", ".entry-content .wp-caption img", TierPick::First, None)?
        .image_tier("content", ".entry-content img", TierPick::First, None)?
        .image_tier("featured", ".featured-image img", TierPick::All, None)?
        .image_tier("thumbnail", ".post-thumbnail img", TierPick::All, None)?;

    Ok(Site {
        name: NAME,
        listing_pages: vec![
            base.clone(),
            parse_url("https://consortiumnews.com/recent-stories/")?,
        ],
        base,
        listing,
        article,
        emit_order: EmitOrder::Canonical,
        full_resolution: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::NewsSource;
    use chrono::{Datelike, TimeZone, Utc};

    #[test]
    fn test_listing_reads_dates_from_path() {
        let html = r#"
            <h2><a href="https://consortiumnews.com/2026/10/15/the-long-war/">The Long War</a></h2>
            <a class="more" href="https://consortiumnews.com/2026/10/15/the-long-war/#respond">Comments</a>
            <h2><a href="https://consortiumnews.com/2026/08/01/summer-archive/">Summer</a></h2>
            <a href="https://consortiumnews.com/category/commentary/">Commentary</a>
        "#;
        let site = site().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let entries = site.extract_listing(html, false, now).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://consortiumnews.com/2026/10/15/the-long-war/");
        assert_eq!(entries[0].publish_date.map(|d| d.day()), Some(15));
    }

    #[test]
    fn test_article_uses_caption_image_and_direct_paragraphs() {
        let html = r#"
            <h1 class="entry-title">The Long War</h1>
            <div class="entry-content">
              <div class="wp-caption"><img src="https://consortiumnews.com/wp-content/uploads/2026/10/war-800x533.jpg">
                <p class="wp-caption-text">A caption that should not be in the body.</p></div>
              <p>First paragraph of the piece, long enough.</p>
              <p>Second paragraph of the piece, long enough.</p>
            </div>
        "#;
        let site = site().unwrap();
        let parsed = site
            .extract_article("https://consortiumnews.com/2026/10/15/the-long-war/", html)
            .unwrap();
        assert_eq!(parsed.body_paragraphs.len(), 2);
        assert_eq!(parsed.image_tiers[0].label, "caption");
        assert!(site.full_resolution_images());
    }
}
