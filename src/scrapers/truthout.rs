//! Truthout.
//!
//! The "latest" page is read with a link pattern: an `/articles/<slug>`
//! anchor followed on the same line by a `<time>` element. Only the last
//! 24 hours are announced in steady state, and entries without a readable
//! date are skipped.

use super::{EmitOrder, Site, parse_url};
use crate::errors::ExtractError;
use crate::extract::article::{ArticleRules, TierPick};
use crate::extract::listing::{ListingExtractor, ListingFilter, ListingRules};
use chrono::TimeDelta;

pub const NAME: &str = "truthout";

const ARTICLE_LINK: &str = r#"href="(?P<url>https://truthout\.org/articles/[a-z0-9-]+/?)"[^>]*>(?P<title>[^<]+)</a>.*?<time[^>]*>(?P<date>[^<]+)"#;

/// Build the Truthout source: latest-articles page, 24-hour window,
/// undated entries dropped outside the startup cycle.
pub fn site() -> Result<Site, ExtractError> {
    let base = parse_url("https://truthout.org/")?;

    let listing = ListingExtractor {
        rules: ListingRules::links(&[ARTICLE_LINK])?,
        filter: ListingFilter::default()
            .deny_urls(&[
                "center-for-grassroots-journalism",
                "prize",
                "submission-guidelines",
            ])
            .deny_titles(&["podcast", "support our work"])
            .within(TimeDelta::hours(24))
            .drop_undated(),
        base: base.clone(),
        strip_query: true,
    };

    let article = ArticleRules::new(
        &["h1.entry-title", "article h1", "h1"],
        &[".article-body p", ".entry-content p"],
    )?
    .image_tier("featured", ".featured-image img", TierPick::First, None)?
    .image_tier("header", ".article-header img", TierPick::First, None)?
    .image_tier("post image", "article img.wp-post-image", TierPick::All, None)?
    .image_tier("content", ".entry-content img", TierPick::All, None)?;

    Ok(Site {
        name: NAME,
        listing_pages: vec![parse_url("https://truthout.org/latest/")?],
        base,
        listing,
        article,
        emit_order: EmitOrder::Canonical,
        full_resolution: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::NewsSource;
    use chrono::{TimeZone, Utc};

    const LATEST: &str = r#"
<div class="card"><a href="https://truthout.org/articles/workers-strike-back/">Workers Strike Back</a> <span class="cat">Labor</span> <time class="date">October 16, 2026, 7:15 AM</time></div>
<div class="card"><a href="https://truthout.org/articles/a-climate-deal/">A Climate Deal</a> <time>October 16, 2026, 6:00 AM</time></div>
<div class="card"><a href="https://truthout.org/articles/truthout-prize-winners/">Prize Winners</a> <time>October 16, 2026, 6:30 AM</time></div>
<div class="card"><a href="https://truthout.org/articles/movement-memos-podcast-ep-9/">Movement Memos Podcast</a> <time>October 16, 2026, 5:00 AM</time></div>
<div class="card"><a href="https://truthout.org/articles/last-week/">Last Week</a> <time>October 9, 2026</time></div>
    "#;

    #[test]
    fn test_latest_listing_steady_state() {
        let site = site().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let mut entries = site.extract_listing(LATEST, false, now).unwrap();
        site.emit_order().sort(&mut entries);

        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://truthout.org/articles/a-climate-deal/",
                "https://truthout.org/articles/workers-strike-back/",
            ]
        );
    }

    #[test]
    fn test_latest_listing_startup_seeds_everything() {
        let site = site().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let entries = site.extract_listing(LATEST, true, now).unwrap();
        assert_eq!(entries.len(), 5);
    }
}
