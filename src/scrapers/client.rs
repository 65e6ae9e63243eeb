//! Network half of a news source.
//!
//! [`SourceClient`] combines a [`NewsSource`] with its [`PageFetcher`] and
//! [`ImageResolver`] and offers the three operations the poller and the
//! pipeline need: fetch the current listing, parse one article, resolve
//! its hero images.

use super::NewsSource;
use crate::errors::PipelineError;
use crate::fetcher::PageFetcher;
use crate::images::ImageResolver;
use crate::models::{ArticleDetail, ArticleRef, ParsedArticle, UNTITLED};
use crate::monitor::Monitor;
use crate::retry::RetryPolicy;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

/// Network half of a source: a [`NewsSource`] bound to its fetcher, image
/// resolver and retry policies.
#[derive(Clone)]
pub struct SourceClient {
    source: Arc<dyn NewsSource>,
    fetcher: PageFetcher,
    images: ImageResolver,
    listing_policy: RetryPolicy,
    article_policy: RetryPolicy,
}

impl SourceClient {
    /// `listing_policy` applies to the last listing page only; earlier
    /// fallback pages and article pages use the bounded `article_policy`.
    pub fn new(
        source: Arc<dyn NewsSource>,
        fetcher: PageFetcher,
        images: ImageResolver,
        listing_policy: RetryPolicy,
        article_policy: RetryPolicy,
    ) -> Self {
        let images = images.with_full_resolution(source.full_resolution_images());
        Self {
            source,
            fetcher,
            images,
            listing_policy,
            article_policy,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn source(&self) -> &Arc<dyn NewsSource> {
        &self.source
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        self.fetcher.monitor()
    }

    /// Fetch the listing pages in order; the first page yielding entries
    /// wins.
    ///
    /// # Arguments
    ///
    /// * `is_startup` - Relaxes the listing filters for the seeding cycle
    ///
    /// # Returns
    ///
    /// The entries of the first productive page. An empty result means every
    /// page was readable but listed nothing usable; an error means the last
    /// page could not be fetched or parsed.
    #[instrument(level = "info", skip(self), fields(source = %self.source.name()))]
    pub async fn fetch_listing(&self, is_startup: bool) -> Result<Vec<ArticleRef>, PipelineError> {
        let pages = self.source.listing_pages();
        for (i, page) in pages.iter().enumerate() {
            let last = i + 1 == pages.len();
            let policy = if last {
                &self.listing_policy
            } else {
                &self.article_policy
            };

            let html = match self.fetcher.fetch_page(page.as_str(), policy).await {
                Ok(html) => html,
                Err(e) if !last => {
                    warn!(page = %page, error = %e, "Listing page failed, trying next");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.source.extract_listing(&html, is_startup, Utc::now()) {
                Ok(entries) if !entries.is_empty() => {
                    info!(page = %page, count = entries.len(), "Indexed listing page");
                    return Ok(entries);
                }
                Ok(_) => warn!(page = %page, "Listing page yielded no entries"),
                Err(e) if !last => {
                    warn!(page = %page, error = %e, "Listing page unreadable, trying next")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Vec::new())
    }

    /// Fetch and fully parse one article, including its hero images.
    #[instrument(level = "info", skip_all, fields(source = %self.source.name(), url = %article.url))]
    pub async fn parse_article(&self, article: &ArticleRef) -> Result<ArticleDetail, PipelineError> {
        let html = self
            .fetcher
            .fetch_page(&article.url, &self.article_policy)
            .await?;
        let mut parsed = self.source.extract_article(&article.url, &html)?;

        if parsed.title == UNTITLED && !article.title.is_empty() {
            parsed.title = article.title.clone();
        }
        if parsed.publish_date.is_none() {
            parsed.publish_date = article.publish_date;
        }

        let hero_images = self.resolve_images(&parsed).await;
        info!(
            paragraphs = parsed.body_paragraphs.len(),
            images = hero_images.len(),
            "Parsed article"
        );
        Ok(parsed.into_detail(hero_images))
    }

    /// Validated hero images for `parsed`, best first and at most three.
    pub async fn resolve_images(&self, parsed: &ParsedArticle) -> Vec<String> {
        let page_url = Url::parse(&parsed.url).unwrap_or_else(|_| self.source.base_url().clone());
        self.images
            .resolve_hero_images(&page_url, &parsed.image_tiers, parsed.meta_image.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::article::{ArticleRules, TierPick};
    use crate::extract::listing::{ListingExtractor, ListingFilter, ListingRules};
    use crate::fetcher::build_client;
    use crate::scrapers::{EmitOrder, Site};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_site(server: &MockServer, pages: &[&str]) -> Site {
        let base = Url::parse(&server.uri()).unwrap();
        Site {
            name: "test",
            listing_pages: pages.iter().map(|p| base.join(p).unwrap()).collect(),
            listing: ListingExtractor {
                rules: ListingRules::items(&["li.story"], "a", None, None).unwrap(),
                filter: ListingFilter::default(),
                base: base.clone(),
                strip_query: true,
            },
            article: ArticleRules::new(&["h1"], &["article p"])
                .unwrap()
                .image_tier("lead", "figure img", TierPick::All, None)
                .unwrap(),
            base,
            emit_order: EmitOrder::Canonical,
            full_resolution: false,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(5), Some(2))
    }

    fn client_for(server: &MockServer, pages: &[&str]) -> SourceClient {
        let http = build_client(&server.uri(), Duration::from_secs(5)).unwrap();
        let fetcher = PageFetcher::new("test", http.clone(), Duration::from_secs(5), Arc::new(Monitor::new()));
        let images = ImageResolver::new(http, Duration::from_secs(2));
        SourceClient::new(Arc::new(test_site(server, pages)), fetcher, images, fast(), fast())
    }

    #[tokio::test]
    async fn test_listing_falls_back_to_second_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ul><li>nothing here</li></ul>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recent/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<ul><li class="story"><a href="/a/one">One</a></li></ul>"#),
            )
            .mount(&server)
            .await;

        let entries = client_for(&server, &["/", "/recent/"])
            .fetch_listing(false)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, format!("{}/a/one", server.uri()));
    }

    #[tokio::test]
    async fn test_parse_article_with_image_and_listing_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/one"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<article><figure><img src="/pic.jpg"></figure>
                   <p>The only paragraph with content.</p></article>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/pic.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
            .mount(&server)
            .await;

        let article = ArticleRef {
            title: "One".to_string(),
            ..ArticleRef::new(format!("{}/a/one", server.uri()))
        };
        let detail = client_for(&server, &["/"]).parse_article(&article).await.unwrap();
        assert_eq!(detail.title, "One");
        assert_eq!(detail.body_paragraphs, vec!["The only paragraph with content."]);
        assert_eq!(detail.best_image(), Some(format!("{}/pic.jpg", server.uri()).as_str()));
    }

    #[tokio::test]
    async fn test_parse_article_without_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Just a title</h1>"))
            .mount(&server)
            .await;

        let article = ArticleRef::new(format!("{}/a/empty", server.uri()));
        let err = client_for(&server, &["/"]).parse_article(&article).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extract(_)));
    }
}
