//! Per-article processing: parse, summarize, publish.
//!
//! The [`Orchestrator`] is the [`ArticleHandler`] every poll loop hands its
//! newly discovered articles to. It returns an error whenever the article
//! did not reach the channel, and leaves the decision about retrying it on
//! a later cycle to the poller's retry budget.

use crate::api::Summarize;
use crate::errors::PipelineError;
use crate::models::ArticleRef;
use crate::poller::ArticleHandler;
use crate::publish::Publish;
use crate::scrapers::client::SourceClient;
use tracing::{info, instrument, warn};

/// Summarizes and publishes one article at a time.
///
/// Generic over the summarizer and publisher so tests can swap either for
/// an in-memory fake; in production they are a retrying Gemini client and
/// a [`TelegramPublisher`](crate::publish::TelegramPublisher).
pub struct Orchestrator<S, P> {
    summarizer: S,
    publisher: P,
}

impl<S: Summarize, P: Publish> Orchestrator<S, P> {
    /// Create an orchestrator.
    ///
    /// # Arguments
    ///
    /// * `summarizer` - Turns body paragraphs into the post text; expected to
    ///   do its own retrying
    /// * `publisher` - Delivers the post to the channel
    pub fn new(summarizer: S, publisher: P) -> Self {
        Self {
            summarizer,
            publisher,
        }
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<S, P> ArticleHandler for Orchestrator<S, P>
where
    S: Summarize + 'static,
    P: Publish + 'static,
{
    /// Relay one article.
    ///
    /// The article page is fetched and parsed, its paragraphs summarized and
    /// the summary published with the best validated hero image (or the
    /// listing's preview image when none validated).
    ///
    /// # Returns
    ///
    /// `Ok(())` once the post reached the channel. Fetch and extraction
    /// failures, a summarizer that gave up, and a rejected post are all
    /// errors.
    #[instrument(name = "article", skip_all, fields(source = %client.name(), url = %article.url))]
    async fn handle(&self, client: &SourceClient, article: &ArticleRef) -> Result<(), PipelineError> {
        let detail = client.parse_article(article).await?;

        let summary = self.summarizer.summarize(&detail.body_paragraphs).await?;
        client.monitor().record_summary(client.name());

        let image = detail
            .best_image()
            .or(article.preview_image_url.as_deref());

        match self
            .publisher
            .publish(&summary, image, Some(&detail.url))
            .await
        {
            Ok(delivery) => {
                client.monitor().record_publish(client.name(), &detail.url, true);
                info!(title = %detail.title, ?delivery, "Article relayed");
                Ok(())
            }
            Err(e) => {
                client.monitor().record_publish(client.name(), &detail.url, false);
                warn!(error = %e, "Publishing failed");
                Err(e.into())
            }
        }
    }
}
