//! Article summarization through the Gemini API.
//!
//! # Architecture
//!
//! - [`Summarize`]: core trait turning body paragraphs into a short post
//! - [`GeminiClient`]: `generateContent` over `reqwest`
//! - [`RetrySummarize`]: decorator applying a [`RetryPolicy`] to any
//!   [`Summarize`] implementation
//!
//! # Retry Strategy
//!
//! Summarization failures are never a reason to drop an article. The
//! default policy waits a fixed 30 seconds between attempts and never
//! gives up; the process shutting down is what ends the loop.

use crate::errors::SummarizeError;
use crate::retry::RetryPolicy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Delay between summarization attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

const PROMPT_PREAMBLE: &str = "\
You are a Telegram news channel editor bot. You receive the full article body as a list of \
paragraphs. Produce a single, concise description (no more than 3-4 sentences) that highlights \
only the most essential facts and conveys them clearly to a Telegram audience.

Guidelines:
- Keep it short and to the point (aim for 50-70 words).
- Lead with the who, what, where, and why: the subject of the piece, what happened, where it \
took place, and the reason it matters.
- Omit background detail and commentary; focus on hard facts.
- Write in a neutral, news-style tone.
- End with a \"read more\" call to action if space allows.

Here is the body:

";

/// Build the full prompt: instructions, then paragraphs separated by blank
/// lines.
pub fn build_prompt(paragraphs: &[String]) -> String {
    format!("{PROMPT_PREAMBLE}{}", paragraphs.join("\n\n"))
}

/// Turns article paragraphs into a short post.
pub trait Summarize: Send + Sync {
    fn summarize(
        &self,
        paragraphs: &[String],
    ) -> impl Future<Output = Result<String, SummarizeError>> + Send;
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl Summarize for GeminiClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model, paragraphs = paragraphs.len()))]
    async fn summarize(&self, paragraphs: &[String]) -> Result<String, SummarizeError> {
        if paragraphs.is_empty() {
            return Err(SummarizeError::NoParagraphs);
        }
        let t0 = Instant::now();
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: build_prompt(paragraphs),
                }],
            }],
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: Option<GeminiResponse> = serde_json::from_str(&body).ok();
        if let Some(message) = parsed
            .as_ref()
            .and_then(|p| p.error.as_ref())
            .map(|e| e.message.clone())
        {
            return Err(SummarizeError::Api(message));
        }
        if !status.is_success() {
            return Err(SummarizeError::Api(format!("HTTP {status}")));
        }
        let parsed = parsed
            .ok_or_else(|| SummarizeError::Api("unreadable generateContent response".to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .flatten()
            .take(1)
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizeError::Empty);
        }

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = text.chars().count(),
            "Summary generated"
        );
        Ok(text.to_string())
    }
}

/// Wrapper that retries any [`Summarize`] implementation per a
/// [`RetryPolicy`].
pub struct RetrySummarize<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Summarize> RetrySummarize<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetrySummarize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySummarize")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Summarize> Summarize for RetrySummarize<T> {
    #[instrument(level = "info", skip_all)]
    async fn summarize(&self, paragraphs: &[String]) -> Result<String, SummarizeError> {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            let attempt_t0 = Instant::now();
            let e = match self.inner.summarize(paragraphs).await {
                Ok(summary) => return Ok(summary),
                Err(SummarizeError::NoParagraphs) => return Err(SummarizeError::NoParagraphs),
                Err(e) => e,
            };
            attempt += 1;
            let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
            let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

            match self.policy.delay_after(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "summarize() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                None => {
                    error!(
                        attempt,
                        elapsed_ms_total,
                        error = %e,
                        "summarize() exhausted retries"
                    );
                    return Err(e);
                }
            }
        }
    }
}
