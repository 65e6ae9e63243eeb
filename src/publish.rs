//! Telegram delivery.
//!
//! [`TelegramApi`] is a thin Bot API client shared by the channel
//! publisher and the admin bot. [`TelegramPublisher`] posts one summary
//! per article: as a photo with caption when an image is available and
//! the caption fits, otherwise as a plain text message. A rejected photo
//! never loses the post; it is re-sent as text with the image URL
//! appended as a link.

use crate::errors::PublishError;
use crate::utils::truncate_for_log;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{info, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram's limit for photo captions, in characters.
pub const CAPTION_LIMIT: usize = 1024;

/// Telegram's limit for text messages, in characters.
pub const MESSAGE_LIMIT: usize = 4096;

const FULL_ARTICLE_LABEL: &str = "🌐 View Full Article";

/// How a post ended up being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Photo,
    Text,
    /// The photo was unusable; text was sent with the image URL as a link.
    TextWithImageLink,
}

/// Posts article summaries to the output channel.
pub trait Publish: Send + Sync {
    fn publish(
        &self,
        text: &str,
        image_url: Option<&str>,
        article_url: Option<&str>,
    ) -> impl Future<Output = Result<Delivery, PublishError>> + Send;
}

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Serialize, Debug)]
struct LinkPreviewOptions {
    is_disabled: bool,
}

#[derive(Serialize, Debug)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    link_preview_options: LinkPreviewOptions,
}

#[derive(Serialize, Debug)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
}

/// Minimal Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    base: String,
    token: String,
}

impl fmt::Debug for TelegramApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramApi")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl TelegramApi {
    pub fn new(client: Client, base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Call a Bot API method and unwrap its `result`.
    pub async fn call<B, R>(&self, method: &'static str, body: &B) -> Result<R, PublishError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{}", self.base, self.token, method);
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: Option<ApiResponse<R>> = serde_json::from_str(&text).ok();
        match parsed {
            Some(ApiResponse {
                ok: true,
                result: Some(result),
                ..
            }) => Ok(result),
            Some(ApiResponse { description, .. }) => Err(PublishError::Api {
                method,
                description: description.unwrap_or_else(|| format!("HTTP {status}")),
            }),
            None => Err(PublishError::Api {
                method,
                description: format!("HTTP {status}: {}", truncate_for_log(&text, 200)),
            }),
        }
    }

    /// Send an HTML-formatted text message with link previews disabled.
    pub async fn send_message(&self, chat_id: &str, html: &str) -> Result<(), PublishError> {
        let body = SendMessage {
            chat_id,
            text: html,
            parse_mode: Some("HTML"),
            link_preview_options: LinkPreviewOptions { is_disabled: true },
        };
        self.call::<_, serde_json::Value>("sendMessage", &body).await?;
        Ok(())
    }

    pub async fn send_photo(&self, chat_id: &str, photo: &str, caption: &str) -> Result<(), PublishError> {
        let body = SendPhoto {
            chat_id,
            photo,
            caption,
            parse_mode: "HTML",
        };
        self.call::<_, serde_json::Value>("sendPhoto", &body).await?;
        Ok(())
    }
}

/// Escape the characters that are special in Telegram's HTML parse mode
/// (`&`, `<`, `>` and `"`).
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `text`, cutting it at a character boundary and ending it with an
/// ellipsis when the escaped form would exceed `budget` characters. Entities
/// are never split.
fn escape_within(text: &str, budget: usize) -> String {
    let escaped = escape_html(text);
    if escaped.chars().count() <= budget {
        return escaped;
    }

    let mut out = String::new();
    let mut used = 0;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let piece = escape_html(c.encode_utf8(&mut buf));
        let len = piece.chars().count();
        if used + len + 1 > budget {
            break;
        }
        out.push_str(&piece);
        used += len;
    }
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

fn compose(text: &str, article_url: Option<&str>, image_url: Option<&str>) -> String {
    let mut suffix = String::new();
    if let Some(url) = article_url {
        suffix.push_str(&format!(
            "\n\n<a href=\"{}\">{FULL_ARTICLE_LABEL}</a>",
            escape_html(url)
        ));
    }
    if let Some(url) = image_url {
        suffix.push_str("\n\n");
        suffix.push_str(&escape_html(url));
    }
    let budget = MESSAGE_LIMIT.saturating_sub(suffix.chars().count());
    format!("{}{suffix}", escape_within(text.trim(), budget))
}

/// Build the HTML for one post.
///
/// # Arguments
///
/// * `text` - The plain-text summary; it is escaped here.
/// * `article_url` - Link appended as "View Full Article", if any.
///
/// # Returns
///
/// The escaped summary followed by the link, shortened with an ellipsis
/// when it would not fit in a single Telegram message.
pub fn format_post(text: &str, article_url: Option<&str>) -> String {
    compose(text, article_url, None)
}

/// Text-only fallback carrying the image URL as a plain link.
fn with_image_link(text: &str, article_url: Option<&str>, image_url: &str) -> String {
    compose(text, article_url, Some(image_url))
}

/// Publishes to one chat (usually a channel).
#[derive(Debug, Clone)]
pub struct TelegramPublisher {
    api: TelegramApi,
    chat_id: String,
}

impl TelegramPublisher {
    pub fn new(api: TelegramApi, chat_id: impl Into<String>) -> Self {
        Self {
            api,
            chat_id: chat_id.into(),
        }
    }
}

impl Publish for TelegramPublisher {
    #[instrument(level = "info", skip_all, fields(article = article_url.unwrap_or("-"), has_image = image_url.is_some()))]
    async fn publish(
        &self,
        text: &str,
        image_url: Option<&str>,
        article_url: Option<&str>,
    ) -> Result<Delivery, PublishError> {
        let post = format_post(text, article_url);

        let Some(image_url) = image_url else {
            self.api.send_message(&self.chat_id, &post).await?;
            info!("Published text post");
            return Ok(Delivery::Text);
        };

        if post.chars().count() <= CAPTION_LIMIT {
            match self.api.send_photo(&self.chat_id, image_url, &post).await {
                Ok(()) => {
                    info!(image = %image_url, "Published photo post");
                    return Ok(Delivery::Photo);
                }
                Err(e) => warn!(image = %image_url, error = %e, "sendPhoto failed; falling back to text"),
            }
        } else {
            info!(
                chars = post.chars().count(),
                limit = CAPTION_LIMIT,
                "Caption too long for a photo; sending text"
            );
        }

        self.api
            .send_message(&self.chat_id, &with_image_link(text, article_url, image_url))
            .await?;
        info!("Published text post with image link");
        Ok(Delivery::TextWithImageLink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}}))
    }

    fn rejected(description: &str) -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(json!({"ok": false, "error_code": 400, "description": description}))
    }

    fn publisher(server: &MockServer) -> TelegramPublisher {
        TelegramPublisher::new(TelegramApi::new(Client::new(), server.uri(), "TOKEN"), "@news")
    }

    #[test]
    fn test_format_post_escapes_and_links() {
        let post = format_post("Tom & Jerry <3", Some("https://x.org/a?b=1&c=2"));
        assert_eq!(
            post,
            "Tom &amp; Jerry &lt;3\n\n<a href=\"https://x.org/a?b=1&amp;c=2\">🌐 View Full Article</a>"
        );
    }

    #[test]
    fn test_overlong_summary_is_cut_to_one_message() {
        let long = "fish & chips ".repeat(600);
        let post = format_post(&long, Some("https://x.org/a"));
        assert!(post.chars().count() <= MESSAGE_LIMIT);
        assert!(post.chars().count() > MESSAGE_LIMIT - 10);
        assert!(post.ends_with("🌐 View Full Article</a>"));
        let body = post.split("\n\n<a href").next().unwrap();
        assert!(body.ends_with('…'));
        // Entities are never split.
        assert_eq!(body.matches('&').count(), body.matches("&amp;").count());

        let fallback = with_image_link(&long, Some("https://x.org/a"), "https://x.org/p.jpg");
        assert!(fallback.chars().count() <= MESSAGE_LIMIT);
        assert!(fallback.ends_with("\n\nhttps://x.org/p.jpg"));
    }

    #[test]
    fn test_short_summary_is_untouched() {
        assert_eq!(format_post("  Short.  ", None), "Short.");
    }

    #[tokio::test]
    async fn test_photo_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendPhoto"))
            .and(body_partial_json(json!({
                "chat_id": "@news",
                "photo": "https://x.org/pic.jpg",
                "parse_mode": "HTML"
            })))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let delivery = publisher(&server)
            .publish("Summary.", Some("https://x.org/pic.jpg"), Some("https://x.org/a"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Photo);
    }

    #[tokio::test]
    async fn test_rejected_photo_degrades_to_text_with_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendPhoto"))
            .respond_with(rejected("Bad Request: wrong file identifier/HTTP URL specified"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({
                "text": "Summary.\n\n<a href=\"https://x.org/a\">🌐 View Full Article</a>\n\nhttps://x.org/pic.jpg",
                "link_preview_options": {"is_disabled": true}
            })))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let delivery = publisher(&server)
            .publish("Summary.", Some("https://x.org/pic.jpg"), Some("https://x.org/a"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::TextWithImageLink);
    }

    #[tokio::test]
    async fn test_long_caption_skips_photo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let long = "word ".repeat(300);
        let delivery = publisher(&server)
            .publish(&long, Some("https://x.org/pic.jpg"), Some("https://x.org/a"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::TextWithImageLink);
    }

    #[tokio::test]
    async fn test_text_only_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(rejected("Forbidden: bot is not a member of the channel chat"))
            .mount(&server)
            .await;

        let err = publisher(&server)
            .publish("Summary.", None, Some("https://x.org/a"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Api { method: "sendMessage", ref description } if description.starts_with("Forbidden")
        ));
    }
}
