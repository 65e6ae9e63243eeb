//! Admin command bot.
//!
//! Long-polls Telegram `getUpdates` and answers commands from the single
//! configured admin chat. Every other chat gets "Unauthorized access".
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/status` | poll state and counters of every source |
//! | `/rerun [source]` | restart one source's poll loop, or all of them |
//! | `/stop` | graceful shutdown of the whole process |
//! | `/help` | command list |

use crate::control::{SourceStatus, Supervisor};
use crate::errors::PublishError;
use crate::poller::ArticleHandler;
use crate::publish::{TelegramApi, escape_html};
use crate::utils::format_duration;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Seconds Telegram holds a `getUpdates` request open.
pub const LONG_POLL_SECS: u64 = 30;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub const HELP_TEXT: &str = "\
/status - poll state of every source
/rerun [source] - restart one source, or all of them
/stop - shut the relay down
/help - this message";

pub const UNAUTHORIZED: &str = "Unauthorized access";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    Rerun(Option<String>),
    Stop,
    Help,
}

impl AdminCommand {
    /// Parse a message text; `@botname` suffixes are accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let command = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        match command.as_str() {
            "status" => Some(Self::Status),
            "rerun" | "restart" => Some(Self::Rerun(words.next().map(str::to_ascii_lowercase))),
            "stop" => Some(Self::Stop),
            "help" | "start" => Some(Self::Help),
            _ => None,
        }
    }
}

fn timestamp(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "never".to_string())
}

/// Render the `/status` reply (Telegram HTML).
pub fn format_status(statuses: &[SourceStatus]) -> String {
    if statuses.is_empty() {
        return "No sources configured.".to_string();
    }
    let mut out = String::new();
    for (i, s) in statuses.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let state = &s.state;
        let _ = writeln!(
            out,
            "<b>{}</b> ({})",
            escape_html(&state.source),
            if s.running { "running" } else { "stopped" }
        );
        let _ = writeln!(
            out,
            "phase: {}, interval: {}, failures: {}, cycles: {}",
            state.phase,
            format_duration(state.current_interval),
            state.consecutive_failures,
            state.cycles
        );
        let _ = writeln!(out, "last fetch: {}", timestamp(state.last_fetch_time));
        let _ = writeln!(out, "last new article: {}", timestamp(state.last_new_article));
        let _ = writeln!(
            out,
            "fetches: {} ok / {} failed, new: {}, summaries: {}, published: {} ({} failed)",
            s.stats.fetch_ok,
            s.stats.fetch_failed,
            s.stats.new_articles,
            s.stats.summaries,
            s.stats.published,
            s.stats.publish_failures
        );
    }
    out.trim_end().to_string()
}

#[derive(Serialize, Debug)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

/// Long-polls `getUpdates` and answers commands from the admin chat.
pub struct AdminBot<H> {
    api: TelegramApi,
    admin_chat_id: i64,
    supervisor: Arc<Supervisor<H>>,
    long_poll_secs: u64,
}

impl<H: ArticleHandler> AdminBot<H> {
    pub fn new(api: TelegramApi, admin_chat_id: i64, supervisor: Arc<Supervisor<H>>) -> Self {
        Self {
            api,
            admin_chat_id,
            supervisor,
            long_poll_secs: LONG_POLL_SECS,
        }
    }

    #[cfg(test)]
    pub fn with_long_poll(mut self, secs: u64) -> Self {
        self.long_poll_secs = secs;
        self
    }

    /// Answer one command.
    ///
    /// # Arguments
    ///
    /// * `chat_id` - Chat the message came from; anything but the admin
    ///   chat gets the unauthorized reply
    /// * `text` - Raw message text
    ///
    /// # Returns
    ///
    /// The reply to send, or `None` for messages that are not commands.
    pub async fn respond(&self, chat_id: i64, text: &str) -> Option<String> {
        if chat_id != self.admin_chat_id {
            warn!(chat_id, "Command from unauthorized chat");
            return Some(UNAUTHORIZED.to_string());
        }
        let command = AdminCommand::parse(text)?;
        info!(?command, "Admin command");
        let reply = match command {
            AdminCommand::Status => format_status(&self.supervisor.status().await),
            AdminCommand::Rerun(None) => {
                self.supervisor.restart_all().await;
                "Restarted all sources.".to_string()
            }
            AdminCommand::Rerun(Some(source)) => match self.supervisor.restart(&source).await {
                Ok(()) => format!("Restarted {}.", escape_html(&source)),
                Err(e) => format!(
                    "{}. Known sources: {}",
                    escape_html(&e.to_string()),
                    self.supervisor.sources().collect::<Vec<_>>().join(", ")
                ),
            },
            AdminCommand::Stop => {
                self.supervisor.request_stop();
                "Stopping the relay.".to_string()
            }
            AdminCommand::Help => HELP_TEXT.to_string(),
        };
        Some(reply)
    }

    /// Fetch one batch of updates after `offset`, answer them and advance
    /// the offset. Returns the number of updates handled.
    pub async fn poll_once(&self, offset: &mut i64) -> Result<usize, PublishError> {
        let request = GetUpdates {
            offset: *offset,
            timeout: self.long_poll_secs,
            allowed_updates: ["message"],
        };
        let updates: Vec<Update> = self.api.call("getUpdates", &request).await?;
        let count = updates.len();

        for update in updates {
            *offset = (*offset).max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text.as_deref() else {
                continue;
            };
            if let Some(reply) = self.respond(message.chat.id, text).await
                && let Err(e) = self
                    .api
                    .send_message(&message.chat.id.to_string(), &reply)
                    .await
            {
                warn!(chat_id = message.chat.id, error = %e, "Failed to send admin reply");
            }
        }
        Ok(count)
    }

    /// Serve commands until `shutdown` turns true.
    #[instrument(name = "admin", skip_all, fields(chat_id = self.admin_chat_id))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Admin bot listening");
        let mut offset = 0i64;
        loop {
            let result = tokio::select! {
                r = self.poll_once(&mut offset) => r,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };
            match result {
                Ok(n) => debug!(updates = n, offset, "Polled updates"),
                Err(e) => {
                    warn!(error = %e, "getUpdates failed; backing off");
                    tokio::select! {
                        _ = sleep(ERROR_BACKOFF) => {}
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
            }
        }
        info!("Admin bot stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;
    use crate::models::ArticleRef;
    use crate::monitor::{Monitor, SourceStats};
    use crate::poller::{IntervalSettings, PollPhase, PollSettings, PollState};
    use crate::scrapers::client::SourceClient;
    use crate::state::SeenStore;
    use reqwest::Client;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Accept;

    impl ArticleHandler for Accept {
        async fn handle(&self, _client: &SourceClient, _article: &ArticleRef) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(AdminCommand::parse("/status"), Some(AdminCommand::Status));
        assert_eq!(AdminCommand::parse("/status@relay_bot"), Some(AdminCommand::Status));
        assert_eq!(AdminCommand::parse("/rerun"), Some(AdminCommand::Rerun(None)));
        assert_eq!(
            AdminCommand::parse("/rerun Truthout"),
            Some(AdminCommand::Rerun(Some("truthout".to_string())))
        );
        assert_eq!(AdminCommand::parse("/stop"), Some(AdminCommand::Stop));
        assert_eq!(AdminCommand::parse("/help"), Some(AdminCommand::Help));
        assert_eq!(AdminCommand::parse("status"), None);
        assert_eq!(AdminCommand::parse("/unknown"), None);
        assert_eq!(AdminCommand::parse(""), None);
    }

    #[test]
    fn test_format_status() {
        let mut state = PollState::new("propublica", &IntervalSettings::default());
        state.phase = PollPhase::Idle;
        state.cycles = 4;
        let status = SourceStatus {
            state,
            stats: SourceStats {
                published: 2,
                ..SourceStats::default()
            },
            running: true,
        };
        let text = format_status(&[status]);
        assert!(text.starts_with("<b>propublica</b> (running)"));
        assert!(text.contains("interval: 15m 00s"));
        assert!(text.contains("cycles: 4"));
        assert!(text.contains("last fetch: never"));
        assert!(text.contains("published: 2 (0 failed)"));
    }

    fn bot(server: &MockServer, dir: &std::path::Path) -> AdminBot<Accept> {
        let supervisor = Supervisor::new(
            Arc::new(Accept),
            Vec::new(),
            SeenStore::new(dir, 100),
            PollSettings::default(),
            Arc::new(Monitor::new()),
            Duration::from_secs(1),
        );
        AdminBot::new(
            TelegramApi::new(Client::new(), server.uri(), "TOKEN"),
            42,
            Arc::new(supervisor),
        )
        .with_long_poll(0)
    }

    fn sent() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 9}}))
    }

    #[tokio::test]
    async fn test_poll_once_answers_admin_and_rejects_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 42}, "text": "/help"}},
                    {"update_id": 11, "message": {"message_id": 2, "chat": {"id": 7}, "text": "/stop"}},
                    {"update_id": 12, "message": {"message_id": 3, "chat": {"id": 42}, "text": "hello"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({"chat_id": "42", "text": HELP_TEXT})))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({"chat_id": "7", "text": UNAUTHORIZED})))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let bot = bot(&server, dir.path());
        let mut offset = 0;
        assert_eq!(bot.poll_once(&mut offset).await.unwrap(), 3);
        assert_eq!(offset, 13);
    }

    #[tokio::test]
    async fn test_stop_and_unknown_rerun() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let bot = bot(&server, dir.path());

        let reply = bot.respond(42, "/rerun nowhere").await.unwrap();
        assert!(reply.starts_with("unknown source 'nowhere'"));

        assert_eq!(bot.respond(42, "/stop").await.as_deref(), Some("Stopping the relay."));
        tokio::time::timeout(Duration::from_secs(1), bot.supervisor.stop_requested())
            .await
            .unwrap();
    }
}
