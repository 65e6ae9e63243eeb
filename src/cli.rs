//! Command-line interface definitions for the relay.
//!
//! Secrets can be given as flags but are normally read from the
//! environment; their values are never echoed in `--help`.

use clap::Parser;
use std::path::PathBuf;

/// Watch news archive pages and relay summaries of new articles to a
/// Telegram channel.
///
/// ```sh
/// TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=@channel GOOGLE_API_KEY=... \
///     news_relay --state-dir ./state --sources propublica,truthout
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: String,

    /// Channel or chat that receives article posts
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: String,

    /// Chat allowed to send admin commands; the admin bot is off without it
    #[arg(long, env = "TELEGRAM_ADMIN_CHAT_ID", allow_negative_numbers = true)]
    pub telegram_admin_chat_id: Option<i64>,

    /// Gemini API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: String,

    /// Optional path to a YAML tuning file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the per-source seen sets
    #[arg(short, long, default_value = "state")]
    pub state_dir: PathBuf,

    /// Only run these sources (comma separated); all when omitted
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Telegram Bot API base URL
    #[arg(long, default_value = crate::publish::DEFAULT_API_BASE, hide = true)]
    pub telegram_api_base: String,
}
