//! # News Relay
//!
//! Watches the archive pages of a handful of news sites, detects newly
//! published articles, summarizes each one with Gemini and posts the
//! summary (with the article's hero image when there is one) to a Telegram
//! channel.
//!
//! ## Usage
//!
//! ```sh
//! TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=@channel GOOGLE_API_KEY=... news_relay -s ./state
//! ```
//!
//! ## Architecture
//!
//! 1. **Polling**: one task per source fetches its listing page on an
//!    adaptive interval and diffs it against the persisted seen set
//! 2. **Parsing**: every new article is fetched, its body and hero images
//!    extracted and validated
//! 3. **Summarizing**: the body goes to Gemini, retried until it answers
//! 4. **Publishing**: the summary goes to Telegram, degrading to text when
//!    the photo cannot be sent
//!
//! SIGINT, SIGTERM and the admin `/stop` command all stop the poll loops,
//! flush every seen set and exit.

use clap::Parser;
use reqwest::Client;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod admin;
mod api;
mod cli;
mod config;
mod control;
mod errors;
mod extract;
mod fetcher;
mod images;
mod models;
mod monitor;
mod pipeline;
mod poller;
mod publish;
mod retry;
mod scrapers;
mod state;
mod utils;

use admin::AdminBot;
use api::{GeminiClient, RetrySummarize};
use cli::Cli;
use config::Settings;
use control::Supervisor;
use errors::ControlError;
use fetcher::{PageFetcher, build_client};
use images::ImageResolver;
use monitor::Monitor;
use pipeline::Orchestrator;
use poller::ArticleHandler;
use publish::{TelegramApi, TelegramPublisher};
use scrapers::client::SourceClient;
use scrapers::{SOURCE_NAMES, build_source};
use state::SeenStore;
use utils::ensure_writable_dir;

/// Timeout for Gemini and Telegram calls; covers a full `getUpdates` long
/// poll.
const API_TIMEOUT: Duration = Duration::from_secs(admin::LONG_POLL_SECS + 30);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "news_relay starting up");

    let args = Cli::parse();
    debug!(state_dir = %args.state_dir.display(), config = ?args.config, sources = ?args.sources, "Parsed CLI arguments");

    let settings = Settings::load(args.config.as_deref())?;

    // Early check: the seen sets must be persistable before anything runs.
    if let Err(e) = ensure_writable_dir(&args.state_dir).await {
        error!(
            path = %args.state_dir.display(),
            error = %e,
            "State directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let names = selected_sources(&args.sources)?;
    let monitor = Arc::new(Monitor::new());

    let mut clients = Vec::with_capacity(names.len());
    for name in &names {
        let source = build_source(name)?.ok_or_else(|| ControlError::UnknownSource(name.clone()))?;
        let http = build_client(source.base_url().as_str(), settings.request_timeout())?;
        let fetcher = PageFetcher::new(
            source.name(),
            http.clone(),
            settings.request_timeout(),
            monitor.clone(),
        );
        let images = ImageResolver::new(http, settings.image_timeout());
        clients.push(SourceClient::new(
            source,
            fetcher,
            images,
            settings.listing_policy(),
            settings.article_policy(),
        ));
    }
    info!(sources = ?names, "Sources configured");

    // ---- Summarizer and publisher ----
    let api_client = Client::builder().timeout(API_TIMEOUT).build()?;
    let summarizer = RetrySummarize::new(
        GeminiClient::new(
            api_client.clone(),
            settings.summarizer.endpoint.as_str(),
            settings.summarizer.model.as_str(),
            args.google_api_key.as_str(),
        ),
        settings.summarizer_policy(),
    );
    let telegram = TelegramApi::new(
        api_client,
        args.telegram_api_base.as_str(),
        args.telegram_bot_token.as_str(),
    );
    let publisher = TelegramPublisher::new(telegram.clone(), args.telegram_chat_id.as_str());
    let orchestrator = Arc::new(Orchestrator::new(summarizer, publisher));

    // ---- Poll loops ----
    let supervisor = Arc::new(Supervisor::new(
        orchestrator,
        clients,
        SeenStore::new(&args.state_dir, settings.pipeline.seen_capacity),
        settings.poll_settings(),
        monitor,
        settings.shutdown_grace(),
    ));
    supervisor.start().await;

    // ---- Admin bot ----
    let (admin_stop, admin_stop_rx) = watch::channel(false);
    let admin_task = match args.telegram_admin_chat_id {
        Some(chat_id) => {
            let bot = AdminBot::new(telegram, chat_id, supervisor.clone());
            Some(tokio::spawn(bot.run(admin_stop_rx)))
        }
        None => {
            info!("No admin chat configured; admin bot disabled");
            None
        }
    };

    let reason = wait_for_shutdown(&supervisor).await?;
    info!(%reason, "Shutdown requested");

    supervisor.shutdown().await;
    admin_stop.send_replace(true);
    if let Some(task) = admin_task
        && tokio::time::timeout(settings.shutdown_grace(), task).await.is_err()
    {
        warn!("Admin bot did not stop in time");
    }

    info!(
        uptime_secs = start_time.elapsed().as_secs(),
        "news_relay stopped"
    );
    Ok(())
}

/// Resolve `--sources` to known source names, defaulting to all of them.
fn selected_sources(requested: &[String]) -> Result<Vec<String>, ControlError> {
    if requested.is_empty() {
        return Ok(SOURCE_NAMES.iter().map(|s| s.to_string()).collect());
    }
    let mut names = Vec::new();
    for name in requested {
        let name = name.trim().to_ascii_lowercase();
        if !SOURCE_NAMES.contains(&name.as_str()) {
            return Err(ControlError::UnknownSource(name));
        }
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Wait for SIGINT, SIGTERM or an admin `/stop`, whichever comes first.
async fn wait_for_shutdown<H: ArticleHandler>(
    supervisor: &Supervisor<H>,
) -> Result<&'static str, std::io::Error> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = sigterm.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            Ok("SIGINT")
        }
        _ = terminate => Ok("SIGTERM"),
        _ = supervisor.stop_requested() => Ok("admin /stop"),
    }
}
