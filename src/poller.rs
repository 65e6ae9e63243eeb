//! Change detection and adaptive polling.
//!
//! One [`PollTask`] runs per source and owns everything mutable about that
//! source: its [`PollState`], its [`ChangeDetector`] (and through it the
//! seen set) and the per-article retry budget. Nothing else writes to
//! them, so there is exactly one cycle in flight per source.
//!
//! # Cycle
//!
//! ```text
//! Idle ──due──▶ Fetching ──ok──▶ Diffing ──added──▶ Draining ──▶ Idle
//!                  │                 └──nothing new──────────────▶ Idle
//!                  └──error──▶ Backoff ──due──▶ Fetching
//! ```
//!
//! After a cycle with new articles the interval shrinks by one step (floor
//! 3 minutes). After a cycle without any, or a failed one, it grows by one
//! step, or by a wider step once three misses happened in a row (ceiling
//! 15 minutes).
//!
//! The first cycle of a source without persisted state is a startup
//! cycle: everything currently listed is marked seen without being
//! announced.

use crate::errors::PipelineError;
use crate::models::ArticleRef;
use crate::scrapers::EmitOrder;
use crate::scrapers::client::SourceClient;
use crate::state::{SeenSet, SeenStore};
use itertools::Itertools;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Bounds and steps of the adaptive poll interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSettings {
    pub initial: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Decrease after a cycle with new articles.
    pub hit_step: Duration,
    /// Increase after a cycle without new articles.
    pub idle_step: Duration,
    /// Increase once `widen_after` misses happened in a row.
    pub wide_step: Duration,
    pub widen_after: u32,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(15 * 60),
            min: Duration::from_secs(3 * 60),
            max: Duration::from_secs(15 * 60),
            hit_step: Duration::from_secs(60),
            idle_step: Duration::from_secs(60),
            wide_step: Duration::from_secs(2 * 60),
            widen_after: 3,
        }
    }
}

impl IntervalSettings {
    fn clamp(&self, interval: Duration) -> Duration {
        interval.clamp(self.min, self.max)
    }
}

/// What happens to an article whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Release it from the seen set so the next cycle retries it, until
    /// the retry budget is used up.
    #[default]
    RetryNextCycle,
    /// Keep it marked seen; it will not be retried.
    MarkSeen,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: IntervalSettings,
    pub failure_policy: FailurePolicy,
    pub max_article_attempts: u32,
    pub announce_latest_on_startup: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: IntervalSettings::default(),
            failure_policy: FailurePolicy::default(),
            max_article_attempts: 3,
            announce_latest_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollPhase {
    Starting,
    Idle,
    Fetching,
    Diffing,
    Draining,
    Backoff,
    Stopped,
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollPhase::Starting => "starting",
            PollPhase::Idle => "idle",
            PollPhase::Fetching => "fetching",
            PollPhase::Diffing => "diffing",
            PollPhase::Draining => "draining",
            PollPhase::Backoff => "backoff",
            PollPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Observable state of one source's poll loop.
#[derive(Debug, Clone)]
pub struct PollState {
    pub source: String,
    pub phase: PollPhase,
    pub last_fetch_time: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_fetch_time`, used for scheduling.
    pub last_fetch_at: Option<Instant>,
    pub current_interval: Duration,
    pub consecutive_failures: u32,
    pub cycles: u64,
    pub last_new_article: Option<DateTime<Utc>>,
}

impl PollState {
    pub fn new(source: impl Into<String>, settings: &IntervalSettings) -> Self {
        Self {
            source: source.into(),
            phase: PollPhase::Starting,
            last_fetch_time: None,
            last_fetch_at: None,
            current_interval: settings.clamp(settings.initial),
            consecutive_failures: 0,
            cycles: 0,
            last_new_article: None,
        }
    }

    /// A cycle may start when the interval has elapsed since the last
    /// fetch; the startup phase is never held back.
    pub fn is_due(&self, now: Instant, is_startup: bool) -> bool {
        is_startup
            || self
                .last_fetch_at
                .is_none_or(|at| now.saturating_duration_since(at) >= self.current_interval)
    }

    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.last_fetch_at.map_or(Duration::ZERO, |at| {
            self.current_interval
                .saturating_sub(now.saturating_duration_since(at))
        })
    }

    fn begin_cycle(&mut self) {
        self.last_fetch_at = Some(Instant::now());
        self.last_fetch_time = Some(Utc::now());
    }

    /// New articles were found: poll more often.
    pub fn record_hit(&mut self, settings: &IntervalSettings) {
        self.consecutive_failures = 0;
        self.last_new_article = Some(Utc::now());
        self.current_interval =
            settings.clamp(self.current_interval.saturating_sub(settings.hit_step));
    }

    /// Nothing new, or the cycle failed: poll less often.
    pub fn record_miss(&mut self, settings: &IntervalSettings) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let step = if self.consecutive_failures >= settings.widen_after {
            settings.wide_step
        } else {
            settings.idle_step
        };
        self.current_interval = settings.clamp(self.current_interval + step);
    }
}

/// Diffs listing snapshots against the seen set.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    seen: SeenSet,
    order: EmitOrder,
}

impl ChangeDetector {
    pub fn new(seen: SeenSet, order: EmitOrder) -> Self {
        Self { seen, order }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Mark everything in `current` as seen without reporting it.
    pub fn seed(&mut self, current: &[ArticleRef]) {
        let urls: Vec<String> = current.iter().map(|a| a.url.clone()).collect();
        self.seen.observe(&urls);
    }

    /// Return `current − seen` in emission order and mark all of
    /// `current` as seen.
    ///
    /// Nothing that is still listed gets evicted from the seen set, however
    /// long the listing is, so an article is reported at most once while it
    /// stays on the page.
    pub fn diff(&mut self, current: Vec<ArticleRef>) -> Vec<ArticleRef> {
        let urls: Vec<String> = current.iter().map(|a| a.url.clone()).collect();
        let mut added: Vec<ArticleRef> = current
            .into_iter()
            .filter(|article| !self.seen.contains(&article.url))
            .unique_by(|article| article.url.clone())
            .collect();
        self.seen.observe(&urls);
        self.order.sort(&mut added);
        added
    }

    /// Forget `url` so the next cycle reports it again.
    pub fn release(&mut self, url: &str) -> bool {
        self.seen.remove(url)
    }
}

/// Per-article failure accounting.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: FailurePolicy,
    max_attempts: u32,
    failures: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Retry { attempt: u32 },
    GiveUp { attempts: u32 },
}

impl RetryBudget {
    pub fn new(policy: FailurePolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
            failures: HashMap::new(),
        }
    }

    pub fn succeeded(&mut self, url: &str) {
        self.failures.remove(url);
    }

    /// Forget failure counts for articles that are no longer listed.
    pub fn retain_listed(&mut self, current: &[ArticleRef]) {
        if self.failures.is_empty() {
            return;
        }
        let listed: HashSet<&str> = current.iter().map(|a| a.url.as_str()).collect();
        self.failures.retain(|url, _| listed.contains(url.as_str()));
    }

    pub fn pending(&self) -> usize {
        self.failures.len()
    }

    pub fn failed(&mut self, url: &str) -> Settlement {
        let count = self.failures.entry(url.to_string()).or_insert(0);
        *count += 1;
        let attempts = *count;
        if self.policy == FailurePolicy::RetryNextCycle && attempts < self.max_attempts {
            Settlement::Retry { attempt: attempts }
        } else {
            self.failures.remove(url);
            Settlement::GiveUp { attempts }
        }
    }
}

/// Processes one newly discovered article end to end.
pub trait ArticleHandler: Send + Sync + 'static {
    fn handle(
        &self,
        client: &SourceClient,
        article: &ArticleRef,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// The long-running poll loop of one source.
pub struct PollTask<H> {
    client: SourceClient,
    handler: Arc<H>,
    store: SeenStore,
    settings: PollSettings,
    state: PollState,
    detector: ChangeDetector,
    budget: RetryBudget,
    status: watch::Sender<PollState>,
    seeded: bool,
}

impl<H: ArticleHandler> PollTask<H> {
    /// A non-empty `seen` set skips the startup seeding cycle.
    pub fn new(
        client: SourceClient,
        handler: Arc<H>,
        store: SeenStore,
        seen: SeenSet,
        settings: PollSettings,
    ) -> (Self, watch::Receiver<PollState>) {
        let state = PollState::new(client.name(), &settings.interval);
        let (status, status_rx) = watch::channel(state.clone());
        let seeded = !seen.is_empty();
        let detector = ChangeDetector::new(seen, client.source().emit_order());
        let budget = RetryBudget::new(settings.failure_policy, settings.max_article_attempts);
        (
            Self {
                client,
                handler,
                store,
                settings,
                state,
                detector,
                budget,
                status,
                seeded,
            },
            status_rx,
        )
    }

    fn publish(&mut self, phase: PollPhase) {
        self.state.phase = phase;
        self.status.send_replace(self.state.clone());
    }

    async fn flush(&self) {
        if let Err(e) = self.store.save(self.client.name(), self.detector.seen()).await {
            error!(error = %e, "Failed to persist seen set");
        }
    }

    /// Poll until `shutdown` turns true (or its sender is dropped), then
    /// flush the seen set and return the final state.
    #[instrument(name = "poll", skip_all, fields(source = %self.client.name()))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PollState {
        info!(
            seeded = self.seeded,
            seen = self.detector.seen().len(),
            interval_secs = self.state.current_interval.as_secs(),
            "Poll loop starting"
        );
        self.publish(PollPhase::Starting);

        loop {
            let wait = self.state.time_until_due(Instant::now());
            if !wait.is_zero() {
                debug!(wait_secs = wait.as_secs(), "Sleeping until next cycle");
                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = stop_requested(&mut shutdown) => break,
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let is_startup = !self.seeded;
            if !self.state.is_due(Instant::now(), is_startup) {
                continue;
            }

            let flow = if is_startup {
                self.startup_cycle(&mut shutdown).await
            } else {
                self.poll_cycle(&mut shutdown).await
            };
            if flow.is_break() {
                break;
            }
            self.flush().await;
        }

        self.publish(PollPhase::Stopped);
        self.flush().await;
        info!(cycles = self.state.cycles, "Poll loop stopped");
        self.state
    }

    async fn fetch(
        &mut self,
        is_startup: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Result<Vec<ArticleRef>, PipelineError>> {
        self.state.begin_cycle();
        self.publish(PollPhase::Fetching);
        tokio::select! {
            listing = self.client.fetch_listing(is_startup) => Some(listing),
            _ = stop_requested(shutdown) => None,
        }
    }

    fn cycle_failed(&mut self, error: &PipelineError) {
        self.state.record_miss(&self.settings.interval);
        self.state.cycles += 1;
        warn!(
            error = %error,
            consecutive_failures = self.state.consecutive_failures,
            next_in_secs = self.state.current_interval.as_secs(),
            "Poll cycle failed"
        );
        self.publish(PollPhase::Backoff);
    }

    async fn startup_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> ControlFlow<()> {
        let Some(listing) = self.fetch(true, shutdown).await else {
            return ControlFlow::Break(());
        };
        let current = match listing {
            Ok(current) if !current.is_empty() => current,
            Ok(_) => {
                // Seeding from an empty page would turn the next full page
                // into a backfill.
                self.state.record_miss(&self.settings.interval);
                self.state.cycles += 1;
                warn!("Startup listing was empty; seeding postponed");
                self.publish(PollPhase::Backoff);
                return ControlFlow::Continue(());
            }
            Err(e) => {
                self.cycle_failed(&e);
                return ControlFlow::Continue(());
            }
        };

        self.publish(PollPhase::Diffing);
        let latest = self.settings.announce_latest_on_startup.then(|| {
            let mut newest = current.clone();
            EmitOrder::NewestFirst.sort(&mut newest);
            newest.into_iter().next()
        });
        self.detector.seed(&current);
        self.seeded = true;
        self.state.cycles += 1;
        info!(count = current.len(), "Seeded seen set from startup listing");

        let flow = match latest.flatten() {
            Some(article) => {
                info!(url = %article.url, "Announcing latest article on startup");
                self.publish(PollPhase::Draining);
                self.drain(vec![article], shutdown).await
            }
            None => ControlFlow::Continue(()),
        };
        self.publish(PollPhase::Idle);
        flow
    }

    async fn poll_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> ControlFlow<()> {
        let Some(listing) = self.fetch(false, shutdown).await else {
            return ControlFlow::Break(());
        };
        let current = match listing {
            Ok(current) => current,
            Err(e) => {
                self.cycle_failed(&e);
                return ControlFlow::Continue(());
            }
        };

        self.publish(PollPhase::Diffing);
        let listed = current.len();
        self.budget.retain_listed(&current);
        let added = self.detector.diff(current);
        self.state.cycles += 1;

        if added.is_empty() {
            self.state.record_miss(&self.settings.interval);
            debug!(
                listed,
                idle_cycles = self.state.consecutive_failures,
                next_in_secs = self.state.current_interval.as_secs(),
                "No new articles"
            );
            self.publish(PollPhase::Idle);
            return ControlFlow::Continue(());
        }

        self.state.record_hit(&self.settings.interval);
        self.client
            .monitor()
            .record_new_articles(self.client.name(), added.len());
        info!(
            count = added.len(),
            listed,
            retrying = self.budget.pending(),
            next_in_secs = self.state.current_interval.as_secs(),
            "New articles discovered"
        );

        self.publish(PollPhase::Draining);
        let flow = self.drain(added, shutdown).await;
        self.publish(PollPhase::Idle);
        flow
    }

    async fn drain(
        &mut self,
        articles: Vec<ArticleRef>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ControlFlow<()> {
        let mut queue = articles.into_iter();
        while let Some(article) = queue.next() {
            let outcome = tokio::select! {
                result = self.handler.handle(&self.client, &article) => Some(result),
                _ = stop_requested(shutdown) => None,
            };

            match outcome {
                Some(result) => self.settle(&article, result),
                None => {
                    let mut released = 0;
                    for pending in std::iter::once(article).chain(queue) {
                        if self.detector.release(&pending.url) {
                            released += 1;
                        }
                    }
                    info!(released, "Released unprocessed articles on shutdown");
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn settle(&mut self, article: &ArticleRef, result: Result<(), PipelineError>) {
        let error = match result {
            Ok(()) => {
                self.budget.succeeded(&article.url);
                return;
            }
            Err(e) => e,
        };
        match self.budget.failed(&article.url) {
            Settlement::Retry { attempt } => {
                self.detector.release(&article.url);
                warn!(url = %article.url, error = %error, attempt, "Article failed, retrying next cycle");
            }
            Settlement::GiveUp { attempts } => {
                warn!(url = %article.url, error = %error, attempts, "Article failed, keeping it marked seen");
            }
        }
    }
}
