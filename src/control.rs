//! Supervision of the per-source poll loops.
//!
//! The [`Supervisor`] spawns one [`PollTask`] per source and keeps the
//! handles needed to observe and control it: a stop switch, the task's
//! status channel and its join handle. The admin bot and the signal
//! handlers in `main` only ever talk to the supervisor, never to a poll
//! loop directly.

use crate::errors::ControlError;
use crate::monitor::{Monitor, SourceStats};
use crate::poller::{ArticleHandler, PollSettings, PollState, PollTask};
use crate::scrapers::client::SourceClient;
use crate::state::{SeenSet, SeenStore};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

/// What the control surface reports for one source.
#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub state: PollState,
    pub stats: SourceStats,
    pub running: bool,
}

struct Running {
    stop: watch::Sender<bool>,
    status: watch::Receiver<PollState>,
    handle: JoinHandle<PollState>,
}

/// Owns the poll loops of all configured sources and the hooks the admin
/// bot drives them through.
pub struct Supervisor<H> {
    handler: Arc<H>,
    clients: BTreeMap<String, SourceClient>,
    store: SeenStore,
    settings: PollSettings,
    monitor: Arc<Monitor>,
    grace: Duration,
    tasks: Mutex<BTreeMap<String, Running>>,
    stop_process: watch::Sender<bool>,
}

impl<H: ArticleHandler> Supervisor<H> {
    /// Create a supervisor; nothing runs until [`Supervisor::start`].
    ///
    /// # Arguments
    ///
    /// * `handler` - Shared by every poll loop for newly found articles
    /// * `clients` - One per source, keyed by source name
    /// * `store` - Where seen sets are loaded from and flushed to
    /// * `settings` - Interval and failure policy for every loop
    /// * `monitor` - Counters reported by `/status`
    /// * `grace` - How long a stopping loop may take before it is aborted
    pub fn new(
        handler: Arc<H>,
        clients: Vec<SourceClient>,
        store: SeenStore,
        settings: PollSettings,
        monitor: Arc<Monitor>,
        grace: Duration,
    ) -> Self {
        let clients = clients
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self {
            handler,
            clients,
            store,
            settings,
            monitor,
            grace,
            tasks: Mutex::new(BTreeMap::new()),
            stop_process: watch::channel(false).0,
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    /// Load the persisted seen set; an unreadable one is logged and
    /// replaced by an empty set so the source reseeds.
    async fn load_seen(&self, source: &str) -> SeenSet {
        match self.store.load(source).await {
            Ok(seen) => seen,
            Err(e) => {
                error!(
                    %source,
                    path = %self.store.path_for(source).display(),
                    error = %e,
                    "Persisted seen set unreadable; starting empty"
                );
                SeenSet::new(self.store.capacity())
            }
        }
    }

    async fn spawn(&self, client: &SourceClient) -> Running {
        let seen = self.load_seen(client.name()).await;
        let (task, status) = PollTask::new(
            client.clone(),
            self.handler.clone(),
            self.store.clone(),
            seen,
            self.settings.clone(),
        );
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(stop_rx));
        Running {
            stop,
            status,
            handle,
        }
    }

    async fn stop(&self, source: &str, running: Running) {
        let _ = running.stop.send(true);
        let abort = running.handle.abort_handle();
        match timeout(self.grace, running.handle).await {
            Ok(Ok(state)) => info!(%source, cycles = state.cycles, "Poll loop stopped"),
            Ok(Err(e)) => error!(%source, error = %e, "Poll loop panicked"),
            Err(_) => {
                abort.abort();
                warn!(%source, grace_secs = self.grace.as_secs(), "Poll loop did not stop in time; aborted");
            }
        }
    }

    /// Spawn every source that is not already running.
    #[instrument(level = "info", skip_all)]
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        for (name, client) in &self.clients {
            if !tasks.contains_key(name) {
                let running = self.spawn(client).await;
                tasks.insert(name.clone(), running);
            }
        }
        info!(sources = tasks.len(), "Poll loops started");
    }

    /// Current poll state and counters per source, in name order.
    pub async fn status(&self) -> Vec<SourceStatus> {
        let tasks = self.tasks.lock().await;
        self.clients
            .keys()
            .map(|name| {
                let stats = self.monitor.source(name);
                match tasks.get(name) {
                    Some(running) => SourceStatus {
                        state: running.status.borrow().clone(),
                        stats,
                        running: !running.handle.is_finished(),
                    },
                    None => SourceStatus {
                        state: PollState::new(name.as_str(), &self.settings.interval),
                        stats,
                        running: false,
                    },
                }
            })
            .collect()
    }

    /// Stop a source's poll loop (which flushes its seen set) and spawn a
    /// fresh one from the persisted state.
    ///
    /// # Errors
    ///
    /// [`ControlError::UnknownSource`] when `source` is not configured.
    #[instrument(level = "info", skip(self))]
    pub async fn restart(&self, source: &str) -> Result<(), ControlError> {
        let client = self
            .clients
            .get(source)
            .ok_or_else(|| ControlError::UnknownSource(source.to_string()))?;

        let mut tasks = self.tasks.lock().await;
        if let Some(running) = tasks.remove(source) {
            self.stop(source, running).await;
        }
        let running = self.spawn(client).await;
        tasks.insert(source.to_string(), running);
        info!("Poll loop restarted");
        Ok(())
    }

    pub async fn restart_all(&self) {
        let names: Vec<String> = self.clients.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.restart(&name).await {
                error!(source = %name, error = %e, "Restart failed");
            }
        }
    }

    /// Stop all loops concurrently, each flushing its state, and abort any
    /// that outlive the grace period.
    #[instrument(level = "info", skip_all)]
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        let running = std::mem::take(&mut *tasks);
        info!(sources = running.len(), grace_secs = self.grace.as_secs(), "Shutting down poll loops");
        join_all(
            running
                .into_iter()
                .map(|(name, running)| async move { self.stop(&name, running).await }),
        )
        .await;
    }

    /// Ask the process to shut down (used by the admin `/stop` command).
    pub fn request_stop(&self) {
        self.stop_process.send_replace(true);
    }

    /// Resolves once [`Supervisor::request_stop`] has been called.
    pub async fn stop_requested(&self) {
        let mut rx = self.stop_process.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}
