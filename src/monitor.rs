//! Process-wide activity counters and structured fetch logging.
//!
//! The [`Monitor`] is the only state shared between source poll loops. It
//! is append-only: tasks record what happened, the control surface reads
//! a snapshot. Every record is also emitted as a `tracing` event on the
//! `monitor` target so log collectors can follow individual attempts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Result of a single HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { status: u16, bytes: usize },
    Failure { kind: &'static str, error: String },
}

/// One fetch attempt as reported by the fetcher.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub source: String,
    pub url: String,
    pub attempt: u32,
    pub duration: Duration,
    pub outcome: AttemptOutcome,
    pub next_retry: Option<Duration>,
}

/// Per-source counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub fetch_ok: u64,
    pub fetch_failed: u64,
    pub new_articles: u64,
    pub summaries: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Monitor {
    sources: Mutex<BTreeMap<String, SourceStats>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, source: &str, f: impl FnOnce(&mut SourceStats)) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let stats = sources.entry(source.to_string()).or_default();
        f(stats);
        stats.last_activity = Some(Utc::now());
    }

    /// Record a fetch attempt and log it.
    pub fn record_fetch(&self, attempt: &FetchAttempt) {
        let duration_ms = attempt.duration.as_millis() as u64;
        match &attempt.outcome {
            AttemptOutcome::Success { status, bytes } => {
                info!(
                    target: "monitor",
                    source = %attempt.source,
                    url = %attempt.url,
                    attempt = attempt.attempt,
                    duration_ms,
                    status,
                    bytes,
                    outcome = "success",
                    "Fetch attempt succeeded"
                );
                self.update(&attempt.source, |s| s.fetch_ok += 1);
            }
            AttemptOutcome::Failure { kind, error } => {
                warn!(
                    target: "monitor",
                    source = %attempt.source,
                    url = %attempt.url,
                    attempt = attempt.attempt,
                    duration_ms,
                    outcome = %kind,
                    error = %error,
                    next_retry = ?attempt.next_retry,
                    "Fetch attempt failed"
                );
                self.update(&attempt.source, |s| s.fetch_failed += 1);
            }
        }
    }

    pub fn record_new_articles(&self, source: &str, count: usize) {
        self.update(source, |s| s.new_articles += count as u64);
    }

    pub fn record_summary(&self, source: &str) {
        self.update(source, |s| s.summaries += 1);
    }

    pub fn record_publish(&self, source: &str, url: &str, ok: bool) {
        if ok {
            info!(target: "articles", %source, %url, "Published article");
        }
        self.update(source, |s| {
            if ok {
                s.published += 1;
            } else {
                s.publish_failures += 1;
            }
        });
    }

    pub fn source(&self, source: &str) -> SourceStats {
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.get(source).cloned().unwrap_or_default()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(outcome: AttemptOutcome) -> FetchAttempt {
        FetchAttempt {
            source: "propublica".to_string(),
            url: "https://example.com".to_string(),
            attempt: 1,
            duration: Duration::from_millis(12),
            outcome,
            next_retry: None,
        }
    }

    #[test]
    fn test_counts_per_source() {
        let monitor = Monitor::new();
        monitor.record_fetch(&attempt(AttemptOutcome::Success {
            status: 200,
            bytes: 10,
        }));
        monitor.record_fetch(&attempt(AttemptOutcome::Failure {
            kind: "http_status",
            error: "HTTP 500".to_string(),
        }));
        monitor.record_new_articles("propublica", 2);
        monitor.record_publish("propublica", "https://example.com/a", true);
        monitor.record_publish("truthout", "https://example.com/b", false);

        let pp = monitor.source("propublica");
        assert_eq!(pp.fetch_ok, 1);
        assert_eq!(pp.fetch_failed, 1);
        assert_eq!(pp.new_articles, 2);
        assert_eq!(pp.published, 1);
        assert!(pp.last_activity.is_some());

        assert_eq!(monitor.source("truthout").publish_failures, 1);
    }

    #[test]
    fn test_unknown_source_is_empty() {
        let monitor = Monitor::new();
        assert_eq!(monitor.source("nope"), SourceStats::default());
    }
}
