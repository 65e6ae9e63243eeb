//! YAML tuning file.
//!
//! Every field has a default, so a missing file, an empty file, and a file
//! that sets a single value are all valid. Durations are whole seconds.
//!
//! ```yaml
//! poll:
//!   min_interval_secs: 180
//!   max_interval_secs: 900
//! fetch:
//!   timeout_secs: 45
//! summarizer:
//!   model: gemini-2.0-flash
//! pipeline:
//!   failure_policy: retry_next_cycle
//!   max_article_attempts: 3
//! ```

use crate::errors::ConfigError;
use crate::poller::{FailurePolicy, IntervalSettings, PollSettings};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub initial_interval_secs: u64,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub hit_step_secs: u64,
    pub idle_step_secs: u64,
    pub wide_step_secs: u64,
    pub widen_after: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 15 * 60,
            min_interval_secs: 3 * 60,
            max_interval_secs: 15 * 60,
            hit_step_secs: 60,
            idle_step_secs: 60,
            wide_step_secs: 2 * 60,
            widen_after: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_attempts: u32,
    pub long_retry_secs: u64,
    /// Attempts for article pages and fallback listing pages.
    pub article_attempts: u32,
    pub image_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: crate::fetcher::DEFAULT_TIMEOUT.as_secs(),
            backoff_base_secs: 2,
            backoff_attempts: 3,
            long_retry_secs: 10 * 60,
            article_attempts: 3,
            image_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummarizerConfig {
    pub model: String,
    pub endpoint: String,
    pub retry_delay_secs: u64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: crate::api::DEFAULT_MODEL.to_string(),
            endpoint: crate::api::DEFAULT_ENDPOINT.to_string(),
            retry_delay_secs: crate::api::DEFAULT_RETRY_DELAY.as_secs(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub seen_capacity: usize,
    pub failure_policy: FailurePolicy,
    pub max_article_attempts: u32,
    pub announce_latest_on_startup: bool,
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seen_capacity: crate::state::DEFAULT_SEEN_CAPACITY,
            failure_policy: FailurePolicy::default(),
            max_article_attempts: 3,
            announce_latest_on_startup: false,
            shutdown_grace_secs: crate::control::DEFAULT_SHUTDOWN_GRACE.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll: PollConfig,
    pub fetch: FetchConfig,
    pub summarizer: SummarizerConfig,
    pub pipeline: PipelineConfig,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl Settings {
    /// Parse and validate a YAML document. An empty document yields the
    /// defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = if yaml.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`, or use the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Settings::default());
        };
        let yaml = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.poll;
        if p.min_interval_secs == 0 {
            return Err(invalid("poll.min_interval_secs", "must be greater than zero"));
        }
        if p.min_interval_secs > p.max_interval_secs {
            return Err(invalid(
                "poll.min_interval_secs",
                format!(
                    "{} exceeds poll.max_interval_secs ({})",
                    p.min_interval_secs, p.max_interval_secs
                ),
            ));
        }
        if !(p.min_interval_secs..=p.max_interval_secs).contains(&p.initial_interval_secs) {
            return Err(invalid(
                "poll.initial_interval_secs",
                "must lie between poll.min_interval_secs and poll.max_interval_secs",
            ));
        }
        if p.widen_after == 0 {
            return Err(invalid("poll.widen_after", "must be at least 1"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(invalid("fetch.timeout_secs", "must be greater than zero"));
        }
        if self.fetch.image_timeout_secs == 0 {
            return Err(invalid("fetch.image_timeout_secs", "must be greater than zero"));
        }
        if self.fetch.article_attempts == 0 {
            return Err(invalid("fetch.article_attempts", "must be at least 1"));
        }
        if self.summarizer.model.trim().is_empty() {
            return Err(invalid("summarizer.model", "must not be empty"));
        }
        if url::Url::parse(&self.summarizer.endpoint).is_err() {
            return Err(invalid("summarizer.endpoint", "must be an absolute URL"));
        }
        if self.summarizer.max_attempts == Some(0) {
            return Err(invalid("summarizer.max_attempts", "must be at least 1 when set"));
        }
        if self.pipeline.seen_capacity == 0 {
            return Err(invalid("pipeline.seen_capacity", "must be greater than zero"));
        }
        if self.pipeline.max_article_attempts == 0 {
            return Err(invalid("pipeline.max_article_attempts", "must be at least 1"));
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        let p = &self.poll;
        PollSettings {
            interval: IntervalSettings {
                initial: Duration::from_secs(p.initial_interval_secs),
                min: Duration::from_secs(p.min_interval_secs),
                max: Duration::from_secs(p.max_interval_secs),
                hit_step: Duration::from_secs(p.hit_step_secs),
                idle_step: Duration::from_secs(p.idle_step_secs),
                wide_step: Duration::from_secs(p.wide_step_secs),
                widen_after: p.widen_after,
            },
            failure_policy: self.pipeline.failure_policy,
            max_article_attempts: self.pipeline.max_article_attempts,
            announce_latest_on_startup: self.pipeline.announce_latest_on_startup,
        }
    }

    /// Policy for the last listing page: backoff, then long retries forever.
    pub fn listing_policy(&self) -> RetryPolicy {
        let f = &self.fetch;
        RetryPolicy {
            base_delay: Duration::from_secs(f.backoff_base_secs),
            backoff_attempts: f.backoff_attempts,
            long_delay: Duration::from_secs(f.long_retry_secs),
            ..RetryPolicy::background()
        }
    }

    /// Policy for article pages and fallback listing pages.
    pub fn article_policy(&self) -> RetryPolicy {
        self.listing_policy()
            .with_max_attempts(Some(self.fetch.article_attempts))
    }

    pub fn summarizer_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_secs(self.summarizer.retry_delay_secs),
            self.summarizer.max_attempts,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.image_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.pipeline.shutdown_grace_secs)
    }
}
