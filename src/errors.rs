//! Error taxonomy for the relay.
//!
//! Every stage of the pipeline has its own error type so callers can decide
//! how to react: fetch failures are retried, extraction failures skip the
//! candidate, image failures drop the image, summarization failures are
//! retried with a fixed delay, and publish failures degrade to text-only
//! delivery. Nothing here is fatal to the process except [`ConfigError`]
//! and [`StateError`] raised during start-up.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to retrieve a page.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
}

impl FetchError {
    /// Classify a `reqwest` error for the given URL.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::HttpStatus {
                url: url.to_string(),
                status,
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Short outcome label used in structured fetch logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::HttpStatus { .. } => "http_status",
            Self::Network { .. } => "network_error",
        }
    }
}

/// Failure to pull the expected structure out of an HTML document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no {what} found in {url}")]
    NoContentFound { url: String, what: &'static str },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid link pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid source URL: {0}")]
    InvalidUrl(String),
}

/// A hero image candidate that failed the reachability/content-type check.
#[derive(Error, Debug)]
pub enum ImageValidationError {
    #[error("image {url} answered with HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("image {url} has unusable content-type {content_type:?}")]
    ContentType {
        url: String,
        content_type: Option<String>,
    },

    #[error("image {url} could not be checked: {message}")]
    Request { url: String, message: String },
}

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("summarizer request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("summarizer API error: {0}")]
    Api(String),

    #[error("summarizer returned no text")]
    Empty,

    #[error("nothing to summarize")]
    NoParagraphs,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("telegram rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

/// Failure to read or write the persisted seen set.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),
}

/// Why a single discovered article did not make it to the channel.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Summarize(#[from] SummarizeError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}
