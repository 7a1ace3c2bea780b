use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the rules engine.
///
/// Rule evaluation itself never fails: malformed rules, consequences, and tokens are logged and
/// skipped. Errors are only returned while loading rules.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The rules document could not be parsed at all (invalid JSON or missing `rules` array).
    #[error("error parsing rules document")]
    RulesParse(#[source] Arc<serde_json::Error>),

    /// Invalid rules URL configuration.
    #[error("invalid rules url")]
    InvalidUrl(#[source] url::ParseError),

    /// The rules endpoint rejected our request.
    #[error("unauthorized to fetch rules")]
    Unauthorized,

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    /// An I/O error.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::RulesParse(Arc::new(value))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
