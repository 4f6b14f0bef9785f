use thiserror::Error;

/// Errors produced by the polling pipeline.
///
/// Uniqueness violations on `(tracker_name, tag_name)` are not represented
/// here: the store routes them through the republish detector instead.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The adapter mandates a credential and none could be resolved.
    #[error("credential required to track {0}")]
    AuthRequired(String),

    /// Transport failure, non-success status or malformed payload from an
    /// upstream forge or chart index.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Bad tracker kind, missing locator field or invalid pattern,
    /// reported at create/update time.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl TrackError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<reqwest::Error> for TrackError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for TrackError {
    fn from(err: reqwest_middleware::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}
