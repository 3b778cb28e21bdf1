//! Error taxonomy shared by the sync engine and its collaborators.

use crate::TopicId;

/// Failure talking to a remote endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("decoding response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("{0}")]
    Missing(String),
}

impl FetchError {
    /// Malformed payload as opposed to an unreachable or failing endpoint.
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode { .. } | FetchError::Missing(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetch failed for topic {topic}: {source}")]
    Fetch { topic: TopicId, source: FetchError },
    #[error("malformed payload for topic {topic}: {source}")]
    Decode { topic: TopicId, source: FetchError },
    #[error("persisting topic {topic} failed: {reason}")]
    Persist { topic: TopicId, reason: String },
    #[error("invalid confidence ladder: {0}")]
    InvalidLadder(String),
    #[error("refresh scheduler is already running")]
    AlreadyRunning,
    #[error("refresh scheduler is not running")]
    NotRunning,
}

impl SyncError {
    /// Classify a topic-scoped fetch failure.
    pub fn from_fetch(topic: &str, source: FetchError) -> Self {
        if source.is_decode() {
            SyncError::Decode { topic: topic.to_string(), source }
        } else {
            SyncError::Fetch { topic: topic.to_string(), source }
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Fetch { .. } => "fetch",
            SyncError::Decode { .. } => "decode",
            SyncError::Persist { .. } => "persist",
            SyncError::InvalidLadder(_) => "invalid_ladder",
            SyncError::AlreadyRunning => "already_running",
            SyncError::NotRunning => "not_running",
        }
    }
}
