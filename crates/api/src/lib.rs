//! inferwatch API façade.
//!
//! The stable async trait the HTTP layer and the CLI depend on, with an
//! in-process implementation over the live engine and a mock for tests.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use inferwatch_core::{CachedTopicState, MaterializedRecord, SyncError, TopicId};
use inferwatch_persist::{DbStats, HeightsPage, SqliteStore, StoredRecord, TopicStats};
use inferwatch_store::{ActiveTopicRegistry, SnapshotCache};
use inferwatch_sync::{RefreshOutcome, RefreshScheduler};
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod http;

/// API errors, serializable for transport.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApiError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Fetch { .. } | SyncError::Decode { .. } => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshReport {
    pub topic_id: TopicId,
    /// `accepted` or `skipped`.
    pub outcome: String,
    pub reason: Option<String>,
    pub workers: usize,
    pub persisted: bool,
}

impl RefreshReport {
    fn from_outcome(topic: &str, outcome: RefreshOutcome) -> Self {
        match outcome {
            RefreshOutcome::Accepted { reason, workers, persisted } => Self {
                topic_id: topic.to_string(),
                outcome: "accepted".into(),
                reason: Some(reason.as_str().to_string()),
                workers,
                persisted,
            },
            RefreshOutcome::Skipped => Self {
                topic_id: topic.to_string(),
                outcome: "skipped".into(),
                reason: None,
                workers: 0,
                persisted: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Health {
    pub scheduler_running: bool,
    pub active_topics: usize,
    pub cached_topics: usize,
    pub db: Option<DbStats>,
}

#[async_trait::async_trait]
pub trait InferenceApi: Send + Sync {
    async fn active_topics(&self) -> ApiResult<Vec<TopicId>>;

    /// Cached state of one topic; `NotFound` until its first accepted refresh.
    async fn latest_for(&self, topic: &str) -> ApiResult<CachedTopicState>;

    async fn all_latest(&self) -> ApiResult<Vec<CachedTopicState>>;

    async fn force_refresh(&self, topic: &str) -> ApiResult<RefreshReport>;

    async fn set_active_topics(&self, ids: Vec<TopicId>) -> ApiResult<Vec<TopicId>>;
    async fn add_active_topic(&self, id: &str) -> ApiResult<Vec<TopicId>>;
    async fn remove_active_topic(&self, id: &str) -> ApiResult<Vec<TopicId>>;

    /// Stored record at `height`, or the newest one when `height` is `None`.
    async fn stored_at(&self, topic: &str, height: Option<&str>) -> ApiResult<StoredRecord>;

    async fn history(&self, topic: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<MaterializedRecord>>;

    async fn block_heights(&self, topic: &str, limit: i64, offset: i64) -> ApiResult<HeightsPage>;

    async fn topic_stats(&self, topic: &str) -> ApiResult<TopicStats>;

    async fn health(&self) -> ApiResult<Health>;
}

fn require_topic(topic: &str) -> ApiResult<&str> {
    let t = topic.trim();
    if t.is_empty() {
        return Err(ApiError::Validation("topic_id is required".into()));
    }
    Ok(t)
}

// ----------------- In-process implementation -----------------

/// Calls the running engine and the SQLite store directly.
pub struct InProcApi {
    scheduler: Arc<RefreshScheduler>,
    store: Arc<SqliteStore>,
}

impl InProcApi {
    pub fn new(scheduler: Arc<RefreshScheduler>, store: Arc<SqliteStore>) -> Self {
        Self { scheduler, store }
    }

    fn map_err(e: anyhow::Error) -> ApiError {
        ApiError::Internal(format!("{:#}", e))
    }

    fn listed(&self) -> Vec<TopicId> {
        (*self.scheduler.engine().registry().list()).clone()
    }
}

#[async_trait::async_trait]
impl InferenceApi for InProcApi {
    async fn active_topics(&self) -> ApiResult<Vec<TopicId>> {
        Ok(self.listed())
    }

    async fn latest_for(&self, topic: &str) -> ApiResult<CachedTopicState> {
        let topic = require_topic(topic)?;
        self.scheduler
            .engine()
            .cache()
            .get(topic)
            .map(|s| (*s).clone())
            .ok_or_else(|| ApiError::NotFound(format!("no cached inference for topic {}", topic)))
    }

    async fn all_latest(&self) -> ApiResult<Vec<CachedTopicState>> {
        let engine = self.scheduler.engine();
        let active = engine.registry();
        Ok(engine
            .cache()
            .all()
            .into_iter()
            .filter(|(topic, _)| active.contains(topic))
            .map(|(_, s)| (*s).clone())
            .collect())
    }

    async fn force_refresh(&self, topic: &str) -> ApiResult<RefreshReport> {
        let topic = require_topic(topic)?;
        let t0 = Instant::now();
        info!(%topic, "api: force_refresh start");
        let outcome = self.scheduler.force_refresh(topic).await?;
        let report = RefreshReport::from_outcome(topic, outcome);
        info!(%topic, outcome = %report.outcome, took_ms = %t0.elapsed().as_millis(), "api: force_refresh ok");
        Ok(report)
    }

    async fn set_active_topics(&self, ids: Vec<TopicId>) -> ApiResult<Vec<TopicId>> {
        let ids: Vec<TopicId> = ids.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        info!(count = ids.len(), "api: set_active_topics");
        self.scheduler.engine().registry().set_active(ids);
        Ok(self.listed())
    }

    async fn add_active_topic(&self, id: &str) -> ApiResult<Vec<TopicId>> {
        let id = require_topic(id)?;
        info!(topic = %id, "api: add_active_topic");
        self.scheduler.engine().registry().add(id);
        Ok(self.listed())
    }

    async fn remove_active_topic(&self, id: &str) -> ApiResult<Vec<TopicId>> {
        let id = require_topic(id)?;
        info!(topic = %id, "api: remove_active_topic");
        self.scheduler.engine().registry().remove(id);
        Ok(self.listed())
    }

    async fn stored_at(&self, topic: &str, height: Option<&str>) -> ApiResult<StoredRecord> {
        let topic = require_topic(topic)?;
        let t0 = Instant::now();
        let found = match height.map(str::trim).filter(|h| !h.is_empty()) {
            Some(h) => self.store.at_height(topic, h),
            None => self.store.latest(topic),
        }
        .map_err(Self::map_err)?;
        info!(%topic, height = %height.unwrap_or("(latest)"), found = found.is_some(), took_ms = %t0.elapsed().as_millis(), "api: stored_at");
        found.ok_or_else(|| match height {
            Some(h) => ApiError::NotFound(format!("topic {} has no record at height {}", topic, h)),
            None => ApiError::NotFound(format!("topic {} has no stored records", topic)),
        })
    }

    async fn history(&self, topic: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<MaterializedRecord>> {
        let topic = require_topic(topic)?;
        if start > end {
            return Err(ApiError::Validation("start must not be after end".into()));
        }
        let t0 = Instant::now();
        let rows = self.store.range(topic, start, end).map_err(Self::map_err)?;
        info!(%topic, rows = rows.len(), took_ms = %t0.elapsed().as_millis(), "api: history ok");
        Ok(rows)
    }

    async fn block_heights(&self, topic: &str, limit: i64, offset: i64) -> ApiResult<HeightsPage> {
        let topic = require_topic(topic)?;
        self.store.heights(topic, limit, offset).map_err(Self::map_err)
    }

    async fn topic_stats(&self, topic: &str) -> ApiResult<TopicStats> {
        let topic = require_topic(topic)?;
        self.store.topic_stats(topic).map_err(Self::map_err)
    }

    async fn health(&self) -> ApiResult<Health> {
        let engine = self.scheduler.engine();
        Ok(Health {
            scheduler_running: self.scheduler.is_running(),
            active_topics: engine.registry().list().len(),
            cached_topics: engine.cache().len(),
            db: self.store.db_stats().ok(),
        })
    }
}

// ----------------- Mock implementation -----------------

/// Canned responses for frontends and HTTP tests.
#[derive(Default)]
pub struct MockApi {
    pub topics: std::sync::Mutex<Vec<TopicId>>,
    pub latest: Vec<CachedTopicState>,
    pub stored: Option<StoredRecord>,
    pub history: Vec<MaterializedRecord>,
    pub heights: Option<HeightsPage>,
    pub stats: Option<TopicStats>,
    pub refresh_error: Option<ApiError>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> Vec<TopicId> {
        self.topics.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl InferenceApi for MockApi {
    async fn active_topics(&self) -> ApiResult<Vec<TopicId>> {
        Ok(self.topics())
    }

    async fn latest_for(&self, topic: &str) -> ApiResult<CachedTopicState> {
        let topic = require_topic(topic)?;
        self.latest
            .iter()
            .find(|s| s.record.topic_id == topic)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(topic.to_string()))
    }

    async fn all_latest(&self) -> ApiResult<Vec<CachedTopicState>> {
        Ok(self.latest.clone())
    }

    async fn force_refresh(&self, topic: &str) -> ApiResult<RefreshReport> {
        let topic = require_topic(topic)?;
        if let Some(e) = &self.refresh_error {
            return Err(e.clone());
        }
        Ok(RefreshReport::from_outcome(topic, RefreshOutcome::Skipped))
    }

    async fn set_active_topics(&self, ids: Vec<TopicId>) -> ApiResult<Vec<TopicId>> {
        *self.topics.lock().unwrap_or_else(|p| p.into_inner()) = ids;
        Ok(self.topics())
    }

    async fn add_active_topic(&self, id: &str) -> ApiResult<Vec<TopicId>> {
        let id = require_topic(id)?;
        {
            let mut t = self.topics.lock().unwrap_or_else(|p| p.into_inner());
            if !t.iter().any(|x| x == id) {
                t.push(id.to_string());
            }
        }
        Ok(self.topics())
    }

    async fn remove_active_topic(&self, id: &str) -> ApiResult<Vec<TopicId>> {
        let id = require_topic(id)?;
        self.topics.lock().unwrap_or_else(|p| p.into_inner()).retain(|x| x != id);
        Ok(self.topics())
    }

    async fn stored_at(&self, topic: &str, _height: Option<&str>) -> ApiResult<StoredRecord> {
        require_topic(topic)?;
        self.stored.clone().ok_or_else(|| ApiError::NotFound(topic.to_string()))
    }

    async fn history(&self, topic: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<MaterializedRecord>> {
        require_topic(topic)?;
        if start > end {
            return Err(ApiError::Validation("start must not be after end".into()));
        }
        Ok(self.history.clone())
    }

    async fn block_heights(&self, topic: &str, _limit: i64, _offset: i64) -> ApiResult<HeightsPage> {
        require_topic(topic)?;
        self.heights.clone().ok_or_else(|| ApiError::NotFound(topic.to_string()))
    }

    async fn topic_stats(&self, topic: &str) -> ApiResult<TopicStats> {
        require_topic(topic)?;
        self.stats.clone().ok_or_else(|| ApiError::NotFound(topic.to_string()))
    }

    async fn health(&self) -> ApiResult<Health> {
        Ok(Health { active_topics: self.topics().len(), cached_topics: self.latest.len(), ..Health::default() })
    }
}
