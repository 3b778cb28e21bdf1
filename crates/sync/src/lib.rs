//! inferwatch sync: the single-topic refresh pipeline, the periodic refresh
//! scheduler and the competition monitor that feeds the active topic set.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use inferwatch_core::band::annotate_bands;
use inferwatch_core::change::{should_accept, AcceptReason, Decision};
use inferwatch_core::merge::{leaderboard_from_entries, merge_workers};
use inferwatch_core::{
    CachedTopicState, DurableStore, Leaderboard, LeaderboardEntry, MaterializedRecord, NetworkClient, SyncError,
    TopicId,
};
use inferwatch_store::{ActiveTopicRegistry, SnapshotCache};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod monitor;
pub mod scheduler;

pub use monitor::{CompetitionMonitor, MonitorConfig};
pub use scheduler::RefreshScheduler;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub topic_interval: Duration,
    /// Upper bound on leaderboard pages fetched per refresh.
    pub leaderboard_page_cap: usize,
    /// Serialize concurrent refreshes of the same topic.
    pub serialize_topic_refreshes: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { topic_interval: Duration::from_secs(60), leaderboard_page_cap: 100, serialize_topic_refreshes: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Accepted { reason: AcceptReason, workers: usize, persisted: bool },
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PassSummary {
    pub topics: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub took_ms: u64,
}

/// Label for `refresh_topic_total`: `accepted`, `skipped` or the error kind.
pub fn outcome_label(result: &Result<RefreshOutcome, SyncError>) -> &'static str {
    match result {
        Ok(RefreshOutcome::Accepted { .. }) => "accepted",
        Ok(RefreshOutcome::Skipped) => "skipped",
        Err(e) => e.kind(),
    }
}

/// Shared state and collaborators of the refresh pipeline.
pub struct TopicSync {
    net: Arc<dyn NetworkClient>,
    durable: Arc<dyn DurableStore>,
    cache: Arc<dyn SnapshotCache>,
    registry: Arc<dyn ActiveTopicRegistry>,
    cfg: SyncConfig,
    topic_locks: Mutex<FxHashMap<TopicId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TopicSync {
    pub fn new(
        net: Arc<dyn NetworkClient>,
        durable: Arc<dyn DurableStore>,
        cache: Arc<dyn SnapshotCache>,
        registry: Arc<dyn ActiveTopicRegistry>,
        cfg: SyncConfig,
    ) -> Self {
        Self { net, durable, cache, registry, cfg, topic_locks: Mutex::new(FxHashMap::default()) }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &Arc<dyn SnapshotCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<dyn ActiveTopicRegistry> {
        &self.registry
    }

    fn topic_lock(&self, topic: &str) -> Option<Arc<tokio::sync::Mutex<()>>> {
        if !self.cfg.serialize_topic_refreshes {
            return None;
        }
        let mut locks = self.topic_locks.lock().unwrap_or_else(|p| p.into_inner());
        Some(Arc::clone(locks.entry(topic.to_string()).or_default()))
    }

    /// Drop the map entry once no other refresh holds or waits on it.
    fn release_topic_lock(&self, topic: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.topic_locks.lock().unwrap_or_else(|p| p.into_inner());
        let idle = locks.get(topic).is_some_and(|l| Arc::ptr_eq(l, &lock)) && Arc::strong_count(&lock) == 2;
        if idle {
            locks.remove(topic);
        }
    }

    /// Number of topics with a live refresh lock.
    pub fn topic_lock_count(&self) -> usize {
        self.topic_locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Fetch, compare, merge and publish one topic.
    pub async fn refresh_topic(&self, topic: &str) -> Result<RefreshOutcome, SyncError> {
        let result = match self.topic_lock(topic) {
            Some(lock) => {
                let result = {
                    let _guard = lock.lock().await;
                    self.refresh_locked(topic).await
                };
                self.release_topic_lock(topic, lock);
                result
            }
            None => self.refresh_locked(topic).await,
        };
        counter!("refresh_topic_total", 1u64, "outcome" => outcome_label(&result));
        result
    }

    async fn refresh_locked(&self, topic: &str) -> Result<RefreshOutcome, SyncError> {
        let snapshot = self.net.fetch_raw_snapshot(topic).await.map_err(|e| SyncError::from_fetch(topic, e))?;

        let cached = self.cache.get(topic);
        let reason = match should_accept(cached.as_deref(), &snapshot) {
            Decision::Skip => {
                debug!(%topic, height = %snapshot.inference_block_height, "sync: unchanged");
                return Ok(RefreshOutcome::Skipped);
            }
            Decision::Accept(r) => r,
        };

        let leaderboard = self.gather_leaderboard(topic).await;
        let timestamp = self.block_timestamp(topic, &snapshot.inference_block_height).await;

        let mut workers = merge_workers(&snapshot, leaderboard.as_ref());
        if let Err(e) = annotate_bands(&mut workers, &snapshot.ladder) {
            debug!(%topic, error = %e, "sync: bands fell back to default");
        }
        let n_workers = workers.len();
        let record = MaterializedRecord::from_parts(&snapshot, workers, timestamp);

        let state = Arc::new(CachedTopicState { record, accepted_at: Utc::now() });
        self.cache.replace(topic, Arc::clone(&state));
        info!(
            %topic,
            reason = reason.as_str(),
            height = %state.record.inference_block_height,
            loss_height = %state.record.loss_block_height,
            workers = n_workers,
            "sync: accepted"
        );

        let persisted = match self.durable.save_topic_snapshot(&state.record) {
            Ok(()) => true,
            Err(e) => {
                let err = SyncError::Persist { topic: topic.to_string(), reason: format!("{:#}", e) };
                warn!(%topic, error = %err, "sync: persist failed; cache kept");
                false
            }
        };
        Ok(RefreshOutcome::Accepted { reason, workers: n_workers, persisted })
    }

    /// Collect all leaderboard pages for the topic's competition. Any lookup or
    /// fetch failure just ends enrichment with what was gathered.
    async fn gather_leaderboard(&self, topic: &str) -> Option<Leaderboard> {
        let competition = match self.durable.resolve_competition_id(topic) {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                warn!(%topic, error = %e, "sync: competition lookup failed");
                return None;
            }
        };
        let mut entries: Vec<LeaderboardEntry> = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        while pages < self.cfg.leaderboard_page_cap {
            let page = match self.net.fetch_leaderboard_page(&competition, token.as_deref()).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(%topic, %competition, page = pages, error = %e, "sync: leaderboard page failed");
                    break;
                }
            };
            pages += 1;
            if !page.ok || page.entries.is_empty() {
                break;
            }
            entries.extend(page.entries);
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
            if pages == self.cfg.leaderboard_page_cap {
                warn!(%topic, %competition, cap = pages, "sync: leaderboard page cap reached");
            }
        }
        debug!(%topic, %competition, pages, entries = entries.len(), "sync: leaderboard gathered");
        Some(leaderboard_from_entries(entries))
    }

    async fn block_timestamp(&self, topic: &str, height: &str) -> String {
        if !height.is_empty() {
            match self.net.fetch_block_time(height).await {
                Ok(t) => return t,
                Err(e) => warn!(%topic, %height, error = %e, "sync: block time unavailable; using local clock"),
            }
        }
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// One sequential pass over a snapshot of the active set.
    pub async fn refresh_all(&self) -> PassSummary {
        let started = Instant::now();
        let topics = self.registry.list();
        let mut summary = PassSummary { topics: topics.len(), ..PassSummary::default() };
        for topic in topics.iter() {
            match self.refresh_topic(topic).await {
                Ok(RefreshOutcome::Accepted { .. }) => summary.accepted += 1,
                Ok(RefreshOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(%topic, kind = e.kind(), error = %e, "sync: refresh failed");
                }
            }
        }
        summary.took_ms = started.elapsed().as_millis() as u64;
        histogram!("refresh_pass_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            topics = summary.topics,
            accepted = summary.accepted,
            skipped = summary.skipped,
            failed = summary.failed,
            took_ms = summary.took_ms,
            "sync: pass complete"
        );
        summary
    }
}
