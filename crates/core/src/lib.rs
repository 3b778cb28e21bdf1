//! inferwatch core: topic snapshot types, the pure merge/band/change rules,
//! and the collaborator traits the sync engine is wired against.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod band;
pub mod change;
pub mod competition;
pub mod error;
pub mod merge;

pub use competition::{Competition, CompetitionListing};
pub use error::{FetchError, SyncError};

/// Opaque topic handle as published by the network (e.g. `"13"`).
pub type TopicId = String;

/// Leaderboard rows keyed by cosmos address.
pub type Leaderboard = HashMap<String, LeaderboardEntry>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkerValue {
    pub worker: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkerWeight {
    pub worker: String,
    pub weight: String,
}

/// Paired ascending reference values and their percentile labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConfidenceLadder {
    pub values: Vec<String>,
    pub percentiles: Vec<String>,
}

/// One fetch of a topic's latest network inferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RawSnapshot {
    pub topic_id: TopicId,
    pub inference_block_height: String,
    pub loss_block_height: String,
    pub reputer: String,
    pub reputer_nonce_height: Option<String>,
    pub combined_value: String,
    pub naive_value: String,
    pub inferer_values: Vec<WorkerValue>,
    pub one_out_inferer_values: Vec<WorkerValue>,
    pub inferer_weights: Vec<WorkerWeight>,
    pub forecaster_values: Vec<WorkerValue>,
    pub one_out_forecaster_values: Vec<WorkerValue>,
    pub one_in_forecaster_values: Vec<WorkerValue>,
    pub ladder: ConfidenceLadder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LeaderboardEntry {
    pub rank: String,
    pub cosmos_address: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub points: f64,
    pub score: f64,
    pub loss: f64,
    pub is_active: bool,
}

/// One page of a competition leaderboard.
#[derive(Debug, Clone, Default)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    /// Continuation token for the next page; `None` when exhausted.
    pub next_token: Option<String>,
    /// Upstream status flag; a page with `ok == false` carries no usable rows.
    pub ok: bool,
}

/// Per-worker view combining the sparse source lists of a snapshot.
///
/// Serialized field names follow the wire format consumed by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkerRecord {
    pub worker: String,
    #[serde(rename = "inferer_values", default, skip_serializing_if = "Option::is_none")]
    pub inferer_value: Option<String>,
    #[serde(rename = "one_out_inferer_values", default, skip_serializing_if = "Option::is_none")]
    pub one_out_inferer_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard: Option<LeaderboardEntry>,
    /// Band label: a single percentile or a `"low~high"` range.
    #[serde(rename = "confidential_percentiles", default, skip_serializing_if = "Option::is_none")]
    pub band: Option<String>,
    /// Nearest single percentile label.
    #[serde(rename = "confidence_interval_raw_percentiles", default, skip_serializing_if = "Option::is_none")]
    pub nearest_percentile: Option<String>,
}

impl WorkerRecord {
    pub fn new(worker: impl Into<String>) -> Self {
        Self { worker: worker.into(), ..Self::default() }
    }
}

/// Merged, band-annotated snapshot as cached and persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MaterializedRecord {
    pub topic_id: TopicId,
    /// Block time of the inference height (RFC 3339).
    pub timestamp: String,
    pub inference_block_height: String,
    pub loss_block_height: String,
    pub reputer: String,
    pub reputer_nonce_height: Option<String>,
    pub combined_value: String,
    pub naive_value: String,
    pub forecaster_values: Vec<WorkerValue>,
    pub one_out_forecaster_values: Vec<WorkerValue>,
    pub one_in_forecaster_values: Vec<WorkerValue>,
    pub workers: Vec<WorkerRecord>,
    pub confidence_interval_values: Vec<String>,
    pub confidence_interval_raw_percentiles: Vec<String>,
}

impl MaterializedRecord {
    /// Assemble a record from a snapshot and its already merged workers.
    pub fn from_parts(snapshot: &RawSnapshot, workers: Vec<WorkerRecord>, timestamp: String) -> Self {
        Self {
            topic_id: snapshot.topic_id.clone(),
            timestamp,
            inference_block_height: snapshot.inference_block_height.clone(),
            loss_block_height: snapshot.loss_block_height.clone(),
            reputer: snapshot.reputer.clone(),
            reputer_nonce_height: snapshot.reputer_nonce_height.clone(),
            combined_value: snapshot.combined_value.clone(),
            naive_value: snapshot.naive_value.clone(),
            forecaster_values: snapshot.forecaster_values.clone(),
            one_out_forecaster_values: snapshot.one_out_forecaster_values.clone(),
            one_in_forecaster_values: snapshot.one_in_forecaster_values.clone(),
            workers,
            confidence_interval_values: snapshot.ladder.values.clone(),
            confidence_interval_raw_percentiles: snapshot.ladder.percentiles.clone(),
        }
    }
}

/// Last accepted record for a topic plus the local time it was accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedTopicState {
    pub record: MaterializedRecord,
    pub accepted_at: DateTime<Utc>,
}

pub mod prelude {
    pub use super::{
        CachedTopicState, ConfidenceLadder, LeaderboardEntry, LeaderboardPage, MaterializedRecord,
        RawSnapshot, TopicId, WorkerRecord, WorkerValue, WorkerWeight,
    };
    pub use super::{CompetitionFeed, CompetitionStore, DurableStore, NetworkClient};
    pub use super::error::{FetchError, SyncError};
}

// ---- collaborator seams ----

/// Remote network access used by the refresh pipeline.
#[async_trait::async_trait]
pub trait NetworkClient: Send + Sync {
    async fn fetch_raw_snapshot(&self, topic: &str) -> Result<RawSnapshot, FetchError>;

    /// Resolve a block height to its header time (RFC 3339).
    async fn fetch_block_time(&self, height: &str) -> Result<String, FetchError>;

    /// Fetch one leaderboard page; `page_token` is `None` for the first page.
    async fn fetch_leaderboard_page(
        &self,
        competition_id: &str,
        page_token: Option<&str>,
    ) -> Result<LeaderboardPage, FetchError>;
}

/// Source of the competition listing that drives topic discovery.
#[async_trait::async_trait]
pub trait CompetitionFeed: Send + Sync {
    async fn fetch_competitions(&self) -> Result<CompetitionListing, FetchError>;
}

/// Durable history sink. Synchronous: implementations are local and cheap.
pub trait DurableStore: Send + Sync {
    fn save_topic_snapshot(&self, record: &MaterializedRecord) -> anyhow::Result<()>;

    /// Competition id currently associated with a topic, if any.
    fn resolve_competition_id(&self, topic: &str) -> anyhow::Result<Option<String>>;
}

pub trait CompetitionStore: Send + Sync {
    fn save_competitions(&self, listing: &CompetitionListing) -> anyhow::Result<()>;

    /// Delete history older than `cutoff`; returns the number of rows removed.
    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_record_serializes_wire_names_and_skips_absent_fields() {
        let mut w = WorkerRecord::new("allo1a");
        w.inferer_value = Some("1.5".into());
        w.band = Some("10~50".into());
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["worker"], "allo1a");
        assert_eq!(v["inferer_values"], "1.5");
        assert_eq!(v["confidential_percentiles"], "10~50");
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("weight"));
        assert!(!obj.contains_key("leaderboard"));
        assert!(!obj.contains_key("one_out_inferer_values"));
    }

    #[test]
    fn from_parts_copies_heights_and_ladder() {
        let snap = RawSnapshot {
            topic_id: "7".into(),
            inference_block_height: "100".into(),
            loss_block_height: "90".into(),
            ladder: ConfidenceLadder { values: vec!["1".into()], percentiles: vec!["50".into()] },
            ..RawSnapshot::default()
        };
        let rec = MaterializedRecord::from_parts(&snap, vec![WorkerRecord::new("w")], "2024-01-01T00:00:00Z".into());
        assert_eq!(rec.topic_id, "7");
        assert_eq!(rec.inference_block_height, "100");
        assert_eq!(rec.loss_block_height, "90");
        assert_eq!(rec.confidence_interval_values, vec!["1".to_string()]);
        assert_eq!(rec.workers.len(), 1);
    }
}
