#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inferwatch_core::{
    ConfidenceLadder, DurableStore, FetchError, LeaderboardEntry, LeaderboardPage, MaterializedRecord,
    NetworkClient, RawSnapshot, WorkerValue, WorkerWeight,
};
use inferwatch_store::{LockedCache, SwapRegistry};
use inferwatch_sync::{SyncConfig, TopicSync};

pub fn snapshot(topic: &str, height: &str, loss: &str) -> RawSnapshot {
    RawSnapshot {
        topic_id: topic.into(),
        inference_block_height: height.into(),
        loss_block_height: loss.into(),
        combined_value: "15".into(),
        inferer_values: vec![
            WorkerValue { worker: "A".into(), value: "12".into() },
            WorkerValue { worker: "B".into(), value: "25".into() },
        ],
        one_out_inferer_values: vec![WorkerValue { worker: "C".into(), value: "14".into() }],
        inferer_weights: vec![WorkerWeight { worker: "A".into(), weight: "0.9".into() }],
        ladder: ConfidenceLadder {
            values: vec!["10".into(), "20".into(), "30".into()],
            percentiles: vec!["10".into(), "50".into(), "90".into()],
        },
        ..RawSnapshot::default()
    }
}

/// Snapshot whose workers all carry the generation number as their value.
pub fn generation_snapshot(topic: &str, g: u64) -> RawSnapshot {
    RawSnapshot {
        topic_id: topic.into(),
        inference_block_height: g.to_string(),
        loss_block_height: "0".into(),
        inferer_values: (0..8).map(|i| WorkerValue { worker: format!("w{}", i), value: g.to_string() }).collect(),
        ladder: ConfidenceLadder { values: vec!["0".into()], percentiles: vec!["50".into()] },
        ..RawSnapshot::default()
    }
}

pub fn entry(addr: &str, rank: &str) -> LeaderboardEntry {
    LeaderboardEntry { cosmos_address: addr.into(), rank: rank.into(), ..LeaderboardEntry::default() }
}

#[derive(Default)]
pub struct FakeNet {
    pub snapshots: Mutex<HashMap<String, RawSnapshot>>,
    pub failing: Mutex<HashSet<String>>,
    pub garbled: Mutex<HashSet<String>>,
    /// Leaderboard responses keyed by the continuation token (`None` = first page).
    pub pages: Mutex<HashMap<Option<String>, Result<LeaderboardPage, FetchError>>>,
    pub block_time: Mutex<Option<String>>,
    /// When set, every snapshot fetch returns the next generation.
    pub generations: AtomicBool,
    pub generation: AtomicU64,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub snapshot_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
}

impl FakeNet {
    pub fn with(topics: &[(&str, RawSnapshot)]) -> Arc<Self> {
        let net = FakeNet::default();
        {
            let mut m = net.snapshots.lock().unwrap();
            for (t, s) in topics {
                m.insert(t.to_string(), s.clone());
            }
        }
        *net.block_time.lock().unwrap() = Some("2025-02-01T10:00:00Z".into());
        Arc::new(net)
    }

    pub fn set_snapshot(&self, topic: &str, s: RawSnapshot) {
        self.snapshots.lock().unwrap().insert(topic.to_string(), s);
    }

    pub fn set_page(&self, token: Option<&str>, page: Result<LeaderboardPage, FetchError>) {
        self.pages.lock().unwrap().insert(token.map(str::to_string), page);
    }

    pub fn calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NetworkClient for FakeNet {
    async fn fetch_raw_snapshot(&self, topic: &str) -> Result<RawSnapshot, FetchError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if self.generations.load(Ordering::SeqCst) {
            let g = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            return Ok(generation_snapshot(topic, g));
        }
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.lock().unwrap().contains(topic) {
            return Err(FetchError::Status { url: format!("fake://{}", topic), status: 503 });
        }
        if self.garbled.lock().unwrap().contains(topic) {
            return Err(FetchError::Decode { url: format!("fake://{}", topic), reason: "eof".into() });
        }
        self.snapshots
            .lock()
            .unwrap()
            .get(topic)
            .cloned()
            .ok_or_else(|| FetchError::Status { url: format!("fake://{}", topic), status: 404 })
    }

    async fn fetch_block_time(&self, height: &str) -> Result<String, FetchError> {
        self.block_time
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FetchError::Missing(format!("no block {}", height)))
    }

    async fn fetch_leaderboard_page(
        &self,
        _competition_id: &str,
        page_token: Option<&str>,
    ) -> Result<LeaderboardPage, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .get(&page_token.map(str::to_string))
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Missing("no such page".into())))
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub saved: Mutex<Vec<MaterializedRecord>>,
    pub fail_save: AtomicBool,
    pub competition: Mutex<Option<String>>,
    pub fail_resolve: AtomicBool,
}

impl DurableStore for FakeStore {
    fn save_topic_snapshot(&self, record: &MaterializedRecord) -> anyhow::Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.saved.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn resolve_competition_id(&self, _topic: &str) -> anyhow::Result<Option<String>> {
        if self.fail_resolve.load(Ordering::SeqCst) {
            anyhow::bail!("db locked");
        }
        Ok(self.competition.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub net: Arc<FakeNet>,
    pub store: Arc<FakeStore>,
    pub cache: Arc<LockedCache>,
    pub registry: Arc<SwapRegistry>,
    pub engine: Arc<TopicSync>,
}

pub fn harness(net: Arc<FakeNet>, active: &[&str], cfg: SyncConfig) -> Harness {
    let store = Arc::new(FakeStore::default());
    let cache = Arc::new(LockedCache::new());
    let registry = Arc::new(SwapRegistry::with_topics(active.iter().map(|s| s.to_string()).collect()));
    let engine = Arc::new(TopicSync::new(
        net.clone(),
        store.clone(),
        cache.clone(),
        registry.clone(),
        cfg,
    ));
    Harness { net, store, cache, registry, engine }
}
