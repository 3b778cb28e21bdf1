//! inferwatch store: the shared in-RAM state read by request handlers and
//! written by the refresh loop.

#![forbid(unsafe_code)]

use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use inferwatch_core::{CachedTopicState, TopicId};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Set of topics eligible for polling.
pub trait ActiveTopicRegistry: Send + Sync {
    /// Replace the whole set; duplicates collapse keeping first occurrence.
    fn set_active(&self, ids: Vec<TopicId>);
    fn add(&self, id: &str);
    fn remove(&self, id: &str);
    /// Immutable snapshot, safe to iterate while writers proceed.
    fn list(&self) -> Arc<Vec<TopicId>>;

    fn contains(&self, id: &str) -> bool {
        self.list().iter().any(|t| t == id)
    }
}

/// Registry publishing its set as an `Arc<Vec<_>>` through `ArcSwap`.
pub struct SwapRegistry {
    topics: ArcSwap<Vec<TopicId>>,
}

impl SwapRegistry {
    pub fn new() -> Self {
        Self { topics: ArcSwap::from_pointee(Vec::new()) }
    }

    pub fn with_topics(ids: Vec<TopicId>) -> Self {
        let r = Self::new();
        r.set_active(ids);
        r
    }

    fn publish_gauge(len: usize) {
        metrics::gauge!("active_topics", len as f64);
    }
}

impl Default for SwapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn dedup_in_order(ids: Vec<TopicId>) -> Vec<TopicId> {
    let mut out: Vec<TopicId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

impl ActiveTopicRegistry for SwapRegistry {
    fn set_active(&self, ids: Vec<TopicId>) {
        let next = dedup_in_order(ids);
        let len = next.len();
        self.topics.store(Arc::new(next));
        debug!(topics = len, "registry: replaced active set");
        Self::publish_gauge(len);
    }

    fn add(&self, id: &str) {
        let prev = self.topics.rcu(|cur| {
            if cur.iter().any(|t| t == id) {
                Arc::clone(cur)
            } else {
                let mut next = Vec::with_capacity(cur.len() + 1);
                next.extend(cur.iter().cloned());
                next.push(id.to_string());
                Arc::new(next)
            }
        });
        if !prev.iter().any(|t| t == id) {
            debug!(topic = %id, "registry: added");
            Self::publish_gauge(prev.len() + 1);
        }
    }

    fn remove(&self, id: &str) {
        let prev = self.topics.rcu(|cur| {
            if cur.iter().any(|t| t == id) {
                Arc::new(cur.iter().filter(|t| *t != id).cloned().collect::<Vec<_>>())
            } else {
                Arc::clone(cur)
            }
        });
        if prev.iter().any(|t| t == id) {
            debug!(topic = %id, "registry: removed");
            Self::publish_gauge(prev.len() - 1);
        }
    }

    fn list(&self) -> Arc<Vec<TopicId>> {
        self.topics.load_full()
    }
}

/// Latest accepted state per topic.
pub trait SnapshotCache: Send + Sync {
    fn get(&self, topic: &str) -> Option<Arc<CachedTopicState>>;

    /// Swap in a whole new entry for `topic`, returning the one replaced.
    fn replace(&self, topic: &str, state: Arc<CachedTopicState>) -> Option<Arc<CachedTopicState>>;

    /// Every entry, ordered by topic id.
    fn all(&self) -> Vec<(TopicId, Arc<CachedTopicState>)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `RwLock`-guarded map of whole `Arc` entries. The write lock is held only
/// for the pointer swap, never across I/O.
#[derive(Default)]
pub struct LockedCache {
    entries: RwLock<FxHashMap<TopicId, Arc<CachedTopicState>>>,
}

impl LockedCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotCache for LockedCache {
    fn get(&self, topic: &str) -> Option<Arc<CachedTopicState>> {
        let map = self.entries.read().unwrap_or_else(|p| p.into_inner());
        map.get(topic).cloned()
    }

    fn replace(&self, topic: &str, state: Arc<CachedTopicState>) -> Option<Arc<CachedTopicState>> {
        let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
        map.insert(topic.to_string(), state)
    }

    fn all(&self) -> Vec<(TopicId, Arc<CachedTopicState>)> {
        let mut out: Vec<(TopicId, Arc<CachedTopicState>)> = {
            let map = self.entries.read().unwrap_or_else(|p| p.into_inner());
            map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }
}
