#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use inferwatch_core::{Competition, CompetitionFeed, CompetitionListing, CompetitionStore, FetchError};
use inferwatch_store::{ActiveTopicRegistry, SwapRegistry};
use inferwatch_sync::{CompetitionMonitor, MonitorConfig};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Feed {
    listing: Mutex<Option<CompetitionListing>>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl CompetitionFeed for Feed {
    async fn fetch_competitions(&self) -> Result<CompetitionListing, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.listing.lock().unwrap().clone().ok_or_else(|| FetchError::Missing("no buildId".into()))
    }
}

#[derive(Default)]
struct Store {
    saved: AtomicUsize,
    fail_save: AtomicBool,
    cutoffs: Mutex<Vec<DateTime<Utc>>>,
}

impl CompetitionStore for Store {
    fn save_competitions(&self, _listing: &CompetitionListing) -> anyhow::Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            anyhow::bail!("readonly");
        }
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        self.cutoffs.lock().unwrap().push(cutoff);
        Ok(2)
    }
}

fn comp(id: i64, topic: i64) -> Competition {
    Competition { id, topic_id: topic, ..Competition::default() }
}

fn listing() -> CompetitionListing {
    CompetitionListing {
        active_and_upcoming: vec![comp(1, 13), comp(2, 0), comp(3, 14), comp(4, 13)],
        past: vec![comp(5, 30)],
    }
}

fn monitor(feed: Arc<Feed>, store: Arc<Store>, reg: Arc<SwapRegistry>) -> CompetitionMonitor {
    CompetitionMonitor::new(feed, store, reg, MonitorConfig { interval: Duration::from_secs(60), retention: Duration::from_secs(86_400) })
}

#[tokio::test]
async fn listing_replaces_active_set_and_prunes_by_retention() {
    let feed = Arc::new(Feed::default());
    *feed.listing.lock().unwrap() = Some(listing());
    let store = Arc::new(Store::default());
    let reg = Arc::new(SwapRegistry::with_topics(vec!["old".into()]));
    let m = monitor(feed, store.clone(), reg.clone());

    let report = m.run_once().await.unwrap();
    assert_eq!(*reg.list(), vec!["13".to_string(), "14".to_string()]);
    assert_eq!(report.competitions, 5);
    assert_eq!(report.pruned, 2);
    assert!(report.saved);

    let cutoff = store.cutoffs.lock().unwrap()[0];
    let age = Utc::now() - cutoff;
    assert!(age >= chrono::Duration::hours(23) && age <= chrono::Duration::hours(25), "age {:?}", age);
}

#[tokio::test]
async fn failed_fetch_keeps_the_current_set() {
    let feed = Arc::new(Feed::default());
    let store = Arc::new(Store::default());
    let reg = Arc::new(SwapRegistry::with_topics(vec!["7".into()]));
    let m = monitor(feed, store.clone(), reg.clone());
    assert!(m.run_once().await.is_err());
    assert_eq!(*reg.list(), vec!["7".to_string()]);
    assert!(store.cutoffs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn save_failure_still_updates_the_registry() {
    let feed = Arc::new(Feed::default());
    *feed.listing.lock().unwrap() = Some(listing());
    let store = Arc::new(Store::default());
    store.fail_save.store(true, Ordering::SeqCst);
    let reg = Arc::new(SwapRegistry::new());
    let report = monitor(feed, store, reg.clone()).run_once().await.unwrap();
    assert!(!report.saved);
    assert_eq!(reg.list().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn spawned_loop_runs_immediately_and_stops_on_cancel() {
    let feed = Arc::new(Feed::default());
    *feed.listing.lock().unwrap() = Some(listing());
    let reg = Arc::new(SwapRegistry::new());
    let m = Arc::new(monitor(feed.clone(), Arc::new(Store::default()), reg.clone()));
    let token = CancellationToken::new();
    let task = m.spawn(token.clone());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reg.list().len(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

    token.cancel();
    task.await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
}
