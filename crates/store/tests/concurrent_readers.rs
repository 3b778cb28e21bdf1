#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use inferwatch_core::{CachedTopicState, MaterializedRecord, WorkerRecord};
use inferwatch_store::{ActiveTopicRegistry, LockedCache, SnapshotCache, SwapRegistry};

// Every worker in generation `g` carries inferer value `g`; a mixed set would
// show two different values in one entry.
fn generation(g: u64) -> Arc<CachedTopicState> {
    let workers = (0..16)
        .map(|i| {
            let mut w = WorkerRecord::new(format!("w{}", i));
            w.inferer_value = Some(g.to_string());
            w
        })
        .collect();
    Arc::new(CachedTopicState {
        record: MaterializedRecord {
            topic_id: "1".into(),
            inference_block_height: g.to_string(),
            workers,
            ..MaterializedRecord::default()
        },
        accepted_at: Utc::now(),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_mixed_worker_sets() {
    let cache = Arc::new(LockedCache::new());
    cache.replace("1", generation(0));
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..3 {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        readers.push(tokio::spawn(async move {
            let mut seen = 0u64;
            while !done.load(Ordering::Relaxed) {
                let entry = cache.get("1").expect("entry present");
                let h = &entry.record.inference_block_height;
                assert!(entry.record.workers.iter().all(|w| w.inferer_value.as_ref() == Some(h)));
                seen += 1;
                tokio::task::yield_now().await;
            }
            seen
        }));
    }

    let writer = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for g in 1..500u64 {
                cache.replace("1", generation(g));
                tokio::task::yield_now().await;
            }
        })
    };
    writer.await.unwrap();
    done.store(true, Ordering::Relaxed);
    for r in readers {
        assert!(r.await.unwrap() > 0);
    }
    assert_eq!(cache.get("1").unwrap().record.inference_block_height, "499");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_adds_from_many_tasks_are_all_kept() {
    let reg = Arc::new(SwapRegistry::new());
    let mut tasks = Vec::new();
    for i in 0..32 {
        let reg = Arc::clone(&reg);
        tasks.push(tokio::spawn(async move {
            reg.add(&format!("t{}", i));
            reg.add(&format!("t{}", i));
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    let mut listed: Vec<String> = reg.list().iter().cloned().collect();
    listed.sort();
    let mut expected: Vec<String> = (0..32).map(|i| format!("t{}", i)).collect();
    expected.sort();
    assert_eq!(listed, expected);
}
