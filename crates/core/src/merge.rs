//! Worker merge: fold the sparse per-worker lists of a snapshot into one
//! record per worker, in first-seen order.

use rustc_hash::FxHashMap;

use crate::{Leaderboard, LeaderboardEntry, RawSnapshot, WorkerRecord};

struct WorkerTable<'a> {
    index: FxHashMap<&'a str, usize>,
    rows: Vec<WorkerRecord>,
}

impl<'a> WorkerTable<'a> {
    fn with_capacity(cap: usize) -> Self {
        Self { index: FxHashMap::default(), rows: Vec::with_capacity(cap) }
    }

    /// Row for `worker`, created on first sight. Empty ids are rejected.
    fn entry(&mut self, worker: &'a str) -> Option<&mut WorkerRecord> {
        if worker.is_empty() {
            return None;
        }
        let idx = match self.index.get(worker) {
            Some(&i) => i,
            None => {
                let i = self.rows.len();
                self.rows.push(WorkerRecord::new(worker));
                self.index.insert(worker, i);
                i
            }
        };
        Some(&mut self.rows[idx])
    }
}

pub fn merge_workers(snapshot: &RawSnapshot, leaderboard: Option<&Leaderboard>) -> Vec<WorkerRecord> {
    let mut table = WorkerTable::with_capacity(snapshot.inferer_values.len());
    for iv in &snapshot.inferer_values {
        if let Some(row) = table.entry(&iv.worker) {
            row.inferer_value = Some(iv.value.clone());
        }
    }
    for ov in &snapshot.one_out_inferer_values {
        if let Some(row) = table.entry(&ov.worker) {
            row.one_out_inferer_value = Some(ov.value.clone());
        }
    }
    for w in &snapshot.inferer_weights {
        if let Some(row) = table.entry(&w.worker) {
            row.weight = Some(w.weight.clone());
        }
    }
    let mut rows = table.rows;
    if let Some(lb) = leaderboard.filter(|lb| !lb.is_empty()) {
        for row in rows.iter_mut() {
            if let Some(entry) = lb.get(&row.worker) {
                row.leaderboard = Some(entry.clone());
            }
        }
    }
    rows
}

/// Build a leaderboard map; later entries for the same address win.
pub fn leaderboard_from_entries<I>(entries: I) -> Leaderboard
where
    I: IntoIterator<Item = LeaderboardEntry>,
{
    let mut out = Leaderboard::new();
    for e in entries {
        if e.cosmos_address.is_empty() {
            continue;
        }
        out.insert(e.cosmos_address.clone(), e);
    }
    out
}
