//! Competition monitor: keeps the active topic set in line with the forge
//! listing and trims history past the retention window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use inferwatch_core::{CompetitionFeed, CompetitionStore};
use inferwatch_store::ActiveTopicRegistry;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub retention: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(60 * 60), retention: Duration::from_secs(30 * 24 * 60 * 60) }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MonitorReport {
    pub active_topics: Vec<String>,
    pub competitions: usize,
    pub saved: bool,
    pub pruned: usize,
}

pub struct CompetitionMonitor {
    feed: Arc<dyn CompetitionFeed>,
    store: Arc<dyn CompetitionStore>,
    registry: Arc<dyn ActiveTopicRegistry>,
    cfg: MonitorConfig,
}

impl CompetitionMonitor {
    pub fn new(
        feed: Arc<dyn CompetitionFeed>,
        store: Arc<dyn CompetitionStore>,
        registry: Arc<dyn ActiveTopicRegistry>,
        cfg: MonitorConfig,
    ) -> Self {
        Self { feed, store, registry, cfg }
    }

    /// Fetch the listing, store it, replace the active set and prune.
    ///
    /// A failed fetch leaves the active set untouched. Store failures are
    /// logged and do not block the registry update.
    pub async fn run_once(&self) -> Result<MonitorReport> {
        let listing = self.feed.fetch_competitions().await.context("fetching competition listing")?;
        let competitions = listing.active_and_upcoming.len() + listing.past.len();
        let saved = match self.store.save_competitions(&listing) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "monitor: saving competitions failed");
                false
            }
        };
        let active = listing.active_topic_ids();
        self.registry.set_active(active.clone());

        let retention = chrono::Duration::from_std(self.cfg.retention).unwrap_or_else(|_| chrono::Duration::days(30));
        let cutoff = chrono::Utc::now() - retention;
        let pruned = match self.store.prune_older_than(cutoff) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "monitor: prune failed");
                0
            }
        };
        info!(competitions, active = active.len(), pruned, "monitor: listing applied");
        Ok(MonitorReport { active_topics: active, competitions, saved, pruned })
    }

    /// Run [`Self::run_once`] now and then every interval until `token` fires.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.cfg.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %format!("{:#}", e), "monitor: cycle failed");
                        }
                    }
                }
            }
            info!("monitor: loop stopped");
        })
    }
}
