//! Periodic driver for [`TopicSync::refresh_all`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use inferwatch_core::SyncError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{RefreshOutcome, TopicSync};

#[derive(Default)]
struct RunState {
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

pub struct RefreshScheduler {
    engine: Arc<TopicSync>,
    period: Duration,
    state: Mutex<RunState>,
}

impl RefreshScheduler {
    pub fn new(engine: Arc<TopicSync>) -> Self {
        let period = engine.config().topic_interval;
        Self { engine, period, state: Mutex::new(RunState::default()) }
    }

    pub fn engine(&self) -> &Arc<TopicSync> {
        &self.engine
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Spawn the loop: one pass right away, then one per period.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SyncError> {
        let mut st = self.state();
        if st.token.is_some() {
            return Err(SyncError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        let engine = Arc::clone(&self.engine);
        let period = self.period;
        let child = token.clone();
        let task = tokio::spawn(async move {
            info!(period_ms = period.as_millis() as u64, "scheduler: loop started");
            if !child.is_cancelled() {
                engine.refresh_all().await;
            }
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if child.is_cancelled() {
                            break;
                        }
                        engine.refresh_all().await;
                    }
                }
            }
            info!("scheduler: loop stopped");
        });
        st.token = Some(token);
        st.task = Some(task);
        Ok(())
    }

    /// Cancel the loop without waiting for it. A pass already running finishes.
    pub fn stop(&self) -> Result<(), SyncError> {
        self.take_running().map(|_| ())
    }

    /// Cancel the loop and wait for an in-flight pass to drain.
    pub async fn stop_and_wait(&self) -> Result<(), SyncError> {
        let task = self.take_running()?;
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "scheduler: loop task ended abnormally");
            }
        }
        Ok(())
    }

    fn take_running(&self) -> Result<Option<JoinHandle<()>>, SyncError> {
        let mut st = self.state();
        let token = st.token.take().ok_or(SyncError::NotRunning)?;
        token.cancel();
        debug!("scheduler: stop requested");
        Ok(st.task.take())
    }

    pub fn is_running(&self) -> bool {
        self.state().token.is_some()
    }

    /// Refresh one topic outside the timer cadence; it need not be active.
    pub async fn force_refresh(&self, topic: &str) -> Result<RefreshOutcome, SyncError> {
        self.engine.refresh_topic(topic).await
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(token) = self.state().token.take() {
            token.cancel();
        }
    }
}
