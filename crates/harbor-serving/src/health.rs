//! Background health monitoring for resident models.
//!
//! A single loop periodically sweeps the cache: idle entries are evicted,
//! READY entries are probed with a lightweight synthetic call, and entries
//! whose probe fails are degraded and evicted. Busy entries are always
//! skipped and retried on the next cycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{EntryState, ModelCache};

/// Periodic monitor that evicts idle and unhealthy models.
pub struct HealthMonitor {
    cache: Arc<ModelCache>,
    interval: Duration,
    idle_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Creates a monitor over the given cache. Does not start the loop.
    #[must_use]
    pub fn new(cache: Arc<ModelCache>, interval: Duration, idle_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { cache, interval, idle_timeout, shutdown_tx, task: Mutex::new(None) }
    }

    /// Starts the background loop. Idempotent: a second call while the loop
    /// is running is a no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let idle_timeout = self.idle_timeout;
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh manager
            // does not sweep before anything is resident.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::sweep(&cache, idle_timeout).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Health monitor received shutdown signal");
                        break;
                    }
                }
            }
        });

        *task = Some(handle);
        info!(
            interval_secs = self.interval.as_secs(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "Health monitor started"
        );
    }

    /// Runs one sweep immediately, outside the periodic schedule.
    pub async fn run_cycle(&self) {
        Self::sweep(&self.cache, self.idle_timeout).await;
    }

    async fn sweep(cache: &Arc<ModelCache>, idle_timeout: Duration) {
        for id in cache.evict_idle(idle_timeout) {
            debug!(model_id = %id, "Idle model evicted by health monitor");
        }

        // Snapshot first; probes run without holding the cache lock.
        for entry in cache.entries_snapshot() {
            match entry.state() {
                EntryState::Ready => {
                    if let Err(err) = entry.model().probe().await {
                        warn!(
                            model_id = %entry.id(),
                            reason = %err.reason,
                            "Health probe failed"
                        );
                        if !cache.evict_unhealthy(entry.id(), &entry) {
                            debug!(
                                model_id = %entry.id(),
                                "Unhealthy model busy or already gone, retrying next cycle"
                            );
                        }
                    }
                }
                EntryState::Degraded => {
                    // Flagged on an earlier cycle while busy; try again.
                    if !cache.evict_unhealthy(entry.id(), &entry) {
                        debug!(
                            model_id = %entry.id(),
                            "Degraded model still busy, retrying next cycle"
                        );
                    }
                }
                EntryState::Loading | EntryState::Unloading => {}
            }
        }
    }

    /// Stops the loop cooperatively: signal, then join with a bound so an
    /// in-progress sweep finishes before teardown continues.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => debug!("Health monitor stopped"),
                Ok(Err(err)) => warn!(error = %err, "Health monitor task ended abnormally"),
                Err(_) => warn!("Health monitor did not stop within 5s"),
            }
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
