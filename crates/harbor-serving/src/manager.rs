//! The model manager: the only path by which callers run inference.
//!
//! An explicit component instance with constructor-injected configuration and
//! collaborators, owned by the application's startup wiring. No ambient
//! global state.

use harbor_abstraction::{
    InferenceRequest, InferenceResponse, ModelCatalog, ModelLoader, OffloadBackend, ResourceProbe,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cache::{CacheStats, EntryStatus, ModelCache, RemoveOutcome};
use crate::config::{ConfigError, ServingConfig};
use crate::error::ServeError;
use crate::health::HealthMonitor;
use crate::loader::LoadCoordinator;
use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::offload::OffloadDecider;

/// Observability snapshot of the manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    /// Resident entries, sorted by id.
    pub entries: Vec<EntryStatus>,
    /// Ids with a load currently in flight.
    pub loading: Vec<String>,
    /// Cache counters.
    pub cache: CacheStats,
    /// Per-model metric summaries.
    pub metrics: HashMap<String, MetricsSummary>,
}

/// Coordinates the model cache, load de-duplication, health monitoring, and
/// metrics behind one inference surface.
pub struct ModelManager {
    cache: Arc<ModelCache>,
    coordinator: LoadCoordinator,
    monitor: HealthMonitor,
    metrics: MetricsCollector,
    shutting_down: AtomicBool,
}

impl ModelManager {
    /// Creates a manager from configuration and injected collaborators.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(
        config: ServingConfig,
        catalog: Arc<dyn ModelCatalog>,
        loader: Arc<dyn ModelLoader>,
        resources: Arc<dyn ResourceProbe>,
        offload: Option<Arc<dyn OffloadBackend>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(ModelCache::new(
            config.max_resident_models,
            config.capacity_policy,
        ));
        let coordinator = LoadCoordinator::new(
            Arc::clone(&cache),
            catalog,
            loader,
            offload,
            resources,
            OffloadDecider::new(config.offload.clone()),
            config.load_timeout(),
        );
        let monitor = HealthMonitor::new(
            Arc::clone(&cache),
            config.health_check_interval(),
            config.idle_timeout(),
        );
        let metrics = MetricsCollector::new(config.metrics_window);

        Ok(Self {
            cache,
            coordinator,
            monitor,
            metrics,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Starts the background health monitor.
    pub async fn start(&self) {
        self.monitor.start().await;
    }

    /// Stops accepting work and joins the health monitor. In-flight calls
    /// complete; their entries simply stop being monitored.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.monitor.stop().await;
        info!("Model manager shut down");
    }

    /// Runs one health sweep immediately, outside the periodic schedule.
    pub async fn run_health_cycle(&self) {
        self.monitor.run_cycle().await;
    }

    /// Runs inference against the model, loading it first if necessary.
    ///
    /// The entry is marked busy for the duration of the call, so no eviction
    /// can race with it; the busy mark is released on every exit path. A
    /// failed call records a failure sample and surfaces
    /// `ServeError::InferenceFailed` without degrading the entry -- deciding
    /// whether the handle is actually broken is the health monitor's job.
    ///
    /// # Errors
    /// Returns a `ServeError` when acquisition or the model call fails.
    pub async fn infer(
        &self,
        id: &str,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, ServeError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ServeError::ShuttingDown);
        }

        let started = Instant::now();
        let (entry, guard) = match self.coordinator.acquire_busy(id).await {
            Ok(acquired) => acquired,
            Err(err) => {
                self.metrics.record_failure(id, started.elapsed());
                return Err(err);
            }
        };

        let result = entry.model().infer(&request).await;
        drop(guard);

        match result {
            Ok(response) => {
                self.metrics.record_success(id, started.elapsed());
                Ok(response)
            }
            Err(err) => {
                self.metrics.record_failure(id, started.elapsed());
                Err(ServeError::InferenceFailed {
                    model_id: id.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Like [`infer`](Self::infer), bounded by a caller-supplied deadline.
    ///
    /// On expiry the call is cancelled on our side (a remote call may still
    /// run to completion server-side), the busy mark is released, and a
    /// failure sample is recorded.
    ///
    /// # Errors
    /// `ServeError::CallerCancelled` when the deadline elapses, otherwise as
    /// [`infer`](Self::infer).
    pub async fn infer_with_timeout(
        &self,
        id: &str,
        request: InferenceRequest,
        timeout: Duration,
    ) -> Result<InferenceResponse, ServeError> {
        match tokio::time::timeout(timeout, self.infer(id, request)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.record_failure(id, timeout);
                debug!(model_id = %id, "Inference cancelled by caller deadline");
                Err(ServeError::CallerCancelled { model_id: id.to_string() })
            }
        }
    }

    /// Explicit pre-warm: loads the model without marking it busy.
    ///
    /// # Errors
    /// Propagates the load outcome.
    pub async fn load(&self, id: &str) -> Result<(), ServeError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ServeError::ShuttingDown);
        }
        self.coordinator.prewarm(id).await.map(|_| ())
    }

    /// Explicit eviction regardless of the idle timer.
    ///
    /// If calls are in flight, the entry is hidden from new acquisitions and
    /// the removal waits until they complete. Unloading an absent model is a
    /// no-op.
    ///
    /// # Errors
    /// Currently infallible; the `Result` keeps the surface uniform for
    /// callers routing all manager operations the same way.
    pub async fn unload(&self, id: &str) -> Result<(), ServeError> {
        match self.cache.try_remove(id) {
            RemoveOutcome::Removed | RemoveOutcome::Absent => Ok(()),
            RemoveOutcome::Busy(entry) => {
                info!(
                    model_id = %id,
                    busy = entry.busy_count(),
                    "Unload deferred until in-flight calls complete"
                );
                entry.wait_idle().await;
                // A concurrent reload may have replaced the slot; the old
                // entry is gone either way.
                self.cache.remove_exact(id, &entry);
                Ok(())
            }
        }
    }

    /// Observability snapshot: entries, in-flight loads, cache counters, and
    /// per-model metrics.
    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            entries: self.cache.status_entries(),
            loading: self.cache.loading_ids(),
            cache: self.cache.stats(),
            metrics: self.metrics.all(),
        }
    }

    /// The metrics collector, for observability endpoints that want raw
    /// per-model summaries.
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("cache", &self.cache)
            .field("shutting_down", &self.shutting_down.load(Ordering::Acquire))
            .finish()
    }
}
