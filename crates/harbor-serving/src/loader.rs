//! Single-flight load coordination.
//!
//! At most one physical load runs per model id. Concurrent callers for the
//! same cold id attach to the in-flight ticket and observe the identical
//! outcome. Load errors are never retried silently on the hot path; a caller
//! must explicitly ask again after a failure.

use harbor_abstraction::{
    InferenceModel, ModelCatalog, ModelDescriptor, ModelError, ModelLoader, OffloadBackend,
    ResourceProbe,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{AcquireStep, BusyGuard, ModelCache, ModelEntry};
use crate::error::ServeError;
use crate::offload::{OffloadDecider, Placement};

/// Performs de-duplicated loads and publishes READY entries into the cache.
pub struct LoadCoordinator {
    cache: Arc<ModelCache>,
    catalog: Arc<dyn ModelCatalog>,
    loader: Arc<dyn ModelLoader>,
    offload: Option<Arc<dyn OffloadBackend>>,
    resources: Arc<dyn ResourceProbe>,
    decider: OffloadDecider,
    load_timeout: Duration,
}

impl LoadCoordinator {
    /// Creates a coordinator over the given cache and collaborators.
    #[must_use]
    pub fn new(
        cache: Arc<ModelCache>,
        catalog: Arc<dyn ModelCatalog>,
        loader: Arc<dyn ModelLoader>,
        offload: Option<Arc<dyn OffloadBackend>>,
        resources: Arc<dyn ResourceProbe>,
        decider: OffloadDecider,
        load_timeout: Duration,
    ) -> Self {
        Self { cache, catalog, loader, offload, resources, decider, load_timeout }
    }

    /// Acquires a READY entry and marks one call in flight against it.
    ///
    /// # Errors
    /// Propagates the shared load outcome when a cold load fails.
    pub async fn acquire_busy(
        &self,
        id: &str,
    ) -> Result<(Arc<ModelEntry>, BusyGuard), ServeError> {
        let (entry, guard) = self.acquire(id, true).await?;
        match guard {
            Some(guard) => Ok((entry, guard)),
            None => unreachable!("busy acquisition always carries a guard"),
        }
    }

    /// Acquires a READY entry without marking it busy (explicit pre-warm).
    ///
    /// # Errors
    /// Propagates the shared load outcome when a cold load fails.
    pub async fn prewarm(&self, id: &str) -> Result<Arc<ModelEntry>, ServeError> {
        let (entry, _) = self.acquire(id, false).await?;
        Ok(entry)
    }

    async fn acquire(
        &self,
        id: &str,
        mark_busy: bool,
    ) -> Result<(Arc<ModelEntry>, Option<BusyGuard>), ServeError> {
        loop {
            match self.cache.begin_acquire(id, mark_busy) {
                AcquireStep::Ready { entry, guard } => return Ok((entry, guard)),
                AcquireStep::Wait(mut rx) => match rx.recv().await {
                    Ok(Ok(entry)) => {
                        if let Some(checked_out) = self.cache.checkout(id, &entry, mark_busy) {
                            return Ok(checked_out);
                        }
                        // Evicted between publish and retrieval; start over.
                        debug!(model_id = %id, "Published entry gone before retrieval, retrying");
                    }
                    Ok(Err(err)) => return Err(err),
                    Err(_) => {
                        // Ticket vanished without an outcome; start over.
                        debug!(model_id = %id, "Load ticket closed without outcome, retrying");
                    }
                },
                AcquireStep::Load(permit) => {
                    let id = permit.model_id().to_string();
                    let outcome =
                        tokio::time::timeout(self.load_timeout, self.perform_load(&id)).await;

                    return match outcome {
                        Ok(Ok((model, is_remote))) => permit.publish(model, is_remote, mark_busy),
                        Ok(Err(err)) => {
                            permit.fail(err.clone());
                            Err(err)
                        }
                        Err(_) => {
                            let err = ServeError::LoadTimeout {
                                model_id: id,
                                timeout_secs: self.load_timeout.as_secs(),
                            };
                            permit.fail(err.clone());
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// The physical load: catalog lookup, placement decision, construction.
    /// Returns the handle and whether it is a remote proxy.
    async fn perform_load(
        &self,
        id: &str,
    ) -> Result<(Arc<dyn InferenceModel>, bool), ServeError> {
        let descriptor = self.catalog.descriptor(id).await.map_err(|err| match err {
            ModelError::NotFound(_) => ServeError::CatalogNotFound { model_id: id.to_string() },
            other => ServeError::CatalogUnavailable {
                model_id: id.to_string(),
                reason: other.to_string(),
            },
        })?;

        let snapshot = self.resources.snapshot();
        // Reachability is only probed when the snapshot calls for offload,
        // so the common local path stays free of backend round trips.
        let remote_reachable = if self.decider.wants_offload(&descriptor, &snapshot) {
            match &self.offload {
                Some(backend) => backend.is_reachable().await,
                None => false,
            }
        } else {
            false
        };

        match self.decider.decide(&descriptor, &snapshot, remote_reachable) {
            Placement::Local => match self.loader.load(&descriptor).await {
                Ok(model) => Ok((model, false)),
                Err(local_err) => self.retry_remote(&descriptor, &local_err).await,
            },
            Placement::Remote => {
                let Some(backend) = &self.offload else {
                    unreachable!("remote placement requires a configured backend")
                };
                match backend.load_remote(&descriptor).await {
                    Ok(model) => Ok((model, true)),
                    Err(remote_err) => self.retry_local(&descriptor, &remote_err).await,
                }
            }
        }
    }

    /// One remote attempt after a failed local load.
    async fn retry_remote(
        &self,
        descriptor: &ModelDescriptor,
        local_err: &ModelError,
    ) -> Result<(Arc<dyn InferenceModel>, bool), ServeError> {
        let Some(backend) = &self.offload else {
            return Err(ServeError::LoadFailedLocal {
                model_id: descriptor.id.clone(),
                reason: local_err.to_string(),
            });
        };

        warn!(
            model_id = %descriptor.id,
            error = %local_err,
            "Local load failed, retrying once via remote backend"
        );
        match backend.load_remote(descriptor).await {
            Ok(model) => Ok((model, true)),
            Err(remote_err) => Err(ServeError::LoadFailedRemote {
                model_id: descriptor.id.clone(),
                local_reason: local_err.to_string(),
                remote_reason: remote_err.to_string(),
            }),
        }
    }

    /// One local attempt after a failed remote load.
    async fn retry_local(
        &self,
        descriptor: &ModelDescriptor,
        remote_err: &ModelError,
    ) -> Result<(Arc<dyn InferenceModel>, bool), ServeError> {
        warn!(
            model_id = %descriptor.id,
            error = %remote_err,
            "Remote load failed, retrying once locally"
        );
        match self.loader.load(descriptor).await {
            Ok(model) => Ok((model, false)),
            Err(local_err) => Err(ServeError::LoadFailedRemote {
                model_id: descriptor.id.clone(),
                local_reason: local_err.to_string(),
                remote_reason: remote_err.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("load_timeout", &self.load_timeout)
            .field("offload_configured", &self.offload.is_some())
            .finish()
    }
}
