//! Shared test doubles for Harbor serving integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use harbor_abstraction::{
    HealthProbeError, InferenceModel, InferenceRequest, InferenceResponse, MockModel,
    ModelCatalog, ModelDescriptor, ModelError, ModelLoader, OffloadBackend, ResourceProbe,
    ResourceSnapshot,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Catalog backed by a fixed descriptor map.
pub struct TestCatalog {
    descriptors: HashMap<String, ModelDescriptor>,
}

impl TestCatalog {
    /// Catalog with small (1 KiB) models for the given ids.
    pub fn with_models(ids: &[&str]) -> Self {
        let descriptors = ids
            .iter()
            .map(|id| {
                (id.to_string(), ModelDescriptor::new(*id, format!("file:///models/{id}"), 1024))
            })
            .collect();
        Self { descriptors }
    }

    /// Adds a descriptor with an explicit size estimate.
    pub fn with_descriptor(mut self, descriptor: ModelDescriptor) -> Self {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
        self
    }
}

#[async_trait]
impl ModelCatalog for TestCatalog {
    async fn descriptor(&self, id: &str) -> Result<ModelDescriptor, ModelError> {
        self.descriptors
            .get(id)
            .cloned()
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }
}

/// Model whose behavior is scripted per test: per-call latency and a failure
/// toggle for both inference and the health probe.
pub struct ScriptedModel {
    id: String,
    infer_latency: Duration,
    fail_infer: AtomicBool,
    fail_probe: AtomicBool,
    infer_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            infer_latency: Duration::ZERO,
            fail_infer: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            infer_calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(id: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            infer_latency: latency,
            fail_infer: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            infer_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_fail_infer(&self, fail: bool) {
        self.fail_infer.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceModel for ScriptedModel {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ModelError> {
        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        if !self.infer_latency.is_zero() {
            tokio::time::sleep(self.infer_latency).await;
        }
        if self.fail_infer.load(Ordering::SeqCst) {
            return Err(ModelError::InferenceError("scripted failure".to_string()));
        }
        Ok(InferenceResponse {
            output: format!("echo: {}", request.prompt),
            model_id: Some(self.id.clone()),
            usage: None,
        })
    }

    async fn probe(&self) -> Result<(), HealthProbeError> {
        if self.fail_probe.load(Ordering::SeqCst) {
            Err(HealthProbeError::new("scripted probe failure"))
        } else {
            Ok(())
        }
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Loader that counts physical loads and can be scripted to fail, delay, or
/// hand out a shared [`ScriptedModel`].
pub struct CountingLoader {
    loads: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
    fixed: std::sync::Mutex<HashMap<String, Arc<ScriptedModel>>>,
}

impl CountingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: None,
            fixed: std::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Some(delay),
            fixed: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Future loads of `id` return this exact model instance.
    pub fn serve(&self, model: Arc<ScriptedModel>) {
        self.fixed.lock().unwrap().insert(model.model_id().to_string(), model);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for CountingLoader {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn InferenceModel>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::LoadError("scripted load failure".to_string()));
        }
        if let Some(model) = self.fixed.lock().unwrap().get(&descriptor.id) {
            return Ok(Arc::clone(model) as Arc<dyn InferenceModel>);
        }
        Ok(Arc::new(MockModel::new(descriptor.id.clone())))
    }
}

/// Offload backend that counts remote loads.
pub struct TestBackend {
    remote_loads: AtomicUsize,
    fail: AtomicBool,
    reachable: AtomicBool,
}

impl TestBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            remote_loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn remote_loads(&self) -> usize {
        self.remote_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OffloadBackend for TestBackend {
    async fn load_remote(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn InferenceModel>, ModelError> {
        self.remote_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::RemoteBackendError("scripted remote failure".to_string()));
        }
        Ok(Arc::new(MockModel::new(descriptor.id.clone()).remote()))
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Probe returning a fixed snapshot.
pub struct FixedProbe {
    snapshot: ResourceSnapshot,
}

impl FixedProbe {
    /// Plenty of free memory, idle accelerator.
    pub fn relaxed() -> Arc<Self> {
        Arc::new(Self {
            snapshot: ResourceSnapshot {
                cpu_percent: 5.0,
                memory_available_bytes: 64 * 1024 * 1024 * 1024,
                accelerator_utilization_percent: 0.0,
            },
        })
    }

    /// Little free memory: any realistic model exceeds the local budget.
    pub fn constrained() -> Arc<Self> {
        Arc::new(Self {
            snapshot: ResourceSnapshot {
                cpu_percent: 80.0,
                memory_available_bytes: 512,
                accelerator_utilization_percent: 0.0,
            },
        })
    }
}

impl ResourceProbe for FixedProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        self.snapshot
    }
}

/// Wires a manager from test doubles. Installs a test-writer subscriber so
/// `RUST_LOG` surfaces the serving spans when a test fails.
pub fn build_manager(
    config: harbor_serving::ServingConfig,
    catalog: TestCatalog,
    loader: Arc<CountingLoader>,
    probe: Arc<FixedProbe>,
    backend: Option<Arc<TestBackend>>,
) -> harbor_serving::ModelManager {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    harbor_serving::ModelManager::new(
        config,
        Arc::new(catalog),
        loader,
        probe,
        backend.map(|backend| backend as Arc<dyn OffloadBackend>),
    )
    .expect("test config should be valid")
}
