//! Model abstraction layer for Harbor.
//!
//! This crate defines the core traits and types for interacting with loaded
//! inference models and with the external collaborators of the serving
//! subsystem: the model catalog, the local loader, the remote offload
//! backend, and the resource snapshot provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error produced by a model or one of its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// Constructing or initializing a model instance failed.
    #[error("Load Error: {0}")]
    LoadError(String),

    /// The remote offload backend was unreachable or rejected the request.
    #[error("Remote Backend Error: {0}")]
    RemoteBackendError(String),

    /// The model call itself failed (bad input, runtime fault, broken handle).
    #[error("Inference Error: {0}")]
    InferenceError(String),

    /// The catalog has no descriptor for the requested model id.
    #[error("Model Not Found: {0}")]
    NotFound(String),

    /// The catalog backend could not be queried.
    #[error("Catalog Error: {0}")]
    CatalogError(String),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

/// Failure reported by a synthetic health probe.
///
/// Kept separate from [`ModelError`] on purpose: probe failures drive internal
/// eviction decisions and are never surfaced to inference callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("health probe failed: {reason}")]
pub struct HealthProbeError {
    /// Human-readable reason reported by the probe.
    pub reason: String,
}

impl HealthProbeError {
    /// Creates a new probe error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Quantization settings shared by the 8-bit and 4-bit variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Group size for grouped quantization schemes, `None` for per-tensor.
    pub group_size: Option<u32>,
    /// Whether to use symmetric quantization.
    pub symmetric: bool,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self { group_size: None, symmetric: true }
    }
}

/// Settings for ONNX export at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnnxExportConfig {
    /// ONNX opset version to target.
    pub opset: u32,
}

impl Default for OnnxExportConfig {
    fn default() -> Self {
        Self { opset: 17 }
    }
}

/// Load-time optimization applied to a model.
///
/// A closed set of variants, each with its own typed configuration, selected
/// from the catalog descriptor rather than dispatched on format strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimization {
    /// 8-bit weight quantization.
    Quantized8Bit(QuantizationConfig),
    /// 4-bit weight quantization.
    Quantized4Bit(QuantizationConfig),
    /// Export to ONNX for runtime execution.
    OnnxExport(OnnxExportConfig),
    /// Load the model as-is.
    NoOptimization,
}

impl Default for Optimization {
    fn default() -> Self {
        Self::NoOptimization
    }
}

/// Read-only metadata about a known model, sourced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model identifier.
    pub id: String,
    /// Where the model artifacts live (path, URL, registry reference).
    pub source_uri: String,
    /// Estimated resident size in bytes once loaded.
    pub size_bytes: u64,
    /// Optimization to apply at load time.
    #[serde(default)]
    pub optimization: Optimization,
}

impl ModelDescriptor {
    /// Creates a descriptor with no optimization.
    #[must_use]
    pub fn new(id: impl Into<String>, source_uri: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            size_bytes,
            optimization: Optimization::NoOptimization,
        }
    }

    /// Sets the load-time optimization.
    #[must_use]
    pub fn with_optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }
}

/// Parameters controlling a single inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceParameters {
    /// Sampling temperature, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling probability mass.
    pub top_p: Option<f32>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences at which generation stops.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for InferenceParameters {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            max_tokens: Some(512),
            stop_sequences: None,
        }
    }
}

/// A single inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// The input prompt.
    pub prompt: String,
    /// Optional generation parameters.
    pub parameters: Option<InferenceParameters>,
}

impl InferenceRequest {
    /// Creates a request with default parameters.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), parameters: None }
    }
}

/// Token usage statistics for a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// The response from an inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// The generated output.
    pub output: String,

    /// Optional: the ID of the model that produced the output.
    pub model_id: Option<String>,

    /// Optional: usage statistics for the call.
    pub usage: Option<InferenceUsage>,
}

/// A loaded model handle capable of serving inference.
///
/// Implementations must be `Send + Sync`; the serving layer shares handles
/// across concurrent callers for the duration of individual calls only.
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// Runs one inference call against the model.
    ///
    /// # Errors
    /// Returns a `ModelError` if the call fails.
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ModelError>;

    /// Runs a lightweight synthetic call to verify the handle is still
    /// functional. The monitor interprets the result; a probe failure is
    /// never control flow by exception.
    ///
    /// # Errors
    /// Returns a `HealthProbeError` describing why the handle is unhealthy.
    async fn probe(&self) -> Result<(), HealthProbeError>;

    /// Returns the ID of the model.
    fn model_id(&self) -> &str;

    /// Whether this handle proxies a remote compute backend.
    fn is_remote(&self) -> bool {
        false
    }
}

/// Read-only catalog of known models.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Fetches the descriptor for a model id.
    ///
    /// # Errors
    /// Returns `ModelError::NotFound` for unknown ids, `ModelError::CatalogError`
    /// if the backing store cannot be queried.
    async fn descriptor(&self, id: &str) -> Result<ModelDescriptor, ModelError>;
}

/// Constructs local model handles from descriptors.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Instantiates the model locally, applying the descriptor's optimization.
    ///
    /// # Errors
    /// Returns a `ModelError` if instantiation or optimization fails.
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn InferenceModel>, ModelError>;
}

/// Remote compute backend used when local resources are insufficient.
#[async_trait]
pub trait OffloadBackend: Send + Sync {
    /// Establishes a proxy handle to the model on the remote backend.
    ///
    /// # Errors
    /// Returns a `ModelError` on connectivity or remote-side failures.
    async fn load_remote(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn InferenceModel>, ModelError>;

    /// Whether the backend currently answers at all.
    async fn is_reachable(&self) -> bool;
}

/// A point-in-time report of local resource utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// CPU utilization, 0-100.
    pub cpu_percent: f32,
    /// Bytes of memory currently available to new allocations.
    pub memory_available_bytes: u64,
    /// Accelerator (GPU/NPU) utilization, 0-100. Zero when none present.
    pub accelerator_utilization_percent: f32,
}

/// Reports current resource utilization on demand.
pub trait ResourceProbe: Send + Sync {
    /// Takes a fresh snapshot of local resources.
    fn snapshot(&self) -> ResourceSnapshot;
}

/// A mock implementation of the `InferenceModel` trait for testing and
/// demonstration.
#[derive(Debug)]
pub struct MockModel {
    id: String,
    latency: Option<Duration>,
    remote: bool,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id, latency: None, remote: false }
    }

    /// Adds an artificial per-call latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Marks the mock as a remote proxy handle.
    #[must_use]
    pub const fn remote(mut self) -> Self {
        self.remote = true;
        self
    }
}

#[async_trait]
impl InferenceModel for MockModel {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ModelError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let output = format!("Mock response for: {}\nModel ID: {}", request.prompt, self.id);
        let prompt_tokens = count_tokens(&request.prompt);
        let completion_tokens = count_tokens(&output);

        Ok(InferenceResponse {
            output,
            model_id: Some(self.id.clone()),
            usage: Some(InferenceUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn probe(&self) -> Result<(), HealthProbeError> {
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn is_remote(&self) -> bool {
        self.remote
    }
}

/// Rough whitespace token count used by the mock implementation.
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model_infers() {
        let model = MockModel::new("test-model".to_string());
        let response = model.infer(&InferenceRequest::new("hello world")).await.unwrap();

        assert!(response.output.contains("hello world"));
        assert_eq!(response.model_id.as_deref(), Some("test-model"));
        assert!(response.usage.unwrap().total_tokens > 0);
    }

    #[tokio::test]
    async fn test_mock_model_probe_is_healthy() {
        let model = MockModel::new("test-model".to_string());
        assert!(model.probe().await.is_ok());
    }

    #[test]
    fn test_mock_model_remote_flag() {
        let model = MockModel::new("m".to_string()).remote();
        assert!(model.is_remote());
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = ModelDescriptor::new("m1", "file:///models/m1.gguf", 1024)
            .with_optimization(Optimization::Quantized8Bit(QuantizationConfig::default()));

        assert_eq!(descriptor.id, "m1");
        assert!(matches!(descriptor.optimization, Optimization::Quantized8Bit(_)));
    }

    #[test]
    fn test_optimization_serde_tagging() {
        let optimization = Optimization::Quantized4Bit(QuantizationConfig {
            group_size: Some(64),
            symmetric: false,
        });

        let json = serde_json::to_value(&optimization).unwrap();
        assert_eq!(json["kind"], "quantized4_bit");

        let back: Optimization = serde_json::from_value(json).unwrap();
        assert_eq!(back, optimization);
    }

    #[test]
    fn test_descriptor_optimization_defaults_to_none() {
        let json = r#"{"id":"m","source_uri":"file:///m","size_bytes":10}"#;
        let descriptor: ModelDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.optimization, Optimization::NoOptimization);
    }
}
