//! Model lifecycle and inference cache management for Harbor.
//!
//! This crate keeps a bounded set of loaded models resident in memory and
//! serves concurrent inference against them:
//!
//! - **[`ModelManager`]**: the inference gateway and the only public path to
//!   a model handle
//! - **[`ModelCache`]**: bounded LRU table with busy-aware eviction
//! - **[`LoadCoordinator`]**: single-flight loads with remote fallback
//! - **[`HealthMonitor`]**: background idle/health eviction
//! - **[`OffloadDecider`]**: local-versus-remote placement under resource
//!   pressure
//! - **[`MetricsCollector`]**: per-model latency and outcome accounting
//!
//! Collaborators (catalog, loader, offload backend, resource probe) are trait
//! objects from `harbor-abstraction`, injected at construction.

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod offload;
pub mod resources;

pub use cache::{BusyGuard, CacheStats, EntryState, EntryStatus, ModelCache, ModelEntry};
pub use config::{CapacityPolicy, ConfigError, OffloadConfig, ServingConfig};
pub use error::ServeError;
pub use health::HealthMonitor;
pub use loader::LoadCoordinator;
pub use manager::{ManagerStatus, ModelManager};
pub use metrics::{MetricSample, MetricsCollector, MetricsSummary};
pub use offload::{OffloadDecider, Placement};
pub use resources::SystemResourceProbe;
