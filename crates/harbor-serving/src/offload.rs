//! Local-versus-remote placement decisions for cold loads.
//!
//! The decision is re-evaluated on every cold load; an already-resident
//! entry is never migrated between local and remote.

use harbor_abstraction::{ModelDescriptor, ResourceSnapshot};
use tracing::{debug, warn};

use crate::config::OffloadConfig;

/// Where a model should be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Instantiate on this machine.
    Local,
    /// Establish a proxy handle to the offload backend.
    Remote,
}

/// Chooses between local and remote loading from a resource snapshot and the
/// model's size estimate.
#[derive(Debug, Clone)]
pub struct OffloadDecider {
    config: OffloadConfig,
}

impl OffloadDecider {
    /// Creates a decider with the given thresholds.
    #[must_use]
    pub fn new(config: OffloadConfig) -> Self {
        Self { config }
    }

    /// Whether local resources are too constrained for this model: its
    /// estimated size exceeds the configured fraction of available memory,
    /// or the accelerator is already saturated.
    #[must_use]
    pub fn wants_offload(
        &self,
        descriptor: &ModelDescriptor,
        snapshot: &ResourceSnapshot,
    ) -> bool {
        let memory_budget =
            snapshot.memory_available_bytes as f64 * f64::from(self.config.memory_fraction);
        descriptor.size_bytes as f64 > memory_budget
            || snapshot.accelerator_utilization_percent
                >= self.config.accelerator_threshold_percent
    }

    /// Picks a placement. Prefers local; offloads only when constrained and
    /// a reachable backend exists, otherwise stays local and accepts
    /// degraded performance.
    #[must_use]
    pub fn decide(
        &self,
        descriptor: &ModelDescriptor,
        snapshot: &ResourceSnapshot,
        remote_reachable: bool,
    ) -> Placement {
        if !self.wants_offload(descriptor, snapshot) {
            debug!(model_id = %descriptor.id, "Local resources sufficient, loading locally");
            return Placement::Local;
        }

        if remote_reachable {
            debug!(
                model_id = %descriptor.id,
                size_bytes = descriptor.size_bytes,
                memory_available = snapshot.memory_available_bytes,
                "Local resources constrained, offloading to remote backend"
            );
            Placement::Remote
        } else {
            warn!(
                model_id = %descriptor.id,
                size_bytes = descriptor.size_bytes,
                memory_available = snapshot.memory_available_bytes,
                "Local resources constrained but no reachable remote backend; loading locally"
            );
            Placement::Local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(memory_available: u64, accelerator: f32) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_percent: 10.0,
            memory_available_bytes: memory_available,
            accelerator_utilization_percent: accelerator,
        }
    }

    fn decider() -> OffloadDecider {
        OffloadDecider::new(OffloadConfig::default())
    }

    #[test]
    fn test_small_model_stays_local() {
        let descriptor = ModelDescriptor::new("m", "file:///m", 1_000);
        let placement = decider().decide(&descriptor, &snapshot(10_000, 0.0), true);
        assert_eq!(placement, Placement::Local);
    }

    #[test]
    fn test_oversized_model_offloads() {
        // 8_000 > 0.7 * 10_000
        let descriptor = ModelDescriptor::new("m", "file:///m", 8_000);
        let placement = decider().decide(&descriptor, &snapshot(10_000, 0.0), true);
        assert_eq!(placement, Placement::Remote);
    }

    #[test]
    fn test_saturated_accelerator_offloads() {
        let descriptor = ModelDescriptor::new("m", "file:///m", 1_000);
        let placement = decider().decide(&descriptor, &snapshot(10_000, 95.0), true);
        assert_eq!(placement, Placement::Remote);
    }

    #[test]
    fn test_constrained_without_backend_falls_back_local() {
        let descriptor = ModelDescriptor::new("m", "file:///m", 8_000);
        let placement = decider().decide(&descriptor, &snapshot(10_000, 0.0), false);
        assert_eq!(placement, Placement::Local);
    }

    #[test]
    fn test_model_within_budget_is_not_constrained() {
        let descriptor = ModelDescriptor::new("m", "file:///m", 6_000);
        assert!(!decider().wants_offload(&descriptor, &snapshot(10_000, 0.0)));

        let descriptor = ModelDescriptor::new("m", "file:///m", 7_100);
        assert!(decider().wants_offload(&descriptor, &snapshot(10_000, 0.0)));
    }
}
