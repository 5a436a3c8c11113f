//! System-backed resource snapshot provider.

use harbor_abstraction::{ResourceProbe, ResourceSnapshot};
use std::sync::Mutex;
use sysinfo::System;

/// Reads CPU and memory utilization from the operating system via `sysinfo`.
///
/// `sysinfo` has no portable accelerator view, so GPU/NPU utilization comes
/// from an optional injected source and defaults to zero.
pub struct SystemResourceProbe {
    system: Mutex<System>,
    accelerator_source: Option<Box<dyn Fn() -> f32 + Send + Sync>>,
}

impl SystemResourceProbe {
    /// Creates a probe with no accelerator source.
    #[must_use]
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()), accelerator_source: None }
    }

    /// Supplies accelerator utilization readings (0-100) from an external
    /// source such as a vendor management library.
    #[must_use]
    pub fn with_accelerator_source(
        mut self,
        source: impl Fn() -> f32 + Send + Sync + 'static,
    ) -> Self {
        self.accelerator_source = Some(Box::new(source));
        self
    }
}

impl Default for SystemResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemResourceProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        let mut system = self.system.lock().expect("Resource probe lock poisoned");
        system.refresh_memory();
        system.refresh_cpu_usage();

        ResourceSnapshot {
            cpu_percent: system.global_cpu_usage(),
            memory_available_bytes: system.available_memory(),
            accelerator_utilization_percent: self
                .accelerator_source
                .as_ref()
                .map_or(0.0, |source| source()),
        }
    }
}

impl std::fmt::Debug for SystemResourceProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResourceProbe")
            .field("has_accelerator_source", &self.accelerator_source.is_some())
            .finish()
    }
}
