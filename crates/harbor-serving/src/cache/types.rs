//! Core data types for the resident-model table.

use harbor_abstraction::InferenceModel;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Lifecycle state of a resident model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// A load ticket is in flight. The table itself never holds a `Loading`
    /// entry (in-flight loads live in the ticket map and entries are
    /// published `Ready`); the variant completes the serialized state
    /// vocabulary for external consumers.
    Loading,
    /// Loaded and serving.
    Ready,
    /// A health probe failed; scheduled for immediate eviction.
    Degraded,
    /// Being removed; new acquisitions treat the entry as absent.
    Unloading,
}

/// One resident model.
///
/// The handle is exclusively owned by the entry; external components only
/// hold the `Arc` for the duration of a single call. An entry with a non-zero
/// busy count is never removed from the table.
pub struct ModelEntry {
    id: String,
    model: Arc<dyn InferenceModel>,
    state: RwLock<EntryState>,
    loaded_at: Instant,
    last_used: RwLock<Instant>,
    busy: AtomicUsize,
    idle_notify: Notify,
    is_remote: bool,
}

impl ModelEntry {
    /// Creates a READY entry around a freshly loaded handle.
    pub(crate) fn new(id: String, model: Arc<dyn InferenceModel>, is_remote: bool) -> Self {
        let now = Instant::now();
        Self {
            id,
            model,
            state: RwLock::new(EntryState::Ready),
            loaded_at: now,
            last_used: RwLock::new(now),
            busy: AtomicUsize::new(0),
            idle_notify: Notify::new(),
            is_remote,
        }
    }

    /// The model identifier this entry is keyed by.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The loaded handle.
    #[must_use]
    pub fn model(&self) -> &Arc<dyn InferenceModel> {
        &self.model
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EntryState {
        *self.state.read().expect("Entry state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: EntryState) {
        *self.state.write().expect("Entry state lock poisoned") = state;
    }

    /// When the entry was inserted into the table.
    #[must_use]
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// How long the entry has gone without an acquisition or a completed call.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.read().expect("Entry last_used lock poisoned").elapsed()
    }

    /// Refreshes `last_used`. Monotone non-decreasing under concurrent touches.
    pub(crate) fn touch(&self) {
        let now = Instant::now();
        let mut last_used = self.last_used.write().expect("Entry last_used lock poisoned");
        if now > *last_used {
            *last_used = now;
        }
    }

    /// Number of in-flight calls against this entry.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether any call is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy_count() > 0
    }

    /// Whether this handle proxies a remote backend.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Marks one call in flight. Only called while holding the cache lock so
    /// eviction can never observe the entry between retrieval and the busy
    /// increment.
    pub(crate) fn begin_busy(self: &Arc<Self>) -> BusyGuard {
        self.busy.fetch_add(1, Ordering::AcqRel);
        BusyGuard { entry: Arc::clone(self) }
    }

    /// Waits until no call is in flight against this entry.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    /// Serializable snapshot of this entry for `status()`.
    #[must_use]
    pub fn status(&self) -> EntryStatus {
        EntryStatus {
            id: self.id.clone(),
            state: self.state(),
            busy_count: self.busy_count(),
            is_remote: self.is_remote,
            resident_secs: self.loaded_at.elapsed().as_secs(),
            idle_secs: self.idle_for().as_secs(),
        }
    }
}

impl std::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("busy", &self.busy_count())
            .field("is_remote", &self.is_remote)
            .finish()
    }
}

/// RAII marker for one in-flight call.
///
/// Dropping the guard decrements the busy count, refreshes `last_used`, and
/// wakes anyone waiting for the entry to drain. The decrement runs on every
/// exit path, including caller-side cancellation.
pub struct BusyGuard {
    entry: Arc<ModelEntry>,
}

impl BusyGuard {
    /// The entry this guard pins.
    #[must_use]
    pub fn entry(&self) -> &Arc<ModelEntry> {
        &self.entry
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.entry.touch();
        let previous = self.entry.busy.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.entry.idle_notify.notify_waiters();
        }
    }
}

impl std::fmt::Debug for BusyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyGuard").field("entry", &self.entry).finish()
    }
}

/// Serializable view of one resident entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    /// Model identifier.
    pub id: String,
    /// Lifecycle state.
    pub state: EntryState,
    /// In-flight calls.
    pub busy_count: usize,
    /// Whether the handle is a remote proxy.
    pub is_remote: bool,
    /// Seconds since the entry was inserted.
    pub resident_secs: u64,
    /// Seconds since the entry was last used.
    pub idle_secs: u64,
}

/// Cache counters for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Acquisitions answered from the table.
    pub total_hits: u64,
    /// Acquisitions that started a load.
    pub total_misses: u64,
    /// Entries removed by capacity, idle, health, or explicit unload.
    pub total_evictions: u64,
    /// Inserts that exceeded capacity because every entry was busy.
    pub capacity_overruns: u64,
    /// Current number of resident models.
    pub resident_models: usize,
}
