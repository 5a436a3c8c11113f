//! ModelCache implementation: LRU capacity eviction, busy-aware removal, and
//! single-flight load tickets.

use harbor_abstraction::InferenceModel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CapacityPolicy;
use crate::error::ServeError;

use super::types::{BusyGuard, CacheStats, EntryState, EntryStatus, ModelEntry};

/// The shared outcome of one load ticket. Every waiter observes the same
/// value, success or error.
pub type LoadOutcome = Result<Arc<ModelEntry>, ServeError>;

/// Result of an atomic "check entry / check ticket / create ticket" step.
pub enum AcquireStep {
    /// A READY entry was found; `guard` is set when the caller asked to mark
    /// the entry busy.
    Ready {
        /// The resident entry, already touched.
        entry: Arc<ModelEntry>,
        /// Busy marker created under the cache lock.
        guard: Option<BusyGuard>,
    },
    /// A load for this id is already in flight; await the shared outcome.
    Wait(broadcast::Receiver<LoadOutcome>),
    /// The caller won the ticket and must perform the load.
    Load(LoadPermit),
}

/// Result of attempting an explicit removal.
pub enum RemoveOutcome {
    /// The entry was removed and its handle released.
    Removed,
    /// No entry for this id.
    Absent,
    /// Calls are in flight. The entry is now hidden from new acquisitions;
    /// wait for it to drain, then remove it with [`ModelCache::remove_exact`].
    Busy(Arc<ModelEntry>),
}

/// The right to perform the single physical load for one model id.
///
/// Exactly one permit exists per in-flight id. Dropping the permit without
/// resolving it fails the ticket so waiters are never stranded.
pub struct LoadPermit {
    cache: Arc<ModelCache>,
    id: String,
    resolved: bool,
}

impl LoadPermit {
    /// The model id this permit covers.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.id
    }

    /// Publishes the loaded handle as a READY entry and resolves the ticket.
    ///
    /// # Errors
    /// Returns `ServeError::CapacityOverrun` under the strict capacity policy
    /// when the table is full of busy entries; the ticket is resolved with
    /// the same error.
    pub fn publish(
        mut self,
        model: Arc<dyn InferenceModel>,
        is_remote: bool,
        mark_busy: bool,
    ) -> Result<(Arc<ModelEntry>, Option<BusyGuard>), ServeError> {
        self.resolved = true;
        self.cache.publish(&self.id, model, is_remote, mark_busy)
    }

    /// Resolves the ticket with an error, propagated to all waiters.
    pub fn fail(mut self, err: ServeError) {
        self.resolved = true;
        self.cache.fail_ticket(&self.id, err);
    }
}

impl Drop for LoadPermit {
    fn drop(&mut self) {
        if !self.resolved {
            // Leader future was dropped mid-load. Waiters observe the
            // cancellation instead of hanging on a dead ticket.
            self.cache
                .fail_ticket(&self.id, ServeError::CallerCancelled { model_id: self.id.clone() });
        }
    }
}

struct CacheState {
    entries: HashMap<String, Arc<ModelEntry>>,
    tickets: HashMap<String, broadcast::Sender<LoadOutcome>>,
    stats: CacheStats,
}

/// Bounded, thread-safe table of resident models.
///
/// A single mutex guards the entries map and the ticket map as one unit, so
/// an entry can never be evicted between being published and a waiter
/// retrieving it, and no two callers can both win the load for one id.
pub struct ModelCache {
    capacity: usize,
    policy: CapacityPolicy,
    state: Mutex<CacheState>,
}

impl ModelCache {
    /// Creates an empty cache with the given capacity and overrun policy.
    #[must_use]
    pub fn new(capacity: usize, policy: CapacityPolicy) -> Self {
        Self {
            capacity,
            policy,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tickets: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("Cache lock poisoned")
    }

    /// Atomically resolves an acquisition attempt: a READY entry, an
    /// in-flight ticket to wait on, or a permit to load.
    pub fn begin_acquire(self: &Arc<Self>, id: &str, mark_busy: bool) -> AcquireStep {
        let mut state = self.lock();

        // Degraded and Unloading entries are invisible to new acquisitions.
        let ready = state
            .entries
            .get(id)
            .filter(|entry| entry.state() == EntryState::Ready)
            .map(Arc::clone);

        if let Some(entry) = ready {
            state.stats.total_hits += 1;
            entry.touch();
            let guard = mark_busy.then(|| entry.begin_busy());
            debug!(model_id = %id, "Cache hit");
            return AcquireStep::Ready { entry, guard };
        }

        if let Some(tx) = state.tickets.get(id) {
            debug!(model_id = %id, "Load already in flight, attaching to ticket");
            return AcquireStep::Wait(tx.subscribe());
        }

        let (tx, _) = broadcast::channel(1);
        state.tickets.insert(id.to_string(), tx);
        state.stats.total_misses += 1;
        debug!(model_id = %id, "Cache miss, created load ticket");
        AcquireStep::Load(LoadPermit {
            cache: Arc::clone(self),
            id: id.to_string(),
            resolved: false,
        })
    }

    /// Re-retrieves an entry a waiter received from a resolved ticket.
    ///
    /// Returns `None` when the entry has since been evicted or replaced; the
    /// caller should restart its acquisition.
    pub fn checkout(
        &self,
        id: &str,
        expected: &Arc<ModelEntry>,
        mark_busy: bool,
    ) -> Option<(Arc<ModelEntry>, Option<BusyGuard>)> {
        let state = self.lock();
        let entry = state.entries.get(id)?;
        if !Arc::ptr_eq(entry, expected) || entry.state() != EntryState::Ready {
            return None;
        }
        let entry = Arc::clone(entry);
        entry.touch();
        let guard = mark_busy.then(|| entry.begin_busy());
        Some((entry, guard))
    }

    fn publish(
        &self,
        id: &str,
        model: Arc<dyn InferenceModel>,
        is_remote: bool,
        mark_busy: bool,
    ) -> Result<(Arc<ModelEntry>, Option<BusyGuard>), ServeError> {
        let mut state = self.lock();

        // Replacing an existing slot (e.g. a degraded entry being reloaded)
        // does not grow the table, so it needs no room made.
        while !state.entries.contains_key(id) && state.entries.len() >= self.capacity {
            let victim_id = state
                .entries
                .values()
                .filter(|entry| !entry.is_busy() && entry.state() != EntryState::Unloading)
                .max_by_key(|entry| entry.idle_for())
                .map(|entry| entry.id().to_string());

            if let Some(victim_id) = victim_id {
                if let Some(victim) = state.entries.remove(&victim_id) {
                    victim.set_state(EntryState::Unloading);
                    state.stats.total_evictions += 1;
                    info!(
                        model_id = %victim_id,
                        "Evicted least-recently-used model to make room"
                    );
                }
            } else {
                match self.policy {
                    CapacityPolicy::Overrun => {
                        // Soft target: a temporary overrun beats blocking or
                        // killing in-flight work. The table shrinks back on
                        // the next eviction pass.
                        state.stats.capacity_overruns += 1;
                        warn!(
                            model_id = %id,
                            capacity = self.capacity,
                            resident = state.entries.len(),
                            "All resident models busy; admitting over capacity"
                        );
                        break;
                    }
                    CapacityPolicy::Strict => {
                        let err = ServeError::CapacityOverrun { model_id: id.to_string() };
                        Self::resolve_ticket(&mut state, id, &Err(err.clone()));
                        return Err(err);
                    }
                }
            }
        }

        let entry = Arc::new(ModelEntry::new(id.to_string(), model, is_remote));
        let guard = mark_busy.then(|| entry.begin_busy());
        state.entries.insert(id.to_string(), Arc::clone(&entry));
        state.stats.resident_models = state.entries.len();
        Self::resolve_ticket(&mut state, id, &Ok(Arc::clone(&entry)));
        info!(model_id = %id, is_remote, "Model resident and ready");
        Ok((entry, guard))
    }

    fn fail_ticket(&self, id: &str, err: ServeError) {
        let mut state = self.lock();
        Self::resolve_ticket(&mut state, id, &Err(err));
    }

    fn resolve_ticket(state: &mut CacheState, id: &str, outcome: &LoadOutcome) {
        if let Some(tx) = state.tickets.remove(id) {
            // No receivers is fine: the leader may be the only caller.
            let _ = tx.send(outcome.clone());
        }
    }

    /// Removes every non-busy READY entry whose idle time has reached the
    /// timeout. Returns the evicted ids.
    pub fn evict_idle(&self, idle_timeout: Duration) -> Vec<String> {
        let mut state = self.lock();

        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|entry| {
                !entry.is_busy()
                    && entry.state() == EntryState::Ready
                    && entry.idle_for() >= idle_timeout
            })
            .map(|entry| entry.id().to_string())
            .collect();

        for id in &expired {
            if let Some(entry) = state.entries.remove(id) {
                entry.set_state(EntryState::Unloading);
                state.stats.total_evictions += 1;
                info!(model_id = %id, "Evicted idle model");
            }
        }
        state.stats.resident_models = state.entries.len();
        expired
    }

    /// Marks an entry DEGRADED after a failed probe and evicts it when no
    /// call is in flight. Returns `true` when the entry was removed; a busy
    /// entry stays resident (degraded) and is retried on the next cycle.
    pub fn evict_unhealthy(&self, id: &str, expected: &Arc<ModelEntry>) -> bool {
        let mut state = self.lock();

        let present = state
            .entries
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry, expected));
        if !present {
            return false;
        }

        expected.set_state(EntryState::Degraded);
        if expected.is_busy() {
            debug!(model_id = %id, "Unhealthy model busy, eviction deferred");
            return false;
        }

        expected.set_state(EntryState::Unloading);
        state.entries.remove(id);
        state.stats.total_evictions += 1;
        state.stats.resident_models = state.entries.len();
        warn!(model_id = %id, "Evicted unhealthy model");
        true
    }

    /// Attempts an explicit removal regardless of the idle timer.
    pub fn try_remove(&self, id: &str) -> RemoveOutcome {
        let mut state = self.lock();

        let Some(entry) = state.entries.get(id).map(Arc::clone) else {
            return RemoveOutcome::Absent;
        };

        // Hide the entry from new acquisitions either way.
        entry.set_state(EntryState::Unloading);
        if entry.is_busy() {
            return RemoveOutcome::Busy(entry);
        }

        state.entries.remove(id);
        state.stats.total_evictions += 1;
        state.stats.resident_models = state.entries.len();
        info!(model_id = %id, "Unloaded model");
        RemoveOutcome::Removed
    }

    /// Removes an entry only if the slot still holds this exact entry.
    /// Used after draining a busy entry; a concurrent reload may have
    /// replaced the slot, in which case the old entry is already gone.
    pub fn remove_exact(&self, id: &str, expected: &Arc<ModelEntry>) -> bool {
        let mut state = self.lock();

        let matches = state
            .entries
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry, expected));
        if !matches {
            return false;
        }

        state.entries.remove(id);
        state.stats.total_evictions += 1;
        state.stats.resident_models = state.entries.len();
        info!(model_id = %id, "Unloaded model after busy drain");
        true
    }

    /// Current entries, in no particular order.
    #[must_use]
    pub fn entries_snapshot(&self) -> Vec<Arc<ModelEntry>> {
        self.lock().entries.values().map(Arc::clone).collect()
    }

    /// Ids with a load ticket currently in flight.
    #[must_use]
    pub fn loading_ids(&self) -> Vec<String> {
        self.lock().tickets.keys().cloned().collect()
    }

    /// Number of resident models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.resident_models = state.entries.len();
        stats
    }

    /// Serializable per-entry views, sorted by id.
    #[must_use]
    pub fn status_entries(&self) -> Vec<EntryStatus> {
        let mut entries: Vec<EntryStatus> =
            self.lock().entries.values().map(|entry| entry.status()).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("resident", &self.len())
            .finish()
    }
}
