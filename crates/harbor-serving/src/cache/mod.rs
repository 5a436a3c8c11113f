//! Bounded, thread-safe table of resident models.
//!
//! Owns the eviction policy (capacity + idle timeout + health), the entry
//! state machine, and the single-flight load tickets. The entries map and the
//! ticket map live under one lock so that "check cache / create ticket /
//! publish entry" is a single atomic step.

mod cache;
mod types;

pub use cache::{AcquireStep, LoadOutcome, LoadPermit, ModelCache, RemoveOutcome};
pub use types::{BusyGuard, CacheStats, EntryState, EntryStatus, ModelEntry};
