//! Error types for the serving subsystem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the model manager to its callers.
///
/// `Clone` on purpose: a load ticket resolves once and its outcome is
/// broadcast to every waiter, so all concurrent callers of the same cold load
/// observe the identical error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServeError {
    /// The catalog has no model with this id.
    #[error("model '{model_id}' not found in catalog")]
    CatalogNotFound {
        /// The requested model id.
        model_id: String,
    },

    /// The catalog itself could not be queried.
    #[error("catalog lookup for '{model_id}' failed: {reason}")]
    CatalogUnavailable {
        /// The requested model id.
        model_id: String,
        /// Underlying catalog error.
        reason: String,
    },

    /// The load attempt exceeded the configured timeout.
    #[error("loading model '{model_id}' timed out after {timeout_secs}s")]
    LoadTimeout {
        /// The requested model id.
        model_id: String,
        /// The configured bound that was exceeded.
        timeout_secs: u64,
    },

    /// Local load failed and no remote fallback was available.
    #[error("local load of model '{model_id}' failed: {reason}")]
    LoadFailedLocal {
        /// The requested model id.
        model_id: String,
        /// Underlying loader error.
        reason: String,
    },

    /// Both the primary load and the fallback path failed.
    #[error("load of model '{model_id}' failed locally ({local_reason}) and remotely ({remote_reason})")]
    LoadFailedRemote {
        /// The requested model id.
        model_id: String,
        /// Error from the local attempt.
        local_reason: String,
        /// Error from the remote attempt.
        remote_reason: String,
    },

    /// The model call itself failed. Does not degrade the entry; the health
    /// monitor decides whether the handle is actually broken.
    #[error("inference on model '{model_id}' failed: {reason}")]
    InferenceFailed {
        /// The model id the call ran against.
        model_id: String,
        /// Underlying model error.
        reason: String,
    },

    /// The resident table is full of busy entries and the capacity policy is
    /// strict.
    #[error("cannot admit model '{model_id}': cache at capacity with all entries busy")]
    CapacityOverrun {
        /// The model id that could not be admitted.
        model_id: String,
    },

    /// The caller-supplied deadline elapsed before the call completed.
    #[error("inference on model '{model_id}' cancelled by caller deadline")]
    CallerCancelled {
        /// The model id the call ran against.
        model_id: String,
    },

    /// The manager is shutting down and no longer accepts work.
    #[error("model manager is shutting down")]
    ShuttingDown,
}

impl ServeError {
    /// The model id this error refers to, if any.
    #[must_use]
    pub fn model_id(&self) -> Option<&str> {
        match self {
            Self::CatalogNotFound { model_id }
            | Self::CatalogUnavailable { model_id, .. }
            | Self::LoadTimeout { model_id, .. }
            | Self::LoadFailedLocal { model_id, .. }
            | Self::LoadFailedRemote { model_id, .. }
            | Self::InferenceFailed { model_id, .. }
            | Self::CapacityOverrun { model_id }
            | Self::CallerCancelled { model_id } => Some(model_id),
            Self::ShuttingDown => None,
        }
    }
}
