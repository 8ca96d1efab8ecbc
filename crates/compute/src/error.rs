use strata_core::Handle;
use strata_storage::StorageError;

use crate::model::ModelError;

/// Error type for dispatcher and scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// Cooperative cancellation. Not a failure.
    #[error("computation cancelled")]
    Cancelled,
    #[error("element resolution failed: {0}")]
    Unresolved(#[from] ModelError),
    /// `handle` was requested again while its own computation was running
    /// on the same thread.
    #[error("element is its own descendant: {0}")]
    Cycle(Handle),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ComputeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComputeError::Cancelled)
    }
}
