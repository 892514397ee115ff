//! TransactionOutcomes - shared record of how transactions completed

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::TransactionId;
use tracing::trace;

/// Shared map of transaction id to "was rolled back".
///
/// Cloning yields another handle onto the same map. Every XA wrapper and
/// recording synchronization of a dispatcher holds one; entries are written
/// on completion and removed by the first `take`.
#[derive(Debug, Clone, Default)]
pub struct TransactionOutcomes {
    inner: Arc<Mutex<HashMap<TransactionId, bool>>>,
}

impl TransactionOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransactionId, bool>> {
        // Entries are plain bools, a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the outcome of a completed transaction
    pub fn record(&self, id: TransactionId, rolled_back: bool) {
        trace!(transaction = %id, rolled_back, "Transaction outcome recorded");
        self.lock().insert(id, rolled_back);
    }

    /// Remove and return the outcome for `id`.
    ///
    /// Unknown transactions count as rolled back.
    pub fn take(&self, id: &TransactionId) -> bool {
        self.lock().remove(id).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
