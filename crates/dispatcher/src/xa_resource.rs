//! OutcomeTrackingXaResource - XA resource that remembers how branches ended

use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{ContractError, PrepareVote, TransactionId, XaFlags, XaResource, Xid};
use tracing::{debug, instrument};

use crate::outcomes::TransactionOutcomes;

#[derive(Debug, Default)]
struct Branches {
    /// Started and not yet ended
    active: Option<Xid>,
    /// Most recently started, kept for the outcome query
    last: Option<Xid>,
}

/// Wraps the connection's XA resource for one endpoint.
///
/// The container drives the XA protocol through this wrapper. Commit and
/// rollback outcomes land in the shared `TransactionOutcomes`. The branch
/// between `start` and `end` is the one deliveries run under.
pub struct OutcomeTrackingXaResource {
    delegate: Arc<dyn XaResource>,
    outcomes: TransactionOutcomes,
    branches: Mutex<Branches>,
}

impl OutcomeTrackingXaResource {
    pub fn new(delegate: Arc<dyn XaResource>, outcomes: TransactionOutcomes) -> Self {
        Self {
            delegate,
            outcomes,
            branches: Mutex::new(Branches::default()),
        }
    }

    fn branches(&self) -> MutexGuard<'_, Branches> {
        self.branches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Branch started through this resource and not ended yet
    pub fn current_xid(&self) -> Option<Xid> {
        self.branches().active.clone()
    }

    /// Forget the active branch of an abandoned delivery.
    ///
    /// The last started branch stays available to
    /// `is_transaction_rolled_back`.
    pub fn clear_active(&self) -> Option<Xid> {
        self.branches().active.take()
    }

    /// Whether the last started branch was rolled back.
    ///
    /// Consumes the recorded outcome; a branch with no recorded outcome (or
    /// no branch at all) counts as rolled back.
    pub fn is_transaction_rolled_back(&self) -> bool {
        let last = self.branches().last.clone();
        match last {
            Some(xid) => self.outcomes.take(&TransactionId::Global(xid)),
            None => true,
        }
    }
}

impl std::fmt::Debug for OutcomeTrackingXaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeTrackingXaResource")
            .field("resource_id", &self.delegate.resource_id())
            .field("branches", &*self.branches())
            .finish()
    }
}

impl XaResource for OutcomeTrackingXaResource {
    fn resource_id(&self) -> &str {
        self.delegate.resource_id()
    }

    #[instrument(name = "xa_start", skip(self, xid), fields(xid = %xid))]
    fn start(&self, xid: &Xid, flags: XaFlags) -> Result<(), ContractError> {
        self.delegate.start(xid, flags)?;
        let mut branches = self.branches();
        branches.active = Some(xid.clone());
        branches.last = Some(xid.clone());
        Ok(())
    }

    fn end(&self, xid: &Xid, flags: XaFlags) -> Result<(), ContractError> {
        {
            let mut branches = self.branches();
            if branches.active.as_ref() == Some(xid) {
                branches.active = None;
            }
        }
        self.delegate.end(xid, flags)
    }

    fn prepare(&self, xid: &Xid) -> Result<PrepareVote, ContractError> {
        self.delegate.prepare(xid)
    }

    #[instrument(name = "xa_commit", skip(self, xid), fields(xid = %xid))]
    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), ContractError> {
        let result = self.delegate.commit(xid, one_phase);
        if let Err(e) = &result {
            debug!(error = %e, "Commit failed, recording rollback");
        }
        self.outcomes
            .record(TransactionId::Global(xid.clone()), result.is_err());
        result
    }

    #[instrument(name = "xa_rollback", skip(self, xid), fields(xid = %xid))]
    fn rollback(&self, xid: &Xid) -> Result<(), ContractError> {
        self.outcomes.record(TransactionId::Global(xid.clone()), true);
        self.delegate.rollback(xid)
    }

    fn forget(&self, xid: &Xid) -> Result<(), ContractError> {
        self.delegate.forget(xid)
    }

    fn recover(&self, flags: XaFlags) -> Result<Vec<Xid>, ContractError> {
        self.delegate.recover(flags)
    }

    fn transaction_timeout(&self) -> Result<u32, ContractError> {
        self.delegate.transaction_timeout()
    }

    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool, ContractError> {
        self.delegate.set_transaction_timeout(seconds)
    }

    fn is_same_rm(&self, other: &dyn XaResource) -> Result<bool, ContractError> {
        self.delegate.is_same_rm(other)
    }
}
