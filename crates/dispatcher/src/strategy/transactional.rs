//! XA transactional strategy

use std::sync::Arc;

use contracts::{
    ConsumerSession, LockedMessage, MessageEndpoint, TransactionId, XaResource, ON_MESSAGE,
};
use tracing::{debug, instrument, trace};

use super::Cycle;
use crate::error::{DispatchError, Result};
use crate::xa_resource::OutcomeTrackingXaResource;

/// Deletes each message under the XA branch the container starts around
/// its delivery. The branch's outcome decides whether the delete sticks.
#[derive(Debug)]
pub struct XaTransactional {
    resource: Arc<OutcomeTrackingXaResource>,
}

impl XaTransactional {
    pub fn new(resource: Arc<OutcomeTrackingXaResource>) -> Self {
        Self { resource }
    }

    /// Resource handed to the endpoint factory for enlistment
    pub fn xa_resource(&self) -> Arc<dyn XaResource> {
        Arc::clone(&self.resource) as Arc<dyn XaResource>
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.resource.current_xid().map(TransactionId::Global)
    }

    #[instrument(
        name = "xa_transactional_before_delivery",
        skip_all,
        fields(handle = %message.handle)
    )]
    pub async fn before_delivery<S: ConsumerSession, E: MessageEndpoint>(
        &mut self,
        message: &LockedMessage,
        endpoint: &mut E,
        cycle: &Cycle<'_, S>,
    ) -> Result<()> {
        endpoint.before_delivery(ON_MESSAGE).await?;
        let transaction = self.current_transaction().ok_or_else(|| {
            DispatchError::internal("container did not start an XA branch before delivery")
        })?;
        cycle
            .session
            .delete_message(&message.handle, Some(&transaction))
            .await?;
        trace!(transaction = %transaction, "Delete enlisted in XA branch");
        Ok(())
    }

    pub async fn after_delivery<E: MessageEndpoint>(&mut self, endpoint: &mut E) -> Result<()> {
        endpoint.after_delivery().await?;
        Ok(())
    }

    /// Drop a branch left active by an aborted delivery
    pub fn cleanup(&mut self) {
        if let Some(xid) = self.resource.clear_active() {
            debug!(xid = %xid, "Abandoned XA branch dropped");
        }
    }

    pub fn is_transaction_rolled_back(&self) -> bool {
        self.resource.is_transaction_rolled_back()
    }
}
