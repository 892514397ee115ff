//! Redelivery of failed non-transactional deliveries

use contracts::{
    Connection, ConsumerSession, ContractError, LocalTransaction, LockedMessage, MessageHandle,
};
use tracing::{debug, instrument};

use super::Cycle;

const PROBE_REDELIVERY: &str = "dispatcher.strategy.redelivery";

/// Failed deliveries waiting to be handed back to the broker.
///
/// The handles are deleted under a fresh uncoordinated transaction that is
/// then rolled back: the broker unlocks them and counts a failed delivery
/// for each, which a plain unlock would not.
#[derive(Debug, Default)]
pub struct Redelivery {
    unsuccessful: Vec<MessageHandle>,
}

impl Redelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[MessageHandle] {
        &self.unsuccessful
    }

    /// Remember a failed delivery unless the broker already resolved it
    pub fn record_failure<S>(&mut self, message: &LockedMessage, cycle: &Cycle<'_, S>) {
        if cycle.process_message(message) {
            self.unsuccessful.push(message.handle.clone());
        }
    }

    /// Hand every pending failure back; always leaves the list empty
    #[instrument(
        name = "redelivery_cleanup",
        skip_all,
        fields(pending = self.unsuccessful.len())
    )]
    pub async fn cleanup<S: ConsumerSession>(&mut self, cycle: &Cycle<'_, S>) {
        if self.unsuccessful.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.unsuccessful);
        match redeliver(cycle.session, &handles).await {
            Ok(()) => {
                debug!(count = handles.len(), "Failed deliveries handed back");
                cycle.metrics.add_unlocked(handles.len() as u64);
            }
            Err(e) => {
                cycle.metrics.inc_acknowledgment_failures();
                cycle.reporter.report(PROBE_REDELIVERY, &e);
            }
        }
    }
}

async fn redeliver<S: ConsumerSession>(
    session: &S,
    handles: &[MessageHandle],
) -> Result<(), ContractError> {
    let transaction = session
        .connection()?
        .create_uncoordinated_transaction(false)
        .await?;
    let deleted = session.delete_set(handles, Some(&transaction.id())).await;
    let rolled_back = transaction.rollback().await;
    deleted.and(rolled_back)
}
