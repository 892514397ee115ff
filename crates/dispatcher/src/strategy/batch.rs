//! Batch deletion: one bulk delete per cycle

use contracts::{ConsumerSession, LockedMessage, MessageHandle};
use tracing::{debug, instrument};

use super::{Cycle, Redelivery};

const PROBE_BULK_DELETE: &str = "dispatcher.strategy.batch_delete";

/// Collects successful deliveries and deletes them together at cleanup
#[derive(Debug, Default)]
pub struct BatchDeletion {
    successful: Vec<MessageHandle>,
    redelivery: Redelivery,
}

impl BatchDeletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[MessageHandle] {
        &self.successful
    }

    pub fn after_delivery<S>(
        &mut self,
        message: &LockedMessage,
        delivered: bool,
        cycle: &Cycle<'_, S>,
    ) {
        if !delivered {
            self.redelivery.record_failure(message, cycle);
        } else if cycle.process_message(message) {
            self.successful.push(message.handle.clone());
        }
    }

    #[instrument(
        name = "batch_deletion_cleanup",
        skip_all,
        fields(successful = self.successful.len())
    )]
    pub async fn cleanup<S: ConsumerSession>(&mut self, cycle: &Cycle<'_, S>) {
        if !self.successful.is_empty() {
            let handles = std::mem::take(&mut self.successful);
            match cycle.session.delete_set(&handles, None).await {
                Ok(()) => {
                    debug!(count = handles.len(), "Batch deleted");
                    cycle.metrics.add_deleted(handles.len() as u64);
                }
                Err(e) => {
                    cycle.metrics.inc_acknowledgment_failures();
                    cycle.reporter.report(PROBE_BULK_DELETE, &e);
                }
            }
        }
        self.redelivery.cleanup(cycle).await;
    }
}
