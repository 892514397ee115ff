//! Single deletion: delete each message right after its delivery

use contracts::{ConsumerSession, LockedMessage};
use tracing::trace;

use super::{Cycle, Redelivery};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct SingleDeletion {
    redelivery: Redelivery,
}

impl SingleDeletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes a successful delivery outside any transaction.
    ///
    /// # Errors
    /// A failed delete is returned and ends the cycle.
    pub async fn after_delivery<S: ConsumerSession>(
        &mut self,
        message: &LockedMessage,
        delivered: bool,
        cycle: &Cycle<'_, S>,
    ) -> Result<()> {
        if !delivered {
            self.redelivery.record_failure(message, cycle);
            return Ok(());
        }
        if cycle.process_message(message) {
            cycle.session.delete_message(&message.handle, None).await?;
            cycle.metrics.add_deleted(1);
            trace!(handle = %message.handle, "Message deleted");
        }
        Ok(())
    }

    pub async fn cleanup<S: ConsumerSession>(&mut self, cycle: &Cycle<'_, S>) {
        self.redelivery.cleanup(cycle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BrokerCall, InMemoryBroker};
    use crate::strategy::test_support::CycleFixture;
    use contracts::{DispatcherConfig, Reliability};

    #[tokio::test]
    async fn test_deletes_each_success_immediately() {
        let broker = InMemoryBroker::new("ME01");
        let fx = CycleFixture::new(broker.session(1, "orders"), DispatcherConfig::default());
        let mut batch = broker.lock_messages(3, Reliability::ReliablePersistent);
        let mut strategy = SingleDeletion::new();
        let mut seen = 0;
        while let Some(message) = batch.next() {
            strategy.after_delivery(message, true, &fx.cycle()).await.unwrap();
            seen += 1;
            assert_eq!(broker.deleted().len(), seen);
        }
        let calls = broker.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| matches!(
            c,
            BrokerCall::DeleteSet { handles, transaction: None } if handles.len() == 1
        )));
    }

    #[tokio::test]
    async fn test_delete_failure_propagates() {
        let broker = InMemoryBroker::new("ME01");
        broker.set_fail_deletes(true);
        let fx = CycleFixture::new(broker.session(1, "orders"), DispatcherConfig::default());
        let mut batch = broker.lock_messages(1, Reliability::ReliablePersistent);
        let mut strategy = SingleDeletion::new();
        let result = strategy
            .after_delivery(batch.next().unwrap(), true, &fx.cycle())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unrecoverable_success_is_not_deleted() {
        let broker = InMemoryBroker::new("ME01");
        let config = DispatcherConfig {
            delete_unrecoverable_messages: true,
            ..DispatcherConfig::default()
        };
        let fx = CycleFixture::new(broker.session(1, "orders"), config);
        let mut batch = broker.lock_messages(1, Reliability::BestEffortNonPersistent);
        let mut strategy = SingleDeletion::new();
        strategy
            .after_delivery(batch.next().unwrap(), true, &fx.cycle())
            .await
            .unwrap();
        assert!(broker.calls().is_empty());
    }
}
