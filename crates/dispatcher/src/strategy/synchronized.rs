//! Synchronized transactional strategy

use std::sync::Arc;

use contracts::{
    CompletionStatus, Connection, ConsumerSession, LocalTransaction, LockedMessage,
    MessageEndpoint, SessionTransaction, Synchronization, SynchronizationTier,
    TransactionCoordinator, TransactionId, ON_MESSAGE,
};
use tracing::{debug, instrument};

use super::Cycle;
use crate::error::{DispatchError, Result};
use crate::outcomes::TransactionOutcomes;

/// Forwards completion to the transaction's own synchronization and records
/// the outcome.
pub struct OutcomeRecordingSynchronization {
    transaction: TransactionId,
    delegate: Arc<dyn Synchronization>,
    outcomes: TransactionOutcomes,
}

impl OutcomeRecordingSynchronization {
    pub fn new(
        transaction: TransactionId,
        delegate: Arc<dyn Synchronization>,
        outcomes: TransactionOutcomes,
    ) -> Self {
        Self {
            transaction,
            delegate,
            outcomes,
        }
    }
}

impl Synchronization for OutcomeRecordingSynchronization {
    fn before_completion(&self) {
        self.delegate.before_completion();
    }

    fn after_completion(&self, status: CompletionStatus) {
        self.delegate.after_completion(status);
        self.outcomes.record(
            self.transaction.clone(),
            status != CompletionStatus::Committed,
        );
    }
}

/// Deletes each message under a local transaction that the ambient
/// coordinator completes through a registered synchronization.
pub struct SynchronizedTransactional<S: ConsumerSession> {
    coordinator: Arc<dyn TransactionCoordinator>,
    outcomes: TransactionOutcomes,
    transaction: Option<SessionTransaction<S>>,
    last_transaction: Option<TransactionId>,
}

impl<S: ConsumerSession> SynchronizedTransactional<S> {
    pub fn new(
        coordinator: Arc<dyn TransactionCoordinator>,
        outcomes: TransactionOutcomes,
    ) -> Self {
        Self {
            coordinator,
            outcomes,
            transaction: None,
            last_transaction: None,
        }
    }

    /// Transaction of the current delivery, created on first use
    pub async fn get_transaction(&mut self, session: &S) -> Result<&SessionTransaction<S>> {
        let transaction = match self.transaction.take() {
            Some(transaction) => transaction,
            None => {
                session
                    .connection()?
                    .create_uncoordinated_transaction(true)
                    .await?
            }
        };
        Ok(self.transaction.insert(transaction))
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(LocalTransaction::id)
    }

    #[instrument(
        name = "synchronized_before_delivery",
        skip_all,
        fields(handle = %message.handle)
    )]
    pub async fn before_delivery<E: MessageEndpoint>(
        &mut self,
        message: &LockedMessage,
        endpoint: &mut E,
        cycle: &Cycle<'_, S>,
    ) -> Result<()> {
        endpoint.before_delivery(ON_MESSAGE).await?;

        let (id, synchronization) = {
            let transaction = self.get_transaction(cycle.session).await?;
            (transaction.id(), transaction.synchronization())
        };
        let synchronization = synchronization.ok_or_else(|| {
            DispatchError::internal(format!(
                "transaction {id} was created without synchronization support"
            ))
        })?;
        self.coordinator.register_synchronization(
            Arc::new(OutcomeRecordingSynchronization::new(
                id.clone(),
                synchronization,
                self.outcomes.clone(),
            )),
            SynchronizationTier::Outer,
        )?;
        self.last_transaction = Some(id.clone());

        cycle
            .session
            .delete_message(&message.handle, Some(&id))
            .await?;
        debug!(transaction = %id, "Delete enlisted in synchronized transaction");
        Ok(())
    }

    pub async fn after_delivery<E: MessageEndpoint>(&mut self, endpoint: &mut E) -> Result<()> {
        self.transaction = None;
        endpoint.after_delivery().await?;
        Ok(())
    }

    /// Drop the transaction of a delivery that never reached
    /// `after_delivery`
    pub fn cleanup(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            debug!(transaction = %transaction.id(), "Abandoned synchronized transaction dropped");
        }
    }

    /// Outcome of the last transaction; unknown counts as rolled back
    pub fn is_transaction_rolled_back(&self) -> bool {
        self.last_transaction
            .as_ref()
            .is_none_or(|id| self.outcomes.take(id))
    }
}
