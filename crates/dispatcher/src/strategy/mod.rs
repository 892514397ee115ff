//! Acknowledgment strategies
//!
//! Each strategy decides what happens to a message around its delivery:
//! - `SingleDeletion`: delete right after a successful delivery
//! - `BatchDeletion`: delete all successful deliveries at cleanup
//! - `XaTransactional`: delete under the container's XA branch
//! - `SynchronizedTransactional`: delete under a local transaction completed
//!   by the ambient coordinator
//!
//! Failed non-transactional deliveries are redelivered at cleanup.

mod batch;
mod non_transactional;
mod single;
mod synchronized;
mod transactional;

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{
    ConsumerSession, DispatcherConfig, FaultReporter, LockedMessage, MessageEndpoint,
    MessageHandle, Reliability, StrategyKind, TransactionId, XaResource,
};

use crate::error::Result;
use crate::metrics::DispatchMetrics;

pub use batch::BatchDeletion;
pub use non_transactional::Redelivery;
pub use single::SingleDeletion;
pub use synchronized::{OutcomeRecordingSynchronization, SynchronizedTransactional};
pub use transactional::XaTransactional;

/// Dispatcher state a strategy works against during one cycle
pub struct Cycle<'a, S> {
    pub session: &'a S,
    pub config: &'a DispatcherConfig,
    /// Reliability of each message as it was before delivery
    pub reliability: &'a HashMap<MessageHandle, Reliability>,
    pub reporter: &'a dyn FaultReporter,
    pub metrics: &'a DispatchMetrics,
}

impl<S> Cycle<'_, S> {
    /// Whether the broker still expects an acknowledgment for `message`.
    ///
    /// With `delete_unrecoverable_messages`, messages at or below the
    /// unrecoverable reliability were resolved when they were read. The
    /// pre-delivery snapshot wins over the message's current value.
    pub fn process_message(&self, message: &LockedMessage) -> bool {
        if !self.config.delete_unrecoverable_messages {
            return true;
        }
        let reliability = self
            .reliability
            .get(&message.handle)
            .copied()
            .unwrap_or(message.reliability);
        reliability > self.config.unrecoverable_reliability
    }
}

/// Acknowledgment strategy of one dispatcher
pub enum AcknowledgeStrategy<S: ConsumerSession> {
    BatchDeletion(BatchDeletion),
    SingleDeletion(SingleDeletion),
    Transactional(XaTransactional),
    Synchronized(SynchronizedTransactional<S>),
}

impl<S: ConsumerSession> AcknowledgeStrategy<S> {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::BatchDeletion(_) => StrategyKind::BatchDeletion,
            Self::SingleDeletion(_) => StrategyKind::SingleDeletion,
            Self::Transactional(_) => StrategyKind::Transactional,
            Self::Synchronized(_) => StrategyKind::Synchronized,
        }
    }

    /// XA resource the endpoint must be created with
    pub fn endpoint_xa_resource(&self) -> Option<Arc<dyn XaResource>> {
        match self {
            Self::Transactional(strategy) => Some(strategy.xa_resource()),
            _ => None,
        }
    }

    /// Transaction the current delivery runs under
    pub fn current_transaction(&self) -> Option<TransactionId> {
        match self {
            Self::Transactional(strategy) => strategy.current_transaction(),
            Self::Synchronized(strategy) => strategy.current_transaction(),
            _ => None,
        }
    }

    pub async fn before_delivery<E: MessageEndpoint>(
        &mut self,
        message: &LockedMessage,
        endpoint: &mut E,
        cycle: &Cycle<'_, S>,
    ) -> Result<()> {
        match self {
            Self::BatchDeletion(_) | Self::SingleDeletion(_) => Ok(()),
            Self::Transactional(strategy) => {
                strategy.before_delivery(message, endpoint, cycle).await
            }
            Self::Synchronized(strategy) => {
                strategy.before_delivery(message, endpoint, cycle).await
            }
        }
    }

    pub async fn after_delivery<E: MessageEndpoint>(
        &mut self,
        message: &LockedMessage,
        endpoint: &mut E,
        delivered: bool,
        cycle: &Cycle<'_, S>,
    ) -> Result<()> {
        match self {
            Self::BatchDeletion(strategy) => {
                strategy.after_delivery(message, delivered, cycle);
                Ok(())
            }
            Self::SingleDeletion(strategy) => {
                strategy.after_delivery(message, delivered, cycle).await
            }
            Self::Transactional(strategy) => strategy.after_delivery(endpoint).await,
            Self::Synchronized(strategy) => strategy.after_delivery(endpoint).await,
        }
    }

    /// End-of-cycle acknowledgment; failures are reported, never returned
    pub async fn cleanup(&mut self, cycle: &Cycle<'_, S>) {
        match self {
            Self::BatchDeletion(strategy) => strategy.cleanup(cycle).await,
            Self::SingleDeletion(strategy) => strategy.cleanup(cycle).await,
            Self::Transactional(strategy) => strategy.cleanup(),
            Self::Synchronized(strategy) => strategy.cleanup(),
        }
    }

    /// Whether the last transaction was rolled back; consumes the outcome.
    ///
    /// Non-transactional strategies never run a delivery transaction.
    pub fn is_transaction_rolled_back(&self) -> bool {
        match self {
            Self::Transactional(strategy) => strategy.is_transaction_rolled_back(),
            Self::Synchronized(strategy) => strategy.is_transaction_rolled_back(),
            Self::BatchDeletion(_) | Self::SingleDeletion(_) => false,
        }
    }
}
