//! Dispatcher configuration contracts shared by the loader and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Reliability;

/// How non-transacted deliveries are acknowledged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgeMode {
    /// Delete each message right after it was delivered
    #[default]
    AutoAcknowledge,
    /// Delete delivered messages in one call at the end of the batch
    DupsOkAcknowledge,
}

/// How transacted deliveries are tied to the ambient transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Enlist the connection's XA resource in the global transaction
    #[default]
    Xa,
    /// Use a local transaction completed through a registered synchronization
    Synchronized,
}

/// Acknowledgment strategy of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    BatchDeletion,
    SingleDeletion,
    Transactional,
    Synchronized,
}

impl StrategyKind {
    /// Pick the strategy for an endpoint.
    ///
    /// Transacted endpoints follow `transaction_mode`; the others follow
    /// `acknowledge_mode`.
    pub fn select(
        acknowledge_mode: AcknowledgeMode,
        transaction_mode: TransactionMode,
        endpoint_transacted: bool,
    ) -> Self {
        if endpoint_transacted {
            match transaction_mode {
                TransactionMode::Xa => StrategyKind::Transactional,
                TransactionMode::Synchronized => StrategyKind::Synchronized,
            }
        } else {
            match acknowledge_mode {
                AcknowledgeMode::AutoAcknowledge => StrategyKind::SingleDeletion,
                AcknowledgeMode::DupsOkAcknowledge => StrategyKind::BatchDeletion,
            }
        }
    }

    pub fn is_transactional(self) -> bool {
        matches!(self, StrategyKind::Transactional | StrategyKind::Synchronized)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::BatchDeletion => "batch-deletion",
            StrategyKind::SingleDeletion => "single-deletion",
            StrategyKind::Transactional => "transactional",
            StrategyKind::Synchronized => "synchronized",
        };
        f.write_str(name)
    }
}

/// Runtime configuration of one dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Treat messages at or below `unrecoverable_reliability` as resolved on receipt
    pub delete_unrecoverable_messages: bool,

    /// Reliability ceiling for auto-deletion
    pub unrecoverable_reliability: Reliability,

    /// Broker-side retry ceiling, carried into message tokens
    pub max_failed_deliveries: u32,

    /// Consecutive failures before a warning is raised (0 = disabled)
    pub sequential_failure_threshold: u32,

    pub acknowledge_mode: AcknowledgeMode,

    pub transaction_mode: TransactionMode,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delete_unrecoverable_messages: false,
            unrecoverable_reliability: Reliability::BestEffortNonPersistent,
            max_failed_deliveries: 5,
            sequential_failure_threshold: 0,
            acknowledge_mode: AcknowledgeMode::AutoAcknowledge,
            transaction_mode: TransactionMode::Xa,
        }
    }
}

impl DispatcherConfig {
    pub fn strategy_kind(&self, endpoint_transacted: bool) -> StrategyKind {
        StrategyKind::select(
            self.acknowledge_mode,
            self.transaction_mode,
            endpoint_transacted,
        )
    }
}
