//! DispatchBlueprint - Config Loader output
//!
//! Describes one endpoint activation: where messages come from, who receives
//! them and how deliveries are acknowledged.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AcknowledgeMode, DispatcherConfig, Reliability, StrategyKind, TransactionMode};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Endpoint activation
    #[validate(nested)]
    pub activation: ActivationConfig,

    /// Delivery and acknowledgment policy
    #[serde(default)]
    #[validate(nested)]
    pub delivery: DeliveryConfig,

    /// Logging and metrics export
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// Endpoint activation: source, target and session identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ActivationConfig {
    /// Destination consumed from
    #[validate(length(min = 1, message = "destination cannot be empty"))]
    pub destination: String,

    /// Messaging engine the consumer session is attached to
    #[validate(length(min = 1, message = "messaging_engine cannot be empty"))]
    pub messaging_engine: String,

    /// Engine that executes deliveries (defaults to `messaging_engine`)
    #[serde(default)]
    pub target_engine: Option<String>,

    /// Message handler (endpoint) receiving the messages
    #[validate(length(min = 1, message = "handler_id cannot be empty"))]
    pub handler_id: String,

    /// Consumer session identifier
    #[serde(default)]
    pub session_id: u64,
}

impl ActivationConfig {
    pub fn target_engine(&self) -> &str {
        self.target_engine
            .as_deref()
            .unwrap_or(&self.messaging_engine)
    }
}

/// Delivery policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeliveryConfig {
    /// Acknowledgment of non-transacted deliveries
    #[serde(default)]
    pub acknowledge_mode: AcknowledgeMode,

    /// Acknowledgment of transacted deliveries
    #[serde(default)]
    pub transaction_mode: TransactionMode,

    /// Whether the endpoint's delivery method runs in a transaction
    #[serde(default)]
    pub transacted: bool,

    /// Treat unrecoverable messages as resolved on receipt
    #[serde(default)]
    pub delete_unrecoverable_messages: bool,

    /// Reliability ceiling for unrecoverable messages
    #[serde(default)]
    pub unrecoverable_reliability: Reliability,

    /// Broker retry ceiling
    #[serde(default = "default_max_failed_deliveries")]
    #[validate(range(min = 1, message = "max_failed_deliveries must be >= 1"))]
    pub max_failed_deliveries: u32,

    /// Consecutive failures that raise a warning (0 = disabled)
    #[serde(default)]
    pub sequential_failure_threshold: u32,

    /// Messages locked per dispatch cycle
    #[serde(default = "default_max_batch_size")]
    #[validate(range(min = 1, max = 10000, message = "max_batch_size must be in 1..=10000"))]
    pub max_batch_size: usize,
}

/// Logging and metrics export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port (None = disabled)
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_failed_deliveries() -> u32 {
    5
}

fn default_max_batch_size() -> usize {
    1
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            acknowledge_mode: AcknowledgeMode::default(),
            transaction_mode: TransactionMode::default(),
            transacted: false,
            delete_unrecoverable_messages: false,
            unrecoverable_reliability: Reliability::default(),
            max_failed_deliveries: default_max_failed_deliveries(),
            sequential_failure_threshold: 0,
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl DispatchBlueprint {
    /// Build the runtime dispatcher configuration
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        let delivery = &self.delivery;
        DispatcherConfig {
            delete_unrecoverable_messages: delivery.delete_unrecoverable_messages,
            unrecoverable_reliability: delivery.unrecoverable_reliability,
            max_failed_deliveries: delivery.max_failed_deliveries,
            sequential_failure_threshold: delivery.sequential_failure_threshold,
            acknowledge_mode: delivery.acknowledge_mode,
            transaction_mode: delivery.transaction_mode,
        }
    }

    /// Strategy this blueprint resolves to
    pub fn strategy_kind(&self) -> StrategyKind {
        StrategyKind::select(
            self.delivery.acknowledge_mode,
            self.delivery.transaction_mode,
            self.delivery.transacted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blueprint() -> DispatchBlueprint {
        DispatchBlueprint {
            version: ConfigVersion::V1,
            activation: ActivationConfig {
                destination: "orders".into(),
                messaging_engine: "ME01".into(),
                target_engine: None,
                handler_id: "OrderListener".into(),
                session_id: 7,
            },
            delivery: DeliveryConfig::default(),
            observability: ObservabilitySettings::default(),
        }
    }

    #[test]
    fn dispatcher_config_defaults() {
        let config = sample_blueprint().to_dispatcher_config();
        assert!(!config.delete_unrecoverable_messages);
        assert_eq!(
            config.unrecoverable_reliability,
            Reliability::BestEffortNonPersistent
        );
        assert_eq!(config.max_failed_deliveries, 5);
        assert_eq!(config.sequential_failure_threshold, 0);
    }

    #[test]
    fn target_engine_falls_back_to_source() {
        let mut blueprint = sample_blueprint();
        assert_eq!(blueprint.activation.target_engine(), "ME01");
        blueprint.activation.target_engine = Some("ME02".into());
        assert_eq!(blueprint.activation.target_engine(), "ME02");
    }

    #[test]
    fn strategy_follows_delivery_settings() {
        let mut blueprint = sample_blueprint();
        assert_eq!(blueprint.strategy_kind(), StrategyKind::SingleDeletion);
        blueprint.delivery.transacted = true;
        blueprint.delivery.transaction_mode = TransactionMode::Synchronized;
        assert_eq!(blueprint.strategy_kind(), StrategyKind::Synchronized);
    }

    #[test]
    fn field_rules_reject_empty_destination() {
        let mut blueprint = sample_blueprint();
        blueprint.activation.destination = String::new();
        assert!(blueprint.validate().is_err());
    }

    #[test]
    fn field_rules_reject_zero_batch_size() {
        let mut blueprint = sample_blueprint();
        blueprint.delivery.max_batch_size = 0;
        assert!(blueprint.validate().is_err());
    }
}
