//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, DispatchBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<DispatchBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<DispatchBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<DispatchBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AcknowledgeMode, Reliability, TransactionMode};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
handler_id = "OrderListener"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.activation.destination, "orders");
        assert_eq!(bp.activation.session_id, 0);
        assert_eq!(bp.delivery.acknowledge_mode, AcknowledgeMode::AutoAcknowledge);
        assert_eq!(bp.delivery.max_failed_deliveries, 5);
        assert_eq!(bp.delivery.max_batch_size, 1);
        assert_eq!(bp.observability.log_level, "info");
    }

    #[test]
    fn test_parse_toml_full_delivery() {
        let content = r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
target_engine = "ME02"
handler_id = "OrderListener"
session_id = 12

[delivery]
acknowledge_mode = "dups_ok_acknowledge"
transaction_mode = "synchronized"
transacted = true
delete_unrecoverable_messages = true
unrecoverable_reliability = "express_non_persistent"
max_failed_deliveries = 3
sequential_failure_threshold = 10
max_batch_size = 20

[observability]
log_level = "debug"
metrics_port = 9100
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.activation.target_engine(), "ME02");
        assert_eq!(bp.delivery.transaction_mode, TransactionMode::Synchronized);
        assert_eq!(
            bp.delivery.unrecoverable_reliability,
            Reliability::ExpressNonPersistent
        );
        assert_eq!(bp.delivery.max_batch_size, 20);
        assert_eq!(bp.observability.metrics_port, Some(9100));
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "activation": {
                "destination": "orders",
                "messaging_engine": "ME01",
                "handler_id": "OrderListener"
            },
            "delivery": { "acknowledge_mode": "dups_ok_acknowledge" }
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        assert_eq!(
            result.unwrap().delivery.acknowledge_mode,
            AcknowledgeMode::DupsOkAcknowledge
        );
    }

    #[test]
    fn test_parse_unknown_reliability() {
        let content = r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
handler_id = "OrderListener"

[delivery]
unrecoverable_reliability = "sometimes"
"#;
        assert!(matches!(
            parse_toml(content),
            Err(ContractError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
