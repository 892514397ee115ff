//! 配置校验模块
//!
//! 校验规则：
//! - 字段规则 (validator derive)：destination / messaging_engine / handler_id 非空，
//!   max_failed_deliveries >= 1，max_batch_size 在 1..=10000
//! - target_engine 若给出则非空
//! - unrecoverable_reliability 不可为 assured_persistent
//! - metrics_port 不可为 0
//!
//! 另外给出不阻断加载的警告。

use contracts::{AcknowledgeMode, ContractError, DispatchBlueprint, Reliability};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 校验 DispatchBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_target_engine(blueprint)?;
    validate_reliability(blueprint)?;
    validate_observability(blueprint)?;
    Ok(())
}

/// 字段级规则
fn validate_fields(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let (field, message) = first_error(&errors, "")
            .unwrap_or_else(|| ("<root>".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

/// 按字段名排序后取第一个错误，返回 (路径, 信息)
fn first_error(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in fields {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        let found = match kind {
            ValidationErrorsKind::Field(list) => list.first().map(|e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                (path.clone(), message)
            }),
            ValidationErrorsKind::Struct(nested) => first_error(nested, &path),
            ValidationErrorsKind::List(items) => items
                .iter()
                .find_map(|(idx, nested)| first_error(nested, &format!("{path}[{idx}]"))),
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// 校验 target_engine
fn validate_target_engine(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    if let Some(target) = &blueprint.activation.target_engine {
        if target.trim().is_empty() {
            return Err(ContractError::config_validation(
                "activation.target_engine",
                "target_engine cannot be empty when given",
            ));
        }
    }
    Ok(())
}

/// 校验不可恢复消息阈值
fn validate_reliability(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    let delivery = &blueprint.delivery;
    if delivery.unrecoverable_reliability == Reliability::AssuredPersistent {
        return Err(ContractError::config_validation(
            "delivery.unrecoverable_reliability",
            "assured_persistent messages are always recoverable",
        ));
    }
    Ok(())
}

/// 校验可观测性配置
fn validate_observability(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    if blueprint.observability.metrics_port == Some(0) {
        return Err(ContractError::config_validation(
            "observability.metrics_port",
            "metrics_port must be > 0",
        ));
    }
    Ok(())
}

/// 不阻断加载的配置警告
pub fn warnings(blueprint: &DispatchBlueprint) -> Vec<String> {
    let delivery = &blueprint.delivery;
    let mut warnings = Vec::new();

    if delivery.transacted && delivery.acknowledge_mode == AcknowledgeMode::DupsOkAcknowledge {
        warnings.push(
            "acknowledge_mode is ignored for transacted delivery; \
             messages are deleted under the transaction"
                .to_string(),
        );
    }
    if !delivery.transacted
        && delivery.acknowledge_mode == AcknowledgeMode::DupsOkAcknowledge
        && delivery.max_batch_size == 1
    {
        warnings.push(
            "dups_ok_acknowledge with max_batch_size = 1 deletes one message per call".to_string(),
        );
    }
    if delivery.delete_unrecoverable_messages
        && delivery.unrecoverable_reliability > Reliability::ExpressNonPersistent
    {
        warnings.push(format!(
            "messages up to {} are treated as resolved on receipt and never redelivered",
            delivery.unrecoverable_reliability
        ));
    }
    if delivery.sequential_failure_threshold > 0
        && delivery.sequential_failure_threshold < delivery.max_failed_deliveries
    {
        warnings.push(format!(
            "sequential_failure_threshold ({}) is below max_failed_deliveries ({}); \
             a single poison message will trip it",
            delivery.sequential_failure_threshold, delivery.max_failed_deliveries
        ));
    }
    warnings
}
