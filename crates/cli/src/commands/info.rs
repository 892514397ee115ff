//! `info` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, DispatchBlueprint};
use contracts::StrategyKind;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    activation: ActivationInfo,
    delivery: DeliveryInfo,
    observability: ObservabilityInfo,
}

#[derive(Serialize)]
struct ActivationInfo {
    destination: String,
    messaging_engine: String,
    target_engine: String,
    remote: bool,
    handler_id: String,
    session_id: u64,
}

#[derive(Serialize)]
struct DeliveryInfo {
    strategy: StrategyKind,
    transacted: bool,
    max_batch_size: usize,
    max_failed_deliveries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequential_failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unrecoverable_reliability: Option<String>,
}

#[derive(Serialize)]
struct ObservabilityInfo {
    log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_port: Option<u16>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&blueprint);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(blueprint: &DispatchBlueprint) -> ConfigInfo {
    let activation = &blueprint.activation;
    let delivery = &blueprint.delivery;
    let target_engine = activation.target_engine().to_string();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        activation: ActivationInfo {
            destination: activation.destination.clone(),
            messaging_engine: activation.messaging_engine.clone(),
            remote: target_engine != activation.messaging_engine,
            target_engine,
            handler_id: activation.handler_id.clone(),
            session_id: activation.session_id,
        },
        delivery: DeliveryInfo {
            strategy: blueprint.strategy_kind(),
            transacted: delivery.transacted,
            max_batch_size: delivery.max_batch_size,
            max_failed_deliveries: delivery.max_failed_deliveries,
            sequential_failure_threshold: (delivery.sequential_failure_threshold > 0)
                .then_some(delivery.sequential_failure_threshold),
            unrecoverable_reliability: delivery
                .delete_unrecoverable_messages
                .then(|| delivery.unrecoverable_reliability.to_string()),
        },
        observability: ObservabilityInfo {
            log_level: blueprint.observability.log_level.clone(),
            metrics_port: blueprint.observability.metrics_port,
        },
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Dispatch Engine Configuration                  ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let activation = &info.activation;
    println!("📥 Activation");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Destination: {}", activation.destination);
    println!("   ├─ Messaging engine: {}", activation.messaging_engine);
    if activation.remote {
        println!("   ├─ Target engine: {} (remote)", activation.target_engine);
    }
    println!("   ├─ Handler: {}", activation.handler_id);
    println!("   └─ Session: {}", activation.session_id);

    let delivery = &info.delivery;
    println!("\n⚙️  Delivery");
    println!("   ├─ Strategy: {}", delivery.strategy);
    println!("   ├─ Transacted: {}", delivery.transacted);
    println!("   ├─ Max batch size: {}", delivery.max_batch_size);
    if let Some(threshold) = delivery.sequential_failure_threshold {
        println!("   ├─ Sequential failure threshold: {}", threshold);
    }
    match &delivery.unrecoverable_reliability {
        Some(reliability) => {
            println!("   ├─ Max failed deliveries: {}", delivery.max_failed_deliveries);
            println!("   └─ Delete unrecoverable up to: {}", reliability);
        }
        None => {
            println!("   └─ Max failed deliveries: {}", delivery.max_failed_deliveries);
        }
    }

    println!("\n📈 Observability");
    println!("   ├─ Log level: {}", info.observability.log_level);
    match info.observability.metrics_port {
        Some(port) => println!("   └─ Metrics port: {}", port),
        None => println!("   └─ Metrics: disabled"),
    }

    println!();
}
