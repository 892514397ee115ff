//! # Dispatch Engine CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 配置信息展示
//! - 基于内存 broker 的分发模拟

mod cli;
mod commands;
mod error;

use anyhow::Result;
use clap::Parser;
use config_loader::ConfigLoader;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_simulate, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on CLI options
    init_logging(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Dispatch Engine CLI starting"
    );

    let result = match &cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
        Commands::Simulate(args) => run_simulate(args).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging and metrics export.
///
/// The `[observability]` section of the configuration gives the defaults
/// when the file loads; CLI flags win over it. Only `simulate` exports
/// metrics.
fn init_logging(cli: &Cli) -> Result<()> {
    let settings = ConfigLoader::load_from_path(cli.command.config_path())
        .map(|blueprint| blueprint.observability)
        .unwrap_or_default();

    let mut config =
        ObservabilityConfig::from_settings(&settings).with_log_format(cli.log_format.into());

    if cli.quiet {
        config.default_log_level = "warn".to_string();
    } else if cli.verbose > 0 {
        config.default_log_level = if cli.verbose == 1 { "debug" } else { "trace" }.to_string();
    }

    config.metrics_port = match &cli.command {
        Commands::Simulate(args) => args.metrics_port.or(config.metrics_port),
        _ => None,
    };

    observability::init_with_config(config)
}
