//! # Observability
//!
//! 分发引擎的可观测性：Tracing 订阅器 + Prometheus 指标导出。
//!
//! 配置来自蓝图的 `[observability]` 段，日志格式由命令行决定。
//! 端口为 `None` 时不安装导出器，`dispatch_engine_*` 指标只在进程内聚合。
//!
//! ```ignore
//! let config = ObservabilityConfig::from_settings(&blueprint.observability)
//!     .with_log_format(LogFormat::Pretty);
//! observability::init_with_config(config)?;
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use contracts::ObservabilitySettings;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::metrics::{
    describe_dispatch_metrics, record_acknowledgment, record_cycle, record_delivery,
    record_failure_run, record_fault, CycleStats, DispatchStatsAggregator, MetricsFaultReporter,
    MetricsSummary, RunningStats, StatsSummary,
};

/// 可观测性配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// `RUST_LOG` 未设置时使用的过滤器
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::from_settings(&ObservabilitySettings::default())
    }
}

impl ObservabilityConfig {
    /// 从配置文件的 `[observability]` 段构造，日志格式保持默认
    pub fn from_settings(settings: &ObservabilitySettings) -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_port: settings.metrics_port,
            default_log_level: settings.log_level.clone(),
        }
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_log_level))
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 安装全局 tracing 订阅器，并在配置了端口时启动 Prometheus 导出器
///
/// # Errors
/// 订阅器已安装或端口无法监听时返回错误
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let format = config.log_format;
    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let pretty = (format == LogFormat::Pretty).then(|| fmt::layer().pretty());
    let compact = (format == LogFormat::Compact).then(|| fmt::layer().compact());

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json)
        .with(pretty)
        .with(compact)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .with_context(|| format!("Failed to install Prometheus recorder on port {port}"))?;
        describe_dispatch_metrics();
        tracing::info!(port, "Prometheus metrics endpoint initialized");
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_exporter() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.default_log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_from_settings() {
        let settings = ObservabilitySettings {
            log_level: "debug".to_string(),
            metrics_port: Some(9184),
        };
        let config =
            ObservabilityConfig::from_settings(&settings).with_log_format(LogFormat::Compact);
        assert_eq!(
            config,
            ObservabilityConfig {
                log_format: LogFormat::Compact,
                metrics_port: Some(9184),
                default_log_level: "debug".to_string(),
            }
        );
    }
}
