//! Dispatch 指标收集模块
//!
//! 记录分发周期、投递结果与确认操作，并在内存中聚合统计。

use std::collections::BTreeMap;

use contracts::{FaultReporter, StrategyKind};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use serde::Serialize;

/// 单个分发周期的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CycleStats {
    /// 本周期锁定的消息数
    pub batch_size: usize,
    /// 成功投递数
    pub delivered: u64,
    /// 失败投递数
    pub failed: u64,
    /// 本周期删除的消息数
    pub deleted: u64,
    /// 本周期解锁 (重投) 的消息数
    pub unlocked: u64,
    /// 周期耗时 (毫秒)
    pub duration_ms: f64,
    /// 周期以致命信号结束
    pub fatal: bool,
}

/// 向已安装的 recorder 注册 `dispatch_engine_*` 指标的说明
pub fn describe_dispatch_metrics() {
    describe_counter!("dispatch_engine_cycles_total", "Dispatch cycles run, by strategy");
    describe_histogram!(
        "dispatch_engine_batch_size",
        Unit::Count,
        "Messages locked per dispatch cycle"
    );
    describe_histogram!(
        "dispatch_engine_cycle_duration_ms",
        Unit::Milliseconds,
        "Wall time of one dispatch cycle"
    );
    describe_counter!(
        "dispatch_engine_fatal_cycles_total",
        "Cycles ended by a listener's fatal signal"
    );
    describe_counter!(
        "dispatch_engine_deliveries_total",
        "Listener invocations, by strategy and status"
    );
    describe_counter!(
        "dispatch_engine_acknowledged_messages_total",
        "Messages deleted or unlocked after delivery"
    );
    describe_gauge!(
        "dispatch_engine_consecutive_failures",
        "Current run of failed deliveries"
    );
    describe_counter!("dispatch_engine_faults_total", "Swallowed failures, by probe point");
}

/// 记录一个分发周期
///
/// # Example
///
/// ```ignore
/// use observability::metrics::{record_cycle, CycleStats};
///
/// let started = std::time::Instant::now();
/// dispatcher.dispatch(&mut batch).await?;
/// record_cycle(dispatcher.strategy_kind(), &CycleStats {
///     batch_size,
///     duration_ms: started.elapsed().as_secs_f64() * 1000.0,
///     ..Default::default()
/// });
/// ```
pub fn record_cycle(strategy: StrategyKind, stats: &CycleStats) {
    let strategy = strategy.to_string();

    counter!("dispatch_engine_cycles_total", "strategy" => strategy.clone()).increment(1);
    histogram!("dispatch_engine_batch_size", "strategy" => strategy.clone())
        .record(stats.batch_size as f64);
    histogram!("dispatch_engine_cycle_duration_ms", "strategy" => strategy.clone())
        .record(stats.duration_ms);

    if stats.delivered > 0 {
        record_delivery(&strategy, true, stats.delivered);
    }
    if stats.failed > 0 {
        record_delivery(&strategy, false, stats.failed);
    }
    if stats.deleted > 0 {
        record_acknowledgment("delete", stats.deleted);
    }
    if stats.unlocked > 0 {
        record_acknowledgment("unlock", stats.unlocked);
    }
    if stats.fatal {
        counter!("dispatch_engine_fatal_cycles_total", "strategy" => strategy).increment(1);
    }
}

/// 记录投递结果
pub fn record_delivery(strategy: &str, success: bool, count: u64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "dispatch_engine_deliveries_total",
        "strategy" => strategy.to_string(),
        "status" => status.to_string()
    )
    .increment(count);
}

/// 记录确认操作 (delete / unlock)
pub fn record_acknowledgment(action: &str, count: u64) {
    counter!(
        "dispatch_engine_acknowledged_messages_total",
        "action" => action.to_string()
    )
    .increment(count);
}

/// 记录当前连续失败次数
pub fn record_failure_run(length: u64) {
    gauge!("dispatch_engine_consecutive_failures").set(length as f64);
}

/// 记录被吞掉的故障
pub fn record_fault(probe: &'static str) {
    counter!("dispatch_engine_faults_total", "probe" => probe).increment(1);
}

/// 故障上报器：计数并写日志
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFaultReporter;

impl FaultReporter for MetricsFaultReporter {
    fn report(&self, probe: &'static str, fault: &(dyn std::error::Error + 'static)) {
        record_fault(probe);
        tracing::error!(probe, error = %fault, "Fault reported");
    }
}

/// 分发指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DispatchStatsAggregator {
    /// 总周期数
    pub total_cycles: u64,

    /// 锁定消息总数
    pub total_messages: u64,

    /// 成功投递总数
    pub total_delivered: u64,

    /// 失败投递总数
    pub total_failed: u64,

    /// 删除总数
    pub total_deleted: u64,

    /// 解锁总数
    pub total_unlocked: u64,

    /// 以致命信号结束的周期数
    pub fatal_cycles: u64,

    /// 批大小统计
    pub batch_stats: RunningStats,

    /// 周期耗时统计
    pub duration_stats: RunningStats,

    /// 各 probe 故障次数
    pub fault_counts: BTreeMap<String, u64>,
}

impl DispatchStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, stats: &CycleStats) {
        self.total_cycles += 1;
        self.total_messages += stats.batch_size as u64;
        self.total_delivered += stats.delivered;
        self.total_failed += stats.failed;
        self.total_deleted += stats.deleted;
        self.total_unlocked += stats.unlocked;
        if stats.fatal {
            self.fatal_cycles += 1;
        }

        self.batch_stats.push(stats.batch_size as f64);
        self.duration_stats.push(stats.duration_ms);
    }

    /// 记录一次故障
    pub fn record_fault(&mut self, probe: &str) {
        *self.fault_counts.entry(probe.to_string()).or_insert(0) += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let attempts = self.total_delivered + self.total_failed;
        MetricsSummary {
            total_cycles: self.total_cycles,
            total_messages: self.total_messages,
            total_delivered: self.total_delivered,
            total_failed: self.total_failed,
            total_deleted: self.total_deleted,
            total_unlocked: self.total_unlocked,
            fatal_cycles: self.fatal_cycles,
            failure_rate: if attempts > 0 {
                self.total_failed as f64 / attempts as f64 * 100.0
            } else {
                0.0
            },
            batch_size: StatsSummary::from(&self.batch_stats),
            cycle_duration_ms: StatsSummary::from(&self.duration_stats),
            fault_counts: self.fault_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub total_cycles: u64,
    pub total_messages: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_deleted: u64,
    pub total_unlocked: u64,
    pub fatal_cycles: u64,
    pub failure_rate: f64,
    pub batch_size: StatsSummary,
    pub cycle_duration_ms: StatsSummary,
    pub fault_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Metrics Summary ===")?;
        writeln!(f, "Cycles: {}", self.total_cycles)?;
        writeln!(f, "Messages locked: {}", self.total_messages)?;
        writeln!(
            f,
            "Deliveries: {} ok, {} failed ({:.2}%)",
            self.total_delivered, self.total_failed, self.failure_rate
        )?;
        writeln!(f, "Deleted: {}", self.total_deleted)?;
        writeln!(f, "Unlocked for redelivery: {}", self.total_unlocked)?;
        if self.fatal_cycles > 0 {
            writeln!(f, "Cycles ended by fatal signal: {}", self.fatal_cycles)?;
        }
        writeln!(f, "Batch size: {}", self.batch_size)?;
        writeln!(f, "Cycle duration (ms): {}", self.cycle_duration_ms)?;

        if !self.fault_counts.is_empty() {
            writeln!(f, "Faults:")?;
            for (probe, count) in &self.fault_counts {
                writeln!(f, "  {}: {}", probe, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
