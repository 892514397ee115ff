//! `simulate` command implementation.
//!
//! Runs the configured dispatcher against an in-memory broker and scripted
//! endpoints. Failed messages are relocked until the broker's retry ceiling
//! is reached, the way a real engine redelivers them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, DispatchBlueprint};
use contracts::{FaultReporter, MessageHandle, Reliability, StrategyKind};
use dispatcher::mock::{
    DeliveryScript, InMemoryBroker, InMemoryCoordinator, ScriptedEndpointFactory,
};
use dispatcher::{DispatchError, DispatchMetrics, DispatcherBuilder, LockedBatch, MetricsSnapshot};
use observability::{
    record_cycle, record_failure_run, CycleStats, DispatchStatsAggregator, MetricsFaultReporter,
    MetricsSummary,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::SimulateArgs;
use crate::error::CliError;

/// What to feed the dispatcher
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub messages: usize,
    pub fail_every: u64,
    pub fatal_at: Option<u64>,
    pub reliability: Reliability,
}

impl From<&SimulateArgs> for SimulationPlan {
    fn from(args: &SimulateArgs) -> Self {
        Self {
            messages: args.messages,
            fail_every: args.fail_every,
            fatal_at: args.fatal_at,
            reliability: args.reliability.into(),
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub strategy: StrategyKind,
    pub messages: usize,
    /// Messages relocked after a failed delivery
    pub redelivered: usize,
    /// Messages that reached `max_failed_deliveries`
    pub exceeded_retry_limit: usize,
    /// Messages removed from the destination
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub dispatcher: MetricsSnapshot,
    pub summary: MetricsSummary,
}

/// Reports through `MetricsFaultReporter` and keeps the probes for the summary
#[derive(Default)]
struct RecordingFaultReporter {
    probes: Mutex<Vec<&'static str>>,
}

impl RecordingFaultReporter {
    fn drain(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.probes.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl FaultReporter for RecordingFaultReporter {
    fn report(&self, probe: &'static str, fault: &(dyn std::error::Error + 'static)) {
        MetricsFaultReporter.report(probe, fault);
        self.probes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(probe);
    }
}

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    for warning in ConfigLoader::warnings(&blueprint) {
        warn!(%warning, "Configuration warning");
    }

    let report = simulate(&blueprint, &SimulationPlan::from(args)).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize simulation report")?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    match report.fatal {
        Some(reason) => anyhow::bail!("Dispatch stopped by fatal signal: {reason}"),
        None => Ok(()),
    }
}

/// Dispatch `plan.messages` messages in batches of `max_batch_size`.
///
/// Stops at the first fatal signal; any other dispatch error aborts the run.
pub async fn simulate(
    blueprint: &DispatchBlueprint,
    plan: &SimulationPlan,
) -> crate::error::Result<SimulationReport> {
    let activation = &blueprint.activation;
    let delivery = &blueprint.delivery;

    let broker = InMemoryBroker::new(activation.messaging_engine.as_str());
    let session = Arc::new(broker.session(activation.session_id, activation.destination.as_str()));

    let script = DeliveryScript {
        fail_every: (plan.fail_every > 0).then_some(plan.fail_every),
        fatal_handle: plan.fatal_at,
        ..DeliveryScript::default()
    };
    let coordinator = (blueprint.strategy_kind() == StrategyKind::Synchronized)
        .then(|| Arc::new(InMemoryCoordinator::new()));
    let mut factory = ScriptedEndpointFactory::new(script).transacted(delivery.transacted);
    if let Some(coordinator) = &coordinator {
        factory = factory.with_coordinator(Arc::clone(coordinator));
    }

    let reporter = Arc::new(RecordingFaultReporter::default());
    let metrics = Arc::new(DispatchMetrics::new());
    let mut builder = DispatcherBuilder::new(
        Arc::clone(&session),
        factory,
        blueprint.to_dispatcher_config(),
    )
    .with_fault_reporter(reporter.clone())
    .with_metrics(Arc::clone(&metrics));
    if let Some(coordinator) = coordinator {
        builder = builder.with_coordinator(coordinator);
    }

    let mut dispatcher = builder.build()?;
    let strategy = dispatcher.strategy_kind();
    info!(
        %strategy,
        messages = plan.messages,
        max_batch_size = delivery.max_batch_size,
        "Simulation starting"
    );

    let batch_size = delivery.max_batch_size.max(1);
    let mut pending: VecDeque<LockedBatch> = VecDeque::new();
    let mut remaining = plan.messages;
    while remaining > 0 {
        let count = remaining.min(batch_size);
        pending.push_back(broker.lock_messages(count, plan.reliability));
        remaining -= count;
    }

    let mut aggregator = DispatchStatsAggregator::new();
    let mut redelivered = 0;
    let mut exceeded_retry_limit = 0;
    let mut fatal = None;

    while let Some(mut batch) = pending.pop_front() {
        let before = metrics.snapshot();
        let deleted_before = broker.deleted().len();
        let started = Instant::now();

        let result = dispatcher.dispatch(&mut batch).await;

        let after = metrics.snapshot();
        let unlocked = broker.take_unlocked();
        let stats = CycleStats {
            batch_size: batch.len(),
            delivered: after.delivered - before.delivered,
            failed: after.failed - before.failed,
            deleted: (broker.deleted().len() - deleted_before) as u64,
            unlocked: unlocked.len() as u64,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            fatal: matches!(result, Err(DispatchError::Fatal(_))),
        };
        record_cycle(strategy, &stats);
        record_failure_run(after.consecutive_failures);
        aggregator.update(&stats);
        for probe in reporter.drain() {
            aggregator.record_fault(probe);
        }

        match result {
            Ok(()) => {}
            Err(DispatchError::Fatal(signal)) => {
                warn!(reason = signal.reason(), "Simulation stopped by fatal signal");
                fatal = Some(signal.reason().to_string());
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let (retry, exhausted): (Vec<MessageHandle>, Vec<MessageHandle>) = unlocked
            .into_iter()
            .partition(|handle| broker.retry_count(handle) < delivery.max_failed_deliveries);
        for handle in &exhausted {
            warn!(%handle, "Message reached max_failed_deliveries");
        }
        exceeded_retry_limit += exhausted.len();
        redelivered += retry.len();
        for chunk in retry.chunks(batch_size) {
            pending.push_back(broker.relock(chunk));
        }
    }

    if broker.open_clones() > 0 {
        return Err(CliError::simulation(format!(
            "{} scoped connections were left open",
            broker.open_clones()
        )));
    }

    let report = SimulationReport {
        strategy,
        messages: plan.messages,
        redelivered,
        exceeded_retry_limit,
        deleted: broker.deleted().len(),
        fatal,
        dispatcher: metrics.snapshot(),
        summary: aggregator.summary(),
    };
    info!(
        cycles = report.dispatcher.cycles,
        delivered = report.dispatcher.delivered,
        failed = report.dispatcher.failed,
        "Simulation finished"
    );
    Ok(report)
}

fn print_report(report: &SimulationReport) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Simulation Report                         ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📊 Overview");
    println!("   ├─ Strategy: {}", report.strategy);
    println!("   ├─ Messages: {}", report.messages);
    println!("   ├─ Redelivered: {}", report.redelivered);
    println!("   ├─ Exceeded retry limit: {}", report.exceeded_retry_limit);
    match &report.fatal {
        Some(reason) => {
            println!("   ├─ Deleted: {}", report.deleted);
            println!("   └─ Fatal: {}", reason);
        }
        None => println!("   └─ Deleted: {}", report.deleted),
    }

    println!("\n{}", report.summary);
}
