//! Fault reporters for failures that are swallowed by the engine

use contracts::FaultReporter;
use tracing::error;

/// Reports faults through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFaultReporter;

impl FaultReporter for LogFaultReporter {
    fn report(&self, probe: &'static str, fault: &(dyn std::error::Error + 'static)) {
        error!(probe, error = %fault, "Fault reported");
    }
}
