//! Telemetry sink — where exported governance telemetry ends up.

use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::pipeline::RagPipelineSummary;
use crate::policy::BudgetAlert;
use crate::record::TelemetryRecord;
use crate::scope::ScopeTotals;

/// One unit of exported telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportItem {
    Record(TelemetryRecord),
    Totals(ScopeTotals),
    Summary(Box<RagPipelineSummary>),
    Alert(BudgetAlert),
}

impl ExportItem {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::Totals(_) => "totals",
            Self::Summary(_) => "summary",
            Self::Alert(_) => "alert",
        }
    }
}

/// Destination for exported telemetry.
///
/// Called from the exporter's drain path, never from the instrumented call.
/// Errors are counted and logged by the exporter, not retried.
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &str;

    fn export(&self, item: &ExportItem) -> Result<(), SinkError>;
}
