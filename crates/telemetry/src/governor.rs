//! Governance pipeline — wires the tracker, pipeline monitor, aggregator,
//! policy engine and exporter into the observer adapters report calls to.
//!
//! Records carrying a pipeline-run id are held by the monitor until their run
//! is finalized and are then rolled up from the summary; everything else is
//! rolled up immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genops_core::adapter::{CallObserver, RawCallContext, ScopeHints};
use genops_core::pipeline::RagPipelineSummary;
use genops_core::policy::{BudgetAlert, BudgetPolicy};
use genops_core::record::TelemetryRecord;
use genops_core::scope::{ScopeId, ScopeTotals};
use genops_core::sink::ExportItem;
use serde::Serialize;
use tracing::debug;

use crate::aggregator::{AggregatorSettings, CostAggregator};
use crate::export::{Exporter, ExporterSettings};
use crate::pipeline::{PipelineMonitor, PipelineSettings, StageAck, SummaryForwarder};
use crate::policy::PolicyEngine;
use crate::tracker::UsageTracker;

/// Settings for every stage of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct GovernorSettings {
    pub aggregator: AggregatorSettings,
    pub pipeline: PipelineSettings,
    pub export: ExporterSettings,
}

/// Where an observed record went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Held by the pipeline monitor until its run is finalized.
    Pipeline(StageAck),
    /// Rolled up immediately.
    Direct,
}

/// Result of observing one call.
#[derive(Debug, Clone)]
pub struct Observation {
    pub record: TelemetryRecord,
    pub route: Route,
    /// Alerts raised by this record's roll-up. Always empty for pipeline
    /// stages; their alerts surface when the run is finalized.
    pub alerts: Vec<BudgetAlert>,
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub timed_out_runs: usize,
    pub evicted_scopes: usize,
}

/// Aggregate, evaluate, export. Shared by direct records and finalized
/// pipeline summaries.
pub struct RollupStage {
    /// Scoped cost totals.
    aggregator: Arc<CostAggregator>,
    /// Budget evaluation over fresh snapshots.
    policy: Arc<PolicyEngine>,
    /// Queue to the sinks.
    exporter: Arc<Exporter>,
}

impl RollupStage {
    pub fn new(aggregator: Arc<CostAggregator>, policy: Arc<PolicyEngine>, exporter: Arc<Exporter>) -> Self {
        Self {
            aggregator,
            policy,
            exporter,
        }
    }

    /// Roll one record up and return any alerts it raised.
    pub fn apply(&self, record: &TelemetryRecord) -> Vec<BudgetAlert> {
        let snapshots = self.aggregator.ingest(record);
        self.publish(snapshots)
    }

    fn publish(&self, snapshots: Vec<ScopeTotals>) -> Vec<BudgetAlert> {
        let mut alerts = Vec::new();
        for snapshot in snapshots {
            let evaluation = self.policy.evaluate(&snapshot);
            self.exporter.enqueue(ExportItem::Totals(snapshot));
            for alert in evaluation.alerts {
                self.exporter.enqueue(ExportItem::Alert(alert.clone()));
                alerts.push(alert);
            }
        }
        alerts
    }
}

impl SummaryForwarder for RollupStage {
    fn forward(&self, summary: Arc<RagPipelineSummary>) {
        self.exporter
            .enqueue(ExportItem::Summary(Box::new(summary.as_ref().clone())));
        let snapshots = self.aggregator.ingest_summary(&summary);
        let alerts = self.publish(snapshots);
        debug!(
            run_id = %summary.pipeline_run_id,
            generation = summary.generation,
            alerts = alerts.len(),
            "Rolled up pipeline summary"
        );
    }
}

/// The observer adapters report intercepted calls to.
pub struct GovernancePipeline {
    /// Raw call metadata → records.
    tracker: UsageTracker,
    /// Groups pipeline stages into runs.
    monitor: PipelineMonitor,
    rollup: Arc<RollupStage>,
    aggregator: Arc<CostAggregator>,
    policy: Arc<PolicyEngine>,
    exporter: Arc<Exporter>,
}

impl GovernancePipeline {
    pub fn new(tracker: UsageTracker, settings: GovernorSettings, policies: Vec<BudgetPolicy>) -> Self {
        let aggregator = Arc::new(CostAggregator::new(settings.aggregator));
        let policy = Arc::new(PolicyEngine::new(policies));
        let exporter = Arc::new(Exporter::new(settings.export));
        let rollup = Arc::new(RollupStage::new(
            Arc::clone(&aggregator),
            Arc::clone(&policy),
            Arc::clone(&exporter),
        ));
        let monitor = PipelineMonitor::new(settings.pipeline)
            .with_forwarder(Arc::clone(&rollup) as Arc<dyn SummaryForwarder>);

        Self {
            tracker,
            monitor,
            rollup,
            aggregator,
            policy,
            exporter,
        }
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    pub fn monitor(&self) -> &PipelineMonitor {
        &self.monitor
    }

    pub fn aggregator(&self) -> &CostAggregator {
        &self.aggregator
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    /// Record a call and route it.
    pub fn observe(&self, ctx: &RawCallContext) -> Observation {
        let record = self.tracker.record(ctx);
        self.ingest(record)
    }

    /// Route an already-built record.
    pub fn ingest(&self, record: TelemetryRecord) -> Observation {
        self.exporter.enqueue(ExportItem::Record(record.clone()));

        match record.pipeline_run_id() {
            Some(run_id) => {
                let ack = self.monitor.record_stage(run_id, record.clone());
                Observation {
                    record,
                    route: Route::Pipeline(ack),
                    alerts: Vec::new(),
                }
            }
            None => {
                let alerts = self.rollup.apply(&record);
                Observation {
                    record,
                    route: Route::Direct,
                    alerts,
                }
            }
        }
    }

    pub fn begin_run(&self, run_id: &str) -> bool {
        self.monitor.begin_run(run_id)
    }

    /// Finalize a run; its summary is rolled up exactly once.
    pub fn finalize_run(&self, run_id: &str) -> Option<Arc<RagPipelineSummary>> {
        self.monitor.finalize_run(run_id)
    }

    pub fn finalize_open_runs(&self) -> Vec<Arc<RagPipelineSummary>> {
        self.monitor.finalize_all()
    }

    /// Close a session and drop every scope and policy state under it.
    pub fn close_session(&self, session_id: &str) -> Option<ScopeTotals> {
        let closed = self.aggregator.close_session(session_id);
        self.policy.retain_scopes(|scope| self.aggregator.contains(scope));
        closed
    }

    /// Advisory: does a hard cap cover any of these scopes?
    pub fn is_blocked(&self, hints: &ScopeHints) -> bool {
        let session = hints.session_id.as_deref().map(ScopeId::session);
        let run = hints.pipeline_run_id.as_deref().map(ScopeId::pipeline_run);
        session
            .into_iter()
            .chain(run)
            .any(|scope| self.policy.is_blocked(&scope))
    }

    /// Time out idle runs and evict idle scopes.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let timed_out_runs = self.monitor.sweep_idle(now).len();
        let evicted_scopes = self.aggregator.evict_idle(now);
        if evicted_scopes > 0 {
            self.policy.retain_scopes(|scope| self.aggregator.contains(scope));
        }
        MaintenanceReport {
            timed_out_runs,
            evicted_scopes,
        }
    }

    /// Drain the export queue on the calling thread.
    pub fn flush(&self) -> usize {
        self.exporter.flush()
    }
}

impl CallObserver for GovernancePipeline {
    fn on_call(&self, ctx: RawCallContext) {
        self.observe(&ctx);
    }

    fn should_block(&self, hints: &ScopeHints) -> bool {
        self.is_blocked(hints)
    }
}
