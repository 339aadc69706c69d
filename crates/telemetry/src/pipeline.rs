//! RAG pipeline monitor — groups embedding, retrieval and synthesis stage
//! records under one pipeline-run id and emits exactly one summary per run
//! generation.
//!
//! Each run has its own slot behind a mutex, so stages of one run are
//! applied in causal order while runs of different ids interleave freely.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use genops_core::pipeline::{EmbeddingMetrics, RagPipelineSummary, RetrievalMetrics, SynthesisMetrics};
use genops_core::record::{attrs, AttributeValue, OperationKind, TelemetryRecord};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Receives each finalized summary exactly once.
pub trait SummaryForwarder: Send + Sync {
    fn forward(&self, summary: Arc<RagPipelineSummary>);
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Open runs idle for this long are finalized by [`PipelineMonitor::sweep_idle`].
    pub idle_timeout: Duration,
    /// How long a finalized summary stays queryable.
    pub finalized_retention: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::minutes(5),
            finalized_retention: Duration::minutes(10),
        }
    }
}

/// Result of recording one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageAck {
    /// Generation the stage was recorded into.
    pub generation: u32,
    /// The run is now flagged out of order.
    pub out_of_order: bool,
    /// The stage arrived after finalization and opened a successor.
    pub reopened: bool,
    /// The run did not exist and was begun by this stage.
    pub implicit_begin: bool,
}

/// Counters over every run finalized by this monitor.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RagPipelineAnalytics {
    pub open_runs: usize,
    pub finalized_runs: u64,
    pub timed_out_runs: u64,
    pub out_of_order_runs: u64,
    pub reopened_runs: u64,
    pub total_cost_usd: Decimal,
    pub average_cost_usd: Option<Decimal>,
    pub mean_retrieval_score: Option<f64>,
}

#[derive(Default)]
struct RunStats {
    finalized: u64,
    timed_out: u64,
    out_of_order: u64,
    reopened: u64,
    total_cost: Decimal,
    score_sum: f64,
    score_runs: u64,
}

struct OpenRun {
    generation: u32,
    reopened: bool,
    records: Vec<TelemetryRecord>,
    max_rank: Option<u8>,
    out_of_order: bool,
    opened_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl OpenRun {
    fn new(generation: u32, reopened: bool, now: DateTime<Utc>) -> Self {
        Self {
            generation,
            reopened,
            records: Vec::new(),
            max_rank: None,
            out_of_order: false,
            opened_at: now,
            last_activity: now,
        }
    }

    fn push(&mut self, record: TelemetryRecord, now: DateTime<Utc>) {
        if let Some(rank) = record.kind().stage_rank() {
            if self.max_rank.is_some_and(|max| rank < max) {
                self.out_of_order = true;
            }
            self.max_rank = self.max_rank.max(Some(rank));
        }
        self.records.push(record);
        self.last_activity = self.last_activity.max(now);
    }
}

enum RunState {
    Open(OpenRun),
    Finalized {
        summary: Arc<RagPipelineSummary>,
        at: DateTime<Utc>,
    },
}

struct RunSlot {
    state: RunState,
    /// Set when the slot is pruned; holders of a stale `Arc` must look up
    /// the run again.
    retired: bool,
}

#[derive(Clone, Copy)]
enum Finalize {
    Explicit,
    IdleBefore(DateTime<Utc>),
    Shutdown,
}

/// Tracks open and recently finalized pipeline runs.
pub struct PipelineMonitor {
    runs: DashMap<String, Arc<Mutex<RunSlot>>>,
    forwarder: Option<Arc<dyn SummaryForwarder>>,
    stats: Mutex<RunStats>,
    settings: PipelineSettings,
}

impl PipelineMonitor {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            runs: DashMap::new(),
            forwarder: None,
            stats: Mutex::new(RunStats::default()),
            settings,
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn SummaryForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Open a run. Returns `false` if it is already open.
    ///
    /// Beginning a finalized run opens its next generation.
    pub fn begin_run(&self, run_id: &str) -> bool {
        let now = Utc::now();
        self.with_slot(run_id, now, |slot| match &slot.state {
            RunState::Open(_) => false,
            RunState::Finalized { summary, .. } => {
                let generation = summary.generation + 1;
                slot.state = RunState::Open(OpenRun::new(generation, true, now));
                true
            }
        })
        .1
    }

    /// Record one stage. Never rejects; unknown runs are begun implicitly.
    pub fn record_stage(&self, run_id: &str, record: TelemetryRecord) -> StageAck {
        self.record_stage_at(run_id, record, Utc::now())
    }

    pub fn record_stage_at(&self, run_id: &str, record: TelemetryRecord, now: DateTime<Utc>) -> StageAck {
        let kind = record.kind();
        let (created, ack) = self.with_slot(run_id, now, |slot| {
            let mut reopened = false;
            if let RunState::Finalized { summary, .. } = &slot.state {
                let generation = summary.generation + 1;
                warn!(
                    run_id,
                    generation,
                    stage = %kind,
                    "Stage arrived after finalize; opening successor run"
                );
                slot.state = RunState::Open(OpenRun::new(generation, true, now));
                reopened = true;
            }
            match &mut slot.state {
                RunState::Open(run) => {
                    run.push(record, now);
                    StageAck {
                        generation: run.generation,
                        out_of_order: run.out_of_order,
                        reopened,
                        implicit_begin: false,
                    }
                }
                RunState::Finalized { .. } => unreachable!("slot reopened above"),
            }
        });

        if ack.out_of_order {
            debug!(run_id, stage = %kind, "Stage recorded out of canonical order");
        }
        StageAck {
            implicit_begin: created,
            ..ack
        }
    }

    /// Finalize a run. Idempotent: the summary is built and forwarded once,
    /// and every call returns the same `Arc`. `None` for an unknown run.
    pub fn finalize_run(&self, run_id: &str) -> Option<Arc<RagPipelineSummary>> {
        self.finalize(run_id, Utc::now(), Finalize::Explicit)
    }

    pub fn summary(&self, run_id: &str) -> Option<Arc<RagPipelineSummary>> {
        let slot = self.runs.get(run_id).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock();
        match &guard.state {
            RunState::Finalized { summary, .. } => Some(Arc::clone(summary)),
            RunState::Open(_) => None,
        }
    }

    pub fn is_open(&self, run_id: &str) -> bool {
        self.runs
            .get(run_id)
            .map(|s| Arc::clone(s.value()))
            .is_some_and(|slot| matches!(slot.lock().state, RunState::Open(_)))
    }

    /// Finalize runs idle past the timeout (`timed_out = true`) and prune
    /// finalized runs past the retention window.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<Arc<RagPipelineSummary>> {
        let cutoff = now - self.settings.idle_timeout;
        let finalized: Vec<_> = self
            .run_ids()
            .into_iter()
            .filter_map(|id| self.finalize(&id, now, Finalize::IdleBefore(cutoff)))
            .collect();

        let expiry = now - self.settings.finalized_retention;
        let mut pruned = 0usize;
        for id in self.run_ids() {
            let removed = self.runs.remove_if(&id, |_, slot| {
                let mut guard = slot.lock();
                let expired = matches!(guard.state, RunState::Finalized { at, .. } if at < expiry);
                if expired {
                    guard.retired = true;
                }
                expired
            });
            if removed.is_some() {
                pruned += 1;
            }
        }

        if !finalized.is_empty() || pruned > 0 {
            info!(timed_out = finalized.len(), pruned, "Swept pipeline runs");
        }
        finalized
    }

    /// Finalize every open run, e.g. on shutdown.
    pub fn finalize_all(&self) -> Vec<Arc<RagPipelineSummary>> {
        let now = Utc::now();
        self.run_ids()
            .into_iter()
            .filter_map(|id| self.finalize(&id, now, Finalize::Shutdown))
            .collect()
    }

    pub fn open_run_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|e| matches!(e.value().lock().state, RunState::Open(_)))
            .count()
    }

    pub fn analytics(&self) -> RagPipelineAnalytics {
        let open_runs = self.open_run_count();
        let stats = self.stats.lock();
        let average_cost_usd = (stats.finalized > 0)
            .then(|| stats.total_cost / Decimal::from(stats.finalized));
        let mean_retrieval_score =
            (stats.score_runs > 0).then(|| stats.score_sum / stats.score_runs as f64);
        RagPipelineAnalytics {
            open_runs,
            finalized_runs: stats.finalized,
            timed_out_runs: stats.timed_out,
            out_of_order_runs: stats.out_of_order,
            reopened_runs: stats.reopened,
            total_cost_usd: stats.total_cost,
            average_cost_usd,
            mean_retrieval_score,
        }
    }

    fn run_ids(&self) -> Vec<String> {
        self.runs.iter().map(|e| e.key().clone()).collect()
    }

    /// Run `f` on the run's slot, creating an open slot if needed. Returns
    /// whether the slot was created along with `f`'s result.
    fn with_slot<T>(
        &self,
        run_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut RunSlot) -> T,
    ) -> (bool, T) {
        let mut created = false;
        let slot = {
            let entry = self.runs.entry(run_id.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(RunSlot {
                    state: RunState::Open(OpenRun::new(0, false, now)),
                    retired: false,
                }))
            });
            Arc::clone(entry.value())
        };

        let mut guard = slot.lock();
        if guard.retired {
            // Pruned between lookup and lock; the map no longer holds it.
            drop(guard);
            return self.with_slot(run_id, now, f);
        }
        if created {
            debug!(run_id, "Opened pipeline run");
        }
        (created, f(&mut guard))
    }

    fn finalize(&self, run_id: &str, now: DateTime<Utc>, cause: Finalize) -> Option<Arc<RagPipelineSummary>> {
        let slot = self.runs.get(run_id).map(|s| Arc::clone(s.value()))?;

        let summary = {
            let mut guard = slot.lock();
            let run = match &guard.state {
                RunState::Finalized { summary, .. } => {
                    return match cause {
                        Finalize::Explicit => Some(Arc::clone(summary)),
                        Finalize::IdleBefore(_) | Finalize::Shutdown => None,
                    };
                }
                RunState::Open(run) => run,
            };
            if let Finalize::IdleBefore(cutoff) = cause {
                if run.last_activity >= cutoff {
                    return None;
                }
            }
            let timed_out = matches!(cause, Finalize::IdleBefore(_));
            let summary = Arc::new(summarize(run_id, run, now, timed_out));
            guard.state = RunState::Finalized {
                summary: Arc::clone(&summary),
                at: now,
            };
            summary
        };

        self.account(&summary);
        info!(
            run_id,
            generation = summary.generation,
            stages = summary.stage_count(),
            cost = %summary.total_cost_usd,
            out_of_order = summary.out_of_order,
            timed_out = summary.timed_out,
            "Finalized pipeline run"
        );
        if let Some(forwarder) = &self.forwarder {
            forwarder.forward(Arc::clone(&summary));
        }
        Some(summary)
    }

    fn account(&self, summary: &RagPipelineSummary) {
        let mut stats = self.stats.lock();
        stats.finalized += 1;
        stats.timed_out += u64::from(summary.timed_out);
        stats.out_of_order += u64::from(summary.out_of_order);
        stats.reopened += u64::from(summary.reopened);
        stats.total_cost += summary.total_cost_usd;
        if let Some(score) = summary.retrieval.mean_score {
            stats.score_sum += score;
            stats.score_runs += 1;
        }
    }
}

impl Default for PipelineMonitor {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

fn summarize(run_id: &str, run: &OpenRun, now: DateTime<Utc>, timed_out: bool) -> RagPipelineSummary {
    let mut embedding = EmbeddingMetrics::default();
    let mut retrieval = RetrievalMetrics::default();
    let mut synthesis = SynthesisMetrics::default();
    let mut other_cost_usd = Decimal::ZERO;
    let mut scores = Vec::new();

    for record in &run.records {
        let cost = record.cost_usd();
        match record.kind() {
            OperationKind::Embedding => {
                embedding.calls += 1;
                embedding.input_tokens = embedding.input_tokens.saturating_add(record.input_tokens());
                embedding.cost_usd += cost;
                embedding.latency_ms = embedding.latency_ms.saturating_add(record.latency_ms());
                embedding.models.extend(record.model().map(String::from));
            }
            OperationKind::Retrieval => {
                retrieval.calls += 1;
                retrieval.documents = retrieval.documents.saturating_add(
                    record
                        .attribute(attrs::RETRIEVAL_DOCUMENTS)
                        .and_then(AttributeValue::as_i64)
                        .map_or(0, |n| n.max(0) as u64),
                );
                scores.extend(
                    record
                        .attribute(attrs::RETRIEVAL_SCORE)
                        .and_then(AttributeValue::as_f64),
                );
                retrieval.cost_usd += cost;
                retrieval.latency_ms = retrieval.latency_ms.saturating_add(record.latency_ms());
            }
            OperationKind::Synthesis => {
                synthesis.calls += 1;
                synthesis.input_tokens = synthesis.input_tokens.saturating_add(record.input_tokens());
                synthesis.output_tokens = synthesis.output_tokens.saturating_add(record.output_tokens());
                synthesis.cost_usd += cost;
                synthesis.latency_ms = synthesis.latency_ms.saturating_add(record.latency_ms());
                synthesis.models.extend(record.model().map(String::from));
            }
            OperationKind::GenericCall => other_cost_usd += cost,
        }
    }
    if !scores.is_empty() {
        retrieval.mean_score = Some(scores.iter().sum::<f64>() / scores.len() as f64);
    }

    let started_at = run
        .records
        .iter()
        .map(TelemetryRecord::started_at)
        .fold(run.opened_at, |a, b| a.min(b));

    RagPipelineSummary {
        pipeline_run_id: run_id.to_string(),
        generation: run.generation,
        session_id: run
            .records
            .iter()
            .find_map(|r| r.session_id().map(String::from)),
        stages: run.records.iter().map(TelemetryRecord::kind).collect(),
        records: run.records.clone(),
        total_cost_usd: run.records.iter().map(TelemetryRecord::cost_usd).sum(),
        total_input_tokens: run.records.iter().map(TelemetryRecord::input_tokens).fold(0, u64::saturating_add),
        total_output_tokens: run.records.iter().map(TelemetryRecord::output_tokens).fold(0, u64::saturating_add),
        embedding,
        retrieval,
        synthesis,
        other_cost_usd,
        out_of_order: run.out_of_order,
        timed_out,
        reopened: run.reopened,
        started_at,
        finalized_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genops_core::record::{CanonicalAttributes, RecordParts};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stage(kind: OperationKind, cost: Decimal) -> TelemetryRecord {
        let now = Utc::now();
        let mut attributes = CanonicalAttributes::new();
        attributes.insert(attrs::MODEL.into(), "m".into());
        if kind == OperationKind::Retrieval {
            attributes.insert(attrs::RETRIEVAL_DOCUMENTS.into(), 4u64.into());
            attributes.insert(attrs::RETRIEVAL_SCORE.into(), 0.5.into());
        }
        TelemetryRecord::new(RecordParts {
            kind,
            attributes,
            cost_usd: cost,
            started_at: now,
            ended_at: now,
            pipeline_run_id: Some("run".into()),
            session_id: Some("s".into()),
            incomplete: false,
        })
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl SummaryForwarder for Counting {
        fn forward(&self, _summary: Arc<RagPipelineSummary>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn in_order_run_summarizes() {
        let monitor = PipelineMonitor::default();
        assert!(monitor.begin_run("run"));
        assert!(!monitor.begin_run("run"));
        monitor.record_stage("run", stage(OperationKind::Embedding, Decimal::new(1, 2)));
        monitor.record_stage("run", stage(OperationKind::Retrieval, Decimal::ZERO));
        let ack = monitor.record_stage("run", stage(OperationKind::Synthesis, Decimal::new(5, 2)));
        assert!(!ack.out_of_order);
        assert!(!ack.implicit_begin);

        let summary = monitor.finalize_run("run").unwrap();
        assert_eq!(
            summary.stages,
            vec![OperationKind::Embedding, OperationKind::Retrieval, OperationKind::Synthesis]
        );
        assert_eq!(summary.total_cost_usd, Decimal::new(6, 2));
        assert_eq!(summary.retrieval.documents, 4);
        assert_eq!(summary.retrieval.mean_score, Some(0.5));
        assert_eq!(summary.session_id.as_deref(), Some("s"));
        assert!(!summary.out_of_order);
        assert_eq!(summary.generation, 0);
    }

    #[test]
    fn out_of_order_is_flagged_not_rejected() {
        let monitor = PipelineMonitor::default();
        monitor.record_stage("run", stage(OperationKind::Synthesis, Decimal::ONE));
        let ack = monitor.record_stage("run", stage(OperationKind::Embedding, Decimal::ONE));
        assert!(ack.out_of_order);

        let summary = monitor.finalize_run("run").unwrap();
        assert!(summary.out_of_order);
        assert_eq!(summary.stage_count(), 2);
        assert_eq!(summary.total_cost_usd, Decimal::from(2));
    }

    #[test]
    fn every_stage_order_summarizes_the_same() {
        use genops_core::record::OperationKind::{Embedding, Retrieval, Synthesis};
        let orders = [
            [Embedding, Retrieval, Synthesis],
            [Embedding, Synthesis, Retrieval],
            [Retrieval, Embedding, Synthesis],
            [Retrieval, Synthesis, Embedding],
            [Synthesis, Embedding, Retrieval],
            [Synthesis, Retrieval, Embedding],
        ];
        let cost = |kind| match kind {
            Embedding => Decimal::new(1, 4),
            Retrieval => Decimal::ZERO,
            _ => Decimal::new(2, 2),
        };

        let monitor = PipelineMonitor::default();
        for (i, order) in orders.iter().enumerate() {
            let run = format!("run-{i}");
            for &kind in order {
                monitor.record_stage(&run, stage(kind, cost(kind)));
            }
            let summary = monitor.finalize_run(&run).unwrap();

            assert_eq!(summary.stages, order.to_vec(), "order {order:?}");
            assert_eq!(summary.out_of_order, i != 0, "order {order:?}");
            assert_eq!(summary.total_cost_usd, Decimal::new(201, 4));
            assert_eq!(summary.embedding.cost_usd, Decimal::new(1, 4));
            assert_eq!(summary.synthesis.cost_usd, Decimal::new(2, 2));
            assert_eq!(summary.retrieval.documents, 4);
            assert_eq!(summary.stage_count(), 3);
        }
    }

    #[test]
    fn generic_calls_do_not_affect_order() {
        let monitor = PipelineMonitor::default();
        monitor.record_stage("run", stage(OperationKind::Retrieval, Decimal::ZERO));
        let ack = monitor.record_stage("run", stage(OperationKind::GenericCall, Decimal::ONE));
        assert!(!ack.out_of_order);
        let summary = monitor.finalize_run("run").unwrap();
        assert_eq!(summary.other_cost_usd, Decimal::ONE);
    }

    #[test]
    fn unknown_run_is_begun_implicitly() {
        let monitor = PipelineMonitor::default();
        let ack = monitor.record_stage("fresh", stage(OperationKind::Embedding, Decimal::ZERO));
        assert!(ack.implicit_begin);
        assert!(monitor.is_open("fresh"));
        assert!(monitor.finalize_run("missing").is_none());
    }

    #[test]
    fn finalize_is_idempotent_and_forwards_once() {
        let forwarder = Arc::new(Counting::default());
        let monitor = PipelineMonitor::default().with_forwarder(forwarder.clone());
        monitor.record_stage("run", stage(OperationKind::Embedding, Decimal::ONE));

        let first = monitor.finalize_run("run").unwrap();
        let second = monitor.finalize_run("run").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            serde_json::to_vec(&*first).unwrap(),
            serde_json::to_vec(&*second).unwrap()
        );
        assert_eq!(forwarder.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_finalize_forwards_once() {
        let forwarder = Arc::new(Counting::default());
        let monitor = Arc::new(PipelineMonitor::default().with_forwarder(forwarder.clone()));
        monitor.record_stage("run", stage(OperationKind::Synthesis, Decimal::ONE));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || monitor.finalize_run("run").unwrap())
            })
            .collect();
        let summaries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(summaries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(forwarder.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_stage_opens_successor_generation() {
        let monitor = PipelineMonitor::default();
        monitor.record_stage("run", stage(OperationKind::Embedding, Decimal::ONE));
        let original = monitor.finalize_run("run").unwrap();

        let ack = monitor.record_stage("run", stage(OperationKind::Synthesis, Decimal::ONE));
        assert!(ack.reopened);
        assert_eq!(ack.generation, 1);
        assert_eq!(original.stage_count(), 1);

        let successor = monitor.finalize_run("run").unwrap();
        assert_eq!(successor.generation, 1);
        assert!(successor.reopened);
        assert_eq!(successor.stages, vec![OperationKind::Synthesis]);
    }

    #[test]
    fn idle_runs_time_out_and_are_pruned() {
        let monitor = PipelineMonitor::default();
        let t0 = Utc::now();
        monitor.record_stage_at("run", stage(OperationKind::Embedding, Decimal::ONE), t0);

        assert!(monitor.sweep_idle(t0 + Duration::minutes(1)).is_empty());
        let swept = monitor.sweep_idle(t0 + Duration::minutes(6));
        assert_eq!(swept.len(), 1);
        assert!(swept[0].timed_out);
        assert!(monitor.summary("run").is_some());

        monitor.sweep_idle(t0 + Duration::minutes(20));
        assert!(monitor.summary("run").is_none());

        let stats = monitor.analytics();
        assert_eq!(stats.finalized_runs, 1);
        assert_eq!(stats.timed_out_runs, 1);
    }

    #[test]
    fn finalize_all_closes_open_runs() {
        let monitor = PipelineMonitor::default();
        monitor.begin_run("a");
        monitor.begin_run("b");
        monitor.record_stage("b", stage(OperationKind::Embedding, Decimal::ONE));
        monitor.finalize_run("b");

        let closed = monitor.finalize_all();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].pipeline_run_id, "a");
        assert_eq!(monitor.open_run_count(), 0);
    }

    #[test]
    fn analytics_average_cost() {
        let monitor = PipelineMonitor::default();
        monitor.record_stage("a", stage(OperationKind::Retrieval, Decimal::ONE));
        monitor.record_stage("b", stage(OperationKind::Synthesis, Decimal::from(3)));
        monitor.finalize_run("a");
        monitor.finalize_run("b");
        monitor.begin_run("c");

        let stats = monitor.analytics();
        assert_eq!(stats.finalized_runs, 2);
        assert_eq!(stats.open_runs, 1);
        assert_eq!(stats.total_cost_usd, Decimal::from(4));
        assert_eq!(stats.average_cost_usd, Some(Decimal::from(2)));
        assert_eq!(stats.mean_retrieval_score, Some(0.5));
    }
}
