//! Governance context — the process-scoped control surface.
//!
//! `init` builds the roll-up pipeline from config, registers and patches
//! every adapter whose library is present, and (inside a tokio runtime)
//! starts the background export drain and idle sweep. `uninstrument`
//! reverses all of it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use genops_config::GovernanceConfig;
use genops_core::adapter::{CallObserver, RawCallContext, RegistrationState, ScopeHints};
use genops_core::error::{Error, Result};
use genops_core::pipeline::RagPipelineSummary;
use genops_core::policy::BudgetPolicy;
use genops_core::record::CanonicalAttributes;
use genops_core::scope::ScopeTotals;
use genops_core::sink::TelemetrySink;
use genops_telemetry::{
    AggregatorSettings, AttributeNormalizer, ExportStats, ExporterSettings, GovernancePipeline,
    GovernorSettings, LogSink, MaintenanceReport, ModelPricing, Observation, PipelineSettings,
    PricingTable, QueueFullPolicy, RagPipelineAnalytics, RecordRetention, UsageTracker,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::builtin_adapters;
use crate::catalog::LibraryCatalog;
use crate::registry::InstrumentationRegistry;

/// Longest window accepted from config; larger values are clamped.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Point-in-time view of the context.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceStatus {
    pub adapters: Vec<RegistrationState>,
    pub default_attributes: CanonicalAttributes,
    pub policies: usize,
    pub tracked_scopes: usize,
    pub pipelines: RagPipelineAnalytics,
    pub export: ExportStats,
    /// Whether the background drain and sweep are running.
    pub background: bool,
}

/// What `uninstrument` undid.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub unpatched: Vec<String>,
    pub finalized_runs: usize,
    pub flushed: usize,
}

pub struct GovernanceContext {
    config: GovernanceConfig,
    catalog: Arc<LibraryCatalog>,
    registry: InstrumentationRegistry,
    pipeline: Arc<GovernancePipeline>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl GovernanceContext {
    /// Build the pipeline and instrument every available library.
    ///
    /// Adapters that fail to patch are logged and left `unregistered` with
    /// their error in [`status`](Self::status); they do not fail `init`.
    pub fn init(config: GovernanceConfig, catalog: Arc<LibraryCatalog>) -> Result<Self> {
        config.validate()?;

        let tracker = UsageTracker::new(
            AttributeNormalizer::with_defaults(&config.default_attributes),
            Arc::new(pricing_table(&config)),
        );
        let pipeline = Arc::new(GovernancePipeline::new(
            tracker,
            governor_settings(&config)?,
            config.budget_policies()?,
        ));
        if config.export.log_sink {
            pipeline.exporter().add_sink(Arc::new(LogSink));
        }

        let context = Self {
            config,
            catalog,
            registry: InstrumentationRegistry::new(),
            pipeline,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        };

        if context.config.auto_instrument {
            context.instrument();
        }
        context.start_background();

        info!(
            adapters = context.registry.len(),
            active = context.status().adapters.iter().filter(|s| s.is_active()).count(),
            policies = context.pipeline.policy().policies().len(),
            "GenOps governance initialized"
        );
        Ok(context)
    }

    fn instrument(&self) {
        let wanted = &self.config.adapters;
        let factories: Vec<_> = builtin_adapters()
            .into_iter()
            .filter(|(name, _)| wanted.is_empty() || wanted.iter().any(|w| w == name))
            .collect();
        for name in wanted {
            if !factories.iter().any(|(n, _)| n == name) {
                warn!(adapter = %name, "Configured adapter is not built in");
            }
        }

        self.registry.auto_register(&factories, &self.catalog);
        let observer: Arc<dyn CallObserver> = self.pipeline.clone();
        for name in self.registry.names() {
            if let Err(e) = self.registry.patch(&name, Arc::clone(&observer)) {
                warn!(adapter = %name, error = %e, "Adapter left uninstrumented");
            }
        }
    }

    fn start_background(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No tokio runtime; export and maintenance run on demand");
            return;
        }

        let period = StdDuration::from_secs(self.config.export.maintenance_interval_secs.max(1));
        let mut tasks = self.tasks.lock();
        tasks.push(self.pipeline.exporter().spawn_drain(self.cancel.clone()));
        tasks.push(spawn_maintenance(
            Arc::clone(&self.pipeline),
            period,
            self.cancel.clone(),
        ));
    }

    /// Unpatch every adapter, finalize open runs, flush export and stop
    /// background tasks. Calling it again does nothing.
    pub fn uninstrument(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }

        let unpatched = self.registry.unpatch_all();
        let finalized_runs = self.pipeline.finalize_open_runs().len();
        self.cancel.cancel();
        self.tasks.lock().clear();
        let flushed = self.pipeline.flush();

        info!(
            unpatched = unpatched.len(),
            finalized_runs, flushed, "GenOps governance uninstrumented"
        );
        ShutdownReport {
            unpatched,
            finalized_runs,
            flushed,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> GovernanceStatus {
        GovernanceStatus {
            adapters: self.registry.status(),
            default_attributes: self.get_default_attributes(),
            policies: self.pipeline.policy().policies().len(),
            tracked_scopes: self.pipeline.aggregator().scope_count(),
            pipelines: self.pipeline.monitor().analytics(),
            export: self.pipeline.exporter().stats(),
            background: !self.tasks.lock().is_empty(),
        }
    }

    /// Attributes stamped on every record.
    pub fn get_default_attributes(&self) -> CanonicalAttributes {
        self.pipeline.tracker().normalizer().default_attributes().clone()
    }

    // ── Manual tracking ──────────────────────────────────────────────────

    /// Record a call that did not go through a hook point.
    pub fn record_call(&self, ctx: &RawCallContext) -> Observation {
        self.pipeline.observe(ctx)
    }

    /// Time `f` and record it; `f` may fill in token counts.
    pub fn track<T>(
        &self,
        ctx: RawCallContext,
        f: impl FnOnce(&mut RawCallContext) -> T,
    ) -> (T, Observation) {
        let (out, record) = self.pipeline.tracker().track(ctx, f);
        (out, self.pipeline.ingest(record))
    }

    /// Advisory: does a hard cap cover these scopes?
    pub fn is_blocked(&self, hints: &ScopeHints) -> bool {
        self.pipeline.is_blocked(hints)
    }

    pub fn begin_run(&self, run_id: &str) -> bool {
        self.pipeline.begin_run(run_id)
    }

    pub fn finalize_run(&self, run_id: &str) -> Option<Arc<RagPipelineSummary>> {
        self.pipeline.finalize_run(run_id)
    }

    pub fn close_session(&self, session_id: &str) -> Option<ScopeTotals> {
        self.pipeline.close_session(session_id)
    }

    pub fn replace_policies(&self, policies: Vec<BudgetPolicy>) {
        self.pipeline.policy().replace_policies(policies);
    }

    pub fn add_sink(&self, sink: Arc<dyn TelemetrySink>) {
        self.pipeline.exporter().add_sink(sink);
    }

    /// Drain the export queue on the calling thread.
    pub fn flush(&self) -> usize {
        self.pipeline.flush()
    }

    pub fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        self.pipeline.run_maintenance(now)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn pipeline(&self) -> &Arc<GovernancePipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<LibraryCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }
}

impl Drop for GovernanceContext {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            self.uninstrument();
        }
    }
}

fn spawn_maintenance(
    pipeline: Arc<GovernancePipeline>,
    period: StdDuration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = pipeline.run_maintenance(Utc::now());
                    if report != MaintenanceReport::default() {
                        debug!(
                            timed_out_runs = report.timed_out_runs,
                            evicted_scopes = report.evicted_scopes,
                            "Maintenance pass"
                        );
                    }
                }
            }
        }
        debug!("Maintenance loop stopped");
    })
}

fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

fn governor_settings(config: &GovernanceConfig) -> Result<GovernorSettings> {
    let on_full = QueueFullPolicy::parse(&config.export.on_full).ok_or_else(|| Error::Config {
        message: format!("unknown queue-full policy '{}'", config.export.on_full),
    })?;

    Ok(GovernorSettings {
        aggregator: AggregatorSettings {
            idle_timeout: window(config.aggregator.idle_timeout_secs),
            tombstone_window: window(config.aggregator.tombstone_secs),
            retention: RecordRetention::from_count(config.aggregator.retain_records),
        },
        pipeline: PipelineSettings {
            idle_timeout: window(config.pipeline.idle_timeout_secs),
            finalized_retention: window(config.pipeline.finalized_retention_secs),
        },
        export: ExporterSettings {
            capacity: config.export.queue_capacity,
            on_full,
            drain_interval: StdDuration::from_millis(config.export.drain_interval_ms),
        },
    })
}

/// Built-in prices with the config's custom pricing applied on top.
pub fn pricing_table(config: &GovernanceConfig) -> PricingTable {
    let pricing = PricingTable::with_defaults();
    for (model, price) in &config.custom_pricing {
        pricing.set(model.clone(), ModelPricing::new(price.input_per_m, price.output_per_m));
    }
    pricing
}

/// Canonical attributes as plain strings, for display.
pub fn attribute_strings(attributes: &CanonicalAttributes) -> BTreeMap<String, String> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llamaindex;
    use crate::catalog::LibraryHandle;
    use genops_config::PolicyConfig;
    use genops_core::adapter::{AdapterState, CallEvent};
    use genops_core::record::OperationKind;
    use genops_telemetry::MemorySink;
    use rust_decimal::Decimal;

    fn catalog() -> Arc<LibraryCatalog> {
        let catalog = Arc::new(LibraryCatalog::new());
        catalog.register(LibraryHandle::new(
            llamaindex::LIBRARY,
            "0.10.30",
            llamaindex::HOOKS.iter().copied(),
        ));
        catalog
    }

    #[test]
    fn init_patches_available_adapters() {
        let ctx = GovernanceContext::init(GovernanceConfig::default(), catalog()).unwrap();
        let status = ctx.status();
        assert_eq!(status.adapters.len(), 1);
        assert_eq!(status.adapters[0].adapter, "llamaindex");
        assert_eq!(status.adapters[0].state, AdapterState::Active);
        assert!(!status.background);
    }

    #[test]
    fn auto_instrument_off_registers_nothing() {
        let config = GovernanceConfig {
            auto_instrument: false,
            ..Default::default()
        };
        let ctx = GovernanceContext::init(config, catalog()).unwrap();
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn adapter_filter_applies() {
        let config = GovernanceConfig {
            adapters: vec!["openai".into()],
            ..Default::default()
        };
        let ctx = GovernanceContext::init(config, catalog()).unwrap();
        // llamaindex is present but not wanted; openai is wanted but absent.
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = GovernanceConfig::default();
        config.export.on_full = "block".into();
        assert!(matches!(
            GovernanceContext::init(config, catalog()),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn default_attributes_are_canonical() {
        let mut config = GovernanceConfig::default();
        config.default_attributes.insert("team".into(), "search".into());
        let ctx = GovernanceContext::init(config, Arc::new(LibraryCatalog::new())).unwrap();
        let attrs = attribute_strings(&ctx.get_default_attributes());
        assert_eq!(attrs.values().collect::<Vec<_>>(), vec!["search"]);
    }

    #[test]
    fn hooked_calls_reach_sinks() {
        let catalog = catalog();
        let ctx = GovernanceContext::init(GovernanceConfig::default(), Arc::clone(&catalog)).unwrap();
        let sink = Arc::new(MemorySink::new());
        ctx.add_sink(sink.clone());

        let hook = catalog.get(llamaindex::LIBRARY).unwrap().hook("llm").unwrap();
        let answer = hook.call(
            |_: &&str| {
                CallEvent::new("llm")
                    .with("model_name", "gpt-4o")
                    .with("cost_usd", "0.25")
                    .with("session_id", "s-1")
            },
            || "forty-two",
        );
        assert_eq!(answer, "forty-two");

        ctx.flush();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), OperationKind::Synthesis);
        assert_eq!(records[0].cost_usd(), Decimal::new(25, 2));
    }

    #[test]
    fn uninstrument_restores_direct_path() {
        let catalog = catalog();
        let ctx = GovernanceContext::init(GovernanceConfig::default(), Arc::clone(&catalog)).unwrap();
        ctx.begin_run("r-1");

        let report = ctx.uninstrument();
        assert_eq!(report.unpatched, vec!["llamaindex"]);
        assert_eq!(report.finalized_runs, 1);
        assert!(ctx.is_shut_down());

        let handle = catalog.get(llamaindex::LIBRARY).unwrap();
        assert!(handle.hook_names().all(|h| !handle.hook(h).unwrap().is_hooked()));
        assert!(ctx.uninstrument().unpatched.is_empty());
    }

    #[test]
    fn drop_releases_hooks() {
        let catalog = catalog();
        {
            let _ctx = GovernanceContext::init(GovernanceConfig::default(), Arc::clone(&catalog)).unwrap();
        }
        let again = GovernanceContext::init(GovernanceConfig::default(), catalog).unwrap();
        assert!(again.status().adapters[0].is_active());
    }

    #[test]
    fn custom_pricing_overrides_defaults() {
        let mut config = GovernanceConfig::default();
        config.custom_pricing.insert(
            "gpt-4o".into(),
            genops_config::PricingOverrideConfig {
                input_per_m: Decimal::ONE,
                output_per_m: Decimal::TWO,
            },
        );
        let table = pricing_table(&config);
        assert_eq!(table.compute_cost("gpt-4o", 1_000_000, 1_000_000), Decimal::from(3));
    }

    #[test]
    fn replace_policies_takes_effect() {
        let ctx = GovernanceContext::init(GovernanceConfig::default(), Arc::new(LibraryCatalog::new())).unwrap();
        let policy = PolicyConfig {
            id: "cap".into(),
            scope: "session".into(),
            metric: "cost_usd".into(),
            threshold: Decimal::ONE,
            enforcement: "hard_cap".into(),
            repeatable: false,
        }
        .to_policy()
        .unwrap();
        ctx.replace_policies(vec![policy]);

        let call = RawCallContext::new(OperationKind::GenericCall, "gpt-4o")
            .with_cost(Decimal::TWO)
            .with_session("s-1");
        let observation = ctx.record_call(&call);
        assert_eq!(observation.alerts.len(), 1);
        assert!(ctx.is_blocked(&call.hints()));
        assert_eq!(ctx.status().policies, 1);
    }

    #[test]
    fn track_measures_the_call() {
        let ctx = GovernanceContext::init(GovernanceConfig::default(), Arc::new(LibraryCatalog::new())).unwrap();
        let (out, observation) = ctx.track(RawCallContext::new(OperationKind::Embedding, "text-embedding-3-small"), |call| {
            call.input_tokens = Some(1_000_000);
            call.output_tokens = Some(0);
            7
        });
        assert_eq!(out, 7);
        assert_eq!(observation.record.input_tokens(), 1_000_000);
        assert!(observation.record.cost_usd() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn background_tasks_run_inside_runtime() {
        let ctx = GovernanceContext::init(GovernanceConfig::default(), Arc::new(LibraryCatalog::new())).unwrap();
        assert!(ctx.status().background);
        ctx.uninstrument();
        assert!(!ctx.status().background);
    }
}
