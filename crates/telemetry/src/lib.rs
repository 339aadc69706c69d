//! Usage tracking, cost roll-up, RAG pipeline monitoring and budget
//! enforcement for GenOps.
//!
//! Every intercepted call becomes one immutable telemetry record with
//! normalized attributes and a decimal cost estimate. Records are rolled up
//! per operation, pipeline run and session; budget policies are evaluated on
//! every fresh snapshot and raise each threshold crossing once. Everything is
//! handed to the sinks through a bounded export queue so the instrumented
//! call never waits on a backend.

pub mod aggregator;
pub mod export;
pub mod governor;
pub mod normalizer;
pub mod pipeline;
pub mod policy;
pub mod pricing;
pub mod tracker;

pub use aggregator::{AggregatorSettings, CostAggregator, RecordRetention};
pub use export::{ExportStats, Exporter, ExporterSettings, LogSink, MemorySink, QueueFullPolicy};
pub use governor::{GovernancePipeline, GovernorSettings, MaintenanceReport, Observation, Route};
pub use normalizer::{AttributeNormalizer, Normalized};
pub use pipeline::{PipelineMonitor, PipelineSettings, RagPipelineAnalytics, StageAck, SummaryForwarder};
pub use policy::{PolicyEngine, PolicyEvaluation};
pub use pricing::{ModelPricing, PricingTable};
pub use tracker::UsageTracker;
