//! # GenOps Core
//!
//! Domain types, capability traits, and error definitions for the GenOps
//! governance engine. It holds no runtime machinery (no async runtime, no
//! I/O); it defines the model every other crate implements against.
//!
//! ## Layout
//!
//! - [`record`] — the immutable per-call [`TelemetryRecord`] and its attributes
//! - [`scope`] — aggregation scopes and their [`ScopeTotals`] snapshots
//! - [`pipeline`] — grouped RAG pipeline-run summaries
//! - [`policy`] — budget policies, alerts and violations
//! - [`adapter`] — the provider adapter capability and raw call shapes
//! - [`sink`] — the telemetry sink interface exporters write to

pub mod error;
pub mod record;
pub mod scope;
pub mod pipeline;
pub mod policy;
pub mod adapter;
pub mod sink;

// Re-export key types at crate root for ergonomics
pub use error::{CompatibilityError, Error, NormalizationError, Result, SinkError};
pub use record::{attrs, AttributeValue, CanonicalAttributes, OperationKind, RecordParts, TelemetryRecord};
pub use scope::{ScopeId, ScopeKind, ScopeTotals};
pub use pipeline::{EmbeddingMetrics, RagPipelineSummary, RetrievalMetrics, SynthesisMetrics};
pub use policy::{
    AlertMode, BudgetAlert, BudgetPolicy, Enforcement, PolicyMetric, PolicyViolation,
};
pub use adapter::{
    AdapterState, CallEvent, CallObserver, ProviderAdapter, RawCallContext, RegistrationState,
    ScopeHints,
};
pub use sink::{ExportItem, TelemetrySink};
