//! Grouped summaries of RAG pipeline runs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::record::{OperationKind, TelemetryRecord};

/// Embedding-stage metrics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingMetrics {
    pub calls: u64,
    pub input_tokens: u64,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
    pub models: BTreeSet<String>,
}

/// Retrieval-stage metrics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalMetrics {
    pub calls: u64,
    /// Documents returned across all retrieval calls.
    pub documents: u64,
    /// Mean relevance score over calls that reported one.
    pub mean_score: Option<f64>,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
}

/// Synthesis-stage metrics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SynthesisMetrics {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
    pub models: BTreeSet<String>,
}

/// The single summary emitted when a pipeline run is finalized.
///
/// Handed out behind an `Arc` and never modified after emission. A stage
/// arriving after finalization goes to a successor with a higher
/// `generation`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagPipelineSummary {
    pub pipeline_run_id: String,
    /// 0 for the original run, incremented for each reopened successor.
    pub generation: u32,
    /// Session of the first stage that carried one.
    pub session_id: Option<String>,
    /// Stage kinds in the order they were recorded.
    pub stages: Vec<OperationKind>,
    /// The stage records themselves, in recorded order.
    pub records: Vec<TelemetryRecord>,
    pub embedding: EmbeddingMetrics,
    pub retrieval: RetrievalMetrics,
    pub synthesis: SynthesisMetrics,
    /// Cost of calls outside the canonical stages.
    pub other_cost_usd: Decimal,
    pub total_cost_usd: Decimal,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// A stage arrived after a later canonical stage had already been seen.
    pub out_of_order: bool,
    /// Finalized by the idle sweep rather than by the caller.
    pub timed_out: bool,
    /// This is a successor opened by a late stage.
    pub reopened: bool,
    pub started_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
}

impl RagPipelineSummary {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens.saturating_add(self.total_output_tokens)
    }
}
