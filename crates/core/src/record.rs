//! The per-call telemetry record and its canonical attributes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scope::{ScopeId, ScopeKind};

/// Well-known canonical attribute keys.
pub mod attrs {
    pub const MODEL: &str = "genops.model";
    pub const PROVIDER: &str = "genops.provider";
    pub const OPERATION: &str = "genops.operation";
    pub const TOKENS_INPUT: &str = "genops.tokens.input";
    pub const TOKENS_OUTPUT: &str = "genops.tokens.output";
    pub const LATENCY_MS: &str = "genops.latency_ms";
    pub const INCOMPLETE: &str = "genops.incomplete";
    pub const INCOMPLETE_REASON: &str = "genops.incomplete.reason";

    // Governance attribution
    pub const TEAM: &str = "genops.team";
    pub const PROJECT: &str = "genops.project";
    pub const ENVIRONMENT: &str = "genops.environment";
    pub const CUSTOMER_ID: &str = "genops.customer_id";
    pub const FEATURE: &str = "genops.feature";

    // Retrieval quality
    pub const RETRIEVAL_DOCUMENTS: &str = "genops.retrieval.documents";
    pub const RETRIEVAL_SCORE: &str = "genops.retrieval.score";
    pub const RETRIEVAL_TOP_K: &str = "genops.retrieval.top_k";

    /// Prefix for provider-specific metadata carried through verbatim.
    pub const EXTRA_PREFIX: &str = "genops.extra.";
}

// ── Operation kind ────────────────────────────────────────────────────────

/// The kind of work an intercepted call performed.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Turning text into vectors.
    Embedding,
    /// Fetching documents from an index.
    Retrieval,
    /// Generating an answer from retrieved context.
    Synthesis,
    /// Any other provider call (chat completion, tool call, ...).
    GenericCall,
}

impl OperationKind {
    /// Position in the canonical RAG order, `None` for calls outside it.
    pub fn stage_rank(self) -> Option<u8> {
        match self {
            Self::Embedding => Some(0),
            Self::Retrieval => Some(1),
            Self::Synthesis => Some(2),
            Self::GenericCall => None,
        }
    }

    /// Parse the canonical snake_case name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "embedding" => Some(Self::Embedding),
            "retrieval" => Some(Self::Retrieval),
            "synthesis" => Some(Self::Synthesis),
            "generic_call" => Some(Self::GenericCall),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::GenericCall => write!(f, "generic_call"),
        }
    }
}

// ── Attributes ────────────────────────────────────────────────────────────

/// A typed canonical attribute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for AttributeValue {
    fn from(i: u64) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Normalized, provider-independent attributes of one call.
///
/// Ordered so the serialized form of a record is deterministic.
pub type CanonicalAttributes = BTreeMap<String, AttributeValue>;

// ── Record ────────────────────────────────────────────────────────────────

/// Everything needed to build a [`TelemetryRecord`].
#[derive(Debug, Clone)]
pub struct RecordParts {
    pub kind: OperationKind,
    pub attributes: CanonicalAttributes,
    pub cost_usd: Decimal,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub pipeline_run_id: Option<String>,
    pub session_id: Option<String>,
    pub incomplete: bool,
}

/// One intercepted call, immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRecord {
    operation_id: String,
    kind: OperationKind,
    attributes: CanonicalAttributes,
    cost_usd: Decimal,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pipeline_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(default)]
    incomplete: bool,
}

impl TelemetryRecord {
    /// Build a record with a fresh operation id.
    ///
    /// Negative costs are clamped to zero and an inverted time range is
    /// collapsed to its start, so scope totals can only grow.
    pub fn new(parts: RecordParts) -> Self {
        let ended_at = parts.ended_at.max(parts.started_at);
        Self {
            operation_id: Uuid::new_v4().to_string(),
            kind: parts.kind,
            attributes: parts.attributes,
            cost_usd: parts.cost_usd.max(Decimal::ZERO),
            started_at: parts.started_at,
            ended_at,
            pipeline_run_id: parts.pipeline_run_id.filter(|s| !s.is_empty()),
            session_id: parts.session_id.filter(|s| !s.is_empty()),
            incomplete: parts.incomplete,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn attributes(&self) -> &CanonicalAttributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn cost_usd(&self) -> Decimal {
        self.cost_usd
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn pipeline_run_id(&self) -> Option<&str> {
        self.pipeline_run_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether the record was degraded because required metadata was missing.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub fn model(&self) -> Option<&str> {
        self.attribute(attrs::MODEL).and_then(AttributeValue::as_str)
    }

    pub fn provider(&self) -> Option<&str> {
        self.attribute(attrs::PROVIDER).and_then(AttributeValue::as_str)
    }

    pub fn input_tokens(&self) -> u64 {
        self.token_attr(attrs::TOKENS_INPUT)
    }

    pub fn output_tokens(&self) -> u64 {
        self.token_attr(attrs::TOKENS_OUTPUT)
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens().saturating_add(self.output_tokens())
    }

    pub fn latency_ms(&self) -> u64 {
        self.token_attr(attrs::LATENCY_MS)
    }

    /// Every scope this record contributes to, narrowest first.
    pub fn scopes(&self) -> Vec<ScopeId> {
        let mut scopes = vec![ScopeId::new(ScopeKind::Operation, &self.operation_id)];
        if let Some(run) = &self.pipeline_run_id {
            scopes.push(ScopeId::new(ScopeKind::PipelineRun, run));
        }
        if let Some(session) = &self.session_id {
            scopes.push(ScopeId::new(ScopeKind::Session, session));
        }
        scopes
    }

    fn token_attr(&self, key: &str) -> u64 {
        self.attribute(key)
            .and_then(AttributeValue::as_i64)
            .map(|v| v.max(0) as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(cost: Decimal) -> RecordParts {
        let now = Utc::now();
        let mut attributes = CanonicalAttributes::new();
        attributes.insert(attrs::MODEL.into(), "gpt-4o".into());
        attributes.insert(attrs::TOKENS_INPUT.into(), AttributeValue::Int(120));
        attributes.insert(attrs::TOKENS_OUTPUT.into(), AttributeValue::Int(30));
        RecordParts {
            kind: OperationKind::Synthesis,
            attributes,
            cost_usd: cost,
            started_at: now,
            ended_at: now,
            pipeline_run_id: Some("run-1".into()),
            session_id: Some("sess-1".into()),
            incomplete: false,
        }
    }

    #[test]
    fn record_exposes_token_counts() {
        let record = TelemetryRecord::new(parts(Decimal::new(5, 3)));
        assert_eq!(record.input_tokens(), 120);
        assert_eq!(record.output_tokens(), 30);
        assert_eq!(record.total_tokens(), 150);
        assert_eq!(record.model(), Some("gpt-4o"));
        assert_eq!(record.cost_usd(), Decimal::new(5, 3));
    }

    #[test]
    fn record_ids_are_unique() {
        let a = TelemetryRecord::new(parts(Decimal::ONE));
        let b = TelemetryRecord::new(parts(Decimal::ONE));
        assert_ne!(a.operation_id(), b.operation_id());
    }

    #[test]
    fn negative_cost_is_clamped() {
        let record = TelemetryRecord::new(parts(Decimal::new(-3, 0)));
        assert_eq!(record.cost_usd(), Decimal::ZERO);
    }

    #[test]
    fn inverted_time_range_collapses() {
        let mut p = parts(Decimal::ONE);
        p.ended_at = p.started_at - chrono::Duration::seconds(5);
        let record = TelemetryRecord::new(p);
        assert_eq!(record.ended_at(), record.started_at());
    }

    #[test]
    fn scopes_narrowest_first() {
        let record = TelemetryRecord::new(parts(Decimal::ONE));
        let scopes = record.scopes();
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes[0].kind, ScopeKind::Operation);
        assert_eq!(scopes[1], ScopeId::new(ScopeKind::PipelineRun, "run-1"));
        assert_eq!(scopes[2], ScopeId::new(ScopeKind::Session, "sess-1"));
    }

    #[test]
    fn empty_scope_ids_are_dropped() {
        let mut p = parts(Decimal::ONE);
        p.session_id = Some(String::new());
        let record = TelemetryRecord::new(p);
        assert!(record.session_id().is_none());
        assert_eq!(record.scopes().len(), 2);
    }

    #[test]
    fn stage_rank_follows_rag_order() {
        assert!(OperationKind::Embedding.stage_rank() < OperationKind::Retrieval.stage_rank());
        assert!(OperationKind::Retrieval.stage_rank() < OperationKind::Synthesis.stage_rank());
        assert_eq!(OperationKind::GenericCall.stage_rank(), None);
    }

    #[test]
    fn operation_kind_display_and_parse() {
        for kind in [
            OperationKind::Embedding,
            OperationKind::Retrieval,
            OperationKind::Synthesis,
            OperationKind::GenericCall,
        ] {
            assert_eq!(OperationKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(OperationKind::parse("rerank"), None);
    }

    #[test]
    fn record_serialization_is_deterministic() {
        let record = TelemetryRecord::new(parts(Decimal::new(125, 4)));
        let a = serde_json::to_string(&record).unwrap();
        let b = serde_json::to_string(&record.clone()).unwrap();
        assert_eq!(a, b);

        let roundtrip: TelemetryRecord = serde_json::from_str(&a).unwrap();
        assert_eq!(roundtrip, record);
    }
}
