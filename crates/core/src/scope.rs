//! Aggregation scopes and their rolled-up totals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::record::OperationKind;

/// A level of aggregation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// A single intercepted call.
    Operation,
    /// One execution of a multi-stage RAG workflow.
    PipelineRun,
    /// A caller-defined session spanning many runs and calls.
    Session,
}

impl ScopeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "operation" => Some(Self::Operation),
            "pipeline_run" => Some(Self::PipelineRun),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation => write!(f, "operation"),
            Self::PipelineRun => write!(f, "pipeline_run"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// Identifies one scope instance, e.g. `session:alice-42`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId {
    pub kind: ScopeKind,
    pub id: String,
}

impl ScopeId {
    pub fn new(kind: ScopeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self::new(ScopeKind::Session, id)
    }

    pub fn pipeline_run(id: impl Into<String>) -> Self {
        Self::new(ScopeKind::PipelineRun, id)
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Point-in-time view of one scope's running totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeTotals {
    /// Which scope these totals belong to.
    pub scope: ScopeId,
    /// Cumulative cost in USD.
    pub cost_usd: Decimal,
    /// Cumulative input tokens.
    pub input_tokens: u64,
    /// Cumulative output tokens.
    pub output_tokens: u64,
    /// Number of records folded in.
    pub operation_count: u64,
    /// Earliest record start seen.
    pub first_seen: DateTime<Utc>,
    /// Latest record end seen.
    pub last_seen: DateTime<Utc>,
    /// Set when the scope was evicted and recreated by a late record.
    pub reopened: bool,
    /// Strictly increases on every update, including across a reopen;
    /// orders snapshots of the same scope.
    pub revision: u64,
    /// Cost broken down by provider id.
    #[serde(default)]
    pub cost_by_provider: BTreeMap<String, Decimal>,
    /// Cost broken down by operation kind.
    #[serde(default)]
    pub cost_by_kind: BTreeMap<OperationKind, Decimal>,
}

impl ScopeTotals {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}
