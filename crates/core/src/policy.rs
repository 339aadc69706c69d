//! Budget policies and the alerts they raise.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::scope::{ScopeId, ScopeKind, ScopeTotals};

/// What a policy measures on a scope snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMetric {
    /// Cumulative cost in USD.
    #[default]
    CostUsd,
    /// Cumulative input + output tokens.
    TotalTokens,
}

impl PolicyMetric {
    /// Read this metric off a snapshot.
    pub fn observe(self, totals: &ScopeTotals) -> Decimal {
        match self {
            Self::CostUsd => totals.cost_usd,
            Self::TotalTokens => Decimal::from(totals.total_tokens()),
        }
    }
}

impl std::fmt::Display for PolicyMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CostUsd => write!(f, "cost_usd"),
            Self::TotalTokens => write!(f, "total_tokens"),
        }
    }
}

/// How strongly a policy applies once exceeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Advise callers to stop issuing operations in the scope.
    #[default]
    HardCap,
    /// Alert only.
    SoftWarn,
}

impl std::fmt::Display for Enforcement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardCap => write!(f, "hard_cap"),
            Self::SoftWarn => write!(f, "soft_warn"),
        }
    }
}

/// Whether a policy may alert more than once for the same scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    /// Alert on the first crossing only.
    #[default]
    OneShot,
    /// Re-arm when the value falls back to or below the threshold.
    Repeatable,
}

/// A budget rule over one scope kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetPolicy {
    pub id: String,
    pub scope_kind: ScopeKind,
    #[serde(default)]
    pub metric: PolicyMetric,
    pub threshold: Decimal,
    #[serde(default)]
    pub enforcement: Enforcement,
    #[serde(default)]
    pub alerting: AlertMode,
}

impl BudgetPolicy {
    /// A one-shot hard cap on session cost.
    pub fn session_cost_cap(id: impl Into<String>, threshold_usd: Decimal) -> Self {
        Self {
            id: id.into(),
            scope_kind: ScopeKind::Session,
            metric: PolicyMetric::CostUsd,
            threshold: threshold_usd,
            enforcement: Enforcement::HardCap,
            alerting: AlertMode::OneShot,
        }
    }

    pub fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn with_alerting(mut self, alerting: AlertMode) -> Self {
        self.alerting = alerting;
        self
    }

    pub fn with_metric(mut self, metric: PolicyMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn is_exceeded_by(&self, observed: Decimal) -> bool {
        observed > self.threshold
    }
}

/// Raised once per threshold crossing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetAlert {
    pub policy_id: String,
    pub scope: ScopeId,
    pub metric: PolicyMetric,
    pub threshold: Decimal,
    /// The value that crossed the threshold.
    pub observed: Decimal,
    pub enforcement: Enforcement,
    pub should_block: bool,
    pub timestamp: DateTime<Utc>,
}

/// Soft signal: a policy is currently above its threshold for a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyViolation {
    pub policy_id: String,
    pub scope: ScopeId,
    pub observed: Decimal,
    pub threshold: Decimal,
    pub enforcement: Enforcement,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeded_is_strict() {
        let policy = BudgetPolicy::session_cost_cap("cap", Decimal::TEN);
        assert!(!policy.is_exceeded_by(Decimal::TEN));
        assert!(policy.is_exceeded_by(Decimal::new(1001, 2)));
    }

    #[test]
    fn policy_defaults_from_json() {
        let policy: BudgetPolicy = serde_json::from_str(
            r#"{"id":"p","scope_kind":"pipeline_run","threshold":"2.50"}"#,
        )
        .unwrap();
        assert_eq!(policy.metric, PolicyMetric::CostUsd);
        assert_eq!(policy.enforcement, Enforcement::HardCap);
        assert_eq!(policy.alerting, AlertMode::OneShot);
        assert_eq!(policy.threshold, Decimal::new(250, 2));
    }
}
