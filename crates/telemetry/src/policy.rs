//! Policy engine — evaluates budget policies against scope snapshots and
//! raises each threshold crossing exactly once.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use genops_core::policy::{AlertMode, BudgetAlert, BudgetPolicy, Enforcement, PolicyViolation};
use genops_core::scope::{ScopeId, ScopeTotals};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Outcome of evaluating one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyEvaluation {
    /// New threshold crossings. Each (policy, scope) pair fires once per
    /// crossing.
    pub alerts: Vec<BudgetAlert>,
    /// Every policy currently above its threshold for the scope.
    pub violations: Vec<PolicyViolation>,
    /// A hard cap is exceeded. Advisory.
    pub should_block: bool,
}

struct AlertState {
    armed: bool,
    last_alerted: Option<Decimal>,
    /// Newest snapshot revision applied; older snapshots are ignored.
    revision: u64,
}

type PairKey = (String, ScopeId);

/// Budget evaluation with per (policy, scope) alert de-duplication.
pub struct PolicyEngine {
    policies: RwLock<Arc<Vec<BudgetPolicy>>>,
    alert_state: DashMap<PairKey, AlertState>,
    /// Scopes over a hard cap, with the revision that put them there.
    blocked: DashMap<ScopeId, u64>,
}

impl PolicyEngine {
    pub fn new(policies: Vec<BudgetPolicy>) -> Self {
        Self {
            policies: RwLock::new(Arc::new(policies)),
            alert_state: DashMap::new(),
            blocked: DashMap::new(),
        }
    }

    pub fn policies(&self) -> Arc<Vec<BudgetPolicy>> {
        Arc::clone(&self.policies.read())
    }

    /// Swap the whole policy set. De-dup state of policies that still exist
    /// is kept; everything else is dropped.
    pub fn replace_policies(&self, policies: Vec<BudgetPolicy>) {
        let ids: HashSet<String> = policies.iter().map(|p| p.id.clone()).collect();
        *self.policies.write() = Arc::new(policies);
        self.alert_state.retain(|(policy_id, _), _| ids.contains(policy_id));
        self.blocked.clear();
        debug!(policies = ids.len(), "Replaced budget policies");
    }

    /// Evaluate every policy bound to the snapshot's scope kind.
    pub fn evaluate(&self, totals: &ScopeTotals) -> PolicyEvaluation {
        let policies = self.policies();
        let mut evaluation = PolicyEvaluation::default();
        let mut has_hard_cap = false;

        for policy in policies.iter().filter(|p| p.scope_kind == totals.scope.kind) {
            let observed = policy.metric.observe(totals);
            let exceeded = policy.is_exceeded_by(observed);
            let hard_cap = policy.enforcement == Enforcement::HardCap;
            has_hard_cap |= hard_cap;

            if exceeded {
                evaluation.should_block |= hard_cap;
                evaluation.violations.push(PolicyViolation {
                    policy_id: policy.id.clone(),
                    scope: totals.scope.clone(),
                    observed,
                    threshold: policy.threshold,
                    enforcement: policy.enforcement,
                });
            }

            if let Some(alert) = self.transition(policy, totals, observed, exceeded) {
                warn!(
                    policy = %alert.policy_id,
                    scope = %alert.scope,
                    observed = %alert.observed,
                    threshold = %alert.threshold,
                    should_block = alert.should_block,
                    "Budget threshold crossed"
                );
                evaluation.alerts.push(alert);
            }
        }

        if has_hard_cap {
            self.update_blocked(totals, evaluation.should_block);
        }
        evaluation
    }

    /// Whether the latest evaluation of `scope` exceeded a hard cap.
    pub fn is_blocked(&self, scope: &ScopeId) -> bool {
        self.blocked.contains_key(scope)
    }

    /// Drop every piece of state held for `scope`.
    pub fn forget_scope(&self, scope: &ScopeId) {
        self.alert_state.retain(|(_, s), _| s != scope);
        self.blocked.remove(scope);
    }

    /// Drop state for scopes `keep` rejects, e.g. after eviction.
    pub fn retain_scopes(&self, keep: impl Fn(&ScopeId) -> bool) {
        self.alert_state.retain(|(_, scope), _| keep(scope));
        self.blocked.retain(|scope, _| keep(scope));
    }

    /// The value that last fired `policy_id` for `scope`.
    pub fn last_alerted(&self, policy_id: &str, scope: &ScopeId) -> Option<Decimal> {
        self.alert_state
            .get(&(policy_id.to_string(), scope.clone()))
            .and_then(|s| s.last_alerted)
    }

    fn transition(
        &self,
        policy: &BudgetPolicy,
        totals: &ScopeTotals,
        observed: Decimal,
        exceeded: bool,
    ) -> Option<BudgetAlert> {
        let key = (policy.id.clone(), totals.scope.clone());

        // Pairs only get state once they cross; below-threshold snapshots of
        // untracked pairs need none.
        let mut state = if exceeded {
            self.alert_state.entry(key).or_insert(AlertState {
                armed: true,
                last_alerted: None,
                revision: 0,
            })
        } else {
            self.alert_state.get_mut(&key)?
        };

        if totals.revision <= state.revision {
            return None;
        }
        state.revision = totals.revision;

        if exceeded && state.armed {
            state.armed = false;
            state.last_alerted = Some(observed);
            return Some(BudgetAlert {
                policy_id: policy.id.clone(),
                scope: totals.scope.clone(),
                metric: policy.metric,
                threshold: policy.threshold,
                observed,
                enforcement: policy.enforcement,
                should_block: policy.enforcement == Enforcement::HardCap,
                timestamp: Utc::now(),
            });
        }

        if !exceeded && !state.armed && policy.alerting == AlertMode::Repeatable {
            state.armed = true;
        }
        None
    }

    fn update_blocked(&self, totals: &ScopeTotals, blocked: bool) {
        if blocked {
            self.blocked
                .entry(totals.scope.clone())
                .and_modify(|rev| *rev = (*rev).max(totals.revision))
                .or_insert(totals.revision);
        } else {
            self.blocked
                .remove_if(&totals.scope, |_, rev| *rev < totals.revision);
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genops_core::policy::PolicyMetric;
    use genops_core::scope::ScopeKind;
    use std::collections::BTreeMap;

    fn totals(scope: ScopeId, cost: Decimal, revision: u64) -> ScopeTotals {
        let now = Utc::now();
        ScopeTotals {
            scope,
            cost_usd: cost,
            input_tokens: 0,
            output_tokens: 0,
            operation_count: 1,
            first_seen: now,
            last_seen: now,
            reopened: false,
            revision,
            cost_by_provider: BTreeMap::new(),
            cost_by_kind: BTreeMap::new(),
        }
    }

    fn session(cost: &str, revision: u64) -> ScopeTotals {
        totals(ScopeId::session("s"), cost.parse().unwrap(), revision)
    }

    #[test]
    fn below_threshold_is_quiet() {
        let engine = PolicyEngine::new(vec![BudgetPolicy::session_cost_cap("cap", Decimal::TEN)]);
        let eval = engine.evaluate(&session("9.99", 1));
        assert!(eval.alerts.is_empty());
        assert!(eval.violations.is_empty());
        assert!(!eval.should_block);
    }

    #[test]
    fn crossing_fires_once() {
        let engine = PolicyEngine::new(vec![BudgetPolicy::session_cost_cap("cap", Decimal::TEN)]);
        engine.evaluate(&session("9.99", 1));

        let eval = engine.evaluate(&session("10.01", 2));
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].observed, "10.01".parse::<Decimal>().unwrap());
        assert!(eval.alerts[0].should_block);
        assert!(eval.should_block);
        assert!(engine.is_blocked(&ScopeId::session("s")));

        let again = engine.evaluate(&session("12.00", 3));
        assert!(again.alerts.is_empty());
        assert_eq!(again.violations.len(), 1);
        assert!(again.should_block);
    }

    #[test]
    fn exactly_at_threshold_does_not_fire() {
        let engine = PolicyEngine::new(vec![BudgetPolicy::session_cost_cap("cap", Decimal::TEN)]);
        assert!(engine.evaluate(&session("10", 1)).alerts.is_empty());
    }

    #[test]
    fn one_shot_stays_disarmed() {
        let engine = PolicyEngine::new(vec![BudgetPolicy::session_cost_cap("cap", Decimal::ONE)]);
        assert_eq!(engine.evaluate(&session("2", 1)).alerts.len(), 1);
        assert!(engine.evaluate(&session("0.5", 2)).alerts.is_empty());
        assert!(engine.evaluate(&session("3", 3)).alerts.is_empty());
    }

    #[test]
    fn repeatable_rearms_below_threshold() {
        let policy = BudgetPolicy::session_cost_cap("cap", Decimal::ONE)
            .with_alerting(AlertMode::Repeatable);
        let engine = PolicyEngine::new(vec![policy]);
        assert_eq!(engine.evaluate(&session("2", 1)).alerts.len(), 1);
        assert!(engine.evaluate(&session("3", 2)).alerts.is_empty());
        assert!(engine.evaluate(&session("1", 3)).alerts.is_empty());
        assert_eq!(engine.evaluate(&session("1.5", 4)).alerts.len(), 1);
    }

    #[test]
    fn stale_snapshot_is_ignored() {
        let policy = BudgetPolicy::session_cost_cap("cap", Decimal::ONE)
            .with_alerting(AlertMode::Repeatable);
        let engine = PolicyEngine::new(vec![policy]);
        assert_eq!(engine.evaluate(&session("2", 5)).alerts.len(), 1);
        // An older, lower snapshot must not re-arm the pair.
        engine.evaluate(&session("0.5", 4));
        assert!(engine.evaluate(&session("2.5", 6)).alerts.is_empty());
    }

    #[test]
    fn soft_warn_never_blocks() {
        let policy = BudgetPolicy::session_cost_cap("warn", Decimal::ONE)
            .with_enforcement(Enforcement::SoftWarn);
        let engine = PolicyEngine::new(vec![policy]);
        let eval = engine.evaluate(&session("5", 1));
        assert_eq!(eval.alerts.len(), 1);
        assert!(!eval.alerts[0].should_block);
        assert!(!eval.should_block);
        assert!(!engine.is_blocked(&ScopeId::session("s")));
    }

    #[test]
    fn policies_bind_to_scope_kind() {
        let mut policy = BudgetPolicy::session_cost_cap("run-cap", Decimal::ONE);
        policy.scope_kind = ScopeKind::PipelineRun;
        let engine = PolicyEngine::new(vec![policy]);

        assert!(engine.evaluate(&session("5", 1)).alerts.is_empty());
        let run = totals(ScopeId::pipeline_run("r"), Decimal::from(5), 2);
        assert_eq!(engine.evaluate(&run).alerts.len(), 1);
    }

    #[test]
    fn token_metric() {
        let policy = BudgetPolicy::session_cost_cap("tokens", Decimal::from(1000))
            .with_metric(PolicyMetric::TotalTokens);
        let engine = PolicyEngine::new(vec![policy]);
        let mut snap = session("0", 1);
        snap.input_tokens = 900;
        snap.output_tokens = 200;
        let eval = engine.evaluate(&snap);
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].observed, Decimal::from(1100));
    }

    #[test]
    fn replace_policies_clears_removed_state() {
        let engine = PolicyEngine::new(vec![BudgetPolicy::session_cost_cap("old", Decimal::ONE)]);
        engine.evaluate(&session("2", 1));
        assert!(engine.last_alerted("old", &ScopeId::session("s")).is_some());

        engine.replace_policies(vec![BudgetPolicy::session_cost_cap("new", Decimal::ONE)]);
        assert!(engine.last_alerted("old", &ScopeId::session("s")).is_none());
        assert!(!engine.is_blocked(&ScopeId::session("s")));
        assert_eq!(engine.evaluate(&session("2", 2)).alerts.len(), 1);
    }

    #[test]
    fn forget_scope_rearms() {
        let engine = PolicyEngine::new(vec![BudgetPolicy::session_cost_cap("cap", Decimal::ONE)]);
        engine.evaluate(&session("2", 1));
        engine.forget_scope(&ScopeId::session("s"));
        assert!(!engine.is_blocked(&ScopeId::session("s")));
        assert_eq!(engine.evaluate(&session("2", 2)).alerts.len(), 1);
    }

    #[test]
    fn concurrent_crossings_fire_once() {
        let engine = Arc::new(PolicyEngine::new(vec![BudgetPolicy::session_cost_cap(
            "cap",
            Decimal::TEN,
        )]));
        let handles: Vec<_> = (1..=64u64)
            .map(|rev| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.evaluate(&session("11", rev)).alerts.len())
            })
            .collect();
        let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(fired, 1);
    }
}
