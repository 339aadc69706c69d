//! Cost aggregator — rolls telemetry records up into operation,
//! pipeline-run and session totals.
//!
//! Each scope id lives in its own `DashMap` entry, so updates to one scope
//! are linearized under that entry's shard lock while unrelated scopes
//! proceed in parallel. Decimal addition is exact, which makes the final
//! totals independent of the order records arrive in.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use genops_core::pipeline::RagPipelineSummary;
use genops_core::record::TelemetryRecord;
use genops_core::scope::{ScopeId, ScopeKind, ScopeTotals};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

const UNKNOWN_PROVIDER: &str = "unknown";

/// How many raw records the aggregator keeps after folding them in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordRetention {
    /// Keep only rolled-up totals.
    #[default]
    None,
    /// Keep the most recent `n` records for inspection.
    Last(usize),
}

impl RecordRetention {
    /// `0` means no retention.
    pub fn from_count(n: usize) -> Self {
        if n == 0 { Self::None } else { Self::Last(n) }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Scopes untouched for this long are evicted by [`CostAggregator::evict_idle`].
    pub idle_timeout: Duration,
    /// How long an evicted scope id is remembered as reopenable.
    pub tombstone_window: Duration,
    pub retention: RecordRetention,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::minutes(30),
            tombstone_window: Duration::hours(1),
            retention: RecordRetention::None,
        }
    }
}

struct ScopeState {
    totals: ScopeTotals,
    last_activity: DateTime<Utc>,
    /// Session the most recent record for this scope belonged to.
    session: Option<String>,
}

impl ScopeState {
    fn fresh(scope: ScopeId, record: &TelemetryRecord, reopened: bool, now: DateTime<Utc>) -> Self {
        Self {
            totals: ScopeTotals {
                scope,
                cost_usd: Decimal::ZERO,
                input_tokens: 0,
                output_tokens: 0,
                operation_count: 0,
                first_seen: record.started_at(),
                last_seen: record.ended_at(),
                reopened,
                revision: 0,
                cost_by_provider: BTreeMap::new(),
                cost_by_kind: BTreeMap::new(),
            },
            last_activity: now,
            session: None,
        }
    }

    fn apply(&mut self, record: &TelemetryRecord, revision: u64, now: DateTime<Utc>) {
        let totals = &mut self.totals;
        let cost = record.cost_usd();

        totals.cost_usd += cost;
        totals.input_tokens = totals.input_tokens.saturating_add(record.input_tokens());
        totals.output_tokens = totals.output_tokens.saturating_add(record.output_tokens());
        totals.operation_count = totals.operation_count.saturating_add(1);
        totals.first_seen = totals.first_seen.min(record.started_at());
        totals.last_seen = totals.last_seen.max(record.ended_at());
        debug_assert!(revision > totals.revision, "revision must increase");
        totals.revision = revision;

        let provider = record.provider().unwrap_or(UNKNOWN_PROVIDER);
        *totals
            .cost_by_provider
            .entry(provider.to_string())
            .or_insert(Decimal::ZERO) += cost;
        *totals.cost_by_kind.entry(record.kind()).or_insert(Decimal::ZERO) += cost;

        self.last_activity = self.last_activity.max(now);
        if let Some(session) = record.session_id() {
            self.session = Some(session.to_string());
        }
    }
}

/// Hierarchical cost roll-up with idle eviction.
pub struct CostAggregator {
    scopes: DashMap<ScopeId, ScopeState>,
    tombstones: DashMap<ScopeId, DateTime<Utc>>,
    retained: Mutex<VecDeque<TelemetryRecord>>,
    /// Aggregator-wide sequence, so revisions keep increasing across a reopen.
    revision: AtomicU64,
    settings: AggregatorSettings,
}

impl CostAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            scopes: DashMap::new(),
            tombstones: DashMap::new(),
            retained: Mutex::new(VecDeque::new()),
            revision: AtomicU64::new(0),
            settings,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Fold a record into every scope it belongs to and return the
    /// post-update snapshot of each, narrowest scope first.
    pub fn ingest(&self, record: &TelemetryRecord) -> Vec<ScopeTotals> {
        self.ingest_at(record, Utc::now())
    }

    /// [`ingest`](Self::ingest) with an explicit clock.
    pub fn ingest_at(&self, record: &TelemetryRecord, now: DateTime<Utc>) -> Vec<ScopeTotals> {
        let snapshots: Vec<ScopeTotals> = record
            .scopes()
            .into_iter()
            .map(|scope| {
                let mut state = self.scopes.entry(scope.clone()).or_insert_with(|| {
                    let reopened = self.tombstones.remove(&scope).is_some();
                    if reopened {
                        info!(scope = %scope, "Reopening evicted scope");
                    }
                    ScopeState::fresh(scope, record, reopened, now)
                });
                let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
                state.apply(record, revision, now);
                state.totals.clone()
            })
            .collect();

        if let RecordRetention::Last(n) = self.settings.retention {
            let mut retained = self.retained.lock();
            retained.push_back(record.clone());
            while retained.len() > n {
                retained.pop_front();
            }
        }

        debug!(
            operation_id = %record.operation_id(),
            scopes = snapshots.len(),
            cost = %record.cost_usd(),
            "Aggregated record"
        );
        snapshots
    }

    /// Fold every stage record of a finalized run in, returning the final
    /// snapshot of each touched scope.
    pub fn ingest_summary(&self, summary: &RagPipelineSummary) -> Vec<ScopeTotals> {
        let now = Utc::now();
        let mut latest: BTreeMap<ScopeId, ScopeTotals> = BTreeMap::new();
        for record in &summary.records {
            for snapshot in self.ingest_at(record, now) {
                match latest.get(&snapshot.scope) {
                    Some(seen) if seen.revision >= snapshot.revision => {}
                    _ => {
                        latest.insert(snapshot.scope.clone(), snapshot);
                    }
                }
            }
        }
        latest.into_values().collect()
    }

    pub fn snapshot(&self, scope: &ScopeId) -> Option<ScopeTotals> {
        self.scopes.get(scope).map(|s| s.totals.clone())
    }

    pub fn contains(&self, scope: &ScopeId) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Snapshots of every live scope of one kind, ordered by id.
    pub fn scopes(&self, kind: ScopeKind) -> Vec<ScopeTotals> {
        let mut out: Vec<ScopeTotals> = self
            .scopes
            .iter()
            .filter(|e| e.key().kind == kind)
            .map(|e| e.totals.clone())
            .collect();
        out.sort_by(|a, b| a.scope.cmp(&b.scope));
        out
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Retained raw records, oldest first. Empty unless retention is on.
    pub fn retained_records(&self) -> Vec<TelemetryRecord> {
        self.retained.lock().iter().cloned().collect()
    }

    /// Evict scopes idle past the timeout. Returns how many were removed.
    ///
    /// A record arriving later for an evicted pipeline-run or session
    /// recreates it with `reopened = true` while its tombstone lasts.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.settings.idle_timeout;
        let idle: Vec<ScopeId> = self
            .scopes
            .iter()
            .filter(|e| e.last_activity < cutoff)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for scope in idle {
            // Re-checked under the shard lock; an ingest may have raced us.
            // The tombstone goes in under that same lock, so a record that
            // recreates the scope right after always sees it.
            let removed = self.scopes.remove_if(&scope, |id, state| {
                let idle = state.last_activity < cutoff;
                if idle {
                    self.tombstone(id.clone(), now);
                }
                idle
            });
            if removed.is_some() {
                evicted += 1;
            }
        }

        let window = self.settings.tombstone_window;
        self.tombstones.retain(|_, at| now - *at < window);

        if evicted > 0 {
            info!(evicted, remaining = self.scopes.len(), "Evicted idle scopes");
        }
        evicted
    }

    /// Close a session explicitly, evicting it together with every
    /// pipeline-run and operation scope last attributed to it.
    ///
    /// Scopes touched by a record ingested after the close began survive,
    /// and a session recreated by such a record comes back `reopened`.
    pub fn close_session(&self, session_id: &str) -> Option<ScopeTotals> {
        let scope = ScopeId::session(session_id);
        let now = Utc::now();
        // Every update from here on gets a later revision.
        let cutoff = self.revision.load(Ordering::SeqCst);

        let closed = self
            .scopes
            .remove_if(&scope, |id, _| {
                self.tombstone(id.clone(), now);
                true
            })
            .map(|(_, state)| state.totals);

        let before = self.scopes.len();
        self.scopes.retain(|id, state| {
            *id == scope
                || state.session.as_deref() != Some(session_id)
                || state.totals.revision > cutoff
        });
        let children = before.saturating_sub(self.scopes.len());

        if let Some(totals) = &closed {
            info!(
                session = session_id,
                cost = %totals.cost_usd,
                operations = totals.operation_count,
                children,
                "Closed session"
            );
        }
        closed
    }

    fn tombstone(&self, scope: ScopeId, at: DateTime<Utc>) {
        // Operation ids never recur.
        if scope.kind != ScopeKind::Operation {
            self.tombstones.insert(scope, at);
        }
    }
}

impl Default for CostAggregator {
    fn default() -> Self {
        Self::new(AggregatorSettings::default())
    }
}
