//! Usage tracker — turns one intercepted call into one immutable
//! [`TelemetryRecord`].
//!
//! Observability must never silently lose an operation: when required
//! metadata is missing the tracker still emits a record, tagged incomplete.

use std::sync::Arc;

use chrono::Utc;
use genops_core::adapter::RawCallContext;
use genops_core::error::NormalizationError;
use genops_core::record::{attrs, AttributeValue, OperationKind, RecordParts, TelemetryRecord};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::normalizer::{AttributeNormalizer, Normalized};
use crate::pricing::PricingTable;

const UNKNOWN_MODEL: &str = "unknown";

/// Builds telemetry records from raw call metadata.
pub struct UsageTracker {
    normalizer: AttributeNormalizer,
    pricing: Arc<PricingTable>,
}

impl UsageTracker {
    pub fn new(normalizer: AttributeNormalizer, pricing: Arc<PricingTable>) -> Self {
        Self {
            normalizer,
            pricing,
        }
    }

    pub fn normalizer(&self) -> &AttributeNormalizer {
        &self.normalizer
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Build a complete record, or fail if model identity or operation kind
    /// is missing.
    pub fn try_record(&self, ctx: &RawCallContext) -> Result<TelemetryRecord, NormalizationError> {
        let normalized = self.normalizer.normalize(ctx);
        if let Some(err) = normalized.blocking_error() {
            return Err(err.clone());
        }
        Ok(self.build(ctx, normalized, false))
    }

    /// Build a record, degrading to an incomplete one instead of failing.
    pub fn record(&self, ctx: &RawCallContext) -> TelemetryRecord {
        let normalized = self.normalizer.normalize(ctx);
        let incomplete = normalized.blocking_error().is_some();

        for err in &normalized.errors {
            warn!(error = %err, model = ?ctx.model, "Call metadata could not be fully normalized");
        }

        let record = self.build(ctx, normalized, incomplete);
        debug!(
            operation_id = %record.operation_id(),
            kind = %record.kind(),
            cost = %record.cost_usd(),
            incomplete = record.is_incomplete(),
            "Recorded call"
        );
        record
    }

    /// Time `f` and record it. `f` may fill in what is only known after the
    /// call returns, such as token counts.
    pub fn track<T>(
        &self,
        mut ctx: RawCallContext,
        f: impl FnOnce(&mut RawCallContext) -> T,
    ) -> (T, TelemetryRecord) {
        ctx.started_at = Utc::now();
        let out = f(&mut ctx);
        ctx.ended_at = Utc::now();
        let record = self.record(&ctx);
        (out, record)
    }

    fn build(&self, ctx: &RawCallContext, normalized: Normalized, incomplete: bool) -> TelemetryRecord {
        let cost_usd = self.estimate_cost(ctx, &normalized);
        let Normalized {
            kind,
            mut attributes,
            errors,
            ..
        } = normalized;

        if incomplete {
            attributes
                .entry(attrs::MODEL.into())
                .or_insert_with(|| UNKNOWN_MODEL.into());
            attributes.insert(attrs::INCOMPLETE.into(), AttributeValue::Bool(true));
            let reason = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            attributes.insert(attrs::INCOMPLETE_REASON.into(), reason.into());
        }

        TelemetryRecord::new(RecordParts {
            kind: kind.unwrap_or(OperationKind::GenericCall),
            attributes,
            cost_usd,
            started_at: ctx.started_at,
            ended_at: ctx.ended_at,
            pipeline_run_id: ctx.pipeline_run_id.clone(),
            session_id: ctx.session_id.clone(),
            incomplete,
        })
    }

    fn estimate_cost(&self, ctx: &RawCallContext, normalized: &Normalized) -> Decimal {
        if let Some(reported) = ctx.cost_usd {
            return reported.max(Decimal::ZERO);
        }

        let Some(model) = normalized.model.as_deref() else {
            return Decimal::ZERO;
        };
        let input = ctx.input_tokens.unwrap_or(0);
        let output = ctx.output_tokens.unwrap_or(0);

        normalized
            .provider
            .as_deref()
            .and_then(|provider| self.pricing.resolve(&format!("{provider}/{model}")))
            .or_else(|| self.pricing.resolve(model))
            .map(|p| p.cost(input, output))
            .unwrap_or(Decimal::ZERO)
    }
}
