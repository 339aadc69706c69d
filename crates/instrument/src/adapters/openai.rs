//! OpenAI client adapter.
//!
//! Completions issued inside a pipeline run count as its synthesis stage;
//! outside a run they are plain generic calls.

use std::sync::Arc;

use genops_core::adapter::{CallEvent, CallObserver, ProviderAdapter, RawCallContext};
use genops_core::error::CompatibilityError;
use genops_core::record::OperationKind;
use serde_json::{Map, Value};

use super::{decimal_field, str_field, u64_field, LibraryBinding};
use crate::catalog::LibraryCatalog;

pub const NAME: &str = "openai";
pub const LIBRARY: &str = "openai";
pub const SUPPORTED_VERSIONS: &str = ">=1.0.0";
pub const HOOKS: &[&str] = &["chat.completions", "completions", "embeddings"];

pub struct OpenAiAdapter {
    binding: LibraryBinding,
}

impl OpenAiAdapter {
    pub fn from_catalog(catalog: &LibraryCatalog) -> Self {
        Self {
            binding: LibraryBinding::new(NAME, SUPPORTED_VERSIONS, HOOKS, catalog.get(LIBRARY)),
        }
    }
}

pub fn factory(catalog: &LibraryCatalog) -> Arc<dyn ProviderAdapter> {
    Arc::new(OpenAiAdapter::from_catalog(catalog))
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.binding.is_available()
    }

    fn version(&self) -> Option<String> {
        self.binding.version()
    }

    fn supported_versions(&self) -> &str {
        self.binding.requirement()
    }

    fn intercept(&self, event: &CallEvent) -> RawCallContext {
        translate(event)
    }

    fn patch(&self, observer: Arc<dyn CallObserver>) -> Result<(), CompatibilityError> {
        self.binding.patch(translate, observer)
    }

    fn unpatch(&self) -> bool {
        self.binding.unpatch()
    }

    fn is_patched(&self) -> bool {
        self.binding.is_patched()
    }
}

pub fn translate(event: &CallEvent) -> RawCallContext {
    let payload = &event.payload;
    let mut ctx = RawCallContext::empty().with_timing(event.started_at, event.ended_at);

    ctx.pipeline_run_id = str_field(payload, "pipeline_run_id");
    ctx.session_id = str_field(payload, "session_id");

    ctx.operation = match event.event_type.as_str() {
        "embeddings" => Some(OperationKind::Embedding),
        "chat.completions" | "completions" if ctx.pipeline_run_id.is_some() => {
            Some(OperationKind::Synthesis)
        }
        "chat.completions" | "completions" => Some(OperationKind::GenericCall),
        other => {
            ctx.extra.insert("event_type".into(), Value::from(other));
            None
        }
    };

    ctx.model = str_field(payload, "model");
    ctx.provider = str_field(payload, "provider").or_else(|| Some(NAME.to_string()));

    let empty = Map::new();
    let usage = payload.get("usage").and_then(Value::as_object).unwrap_or(&empty);
    ctx.input_tokens = u64_field(usage, "prompt_tokens");
    ctx.output_tokens = u64_field(usage, "completion_tokens");
    if ctx.output_tokens.is_none() && ctx.operation == Some(OperationKind::Embedding) {
        ctx.output_tokens = Some(0);
    }

    ctx.cost_usd = decimal_field(payload, "cost_usd");

    if let Some(choices) = payload.get("choices").and_then(Value::as_array) {
        ctx.extra.insert("choices".into(), Value::from(choices.len() as u64));
    }
    if let Some(reason) = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str)
    {
        ctx.extra.insert("finish_reason".into(), Value::from(reason));
    }

    ctx
}
