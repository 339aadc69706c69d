//! LlamaIndex adapter — hooks the RAG library's callback slots and maps its
//! callback events onto pipeline stages.
//!
//! | Event        | Kind          |
//! |--------------|---------------|
//! | `embedding`  | embedding     |
//! | `retrieve`   | retrieval     |
//! | `llm`        | synthesis     |
//! | `synthesize` | synthesis     |
//! | `query`      | generic call  |

use std::sync::Arc;

use genops_core::adapter::{CallEvent, CallObserver, ProviderAdapter, RawCallContext};
use genops_core::error::CompatibilityError;
use genops_core::record::OperationKind;
use serde_json::Value;

use super::{decimal_field, str_field, u64_field, LibraryBinding};
use crate::catalog::LibraryCatalog;

pub const NAME: &str = "llamaindex";
/// Catalog name of the instrumented library.
pub const LIBRARY: &str = "llama_index";
pub const SUPPORTED_VERSIONS: &str = ">=0.10.0";
pub const HOOKS: &[&str] = &["embed_model", "retriever", "llm", "synthesizer", "query_engine"];

pub struct LlamaIndexAdapter {
    binding: LibraryBinding,
}

impl LlamaIndexAdapter {
    pub fn from_catalog(catalog: &LibraryCatalog) -> Self {
        Self {
            binding: LibraryBinding::new(NAME, SUPPORTED_VERSIONS, HOOKS, catalog.get(LIBRARY)),
        }
    }
}

pub fn factory(catalog: &LibraryCatalog) -> Arc<dyn ProviderAdapter> {
    Arc::new(LlamaIndexAdapter::from_catalog(catalog))
}

impl ProviderAdapter for LlamaIndexAdapter {
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

/// Translate one callback event.
pub fn translate(event: &CallEvent) -> RawCallContext {
    let payload = &event.payload;
    let mut ctx = RawCallContext::empty().with_timing(event.started_at, event.ended_at);

    ctx.operation = match event.event_type.as_str() {
        "embedding" => Some(OperationKind::Embedding),
        "retrieve" => Some(OperationKind::Retrieval),
        "llm" | "synthesize" => Some(OperationKind::Synthesis),
        "query" => Some(OperationKind::GenericCall),
        other => {
            ctx.extra.insert("event_type".into(), Value::from(other));
            None
        }
    };

    ctx.model = str_field(payload, "model_name").or_else(|| {
        // Retrievers rarely report a model; their class name identifies them.
        (ctx.operation == Some(OperationKind::Retrieval))
            .then(|| str_field(payload, "retriever"))
            .flatten()
    });
    ctx.provider = str_field(payload, "provider");

    let prompt = u64_field(payload, "prompt_tokens");
    let completion = u64_field(payload, "completion_tokens");
    let total = u64_field(payload, "total_tokens");
    ctx.input_tokens = prompt.or_else(|| total.map(|t| t.saturating_sub(completion.unwrap_or(0))));
    ctx.output_tokens = completion;

    ctx.cost_usd = decimal_field(payload, "cost_usd");
    ctx.session_id = str_field(payload, "session_id");
    ctx.pipeline_run_id = str_field(payload, "pipeline_run_id");

    let chunks = match payload.get("chunks") {
        Some(Value::Array(items)) => Some(items.len() as u64),
        Some(v) => v.as_u64(),
        None => None,
    };
    if let Some(chunks) = chunks {
        ctx.extra.insert("chunks".into(), Value::from(chunks));
    }

    if let Some(documents) = payload.get("num_documents") {
        ctx.extra.insert("documents".into(), documents.clone());
    }
    if let Some(score) = mean_score(payload.get("scores")) {
        ctx.extra.insert("score".into(), Value::from(score));
    }
    if let Some(top_k) = payload.get("top_k") {
        ctx.extra.insert("top_k".into(), top_k.clone());
    }

    ctx
}

fn mean_score(scores: Option<&Value>) -> Option<f64> {
    let scores: Vec<f64> = scores?.as_array()?.iter().filter_map(Value::as_f64).collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LibraryHandle;
    use serde_json::json;

    #[test]
    fn embedding_event() {
        let event = CallEvent::new("embedding")
            .with("model_name", "text-embedding-3-small")
            .with("total_tokens", 512)
            .with("chunks", json!(["a", "b", "c"]))
            .with("pipeline_run_id", "run-1");
        let ctx = translate(&event);
        assert_eq!(ctx.operation, Some(OperationKind::Embedding));
        assert_eq!(ctx.model.as_deref(), Some("text-embedding-3-small"));
        assert_eq!(ctx.input_tokens, Some(512));
        assert_eq!(ctx.output_tokens, None);
        assert_eq!(ctx.extra["chunks"], 3);
        assert_eq!(ctx.pipeline_run_id.as_deref(), Some("run-1"));
    }

    #[test]
    fn retrieve_event() {
        let event = CallEvent::new("retrieve")
            .with("retriever", "VectorIndexRetriever")
            .with("num_documents", 4)
            .with("scores", json!([0.9, 0.7]))
            .with("top_k", 4)
            .with("session_id", "s-1");
        let ctx = translate(&event);
        assert_eq!(ctx.operation, Some(OperationKind::Retrieval));
        assert_eq!(ctx.model.as_deref(), Some("VectorIndexRetriever"));
        assert_eq!(ctx.extra["documents"], 4);
        assert!((ctx.extra["score"].as_f64().unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(ctx.extra["top_k"], 4);
        assert_eq!(ctx.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn llm_event_with_cost() {
        let event = CallEvent::new("llm")
            .with("model_name", "gpt-4o")
            .with("prompt_tokens", 1200)
            .with("completion_tokens", 300)
            .with("cost_usd", "0.006");
        let ctx = translate(&event);
        assert_eq!(ctx.operation, Some(OperationKind::Synthesis));
        assert_eq!(ctx.input_tokens, Some(1200));
        assert_eq!(ctx.output_tokens, Some(300));
        assert_eq!(ctx.cost_usd, Some(rust_decimal::Decimal::new(6, 3)));
    }

    #[test]
    fn total_tokens_split_when_prompt_missing() {
        let event = CallEvent::new("synthesize")
            .with("model_name", "claude-3-haiku")
            .with("total_tokens", 1000)
            .with("completion_tokens", 250);
        let ctx = translate(&event);
        assert_eq!(ctx.input_tokens, Some(750));
        assert_eq!(ctx.output_tokens, Some(250));
    }

    #[test]
    fn unknown_event_has_no_kind() {
        let ctx = translate(&CallEvent::new("agent_step"));
        assert_eq!(ctx.operation, None);
        assert_eq!(ctx.extra["event_type"], "agent_step");
    }

    #[test]
    fn availability_follows_catalog() {
        let catalog = LibraryCatalog::new();
        let adapter = LlamaIndexAdapter::from_catalog(&catalog);
        assert!(!adapter.is_available());
        assert_eq!(adapter.version(), None);

        catalog.register(LibraryHandle::new(LIBRARY, "0.10.12", HOOKS.iter().copied()));
        let adapter = LlamaIndexAdapter::from_catalog(&catalog);
        assert!(adapter.is_available());
        assert_eq!(adapter.version().as_deref(), Some("0.10.12"));
        assert_eq!(adapter.supported_versions(), ">=0.10.0");
    }

    #[test]
    fn old_version_is_rejected() {
        struct Noop;
        impl CallObserver for Noop {
            fn on_call(&self, _ctx: RawCallContext) {}
        }

        let catalog = LibraryCatalog::new();
        let handle = catalog.register(LibraryHandle::new(LIBRARY, "0.9.48", HOOKS.iter().copied()));
        let adapter = LlamaIndexAdapter::from_catalog(&catalog);

        let err = adapter.patch(Arc::new(Noop)).unwrap_err();
        assert!(matches!(err, CompatibilityError::UnsupportedVersion { .. }));
        assert!(!adapter.is_patched());
        assert!(handle.hook_names().all(|h| !handle.hook(h).unwrap().is_hooked()));
    }
}
