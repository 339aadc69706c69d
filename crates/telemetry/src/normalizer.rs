//! Attribute normalizer — maps raw provider call metadata onto the
//! canonical attribute set every downstream component reads.

use std::collections::BTreeMap;

use genops_core::adapter::RawCallContext;
use genops_core::error::NormalizationError;
use genops_core::record::{attrs, AttributeValue, CanonicalAttributes, OperationKind};

/// Output of [`AttributeNormalizer::normalize`].
#[derive(Debug, Clone)]
pub struct Normalized {
    pub kind: Option<OperationKind>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub attributes: CanonicalAttributes,
    /// Problems found; only missing model/kind make a record incomplete.
    pub errors: Vec<NormalizationError>,
}

impl Normalized {
    /// The first error that prevents a complete record, if any.
    pub fn blocking_error(&self) -> Option<&NormalizationError> {
        self.errors.iter().find(|e| {
            matches!(
                e,
                NormalizationError::MissingModel | NormalizationError::MissingOperationKind
            )
        })
    }
}

/// Stateless apart from the default attributes stamped on every record.
#[derive(Debug, Clone, Default)]
pub struct AttributeNormalizer {
    defaults: CanonicalAttributes,
}

impl AttributeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with default attributes such as `team = "search"`.
    ///
    /// Bare keys are placed under the `genops.` namespace.
    pub fn with_defaults(defaults: &BTreeMap<String, String>) -> Self {
        let defaults = defaults
            .iter()
            .map(|(k, v)| (canonical_key(k), AttributeValue::Str(v.clone())))
            .collect();
        Self { defaults }
    }

    pub fn default_attributes(&self) -> &CanonicalAttributes {
        &self.defaults
    }

    pub fn normalize(&self, ctx: &RawCallContext) -> Normalized {
        let mut errors = Vec::new();
        let mut attributes = self.defaults.clone();

        let (reported_provider, model) = match ctx.model.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let (provider, model) = split_model(raw);
                (provider, Some(model))
            }
            _ => {
                errors.push(NormalizationError::MissingModel);
                (None, None)
            }
        };

        let provider = ctx
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
            .or(reported_provider)
            .or_else(|| model.as_deref().and_then(infer_provider).map(String::from));

        if ctx.operation.is_none() {
            errors.push(NormalizationError::MissingOperationKind);
        }

        if let Some(model) = &model {
            attributes.insert(attrs::MODEL.into(), model.clone().into());
        }
        if let Some(provider) = &provider {
            attributes.insert(attrs::PROVIDER.into(), provider.clone().into());
        }
        if let Some(kind) = ctx.operation {
            attributes.insert(attrs::OPERATION.into(), kind.to_string().into());
        }
        if let Some(input) = ctx.input_tokens {
            attributes.insert(attrs::TOKENS_INPUT.into(), input.into());
        }
        if let Some(output) = ctx.output_tokens {
            attributes.insert(attrs::TOKENS_OUTPUT.into(), output.into());
        }

        let latency_ms = ctx
            .ended_at
            .signed_duration_since(ctx.started_at)
            .num_milliseconds()
            .max(0);
        attributes.insert(attrs::LATENCY_MS.into(), AttributeValue::Int(latency_ms));

        for (key, value) in &ctx.extra {
            match extra_attribute(key, value) {
                Ok(Some((k, v))) => {
                    attributes.insert(k, v);
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        if let Some(cost) = ctx.cost_usd {
            if cost.is_sign_negative() && !cost.is_zero() {
                errors.push(NormalizationError::InvalidAttribute {
                    key: "cost_usd".into(),
                    reason: format!("negative cost {cost}"),
                });
            }
        }

        Normalized {
            kind: ctx.operation,
            model,
            provider,
            attributes,
            errors,
        }
    }
}

/// Place a bare key under the `genops.` namespace.
pub fn canonical_key(key: &str) -> String {
    if key.starts_with("genops.") {
        key.to_string()
    } else {
        format!("genops.{key}")
    }
}

/// Split `provider/model` into its parts; other names pass through.
pub fn split_model(raw: &str) -> (Option<String>, String) {
    match raw.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            (Some(provider.to_lowercase()), model.to_string())
        }
        _ => (None, raw.to_string()),
    }
}

/// Guess the provider from the model family.
pub fn infer_provider(model: &str) -> Option<&'static str> {
    let m = model.to_lowercase();
    if m.starts_with("gpt-")
        || m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("text-embedding-")
    {
        Some("openai")
    } else if m.starts_with("claude") {
        Some("anthropic")
    } else if m.starts_with("gemini") {
        Some("google")
    } else if m.starts_with("mistral") || m.starts_with("codestral") {
        Some("mistral")
    } else if m.starts_with("deepseek") {
        Some("deepseek")
    } else if m.starts_with("llama") {
        Some("meta-llama")
    } else {
        None
    }
}

fn extra_attribute(
    key: &str,
    value: &serde_json::Value,
) -> Result<Option<(String, AttributeValue)>, NormalizationError> {
    let canonical = match key {
        "documents" => attrs::RETRIEVAL_DOCUMENTS.to_string(),
        "score" => attrs::RETRIEVAL_SCORE.to_string(),
        "top_k" => attrs::RETRIEVAL_TOP_K.to_string(),
        "team" | "project" | "environment" | "customer_id" | "feature" => canonical_key(key),
        other if other.starts_with("genops.") => other.to_string(),
        other => format!("{}{other}", attrs::EXTRA_PREFIX),
    };

    let value = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AttributeValue::Int(i),
            (None, Some(f)) => AttributeValue::Float(f),
            (None, None) => AttributeValue::Str(n.to_string()),
        },
        serde_json::Value::String(s) => AttributeValue::Str(s.clone()),
        other => AttributeValue::Str(other.to_string()),
    };

    let counts = [attrs::RETRIEVAL_DOCUMENTS, attrs::RETRIEVAL_TOP_K];
    if counts.contains(&canonical.as_str()) && value.as_i64().is_none_or(|v| v < 0) {
        return Err(NormalizationError::InvalidAttribute {
            key: canonical,
            reason: format!("expected a non-negative integer, got {value}"),
        });
    }

    Ok(Some((canonical, value)))
}
