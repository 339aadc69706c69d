//! Built-in pricing table for common LLM and embedding models.
//!
//! Prices are in USD per 1 million tokens, held as exact decimals so that
//! cost roll-ups never drift. Each model has an input and output price.
//! Custom pricing can be added at runtime via TOML config.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const PER_MILLION: u64 = 1_000_000;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: Decimal,
    /// Price per 1M output tokens in USD.
    pub output_per_m: Decimal,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub fn new(input_per_m: Decimal, output_per_m: Decimal) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Shorthand for literal prices: `cents(250, 1000)` is $2.50 / $10.00.
    fn cents(input: i64, output: i64) -> Self {
        Self::new(Decimal::new(input, 2), Decimal::new(output, 2))
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Decimal {
        (Decimal::from(input_tokens) * self.input_per_m
            + Decimal::from(output_tokens) * self.output_per_m)
            / Decimal::from(PER_MILLION)
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert("anthropic/claude-sonnet-4".into(), ModelPricing::cents(300, 1500));
        prices.insert("anthropic/claude-opus-4".into(), ModelPricing::cents(1500, 7500));
        prices.insert("anthropic/claude-3.5-sonnet".into(), ModelPricing::cents(300, 1500));
        prices.insert("anthropic/claude-3.5-haiku".into(), ModelPricing::cents(80, 400));
        prices.insert(
            "anthropic/claude-3-haiku".into(),
            ModelPricing::new(Decimal::new(25, 2), Decimal::new(125, 2)),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("openai/gpt-4o".into(), ModelPricing::cents(250, 1000));
        prices.insert("openai/gpt-4o-mini".into(), ModelPricing::cents(15, 60));
        prices.insert("openai/gpt-4-turbo".into(), ModelPricing::cents(1000, 3000));
        prices.insert("openai/gpt-3.5-turbo".into(), ModelPricing::cents(50, 150));
        prices.insert("openai/o1".into(), ModelPricing::cents(1500, 6000));
        prices.insert("openai/o1-mini".into(), ModelPricing::cents(300, 1200));
        prices.insert("openai/o3-mini".into(), ModelPricing::cents(110, 440));

        // ── OpenAI embeddings ──────────────────────────────────────
        prices.insert("openai/text-embedding-3-small".into(), ModelPricing::cents(2, 0));
        prices.insert("openai/text-embedding-3-large".into(), ModelPricing::cents(13, 0));
        prices.insert("openai/text-embedding-ada-002".into(), ModelPricing::cents(10, 0));

        // ── Google ─────────────────────────────────────────────────
        prices.insert("google/gemini-2.0-flash".into(), ModelPricing::cents(10, 40));
        prices.insert("google/gemini-2.0-pro".into(), ModelPricing::cents(125, 1000));
        prices.insert("google/gemini-1.5-pro".into(), ModelPricing::cents(125, 500));
        prices.insert(
            "google/gemini-1.5-flash".into(),
            ModelPricing::new(Decimal::new(75, 3), Decimal::new(3, 1)),
        );

        // ── Meta (via OpenRouter) ──────────────────────────────────
        prices.insert("meta-llama/llama-3.1-405b".into(), ModelPricing::cents(270, 270));
        prices.insert("meta-llama/llama-3.1-70b".into(), ModelPricing::cents(52, 75));
        prices.insert(
            "meta-llama/llama-3.1-8b".into(),
            ModelPricing::new(Decimal::new(55, 3), Decimal::new(55, 3)),
        );

        // ── Mistral ────────────────────────────────────────────────
        prices.insert("mistral/mistral-large".into(), ModelPricing::cents(200, 600));
        prices.insert("mistral/mistral-small".into(), ModelPricing::cents(20, 60));
        prices.insert("mistral/codestral".into(), ModelPricing::cents(30, 90));
        prices.insert("mistral/mistral-embed".into(), ModelPricing::cents(10, 0));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert("deepseek/deepseek-v3".into(), ModelPricing::cents(27, 110));
        prices.insert("deepseek/deepseek-r1".into(), ModelPricing::cents(55, 219));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices.read().get(model).cloned()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.write().insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name as reported by a provider.
    ///
    /// Tries exact match first, then the common provider prefixes
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest key whose bare name is
    /// a prefix of the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read();

        // 1. Exact match
        if let Some(p) = prices.get(model) {
            return Some(p.clone());
        }

        // 2. Try with common provider prefixes
        for prefix in ["openai", "anthropic", "google", "mistral", "deepseek", "meta-llama"] {
            if let Some(p) = prices.get(&format!("{prefix}/{model}")) {
                return Some(p.clone());
            }
        }

        // 3. Prefix match on the bare model name
        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key);
                bare_model
                    .starts_with(&bare_key.to_lowercase())
                    .then_some((bare_key.len(), pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, pricing)| pricing.clone())
    }

    /// Compute cost for a model call, returning zero if the model is unknown.
    pub fn compute_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Decimal {
        self.resolve(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(Decimal::ZERO)
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
