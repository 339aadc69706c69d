//! CLI commands for pricing, cost estimates and budgets.

use std::path::Path;

use genops_core::{AlertMode, PolicyMetric};
use genops_instrument::pricing_table;

use super::load_config;

/// List available model pricing.
pub async fn pricing(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let table = pricing_table(&config);
    let models = table.models();

    println!("💰 Model Pricing (per 1M tokens)");
    println!("─────────────────────────────────────────────────────");
    println!("{:<40} {:>10} {:>10}", "Model", "Input", "Output");
    println!("{:<40} {:>10} {:>10}", "─────", "─────", "──────");

    for name in &models {
        if let Some(p) = table.get(name) {
            println!(
                "{:<40} ${:>9} ${:>9}",
                name,
                p.input_per_m.round_dp(3).to_string(),
                p.output_per_m.round_dp(3).to_string()
            );
        }
    }

    println!();
    println!(
        "  {} models with pricing data ({} custom)",
        models.len(),
        config.custom_pricing.len()
    );

    Ok(())
}

/// Estimate cost for a given model and token counts.
pub async fn estimate(
    config_path: Option<&Path>,
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let table = pricing_table(&config);

    match table.resolve(model) {
        None => {
            println!("⚠ Model '{model}' not found in pricing table.");
            println!("  Use `genops pricing` to see available models.");
        }
        Some(pricing) => {
            let cost = pricing.cost(input_tokens, output_tokens);
            println!("💵 Cost estimate for {model}");
            println!("   Input tokens:  {input_tokens}");
            println!("   Output tokens: {output_tokens}");
            println!("   Estimated cost: ${}", cost.round_dp(6));
        }
    }

    Ok(())
}

/// Show configured budget policies.
pub async fn budgets(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if config.policies.is_empty() {
        println!("No budget policies configured.");
        println!();
        println!("Add policies in ~/.genops/config.toml:");
        println!();
        println!("  [[policies]]");
        println!("  id = \"session-cap\"");
        println!("  scope = \"session\"");
        println!("  threshold = \"10.00\"");
        println!("  enforcement = \"hard_cap\"");
        return Ok(());
    }

    println!("🔒 Budget Policies");
    println!("─────────────────────────────────────");
    for policy in config.budget_policies()? {
        let threshold = match policy.metric {
            PolicyMetric::CostUsd => format!("${}", policy.threshold),
            PolicyMetric::TotalTokens => format!("{} tokens", policy.threshold),
        };
        let alerting = match policy.alerting {
            AlertMode::OneShot => "once",
            AlertMode::Repeatable => "on every crossing",
        };
        println!(
            "  {} → {} over {}, {}, alerts {alerting}",
            policy.id, policy.scope_kind, threshold, policy.enforcement
        );
    }

    Ok(())
}
