//! `genops config` and `genops validate` — Configuration management.

use std::path::Path;

use genops_config::GovernanceConfig;
use genops_instrument::{validate_setup, Severity};

use super::{build_catalog, load_config, LibrarySpec};

pub async fn validate(config_path: Option<&Path>, libraries: &[LibrarySpec]) -> anyhow::Result<()> {
    println!("🔍 Validating GenOps setup...");

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");
            config
        }
        Err(e) => {
            println!("   ❌ Config error: {e:#}");
            return Err(e);
        }
    };

    let report = validate_setup(&config, &build_catalog(libraries));
    if report.issues.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for issue in &report.issues {
            let marker = match issue.severity {
                Severity::Error => "❌",
                Severity::Warning => "⚠️ ",
                Severity::Info => "ℹ️ ",
            };
            println!("   {marker} [{}] {}", issue.component, issue.message);
            if let Some(fix) = &issue.fix {
                println!("       fix: {fix}");
            }
        }
    }

    println!();
    println!("   Adapters:  {}", if config.adapters.is_empty() { "all available".to_string() } else { config.adapters.join(", ") });
    println!("   Policies:  {}", config.policies.len());
    println!("   Pricing:   {} custom model(s)", config.custom_pricing.len());

    if !report.is_valid() {
        anyhow::bail!("{} error(s) found", report.errors().count());
    }
    Ok(())
}

pub async fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn default() -> anyhow::Result<()> {
    println!("{}", GovernanceConfig::default_toml());
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> anyhow::Result<()> {
    match config_path {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", GovernanceConfig::config_dir().join("config.toml").display()),
    }
    Ok(())
}
