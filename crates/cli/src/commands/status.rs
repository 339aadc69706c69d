//! `genops status` — Show adapter registration and default attributes.

use std::path::Path;

use genops_instrument::{attribute_strings, GovernanceContext};

use super::{build_catalog, load_config, LibrarySpec};

pub async fn run(config_path: Option<&Path>, libraries: &[LibrarySpec]) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let ctx = GovernanceContext::init(config, build_catalog(libraries))?;
    let status = ctx.status();

    println!("🛡️  GenOps Status");
    println!("=================");
    if status.adapters.is_empty() {
        println!("  Adapters:     none registered (no instrumentable library present)");
    } else {
        println!("  Adapters:");
        for state in &status.adapters {
            let version = state.library_version.as_deref().unwrap_or("-");
            let marker = if state.is_active() { "✅" } else { "⚠️ " };
            println!("    {marker} {:<12} {:<12} v{version}", state.adapter, state.state.to_string());
            if let Some(err) = &state.last_error {
                println!("       {err}");
            }
        }
    }

    println!("  Policies:     {}", status.policies);
    println!(
        "  Export:       {} sink(s), queue capacity {}",
        ctx.pipeline().exporter().sink_names().len(),
        ctx.config().export.queue_capacity
    );

    let attributes = attribute_strings(&status.default_attributes);
    if attributes.is_empty() {
        println!("  Attributes:   none (set default_attributes or GENOPS_TEAM / GENOPS_PROJECT)");
    } else {
        println!("  Attributes:");
        for (key, value) in &attributes {
            println!("    {key} = {value}");
        }
    }

    ctx.uninstrument();
    Ok(())
}
