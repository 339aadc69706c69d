pub mod config_cmd;
pub mod replay;
pub mod status;
pub mod usage;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use genops_config::GovernanceConfig;
use genops_instrument::adapters::{llamaindex, openai};
use genops_instrument::{LibraryCatalog, LibraryHandle};

/// A library named on the command line as present in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySpec {
    pub name: String,
    pub version: String,
}

/// Parse `name=version` (or `name@version`).
pub fn parse_library(raw: &str) -> Result<LibrarySpec, String> {
    let (name, version) = raw
        .split_once('=')
        .or_else(|| raw.split_once('@'))
        .ok_or_else(|| format!("expected name=version, got '{raw}'"))?;
    let (name, version) = (name.trim(), version.trim());
    if name.is_empty() || version.is_empty() {
        return Err(format!("expected name=version, got '{raw}'"));
    }
    Ok(LibrarySpec {
        name: name.to_string(),
        version: version.to_string(),
    })
}

/// A catalog holding the given libraries with the hook points the built-in
/// adapters know for them.
pub fn build_catalog(libraries: &[LibrarySpec]) -> Arc<LibraryCatalog> {
    let catalog = Arc::new(LibraryCatalog::new());
    for spec in libraries {
        let hooks: &[&str] = match spec.name.as_str() {
            llamaindex::LIBRARY => llamaindex::HOOKS,
            openai::LIBRARY => openai::HOOKS,
            _ => &[],
        };
        catalog.register(LibraryHandle::new(&spec.name, &spec.version, hooks.iter().copied()));
    }
    catalog
}

/// Load the config from `path`, or from the default location. Environment
/// overrides apply either way.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GovernanceConfig> {
    match path {
        Some(path) => GovernanceConfig::load_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => GovernanceConfig::load().context("Failed to load config"),
    }
}
