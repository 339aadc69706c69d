//! Configuration loading, validation, and management for GenOps.
//!
//! Loads configuration from `~/.genops/config.toml` (or `$GENOPS_CONFIG`)
//! with environment variable overrides. Validates all settings at startup.

use genops_core::policy::{AlertMode, BudgetPolicy, Enforcement, PolicyMetric};
use genops_core::scope::ScopeKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.genops/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Adapters to activate. Empty = every adapter whose library is present.
    #[serde(default)]
    pub adapters: Vec<String>,

    /// Patch adapters during `init`
    #[serde(default = "default_true")]
    pub auto_instrument: bool,

    /// Attributes stamped on every record (team, project, environment, ...)
    #[serde(default)]
    pub default_attributes: BTreeMap<String, String>,

    /// Scope roll-up settings
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// RAG pipeline-run settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Export queue settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Budget policies
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Scopes idle for longer than this become eligible for eviction
    #[serde(default = "default_scope_idle_secs")]
    pub idle_timeout_secs: u64,

    /// How long an evicted scope is remembered so a late record can be
    /// tagged as reopened
    #[serde(default = "default_tombstone_secs")]
    pub tombstone_secs: u64,

    /// Raw records kept for inspection (0 = keep none)
    #[serde(default)]
    pub retain_records: usize,
}

fn default_scope_idle_secs() -> u64 {
    1800
}
fn default_tombstone_secs() -> u64 {
    3600
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_scope_idle_secs(),
            tombstone_secs: default_tombstone_secs(),
            retain_records: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Runs with no activity for this long are auto-finalized as timed out
    #[serde(default = "default_run_idle_secs")]
    pub idle_timeout_secs: u64,

    /// How long finalized summaries stay addressable by run id
    #[serde(default = "default_finalized_retention_secs")]
    pub finalized_retention_secs: u64,
}

fn default_run_idle_secs() -> u64 {
    300
}
fn default_finalized_retention_secs() -> u64 {
    600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_run_idle_secs(),
            finalized_retention_secs: default_finalized_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Maximum queued items before the queue-full policy applies
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What to drop when the queue is full: "drop_oldest" or "drop_newest"
    #[serde(default = "default_on_full")]
    pub on_full: String,

    /// Also emit every item as a structured log event
    #[serde(default)]
    pub log_sink: bool,

    /// Background drain period
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Background idle sweep period
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    10_000
}
fn default_on_full() -> String {
    "drop_oldest".into()
}
fn default_drain_interval_ms() -> u64 {
    250
}
fn default_maintenance_interval_secs() -> u64 {
    30
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            on_full: default_on_full(),
            log_sink: false,
            drain_interval_ms: default_drain_interval_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

/// A budget policy as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Unique policy id
    pub id: String,

    /// Scope: "operation", "pipeline_run", "session"
    pub scope: String,

    /// Metric: "cost_usd" or "total_tokens"
    #[serde(default = "default_metric")]
    pub metric: String,

    /// Threshold in USD (or tokens)
    pub threshold: Decimal,

    /// Enforcement: "hard_cap" or "soft_warn"
    #[serde(default = "default_enforcement")]
    pub enforcement: String,

    /// Alert again after dropping back below the threshold
    #[serde(default)]
    pub repeatable: bool,
}

fn default_metric() -> String {
    "cost_usd".into()
}
fn default_enforcement() -> String {
    "hard_cap".into()
}

impl PolicyConfig {
    /// Convert into the engine's policy type.
    pub fn to_policy(&self) -> Result<BudgetPolicy, ConfigError> {
        let scope_kind = ScopeKind::parse(&self.scope).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "policy '{}': unknown scope '{}'",
                self.id, self.scope
            ))
        })?;
        let metric = match self.metric.as_str() {
            "cost_usd" => PolicyMetric::CostUsd,
            "total_tokens" => PolicyMetric::TotalTokens,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "policy '{}': unknown metric '{other}'",
                    self.id
                )));
            }
        };
        let enforcement = match self.enforcement.as_str() {
            "hard_cap" => Enforcement::HardCap,
            "soft_warn" => Enforcement::SoftWarn,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "policy '{}': unknown enforcement '{other}'",
                    self.id
                )));
            }
        };
        if self.threshold < Decimal::ZERO {
            return Err(ConfigError::ValidationError(format!(
                "policy '{}': threshold must not be negative",
                self.id
            )));
        }

        Ok(BudgetPolicy {
            id: self.id.clone(),
            scope_kind,
            metric,
            threshold: self.threshold,
            enforcement,
            alerting: if self.repeatable {
                AlertMode::Repeatable
            } else {
                AlertMode::OneShot
            },
        })
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: Decimal,
    /// Price per 1M output tokens in USD
    pub output_per_m: Decimal,
}

impl GovernanceConfig {
    /// Load configuration from `$GENOPS_CONFIG` or the default path
    /// (~/.genops/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `GENOPS_ENVIRONMENT`, `GENOPS_TEAM`, `GENOPS_PROJECT` → default attributes
    /// - `GENOPS_ADAPTERS` → comma separated adapter list
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("GENOPS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        Self::load_with_env(&config_path)
    }

    /// Load configuration from a specific file path, then apply the same
    /// environment overrides as [`load`](Self::load).
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(lookup);
        Ok(config)
    }

    /// Load configuration from a specific file path, without environment
    /// overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".genops")
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (var, key) in [
            ("GENOPS_ENVIRONMENT", "environment"),
            ("GENOPS_TEAM", "team"),
            ("GENOPS_PROJECT", "project"),
        ] {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                self.default_attributes.insert(key.into(), value);
            }
        }

        if let Some(list) = lookup("GENOPS_ADAPTERS") {
            self.adapters = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "export.queue_capacity must be > 0".into(),
            ));
        }

        if !matches!(self.export.on_full.as_str(), "drop_oldest" | "drop_newest") {
            return Err(ConfigError::ValidationError(format!(
                "export.on_full must be \"drop_oldest\" or \"drop_newest\", got \"{}\"",
                self.export.on_full
            )));
        }

        if self.aggregator.idle_timeout_secs == 0 || self.pipeline.idle_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "idle timeouts must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate policy id '{}'",
                    policy.id
                )));
            }
            policy.to_policy()?;
        }

        Ok(())
    }

    /// All configured policies in engine form.
    pub fn budget_policies(&self) -> Result<Vec<BudgetPolicy>, ConfigError> {
        self.policies.iter().map(PolicyConfig::to_policy).collect()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            adapters: vec![],
            auto_instrument: true,
            default_attributes: BTreeMap::new(),
            aggregator: AggregatorConfig::default(),
            pipeline: PipelineConfig::default(),
            export: ExportConfig::default(),
            policies: vec![],
            custom_pricing: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for genops_core::Error {
    fn from(err: ConfigError) -> Self {
        genops_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = GovernanceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.auto_instrument);
        assert_eq!(config.export.on_full, "drop_oldest");
        assert_eq!(config.pipeline.idle_timeout_secs, 300);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = GovernanceConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: GovernanceConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.export.queue_capacity, config.export.queue_capacity);
        assert_eq!(parsed.aggregator.idle_timeout_secs, config.aggregator.idle_timeout_secs);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = GovernanceConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert!(result.unwrap().policies.is_empty());
    }

    #[test]
    fn policy_parsing() {
        let toml_str = r#"
adapters = ["llamaindex"]

[default_attributes]
team = "search"

[[policies]]
id = "session-cap"
scope = "session"
threshold = "10.00"

[[policies]]
id = "run-tokens"
scope = "pipeline_run"
metric = "total_tokens"
threshold = 50000
enforcement = "soft_warn"
repeatable = true
"#;
        let config: GovernanceConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        let policies = config.budget_policies().unwrap();
        assert_eq!(policies.len(), 2);

        assert_eq!(policies[0].scope_kind, ScopeKind::Session);
        assert_eq!(policies[0].threshold, Decimal::TEN);
        assert_eq!(policies[0].enforcement, Enforcement::HardCap);
        assert_eq!(policies[0].alerting, AlertMode::OneShot);

        assert_eq!(policies[1].metric, PolicyMetric::TotalTokens);
        assert_eq!(policies[1].threshold, Decimal::from(50_000));
        assert_eq!(policies[1].alerting, AlertMode::Repeatable);
        assert_eq!(config.default_attributes["team"], "search");
    }

    #[test]
    fn unknown_scope_rejected() {
        let config = GovernanceConfig {
            policies: vec![PolicyConfig {
                id: "p".into(),
                scope: "tenant".into(),
                metric: default_metric(),
                threshold: Decimal::ONE,
                enforcement: default_enforcement(),
                repeatable: false,
            }],
            ..GovernanceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_policy_ids_rejected() {
        let policy = PolicyConfig {
            id: "dup".into(),
            scope: "session".into(),
            metric: default_metric(),
            threshold: Decimal::ONE,
            enforcement: default_enforcement(),
            repeatable: false,
        };
        let config = GovernanceConfig {
            policies: vec![policy.clone(), policy],
            ..GovernanceConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dup"));
    }

    #[test]
    fn invalid_queue_policy_rejected() {
        let mut config = GovernanceConfig::default();
        config.export.on_full = "block".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = GovernanceConfig::default();
        config.apply_env(|key| match key {
            "GENOPS_TEAM" => Some("platform".into()),
            "GENOPS_ADAPTERS" => Some("llamaindex, openai ,".into()),
            _ => None,
        });
        assert_eq!(config.default_attributes["team"], "platform");
        assert!(!config.default_attributes.contains_key("project"));
        assert_eq!(config.adapters, vec!["llamaindex", "openai"]);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
auto_instrument = false

[export]
queue_capacity = 32
on_full = "drop_newest"

[custom_pricing."acme/embed-1"]
input_per_m = 0.05
output_per_m = 0
"#
        )
        .unwrap();

        let config = GovernanceConfig::load_from(file.path()).unwrap();
        assert!(!config.auto_instrument);
        assert_eq!(config.export.queue_capacity, 32);
        assert_eq!(config.export.on_full, "drop_newest");
        assert_eq!(
            config.custom_pricing["acme/embed-1"].input_per_m,
            Decimal::new(5, 2)
        );
    }

    #[test]
    fn explicit_path_still_gets_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
adapters = ["openai"]

[default_attributes]
team = "search"
project = "rag-demo"
"#
        )
        .unwrap();

        let config = GovernanceConfig::load_with(file.path(), |key| match key {
            "GENOPS_TEAM" => Some("platform".into()),
            "GENOPS_ADAPTERS" => Some("llamaindex".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.default_attributes["team"], "platform");
        assert_eq!(config.default_attributes["project"], "rag-demo");
        assert_eq!(config.adapters, vec!["llamaindex"]);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "adapters = 42").unwrap();
        let err = GovernanceConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = GovernanceConfig::default_toml();
        assert!(toml_str.contains("drop_oldest"));
        assert!(toml_str.contains("queue_capacity"));
    }
}
