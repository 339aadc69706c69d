//! Provider adapter capability — the seam between the governance core and
//! whatever library is being instrumented.
//!
//! An adapter knows how to hook one library's call path, and how to turn the
//! library-shaped [`CallEvent`]s it sees there into a provider-independent
//! [`RawCallContext`]. The core never looks past this trait.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CompatibilityError;
use crate::record::OperationKind;

/// A call as the instrumented library reports it, before translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    /// Library-specific event name (e.g. `"retrieve"`, `"chat.completions"`).
    pub event_type: String,
    /// Library-specific payload.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl CallEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            event_type: event_type.into(),
            payload: serde_json::Map::new(),
            started_at: now,
            ended_at: now,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.ended_at = ended_at;
        self
    }
}

/// Provider-independent call metadata, the input of the usage tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCallContext {
    /// Provider id if the library reported one.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub operation: Option<OperationKind>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Cost reported by the provider itself; wins over the pricing table.
    #[serde(default)]
    pub cost_usd: Option<Decimal>,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub pipeline_run_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Anything else the adapter wants carried along.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawCallContext {
    pub fn new(operation: OperationKind, model: impl Into<String>) -> Self {
        Self {
            operation: Some(operation),
            model: Some(model.into()),
            ..Self::empty()
        }
    }

    /// A context with nothing filled in.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            provider: None,
            operation: None,
            model: None,
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            started_at: now,
            ended_at: now,
            pipeline_run_id: None,
            session_id: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    pub fn with_cost(mut self, cost_usd: Decimal) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_pipeline_run(mut self, run_id: impl Into<String>) -> Self {
        self.pipeline_run_id = Some(run_id.into());
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.ended_at = ended_at;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn hints(&self) -> ScopeHints {
        ScopeHints {
            session_id: self.session_id.clone(),
            pipeline_run_id: self.pipeline_run_id.clone(),
        }
    }
}

/// Scope ids known before a call is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHints {
    pub session_id: Option<String>,
    pub pipeline_run_id: Option<String>,
}

/// Receives translated calls from a patched adapter.
pub trait CallObserver: Send + Sync {
    /// Called after the wrapped call completed. Must not panic into the
    /// caller; hook points guard against it anyway.
    fn on_call(&self, ctx: RawCallContext);

    /// Advisory pre-call check: does a hard cap cover these scopes?
    fn should_block(&self, _hints: &ScopeHints) -> bool {
        false
    }
}

/// Implemented once per instrumentable library.
pub trait ProviderAdapter: Send + Sync {
    /// Stable adapter name (e.g. `"llamaindex"`).
    fn name(&self) -> &str;

    /// Whether the target library is present in this process.
    fn is_available(&self) -> bool;

    /// Detected library version, if the library is present.
    fn version(&self) -> Option<String>;

    /// Semver requirement the adapter supports, for diagnostics.
    fn supported_versions(&self) -> &str;

    /// Translate a library event into canonical call metadata.
    fn intercept(&self, event: &CallEvent) -> RawCallContext;

    /// Route the library's calls through `observer`. All-or-nothing.
    fn patch(&self, observer: Arc<dyn CallObserver>) -> Result<(), CompatibilityError>;

    /// Restore the library's direct call path. Returns whether anything was
    /// installed.
    fn unpatch(&self) -> bool;

    fn is_patched(&self) -> bool;
}

/// Lifecycle position of an adapter in the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Unregistered,
    Registered,
    Active,
    Inactive,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::Registered => write!(f, "registered"),
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Read-only view of one adapter's registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationState {
    pub adapter: String,
    pub state: AdapterState,
    pub library_version: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RegistrationState {
    pub fn is_active(&self) -> bool {
        self.state == AdapterState::Active
    }
}
