//! Error types for the GenOps domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Two conditions from the governance taxonomy are deliberately absent here:
//! policy violations are data (see [`crate::policy::PolicyViolation`]) and
//! aggregation races are bugs, never reportable values.

use thiserror::Error;

/// The top-level error type for all GenOps operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Telemetry errors ---
    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    // --- Instrumentation errors ---
    #[error("Compatibility error: {0}")]
    Compatibility(#[from] CompatibilityError),

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    // --- Export errors ---
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Raw call metadata could not be turned into a complete record.
///
/// Always recovered locally: the tracker degrades to an incomplete record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("call metadata has no model identity")]
    MissingModel,

    #[error("call metadata has no operation kind")]
    MissingOperationKind,

    #[error("invalid attribute {key}: {reason}")]
    InvalidAttribute { key: String, reason: String },
}

/// An adapter cannot be activated against the library present in the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompatibilityError {
    #[error("library for adapter '{adapter}' is not available")]
    LibraryUnavailable { adapter: String },

    #[error("adapter '{adapter}' does not support library version {found} (requires {required})")]
    UnsupportedVersion {
        adapter: String,
        found: String,
        required: String,
    },

    #[error("adapter '{adapter}' could not parse library version '{found}'")]
    InvalidVersion { adapter: String, found: String },

    #[error("hook point '{hook}' for adapter '{adapter}' is already owned by another observer")]
    HookOccupied { adapter: String, hook: String },
}

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected item: {0}")]
    Rejected(String),
}
