//! # GenOps Instrument
//!
//! Zero-code instrumentation for AI pipelines. Libraries expose
//! [`HookPoint`]s; provider adapters install a handler on them that turns
//! each call into a [`RawCallContext`](genops_core::RawCallContext) for the
//! governance pipeline. [`GovernanceContext`] ties it together:
//!
//! ```text
//! library call → HookPoint → adapter translate → GovernancePipeline
//!                                                  ├─ pipeline monitor
//!                                                  ├─ cost aggregator
//!                                                  ├─ policy engine
//!                                                  └─ exporter → sinks
//! ```

pub mod adapters;
pub mod catalog;
pub mod context;
pub mod hook;
pub mod registry;
pub mod validation;

pub use adapters::{builtin_adapters, AdapterFactory, LlamaIndexAdapter, OpenAiAdapter};
pub use catalog::{LibraryCatalog, LibraryHandle};
pub use context::{
    attribute_strings, pricing_table, GovernanceContext, GovernanceStatus, ShutdownReport,
};
pub use hook::{Blocked, HookHandler, HookPoint};
pub use registry::InstrumentationRegistry;
pub use validation::{validate_setup, Severity, ValidationIssue, ValidationReport};
