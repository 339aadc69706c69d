//! Built-in provider adapters and the hook-binding logic they share.

pub mod llamaindex;
pub mod openai;

use std::sync::Arc;

use genops_core::adapter::{CallEvent, CallObserver, ProviderAdapter, RawCallContext, ScopeHints};
use genops_core::error::CompatibilityError;
use parking_lot::Mutex;
use semver::{Version, VersionReq};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::catalog::{LibraryCatalog, LibraryHandle};
use crate::hook::{HookHandler, HookPoint};

pub use llamaindex::LlamaIndexAdapter;
pub use openai::OpenAiAdapter;

/// Builds an adapter bound to whatever the catalog holds.
pub type AdapterFactory = fn(&LibraryCatalog) -> Arc<dyn ProviderAdapter>;

/// Every adapter shipped with the crate, by name.
pub fn builtin_adapters() -> Vec<(&'static str, AdapterFactory)> {
    vec![
        (llamaindex::NAME, llamaindex::factory as AdapterFactory),
        (openai::NAME, openai::factory as AdapterFactory),
    ]
}

/// Forwards hook events to an observer after translating them.
struct ObserverBridge {
    translate: fn(&CallEvent) -> RawCallContext,
    observer: Arc<dyn CallObserver>,
}

impl HookHandler for ObserverBridge {
    fn handle(&self, event: CallEvent) {
        self.observer.on_call((self.translate)(&event));
    }

    fn should_block(&self, hints: &ScopeHints) -> bool {
        self.observer.should_block(hints)
    }
}

/// Binding between one adapter and the library it instruments.
pub(crate) struct LibraryBinding {
    adapter: &'static str,
    requirement: &'static str,
    hooks: &'static [&'static str],
    library: Option<Arc<LibraryHandle>>,
    installed: Mutex<Vec<(Arc<HookPoint>, Arc<dyn HookHandler>)>>,
}

impl LibraryBinding {
    pub(crate) fn new(
        adapter: &'static str,
        requirement: &'static str,
        hooks: &'static [&'static str],
        library: Option<Arc<LibraryHandle>>,
    ) -> Self {
        Self {
            adapter,
            requirement,
            hooks,
            library,
            installed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_available(&self) -> bool {
        self.library.is_some()
    }

    pub(crate) fn version(&self) -> Option<String> {
        self.library.as_ref().map(|l| l.version().to_string())
    }

    pub(crate) fn requirement(&self) -> &'static str {
        self.requirement
    }

    /// Check the library version against the supported range.
    pub(crate) fn check_compatibility(&self) -> Result<&Arc<LibraryHandle>, CompatibilityError> {
        let library = self
            .library
            .as_ref()
            .ok_or_else(|| CompatibilityError::LibraryUnavailable {
                adapter: self.adapter.into(),
            })?;

        let found = library.version();
        let version = parse_version(found).ok_or_else(|| CompatibilityError::InvalidVersion {
            adapter: self.adapter.into(),
            found: found.into(),
        })?;
        let requirement =
            VersionReq::parse(self.requirement).map_err(|_| CompatibilityError::InvalidVersion {
                adapter: self.adapter.into(),
                found: self.requirement.into(),
            })?;

        if !requirement.matches(&version) {
            return Err(CompatibilityError::UnsupportedVersion {
                adapter: self.adapter.into(),
                found: found.into(),
                required: self.requirement.into(),
            });
        }
        Ok(library)
    }

    /// Install one handler on every hook point the library exposes.
    /// All-or-nothing: on failure every hook installed so far is removed.
    pub(crate) fn patch(
        &self,
        translate: fn(&CallEvent) -> RawCallContext,
        observer: Arc<dyn CallObserver>,
    ) -> Result<(), CompatibilityError> {
        let library = self.check_compatibility()?;

        let mut installed = self.installed.lock();
        if !installed.is_empty() {
            debug!(adapter = self.adapter, "Adapter already patched");
            return Ok(());
        }

        let handler: Arc<dyn HookHandler> = Arc::new(ObserverBridge { translate, observer });
        for name in self.hooks {
            let Some(hook) = library.hook(name) else {
                continue;
            };
            if !hook.install(Arc::clone(&handler)) {
                for (hook, handler) in installed.drain(..) {
                    hook.uninstall(&handler);
                }
                return Err(CompatibilityError::HookOccupied {
                    adapter: self.adapter.into(),
                    hook: (*name).into(),
                });
            }
            installed.push((hook, Arc::clone(&handler)));
        }

        if installed.is_empty() {
            return Err(CompatibilityError::LibraryUnavailable {
                adapter: self.adapter.into(),
            });
        }

        info!(
            adapter = self.adapter,
            version = library.version(),
            hooks = installed.len(),
            "Patched library hooks"
        );
        Ok(())
    }

    pub(crate) fn unpatch(&self) -> bool {
        let mut installed = self.installed.lock();
        if installed.is_empty() {
            return false;
        }
        let removed = installed
            .drain(..)
            .filter(|(hook, handler)| hook.uninstall(handler))
            .count();
        info!(adapter = self.adapter, hooks = removed, "Unpatched library hooks");
        true
    }

    pub(crate) fn is_patched(&self) -> bool {
        !self.installed.lock().is_empty()
    }
}

/// Parse a library version, accepting `major.minor` and `major` forms.
pub(crate) fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    Version::parse(raw)
        .or_else(|_| Version::parse(&format!("{raw}.0")))
        .or_else(|_| Version::parse(&format!("{raw}.0.0")))
        .ok()
}

// ── Payload helpers ──────────────────────────────────────────────────────

pub(crate) fn str_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub(crate) fn u64_field(payload: &Map<String, Value>, key: &str) -> Option<u64> {
    payload.get(key).and_then(Value::as_u64)
}

pub(crate) fn decimal_field(payload: &Map<String, Value>, key: &str) -> Option<rust_decimal::Decimal> {
    match payload.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_version_parsing() {
        assert_eq!(parse_version("0.10.3"), Some(Version::new(0, 10, 3)));
        assert_eq!(parse_version("v1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_version("latest"), None);
    }

    #[test]
    fn builtin_table_names() {
        let names: Vec<_> = builtin_adapters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["llamaindex", "openai"]);
    }

    #[test]
    fn decimal_payload_forms() {
        let mut payload = Map::new();
        payload.insert("a".into(), Value::from("0.015"));
        payload.insert("b".into(), serde_json::json!(0.25));
        payload.insert("c".into(), Value::Bool(true));
        assert_eq!(decimal_field(&payload, "a"), Some(rust_decimal::Decimal::new(15, 3)));
        assert_eq!(decimal_field(&payload, "b"), Some(rust_decimal::Decimal::new(25, 2)));
        assert_eq!(decimal_field(&payload, "c"), None);
    }
}
