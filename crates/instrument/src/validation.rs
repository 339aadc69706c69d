//! Setup validation — checks a config against the libraries present before
//! anything is patched, and says how to fix what it finds.

use genops_config::GovernanceConfig;
use rust_decimal::Decimal;
use semver::VersionReq;
use serde::Serialize;

use crate::adapters::{builtin_adapters, parse_version};
use crate::catalog::LibraryCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// What the issue is about (`config`, an adapter name, `policies`, ...).
    pub component: String,
    pub message: String,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// No error-level issues.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Warning)
    }

    fn of(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    fn push(&mut self, severity: Severity, component: &str, message: String, fix: Option<String>) {
        self.issues.push(ValidationIssue {
            severity,
            component: component.to_string(),
            message,
            fix,
        });
    }
}

/// Check `config` against `catalog`. Issues are ordered most severe first.
pub fn validate_setup(config: &GovernanceConfig, catalog: &LibraryCatalog) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Err(e) = config.validate() {
        report.push(Severity::Error, "config", e.to_string(), None);
    }

    let builtin = builtin_adapters();
    for name in &config.adapters {
        if !builtin.iter().any(|(n, _)| n == name) {
            let known: Vec<_> = builtin.iter().map(|(n, _)| *n).collect();
            report.push(
                Severity::Error,
                name,
                format!("unknown adapter '{name}'"),
                Some(format!("use one of: {}", known.join(", "))),
            );
        }
    }

    let mut usable = 0;
    for (name, factory) in &builtin {
        let requested = config.adapters.iter().any(|a| a == name);
        if !config.adapters.is_empty() && !requested {
            continue;
        }

        let adapter = factory(catalog);
        let required = adapter.supported_versions().to_string();
        let Some(found) = adapter.version() else {
            let severity = if requested { Severity::Warning } else { Severity::Info };
            report.push(
                severity,
                name,
                "library not present; adapter will be skipped".into(),
                requested.then(|| format!("install a version matching {required}")),
            );
            continue;
        };

        let matches = parse_version(&found)
            .zip(VersionReq::parse(&required).ok())
            .map(|(version, req)| req.matches(&version));
        match matches {
            Some(true) => usable += 1,
            Some(false) => report.push(
                Severity::Error,
                name,
                format!("library version {found} is not supported (requires {required})"),
                Some(format!("upgrade to a version matching {required}")),
            ),
            None => report.push(
                Severity::Error,
                name,
                format!("cannot parse library version '{found}'"),
                None,
            ),
        }
    }

    if config.auto_instrument && usable == 0 {
        report.push(
            Severity::Warning,
            "adapters",
            "no adapter can be activated; only manual tracking will be recorded".into(),
            None,
        );
    }
    if !config.auto_instrument {
        report.push(
            Severity::Info,
            "adapters",
            "auto_instrument is off; no library will be patched".into(),
            Some("set auto_instrument = true".into()),
        );
    }

    if config.policies.is_empty() {
        report.push(
            Severity::Info,
            "policies",
            "no budget policies; costs are tracked but never capped".into(),
            Some("add a [[policies]] entry".into()),
        );
    }

    for key in ["team", "project"] {
        if !config.default_attributes.contains_key(key) {
            report.push(
                Severity::Info,
                "default_attributes",
                format!("no '{key}' attribute; costs cannot be attributed by {key}"),
                Some(format!("set default_attributes.{key} or GENOPS_{}", key.to_uppercase())),
            );
        }
    }

    for (model, price) in &config.custom_pricing {
        if price.input_per_m == Decimal::ZERO && price.output_per_m == Decimal::ZERO {
            report.push(
                Severity::Warning,
                "custom_pricing",
                format!("model '{model}' is priced at zero"),
                None,
            );
        }
    }

    report.issues.sort_by_key(|i| i.severity);
    report
}
