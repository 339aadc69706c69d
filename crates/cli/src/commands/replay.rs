//! `genops replay` — Run recorded calls through the governance pipeline.
//!
//! Input is JSON lines, one `RawCallContext` per line. Blank lines and
//! lines starting with `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use genops_config::GovernanceConfig;
use genops_core::pipeline::RagPipelineSummary;
use genops_core::policy::BudgetAlert;
use genops_core::{RawCallContext, ScopeKind, ScopeTotals};
use genops_instrument::{GovernanceContext, LibraryCatalog, ShutdownReport};
use genops_telemetry::{ExportStats, MemorySink};
use tracing::warn;

use super::load_config;

/// Everything a replay produced, after shutdown.
struct Replay {
    sessions: Vec<ScopeTotals>,
    runs: Vec<ScopeTotals>,
    summaries: Vec<RagPipelineSummary>,
    alerts: Vec<BudgetAlert>,
    export: ExportStats,
    shutdown: ShutdownReport,
}

/// Run `calls` through a fresh context and shut it down.
fn replay(config: GovernanceConfig, calls: &[RawCallContext]) -> anyhow::Result<Replay> {
    let ctx = GovernanceContext::init(config, Arc::new(LibraryCatalog::new()))?;
    let sink = Arc::new(MemorySink::new());
    ctx.add_sink(sink.clone());

    for call in calls {
        ctx.record_call(call);
    }
    let shutdown = ctx.uninstrument();

    let aggregator = ctx.pipeline().aggregator();
    Ok(Replay {
        sessions: aggregator.scopes(ScopeKind::Session),
        runs: aggregator.scopes(ScopeKind::PipelineRun),
        summaries: sink.summaries(),
        alerts: sink.alerts(),
        export: ctx.pipeline().exporter().stats(),
        shutdown,
    })
}

pub async fn run(config_path: Option<&Path>, file: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let (calls, skipped) = read_calls(reader)?;
    let Replay {
        sessions,
        runs,
        summaries,
        alerts,
        export,
        shutdown,
    } = replay(config, &calls)?;

    if json {
        let out = serde_json::json!({
            "calls": calls.len(),
            "skipped": skipped,
            "sessions": sessions,
            "pipeline_runs": runs,
            "summaries": summaries,
            "alerts": alerts,
            "export": export,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("▶ Replayed {} call(s) from {}", calls.len(), file.display());
    if skipped > 0 {
        println!("  ⚠ {skipped} line(s) skipped");
    }
    println!("  Finalized runs at shutdown: {}", shutdown.finalized_runs);

    println!();
    println!("📊 Sessions");
    println!("─────────────────────────────────────");
    if sessions.is_empty() {
        println!("  (none)");
    }
    for totals in &sessions {
        println!(
            "  {:<24} ${:<12} {:>8} tokens {:>5} ops",
            totals.scope.id,
            totals.cost_usd.round_dp(6).to_string(),
            totals.total_tokens(),
            totals.operation_count
        );
    }

    println!();
    println!("🔗 Pipeline runs");
    println!("─────────────────────────────────────");
    if summaries.is_empty() {
        println!("  (none)");
    }
    for summary in &summaries {
        let stages: Vec<String> = summary.stages.iter().map(ToString::to_string).collect();
        let mut flags = Vec::new();
        if summary.out_of_order {
            flags.push("out-of-order");
        }
        if summary.reopened {
            flags.push("reopened");
        }
        if summary.timed_out {
            flags.push("timed-out");
        }
        println!(
            "  {}#{} ${} [{}] {}",
            summary.pipeline_run_id,
            summary.generation,
            summary.total_cost_usd.round_dp(6),
            stages.join(" → "),
            flags.join(", ")
        );
    }

    println!();
    if alerts.is_empty() {
        println!("✅ No budget alerts");
    } else {
        println!("⛔ Budget alerts");
        println!("─────────────────────────────────────");
        for alert in &alerts {
            println!(
                "  {} on {}: {} > {} ({}{})",
                alert.policy_id,
                alert.scope,
                alert.observed,
                alert.threshold,
                alert.enforcement,
                if alert.should_block { ", block" } else { "" }
            );
        }
    }

    Ok(())
}

/// Parse JSON-lines calls. Malformed lines are logged and counted.
fn read_calls(reader: impl BufRead) -> anyhow::Result<(Vec<RawCallContext>, usize)> {
    let mut calls = Vec::new();
    let mut skipped = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<RawCallContext>(line) {
            Ok(call) => calls.push(call),
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed call record");
                skipped += 1;
            }
        }
    }
    Ok((calls, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CALLS: &str = r#"
# session s-1
{"operation":"embedding","model":"text-embedding-3-small","input_tokens":1000,"session_id":"s-1","pipeline_run_id":"r-1"}
{"operation":"synthesis","model":"gpt-4o","cost_usd":"0.02","session_id":"s-1","pipeline_run_id":"r-1"}
not json
{"operation":"generic_call","model":"gpt-4o-mini","input_tokens":10,"output_tokens":5}
"#;

    #[test]
    fn reads_json_lines() {
        let (calls, skipped) = read_calls(CALLS.as_bytes()).unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(skipped, 1);
        assert_eq!(calls[1].pipeline_run_id.as_deref(), Some("r-1"));
        assert!(calls[2].session_id.is_none());
    }

    #[test]
    fn replay_rolls_up_runs_and_alerts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[policies]]
id = "session-cap"
scope = "session"
threshold = "0.01"
"#
        )
        .unwrap();
        let config = GovernanceConfig::load_from(file.path()).unwrap();
        let (calls, _) = read_calls(CALLS.as_bytes()).unwrap();

        let out = replay(config, &calls).unwrap();

        // The open run is finalized at shutdown and rolled into its session.
        assert_eq!(out.shutdown.finalized_runs, 1);
        assert_eq!(out.summaries.len(), 1);
        let summary = &out.summaries[0];
        assert_eq!(summary.pipeline_run_id, "r-1");
        assert_eq!(summary.stage_count(), 2);
        assert!(!summary.out_of_order);

        assert_eq!(out.sessions.len(), 1);
        assert_eq!(out.sessions[0].scope.id, "s-1");
        assert_eq!(out.sessions[0].cost_usd, summary.total_cost_usd);
        assert_eq!(out.sessions[0].operation_count, 2);
        assert_eq!(out.runs.len(), 1);

        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].policy_id, "session-cap");
        assert_eq!(out.alerts[0].scope.id, "s-1");

        assert_eq!(out.export.dropped, 0);
        assert!(out.export.exported > 0);
    }

    #[tokio::test]
    async fn replay_file_end_to_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CALLS.as_bytes()).unwrap();
        let config = tempfile::NamedTempFile::new().unwrap();

        run(Some(config.path()), file.path(), true).await.unwrap();
    }
}
