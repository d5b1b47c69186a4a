//! Checkpoint Inspector Binary
//!
//! Loads a checkpoint artifact, verifies it, and prints a JSON report of the
//! partition and the restore plan. With `--strategy`, the stored graph is
//! re-partitioned under that strategy and both partitions are reported.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `ELASTIC_MIGRATION_SPEED`, `ELASTIC_ALPHA`: cost model for `--strategy`
//! - `RUST_LOG`: Log level filter (default: checkpoint_inspect=info,elastic_checkpoint=info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin checkpoint_inspect -- checkpoint.json --strategy exact-aggressive
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use elastic_checkpoint::{
    CheckpointArtifact, DependencyGraph, Partition, RestorePlan, RestoreStep, SessionConfig,
    StateVersionId, Strategy,
};

/// Verify a checkpoint artifact and report its partition and restore plan
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Checkpoint artifact (JSON)
    path: PathBuf,

    /// Re-partition the stored graph under this strategy
    #[arg(long, value_parser = parse_strategy)]
    strategy: Option<Strategy>,
}

fn parse_strategy(raw: &str) -> Result<Strategy, String> {
    Strategy::from_str(raw).ok_or_else(|| {
        format!(
            "unknown strategy '{raw}' (expected exact, exact-conservative, exact-aggressive, \
             migrate-all or recompute-all)"
        )
    })
}

/// Initialize the tracing subscriber with JSON or pretty format.
///
/// Logs go to stderr; stdout carries the report.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "checkpoint_inspect=info,elastic_checkpoint=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn label(graph: &DependencyGraph, id: StateVersionId) -> String {
    graph
        .state_version(id)
        .map(|sv| sv.label())
        .unwrap_or_else(|| id.to_string())
}

fn labels(graph: &DependencyGraph, ids: &BTreeSet<StateVersionId>) -> Vec<String> {
    ids.iter().map(|id| label(graph, *id)).collect()
}

fn partition_report(graph: &DependencyGraph, partition: &Partition) -> Value {
    json!({
        "migrate": labels(graph, &partition.migrate),
        "recompute": labels(graph, &partition.recompute),
        "replay": partition.replay.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "forced_migrate": labels(graph, &partition.forced_migrate),
        "forced_recompute": labels(graph, &partition.forced_recompute),
        "cost": {
            "migration_secs": partition.cost.migration_secs,
            "recomputation_secs": partition.cost.recomputation_secs,
            "total_secs": partition.cost.total(),
        },
    })
}

fn plan_report(graph: &DependencyGraph, plan: &RestorePlan) -> Value {
    let steps: Vec<Value> = plan
        .steps
        .iter()
        .map(|step| match step {
            RestoreStep::Inject(id) => json!({ "inject": label(graph, *id) }),
            RestoreStep::Replay(id) => json!({
                "replay": id.to_string(),
                "code": graph.operation(*id).map(|op| op.code.as_str()).unwrap_or_default(),
            }),
        })
        .collect();
    Value::Array(steps)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();
    let path = args.path;

    let json = std::fs::read_to_string(&path)?;
    let artifact = CheckpointArtifact::from_json(&json)?;
    let plan = artifact.restore_plan()?;
    let graph = &artifact.graph;

    info!(
        path = %path.display(),
        session = %artifact.session_id,
        graph_hash = %artifact.graph_hash,
        "artifact verified"
    );

    let mut report = json!({
        "session_id": artifact.session_id,
        "created_at": artifact.created_at,
        "schema_version": artifact.schema_version,
        "graph_hash": artifact.graph_hash,
        "operations": graph.num_operations(),
        "state_versions": graph.num_state_versions(),
        "live": graph.live_ids().into_iter().map(|id| label(graph, id)).collect::<Vec<_>>(),
        "payload_bytes": artifact.payload_bytes(),
        "partition": partition_report(graph, &artifact.partition),
        "restore_plan": plan_report(graph, &plan),
    });

    if let Some(strategy) = args.strategy {
        let mut config = SessionConfig::from_env()?;
        config.strategy = strategy;
        let cost = config.cost_model()?;
        let alternative = strategy.select(graph, &graph.live_ids(), &cost)?;
        info!(
            strategy = %strategy,
            stored_total_secs = artifact.partition.cost.total(),
            alternative_total_secs = alternative.cost.total(),
            "re-partitioned stored graph"
        );
        report["alternative"] = json!({
            "strategy": strategy,
            "alpha": cost.alpha(),
            "throughput_bps": cost.throughput_bps(),
            "partition": partition_report(graph, &alternative),
        });
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parses_path_and_strategy() {
        let args =
            Args::try_parse_from(["checkpoint_inspect", "ckpt.json", "--strategy", "exact_r"])
                .unwrap();
        assert_eq!(args.path, PathBuf::from("ckpt.json"));
        assert_eq!(args.strategy, Some(Strategy::ExactAggressive));

        let args = Args::try_parse_from(["checkpoint_inspect", "ckpt.json"]).unwrap();
        assert_eq!(args.strategy, None);
    }

    #[test]
    fn test_rejects_unknown_strategy_and_missing_path() {
        assert!(Args::try_parse_from(["checkpoint_inspect", "a.json", "--strategy", "greedy"])
            .is_err());
        assert!(Args::try_parse_from(["checkpoint_inspect"]).is_err());
    }
}
