//! End-to-end scenarios for checkpoint planning.
//!
//! These drive a [`Session`] through a simulated namespace the way a kernel
//! host would: snapshot names, run a unit, report it, checkpoint.

use std::collections::{BTreeMap, BTreeSet};

use elastic_checkpoint::{
    restore, CheckpointArtifact, ExecutedUnit, Namespace, Object, OperationId, OptimizerError,
    RestoreError, RestoreStep, Session, SessionConfig, SessionError, StateVersionId, Strategy,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn session(throughput: f64, strategy: Strategy, alpha: Option<f64>) -> Session {
    let mut config = SessionConfig::default();
    config.strategy = strategy;
    config.alpha = alpha;
    let mut session = Session::new(config).unwrap();
    session.set_manual_throughput(throughput).unwrap();
    session
}

fn run<F>(
    session: &mut Session,
    ns: &mut Namespace,
    code: &str,
    inputs: &[&str],
    runtime: f64,
    body: F,
) -> OperationId
where
    F: FnOnce(&mut Namespace),
{
    let pre = ns.names();
    body(ns);
    session
        .record(ExecutedUnit::new(code, &pre, ns, runtime).with_inputs(inputs.iter().copied()))
        .unwrap()
}

fn run_with_side_effects<F>(session: &mut Session, ns: &mut Namespace, code: &str, body: F)
where
    F: FnOnce(&mut Namespace),
{
    let pre = ns.names();
    body(ns);
    session
        .record(ExecutedUnit::new(code, &pre, ns, 1.0).with_side_effects())
        .unwrap();
}

/// Bytes value whose estimated size is exactly `size`.
fn blob(size: usize) -> Object {
    Object::Bytes(vec![0; size - 33])
}

fn live(session: &Session, name: &str) -> StateVersionId {
    session.graph().live_version(name).unwrap().id
}

fn ids(items: &[StateVersionId]) -> BTreeSet<StateVersionId> {
    items.iter().copied().collect()
}

/// op1 creates x (runtime 10, 28 bytes); op2 reads x and creates y
/// (runtime 1, 1000 bytes); op3 reads y and creates z (runtime 1, 28 bytes).
fn three_step(session: &mut Session) -> (Namespace, [OperationId; 3]) {
    let mut ns = Namespace::new();
    let op1 = run(session, &mut ns, "x = load()", &[], 10.0, |ns| {
        ns.assign("x", Object::Int(7));
    });
    let op2 = run(session, &mut ns, "y = expand(x)", &["x"], 1.0, |ns| {
        ns.assign("y", blob(1000));
    });
    let op3 = run(session, &mut ns, "z = summarize(y)", &["y"], 1.0, |ns| {
        ns.assign("z", Object::Int(1));
    });
    (ns, [op1, op2, op3])
}

// ─────────────────────────────────────────────────────────────────────────────
// Cost-Based Selection
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_three_step_recomputes_large_value() {
    let mut s = session(100.0, Strategy::Exact, None);
    let (ns, [_, op2, _]) = three_step(&mut s);

    let cp = s.checkpoint(&ns).unwrap();
    let (x, y, z) = (live(&s, "x"), live(&s, "y"), live(&s, "z"));

    assert_eq!(cp.partition.migrate, ids(&[x, z]));
    assert_eq!(cp.partition.recompute, ids(&[y]));
    assert_eq!(cp.partition.replay, [op2].into_iter().collect());
    // 0.28 + 0.28 migration, 1.0 replay.
    assert!((cp.partition.cost.total() - 1.56).abs() < 1e-9);

    let plan = restore::plan(
        &cp.graph,
        &cp.partition.migrate,
        &cp.partition.recompute,
        &cp.partition.replay,
    )
    .unwrap();
    assert_eq!(
        plan.steps,
        vec![
            RestoreStep::Inject(x),
            RestoreStep::Replay(op2),
            RestoreStep::Inject(z),
        ]
    );
}

#[test]
fn test_three_step_tie_resolves_to_migrate() {
    // Replaying op2 costs 10 * 1, migrating y costs 1000 / 100.
    let mut s = session(100.0, Strategy::Exact, Some(10.0));
    let (ns, _) = three_step(&mut s);
    let cp = s.checkpoint(&ns).unwrap();
    assert!(cp.partition.recompute.is_empty());
    assert!(cp.partition.replay.is_empty());
    assert_eq!(cp.partition.migrate.len(), 3);
}

#[test]
fn test_three_step_conservative_migrates_everything() {
    let mut s = session(100.0, Strategy::ExactConservative, None);
    let (ns, _) = three_step(&mut s);
    let cp = s.checkpoint(&ns).unwrap();
    assert_eq!(cp.partition.migrate.len(), 3);
    assert!((cp.partition.cost.total() - 10.56).abs() < 1e-9);
}

#[test]
fn test_three_step_aggressive_recomputes_downstream() {
    let mut s = session(100.0, Strategy::ExactAggressive, None);
    let (ns, [_, op2, op3]) = three_step(&mut s);
    let cp = s.checkpoint(&ns).unwrap();

    // x stays migrated: 0.28 < 10 * 0.05.
    assert_eq!(cp.partition.migrate, ids(&[live(&s, "x")]));
    assert_eq!(cp.partition.recompute, ids(&[live(&s, "y"), live(&s, "z")]));
    assert_eq!(cp.partition.replay, [op2, op3].into_iter().collect());
}

#[test]
fn test_exact_never_worse_than_baselines() {
    for alpha in [0.05, 0.5, 1.0, 5.0, 20.0] {
        let mut s = session(100.0, Strategy::Exact, Some(alpha));
        let (ns, _) = three_step(&mut s);
        let exact = s.checkpoint(&ns).unwrap().partition.cost.total();

        s.set_strategy(Strategy::MigrateAll);
        let migrate_all = s.checkpoint(&ns).unwrap().partition.cost.total();
        s.set_strategy(Strategy::RecomputeAll);
        let recompute_all = s.checkpoint(&ns).unwrap().partition.cost.total();

        assert!(exact <= migrate_all + 1e-9, "alpha {alpha}");
        assert!(exact <= recompute_all + 1e-9, "alpha {alpha}");
    }
}

#[test]
fn test_checkpoint_twice_yields_same_partition() {
    let mut s = session(100.0, Strategy::Exact, None);
    let (ns, _) = three_step(&mut s);
    let first = s.checkpoint(&ns).unwrap();
    let second = s.checkpoint(&ns).unwrap();
    assert_eq!(first.partition, second.partition);
}

// ─────────────────────────────────────────────────────────────────────────────
// Change Detection
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_mutated_value_recomputes_through_its_history() {
    let mut s = session(100.0, Strategy::Exact, None);
    let mut ns = Namespace::new();
    let op1 = run(&mut s, &mut ns, "xs = []", &[], 0.1, |ns| {
        ns.assign("xs", Object::List(vec![]));
    });
    let op2 = run(&mut s, &mut ns, "xs.append(load())", &[], 0.2, |ns| {
        let xs = ns.get("xs").unwrap();
        let big = ns.heap.alloc(blob(10_000));
        ns.heap.push(xs, big).unwrap();
    });

    let xs = s.graph().live_version("xs").unwrap();
    assert_eq!(xs.version, 2);
    let op = s.graph().operation(op2).unwrap();
    assert_eq!(op.inputs, vec![xs.previous.unwrap()]);

    let cp = s.checkpoint(&ns).unwrap();
    assert_eq!(cp.partition.replay, [op1, op2].into_iter().collect());
}

#[test]
fn test_rebinding_cuts_history() {
    let mut s = session(100.0, Strategy::Exact, None);
    let mut ns = Namespace::new();
    run(&mut s, &mut ns, "xs = slow()", &[], 50.0, |ns| {
        ns.assign("xs", Object::List(vec![]));
    });
    let op2 = run(&mut s, &mut ns, "xs = [load()]", &[], 0.2, |ns| {
        let big = ns.heap.alloc(blob(10_000));
        ns.assign("xs", Object::List(vec![big]));
    });

    assert!(s.graph().operation(op2).unwrap().inputs.is_empty());
    let cp = s.checkpoint(&ns).unwrap();
    assert_eq!(cp.partition.replay, [op2].into_iter().collect());
}

#[test]
fn test_unserializable_value_is_recomputed() {
    let mut s = session(100.0, Strategy::MigrateAll, None);
    let mut ns = Namespace::new();
    run(&mut s, &mut ns, "f = open(path)", &[], 0.1, |ns| {
        let handle = ns.heap.opaque("file");
        ns.bind("f", handle);
    });
    let f = live(&s, "f");
    assert!(s.graph().state_version(f).unwrap().is_unserializable());

    let cp = s.checkpoint(&ns).unwrap();
    assert_eq!(cp.partition.recompute, ids(&[f]));
    assert_eq!(cp.partition.forced_recompute, ids(&[f]));
}

#[test]
fn test_unserializable_behind_side_effect_fails_checkpoint() {
    let mut s = session(100.0, Strategy::Exact, None);
    let mut ns = Namespace::new();
    run_with_side_effects(&mut s, &mut ns, "conn = connect()", |ns| {
        let handle = ns.heap.opaque("socket");
        ns.bind("conn", handle);
    });
    let err = s.checkpoint(&ns).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Optimizer(OptimizerError::Unresolvable { ref names, .. })
            if names == &["conn@1".to_string()]
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Deletion
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_deleted_input_is_regenerated_on_restore() {
    let mut s = session(100.0, Strategy::Exact, None);
    let mut ns = Namespace::new();
    let op1 = run(&mut s, &mut ns, "x = 1", &[], 0.5, |ns| {
        ns.assign("x", Object::Int(1));
    });
    let op2 = run(&mut s, &mut ns, "y = expand(x)", &["x"], 1.0, |ns| {
        ns.assign("y", blob(10_000));
    });
    run(&mut s, &mut ns, "del x", &[], 0.0, |ns| {
        ns.unbind("x");
    });

    let cp = s.checkpoint(&ns).unwrap();
    assert_eq!(cp.partition.replay, [op1, op2].into_iter().collect());

    let plan = restore::plan(
        &cp.graph,
        &cp.partition.migrate,
        &cp.partition.recompute,
        &cp.partition.replay,
    )
    .unwrap();
    assert_eq!(plan.replay_order(), vec![op1, op2]);
    assert!(plan.injected().is_empty());
}

#[test]
fn test_deleted_input_missing_from_replay_is_reported() {
    let mut s = session(100.0, Strategy::Exact, None);
    let mut ns = Namespace::new();
    run(&mut s, &mut ns, "x = 1", &[], 0.5, |ns| {
        ns.assign("x", Object::Int(1));
    });
    let op2 = run(&mut s, &mut ns, "y = expand(x)", &["x"], 1.0, |ns| {
        ns.assign("y", blob(10_000));
    });
    run(&mut s, &mut ns, "del x", &[], 0.0, |ns| {
        ns.unbind("x");
    });

    let y = live(&s, "y");
    let err = restore::plan(
        s.graph(),
        &BTreeSet::new(),
        &ids(&[y]),
        &[op2].into_iter().collect(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        RestoreError::MissingDependency {
            operation: op2,
            name: "x".to_string(),
            version: 1,
        }
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifacts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_artifact_roundtrip_and_resume() {
    let mut s = session(100.0, Strategy::Exact, None);
    let (mut ns, [_, op2, _]) = three_step(&mut s);
    let cp = s.checkpoint(&ns).unwrap();

    let payloads: BTreeMap<StateVersionId, Vec<u8>> = cp
        .partition
        .migrate
        .iter()
        .map(|id| (*id, id.to_string().into_bytes()))
        .collect();
    let artifact = CheckpointArtifact::new(&cp, payloads).unwrap();
    let json = artifact.to_json().unwrap();

    let loaded = CheckpointArtifact::from_json(&json).unwrap();
    assert_eq!(loaded.graph_hash, artifact.graph_hash);

    let (mut resumed, plan) = Session::resume(&loaded, SessionConfig::default()).unwrap();
    assert_eq!(resumed.id(), s.id());
    assert_eq!(plan.replay_order(), vec![op2]);

    // The resumed session keeps recording on top of the restored graph.
    resumed.observe(&ns);
    assert!(resumed.fingerprint("y").is_some());
    let op4 = run(&mut resumed, &mut ns, "w = x + 1", &["x"], 0.1, |ns| {
        ns.assign("w", Object::Int(8));
    });
    assert_eq!(op4.as_u64(), 3);
    assert_eq!(
        resumed.graph().operation(op4).unwrap().inputs,
        vec![live(&resumed, "x")]
    );
}

#[test]
fn test_resume_rejects_artifact_missing_payload() {
    let mut s = session(100.0, Strategy::Exact, None);
    let (ns, _) = three_step(&mut s);
    let cp = s.checkpoint(&ns).unwrap();
    let payloads = cp
        .partition
        .migrate
        .iter()
        .map(|id| (*id, vec![1, 2, 3]))
        .collect();
    let mut artifact = CheckpointArtifact::new(&cp, payloads).unwrap();
    artifact.payloads.pop();

    let err = Session::resume(&artifact, SessionConfig::default()).unwrap_err();
    assert!(matches!(err, SessionError::Artifact(_)));
}
