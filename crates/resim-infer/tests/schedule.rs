
use resim_core::Value;
use resim_infer::{run_schedule, BlockSpec, InferCommand, InferSchedule, SeedPolicy, SubproblemExpr};
use resim_trace::ConcreteTrace;
use tempfile::tempdir;

const SCHEDULE: &str = r#"
sweeps: 3
seed_policy:
  master_seed: 17
  label: chain
commands:
  - kind: mh
    transitions: 2
  - kind: pgibbs
    scope: time
    particles: 3
  - kind: func-pgibbs
    scope: time
    block: ordered
  - kind: gibbs
    scope: time
    block: 1
  - kind: subproblem-mh
    program:
      op: minimal-subproblem
      source:
        op: random1
        source:
          op: fetch-tag
          name: time
  - kind: mh
    scope: missing
"#;

fn snapshot(trace: &ConcreteTrace) -> Vec<Option<Value>> {
    trace.node_ids().map(|node| trace.value_at(node).cloned()).collect()
}

#[test]
fn yaml_schedule_parses_with_defaults() {
    let schedule = InferSchedule::from_yaml_str(SCHEDULE).unwrap();
    assert_eq!(schedule.sweeps, 3);
    assert_eq!(
        schedule.seed_policy,
        SeedPolicy {
            master_seed: 17,
            label: Some("chain".into()),
        }
    );
    assert_eq!(schedule.commands.len(), 6);
    assert_eq!(
        schedule.commands[0],
        InferCommand::Mh {
            scope: "default".into(),
            block: BlockSpec::One,
            transitions: 2,
        }
    );
    assert_eq!(
        schedule.commands[2],
        InferCommand::FuncPgibbs {
            scope: "time".into(),
            block: BlockSpec::Ordered,
            transitions: 1,
            particles: 4,
        }
    );
    assert_eq!(
        schedule.commands[3],
        InferCommand::Gibbs {
            scope: "time".into(),
            block: BlockSpec::Block(1i64.into()),
            transitions: 1,
        }
    );
    assert!(matches!(schedule.commands[4], InferCommand::SubproblemMh { .. }));
    assert_eq!(schedule.commands[5].scope(), Some("missing"));
}

#[test]
fn schedule_roundtrips_through_a_file() {
    let schedule = InferSchedule::from_yaml_str(SCHEDULE).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("schedule.yaml");
    std::fs::write(&path, schedule.to_yaml_string().unwrap()).unwrap();
    assert_eq!(InferSchedule::from_yaml_path(&path).unwrap(), schedule);

    let json = schedule.to_json_string().unwrap();
    assert_eq!(InferSchedule::from_json_str(&json).unwrap(), schedule);
}

#[test]
fn missing_files_and_bad_yaml_are_serde_errors() {
    let dir = tempdir().unwrap();
    let err = InferSchedule::from_yaml_path(&dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.info().code, "schedule-read");
    let err = InferSchedule::from_yaml_str("commands:\n  - kind: annealing\n").unwrap_err();
    assert_eq!(err.info().code, "schedule-yaml-parse");
}

#[test]
fn schedule_runs_reproducibly() {
    let schedule = InferSchedule::from_yaml_str(SCHEDULE).unwrap();
    let observed = [0.3, 1.1, -0.2, 0.8];

    let mut first = fixtures::binary_chain(&observed, 50);
    let summary = run_schedule(&mut first.trace, &schedule).unwrap();
    assert!(first.trace.is_whole());
    assert_eq!(summary.sweeps, 3);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.proposals, 3 * (2 + 1 + 1 + 1 + 1));
    assert!(summary.accepted <= summary.proposals);
    assert_eq!(summary.acceptance_rates.len(), 5);
    assert!(summary.acceptance_rates.contains_key("1:pgibbs"));
    assert!(!summary.acceptance_rates.contains_key("5:mh"));

    let mut second = fixtures::binary_chain(&observed, 50);
    let again = run_schedule(&mut second.trace, &schedule).unwrap();
    assert_eq!(summary, again);
    assert_eq!(snapshot(&first.trace), snapshot(&second.trace));
}

#[test]
fn invalid_commands_fail_before_running() {
    let mut chain = fixtures::binary_chain(&[0.5], 51);
    let before = snapshot(&chain.trace);
    let schedule = InferSchedule::new(vec![
        InferCommand::mh("default"),
        InferCommand::Mh {
            scope: "default".into(),
            block: BlockSpec::Block(2i64.into()),
            transitions: 1,
        },
    ]);
    let err = run_schedule(&mut chain.trace, &schedule).unwrap_err();
    assert_eq!(err.info().code, "default-scope-block");
    assert_eq!(snapshot(&chain.trace), before);

    let schedule = InferSchedule::new(vec![InferCommand::SubproblemMh {
        program: SubproblemExpr::fetch_tag("time"),
        transitions: 1,
    }]);
    let err = run_schedule(&mut chain.trace, &schedule).unwrap_err();
    assert_eq!(err.info().code, "program-not-subproblem");
}
