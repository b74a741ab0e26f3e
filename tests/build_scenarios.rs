//! End-to-end builds from YAML documents.

use dagsmith::core::error::BuildError;
use dagsmith::core::types::DagSettings;
use dagsmith::{
    BuildOptions, ComponentRegistry, DagDefaults, DagFactory, DagSpec, FactoryConfig,
    GraphAssembler, SchemaKind,
};
use serde_yaml_ng::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULTS: &str = r#"
default_args:
  owner: default_owner
  start_date: 2018-03-01
  end_date: 2018-03-05
  retries: 1
  retry_delay_sec: 300
concurrency: 1
max_active_runs: 1
dagrun_timeout_sec: 600
schedule_interval: "0 1 * * *"
"#;

fn registry() -> Arc<ComponentRegistry> {
    Arc::new(
        ComponentRegistry::builder()
            .register(SchemaKind::new("shell.Command").required(&["bash_command"]))
            .register(SchemaKind::new("py.Function").slot("python_callable", true))
            .register(
                SchemaKind::new("http.Sensor")
                    .required(&["endpoint", "http_conn_id"])
                    .optional(&["request_params"])
                    .slot("response_check", false),
            )
            .build(),
    )
}

fn defaults() -> DagDefaults {
    serde_yaml_ng::from_str(DEFAULTS).unwrap()
}

fn spec(yaml: &str) -> DagSpec {
    serde_yaml_ng::from_str(yaml).unwrap()
}

fn edge_list(a: &dagsmith::GraphArtifact) -> Vec<String> {
    a.edges
        .iter()
        .map(|e| format!("{} -> {}", e.upstream, e.downstream))
        .collect()
}

#[test]
fn test_flat_workflow() {
    let dag = spec(
        r###"
doc_md: "##here is a doc md string"
default_args:
  owner: custom_owner
description: this is an example dag
schedule_interval: "0 3 * * *"
tags: [tag1, tag2]
tasks:
  task_1:
    operator: shell.Command
    bash_command: echo 1
    execution_timeout_secs: 5
  task_2:
    operator: shell.Command
    bash_command: echo 2
    dependencies: [task_1]
  task_3:
    operator: shell.Command
    bash_command: echo 3
    dependencies: [task_1]
"###,
    );
    let a = GraphAssembler::new(registry(), BuildOptions::default())
        .build("test_dag", &dag, &defaults())
        .unwrap();

    assert_eq!(edge_list(&a), vec!["task_1 -> task_2", "task_1 -> task_3"]);
    assert_eq!(a.metadata.description.as_deref(), Some("this is an example dag"));
    assert_eq!(a.metadata.schedule_interval.as_deref(), Some("0 3 * * *"));
    assert_eq!(a.metadata.dagrun_timeout, Some(Duration::from_secs(600)));
    assert_eq!(a.metadata.tags, vec!["tag1", "tag2"]);
    assert_eq!(a.default_args.owner.as_deref(), Some("custom_owner"));
    assert_eq!(a.default_args.retry_delay, Some(Duration::from_secs(300)));
    assert_eq!(a.default_args.start_date.to_rfc3339(), "2018-03-01T00:00:00+00:00");

    let t1 = a.node("task_1").unwrap();
    assert_eq!(t1.policy.execution_timeout, Some(Duration::from_secs(5)));
    assert_eq!(t1.policy.owner.as_deref(), Some("custom_owner"));
    assert_eq!(t1.instance.params["bash_command"], Value::from("echo 1"));
}

#[test]
fn test_group_expansion() {
    let dag = spec(
        r#"
task_groups:
  task_group_1:
    tooltip: this is a task group
    dependencies: [task_1]
  task_group_2:
    dependencies: [task_group_1]
  task_group_3: {}
tasks:
  task_1: {operator: shell.Command, bash_command: echo 1}
  task_2: {operator: shell.Command, bash_command: echo 2, task_group_name: task_group_1}
  task_3: {operator: shell.Command, bash_command: echo 3, task_group_name: task_group_1, dependencies: [task_2]}
  task_4: {operator: shell.Command, bash_command: echo 4, dependencies: [task_group_1]}
  task_5: {operator: shell.Command, bash_command: echo 5, task_group_name: task_group_2}
  task_6: {operator: shell.Command, bash_command: echo 6, task_group_name: task_group_2, dependencies: [task_5]}
"#,
    );
    let a = GraphAssembler::new(registry(), BuildOptions::default())
        .build("test_dag", &dag, &defaults())
        .unwrap();

    let mut expected = vec![
        "task_1 -> task_group_1.task_2",
        "task_group_1.task_2 -> task_group_1.task_3",
        "task_group_1.task_3 -> task_4",
        "task_group_1.task_3 -> task_group_2.task_5",
        "task_group_2.task_5 -> task_group_2.task_6",
    ];
    expected.sort();
    assert_eq!(edge_list(&a), expected);
    assert_eq!(a.groups.len(), 3);
    assert!(a.group_members("task_group_3").is_empty());
    assert_eq!(a.downstream("task_group_1.task_3"), vec!["task_4", "task_group_2.task_5"]);
}

#[test]
fn test_empty_group_drops_dependency() {
    let dag = spec(
        r#"
task_groups:
  empty:
    dependencies: [a]
tasks:
  a: {operator: shell.Command, bash_command: x}
  b: {operator: shell.Command, bash_command: x, dependencies: [empty]}
"#,
    );
    let a = GraphAssembler::new(registry(), BuildOptions::default())
        .build("d", &dag, &defaults())
        .unwrap();
    assert!(a.edges.is_empty());
    assert_eq!(a.roots(), vec!["a", "b"]);
}

#[test]
fn test_missing_parameters_listed() {
    let dag = spec("tasks:\n  sensor: {operator: http.Sensor}\n");
    let err = GraphAssembler::new(registry(), BuildOptions::default())
        .build("d", &dag, &defaults())
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::MissingParameter {
            task_id: "sensor".to_string(),
            params: vec!["endpoint".to_string(), "http_conn_id".to_string()]
        }
    );
}

#[test]
fn test_named_callable_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("checks.yaml"),
        "print_test: '|ctx| true'\nexpect_ok: '|response| response.text.includes(\"ok\")'\n",
    )
    .unwrap();

    let dag = spec(
        r#"
tasks:
  fn_task:
    operator: py.Function
    python_callable_name: print_test
    python_callable_file: checks.yaml
  sensor:
    operator: http.Sensor
    endpoint: /health
    http_conn_id: svc
    response_check_name: expect_ok
    response_check_file: checks.yaml
"#,
    );
    let a = GraphAssembler::new(
        registry(),
        BuildOptions::default().with_callable_root(dir.path()),
    )
    .build("d", &dag, &defaults())
    .unwrap();

    let check = a.node("sensor").unwrap().instance.callable("response_check").unwrap();
    let response: Value = serde_yaml_ng::from_str("text: all ok").unwrap();
    assert!(check.test(&response).unwrap());
    assert!(!a.node("sensor").unwrap().instance.params.contains_key("response_check_name"));
}

#[test]
fn test_callable_slot_failures() {
    let assembler = GraphAssembler::new(registry(), BuildOptions::default());

    let partial = spec("tasks:\n  t: {operator: py.Function, python_callable_name: print_test}\n");
    assert_eq!(
        assembler.build("d", &partial, &defaults()).unwrap_err(),
        BuildError::MissingParameter {
            task_id: "t".to_string(),
            params: vec!["python_callable_file".to_string()]
        }
    );

    let empty = spec("tasks:\n  t: {operator: py.Function}\n");
    assert!(matches!(
        assembler.build("d", &empty, &defaults()),
        Err(BuildError::MissingParameter { .. })
    ));

    let missing_file = spec(
        "tasks:\n  t: {operator: py.Function, python_callable_name: f, python_callable_file: /nonexistent/unit.yaml}\n",
    );
    assert!(matches!(
        assembler.build("d", &missing_file, &defaults()),
        Err(BuildError::CallableResolution { ref slot, .. }) if slot == "python_callable"
    ));

    let out_of_scope = spec("tasks:\n  t: {operator: py.Function, python_callable_expr: '|x| y + 1'}\n");
    assert!(matches!(
        assembler.build("d", &out_of_scope, &defaults()),
        Err(BuildError::CallableResolution { .. })
    ));
}

#[test]
fn test_deeply_nested_inline_expression_fails_build() {
    let depth = 1000;
    let expr = format!("|x| {}x{}", "(".repeat(depth), ")".repeat(depth));
    let mut dag = spec("tasks:\n  t: {operator: py.Function}\n");
    dag.tasks
        .get_mut("t")
        .unwrap()
        .params
        .insert("python_callable_expr".into(), expr.into());

    let err = GraphAssembler::new(registry(), BuildOptions::default())
        .build("d", &dag, &defaults())
        .unwrap_err();
    assert!(matches!(
        err,
        BuildError::CallableResolution { ref slot, ref reason } if slot == "python_callable" && reason.contains("nesting")
    ));
}

#[test]
fn test_callbacks_at_every_scope() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hooks.yaml"), "print_context: '|ctx| ctx'\n").unwrap();

    let dag = spec(
        r#"
default_args:
  owner: custom_owner
  on_failure_callback: hooks.yaml::print_context
  on_success_callback: hooks.yaml::print_context
  on_execute_callback: hooks.yaml::print_context
  on_retry_callback: hooks.yaml::print_context
on_failure_callback: hooks.yaml::print_context
on_success_callback: hooks.yaml::print_context
sla_miss_callback: hooks.yaml::print_context
tasks:
  task_1:
    operator: shell.Command
    bash_command: echo 1
    on_failure_callback: {expr: '|ctx| ctx.exception'}
  task_2:
    operator: shell.Command
    bash_command: echo 2
    dependencies: [task_1]
"#,
    );
    let a = GraphAssembler::new(
        registry(),
        BuildOptions::default().with_callable_root(dir.path()),
    )
    .build("d", &dag, &defaults())
    .unwrap();

    assert!(a.callbacks.on_success.is_some());
    assert!(a.callbacks.on_failure.is_some());
    assert!(a.callbacks.sla_miss.is_some());

    let t1 = a.node("task_1").unwrap();
    assert_eq!(t1.callbacks.on_failure.as_ref().unwrap().source(), "|ctx| ctx.exception");
    let t2 = a.node("task_2").unwrap();
    assert!(t2.callbacks.iter().all(|(_, cb)| cb.is_some()));

    let summary = a.summary();
    assert_eq!(summary.callbacks.len(), 3);
    assert_eq!(summary.tasks[1].callbacks.len(), 4);
}

#[test]
fn test_capability_gating() {
    let gated = GraphAssembler::new(registry(), BuildOptions::default().with_task_groups(false));

    let with_groups = spec("task_groups:\n  g: {}\ntasks:\n  t: {operator: shell.Command, bash_command: x}\n");
    let err = gated.build("d", &with_groups, &defaults()).unwrap_err();
    assert!(err.to_string().contains("task_groups"));

    let flat = spec("tasks:\n  t: {operator: shell.Command, bash_command: x}\n");
    assert!(gated.build("d", &flat, &defaults()).is_ok());
}

#[test]
fn test_missing_start_date() {
    let dag = spec("tasks:\n  t: {operator: shell.Command, bash_command: x}\n");
    let err = GraphAssembler::new(registry(), BuildOptions::default())
        .build("test_dag", &dag, &DagDefaults::default())
        .unwrap_err();
    assert!(matches!(err, BuildError::MissingStartDate { .. }));
}

#[test]
fn test_global_settings_fill_gaps() {
    let mut defaults = defaults();
    defaults.settings = DagSettings {
        description: Some("from defaults".to_string()),
        ..defaults.settings
    };
    let dag = spec("tasks:\n  t: {operator: shell.Command, bash_command: x}\n");
    let a = GraphAssembler::new(registry(), BuildOptions::default())
        .build("d", &dag, &defaults)
        .unwrap();
    assert_eq!(a.metadata.description.as_deref(), Some("from defaults"));
    assert_eq!(a.metadata.schedule_interval.as_deref(), Some("0 1 * * *"));
    assert_eq!(a.metadata.max_active_runs, Some(1));
}

#[test]
fn test_fingerprint_tracks_content() {
    let assembler = GraphAssembler::new(registry(), BuildOptions::default());
    let dag = spec("tasks:\n  a: {operator: shell.Command, bash_command: x}\n  b: {operator: shell.Command, bash_command: y, dependencies: [a]}\n");
    let first = assembler.build("d", &dag, &defaults()).unwrap();
    let second = assembler.build("d", &dag, &defaults()).unwrap();
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert!(first.fingerprint().starts_with("blake3:"));

    let changed = spec("tasks:\n  a: {operator: shell.Command, bash_command: x}\n  b: {operator: shell.Command, bash_command: z, dependencies: [a]}\n");
    let third = assembler.build("d", &changed, &defaults()).unwrap();
    assert_ne!(first.fingerprint(), third.fingerprint());

    let json = first.summary().to_json().unwrap();
    assert!(json.contains("\"dag_id\": \"d\""));
}

#[test]
fn test_factory_document() {
    let doc = format!(
        "default:\n{}\nfirst:\n  tasks:\n    a: {{operator: shell.Command, bash_command: x}}\nsecond:\n  tasks:\n    b: {{operator: nope}}\n",
        DEFAULTS
            .lines()
            .map(|l| format!("  {l}"))
            .collect::<Vec<_>>()
            .join("\n")
    );
    let config = FactoryConfig::from_yaml(&doc).unwrap();
    let factory = DagFactory::new(GraphAssembler::new(registry(), BuildOptions::default()));

    let err = factory.build_all(&config).unwrap_err();
    assert!(err.to_string().contains("'second'"));
    assert!(matches!(err.root(), BuildError::UnknownOperator { .. }));

    assert_eq!(factory.build_one(&config, "first").unwrap().nodes.len(), 1);
}

#[test]
fn test_concurrent_builds() {
    let assembler = Arc::new(GraphAssembler::new(registry(), BuildOptions::default()));
    let dag = Arc::new(spec(
        "task_groups:\n  g: {dependencies: [a]}\ntasks:\n  a: {operator: shell.Command, bash_command: x}\n  m: {operator: shell.Command, bash_command: y, task_group_name: g}\n",
    ));
    let defaults = Arc::new(defaults());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let assembler = Arc::clone(&assembler);
            let dag = Arc::clone(&dag);
            let defaults = Arc::clone(&defaults);
            std::thread::spawn(move || {
                assembler
                    .build(&format!("dag_{i}"), &dag, &defaults)
                    .map(|a| (a.dag_id.clone(), edge_list(&a)))
            })
        })
        .collect();

    for handle in handles {
        let (dag_id, edges) = handle.join().unwrap().unwrap();
        assert!(dag_id.starts_with("dag_"));
        assert_eq!(edges, vec!["a -> g.m"]);
    }
}
