//! Property tests over randomly generated workflows.

use dagsmith::core::types::{TaskGroupSpec, TaskSpec};
use dagsmith::{BuildError, BuildOptions, ComponentRegistry, DagDefaults, DagSpec, GraphAssembler, SchemaKind};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

type TaskShape = (Option<usize>, Vec<usize>);

fn assembler() -> GraphAssembler {
    let registry = ComponentRegistry::builder()
        .register(SchemaKind::new("shell.Command").required(&["bash_command"]))
        .build();
    GraphAssembler::new(Arc::new(registry), BuildOptions::default())
}

fn defaults() -> DagDefaults {
    serde_yaml_ng::from_str("default_args: {start_date: 2024-01-01}").unwrap()
}

/// Tasks only depend on earlier tasks; groups depend on arbitrary tasks.
fn make_spec(groups: usize, tasks: &[TaskShape], group_deps: &[Vec<usize>]) -> DagSpec {
    let mut spec = DagSpec::default();
    for g in 0..groups {
        let deps = group_deps
            .get(g)
            .map(|d| d.iter().filter(|&&j| j < tasks.len()).map(|j| format!("t{j}")).collect())
            .unwrap_or_default();
        spec.task_groups.insert(
            format!("g{g}"),
            TaskGroupSpec {
                tooltip: None,
                dependencies: deps,
            },
        );
    }
    for (i, (group, deps)) in tasks.iter().enumerate() {
        let mut task = TaskSpec::new("shell.Command");
        task.params.insert("bash_command".into(), format!("echo {i}").into());
        task.task_group = group.filter(|_| groups > 0).map(|g| format!("g{}", g % groups));
        task.dependencies = deps.iter().filter(|&&j| j < i).map(|j| format!("t{j}")).collect();
        spec.tasks.insert(format!("t{i}"), task);
    }
    spec
}

fn shapes() -> impl Strategy<Value = (usize, Vec<TaskShape>, Vec<Vec<usize>>)> {
    (0usize..4, 1usize..12).prop_flat_map(|(groups, n)| {
        let task = (proptest::option::of(0usize..4), proptest::collection::vec(0usize..n, 0..3));
        (
            Just(groups),
            proptest::collection::vec(task, n),
            proptest::collection::vec(proptest::collection::vec(0usize..n, 0..2), groups),
        )
    })
}

proptest! {
    #[test]
    fn prop_layered_tasks_always_build((groups, tasks, _) in shapes()) {
        let spec = make_spec(groups, &tasks, &[]);
        let artifact = assembler().build("p", &spec, &defaults()).unwrap();
        prop_assert_eq!(artifact.topological_order.len(), tasks.len());
    }

    #[test]
    fn prop_successful_builds_are_acyclic((groups, tasks, group_deps) in shapes()) {
        let spec = make_spec(groups, &tasks, &group_deps);
        match assembler().build("p", &spec, &defaults()) {
            Ok(artifact) => {
                let position: HashMap<&str, usize> = artifact
                    .topological_order
                    .iter()
                    .enumerate()
                    .map(|(i, id)| (id.as_str(), i))
                    .collect();
                prop_assert_eq!(position.len(), artifact.nodes.len());
                for edge in &artifact.edges {
                    prop_assert!(position[edge.upstream.as_str()] < position[edge.downstream.as_str()]);
                }
            }
            Err(BuildError::CyclicDependency { node }) => {
                prop_assert!(!node.is_empty());
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    #[test]
    fn prop_fingerprint_deterministic((groups, tasks, _) in shapes()) {
        let spec = make_spec(groups, &tasks, &[]);
        let a = assembler().build("p", &spec, &defaults()).unwrap();
        let b = assembler().build("p", &spec.clone(), &defaults()).unwrap();
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
        prop_assert_eq!(a.edges, b.edges);
        prop_assert_eq!(a.topological_order, b.topological_order);
    }
}
