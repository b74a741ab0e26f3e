//! DS-008: Graph assembly.
//!
//! The single build entry point. Sequencing: identifier checks, config
//! resolution, per-task kind lookup and callable binding, group materialization,
//! frontier expansion, cycle check with topological ordering, workflow
//! callbacks. The first failure aborts the build; nothing partial escapes.

use super::artifact::GraphArtifact;
use super::config;
use super::error::{BuildError, Result};
use super::expander::{self, DeclaredGroup, DeclaredTask};
use super::groups;
use super::registry::ComponentRegistry;
use super::types::{
    qualified_id, BuildOptions, DagCallbacks, DagDefaults, DagSpec, DefaultArgs, GraphEdge,
    NormalizedTask, ResolvedTaskNode, TaskCallbacks,
};
use crate::callable::source::{FsSourceReader, SourceReader};
use crate::callable::{Callable, CallableLoader, CallableReference};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Compiles workflow descriptions into graph artifacts.
///
/// Holds only immutable state; one assembler may serve many threads.
#[derive(Clone)]
pub struct GraphAssembler {
    registry: Arc<ComponentRegistry>,
    options: BuildOptions,
    reader: Arc<dyn SourceReader>,
}

impl std::fmt::Debug for GraphAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphAssembler")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl GraphAssembler {
    pub fn new(registry: Arc<ComponentRegistry>, options: BuildOptions) -> Self {
        Self {
            registry,
            options,
            reader: Arc::new(FsSourceReader),
        }
    }

    /// Replace the filesystem reader used for named callables.
    #[must_use]
    pub fn with_source_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Compile one workflow.
    pub fn build(&self, dag_id: &str, raw: &DagSpec, defaults: &DagDefaults) -> Result<GraphArtifact> {
        info!(
            dag_id,
            tasks = raw.tasks.len(),
            groups = raw.task_groups.len(),
            "building dag"
        );
        let capabilities = self.options.capabilities;
        config::check_grouping(raw, capabilities)?;
        check_identifiers(raw)?;

        let normalized = config::resolve(dag_id, raw, defaults, capabilities)?;

        let mut loader =
            CallableLoader::new(self.reader.as_ref(), self.options.callable_root.as_deref());

        let mut nodes = IndexMap::with_capacity(normalized.tasks.len());
        for task in normalized.tasks.values() {
            let node = self.resolve_task(&mut loader, task, &normalized.default_args)?;
            nodes.insert(node.task_id.clone(), node);
        }

        let groups = groups::build(&normalized.task_groups, dag_id, capabilities)?;

        let declared_tasks: Vec<DeclaredTask<'_>> =
            normalized.tasks.values().map(DeclaredTask::from).collect();
        let declared_groups: Vec<DeclaredGroup<'_>> =
            groups.values().map(DeclaredGroup::from).collect();
        let edges = expander::expand(&declared_tasks, &declared_groups)?;

        let topological_order = topological_order(nodes.keys(), &edges)?;

        let callbacks = bind_dag_callbacks(&mut loader, &normalized.callbacks)?;

        let mut membership: IndexMap<String, Vec<String>> =
            groups.keys().map(|g| (g.clone(), Vec::new())).collect();
        for node in nodes.values() {
            if let Some(members) = node.group.as_ref().and_then(|g| membership.get_mut(g)) {
                members.push(node.task_id.clone());
            }
        }

        info!(
            dag_id,
            nodes = nodes.len(),
            edges = edges.len(),
            units = loader.units_loaded(),
            "built dag"
        );

        Ok(GraphArtifact {
            dag_id: dag_id.to_string(),
            metadata: normalized.metadata,
            default_args: normalized.default_args,
            callbacks,
            nodes,
            edges,
            groups,
            membership,
            topological_order,
        })
    }

    fn resolve_task(
        &self,
        loader: &mut CallableLoader<'_>,
        task: &NormalizedTask,
        defaults: &DefaultArgs,
    ) -> Result<ResolvedTaskNode> {
        let task_id = task.task_id.as_str();
        let kind = self.registry.resolve(task_id, &task.operator)?;
        let schema = kind.schema();

        let mut params = task.params.clone();
        let mut callables = IndexMap::new();
        for slot in &schema.slots {
            if let Some(callable) = loader.bind_slot(task_id, &slot.name, slot.required, &mut params)? {
                callables.insert(slot.name.clone(), callable);
            }
        }

        // Declared parameters absent at task level come from the merged default args
        for name in schema.declared() {
            if !params.contains_key(name) {
                if let Some(value) = defaults.extra.get(name) {
                    params.insert(name.to_string(), value.clone());
                }
            }
        }
        self.registry.validate_params(task_id, kind, &params)?;

        let callbacks = bind_task_callbacks(loader, &task.callbacks)?;
        let instance = kind.construct(params, callables)?;

        let qualified = qualified_id(task.group.as_deref(), task_id);
        debug!(task_id = %qualified, operator = %task.operator, "resolved task");

        Ok(ResolvedTaskNode {
            task_id: qualified,
            local_id: task_id.to_string(),
            group: task.group.clone(),
            operator: task.operator.clone(),
            instance,
            policy: task.policy.clone(),
            callbacks,
        })
    }
}

// ============================================================================
// Identifier checks
// ============================================================================

/// Validate identifiers before any resolution work.
pub fn check_identifiers(raw: &DagSpec) -> Result<()> {
    for id in raw.tasks.keys().chain(raw.task_groups.keys()) {
        if id.trim().is_empty() {
            return Err(BuildError::DuplicateIdentifier {
                id: id.clone(),
                reason: "empty".to_string(),
            });
        }
    }

    for id in raw.tasks.keys() {
        if raw.task_groups.contains_key(id) {
            return Err(BuildError::DuplicateIdentifier {
                id: id.clone(),
                reason: "declared as both a task and a task group".to_string(),
            });
        }
    }

    let mut qualified = HashSet::with_capacity(raw.tasks.len());
    for (id, spec) in &raw.tasks {
        if let Some(group) = &spec.task_group {
            if !raw.task_groups.contains_key(group) {
                return Err(BuildError::UnknownGroup {
                    task_id: id.clone(),
                    group: group.clone(),
                });
            }
        }
        let q = qualified_id(spec.task_group.as_deref(), id);
        if !qualified.insert(q.clone()) {
            return Err(BuildError::DuplicateIdentifier {
                id: q,
                reason: "the runtime key of more than one task".to_string(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Callback binding
// ============================================================================

fn bind_task_callbacks(
    loader: &mut CallableLoader<'_>,
    refs: &TaskCallbacks<CallableReference>,
) -> Result<TaskCallbacks<Callable>> {
    let mut bound = TaskCallbacks::default();
    for (key, reference) in refs.iter() {
        if let (Some(reference), Some(slot)) = (reference, bound.slot_mut(key)) {
            *slot = Some(loader.load(key, reference)?);
        }
    }
    Ok(bound)
}

fn bind_dag_callbacks(
    loader: &mut CallableLoader<'_>,
    refs: &DagCallbacks<CallableReference>,
) -> Result<DagCallbacks<Callable>> {
    let mut bind = |key: &str, reference: &Option<CallableReference>| {
        reference.as_ref().map(|r| loader.load(key, r)).transpose()
    };
    Ok(DagCallbacks {
        on_success: bind("on_success_callback", &refs.on_success)?,
        on_failure: bind("on_failure_callback", &refs.on_failure)?,
        sla_miss: bind("sla_miss_callback", &refs.sla_miss)?,
    })
}

// ============================================================================
// Ordering
// ============================================================================

/// Kahn's algorithm with sorted tie-breaking. On a cycle, names one node that lies on it.
pub fn topological_order<'a>(
    nodes: impl IntoIterator<Item = &'a String>,
    edges: &BTreeSet<GraphEdge>,
) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in nodes {
        in_degree.insert(id.as_str(), 0);
        adjacency.insert(id.as_str(), Vec::new());
    }

    for edge in edges {
        let (up, down) = (edge.upstream.as_str(), edge.downstream.as_str());
        if !in_degree.contains_key(up) || !in_degree.contains_key(down) {
            let missing = if in_degree.contains_key(up) { down } else { up };
            return Err(BuildError::UnknownDependencyTarget {
                dependent: down.to_string(),
                target: missing.to_string(),
            });
        }
        adjacency.entry(up).or_default().push(down);
        *in_degree.entry(down).or_default() += 1;
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut remaining = in_degree.clone();
    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready = Vec::new();
        for &neighbor in adjacency.get(current).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = remaining.get_mut(neighbor) {
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(neighbor);
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != in_degree.len() {
        let done: HashSet<&str> = order.iter().map(String::as_str).collect();
        let node = cycle_member(edges, &done);
        return Err(BuildError::CyclicDependency { node });
    }
    Ok(order)
}

/// Walk predecessors among unordered nodes until one repeats; the repeat is on a cycle.
fn cycle_member(edges: &BTreeSet<GraphEdge>, done: &HashSet<&str>) -> String {
    let stuck: Vec<&GraphEdge> = edges
        .iter()
        .filter(|e| !done.contains(e.upstream.as_str()) && !done.contains(e.downstream.as_str()))
        .collect();

    let Some(mut current) = stuck.iter().map(|e| e.downstream.as_str()).min() else {
        return String::new();
    };
    let mut seen = HashSet::new();
    while seen.insert(current) {
        match stuck
            .iter()
            .filter(|e| e.downstream == current)
            .map(|e| e.upstream.as_str())
            .min()
        {
            Some(prev) => current = prev,
            None => break,
        }
    }
    current.to_string()
}
