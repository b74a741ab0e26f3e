//! DS-009: The compiled graph artifact.
//!
//! Immutable once built. Node keys are qualified task ids; the edge set is
//! ordered and deduplicated; `topological_order` lists every node exactly once.

use super::groups::GroupNode;
use super::types::{
    DagCallbacks, DagMetadata, DefaultArgs, GraphEdge, ParamMap, ResolvedTaskNode,
};
use crate::callable::Callable;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// A validated, cycle-free task graph ready for a runtime.
#[derive(Debug, Clone)]
pub struct GraphArtifact {
    pub dag_id: String,
    pub metadata: DagMetadata,
    pub default_args: DefaultArgs,
    pub callbacks: DagCallbacks<Callable>,
    pub nodes: IndexMap<String, ResolvedTaskNode>,
    pub edges: BTreeSet<GraphEdge>,
    pub groups: IndexMap<String, GroupNode>,
    /// Group id to qualified member ids, in declaration order
    pub membership: IndexMap<String, Vec<String>>,
    pub topological_order: Vec<String>,
}

impl GraphArtifact {
    pub fn node(&self, task_id: &str) -> Option<&ResolvedTaskNode> {
        self.nodes.get(task_id)
    }

    /// Direct successors of `task_id`.
    pub fn downstream(&self, task_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.upstream == task_id)
            .map(|e| e.downstream.as_str())
            .collect()
    }

    /// Direct predecessors of `task_id`.
    pub fn upstream(&self, task_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.downstream == task_id)
            .map(|e| e.upstream.as_str())
            .collect()
    }

    /// Nodes with no predecessors, in topological order.
    pub fn roots(&self) -> Vec<&str> {
        let targets: BTreeSet<&str> = self.edges.iter().map(|e| e.downstream.as_str()).collect();
        self.topological_order
            .iter()
            .map(String::as_str)
            .filter(|id| !targets.contains(id))
            .collect()
    }

    pub fn group_members(&self, group_id: &str) -> &[String] {
        self.membership
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            dag_id: self.dag_id.clone(),
            metadata: self.metadata.clone(),
            start_date: self.default_args.start_date.to_rfc3339(),
            end_date: self.default_args.end_date.map(|d| d.to_rfc3339()),
            callbacks: dag_callback_origins(&self.callbacks),
            tasks: self.nodes.values().map(TaskSummary::from).collect(),
            groups: self.groups.values().cloned().collect(),
            edges: self.edges.iter().cloned().collect(),
            order: self.topological_order.clone(),
        }
    }

    /// Content hash over everything a runtime would observe. Returns `"blake3:{hex}"`.
    pub fn fingerprint(&self) -> String {
        let mut canon = String::new();
        let meta = &self.metadata;
        let _ = writeln!(canon, "dag {}", self.dag_id);
        let _ = writeln!(
            canon,
            "meta {:?} {:?} {:?} {:?} {:?} {:?} {:?} {:?}",
            meta.schedule_interval,
            meta.description,
            meta.doc_md,
            meta.concurrency,
            meta.max_active_runs,
            meta.catchup,
            meta.dagrun_timeout,
            meta.tags
        );
        let _ = writeln!(
            canon,
            "dates {} {:?}",
            self.default_args.start_date.to_rfc3339(),
            self.default_args.end_date.map(|d| d.to_rfc3339())
        );
        for (slot, origin) in dag_callback_origins(&self.callbacks) {
            let _ = writeln!(canon, "dag-callback {slot} {origin}");
        }
        for node in self.nodes.values() {
            let t = TaskSummary::from(node);
            let _ = writeln!(
                canon,
                "node {} {} {:?} {:?} {} {:?} {:?} {:?} {}",
                t.task_id,
                t.operator,
                t.group,
                t.owner,
                t.retries,
                t.retry_delay_secs,
                t.execution_timeout_secs,
                t.sla_secs,
                t.start_date
            );
            for (k, v) in &t.params {
                let _ = writeln!(canon, "  param {k} {v:?}");
            }
            for (slot, origin) in t.callables.iter().chain(t.callbacks.iter()) {
                let _ = writeln!(canon, "  callable {slot} {origin}");
            }
        }
        for group in self.groups.values() {
            let _ = writeln!(canon, "group {} {:?} {:?}", group.group_id, group.tooltip, self.group_members(&group.group_id));
        }
        for edge in &self.edges {
            let _ = writeln!(canon, "edge {} {}", edge.upstream, edge.downstream);
        }
        format!("blake3:{}", blake3::hash(canon.as_bytes()).to_hex())
    }
}

fn dag_callback_origins(callbacks: &DagCallbacks<Callable>) -> BTreeMap<String, String> {
    [
        ("on_success_callback", &callbacks.on_success),
        ("on_failure_callback", &callbacks.on_failure),
        ("sla_miss_callback", &callbacks.sla_miss),
    ]
    .into_iter()
    .filter_map(|(k, c)| c.as_ref().map(|c| (k.to_string(), c.origin().to_string())))
    .collect()
}

// ============================================================================
// Serializable summary
// ============================================================================

/// Plain-data view of an artifact for hand-off and logging.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub dag_id: String,
    pub metadata: DagMetadata,
    pub start_date: String,
    pub end_date: Option<String>,
    pub callbacks: BTreeMap<String, String>,
    pub tasks: Vec<TaskSummary>,
    pub groups: Vec<GroupNode>,
    pub edges: Vec<GraphEdge>,
    pub order: Vec<String>,
}

impl ArtifactSummary {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub operator: String,
    pub group: Option<String>,
    pub owner: Option<String>,
    pub retries: u32,
    pub retry_delay_secs: Option<f64>,
    pub execution_timeout_secs: Option<f64>,
    pub sla_secs: Option<f64>,
    pub start_date: String,
    pub params: ParamMap,
    /// Slot name to callable origin
    pub callables: BTreeMap<String, String>,
    pub callbacks: BTreeMap<String, String>,
}

impl From<&ResolvedTaskNode> for TaskSummary {
    fn from(node: &ResolvedTaskNode) -> Self {
        let policy = &node.policy;
        Self {
            task_id: node.task_id.clone(),
            operator: node.operator.clone(),
            group: node.group.clone(),
            owner: policy.owner.clone(),
            retries: policy.retries,
            retry_delay_secs: policy.retry_delay.map(|d| d.as_secs_f64()),
            execution_timeout_secs: policy.execution_timeout.map(|d| d.as_secs_f64()),
            sla_secs: policy.sla.map(|d| d.as_secs_f64()),
            start_date: policy.start_date.to_rfc3339(),
            params: node.instance.params.clone(),
            callables: node
                .instance
                .callables
                .iter()
                .map(|(slot, c)| (slot.clone(), c.origin().to_string()))
                .collect(),
            callbacks: node
                .callbacks
                .iter()
                .filter_map(|(k, c)| c.map(|c| (k.to_string(), c.origin().to_string())))
                .collect(),
        }
    }
}
