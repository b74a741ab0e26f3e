//! DS-006: Frontier expansion of declared dependencies.
//!
//! Two passes over immutable inputs:
//! 1. Intra-group adjacency, from which each group's entry set (members with no
//!    incoming member edge) and exit set (members with no outgoing member edge)
//!    are derived.
//! 2. Every other declared dependency is rewritten into member-level edges:
//!    a group on the upstream side contributes its exit set, a group on the
//!    downstream side contributes its entry set.
//!
//! A group without members has empty frontiers, so any dependency on or from it
//! yields no edges.

use super::error::{BuildError, Result};
use super::groups::GroupNode;
use super::types::{qualified_id, GraphEdge, NormalizedTask};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Dependency view of a task.
#[derive(Debug, Clone, Copy)]
pub struct DeclaredTask<'a> {
    pub task_id: &'a str,
    pub group: Option<&'a str>,
    pub dependencies: &'a [String],
}

impl<'a> From<&'a NormalizedTask> for DeclaredTask<'a> {
    fn from(task: &'a NormalizedTask) -> Self {
        Self {
            task_id: &task.task_id,
            group: task.group.as_deref(),
            dependencies: &task.dependencies,
        }
    }
}

/// Dependency view of a group.
#[derive(Debug, Clone, Copy)]
pub struct DeclaredGroup<'a> {
    pub group_id: &'a str,
    pub dependencies: &'a [String],
}

impl<'a> From<&'a GroupNode> for DeclaredGroup<'a> {
    fn from(group: &'a GroupNode) -> Self {
        Self {
            group_id: &group.group_id,
            dependencies: &group.dependencies,
        }
    }
}

/// Entry and exit members of one group, as local task ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier<'a> {
    pub entry: Vec<&'a str>,
    pub exit: Vec<&'a str>,
}

/// Compute entry/exit sets for every group. Groups without members map to empty frontiers.
pub fn frontiers<'a>(
    tasks: &[DeclaredTask<'a>],
    groups: &[DeclaredGroup<'a>],
) -> IndexMap<&'a str, Frontier<'a>> {
    let mut members: IndexMap<&'a str, Vec<&'a str>> =
        groups.iter().map(|g| (g.group_id, Vec::new())).collect();
    for task in tasks {
        if let Some(group) = task.group {
            members.entry(group).or_default().push(task.task_id);
        }
    }

    let (has_incoming, has_outgoing) = intra_endpoints(tasks);

    members
        .into_iter()
        .map(|(group, ids)| {
            let frontier = Frontier {
                entry: ids
                    .iter()
                    .copied()
                    .filter(|id| !has_incoming.contains(id))
                    .collect(),
                exit: ids
                    .iter()
                    .copied()
                    .filter(|id| !has_outgoing.contains(id))
                    .collect(),
            };
            (group, frontier)
        })
        .collect()
}

/// Expand every declared dependency into the full member-level edge set.
pub fn expand(tasks: &[DeclaredTask<'_>], groups: &[DeclaredGroup<'_>]) -> Result<BTreeSet<GraphEdge>> {
    let owner: HashMap<&str, Option<&str>> = tasks.iter().map(|t| (t.task_id, t.group)).collect();
    let frontier = frontiers(tasks, groups);
    for (group, f) in &frontier {
        tracing::debug!(group = %group, entry = ?f.entry, exit = ?f.exit, "group frontier");
    }

    let qualify = |id: &str| qualified_id(owner.get(id).copied().flatten(), id);

    // Upstream side of "dependent depends on name"
    let sources = |dependent: &str, name: &str| -> Result<Vec<String>> {
        if owner.contains_key(name) {
            Ok(vec![qualify(name)])
        } else if let Some(f) = frontier.get(name) {
            Ok(f.exit.iter().map(|id| qualify(*id)).collect())
        } else {
            Err(BuildError::UnknownDependencyTarget {
                dependent: dependent.to_string(),
                target: name.to_string(),
            })
        }
    };

    let mut edges = BTreeSet::new();

    for task in tasks {
        let downstream = qualify(task.task_id);
        for dep in task.dependencies {
            // Intra-group edges still go through `sources`: dep is a task, so it is {dep}.
            for upstream in sources(task.task_id, dep.as_str())? {
                edges.insert(GraphEdge::new(upstream, downstream.clone()));
            }
        }
    }

    for group in groups {
        let entry: Vec<String> = frontier
            .get(group.group_id)
            .map(|f| f.entry.iter().map(|id| qualify(*id)).collect())
            .unwrap_or_default();
        for dep in group.dependencies {
            let upstream = sources(group.group_id, dep.as_str())?;
            for u in &upstream {
                for d in &entry {
                    edges.insert(GraphEdge::new(u.clone(), d.clone()));
                }
            }
        }
    }

    Ok(edges)
}

/// Members that receive / emit an edge from / to another member of their own group.
fn intra_endpoints<'a>(tasks: &[DeclaredTask<'a>]) -> (HashSet<&'a str>, HashSet<&'a str>) {
    let group_of: HashMap<&str, &str> = tasks
        .iter()
        .filter_map(|t| t.group.map(|g| (t.task_id, g)))
        .collect();

    let mut has_incoming = HashSet::new();
    let mut has_outgoing = HashSet::new();
    for task in tasks {
        let Some(group) = task.group else { continue };
        for dep in task.dependencies {
            if let Some((&upstream, _)) = group_of.get_key_value(dep.as_str()).filter(|(_, g)| **g == group) {
                has_incoming.insert(task.task_id);
                has_outgoing.insert(upstream);
            }
        }
    }
    (has_incoming, has_outgoing)
}
