//! DS-005: Task group materialization.

use super::config::unsupported_groups;
use super::error::Result;
use super::types::{Capabilities, TaskGroupSpec};
use indexmap::IndexMap;
use serde::Serialize;

/// A materialized group. Groups are peers; none nests inside another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupNode {
    pub group_id: String,
    pub tooltip: Option<String>,
    pub dag_id: String,
    /// Declared upstream task or group names
    pub dependencies: Vec<String>,
}

/// One node per declared group, in declaration order.
pub fn build(
    specs: &IndexMap<String, TaskGroupSpec>,
    dag_id: &str,
    capabilities: Capabilities,
) -> Result<IndexMap<String, GroupNode>> {
    if specs.is_empty() {
        return Ok(IndexMap::new());
    }
    if !capabilities.task_groups {
        return Err(unsupported_groups());
    }

    Ok(specs
        .iter()
        .map(|(id, spec)| {
            let node = GroupNode {
                group_id: id.clone(),
                tooltip: spec.tooltip.clone(),
                dag_id: dag_id.to_string(),
                dependencies: spec.dependencies.clone(),
            };
            (id.clone(), node)
        })
        .collect())
}
