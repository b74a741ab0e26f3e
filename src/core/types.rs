//! DS-001: Workflow description types, normalized specs, and resolved nodes.
//!
//! Raw types derive Deserialize so any serde format can feed the compiler.
//! Normalized types are produced by `config::resolve` and are read-only.
//! Resolved types carry bound implementations and live inside the artifact.

use crate::callable::{Callable, CallableReference};
use crate::core::registry::TaskInstance;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Dynamic parameter mapping (order-preserving).
pub type ParamMap = IndexMap<String, serde_yaml_ng::Value>;

// ============================================================================
// Build options
// ============================================================================

/// Host runtime capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Runtime can execute grouped tasks (`task_groups`)
    #[serde(default = "default_true")]
    pub task_groups: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { task_groups: true }
    }
}

fn default_true() -> bool {
    true
}

/// Options shared by every build an assembler performs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(default)]
    pub capabilities: Capabilities,

    /// Base directory for relative callable source locations
    #[serde(default)]
    pub callable_root: Option<PathBuf>,
}

impl BuildOptions {
    #[must_use]
    pub fn with_task_groups(mut self, enabled: bool) -> Self {
        self.capabilities.task_groups = enabled;
        self
    }

    #[must_use]
    pub fn with_callable_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.callable_root = Some(root.into());
        self
    }
}

// ============================================================================
// Raw workflow description
// ============================================================================

/// Workflow-level settings that may come from the workflow or the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagSettings {
    #[serde(default)]
    pub schedule_interval: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub doc_md: Option<String>,

    /// Max concurrently running task instances
    #[serde(default)]
    pub concurrency: Option<u32>,

    #[serde(default)]
    pub max_active_runs: Option<u32>,

    #[serde(default)]
    pub catchup: Option<bool>,

    /// Whole-run timeout in seconds
    #[serde(default)]
    pub dagrun_timeout_sec: Option<f64>,

    #[serde(default)]
    pub tags: Option<Vec<String>>,

    #[serde(default)]
    pub on_success_callback: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub on_failure_callback: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub sla_miss_callback: Option<serde_yaml_ng::Value>,
}

/// Global defaults applied beneath every workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagDefaults {
    #[serde(default)]
    pub default_args: ParamMap,

    #[serde(flatten)]
    pub settings: DagSettings,
}

/// One workflow description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagSpec {
    #[serde(default)]
    pub default_args: ParamMap,

    #[serde(flatten)]
    pub settings: DagSettings,

    /// Group declarations (order-preserving)
    #[serde(default)]
    pub task_groups: IndexMap<String, TaskGroupSpec>,

    /// Task declarations (order-preserving)
    #[serde(default)]
    pub tasks: IndexMap<String, TaskSpec>,
}

/// A task declaration. Every key besides the structural ones is a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task-kind name, looked up in the registry
    pub operator: String,

    /// Owning group
    #[serde(default, rename = "task_group_name")]
    pub task_group: Option<String>,

    /// Upstream task or group names
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(flatten)]
    pub params: ParamMap,
}

impl TaskSpec {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            task_group: None,
            dependencies: Vec::new(),
            params: ParamMap::new(),
        }
    }
}

/// A group declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupSpec {
    #[serde(default)]
    pub tooltip: Option<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,
}

// ============================================================================
// Normalized specs
// ============================================================================

/// Lifecycle callbacks at task scope.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCallbacks<T> {
    pub on_success: Option<T>,
    pub on_failure: Option<T>,
    pub on_execute: Option<T>,
    pub on_retry: Option<T>,
}

impl<T> Default for TaskCallbacks<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_failure: None,
            on_execute: None,
            on_retry: None,
        }
    }
}

/// Task-scope callback config keys, in slot order.
pub const TASK_CALLBACK_KEYS: [&str; 4] = [
    "on_success_callback",
    "on_failure_callback",
    "on_execute_callback",
    "on_retry_callback",
];

impl<T> TaskCallbacks<T> {
    pub fn slot_mut(&mut self, key: &str) -> Option<&mut Option<T>> {
        match key {
            "on_success_callback" => Some(&mut self.on_success),
            "on_failure_callback" => Some(&mut self.on_failure),
            "on_execute_callback" => Some(&mut self.on_execute),
            "on_retry_callback" => Some(&mut self.on_retry),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&T>)> {
        TASK_CALLBACK_KEYS.into_iter().zip([
            self.on_success.as_ref(),
            self.on_failure.as_ref(),
            self.on_execute.as_ref(),
            self.on_retry.as_ref(),
        ])
    }
}

/// Lifecycle callbacks at workflow scope.
#[derive(Debug, Clone, PartialEq)]
pub struct DagCallbacks<T> {
    pub on_success: Option<T>,
    pub on_failure: Option<T>,
    pub sla_miss: Option<T>,
}

impl<T> Default for DagCallbacks<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_failure: None,
            sla_miss: None,
        }
    }
}

/// Merged default arguments with dates and durations converted.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultArgs {
    pub owner: Option<String>,
    pub start_date: DateTime<FixedOffset>,
    pub end_date: Option<DateTime<FixedOffset>>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub callbacks: TaskCallbacks<CallableReference>,
    /// Remaining keys, available to fill task-kind parameters
    pub extra: ParamMap,
}

/// Execution policy recorded for the runtime. The compiler never acts on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPolicy {
    pub owner: Option<String>,
    pub retries: u32,
    pub retry_delay: Option<Duration>,
    pub execution_timeout: Option<Duration>,
    pub sla: Option<Duration>,
    pub start_date: DateTime<FixedOffset>,
    pub end_date: Option<DateTime<FixedOffset>>,
}

/// Workflow-level metadata after merging with global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DagMetadata {
    pub schedule_interval: Option<String>,
    pub description: Option<String>,
    pub doc_md: Option<String>,
    pub concurrency: Option<u32>,
    pub max_active_runs: Option<u32>,
    pub catchup: Option<bool>,
    pub dagrun_timeout: Option<Duration>,
    pub tags: Vec<String>,
}

/// A task after default merging; parameters exclude policy and callback keys.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTask {
    pub task_id: String,
    pub operator: String,
    pub group: Option<String>,
    pub dependencies: Vec<String>,
    pub params: ParamMap,
    pub policy: TaskPolicy,
    pub callbacks: TaskCallbacks<CallableReference>,
}

/// A workflow after default merging and value normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDag {
    pub dag_id: String,
    pub default_args: DefaultArgs,
    pub metadata: DagMetadata,
    pub callbacks: DagCallbacks<CallableReference>,
    pub task_groups: IndexMap<String, TaskGroupSpec>,
    pub tasks: IndexMap<String, NormalizedTask>,
}

// ============================================================================
// Resolved graph pieces
// ============================================================================

/// A task bound to its implementation.
#[derive(Debug, Clone)]
pub struct ResolvedTaskNode {
    /// Runtime task key (`group.task` when grouped)
    pub task_id: String,
    /// Identifier as declared
    pub local_id: String,
    pub group: Option<String>,
    pub operator: String,
    pub instance: TaskInstance,
    pub policy: TaskPolicy,
    pub callbacks: TaskCallbacks<Callable>,
}

/// Directed edge: `upstream` must finish before `downstream` starts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub upstream: String,
    pub downstream: String,
}

impl GraphEdge {
    pub fn new(upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }
}

/// Runtime key for a task: group-prefixed when grouped.
pub fn qualified_id(group: Option<&str>, task_id: &str) -> String {
    match group {
        Some(g) => format!("{g}.{task_id}"),
        None => task_id.to_string(),
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Render a YAML value as plain text.
pub fn value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
