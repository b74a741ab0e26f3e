//! DS-004: Configuration resolution.
//!
//! Merges global defaults, workflow settings and task declarations into a
//! `NormalizedDag`. Precedence is task > workflow `default_args` > global
//! `default_args`. Dates become offset-aware instants and second counts become
//! `Duration`s. No I/O happens here.

use super::error::{BuildError, Result};
use super::types::{
    Capabilities, DagCallbacks, DagDefaults, DagMetadata, DagSettings, DagSpec, DefaultArgs,
    NormalizedDag, NormalizedTask, ParamMap, TaskCallbacks, TaskPolicy, TaskSpec,
    TASK_CALLBACK_KEYS,
};
use crate::callable::CallableReference;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_yaml_ng::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Task keys that configure policy rather than the task kind.
pub const POLICY_KEYS: [&str; 7] = [
    "owner",
    "start_date",
    "end_date",
    "retries",
    "retry_delay_sec",
    "execution_timeout_secs",
    "sla_secs",
];

/// Resolve one workflow against the global defaults.
pub fn resolve(
    dag_id: &str,
    raw: &DagSpec,
    defaults: &DagDefaults,
    capabilities: Capabilities,
) -> Result<NormalizedDag> {
    check_grouping(raw, capabilities)?;

    let merged = merge_args(&defaults.default_args, &raw.default_args);
    let default_args = resolve_default_args(dag_id, merged)?;
    let metadata = resolve_metadata(&raw.settings, &defaults.settings)?;
    let callbacks = resolve_dag_callbacks(dag_id, &raw.settings, &defaults.settings)?;

    let mut tasks = indexmap::IndexMap::with_capacity(raw.tasks.len());
    for (task_id, spec) in &raw.tasks {
        let task = resolve_task(task_id, spec, &default_args)?;
        tasks.insert(task_id.clone(), task);
    }

    Ok(NormalizedDag {
        dag_id: dag_id.to_string(),
        default_args,
        metadata,
        callbacks,
        task_groups: raw.task_groups.clone(),
        tasks,
    })
}

/// Grouping keys are rejected when the runtime cannot execute groups.
pub fn check_grouping(raw: &DagSpec, capabilities: Capabilities) -> Result<()> {
    let uses_groups =
        !raw.task_groups.is_empty() || raw.tasks.values().any(|t| t.task_group.is_some());
    if uses_groups && !capabilities.task_groups {
        return Err(unsupported_groups());
    }
    Ok(())
}

pub(crate) fn unsupported_groups() -> BuildError {
    BuildError::UnsupportedFeature {
        feature: "task_groups".to_string(),
        capability: "task grouping".to_string(),
    }
}

/// Overlay `over` onto `base`. Existing keys keep their position.
pub fn merge_args(base: &ParamMap, over: &ParamMap) -> ParamMap {
    let mut merged = base.clone();
    for (key, value) in over {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

// ============================================================================
// Default args + workflow settings
// ============================================================================

fn resolve_default_args(dag_id: &str, mut merged: ParamMap) -> Result<DefaultArgs> {
    let start_date = match present(merged.shift_remove("start_date")) {
        Some(v) => parse_datetime("start_date", &v).map_err(|e| BuildError::MissingStartDate {
            dag_id: dag_id.to_string(),
            reason: e.to_string(),
        })?,
        None => {
            return Err(BuildError::MissingStartDate {
                dag_id: dag_id.to_string(),
                reason: "no start_date in default_args".to_string(),
            })
        }
    };
    let end_date = present(merged.shift_remove("end_date"))
        .map(|v| parse_datetime("end_date", &v))
        .transpose()?;
    let owner = present(merged.shift_remove("owner"))
        .map(|v| parse_string("owner", &v))
        .transpose()?;
    let retries = present(merged.shift_remove("retries"))
        .map(|v| parse_count("retries", &v))
        .transpose()?;
    let retry_delay = present(merged.shift_remove("retry_delay_sec"))
        .map(|v| parse_seconds("retry_delay_sec", &v))
        .transpose()?;

    let mut callbacks = TaskCallbacks::default();
    for key in TASK_CALLBACK_KEYS {
        if let Some(v) = present(merged.shift_remove(key)) {
            if let Some(slot) = callbacks.slot_mut(key) {
                *slot = Some(CallableReference::from_value("default_args", key, &v)?);
            }
        }
    }

    Ok(DefaultArgs {
        owner,
        start_date,
        end_date,
        retries,
        retry_delay,
        callbacks,
        extra: merged,
    })
}

fn resolve_metadata(dag: &DagSettings, global: &DagSettings) -> Result<DagMetadata> {
    let dagrun_timeout = dag
        .dagrun_timeout_sec
        .or(global.dagrun_timeout_sec)
        .map(|secs| seconds_from_f64("dagrun_timeout_sec", secs))
        .transpose()?;

    Ok(DagMetadata {
        schedule_interval: dag
            .schedule_interval
            .clone()
            .or_else(|| global.schedule_interval.clone()),
        description: dag.description.clone().or_else(|| global.description.clone()),
        doc_md: dag.doc_md.clone().or_else(|| global.doc_md.clone()),
        concurrency: dag.concurrency.or(global.concurrency),
        max_active_runs: dag.max_active_runs.or(global.max_active_runs),
        catchup: dag.catchup.or(global.catchup),
        dagrun_timeout,
        tags: dag
            .tags
            .clone()
            .or_else(|| global.tags.clone())
            .unwrap_or_default(),
    })
}

fn resolve_dag_callbacks(
    dag_id: &str,
    dag: &DagSettings,
    global: &DagSettings,
) -> Result<DagCallbacks<CallableReference>> {
    let pick = |key: &str, own: &Option<Value>, fallback: &Option<Value>| {
        own.as_ref()
            .or(fallback.as_ref())
            .filter(|v| !v.is_null())
            .map(|v| CallableReference::from_value(dag_id, key, v))
            .transpose()
    };
    Ok(DagCallbacks {
        on_success: pick(
            "on_success_callback",
            &dag.on_success_callback,
            &global.on_success_callback,
        )?,
        on_failure: pick(
            "on_failure_callback",
            &dag.on_failure_callback,
            &global.on_failure_callback,
        )?,
        sla_miss: pick(
            "sla_miss_callback",
            &dag.sla_miss_callback,
            &global.sla_miss_callback,
        )?,
    })
}

// ============================================================================
// Tasks
// ============================================================================

fn resolve_task(task_id: &str, spec: &TaskSpec, defaults: &DefaultArgs) -> Result<NormalizedTask> {
    let mut params = spec.params.clone();
    let mut policy: HashMap<&str, Value> = POLICY_KEYS
        .iter()
        .filter_map(|key| present(params.shift_remove(*key)).map(|v| (*key, v)))
        .collect();
    let mut take = |key: &str| policy.remove(key);

    let owner = take("owner")
        .map(|v| parse_string("owner", &v))
        .transpose()?
        .or_else(|| defaults.owner.clone());
    let start_date = take("start_date")
        .map(|v| parse_datetime("start_date", &v))
        .transpose()?
        .unwrap_or(defaults.start_date);
    let end_date = take("end_date")
        .map(|v| parse_datetime("end_date", &v))
        .transpose()?
        .or(defaults.end_date);
    let retries = take("retries")
        .map(|v| parse_count("retries", &v))
        .transpose()?
        .or(defaults.retries)
        .unwrap_or(0);
    let retry_delay = take("retry_delay_sec")
        .map(|v| parse_seconds("retry_delay_sec", &v))
        .transpose()?
        .or(defaults.retry_delay);
    let execution_timeout = take("execution_timeout_secs")
        .or_else(|| present(defaults.extra.get("execution_timeout_secs").cloned()))
        .map(|v| parse_seconds("execution_timeout_secs", &v))
        .transpose()?;
    let sla = take("sla_secs")
        .or_else(|| present(defaults.extra.get("sla_secs").cloned()))
        .map(|v| parse_seconds("sla_secs", &v))
        .transpose()?;

    let mut callbacks = defaults.callbacks.clone();
    for key in TASK_CALLBACK_KEYS {
        if let Some(v) = present(params.shift_remove(key)) {
            if let Some(slot) = callbacks.slot_mut(key) {
                *slot = Some(CallableReference::from_value(task_id, key, &v)?);
            }
        }
    }

    Ok(NormalizedTask {
        task_id: task_id.to_string(),
        operator: spec.operator.clone(),
        group: spec.task_group.clone(),
        dependencies: spec.dependencies.clone(),
        params,
        policy: TaskPolicy {
            owner,
            retries,
            retry_delay,
            execution_timeout,
            sla,
            start_date,
            end_date,
        },
        callbacks,
    })
}

// ============================================================================
// Value conversion
// ============================================================================

fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

fn parse_string(field: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BuildError::invalid(field, "expected a string"))
}

fn parse_count(field: &str, value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| BuildError::invalid(field, "expected a non-negative integer"))
}

/// Seconds (integer or float) as a `Duration`.
pub fn parse_seconds(field: &str, value: &Value) -> Result<Duration> {
    let secs = value
        .as_f64()
        .ok_or_else(|| BuildError::invalid(field, "expected a number of seconds"))?;
    seconds_from_f64(field, secs)
}

fn seconds_from_f64(field: &str, secs: f64) -> Result<Duration> {
    if secs < 0.0 {
        return Err(BuildError::invalid(field, format!("negative duration {secs}")));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| BuildError::invalid(field, e.to_string()))
}

/// Parse a date or datetime. Values without an offset are taken as UTC.
pub fn parse_datetime(field: &str, value: &Value) -> Result<DateTime<FixedOffset>> {
    let text = value
        .as_str()
        .ok_or_else(|| BuildError::invalid(field, "expected a date string"))?
        .trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
        .ok_or_else(|| BuildError::invalid(field, format!("'{text}' is not a date or datetime")))
}
