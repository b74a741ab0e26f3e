//! DS-002: Task-kind registry.
//!
//! Maps a kind name (the `operator` key) to a descriptor that knows the
//! kind's parameter schema and how to construct a bound instance. The
//! catalog is supplied by the host and frozen after `build()`.

use super::error::{BuildError, Result};
use super::types::ParamMap;
use crate::callable::Callable;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A callable slot declared by a task kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallableSlot {
    pub name: String,
    pub required: bool,
}

/// Parameter contract of a task kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindSchema {
    pub name: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub slots: Vec<CallableSlot>,
}

impl KindSchema {
    /// Every parameter the kind declares, required first.
    pub fn declared(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
    }
}

/// A constructed unit of work: resolved parameters plus bound callables.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub kind: String,
    pub params: ParamMap,
    pub callables: IndexMap<String, Callable>,
}

impl TaskInstance {
    pub fn param(&self, key: &str) -> Option<&serde_yaml_ng::Value> {
        self.params.get(key)
    }

    pub fn callable(&self, slot: &str) -> Option<&Callable> {
        self.callables.get(slot)
    }
}

/// Implementation descriptor for one task kind.
pub trait TaskKindDescriptor: Send + Sync {
    fn schema(&self) -> &KindSchema;

    /// Build an instance from validated parameters and bound slots. Must be pure.
    fn construct(
        &self,
        params: ParamMap,
        callables: IndexMap<String, Callable>,
    ) -> Result<TaskInstance> {
        Ok(TaskInstance {
            kind: self.schema().name.clone(),
            params,
            callables,
        })
    }
}

/// Descriptor defined by its schema alone.
#[derive(Debug, Clone)]
pub struct SchemaKind {
    schema: KindSchema,
}

impl SchemaKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: KindSchema {
                name: name.into(),
                ..KindSchema::default()
            },
        }
    }

    #[must_use]
    pub fn required(mut self, params: &[&str]) -> Self {
        self.schema
            .required
            .extend(params.iter().map(|p| p.to_string()));
        self
    }

    #[must_use]
    pub fn optional(mut self, params: &[&str]) -> Self {
        self.schema
            .optional
            .extend(params.iter().map(|p| p.to_string()));
        self
    }

    #[must_use]
    pub fn slot(mut self, name: impl Into<String>, required: bool) -> Self {
        self.schema.slots.push(CallableSlot {
            name: name.into(),
            required,
        });
        self
    }
}

impl TaskKindDescriptor for SchemaKind {
    fn schema(&self) -> &KindSchema {
        &self.schema
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable catalog of task kinds.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    kinds: IndexMap<String, Arc<dyn TaskKindDescriptor>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up the descriptor for `operator` on behalf of `task_id`.
    pub fn resolve(&self, task_id: &str, operator: &str) -> Result<&dyn TaskKindDescriptor> {
        self.kinds
            .get(operator)
            .map(|k| k.as_ref())
            .ok_or_else(|| BuildError::UnknownOperator {
                task_id: task_id.to_string(),
                operator: operator.to_string(),
            })
    }

    /// Check that every required parameter is present.
    pub fn validate_params(
        &self,
        task_id: &str,
        kind: &dyn TaskKindDescriptor,
        params: &ParamMap,
    ) -> Result<()> {
        let missing: Vec<String> = kind
            .schema()
            .required
            .iter()
            .filter(|p| !params.contains_key(p.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BuildError::MissingParameter {
                task_id: task_id.to_string(),
                params: missing,
            })
        }
    }

    pub fn contains(&self, operator: &str) -> bool {
        self.kinds.contains_key(operator)
    }

    /// Registered kind names in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Collects kinds before freezing them into a `ComponentRegistry`.
#[derive(Default)]
pub struct RegistryBuilder {
    kinds: IndexMap<String, Arc<dyn TaskKindDescriptor>>,
}

impl RegistryBuilder {
    /// Register a kind. A later registration under the same name replaces the earlier one.
    #[must_use]
    pub fn register(mut self, kind: impl TaskKindDescriptor + 'static) -> Self {
        let name = kind.schema().name.clone();
        self.kinds.insert(name, Arc::new(kind));
        self
    }

    #[must_use]
    pub fn register_arc(mut self, kind: Arc<dyn TaskKindDescriptor>) -> Self {
        let name = kind.schema().name.clone();
        self.kinds.insert(name, kind);
        self
    }

    pub fn build(self) -> ComponentRegistry {
        ComponentRegistry { kinds: self.kinds }
    }
}
