//! DS-007: Build error taxonomy.
//!
//! Every variant is a build-time failure. The first detected problem aborts the
//! build and carries enough context (task/group id, field name, cycle member) to
//! locate the offending configuration entry.

use thiserror::Error;

/// Result alias used throughout the compiler.
pub type Result<T> = std::result::Result<T, BuildError>;

/// A failure while compiling a workflow description into a graph artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("dag '{dag_id}' has no resolvable start_date: {reason}")]
    MissingStartDate { dag_id: String, reason: String },

    #[error("`{feature}` key can only be used when the runtime supports {capability}")]
    UnsupportedFeature { feature: String, capability: String },

    #[error("task '{task_id}' uses unknown operator '{operator}'")]
    UnknownOperator { task_id: String, operator: String },

    #[error("'{task_id}' is missing required parameter(s): {}", params.join(", "))]
    MissingParameter { task_id: String, params: Vec<String> },

    #[error("cannot resolve callable for '{slot}': {reason}")]
    CallableResolution { slot: String, reason: String },

    #[error("'{owner}' supplies both an inline expression and a named symbol for '{slot}'")]
    AmbiguousCallable { owner: String, slot: String },

    #[error("identifier '{id}' is {reason}")]
    DuplicateIdentifier { id: String, reason: String },

    #[error("'{dependent}' depends on unknown task or group '{target}'")]
    UnknownDependencyTarget { dependent: String, target: String },

    #[error("dependency cycle detected involving '{node}'")]
    CyclicDependency { node: String },

    #[error("task '{task_id}' references unknown task group '{group}'")]
    UnknownGroup { task_id: String, group: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to build dag '{dag_id}': {source}")]
    Dag {
        dag_id: String,
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn callable(slot: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallableResolution {
            slot: slot.into(),
            reason: reason.into(),
        }
    }

    /// Unwrap the factory wrapper, if any, to reach the underlying failure.
    pub fn root(&self) -> &BuildError {
        match self {
            Self::Dag { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ds007_missing_parameter_lists_all() {
        let err = BuildError::MissingParameter {
            task_id: "t1".to_string(),
            params: vec!["bash_command".to_string(), "env".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'t1'"));
        assert!(msg.contains("bash_command, env"));
    }

    #[test]
    fn test_ds007_unsupported_feature_names_feature() {
        let err = BuildError::UnsupportedFeature {
            feature: "task_groups".to_string(),
            capability: "task grouping".to_string(),
        };
        assert!(err.to_string().contains("`task_groups` key can only be used"));
    }

    #[test]
    fn test_ds007_root_unwraps_factory_wrapper() {
        let inner = BuildError::CyclicDependency {
            node: "a".to_string(),
        };
        let wrapped = BuildError::Dag {
            dag_id: "d".to_string(),
            source: Box::new(BuildError::Dag {
                dag_id: "outer".to_string(),
                source: Box::new(inner.clone()),
            }),
        };
        assert_eq!(wrapped.root(), &inner);
        assert!(wrapped.to_string().contains("failed to build dag 'd'"));
    }
}
