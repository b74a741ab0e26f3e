//! DS-010: Multi-workflow documents.
//!
//! A document holds a `default` block plus one top-level key per workflow:
//!
//! ```yaml
//! default:
//!   default_args:
//!     start_date: 2018-03-01
//! example_dag:
//!   tasks:
//!     task_1: {operator: shell.Command, bash_command: echo 1}
//! ```

use super::artifact::GraphArtifact;
use super::assembler::GraphAssembler;
use super::error::{BuildError, Result};
use super::types::{DagDefaults, DagSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Every workflow in one document, sharing one defaults block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub default: DagDefaults,

    #[serde(flatten)]
    pub dags: IndexMap<String, DagSpec>,
}

impl FactoryConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text).map_err(|e| BuildError::invalid("document", e.to_string()))
    }
}

/// Builds every workflow of a `FactoryConfig`.
#[derive(Debug, Clone)]
pub struct DagFactory {
    assembler: GraphAssembler,
}

impl DagFactory {
    pub fn new(assembler: GraphAssembler) -> Self {
        Self { assembler }
    }

    /// Compile workflows in document order. Stops at the first failure.
    pub fn build_all(&self, config: &FactoryConfig) -> Result<IndexMap<String, GraphArtifact>> {
        let mut artifacts = IndexMap::with_capacity(config.dags.len());
        for (dag_id, spec) in &config.dags {
            let artifact = self
                .assembler
                .build(dag_id, spec, &config.default)
                .map_err(|source| BuildError::Dag {
                    dag_id: dag_id.clone(),
                    source: Box::new(source),
                })?;
            artifacts.insert(dag_id.clone(), artifact);
        }
        tracing::info!(dags = artifacts.len(), "built all dags");
        Ok(artifacts)
    }

    /// Compile a single workflow of the document.
    pub fn build_one(&self, config: &FactoryConfig, dag_id: &str) -> Result<GraphArtifact> {
        let spec = config.dags.get(dag_id).ok_or_else(|| {
            BuildError::invalid("dag_id", format!("no dag named '{dag_id}' in the document"))
        })?;
        self.assembler.build(dag_id, spec, &config.default)
    }
}
