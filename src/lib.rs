//! Dagsmith: declarative batch-workflow compiler.
//!
//! Compiles a workflow description (tasks, peer task groups, dependencies)
//! into a validated, cycle-free task graph. Group-level dependencies are
//! expanded into member-level edges through each group's entry and exit
//! frontiers. Task kinds come from a host-supplied registry; callables are
//! named expressions in source units or inline `|arg| ...` expressions.
//!
//! ```
//! use std::sync::Arc;
//! use dagsmith::{BuildOptions, ComponentRegistry, DagDefaults, DagSpec, GraphAssembler, SchemaKind};
//!
//! let registry = ComponentRegistry::builder()
//!     .register(SchemaKind::new("shell.Command").required(&["bash_command"]))
//!     .build();
//! let assembler = GraphAssembler::new(Arc::new(registry), BuildOptions::default());
//!
//! let defaults: DagDefaults =
//!     serde_yaml_ng::from_str("default_args: {start_date: 2024-01-01}").unwrap();
//! let spec: DagSpec = serde_yaml_ng::from_str(
//!     "tasks:\n  a: {operator: shell.Command, bash_command: echo a}\n  b: {operator: shell.Command, bash_command: echo b, dependencies: [a]}\n",
//! )
//! .unwrap();
//!
//! let artifact = assembler.build("example", &spec, &defaults).unwrap();
//! assert_eq!(artifact.topological_order, vec!["a", "b"]);
//! ```

pub mod callable;
pub mod core;

pub use crate::callable::{Callable, CallableLoader, CallableReference};
pub use crate::core::artifact::{ArtifactSummary, GraphArtifact};
pub use crate::core::assembler::GraphAssembler;
pub use crate::core::error::{BuildError, Result};
pub use crate::core::factory::{DagFactory, FactoryConfig};
pub use crate::core::registry::{ComponentRegistry, SchemaKind, TaskInstance, TaskKindDescriptor};
pub use crate::core::types::{BuildOptions, Capabilities, DagDefaults, DagSpec, GraphEdge};

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default `info`).
#[cfg(feature = "logging")]
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
