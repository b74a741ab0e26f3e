//! Core compiler: types, config resolution, registry, groups, expansion, assembly.

pub mod artifact;
pub mod assembler;
pub mod config;
pub mod error;
pub mod expander;
pub mod factory;
pub mod groups;
pub mod registry;
pub mod types;
