//! File-based configuration loading for [`crate::model::ExecutorConfig`]
//! trees, plus `KERNEL_*` environment overrides.
//!
//! Mirrors `orchestrator::config::loader`'s file-plus-environment-override
//! pattern, scaled down to this crate's needs: no `$include` composition or
//! `${VAR:default}` string expansion, since `ExecutorConfig` has no nested
//! document includes to resolve — just a JSON/YAML file read and a small
//! set of named overrides applied to the whole tree after parsing.

pub mod loader;

pub use loader::{from_json_file, from_json_str, from_yaml_file, EnvOverrides};
