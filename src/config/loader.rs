//! Reads an [`ExecutorConfig`] tree from a JSON or YAML file and applies
//! `KERNEL_*` environment overrides, the way `orchestrator::config::loader`
//! layers `ACOLIB_LLM_*` env vars over a parsed model config.

use std::fs;
use std::path::Path;

use crate::model::{ExecutorConfig, ModeConfig};

/// Parse `path` as JSON and deserialize into an [`ExecutorConfig`] tree.
pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<ExecutorConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| crate::KernelError::General(format!("failed to read config file {path:?}: {e}")))?;
    from_json_str(&content)
}

pub fn from_json_str(content: &str) -> crate::Result<ExecutorConfig> {
    let mut config: ExecutorConfig = serde_json::from_str(content)?;
    EnvOverrides::from_env().apply(&mut config);
    Ok(config)
}

/// Parse `path` as YAML and deserialize into an [`ExecutorConfig`] tree.
/// Read through `serde_yaml` into a `serde_json::Value` first so the same
/// `ExecutorConfig` deserialization path (and its `#[serde(flatten)]`
/// fields) is used regardless of source format.
pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<ExecutorConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| crate::KernelError::General(format!("failed to read config file {path:?}: {e}")))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| crate::KernelError::General(format!("failed to parse YAML config {path:?}: {e}")))?;
    let json = serde_json::to_value(yaml)
        .map_err(|e| crate::KernelError::General(format!("failed to convert YAML config {path:?} to JSON: {e}")))?;
    let mut config: ExecutorConfig = serde_json::from_value(json)?;
    EnvOverrides::from_env().apply(&mut config);
    Ok(config)
}

/// Overrides read from `KERNEL_MAX_RETRIES` / `KERNEL_TIMEOUT_MS` /
/// `KERNEL_MAX_CONCURRENCY`, applied to every node in a config tree after
/// it is parsed. Absent or unparseable variables leave the parsed value
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            max_retries: parse_env("KERNEL_MAX_RETRIES"),
            timeout_ms: parse_env("KERNEL_TIMEOUT_MS"),
            max_concurrency: parse_env("KERNEL_MAX_CONCURRENCY"),
        }
    }

    /// Apply these overrides to `config` and, recursively, every composite
    /// child in its tree.
    pub fn apply(&self, config: &mut ExecutorConfig) {
        if let Some(max_retries) = self.max_retries {
            config.constraints.max_retries = max_retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.constraints.timeout_ms = Some(timeout_ms);
        }

        if let Some(orch) = config.orchestrator.as_mut() {
            if let Some(max_concurrency) = self.max_concurrency {
                match &mut orch.mode_config {
                    ModeConfig::Parallel { max_concurrency: slot, .. } => *slot = Some(max_concurrency),
                    ModeConfig::Dag { max_concurrency: slot, .. } => *slot = Some(max_concurrency),
                    _ => {}
                }
            }
            for child in orch.children.iter_mut() {
                self.apply(child);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutorKind, OrchestratorMode};
    use serial_test::serial;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "id": "root",
            "name": "root",
            "type": "composite",
            "mode": "parallel",
            "modeConfig": { "kind": "parallel" },
            "children": [
                { "id": "a", "name": "a", "type": "script", "template": "{{input}}" }
            ]
        }"#
    }

    #[test]
    fn parses_json_string_without_overrides() {
        std::env::remove_var("KERNEL_MAX_RETRIES");
        std::env::remove_var("KERNEL_TIMEOUT_MS");
        std::env::remove_var("KERNEL_MAX_CONCURRENCY");
        let config = from_json_str(sample_json()).unwrap();
        assert_eq!(config.id, "root");
        assert_eq!(config.kind, ExecutorKind::composite());
        assert_eq!(config.orchestrator.unwrap().mode, OrchestratorMode::Parallel);
    }

    #[test]
    #[serial]
    fn env_overrides_apply_recursively() {
        std::env::set_var("KERNEL_MAX_RETRIES", "4");
        std::env::set_var("KERNEL_MAX_CONCURRENCY", "2");
        let config = from_json_str(sample_json()).unwrap();
        assert_eq!(config.constraints.max_retries, 4);
        let orch = config.orchestrator.unwrap();
        match orch.mode_config {
            ModeConfig::Parallel { max_concurrency, .. } => assert_eq!(max_concurrency, Some(2)),
            _ => panic!("expected parallel mode config"),
        }
        assert_eq!(orch.children[0].constraints.max_retries, 4);
        std::env::remove_var("KERNEL_MAX_RETRIES");
        std::env::remove_var("KERNEL_MAX_CONCURRENCY");
    }

    #[test]
    fn from_yaml_file_reads_through_serde_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "id: root\nname: root\ntype: script\ntemplate: \"{{{{input}}}}\"\n"
        )
        .unwrap();
        std::env::remove_var("KERNEL_MAX_RETRIES");
        let config = from_yaml_file(file.path()).unwrap();
        assert_eq!(config.id, "root");
        assert_eq!(config.kind, ExecutorKind::script());
    }
}
