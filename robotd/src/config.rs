//! Runtime configuration, loaded from an explicit path, a project-local
//! YAML file, the user config directory, or built-in defaults — in that
//! order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: "LLM_API_KEY".to_string(),
            timeout_ms: default_timeout_ms(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for routing classified human input through the Host
/// Agent assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host_timeout_secs() -> u64 {
    30
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { timeout_secs: default_host_timeout_secs() }
    }
}

/// Pool concurrency defaults, applied to a robot with no explicit quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    #[serde(default = "default_default_quota")]
    pub default_quota_max: usize,
    #[serde(default = "default_default_queue")]
    pub default_quota_queue: usize,
}

fn default_global_concurrency() -> usize {
    16
}
fn default_default_quota() -> usize {
    2
}
fn default_default_queue() -> usize {
    8
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            default_quota_max: default_default_quota(),
            default_quota_queue: default_default_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("robotd")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

fn default_subscriber_capacity() -> usize {
    crate::events::MIN_SUBSCRIBER_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { subscriber_capacity: default_subscriber_capacity() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

impl RuntimeConfig {
    /// Load from `path` if given, else the first of
    /// `./robotd.yml`, `$XDG_CONFIG_HOME/robotd/config.yml`, falling back
    /// to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            return Ok(serde_yaml::from_str(&content)?);
        }

        let candidates = [
            Some(PathBuf::from("robotd.yml")),
            dirs::config_dir().map(|p| p.join("robotd").join("config.yml")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                let content = std::fs::read_to_string(&candidate)?;
                return Ok(serde_yaml::from_str(&content)?);
            }
        }

        Ok(RuntimeConfig::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.pool.default_quota_max, 2);
    }

    #[test]
    fn load_with_explicit_path_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robotd.yml");
        std::fs::write(&path, "llm:\n  model: custom-model\n").unwrap();
        let config = RuntimeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.llm.model, "custom-model");
    }

    #[test]
    #[serial_test::serial]
    fn load_with_no_path_and_no_files_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let config = RuntimeConfig::load(None);
        std::env::set_current_dir(original).unwrap();
        assert_eq!(config.unwrap().llm.model, "gpt-4o-mini");
    }
}
