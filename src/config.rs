//! System configuration.
//!
//! Loaded from a YAML file, then adjusted from the environment:
//! - `TASKBOARD_MAX_ITERATIONS` - global iteration budget
//! - `TASKBOARD_MAX_CONCURRENCY` - concurrent dispatches per round
//! - `TASKBOARD_LOG_LEVEL` - default log verbosity
//!
//! ```yaml
//! max_iterations: 30
//! log_level: info
//! agents:
//!   delegator:
//!     type: delegator
//!     llm: { model_name: claude-3-sonnet, temperature: 0.2 }
//!   swe_agent:
//!     type: swe_agent
//!     max_retries: 2
//!     timeout_secs: 600
//! ```
//!
//! The core only reads `max_iterations`, `max_concurrency`, and each role's
//! `max_retries` / `timeout_secs`. The `llm` block is passed through untouched
//! to the agent implementations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::agents::Role;

const DEFAULT_MAX_ITERATIONS: u32 = 30;
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Per-agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Role this agent plays
    #[serde(rename = "type")]
    pub role: Role,
    /// Maximum dispatches of one task into in_progress
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on a single dispatch
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Model/credential settings for the agent implementation (opaque here)
    #[serde(default)]
    pub llm: serde_yaml::Value,
}

impl AgentConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            llm: serde_yaml::Value::Null,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry limit per role, as seen by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub delegator: u32,
    pub verifier: u32,
    pub worker: u32,
}

impl RetryLimits {
    pub fn uniform(max_retries: u32) -> Self {
        Self {
            delegator: max_retries,
            verifier: max_retries,
            worker: max_retries,
        }
    }

    pub fn for_role(&self, role: Role) -> u32 {
        match role {
            Role::Delegator => self.delegator,
            Role::Verifier => self.verifier,
            Role::Worker => self.worker,
        }
    }
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self::uniform(DEFAULT_MAX_RETRIES)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Orchestration rounds before the run gives up
    pub max_iterations: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Agent name -> settings
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            log_level: default_log_level(),
            agents: BTreeMap::new(),
        }
    }
}

impl SystemConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: SystemConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: SystemConfig = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(
            "Loaded config from {} ({} agents, max_iterations={})",
            path.display(),
            config.agents.len(),
            config.max_iterations
        );
        Ok(config)
    }

    /// Apply `TASKBOARD_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        if let Some(value) = lookup("TASKBOARD_MAX_ITERATIONS") {
            self.max_iterations = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("TASKBOARD_MAX_ITERATIONS is not a number: {}", value))
            })?;
        }
        if let Some(value) = lookup("TASKBOARD_MAX_CONCURRENCY") {
            self.max_concurrency = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("TASKBOARD_MAX_CONCURRENCY is not a number: {}", value))
            })?;
        }
        if let Some(value) = lookup("TASKBOARD_LOG_LEVEL") {
            if !value.trim().is_empty() {
                self.log_level = value.trim().to_string();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be positive".to_string(),
            ));
        }
        for (name, agent) in &self.agents {
            if agent.max_retries == 0 {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}': max_retries must be positive",
                    name
                )));
            }
            if agent.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}': timeout_secs must be positive",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Settings for `role`: the agent named after the role if present,
    /// otherwise the first agent (by name) declaring that type.
    pub fn agent_for(&self, role: Role) -> Option<(&str, &AgentConfig)> {
        if let Some(agent) = self.agents.get(role.as_str()).filter(|a| a.role == role) {
            return Some((role.as_str(), agent));
        }
        self.agents
            .iter()
            .find(|(_, a)| a.role == role)
            .map(|(name, a)| (name.as_str(), a))
    }

    pub fn max_retries(&self, role: Role) -> u32 {
        self.agent_for(role)
            .map(|(_, a)| a.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn timeout(&self, role: Role) -> Duration {
        self.agent_for(role)
            .map(|(_, a)| a.timeout())
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            delegator: self.max_retries(Role::Delegator),
            verifier: self.max_retries(Role::Verifier),
            worker: self.max_retries(Role::Worker),
        }
    }

    /// Builder-style helper, mostly for tests and embedding.
    pub fn with_agent(mut self, name: impl Into<String>, agent: AgentConfig) -> Self {
        self.agents.insert(name.into(), agent);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
max_iterations: 12
log_level: debug
agents:
  delegator:
    type: delegator
    llm:
      model_name: claude-3-sonnet
      api_key: sk-test
      temperature: 0.2
  verifier:
    type: verifier
    max_retries: 5
  swe_agent:
    type: swe_agent
    max_retries: 2
    timeout_secs: 600
"#;

    #[test]
    fn test_parse_sample() {
        let config = SystemConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.log_level, "debug");

        let limits = config.retry_limits();
        assert_eq!(limits.delegator, 3);
        assert_eq!(limits.verifier, 5);
        assert_eq!(limits.worker, 2);
        assert_eq!(config.timeout(Role::Worker), Duration::from_secs(600));

        let (name, worker) = config.agent_for(Role::Worker).unwrap();
        assert_eq!(name, "swe_agent");
        assert!(worker.llm.is_null());

        let (_, delegator) = config.agent_for(Role::Delegator).unwrap();
        assert_eq!(delegator.llm["model_name"].as_str(), Some("claude-3-sonnet"));
    }

    #[test]
    fn test_missing_roles_use_defaults() {
        let config = SystemConfig::from_yaml_str("max_iterations: 3").unwrap();
        assert!(config.agent_for(Role::Verifier).is_none());
        assert_eq!(config.retry_limits(), RetryLimits::default());
        assert_eq!(config.timeout(Role::Delegator), Duration::from_secs(300));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            SystemConfig::from_yaml_str("max_iterations: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SystemConfig::from_yaml_str(
                "max_iterations: 5\nagents:\n  w:\n    type: worker\n    max_retries: 0\n"
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SystemConfig::from_yaml_str("max_iterations: [1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SystemConfig::from_yaml_str("max_iterations: 5\nagents:\n  w:\n    type: planner\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TASKBOARD_MAX_ITERATIONS", "7"),
            ("TASKBOARD_LOG_LEVEL", "warn"),
        ]
        .into_iter()
        .collect();

        let mut config = SystemConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);

        let err = config
            .apply_overrides(|key| (key == "TASKBOARD_MAX_CONCURRENCY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(config.agents.len(), 3);

        let missing = SystemConfig::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
