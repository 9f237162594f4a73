//! Configuration for the coordinator.
//!
//! Two sources: a TOML file describing the model provider, planner and
//! sub-agents, and the process environment for the cloud project settings
//! every deployment must provide.
//!
//! Config files are checked on Unix before they are read: they must be
//! regular files, not world-writable, and not world-readable when they
//! hold an API key.

use quarry_agents::SubAgentConfig;
use quarry_common::{QuarryError, Result};
use quarry_llm::LlmConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::DEFAULT_DATABASE;

pub const ENV_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
pub const ENV_LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
pub const ENV_CODE_INTERPRETER: &str = "CODE_INTERPRETER_EXTENSION_NAME";

/// Main coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Model provider for the planner and model-backed sub-agents.
    /// Without one, only the protocol planner and HTTP sub-agents work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<LlmConfig>,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    /// Active database for new sessions
    #[serde(default = "default_database")]
    pub default_database: String,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    /// Model planner when a provider is configured, protocol planner otherwise
    #[default]
    Auto,
    Llm,
    Protocol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub kind: PlannerKind,

    /// Planner rounds allowed per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_planner_temperature")]
    pub temperature: f32,
}

fn default_max_steps() -> usize {
    8
}

fn default_planner_temperature() -> f32 {
    crate::planner::DEFAULT_PLANNER_TEMPERATURE
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::default(),
            max_steps: default_max_steps(),
            temperature: default_planner_temperature(),
        }
    }
}

/// The three sub-agents behind the coordinator's tools.
///
/// Defaults to three locally hosted HTTP agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub intent: SubAgentConfig,
    pub database: SubAgentConfig,
    pub analytics: SubAgentConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            intent: SubAgentConfig::Http {
                endpoint: "http://localhost:8081/run".into(),
                timeout_ms: 120_000,
            },
            database: SubAgentConfig::Http {
                endpoint: "http://localhost:8082/run".into(),
                timeout_ms: 120_000,
            },
            analytics: SubAgentConfig::Http {
                endpoint: "http://localhost:8083/run".into(),
                timeout_ms: 120_000,
            },
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            provider: None,
            planner: PlannerConfig::default(),
            agents: AgentsConfig::default(),
            default_database: default_database(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file, checking its permissions first.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.provider.as_ref().is_some_and(|p| p.api_key.is_some()) {
            warn!(
                "API key found in config file '{}'. Prefer GOOGLE_API_KEY, \
                 GOOGLE_CLOUD_ACCESS_TOKEN or OPENAI_API_KEY instead.",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    pub fn from_file_unchecked(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.planner.max_steps == 0 {
            return Err(QuarryError::Config("planner.max_steps must be at least 1".into()));
        }
        if self.planner.kind == PlannerKind::Llm && self.provider.is_none() {
            return Err(QuarryError::Config(
                "planner.kind = \"llm\" requires a [provider] section".into(),
            ));
        }
        if self.default_database.trim().is_empty() {
            return Err(QuarryError::Config("default_database must not be empty".into()));
        }
        Ok(())
    }

    /// Fill provider fields the environment already determines.
    pub fn apply_env(&mut self, env: &EnvSettings) {
        if let Some(provider) = self.provider.as_mut() {
            provider.project.get_or_insert_with(|| env.project.clone());
            provider.location.get_or_insert_with(|| env.location.clone());
        }
    }
}

/// Validate config file permissions on Unix systems.
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)?;
    let has_api_key = content.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("api_key") && line.contains('"')
    });

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

/// Cloud settings every deployment must provide through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub project: String,
    pub location: String,
    /// Code-execution extension used by the analysis sub-agent
    pub code_interpreter_extension: String,
}

impl EnvSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the settings through `lookup`; unset and empty values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    QuarryError::Config(format!("Please set the {name} environment variable."))
                })
        };

        Ok(Self {
            project: required(ENV_PROJECT)?,
            location: required(ENV_LOCATION)?,
            code_interpreter_extension: required(ENV_CODE_INTERPRETER)?,
        })
    }

    /// Sent with every request to HTTP sub-agents.
    pub fn sub_agent_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "project": self.project,
            "location": self.location,
            "code_interpreter_extension": self.code_interpreter_extension,
        })
    }
}
