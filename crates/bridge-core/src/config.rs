//! Configuration management for the bridge
//!
//! Loads configuration with priority:
//! 1. The file given on the command line
//! 2. bridge.toml in the current directory or one of its parents
//! 3. Defaults
//!
//! String values of the form `${VAR_NAME}` are resolved from the environment.

use crate::{AgentName, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const CONFIG_FILE_NAME: &str = "bridge.toml";

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Static agent table: one entry per supported agent
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentEntry>,

    /// Agent used by clients that do not name one
    pub default_agent: Option<String>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// One `[[agents]]` entry as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    pub endpoint: String,
}

/// A validated agent registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistration {
    pub name: AgentName,
    pub endpoint: Url,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Route under which the turn endpoint is mounted
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

/// Bounds on every wait the bridge performs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Max wait for an adapter to open and between two adapter events
    #[serde(default = "default_adapter_ms")]
    pub adapter_ms: u64,

    /// Max wait for the result of a UI action
    #[serde(default = "default_action_ms")]
    pub action_ms: u64,

    /// TCP connect timeout towards agents
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Retry policy for agents that are unreachable before the first event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles on each further attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            adapter_ms: default_adapter_ms(),
            action_ms: default_action_ms(),
            connect_ms: default_connect_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn adapter(&self) -> Duration {
        Duration::from_millis(self.adapter_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait before attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            json_logs: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from bridge.toml, searching upwards from the
    /// current directory. Falls back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::info!("No {} found, using default configuration", CONFIG_FILE_NAME);
                let config = Self::defaults();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("Loading configuration from: {:?}", path);

        let contents = fs::read_to_string(path).map_err(|e| {
            Error::config_error(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml_str(&contents)
            .map_err(|e| Error::config_error(format!("{:?}: {}", path, e)))
    }

    /// Parse, resolve and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: BridgeConfig = toml::from_str(contents)
            .map_err(|e| Error::config_error(format!("Failed to parse config: {}", e)))?;

        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Find bridge.toml by searching current directory and parents
    fn find_config_file() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Resolve ${VAR_NAME} references to environment variables
    fn resolve_env_vars(&mut self) {
        for agent in &mut self.agents {
            if let Some(resolved) = Self::resolve_env_var(&agent.endpoint) {
                agent.endpoint = resolved;
            }
        }
        if let Some(resolved) = Self::resolve_env_var(&self.server.host) {
            self.server.host = resolved;
        }
    }

    /// Resolve a single ${VAR_NAME} reference
    fn resolve_env_var(value: &str) -> Option<String> {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            env::var(var_name).ok()
        } else {
            Some(value.to_string())
        }
    }

    /// Check the configuration for errors that would otherwise surface per request
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(Error::config_error("at least one [[agents]] entry is required"));
        }

        let registrations = self.agent_registrations()?;
        let mut names = HashSet::new();
        for registration in &registrations {
            if !names.insert(registration.name.clone()) {
                return Err(Error::config_error(format!(
                    "agent '{}' is registered twice",
                    registration.name
                )));
            }
        }

        if let Some(default_agent) = &self.default_agent
            && !names.contains(default_agent.as_str())
        {
            return Err(Error::config_error(format!(
                "default_agent '{}' is not a registered agent",
                default_agent
            )));
        }

        if self.timeouts.adapter_ms == 0 || self.timeouts.action_ms == 0 {
            return Err(Error::config_error("timeouts must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config_error("retry.max_attempts must be at least 1"));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(Error::config_error(
                "session.sweep_interval_secs must be greater than zero",
            ));
        }
        if !self.server.base_path.starts_with('/') || self.server.base_path.ends_with('/') {
            return Err(Error::config_error(format!(
                "server.base_path '{}' must start with '/' and not end with '/'",
                self.server.base_path
            )));
        }

        Ok(())
    }

    /// Validated view of the agent table
    pub fn agent_registrations(&self) -> Result<Vec<AgentRegistration>> {
        self.agents
            .iter()
            .map(|entry| {
                let name = AgentName::parse(entry.name.clone())
                    .map_err(|e| Error::config_error(e.to_string()))?;
                let endpoint = Url::parse(&entry.endpoint).map_err(|e| {
                    Error::config_error(format!(
                        "agent '{}' has invalid endpoint '{}': {}",
                        entry.name, entry.endpoint, e
                    ))
                })?;
                if !matches!(endpoint.scheme(), "http" | "https") {
                    return Err(Error::config_error(format!(
                        "agent '{}' endpoint must be http or https",
                        entry.name
                    )));
                }
                Ok(AgentRegistration { name, endpoint })
            })
            .collect()
    }

    /// Default configuration: one investment advisor team reachable on the
    /// compose network.
    pub fn defaults() -> Self {
        Self {
            server: ServerConfig::default(),
            agents: default_agents(),
            default_agent: Some(DEFAULT_AGENT.to_string()),
            timeouts: TimeoutConfig::default(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Create test-friendly defaults: loopback endpoint and short timeouts
    pub fn test_defaults() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                base_path: default_base_path(),
            },
            agents: vec![AgentEntry {
                name: DEFAULT_AGENT.to_string(),
                endpoint: "http://127.0.0.1:8000/agui".to_string(),
            }],
            default_agent: None,
            timeouts: TimeoutConfig {
                adapter_ms: 500,
                action_ms: 500,
                connect_ms: 200,
            },
            session: SessionConfig::default(),
            retry: RetryConfig {
                max_attempts: 1,
                initial_backoff_ms: 10,
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

pub const DEFAULT_AGENT: &str = "investment_advisor_team";

fn default_agents() -> Vec<AgentEntry> {
    vec![AgentEntry {
        name: DEFAULT_AGENT.to_string(),
        endpoint: "http://agents:8000/agui".to_string(),
    }]
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_path() -> String {
    "/api/copilotkit".to_string()
}

fn default_adapter_ms() -> u64 {
    30_000
}

fn default_action_ms() -> u64 {
    30_000
}

fn default_connect_ms() -> u64 {
    5_000
}

fn default_idle_timeout_secs() -> u64 {
    1_800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_service_name() -> String {
    "advisor-bridge".to_string()
}
