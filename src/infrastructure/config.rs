//! Configuration management for the gateway
//!
//! Loads configuration from config.toml at startup.
//! Nodes are keyed tables, paths an array of tables; hook and node specific
//! parameters are kept as raw TOML tables for their owners to interpret.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default per-destination queue length
pub const DEFAULT_QUEUELEN: usize = 1024;

/// Gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Process-wide settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// API server settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Endpoint definitions by name
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,

    /// Routing rules
    #[serde(default)]
    pub paths: Vec<PathConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Seconds between periodic hook ticks
    #[serde(default = "default_hook_interval")]
    pub hook_interval: f64,

    /// Directory for rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port for HTTP API server
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// One endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Registered node type
    #[serde(rename = "type")]
    pub kind: String,

    /// Preferred read/write batch size
    #[serde(default = "default_vectorize")]
    pub vectorize: usize,

    /// Type specific settings
    #[serde(flatten)]
    pub params: toml::Table,
}

/// One routing rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathConfig {
    /// Input mappings (`node`, `node.data[0-3]`, ...)
    #[serde(rename = "in", deserialize_with = "one_or_many")]
    pub inputs: Vec<String>,

    /// Output node names
    #[serde(rename = "out", deserialize_with = "one_or_many")]
    pub outputs: Vec<String>,

    /// Trigger mode: "any" or "all"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Sources taking part in the trigger decision (all when absent)
    #[serde(default)]
    pub mask: Option<Vec<String>>,

    /// Per-destination queue length, rounded up to a power of two
    #[serde(default = "default_queuelen")]
    pub queuelen: usize,

    /// Re-emit rate in Hz when no new data arrives (0 disables)
    #[serde(default)]
    pub rate: f64,

    #[serde(default)]
    pub hooks: Vec<HookConfig>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also create the mirrored path
    #[serde(default)]
    pub reverse: bool,

    /// Attach the built-in hooks
    #[serde(default = "default_true")]
    pub builtin: bool,
}

/// One hook instance on a path
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookConfig {
    /// Registered hook type
    #[serde(rename = "type")]
    pub kind: String,

    /// Overrides the hook type's default priority
    #[serde(default)]
    pub priority: Option<i32>,

    /// Type specific settings
    #[serde(flatten)]
    pub params: toml::Table,
}

impl HookConfig {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            priority: None,
            params: toml::Table::new(),
        }
    }
}

impl PathConfig {
    /// Minimal rule from `inputs` to `outputs` with defaults elsewhere
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            mode: default_mode(),
            mask: None,
            queuelen: default_queuelen(),
            rate: 0.0,
            hooks: Vec::new(),
            enabled: true,
            reverse: false,
            builtin: true,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hook_interval: default_hook_interval(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

fn default_hook_interval() -> f64 {
    1.0
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_api_port() -> u16 {
    8080
}

fn default_vectorize() -> usize {
    1
}

fn default_mode() -> String {
    "any".to_string()
}

fn default_queuelen() -> usize {
    DEFAULT_QUEUELEN
}

fn default_true() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl Config {
    /// Load configuration from the file named by `CONFIG_PATH` (default config.toml)
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match Self::from_file(&config_path) {
            Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            other => other,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Parse error (invalid TOML)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Semantically invalid setting
    #[error("Invalid setting '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read a non-negative integer parameter
pub fn param_usize(params: &toml::Table, key: &str, default: usize) -> Result<usize, ConfigError> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Integer(i)) if *i >= 0 => Ok(*i as usize),
        Some(_) => Err(ConfigError::invalid(key, "expected a non-negative integer")),
    }
}

/// Read a numeric parameter (integers are accepted)
pub fn param_f64(params: &toml::Table, key: &str, default: f64) -> Result<f64, ConfigError> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(f)) => Ok(*f),
        Some(toml::Value::Integer(i)) => Ok(*i as f64),
        Some(_) => Err(ConfigError::invalid(key, "expected a number")),
    }
}

/// Read an optional string parameter
pub fn param_str<'a>(params: &'a toml::Table, key: &str) -> Result<Option<&'a str>, ConfigError> {
    match params.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ConfigError::invalid(key, "expected a string")),
    }
}
