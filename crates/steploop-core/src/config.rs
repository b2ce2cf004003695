//! Run configuration.
//!
//! Uses a key=value format (`.steploop/config`), one setting per line, `#`
//! comments, optional quotes around values.
//! Precedence: CLI flags > `--config` file > `.steploop/config` > defaults.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Workspace-relative location of the default config file.
pub const DEFAULT_CONFIG_PATH: &str = ".steploop/config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Settings for one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Provider selection
    pub provider: String,
    /// Model override; empty means "use the plan's metadata model".
    pub model: String,
    /// Adapter-specific thinking level (e.g. `low`, `medium`, `high`).
    pub thinking: Option<String>,
    pub max_turns: Option<u32>,
    /// Pass the plan's recorded session id back to the provider.
    pub resume_sessions: bool,

    // Iteration budget
    pub iterations: u32,

    // Timeouts
    pub provider_timeout_sec: u32,
    pub criteria_timeout_sec: u32,
    pub post_check_timeout_sec: u32,
    pub heartbeat_sec: u32,

    // Retry policy (0 = unbounded)
    pub max_transient_retries: u32,

    // Commit gate
    pub auto_commit: bool,
    pub allow_dirty: bool,
    pub dry_run: bool,

    // Prompt context
    pub context_files: Vec<PathBuf>,

    // Run log
    pub run_log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            model: String::new(),
            thinking: None,
            max_turns: None,
            resume_sessions: false,
            iterations: 20,
            provider_timeout_sec: 1800,
            criteria_timeout_sec: 300,
            post_check_timeout_sec: 600,
            heartbeat_sec: 30,
            max_transient_retries: 0,
            auto_commit: false,
            allow_dirty: false,
            dry_run: false,
            context_files: Vec::new(),
            run_log_dir: dirs::data_local_dir().map_or_else(
                || PathBuf::from(".steploop/runs"),
                |d| d.join("steploop/runs"),
            ),
        }
    }
}

impl Config {
    /// Defaults, then `<workspace>/.steploop/config` if present, then `explicit`.
    pub fn load_layered(workspace_root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let workspace_config = workspace_root.join(DEFAULT_CONFIG_PATH);
        if workspace_config.exists() {
            config.load_file(&workspace_config)?;
        }
        if let Some(path) = explicit {
            config.load_file(path)?;
        }
        config.resolve_paths(workspace_root);
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "provider" => self.provider = value.to_string(),
            "model" => self.model = value.to_string(),
            "thinking" => {
                self.thinking = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "max_turns" => {
                self.max_turns = if value.is_empty() {
                    None
                } else {
                    Some(Self::parse_int(key, value)?)
                }
            }
            "resume_sessions" => self.resume_sessions = Self::parse_bool(key, value)?,
            "iterations" => self.iterations = Self::parse_int(key, value)?,
            "provider_timeout_sec" => self.provider_timeout_sec = Self::parse_int(key, value)?,
            "criteria_timeout_sec" => self.criteria_timeout_sec = Self::parse_int(key, value)?,
            "post_check_timeout_sec" => {
                self.post_check_timeout_sec = Self::parse_int(key, value)?;
            }
            "heartbeat_sec" => self.heartbeat_sec = Self::parse_int(key, value)?,
            "max_transient_retries" => self.max_transient_retries = Self::parse_int(key, value)?,
            "auto_commit" => self.auto_commit = Self::parse_bool(key, value)?,
            "allow_dirty" => self.allow_dirty = Self::parse_bool(key, value)?,
            "dry_run" => self.dry_run = Self::parse_bool(key, value)?,
            "context_files" => {
                self.context_files = value.split_whitespace().map(PathBuf::from).collect();
            }
            "run_log_dir" => self.run_log_dir = PathBuf::from(value),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn parse_int(key: &str, value: &str) -> Result<u32, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if !self.context_files.is_empty() {
            self.context_files = self
                .context_files
                .iter()
                .map(|path| {
                    if path.is_relative() {
                        workspace_root.join(path)
                    } else {
                        path.clone()
                    }
                })
                .collect();
        }
        if self.run_log_dir.is_relative() {
            self.run_log_dir = workspace_root.join(&self.run_log_dir);
        }
    }
}
