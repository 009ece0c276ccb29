use assistant_core::config::{AssistantOverrides, AuthOverrides, ConversationOverrides};
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to read {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Invalid assistant configuration in {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Assistant settings from `ASSISTANT_CONFIG`, with individual variables layered on top.
    pub overrides: AssistantOverrides,
    /// Conversation script played by the scripted assistant client.
    pub script_path: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let mut overrides = match std::env::var("ASSISTANT_CONFIG") {
            Ok(path) => read_overrides(PathBuf::from(path))?,
            Err(_) => AssistantOverrides::default(),
        };

        if let Ok(path) = std::env::var("ASSISTANT_KEY_FILE") {
            auth(&mut overrides).key_file_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("ASSISTANT_TOKENS_PATH") {
            auth(&mut overrides).saved_tokens_path = Some(PathBuf::from(path));
        }
        if let Ok(lang) = std::env::var("ASSISTANT_LANG") {
            conversation(&mut overrides).lang = Some(lang);
        }
        if let Some(autostart) = bool_var("ASSISTANT_AUTOSTART")? {
            overrides.autostart = Some(autostart);
        }
        if let Some(always_continue) = bool_var("ASSISTANT_ALWAYS_CONTINUE")? {
            overrides.always_continue = Some(always_continue);
        }

        let script_path = std::env::var("RELAY_SCRIPT")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingVar("RELAY_SCRIPT".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            overrides,
            script_path,
            log_level,
        })
    }
}

fn read_overrides(path: PathBuf) -> Result<AssistantOverrides, ConfigError> {
    let json = match std::fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) => return Err(ConfigError::Read(path, e)),
    };
    serde_json::from_str(&json).map_err(|e| ConfigError::Parse(path, e))
}

fn bool_var(name: &str) -> Result<Option<bool>, ConfigError> {
    let Ok(value) = std::env::var(name) else {
        return Ok(None);
    };
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", value),
        )),
    }
}

fn auth(overrides: &mut AssistantOverrides) -> &mut AuthOverrides {
    overrides.auth.get_or_insert_with(AuthOverrides::default)
}

fn conversation(overrides: &mut AssistantOverrides) -> &mut ConversationOverrides {
    overrides
        .conversation
        .get_or_insert_with(ConversationOverrides::default)
}
