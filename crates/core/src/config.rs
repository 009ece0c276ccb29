//! Assistant Configuration
//!
//! The configuration is an explicit tree of typed leaves. Callers describe
//! only what they want to change through the `*Overrides` types, which are
//! merged recursively over a freshly built default tree and validated before
//! the facade ever sees them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the application root directory.
pub const APP_ROOT_ENV: &str = "APP_ROOT_PATH";

/// A configuration value that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue(field.to_string(), reason.into())
    }
}

/// Encodings the assistant accepts for caller audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncodingIn {
    Linear16,
    Flac,
}

/// Encodings the assistant can produce for its spoken replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncodingOut {
    Linear16,
    Mp3,
    OpusInOgg,
}

/// Credentials handed to the collaborator when it is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// OAuth client secret file.
    pub key_file_path: PathBuf,
    /// Where the collaborator persists its tokens. Created on demand by the collaborator.
    pub saved_tokens_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    pub encoding_in: EncodingIn,
    /// Between 16000 and 24000 inclusive.
    pub sample_rate_in: u32,
    pub encoding_out: EncodingOut,
    /// Either 16000 or 24000.
    pub sample_rate_out: u32,
}

/// Settings sent with every conversation start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    pub audio: AudioConfig,
    /// Language code for input and output, e.g. `en-US`.
    pub lang: String,
    /// Only set for devices that went through device registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// The fully merged configuration held by the facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    pub auth: AuthConfig,
    pub conversation: ConversationConfig,
    /// Start a conversation as soon as the collaborator reports readiness.
    pub autostart: bool,
    /// Start a follow-up conversation whenever one ends cleanly.
    pub always_continue: bool,
}

// --- Overrides ---

/// Caller-supplied configuration. Every leaf is optional.
///
/// Deserializes from the same camelCase keys the configuration file uses,
/// e.g. `{"conversation": {"audio": {"sampleRateIn": 22050}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssistantOverrides {
    pub auth: Option<AuthOverrides>,
    pub conversation: Option<ConversationOverrides>,
    pub autostart: Option<bool>,
    pub always_continue: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthOverrides {
    pub key_file_path: Option<PathBuf>,
    pub saved_tokens_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConversationOverrides {
    pub audio: Option<AudioOverrides>,
    pub lang: Option<String>,
    pub device_model_id: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AudioOverrides {
    pub encoding_in: Option<EncodingIn>,
    pub sample_rate_in: Option<u32>,
    pub encoding_out: Option<EncodingOut>,
    pub sample_rate_out: Option<u32>,
}

/// Per-call options for [`crate::Assistant::start`].
///
/// Unlike [`ConversationOverrides`] these are applied shallowly: a supplied
/// `audio` block replaces the stored one as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationOptions {
    pub audio: Option<AudioConfig>,
    pub lang: Option<String>,
    pub device_model_id: Option<String>,
    pub device_id: Option<String>,
}

impl ConversationOptions {
    /// Options that only change the conversation language.
    pub fn lang(lang: impl Into<String>) -> Self {
        Self {
            lang: Some(lang.into()),
            ..Default::default()
        }
    }
}

// --- Merging ---

/// Recursive merge of an optional override subtree into a configuration subtree.
trait Merge: Sized {
    type Overrides;

    fn merge(self, overrides: Option<Self::Overrides>) -> Self;
}

impl Merge for AuthConfig {
    type Overrides = AuthOverrides;

    fn merge(self, overrides: Option<AuthOverrides>) -> Self {
        let Some(o) = overrides else { return self };
        Self {
            key_file_path: o.key_file_path.unwrap_or(self.key_file_path),
            saved_tokens_path: o.saved_tokens_path.unwrap_or(self.saved_tokens_path),
        }
    }
}

impl Merge for AudioConfig {
    type Overrides = AudioOverrides;

    fn merge(self, overrides: Option<AudioOverrides>) -> Self {
        let Some(o) = overrides else { return self };
        Self {
            encoding_in: o.encoding_in.unwrap_or(self.encoding_in),
            sample_rate_in: o.sample_rate_in.unwrap_or(self.sample_rate_in),
            encoding_out: o.encoding_out.unwrap_or(self.encoding_out),
            sample_rate_out: o.sample_rate_out.unwrap_or(self.sample_rate_out),
        }
    }
}

impl Merge for ConversationConfig {
    type Overrides = ConversationOverrides;

    fn merge(self, overrides: Option<ConversationOverrides>) -> Self {
        let Some(o) = overrides else { return self };
        Self {
            audio: self.audio.merge(o.audio),
            lang: o.lang.unwrap_or(self.lang),
            device_model_id: o.device_model_id.or(self.device_model_id),
            device_id: o.device_id.or(self.device_id),
        }
    }
}

impl Merge for AssistantConfig {
    type Overrides = AssistantOverrides;

    fn merge(self, overrides: Option<AssistantOverrides>) -> Self {
        let Some(o) = overrides else { return self };
        Self {
            auth: self.auth.merge(o.auth),
            conversation: self.conversation.merge(o.conversation),
            autostart: o.autostart.unwrap_or(self.autostart),
            always_continue: o.always_continue.unwrap_or(self.always_continue),
        }
    }
}

// --- Defaults and validation ---

/// Resolves the application root used for the default credential locations.
///
/// Honors `APP_ROOT_PATH`, falling back to the current working directory.
pub fn app_root() -> PathBuf {
    std::env::var_os(APP_ROOT_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl AudioConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(16_000..=24_000).contains(&self.sample_rate_in) {
            return Err(ConfigError::invalid(
                "conversation.audio.sampleRateIn",
                format!("{} is outside 16000-24000", self.sample_rate_in),
            ));
        }
        if !matches!(self.sample_rate_out, 16_000 | 24_000) {
            return Err(ConfigError::invalid(
                "conversation.audio.sampleRateOut",
                format!("{} is not one of 16000, 24000", self.sample_rate_out),
            ));
        }
        Ok(())
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            encoding_in: EncodingIn::Linear16,
            sample_rate_in: 16_000,
            encoding_out: EncodingOut::Mp3,
            sample_rate_out: 24_000,
        }
    }
}

impl ConversationConfig {
    /// Applies per-call options shallowly and validates the result.
    pub fn with_options(&self, options: ConversationOptions) -> Result<Self, ConfigError> {
        let resolved = Self {
            audio: options.audio.unwrap_or(self.audio),
            lang: options.lang.unwrap_or_else(|| self.lang.clone()),
            device_model_id: options.device_model_id.or_else(|| self.device_model_id.clone()),
            device_id: options.device_id.or_else(|| self.device_id.clone()),
        };
        resolved.validate()?;
        Ok(resolved)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        if self.lang.trim().is_empty() {
            return Err(ConfigError::invalid("conversation.lang", "must not be empty"));
        }
        if self.device_model_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "conversation.deviceModelId",
                "must not be empty when set",
            ));
        }
        if self.device_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "conversation.deviceId",
                "must not be empty when set",
            ));
        }
        Ok(())
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            lang: "en-US".to_string(),
            device_model_id: None,
            device_id: None,
        }
    }
}

impl AssistantConfig {
    /// Builds a fresh default tree rooted at [`app_root`].
    pub fn defaults() -> Self {
        Self::defaults_in(&app_root())
    }

    /// Builds a fresh default tree with credential files under `root`.
    pub fn defaults_in(root: &Path) -> Self {
        Self {
            auth: AuthConfig {
                key_file_path: root.join("client_secret.json"),
                saved_tokens_path: root.join("tokens.json"),
            },
            conversation: ConversationConfig::default(),
            autostart: false,
            always_continue: true,
        }
    }

    /// Merges `overrides` over this tree. Caller values win at every depth.
    pub fn merged(self, overrides: AssistantOverrides) -> Result<Self, ConfigError> {
        let merged = self.merge(Some(overrides));
        merged.validate()?;
        Ok(merged)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.key_file_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("auth.keyFilePath", "must not be empty"));
        }
        if self.auth.saved_tokens_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "auth.savedTokensPath",
                "must not be empty",
            ));
        }
        self.conversation.validate()
    }
}
