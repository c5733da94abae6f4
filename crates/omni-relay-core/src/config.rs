//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::session::CompressionPolicy;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_BASE_URL: &str = "wss://generativelanguage.googleapis.com";
pub const DEFAULT_API_VERSION: &str = "v1beta";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Puck";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Omni, a kind and cheerful AI friend. \
Be warm, supportive and curious. Speak simply and encouragingly, and let your voice \
carry emotion: laugh, and change your intonation.";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionDefaults>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Answer CORS preflights for any origin (the browser client is served
    /// from a different host in development).
    #[serde(default = "default_true")]
    pub cors_allow_any_origin: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

/// Credentials and endpoint for the Gemini Live API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl UpstreamConfig {
    /// Resolve the API key: `api_key` first, then the `api_key_env` variable
    /// (`GOOGLE_API_KEY` when unset).
    pub fn resolve_api_key(&self) -> Option<String> {
        let env = self
            .api_key_env
            .clone()
            .or_else(|| Some(DEFAULT_API_KEY_ENV.to_string()));
        resolve_secret_field(&self.api_key, &env)
    }
}

/// Server-side defaults for every upstream session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<bool>,

    /// Upper bound on upstream session negotiation (default: 15).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub trigger_tokens: u64,
    pub target_tokens: u64,
}

impl SessionDefaults {
    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn voice(&self) -> String {
        self.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string())
    }

    pub fn system_instruction(&self) -> String {
        self.system_instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string())
    }

    pub fn response_modalities(&self) -> Vec<String> {
        self.response_modalities
            .clone()
            .unwrap_or_else(|| vec!["AUDIO".to_string()])
    }

    pub fn compression(&self) -> Option<CompressionPolicy> {
        self.compression.as_ref().map(|c| CompressionPolicy {
            trigger_tokens: c.trigger_tokens,
            target_tokens: c.target_tokens,
        })
    }

    pub fn input_transcription(&self) -> bool {
        self.input_transcription.unwrap_or(true)
    }

    pub fn output_transcription(&self) -> bool {
        self.output_transcription.unwrap_or(true)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }
}

/// Bounds for the per-participant settings store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Entries kept before the oldest is evicted (default: 1024).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,

    /// Seconds an untouched entry lives (default: 86400).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "omni_relay_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Default config file location: `~/.omni_relay/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    pub fn cors_allow_any_origin(&self) -> bool {
        self.gateway
            .as_ref()
            .map(|g| g.cors_allow_any_origin)
            .unwrap_or(true)
    }

    pub fn upstream_api_key(&self) -> Option<String> {
        self.upstream
            .clone()
            .unwrap_or_default()
            .resolve_api_key()
    }

    pub fn upstream_base_url(&self) -> String {
        self.upstream
            .as_ref()
            .and_then(|u| u.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn upstream_api_version(&self) -> String {
        self.upstream
            .as_ref()
            .and_then(|u| u.api_version.clone())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }

    /// Session defaults, with built-ins filled in for an absent section.
    pub fn session_defaults(&self) -> SessionDefaults {
        self.session.clone().unwrap_or_default()
    }

    pub fn settings_max_entries(&self) -> usize {
        self.settings
            .as_ref()
            .and_then(|s| s.max_entries)
            .unwrap_or(1024)
    }

    pub fn settings_ttl(&self) -> Duration {
        Duration::from_secs(
            self.settings
                .as_ref()
                .and_then(|s| s.ttl_secs)
                .unwrap_or(86_400),
        )
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "session.voice").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.upstream_api_key().is_none() {
            warnings.push(
                "Upstream has no API key configured (set upstream.api_key or GOOGLE_API_KEY)"
                    .to_string(),
            );
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if let Some(session) = &self.session {
            if session.connect_timeout_secs == Some(0) {
                errors.push("session.connect_timeout_secs cannot be 0".to_string());
            }
            if session.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
                errors.push("session.model cannot be empty".to_string());
            }
            if session
                .response_modalities
                .as_ref()
                .is_some_and(|m| m.is_empty())
            {
                errors.push("session.response_modalities cannot be empty".to_string());
            }
            if let Some(c) = &session.compression {
                if c.target_tokens >= c.trigger_tokens {
                    errors.push(format!(
                        "session.compression.target_tokens ({}) must be below trigger_tokens ({})",
                        c.target_tokens, c.trigger_tokens
                    ));
                }
            }
        }

        if self.settings.as_ref().and_then(|s| s.max_entries) == Some(0) {
            warnings.push("settings.max_entries is 0; participant settings will not be kept".to_string());
        }

        (warnings, errors)
    }
}

/// Base directory for relay data: `~/.omni_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".omni_relay")
}
