//! Configuration management for the chat relay.
//!
//! The relay reads a single JSON file at `~/.chat-relay/config.json`
//! (override with `RELAY_CONFIG`). Every section is optional.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (see below)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `RELAY_PORT` → server.port
//! - `RELAY_BIND_ADDRESS` → network.bind
//! - `RELAY_LOG_LEVEL` → observability.log_level
//! - `RELAY_LOG_FORMAT` → observability.log_format
//! - `RELAY_HISTORY_PATH` → history.path
//! - `RELAY_MODEL` → gemini.model
//! - `RELAY_LOCALE` → chat.locale
//! - `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) → secrets.gemini_api_key

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chat-relay"),
        |dirs| dirs.home_dir().join(".chat-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.json"))
}

// ============================================================================
// Sections
// ============================================================================

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default is `127.0.0.1` (local only).
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Gemini generative-language API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Model name, with or without the `models/` prefix
    #[serde(default = "default_model")]
    pub model: String,

    /// API root, overridable for proxies and tests
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Whole-request timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Sampling temperature; the API default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_gemini_base_url(),
            timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

/// Conversation history persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// History file, relative paths resolve against the working directory
    #[serde(default = "default_history_path")]
    pub path: PathBuf,

    /// Keep load-time conversations that have no live session when saving.
    ///
    /// When `false`, a save writes only the conversations that are live in
    /// the current process, so identifiers untouched since startup are
    /// dropped from the file.
    #[serde(default)]
    pub preserve_untouched: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            preserve_untouched: false,
        }
    }
}

/// Language used for user-facing status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Fa,
}

impl Locale {
    /// Parse a locale code such as `en`, `fa` or `fa-IR`.
    pub fn parse(code: &str) -> Option<Self> {
        let primary = code.trim().split(['-', '_']).next()?.to_lowercase();
        match primary.as_str() {
            "en" => Some(Self::En),
            "fa" => Some(Self::Fa),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fa => "fa",
        }
    }
}

/// Chat endpoint behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Conversation identifier used when a request carries none
    #[serde(default = "default_user_id")]
    pub default_user_id: String,

    #[serde(default)]
    pub locale: Locale,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_user_id: default_user_id(),
            locale: Locale::default(),
        }
    }
}

/// Credentials. Usually supplied through the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to quiet down to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("RELAY_PORT") {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring unparsable RELAY_PORT"),
            }
        }

        if let Some(bind) = lookup("RELAY_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("RELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Some(path) = lookup("RELAY_HISTORY_PATH") {
            self.history.path = PathBuf::from(path);
        }

        if let Some(model) = lookup("RELAY_MODEL") {
            self.gemini.model = model;
        }

        if let Some(code) = lookup("RELAY_LOCALE") {
            match Locale::parse(&code) {
                Some(locale) => self.chat.locale = locale,
                None => tracing::warn!(value = %code, "Ignoring unknown RELAY_LOCALE"),
            }
        }

        if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) {
            if !key.trim().is_empty() {
                self.secrets.gemini_api_key = Some(key);
            }
        }
    }

    /// Get the Gemini API key.
    ///
    /// A missing or blank key is a configuration error.
    pub fn gemini_api_key(&self) -> crate::Result<String> {
        self.secrets
            .gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .ok_or(crate::Error::MissingCredential("GEMINI_API_KEY"))
    }

    /// Socket address the HTTP server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .network
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address {}", self.network.bind))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    5000
}
fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_history_path() -> PathBuf {
    PathBuf::from("conversation_history.json")
}
fn default_user_id() -> String {
    "web_user_1".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.network.bind, "127.0.0.1");
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.history.path, PathBuf::from("conversation_history.json"));
        assert!(!config.history.preserve_untouched);
        assert_eq!(config.chat.default_user_id, "web_user_1");
        assert_eq!(config.chat.locale, Locale::En);
        assert!(config.secrets.gemini_api_key.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server": {"port": 8080}, "chat": {"locale": "fa"}}"#)
                .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chat.locale, Locale::Fa);
        assert_eq!(config.gemini.timeout_secs, 120);
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.gemini.base_url, config.gemini.base_url);
        assert!(!json.contains("gemini_api_key"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"history": {"path": "/tmp/h.json"}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.history.path, PathBuf::from("/tmp/h.json"));
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("RELAY_PORT", "8088"),
            ("RELAY_BIND_ADDRESS", "0.0.0.0"),
            ("RELAY_HISTORY_PATH", "data/history.json"),
            ("RELAY_MODEL", "gemini-2.0-flash"),
            ("RELAY_LOCALE", "fa-IR"),
            ("GEMINI_API_KEY", "key-123"),
        ]));

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.network.bind, "0.0.0.0");
        assert_eq!(config.history.path, PathBuf::from("data/history.json"));
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.chat.locale, Locale::Fa);
        assert_eq!(config.gemini_api_key().unwrap(), "key-123");
    }

    #[test]
    fn test_overrides_ignore_bad_values() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("RELAY_PORT", "http"), ("RELAY_LOCALE", "de")]));
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.chat.locale, Locale::En);
    }

    #[test]
    fn test_google_api_key_fallback() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("GOOGLE_API_KEY", "google-key")]));
        assert_eq!(config.gemini_api_key().unwrap(), "google-key");

        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("GEMINI_API_KEY", "gemini-key"),
            ("GOOGLE_API_KEY", "google-key"),
        ]));
        assert_eq!(config.gemini_api_key().unwrap(), "gemini-key");
    }

    #[test]
    fn test_missing_api_key_is_error() {
        let mut config = Config::default();
        let err = config.gemini_api_key().unwrap_err();
        assert!(matches!(err, crate::Error::MissingCredential("GEMINI_API_KEY")));

        config.secrets.gemini_api_key = Some("   ".into());
        assert!(config.gemini_api_key().is_err());
    }

    #[test]
    fn test_bind_addr() {
        let mut config = Config::default();
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:5000");

        config.network.bind = "not-an-ip".into();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_locale_parse() {
        assert_eq!(Locale::parse("EN"), Some(Locale::En));
        assert_eq!(Locale::parse("fa_IR"), Some(Locale::Fa));
        assert_eq!(Locale::parse(""), None);
        assert_eq!(Locale::Fa.as_str(), "fa");
    }
}
