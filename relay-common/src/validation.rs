//! Configuration validation for the chat relay.
//!
//! Checks that required values are present and within valid ranges
//! before the server binds its socket.

use thiserror::Error;

use crate::config::{ChatConfig, Config, GeminiConfig, HistoryConfig, ObservabilityConfig};
use crate::error::ResultExt;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ValidationError::InvalidPort {
                port: self.server.port,
                field: "server.port".into(),
            });
        }

        let sections: [&dyn Validate; 4] =
            [&self.gemini, &self.history, &self.chat, &self.observability];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load configuration, apply environment overrides, and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

impl Validate for GeminiConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "gemini.model".into(),
            });
        }

        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "gemini.base_url".into(),
            });
        }

        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "gemini.timeout_secs".into(),
                reason: "timeouts must be greater than 0".into(),
            });
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ValidationError::InvalidValue {
                    field: "gemini.temperature".into(),
                    reason: format!("{t} is outside 0.0..=2.0"),
                });
            }
        }

        Ok(())
    }
}

impl Validate for HistoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::MissingField {
                field: "history.path".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ChatConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.default_user_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "chat.default_user_id".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
