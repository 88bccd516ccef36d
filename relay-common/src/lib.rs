//! Relay Common - Shared types, utilities, and configuration for the chat relay.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and request tracing helpers
//! - String utilities used when logging user content

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    ChatConfig, Config, GeminiConfig, HistoryConfig, Locale, NetworkConfig, ObservabilityConfig,
    SecretsConfig, ServerConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

