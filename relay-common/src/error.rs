//! Error types shared by the relay crates.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Startup and configuration failures.
#[derive(Error, Debug)]
pub enum Error {
    /// A required secret was not provided
    #[error("{0} is not set (environment or secrets section of the config file)")]
    MissingCredential(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with a description of what was being done.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to any error convertible into [`Error`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
