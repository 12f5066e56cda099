//! Top-level error type for pipeline assembly and operation.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<ConfigurationError> for PipelineError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
