//! # Pipeline Stages
//!
//! The three transformation stages (recognition, translation, rendering) are
//! opaque external collaborators behind a single call contract. The consumer
//! logic is written once and parameterized by [`StageKind`] plus a
//! [`StageService`] implementation, so the orchestration layer never knows
//! which engine sits behind a stage.

pub mod http;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpStageService;
pub use scripted::ScriptedStageService;

/// Identifies one transformation stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Text extraction from the source image
    Recognition,
    /// Translation of the extracted text
    Translation,
    /// Rendering of the translated text into a document artifact
    Rendering,
}

impl StageKind {
    /// Short name used in queue names, cache keys, and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Recognition => "ocr",
            StageKind::Translation => "translation",
            StageKind::Rendering => "pdf",
        }
    }

    /// All stages in pipeline order
    pub fn all() -> [StageKind; 3] {
        [
            StageKind::Recognition,
            StageKind::Translation,
            StageKind::Rendering,
        ]
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by a stage collaborator.
///
/// The distinction matters to the routing logic: invalid input is never
/// retried and goes straight to the dead-letter path, while transient
/// failures consume the retry budget before escalating.
#[derive(Debug, Error)]
pub enum StageServiceError {
    /// Input is malformed or references a resource that does not exist.
    #[error("invalid input for {stage} stage: {message}")]
    InvalidInput { stage: StageKind, message: String },

    /// The external operation failed in a way that may succeed on retry.
    #[error("{stage} stage operation failed: {message}")]
    Transient { stage: StageKind, message: String },
}

impl StageServiceError {
    pub fn invalid_input(stage: StageKind, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            message: message.into(),
        }
    }

    pub fn transient(stage: StageKind, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    /// Whether the failure may resolve on its own if the call is repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageServiceError::Transient { .. })
    }
}

/// Call contract for one external stage operation.
///
/// Implementations are assumed referentially transparent: equal inputs yield
/// equal outputs, and invocations have no side effects on the world beyond
/// being expensive. That assumption is what makes output memoization and
/// duplicate-compute races safe.
#[async_trait]
pub trait StageService: Send + Sync {
    /// Which stage this service implements
    fn kind(&self) -> StageKind;

    /// Check that the input references resources this service can reach.
    ///
    /// Called before the invocation path so that missing resources fail
    /// immediately instead of burning retries. The default accepts anything
    /// non-empty.
    fn validate(&self, input: &str) -> Result<(), StageServiceError> {
        if input.trim().is_empty() {
            return Err(StageServiceError::invalid_input(
                self.kind(),
                "empty stage input",
            ));
        }
        Ok(())
    }

    /// Run the stage operation on the given input.
    async fn invoke(&self, input: &str) -> Result<String, StageServiceError>;
}
