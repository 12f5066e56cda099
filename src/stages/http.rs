//! # HTTP Stage Collaborators
//!
//! Production adapter for stage operations hosted as sidecar services
//! (recognition, translation, rendering each run as their own process). The
//! adapter owns nothing about the algorithm: it posts the stage input and
//! returns whatever the service produced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::{StageKind, StageService, StageServiceError};

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    output: String,
}

/// Stage service that calls an external HTTP collaborator.
#[derive(Debug, Clone)]
pub struct HttpStageService {
    kind: StageKind,
    client: reqwest::Client,
    endpoint: String,
    /// Root directory for inputs that name files (the recognition stage
    /// receives an image reference, not the image bytes). When set, referenced
    /// files are checked for existence during validation.
    resource_root: Option<PathBuf>,
}

impl HttpStageService {
    pub fn new(kind: StageKind, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            kind,
            client,
            endpoint: endpoint.into(),
            resource_root: None,
        }
    }

    /// Validate file-reference inputs against this directory
    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = Some(root.into());
        self
    }
}

#[async_trait]
impl StageService for HttpStageService {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn validate(&self, input: &str) -> Result<(), StageServiceError> {
        if input.trim().is_empty() {
            return Err(StageServiceError::invalid_input(
                self.kind,
                "empty stage input",
            ));
        }

        if let Some(root) = &self.resource_root {
            // Inputs are bare names, never caller-controlled paths
            let file_name = std::path::Path::new(input)
                .file_name()
                .ok_or_else(|| {
                    StageServiceError::invalid_input(self.kind, format!("bad resource ref: {input}"))
                })?;
            let resolved = root.join(file_name);
            if !resolved.exists() {
                return Err(StageServiceError::invalid_input(
                    self.kind,
                    format!("referenced resource not found: {}", resolved.display()),
                ));
            }
        }

        Ok(())
    }

    async fn invoke(&self, input: &str) -> Result<String, StageServiceError> {
        debug!(stage = %self.kind, endpoint = %self.endpoint, "📤 Invoking stage collaborator");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&InvokeRequest { input })
            .send()
            .await
            .map_err(|e| StageServiceError::transient(self.kind, e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            // The collaborator judged the input itself unusable
            let body = response.text().await.unwrap_or_default();
            return Err(StageServiceError::invalid_input(
                self.kind,
                format!("{status}: {body}"),
            ));
        }
        if !status.is_success() {
            return Err(StageServiceError::transient(
                self.kind,
                format!("collaborator returned {status}"),
            ));
        }

        let parsed: InvokeResponse = response
            .json()
            .await
            .map_err(|e| StageServiceError::transient(self.kind, e.to_string()))?;

        Ok(parsed.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_input() {
        let service = HttpStageService::new(StageKind::Translation, "http://localhost:9090/invoke");
        assert!(service.validate("   ").is_err());
        assert!(service.validate("some extracted text").is_ok());
    }

    #[test]
    fn validate_checks_resource_existence_when_rooted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("img-1.png"), b"png").unwrap();

        let service = HttpStageService::new(StageKind::Recognition, "http://localhost:9090/invoke")
            .with_resource_root(dir.path());

        assert!(service.validate("img-1.png").is_ok());
        let missing = service.validate("img-2.png").unwrap_err();
        assert!(!missing.is_retryable());
    }
}
