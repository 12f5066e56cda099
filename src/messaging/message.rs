//! # Message Structures
//!
//! Wire formats traveling between pipeline stages. The job envelope
//! accumulates fields as the job advances; the headers carry per-hop
//! metadata. Both serialize as JSON for queue storage.

use crate::stages::StageKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit of work traveling through the pipeline.
///
/// Fields are write-once: each stage reads what earlier stages wrote and
/// writes only its own output field. The source image travels as a
/// reference, never as the binary payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    /// Stable across the job's whole lifetime
    pub job_id: Uuid,
    /// Path/identifier of the uploaded image
    pub source_image_ref: String,
    /// Set by the recognition stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Set by the translation stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    /// Set by the rendering stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_artifact_ref: Option<String>,
}

impl JobEnvelope {
    /// Fresh envelope for a newly uploaded image
    pub fn new(source_image_ref: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            source_image_ref: source_image_ref.into(),
            extracted_text: None,
            translated_text: None,
            rendered_artifact_ref: None,
        }
    }

    /// The input field the given stage consumes, if already present
    pub fn stage_input(&self, stage: StageKind) -> Option<&str> {
        match stage {
            StageKind::Recognition => Some(self.source_image_ref.as_str()),
            StageKind::Translation => self.extracted_text.as_deref(),
            StageKind::Rendering => self.translated_text.as_deref(),
        }
    }

    /// Envelope advanced by one stage. Only the producing stage's own field
    /// is written; everything else is carried forward untouched.
    pub fn with_stage_output(&self, stage: StageKind, output: String) -> Self {
        let mut next = self.clone();
        match stage {
            StageKind::Recognition => {
                debug_assert!(next.extracted_text.is_none());
                next.extracted_text = Some(output);
            }
            StageKind::Translation => {
                debug_assert!(next.translated_text.is_none());
                next.translated_text = Some(output);
            }
            StageKind::Rendering => {
                debug_assert!(next.rendered_artifact_ref.is_none());
                next.rendered_artifact_ref = Some(output);
            }
        }
        next
    }
}

/// Per-hop metadata attached to every stage message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageHeaders {
    /// Enqueue time
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Time spent in the stage that produced this message
    pub processing_time_ms: u64,
    /// Whether the producing stage served its output from cache
    pub cached: bool,
    /// Human-readable cause; present only on error/DLQ messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure router re-injected this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_from: Option<String>,
}

impl MessageHeaders {
    fn now(processing_time_ms: u64, cached: bool) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            processing_time_ms,
            cached,
            error: None,
            retried_from: None,
        }
    }
}

/// The wire-level payload enqueued between stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageMessage {
    pub envelope: JobEnvelope,
    pub headers: MessageHeaders,
}

impl StageMessage {
    /// First message of a job, placed on the recognition input queue by the
    /// upload boundary
    pub fn entry(source_image_ref: impl Into<String>) -> Self {
        Self {
            envelope: JobEnvelope::new(source_image_ref),
            headers: MessageHeaders::now(0, false),
        }
    }

    /// Message forwarding an advanced envelope to the next stage
    pub fn forward(envelope: JobEnvelope, processing_time_ms: u64, cached: bool) -> Self {
        Self {
            envelope,
            headers: MessageHeaders::now(processing_time_ms, cached),
        }
    }

    /// Copy of this message carrying an error cause, for the error/DLQ paths
    pub fn with_error(&self, error: impl Into<String>, processing_time_ms: u64) -> Self {
        let mut copy = self.clone();
        copy.headers.error = Some(error.into());
        copy.headers.processing_time_ms = processing_time_ms;
        copy
    }

    /// Copy tagged as re-injected from the given source queue
    pub fn tagged_retried_from(&self, source: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.headers.retried_from = Some(source.into());
        copy
    }

    /// Serialize for queue storage
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Parse from queue storage
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_accumulates_fields_in_stage_order() {
        let envelope = JobEnvelope::new("img-1.png");
        assert_eq!(envelope.stage_input(StageKind::Recognition), Some("img-1.png"));
        assert_eq!(envelope.stage_input(StageKind::Translation), None);

        let after_ocr = envelope.with_stage_output(StageKind::Recognition, "hello".into());
        assert_eq!(after_ocr.stage_input(StageKind::Translation), Some("hello"));
        assert_eq!(after_ocr.job_id, envelope.job_id);
        assert_eq!(after_ocr.source_image_ref, "img-1.png");

        let after_translate =
            after_ocr.with_stage_output(StageKind::Translation, "xin chào".into());
        assert_eq!(
            after_translate.stage_input(StageKind::Rendering),
            Some("xin chào")
        );
        // Earlier fields are carried forward untouched
        assert_eq!(after_translate.extracted_text.as_deref(), Some("hello"));
    }

    #[test]
    fn stage_message_round_trips_through_json() {
        let message = StageMessage::entry("img-2.png");
        let json = message.to_json().unwrap();
        let parsed = StageMessage::from_json(json).unwrap();
        assert_eq!(parsed, message);
        assert!(!parsed.headers.cached);
        assert!(parsed.headers.error.is_none());
    }

    #[test]
    fn error_copy_preserves_envelope_and_sets_cause() {
        let message = StageMessage::entry("img-3.png");
        let errored = message.with_error("circuit open", 12);
        assert_eq!(errored.envelope, message.envelope);
        assert_eq!(errored.headers.error.as_deref(), Some("circuit open"));
        assert_eq!(errored.headers.processing_time_ms, 12);
    }
}
