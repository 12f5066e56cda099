//! # Pipeline Topology
//!
//! The fixed queue graph: `ocr_queue → translation_queue → pdf_queue →
//! result_queue`, each stage paired with an error queue and a dead-letter
//! queue. Acyclicity is structural - a stage consumer can only name its
//! successor, error, and DLQ queues, never anything upstream.

use crate::stages::StageKind;

/// Terminal queue holding rendered-artifact references for the result
/// boundary (out of core scope) to pick up
pub const RESULT_QUEUE: &str = "result_queue";

/// Tag placed on messages the failure router re-injects
pub const ERROR_QUEUE_SOURCE: &str = "error_queue";

/// The queue triplet-plus-input one stage consumer is allowed to touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageQueues {
    /// Input queue this stage's consumers compete on
    pub input: &'static str,
    /// The immediate successor's input queue
    pub output: &'static str,
    /// Sideways path for circuit-open failures
    pub error: &'static str,
    /// Terminal path for exhausted messages
    pub dlq: &'static str,
}

/// Queue wiring for a stage
pub fn queues_for(stage: StageKind) -> StageQueues {
    match stage {
        StageKind::Recognition => StageQueues {
            input: "ocr_queue",
            output: "translation_queue",
            error: "ocr_error_queue",
            dlq: "ocr_dlq",
        },
        StageKind::Translation => StageQueues {
            input: "translation_queue",
            output: "pdf_queue",
            error: "translation_error_queue",
            dlq: "translation_dlq",
        },
        StageKind::Rendering => StageQueues {
            input: "pdf_queue",
            output: RESULT_QUEUE,
            error: "pdf_error_queue",
            dlq: "pdf_dlq",
        },
    }
}

/// Every queue in the topology, for idempotent declaration at startup
pub fn all_queue_names() -> Vec<&'static str> {
    let mut names = Vec::with_capacity(10);
    for stage in StageKind::all() {
        let queues = queues_for(stage);
        names.push(queues.input);
        names.push(queues.error);
        names.push(queues.dlq);
    }
    names.push(RESULT_QUEUE);
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_chain_forward_without_cycles() {
        let ocr = queues_for(StageKind::Recognition);
        let translation = queues_for(StageKind::Translation);
        let rendering = queues_for(StageKind::Rendering);

        assert_eq!(ocr.output, translation.input);
        assert_eq!(translation.output, rendering.input);
        assert_eq!(rendering.output, RESULT_QUEUE);

        // No stage may publish back into its own input
        for queues in [ocr, translation, rendering] {
            assert_ne!(queues.input, queues.output);
            assert_ne!(queues.input, queues.error);
            assert_ne!(queues.input, queues.dlq);
        }
    }

    #[test]
    fn every_stage_has_distinct_error_and_dlq_pairing() {
        let names = all_queue_names();
        assert_eq!(names.len(), 10);

        let mut deduped = names.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len(), "queue names must be unique");
    }
}
