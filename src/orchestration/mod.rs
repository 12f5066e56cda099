//! # Orchestration Module
//!
//! The staged-pipeline core: the fixed queue topology, the competing stage
//! consumers with their retry/breaker/cache middleware, the failure router
//! (error queue → dead-letter queue escalation), and the system assembly
//! that spawns and supervises it all.
//!
//! Data flows strictly forward through the queue chain; failures flow
//! sideways into error/DLQ queues and back to an origin queue only once that
//! stage's circuit has closed again.

pub mod consumer;
pub mod failure_router;
pub mod system;
pub mod topology;

pub use consumer::{MessageOutcome, StageConsumer, StageConsumerConfig};
pub use failure_router::{
    DlqObserver, ErrorRetention, FailureRouter, FailureRouterConfig, RouterOutcome,
};
pub use system::{PipelineSystem, PipelineSystemConfig};
pub use topology::{all_queue_names, queues_for, StageQueues, ERROR_QUEUE_SOURCE, RESULT_QUEUE};
